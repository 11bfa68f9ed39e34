//! Per-request proxy selection built from the stored proxy settings.

use glob::{MatchOptions, Pattern};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Separator used when the exclude list is stored as one string.
pub const EXCLUDES_SEPARATOR: char = ';';

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub enum ProxyType {
    #[default]
    Http,
    HttpCaching,
    Socks5,
    FtpCaching,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Http => "HttpProxy",
            ProxyType::HttpCaching => "HttpCachingProxy",
            ProxyType::Socks5 => "Socks5Proxy",
            ProxyType::FtpCaching => "FtpCachingProxy",
        }
    }

    /// Unrecognized names fall back to a plain HTTP proxy.
    pub fn from_setting(value: &str) -> Self {
        [
            ProxyType::Http,
            ProxyType::HttpCaching,
            ProxyType::Socks5,
            ProxyType::FtpCaching,
        ]
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(value.trim()))
        .unwrap_or_default()
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Socks5 => "socks5",
            ProxyType::FtpCaching => "ftp",
            ProxyType::Http | ProxyType::HttpCaching => "http",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub struct ProxySettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    pub user_name: String,
    pub password: String,
}

impl ProxySettings {
    /// Applies the rule that a proxy without a host is never enabled.
    pub fn normalized(mut self) -> Self {
        if self.host.trim().is_empty() {
            self.enabled = false;
        }
        self
    }

    pub fn url(&self) -> String {
        let credentials = if self.user_name.is_empty() {
            String::new()
        } else if self.password.is_empty() {
            format!("{}@", self.user_name)
        } else {
            format!("{}:{}@", self.user_name, self.password)
        };
        format!(
            "{}://{}{}:{}",
            self.proxy_type.scheme(),
            credentials,
            self.host,
            self.port
        )
    }
}

pub fn split_excludes(stored: &str) -> Vec<String> {
    stored
        .split(EXCLUDES_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_excludes(excludes: &[String]) -> String {
    excludes.join(&EXCLUDES_SEPARATOR.to_string())
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ProxyChoice {
    Direct,
    Proxy(ProxySettings),
    /// No explicit decision; defer to the operating system's proxy discovery.
    System,
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[derive(Clone, Debug)]
pub struct ProxyPolicy {
    settings: ProxySettings,
    excludes: Vec<String>,
    patterns: Vec<Pattern>,
}

impl ProxyPolicy {
    pub fn new(settings: ProxySettings, excludes: Vec<String>) -> Self {
        let patterns = excludes
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "Ignoring malformed proxy exclude pattern");
                    None
                }
            })
            .collect();

        Self {
            settings: settings.normalized(),
            excludes,
            patterns,
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    pub fn select(&self, target_host: &str) -> ProxyChoice {
        if is_loopback_host(target_host) {
            return ProxyChoice::Direct;
        }

        if let Some(pattern) = self
            .patterns
            .iter()
            .find(|p| p.matches_with(target_host, MATCH_OPTIONS))
        {
            debug!(host = %target_host, pattern = %pattern, "Proxy bypassed by exclude pattern");
            return ProxyChoice::Direct;
        }

        if self.settings.enabled && !self.settings.host.is_empty() {
            ProxyChoice::Proxy(self.settings.clone())
        } else {
            ProxyChoice::System
        }
    }
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self::new(ProxySettings::default(), Vec::new())
    }
}

/// Owner of the active proxy policy.
///
/// Readers take a snapshot `Arc`; a write replaces the whole policy at once.
#[derive(Debug, Default)]
pub struct ProxyContext {
    current: RwLock<Arc<ProxyPolicy>>,
}

impl ProxyContext {
    pub fn new(settings: ProxySettings, excludes: Vec<String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(ProxyPolicy::new(settings, excludes))),
        }
    }

    pub fn policy(&self) -> Arc<ProxyPolicy> {
        self.current.read().clone()
    }

    pub fn install(&self, settings: ProxySettings, excludes: Vec<String>) {
        let policy = Arc::new(ProxyPolicy::new(settings, excludes));
        *self.current.write() = policy;
    }

    pub fn select(&self, target_host: &str) -> ProxyChoice {
        self.policy().select(target_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_settings() -> ProxySettings {
        ProxySettings {
            enabled: true,
            host: "proxy.example".to_string(),
            port: 3128,
            proxy_type: ProxyType::Http,
            user_name: String::new(),
            password: String::new(),
        }
    }

    #[test]
    fn test_exclude_pattern_resolves_direct() {
        let policy = ProxyPolicy::new(enabled_settings(), vec!["*.internal.example".to_string()]);
        assert_eq!(policy.select("db.internal.example"), ProxyChoice::Direct);
        assert_eq!(policy.select("DB.Internal.Example"), ProxyChoice::Direct);
        assert_eq!(
            policy.select("www.example.com"),
            ProxyChoice::Proxy(enabled_settings())
        );
    }

    #[test]
    fn test_loopback_is_always_direct() {
        let policy = ProxyPolicy::new(enabled_settings(), Vec::new());
        assert_eq!(policy.select("localhost"), ProxyChoice::Direct);
        assert_eq!(policy.select("127.0.0.1"), ProxyChoice::Direct);
        assert_eq!(policy.select("[::1]"), ProxyChoice::Direct);
    }

    #[test]
    fn test_empty_host_forces_disabled() {
        let settings = ProxySettings {
            host: String::new(),
            ..enabled_settings()
        };
        let policy = ProxyPolicy::new(settings, Vec::new());
        assert!(!policy.settings().enabled);
        assert_eq!(policy.select("www.example.com"), ProxyChoice::System);
    }

    #[test]
    fn test_disabled_defers_to_system() {
        let settings = ProxySettings {
            enabled: false,
            ..enabled_settings()
        };
        let policy = ProxyPolicy::new(settings, Vec::new());
        assert_eq!(policy.select("www.example.com"), ProxyChoice::System);
    }

    #[test]
    fn test_malformed_pattern_is_skipped() {
        let policy = ProxyPolicy::new(
            enabled_settings(),
            vec!["[".to_string(), "*.lan".to_string()],
        );
        assert_eq!(policy.excludes().len(), 2);
        assert_eq!(policy.select("printer.lan"), ProxyChoice::Direct);
    }

    #[test]
    fn test_proxy_type_from_setting() {
        assert_eq!(ProxyType::from_setting("Socks5Proxy"), ProxyType::Socks5);
        assert_eq!(ProxyType::from_setting("httpcachingproxy"), ProxyType::HttpCaching);
        assert_eq!(ProxyType::from_setting("gopher"), ProxyType::Http);
        assert_eq!(ProxyType::from_setting(""), ProxyType::Http);
    }

    #[test]
    fn test_excludes_round_trip_through_storage() {
        let stored = "*.lan; 10.* ;;intranet";
        let excludes = split_excludes(stored);
        assert_eq!(excludes, vec!["*.lan", "10.*", "intranet"]);
        assert_eq!(join_excludes(&excludes), "*.lan;10.*;intranet");
    }

    #[test]
    fn test_url() {
        let mut settings = enabled_settings();
        assert_eq!(settings.url(), "http://proxy.example:3128");
        settings.proxy_type = ProxyType::Socks5;
        settings.user_name = "bob".to_string();
        settings.password = "pw".to_string();
        assert_eq!(settings.url(), "socks5://bob:pw@proxy.example:3128");
    }

    #[test]
    fn test_context_swaps_whole_policy() {
        let context = ProxyContext::new(enabled_settings(), Vec::new());
        let before = context.policy();
        context.install(ProxySettings::default(), vec!["*".to_string()]);

        assert_eq!(before.select("a.example"), ProxyChoice::Proxy(enabled_settings()));
        assert_eq!(context.select("a.example"), ProxyChoice::Direct);
    }
}
