use crate::net::runner::{
    DEFAULT_NOT_AUTHORIZED_MARKERS, DEFAULT_PROMPT_MARKERS, DEFAULT_REJECTED_MARKERS,
    PromptMarkers, RunnerConfig,
};
use crate::net::verify::RetryPolicy;
use crate::proxy::{ProxySettings, ProxyType, join_excludes, split_excludes};
use crate::vpn::VpnControl;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config directory not found")]
    ConfigDirNotFound,
    #[error("Permission denied writing {0}")]
    PermissionDenied(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// The `proxy` settings group as stored on disk.
#[derive(Clone, PartialEq, Serialize, Deserialize, Default, Debug)]
#[serde(default)]
pub struct ProxySettingsRecord {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub username: String,
    pub password: String,
    pub excludes: String,
}

impl ProxySettingsRecord {
    pub fn from_settings(settings: &ProxySettings, excludes: &[String]) -> Self {
        Self {
            enabled: settings.enabled,
            host: settings.host.clone(),
            port: settings.port,
            proxy_type: settings.proxy_type.as_str().to_string(),
            username: settings.user_name.clone(),
            password: settings.password.clone(),
            excludes: join_excludes(excludes),
        }
    }

    pub fn to_settings(&self) -> (ProxySettings, Vec<String>) {
        let settings = ProxySettings {
            enabled: self.enabled,
            host: self.host.clone(),
            port: self.port,
            proxy_type: ProxyType::from_setting(&self.proxy_type),
            user_name: self.username.clone(),
            password: self.password.clone(),
        }
        .normalized();
        (settings, split_excludes(&self.excludes))
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct NetworkSettings {
    pub interfaces_path: PathBuf,
    pub staging_path: PathBuf,
    pub elevation: Vec<String>,
    pub ifdown_command: String,
    pub ifup_command: String,
    pub copy_command: String,
    pub output_timeout_ms: u64,
    pub exit_timeout_ms: u64,
    pub prompt_markers: Vec<String>,
    pub not_authorized_markers: Vec<String>,
    pub rejected_markers: Vec<String>,
    /// Unset means the platform backend's default.
    pub verify_attempts: Option<u32>,
    pub verify_interval_ms: Option<u64>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            interfaces_path: PathBuf::from("/etc/network/interfaces"),
            staging_path: PathBuf::from("/tmp/interfaces_tmp"),
            elevation: strings(&["sudo", "-S", "-k"]),
            ifdown_command: "/sbin/ifdown".to_string(),
            ifup_command: "/sbin/ifup".to_string(),
            copy_command: "/bin/cp".to_string(),
            output_timeout_ms: 30_000,
            exit_timeout_ms: 30_000,
            prompt_markers: strings(DEFAULT_PROMPT_MARKERS),
            not_authorized_markers: strings(DEFAULT_NOT_AUTHORIZED_MARKERS),
            rejected_markers: strings(DEFAULT_REJECTED_MARKERS),
            verify_attempts: None,
            verify_interval_ms: None,
        }
    }
}

impl NetworkSettings {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            output_timeout: Duration::from_millis(self.output_timeout_ms),
            exit_timeout: Duration::from_millis(self.exit_timeout_ms),
            markers: PromptMarkers {
                prompt: self.prompt_markers.clone(),
                not_authorized: self.not_authorized_markers.clone(),
                rejected: self.rejected_markers.clone(),
            },
        }
    }

    pub fn retry_policy(&self, platform_default: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            attempts: self.verify_attempts.unwrap_or(platform_default.attempts),
            interval: self
                .verify_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(platform_default.interval),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct VpnSettings {
    pub start_command: Vec<String>,
    pub stop_command: Vec<String>,
    pub config_path: PathBuf,
    pub staging_path: PathBuf,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for VpnSettings {
    fn default() -> Self {
        Self {
            start_command: strings(&["/usr/sbin/service", "openvpn", "start"]),
            stop_command: strings(&["/usr/sbin/service", "openvpn", "stop"]),
            config_path: PathBuf::from("/etc/openvpn/client.conf"),
            staging_path: PathBuf::from("/tmp/openvpn_client_tmp"),
            poll_interval_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

impl VpnSettings {
    pub fn control(&self) -> VpnControl {
        VpnControl {
            start_command: self.start_command.clone(),
            stop_command: self.stop_command.clone(),
            config_path: self.config_path.clone(),
            staging_path: self.staging_path.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Default, Debug)]
#[serde(default)]
pub struct AppConfig {
    pub proxy: ProxySettingsRecord,
    pub network: NetworkSettings,
    pub vpn: VpnSettings,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(dirs::data_local_dir)
        .ok_or(ConfigError::ConfigDirNotFound)?;

    let app_config_dir = config_dir.join("hostnet");
    Ok(app_config_dir.join("config.jsonc"))
}

pub fn load_config() -> Result<AppConfig> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::new());
    }

    let content = fs::read_to_string(config_path)?;
    let stripped = json_comments::StripComments::new(content.as_bytes());
    let config: AppConfig = serde_json::from_reader(stripped)?;

    Ok(config)
}

/// Saves the configuration to the config file.
/// Note: Comments in the original file will not be preserved.
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn save_config_to(config_path: &Path, config: &AppConfig) -> Result<()> {
    let denied = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ConfigError::PermissionDenied(config_path.to_path_buf())
        } else {
            ConfigError::Io(e)
        }
    };

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(denied)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(config_path, json).map_err(denied)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        let path = get_config_path();
        assert!(path.is_ok());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("hostnet"));
        assert!(path.to_string_lossy().ends_with("config.jsonc"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("missing.jsonc")).unwrap();
        assert_eq!(config, AppConfig::new());
    }

    #[test]
    fn test_load_partial_config_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.jsonc");
        fs::write(
            &path,
            r#"{
                // proxy used by the print station
                "proxy": { "enabled": true, "host": "proxy.lan", "port": 8080, "type": "Socks5Proxy", "excludes": "*.lan;10.*" },
                "network": { "verify_attempts": 3 }
            }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        let (settings, excludes) = config.proxy.to_settings();
        assert!(settings.enabled);
        assert_eq!(settings.proxy_type, ProxyType::Socks5);
        assert_eq!(excludes, vec!["*.lan", "10.*"]);
        assert_eq!(config.network.verify_attempts, Some(3));
        assert_eq!(config.network.interfaces_path, PathBuf::from("/etc/network/interfaces"));
        assert_eq!(config.vpn, VpnSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.jsonc");
        let mut config = AppConfig::new();
        config.proxy.host = "proxy.lan".to_string();
        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_stored_proxy_without_host_is_disabled() {
        let record = ProxySettingsRecord {
            enabled: true,
            ..ProxySettingsRecord::default()
        };
        assert!(!record.to_settings().0.enabled);
    }

    #[test]
    fn test_retry_policy_overrides() {
        let mut network = NetworkSettings::default();
        assert_eq!(network.retry_policy(RetryPolicy::EVENTUAL), RetryPolicy::EVENTUAL);
        network.verify_attempts = Some(2);
        network.verify_interval_ms = Some(10);
        assert_eq!(
            network.retry_policy(RetryPolicy::SYNCHRONOUS),
            RetryPolicy {
                attempts: 2,
                interval: Duration::from_millis(10)
            }
        );
    }
}
