//! Reading and rewriting the Debian-style `interfaces` file.
//!
//! Rendering is purely textual: every line outside the target adapter's
//! `inet` block is copied through byte for byte.

use crate::net::types::NetworkConfiguration;
use crate::net::validation::ipv4_tokens;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path} can't be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} can't be written: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

const IFACE: &str = "iface";
const INET: &str = "inet";
const AUTO: &str = "auto";
const ALLOW_HOTPLUG: &str = "allow-hotplug";

const ADDRESS: &str = "address";
const NETMASK: &str = "netmask";
const GATEWAY: &str = "gateway";
const DNS_NAMESERVERS: &str = "dns-nameservers";

const FIELD_INDENT: &str = "    ";

/// `iface <adapter> inet <method>`
fn declares_inet(tokens: &[&str], adapter: &str) -> bool {
    tokens.len() >= 3 && tokens[0] == IFACE && tokens[1] == adapter && tokens[2] == INET
}

/// A top-level directive such as `auto lo eth0` that names `adapter`.
fn directive_names(tokens: &[&str], directive: &str, adapter: &str) -> bool {
    tokens.first() == Some(&directive) && tokens[1..].contains(&adapter)
}

fn is_comment(tokens: &[&str]) -> bool {
    tokens.first().is_some_and(|t| t.starts_with('#'))
}

fn is_block_boundary(tokens: &[&str]) -> bool {
    let Some(keyword) = tokens.first() else {
        return true;
    };
    matches!(
        *keyword,
        IFACE | AUTO | "mapping" | "no-auto-down" | "no-scripts"
    ) || keyword.starts_with("source")
        || keyword.starts_with("allow-")
}

/// Adapter names declared by `iface` lines, in file order, without duplicates.
pub fn declared_adapters(contents: &str) -> Vec<String> {
    let mut adapters: Vec<String> = Vec::new();
    for line in contents.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() > 1 && tokens[0] == IFACE && !adapters.iter().any(|a| a == tokens[1]) {
            adapters.push(tokens[1].to_string());
        }
    }
    adapters
}

/// Parses the first `inet` block declared for `adapter`.
///
/// The returned configuration never carries an interface index; that comes
/// from the live interface table.
pub fn parse_configuration(contents: &str, adapter: &str) -> Option<NetworkConfiguration> {
    let mut config: Option<NetworkConfiguration> = None;

    for line in contents.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if tokens.first() == Some(&IFACE) {
            if config.is_some() {
                break;
            }
            if declares_inet(&tokens, adapter) {
                config = Some(NetworkConfiguration {
                    description: adapter.to_string(),
                    dhcp_enabled: !tokens[3..].contains(&"static"),
                    ..NetworkConfiguration::default()
                });
            }
            continue;
        }

        let Some(current) = config.as_mut() else {
            continue;
        };

        let mut ips = ipv4_tokens(line);
        match tokens.first().copied() {
            Some(ADDRESS) => {
                if let Some(ip) = ips.next() {
                    current.ipv4_address = ip.to_string();
                }
            }
            Some(NETMASK) => {
                if let Some(ip) = ips.next() {
                    current.subnet_mask = ip.to_string();
                }
            }
            Some(GATEWAY) => {
                if let Some(ip) = ips.next() {
                    current.gateway = ip.to_string();
                }
            }
            Some(DNS_NAMESERVERS) => {
                if let Some(ip) = ips.next() {
                    current.preferred_dns = ip.to_string();
                }
                if let Some(ip) = ips.next() {
                    current.alternate_dns = ip.to_string();
                }
            }
            _ => {}
        }
    }

    config
}

fn render_block(desired: &NetworkConfiguration) -> String {
    let mut block = format!(
        "{} {} {} {}\n",
        IFACE,
        desired.description,
        INET,
        desired.mode().as_str()
    );

    if desired.dhcp_enabled {
        return block;
    }

    let fields = [
        (ADDRESS, desired.ipv4_address.clone()),
        (NETMASK, desired.subnet_mask.clone()),
        (GATEWAY, desired.gateway.clone()),
        (DNS_NAMESERVERS, desired.dns_servers().join(" ")),
    ];
    for (key, value) in fields {
        if !value.is_empty() {
            block.push_str(&format!("{FIELD_INDENT}{key} {value}\n"));
        }
    }
    block
}

fn ensure_trailing_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Produces the new file contents with `desired.description`'s block replaced.
///
/// Suppression of the old block stops at the first directive keyword or
/// blank line. Comment lines right before that boundary are kept; comments
/// followed by more of the old block's fields go with it. When no block exists one is appended, and `auto` /
/// `allow-hotplug` directives for the adapter are added once if missing.
pub fn render(contents: &str, desired: &NetworkConfiguration) -> String {
    let adapter = desired.description.as_str();
    let mut out = String::with_capacity(contents.len() + 256);
    let mut suppressing = false;
    let mut pending_comments = String::new();
    let mut replaced = false;
    let mut has_auto = false;
    let mut has_hotplug = false;

    for line in contents.split_inclusive('\n') {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        has_auto |= directive_names(&tokens, AUTO, adapter);
        has_hotplug |= directive_names(&tokens, ALLOW_HOTPLUG, adapter);

        if declares_inet(&tokens, adapter) {
            if !replaced {
                out.push_str(&render_block(desired));
                replaced = true;
            }
            suppressing = true;
            pending_comments.clear();
            continue;
        }

        if suppressing && is_comment(&tokens) {
            // Kept only if no field line of the old block follows.
            pending_comments.push_str(line);
            continue;
        }

        if is_block_boundary(&tokens) {
            suppressing = false;
            out.push_str(&pending_comments);
            pending_comments.clear();
        } else if suppressing {
            pending_comments.clear();
        }
        if !suppressing {
            out.push_str(line);
        }
    }
    out.push_str(&pending_comments);

    if !replaced {
        ensure_trailing_newline(&mut out);
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str(&render_block(desired));
    }
    if !has_auto {
        ensure_trailing_newline(&mut out);
        out.push_str(&format!("{AUTO} {adapter}\n"));
    }
    if !has_hotplug {
        ensure_trailing_newline(&mut out);
        out.push_str(&format!("{ALLOW_HOTPLUG} {adapter}\n"));
    }

    out
}

pub async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
}

pub async fn write_file(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| StoreError::Unwritable {
            path: path.to_path_buf(),
            source,
        })
}
