use crate::error::{ManagerError, Result};
use crate::net::backend::NetworkBackend;
use crate::net::types::{InterfaceInfo, NetworkConfiguration};
use crate::net::validation::ipv4_tokens;
use crate::net::verify::RetryPolicy;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

const SECTION_SEPARATOR: &str = ";";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Reads and writes adapter settings through WMI's
/// `Win32_NetworkAdapterConfiguration`. Writes go through an elevated
/// `Start-Process -Verb RunAs`, so the password is never used.
#[derive(Clone, Debug, Default)]
pub struct PowerShellBackend;

impl PowerShellBackend {
    pub fn new() -> Self {
        Self
    }
}

fn escape_powershell_string(s: &str) -> String {
    s.replace('`', "``")
        .replace("'", "''")
        .replace(['\n', '\r'], "")
}

fn normalize_error_message(msg: &str) -> String {
    msg.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", escape_powershell_string(v)))
        .collect::<Vec<_>>()
        .join(",")
}

async fn run_powershell(step: &str, script: &str) -> Result<String> {
    let script_with_setup = format!(
        "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; $ErrorActionPreference = 'Stop'; {}",
        script
    );
    let mut command = Command::new("powershell.exe");
    command.args([
        "-NoProfile",
        "-NonInteractive",
        "-Command",
        &script_with_setup,
    ]);

    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    let output = command
        .output()
        .await
        .map_err(|e| ManagerError::ProcessSpawnFailure {
            step: step.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ManagerError::CommandFailed {
            step: step.to_string(),
            code: output.status.code(),
            output: normalize_error_message(&stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn adapter_query(index: u32) -> String {
    format!(
        "$WMI = Get-WmiObject -Class Win32_NetworkAdapterConfiguration -Filter 'InterfaceIndex = {}';",
        index
    )
}

pub fn build_mac_list_script() -> &'static str {
    "Get-WmiObject Win32_NetworkAdapter | ForEach-Object { if ($_.PhysicalAdapter) { $_.MACAddress } }"
}

pub fn build_read_script(index: u32) -> String {
    let sep = format!(" '{}';", SECTION_SEPARATOR);
    format!(
        "{} $WMI.DHCPEnabled;{sep} $WMI.IPAddress;{sep} $WMI.IPSubnet;{sep} $WMI.DefaultIPGateway;{sep} $WMI.DNSServerSearchOrder;",
        adapter_query(index),
        sep = sep
    )
}

/// Parses the sections printed by [`build_read_script`]: dhcp flag,
/// addresses, subnets, gateways, then DNS servers. Each section keeps only
/// its IPv4 entries.
pub fn parse_wmi_output(output: &str, adapter: &str) -> NetworkConfiguration {
    let mut config = NetworkConfiguration {
        description: adapter.to_string(),
        ..NetworkConfiguration::default()
    };

    for (i, section) in output.split(SECTION_SEPARATOR).enumerate() {
        let mut ips = ipv4_tokens(section);
        match i {
            0 => config.dhcp_enabled = section.to_lowercase().contains("true"),
            1 => config.ipv4_address = ips.next().unwrap_or_default().to_string(),
            2 => config.subnet_mask = ips.next().unwrap_or_default().to_string(),
            3 => config.gateway = ips.next().unwrap_or_default().to_string(),
            4 => {
                config.preferred_dns = ips.next().unwrap_or_default().to_string();
                config.alternate_dns = ips
                    .find(|ip| *ip != config.preferred_dns)
                    .unwrap_or_default()
                    .to_string();
            }
            _ => {}
        }
    }

    config
}

/// Inner script run by the elevated PowerShell instance.
pub fn build_apply_script(desired: &NetworkConfiguration, index: u32) -> String {
    let mut script = adapter_query(index);

    if desired.dhcp_enabled {
        script.push_str(" $WMI.EnableDHCP();");
        script.push_str(" $WMI.SetGateways();");
        script.push_str(" $WMI.SetDNSServerSearchOrder();");
        return script;
    }

    script.push_str(&format!(
        " $WMI.EnableStatic(@({}), @({}));",
        quoted_list(std::slice::from_ref(&desired.ipv4_address)),
        quoted_list(std::slice::from_ref(&desired.subnet_mask))
    ));
    if desired.gateway.is_empty() {
        script.push_str(" $WMI.SetGateways();");
    } else {
        script.push_str(&format!(
            " $WMI.SetGateways(@({}));",
            quoted_list(std::slice::from_ref(&desired.gateway))
        ));
    }
    let dns = desired.dns_servers();
    if dns.is_empty() {
        script.push_str(" $WMI.SetDNSServerSearchOrder();");
    } else {
        script.push_str(&format!(
            " $WMI.SetDNSServerSearchOrder(@({}));",
            quoted_list(&dns)
        ));
    }
    script
}

pub fn build_elevated_script(inner: &str) -> String {
    format!(
        "Start-Process -FilePath powershell.exe -Verb RunAs -Wait -WindowStyle Hidden -ArgumentList '-NoProfile','-NonInteractive','-Command','{}'",
        escape_powershell_string(inner)
    )
}

fn mac_addresses(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_uppercase)
        .collect()
}

#[async_trait]
impl NetworkBackend for PowerShellBackend {
    fn supported(&self) -> bool {
        cfg!(windows)
    }

    fn password_supported(&self) -> bool {
        false
    }

    fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::EVENTUAL
    }

    async fn list_adapters(&self, live: &[InterfaceInfo]) -> Result<Vec<String>> {
        // Without the physical adapter list every non-loopback interface is offered.
        let physical = match run_powershell("list adapters", build_mac_list_script()).await {
            Ok(output) => Some(mac_addresses(&output)),
            Err(e) => {
                debug!(error = %e, "Physical adapter list unavailable");
                None
            }
        };

        Ok(live
            .iter()
            .filter(|interface| match &physical {
                Some(macs) => interface
                    .hardware_address
                    .as_ref()
                    .is_some_and(|mac| macs.contains(&mac.to_uppercase())),
                None => !interface.is_loopback,
            })
            .map(|interface| interface.name.clone())
            .collect())
    }

    async fn read_configuration(
        &self,
        adapter: &str,
        index: Option<u32>,
    ) -> Result<NetworkConfiguration> {
        let index = index.ok_or_else(|| ManagerError::ConfigurationNotFound(adapter.to_string()))?;
        let output = run_powershell("read configuration", &build_read_script(index)).await?;
        Ok(parse_wmi_output(&output, adapter))
    }

    async fn apply(
        &self,
        desired: &NetworkConfiguration,
        index: Option<u32>,
        _password: &str,
    ) -> Result<()> {
        let index = index
            .ok_or_else(|| ManagerError::ConfigurationNotFound(desired.description.clone()))?;
        let script = build_elevated_script(&build_apply_script(desired, index));
        debug!(adapter = %desired.description, index, "Applying configuration through WMI");
        run_powershell("apply configuration", &script).await?;
        Ok(())
    }

    async fn check_password(&self, _password: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_powershell_execution() {
        let result = run_powershell("echo", "Write-Output 'test'").await;
        assert!(result.expect("should succeed").contains("test"));
    }

    #[test]
    fn test_escape_powershell_string() {
        assert_eq!(escape_powershell_string("test"), "test");
        assert_eq!(escape_powershell_string("it's"), "it''s");
        assert_eq!(escape_powershell_string("back`tick"), "back``tick");
        assert_eq!(escape_powershell_string("new\nline"), "newline");
    }

    #[test]
    fn test_parse_wmi_output() {
        let output = "False\r\n;\r\n192.168.1.20\r\nfe80::1c2a:5bff:fe00:1\r\n;\r\n255.255.255.0\r\n64\r\n;\r\n192.168.1.1\r\n;\r\n8.8.8.8\r\n8.8.4.4\r\n";
        let config = parse_wmi_output(output, "Ethernet");
        assert_eq!(config.description, "Ethernet");
        assert!(!config.dhcp_enabled);
        assert_eq!(config.ipv4_address, "192.168.1.20");
        assert_eq!(config.subnet_mask, "255.255.255.0");
        assert_eq!(config.gateway, "192.168.1.1");
        assert_eq!(config.preferred_dns, "8.8.8.8");
        assert_eq!(config.alternate_dns, "8.8.4.4");
    }

    #[test]
    fn test_parse_wmi_output_dhcp_without_dns() {
        let config = parse_wmi_output("True\n;\n10.0.0.7\n;\n255.0.0.0\n;\n;\n", "Wi-Fi");
        assert!(config.dhcp_enabled);
        assert_eq!(config.ipv4_address, "10.0.0.7");
        assert!(config.gateway.is_empty());
        assert!(config.preferred_dns.is_empty());
    }

    #[test]
    fn test_build_apply_script_static() {
        let desired = NetworkConfiguration::static_ip("Ethernet", "10.0.0.5", "255.255.255.0")
            .with_gateway("10.0.0.1")
            .with_dns("1.1.1.1", "");
        let script = build_apply_script(&desired, 7);
        assert!(script.contains("'InterfaceIndex = 7'"));
        assert!(script.contains("EnableStatic(@('10.0.0.5'), @('255.255.255.0'))"));
        assert!(script.contains("SetGateways(@('10.0.0.1'))"));
        assert!(script.contains("SetDNSServerSearchOrder(@('1.1.1.1'))"));
        assert!(!script.contains("EnableDHCP"));
    }

    #[test]
    fn test_build_apply_script_dhcp_clears_gateways_and_dns() {
        let script = build_apply_script(&NetworkConfiguration::dhcp("Ethernet"), 3);
        assert!(script.contains("EnableDHCP()"));
        assert!(script.contains("SetGateways();"));
        assert!(script.contains("SetDNSServerSearchOrder();"));
    }

    #[test]
    fn test_build_elevated_script_escapes_inner_quotes() {
        let script = build_elevated_script("Write-Output 'x'");
        assert!(script.starts_with("Start-Process -FilePath powershell.exe -Verb RunAs -Wait"));
        assert!(script.ends_with("'Write-Output ''x'''"));
    }

    #[test]
    fn test_mac_addresses() {
        assert_eq!(
            mac_addresses("00:1a:2b:3c:4d:5e\r\n\r\nAA:BB:CC:DD:EE:FF\r\n"),
            vec!["00:1A:2B:3C:4D:5E", "AA:BB:CC:DD:EE:FF"]
        );
    }
}
