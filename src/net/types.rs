use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub enum AddressingMode {
    #[default]
    Dhcp,
    Static,
}

impl AddressingMode {
    /// Method keyword used on `iface` declaration lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressingMode::Dhcp => "dhcp",
            AddressingMode::Static => "static",
        }
    }
}

/// Snapshot of one adapter's IPv4 configuration.
///
/// Built fresh on every query. When `dhcp_enabled` is set the address fields
/// are informational only and are never compared.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub struct NetworkConfiguration {
    pub description: String,
    pub index: Option<u32>,
    pub dhcp_enabled: bool,
    pub ipv4_address: String,
    pub subnet_mask: String,
    pub gateway: String,
    pub preferred_dns: String,
    pub alternate_dns: String,
}

impl NetworkConfiguration {
    pub fn dhcp(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            dhcp_enabled: true,
            ..Self::default()
        }
    }

    pub fn static_ip(
        description: impl Into<String>,
        ipv4_address: impl Into<String>,
        subnet_mask: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            ipv4_address: ipv4_address.into(),
            subnet_mask: subnet_mask.into(),
            ..Self::default()
        }
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = gateway.into();
        self
    }

    /// A lone alternate server is stored as the preferred one.
    pub fn with_dns(mut self, preferred: impl Into<String>, alternate: impl Into<String>) -> Self {
        self.preferred_dns = preferred.into();
        self.alternate_dns = alternate.into();
        self.normalized()
    }

    /// Moves a lone alternate DNS server into the preferred slot, matching how
    /// a single `dns-nameservers` entry reads back.
    pub fn normalized(mut self) -> Self {
        if self.preferred_dns.is_empty() && !self.alternate_dns.is_empty() {
            self.preferred_dns = std::mem::take(&mut self.alternate_dns);
        }
        self
    }

    pub fn mode(&self) -> AddressingMode {
        if self.dhcp_enabled {
            AddressingMode::Dhcp
        } else {
            AddressingMode::Static
        }
    }

    pub fn dns_servers(&self) -> Vec<String> {
        let mut servers = Vec::new();
        if !self.preferred_dns.is_empty() {
            servers.push(self.preferred_dns.clone());
        }
        if !self.alternate_dns.is_empty() {
            servers.push(self.alternate_dns.clone());
        }
        servers
    }
}

/// A live interface as reported by the host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub is_up: bool,
    pub is_loopback: bool,
    pub is_point_to_point: bool,
    pub hardware_address: Option<String>,
    pub addresses: Vec<IpAddr>,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
            is_up: true,
            is_loopback: false,
            is_point_to_point: false,
            hardware_address: None,
            addresses: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_follows_dhcp_flag() {
        assert_eq!(NetworkConfiguration::dhcp("eth0").mode(), AddressingMode::Dhcp);
        let config = NetworkConfiguration::static_ip("eth0", "10.0.0.5", "255.255.255.0");
        assert_eq!(config.mode(), AddressingMode::Static);
        assert_eq!(config.mode().as_str(), "static");
    }

    #[test]
    fn test_dns_servers_skips_empty_slots() {
        let config = NetworkConfiguration::static_ip("eth0", "10.0.0.5", "255.255.255.0")
            .with_dns("", "8.8.4.4");
        assert_eq!(config.dns_servers(), vec!["8.8.4.4".to_string()]);
    }

    #[test]
    fn test_lone_alternate_dns_moves_to_preferred() {
        let config = NetworkConfiguration::static_ip("eth0", "10.0.0.5", "255.255.255.0")
            .with_dns("", "8.8.4.4");
        assert_eq!(config.preferred_dns, "8.8.4.4");
        assert!(config.alternate_dns.is_empty());

        let literal = NetworkConfiguration {
            alternate_dns: "8.8.4.4".to_string(),
            ..NetworkConfiguration::static_ip("eth0", "10.0.0.5", "255.255.255.0")
        };
        assert_eq!(literal.normalized(), config);
    }
}
