use crate::net::types::NetworkConfiguration;
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

static IPV4_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    )
    .expect("IPv4 pattern is valid")
});

/// IPv4-shaped tokens in `text`, left to right.
pub fn ipv4_tokens(text: &str) -> impl Iterator<Item = &str> {
    IPV4_TOKEN.find_iter(text).map(|m| m.as_str())
}

pub fn validate_ipv4(addr: &str) -> bool {
    if addr.trim().is_empty() {
        return true;
    }
    addr.parse::<Ipv4Addr>().is_ok()
}

pub fn validate_netmask(mask: &str) -> bool {
    if mask.trim().is_empty() {
        return true;
    }
    match mask.parse::<Ipv4Addr>() {
        Ok(addr) => {
            let bits = u32::from(addr);
            bits.leading_ones() + bits.trailing_zeros() == 32
        }
        Err(_) => false,
    }
}

pub fn validate_adapter_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

pub fn validate_configuration(config: &NetworkConfiguration) -> Result<(), String> {
    if !validate_adapter_name(&config.description) {
        return Err(format!("Invalid adapter name '{}'", config.description));
    }

    if config.dhcp_enabled {
        return Ok(());
    }

    if config.ipv4_address.is_empty() {
        return Err("IPv4 address is required for static addressing".to_string());
    }
    if !validate_ipv4(&config.ipv4_address) {
        return Err("Invalid IPv4 address".to_string());
    }
    if config.subnet_mask.is_empty() {
        return Err("Subnet mask is required for static addressing".to_string());
    }
    if !validate_netmask(&config.subnet_mask) {
        return Err("Invalid subnet mask".to_string());
    }
    if !validate_ipv4(&config.gateway) {
        return Err("Invalid gateway address".to_string());
    }
    if !validate_ipv4(&config.preferred_dns) {
        return Err("Invalid preferred DNS address".to_string());
    }
    if !validate_ipv4(&config.alternate_dns) {
        return Err("Invalid alternate DNS address".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ipv4() {
        assert!(validate_ipv4(""));
        assert!(validate_ipv4("8.8.8.8"));
        assert!(validate_ipv4("192.168.1.1"));
        assert!(!validate_ipv4("256.1.1.1"));
        assert!(!validate_ipv4("invalid"));
        assert!(!validate_ipv4("2001:4860:4860::8888"));
    }

    #[test]
    fn test_validate_netmask() {
        assert!(validate_netmask("255.255.255.0"));
        assert!(validate_netmask("255.255.240.0"));
        assert!(validate_netmask("0.0.0.0"));
        assert!(!validate_netmask("255.0.255.0"));
        assert!(!validate_netmask("255.255.255.1"));
    }

    #[test]
    fn test_ipv4_tokens() {
        let found: Vec<&str> = ipv4_tokens("dns-nameservers 8.8.8.8 1.1.1.1").collect();
        assert_eq!(found, vec!["8.8.8.8", "1.1.1.1"]);
        let found: Vec<&str> = ipv4_tokens("address 10.0.0.5/24").collect();
        assert_eq!(found, vec!["10.0.0.5"]);
        assert_eq!(ipv4_tokens("address 10.0.0.256").count(), 0);
    }

    #[test]
    fn test_validate_configuration() {
        assert!(validate_configuration(&NetworkConfiguration::dhcp("eth0")).is_ok());
        assert!(validate_configuration(&NetworkConfiguration::dhcp("eth 0")).is_err());

        let good = NetworkConfiguration::static_ip("eth0", "10.0.0.5", "255.255.255.0")
            .with_gateway("10.0.0.1")
            .with_dns("8.8.8.8", "");
        assert!(validate_configuration(&good).is_ok());

        let missing_mask = NetworkConfiguration::static_ip("eth0", "10.0.0.5", "");
        assert!(validate_configuration(&missing_mask).is_err());

        let bad_gateway = good.clone().with_gateway("10.0.0");
        assert!(validate_configuration(&bad_gateway).is_err());
    }
}
