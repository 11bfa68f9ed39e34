use crate::net::types::InterfaceInfo;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Interface enumeration failed: {0}")]
    Enumeration(String),
    #[error("Interface enumeration is not supported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Read-only view of the host's live interface table.
pub trait InterfaceQuery: Send + Sync {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInterfaces;

impl InterfaceQuery for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        get_network_interfaces()
    }
}

pub fn find_index(interfaces: &[InterfaceInfo], name: &str) -> Option<u32> {
    interfaces.iter().find(|i| i.name == name).map(|i| i.index)
}

pub fn has_point_to_point(interfaces: &[InterfaceInfo]) -> bool {
    interfaces.iter().any(|i| i.is_point_to_point)
}

/// Interface name to its non-loopback addresses.
pub fn address_map(interfaces: &[InterfaceInfo]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for interface in interfaces {
        for address in &interface.addresses {
            if address.is_loopback() {
                continue;
            }
            map.entry(interface.name.clone())
                .or_default()
                .push(address.to_string());
        }
    }
    map
}

#[cfg(unix)]
pub fn get_network_interfaces() -> Result<Vec<InterfaceInfo>> {
    use std::ffi::CStr;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    let mut interfaces: Vec<InterfaceInfo> = Vec::new();

    unsafe {
        let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifap) != 0 {
            return Err(NetworkError::Enumeration(
                std::io::Error::last_os_error().to_string(),
            ));
        }

        let mut current = ifap;
        while !current.is_null() {
            let ifa = &*current;
            current = ifa.ifa_next;

            if ifa.ifa_name.is_null() {
                continue;
            }
            let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();

            let position = match interfaces.iter().position(|i| i.name == name) {
                Some(position) => position,
                None => {
                    let flags = ifa.ifa_flags as libc::c_uint;
                    let mut info = InterfaceInfo::new(name, libc::if_nametoindex(ifa.ifa_name));
                    info.is_up = flags & libc::IFF_UP as libc::c_uint != 0;
                    info.is_loopback = flags & libc::IFF_LOOPBACK as libc::c_uint != 0;
                    info.is_point_to_point = flags & libc::IFF_POINTOPOINT as libc::c_uint != 0;
                    interfaces.push(info);
                    interfaces.len() - 1
                }
            };

            let addr = ifa.ifa_addr;
            if addr.is_null() {
                continue;
            }
            let family = i32::from((*addr).sa_family);
            let ip = if family == libc::AF_INET {
                let sa = std::ptr::read_unaligned(addr.cast::<libc::sockaddr_in>());
                Some(IpAddr::V4(Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes())))
            } else if family == libc::AF_INET6 {
                let sa = std::ptr::read_unaligned(addr.cast::<libc::sockaddr_in6>());
                Some(IpAddr::V6(Ipv6Addr::from(sa.sin6_addr.s6_addr)))
            } else {
                None
            };
            if let Some(ip) = ip {
                interfaces[position].addresses.push(ip);
            }
        }

        libc::freeifaddrs(ifap);
    }

    Ok(interfaces)
}

#[cfg(target_os = "windows")]
pub fn get_network_interfaces() -> Result<Vec<InterfaceInfo>> {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use windows::Win32::NetworkManagement::IpHelper::{
        GAA_FLAG_SKIP_ANYCAST, GAA_FLAG_SKIP_DNS_SERVER, GAA_FLAG_SKIP_MULTICAST,
        GetAdaptersAddresses, IP_ADAPTER_ADDRESSES_LH,
    };
    use windows::Win32::Networking::WinSock::{AF_UNSPEC, SOCKADDR_IN, SOCKADDR_IN6};

    const AF_INET: u16 = 2;
    const AF_INET6: u16 = 23;
    const IF_TYPE_PPP: u32 = 23;
    const IF_TYPE_SOFTWARE_LOOPBACK: u32 = 24;
    const IF_OPER_STATUS_UP: i32 = 1;

    let mut interfaces = Vec::new();
    let flags = GAA_FLAG_SKIP_ANYCAST | GAA_FLAG_SKIP_MULTICAST | GAA_FLAG_SKIP_DNS_SERVER;

    let mut buffer_size: u32 = 15000;
    let mut buffer: Vec<u8> = vec![0; buffer_size as usize];

    unsafe {
        let result = GetAdaptersAddresses(
            AF_UNSPEC.0 as u32,
            flags,
            None,
            Some(buffer.as_mut_ptr() as *mut IP_ADAPTER_ADDRESSES_LH),
            &mut buffer_size,
        );

        if result != 0 {
            return Err(NetworkError::Enumeration(format!(
                "GetAdaptersAddresses failed with code {}",
                result
            )));
        }

        let mut current = buffer.as_ptr() as *const IP_ADAPTER_ADDRESSES_LH;

        while !current.is_null() {
            let adapter = &*current;

            let name = if !adapter.FriendlyName.is_null() {
                let len = (0..)
                    .take_while(|&i| *adapter.FriendlyName.0.offset(i) != 0)
                    .count();
                let slice = std::slice::from_raw_parts(adapter.FriendlyName.0, len);
                String::from_utf16_lossy(slice)
            } else {
                "Unknown".to_string()
            };

            let mut info = InterfaceInfo::new(name, adapter.Anonymous1.Anonymous.IfIndex);
            info.is_up = adapter.OperStatus.0 == IF_OPER_STATUS_UP;
            info.is_loopback = adapter.IfType == IF_TYPE_SOFTWARE_LOOPBACK;
            info.is_point_to_point = adapter.IfType == IF_TYPE_PPP;

            let mac_len = adapter.PhysicalAddressLength as usize;
            if mac_len > 0 {
                let mac = adapter.PhysicalAddress[..mac_len.min(adapter.PhysicalAddress.len())]
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect::<Vec<_>>()
                    .join(":");
                info.hardware_address = Some(mac);
            }

            let mut unicast = adapter.FirstUnicastAddress;
            while !unicast.is_null() {
                let addr = &*unicast;
                if !addr.Address.lpSockaddr.is_null() {
                    let sockaddr = &*addr.Address.lpSockaddr;
                    match sockaddr.sa_family.0 {
                        AF_INET => {
                            let ipv4 = &*(addr.Address.lpSockaddr as *const SOCKADDR_IN);
                            let raw = ipv4.sin_addr.S_un.S_addr;
                            info.addresses
                                .push(IpAddr::V4(Ipv4Addr::from(raw.to_ne_bytes())));
                        }
                        AF_INET6 => {
                            let ipv6 = &*(addr.Address.lpSockaddr as *const SOCKADDR_IN6);
                            info.addresses
                                .push(IpAddr::V6(Ipv6Addr::from(ipv6.sin6_addr.u.Byte)));
                        }
                        _ => {}
                    }
                }
                unicast = addr.Next;
            }

            interfaces.push(info);
            current = adapter.Next;
        }
    }

    Ok(interfaces)
}

#[cfg(not(any(unix, target_os = "windows")))]
pub fn get_network_interfaces() -> Result<Vec<InterfaceInfo>> {
    Err(NetworkError::Unsupported)
}
