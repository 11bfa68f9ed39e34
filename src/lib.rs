//! Host network configuration: adapter addressing, VPN service control and
//! proxy selection, all driven from one background worker.

pub mod config;
pub mod error;
pub mod manager;
pub mod net;
pub mod proxy;
pub mod vpn;

pub use config::{AppConfig, get_config_path, load_config, load_config_from, save_config};
pub use error::{ErrorEvent, ManagerError, NETWORK_MODULE_CODE};
pub use manager::{Event, ManagerParts, NetworkConfigurationManager};
pub use net::{InterfaceInfo, NetworkConfiguration};
pub use proxy::{ProxyChoice, ProxyContext, ProxyPolicy, ProxySettings, ProxyType};
pub use vpn::{VpnDirection, VpnState};
