//! Platform-specific ways of reading and applying adapter configuration.
//!
//! Both implementations share [`NetworkConfiguration`] and the verification
//! step; nothing platform-specific leaks past this trait.

pub mod interfaces;
pub mod powershell;

use crate::config::NetworkSettings;
use crate::error::Result;
use crate::net::runner::PrivilegedRunner;
use crate::net::types::{InterfaceInfo, NetworkConfiguration};
use crate::net::verify::RetryPolicy;
use async_trait::async_trait;

pub use interfaces::InterfacesFileBackend;
pub use powershell::PowerShellBackend;

#[async_trait]
pub trait NetworkBackend: Send + Sync {
    fn supported(&self) -> bool;

    fn password_supported(&self) -> bool;

    /// Verification budget that suits how quickly this platform applies changes.
    fn default_retry_policy(&self) -> RetryPolicy;

    /// Names of adapters that can be configured.
    async fn list_adapters(&self, live: &[InterfaceInfo]) -> Result<Vec<String>>;

    /// Current configuration of `adapter`. The returned `index` is left unset.
    async fn read_configuration(
        &self,
        adapter: &str,
        index: Option<u32>,
    ) -> Result<NetworkConfiguration>;

    async fn apply(
        &self,
        desired: &NetworkConfiguration,
        index: Option<u32>,
        password: &str,
    ) -> Result<()>;

    async fn check_password(&self, password: &str) -> Result<bool>;
}

pub fn platform_backend(
    settings: &NetworkSettings,
    runner: PrivilegedRunner,
) -> Box<dyn NetworkBackend> {
    if cfg!(windows) {
        Box::new(PowerShellBackend::new())
    } else {
        Box::new(InterfacesFileBackend::new(settings, runner))
    }
}
