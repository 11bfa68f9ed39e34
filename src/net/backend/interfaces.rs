use crate::config::NetworkSettings;
use crate::error::{ManagerError, Result};
use crate::net::backend::NetworkBackend;
use crate::net::interfaces_file::{self, declared_adapters, parse_configuration, render};
use crate::net::runner::{CommandStatus, PrivilegedRunner};
use crate::net::types::{InterfaceInfo, NetworkConfiguration};
use crate::net::verify::RetryPolicy;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Edits the ifupdown `interfaces` file and cycles the adapter with
/// `ifdown` / `ifup`, elevating through the runner.
#[derive(Clone, Debug)]
pub struct InterfacesFileBackend {
    runner: PrivilegedRunner,
    interfaces_path: PathBuf,
    staging_path: PathBuf,
    ifdown_command: String,
    ifup_command: String,
    copy_command: String,
}

impl InterfacesFileBackend {
    pub fn new(settings: &NetworkSettings, runner: PrivilegedRunner) -> Self {
        Self {
            runner,
            interfaces_path: settings.interfaces_path.clone(),
            staging_path: settings.staging_path.clone(),
            ifdown_command: settings.ifdown_command.clone(),
            ifup_command: settings.ifup_command.clone(),
            copy_command: settings.copy_command.clone(),
        }
    }
}

/// Writes `contents` to `staging`, then copies it over `target` with an
/// elevated copy tool. The staged file is removed whether or not the copy
/// succeeded.
pub async fn copy_into_place(
    runner: &PrivilegedRunner,
    copy_command: &str,
    staging: &Path,
    target: &Path,
    contents: &str,
    password: &str,
) -> Result<()> {
    interfaces_file::write_file(staging, contents).await?;

    debug!(path = %target.display(), "Copying staged file into place");
    let staging_arg = staging.to_string_lossy().into_owned();
    let target_arg = target.to_string_lossy().into_owned();
    let copy = runner
        .run(
            &runner.elevated(&[copy_command, staging_arg.as_str(), target_arg.as_str()]),
            password,
        )
        .await;

    if let Err(e) = tokio::fs::remove_file(staging).await {
        debug!(error = %e, "Staged file couldn't be removed");
    }

    if !copy.is_success() {
        warn!(output = %copy.output, "{} can't be rewritten", target.display());
    }
    ManagerError::check_outcome("copy file", copy)
}

#[async_trait]
impl NetworkBackend for InterfacesFileBackend {
    fn supported(&self) -> bool {
        cfg!(all(target_os = "linux", not(target_os = "android")))
    }

    fn password_supported(&self) -> bool {
        cfg!(target_os = "linux")
    }

    fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::SYNCHRONOUS
    }

    async fn list_adapters(&self, live: &[InterfaceInfo]) -> Result<Vec<String>> {
        let mut adapters = match interfaces_file::read_file(&self.interfaces_path).await {
            Ok(contents) => declared_adapters(&contents),
            Err(e) => {
                warn!(error = %e, "Declared adapters unavailable");
                Vec::new()
            }
        };

        for interface in live {
            if interface.is_loopback || interface.is_point_to_point {
                adapters.retain(|name| name != &interface.name);
            } else if !adapters.contains(&interface.name) {
                adapters.push(interface.name.clone());
            }
        }

        Ok(adapters)
    }

    async fn read_configuration(
        &self,
        adapter: &str,
        _index: Option<u32>,
    ) -> Result<NetworkConfiguration> {
        let contents = interfaces_file::read_file(&self.interfaces_path).await?;
        parse_configuration(&contents, adapter)
            .ok_or_else(|| ManagerError::ConfigurationNotFound(adapter.to_string()))
    }

    async fn apply(
        &self,
        desired: &NetworkConfiguration,
        _index: Option<u32>,
        password: &str,
    ) -> Result<()> {
        let adapter = desired.description.as_str();

        debug!(adapter, "Running ifdown");
        let ifdown = self
            .runner
            .run(
                &self.runner.elevated(&[self.ifdown_command.as_str(), adapter]),
                password,
            )
            .await;
        match ifdown.status {
            CommandStatus::Success => {}
            CommandStatus::ProcessFailedToStart => {
                return ManagerError::check_outcome("ifdown", ifdown);
            }
            // ifdown legitimately fails for adapters that were never up or
            // are not declared yet.
            status => debug!(adapter, ?status, output = %ifdown.output, "ifdown failed, continuing"),
        }

        let current = interfaces_file::read_file(&self.interfaces_path).await?;
        let rendered = render(&current, desired);
        copy_into_place(
            &self.runner,
            &self.copy_command,
            &self.staging_path,
            &self.interfaces_path,
            &rendered,
            password,
        )
        .await?;

        debug!(adapter, "Running ifup");
        let ifup = self
            .runner
            .run(
                &self.runner.elevated(&[self.ifup_command.as_str(), adapter]),
                password,
            )
            .await;
        if !ifup.is_success() {
            warn!(adapter, output = %ifup.output, "ifup failed");
        }
        ManagerError::check_outcome("ifup", ifup)
    }

    async fn check_password(&self, password: &str) -> Result<bool> {
        if !self.password_supported() {
            debug!("Password check is not supported for this platform");
            return Ok(true);
        }

        let outcome = self
            .runner
            .run(&self.runner.elevated(&["pwd"]), password)
            .await;
        match outcome.status {
            CommandStatus::Success => Ok(true),
            CommandStatus::ProcessFailedToStart => {
                ManagerError::check_outcome("password check", outcome).map(|_| false)
            }
            status => {
                debug!(?status, "Password check failed");
                Ok(false)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::net::runner::RunnerConfig;
    use std::time::Duration;

    const INITIAL: &str = "auto lo\niface lo inet loopback\n\nallow-hotplug wlan0\niface wlan0 inet dhcp\n";

    fn backend(dir: &std::path::Path, ifup: &str) -> InterfacesFileBackend {
        let settings = NetworkSettings {
            interfaces_path: dir.join("interfaces"),
            staging_path: dir.join("interfaces_tmp"),
            elevation: Vec::new(),
            ifdown_command: "false".to_string(),
            ifup_command: ifup.to_string(),
            copy_command: "cp".to_string(),
            ..NetworkSettings::default()
        };
        let runner = PrivilegedRunner::new(
            RunnerConfig {
                output_timeout: Duration::from_secs(5),
                exit_timeout: Duration::from_secs(5),
                ..RunnerConfig::default()
            },
            Vec::new(),
        );
        InterfacesFileBackend::new(&settings, runner)
    }

    #[tokio::test]
    async fn test_apply_rewrites_file_and_tolerates_ifdown_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("interfaces"), INITIAL).unwrap();
        let backend = backend(dir.path(), "true");

        let desired = NetworkConfiguration::static_ip("eth0", "10.0.0.5", "255.255.255.0")
            .with_gateway("10.0.0.1");
        backend.apply(&desired, Some(2), "").await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("interfaces")).unwrap();
        assert!(written.starts_with(INITIAL));
        assert!(written.contains("iface eth0 inet static\n    address 10.0.0.5\n"));
        assert!(!dir.path().join("interfaces_tmp").exists());

        let read = backend.read_configuration("eth0", Some(2)).await.unwrap();
        assert_eq!(read.ipv4_address, "10.0.0.5");
        assert_eq!(read.gateway, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_apply_reports_ifup_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("interfaces"), INITIAL).unwrap();
        let backend = backend(dir.path(), "false");

        let result = backend.apply(&NetworkConfiguration::dhcp("eth0"), None, "").await;
        assert!(matches!(result, Err(ManagerError::NoResponseFromProcess { .. })));
        // The file was already replaced; partial state is reported, not rolled back.
        let written = std::fs::read_to_string(dir.path().join("interfaces")).unwrap();
        assert!(written.contains("iface eth0 inet dhcp"));
    }

    #[tokio::test]
    async fn test_apply_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), "true");
        let result = backend.apply(&NetworkConfiguration::dhcp("eth0"), None, "").await;
        assert!(matches!(result, Err(ManagerError::FileUnreadable { .. })));
    }

    #[tokio::test]
    async fn test_read_unknown_adapter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("interfaces"), INITIAL).unwrap();
        let result = backend(dir.path(), "true").read_configuration("eth9", None).await;
        assert!(matches!(result, Err(ManagerError::ConfigurationNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_adapters_merges_live_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("interfaces"), INITIAL).unwrap();

        let mut lo = InterfaceInfo::new("lo", 1);
        lo.is_loopback = true;
        let mut tun = InterfaceInfo::new("tun0", 9);
        tun.is_point_to_point = true;
        let live = vec![lo, InterfaceInfo::new("eth0", 2), tun];

        let adapters = backend(dir.path(), "true").list_adapters(&live).await.unwrap();
        assert_eq!(adapters, vec!["wlan0", "eth0"]);
    }
}
