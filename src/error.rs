use crate::config::ConfigError;
use crate::net::interfaces_file::StoreError;
use crate::net::network::NetworkError;
use crate::net::runner::{CommandOutcome, CommandStatus};
use crate::net::verify::{FieldMismatch, format_mismatches};
use crate::vpn::VpnDirection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Module code carried by every error event from this crate.
pub const NETWORK_MODULE_CODE: i64 = 103;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("{step}: process can't be started: {reason}")]
    ProcessSpawnFailure { step: String, reason: String },
    #[error("{step}: password was rejected")]
    AuthRejected { step: String },
    #[error("{step}: user is not allowed to run privileged commands")]
    NotAuthorized { step: String },
    #[error("{step}: no response from process")]
    NoResponseFromProcess { step: String },
    #[error("{step}: command failed with exit code {code:?}")]
    CommandFailed {
        step: String,
        code: Option<i32>,
        output: String,
    },
    #[error("{path} can't be read: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} can't be written: {source}")]
    FileUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Network configuration was not applied: {}", format_mismatches(.0))]
    VerificationMismatch(Vec<FieldMismatch>),
    #[error("VPN can't be {}", vpn_failure(.0))]
    VpnTimeout(VpnDirection),
    #[error("No network configuration found for {0}")]
    ConfigurationNotFound(String),
    #[error("Settings file {0} is not writable")]
    PermissionDenied(PathBuf),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Not supported on this platform: {0}")]
    Unsupported(String),
    #[error("Network worker is not running: {0}")]
    WorkerUnavailable(String),
    #[error(transparent)]
    Query(#[from] NetworkError),
    #[error(transparent)]
    Settings(ConfigError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

fn vpn_failure(direction: &VpnDirection) -> &'static str {
    direction.failure_verb()
}

impl From<StoreError> for ManagerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unreadable { path, source } => ManagerError::FileUnreadable { path, source },
            StoreError::Unwritable { path, source } => ManagerError::FileUnwritable { path, source },
        }
    }
}

impl From<ConfigError> for ManagerError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::PermissionDenied(path) => ManagerError::PermissionDenied(path),
            other => ManagerError::Settings(other),
        }
    }
}

impl ManagerError {
    /// Maps a finished command to `Ok(())` or the matching failure kind.
    pub fn check_outcome(step: &str, outcome: CommandOutcome) -> Result<()> {
        let step = step.to_string();
        match outcome.status {
            CommandStatus::Success => Ok(()),
            CommandStatus::AuthRejected => Err(ManagerError::AuthRejected { step }),
            CommandStatus::NotAuthorized => Err(ManagerError::NotAuthorized { step }),
            CommandStatus::ProcessFailedToStart => Err(ManagerError::ProcessSpawnFailure {
                step,
                reason: outcome.output,
            }),
            CommandStatus::NoResponse => Err(ManagerError::NoResponseFromProcess { step }),
            CommandStatus::Failed(code) => Err(ManagerError::CommandFailed {
                step,
                code,
                output: outcome.output,
            }),
        }
    }

    pub fn error_code(&self) -> i64 {
        match self {
            ManagerError::ProcessSpawnFailure { .. } => 1,
            ManagerError::AuthRejected { .. } => 2,
            ManagerError::NotAuthorized { .. } => 3,
            ManagerError::NoResponseFromProcess { .. } => 4,
            ManagerError::CommandFailed { .. } => 5,
            ManagerError::FileUnreadable { .. } => 6,
            ManagerError::FileUnwritable { .. } => 7,
            ManagerError::VerificationMismatch(_) => 8,
            ManagerError::VpnTimeout(VpnDirection::Start) => 9,
            ManagerError::VpnTimeout(VpnDirection::Stop) => 10,
            ManagerError::ConfigurationNotFound(_) => 11,
            ManagerError::PermissionDenied(_) => 12,
            ManagerError::InvalidRequest(_) => 13,
            ManagerError::Unsupported(_) => 14,
            ManagerError::Query(_) => 15,
            ManagerError::Settings(_) => 16,
            ManagerError::WorkerUnavailable(_) => 17,
        }
    }

    /// Whether the message makes sense to an end user as-is.
    pub fn user_friendly(&self) -> bool {
        matches!(
            self,
            ManagerError::AuthRejected { .. }
                | ManagerError::NotAuthorized { .. }
                | ManagerError::VerificationMismatch(_)
                | ManagerError::VpnTimeout(_)
                | ManagerError::ConfigurationNotFound(_)
                | ManagerError::PermissionDenied(_)
                | ManagerError::InvalidRequest(_)
        )
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent {
            module_code: NETWORK_MODULE_CODE,
            error_code: self.error_code(),
            message: self.to_string(),
            user_friendly: self.user_friendly(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub module_code: i64,
    pub error_code: i64,
    pub message: String,
    pub user_friendly: bool,
}
