pub mod backend;
pub mod interfaces_file;
pub mod network;
pub mod runner;
pub mod types;
pub mod validation;
pub mod verify;

pub use backend::{InterfacesFileBackend, NetworkBackend, PowerShellBackend, platform_backend};
pub use network::{InterfaceQuery, NetworkError, SystemInterfaces, get_network_interfaces};
pub use runner::{CommandOutcome, CommandStatus, PrivilegedRunner, PromptMarkers, RunnerConfig};
pub use types::{AddressingMode, InterfaceInfo, NetworkConfiguration};
pub use validation::validate_configuration;
pub use verify::{FieldMismatch, RetryPolicy, verify_with_retry};
