//! Confirms that a written configuration actually took effect.

use crate::error::ManagerError;
use crate::net::types::NetworkConfiguration;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// For tools that have applied everything by the time they exit.
    pub const SYNCHRONOUS: RetryPolicy = RetryPolicy {
        attempts: 1,
        interval: Duration::ZERO,
    };

    /// For tools that apply asynchronously after returning.
    pub const EVENTUAL: RetryPolicy = RetryPolicy {
        attempts: 20,
        interval: Duration::from_millis(250),
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldMismatch {
    Index {
        expected: Option<u32>,
        actual: Option<u32>,
    },
    Dhcp {
        expected: bool,
        actual: bool,
    },
    Address {
        expected: String,
        actual: String,
    },
    SubnetMask {
        expected: String,
        actual: String,
    },
    Gateway {
        expected: String,
        actual: String,
    },
    Dns {
        expected: (String, String),
        actual: (String, String),
    },
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMismatch::Index { expected, actual } => {
                write!(f, "interface index {:?} != {:?}", actual, expected)
            }
            FieldMismatch::Dhcp { expected, actual } => {
                write!(f, "dhcp {} != {}", actual, expected)
            }
            FieldMismatch::Address { expected, actual } => {
                write!(f, "address '{}' != '{}'", actual, expected)
            }
            FieldMismatch::SubnetMask { expected, actual } => {
                write!(f, "netmask '{}' != '{}'", actual, expected)
            }
            FieldMismatch::Gateway { expected, actual } => {
                write!(f, "gateway '{}' != '{}'", actual, expected)
            }
            FieldMismatch::Dns { expected, actual } => write!(
                f,
                "dns ('{}', '{}') != ('{}', '{}')",
                actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

pub fn format_mismatches(mismatches: &[FieldMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Field-by-field comparison of what was observed against what was requested.
///
/// Address fields only count in static mode. The DNS slots are an unordered
/// pair: each observed slot may match either requested slot.
pub fn compare(
    requested: &NetworkConfiguration,
    observed: &NetworkConfiguration,
    expected_index: Option<u32>,
) -> Vec<FieldMismatch> {
    let mut mismatches = Vec::new();

    if observed.index != expected_index {
        mismatches.push(FieldMismatch::Index {
            expected: expected_index,
            actual: observed.index,
        });
    }
    if observed.dhcp_enabled != requested.dhcp_enabled {
        mismatches.push(FieldMismatch::Dhcp {
            expected: requested.dhcp_enabled,
            actual: observed.dhcp_enabled,
        });
    }
    if requested.dhcp_enabled {
        return mismatches;
    }

    if observed.ipv4_address != requested.ipv4_address {
        mismatches.push(FieldMismatch::Address {
            expected: requested.ipv4_address.clone(),
            actual: observed.ipv4_address.clone(),
        });
    }
    if observed.subnet_mask != requested.subnet_mask {
        mismatches.push(FieldMismatch::SubnetMask {
            expected: requested.subnet_mask.clone(),
            actual: observed.subnet_mask.clone(),
        });
    }
    if observed.gateway != requested.gateway {
        mismatches.push(FieldMismatch::Gateway {
            expected: requested.gateway.clone(),
            actual: observed.gateway.clone(),
        });
    }

    let slot_matches =
        |slot: &str| slot == requested.preferred_dns || slot == requested.alternate_dns;
    if !slot_matches(&observed.preferred_dns) || !slot_matches(&observed.alternate_dns) {
        mismatches.push(FieldMismatch::Dns {
            expected: (
                requested.preferred_dns.clone(),
                requested.alternate_dns.clone(),
            ),
            actual: (
                observed.preferred_dns.clone(),
                observed.alternate_dns.clone(),
            ),
        });
    }

    mismatches
}

/// Re-reads the configuration with `fetch` until it matches `requested`.
///
/// Read failures count as an unconfirmed attempt. When the budget runs out
/// the last mismatch list is returned, or the last read error if no read
/// ever succeeded.
pub async fn verify_with_retry<F, Fut>(
    policy: RetryPolicy,
    requested: &NetworkConfiguration,
    expected_index: Option<u32>,
    mut fetch: F,
) -> Result<NetworkConfiguration, ManagerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<NetworkConfiguration, ManagerError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_mismatches: Option<Vec<FieldMismatch>> = None;
    let mut last_error: Option<ManagerError> = None;

    for attempt in 1..=attempts {
        match fetch().await {
            Ok(observed) => {
                let mismatches = compare(requested, &observed, expected_index);
                if mismatches.is_empty() {
                    debug!(attempt, "Network configuration verified");
                    return Ok(observed);
                }
                debug!(
                    attempt,
                    mismatches = %format_mismatches(&mismatches),
                    "Network configuration not applied yet"
                );
                last_mismatches = Some(mismatches);
            }
            Err(e) => {
                debug!(attempt, error = %e, "Network configuration can't be re-read");
                last_error = Some(e);
            }
        }

        if attempt < attempts && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }

    match (last_mismatches, last_error) {
        (Some(mismatches), _) => {
            warn!(
                mismatches = %format_mismatches(&mismatches),
                "Network configuration was not applied"
            );
            Err(ManagerError::VerificationMismatch(mismatches))
        }
        (None, Some(e)) => Err(e),
        (None, None) => Err(ManagerError::VerificationMismatch(Vec::new())),
    }
}
