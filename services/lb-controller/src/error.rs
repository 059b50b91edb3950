//! Error types for the reconcilers.

use std::fmt;

use lbsync_cloud::CloudError;
use thiserror::Error;

/// Result type for reconciler operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// A failure confined to one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneFailure {
    pub zone: String,
    pub error: CloudError,
}

impl fmt::Display for ZoneFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.zone, self.error)
    }
}

/// Errors returned by the reconcilers.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A single collaborator call failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// One or more zones failed; every zone was attempted.
    #[error("{} zone(s) failed: {}", .0.len(), join_failures(.0))]
    Zones(Vec<ZoneFailure>),

    /// The Service cannot be expressed as a load balancer.
    #[error("invalid service {service}: {reason}")]
    InvalidService { service: String, reason: String },

    /// Resource description could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metric collectors could not be registered.
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

fn join_failures(failures: &[ZoneFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// Returns true if remediation is on the user, not the operator.
    pub fn is_user_error(&self) -> bool {
        match self {
            ControllerError::Cloud(err) => err.is_user_error(),
            ControllerError::InvalidService { .. } => true,
            ControllerError::Zones(failures) => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_user_error())
            }
            _ => false,
        }
    }

    /// Returns true if the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Cloud(err) if err.is_not_found())
    }

    /// Per-zone failures, empty for non-zonal errors.
    pub fn zone_failures(&self) -> &[ZoneFailure] {
        match self {
            ControllerError::Zones(failures) => failures,
            _ => &[],
        }
    }
}
