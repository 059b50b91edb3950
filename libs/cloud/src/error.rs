//! Error types for cloud and cluster API calls.

use thiserror::Error;

/// Result type for collaborator calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Structured outcome of a failed collaborator call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists (another actor created it first).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The resource is still referenced by another resource.
    #[error("resource in use: {0}")]
    InUse(String),

    /// An instance being added is already a member of the group.
    #[error("member already exists: {0}")]
    MemberAlreadyExists(String),

    /// The requested configuration is invalid; remediation is on the user.
    #[error("invalid user configuration: {0}")]
    User(String),

    /// Quota, rate limiting or a backend 5xx; retry on the next pass.
    #[error("transient cloud error: {0}")]
    Transient(String),

    /// A resource URL or descriptor could not be interpreted.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Any other failure.
    #[error("cloud error: {0}")]
    Internal(String),
}

impl CloudError {
    /// Returns true if the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    /// Returns true if another actor created the resource first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudError::Conflict(_))
    }

    /// Returns true if the resource is still referenced elsewhere.
    pub fn is_in_use(&self) -> bool {
        matches!(self, CloudError::InUse(_))
    }

    /// Returns true if an added instance was already a member.
    pub fn is_member_already_exists(&self) -> bool {
        matches!(self, CloudError::MemberAlreadyExists(_))
    }

    /// Returns true if the error was caused by user configuration.
    pub fn is_user_error(&self) -> bool {
        matches!(self, CloudError::User(_))
    }

    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}
