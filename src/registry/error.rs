use thiserror::Error;

/// Failure of a registry lookup.
///
/// `Clone` so one shared lookup can hand the same outcome to every caller
/// that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid package name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("package {0} not found in registry")]
    NotFound(String),

    #[error("registry rejected request for {package}: HTTP {status}")]
    Rejected { package: String, status: u16 },

    #[error("registry request for {package} failed: {message}")]
    Transient { package: String, message: String },

    #[error("invalid registry response for {package}: {message}")]
    InvalidResponse { package: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl RegistryError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
