use crate::connection_string::ParseError;

/// Errors raised while turning a connection string into a backend.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("invalid connection string: {0}")]
    Parse(#[from] ParseError),

    #[error("connection string is missing required parameter '{key}'")]
    MissingParameter { key: String, critical: bool },

    #[error("connection string parameter '{key}' is invalid: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("no registered module handles prefix '{prefix}'")]
    UnrecognizedPrefix { prefix: String },

    #[error("backend construction failed: {0}")]
    Backend(#[source] anyhow::Error),
}

impl ResolveError {
    /// Whether dispatch must stop at this error rather than offer the
    /// connection string to the next module.
    pub fn halts_dispatch(&self) -> bool {
        !matches!(
            self,
            ResolveError::MissingParameter {
                critical: false,
                ..
            }
        )
    }
}
