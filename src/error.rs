use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Requested transition is not legal in the current state
    #[error("Action error: {0}")]
    Action(String),

    /// An external tool exited with a non-zero code or could not be started
    #[error("'{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Image exists but the listing tool cannot read it
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Build a tool failure from a tool name and its diagnostic text
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether the caller can fix this by changing the request
    ///
    /// Front ends map these to "client error" responses; everything else is
    /// a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Action(_) | Self::NotFound(_) | Self::BadRequest(_)
        )
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
