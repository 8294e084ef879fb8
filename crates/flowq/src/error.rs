use std::fmt::Display;

/// A specialized error type for queue operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A swap file no longer exists at its recorded location.
    #[error("swap file not found: {0}")]
    SwapFileNotFound(String),
    /// A swap file failed integrity or format validation.
    #[error("swap file corrupt: {0}")]
    SwapFileCorrupt(String),
    /// A generic error occurred.
    #[error("other error: {0}")]
    Other(String),
}

impl QueueError {
    /// Create an invalid configuration error from a displayable value.
    pub fn invalid_config<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidConfig(msg.to_string())
    }

    /// Create a swap file corruption error from a displayable value.
    pub fn corrupt<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::SwapFileCorrupt(msg.to_string())
    }

    /// Create an opaque error from a displayable value.
    pub fn other<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Other(msg.to_string())
    }

    /// Whether the error means the swap file is simply gone rather than
    /// unreadable.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SwapFileNotFound(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// A Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
