/// Result alias that carries the custom [`VrackError`] type.
pub type Result<T> = std::result::Result<T, VrackError>;

/// Common error type for the core crate.
///
/// None of these are fatal to the dispatch loop: the server logs a routed
/// failure and moves on to the next message.
#[derive(Debug, thiserror::Error)]
pub enum VrackError {
    /// Truncated, misaligned or otherwise undecodable wire data.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// A create was requested for a type the catalog does not know.
    #[error("unknown module type `{0}`")]
    UnknownModuleType(String),
    /// No instance member matches the address.
    #[error("no binding for address `{0}`")]
    UnknownAddress(String),
    /// A value could not be coerced into the kind declared by its target.
    #[error("cannot write {found} into {expected} `{target}`")]
    TypeMismatch {
        target: String,
        expected: &'static str,
        found: &'static str,
    },
    /// The encoder ran out of room for the next field.
    #[error("encoder overflow: {needed} bytes needed, {available} available")]
    BufferOverflow { needed: usize, available: usize },
    /// A module descriptor failed validation at registration time.
    #[error("invalid module descriptor: {0}")]
    InvalidDescriptor(String),
    /// The server was ticked before `start` or after `stop`.
    #[error("server is not running")]
    NotRunning,
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl VrackError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn malformed<T: Into<String>>(msg: T) -> Self {
        Self::MalformedMessage(msg.into())
    }
}

impl From<&str> for VrackError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VrackError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
