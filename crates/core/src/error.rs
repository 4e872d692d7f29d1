/// Result alias that carries the custom [`EchoError`] type.
pub type Result<T> = std::result::Result<T, EchoError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    /// Free-form message, mostly used for poisoned shared state.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A frame or configuration document that is not valid JSON for the
    /// expected shape.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),
    /// A musical time string that could not be parsed.
    #[error("invalid musical time `{0}`")]
    InvalidTime(String),
    /// The transport refuses callbacks that would fire before its current
    /// position.
    #[error("cannot schedule at tick {at}, transport is already at tick {now}")]
    ScheduledInPast { at: i64, now: i64 },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EchoError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&str> for EchoError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for EchoError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
