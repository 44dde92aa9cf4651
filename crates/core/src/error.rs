/// Result alias that carries the custom [`MascotArError`] type.
pub type Result<T> = std::result::Result<T, MascotArError>;

/// Common error type for the core crate.
///
/// Nothing in the placement loop is fatal to the host: recognition failures
/// and missing camera images degrade to "keep searching". These variants are
/// what surfaces at the edges (configuration, scenario files, anchors).
#[derive(Debug, thiserror::Error)]
pub enum MascotArError {
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration could not be decoded, encoded or validated.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A scenario script failed to parse.
    #[error("invalid scenario: {0}")]
    Scenario(#[from] serde_json::Error),
    /// The text recognizer reported a failure for a single image.
    #[error("recognition failed: {0}")]
    Recognition(String),
    /// The tracking session refused to create an anchor.
    #[error("anchor creation failed: {0}")]
    Anchor(String),
    /// A caller handed in data the engine cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The background recognition worker is gone.
    #[error("recognition worker disconnected")]
    WorkerDisconnected,
}

impl MascotArError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for MascotArError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MascotArError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<toml::de::Error> for MascotArError {
    fn from(value: toml::de::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<toml::ser::Error> for MascotArError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Config(value.to_string())
    }
}
