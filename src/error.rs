//! Error handling for camsync

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unknown attribute (get/set outside an object's schema)
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Unknown command (send outside a channel's definitions)
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Forbidden (caller's access level does not allow the operation)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Broker error (publish/subscribe failure)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Callback error (raised by a registered observer)
    #[error("Callback error: {0}")]
    Callback(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
