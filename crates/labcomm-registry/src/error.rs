/// Errors that can occur in registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A channel with this name already exists.
    #[error("a channel named {0:?} already exists")]
    DuplicateName(String),

    /// No channel with this name exists.
    #[error("no channel named {0:?}")]
    NameNotFound(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] labcomm_transport::TransportError),

    /// The registry configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
