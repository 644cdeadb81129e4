use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Incorrect resource key: {0}")]
    MalformedKey(String),

    #[error("Object '{0}' no longer exists")]
    ResourceGone(String),

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("Store request failed: {0}")]
    TransientStore(String),

    #[error("Unable to sync caches for {0} controller")]
    CacheSync(String),

    #[error("Unable to decode object (invalid type): {0}")]
    UnrecognizedEventPayload(String),

    #[error("Invalid installation configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failed sync should be re-enqueued with backoff.
    ///
    /// Only failures talking to the store are worth another attempt; every
    /// other kind is either already resolved or cannot improve by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientStore(_) | Error::KubernetesError(_) | Error::SerializationError(_)
        )
    }
}
