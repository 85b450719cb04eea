//! Error types for the ACME cache.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors returned by [`Cache`](crate::Cache) operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key (or the whole container) is not cached. Only returned by `get`.
    #[error("acme/autocert: certificate cache miss")]
    Miss,

    /// The caller's context fired before the operation finished.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Remote store failure, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The background worker panicked.
    #[error("cache worker failed: {0}")]
    Worker(String),
}

impl CacheError {
    /// True for the cache-miss sentinel
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }

    /// The context error, if the operation was cancelled or timed out
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            CacheError::Context(err) => Some(*err),
            _ => None,
        }
    }
}

/// Why a [`Context`](crate::Context) fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors from a [`SecretStore`](crate::store::SecretStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secrets \"{name}\" not found")]
    NotFound { namespace: String, name: String },

    #[error("secrets \"{name}\" already exists")]
    AlreadyExists { namespace: String, name: String },

    #[error("conflict updating secrets \"{name}\": {message}")]
    Conflict { name: String, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("Kubernetes API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to reach Kubernetes API: {0}")]
    Transport(String),

    #[error("invalid secret payload: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// True if the secret does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors raised while building a store or cache from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kubeconfig and in-cluster credential errors.
#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("failed to read kubeconfig file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse kubeconfig YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no current context set in kubeconfig")]
    NoCurrentContext,

    #[error("context '{0}' not found")]
    ContextNotFound(String),

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("user '{0}' not found")]
    UserNotFound(String),

    #[error("failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("not running in a cluster: {0}")]
    NotInCluster(String),
}

/// Errors from the typed ACME helpers in [`acme`](crate::acme).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored credentials are not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
