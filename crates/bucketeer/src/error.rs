//! Error type shared by both clients.

/// Specialized [`Result`] type for bucket operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for object storage operations.
///
/// Failures reported by the store are carried in [`Error::Store`] exactly as
/// the SDK produced them.
#[derive(Debug, thiserror::Error)]
#[must_use = "errors should be handled appropriately"]
pub enum Error {
    /// Configuration error.
    ///
    /// Invalid configuration parameters, missing required settings or a
    /// failure while building the underlying store client.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid arguments for an operation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The destination already holds an object (or a local file) and
    /// overwriting was not requested.
    #[error("{key} already exists, pass overwrite to replace it")]
    AlreadyExists {
        /// Key or local path that already exists.
        key: String,
    },

    /// The backing store cannot produce pre-signed URLs.
    #[error("pre-signed URLs are not supported by this store")]
    SigningUnsupported,

    /// Some keys of a batch operation failed.
    #[error("batch partially failed: {failed} of {total} keys")]
    PartialFailure {
        /// Number of failed keys.
        failed: usize,
        /// Number of keys in the batch.
        total: usize,
    },

    /// The store answered a bulk request without confirming this key.
    #[error("{key} was not confirmed by the store: {reason}")]
    Unconfirmed {
        /// Key the store did not report back.
        key: String,
        /// Failure reported for the request that carried the key.
        reason: String,
    },

    /// Failure reported by the underlying object store.
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    /// Local file system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking runtime could not be created.
    #[error("failed to start blocking runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// A fan-out task panicked or was aborted.
    #[error("fan-out task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The concurrency limiter was closed while tasks were waiting.
    #[error("concurrency limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

impl Error {
    /// Returns whether the store reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(object_store::Error::NotFound { .. }))
    }

    /// Returns whether overwrite protection rejected the operation.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists { .. } | Error::Store(object_store::Error::AlreadyExists { .. })
        )
    }

    /// Returns whether a retry could succeed.
    ///
    /// The clients never retry on their own; this only classifies the error
    /// for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(err) => !matches!(
                err,
                object_store::Error::NotFound { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
                    | object_store::Error::AlreadyExists { .. }
                    | object_store::Error::Precondition { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::NotImplemented
                    | object_store::Error::InvalidPath { .. }
            ),
            Error::Io(_) | Error::Unconfirmed { .. } => true,
            Error::Config(_)
            | Error::InvalidRequest(_)
            | Error::AlreadyExists { .. }
            | Error::SigningUnsupported
            | Error::PartialFailure { .. }
            | Error::Runtime(_)
            | Error::Task(_)
            | Error::LimiterClosed(_) => false,
        }
    }
}
