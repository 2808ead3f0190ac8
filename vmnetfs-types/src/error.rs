use thiserror::Error;

/// Configuration-time failures (§7, "Config"). Always fatal to init.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration XML: {0}")]
    Xml(String),
    #[error("configuration does not satisfy the vmnetx-vmnetfs schema: {0}")]
    Schema(String),
    #[error("invalid integer value for '{field}': {value}")]
    InvalidInteger { field: String, value: String },
}

/// Pristine-cache corruption discovered during image init (§7, "Cache").
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("corrupt pristine cache entry at {path}: {reason}")]
    CorruptEntry { path: String, reason: String },
    #[error("pristine cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single transport fetch attempt (§4.5).
///
/// `Network` covers the retryable class (DNS/connect/timeout/HTTP error/
/// transient read-write); `Fatal` covers validator mismatch, short body and
/// auth rejection, none of which the public `fetch` retries.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("fatal transport error: {0}")]
    Fatal(String),
    #[error("interrupted")]
    Interrupted,
}

impl TransportError {
    /// Whether `Transport::fetch`'s retry loop should attempt this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Outcome of an image-level read/write sub-operation (§4.8, §7).
///
/// EOF is deliberately not a variant here: per §4.8 it is reported by
/// returning the accumulated byte count with `Ok`, never as an error.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<TransportError> for ImageError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Interrupted => ImageError::Interrupted,
            TransportError::Network(msg) => {
                ImageError::Io(format!("transport retries exhausted: {msg}"))
            }
            TransportError::Fatal(msg) => ImageError::Io(format!("fatal transport error: {msg}")),
        }
    }
}

impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> Self {
        ImageError::Io(err.to_string())
    }
}

impl ImageError {
    /// True when the VFS host should translate this into its "interrupted
    /// system call" errno rather than a generic I/O error.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ImageError::Interrupted)
    }
}
