use serde_json::Error as SerdeError;

/// Failure taxonomy shared by the transport, the store and the orchestrator.
///
/// Variants carry rendered messages rather than source errors so a single
/// outcome can be cloned to every caller coalesced onto one sync.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Connectivity or timeout failure. Safe to retry with backoff.
    #[error("Network error: {0}")]
    Network(String),
    /// The remote returned data that could not be parsed or validated.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// Declared `problemCount` disagrees with the downloaded array.
    #[error("Size mismatch: declared {declared} problems, received {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    /// Local commit or read failure. Prior state is left intact.
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Another sync is running; try again later.
    #[error("A synchronization is already in progress")]
    SyncInProgress,
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::SyncInProgress)
    }
}

impl From<lmdb::Error> for SyncError {
    fn from(err: lmdb::Error) -> Self {
        match err {
            lmdb::Error::MapFull => SyncError::Storage("LMDB map is full".to_string()),
            lmdb::Error::Corrupted => SyncError::Storage("Database is corrupted".to_string()),
            other => SyncError::Storage(format!("LMDB error: {other}")),
        }
    }
}

// Serde failures reaching this conversion come from stored rows; remote
// decoding maps to `MalformedResponse` explicitly in the transport.
impl From<SerdeError> for SyncError {
    fn from(err: SerdeError) -> Self {
        SyncError::Storage(format!("Stored record could not be decoded: {err}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
