use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::error::SyncError;

/// JSON envelope returned across the C ABI.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum AppResponse {
    StorageError(String),
    NetworkError(String),
    MalformedResponse(String),
    SerializationError(String),
    NotFound(String),
    BadRequest(String),
    SyncInProgress(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::StorageError(msg) => write!(f, "Storage error: {}", msg),
            AppResponse::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AppResponse::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::SyncInProgress(msg) => write!(f, "Sync in progress: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<SyncError> for AppResponse {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Network(msg) => AppResponse::NetworkError(msg),
            SyncError::MalformedResponse(msg) => AppResponse::MalformedResponse(msg),
            e @ SyncError::SizeMismatch { .. } => AppResponse::MalformedResponse(e.to_string()),
            SyncError::Storage(msg) => AppResponse::StorageError(msg),
            SyncError::NotFound(msg) => AppResponse::NotFound(msg),
            SyncError::InvalidInput(msg) => AppResponse::BadRequest(msg),
            e @ SyncError::SyncInProgress => AppResponse::SyncInProgress(e.to_string()),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    /// Serializes `value` into an `Ok` envelope.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(json) => AppResponse::Ok(json),
            Err(e) => AppResponse::from(e),
        }
    }
}
