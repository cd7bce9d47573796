use std::env;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

pub const ENV_REMOTE_URL: &str = "PROBLEM_BATCH_REMOTE_URL";
pub const ENV_DB_PATH: &str = "PROBLEM_BATCH_DB_PATH";
pub const ENV_TIMEOUT_SECS: &str = "PROBLEM_BATCH_TIMEOUT_SECS";
pub const ENV_CHECK_INTERVAL_SECS: &str = "PROBLEM_BATCH_CHECK_INTERVAL_SECS";

pub const DEFAULT_DB_PATH: &str = "problem_batches";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;

/// Settings for one installation's sync runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Endpoint returning the latest batch metadata.
    pub remote_url: String,
    /// Database name; the environment lives in `<db_path>.lmdb`.
    pub db_path: String,
    pub request_timeout: Duration,
    pub min_check_interval: Duration,
    pub map_size: usize,
}

impl SyncConfig {
    pub fn new(remote_url: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            db_path: db_path.into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            min_check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            map_size: DEFAULT_MAP_SIZE,
        }
    }

    /// Reads the configuration from `PROBLEM_BATCH_*` environment variables.
    ///
    /// Only the remote URL is mandatory.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote_url = lookup(ENV_REMOTE_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| SyncError::InvalidInput(format!("{ENV_REMOTE_URL} is not set")))?;
        let db_path = lookup(ENV_DB_PATH).unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let mut config = Self::new(remote_url, db_path);
        if let Some(secs) = parse_secs(&lookup, ENV_TIMEOUT_SECS)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_secs(&lookup, ENV_CHECK_INTERVAL_SECS)? {
            config.min_check_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> SyncResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| SyncError::InvalidInput(format!("{key}={raw:?}: {e}"))),
    }
}
