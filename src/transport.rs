//! Stateless access to the remote batch source.
//!
//! Nothing here caches, retries or persists. Every call is exactly one HTTP
//! round trip whose outcome is mapped onto [`SyncError`].

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::{SyncError, SyncResult};
use crate::local_db_model::{RawBatchPayload, RemoteBatchDescriptor, RemoteProblem};

/// Remote source of problem batches.
pub trait BatchSource: Send + Sync {
    /// Metadata-only probe for the latest published batch. `None` when the
    /// remote has nothing published.
    fn check_latest(&self) -> SyncResult<Option<RemoteBatchDescriptor>>;

    /// Downloads the full body described by `descriptor` and validates its size.
    fn fetch_batch(&self, descriptor: &RemoteBatchDescriptor) -> SyncResult<RawBatchPayload>;
}

pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(remote_url: &str, timeout: Duration) -> SyncResult<Self> {
        let base_url = Url::parse(remote_url)
            .map_err(|e| SyncError::InvalidInput(format!("Invalid remote url {remote_url:?}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub(crate) fn resolve_location(&self, location: &str) -> SyncResult<Url> {
        self.base_url
            .join(location)
            .map_err(|e| SyncError::MalformedResponse(format!("Invalid batch location {location:?}: {e}")))
    }

    fn get(&self, url: Url) -> SyncResult<Response> {
        debug!("GET {url}");
        self.client.get(url).send().map_err(network_error)
    }
}

impl BatchSource for HttpTransport {
    fn check_latest(&self) -> SyncResult<Option<RemoteBatchDescriptor>> {
        let response = self.get(self.base_url.clone())?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Remote has no published batch");
            return Ok(None);
        }
        let response = response.error_for_status().map_err(network_error)?;
        let body = response.bytes().map_err(network_error)?;
        let descriptor = parse_descriptor(&body)?;
        Ok(Some(descriptor))
    }

    fn fetch_batch(&self, descriptor: &RemoteBatchDescriptor) -> SyncResult<RawBatchPayload> {
        let url = self.resolve_location(&descriptor.location)?;
        let response = self
            .get(url)?
            .error_for_status()
            .map_err(network_error)?;
        let body = response.bytes().map_err(network_error)?;
        parse_payload(descriptor, &body)
    }
}

fn network_error(err: reqwest::Error) -> SyncError {
    warn!("Transport failure: {err}");
    SyncError::Network(err.to_string())
}

pub(crate) fn parse_descriptor(body: &[u8]) -> SyncResult<RemoteBatchDescriptor> {
    let descriptor: RemoteBatchDescriptor = serde_json::from_slice(body)
        .map_err(|e| SyncError::MalformedResponse(format!("Invalid batch metadata: {e}")))?;
    if descriptor.batch_id.is_empty() {
        return Err(SyncError::MalformedResponse("Batch metadata has an empty batchId".to_string()));
    }
    Ok(descriptor)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchBody {
    Bare(Vec<RemoteProblem>),
    Wrapped { problems: Vec<RemoteProblem> },
}

/// Decodes a batch body and checks it against the declared descriptor.
///
/// The whole batch is rejected on any defect; nothing is truncated.
pub(crate) fn parse_payload(descriptor: &RemoteBatchDescriptor, body: &[u8]) -> SyncResult<RawBatchPayload> {
    let problems = match serde_json::from_slice::<BatchBody>(body) {
        Ok(BatchBody::Bare(problems)) | Ok(BatchBody::Wrapped { problems }) => problems,
        Err(e) => {
            return Err(SyncError::MalformedResponse(format!(
                "Invalid body for batch {}: {e}",
                descriptor.batch_id
            )))
        }
    };

    if problems.len() != descriptor.problem_count {
        return Err(SyncError::SizeMismatch {
            declared: descriptor.problem_count,
            actual: problems.len(),
        });
    }

    let mut seen = HashSet::with_capacity(problems.len());
    for problem in &problems {
        if problem.id.is_empty() {
            return Err(SyncError::MalformedResponse(format!(
                "Batch {} contains a problem without id",
                descriptor.batch_id
            )));
        }
        if !seen.insert(problem.id.as_str()) {
            return Err(SyncError::MalformedResponse(format!(
                "Batch {} repeats problem id {}",
                descriptor.batch_id, problem.id
            )));
        }
    }

    Ok(RawBatchPayload { problems })
}
