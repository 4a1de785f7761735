//! Error types for client construction, request validation, and dispatch.

use serde_json::Value;
use thiserror::Error;

/// Errors raised while constructing a [`crate::Client`].
///
/// Construction is the only phase that can fail fatally: a missing credential
/// or malformed endpoint never reaches request dispatch.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("an api key is required")]
    MissingApiKey,

    #[error("invalid host \"{host}\": a uri scheme (http:// or https://) is required")]
    InvalidHost { host: String },

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("discovery failed: {payload}")]
    Discovery { payload: Value },

    /// Transport-level failure while discovery was populating the registry.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Errors returned by the request verbs.
///
/// Every variant is a local, caller-recoverable condition; nothing here is
/// fatal to the client itself.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Structural schema violations, one entry per failed constraint.
    #[error("validation failed with {} error(s)", errors.len())]
    Validation { errors: Vec<SchemaError> },

    /// The action declares content inputs and none was supplied.
    #[error("{message}")]
    MissingInput { message: String },

    /// Paired parameters with mismatched element counts.
    #[error("{message}")]
    PairMismatch { message: String },

    /// Per-action failures for a job request, indexable by submission order.
    #[error("{} of {} job action(s) failed validation", failed_count(.failures), .failures.len())]
    Actions { failures: Vec<ActionFailure> },

    /// Non-200 response; the parsed body is the error payload.
    #[error("remote error (http {status}): {body}")]
    Remote { status: u16, body: Value },

    /// Network-level failure after retries were exhausted.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// A file attachment could not be read.
    #[error("cannot read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A registered schema could not be compiled for validation.
    #[error("invalid schema \"{name}\": {message}")]
    InvalidSchema { name: String, message: String },

    /// The remote response was missing a field the protocol requires.
    #[error("malformed response: {message}")]
    Protocol { message: String },
}

fn failed_count(failures: &[ActionFailure]) -> usize {
    failures.iter().filter(|f| f.error.is_some()).count()
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validation outcome for one action inside a job request.
///
/// `error` is `None` for actions that passed; the vector returned in
/// [`RequestError::Actions`] keeps submission order so callers can index it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionFailure {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A failed callback delivery, reported on the client's delivery channel.
///
/// Never surfaced through the original caller's result; by the time delivery
/// runs, the submit verb has already returned the job id.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub job_id: String,
    pub uri: String,
    pub reason: String,
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "callback delivery for job {} to {} failed: {}",
            self.job_id, self.uri, self.reason
        )
    }
}
