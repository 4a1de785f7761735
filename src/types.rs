//! Core types shared across the registry, discovery, and dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content-bearing parameter names. An action's input set is the
/// intersection of its parameter names with this list.
pub const INPUT_PARAMS: &[&str] = &["text", "file", "reference", "url", "json"];

/// Extension keyword on a parameter property declaring its cardinality pairs.
pub const PAIRS_KEYWORD: &str = "x-pairs";

/// Default interval between job status polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Default per-call HTTP timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Versions used when the caller leaves them unset.
pub const DEFAULT_MAJOR_VERSION: &str = "1";
pub const DEFAULT_API_VERSION: &str = "v1";

/// Upper bound requested from the action-list discovery call.
pub const DISCOVERY_MAX_RESULTS: u32 = 100;

/// The six request shapes the remote service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Sync,
    Async,
    Job,
    Result,
    Status,
    Discovery,
}

impl RequestType {
    /// Wire name, also the registry key for the request-type schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Sync => "sync",
            RequestType::Async => "async",
            RequestType::Job => "job",
            RequestType::Result => "result",
            RequestType::Status => "status",
            RequestType::Discovery => "discovery",
        }
    }

    /// All request types, in registry load order.
    pub fn all() -> [RequestType; 6] {
        [
            RequestType::Sync,
            RequestType::Async,
            RequestType::Job,
            RequestType::Result,
            RequestType::Status,
            RequestType::Discovery,
        ]
    }

    /// The business-rule pass that runs after structural validation.
    pub fn secondary_validation(&self) -> Option<SecondaryValidation> {
        match self {
            RequestType::Sync | RequestType::Async => Some(SecondaryValidation::Action),
            RequestType::Job => Some(SecondaryValidation::Job),
            _ => None,
        }
    }
}

/// Which shape of action-level validation a request type requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryValidation {
    /// Single action named by `opts.action`.
    Action,
    /// One pass per nested action in `opts.job.actions`.
    Job,
}

/// How a terminal job payload is posted to a callback URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackMethod {
    /// URL-encoded form with a `results` field holding JSON text.
    #[default]
    Encoded,
    /// Multipart form with a `results` part.
    Multipart,
}

/// Callback descriptor accepted on `async` and `job` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSpec {
    pub uri: String,
    #[serde(default)]
    pub method: CallbackMethod,
}

/// One named action inside a job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// The `job` field of a job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub actions: Vec<JobAction>,
}

/// A file attachment: either a bare path or a named part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Path(String),
    Named { name: String, path: String },
}

impl FileEntry {
    /// Multipart part name; bare paths attach under the `file` part.
    pub fn part_name(&self) -> &str {
        match self {
            FileEntry::Path(_) => "file",
            FileEntry::Named { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileEntry::Path(path) => path,
            FileEntry::Named { path, .. } => path,
        }
    }
}

/// A discovered remote action: canonical id, aliases, and its schema pair.
///
/// Ids and aliases are matched case-insensitively; the registry lower-cases
/// them at registration.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    pub id: String,
    pub aliases: Vec<String>,
    pub parameters: Value,
    pub response: Value,
}

/// Per-client request defaults, applied when a call doesn't override them.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    /// Per-call HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Resubmission attempts for retryable failures.
    pub retries: u32,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: 0,
        }
    }
}

impl RequestDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call HTTP timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the default retry count for retryable transport failures.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}
