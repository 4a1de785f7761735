//! Request dispatch: turns a validated request into wire activity.
//!
//! Path and method computation are pure functions of the request type and
//! options; [`Transport`] owns the HTTP client and the bounded-resubmission
//! retry loop. Validation failures never reach this module — the facade
//! short-circuits before any network activity.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::RequestError;
use crate::transform;
use crate::types::{
    FileEntry, JobSpec, RequestDefaults, RequestType, DEFAULT_API_VERSION, DEFAULT_MAJOR_VERSION,
};

/// Compute the wire path for a validated request.
pub fn request_path(request_type: RequestType, opts: &Value) -> String {
    let major = opts
        .get("majorVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MAJOR_VERSION);

    match request_type {
        RequestType::Sync | RequestType::Async => {
            let action = opts.get("action").and_then(Value::as_str).unwrap_or_default();
            let api_version = opts
                .get("apiVersion")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_API_VERSION);
            format!(
                "/{major}/api/{}/{action}/{api_version}",
                request_type.as_str()
            )
        }
        RequestType::Result | RequestType::Status => {
            let job_id = opts.get("jobId").and_then(Value::as_str).unwrap_or_default();
            format!("/{major}/job/{}/{job_id}", request_type.as_str())
        }
        RequestType::Job => format!("/{major}/job"),
        RequestType::Discovery => {
            let action = opts.get("action").and_then(Value::as_str).unwrap_or("api");
            format!("/{major}/discovery/{action}")
        }
    }
}

/// Whether the request goes out as a POST.
///
/// Job requests and anything carrying files are forced to POST; otherwise
/// the caller's method (default GET) is honored.
pub fn is_post(request_type: RequestType, opts: &Value, has_files: bool) -> bool {
    if request_type == RequestType::Job || has_files {
        return true;
    }
    opts.get("method").and_then(Value::as_str) == Some("post")
}

/// Flatten a params object into wire pairs; array values repeat the key.
pub fn flatten_params(params: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Value::Object(map) = params {
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.push((key.clone(), transform::wire_string(item)));
                    }
                }
                other => pairs.push((key.clone(), transform::wire_string(other))),
            }
        }
    }
    pairs
}

/// Serialize a job descriptor into the single top-level `job` parameter.
///
/// Every nested action's param values are stringified first: objects become
/// JSON text, arrays stringify per element, scalars become strings.
pub fn job_wire_params(opts: &Value) -> Result<Vec<(String, String)>, RequestError> {
    let job = opts.get("job").cloned().unwrap_or_else(|| json!({}));
    let mut spec: JobSpec =
        serde_json::from_value(job).map_err(|e| RequestError::Protocol {
            message: format!("malformed job descriptor: {e}"),
        })?;

    for action in &mut spec.actions {
        let Some(Value::Object(params)) = action.params.as_mut() else {
            continue;
        };
        for value in params.values_mut() {
            *value = match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| Value::String(transform::wire_string(item)))
                        .collect(),
                ),
                ref other => Value::String(transform::wire_string(other)),
            };
        }
    }

    let text = serde_json::to_string(&spec).map_err(|e| RequestError::Protocol {
        message: format!("cannot serialize job descriptor: {e}"),
    })?;
    Ok(vec![("job".to_string(), text)])
}

/// Wire parameters for a request, excluding authentication.
fn wire_params(request_type: RequestType, opts: &Value) -> Result<Vec<(String, String)>, RequestError> {
    match request_type {
        RequestType::Job => job_wire_params(opts),
        RequestType::Result | RequestType::Status => Ok(Vec::new()),
        _ => Ok(opts
            .get("params")
            .map(flatten_params)
            .unwrap_or_default()),
    }
}

/// File attachments named by the options, if any.
fn file_entries(opts: &Value) -> Result<Vec<FileEntry>, RequestError> {
    match opts.get("files") {
        None => Ok(Vec::new()),
        Some(files) => {
            serde_json::from_value(files.clone()).map_err(|e| RequestError::Protocol {
                message: format!("malformed files list: {e}"),
            })
        }
    }
}

/// Whether a failed attempt is worth resubmitting.
///
/// With an explicit `errorCodes` list, only remote errors with a listed code
/// retry. Without one, only ambiguous transport failures (timeouts and
/// connection errors) do.
fn should_retry(error: &RequestError, codes: Option<&[i64]>) -> bool {
    match (error, codes) {
        (RequestError::Remote { body, .. }, Some(codes)) => body
            .get("error")
            .and_then(Value::as_i64)
            .is_some_and(|code| codes.contains(&code)),
        (RequestError::Transport(source), None) => source.is_timeout() || source.is_connect(),
        _ => false,
    }
}

/// HTTP transport bound to one endpoint and credential.
///
/// Cheap to clone; the poll loop and callback delivery hold their own copies.
#[derive(Clone, Debug)]
pub struct Transport {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    default_retries: u32,
}

impl Transport {
    pub fn new(
        endpoint: Url,
        api_key: String,
        defaults: &RequestDefaults,
    ) -> Result<Self, RequestError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key,
            default_retries: defaults.retries,
        })
    }

    /// The HTTP client, shared with callback delivery.
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send a validated request and parse the response.
    ///
    /// A non-200 status surfaces the parsed body as the error payload; a body
    /// that isn't valid JSON passes through as a raw string. Failed attempts
    /// are resubmitted (no backoff) up to the configured retry count while
    /// [`should_retry`] holds.
    pub async fn send(
        &self,
        request_type: RequestType,
        opts: &Value,
    ) -> Result<Value, RequestError> {
        let path = request_path(request_type, opts);
        let url = self
            .endpoint
            .join(&path)
            .map_err(|e| RequestError::Protocol {
                message: format!("cannot build url for {path}: {e}"),
            })?;

        let mut pairs = wire_params(request_type, opts)?;
        pairs.push(("apikey".to_string(), self.api_key.clone()));

        let files = file_entries(opts)?;
        let post = is_post(request_type, opts, !files.is_empty());

        let timeout = opts
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs);
        let retries = opts
            .get("retries")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(self.default_retries);
        let retry_codes: Option<Vec<i64>> = opts
            .get("errorCodes")
            .and_then(Value::as_array)
            .map(|codes| codes.iter().filter_map(Value::as_i64).collect());

        let mut attempts_left = retries;
        loop {
            debug!(%url, post, "dispatching {} request", request_type.as_str());
            match self.attempt(post, &url, &pairs, &files, timeout).await {
                Ok(body) => return Ok(body),
                Err(error) => {
                    if attempts_left > 0 && should_retry(&error, retry_codes.as_deref()) {
                        attempts_left -= 1;
                        warn!(%url, %error, attempts_left, "resubmitting failed request");
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        post: bool,
        url: &Url,
        pairs: &[(String, String)],
        files: &[FileEntry],
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        let builder = if !post {
            self.http.get(url.clone()).query(pairs)
        } else if files.is_empty() {
            self.http.post(url.clone()).form(pairs)
        } else {
            let mut form = Form::new();
            for (key, value) in pairs {
                form = form.text(key.clone(), value.clone());
            }
            for entry in files {
                form = form.part(entry.part_name().to_string(), file_part(entry).await?);
            }
            self.http.post(url.clone()).multipart(form)
        };

        let builder = match timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        // An unparsable body passes through as a raw string rather than
        // erroring.
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if status.is_success() {
            Ok(body)
        } else {
            Err(RequestError::Remote {
                status: status.as_u16(),
                body,
            })
        }
    }
}

async fn file_part(entry: &FileEntry) -> Result<Part, RequestError> {
    let path = entry.path().to_string();
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| RequestError::File { path: path.clone(), source })?;

    let file_name = Path::new(&path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or(path);

    Ok(Part::bytes(bytes).file_name(file_name))
}
