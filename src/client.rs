//! Client facade: construction and the six request verbs.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;
use url::Url;

use crate::discovery;
use crate::dispatch::Transport;
use crate::error::{ClientError, DeliveryFailure, RequestError};
use crate::job::{self, JobHandle, Lifecycle};
use crate::schema::SchemaRegistry;
use crate::types::{
    CallbackSpec, RequestDefaults, RequestType, DEFAULT_MAJOR_VERSION, DEFAULT_POLL_INTERVAL_MS,
};

/// Default service endpoints; a well-known port alone selects between them.
const DEFAULT_HTTPS_ENDPOINT: &str = "https://api.corpustext.com";
const DEFAULT_HTTP_ENDPOINT: &str = "http://api.corpustext.com";

/// What an asynchronous submission produced.
#[derive(Debug)]
pub enum AsyncOutcome {
    /// `getResults` was set: the terminal result payload, fetched directly.
    Results(Value),
    /// The job was queued; polling runs in the background behind the handle.
    Job(JobHandle),
}

/// Handle to the remote analysis service for one credential set.
///
/// Construction runs discovery and populates the schema registry; after that
/// the client is read-mostly and can serve concurrent requests.
#[derive(Debug)]
pub struct Client {
    transport: Transport,
    registry: SchemaRegistry,
    delivery_tx: mpsc::UnboundedSender<DeliveryFailure>,
    delivery_rx: Mutex<Option<mpsc::UnboundedReceiver<DeliveryFailure>>>,
}

impl Client {
    /// Create a client and make it ready: resolve the endpoint, discover the
    /// available actions and flavors, and build the request-type schemas.
    ///
    /// # Errors
    ///
    /// Fails on a missing api key, a host without a uri scheme, a rejected
    /// credential, or any non-tolerated discovery failure.
    pub async fn create(
        api_key: impl Into<String>,
        host: Option<&str>,
        port: Option<u16>,
        defaults: Option<RequestDefaults>,
    ) -> Result<Self, ClientError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClientError::MissingApiKey);
        }

        let endpoint = resolve_endpoint(host, port)?;
        let defaults = defaults.unwrap_or_default();
        let transport = Transport::new(endpoint, api_key, &defaults)?;

        let mut registry = SchemaRegistry::new();

        let actions = discovery::available_actions(&transport).await?;
        registry.load_action_schemas(&actions);

        if let Some(flavors) = discovery::flavor_schemas(&transport, &actions).await? {
            registry.load_flavor_schemas(flavors);
        }

        // The request-type schemas embed the action enum inline; rebuild now
        // that discovery has populated it.
        registry.load_request_type_schemas();

        info!(
            actions = registry.action_names().len(),
            "client ready"
        );

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        Ok(Self {
            transport,
            registry,
            delivery_tx,
            delivery_rx: Mutex::new(Some(delivery_rx)),
        })
    }

    /// Synchronous call: validate, send, return the result payload.
    pub async fn call(&self, opts: &Value) -> Result<Value, RequestError> {
        self.execute(RequestType::Sync, opts).await
    }

    /// Asynchronous call: returns the job id immediately (behind a
    /// [`JobHandle`] that watches for completion), or the final result when
    /// `getResults` is set.
    pub async fn call_async(&self, opts: &Value) -> Result<AsyncOutcome, RequestError> {
        self.submit(RequestType::Async, opts).await
    }

    /// Submit a batch of named actions as one job. Same lifecycle semantics
    /// as [`Client::call_async`].
    pub async fn job(&self, opts: &Value) -> Result<AsyncOutcome, RequestError> {
        self.submit(RequestType::Job, opts).await
    }

    /// Fetch a job's result by id. Blocks server-side until the job ends.
    pub async fn result(&self, opts: &Value) -> Result<Value, RequestError> {
        self.execute(RequestType::Result, opts).await
    }

    /// Fetch a job's current status by id.
    pub async fn status(&self, opts: &Value) -> Result<Value, RequestError> {
        self.execute(RequestType::Status, opts).await
    }

    /// Query the discovery surface (available actions or other axes).
    pub async fn discovery(&self, opts: &Value) -> Result<Value, RequestError> {
        self.execute(RequestType::Discovery, opts).await
    }

    /// Receiver for callback-delivery failures. Yields `Some` at most once.
    pub fn delivery_failures(&self) -> Option<mpsc::UnboundedReceiver<DeliveryFailure>> {
        self.delivery_rx
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take())
    }

    /// Every registered action name (canonical ids and aliases).
    pub fn actions(&self) -> Vec<String> {
        self.registry.action_names()
    }

    /// Read access to the schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Shared validate-then-send path for the synchronous-style verbs.
    async fn execute(&self, request_type: RequestType, opts: &Value) -> Result<Value, RequestError> {
        // Defensive deep copy: a caller reusing one options object never
        // observes dispatcher-internal mutation.
        let mut opts = opts.clone();
        self.registry.validate_request(request_type, &mut opts)?;
        self.transport.send(request_type, &opts).await
    }

    /// Lifecycle-aware path shared by `call_async` and `job`.
    async fn submit(
        &self,
        request_type: RequestType,
        opts: &Value,
    ) -> Result<AsyncOutcome, RequestError> {
        let mut opts = opts.clone();
        self.registry.validate_request(request_type, &mut opts)?;

        let response = self.transport.send(request_type, &opts).await?;
        let job_id = response
            .get("jobID")
            .and_then(Value::as_str)
            .ok_or_else(|| RequestError::Protocol {
                message: format!("submission response missing jobID: {response}"),
            })?
            .to_string();

        let major_version = opts
            .get("majorVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MAJOR_VERSION)
            .to_string();

        if opts.get("getResults").and_then(Value::as_bool).unwrap_or(false) {
            let result_opts = json!({ "jobId": job_id, "majorVersion": major_version });
            return Ok(AsyncOutcome::Results(self.result(&result_opts).await?));
        }

        let poll_interval = opts
            .get("pollInterval")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let callback: Option<CallbackSpec> = match opts.get("callback") {
            None => None,
            Some(spec) => Some(serde_json::from_value(spec.clone()).map_err(|e| {
                RequestError::Protocol {
                    message: format!("malformed callback descriptor: {e}"),
                }
            })?),
        };

        let handle = job::spawn_poll(
            self.transport.clone(),
            Lifecycle {
                job_id,
                major_version,
                poll_interval: Duration::from_millis(poll_interval),
                callback,
            },
            self.delivery_tx.clone(),
        );

        Ok(AsyncOutcome::Job(handle))
    }
}

/// Resolve the base endpoint from an optional host and port.
///
/// A host must carry its uri scheme. Without a host, port 80 selects the
/// http endpoint, port 443 (or none) the https endpoint, and any other port
/// attaches to the https endpoint.
fn resolve_endpoint(host: Option<&str>, port: Option<u16>) -> Result<Url, ClientError> {
    let invalid = |host: &str| ClientError::InvalidHost {
        host: host.to_string(),
    };

    match host {
        Some(host) => {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                return Err(invalid(host));
            }
            let mut url = Url::parse(host).map_err(|_| invalid(host))?;
            if let Some(port) = port {
                url.set_port(Some(port)).map_err(|_| invalid(host))?;
            }
            Ok(url)
        }
        None => {
            let (base, explicit_port) = match port {
                Some(80) => (DEFAULT_HTTP_ENDPOINT, None),
                Some(443) | None => (DEFAULT_HTTPS_ENDPOINT, None),
                Some(other) => (DEFAULT_HTTPS_ENDPOINT, Some(other)),
            };
            let mut url = Url::parse(base).map_err(|_| invalid(base))?;
            if let Some(port) = explicit_port {
                url.set_port(Some(port)).map_err(|_| invalid(base))?;
            }
            Ok(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_requires_a_scheme() {
        let result = resolve_endpoint(Some("api.example.com"), None);
        assert!(matches!(result, Err(ClientError::InvalidHost { .. })));
    }

    #[test]
    fn host_with_scheme_accepted() {
        let url = resolve_endpoint(Some("https://onprem.example.com"), Some(8443)).unwrap();
        assert_eq!(url.as_str(), "https://onprem.example.com:8443/");
    }

    #[test]
    fn port_alone_infers_the_scheme_host() {
        let url = resolve_endpoint(None, Some(80)).unwrap();
        assert_eq!(url.scheme(), "http");

        let url = resolve_endpoint(None, Some(443)).unwrap();
        assert_eq!(url.scheme(), "https");

        let url = resolve_endpoint(None, None).unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn unusual_port_attaches_to_https_host() {
        let url = resolve_endpoint(None, Some(9000)).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.port(), Some(9000));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_network() {
        let result = Client::create("", None, None, None).await;
        assert!(matches!(result, Err(ClientError::MissingApiKey)));

        let result = Client::create("   ", None, None, None).await;
        assert!(matches!(result, Err(ClientError::MissingApiKey)));
    }
}
