//! Asynchronous job lifecycle: status polling, completion handles, and
//! callback delivery.
//!
//! A submitted job is watched by one background task that polls the status
//! endpoint until the job reaches a terminal state. Completion is reported
//! at most once through the job's [`JobHandle`]; if a callback URI was
//! configured, delivery is dispatched first and never awaited by the
//! completion event. Delivery failures go to the client-level channel only —
//! the original caller already has its job id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::dispatch::Transport;
use crate::error::{DeliveryFailure, RequestError};
use crate::types::{CallbackMethod, CallbackSpec, RequestType};

/// Statuses that end the poll loop.
const TERMINAL_STATUSES: &[&str] = &["finished", "failed"];

pub(crate) fn is_terminal(payload: &Value) -> bool {
    payload
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| TERMINAL_STATUSES.contains(&status))
}

/// Everything the poll loop needs to watch one job.
pub(crate) struct Lifecycle {
    pub job_id: String,
    pub major_version: String,
    pub poll_interval: Duration,
    pub callback: Option<CallbackSpec>,
}

/// Per-job completion handle.
///
/// Resolves at most once with the terminal status payload (or the poll
/// error that ended the watch). Dropping the handle cancels the background
/// poll at its next iteration; call [`JobHandle::detach`] to keep polling
/// for callback-only flows.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    receiver: oneshot::Receiver<Result<Value, RequestError>>,
    cancelled: Arc<AtomicBool>,
    detached: bool,
}

impl JobHandle {
    /// The opaque job id the service assigned.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the terminal status payload.
    pub async fn wait(mut self) -> Result<Value, RequestError> {
        (&mut self.receiver)
            .await
            .map_err(|_| RequestError::Protocol {
                message: "job watch ended without reporting a status".into(),
            })?
    }

    /// Check for completion without waiting.
    pub fn try_result(&mut self) -> Option<Result<Value, RequestError>> {
        self.receiver.try_recv().ok()
    }

    /// Stop the background poll at its next iteration.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Let the poll loop (and any configured callback) outlive this handle.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel();
        }
    }
}

/// Spawn the background poll loop for a submitted job.
pub(crate) fn spawn_poll(
    transport: Transport,
    lifecycle: Lifecycle,
    delivery_tx: mpsc::UnboundedSender<DeliveryFailure>,
) -> JobHandle {
    let (sender, receiver) = oneshot::channel();
    let cancelled = Arc::new(AtomicBool::new(false));

    let handle = JobHandle {
        job_id: lifecycle.job_id.clone(),
        receiver,
        cancelled: Arc::clone(&cancelled),
        detached: false,
    };

    tokio::spawn(async move {
        let Lifecycle {
            job_id,
            major_version,
            poll_interval,
            mut callback,
        } = lifecycle;

        let status_opts = json!({ "jobId": job_id, "majorVersion": major_version });

        loop {
            tokio::time::sleep(poll_interval).await;
            if cancelled.load(Ordering::Relaxed) {
                debug!(%job_id, "job watch cancelled");
                return;
            }

            match transport.send(RequestType::Status, &status_opts).await {
                Ok(payload) if is_terminal(&payload) => {
                    debug!(%job_id, status = ?payload.get("status"), "job reached terminal status");
                    if let Some(callback) = callback.take() {
                        tokio::spawn(deliver(
                            transport.http().clone(),
                            job_id.clone(),
                            callback,
                            payload.clone(),
                            delivery_tx,
                        ));
                    }
                    let _ = sender.send(Ok(payload));
                    return;
                }
                Ok(payload) => {
                    debug!(%job_id, status = ?payload.get("status"), "job still pending");
                }
                Err(error) => {
                    warn!(%job_id, %error, "job status poll failed");
                    let _ = sender.send(Err(error));
                    return;
                }
            }
        }
    });

    handle
}

/// POST a terminal job payload to its callback URI.
async fn deliver(
    http: reqwest::Client,
    job_id: String,
    callback: CallbackSpec,
    payload: Value,
    delivery_tx: mpsc::UnboundedSender<DeliveryFailure>,
) {
    let text = payload.to_string();

    let result = match callback.method {
        CallbackMethod::Encoded => {
            http.post(&callback.uri)
                .form(&[("results", text)])
                .send()
                .await
        }
        CallbackMethod::Multipart => {
            let form = reqwest::multipart::Form::new().text("results", text);
            http.post(&callback.uri).multipart(form).send().await
        }
    };

    let reason = match result {
        Ok(response) if response.status().is_success() => {
            debug!(%job_id, uri = %callback.uri, "callback delivered");
            return;
        }
        Ok(response) => format!("http {}", response.status().as_u16()),
        Err(error) => error.to_string(),
    };

    warn!(%job_id, uri = %callback.uri, %reason, "callback delivery failed");
    let _ = delivery_tx.send(DeliveryFailure {
        job_id,
        uri: callback.uri,
        reason,
    });
}
