//! Corpus API client
//!
//! Schema-driven async client for the Corpus document/content-analysis
//! service. The remote actions and their parameter schemas are not known at
//! compile time: [`Client::create`] discovers them, builds a live
//! [`SchemaRegistry`], and every request is validated (with type coercion,
//! default filling, required-input and paired-parameter rules) before any
//! network activity.
//!
//! # Example
//!
//! ```no_run
//! use corpus_client::{AsyncOutcome, Client};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::create("my-api-key", None, None, None).await?;
//!
//! // Synchronous call: validate, send, get the result.
//! let sentiment = client
//!     .call(&json!({
//!         "action": "analyzesentiment",
//!         "params": { "text": "=)" }
//!     }))
//!     .await?;
//! println!("{sentiment}");
//!
//! // Asynchronous call: the job id comes back immediately and a background
//! // task polls for completion.
//! match client
//!     .call_async(&json!({
//!         "action": "analyzesentiment",
//!         "params": { "text": "=)" }
//!     }))
//!     .await?
//! {
//!     AsyncOutcome::Job(handle) => {
//!         println!("queued as {}", handle.job_id());
//!         let terminal = handle.wait().await?;
//!         println!("{terminal}");
//!     }
//!     AsyncOutcome::Results(payload) => println!("{payload}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Request shapes
//!
//! | Verb | Path pattern |
//! |------|--------------|
//! | `call` / `call_async` | `/{majorVersion}/api/{type}/{action}/{apiVersion}` |
//! | `result` / `status` | `/{majorVersion}/job/{type}/{jobId}` |
//! | `job` | `/{majorVersion}/job` |
//! | `discovery` | `/{majorVersion}/discovery/{action}` |
//!
//! Job requests and any request carrying files go out as POST; everything
//! else honors the caller's `method` option (default GET).

mod client;
mod discovery;
mod dispatch;
mod error;
mod job;
mod schema;
mod transform;
mod types;

pub use client::{AsyncOutcome, Client};
pub use dispatch::{flatten_params, is_post, job_wire_params, request_path, Transport};
pub use error::{ActionFailure, ClientError, DeliveryFailure, RequestError, SchemaError};
pub use job::JobHandle;
pub use schema::{Coercer, SchemaRegistry};
pub use types::{
    ActionDescriptor, CallbackMethod, CallbackSpec, FileEntry, JobAction, JobSpec,
    RequestDefaults, RequestType, SecondaryValidation, DEFAULT_POLL_INTERVAL_MS, INPUT_PARAMS,
};
