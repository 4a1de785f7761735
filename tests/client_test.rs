//! End-to-end tests against a mock server: discovery, the request verbs,
//! the job lifecycle, and callback delivery.

use std::io::Write;
use std::time::Duration;

use corpus_client::{AsyncOutcome, Client, ClientError, RequestError};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};

const API_KEY: &str = "test-key";

fn discovery_body() -> Value {
    json!([
        {
            "id": "analyzesentiment",
            "aliases": ["detectsentiment"],
            "parameters": {
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "file": { "type": "string" },
                    "url": { "type": "string" },
                    "language": { "type": "string", "enum": ["eng", "fre"] }
                }
            },
            "response": { "type": "object" }
        },
        {
            "id": "ocrdocument",
            "aliases": [],
            "parameters": {
                "type": "object",
                "properties": {
                    "file": { "type": "string" },
                    "url": { "type": "string" },
                    "page": { "type": "integer" }
                }
            },
            "response": { "type": "object" }
        }
    ])
}

/// Mock the discovery surface: the action list plus an empty flavor axis.
async fn mock_discovery(server: &mut ServerGuard) {
    server
        .mock("GET", "/1/discovery/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(discovery_body().to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/discovery/flavor")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
}

async fn ready_client(server: &mut ServerGuard) -> Client {
    mock_discovery(server).await;
    Client::create(API_KEY, Some(&server.url()), None, None)
        .await
        .expect("client construction")
}

// === Construction and Discovery ===

#[tokio::test]
async fn construction_registers_discovered_actions() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    let actions = client.actions();
    assert!(actions.contains(&"analyzesentiment".to_string()));
    assert!(actions.contains(&"detectsentiment".to_string()));
    assert!(actions.contains(&"ocrdocument".to_string()));
}

#[tokio::test]
async fn invalid_api_key_codes_remap() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/1/discovery/api")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(json!({"error": 2002, "reason": "Key expired"}).to_string())
        .create_async()
        .await;

    let result = Client::create(API_KEY, Some(&server.url()), None, None).await;
    assert!(matches!(result, Err(ClientError::InvalidApiKey)));
}

#[tokio::test]
async fn api_key_message_remaps_regardless_of_code() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/1/discovery/api")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body(json!({"error": 9999, "reason": "unknown API key"}).to_string())
        .create_async()
        .await;

    let result = Client::create(API_KEY, Some(&server.url()), None, None).await;
    assert!(matches!(result, Err(ClientError::InvalidApiKey)));
}

#[tokio::test]
async fn other_discovery_errors_pass_through() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/1/discovery/api")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body(json!({"error": 5000, "reason": "backend down"}).to_string())
        .create_async()
        .await;

    match Client::create(API_KEY, Some(&server.url()), None, None).await {
        Err(ClientError::Discovery { payload }) => {
            assert_eq!(payload["error"], json!(5000));
        }
        other => panic!("expected pass-through payload, got {other:?}"),
    }
}

#[tokio::test]
async fn non_list_discovery_response_is_the_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/1/discovery/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"message": "intercepted by proxy"}).to_string())
        .create_async()
        .await;

    match Client::create(API_KEY, Some(&server.url()), None, None).await {
        Err(ClientError::Discovery { payload }) => {
            assert_eq!(payload["message"], json!("intercepted by proxy"));
        }
        other => panic!("expected the payload as error, got {other:?}"),
    }
}

#[tokio::test]
async fn flavor_schemas_install_during_construction() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/1/discovery/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(discovery_body().to_string())
        .create_async()
        .await;

    // Exact query matchers keep the three flavor stages disjoint.
    server
        .mock("GET", "/1/discovery/flavor")
        .match_query(Matcher::Exact(format!("apikey={API_KEY}")))
        .with_status(200)
        .with_body(json!(["web"]).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/discovery/flavor")
        .match_query(Matcher::Exact(format!(
            "action=analyzesentiment&apikey={API_KEY}"
        )))
        .with_status(200)
        .with_body(json!(["web"]).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/discovery/flavor")
        .match_query(Matcher::Exact(format!(
            "action=ocrdocument&apikey={API_KEY}"
        )))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    server
        .mock("GET", "/1/discovery/flavor")
        .match_query(Matcher::Exact(format!(
            "action=analyzesentiment&flavor=web&schema=true&apikey={API_KEY}"
        )))
        .with_status(200)
        .with_body(
            json!({
                "type": "object",
                "properties": {
                    "flavor": { "type": "string" },
                    "url": { "type": "string" }
                },
                "required": ["url"]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = Client::create(API_KEY, Some(&server.url()), None, None)
        .await
        .expect("client construction");

    // The flavored schema's required "url" applies when params select it.
    let mut params = json!({"flavor": "web"});
    assert!(client
        .registry()
        .validate_action("analyzesentiment", &mut params)
        .is_err());

    let mut params = json!({"flavor": "web", "url": "https://example.com"});
    client
        .registry()
        .validate_action("analyzesentiment", &mut params)
        .unwrap();
}

// === Synchronous Verbs ===

#[tokio::test]
async fn sync_call_round_trips() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    let mock = server
        .mock("GET", "/1/api/sync/analyzesentiment/v1")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("text".into(), "=)".into()),
            Matcher::UrlEncoded("apikey".into(), API_KEY.into()),
        ]))
        .with_status(200)
        .with_body(
            json!({"positive": [{"sentiment": "=)"}], "negative": [], "aggregate": {"score": 0.9}})
                .to_string(),
        )
        .create_async()
        .await;

    let result = client
        .call(&json!({"action": "analyzesentiment", "params": {"text": "=)"}}))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(result["aggregate"]["score"], json!(0.9));
}

#[tokio::test]
async fn validation_failure_short_circuits_before_the_network() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    // No mock for the sync path: a dispatched request would 501.
    let result = client
        .call(&json!({"action": "analyzesentiment", "params": {"language": "eng"}}))
        .await;
    assert!(matches!(result, Err(RequestError::MissingInput { .. })));
}

#[tokio::test]
async fn caller_options_are_never_mutated() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/sync/ocrdocument/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let opts = json!({"action": "ocrdocument", "params": {"url": "https://x.example", "page": "3"}});
    let before = opts.clone();
    client.call(&opts).await.unwrap();
    // Defaults and coercions landed on an internal copy only.
    assert_eq!(opts, before);
}

#[tokio::test]
async fn unparsable_body_passes_through_as_raw_string() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/sync/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("plain text result")
        .create_async()
        .await;

    let result = client
        .call(&json!({"action": "analyzesentiment", "params": {"text": "=)"}}))
        .await
        .unwrap();
    assert_eq!(result, json!("plain text result"));
}

#[tokio::test]
async fn remote_error_body_is_surfaced() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/sync/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(json!({"error": 4006, "reason": "text too long"}).to_string())
        .create_async()
        .await;

    match client
        .call(&json!({"action": "analyzesentiment", "params": {"text": "=)"}}))
        .await
    {
        Err(RequestError::Remote { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body["error"], json!(4006));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn retryable_remote_codes_resubmit() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    let mock = server
        .mock("GET", "/1/api/sync/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body(json!({"error": 7000, "reason": "busy"}).to_string())
        .expect(3)
        .create_async()
        .await;

    let result = client
        .call(&json!({
            "action": "analyzesentiment",
            "params": {"text": "=)"},
            "retries": 2,
            "errorCodes": [7000]
        }))
        .await;

    // Initial attempt plus two resubmissions, then the error surfaces as-is.
    mock.assert_async().await;
    assert!(matches!(result, Err(RequestError::Remote { status: 503, .. })));
}

#[tokio::test]
async fn file_attachments_force_multipart_post() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "scanned page bytes").unwrap();

    let mock = server
        .mock("POST", "/1/api/sync/ocrdocument/v1")
        .match_header(
            "content-type",
            Matcher::Regex("multipart/form-data.*".into()),
        )
        .with_status(200)
        .with_body(json!({"text_block": []}).to_string())
        .create_async()
        .await;

    client
        .call(&json!({
            "action": "ocrdocument",
            "params": {},
            "files": [file.path().to_str().unwrap()]
        }))
        .await
        .unwrap();

    mock.assert_async().await;
}

// === Job Lifecycle ===

#[tokio::test]
async fn async_submit_returns_the_job_id_immediately() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/async/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"jobID": "JOB42"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/job/status/JOB42")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "status": "finished",
                "actions": [{"status": "finished", "result": {"aggregate": {"score": 0.9}}}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let outcome = client
        .call_async(&json!({
            "action": "analyzesentiment",
            "params": {"text": "=)"},
            "pollInterval": 10
        }))
        .await
        .unwrap();

    match outcome {
        AsyncOutcome::Job(handle) => {
            assert_eq!(handle.job_id(), "JOB42");
            let terminal = handle.wait().await.unwrap();
            assert_eq!(terminal["status"], json!("finished"));
        }
        AsyncOutcome::Results(_) => panic!("no getResults requested"),
    }
}

#[tokio::test]
async fn get_results_fetches_the_final_payload() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/async/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"jobID": "JOB43"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/job/result/JOB43")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({"positive": [], "negative": [], "aggregate": {"sentiment": "positive"}})
                .to_string(),
        )
        .create_async()
        .await;

    match client
        .call_async(&json!({
            "action": "analyzesentiment",
            "params": {"text": "=)"},
            "getResults": true
        }))
        .await
        .unwrap()
    {
        AsyncOutcome::Results(payload) => {
            assert_eq!(payload["aggregate"]["sentiment"], json!("positive"));
        }
        AsyncOutcome::Job(_) => panic!("getResults should fetch directly"),
    }
}

#[tokio::test]
async fn job_submits_the_stringified_descriptor() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    let submit = server
        .mock("POST", "/1/job")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("apikey".into(), API_KEY.into()),
            Matcher::Regex("job=".into()),
        ]))
        .with_status(200)
        .with_body(json!({"jobID": "JOB44"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/job/status/JOB44")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"status": "finished", "actions": []}).to_string())
        .create_async()
        .await;

    let outcome = client
        .job(&json!({
            "job": {
                "actions": [
                    {"name": "analyzesentiment", "params": {"text": "=)"}},
                    {"name": "ocrdocument", "params": {"url": "https://example.com/doc.pdf"}}
                ]
            },
            "pollInterval": 10
        }))
        .await
        .unwrap();

    submit.assert_async().await;
    match outcome {
        AsyncOutcome::Job(handle) => assert_eq!(handle.job_id(), "JOB44"),
        AsyncOutcome::Results(_) => panic!("no getResults requested"),
    }
}

#[tokio::test]
async fn job_validation_reports_per_action_failures() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    let result = client
        .job(&json!({
            "job": {
                "actions": [
                    {"name": "analyzesentiment", "params": {"text": "=)"}},
                    {"name": "analyzesentiment"}
                ]
            }
        }))
        .await;

    match result {
        Err(RequestError::Actions { failures }) => {
            assert_eq!(failures.len(), 2);
            assert!(failures[0].error.is_none());
            assert!(failures[1].error.is_some());
        }
        other => panic!("expected per-action failures, got {other:?}"),
    }
}

#[tokio::test]
async fn callback_receives_the_terminal_payload() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/async/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"jobID": "JOB45"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/job/status/JOB45")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"status": "finished", "actions": []}).to_string())
        .create_async()
        .await;
    let callback = server
        .mock("POST", "/hooks/done")
        .match_body(Matcher::Regex("results=".into()))
        .with_status(200)
        .create_async()
        .await;

    let outcome = client
        .call_async(&json!({
            "action": "analyzesentiment",
            "params": {"text": "=)"},
            "pollInterval": 10,
            "callback": {"uri": format!("{}/hooks/done", server.url())}
        }))
        .await
        .unwrap();

    if let AsyncOutcome::Job(handle) = outcome {
        handle.wait().await.unwrap();
    }
    // Delivery is fire-and-forget; give the spawned task a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    callback.assert_async().await;
}

#[tokio::test]
async fn failed_delivery_lands_on_the_client_channel() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/async/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"jobID": "JOB46"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/1/job/status/JOB46")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"status": "failed", "actions": []}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/hooks/broken")
        .with_status(503)
        .create_async()
        .await;

    let mut failures = client.delivery_failures().expect("first take");
    assert!(client.delivery_failures().is_none(), "second take is empty");

    let outcome = client
        .call_async(&json!({
            "action": "analyzesentiment",
            "params": {"text": "=)"},
            "pollInterval": 10,
            "callback": {"uri": format!("{}/hooks/broken", server.url())}
        }))
        .await
        .unwrap();

    if let AsyncOutcome::Job(handle) = outcome {
        // The original caller still sees the terminal payload.
        let terminal = handle.wait().await.unwrap();
        assert_eq!(terminal["status"], json!("failed"));
    }

    let failure = tokio::time::timeout(Duration::from_secs(2), failures.recv())
        .await
        .expect("delivery failure within timeout")
        .expect("channel open");
    assert_eq!(failure.job_id, "JOB46");
    assert!(failure.reason.contains("503"));
}

#[tokio::test]
async fn cancelled_handles_stop_the_poll_loop() {
    let mut server = Server::new_async().await;
    let client = ready_client(&mut server).await;

    server
        .mock("GET", "/1/api/async/analyzesentiment/v1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"jobID": "JOB47"}).to_string())
        .create_async()
        .await;
    let status = server
        .mock("GET", "/1/job/status/JOB47")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"status": "finished", "actions": []}).to_string())
        .expect(0)
        .create_async()
        .await;

    let outcome = client
        .call_async(&json!({
            "action": "analyzesentiment",
            "params": {"text": "=)"},
            "pollInterval": 60_000
        }))
        .await
        .unwrap();

    if let AsyncOutcome::Job(handle) = outcome {
        handle.cancel();
        drop(handle);
    }
    // With a 60s interval and an immediate cancel, no status poll fires.
    tokio::time::sleep(Duration::from_millis(100)).await;
    status.assert_async().await;
}
