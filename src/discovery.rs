//! Startup discovery: populates the registry's dynamic parts.
//!
//! Two independent queries run at client construction, both required before
//! the client is usable: the action list (ids, aliases, schema pairs) and
//! the optional flavor axis. There is no partial-readiness mode — any
//! non-tolerated failure aborts construction.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::dispatch::Transport;
use crate::error::{ClientError, RequestError};
use crate::transform;
use crate::types::{ActionDescriptor, RequestType, DISCOVERY_MAX_RESULTS};

/// Remote error codes that mean the credential was rejected.
const API_KEY_ERROR_CODES: &[i64] = &[2000, 2001, 2002];

/// Fetch the full action list.
///
/// Issues one discovery request (action `api`, GET, full definitions up to
/// [`DISCOVERY_MAX_RESULTS`]). A non-list response is a proxy-misbehavior
/// signal and surfaces the payload itself as the error.
pub async fn available_actions(
    transport: &Transport,
) -> Result<Vec<ActionDescriptor>, ClientError> {
    let opts = json!({
        "action": "api",
        "method": "get",
        "params": {
            "full_definition": true,
            "max_results": DISCOVERY_MAX_RESULTS
        }
    });

    let payload = transport
        .send(RequestType::Discovery, &opts)
        .await
        .map_err(remap_discovery_error)?;

    let entries = match payload {
        Value::Array(entries) => entries,
        other => return Err(ClientError::Discovery { payload: other }),
    };

    let mut descriptors = Vec::with_capacity(entries.len());
    for entry in &entries {
        let Some(id) = entry.get("id").and_then(Value::as_str) else {
            warn!("skipping discovery entry without an id");
            continue;
        };
        descriptors.push(ActionDescriptor {
            id: id.to_lowercase(),
            aliases: entry
                .get("aliases")
                .map(transform::string_list)
                .unwrap_or_default(),
            parameters: entry
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" })),
            response: entry
                .get("response")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" })),
        });
    }

    debug!("discovered {} actions", descriptors.len());
    Ok(descriptors)
}

/// Fetch per-(action, flavor) parameter schemas.
///
/// Three-stage waterfall over the `flavor` discovery axis:
///
/// 1. the global flavor list — degrades to empty on error, which skips the
///    whole axis;
/// 2. each action's flavor values — an action without flavors is skipped;
/// 3. the concrete schema per (action, flavor) — any failure here aborts
///    discovery.
///
/// Returns `None` rather than an empty map so the caller can skip installing
/// flavor schemas entirely.
pub async fn flavor_schemas(
    transport: &Transport,
    actions: &[ActionDescriptor],
) -> Result<Option<HashMap<String, HashMap<String, Value>>>, ClientError> {
    let global = flavor_values(transport, None).await;
    if global.is_empty() {
        debug!("no flavor axis advertised");
        return Ok(None);
    }

    let mut schemas = HashMap::new();
    for descriptor in actions {
        let flavors = flavor_values(transport, Some(&descriptor.id)).await;
        if flavors.is_empty() {
            continue;
        }

        let mut by_flavor = HashMap::new();
        for flavor in flavors {
            let opts = json!({
                "action": "flavor",
                "method": "get",
                "params": {
                    "action": descriptor.id,
                    "flavor": flavor,
                    "schema": true
                }
            });
            let schema = transport
                .send(RequestType::Discovery, &opts)
                .await
                .map_err(remap_discovery_error)?;
            by_flavor.insert(flavor, schema);
        }

        debug!(
            action = %descriptor.id,
            flavors = by_flavor.len(),
            "installed flavor schemas"
        );
        schemas.insert(descriptor.id.clone(), by_flavor);
    }

    Ok((!schemas.is_empty()).then_some(schemas))
}

/// List the flavor values for the whole service, or for one action.
///
/// Degrades to an empty list on any failure; stages 1 and 2 of the waterfall
/// must tolerate a missing axis.
async fn flavor_values(transport: &Transport, action: Option<&str>) -> Vec<String> {
    let mut params = json!({});
    if let Some(action) = action {
        params["action"] = json!(action);
    }
    let opts = json!({ "action": "flavor", "method": "get", "params": params });

    match transport.send(RequestType::Discovery, &opts).await {
        Ok(payload) => transform::string_list(&payload),
        Err(error) => {
            warn!(%error, action = ?action, "flavor lookup degraded to empty");
            Vec::new()
        }
    }
}

/// Remap discovery failures: credential rejections become the uniform
/// invalid-api-key error, other remote payloads pass through unchanged.
fn remap_discovery_error(error: RequestError) -> ClientError {
    if let RequestError::Remote { body, .. } = &error {
        if is_api_key_error(body) {
            return ClientError::InvalidApiKey;
        }
        return ClientError::Discovery {
            payload: body.clone(),
        };
    }
    ClientError::Request(error)
}

fn is_api_key_error(body: &Value) -> bool {
    if body
        .get("error")
        .and_then(Value::as_i64)
        .is_some_and(|code| API_KEY_ERROR_CODES.contains(&code))
    {
        return true;
    }

    ["reason", "message", "detail"].iter().any(|field| {
        body.get(*field)
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains("api key"))
    })
}
