//! Schema registry: the single source of truth for "is this request valid".
//!
//! The registry owns the request-type schemas (rebuilt after discovery, since
//! they embed the action enum inline), the per-action parameter/response
//! schemas fetched at construction time, and the derived indexes the
//! business-rule passes consume (`inputs`, `parameters`, `pairs`).
//!
//! Validation runs in up to three passes:
//!
//! 1. structural — defaults filled and values coerced, then checked against
//!    the request-type schema by the `jsonschema` validator;
//! 2. required inputs — an action declaring content inputs must receive at
//!    least one of them;
//! 3. parameter pairs — paired parameters must agree in element count.
//!
//! Failures are returned as data, never panics. Defaulting is a per-call
//! argument of the internal walk, so disabling it for action-level checks
//! cannot leak into concurrent validations.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use crate::error::{ActionFailure, RequestError, SchemaError};
use crate::transform;
use crate::types::{
    ActionDescriptor, RequestType, SecondaryValidation, DEFAULT_API_VERSION,
    DEFAULT_MAJOR_VERSION, DEFAULT_POLL_INTERVAL_MS, INPUT_PARAMS, PAIRS_KEYWORD,
};

/// Best-effort value conversion applied before type checking.
pub type Coercer = fn(&Value) -> Option<Value>;

/// Registry of request-type and action schemas plus derived indexes.
///
/// Owned by exactly one client; mutated only while discovery results are
/// being merged in, read-mostly afterwards.
#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Value>,
    coercions: HashMap<String, Coercer>,
    /// Lower-cased action name (id or alias) -> canonical id.
    aliases: HashMap<String, String>,
    /// Canonical id -> non-input parameter names.
    parameters: HashMap<String, HashSet<String>>,
    /// Canonical id -> declared content-input names, in fixed input order.
    inputs: HashMap<String, Vec<String>>,
    /// Canonical id -> parameter -> paired parameter names.
    pairs: HashMap<String, HashMap<String, Vec<String>>>,
}

impl SchemaRegistry {
    /// Create a registry with the built-in coercions and the six request-type
    /// schemas (action enum empty until discovery loads).
    pub fn new() -> Self {
        let mut registry = Self {
            schemas: HashMap::new(),
            coercions: HashMap::new(),
            aliases: HashMap::new(),
            parameters: HashMap::new(),
            inputs: HashMap::new(),
            pairs: HashMap::new(),
        };

        registry.add_coercion("integer", transform::coerce_integer);
        registry.add_coercion("number", transform::coerce_number);
        registry.add_coercion("string", transform::coerce_string);
        registry.add_coercion("boolean", transform::coerce_boolean);
        registry.add_coercion("array", transform::coerce_array);
        registry.add_coercion("object", transform::coerce_object);

        registry.load_request_type_schemas();
        registry
    }

    /// Register a coercion for a schema `type` name.
    ///
    /// Coercers must not panic; returning `None` leaves the raw value for the
    /// structural validator to reject normally.
    pub fn add_coercion(&mut self, type_name: impl Into<String>, coercer: Coercer) {
        self.coercions.insert(type_name.into(), coercer);
    }

    /// (Re)build the six request-type schemas from the current action names.
    ///
    /// Must be re-invoked after action schemas load: the `action` enum is
    /// embedded inline.
    pub fn load_request_type_schemas(&mut self) {
        for request_type in RequestType::all() {
            let schema = self.request_type_schema(request_type);
            self.schemas.insert(request_type.as_str().to_string(), schema);
        }
    }

    /// Register every discovered action's schema pair and rebuild the derived
    /// indexes. Idempotent: loading the same descriptors twice leaves the
    /// indexes unchanged.
    pub fn load_action_schemas(&mut self, descriptors: &[ActionDescriptor]) {
        for descriptor in descriptors {
            let canonical = descriptor.id.to_lowercase();

            self.schemas.insert(
                format!("{canonical}.parameters"),
                descriptor.parameters.clone(),
            );
            self.schemas
                .insert(format!("{canonical}.response"), descriptor.response.clone());

            // Alias resolution is a lookup indirection: every name, the
            // canonical id included, points at the one schema pair.
            self.aliases.insert(canonical.clone(), canonical.clone());
            for alias in &descriptor.aliases {
                self.aliases
                    .insert(alias.to_lowercase(), canonical.clone());
            }

            let props = descriptor
                .parameters
                .get("properties")
                .and_then(Value::as_object);

            let declared: HashSet<String> = props
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default();

            let inputs: Vec<String> = INPUT_PARAMS
                .iter()
                .filter(|name| declared.contains(**name))
                .map(|name| name.to_string())
                .collect();

            let non_inputs: HashSet<String> = declared
                .iter()
                .filter(|name| !inputs.contains(*name))
                .cloned()
                .collect();

            let mut action_pairs: HashMap<String, Vec<String>> = HashMap::new();
            if let Some(map) = props {
                for (name, prop) in map {
                    if let Some(paired) = prop.get(PAIRS_KEYWORD) {
                        let paired = transform::string_list(paired);
                        if !paired.is_empty() {
                            action_pairs.insert(name.clone(), paired);
                        }
                    }
                }
            }

            self.inputs.insert(canonical.clone(), inputs);
            self.parameters.insert(canonical.clone(), non_inputs);
            self.pairs.insert(canonical, action_pairs);
        }
    }

    /// Install per-(action, flavor) parameter schemas.
    ///
    /// `validate_action` prefers `<action>.<flavor>.parameters` when the
    /// params carry a `flavor` naming an installed schema.
    pub fn load_flavor_schemas(&mut self, flavors: HashMap<String, HashMap<String, Value>>) {
        for (action, by_flavor) in flavors {
            let action = action.to_lowercase();
            for (flavor, schema) in by_flavor {
                self.schemas
                    .insert(format!("{action}.{flavor}.parameters"), schema);
            }
        }
    }

    /// Resolve an action name (id or alias, any case) to its canonical id.
    pub fn resolve_action(&self, name: &str) -> Option<&str> {
        self.aliases.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Every registered action name — ids and aliases — sorted, for the
    /// inline `action` enum.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.aliases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declared content inputs for an action.
    pub fn inputs_for(&self, action: &str) -> Option<&[String]> {
        let canonical = self.resolve_action(action)?;
        self.inputs.get(canonical).map(Vec::as_slice)
    }

    /// Non-input parameter names for an action.
    pub fn parameters_for(&self, action: &str) -> Option<&HashSet<String>> {
        let canonical = self.resolve_action(action)?;
        self.parameters.get(canonical)
    }

    /// Declared pairs for an action.
    pub fn pairs_for(&self, action: &str) -> Option<&HashMap<String, Vec<String>>> {
        let canonical = self.resolve_action(action)?;
        self.pairs.get(canonical)
    }

    /// Look up a registered schema by name.
    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    // === Validation ===

    /// Structural validation with defaulting and coercion enabled.
    ///
    /// The value is repaired in place (defaults filled, coercible values
    /// converted) and then checked against the named schema. Errors carry the
    /// violated constraint and the offending path.
    pub fn validate(&self, name: &str, value: &mut Value) -> Result<(), RequestError> {
        self.validate_with(name, value, true)
    }

    /// Validate params against an action's parameter schema.
    ///
    /// Defaulting is disabled for this pass only, so injected defaults can
    /// never mask a missing-required error. Coercion stays on.
    pub fn validate_action(&self, action: &str, params: &mut Value) -> Result<(), RequestError> {
        let Some(canonical) = self.resolve_action(action) else {
            return Err(RequestError::Validation {
                errors: vec![SchemaError {
                    path: "/action".into(),
                    message: format!("unknown action \"{action}\""),
                }],
            });
        };

        let flavored = params
            .get("flavor")
            .and_then(Value::as_str)
            .map(|flavor| format!("{canonical}.{flavor}.parameters"))
            .filter(|name| self.schemas.contains_key(name));

        let schema_name = flavored.unwrap_or_else(|| format!("{canonical}.parameters"));
        self.validate_with(&schema_name, params, false)
    }

    /// Fails iff the action declares inputs and none is present.
    ///
    /// A file attachment satisfies the synthetic `file` input.
    pub fn validate_required_inputs(
        &self,
        action: &str,
        params: &Value,
        has_files: bool,
    ) -> Option<String> {
        let inputs = self.inputs_for(action)?;
        if inputs.is_empty() {
            return None;
        }

        let satisfied = inputs.iter().any(|input| {
            params.get(input).is_some() || (input == "file" && has_files)
        });

        if satisfied {
            None
        } else {
            Some(format!(
                "action \"{}\" requires at least one input: {}",
                action,
                inputs.join(", ")
            ))
        }
    }

    /// Checks every declared pair: a present secondary whose element count
    /// differs from the main parameter's fails.
    ///
    /// `file_count` populates the `file` slot for cardinality only; the
    /// caller's params are never mutated.
    pub fn validate_param_pairs(
        &self,
        action: &str,
        params: &Value,
        file_count: usize,
    ) -> Option<String> {
        let pairs = self.pairs_for(action)?;

        let count_of = |name: &str| -> Option<usize> {
            if name == "file" && file_count > 0 {
                return Some(file_count);
            }
            params.get(name).map(transform::element_count)
        };

        for (main, secondaries) in pairs {
            let main_count = count_of(main).unwrap_or(0);
            for secondary in secondaries {
                let Some(secondary_count) = count_of(secondary) else {
                    continue;
                };
                if secondary_count != main_count {
                    return Some(format!(
                        "parameter \"{secondary}\" must pair with \"{main}\": \
                         {secondary_count} element(s) vs {main_count}"
                    ));
                }
            }
        }
        None
    }

    /// Full request validation: structural pass on the request-type schema,
    /// then the action-level triple per the type's secondary mode.
    ///
    /// Job requests run the triple once per nested action and report one
    /// record per action, in submission order.
    pub fn validate_request(
        &self,
        request_type: RequestType,
        opts: &mut Value,
    ) -> Result<(), RequestError> {
        if let Some(params) = opts.get_mut("params") {
            transform::strip_nulls(params);
        }
        normalize_names(opts);

        self.validate(request_type.as_str(), opts)?;

        match request_type.secondary_validation() {
            None => Ok(()),
            Some(SecondaryValidation::Action) => {
                let action = opts
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let file_count = opts
                    .get("files")
                    .map(transform::element_count)
                    .unwrap_or(0);

                if !opts.get("params").is_some_and(Value::is_object) {
                    opts["params"] = json!({});
                }
                let params = &mut opts["params"];

                self.validate_action(&action, params)?;
                if let Some(message) =
                    self.validate_required_inputs(&action, params, file_count > 0)
                {
                    return Err(RequestError::MissingInput { message });
                }
                if let Some(message) = self.validate_param_pairs(&action, params, file_count) {
                    return Err(RequestError::PairMismatch { message });
                }
                Ok(())
            }
            Some(SecondaryValidation::Job) => {
                let file_count = opts
                    .get("files")
                    .map(transform::element_count)
                    .unwrap_or(0);

                let Some(actions) = opts
                    .pointer_mut("/job/actions")
                    .and_then(Value::as_array_mut)
                else {
                    return Ok(());
                };

                let mut failures = Vec::with_capacity(actions.len());
                let mut any_failed = false;

                for entry in actions.iter_mut() {
                    let name = entry
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();

                    if !entry.get("params").is_some_and(Value::is_object) {
                        entry["params"] = json!({});
                    }
                    let params = &mut entry["params"];

                    let error = self.action_triple_error(&name, params, file_count);
                    any_failed |= error.is_some();
                    failures.push(ActionFailure {
                        action: name,
                        error,
                    });
                }

                if any_failed {
                    Err(RequestError::Actions { failures })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Run the action triple and flatten any failure to a message string.
    fn action_triple_error(
        &self,
        action: &str,
        params: &mut Value,
        file_count: usize,
    ) -> Option<String> {
        if let Err(err) = self.validate_action(action, params) {
            let message = match err {
                RequestError::Validation { errors } => errors
                    .iter()
                    .map(SchemaError::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
                other => other.to_string(),
            };
            return Some(message);
        }
        if let Some(message) = self.validate_required_inputs(action, params, file_count > 0) {
            return Some(message);
        }
        self.validate_param_pairs(action, params, file_count)
    }

    fn validate_with(
        &self,
        name: &str,
        value: &mut Value,
        use_defaults: bool,
    ) -> Result<(), RequestError> {
        let Some(schema) = self.schemas.get(name) else {
            return Err(RequestError::InvalidSchema {
                name: name.to_string(),
                message: "no such schema registered".into(),
            });
        };

        self.repair(schema, value, use_defaults);

        let validator =
            jsonschema::validator_for(schema).map_err(|e| RequestError::InvalidSchema {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let errors: Vec<SchemaError> = validator
            .iter_errors(value)
            .map(|e| SchemaError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RequestError::Validation { errors })
        }
    }

    /// Recursive default-filling and coercion walk.
    ///
    /// Coerces the current node toward the schema's declared `type` when it
    /// doesn't already match, then descends into object properties and array
    /// items. Coercion failure leaves the raw value for the validator.
    fn repair(&self, schema: &Value, value: &mut Value, use_defaults: bool) {
        if let Some(declared) = schema.get("type").and_then(Value::as_str) {
            if !type_matches(declared, value) {
                if let Some(coercer) = self.coercions.get(declared) {
                    if let Some(coerced) = coercer(value) {
                        *value = coerced;
                    }
                }
            }
        }

        match value {
            Value::Object(map) => {
                let Some(props) = schema.get("properties").and_then(Value::as_object) else {
                    return;
                };
                for (prop_name, prop_schema) in props {
                    if let Some(child) = map.get_mut(prop_name) {
                        self.repair(prop_schema, child, use_defaults);
                    } else if use_defaults {
                        if let Some(default) = prop_schema.get("default") {
                            map.insert(prop_name.clone(), default.clone());
                        }
                    }
                }
            }
            Value::Array(items) => {
                let Some(item_schema) = schema.get("items") else {
                    return;
                };
                for item in items {
                    self.repair(item_schema, item, use_defaults);
                }
            }
            _ => {}
        }
    }

    // === Request-type schema assembly ===

    fn request_type_schema(&self, request_type: RequestType) -> Value {
        match request_type {
            RequestType::Sync => self.api_call_schema(false),
            RequestType::Async => self.api_call_schema(true),
            RequestType::Job => self.job_schema(),
            RequestType::Result | RequestType::Status => job_id_schema(),
            RequestType::Discovery => discovery_schema(),
        }
    }

    /// Schema shared by `sync` and `async`; the async shape adds the job
    /// lifecycle fields.
    fn api_call_schema(&self, lifecycle: bool) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "majorVersion": { "type": "string", "default": DEFAULT_MAJOR_VERSION },
                "action": self.action_property(),
                "apiVersion": { "type": "string", "default": DEFAULT_API_VERSION },
                "method": method_property(),
                "params": { "type": "object", "default": {} },
                "files": files_property(),
                "retries": { "type": "integer", "minimum": 0 },
                "errorCodes": { "type": "array", "items": { "type": "integer" } }
            },
            "required": ["action"]
        });

        if lifecycle {
            if let Some(props) = schema["properties"].as_object_mut() {
                props.insert("getResults".into(), json!({ "type": "boolean" }));
                props.insert(
                    "pollInterval".into(),
                    json!({ "type": "integer", "minimum": 1, "default": DEFAULT_POLL_INTERVAL_MS }),
                );
                props.insert("callback".into(), callback_property());
            }
        }

        schema
    }

    fn job_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "majorVersion": { "type": "string", "default": DEFAULT_MAJOR_VERSION },
                "job": {
                    "type": "object",
                    "properties": {
                        "actions": {
                            "type": "array",
                            "minItems": 1,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": self.action_property(),
                                    "version": { "type": "string" },
                                    "params": { "type": "object" }
                                },
                                "required": ["name"]
                            }
                        }
                    },
                    "required": ["actions"]
                },
                "files": files_property(),
                "getResults": { "type": "boolean" },
                "pollInterval": { "type": "integer", "minimum": 1, "default": DEFAULT_POLL_INTERVAL_MS },
                "callback": callback_property(),
                "retries": { "type": "integer", "minimum": 0 },
                "errorCodes": { "type": "array", "items": { "type": "integer" } }
            },
            "required": ["job"]
        })
    }

    fn action_property(&self) -> Value {
        let mut prop = json!({ "type": "string" });
        let names = self.action_names();
        if !names.is_empty() {
            prop["enum"] = json!(names);
        }
        prop
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn job_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "majorVersion": { "type": "string", "default": DEFAULT_MAJOR_VERSION },
            "jobId": { "type": "string" },
            "method": method_property(),
            "retries": { "type": "integer", "minimum": 0 },
            "errorCodes": { "type": "array", "items": { "type": "integer" } }
        },
        "required": ["jobId"]
    })
}

fn discovery_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "majorVersion": { "type": "string", "default": DEFAULT_MAJOR_VERSION },
            "action": { "type": "string", "enum": ["api", "flavor"], "default": "api" },
            "method": method_property(),
            "params": { "type": "object", "default": {} }
        }
    })
}

fn method_property() -> Value {
    json!({ "type": "string", "enum": ["get", "post"], "default": "get" })
}

fn files_property() -> Value {
    json!({
        "type": "array",
        "default": [],
        "items": {
            "anyOf": [
                { "type": "string" },
                {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "path": { "type": "string" }
                    },
                    "required": ["name", "path"]
                }
            ]
        }
    })
}

fn callback_property() -> Value {
    json!({
        "type": "object",
        "properties": {
            "uri": { "type": "string" },
            "method": { "type": "string", "enum": ["encoded", "multipart"], "default": "encoded" }
        },
        "required": ["uri"]
    })
}

/// Lower-case the name-like fields so case-insensitive action lookups hold
/// through the inline enums.
fn normalize_names(opts: &mut Value) {
    for field in ["action", "method"] {
        if let Some(Value::String(s)) = opts.get_mut(field) {
            *s = s.to_lowercase();
        }
    }
    if let Some(actions) = opts.pointer_mut("/job/actions").and_then(Value::as_array_mut) {
        for entry in actions {
            if let Some(Value::String(s)) = entry.get_mut("name") {
                *s = s.to_lowercase();
            }
        }
    }
}

/// Whether a value already satisfies a schema `type` name.
fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.as_number().is_some_and(|n| n.is_i64() || n.is_u64()),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}
