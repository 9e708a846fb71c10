//! Data-driven argument descriptors.
//!
//! Each tool declares its arguments as a table of [`ArgSpec`]s. The same
//! table is walked twice: once to validate and coerce an incoming argument
//! object, and once to render the JSON-Schema shown by `list_tools`. Adding
//! a tool never means writing validation code.

use serde_json::{json, Map, Value};

use crate::errors::ToolError;

pub type JsonMap = Map<String, Value>;

#[derive(Clone, Debug)]
pub enum ArgKind {
    Str,
    Bool,
    Int { min: Option<i64>, max: Option<i64> },
    Num,
    Enum(&'static [&'static str]),
    StrList,
    StrMap,
    Object,
}

#[derive(Clone, Debug)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ArgSpec {
    pub fn required(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    pub fn with_default(
        name: &'static str,
        kind: ArgKind,
        default: Value,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
            description,
        }
    }
}

/// Validate an argument object against a descriptor table: unknown fields
/// are rejected, defaults are applied, and each value is type-checked.
pub fn validate(specs: &[ArgSpec], raw: &JsonMap) -> Result<JsonMap, ToolError> {
    for key in raw.keys() {
        if !specs.iter().any(|s| s.name == key) {
            return Err(ToolError::invalid_args(format!("unknown argument: {key}")));
        }
    }

    let mut out = JsonMap::new();
    for spec in specs {
        let value = match raw.get(spec.name) {
            Some(Value::Null) | None => match (&spec.default, spec.required) {
                (Some(default), _) => default.clone(),
                (None, true) => {
                    return Err(ToolError::invalid_args(format!(
                        "missing required argument: {}",
                        spec.name
                    )));
                }
                (None, false) => continue,
            },
            Some(value) => value.clone(),
        };
        check_kind(spec, &value)?;
        out.insert(spec.name.to_string(), value);
    }
    Ok(out)
}

fn check_kind(spec: &ArgSpec, value: &Value) -> Result<(), ToolError> {
    let bad = |expected: &str| {
        ToolError::invalid_args(format!(
            "argument {} must be {expected}, got {value}",
            spec.name
        ))
    };

    match &spec.kind {
        ArgKind::Str => {
            value.as_str().ok_or_else(|| bad("a string"))?;
        }
        ArgKind::Bool => {
            value.as_bool().ok_or_else(|| bad("a boolean"))?;
        }
        ArgKind::Int { min, max } => {
            let n = value.as_i64().ok_or_else(|| bad("an integer"))?;
            if let Some(min) = min {
                if n < *min {
                    return Err(ToolError::invalid_args(format!(
                        "argument {} must be >= {min}",
                        spec.name
                    )));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(ToolError::invalid_args(format!(
                        "argument {} must be <= {max}",
                        spec.name
                    )));
                }
            }
        }
        ArgKind::Num => {
            value.as_f64().ok_or_else(|| bad("a number"))?;
        }
        ArgKind::Enum(options) => {
            let s = value.as_str().ok_or_else(|| bad("a string"))?;
            if !options.contains(&s) {
                return Err(ToolError::invalid_args(format!(
                    "argument {} must be one of [{}], got {s:?}",
                    spec.name,
                    options.join(", ")
                )));
            }
        }
        ArgKind::StrList => {
            let list = value.as_array().ok_or_else(|| bad("an array of strings"))?;
            if !list.iter().all(Value::is_string) {
                return Err(bad("an array of strings"));
            }
        }
        ArgKind::StrMap => {
            let map = value.as_object().ok_or_else(|| bad("an object of strings"))?;
            if !map.values().all(Value::is_string) {
                return Err(bad("an object of strings"));
            }
        }
        ArgKind::Object => {
            value.as_object().ok_or_else(|| bad("an object"))?;
        }
    }
    Ok(())
}

/// Render a descriptor table as a JSON-Schema object. Every tool also
/// accepts `timeout_ms`, the per-call deadline override the dispatcher
/// strips before validation.
pub fn json_schema(specs: &[ArgSpec]) -> JsonMap {
    let mut properties = JsonMap::new();
    let mut required = Vec::new();

    for spec in specs {
        let mut prop = match &spec.kind {
            ArgKind::Str => json!({ "type": "string" }),
            ArgKind::Bool => json!({ "type": "boolean" }),
            ArgKind::Int { min, max } => {
                let mut p = json!({ "type": "integer" });
                if let Some(min) = min {
                    p["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    p["maximum"] = json!(max);
                }
                p
            }
            ArgKind::Num => json!({ "type": "number" }),
            ArgKind::Enum(options) => json!({ "type": "string", "enum": options }),
            ArgKind::StrList => json!({ "type": "array", "items": { "type": "string" } }),
            ArgKind::StrMap => {
                json!({ "type": "object", "additionalProperties": { "type": "string" } })
            }
            ArgKind::Object => json!({ "type": "object" }),
        };
        prop["description"] = json!(spec.description);
        if let Some(default) = &spec.default {
            prop["default"] = default.clone();
        }
        properties.insert(spec.name.to_string(), prop);
        if spec.required {
            required.push(json!(spec.name));
        }
    }

    properties.insert(
        "timeout_ms".to_string(),
        json!({
            "type": "integer",
            "minimum": 1,
            "description": "Per-call deadline override in milliseconds."
        }),
    );

    let mut schema = JsonMap::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn specs() -> Vec<ArgSpec> {
        vec![
            ArgSpec::required("url", ArgKind::Str, "Target URL."),
            ArgSpec::with_default(
                "status",
                ArgKind::Int {
                    min: Some(100),
                    max: Some(599),
                },
                json!(200),
                "HTTP status.",
            ),
            ArgSpec::optional(
                "stage",
                ArgKind::Enum(&["request", "response"]),
                "Interception stage.",
            ),
            ArgSpec::optional("headers", ArgKind::StrMap, "Headers to add."),
        ]
    }

    fn map(value: Value) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn defaults_are_applied_and_values_coerced_through() {
        let out = validate(&specs(), &map(json!({ "url": "https://x.test" }))).unwrap();
        assert_eq!(out["url"], "https://x.test");
        assert_eq!(out["status"], 200);
        assert!(!out.contains_key("stage"));
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        let err = validate(&specs(), &map(json!({ "url": "x", "bogus": 1 }))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
        assert!(err.message.contains("bogus"));
    }

    #[test]
    fn missing_required_and_bad_types_are_rejected() {
        assert!(validate(&specs(), &map(json!({}))).is_err());
        assert!(validate(&specs(), &map(json!({ "url": 7 }))).is_err());
        assert!(validate(&specs(), &map(json!({ "url": "x", "headers": { "a": 1 } }))).is_err());
    }

    #[test]
    fn ranges_and_enums_are_enforced() {
        let err = validate(&specs(), &map(json!({ "url": "x", "status": 42 }))).unwrap_err();
        assert!(err.message.contains(">= 100"));
        let err = validate(&specs(), &map(json!({ "url": "x", "stage": "both" }))).unwrap_err();
        assert!(err.message.contains("one of"));
        assert!(validate(&specs(), &map(json!({ "url": "x", "stage": "request" }))).is_ok());
    }

    #[test]
    fn schema_lists_properties_required_and_the_timeout_override() {
        let schema = json_schema(&specs());
        assert_eq!(schema["type"], "object");
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("url"));
        assert!(props.contains_key("timeout_ms"));
        assert_eq!(props["stage"]["enum"][0], "request");
        assert_eq!(props["status"]["default"], 200);
        assert_eq!(schema["required"], json!(["url"]));
    }
}
