use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Schema keys the upstream declaration parser rejects.
const STRIP_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "additionalProperties",
    "strict",
    "default",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
];

/// Characters the upstream accepts in declaration names.
fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        out.insert(0, '_');
    }
    out.truncate(63);
    out
}

/// Per-model bijection between sanitized declaration names and the names
/// the client actually sent. Streaming function-call events look up the
/// inverse so the dialect response carries the caller's original name.
pub struct ToolNameRegistry {
    // model -> safe -> original
    map: DashMap<String, HashMap<String, String>>,
}

impl ToolNameRegistry {
    fn new() -> Self {
        Self { map: DashMap::new() }
    }

    pub fn global() -> &'static ToolNameRegistry {
        static INSTANCE: Lazy<ToolNameRegistry> = Lazy::new(ToolNameRegistry::new);
        &INSTANCE
    }

    /// Registers `original` under `model` and returns the safe name. A
    /// sanitized collision between two distinct originals gets a numeric
    /// suffix so the inverse stays a function.
    pub fn register(&self, model: &str, original: &str) -> String {
        let mut entry = self.map.entry(model.to_string()).or_default();
        let base = sanitize(original);

        match entry.get(&base) {
            Some(existing) if existing == original => return base,
            None => {
                entry.insert(base.clone(), original.to_string());
                return base;
            }
            Some(_) => {}
        }

        let mut n = 2usize;
        loop {
            let mut candidate = base.clone();
            candidate.truncate(60);
            let candidate = format!("{}_{}", candidate, n);
            match entry.get(&candidate) {
                Some(existing) if existing == original => return candidate,
                None => {
                    entry.insert(candidate.clone(), original.to_string());
                    return candidate;
                }
                Some(_) => n += 1,
            }
        }
    }

    pub fn resolve(&self, model: &str, safe: &str) -> Option<String> {
        self.map
            .get(model)
            .and_then(|names| names.get(safe).cloned())
    }

    /// Names that never went through sanitation come back unchanged.
    pub fn resolve_or_passthrough(&self, model: &str, safe: &str) -> String {
        self.resolve(model, safe)
            .unwrap_or_else(|| safe.to_string())
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

/// Normalizes a tool parameter schema into the shape the upstream accepts:
/// unsupported keys dropped, `type` uppercased recursively, missing
/// `properties` defaulted for object schemas.
pub fn clean_parameters(params: &mut Value) {
    strip_unsupported(params);
    enforce_uppercase_types(params);
    if let Some(obj) = params.as_object_mut() {
        if !obj.contains_key("type") {
            obj.insert("type".to_string(), json!("OBJECT"));
        }
        if obj.get("type").and_then(Value::as_str) == Some("OBJECT")
            && !obj.contains_key("properties")
        {
            obj.insert("properties".to_string(), json!({}));
        }
    }
}

fn strip_unsupported(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in STRIP_KEYS {
                map.remove(*key);
            }
            for (_, child) in map.iter_mut() {
                strip_unsupported(child);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                strip_unsupported(child);
            }
        }
        _ => {}
    }
}

fn enforce_uppercase_types(value: &mut Value) {
    if let Value::Object(map) = value {
        if let Some(Value::String(s)) = map.get_mut("type") {
            *s = s.to_uppercase();
        }
        if let Some(Value::Object(props)) = map.get_mut("properties") {
            for v in props.values_mut() {
                enforce_uppercase_types(v);
            }
        }
        if let Some(items) = map.get_mut("items") {
            enforce_uppercase_types(items);
        }
        for key in ["anyOf", "oneOf", "allOf"] {
            if let Some(Value::Array(variants)) = map.get_mut(key) {
                for v in variants.iter_mut() {
                    enforce_uppercase_types(v);
                }
            }
        }
    } else if let Value::Array(arr) = value {
        for item in arr {
            enforce_uppercase_types(item);
        }
    }
}

/// Tool arguments arrive as a JSON object from the upstream but some
/// clients hand them back as strings; decode defensively, wrapping
/// non-JSON payloads the way the legacy path did.
pub fn decode_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| json!({ "query": raw }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_to_safe_alphabet() {
        assert_eq!(sanitize("get_weather"), "get_weather");
        assert_eq!(sanitize("mcp__server.tool/list"), "mcp__server_tool_list");
        assert_eq!(sanitize("9lives"), "_9lives");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn round_trip_restores_original_names() {
        let registry = ToolNameRegistry::new();
        let originals = [
            "get_weather",
            "mcp__files.read",
            "weird name!",
            "目录列表",
        ];
        for original in originals {
            let safe = registry.register("m1", original);
            assert!(safe.chars().all(is_safe_char), "unsafe char in {}", safe);
            assert_eq!(registry.resolve("m1", &safe).as_deref(), Some(original));
        }
    }

    #[test]
    fn collisions_get_distinct_safe_names() {
        let registry = ToolNameRegistry::new();
        let a = registry.register("m1", "tool.x");
        let b = registry.register("m1", "tool/x");
        assert_ne!(a, b);
        assert_eq!(registry.resolve("m1", &a).as_deref(), Some("tool.x"));
        assert_eq!(registry.resolve("m1", &b).as_deref(), Some("tool/x"));
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ToolNameRegistry::new();
        let first = registry.register("m1", "tool.x");
        let again = registry.register("m1", "tool.x");
        assert_eq!(first, again);
    }

    #[test]
    fn registry_is_per_model() {
        let registry = ToolNameRegistry::new();
        registry.register("m1", "tool.x");
        assert_eq!(registry.resolve("m2", "tool_x"), None);
        assert_eq!(registry.resolve_or_passthrough("m2", "tool_x"), "tool_x");
    }

    #[test]
    fn clean_parameters_uppercases_and_defaults() {
        let mut params = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "city": { "type": "string", "default": "BJ" },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        });
        clean_parameters(&mut params);

        assert_eq!(params["type"], "OBJECT");
        assert_eq!(params["properties"]["city"]["type"], "STRING");
        assert_eq!(params["properties"]["tags"]["items"]["type"], "STRING");
        assert!(params.get("additionalProperties").is_none());
        assert!(params["properties"]["city"].get("default").is_none());
    }

    #[test]
    fn clean_parameters_fills_missing_properties() {
        let mut params = json!({ "type": "object" });
        clean_parameters(&mut params);
        assert_eq!(params["properties"], json!({}));

        let mut empty = json!({});
        clean_parameters(&mut empty);
        assert_eq!(empty["type"], "OBJECT");
        assert_eq!(empty["properties"], json!({}));
    }

    #[test]
    fn decode_tool_arguments_wraps_non_json() {
        assert_eq!(decode_tool_arguments("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_tool_arguments(""), json!({}));
        assert_eq!(
            decode_tool_arguments("plain text"),
            json!({"query": "plain text"})
        );
    }
}
