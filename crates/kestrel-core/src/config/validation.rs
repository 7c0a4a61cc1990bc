//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Validate JSON config and warn about unknown fields.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    let expected = expected_config_keys();
    for path in find_unknown_keys(&value, &expected, "") {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Find unknown keys in JSON value compared to expected keys.
/// Returns paths like "dispatch.unknownField" for unknown fields.
fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let mut unknowns = Vec::new();

    let Value::Object(obj) = value else {
        return unknowns;
    };

    for (key, child) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if let Some(nested) = expected.nested.get(key.as_str()) {
            unknowns.extend(find_unknown_keys(child, nested, &path));
        } else if let Some(entry) = &expected.any_key {
            unknowns.extend(find_unknown_keys(child, entry, &path));
        } else if !expected.fields.contains(key.as_str()) {
            unknowns.push(path);
        }
    }

    unknowns
}

/// Expected keys for a config section.
/// `fields` are leaf fields, `nested` are nested objects with their own expected keys.
/// `any_key` describes maps with free-form keys (the `hosts` section).
struct ExpectedKeys {
    fields: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
    any_key: Option<Box<ExpectedKeys>>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            nested: HashMap::new(),
            any_key: None,
        }
    }

    fn map_of(entry: ExpectedKeys) -> Self {
        Self {
            fields: HashSet::new(),
            nested: HashMap::new(),
            any_key: Some(Box::new(entry)),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }
}

fn expected_config_keys() -> ExpectedKeys {
    let dispatch = ExpectedKeys::new(&["queryTimeoutMs", "fallback"]);
    let actions = ExpectedKeys::new(&["actionTimeoutMs"]);
    let supervisor = ExpectedKeys::new(&[
        "startupTimeoutMs",
        "pingIntervalMs",
        "pingTimeoutMs",
        "maxRestarts",
        "restartDelayMs",
        "maxRestartDelayMs",
    ]);
    let host = ExpectedKeys::new(&["command", "args", "workingDir"]);

    ExpectedKeys::new(&[])
        .with_nested("dispatch", dispatch)
        .with_nested("actions", actions)
        .with_nested("supervisor", supervisor)
        .with_nested("hosts", ExpectedKeys::map_of(host))
}
