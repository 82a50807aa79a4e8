use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ScratchpadError;

// Dots are legal inside identifiers ($person.name), which rules out the
// usual template crates. Lowercase only.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\{([_a-z][._a-z0-9]*)\}|([_a-z][._a-z0-9]*))").expect("placeholder pattern")
});

/// Key/value store backing `$name` substitution in task definitions. Keys
/// may be dotted; values are strings or lists of strings.
#[derive(Debug, Default, Clone)]
pub struct Scratchpad {
    entries: BTreeMap<String, Value>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Substitutes every `$name` / `${name}` placeholder, then passes the
    /// result through a literal evaluator: a string that parses as a JSON
    /// list, number, or boolean comes back typed, anything else stays a
    /// string. A template without `$` is returned unchanged.
    pub fn replace(&self, template: &str) -> Result<Value, ScratchpadError> {
        if !template.contains('$') {
            return Ok(Value::String(template.to_string()));
        }

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(template) {
            let whole = captures.get(0).expect("match");
            let key = captures
                .get(1)
                .or_else(|| captures.get(2))
                .expect("identifier group")
                .as_str();
            let value = self.entries.get(key).ok_or_else(|| ScratchpadError {
                placeholder: key.to_string(),
            })?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(&render(value));
            last = whole.end();
        }
        out.push_str(&template[last..]);

        Ok(literal_eval(&out))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Literals only; never an expression evaluator. Objects, nulls, and bare
// strings fall through as text.
fn literal_eval(text: &str) -> Value {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(parsed @ (Value::Array(_) | Value::Number(_) | Value::Bool(_))) => parsed,
        _ => Value::String(text.to_string()),
    }
}
