//! Parameter ingress as a semantic multimap.
//!
//! Every transport folds its inputs into an ordered list of (key, value)
//! pairs; the coalesced view collapses singletons to scalars and repeats to
//! lists, so `?k=1&k=2`, form `k=1&k=2`, and body `{"k":[1,2]}` validate
//! identically.

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum RawValue {
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
}

/// Ordered multimap of raw parameters.
#[derive(Debug, Clone, Default)]
pub struct RawParams {
    entries: Vec<(String, RawValue)>,
}

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: RawValue) {
        self.entries.push((key.into(), value));
    }

    pub fn push_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.push(key, RawValue::Text(value.into()));
    }

    pub fn push_json(&mut self, key: impl Into<String>, value: Value) {
        self.push(key, RawValue::Json(value));
    }

    /// Fold a JSON object in: each top-level entry becomes one pair; array
    /// values append one pair per element so they coalesce like repeated
    /// query keys.
    pub fn extend_from_object(&mut self, object: &Value) {
        let Some(map) = object.as_object() else {
            return;
        };
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        self.push_json(key.clone(), item.clone());
                    }
                },
                other => self.push_json(key.clone(), other.clone()),
            }
        }
    }

    /// Fold an urlencoded body or query string in.
    pub fn extend_from_urlencoded(&mut self, raw: &str) {
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let mut halves = pair.splitn(2, '=');
            let key = halves.next().unwrap_or_default();
            let value = halves.next().unwrap_or_default();
            let key = urldecode(key);
            let value = urldecode(value);
            if !key.is_empty() {
                self.push_text(key, value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, RawValue)> {
        self.entries.iter()
    }

    /// Collapse the multimap: a key seen once maps to its scalar, a key seen
    /// more than once maps to the ordered list of its values.
    pub fn coalesce(&self) -> serde_json::Map<String, Value> {
        let mut out = serde_json::Map::new();
        for (key, raw) in &self.entries {
            let value = raw_to_value(raw);
            if let Some(existing) = out.get_mut(key) {
                // A repeated key accumulates; an existing list appends.
                if let Value::Array(items) = existing {
                    items.push(value);
                } else {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            } else {
                out.insert(key.clone(), value);
            }
        }
        out
    }
}

fn raw_to_value(raw: &RawValue) -> Value {
    match raw {
        RawValue::Text(s) => Value::String(s.clone()),
        RawValue::Json(v) => v.clone(),
        RawValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn urldecode(raw: &str) -> String {
    let plus_fixed = raw.replace('+', " ");
    urlencoding::decode(&plus_fixed)
        .map(|c| c.into_owned())
        .unwrap_or(plus_fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_stay_scalar_repeats_become_lists() {
        let mut raw = RawParams::new();
        raw.push_text("name", "t");
        raw.push_text("tag", "a");
        raw.push_text("tag", "b");

        let view = raw.coalesce();
        assert_eq!(view["name"], "t");
        assert_eq!(view["tag"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn query_body_and_json_agree() {
        let mut from_query = RawParams::new();
        from_query.extend_from_urlencoded("k=1&k=2");

        let mut from_json = RawParams::new();
        from_json.extend_from_object(&serde_json::json!({ "k": [1, 2] }));

        let q = from_query.coalesce();
        let j = from_json.coalesce();
        assert!(q["k"].is_array());
        assert!(j["k"].is_array());
        assert_eq!(q["k"].as_array().map(Vec::len), j["k"].as_array().map(Vec::len));
    }

    #[test]
    fn urlencoded_decoding() {
        let mut raw = RawParams::new();
        raw.extend_from_urlencoded("email=t%40t.com&note=hello+world");
        let view = raw.coalesce();
        assert_eq!(view["email"], "t@t.com");
        assert_eq!(view["note"], "hello world");
    }
}
