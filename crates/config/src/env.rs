//! Per-key environment overrides.
//!
//! Every leaf in the config tree can be overridden by a derived variable
//! name: `AXON_` plus the upper-snake path (`server.web.port` →
//! `AXON_SERVER_WEB_PORT`). A `_{ENV}` suffixed variant wins over the bare
//! name when the process env tag matches: with `AXON_ENV=test`,
//! `AXON_SERVER_WEB_PORT_TEST` overrides `AXON_SERVER_WEB_PORT`.

use serde_json::Value;

const VAR_PREFIX: &str = "AXON";

/// The env tag used to pick `_{ENV}` suffixed variables.
pub fn current_env_tag() -> Option<String> {
    std::env::var("AXON_ENV").ok().filter(|v| !v.is_empty())
}

/// Apply env-var overrides onto a serialized config tree, in place.
///
/// Coercion is typed by the existing value: booleans accept a
/// case-insensitive `true`, numbers parse as int or float by presence of a
/// `.`, strings pass through.
pub fn apply_env_overrides(tree: &mut Value) {
    let tag = current_env_tag();
    apply_env_overrides_with(tree, tag.as_deref(), |name| std::env::var(name).ok());
}

/// Implementation with an injectable lookup, for tests.
pub fn apply_env_overrides_with(
    tree: &mut Value,
    env_tag: Option<&str>,
    lookup: impl Fn(&str) -> Option<String> + Copy,
) {
    walk(tree, &mut Vec::new(), env_tag, lookup);
}

fn walk(
    node: &mut Value,
    path: &mut Vec<String>,
    env_tag: Option<&str>,
    lookup: impl Fn(&str) -> Option<String> + Copy,
) {
    match node {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(key.clone());
                walk(child, path, env_tag, lookup);
                path.pop();
            }
        },
        leaf => {
            if let Some(raw) = lookup_var(path, env_tag, lookup)
                && let Some(coerced) = coerce(leaf, &raw)
            {
                *leaf = coerced;
            }
        },
    }
}

fn lookup_var(
    path: &[String],
    env_tag: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let base = var_name(path);
    if let Some(tag) = env_tag {
        let suffixed = format!("{base}_{}", tag.to_uppercase());
        if let Some(v) = lookup(&suffixed) {
            return Some(v);
        }
    }
    lookup(&base)
}

fn var_name(path: &[String]) -> String {
    let mut name = String::from(VAR_PREFIX);
    for segment in path {
        name.push('_');
        name.push_str(&segment.to_uppercase());
    }
    name
}

/// Coerce a raw env string by the type of the value it replaces.
fn coerce(existing: &Value, raw: &str) -> Option<Value> {
    match existing {
        Value::Bool(_) => Some(Value::Bool(raw.eq_ignore_ascii_case("true"))),
        Value::Number(_) => {
            if raw.contains('.') {
                raw.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            } else {
                raw.parse::<i64>().ok().map(Value::from)
            }
        },
        Value::String(_) | Value::Null => Some(Value::String(raw.to_string())),
        // Arrays and objects are only overridable via the config file.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + Copy + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn overrides_leaf_with_typed_coercion() {
        let mut tree = serde_json::json!({
            "server": { "web": { "port": 8080, "enabled": true } },
            "logger": { "level": "info" },
        });
        let vars = [
            ("AXON_SERVER_WEB_PORT", "9000"),
            ("AXON_SERVER_WEB_ENABLED", "FALSE"),
            ("AXON_LOGGER_LEVEL", "debug"),
        ];
        apply_env_overrides_with(&mut tree, None, lookup_from(&vars));
        assert_eq!(tree["server"]["web"]["port"], 9000);
        assert_eq!(tree["server"]["web"]["enabled"], false);
        assert_eq!(tree["logger"]["level"], "debug");
    }

    #[test]
    fn env_suffix_wins_over_bare_name() {
        let mut tree = serde_json::json!({ "session": { "ttl_secs": 86400 } });
        let vars = [
            ("AXON_SESSION_TTL_SECS", "100"),
            ("AXON_SESSION_TTL_SECS_TEST", "5"),
        ];
        apply_env_overrides_with(&mut tree, Some("test"), lookup_from(&vars));
        assert_eq!(tree["session"]["ttl_secs"], 5);
    }

    #[test]
    fn float_coercion_by_decimal_point() {
        let mut tree = serde_json::json!({ "rate": 1.5 });
        let vars = [("AXON_RATE", "2.25")];
        apply_env_overrides_with(&mut tree, None, lookup_from(&vars));
        assert_eq!(tree["rate"], 2.25);
    }

    #[test]
    fn unparseable_number_is_ignored() {
        let mut tree = serde_json::json!({ "server": { "web": { "port": 8080 } } });
        let vars = [("AXON_SERVER_WEB_PORT", "not-a-port")];
        apply_env_overrides_with(&mut tree, None, lookup_from(&vars));
        assert_eq!(tree["server"]["web"]["port"], 8080);
    }
}
