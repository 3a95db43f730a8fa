//! `${VAR}` expansion over raw config text, applied before parsing so any
//! value position (not just strings the schema knows about) can reference
//! the environment.

/// Expand `${VAR}` placeholders from the process environment.
pub fn substitute_env(raw: &str) -> String {
    expand(raw, |name| std::env::var(name).ok())
}

/// Expansion against an arbitrary lookup, so tests never touch the real
/// environment.
///
/// A placeholder that does not resolve stays in the output exactly as
/// written: the eventual parse error (or connect failure) then names the
/// unexpanded variable, which beats silently substituting an empty string.
/// `${}` and an unterminated `${` are treated the same way.
fn expand(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(close) = after_open.find('}') else {
            // Unterminated: keep the tail literal, nothing more to expand.
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after_open[..close];
        match lookup(name) {
            Some(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[start..start + 2 + close + 1]),
        }
        rest = &after_open[close + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_env(name: &str) -> Option<String> {
        match name {
            "TEST_REDIS_URL" => Some("redis://cache:6379".to_string()),
            "TEST_PROCESS_NAME" => Some("orders".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expands_placeholders_inside_config_text() {
        let raw = "[process]\nname = \"${TEST_PROCESS_NAME}\"\n\n[redis]\nurl = \"${TEST_REDIS_URL}\"\n";
        assert_eq!(
            expand(raw, fake_env),
            "[process]\nname = \"orders\"\n\n[redis]\nurl = \"redis://cache:6379\"\n"
        );
    }

    #[test]
    fn unresolved_placeholders_stay_literal() {
        assert_eq!(
            expand("url = \"${TEST_MISSING_VAR}\"", fake_env),
            "url = \"${TEST_MISSING_VAR}\""
        );
    }

    #[test]
    fn malformed_placeholders_stay_literal() {
        assert_eq!(expand("prefix ${UNTERMINATED", fake_env), "prefix ${UNTERMINATED");
        assert_eq!(
            expand("a ${} b ${TEST_PROCESS_NAME}", fake_env),
            "a ${} b orders"
        );
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(expand("no placeholders here", fake_env), "no placeholders here");
    }
}
