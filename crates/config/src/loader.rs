use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use {
    axon_common::{Context, ErrorKind, deep_merge},
    serde_json::Value,
};

use crate::{env::apply_env_overrides, env_subst::substitute_env, schema::AppConfig};

/// Supported config formats, in lookup order.
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Resolve the effective configuration.
///
/// Precedence, lowest to highest: schema defaults, per-key env-var
/// overrides, then the user config file (deep-merged: objects merge,
/// arrays replace).
pub fn resolve() -> axon_common::Result<AppConfig> {
    let file_overrides = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Some(load_config_value(&path)?)
        },
        None => {
            debug!("no config file found, using defaults");
            None
        },
    };
    resolve_with(file_overrides)
}

/// Resolve from explicit overrides instead of a discovered file. Tests and
/// embedders use this to build isolated configurations.
pub fn resolve_with(overrides: Option<Value>) -> axon_common::Result<AppConfig> {
    let mut tree = serde_json::to_value(AppConfig::default())
        .context(ErrorKind::ConfigError, "serialize default config")?;
    apply_env_overrides(&mut tree);
    if let Some(patch) = overrides {
        deep_merge(&mut tree, &patch);
    }
    serde_json::from_value(tree).context(ErrorKind::ConfigError, "invalid config")
}

/// Load and parse a config file with `${VAR}` substitution.
pub fn load_config_value(path: &Path) -> axon_common::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .context(ErrorKind::ConfigError, format!("read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config_value(&raw, path)
}

/// The first existing config file among the candidate paths:
/// `axon.{toml,yaml,yml,json}` in the working directory, then the same
/// names under the user config dir (`~/.config/axon/`).
pub fn find_config_file() -> Option<PathBuf> {
    candidate_paths().into_iter().find(|path| path.exists())
}

fn candidate_paths() -> Vec<PathBuf> {
    let user_dir = directories::ProjectDirs::from("", "", "axon")
        .map(|dirs| dirs.config_dir().to_path_buf());
    let roots = [Some(PathBuf::new()), user_dir];

    roots
        .into_iter()
        .flatten()
        .flat_map(|root| {
            CONFIG_EXTENSIONS
                .iter()
                .map(move |ext| root.join(format!("axon.{ext}")))
        })
        .collect()
}

fn parse_config_value(raw: &str, path: &Path) -> axon_common::Result<Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value =
                toml::from_str(raw).context(ErrorKind::ConfigError, "parse toml")?;
            serde_json::to_value(v).context(ErrorKind::ConfigError, "convert toml")
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value =
                serde_yaml::from_str(raw).context(ErrorKind::ConfigError, "parse yaml")?;
            serde_json::to_value(v).context(ErrorKind::ConfigError, "convert yaml")
        },
        "json" => serde_json::from_str(raw).context(ErrorKind::ConfigError, "parse json"),
        other => {
            warn!(ext = other, "unsupported config format");
            Err(axon_common::Error::new(
                ErrorKind::ConfigError,
                format!("unsupported config format: .{other}"),
            ))
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use super::*;

    #[test]
    fn resolve_with_overrides_deep_merges() {
        let cfg = resolve_with(Some(serde_json::json!({
            "process": { "name": "testapp" },
            "server": { "web": { "port": 0 } },
        })))
        .unwrap();
        assert_eq!(cfg.process.name, "testapp");
        assert_eq!(cfg.server.web.port, 0);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.session.cookie_name, "axon_session");
    }

    #[test]
    fn arrays_replace_instead_of_merging() {
        let cfg = resolve_with(Some(serde_json::json!({
            "server": { "web": { "allowed_origins": ["https://app.example.com"] } },
        })))
        .unwrap();
        assert_eq!(cfg.server.web.allowed_origins, vec![
            "https://app.example.com".to_string()
        ]);
    }

    #[test]
    fn candidate_order_prefers_project_local_toml() {
        let candidates = candidate_paths();
        assert_eq!(candidates[0], PathBuf::from("axon.toml"));
        // Project-local names come before anything under the user dir.
        assert!(candidates.len() >= CONFIG_EXTENSIONS.len());
        for (path, ext) in candidates.iter().zip(CONFIG_EXTENSIONS) {
            assert_eq!(path.to_string_lossy(), format!("axon.{ext}"));
        }
    }

    #[test]
    fn toml_file_parses() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[process]\nname = \"filetest\"").unwrap();
        let value = load_config_value(file.path()).unwrap();
        assert_eq!(value["process"]["name"], "filetest");
    }

    #[test]
    fn broadcast_channel_includes_process_name() {
        let cfg = resolve_with(Some(serde_json::json!({
            "process": { "name": "myapp" },
        })))
        .unwrap();
        assert_eq!(cfg.process.broadcast_channel(), "myapp:broadcast");
    }
}
