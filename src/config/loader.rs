//! Configuration loading.
//!
//! The loader starts from the compiled-in defaults and lays overlays on
//! top, weakest first: inline JSON from `RIPPLE_CONFIG_JSON`, the file
//! named by `RIPPLE_CONFIG_PATH`, then `config.json` in the working
//! directory. Finally, single fields can be overridden with
//! `RIPPLE__SECTION__FIELD=value` environment variables.
//!
//! Because the base document is serialized from `Config::default()`, every
//! valid field path already exists in it; an env override that names an
//! unknown path is reported and dropped rather than invented. A source
//! that fails to read or parse is reported and skipped — `load()` always
//! returns a usable `Config`. Validation here is warn-only; `main.rs`
//! calls [`super::validate`] again and propagates the result.

use super::validation::validate;
use super::Config;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

const ENV_PREFIX: &str = "RIPPLE__";

enum ConfigSource {
    InlineJson(String),
    File(PathBuf),
}

impl ConfigSource {
    /// The overlay this source contributes, or `None` when it is absent
    /// (a file that does not exist, an empty inline document).
    fn read(&self) -> anyhow::Result<Option<Value>> {
        let raw = match self {
            ConfigSource::InlineJson(raw) => raw.clone(),
            ConfigSource::File(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                std::fs::read_to_string(path)?
            }
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::InlineJson(_) => f.write_str("RIPPLE_CONFIG_JSON"),
            ConfigSource::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

fn discover_sources() -> Vec<ConfigSource> {
    let mut sources = Vec::new();
    if let Ok(raw) = std::env::var("RIPPLE_CONFIG_JSON") {
        sources.push(ConfigSource::InlineJson(raw));
    }
    if let Ok(path) = std::env::var("RIPPLE_CONFIG_PATH") {
        sources.push(ConfigSource::File(PathBuf::from(path)));
    }
    sources.push(ConfigSource::File(PathBuf::from("config.json")));
    sources
}

/// Load the effective configuration from defaults, overlays, and
/// environment overrides.
#[must_use]
pub fn load() -> Config {
    let defaults = Config::default();
    let Ok(mut document) = serde_json::to_value(&defaults) else {
        return defaults;
    };

    for source in discover_sources() {
        match source.read() {
            Ok(Some(patch)) => document = overlay(document, patch),
            Ok(None) => {}
            Err(err) => eprintln!("config: skipping {source}: {err}"),
        }
    }

    for (pointer, value) in env_overrides() {
        match document.pointer_mut(&pointer) {
            Some(slot) => *slot = value,
            None => eprintln!("config: ignoring override for unknown path {pointer}"),
        }
    }

    let config = match serde_json::from_value(document) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config: falling back to defaults: {err}");
            defaults
        }
    };

    if let Err(err) = validate(&config) {
        eprintln!("config: validation: {err}");
    }

    config
}

/// Lay `patch` over `base`: objects merge key by key, everything else is
/// replaced wholesale by the patch side.
fn overlay(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut merged), Value::Object(patch)) => {
            for (key, value) in patch {
                let slot = match merged.remove(&key) {
                    Some(existing) => overlay(existing, value),
                    None => value,
                };
                merged.insert(key, slot);
            }
            Value::Object(merged)
        }
        (_, patch) => patch,
    }
}

/// `(json_pointer, value)` pairs from `RIPPLE__`-prefixed variables.
fn env_overrides() -> Vec<(String, Value)> {
    std::env::vars()
        .filter_map(|(key, raw)| {
            let pointer = override_pointer(&key)?;
            Some((pointer, override_value(&raw)))
        })
        .collect()
}

/// `RIPPLE__LOGGING__LEVEL` becomes `/logging/level`.
fn override_pointer(key: &str) -> Option<String> {
    let path = key.strip_prefix(ENV_PREFIX)?;
    let pointer: String = path
        .split("__")
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("/{}", segment.to_ascii_lowercase()))
        .collect();
    (!pointer.is_empty()).then_some(pointer)
}

/// Values parse as JSON where possible so numbers and booleans keep their
/// types; anything else stays a string.
fn override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_merges_objects_and_replaces_scalars() {
        let base = serde_json::json!({
            "port": 4810,
            "hubs": { "max_conns_per_user": 5, "max_total_conns": 10000 }
        });
        let patch = serde_json::json!({ "hubs": { "max_conns_per_user": 2 } });

        let merged = overlay(base, patch);
        assert_eq!(merged["port"], 4810);
        assert_eq!(merged["hubs"]["max_conns_per_user"], 2);
        assert_eq!(merged["hubs"]["max_total_conns"], 10000, "sibling kept");
    }

    #[test]
    fn overlay_later_source_wins_on_type_conflict() {
        let merged = overlay(
            serde_json::json!({ "cors_origins": "*" }),
            serde_json::json!({ "cors_origins": ["https://a.example"] }),
        );
        assert!(merged["cors_origins"].is_array());
    }

    #[test]
    fn override_pointer_shapes() {
        assert_eq!(
            override_pointer("RIPPLE__PORT").as_deref(),
            Some("/port")
        );
        assert_eq!(
            override_pointer("RIPPLE__PRESENCE__OFFLINE_GRACE_MS").as_deref(),
            Some("/presence/offline_grace_ms")
        );
        assert_eq!(override_pointer("RIPPLE__").as_deref(), None);
        assert_eq!(override_pointer("OTHER__PORT").as_deref(), None);
    }

    #[test]
    fn override_values_keep_json_types() {
        assert_eq!(override_value("8080"), serde_json::json!(8080));
        assert_eq!(override_value("true"), serde_json::json!(true));
        assert_eq!(override_value("debug"), serde_json::json!("debug"));
        assert_eq!(override_value(""), serde_json::json!(""));
    }

    #[test]
    fn override_pointer_resolves_against_defaults_document() {
        let document = serde_json::to_value(Config::default()).unwrap();
        // Every valid override path must already exist in the defaults.
        assert!(document.pointer("/presence/offline_grace_ms").is_some());
        assert!(document.pointer("/logging/level").is_some());
        assert!(document.pointer("/presence/no_such_field").is_none());
    }
}
