use std::path::Path;

use serde_json::{Map, Value};

use sb_domain::config::{Config, ConfigSeverity};
use sb_domain::error::Error;

use crate::runtime::ConfigStore;

/// Parse and validate the config, printing any issues.
///
/// Returns `true` when there are no errors (warnings are allowed).
pub fn validate(config: &Config, config_path: &Path) -> bool {
    let config_path = config_path.display();
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as YAML,
/// secrets replaced by `***`.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let redacted = config.redacted()?;
    print!("{}", serde_yaml::to_string(&redacted)?);
    Ok(())
}

/// Print the value at a dotted path. Scalars print bare, structures as YAML.
pub fn get(config: &Config, path: &str) -> anyhow::Result<()> {
    let redacted = config.redacted()?;
    let value = lookup(&redacted, path)
        .ok_or_else(|| Error::NotFound(format!("config key '{path}'")))?;
    match value {
        Value::String(s) => println!("{s}"),
        Value::Null => println!("null"),
        Value::Bool(_) | Value::Number(_) => println!("{value}"),
        other => print!("{}", serde_yaml::to_string(other)?),
    }
    Ok(())
}

/// Set one value and persist. `raw` is parsed as YAML, so `8080` is a
/// number, `true` a bool and `[a, b]` a list.
pub fn set(config_path: &Path, path: &str, raw: &str) -> anyhow::Result<()> {
    let value: Value = serde_yaml::from_str(raw)
        .map_err(|e| Error::Validation(format!("cannot parse value '{raw}': {e}")))?;
    let patch = dotted_patch(path, value)?;
    let store = ConfigStore::load(config_path)?;
    store.patch(&patch)?;
    println!("Updated {path} in {}", config_path.display());
    println!("Run `switchboard channels reload` to apply it to a running gateway.");
    Ok(())
}

fn split_path(path: &str) -> Result<Vec<&str>, Error> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(Error::Validation(format!("invalid config path '{path}'")));
    }
    Ok(parts)
}

/// `a.b.c` + value → `{"a":{"b":{"c":value}}}`.
pub fn dotted_patch(path: &str, value: Value) -> Result<Value, Error> {
    let parts = split_path(path)?;
    Ok(parts.iter().rev().fold(value, |inner, key| {
        let mut map = Map::new();
        map.insert((*key).to_owned(), inner);
        Value::Object(map)
    }))
}

pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let parts = split_path(path).ok()?;
    parts
        .iter()
        .try_fold(root, |node, key| node.as_object()?.get(*key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_patch_nests() {
        assert_eq!(
            dotted_patch("gateway.auth.mode", json!("token")).unwrap(),
            json!({"gateway": {"auth": {"mode": "token"}}})
        );
        assert!(dotted_patch("gateway..port", json!(1)).is_err());
        assert!(dotted_patch("", json!(1)).is_err());
    }

    #[test]
    fn lookup_walks_objects() {
        let doc = json!({"gateway": {"port": 7420}, "channels": {}});
        assert_eq!(lookup(&doc, "gateway.port"), Some(&json!(7420)));
        assert_eq!(lookup(&doc, "gateway.nope"), None);
        assert_eq!(lookup(&doc, "gateway.port.deeper"), None);
    }

    #[test]
    fn set_persists_typed_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        set(&path, "gateway.port", "8088").unwrap();
        set(&path, "channels.telegram.allowUsers", "[alice, bob]").unwrap();

        let cfg = crate::runtime::config_store::read_config_file(&path).unwrap();
        assert_eq!(cfg.gateway.port, 8088);
        assert_eq!(cfg.channels["telegram"].allow_users, vec!["alice", "bob"]);
    }

    #[test]
    fn set_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        assert!(set(&path, "gateway.port", "0").is_err());
        assert!(!path.exists());
    }
}
