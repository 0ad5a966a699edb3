use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

/// Loads a YAML config file, then overlays environment variables
/// prefixed `<env_prefix>_`; double underscores in the remaining key
/// delimit nested path segments, e.g.
/// `SERVICE_DATABASE__OPTIONS__MAX_CONNECTIONS=32` overrides
/// `database.options.max_connections` (spec.md §6: "YAML files and
/// environment variables ... populate struct-shaped config", a
/// `SERVICE_`-style prefix "chosen by the embedder"; teacher:
/// `engine/src/config.rs` for the YAML load, `crates/cli/src/env.rs`
/// `EnvManager` for the env layer).
pub fn load<T: DeserializeOwned>(path: &str, env_prefix: &str) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let mut root: Value = serde_yaml::from_str(&text)?;
    overlay_env(&mut root, env_prefix);
    Ok(serde_yaml::from_value(root)?)
}

fn overlay_env(root: &mut Value, env_prefix: &str) {
    let needle = format!("{env_prefix}_");
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix(&needle) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        set_path(root, &path, Value::String(value));
    }
}

fn set_path(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };

    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = node else {
        unreachable!("just normalized to a mapping");
    };

    let key = Value::String(head.clone());
    if rest.is_empty() {
        map.insert(key, value);
        return;
    }

    let child = map.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
    set_path(child, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overlay_sets_nested_path() {
        let mut root = Value::Mapping(Mapping::new());
        set_path(
            &mut root,
            &["database".to_string(), "host".to_string()],
            Value::String("db.internal".to_string()),
        );

        let Value::Mapping(map) = &root else { panic!("expected mapping") };
        let Value::Mapping(database) = map.get(Value::String("database".to_string())).unwrap() else {
            panic!("expected nested mapping")
        };
        assert_eq!(
            database.get(Value::String("host".to_string())).unwrap(),
            &Value::String("db.internal".to_string())
        );
    }

    #[test]
    fn env_overlay_leaves_unrelated_vars_alone() {
        let mut root: Value = serde_yaml::from_str("database:\n  host: original\n").unwrap();
        // SAFETY-FREE: this only mutates the current process's env for
        // the duration of this single-threaded test function.
        unsafe {
            std::env::set_var("DBCFG_TEST_DATABASE__HOST", "overridden");
        }
        overlay_env(&mut root, "DBCFG_TEST");
        unsafe {
            std::env::remove_var("DBCFG_TEST_DATABASE__HOST");
        }

        let Value::Mapping(map) = &root else { panic!("expected mapping") };
        let Value::Mapping(database) = map.get(Value::String("database".to_string())).unwrap() else {
            panic!("expected nested mapping")
        };
        assert_eq!(
            database.get(Value::String("host".to_string())).unwrap(),
            &Value::String("overridden".to_string())
        );
    }
}
