//! Process-default `config` and `system` singletons, exposed to scripts
//! through the bottom context layers. Configuration files and plugins
//! are outside the engine; these are in-memory defaults the `set`
//! command edits.

use json::{Field, Value};

/// Output and interaction settings, in the shape the `set` command
/// understands ("tab=2,digits=12,color").
pub fn default_config() -> Value {
    Value::Object(vec![
        Field::new("tab", Value::from(2)),
        Field::new("oneline", Value::from(70)),
        Field::new("digits", Value::from(12)),
        Field::new("pretty", Value::Bool(false)),
        Field::new("color", Value::Bool(false)),
        Field::new("errors", Value::Bool(true)),
        Field::new("ascii", Value::Bool(false)),
        Field::new("null", Value::from("")),
    ])
}

/// Read-only facts about the running engine.
pub fn default_system() -> Value {
    Value::Object(vec![
        Field::new("version", Value::from(env!("CARGO_PKG_VERSION"))),
        Field::new("update", Value::Bool(true)),
        Field::new("runmode", Value::from("script")),
    ])
}

/// Apply a "name=value,name,-name" settings string to a config object.
/// A bare name sets true, "-name" sets false, and values parse as JSON
/// scalars with a fallback to plain text.
pub fn apply_settings(config: &mut Value, settings: &str) -> Result<(), String> {
    for part in settings.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((name, value)) => {
                let name = name.trim();
                if config.get(name).is_none() {
                    return Err(format!("unknown setting \"{}\"", name));
                }
                let value = value.trim();
                let parsed = Value::parse_str(value).unwrap_or_else(|_| Value::from(value));
                config.set(name, parsed);
            }
            None => {
                let (name, flag) = match part.strip_prefix('-') {
                    Some(name) => (name.trim(), false),
                    None => (part, true),
                };
                if config.get(name).is_none() {
                    return Err(format!("unknown setting \"{}\"", name));
                }
                config.set(name, Value::Bool(flag));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_apply_settings() {
        let mut config = default_config();
        apply_settings(&mut config, "tab=4, pretty, -color").unwrap();
        assert_eq!(config.get("tab"), Some(&Value::from(4)));
        assert_eq!(config.get("pretty"), Some(&Value::Bool(true)));
        assert_eq!(config.get("color"), Some(&Value::Bool(false)));
        assert!(apply_settings(&mut config, "bogus=1").is_err());
    }
}
