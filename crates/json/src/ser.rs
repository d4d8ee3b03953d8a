use crate::{Field, Number, Value};
use serde::ser::{SerializeMap, SerializeSeq};

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Value {
    /// Parse a JSON document from text.
    pub fn parse_str(text: &str) -> Result<Value, ParseError> {
        let parsed: serde_json::Value = serde_json::from_str(text)?;
        Ok(Value::from(parsed))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Value {
        Value::from(&v)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(Number::from(n)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(a) => Value::Array(a.iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => Value::Object(
                o.iter()
                    .map(|(property, value)| Field::new(property.clone(), Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> serde_json::Value {
        match v {
            Value::Null | Value::Error(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => match serde_json::Number::try_from(n) {
                Ok(n) => serde_json::Value::Number(n),
                Err(()) => serde_json::Value::Null,
            },
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(_) | Value::Deferred(_) => serde_json::Value::Array(
                v.elements().map(|e| serde_json::Value::from(e.as_ref())).collect(),
            ),
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|f| (f.property.clone(), serde_json::Value::from(&f.value)))
                    .collect(),
            ),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null | Value::Error(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => match n {
                Number::Int(i) => serializer.serialize_i64(*i),
                Number::Float(f) => serializer.serialize_f64(*f),
                Number::Text(_) => match n.as_i64() {
                    Some(i) => serializer.serialize_i64(i),
                    None => serializer.serialize_f64(n.as_f64()),
                },
            },
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(_) | Value::Deferred(_) => {
                let mut seq = serializer.serialize_seq(self.array_len())?;
                for elem in self.elements() {
                    seq.serialize_element(elem.as_ref())?;
                }
                seq.end()
            }
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for f in fields {
                    map.serialize_entry(&f.property, &f.value)?;
                }
                map.end()
            }
        }
    }
}

impl std::fmt::Display for Value {
    /// Compact JSON serialization.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&text)
    }
}

#[cfg(test)]
mod test {
    use crate::Value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let fixture = json!({"a": [1, 2.5, "x"], "b": {"nested": null}, "c": true});
        let value = Value::from(&fixture);
        assert_eq!(serde_json::Value::from(&value), fixture);
        assert_eq!(value.to_string(), fixture.to_string());
    }

    #[test]
    fn test_parse_str() {
        let value = Value::parse_str(r#"{"k": [true, null]}"#).unwrap();
        assert_eq!(value, Value::from(json!({"k": [true, null]})));
        assert!(Value::parse_str("{nope").is_err());
    }

    #[test]
    fn test_error_serializes_as_null() {
        assert_eq!(Value::error("x", "boom").to_string(), "null");
    }

    #[test]
    fn test_deferred_serializes_as_array() {
        let lazy = Value::Deferred(crate::RangeProvider::deferred(2, 4));
        assert_eq!(lazy.to_string(), "[2,3,4]");
    }
}
