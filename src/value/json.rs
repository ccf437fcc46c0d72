//! JSON form of a value, used wherever a backend needs one structured
//! fallback (PostgreSQL `JSONB` arrays, Redis non-homogeneous arrays).
//!
//! Binary travels as base64; UUIDs, dates and decimals as strings; the
//! non-finite floats as `"NaN"` / `"Infinity"` / `"-Infinity"`. JSON has no
//! tags, so decoding yields strings for all of those.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number};

use super::{float_text, OpaqueFormat, Value};
use crate::error::{Error, Result};

pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Int64(n) => serde_json::Value::Number((*n).into()),
        Value::UInt64(n) => serde_json::Value::Number((*n).into()),
        Value::Float64(f) => match Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            None => serde_json::Value::String(float_text(*f)),
        },
        Value::Decimal(d) => serde_json::Value::String(d.to_string()),
        Value::Date(d) => serde_json::Value::String(d.to_iso_string()),
        Value::Binary(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
        Value::Uuid(u) => serde_json::Value::String(u.hyphenated().to_string()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<Result<_>>()?)
        }
        Value::Map(map) => {
            let mut object = Map::with_capacity(map.len());
            for (k, v) in map {
                object.insert(k.clone(), to_json(v)?);
            }
            serde_json::Value::Object(object)
        }
        Value::Opaque(o) if o.format == OpaqueFormat::Json => {
            serde_json::from_slice(&o.bytes).map_err(|e| Error::Codec(e.to_string()))?
        }
        Value::Opaque(o) => {
            return Err(Error::unsupported_type(
                "json",
                format!("{:?} opaque payload", o.format),
            ))
        }
    };
    Ok(json)
}

pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt64(u)
            } else {
                Value::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(object) => {
            Value::Map(object.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Opaque;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_scalars_to_json() {
        assert_eq!(to_json(&Value::Int64(-3)).unwrap(), json!(-3));
        assert_eq!(to_json(&Value::UInt64(u64::MAX)).unwrap(), json!(u64::MAX));
        assert_eq!(to_json(&Value::Float64(f64::INFINITY)).unwrap(), json!("Infinity"));
        assert_eq!(to_json(&Value::Binary(vec![1, 2, 3])).unwrap(), json!("AQID"));
    }

    #[test]
    fn test_nested_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("tags".to_string(), Value::Array(vec![Value::from("a"), Value::Null]));
        map.insert("n".to_string(), Value::Float64(1.5));
        let value = Value::Map(map);
        assert_eq!(from_json(to_json(&value).unwrap()), value);
    }

    #[test]
    fn test_opaque_json_embeds() {
        let opaque = Value::Opaque(Opaque::new(OpaqueFormat::Json, br#"{"x":[1]}"#.to_vec()));
        assert_eq!(to_json(&opaque).unwrap(), json!({"x": [1]}));
        let raw = Value::Opaque(Opaque::new(OpaqueFormat::MessagePack, vec![0x90]));
        assert!(matches!(to_json(&raw), Err(Error::UnsupportedType { backend: "json", .. })));
    }
}
