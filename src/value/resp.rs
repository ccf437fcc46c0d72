//! RESP (Redis) representation.
//!
//! Redis stores strings, so most type information is lost on the way in.
//! [`decode`] returns what the wire says; [`decode_as`] reads a reply back
//! as a known kind, which recovers every scalar [`encode`] produced.

use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

use super::{json, parse_decimal_text, DateComponents, Value, ValueKind};
use crate::db::BackendError;
use crate::error::{Error, Result};

const BACKEND: &str = "redis";

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Nil,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    SimpleString(String),
    BulkString(Vec<u8>),
    Array(Vec<RespValue>),
    Error(String),
}

pub fn encode(value: &Value) -> Result<RespValue> {
    let resp = match value {
        Value::Null => RespValue::Nil,
        Value::Binary(bytes) => RespValue::BulkString(bytes.clone()),
        Value::Array(items) if is_homogeneous(items) => {
            RespValue::Array(items.iter().map(bulk).collect::<Result<_>>()?)
        }
        Value::Array(_) | Value::Map(_) => {
            let json = json::to_json(value)?;
            RespValue::BulkString(serde_json::to_vec(&json).map_err(|e| Error::Codec(e.to_string()))?)
        }
        Value::Opaque(o) => RespValue::BulkString(o.bytes.clone()),
        scalar => bulk(scalar)?,
    };
    Ok(resp)
}

fn bulk(value: &Value) -> Result<RespValue> {
    match value {
        Value::Binary(bytes) => Ok(RespValue::BulkString(bytes.clone())),
        other => other
            .scalar_text()
            .map(|text| RespValue::BulkString(text.into_bytes()))
            .ok_or_else(|| Error::unsupported_type(BACKEND, format!("{} array element", other.kind()))),
    }
}

// Every element a non-null scalar of the same kind.
fn is_homogeneous(items: &[Value]) -> bool {
    let Some(first) = items.first() else {
        return true;
    };
    let kind = first.kind();
    kind.is_scalar() && items.iter().all(|item| item.kind() == kind)
}

pub fn decode(resp: &RespValue) -> Result<Value> {
    let value = match resp {
        RespValue::Nil => Value::Null,
        RespValue::Integer(n) => Value::Int64(*n),
        RespValue::Double(f) => Value::Float64(*f),
        RespValue::Boolean(b) => Value::Bool(*b),
        RespValue::SimpleString(s) => Value::String(s.clone()),
        RespValue::BulkString(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Binary(bytes.clone()),
        },
        RespValue::Array(items) => Value::Array(items.iter().map(decode).collect::<Result<_>>()?),
        RespValue::Error(message) => return Err(reply_error(message)),
    };
    Ok(value)
}

/// Read a reply back as `kind`.
pub fn decode_as(resp: &RespValue, kind: ValueKind) -> Result<Value> {
    match resp {
        RespValue::Nil => return Ok(Value::Null),
        RespValue::Error(message) => return Err(reply_error(message)),
        RespValue::Array(items) if kind == ValueKind::Array => {
            return Ok(Value::Array(items.iter().map(decode).collect::<Result<_>>()?))
        }
        _ => {}
    }

    let mismatch = || Error::unsupported_type(BACKEND, format!("{resp:?} as {kind}"));
    if kind == ValueKind::Binary {
        return match resp {
            RespValue::BulkString(bytes) => Ok(Value::Binary(bytes.clone())),
            _ => Err(mismatch()),
        };
    }

    let text = match resp {
        RespValue::BulkString(bytes) => std::str::from_utf8(bytes).map_err(|e| Error::Codec(e.to_string()))?,
        RespValue::SimpleString(s) => s.as_str(),
        RespValue::Integer(n) if matches!(kind, ValueKind::Int64 | ValueKind::UInt64 | ValueKind::Decimal) => {
            return match kind {
                ValueKind::Int64 => Ok(Value::Int64(*n)),
                ValueKind::UInt64 => u64::try_from(*n).map(Value::UInt64).map_err(|_| Error::NumericOverflow {
                    value: n.to_string(),
                    target: "u64",
                }),
                _ => Ok(Value::Decimal(Decimal::from(*n))),
            };
        }
        RespValue::Double(f) if kind == ValueKind::Float64 => return Ok(Value::Float64(*f)),
        RespValue::Boolean(b) if kind == ValueKind::Bool => return Ok(Value::Bool(*b)),
        _ => return Err(mismatch()),
    };

    let parsed = match kind {
        ValueKind::String => Some(Value::String(text.to_string())),
        ValueKind::Bool => match text {
            "1" | "true" => Some(Value::Bool(true)),
            "0" | "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueKind::Int64 => text.parse().ok().map(Value::Int64),
        ValueKind::UInt64 => text.parse().ok().map(Value::UInt64),
        ValueKind::Float64 => parse_float(text).map(Value::Float64),
        ValueKind::Decimal => parse_decimal_text(text).ok(),
        ValueKind::Date => DateComponents::parse_iso(text).map(Value::Date),
        ValueKind::Uuid => Uuid::from_str(text).ok().map(Value::Uuid),
        ValueKind::Array | ValueKind::Map => serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .map(json::from_json)
            .filter(|v| v.kind() == kind),
        ValueKind::Null | ValueKind::Binary | ValueKind::Opaque => None,
    };
    parsed.ok_or_else(mismatch)
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "inf" | "+inf" | "Infinity" => Some(f64::INFINITY),
        "-inf" | "-Infinity" => Some(f64::NEG_INFINITY),
        "nan" | "NaN" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

fn reply_error(message: &str) -> Error {
    let code = message.split_whitespace().next().unwrap_or_default();
    Error::Backend(BackendError {
        code: code.to_string(),
        ..BackendError::from_string(BACKEND, message)
    })
}
