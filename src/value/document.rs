//! BSON representation for the document store.
//!
//! Narrowings:
//! - Date-only, time-only and offset-less date-times travel as ISO 8601
//!   strings and decode as `String`.
//! - Zoned date-times travel as BSON `DateTime` (millisecond precision) and
//!   decode with a zero offset.
//! - `UInt64` above `i64::MAX` travels as `Decimal128`.
//! - Object ids decode as their hex string.

use std::collections::BTreeMap;

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Decimal128, Document};
use chrono::{DateTime, Offset, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{json, DateComponents, Opaque, OpaqueFormat, Value};
use crate::error::{Error, Result};

const BACKEND: &str = "mongodb";

// Opaque payloads without a native BSON form ride in user-defined subtypes.
const RAW_SUBTYPE: u8 = 0x80;
const MESSAGE_PACK_SUBTYPE: u8 = 0x81;

// Decimal128 layout (BID): sign bit, 14-bit biased exponent, 113-bit coefficient.
const EXPONENT_BIAS: i32 = 6176;
const COEFFICIENT_MASK: u128 = (1 << 113) - 1;
const MAX_DECIMAL_SCALE: i32 = 28;

pub fn to_bson(value: &Value) -> Result<Bson> {
    let bson = match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::String(s) => Bson::String(s.clone()),
        Value::Int64(n) => Bson::Int64(*n),
        Value::UInt64(n) => match i64::try_from(*n) {
            Ok(n) => Bson::Int64(n),
            Err(_) => Bson::Decimal128(encode_decimal128(&Decimal::from(*n))),
        },
        Value::Float64(f) => Bson::Double(*f),
        Value::Decimal(d) => Bson::Decimal128(encode_decimal128(d)),
        Value::Date(d) => date_to_bson(d),
        Value::Binary(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Value::Uuid(u) => Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: u.as_bytes().to_vec(),
        }),
        Value::Array(items) => Bson::Array(items.iter().map(to_bson).collect::<Result<_>>()?),
        Value::Map(map) => Bson::Document(map_to_document(map)?),
        Value::Opaque(o) => opaque_to_bson(o)?,
    };
    Ok(bson)
}

pub fn map_to_document(map: &BTreeMap<String, Value>) -> Result<Document> {
    let mut doc = Document::new();
    for (k, v) in map {
        doc.insert(k.clone(), to_bson(v)?);
    }
    Ok(doc)
}

fn date_to_bson(d: &DateComponents) -> Bson {
    match d.instant() {
        Some(instant) => Bson::DateTime(bson::DateTime::from_millis(instant.timestamp_millis())),
        None => Bson::String(d.to_iso_string()),
    }
}

fn opaque_to_bson(o: &Opaque) -> Result<Bson> {
    let bson = match o.format {
        OpaqueFormat::Bson => Bson::Document(
            Document::from_reader(o.bytes.as_slice()).map_err(|e| Error::Codec(e.to_string()))?,
        ),
        OpaqueFormat::Json => {
            let parsed: serde_json::Value =
                serde_json::from_slice(&o.bytes).map_err(|e| Error::Codec(e.to_string()))?;
            to_bson(&json::from_json(parsed))?
        }
        OpaqueFormat::MessagePack => user_binary(MESSAGE_PACK_SUBTYPE, &o.bytes),
        OpaqueFormat::Raw => user_binary(RAW_SUBTYPE, &o.bytes),
    };
    Ok(bson)
}

fn user_binary(subtype: u8, bytes: &[u8]) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::UserDefined(subtype),
        bytes: bytes.to_vec(),
    })
}

pub fn from_bson(bson: &Bson) -> Result<Value> {
    let value = match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Int32(n) => Value::Int64(i64::from(*n)),
        Bson::Int64(n) => Value::Int64(*n),
        Bson::Double(f) => Value::Float64(*f),
        Bson::Decimal128(d) => decode_decimal128(d)?,
        Bson::DateTime(dt) => {
            let utc = DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
                .ok_or_else(|| Error::unsupported_type(BACKEND, "out-of-range datetime"))?;
            Value::Date(DateComponents::zoned(utc.with_timezone(&Utc.fix())))
        }
        Bson::Binary(binary) => match binary.subtype {
            BinarySubtype::Uuid | BinarySubtype::UuidOld => Value::Uuid(
                Uuid::from_slice(&binary.bytes).map_err(|e| Error::Codec(e.to_string()))?,
            ),
            BinarySubtype::UserDefined(RAW_SUBTYPE) => {
                Value::Opaque(Opaque::new(OpaqueFormat::Raw, binary.bytes.clone()))
            }
            BinarySubtype::UserDefined(MESSAGE_PACK_SUBTYPE) => {
                Value::Opaque(Opaque::new(OpaqueFormat::MessagePack, binary.bytes.clone()))
            }
            _ => Value::Binary(binary.bytes.clone()),
        },
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Timestamp(ts) => Value::UInt64((u64::from(ts.time) << 32) | u64::from(ts.increment)),
        Bson::Array(items) => Value::Array(items.iter().map(from_bson).collect::<Result<_>>()?),
        Bson::Document(doc) => Value::Map(document_to_map(doc)?),
        other => {
            return Err(Error::unsupported_type(
                BACKEND,
                format!("{:?}", other.element_type()),
            ))
        }
    };
    Ok(value)
}

pub fn document_to_map(doc: &Document) -> Result<BTreeMap<String, Value>> {
    doc.iter()
        .map(|(k, v)| Ok((k.clone(), from_bson(v)?)))
        .collect()
}

/// Strict conversion to an object id: 24 hex digits or 12 raw bytes.
pub fn object_id_from_value(value: &Value) -> Result<ObjectId> {
    match value {
        Value::String(s) => ObjectId::parse_str(s).map_err(|_| Error::InvalidObjectId(s.clone())),
        Value::Binary(bytes) => <[u8; 12]>::try_from(bytes.as_slice())
            .map(ObjectId::from_bytes)
            .map_err(|_| Error::InvalidObjectId(format!("{} bytes", bytes.len()))),
        other => Err(Error::InvalidObjectId(other.kind().to_string())),
    }
}

/// Primary-key literals that look like object ids are sent as object ids.
pub(crate) fn primary_key_to_bson(value: &Value) -> Result<Bson> {
    match object_id_from_value(value) {
        Ok(oid) => Ok(Bson::ObjectId(oid)),
        Err(_) => to_bson(value),
    }
}

pub fn encode_decimal128(d: &Decimal) -> Decimal128 {
    let mantissa = d.mantissa();
    let exponent = -(d.scale() as i32) + EXPONENT_BIAS;
    let mut bits = mantissa.unsigned_abs() & COEFFICIENT_MASK;
    bits |= (exponent as u128) << 113;
    if mantissa < 0 {
        bits |= 1 << 127;
    }
    Decimal128::from_bytes(bits.to_le_bytes())
}

/// Decode a Decimal128. NaN and the infinities become `Float64`; values a
/// 96-bit decimal cannot hold are `UnsupportedType`.
pub fn decode_decimal128(d: &Decimal128) -> Result<Value> {
    let bits = u128::from_le_bytes(d.bytes());
    let negative = bits >> 127 == 1;
    let combination = (bits >> 122) & 0x1F;

    if combination == 0x1F {
        return Ok(Value::Float64(f64::NAN));
    }
    if combination == 0x1E {
        let inf = if negative { f64::NEG_INFINITY } else { f64::INFINITY };
        return Ok(Value::Float64(inf));
    }

    let (biased, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
        // Large-coefficient form: always above 10^34, non-canonical, read as zero.
        (((bits >> 111) & 0x3FFF) as i32, 0u128)
    } else {
        (((bits >> 113) & 0x3FFF) as i32, bits & COEFFICIENT_MASK)
    };

    let out_of_range = || Error::unsupported_type(BACKEND, "decimal128 beyond decimal range");
    let mut coefficient = coefficient;
    let mut exponent = biased - EXPONENT_BIAS;
    while exponent > 0 {
        coefficient = coefficient.checked_mul(10).ok_or_else(out_of_range)?;
        exponent -= 1;
    }
    while exponent < -MAX_DECIMAL_SCALE && coefficient % 10 == 0 && coefficient != 0 {
        coefficient /= 10;
        exponent += 1;
    }
    if coefficient == 0 {
        exponent = exponent.max(-MAX_DECIMAL_SCALE);
    }
    if exponent < -MAX_DECIMAL_SCALE {
        return Err(out_of_range());
    }

    let signed = i128::try_from(coefficient).map_err(|_| out_of_range())?;
    let signed = if negative { -signed } else { signed };
    Decimal::try_from_i128_with_scale(signed, (-exponent) as u32)
        .map(Value::Decimal)
        .map_err(|_| out_of_range())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn round_trip(value: &Value) -> Value {
        from_bson(&to_bson(value).unwrap()).unwrap()
    }

    #[test]
    fn test_lossless_round_trips() {
        let mut map = BTreeMap::new();
        map.insert("nested".to_string(), Value::Array(vec![Value::Int64(1), Value::from("x")]));
        let fixtures = vec![
            Value::Null,
            Value::Bool(false),
            Value::String("ünïcode".into()),
            Value::Int64(-42),
            Value::Float64(3.25),
            Value::Decimal(dec("123.4500")),
            Value::Decimal(dec("-0.000000000000000000000000001")),
            Value::Decimal(dec("79228162514264337593543950335")),
            Value::Binary(vec![9, 8, 7]),
            Value::Uuid(Uuid::from_u128(42)),
            Value::Map(map),
            Value::Array(vec![Value::Int64(1), Value::String("mixed".into()), Value::Null]),
        ];
        for value in fixtures {
            let back = round_trip(&value);
            assert_eq!(back, value, "{value:?}");
        }
    }

    #[test]
    fn test_documented_narrowings() {
        // BSON has no unsigned integers
        let narrowings = [
            (Value::UInt64(7), Value::Int64(7)),
            (Value::UInt64(i64::MAX as u64), Value::Int64(i64::MAX)),
            (Value::UInt64(u64::MAX), Value::Decimal(Decimal::from(u64::MAX))),
        ];
        for (value, expected) in narrowings {
            assert_eq!(round_trip(&value), expected, "{value:?}");
        }
        assert!(matches!(to_bson(&Value::UInt64(u64::MAX)).unwrap(), Bson::Decimal128(_)));
    }

    #[test]
    fn test_decimal128_known_encodings() {
        // 1 = coefficient 1, exponent 0
        let one = encode_decimal128(&Decimal::ONE);
        let expected = (6176u128 << 113) | 1;
        assert_eq!(one.bytes(), expected.to_le_bytes());

        // -0.5
        let bits = (1u128 << 127) | (6175u128 << 113) | 5;
        let half = Decimal128::from_bytes(bits.to_le_bytes());
        assert_eq!(decode_decimal128(&half).unwrap(), Value::Decimal(dec("-0.5")));
    }

    #[test]
    fn test_decimal128_specials_decode_as_float() {
        let nan = Decimal128::from_bytes((0x1Fu128 << 122).to_le_bytes());
        assert!(matches!(decode_decimal128(&nan).unwrap(), Value::Float64(f) if f.is_nan()));
        let neg_inf = Decimal128::from_bytes(((1u128 << 127) | (0x1Eu128 << 122)).to_le_bytes());
        assert_eq!(decode_decimal128(&neg_inf).unwrap(), Value::Float64(f64::NEG_INFINITY));
    }

    #[test]
    fn test_decimal128_positive_exponent_and_overflow() {
        let bits = ((6176u128 + 3) << 113) | 12;
        let value = Decimal128::from_bytes(bits.to_le_bytes());
        assert_eq!(decode_decimal128(&value).unwrap(), Value::Decimal(Decimal::from(12_000)));

        let huge = ((6176u128 + 40) << 113) | 1;
        let value = Decimal128::from_bytes(huge.to_le_bytes());
        assert!(matches!(decode_decimal128(&value), Err(Error::UnsupportedType { .. })));
    }

    #[test]
    fn test_binary_subtype_decides_uuid() {
        let sixteen = vec![1u8; 16];
        let generic = Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: sixteen.clone(),
        });
        assert_eq!(from_bson(&generic).unwrap(), Value::Binary(sixteen.clone()));

        let legacy = Bson::Binary(Binary {
            subtype: BinarySubtype::UuidOld,
            bytes: sixteen.clone(),
        });
        assert!(matches!(from_bson(&legacy).unwrap(), Value::Uuid(_)));
    }

    #[test]
    fn test_dates() {
        let date = NaiveDate::from_ymd_opt(2023, 3, 4).unwrap();
        let time = NaiveTime::from_hms_milli_opt(5, 6, 7, 890).unwrap();
        let offset = FixedOffset::east_opt(3600).unwrap();

        assert_eq!(
            to_bson(&Value::from(date)).unwrap(),
            Bson::String("2023-03-04".into())
        );
        assert_eq!(
            to_bson(&Value::Date(DateComponents::time_with_offset(time, offset))).unwrap(),
            Bson::String("05:06:07.890+01:00".into())
        );

        let zoned = DateComponents::zoned(offset.from_local_datetime(&date.and_time(time)).unwrap());
        let back = round_trip(&Value::Date(zoned));
        assert_eq!(back, Value::Date(zoned.to_utc()));
    }

    #[test]
    fn test_opaque_payloads() {
        let mut doc = Document::new();
        doc.insert("a", 1i32);
        let mut bytes = Vec::new();
        doc.to_writer(&mut bytes).unwrap();
        let embedded = to_bson(&Value::Opaque(Opaque::new(OpaqueFormat::Bson, bytes))).unwrap();
        assert_eq!(embedded, Bson::Document(doc));

        let raw = Value::Opaque(Opaque::new(OpaqueFormat::MessagePack, vec![0x91, 0x01]));
        match round_trip(&raw) {
            Value::Opaque(o) => assert_eq!(o.format, OpaqueFormat::MessagePack),
            other => panic!("expected opaque, got {other:?}"),
        }
    }

    #[test]
    fn test_object_ids() {
        let hex = "507f1f77bcf86cd799439011";
        assert!(object_id_from_value(&Value::from(hex)).is_ok());
        assert!(matches!(
            object_id_from_value(&Value::from("nope")),
            Err(Error::InvalidObjectId(_))
        ));
        assert_eq!(
            primary_key_to_bson(&Value::Int64(5)).unwrap(),
            Bson::Int64(5)
        );
        let oid = ObjectId::parse_str(hex).unwrap();
        assert_eq!(from_bson(&Bson::ObjectId(oid)).unwrap(), Value::from(hex));
    }

    #[test]
    fn test_unsupported_bson_types() {
        let code = Bson::JavaScriptCode("function() {}".into());
        assert!(matches!(
            from_bson(&code),
            Err(Error::UnsupportedType { backend: "mongodb", .. })
        ));
    }
}
