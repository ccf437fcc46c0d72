//! PostgreSQL binary wire format.
//!
//! Parameters are sent with explicit types, so [`param_type`] decides the
//! wire type for every bind. Narrowings:
//! - `TIMESTAMPTZ` decodes with a zero offset (same instant).
//! - `UInt64` travels as `NUMERIC` and decodes as `Decimal`.
//! - `NUMERIC` NaN and infinities decode as `Float64`.
//! - Heterogeneous arrays travel as `JSONB` and decode with JSON typing.

use std::error::Error as StdError;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

use super::{json, DateComponents, OpaqueFormat, Value};
use crate::error::{Error, Result};

const BACKEND: &str = "postgres";

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const JSONB_VERSION: u8 = 1;

// 2000-01-01 00:00:00, the zero point of every PostgreSQL date/time type
fn pg_epoch() -> NaiveDateTime {
    NaiveDateTime::default() + Duration::days(10_957)
}

/// Native parameter type chosen for a value.
pub fn param_type(value: &Value) -> Type {
    match value {
        Value::Array(items) => array_type(items).unwrap_or(Type::JSONB),
        Value::Map(_) => Type::JSONB,
        Value::Opaque(o) if o.format == OpaqueFormat::Json => Type::JSONB,
        Value::Opaque(_) => Type::BYTEA,
        other => scalar_type(other).unwrap_or(Type::TEXT),
    }
}

fn scalar_type(value: &Value) -> Option<Type> {
    let ty = match value {
        // resolved by the server from the statement context
        Value::Null => Type::UNKNOWN,
        Value::String(_) => Type::TEXT,
        Value::Bool(_) => Type::BOOL,
        Value::Int64(_) => Type::INT8,
        Value::UInt64(_) | Value::Decimal(_) => Type::NUMERIC,
        Value::Float64(_) => Type::FLOAT8,
        Value::Date(d) => date_type(d),
        Value::Binary(_) => Type::BYTEA,
        Value::Uuid(_) => Type::UUID,
        Value::Array(_) | Value::Map(_) | Value::Opaque(_) => return None,
    };
    Some(ty)
}

fn date_type(d: &DateComponents) -> Type {
    match (d.date().is_some(), d.time().is_some(), d.offset().is_some()) {
        (true, false, _) => Type::DATE,
        (false, _, false) => Type::TIME,
        (false, _, true) => Type::TIMETZ,
        (true, true, false) => Type::TIMESTAMP,
        (true, true, true) => Type::TIMESTAMPTZ,
    }
}

// Native array type when every non-null element maps to the same element type.
fn array_type(items: &[Value]) -> Option<Type> {
    let mut element: Option<Type> = None;
    for item in items.iter().filter(|v| !v.is_null()) {
        let ty = scalar_type(item)?;
        match &element {
            Some(existing) if *existing != ty => return None,
            Some(_) => {}
            None => element = Some(ty),
        }
    }
    array_of(&element.unwrap_or(Type::TEXT))
}

fn array_of(element: &Type) -> Option<Type> {
    let ty = match *element {
        Type::BOOL => Type::BOOL_ARRAY,
        Type::TEXT => Type::TEXT_ARRAY,
        Type::INT8 => Type::INT8_ARRAY,
        Type::NUMERIC => Type::NUMERIC_ARRAY,
        Type::FLOAT8 => Type::FLOAT8_ARRAY,
        Type::DATE => Type::DATE_ARRAY,
        Type::TIME => Type::TIME_ARRAY,
        Type::TIMETZ => Type::TIMETZ_ARRAY,
        Type::TIMESTAMP => Type::TIMESTAMP_ARRAY,
        Type::TIMESTAMPTZ => Type::TIMESTAMPTZ_ARRAY,
        Type::BYTEA => Type::BYTEA_ARRAY,
        Type::UUID => Type::UUID_ARRAY,
        _ => return None,
    };
    Some(ty)
}

fn mismatch(value: &Value, ty: &Type) -> Error {
    Error::unsupported_type(BACKEND, format!("{} as {}", value.kind(), ty.name()))
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || matches!(ty.kind(), Kind::Enum(_))
}

/// Encode `value` as the binary representation of `ty`.
pub fn encode(value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull> {
    match value {
        Value::Null => return Ok(IsNull::Yes),
        Value::Bool(b) if *ty == Type::BOOL => out.put_u8(u8::from(*b)),
        Value::String(s) if is_text(ty) => out.put_slice(s.as_bytes()),
        Value::Int64(n) => encode_integer(i128::from(*n), value, ty, out)?,
        Value::UInt64(n) => encode_integer(i128::from(*n), value, ty, out)?,
        Value::Float64(f) => match *ty {
            Type::FLOAT8 => out.put_f64(*f),
            Type::FLOAT4 => {
                let narrow = *f as f32;
                if f.is_finite() && f64::from(narrow) != *f {
                    return Err(Error::NumericOverflow {
                        value: f.to_string(),
                        target: "float4",
                    });
                }
                out.put_f32(narrow)
            }
            Type::NUMERIC => encode_float_numeric(*f, out)?,
            _ => return Err(mismatch(value, ty)),
        },
        Value::Decimal(d) if *ty == Type::NUMERIC => encode_numeric(d, out),
        Value::Date(d) => encode_date(d, value, ty, out)?,
        Value::Binary(bytes) if *ty == Type::BYTEA => out.put_slice(bytes),
        Value::Uuid(u) if *ty == Type::UUID => out.put_slice(u.as_bytes()),
        Value::Uuid(u) if is_text(ty) => out.put_slice(u.hyphenated().to_string().as_bytes()),
        Value::Array(items) => match ty.kind() {
            Kind::Array(element) => encode_array(items, element, out)?,
            _ if *ty == Type::JSONB || *ty == Type::JSON => encode_json(value, ty, out)?,
            _ => return Err(mismatch(value, ty)),
        },
        Value::Map(_) if *ty == Type::JSONB || *ty == Type::JSON => encode_json(value, ty, out)?,
        Value::Opaque(o) if o.format == OpaqueFormat::Json && *ty == Type::JSONB => {
            out.put_u8(JSONB_VERSION);
            out.put_slice(&o.bytes)
        }
        Value::Opaque(o) if o.format == OpaqueFormat::Json && *ty == Type::JSON => {
            out.put_slice(&o.bytes)
        }
        Value::Opaque(o) if *ty == Type::BYTEA => out.put_slice(&o.bytes),
        _ => return Err(mismatch(value, ty)),
    }
    Ok(IsNull::No)
}

fn encode_integer(n: i128, value: &Value, ty: &Type, out: &mut BytesMut) -> Result<()> {
    let overflow = |target: &'static str| Error::NumericOverflow {
        value: n.to_string(),
        target,
    };
    match *ty {
        Type::INT8 => out.put_i64(i64::try_from(n).map_err(|_| overflow("int8"))?),
        Type::INT4 => out.put_i32(i32::try_from(n).map_err(|_| overflow("int4"))?),
        Type::INT2 => out.put_i16(i16::try_from(n).map_err(|_| overflow("int2"))?),
        Type::NUMERIC => {
            let d = Decimal::from_i128_with_scale(n, 0);
            encode_numeric(&d, out)
        }
        _ => return Err(mismatch(value, ty)),
    }
    Ok(())
}

fn encode_float_numeric(f: f64, out: &mut BytesMut) -> Result<()> {
    let special = if f.is_nan() {
        NUMERIC_NAN
    } else if f == f64::INFINITY {
        NUMERIC_PINF
    } else if f == f64::NEG_INFINITY {
        NUMERIC_NINF
    } else {
        let d = Decimal::try_from(f).map_err(|_| Error::NumericOverflow {
            value: f.to_string(),
            target: "numeric",
        })?;
        encode_numeric(&d, out);
        return Ok(());
    };
    out.put_i16(0);
    out.put_i16(0);
    out.put_u16(special);
    out.put_u16(0);
    Ok(())
}

/// NUMERIC binary form: ndigits, weight, sign, dscale, then base-10000 digits.
pub fn encode_numeric(d: &Decimal, out: &mut BytesMut) {
    let scale = d.scale() as usize;
    let mantissa = d.mantissa();
    let sign = if mantissa < 0 { NUMERIC_NEG } else { NUMERIC_POS };

    let mut text = mantissa.unsigned_abs().to_string();
    if text.len() <= scale {
        text = format!("{}{}", "0".repeat(scale + 1 - text.len()), text);
    }
    let (int_part, frac_part) = text.split_at(text.len() - scale);

    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let int_digits = format!("{}{}", "0".repeat(int_pad), int_part);
    let frac_digits = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let mut groups: Vec<i16> = int_digits
        .as_bytes()
        .chunks(4)
        .chain(frac_digits.as_bytes().chunks(4))
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
        .collect();
    let mut weight = (int_digits.len() / 4) as i16 - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= leading as i16;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(groups.len() as i16);
    out.put_i16(weight);
    out.put_u16(if groups.is_empty() { NUMERIC_POS } else { sign });
    out.put_u16(scale as u16);
    for group in groups {
        out.put_i16(group);
    }
}

/// Decode the NUMERIC binary form. NaN and the infinities become `Float64`.
pub fn decode_numeric(raw: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(raw);
    let ndigits = reader.i16()?;
    let weight = reader.i16()?;
    let sign = reader.u16()?;
    let dscale = reader.u16()? as usize;

    match sign {
        NUMERIC_NAN => return Ok(Value::Float64(f64::NAN)),
        NUMERIC_PINF => return Ok(Value::Float64(f64::INFINITY)),
        NUMERIC_NINF => return Ok(Value::Float64(f64::NEG_INFINITY)),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(Error::Codec(format!("numeric sign word {other:#06x}"))),
    }
    if ndigits < 0 {
        return Err(Error::Codec("negative numeric digit count".into()));
    }
    let digits = (0..ndigits)
        .map(|_| reader.i16())
        .collect::<Result<Vec<_>>>()?;
    let digit_at = |position: i32| -> i16 {
        let idx = i32::from(weight) - position;
        if idx >= 0 && (idx as usize) < digits.len() {
            digits[idx as usize]
        } else {
            0
        }
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for position in (0..=i32::from(weight)).rev() {
            if position == i32::from(weight) {
                text.push_str(&digit_at(position).to_string());
            } else {
                text.push_str(&format!("{:04}", digit_at(position)));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::new();
        let mut position = -1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(position)));
            position -= 1;
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }

    Decimal::from_str(&text)
        .map(Value::Decimal)
        .map_err(|_| Error::unsupported_type(BACKEND, format!("numeric {text} beyond decimal range")))
}

fn encode_date(d: &DateComponents, value: &Value, ty: &Type, out: &mut BytesMut) -> Result<()> {
    let overflow = || Error::NumericOverflow {
        value: d.to_iso_string(),
        target: "timestamp",
    };
    match (*ty == Type::DATE, d.date(), d.time()) {
        (true, Some(date), _) => {
            let days = (date.and_time(NaiveTime::default()) - pg_epoch()).num_days();
            out.put_i32(i32::try_from(days).map_err(|_| overflow())?);
        }
        (false, None, Some(time)) if *ty == Type::TIME => out.put_i64(time_micros(time)),
        (false, None, Some(time)) if *ty == Type::TIMETZ => {
            out.put_i64(time_micros(time));
            let east = d.offset().map_or(0, |o| o.local_minus_utc());
            out.put_i32(-east);
        }
        (false, Some(date), Some(time)) if *ty == Type::TIMESTAMP => {
            let micros = (date.and_time(time) - pg_epoch())
                .num_microseconds()
                .ok_or_else(overflow)?;
            out.put_i64(micros);
        }
        (false, Some(_), Some(_)) if *ty == Type::TIMESTAMPTZ => {
            let instant = d.to_utc().naive().ok_or_else(|| mismatch(value, ty))?;
            let micros = (instant - pg_epoch()).num_microseconds().ok_or_else(overflow)?;
            out.put_i64(micros);
        }
        _ => return Err(mismatch(value, ty)),
    }
    Ok(())
}

fn time_micros(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1_000_000 + i64::from(time.nanosecond() / 1_000)
}

fn time_from_micros(micros: i64) -> Result<NaiveTime> {
    let secs = u32::try_from(micros.div_euclid(1_000_000))
        .map_err(|_| Error::Codec(format!("time of day {micros}us out of range")))?;
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| Error::Codec(format!("time of day {micros}us out of range")))
}

fn timestamp_from_micros(micros: i64) -> Result<NaiveDateTime> {
    pg_epoch()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| Error::unsupported_type(BACKEND, "infinite or out-of-range timestamp"))
}

fn encode_json(value: &Value, ty: &Type, out: &mut BytesMut) -> Result<()> {
    let json = json::to_json(value)?;
    let bytes = serde_json::to_vec(&json).map_err(|e| Error::Codec(e.to_string()))?;
    if *ty == Type::JSONB {
        out.put_u8(JSONB_VERSION);
    }
    out.put_slice(&bytes);
    Ok(())
}

// One-dimensional array with lower bound 1.
fn encode_array(items: &[Value], element: &Type, out: &mut BytesMut) -> Result<()> {
    let has_nulls = items.iter().any(Value::is_null);
    out.put_i32(1);
    out.put_i32(i32::from(has_nulls));
    out.put_u32(element.oid());
    out.put_i32(
        i32::try_from(items.len()).map_err(|_| Error::Codec("array too long".into()))?,
    );
    out.put_i32(1);

    for item in items {
        let len_at = out.len();
        out.put_i32(0);
        match encode(item, element, out)? {
            IsNull::Yes => {
                out[len_at..len_at + 4].copy_from_slice(&(-1i32).to_be_bytes());
            }
            IsNull::No => {
                let len = out.len() - len_at - 4;
                let len = i32::try_from(len).map_err(|_| Error::Codec("array element too large".into()))?;
                out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
            }
        }
    }
    Ok(())
}

fn decode_array(element: &Type, raw: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(raw);
    let ndim = reader.i32()?;
    let _has_nulls = reader.i32()?;
    let _element_oid = reader.u32()?;
    if ndim == 0 {
        return Ok(Value::Array(Vec::new()));
    }
    if ndim < 0 {
        return Err(Error::Codec("negative array dimension count".into()));
    }
    let mut dims = Vec::with_capacity(ndim as usize);
    for _ in 0..ndim {
        let len = reader.i32()?;
        let _lower_bound = reader.i32()?;
        dims.push(usize::try_from(len).map_err(|_| Error::Codec("negative array length".into()))?);
    }

    let total: usize = dims.iter().product();
    let mut flat = Vec::with_capacity(total);
    for _ in 0..total {
        let len = reader.i32()?;
        if len < 0 {
            flat.push(Value::Null);
        } else {
            flat.push(decode(element, reader.take(len as usize)?)?);
        }
    }

    // Nest innermost dimension first.
    for &dim in dims.iter().skip(1).rev() {
        let mut nested = Vec::with_capacity(flat.len() / dim.max(1));
        let mut iter = flat.into_iter();
        loop {
            let chunk: Vec<Value> = iter.by_ref().take(dim).collect();
            if chunk.is_empty() {
                break;
            }
            nested.push(Value::Array(chunk));
        }
        flat = nested;
    }
    Ok(Value::Array(flat))
}

/// Decode the binary representation of `ty`.
pub fn decode(ty: &Type, raw: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(raw);
    let value = match *ty {
        Type::BOOL => Value::Bool(reader.u8()? != 0),
        Type::INT2 => Value::Int64(i64::from(reader.i16()?)),
        Type::INT4 => Value::Int64(i64::from(reader.i32()?)),
        Type::INT8 => Value::Int64(reader.i64()?),
        Type::OID => Value::Int64(i64::from(reader.u32()?)),
        Type::FLOAT4 => Value::Float64(f64::from(reader.f32()?)),
        Type::FLOAT8 => Value::Float64(reader.f64()?),
        Type::NUMERIC => return decode_numeric(raw),
        Type::BYTEA => Value::Binary(raw.to_vec()),
        Type::UUID => Value::Uuid(Uuid::from_slice(raw).map_err(|e| Error::Codec(e.to_string()))?),
        Type::DATE => {
            let days = reader.i32()?;
            if days == i32::MAX || days == i32::MIN {
                return Err(Error::unsupported_type(BACKEND, "infinite date"));
            }
            let date = pg_epoch()
                .date()
                .checked_add_signed(Duration::days(i64::from(days)))
                .ok_or_else(|| Error::unsupported_type(BACKEND, "out-of-range date"))?;
            Value::Date(DateComponents::date_only(date))
        }
        Type::TIME => Value::Date(DateComponents::time_only(time_from_micros(reader.i64()?)?)),
        Type::TIMETZ => {
            let time = time_from_micros(reader.i64()?)?;
            let west = reader.i32()?;
            let offset = FixedOffset::west_opt(west)
                .ok_or_else(|| Error::Codec(format!("time zone offset {west}s out of range")))?;
            Value::Date(DateComponents::time_with_offset(time, offset))
        }
        Type::TIMESTAMP => Value::Date(DateComponents::date_time(timestamp_from_micros(reader.i64()?)?)),
        Type::TIMESTAMPTZ => {
            let utc = timestamp_from_micros(reader.i64()?)?;
            let zero = FixedOffset::east_opt(0).ok_or_else(|| Error::Codec("zero offset".into()))?;
            let components = DateComponents::new(Some(utc.date()), Some(utc.time()), Some(zero))?;
            Value::Date(components)
        }
        Type::JSON => decode_json(raw)?,
        Type::JSONB => match raw.split_first() {
            Some((&JSONB_VERSION, rest)) => decode_json(rest)?,
            _ => return Err(Error::Codec("unknown jsonb version".into())),
        },
        _ if is_text(ty) => Value::String(
            std::str::from_utf8(raw)
                .map_err(|e| Error::Codec(e.to_string()))?
                .to_string(),
        ),
        _ => match ty.kind() {
            Kind::Array(element) => return decode_array(element, raw),
            Kind::Domain(base) => return decode(base, raw),
            _ => return Err(Error::unsupported_type(BACKEND, ty.name())),
        },
    };
    Ok(value)
}

fn decode_json(raw: &[u8]) -> Result<Value> {
    let parsed: serde_json::Value = serde_json::from_slice(raw).map_err(|e| Error::Codec(e.to_string()))?;
    Ok(json::from_json(parsed))
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Codec(format!(
                "expected {n} more bytes, found {}",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        encode(self, ty, out).map_err(Into::into)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        decode(ty, raw).map_err(Into::into)
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}
