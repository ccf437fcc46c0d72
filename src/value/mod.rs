//! The universal value: every datum crossing a query boundary.
//!
//! Each backend gets its own conversion contract in a submodule. Conversions
//! are lossless except where a backend's type system is strictly narrower;
//! those narrowings are listed next to each codec and pinned in its tests.

pub mod document;
pub mod json;
pub mod postgres;
pub mod resp;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    String(String),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Decimal(Decimal),
    Date(DateComponents),
    Binary(Vec<u8>),
    Uuid(Uuid),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Opaque(Opaque),
}

/// Variant tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    String,
    Int64,
    UInt64,
    Float64,
    Decimal,
    Date,
    Binary,
    Uuid,
    Array,
    Map,
    Opaque,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::String => "string",
            ValueKind::Int64 => "int64",
            ValueKind::UInt64 => "uint64",
            ValueKind::Float64 => "float64",
            ValueKind::Decimal => "decimal",
            ValueKind::Date => "date",
            ValueKind::Binary => "binary",
            ValueKind::Uuid => "uuid",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
            ValueKind::Opaque => "opaque",
        }
    }

    /// Kinds that are not containers and carry a single datum.
    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            ValueKind::Null | ValueKind::Array | ValueKind::Map | ValueKind::Opaque
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload a backend produced in a format dbkit does not interpret.
#[derive(Debug, Clone)]
pub struct Opaque {
    pub format: OpaqueFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueFormat {
    Json,
    Bson,
    MessagePack,
    Raw,
}

impl Opaque {
    pub fn new(format: OpaqueFormat, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Calendar {
    Gregorian,
    Iso8601,
}

/// A date, a time of day, or both.
///
/// Either part may be missing but never both. A time-only value never
/// gains a fabricated date on its way through a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateComponents {
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    offset: Option<FixedOffset>,
    calendar: Option<Calendar>,
}

impl DateComponents {
    pub fn new(
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
        offset: Option<FixedOffset>,
    ) -> Result<Self> {
        if date.is_none() && time.is_none() {
            return Err(Error::invalid_expression(
                "date components need a date, a time or both",
            ));
        }
        Ok(Self {
            date,
            time,
            offset,
            calendar: None,
        })
    }

    pub fn date_only(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            time: None,
            offset: None,
            calendar: None,
        }
    }

    pub fn time_only(time: NaiveTime) -> Self {
        Self {
            date: None,
            time: Some(time),
            offset: None,
            calendar: None,
        }
    }

    pub fn time_with_offset(time: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            offset: Some(offset),
            ..Self::time_only(time)
        }
    }

    pub fn date_time(dt: NaiveDateTime) -> Self {
        Self {
            date: Some(dt.date()),
            time: Some(dt.time()),
            offset: None,
            calendar: None,
        }
    }

    pub fn zoned(dt: DateTime<FixedOffset>) -> Self {
        Self {
            offset: Some(*dt.offset()),
            ..Self::date_time(dt.naive_local())
        }
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn time(&self) -> Option<NaiveTime> {
        self.time
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset
    }

    pub fn calendar(&self) -> Option<Calendar> {
        self.calendar
    }

    pub fn is_date_only(&self) -> bool {
        self.date.is_some() && self.time.is_none()
    }

    pub fn is_time_only(&self) -> bool {
        self.date.is_none() && self.time.is_some()
    }

    /// Local date and time, when both are present.
    pub fn naive(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }

    /// The absolute instant, when date, time and offset are all present.
    pub fn instant(&self) -> Option<DateTime<FixedOffset>> {
        let offset = self.offset?;
        offset.from_local_datetime(&self.naive()?).single()
    }

    /// Same instant expressed with a zero offset. Values without an instant
    /// are returned unchanged.
    pub fn to_utc(&self) -> Self {
        match self.instant() {
            Some(instant) => Self {
                calendar: self.calendar,
                ..Self::zoned(instant.with_timezone(&Utc.fix()))
            },
            None => *self,
        }
    }

    /// ISO 8601 text, omitting whichever part is absent.
    pub fn to_iso_string(&self) -> String {
        let mut out = String::new();
        if let Some(date) = self.date {
            out.push_str(&date.format("%Y-%m-%d").to_string());
        }
        if let Some(time) = self.time {
            if self.date.is_some() {
                out.push('T');
            }
            out.push_str(&time.format("%H:%M:%S%.f").to_string());
        }
        if let Some(offset) = self.offset {
            out.push_str(&offset.to_string());
        }
        out
    }

    /// Parses the forms [`DateComponents::to_iso_string`] produces: any of
    /// date, time or both, optionally followed by `Z` or a `±HH:MM[:SS]`
    /// offset.
    pub fn parse_iso(text: &str) -> Option<Self> {
        let (body, offset) = if let Some(parts) = parse_iso_body(text) {
            (parts, None)
        } else if let Some(rest) = text.strip_suffix('Z') {
            (parse_iso_body(rest)?, Some(Utc.fix()))
        } else {
            let split = text.rfind(&['+', '-'][..])?;
            (parse_iso_body(&text[..split])?, Some(parse_offset(&text[split..])?))
        };
        let (date, time) = body;
        Some(Self {
            date,
            time,
            offset,
            calendar: None,
        })
    }
}

fn parse_iso_body(text: &str) -> Option<(Option<NaiveDate>, Option<NaiveTime>)> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some((Some(dt.date()), Some(dt.time())));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some((Some(date), None));
    }
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .ok()
        .map(|time| (None, Some(time)))
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let mut seconds = 0;
    let mut fields = 0;
    for (field, scale) in rest.split(':').zip([3600, 60, 1]) {
        if field.len() != 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        seconds += field.parse::<i32>().ok()? * scale;
        fields += 1;
    }
    // hours and minutes are required; seconds may follow
    if !(2..=3).contains(&fields) || rest.split(':').count() != fields {
        return None;
    }
    FixedOffset::east_opt(sign * seconds)
}

impl fmt::Display for DateComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso_string())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::String(_) => ValueKind::String,
            Value::Int64(_) => ValueKind::Int64,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Float64(_) => ValueKind::Float64,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Date(_) => ValueKind::Date,
            Value::Binary(_) => ValueKind::Binary,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Text form used by the text-based codecs (decimal digits, ISO dates,
    /// hyphenated UUIDs). `None` for non-scalars and binary.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Int64(n) => Some(n.to_string()),
            Value::UInt64(n) => Some(n.to_string()),
            Value::Float64(f) => Some(float_text(*f)),
            Value::Decimal(d) => Some(d.to_string()),
            Value::Date(d) => Some(d.to_iso_string()),
            Value::Uuid(u) => Some(u.hyphenated().to_string()),
            _ => None,
        }
    }
}

/// Decimal text, recognising the `NaN` / `Infinity` / `-Infinity` sentinels
/// numeric columns use for values a decimal cannot hold.
pub fn parse_decimal_text(text: &str) -> Result<Value> {
    match text {
        "NaN" => Ok(Value::Float64(f64::NAN)),
        "Infinity" => Ok(Value::Float64(f64::INFINITY)),
        "-Infinity" => Ok(Value::Float64(f64::NEG_INFINITY)),
        _ => Decimal::from_str(text)
            .map(Value::Decimal)
            .map_err(|e| Error::Codec(format!("invalid decimal text {text:?}: {e}"))),
    }
}

pub(crate) fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        f.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // opaque payloads are never comparable
            _ => false,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null | Value::Opaque(_) => {}
            Value::Bool(b) => b.hash(state),
            Value::String(s) => s.hash(state),
            Value::Int64(n) => n.hash(state),
            Value::UInt64(n) => n.hash(state),
            Value::Float64(f) => {
                let canonical = if f.is_nan() {
                    f64::NAN
                } else if *f == 0.0 {
                    0.0
                } else {
                    *f
                };
                canonical.to_bits().hash(state)
            }
            Value::Decimal(d) => d.normalize().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Binary(b) => b.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Array(items) => items.hash(state),
            Value::Map(map) => map.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => f.write_str(s),
            Value::Int64(n) => write!(f, "{n}"),
            Value::UInt64(n) => write!(f, "{n}"),
            Value::Float64(n) => f.write_str(&float_text(*n)),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Opaque(o) => write!(f, "<{:?} payload, {} bytes>", o.format, o.bytes.len()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    String => String,
    &str => String,
    i64 => Int64,
    i32 => Int64,
    i16 => Int64,
    u64 => UInt64,
    u32 => UInt64,
    f64 => Float64,
    f32 => Float64,
    Decimal => Decimal,
    Uuid => Uuid,
    Vec<u8> => Binary,
    &[u8] => Binary,
    Vec<Value> => Array,
    BTreeMap<String, Value> => Map,
    DateComponents => Date,
    Opaque => Opaque,
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(DateComponents::date_only(v))
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Date(DateComponents::time_only(v))
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Date(DateComponents::date_time(v))
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Date(DateComponents::zoned(v))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(DateComponents::zoned(v.with_timezone(&Utc.fix())))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

fn mismatch(value: &Value, target: &'static str) -> Error {
    Error::unsupported_type("dbkit", format!("{} as {target}", value.kind()))
}

fn overflow(value: impl fmt::Display, target: &'static str) -> Error {
    Error::NumericOverflow {
        value: value.to_string(),
        target,
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Int64(n) => Ok(n),
            Value::UInt64(n) => i64::try_from(n).map_err(|_| overflow(n, "i64")),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64().ok_or_else(|| overflow(d, "i64")),
            Value::Decimal(d) => Err(overflow(d, "i64")),
            other => Err(mismatch(&other, "i64")),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let wide = i64::try_from(value)?;
        i32::try_from(wide).map_err(|_| overflow(wide, "i32"))
    }
}

impl TryFrom<Value> for u64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::UInt64(n) => Ok(n),
            Value::Int64(n) => u64::try_from(n).map_err(|_| overflow(n, "u64")),
            Value::Decimal(d) if d.fract().is_zero() => d.to_u64().ok_or_else(|| overflow(d, "u64")),
            Value::Decimal(d) => Err(overflow(d, "u64")),
            other => Err(mismatch(&other, "u64")),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        const EXACT: i64 = 1 << 53;
        match value {
            Value::Float64(f) => Ok(f),
            Value::Int64(n) if (-EXACT..=EXACT).contains(&n) => Ok(n as f64),
            Value::Int64(n) => Err(overflow(n, "f64")),
            Value::UInt64(n) if n <= EXACT as u64 => Ok(n as f64),
            Value::UInt64(n) => Err(overflow(n, "f64")),
            other => Err(mismatch(&other, "f64")),
        }
    }
}

impl TryFrom<Value> for Decimal {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(d) => Ok(d),
            Value::Int64(n) => Ok(Decimal::from(n)),
            Value::UInt64(n) => Ok(Decimal::from(n)),
            Value::Float64(f) => Decimal::try_from(f).map_err(|_| overflow(f, "decimal")),
            other => Err(mismatch(&other, "decimal")),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(&other, "bool")),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch(&other, "string")),
        }
    }
}

impl TryFrom<Value> for Uuid {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            other => Err(mismatch(&other, "uuid")),
        }
    }
}

impl TryFrom<Value> for DateComponents {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(d),
            other => Err(mismatch(&other, "date")),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Binary(b) => Ok(b),
            other => Err(mismatch(&other, "binary")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_opaque_never_equal() {
        let a = Value::Opaque(Opaque::new(OpaqueFormat::Raw, vec![1, 2, 3]));
        assert_ne!(a, a.clone());
        assert_eq!(
            hash_of(&a),
            hash_of(&Value::Opaque(Opaque::new(OpaqueFormat::Json, b"{}".to_vec())))
        );
    }

    #[test]
    fn test_equal_values_hash_equal() {
        let pairs = [
            (Value::Float64(0.0), Value::Float64(-0.0)),
            (Value::Float64(f64::NAN), Value::Float64(f64::NAN)),
            (
                Value::Decimal(Decimal::new(150, 2)),
                Value::Decimal(Decimal::new(15, 1)),
            ),
        ];
        for (a, b) in pairs {
            assert_eq!(a, b);
            assert_eq!(hash_of(&a), hash_of(&b));
        }
    }

    #[test]
    fn test_variants_do_not_cross_compare() {
        assert_ne!(Value::Int64(1), Value::UInt64(1));
        assert_ne!(Value::String("1".into()), Value::Int64(1));
    }

    #[test]
    fn test_checked_narrowing() {
        assert_eq!(i64::try_from(Value::UInt64(42)).unwrap(), 42);
        assert!(matches!(
            i64::try_from(Value::UInt64(u64::MAX)),
            Err(Error::NumericOverflow { target: "i64", .. })
        ));
        assert!(matches!(
            i32::try_from(Value::Int64(i64::from(i32::MAX) + 1)),
            Err(Error::NumericOverflow { target: "i32", .. })
        ));
        assert!(matches!(
            u64::try_from(Value::Int64(-1)),
            Err(Error::NumericOverflow { .. })
        ));
        assert!(matches!(
            i64::try_from(Value::Decimal(Decimal::new(15, 1))),
            Err(Error::NumericOverflow { .. })
        ));
        assert_eq!(i64::try_from(Value::Decimal(Decimal::new(700, 2))).unwrap(), 7);
        assert!(matches!(
            f64::try_from(Value::Int64((1 << 53) + 1)),
            Err(Error::NumericOverflow { .. })
        ));
        assert!(matches!(
            bool::try_from(Value::Int64(1)),
            Err(Error::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_arrays_are_value_types() {
        let original = Value::Array(vec![Value::Int64(1)]);
        let mut copy = original.clone();
        if let Value::Array(items) = &mut copy {
            items.push(Value::Int64(2));
        }
        assert_eq!(original.as_array().map(<[Value]>::len), Some(1));
    }

    #[test]
    fn test_date_components_partiality() {
        let time = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        let value = DateComponents::time_only(time);
        assert!(value.is_time_only());
        assert_eq!(value.date(), None);
        assert_eq!(value.naive(), None);
        assert!(DateComponents::new(None, None, None).is_err());
    }

    #[test]
    fn test_iso_text_round_trips() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_micro_opt(23, 59, 1, 250_000).unwrap();
        let cases = [
            DateComponents::date_only(date),
            DateComponents::time_only(time),
            DateComponents::time_with_offset(time, offset),
            DateComponents::date_time(date.and_time(time)),
            DateComponents::zoned(offset.from_local_datetime(&date.and_time(time)).unwrap()),
        ];
        for case in cases {
            let text = case.to_iso_string();
            assert_eq!(DateComponents::parse_iso(&text), Some(case), "{text}");
        }
        assert_eq!(
            DateComponents::time_with_offset(time, offset).to_iso_string(),
            "23:59:01.250+02:00"
        );
    }

    #[test]
    fn test_iso_offsets_on_partial_values() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_opt(8, 15, 0).unwrap();
        let west = FixedOffset::west_opt(5 * 3600).unwrap();
        let odd = FixedOffset::east_opt(5 * 3600 + 30 * 60 + 15).unwrap();
        let cases = [
            DateComponents::new(Some(date), None, Some(west)).unwrap(),
            DateComponents::new(Some(date), None, Some(odd)).unwrap(),
            DateComponents::time_with_offset(time, odd),
            DateComponents::zoned(odd.from_local_datetime(&date.and_time(time)).unwrap()),
            DateComponents::zoned(west.from_local_datetime(&date.and_time(time)).unwrap()),
        ];
        for case in cases {
            let text = case.to_iso_string();
            assert_eq!(DateComponents::parse_iso(&text), Some(case), "{text}");
        }
        assert_eq!(
            DateComponents::new(Some(date), None, Some(west)).unwrap().to_iso_string(),
            "2024-02-29-05:00"
        );

        let utc = DateComponents::parse_iso("2024-02-29T08:15:00Z").unwrap();
        assert_eq!(utc.offset(), Some(Utc.fix()));
        assert_eq!(DateComponents::parse_iso("08:15:00+5"), None);
        assert_eq!(DateComponents::parse_iso("2024-02-29+05:30:15:00"), None);
    }

    #[test]
    fn test_to_utc_keeps_instant() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        let zoned = DateComponents::zoned(offset.from_local_datetime(&local).unwrap());
        let utc = zoned.to_utc();
        assert_eq!(utc.offset().map(|o| o.local_minus_utc()), Some(0));
        assert_eq!(utc.date(), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(utc.instant(), zoned.instant());
    }

    #[test]
    fn test_decimal_text_sentinels() {
        assert!(matches!(parse_decimal_text("NaN"), Ok(Value::Float64(f)) if f.is_nan()));
        assert_eq!(
            parse_decimal_text("-Infinity").unwrap(),
            Value::Float64(f64::NEG_INFINITY)
        );
        assert_eq!(
            parse_decimal_text("12.50").unwrap(),
            Value::Decimal(Decimal::new(1250, 2))
        );
        assert!(matches!(parse_decimal_text("twelve"), Err(Error::Codec(_))));
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
