/// SQL Value Module
///
/// This module defines `SqlValue`, the tagged union used uniformly for
/// bound query parameters, result-set cells and model attributes. It
/// bridges the driver's loosely-typed values into a closed set of variants
/// with explicit, total conversion rules: every requested target type
/// either has a defined coercion or fails with a coercion error. There is
/// no implicit truncation and no silent default.
use crate::core::{QuarryError, Result};
use chrono::NaiveDateTime;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

/// Textual timestamp formats accepted when coercing strings (or TEXT
/// columns declared as temporal) into the timestamp variant.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d",
];

/// Format used when stringifying a timestamp.
pub const TIMESTAMP_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// String spellings coerced to `false`; anything else is truthy.
/// Matching is case-insensitive.
const FALSY_SPELLINGS: &[&str] = &["", "0", "false", "no", "off"];

/// A database value.
///
/// The set of variants is closed; every conversion site matches
/// exhaustively so that adding a variant forces each coercion rule to be
/// revisited.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i32),
    BigInt(i64),
    UBigInt(u64),
    Double(f64),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Name of the variant, used in coercion error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Int(_) => "int",
            SqlValue::BigInt(_) => "bigint",
            SqlValue::UBigInt(_) => "ubigint",
            SqlValue::Double(_) => "double",
            SqlValue::Text(_) => "text",
            SqlValue::Bool(_) => "bool",
            SqlValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    fn coercion_error(&self, to: &'static str) -> QuarryError {
        QuarryError::Coercion {
            from: self.type_name(),
            to,
        }
    }

    /// Coerces this value to an `i32`.
    ///
    /// Null becomes 0; numeric variants cast; strings parse; bools map to
    /// 1/0. Timestamps do not coerce to numbers.
    pub fn to_i32(&self) -> Result<i32> {
        match self {
            SqlValue::Null => Ok(0),
            SqlValue::Int(v) => Ok(*v),
            SqlValue::BigInt(v) => Ok(*v as i32),
            SqlValue::UBigInt(v) => Ok(*v as i32),
            SqlValue::Double(v) => Ok(*v as i32),
            SqlValue::Bool(v) => Ok(i32::from(*v)),
            SqlValue::Text(s) => s
                .trim()
                .parse::<i32>()
                .map_err(|_| self.coercion_error("int")),
            SqlValue::Timestamp(_) => Err(self.coercion_error("int")),
        }
    }

    /// Coerces this value to an `i64`.
    pub fn to_i64(&self) -> Result<i64> {
        match self {
            SqlValue::Null => Ok(0),
            SqlValue::Int(v) => Ok(i64::from(*v)),
            SqlValue::BigInt(v) => Ok(*v),
            SqlValue::UBigInt(v) => Ok(*v as i64),
            SqlValue::Double(v) => Ok(*v as i64),
            SqlValue::Bool(v) => Ok(i64::from(*v)),
            SqlValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| self.coercion_error("bigint")),
            SqlValue::Timestamp(_) => Err(self.coercion_error("bigint")),
        }
    }

    /// Coerces this value to a `u64`. Negative numeric values are an error
    /// rather than a wrapped cast.
    pub fn to_u64(&self) -> Result<u64> {
        match self {
            SqlValue::Null => Ok(0),
            SqlValue::Int(v) => {
                u64::try_from(*v).map_err(|_| self.coercion_error("ubigint"))
            }
            SqlValue::BigInt(v) => {
                u64::try_from(*v).map_err(|_| self.coercion_error("ubigint"))
            }
            SqlValue::UBigInt(v) => Ok(*v),
            SqlValue::Double(v) => {
                if *v < 0.0 {
                    Err(self.coercion_error("ubigint"))
                } else {
                    Ok(*v as u64)
                }
            }
            SqlValue::Bool(v) => Ok(u64::from(*v)),
            SqlValue::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| self.coercion_error("ubigint")),
            SqlValue::Timestamp(_) => Err(self.coercion_error("ubigint")),
        }
    }

    /// Coerces this value to an `f64`.
    pub fn to_f64(&self) -> Result<f64> {
        match self {
            SqlValue::Null => Ok(0.0),
            SqlValue::Int(v) => Ok(f64::from(*v)),
            SqlValue::BigInt(v) => Ok(*v as f64),
            SqlValue::UBigInt(v) => Ok(*v as f64),
            SqlValue::Double(v) => Ok(*v),
            SqlValue::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            SqlValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| self.coercion_error("double")),
            SqlValue::Timestamp(_) => Err(self.coercion_error("double")),
        }
    }

    /// Coerces this value to a `bool`.
    ///
    /// Numbers are truthy when non-zero. Strings follow an explicit falsy
    /// list ("", "0", "false", "no", "off", case-insensitive); anything
    /// else is true.
    pub fn to_bool(&self) -> Result<bool> {
        match self {
            SqlValue::Null => Ok(false),
            SqlValue::Int(v) => Ok(*v != 0),
            SqlValue::BigInt(v) => Ok(*v != 0),
            SqlValue::UBigInt(v) => Ok(*v != 0),
            SqlValue::Double(v) => Ok(*v != 0.0),
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Text(s) => {
                let lowered = s.trim().to_lowercase();
                Ok(!FALSY_SPELLINGS.contains(&lowered.as_str()))
            }
            SqlValue::Timestamp(_) => Err(self.coercion_error("bool")),
        }
    }

    /// Stringifies this value. Every variant has a defined rendering:
    /// null becomes the empty string, bools become "1"/"0", timestamps use
    /// `TIMESTAMP_OUTPUT_FORMAT`.
    pub fn to_text(&self) -> Result<String> {
        match self {
            SqlValue::Null => Ok(String::new()),
            SqlValue::Int(v) => Ok(v.to_string()),
            SqlValue::BigInt(v) => Ok(v.to_string()),
            SqlValue::UBigInt(v) => Ok(v.to_string()),
            SqlValue::Double(v) => Ok(v.to_string()),
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Bool(v) => Ok(if *v { "1" } else { "0" }.to_string()),
            SqlValue::Timestamp(ts) => Ok(ts.format(TIMESTAMP_OUTPUT_FORMAT).to_string()),
        }
    }

    /// Coerces this value to a timestamp. Strings are parsed against the
    /// accepted format list; numeric variants do not coerce.
    pub fn to_timestamp(&self) -> Result<NaiveDateTime> {
        match self {
            SqlValue::Null => Ok(NaiveDateTime::default()),
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::Text(s) => {
                parse_timestamp(s).ok_or_else(|| self.coercion_error("timestamp"))
            }
            SqlValue::Int(_)
            | SqlValue::BigInt(_)
            | SqlValue::UBigInt(_)
            | SqlValue::Double(_)
            | SqlValue::Bool(_) => Err(self.coercion_error("timestamp")),
        }
    }

    /// Builds a `SqlValue` from a raw driver cell, dispatching on the
    /// column's declared type.
    ///
    /// Integer cells in columns declared BOOLEAN or TINYINT hydrate as
    /// bools; 32-bit-ranged integers in columns not declared BIGINT
    /// hydrate as `Int`; text cells in columns declared temporal parse as
    /// timestamps (falling back to text when no accepted format matches);
    /// everything else hydrates as text.
    pub fn from_driver(value: ValueRef<'_>, decl_type: Option<&str>) -> SqlValue {
        let decl = decl_type.map(|d| d.to_ascii_uppercase()).unwrap_or_default();
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => {
                if decl.contains("BOOL") || decl.starts_with("TINYINT") {
                    SqlValue::Bool(i != 0)
                } else if decl.contains("UNSIGNED") && i >= 0 {
                    SqlValue::UBigInt(i as u64)
                } else if !decl.contains("BIGINT")
                    && i >= i64::from(i32::MIN)
                    && i <= i64::from(i32::MAX)
                {
                    SqlValue::Int(i as i32)
                } else {
                    SqlValue::BigInt(i)
                }
            }
            ValueRef::Real(f) => SqlValue::Double(f),
            ValueRef::Text(t) => {
                let text = String::from_utf8_lossy(t).to_string();
                if decl.contains("DATE") || decl.contains("TIME") {
                    match parse_timestamp(&text) {
                        Some(ts) => SqlValue::Timestamp(ts),
                        None => SqlValue::Text(text),
                    }
                } else {
                    SqlValue::Text(text)
                }
            }
            ValueRef::Blob(b) => SqlValue::Text(String::from_utf8_lossy(b).to_string()),
        }
    }
}

/// Tries each accepted textual format in order.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
        // A bare date carries no time-of-day; midnight it.
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_text().unwrap_or_default()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Null => Ok(ToSqlOutput::Owned(Value::Null)),
            SqlValue::Int(v) => Ok(ToSqlOutput::Owned(Value::Integer(i64::from(*v)))),
            SqlValue::BigInt(v) => Ok(ToSqlOutput::Owned(Value::Integer(*v))),
            SqlValue::UBigInt(v) => {
                let i = i64::try_from(*v).map_err(|e| {
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
                })?;
                Ok(ToSqlOutput::Owned(Value::Integer(i)))
            }
            SqlValue::Double(v) => Ok(ToSqlOutput::Owned(Value::Real(*v))),
            SqlValue::Text(s) => Ok(ToSqlOutput::Owned(Value::Text(s.clone()))),
            SqlValue::Bool(v) => Ok(ToSqlOutput::Owned(Value::Integer(i64::from(*v)))),
            SqlValue::Timestamp(ts) => Ok(ToSqlOutput::Owned(Value::Text(
                ts.format(TIMESTAMP_OUTPUT_FORMAT).to_string(),
            ))),
        }
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UBigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_coerces_to_zero_values() {
        assert_eq!(SqlValue::Null.to_i32().unwrap(), 0);
        assert_eq!(SqlValue::Null.to_i64().unwrap(), 0);
        assert_eq!(SqlValue::Null.to_u64().unwrap(), 0);
        assert_eq!(SqlValue::Null.to_f64().unwrap(), 0.0);
        assert!(!SqlValue::Null.to_bool().unwrap());
        assert_eq!(SqlValue::Null.to_text().unwrap(), "");
    }

    #[test]
    fn test_numeric_casts() {
        assert_eq!(SqlValue::BigInt(42).to_i32().unwrap(), 42);
        assert_eq!(SqlValue::Int(7).to_i64().unwrap(), 7);
        assert_eq!(SqlValue::Double(3.9).to_i32().unwrap(), 3);
        assert_eq!(SqlValue::Int(-1).to_u64().unwrap_err().to_string().contains("ubigint"), true);
    }

    #[test]
    fn test_string_parsing() {
        assert_eq!(SqlValue::Text("123".into()).to_i32().unwrap(), 123);
        assert_eq!(SqlValue::Text(" 4.5 ".into()).to_f64().unwrap(), 4.5);
        assert!(SqlValue::Text("abc".into()).to_i64().is_err());
    }

    #[test]
    fn test_falsy_string_spellings() {
        for falsy in ["", "0", "false", "FALSE", "no", "Off"] {
            assert!(
                !SqlValue::Text(falsy.into()).to_bool().unwrap(),
                "{falsy:?} should be falsy"
            );
        }
        assert!(SqlValue::Text("yes".into()).to_bool().unwrap());
        assert!(SqlValue::Text("1".into()).to_bool().unwrap());
        assert!(SqlValue::Text("anything".into()).to_bool().unwrap());
    }

    #[test]
    fn test_bool_stringifies_as_digit() {
        assert_eq!(SqlValue::Bool(true).to_text().unwrap(), "1");
        assert_eq!(SqlValue::Bool(false).to_text().unwrap(), "0");
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = SqlValue::Text("2024-05-01 12:30:00".into()).to_timestamp().unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_text().unwrap(),
            "2024-05-01 12:30:00"
        );

        // Bare date is accepted, midnighted.
        let date_only = SqlValue::Text("2024-05-01".into()).to_timestamp().unwrap();
        assert_eq!(
            SqlValue::Timestamp(date_only).to_text().unwrap(),
            "2024-05-01 00:00:00"
        );

        // ISO T separator is accepted.
        assert!(SqlValue::Text("2024-05-01T12:30:00".into()).to_timestamp().is_ok());
    }

    #[test]
    fn test_unsupported_coercions_are_errors() {
        let ts = SqlValue::Text("2024-05-01 12:30:00".into()).to_timestamp().unwrap();
        assert!(SqlValue::Timestamp(ts).to_i64().is_err());
        assert!(SqlValue::Timestamp(ts).to_bool().is_err());
        assert!(SqlValue::Int(5).to_timestamp().is_err());
        assert!(SqlValue::Text("not a date".into()).to_timestamp().is_err());
    }

    #[test]
    fn test_from_driver_decl_dispatch() {
        let v = SqlValue::from_driver(ValueRef::Integer(1), Some("BOOLEAN"));
        assert_eq!(v, SqlValue::Bool(true));

        let v = SqlValue::from_driver(ValueRef::Integer(0), Some("TINYINT(1)"));
        assert_eq!(v, SqlValue::Bool(false));

        let v = SqlValue::from_driver(ValueRef::Integer(5), Some("INTEGER"));
        assert_eq!(v, SqlValue::Int(5));

        let v = SqlValue::from_driver(ValueRef::Integer(5), Some("BIGINT"));
        assert_eq!(v, SqlValue::BigInt(5));

        let v = SqlValue::from_driver(ValueRef::Integer(i64::MAX), None);
        assert_eq!(v, SqlValue::BigInt(i64::MAX));

        let v = SqlValue::from_driver(
            ValueRef::Text(b"2024-05-01 12:30:00"),
            Some("DATETIME"),
        );
        assert!(matches!(v, SqlValue::Timestamp(_)));

        // Temporal declaration with an unparseable cell stays text.
        let v = SqlValue::from_driver(ValueRef::Text(b"soon"), Some("DATETIME"));
        assert_eq!(v, SqlValue::Text("soon".into()));

        let v = SqlValue::from_driver(ValueRef::Real(1.5), Some("DOUBLE"));
        assert_eq!(v, SqlValue::Double(1.5));

        let v = SqlValue::from_driver(ValueRef::Null, None);
        assert_eq!(v, SqlValue::Null);
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(SqlValue::from(3i32), SqlValue::Int(3));
        assert_eq!(SqlValue::from("a"), SqlValue::Text("a".into()));
        assert_eq!(SqlValue::from(Option::<i32>::None), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(2i64)), SqlValue::BigInt(2));
    }
}
