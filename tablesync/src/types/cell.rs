use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

use crate::types::PgNumeric;

type BoxError = Box<dyn Error + Sync + Send>;

/// A single value of a row moved from the source to the target.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeStamp(NaiveDateTime),
    TimeStampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns the value as an integer when it is one, booleans count as `0` and `1`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Bool(v) => Some(i64::from(*v)),
            Cell::I16(v) => Some(i64::from(*v)),
            Cell::I32(v) => Some(i64::from(*v)),
            Cell::U32(v) => Some(i64::from(*v)),
            Cell::I64(v) => Some(*v),
            Cell::Numeric(v) if v.fract().is_zero() => v.to_i64(),
            _ => None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::String(_) => "string",
            Cell::I16(_) => "i16",
            Cell::I32(_) => "i32",
            Cell::U32(_) => "u32",
            Cell::I64(_) => "i64",
            Cell::F32(_) => "f32",
            Cell::F64(_) => "f64",
            Cell::Numeric(_) => "numeric",
            Cell::Date(_) => "date",
            Cell::Time(_) => "time",
            Cell::TimeStamp(_) => "timestamp",
            Cell::TimeStampTz(_) => "timestamptz",
            Cell::Uuid(_) => "uuid",
            Cell::Json(_) => "json",
            Cell::Bytes(_) => "bytes",
        }
    }

    fn mismatch(&self, ty: &Type) -> BoxError {
        format!(
            "cannot write a {} value into a column of type {}",
            self.variant_name(),
            ty
        )
        .into()
    }
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

/// Types whose binary wire format is the plain UTF-8 text of the value.
fn is_text_wire_format(ty: &Type) -> bool {
    is_text(ty) || *ty == Type::XML || matches!(ty.kind(), Kind::Enum(_))
}

fn write_text(value: &str, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    out.extend_from_slice(value.as_bytes());
    Ok(IsNull::No)
}

fn write_integer(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(value).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        _ if is_text(ty) => write_text(&value.to_string(), out),
        _ => Err(format!("cannot write an integer into a column of type {ty}").into()),
    }
}

fn write_float(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => value.to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(value)?.to_sql(ty, out),
        _ if is_text(ty) => write_text(&value.to_string(), out),
        _ => Err(format!("cannot write a float into a column of type {ty}").into()),
    }
}

/// Values are written with the smallest lossless widening the target column needs.
///
/// Integers fit into any wider integer, float or numeric column, temporal values move between the
/// timestamp flavours, and every scalar can be written into a text column.
impl ToSql for Cell {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Cell::Null => Ok(IsNull::Yes),
            Cell::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                _ if is_text(ty) => write_text(if *v { "true" } else { "false" }, out),
                _ => write_integer(i64::from(*v), ty, out),
            },
            Cell::I16(v) => write_integer(i64::from(*v), ty, out),
            Cell::I32(v) => write_integer(i64::from(*v), ty, out),
            Cell::U32(v) => write_integer(i64::from(*v), ty, out),
            Cell::I64(v) => write_integer(*v, ty, out),
            Cell::F32(v) => write_float(f64::from(*v), ty, out),
            Cell::F64(v) => write_float(*v, ty, out),
            Cell::Numeric(v) => match *ty {
                Type::NUMERIC => v.to_sql(ty, out),
                Type::FLOAT4 | Type::FLOAT8 => match v.to_f64() {
                    Some(value) => write_float(value, ty, out),
                    None => Err(self.mismatch(ty)),
                },
                _ if is_text(ty) => write_text(&v.to_string(), out),
                _ => match self.as_i64() {
                    Some(value) => write_integer(value, ty, out),
                    None => Err(self.mismatch(ty)),
                },
            },
            Cell::String(v) => {
                if is_text_wire_format(ty) {
                    write_text(v, out)
                } else if *ty == Type::NUMERIC {
                    v.parse::<PgNumeric>()?.to_sql(ty, out)
                } else {
                    Err(self.mismatch(ty))
                }
            }
            Cell::Date(v) => match *ty {
                Type::DATE => v.to_sql(ty, out),
                Type::TIMESTAMP => v.and_time(NaiveTime::MIN).to_sql(ty, out),
                Type::TIMESTAMPTZ => v.and_time(NaiveTime::MIN).and_utc().to_sql(ty, out),
                _ if is_text(ty) => write_text(&v.format("%Y-%m-%d").to_string(), out),
                _ => Err(self.mismatch(ty)),
            },
            Cell::Time(v) => match *ty {
                Type::TIME => v.to_sql(ty, out),
                _ if is_text(ty) => write_text(&v.format("%H:%M:%S%.f").to_string(), out),
                _ => Err(self.mismatch(ty)),
            },
            Cell::TimeStamp(v) => match *ty {
                Type::TIMESTAMP => v.to_sql(ty, out),
                Type::TIMESTAMPTZ => v.and_utc().to_sql(ty, out),
                Type::DATE => v.date().to_sql(ty, out),
                _ if is_text(ty) => {
                    write_text(&v.format("%Y-%m-%d %H:%M:%S%.f").to_string(), out)
                }
                _ => Err(self.mismatch(ty)),
            },
            Cell::TimeStampTz(v) => match *ty {
                Type::TIMESTAMPTZ => v.to_sql(ty, out),
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ if is_text(ty) => write_text(&v.to_rfc3339(), out),
                _ => Err(self.mismatch(ty)),
            },
            Cell::Uuid(v) => match *ty {
                Type::UUID => v.to_sql(ty, out),
                _ if is_text(ty) => write_text(&v.to_string(), out),
                _ => Err(self.mismatch(ty)),
            },
            Cell::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                _ if is_text(ty) => write_text(&v.to_string(), out),
                _ => Err(self.mismatch(ty)),
            },
            Cell::Bytes(v) => match *ty {
                Type::BYTEA => v.to_sql(ty, out),
                _ => Err(self.mismatch(ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

macro_rules! impl_from_for_cell {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Cell {
                fn from(value: $ty) -> Self {
                    Cell::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_cell!(
    bool => Bool,
    String => String,
    i16 => I16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Numeric,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => TimeStamp,
    DateTime<Utc> => TimeStampTz,
    Uuid => Uuid,
    serde_json::Value => Json,
    Vec<u8> => Bytes,
);

/// Values a [`Decimal`] holds without losing digits become [`Cell::Numeric`], `NaN`, the
/// infinities and values beyond 28 significant digits are carried as their text.
impl From<PgNumeric> for Cell {
    fn from(value: PgNumeric) -> Self {
        let text = value.to_string();
        match Decimal::from_str_exact(&text) {
            Ok(decimal) => Cell::Numeric(decimal),
            Err(_) => Cell::String(text),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[cfg(test)]
mod tests {
    use tokio_postgres::types::FromSql;

    use super::*;

    fn encode(cell: &Cell, ty: &Type) -> Result<(IsNull, Vec<u8>), BoxError> {
        let mut out = BytesMut::new();
        let is_null = cell.to_sql(ty, &mut out)?;
        Ok((is_null, out.to_vec()))
    }

    #[test]
    fn null_is_written_for_any_type() {
        for ty in [Type::INT4, Type::TEXT, Type::BYTEA, Type::UUID] {
            let (is_null, bytes) = encode(&Cell::Null, &ty).unwrap();
            assert!(matches!(is_null, IsNull::Yes));
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn integers_widen_into_larger_columns() {
        let (_, bytes) = encode(&Cell::I16(7), &Type::INT8).unwrap();
        assert_eq!(bytes, 7i64.to_be_bytes());

        let (_, bytes) = encode(&Cell::I32(-1), &Type::INT4).unwrap();
        assert_eq!(bytes, (-1i32).to_be_bytes());

        let (_, bytes) = encode(&Cell::Bool(true), &Type::INT2).unwrap();
        assert_eq!(bytes, 1i16.to_be_bytes());
    }

    #[test]
    fn integers_that_do_not_fit_are_rejected() {
        assert!(encode(&Cell::I64(i64::from(i32::MAX) + 1), &Type::INT4).is_err());
    }

    #[test]
    fn scalars_are_written_as_text_into_text_columns() {
        let (_, bytes) = encode(&Cell::I32(42), &Type::VARCHAR).unwrap();
        assert_eq!(bytes, b"42");

        let (_, bytes) = encode(&Cell::Bool(false), &Type::TEXT).unwrap();
        assert_eq!(bytes, b"false");

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let (_, bytes) = encode(&Cell::Date(date), &Type::TEXT).unwrap();
        assert_eq!(bytes, b"2024-02-29");
    }

    #[test]
    fn strings_are_only_written_into_textual_columns() {
        let (_, bytes) = encode(&Cell::from("<a/>"), &Type::XML).unwrap();
        assert_eq!(bytes, b"<a/>");

        assert!(encode(&Cell::from("12"), &Type::INT4).is_err());
        assert!(encode(&Cell::Bytes(vec![1]), &Type::TEXT).is_err());
    }

    #[test]
    fn numerics_outside_decimal_range_are_carried_as_text() {
        let value: PgNumeric = "12.50".parse().unwrap();
        assert_eq!(Cell::from(value), Cell::Numeric(Decimal::new(1250, 2)));

        let huge = format!("1{}", "0".repeat(30));
        assert_eq!(
            Cell::from(huge.parse::<PgNumeric>().unwrap()),
            Cell::String(huge.clone())
        );
        assert_eq!(Cell::from(PgNumeric::NaN), Cell::from("NaN"));

        // Written back into a numeric column they keep their exact value.
        let (_, bytes) = encode(&Cell::String(huge), &Type::NUMERIC).unwrap();
        let decoded = PgNumeric::from_sql(&Type::NUMERIC, &bytes).unwrap();
        assert_eq!(decoded.to_string(), format!("1{}", "0".repeat(30)));

        let (_, bytes) = encode(&Cell::from("NaN"), &Type::NUMERIC).unwrap();
        assert_eq!(
            PgNumeric::from_sql(&Type::NUMERIC, &bytes).unwrap(),
            PgNumeric::NaN
        );
        assert!(encode(&Cell::from("twelve"), &Type::NUMERIC).is_err());
    }

    #[test]
    fn as_i64_covers_integral_values() {
        assert_eq!(Cell::Bool(true).as_i64(), Some(1));
        assert_eq!(Cell::U32(9).as_i64(), Some(9));
        assert_eq!(Cell::Numeric(Decimal::new(300, 2)).as_i64(), Some(3));
        assert_eq!(Cell::Numeric(Decimal::new(301, 2)).as_i64(), None);
        assert_eq!(Cell::from("1").as_i64(), None);
    }
}
