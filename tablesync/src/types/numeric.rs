use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};

const POSITIVE_SIGN: u16 = 0x0000;
const NEGATIVE_SIGN: u16 = 0x4000;
const NAN_SIGN: u16 = 0xC000;
const POSITIVE_INFINITY_SIGN: u16 = 0xD000;
const NEGATIVE_INFINITY_SIGN: u16 = 0xF000;

/// Decimal digits per digit of the wire format, which counts in base 10000.
const DIGITS_PER_GROUP: usize = 4;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A `numeric` value in the representation PostgreSQL sends over the wire.
///
/// Unlike [`rust_decimal::Decimal`] this covers the whole range of the type: `NaN`, both
/// infinities and values with more than 28 significant digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PgNumeric {
    NaN,
    PositiveInfinity,
    NegativeInfinity,
    Value {
        negative: bool,
        /// Power of 10000 the first digit is multiplied with.
        weight: i16,
        /// Number of decimal digits shown after the decimal point.
        scale: u16,
        /// Base 10000 digits, most significant first.
        digits: Vec<i16>,
    },
}

/// Error returned when text does not hold a `numeric` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNumericError {
    InvalidSyntax,
    ValueOutOfRange,
}

impl fmt::Display for ParseNumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseNumericError::InvalidSyntax => write!(f, "invalid numeric syntax"),
            ParseNumericError::ValueOutOfRange => write!(f, "numeric value out of range"),
        }
    }
}

impl std::error::Error for ParseNumericError {}

/// Accepts `NaN`, `[+-]Infinity` and plain `[+-]digits[.digits]` literals.
impl FromStr for PgNumeric {
    type Err = ParseNumericError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (negative, unsigned) = match input.as_bytes().first() {
            Some(b'-') => (true, &input[1..]),
            Some(b'+') => (false, &input[1..]),
            _ => (false, input),
        };

        if unsigned.eq_ignore_ascii_case("nan") {
            if negative {
                return Err(ParseNumericError::InvalidSyntax);
            }
            return Ok(PgNumeric::NaN);
        }
        if unsigned.eq_ignore_ascii_case("infinity") || unsigned.eq_ignore_ascii_case("inf") {
            return Ok(if negative {
                PgNumeric::NegativeInfinity
            } else {
                PgNumeric::PositiveInfinity
            });
        }

        let (integral, fractional) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let all_digits = integral
            .bytes()
            .chain(fractional.bytes())
            .all(|b| b.is_ascii_digit());
        if (integral.is_empty() && fractional.is_empty()) || !all_digits {
            return Err(ParseNumericError::InvalidSyntax);
        }

        let scale =
            u16::try_from(fractional.len()).map_err(|_| ParseNumericError::ValueOutOfRange)?;
        let integral = integral.trim_start_matches('0');

        // Both parts are padded with zeros up to whole groups around the decimal point.
        let integral_padding =
            (DIGITS_PER_GROUP - integral.len() % DIGITS_PER_GROUP) % DIGITS_PER_GROUP;
        let fractional_padding =
            (DIGITS_PER_GROUP - fractional.len() % DIGITS_PER_GROUP) % DIGITS_PER_GROUP;
        let aligned = format!(
            "{}{integral}{fractional}{}",
            "0".repeat(integral_padding),
            "0".repeat(fractional_padding)
        );

        let mut digits: Vec<i16> = aligned
            .as_bytes()
            .chunks(DIGITS_PER_GROUP)
            .map(|group| {
                group
                    .iter()
                    .fold(0i16, |acc, digit| acc * 10 + i16::from(digit - b'0'))
            })
            .collect();
        let integral_groups = (integral.len() + integral_padding) / DIGITS_PER_GROUP;
        let mut weight = i64::try_from(integral_groups)
            .map_err(|_| ParseNumericError::ValueOutOfRange)?
            - 1;

        let leading_zeros = digits.iter().take_while(|digit| **digit == 0).count();
        digits.drain(..leading_zeros);
        weight -= leading_zeros as i64;
        while digits.last() == Some(&0) {
            digits.pop();
        }
        if digits.is_empty() {
            weight = 0;
        }

        Ok(PgNumeric::Value {
            negative: negative && !digits.is_empty(),
            weight: i16::try_from(weight).map_err(|_| ParseNumericError::ValueOutOfRange)?,
            scale,
            digits,
        })
    }
}

/// Renders the value the way PostgreSQL prints it, keeping every digit of the scale.
impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, weight, scale, digits) = match self {
            PgNumeric::NaN => return f.write_str("NaN"),
            PgNumeric::PositiveInfinity => return f.write_str("Infinity"),
            PgNumeric::NegativeInfinity => return f.write_str("-Infinity"),
            PgNumeric::Value {
                negative,
                weight,
                scale,
                digits,
            } => (*negative, i32::from(*weight), usize::from(*scale), digits),
        };

        // The digit at `position` is multiplied with 10000^(weight - position).
        let digit_at = |position: i32| -> i16 {
            usize::try_from(position)
                .ok()
                .and_then(|position| digits.get(position))
                .copied()
                .unwrap_or(0)
        };

        if negative && digits.iter().any(|digit| *digit != 0) {
            f.write_str("-")?;
        }

        if weight < 0 {
            f.write_str("0")?;
        } else {
            write!(f, "{}", digit_at(0))?;
            for position in 1..=weight {
                write!(f, "{:04}", digit_at(position))?;
            }
        }

        if scale > 0 {
            let mut fraction = String::with_capacity(scale + DIGITS_PER_GROUP);
            let mut position = weight + 1;
            while fraction.len() < scale {
                fraction.push_str(&format!("{:04}", digit_at(position)));
                position += 1;
            }
            fraction.truncate(scale);
            write!(f, ".{fraction}")?;
        }

        Ok(())
    }
}

fn read_u16(raw: &[u8], offset: usize) -> Result<u16, BoxError> {
    match raw.get(offset..offset + 2) {
        Some(&[high, low]) => Ok(u16::from_be_bytes([high, low])),
        _ => Err("numeric value is truncated".into()),
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let num_digits = read_u16(raw, 0)?;
        let weight = read_u16(raw, 2)? as i16;
        let sign = read_u16(raw, 4)?;
        let scale = read_u16(raw, 6)?;

        let negative = match sign {
            POSITIVE_SIGN => false,
            NEGATIVE_SIGN => true,
            NAN_SIGN => return Ok(PgNumeric::NaN),
            POSITIVE_INFINITY_SIGN => return Ok(PgNumeric::PositiveInfinity),
            NEGATIVE_INFINITY_SIGN => return Ok(PgNumeric::NegativeInfinity),
            sign => return Err(format!("invalid numeric sign {sign:#06x}").into()),
        };

        let digits = (0..usize::from(num_digits))
            .map(|index| read_u16(raw, 8 + index * 2).map(|digit| digit as i16))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PgNumeric::Value {
            negative,
            weight,
            scale,
            digits,
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl ToSql for PgNumeric {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let (sign, weight, scale, digits): (u16, i16, u16, &[i16]) = match self {
            PgNumeric::NaN => (NAN_SIGN, 0, 0, &[]),
            PgNumeric::PositiveInfinity => (POSITIVE_INFINITY_SIGN, 0, 0, &[]),
            PgNumeric::NegativeInfinity => (NEGATIVE_INFINITY_SIGN, 0, 0, &[]),
            PgNumeric::Value {
                negative,
                weight,
                scale,
                digits,
            } => {
                let sign = if *negative { NEGATIVE_SIGN } else { POSITIVE_SIGN };
                (sign, *weight, *scale, digits.as_slice())
            }
        };

        out.put_u16(u16::try_from(digits.len())?);
        out.put_i16(weight);
        out.put_u16(sign);
        out.put_u16(scale);
        for digit in digits {
            out.put_i16(*digit);
        }

        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}
