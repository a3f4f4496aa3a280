use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::FieldType;

/// A scaled decimal number: `mantissa * 10^exponent`.
///
/// On the wire the exponent and mantissa are separate integer fields, each with its own operator.
/// The exponent must be within -63..=63.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    pub exponent: i32,
    pub mantissa: i64,
}

impl Decimal {
    pub const MIN_EXPONENT: i32 = -63;
    pub const MAX_EXPONENT: i32 = 63;

    pub fn new(mantissa: i64, exponent: i32) -> Self {
        Self { exponent, mantissa }
    }

    /// Approximate the decimal as a floating-point number.
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.exponent >= 0 {
            write!(f, "{}", self.mantissa)?;
            for _ in 0..self.exponent {
                f.write_str("0")?;
            }
            return Ok(());
        }
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.exponent.unsigned_abs() as usize;
        let sign = if self.mantissa < 0 { "-" } else { "" };
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int, frac)
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}

/// An owned field value. Used for descriptor initial values, for preset dictionary entries, and
/// for moving single values in and out of message storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Decimal(Decimal),
    Ascii(String),
    Unicode(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Value {
    /// Make an ASCII string value.
    pub fn ascii(s: impl Into<String>) -> Self {
        Value::Ascii(s.into())
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Int32(_) => FieldType::Int32,
            Value::UInt32(_) => FieldType::UInt32,
            Value::Int64(_) => FieldType::Int64,
            Value::UInt64(_) => FieldType::UInt64,
            Value::Decimal(_) => FieldType::Decimal,
            Value::Ascii(_) => FieldType::Ascii,
            Value::Unicode(_) => FieldType::Unicode,
            Value::Bytes(_) => FieldType::ByteVector,
        }
    }

    /// Check if this value can be stored in a field of the given type. ASCII and unicode strings
    /// are interchangeable as long as an ASCII field only receives 7-bit text.
    pub fn fits(&self, ty: FieldType) -> bool {
        match (self, ty) {
            (Value::Ascii(s), FieldType::Ascii) | (Value::Unicode(s), FieldType::Ascii) => {
                s.is_ascii()
            }
            (Value::Ascii(_), FieldType::Unicode) => true,
            (v, ty) => v.field_type() == ty,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int32(v) => Some(v as i64),
            Value::UInt32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            Value::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Int32(v) => u64::try_from(v).ok(),
            Value::UInt32(v) => Some(v as u64),
            Value::Int64(v) => u64::try_from(v).ok(),
            Value::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match *self {
            Value::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ascii(v) | Value::Unicode(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Raw bytes of a string or byte vector value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Ascii(v) | Value::Unicode(v) => Some(v.as_bytes()),
            Value::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Any integer value, widened so that every integer type and every delta between two of
    /// them fits.
    pub(crate) fn as_wide(&self) -> Option<i128> {
        match *self {
            Value::Int32(v) => Some(v as i128),
            Value::UInt32(v) => Some(v as i128),
            Value::Int64(v) => Some(v as i128),
            Value::UInt64(v) => Some(v as i128),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Ascii(v) | Value::Unicode(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => {
                f.write_str("0x")?;
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! impl_value_from {
    ($t: ty, $p: ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$p(v.into())
            }
        }
    };
}

impl_value_from!(i32, Int32);
impl_value_from!(u32, UInt32);
impl_value_from!(i64, Int64);
impl_value_from!(u64, UInt64);
impl_value_from!(Decimal, Decimal);
impl_value_from!(String, Unicode);
impl_value_from!(Vec<u8>, Bytes);

impl<'a> From<&'a str> for Value {
    fn from(v: &str) -> Self {
        Value::Unicode(v.into())
    }
}

impl<'a> From<&'a [u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decimal_display() {
        assert_eq!(Decimal::new(12345, -2).to_string(), "123.45");
        assert_eq!(Decimal::new(-5, -3).to_string(), "-0.005");
        assert_eq!(Decimal::new(7, 2).to_string(), "700");
        assert_eq!(Decimal::new(0, 0).to_string(), "0");
    }

    #[test]
    fn fits_checks_ascii() {
        assert!(Value::ascii("IBM").fits(FieldType::Ascii));
        assert!(Value::ascii("IBM").fits(FieldType::Unicode));
        assert!(Value::from("IBM").fits(FieldType::Ascii));
        assert!(!Value::from("Zürich").fits(FieldType::Ascii));
        assert!(!Value::from(5u32).fits(FieldType::Int32));
    }

    #[test]
    fn serde_keeps_variant() {
        let v = Value::Bytes(vec![1, 2, 3]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
