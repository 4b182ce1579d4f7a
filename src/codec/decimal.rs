//! Decimal wire form shared by `float` and `datetime`.
//!
//! ```text
//! [ d: u8 ][ b'-' ][ mantissa: i64 LE ]      value = mantissa / 10^d
//! ```
//!
//! Floats are rendered in their shortest round-trip decimal form and the
//! point is removed; a rendering without a fractional part gets `.0` so that
//! `3.0` is written as `d=1, 30`.  Decoding rebuilds the decimal string and
//! parses it, which reproduces the original `f64` exactly.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{BakedError, FormatError, Result};

const SEPARATOR: u8 = b'-';
const WIRE_SIZE: usize = 10;
const MICROS_DIGITS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Decimal {
    pub digits:   u8,
    pub mantissa: i64,
}

impl Decimal {
    /// NaN, the infinities and values whose digit string overflows an `i64`
    /// have no wire form.
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(BakedError::UnrepresentableFloat(value));
        }
        let rendered = value.to_string();
        let (int_part, frac_part) = rendered.split_once('.').unwrap_or((&rendered, "0"));
        let digits = u8::try_from(frac_part.len())
            .map_err(|_| BakedError::UnrepresentableFloat(value))?;
        let mantissa = format!("{int_part}{frac_part}")
            .parse::<i64>()
            .map_err(|_| BakedError::UnrepresentableFloat(value))?;
        Ok(Self { digits, mantissa })
    }

    pub fn to_f64(self) -> std::result::Result<f64, FormatError> {
        let magnitude = self.mantissa.unsigned_abs().to_string();
        let digits = self.digits as usize;
        let padded = format!("{magnitude:0>width$}", width = digits + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - digits);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let text = if digits == 0 {
            format!("{sign}{int_part}")
        } else {
            format!("{sign}{int_part}.{frac_part}")
        };
        text.parse::<f64>().map_err(|e| FormatError::InvalidPayload {
            kind:   "float",
            reason: e.to_string(),
        })
    }

    /// Microseconds since the epoch, trailing zero digits trimmed down to one.
    pub fn from_micros(micros: i64) -> Self {
        let mut decimal = Self { digits: MICROS_DIGITS, mantissa: micros };
        while decimal.digits > 1 && decimal.mantissa % 10 == 0 {
            decimal.mantissa /= 10;
            decimal.digits -= 1;
        }
        decimal
    }

    /// Exact integer conversion; digits below a microsecond are truncated.
    pub fn to_micros(self) -> std::result::Result<i64, FormatError> {
        let out_of_range = || FormatError::InvalidPayload {
            kind:   "datetime",
            reason: format!("{}e-{} seconds is out of range", self.mantissa, self.digits),
        };
        if self.digits <= MICROS_DIGITS {
            let scale = 10i64.pow(u32::from(MICROS_DIGITS - self.digits));
            self.mantissa.checked_mul(scale).ok_or_else(out_of_range)
        } else {
            Ok(match 10i64.checked_pow(u32::from(self.digits - MICROS_DIGITS)) {
                Some(scale) => self.mantissa / scale,
                None => 0,
            })
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WIRE_SIZE);
        out.push(self.digits);
        out.push(SEPARATOR);
        out.extend_from_slice(&self.mantissa.to_le_bytes());
        out
    }

    /// The separator is positional: mantissa bytes may contain `-` too.
    pub fn from_bytes(kind: &'static str, payload: &[u8]) -> std::result::Result<Self, FormatError> {
        if payload.len() != WIRE_SIZE || payload[1] != SEPARATOR {
            return Err(FormatError::InvalidPayload {
                kind,
                reason: format!("expected {WIRE_SIZE} bytes as <digits>-<mantissa>, got {}", payload.len()),
            });
        }
        Ok(Self {
            digits:   payload[0],
            mantissa: LittleEndian::read_i64(&payload[2..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_rendering() {
        assert_eq!(Decimal::from_f64(3.14).unwrap(), Decimal { digits: 2, mantissa: 314 });
        assert_eq!(Decimal::from_f64(3.0).unwrap(), Decimal { digits: 1, mantissa: 30 });
        assert_eq!(Decimal::from_f64(-0.5).unwrap(), Decimal { digits: 1, mantissa: -5 });
        assert_eq!(Decimal::from_f64(1e-7).unwrap(), Decimal { digits: 7, mantissa: 1 });
    }

    #[test]
    fn test_float_back() {
        assert_eq!(Decimal { digits: 2, mantissa: 314 }.to_f64().unwrap(), 3.14);
        assert_eq!(Decimal { digits: 7, mantissa: 1 }.to_f64().unwrap(), 1e-7);
        assert_eq!(Decimal { digits: 1, mantissa: -5 }.to_f64().unwrap(), -0.5);
        assert_eq!(Decimal { digits: 0, mantissa: 42 }.to_f64().unwrap(), 42.0);
    }

    #[test]
    fn test_unrepresentable_floats() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e20, 1e-300, f64::MAX] {
            assert!(
                matches!(Decimal::from_f64(value), Err(BakedError::UnrepresentableFloat(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_micros_trimming() {
        assert_eq!(Decimal::from_micros(1_500_000), Decimal { digits: 1, mantissa: 15 });
        assert_eq!(Decimal::from_micros(1_000_000), Decimal { digits: 1, mantissa: 10 });
        assert_eq!(Decimal::from_micros(1_234_567), Decimal { digits: 6, mantissa: 1_234_567 });
        assert_eq!(Decimal { digits: 1, mantissa: 15 }.to_micros().unwrap(), 1_500_000);
        assert_eq!(Decimal { digits: 9, mantissa: 1_234_567_891 }.to_micros().unwrap(), 1_234_567);
    }

    #[test]
    fn test_separator_is_positional() {
        // mantissa 45 == b'-'
        let wire = Decimal { digits: 0, mantissa: 45 }.to_bytes();
        assert_eq!(Decimal::from_bytes("float", &wire).unwrap().mantissa, 45);
        assert!(Decimal::from_bytes("float", &wire[..9]).is_err());
    }
}
