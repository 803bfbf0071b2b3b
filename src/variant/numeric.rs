use std::fmt;

use crate::sys::{Currency, Decimal, DECIMAL_NEG};

impl Currency {
    pub const SCALE: i64 = 10_000;

    pub const fn from_scaled(int64: i64) -> Self {
        Currency { int64 }
    }

    /// Rounds to four decimal places, ties to even. `None` when out of range.
    pub fn from_f64(value: f64) -> Option<Self> {
        let scaled = (value * Self::SCALE as f64).round_ties_even();
        if !scaled.is_finite() || scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
            return None;
        }
        Some(Currency {
            int64: scaled as i64,
        })
    }

    pub fn to_f64(self) -> f64 {
        self.int64 as f64 / Self::SCALE as f64
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = i128::from(self.int64);
        let sign = if value < 0 { "-" } else { "" };
        let whole = value.abs() / i128::from(Self::SCALE);
        let frac = value.abs() % i128::from(Self::SCALE);
        if frac == 0 {
            return write!(f, "{sign}{whole}");
        }
        let digits = format!("{frac:04}");
        write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl Decimal {
    pub const MAX_SCALE: u8 = 28;

    /// Builds a decimal from a 96-bit magnitude and a power-of-ten scale.
    pub fn new(mantissa: u128, scale: u8, negative: bool) -> Option<Self> {
        if mantissa >> 96 != 0 || scale > Self::MAX_SCALE {
            return None;
        }
        Some(Decimal {
            reserved: 0,
            scale,
            sign: if negative { DECIMAL_NEG } else { 0 },
            hi32: (mantissa >> 64) as u32,
            lo64: mantissa as u64,
        })
    }

    pub fn mantissa(&self) -> u128 {
        (u128::from(self.hi32) << 64) | u128::from(self.lo64)
    }

    pub fn is_negative(&self) -> bool {
        self.sign & DECIMAL_NEG != 0
    }

    pub fn to_f64(&self) -> f64 {
        let magnitude = self.mantissa() as f64 / 10f64.powi(i32::from(self.scale));
        if self.is_negative() {
            -magnitude
        } else {
            magnitude
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa().to_string();
        let scale = usize::from(self.scale);
        let sign = if self.is_negative() { "-" } else { "" };
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (whole, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{whole}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_display() {
        assert_eq!(Currency::from_scaled(123_400).to_string(), "12.34");
        assert_eq!(Currency::from_scaled(-5_000).to_string(), "-0.5");
        assert_eq!(Currency::from_scaled(70_000).to_string(), "7");
        assert_eq!(Currency::from_scaled(i64::MIN).to_string(), "-922337203685477.5808");
    }

    #[test]
    fn test_currency_from_f64() {
        assert_eq!(Currency::from_f64(1.23456), Some(Currency::from_scaled(12_346)));
        assert_eq!(Currency::from_f64(f64::NAN), None);
        assert_eq!(Currency::from_f64(1e300), None);
    }

    #[test]
    fn test_decimal_parts() {
        let decimal = Decimal::new(12_345, 2, true).unwrap();
        assert_eq!(decimal.to_string(), "-123.45");
        assert_eq!(decimal.to_f64(), -123.45);
        assert_eq!(Decimal::new(5, 3, false).unwrap().to_string(), "0.005");
        assert!(Decimal::new(1 << 96, 0, false).is_none());
        assert!(Decimal::new(1, 29, false).is_none());
    }
}
