use crate::prelude::*;

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg};

/// Exact rational number used for register scaling.
///
/// Register coefficients are decimal fractions (0.001, 0.1, 10, ...) and
/// scaling through f64 loses precision on repeated application, so values
/// stay rational until they hit the serialization edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
    numer: i64,
    denom: i64, // always > 0, always reduced
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

impl Rational {
    pub const ZERO: Rational = Rational { numer: 0, denom: 1 };
    pub const ONE: Rational = Rational { numer: 1, denom: 1 };

    pub fn new(numer: i64, denom: i64) -> Self {
        let sign = if denom < 0 { -1 } else { 1 };
        let g = gcd(numer.unsigned_abs(), denom.unsigned_abs()) as i64;
        Self {
            numer: sign * (numer / g),
            denom: (denom / g).abs(),
        }
    }

    pub const fn int(n: i64) -> Self {
        Self { numer: n, denom: 1 }
    }

    /// Parses a plain decimal string ("1", "-0.5", "0.001") exactly.
    pub fn from_decimal(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty coefficient");
        }

        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s.strip_prefix('+').unwrap_or(s)),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            bail!("unparseable coefficient: {:?}", s);
        }

        let mut numer: i64 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c
                .to_digit(10)
                .ok_or_else(|| anyhow!("unparseable coefficient: {:?}", s))?;
            numer = numer
                .checked_mul(10)
                .and_then(|n| n.checked_add(d as i64))
                .ok_or_else(|| anyhow!("coefficient out of range: {:?}", s))?;
        }

        let denom = 10i64
            .checked_pow(frac_part.len() as u32)
            .ok_or_else(|| anyhow!("coefficient out of range: {:?}", s))?;

        Ok(Self::new(sign * numer, denom))
    }

    /// Multiplies a raw register value by this coefficient, exactly.
    pub fn scale(self, raw: i64) -> Self {
        Self::new(self.numer * raw, self.denom)
    }

    pub fn abs(self) -> Self {
        Self {
            numer: self.numer.abs(),
            denom: self.denom,
        }
    }

    pub fn is_zero(self) -> bool {
        self.numer == 0
    }

    pub fn is_integer(self) -> bool {
        self.denom == 1
    }

    /// Truncating conversion, for codes and whole-unit readings.
    pub fn as_i64(self) -> i64 {
        self.numer / self.denom
    }

    pub fn as_f64(self) -> f64 {
        self.numer as f64 / self.denom as f64
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        Rational::new(
            self.numer * rhs.denom + rhs.numer * self.denom,
            self.denom * rhs.denom,
        )
    }
}

impl Neg for Rational {
    type Output = Rational;

    fn neg(self) -> Rational {
        Rational {
            numer: -self.numer,
            denom: self.denom,
        }
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.numer as i128 * other.denom as i128;
        let b = other.numer as i128 * self.denom as i128;
        a.cmp(&b)
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.denom == 1 {
            serializer.serialize_i64(self.numer)
        } else {
            serializer.serialize_f64(self.as_f64())
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.denom == 1 {
            write!(f, "{}", self.numer)
        } else {
            write!(f, "{}", self.as_f64())
        }
    }
}

/// A decoded telemetry value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Num(Rational),
    Text(String),
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Num(Rational::int(n))
    }

    pub fn num(&self) -> Option<Rational> {
        match self {
            Value::Num(r) => Some(*r),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Num(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Canonical telemetry snapshot. Insertion-ordered so published JSON is
/// stable across polls.
pub type Snapshot = indexmap::IndexMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_decimal_parses_fractions() {
        assert_eq!(Rational::from_decimal("0.001").unwrap(), Rational::new(1, 1000));
        assert_eq!(Rational::from_decimal("0.05").unwrap(), Rational::new(1, 20));
        assert_eq!(Rational::from_decimal("10").unwrap(), Rational::int(10));
        assert_eq!(Rational::from_decimal("-0.5").unwrap(), Rational::new(-1, 2));
        assert!(Rational::from_decimal("watts").is_err());
        assert!(Rational::from_decimal("").is_err());
    }

    #[test]
    fn scaling_is_exact() {
        let tenth = Rational::new(1, 10);
        assert_eq!(tenth.scale(123), Rational::new(123, 10));
        assert_eq!(tenth.scale(123).as_f64(), 12.3);

        // 0.1 + 0.2 == 0.3, which f64 famously gets wrong
        let sum = tenth.scale(1) + tenth.scale(2);
        assert_eq!(sum, Rational::new(3, 10));
    }

    #[test]
    fn signed_scaling() {
        let hundredth = Rational::new(1, 100);
        assert_eq!(hundredth.scale(-50), Rational::new(-1, 2));
        assert_eq!(hundredth.scale(-50).as_f64(), -0.5);
    }

    #[test]
    fn ordering() {
        assert!(Rational::new(1, 10) < Rational::ONE);
        assert!(Rational::int(11) > Rational::int(10));
        assert!(Rational::new(-3, 10) < Rational::ZERO);
    }
}
