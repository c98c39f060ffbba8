//! Fixed-point loyalty amount.
//!
//! All balances, accruals and withdrawal sums are stored as integer micros
//! (1 point = 1_000_000 micros). Floating point only appears at the JSON edge:
//! the accrual authority and the public API speak decimal numbers, which are
//! converted exactly once on the way in ([`Points::from_f64`]) and once on the
//! way out ([`Points::to_f64`]).

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Number of micros in one point.
pub const MICROS_PER_POINT: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PointsError {
    #[error("empty amount")]
    Empty,
    #[error("negative amount not allowed")]
    Negative,
    #[error("invalid decimal format: {0}")]
    Format(String),
    #[error("too many decimals (max 6)")]
    TooPrecise,
    #[error("amount is not a finite number")]
    NotFinite,
    #[error("amount overflow")]
    Overflow,
}

/// A loyalty amount at 1e-6 scale.
///
/// There is intentionally no `From<i64>`: raw integers become amounts only
/// through [`Points::new`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);

    #[inline]
    pub const fn new(micros: i64) -> Self {
        Points(micros)
    }

    /// Whole points, for tests and fixtures.
    #[inline]
    pub const fn whole(points: i64) -> Self {
        Points(points * MICROS_PER_POINT)
    }

    #[inline]
    pub const fn micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Points) -> Option<Points> {
        self.0.checked_add(rhs.0).map(Points)
    }

    pub fn checked_sub(self, rhs: Points) -> Option<Points> {
        self.0.checked_sub(rhs.0).map(Points)
    }

    /// Parse a decimal string deterministically. Accepts an optional `+`,
    /// rejects negatives and anything finer than micros.
    pub fn parse_decimal(s: &str) -> Result<Points, PointsError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PointsError::Empty);
        }
        let s = s.strip_prefix('+').unwrap_or(s);
        if s.starts_with('-') {
            return Err(PointsError::Negative);
        }

        let mut parts = s.split('.');
        let int_part = parts.next().unwrap_or("0");
        let frac_part = parts.next();
        if parts.next().is_some() {
            return Err(PointsError::Format(s.to_string()));
        }
        if int_part.is_empty() && frac_part.map_or(true, str::is_empty) {
            return Err(PointsError::Format(s.to_string()));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(PointsError::Format(s.to_string()));
        }

        let int_val: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| PointsError::Overflow)?
        };

        let frac_val: i64 = match frac_part {
            None | Some("") => 0,
            Some(frac) => {
                if !frac.chars().all(|c| c.is_ascii_digit()) {
                    return Err(PointsError::Format(s.to_string()));
                }
                if frac.len() > 6 {
                    return Err(PointsError::TooPrecise);
                }
                let padded = format!("{frac:0<6}");
                padded
                    .parse()
                    .map_err(|_| PointsError::Format(s.to_string()))?
            }
        };

        int_val
            .checked_mul(MICROS_PER_POINT)
            .and_then(|v| v.checked_add(frac_val))
            .map(Points)
            .ok_or(PointsError::Overflow)
    }

    /// Convert a JSON number, rounding to the nearest micro.
    pub fn from_f64(v: f64) -> Result<Points, PointsError> {
        if !v.is_finite() {
            return Err(PointsError::NotFinite);
        }
        if v < 0.0 {
            return Err(PointsError::Negative);
        }
        let scaled = (v * MICROS_PER_POINT as f64).round();
        if scaled >= i64::MAX as f64 {
            return Err(PointsError::Overflow);
        }
        Ok(Points(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_POINT as f64
    }
}

/// Saturating. Use `checked_add` where an overflow must be reported.
impl Add for Points {
    type Output = Points;
    #[inline]
    fn add(self, rhs: Points) -> Points {
        Points(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Points {
    #[inline]
    fn add_assign(&mut self, rhs: Points) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MICROS_PER_POINT;
        let frac = (self.0 % MICROS_PER_POINT).abs();
        if self.0 < 0 && whole == 0 {
            write!(f, "-{whole}.{frac:06}")
        } else {
            write!(f, "{whole}.{frac:06}")
        }
    }
}

impl Serialize for Points {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = f64::deserialize(deserializer)?;
        Points::from_f64(v).map_err(serde::de::Error::custom)
    }
}
