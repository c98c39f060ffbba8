//! Order identifier validation (mod-10 / Luhn checksum).
//!
//! Both orders and withdrawals are keyed by an order-shaped number. The only
//! way to obtain an [`OrderNumber`] is [`OrderNumber::parse`], so a value of
//! this type has always passed the checksum.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a candidate order number was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderNumberError {
    #[error("order number is empty")]
    Empty,
    #[error("order number must contain at least two digits")]
    TooShort,
    #[error("order number contains a non-digit character at byte {0}")]
    NonDigit(usize),
    #[error("order number fails the checksum")]
    Checksum,
}

/// Returns `true` if `s` is a digit string of length >= 2 whose Luhn sum is
/// divisible by 10.
///
/// Digits are read right-to-left; every second digit is doubled and reduced
/// by 9 when the doubled value exceeds 9.
pub fn luhn_valid(s: &str) -> bool {
    check(s).is_ok()
}

fn check(s: &str) -> Result<(), OrderNumberError> {
    if s.is_empty() {
        return Err(OrderNumberError::Empty);
    }
    if let Some(pos) = s.bytes().position(|b| !b.is_ascii_digit()) {
        return Err(OrderNumberError::NonDigit(pos));
    }
    if s.len() < 2 {
        return Err(OrderNumberError::TooShort);
    }

    let mut sum: u64 = 0;
    for (i, b) in s.bytes().rev().enumerate() {
        let mut d = u64::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    if sum % 10 == 0 {
        Ok(())
    } else {
        Err(OrderNumberError::Checksum)
    }
}

/// A checksum-valid order number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Validate a raw identifier. Surrounding whitespace is ignored (request
    /// bodies frequently end with a newline).
    pub fn parse(raw: &str) -> Result<Self, OrderNumberError> {
        let t = raw.trim();
        check(t)?;
        Ok(OrderNumber(t.to_string()))
    }

    /// Append the Luhn check digit to a digit payload. Used by fixtures and
    /// load tools that need fresh valid numbers.
    pub fn with_check_digit(payload: &str) -> Result<Self, OrderNumberError> {
        if payload.is_empty() {
            return Err(OrderNumberError::Empty);
        }
        if let Some(pos) = payload.bytes().position(|b| !b.is_ascii_digit()) {
            return Err(OrderNumberError::NonDigit(pos));
        }
        // With the check digit appended, payload digits at even offsets from
        // the right are the doubled ones.
        let mut sum: u64 = 0;
        for (i, b) in payload.bytes().rev().enumerate() {
            let mut d = u64::from(b - b'0');
            if i % 2 == 0 {
                d *= 2;
                if d > 9 {
                    d -= 9;
                }
            }
            sum += d;
        }
        let check = (10 - sum % 10) % 10;
        Ok(OrderNumber(format!("{payload}{check}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        OrderNumber::parse(&raw).map_err(serde::de::Error::custom)
    }
}
