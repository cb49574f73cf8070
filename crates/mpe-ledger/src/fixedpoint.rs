//! Fixed-point payment amounts.
//!
//! # Motivation
//!
//! All monetary amounts in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`. Using raw `i64` for money is error-prone:
//! it allows accidental arithmetic with unrelated integers (row ordinals,
//! counts, IDs) without any compile-time signal, and floating point is ruled
//! out entirely for payment values.
//!
//! `Amount` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Amount` with unrelated `i64` values in arithmetic.
//!
//! # Scale
//!
//! 1 currency unit = 1_000_000 micros. Payment amounts are always
//! non-negative; signs only appear transiently inside ledger arithmetic,
//! which is why construction goes through checked parsing.
//!
//! # Arithmetic
//!
//! Addition is checked (`checked_add`) because instruction totals for a
//! 10,000-row file are summed from untrusted input; overflow there is a
//! validation failure, not a routine saturation.

use std::fmt;
use std::str::FromStr;

/// Micros per whole currency unit.
pub const AMOUNT_SCALE: i64 = 1_000_000;

/// A non-negative fixed-point monetary amount at 1e-6 scale.
///
/// # Construction
///
/// Use [`Amount::from_micros`] when the raw integer is known to be a
/// monetary value at micros scale, or [`Amount::from_str`] /
/// [`Amount::parse`] for decimal strings coming off an intake row
/// (`"1234.56"`, at most six fractional digits).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

/// Why a decimal string failed to parse as an [`Amount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountParseError {
    Empty,
    /// Anything other than digits and a single decimal point.
    Malformed,
    /// More than six fractional digits.
    TooPrecise,
    Negative,
    /// The value does not fit in i64 micros.
    Overflow,
}

impl fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "amount is empty"),
            Self::Malformed => write!(f, "amount is not a decimal number"),
            Self::TooPrecise => write!(f, "amount has more than 6 fractional digits"),
            Self::Negative => write!(f, "amount must not be negative"),
            Self::Overflow => write!(f, "amount is too large"),
        }
    }
}

impl std::error::Error for AmountParseError {}

impl Amount {
    /// Zero monetary amount.
    pub const ZERO: Amount = Amount(0);

    /// Maximum representable value.
    pub const MAX: Amount = Amount(i64::MAX);

    /// Construct from raw micros. Negative inputs are clamped out by
    /// returning `None`; payment amounts are never negative.
    #[inline]
    pub const fn from_micros(raw: i64) -> Option<Self> {
        if raw < 0 {
            None
        } else {
            Some(Amount(raw))
        }
    }

    /// Construct from whole currency units (convenience for tests/config).
    #[inline]
    pub const fn from_units(units: i64) -> Option<Self> {
        if units < 0 || units > i64::MAX / AMOUNT_SCALE {
            None
        } else {
            Some(Amount(units * AMOUNT_SCALE))
        }
    }

    /// Extract the underlying raw micros.
    #[inline]
    pub const fn micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition — `None` on overflow.
    #[inline]
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Checked subtraction — `None` when `rhs > self` (amounts stay
    /// non-negative).
    #[inline]
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        if rhs.0 > self.0 {
            None
        } else {
            Some(Amount(self.0 - rhs.0))
        }
    }

    /// Sum an iterator of amounts with overflow detection.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(iter: I) -> Option<Amount> {
        let mut acc = Amount::ZERO;
        for a in iter {
            acc = acc.checked_add(a)?;
        }
        Some(acc)
    }

    /// Parse a decimal string (`"1234"`, `"1234.56"`). At most six
    /// fractional digits; no sign, no exponent, no grouping separators.
    pub fn parse(s: &str) -> Result<Self, AmountParseError> {
        let t = s.trim();
        if t.is_empty() {
            return Err(AmountParseError::Empty);
        }
        if t.starts_with('-') {
            return Err(AmountParseError::Negative);
        }
        let (int_part, frac_part) = match t.split_once('.') {
            Some((i, f)) => (i, f),
            None => (t, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(AmountParseError::Malformed);
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountParseError::Malformed);
        }
        if frac_part.len() > 6 {
            return Err(AmountParseError::TooPrecise);
        }

        let units: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| AmountParseError::Overflow)?
        };
        let mut frac_micros: i64 = 0;
        if !frac_part.is_empty() {
            let padded = format!("{frac_part:0<6}");
            frac_micros = padded.parse().map_err(|_| AmountParseError::Overflow)?;
        }

        units
            .checked_mul(AMOUNT_SCALE)
            .and_then(|m| m.checked_add(frac_micros))
            .map(Amount)
            .ok_or(AmountParseError::Overflow)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / AMOUNT_SCALE;
        let frac = self.0 % AMOUNT_SCALE;
        write!(f, "{units}.{frac:06}")
    }
}
