//! Currency codes.
//!
//! A `CurrencyCode` is a validated ISO-4217-shaped code (three ASCII
//! letters, stored uppercase). Validation rules per currency live in the
//! rule table (mpe-validation); this type only guarantees shape so the rest
//! of the system can key tables by currency without re-checking.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyCode([u8; 3]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCurrency(pub String);

impl fmt::Display for InvalidCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid currency code: {:?}", self.0)
    }
}

impl std::error::Error for InvalidCurrency {}

impl CurrencyCode {
    /// Parse and uppercase a three-letter code.
    pub fn new(code: &str) -> Result<Self, InvalidCurrency> {
        let t = code.trim();
        let bytes = t.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(InvalidCurrency(code.to_string()));
        }
        let mut out = [0u8; 3];
        for (i, b) in bytes.iter().enumerate() {
            out[i] = b.to_ascii_uppercase();
        }
        Ok(CurrencyCode(out))
    }

    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII letters only.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CurrencyCode {
    type Err = InvalidCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CurrencyCode::new(s)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
