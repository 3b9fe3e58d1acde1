//! Exact conversion between major units ("10.5 tokens") and the integer
//! minor units the token program works in.

use std::fmt;

use crate::error::LedgerError;

/// Number of minor units in one major unit, `None` on overflow.
pub fn minor_units_per_major(decimals: u8) -> Option<u64> {
    10u64.checked_pow(u32::from(decimals))
}

/// A token quantity in minor units together with the mint's decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    minor: u64,
    decimals: u8,
}

impl TokenAmount {
    pub fn from_minor(minor: u64, decimals: u8) -> Self {
        Self { minor, decimals }
    }

    /// Whole major units, e.g. `from_major(10, 2)` is 1000 minor units.
    pub fn from_major(major: u64, decimals: u8) -> Result<Self, LedgerError> {
        minor_units_per_major(decimals)
            .and_then(|per| major.checked_mul(per))
            .map(|minor| Self { minor, decimals })
            .ok_or_else(|| {
                LedgerError::InvalidInput(format!("{major} overflows at {decimals} decimals"))
            })
    }

    /// Parse a decimal string such as `"10"`, `"10.5"` or `"0.01"`.
    ///
    /// More fractional digits than the mint supports is an error, never a
    /// silent truncation.
    pub fn parse(input: &str, decimals: u8) -> Result<Self, LedgerError> {
        let invalid = |why: &str| LedgerError::InvalidInput(format!("amount '{input}': {why}"));
        let trimmed = input.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("empty"));
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("not a non-negative decimal number"));
        }
        if fraction.len() > usize::from(decimals) {
            return Err(invalid(&format!("more than {decimals} decimal places")));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("too large"))?
        };
        let padded = format!("{fraction:0<width$}", width = usize::from(decimals));
        let fraction: u64 = if padded.is_empty() {
            0
        } else {
            padded.parse().map_err(|_| invalid("too large"))?
        };

        minor_units_per_major(decimals)
            .and_then(|per| whole.checked_mul(per))
            .and_then(|m| m.checked_add(fraction))
            .map(|minor| Self { minor, decimals })
            .ok_or_else(|| invalid("too large"))
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.decimals == 0 {
            return write!(f, "{}", self.minor);
        }
        let per = minor_units_per_major(self.decimals).unwrap_or(u64::MAX);
        write!(
            f,
            "{}.{:0width$}",
            self.minor / per,
            self.minor % per,
            width = usize::from(self.decimals)
        )
    }
}
