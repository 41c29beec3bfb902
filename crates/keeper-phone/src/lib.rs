//! Phone-number canonicalization primitives.
//!
//! Remote directories, device phonebooks, and chat handles all carry the same
//! number in different shapes (`+2348051378960`, `08051378960`,
//! `2348051378960`). [`PhoneKey`] is the canonical digit-only form used as the
//! ledger key; [`FuzzyKey`] is the truncated-suffix join key used to match
//! records across sources that disagree on country-code formatting. Both
//! derivations are pure and deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Digits retained by the fuzzy suffix key.
pub const FUZZY_KEY_SUFFIX_DIGITS: usize = 9;
/// Fuzzy keys shorter than this are too ambiguous to join on.
pub const FUZZY_KEY_MIN_TRUSTED_DIGITS: usize = 7;

const PHONE_KEY_MIN_DIGITS: usize = 8;
const PHONE_KEY_MAX_DIGITS: usize = 15;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhoneNumberError {
    #[error("invalid number: no digits in '{0}'")]
    NoDigits(String),
    #[error("invalid number: '{raw}' has {digits} digits, expected {min}-{max}")]
    BadLength {
        raw: String,
        digits: usize,
        min: usize,
        max: usize,
    },
}

/// Canonical digit-only phone number, 8-15 digits, leading trunk zero trimmed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneKey(String);

impl PhoneKey {
    /// Derives the canonical key from any raw representation.
    ///
    /// Strips every non-digit, trims at most one leading zero, and requires
    /// 8-15 remaining digits. Idempotent: canonicalizing a canonical key
    /// returns it unchanged.
    pub fn canonicalize(raw: &str) -> Result<Self, PhoneNumberError> {
        let mut digits = strip_non_digits(raw);
        if digits.is_empty() {
            return Err(PhoneNumberError::NoDigits(raw.to_string()));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            digits.remove(0);
        }
        if digits.len() < PHONE_KEY_MIN_DIGITS || digits.len() > PHONE_KEY_MAX_DIGITS {
            return Err(PhoneNumberError::BadLength {
                raw: raw.to_string(),
                digits: digits.len(),
                min: PHONE_KEY_MIN_DIGITS,
                max: PHONE_KEY_MAX_DIGITS,
            });
        }
        Ok(PhoneKey(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fuzzy join key for this canonical number.
    pub fn fuzzy(&self) -> FuzzyKey {
        fuzzy_suffix(&self.0)
    }
}

impl fmt::Display for PhoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PhoneKey {
    type Err = PhoneNumberError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PhoneKey::canonicalize(value)
    }
}

/// Last-9-digit suffix of a number after discarding leading zeros.
///
/// Two differently-formatted copies of one number share a fuzzy key as long
/// as their trailing digits agree, which is how cross-provider joins work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuzzyKey(String);

impl FuzzyKey {
    /// Derives a fuzzy key directly from a raw representation, without
    /// requiring the number to pass canonical length rules. Remote records
    /// with short or local-format numbers still get a key; callers gate on
    /// [`FuzzyKey::is_trusted`] before joining on it.
    pub fn from_raw(raw: &str) -> Result<Self, PhoneNumberError> {
        let digits = strip_non_digits(raw);
        let significant = digits.trim_start_matches('0');
        if significant.is_empty() {
            return Err(PhoneNumberError::NoDigits(raw.to_string()));
        }
        Ok(fuzzy_suffix(significant))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digit_count(&self) -> usize {
        self.0.len()
    }

    /// Whether this key is long enough to be used as a join key.
    pub fn is_trusted(&self) -> bool {
        self.0.len() >= FUZZY_KEY_MIN_TRUSTED_DIGITS
    }
}

impl fmt::Display for FuzzyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_non_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn fuzzy_suffix(digits: &str) -> FuzzyKey {
    let significant = digits.trim_start_matches('0');
    let start = significant.len().saturating_sub(FUZZY_KEY_SUFFIX_DIGITS);
    FuzzyKey(significant[start..].to_string())
}

/// Returns true when the handle fragment already looks like a phone number.
pub fn looks_phone_shaped(raw: &str) -> bool {
    let digits = strip_non_digits(raw);
    digits.len() >= PHONE_KEY_MIN_DIGITS
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
}
