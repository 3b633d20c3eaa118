//! Exact decimal numbers for the DynamoDB `N` type.
//!
//! DynamoDB numbers carry up to 38 significant digits with a magnitude between
//! `1E-130` and `9.99...E+125`. They travel as strings on the wire and are
//! compared here as exact decimals, never through binary floating point.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Maximum number of significant digits a stored number may carry.
pub const MAX_SIGNIFICANT_DIGITS: usize = 38;

/// Largest allowed base-10 magnitude (exponent of the leading digit).
pub const MAX_MAGNITUDE: i64 = 125;

/// Smallest allowed base-10 magnitude (exponent of the leading digit).
pub const MIN_MAGNITUDE: i64 = -130;

/// Parsed exponents are clamped to `-EXPONENT_CLAMP..=EXPONENT_CLAMP`, far
/// outside the supported magnitude range.
const EXPONENT_CLAMP: i64 = 1 << 40;

/// Errors produced while parsing a DynamoDB number literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NumberError {
    /// The literal was empty.
    #[error("The parameter cannot be converted to a numeric value")]
    Empty,
    /// The literal is not a decimal number.
    #[error("The parameter cannot be converted to a numeric value: {0}")]
    Invalid(String),
    /// More than 38 significant digits.
    #[error("Attempting to store more than 38 significant digits in a Number")]
    TooManyDigits,
    /// Magnitude above the supported range.
    #[error(
        "Number overflow. Attempting to store a number with magnitude larger than supported range"
    )]
    Overflow,
    /// Magnitude below the supported range.
    #[error(
        "Number underflow. Attempting to store a number with magnitude smaller than supported range"
    )]
    Underflow,
}

/// A normalized exact decimal.
///
/// The value is `0.d1 d2 ... dn x 10^exponent` where `d1` and `dn` are
/// non-zero. Zero has no digits, a zero exponent and a positive sign, so the
/// derived `PartialEq`/`Hash` coincide with numeric equality (`2 == 2.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Number {
    negative: bool,
    digits: Vec<u8>,
    exponent: i64,
}

impl Number {
    /// The number zero.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            negative: false,
            digits: Vec::new(),
            exponent: 0,
        }
    }

    /// Parse and range-check a DynamoDB number literal.
    pub fn parse(input: &str) -> Result<Self, NumberError> {
        let number = Self::parse_unchecked(input)?;
        number.check_range()?;
        Ok(number)
    }

    /// Parse a decimal literal without enforcing DynamoDB's precision and
    /// magnitude limits.
    pub fn parse_unchecked(input: &str) -> Result<Self, NumberError> {
        if input.is_empty() {
            return Err(NumberError::Empty);
        }
        let invalid = || NumberError::Invalid(input.to_owned());

        let (negative, unsigned) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let (mantissa, explicit_exponent) = match unsigned.find(['e', 'E']) {
            Some(pos) => {
                let exp = parse_exponent(&unsigned[pos + 1..]).ok_or_else(invalid)?;
                (&unsigned[..pos], exp)
            }
            None => (unsigned, 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let all: Vec<u8> = int_part
            .bytes()
            .chain(frac_part.bytes())
            .map(|b| b - b'0')
            .collect();
        let Some(first) = all.iter().position(|d| *d != 0) else {
            return Ok(Self::zero());
        };
        let last = all.iter().rposition(|d| *d != 0).unwrap_or(first);

        let int_len = i64::try_from(int_part.len()).map_err(|_| invalid())?;
        let leading = i64::try_from(first).map_err(|_| invalid())?;
        let exponent = explicit_exponent
            .saturating_add(int_len)
            .saturating_sub(leading)
            .clamp(-EXPONENT_CLAMP, EXPONENT_CLAMP);

        Ok(Self {
            negative,
            digits: all[first..=last].to_vec(),
            exponent,
        })
    }

    fn check_range(&self) -> Result<(), NumberError> {
        if self.is_zero() {
            return Ok(());
        }
        if self.digits.len() > MAX_SIGNIFICANT_DIGITS {
            return Err(NumberError::TooManyDigits);
        }
        let magnitude = self.exponent.saturating_sub(1);
        if magnitude > MAX_MAGNITUDE {
            return Err(NumberError::Overflow);
        }
        if magnitude < MIN_MAGNITUDE {
            return Err(NumberError::Underflow);
        }
        Ok(())
    }

    /// Returns `true` for zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    /// Returns `true` for values strictly below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Number of significant digits (zero has none).
    #[must_use]
    pub fn significant_digits(&self) -> usize {
        self.digits.len()
    }

    /// Base-10 exponent of the leading digit, `None` for zero.
    #[must_use]
    pub fn magnitude(&self) -> Option<i64> {
        (!self.is_zero()).then_some(self.exponent.saturating_sub(1))
    }

    fn signum(&self) -> i8 {
        match (self.is_zero(), self.negative) {
            (true, _) => 0,
            (false, true) => -1,
            (false, false) => 1,
        }
    }

    fn cmp_abs(&self, other: &Self) -> Ordering {
        self.exponent
            .cmp(&other.exponent)
            .then_with(|| self.digits.cmp(&other.digits))
    }
}

impl Default for Number {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        if value == 0 {
            return Self::zero();
        }
        let mut digits: Vec<u8> = value.to_string().bytes().map(|b| b - b'0').collect();
        let exponent = i64::try_from(digits.len()).unwrap_or(i64::MAX);
        while digits.last() == Some(&0) {
            digits.pop();
        }
        Self {
            negative: false,
            digits,
            exponent,
        }
    }
}

impl FromStr for Number {
    type Err = NumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.signum().cmp(&other.signum()) {
            Ordering::Equal => match self.signum() {
                0 => Ordering::Equal,
                1 => self.cmp_abs(other),
                _ => other.cmp_abs(self),
            },
            unequal => unequal,
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Canonical scientific rendering: `0`, `2E0`, `-5E-1`, `1.23E2`.
///
/// Equal numbers always render identically, which makes this form suitable
/// as hashing input.
impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((first, rest)) = self.digits.split_first() else {
            return f.write_str("0");
        };
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{first}")?;
        if !rest.is_empty() {
            f.write_str(".")?;
            for d in rest {
                write!(f, "{d}")?;
            }
        }
        write!(f, "E{}", self.exponent.saturating_sub(1))
    }
}

/// Parse an exponent literal: an optional sign followed by digits. Literals
/// too long for `i64` saturate toward their sign.
fn parse_exponent(text: &str) -> Option<i64> {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let exponent = text.parse::<i64>().unwrap_or(if text.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    });
    Some(exponent.clamp(-EXPONENT_CLAMP, EXPONENT_CLAMP))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Number {
        Number::parse(s).unwrap()
    }

    #[test]
    fn test_should_treat_trailing_zeros_as_equal() {
        assert_eq!(num("2"), num("2.0"));
        assert_eq!(num("2"), num("0.2e1"));
        assert_eq!(num("100"), num("1E2"));
        assert_eq!(num("-0"), num("0.000"));
    }

    #[test]
    fn test_should_order_numerically() {
        assert!(num("-10") < num("-2"));
        assert!(num("-2") < num("0"));
        assert!(num("0") < num("0.001"));
        assert!(num("0.5") < num("0.55"));
        assert!(num("9") < num("10"));
        assert!(num("1e-130") < num("1e125"));
        assert_eq!(num("12.5").cmp(&num("1.25E1")), Ordering::Equal);
    }

    #[test]
    fn test_should_render_canonical_form() {
        assert_eq!(num("2.0").to_string(), "2E0");
        assert_eq!(num("-0.5").to_string(), "-5E-1");
        assert_eq!(num("123").to_string(), "1.23E2");
        assert_eq!(num("-0").to_string(), "0");
        assert_eq!(num("+007.10").to_string(), "7.1E0");
    }

    #[test]
    fn test_should_accept_partial_mantissas() {
        assert_eq!(num(".5"), num("0.5"));
        assert_eq!(num("5."), num("5"));
    }

    #[test]
    fn test_should_reject_malformed_literals() {
        for input in ["abc", "1.2.3", "--1", "1e", "e5", ".", " 1", "1 ", "0x10", "1e1.5"] {
            assert_eq!(
                Number::parse(input),
                Err(NumberError::Invalid(input.to_owned())),
                "{input}"
            );
        }
        assert_eq!(Number::parse(""), Err(NumberError::Empty));
        assert_eq!(
            NumberError::Invalid("abc".to_owned()).to_string(),
            "The parameter cannot be converted to a numeric value: abc"
        );
        assert_eq!(
            NumberError::Empty.to_string(),
            "The parameter cannot be converted to a numeric value"
        );
    }

    #[test]
    fn test_should_enforce_significant_digits() {
        let ok = "1".repeat(38);
        assert!(Number::parse(&ok).is_ok());
        let too_many = "1".repeat(39);
        assert_eq!(Number::parse(&too_many), Err(NumberError::TooManyDigits));
        // Trailing zeros are not significant.
        let padded = format!("{ok}000");
        assert!(Number::parse(&padded).is_ok());
    }

    #[test]
    fn test_should_enforce_magnitude_bounds() {
        assert!(Number::parse("9.9999999999999999999999999999999999999E+125").is_ok());
        assert_eq!(Number::parse("1E126"), Err(NumberError::Overflow));
        assert!(Number::parse("1E-130").is_ok());
        assert_eq!(Number::parse("1E-131"), Err(NumberError::Underflow));
        assert_eq!(Number::parse("-1E126"), Err(NumberError::Overflow));
        assert!(Number::parse("0E999").is_ok());
    }

    #[test]
    fn test_should_range_check_extreme_exponents() {
        assert_eq!(
            Number::parse("0.1e-9223372036854775808"),
            Err(NumberError::Underflow)
        );
        assert_eq!(
            Number::parse("12e9223372036854775807"),
            Err(NumberError::Overflow)
        );
        assert_eq!(
            Number::parse("1e99999999999999999999"),
            Err(NumberError::Overflow)
        );
        assert_eq!(
            Number::parse("-1e-99999999999999999999"),
            Err(NumberError::Underflow)
        );
        assert!(Number::parse("0e99999999999999999999").is_ok());

        let tiny = Number::parse_unchecked("0.001e-9223372036854775808").unwrap();
        assert!(tiny.magnitude().is_some_and(|m| m < MIN_MAGNITUDE));
        assert!(tiny.to_string().starts_with("1E-"));
        assert!(tiny < Number::parse("1E-130").unwrap());
    }

    #[test]
    fn test_should_convert_counts() {
        assert_eq!(Number::from(0), Number::zero());
        assert_eq!(Number::from(120), num("120"));
        assert_eq!(Number::from(7).magnitude(), Some(0));
    }
}
