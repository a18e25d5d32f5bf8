use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits kept for every amount and balance.
pub const MONEY_SCALE: u32 = 2;

/// Format an amount as a plain two-decimal string.
/// Example: 50 -> "50.00", -12.345 -> "-12.35"
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(MONEY_SCALE);
    rounded.rescale(MONEY_SCALE);
    rounded.to_string()
}

/// Normalize an amount to the money scale, truncating extra digits.
pub fn normalize(amount: Decimal) -> Decimal {
    let mut truncated = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero);
    truncated.rescale(MONEY_SCALE);
    truncated
}

/// Parse a decimal string into an amount.
/// Example: "50.00" -> 50.00, "12.5" -> 12.50, "100.999" -> 100.99
pub fn parse_amount(input: &str) -> Result<Decimal, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::InvalidFormat);
    }
    // Accept ".50" the same way "0.50" is accepted
    let owned;
    let input = if let Some(rest) = input.strip_prefix('.') {
        owned = format!("0.{}", rest);
        owned.as_str()
    } else {
        input
    };

    let value = Decimal::from_str(input).map_err(|_| ParseAmountError::InvalidFormat)?;
    Ok(normalize(value))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    InvalidFormat,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::InvalidFormat => write!(f, "invalid money format"),
        }
    }
}

impl std::error::Error for ParseAmountError {}
