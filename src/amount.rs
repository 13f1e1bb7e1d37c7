use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;

pub const BTC_DECIMALS: u8 = 8;
pub const ICY_DECIMALS: u8 = 18;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid integer amount: {0}")]
    InvalidInteger(String),
    #[error("invalid decimal amount: {0}")]
    InvalidDecimal(String),
    #[error("amount {0} has more than {1} fractional digits")]
    TooPrecise(String, u8),
    #[error("amount overflow")]
    Overflow,
}

/// Token amount in base units together with its decimal exponent.
///
/// `value = 98000, decimals = 8` is 0.00098 BTC. Arithmetic is integer only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    pub value: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn new(value: U256, decimals: u8) -> Self {
        Self { value, decimals }
    }

    pub fn sats(value: u64) -> Self {
        Self::new(U256::from(value), BTC_DECIMALS)
    }

    pub fn icy(value: U256) -> Self {
        Self::new(value, ICY_DECIMALS)
    }

    pub fn zero(decimals: u8) -> Self {
        Self::new(U256::ZERO, decimals)
    }

    /// Parses an integer string of base units, the format amounts are stored in.
    pub fn from_base_units(s: &str, decimals: u8) -> Result<Self, AmountError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidInteger(s.to_owned()));
        }
        let value = U256::from_str_radix(trimmed, 10)
            .map_err(|_| AmountError::InvalidInteger(s.to_owned()))?;
        Ok(Self::new(value, decimals))
    }

    /// Parses a human readable decimal ("0.00098") into base units.
    pub fn parse_decimal(s: &str, decimals: u8) -> Result<Self, AmountError> {
        let (int_part, frac_part) = split_decimal(s)?;
        if frac_part.len() > decimals as usize {
            return Err(AmountError::TooPrecise(s.to_owned(), decimals));
        }
        let mut digits = String::with_capacity(int_part.len() + decimals as usize);
        digits.push_str(int_part);
        digits.push_str(frac_part);
        for _ in frac_part.len()..decimals as usize {
            digits.push('0');
        }
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(Self::zero(decimals));
        }
        let value =
            U256::from_str_radix(digits, 10).map_err(|_| AmountError::InvalidDecimal(s.to_owned()))?;
        Ok(Self::new(value, decimals))
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn to_sats(&self) -> Option<u64> {
        if self.decimals != BTC_DECIMALS {
            return None;
        }
        u64::try_from(self.value).ok()
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.decimals != other.decimals {
            return None;
        }
        self.value
            .checked_sub(other.value)
            .map(|value| Amount::new(value, self.decimals))
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        if self.decimals != other.decimals {
            return None;
        }
        self.value
            .checked_add(other.value)
            .map(|value| Amount::new(value, self.decimals))
    }

    /// Base units as a decimal integer string.
    pub fn to_base_units(&self) -> String {
        self.value.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.value.to_string();
        let decimals = self.decimals as usize;
        if decimals == 0 {
            return f.write_str(&digits);
        }
        let padded = if digits.len() <= decimals {
            format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
        write!(f, "{}.{}", int_part, frac_part)
    }
}

/// Fee rate as an exact decimal fraction: `numerator / 10^scale`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeRate {
    numerator: U256,
    scale: u32,
}

impl FeeRate {
    pub fn parse(s: &str) -> Result<Self, AmountError> {
        let (int_part, frac_part) = split_decimal(s)?;
        let scale = frac_part.len() as u32;
        let digits = format!("{}{}", int_part, frac_part);
        let digits = digits.trim_start_matches('0');
        let numerator = if digits.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(digits, 10)
                .map_err(|_| AmountError::InvalidDecimal(s.to_owned()))?
        };
        Ok(Self { numerator, scale })
    }

    /// `floor(value * rate)`, computed as `value * numerator / 10^scale`.
    pub fn apply_floor(&self, value: U256) -> Result<U256, AmountError> {
        let denominator = U256::from(10u64).pow(U256::from(self.scale));
        let product = value
            .checked_mul(self.numerator)
            .ok_or(AmountError::Overflow)?;
        Ok(product / denominator)
    }
}

impl FromStr for FeeRate {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Amount::new(self.numerator, self.scale as u8))
    }
}

fn split_decimal(s: &str) -> Result<(&str, &str), AmountError> {
    let trimmed = s.trim();
    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    let valid = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
        return Err(AmountError::InvalidDecimal(s.to_owned()));
    }
    Ok((int_part, frac_part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_into_base_units() {
        let a = Amount::parse_decimal("0.00098", BTC_DECIMALS).unwrap();
        assert_eq!(a.to_sats(), Some(98_000));

        let icy = Amount::parse_decimal("12.5", ICY_DECIMALS).unwrap();
        assert_eq!(icy.to_base_units(), "12500000000000000000");
    }

    #[test]
    fn rejects_excess_precision_and_garbage() {
        assert_eq!(
            Amount::parse_decimal("0.000000001", BTC_DECIMALS),
            Err(AmountError::TooPrecise("0.000000001".into(), 8))
        );
        assert!(Amount::parse_decimal("1e-3", BTC_DECIMALS).is_err());
        assert!(Amount::parse_decimal("-1", BTC_DECIMALS).is_err());
        assert!(Amount::from_base_units("12.3", BTC_DECIMALS).is_err());
    }

    #[test]
    fn display_pads_fraction() {
        assert_eq!(Amount::sats(98_000).to_string(), "0.00098000");
        assert_eq!(Amount::sats(150_000_000).to_string(), "1.50000000");
    }

    #[test]
    fn fee_rate_floors_without_floats() {
        let rate = FeeRate::parse("0.01").unwrap();
        assert_eq!(rate.apply_floor(U256::from(500_000u64)).unwrap(), U256::from(5_000u64));
        assert_eq!(rate.apply_floor(U256::from(199u64)).unwrap(), U256::from(1u64));

        // 0.1 is not representable as a binary float; the rational form is exact.
        let rate = FeeRate::parse("0.1").unwrap();
        assert_eq!(rate.apply_floor(U256::from(30u64)).unwrap(), U256::from(3u64));
    }

    #[test]
    fn subtraction_requires_matching_decimals() {
        let sats = Amount::sats(10);
        let icy = Amount::icy(U256::from(1u64));
        assert!(sats.checked_sub(&icy).is_none());
        assert!(Amount::sats(1).checked_sub(&Amount::sats(2)).is_none());
        assert_eq!(Amount::sats(5).checked_sub(&Amount::sats(2)), Some(Amount::sats(3)));
    }
}
