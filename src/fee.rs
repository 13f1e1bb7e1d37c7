use alloy_primitives::U256;

use crate::amount::{Amount, AmountError, FeeRate, BTC_DECIMALS};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("price must be greater than zero")]
    ZeroPrice,
    #[error("subtotal must be denominated in satoshis")]
    NotSatoshis,
    #[error("service fee {fee} exceeds subtotal {subtotal}")]
    FeeExceedsSubtotal { subtotal: Amount, fee: Amount },
    #[error(transparent)]
    Amount(#[from] AmountError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeConfig {
    pub rate: FeeRate,
    pub min_fee_sats: u64,
}

/// Result of converting a subtotal into what the user actually receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quote {
    pub subtotal: Amount,
    pub service_fee: Amount,
    pub total: Amount,
}

/// Converts an ICY amount into satoshis. `price` is the ICY cost of one satoshi
/// expressed in ICY base units; the division truncates.
pub fn sat_amount(icy_amount: &Amount, price: &Amount) -> Result<Amount, FeeError> {
    if price.is_zero() {
        return Err(FeeError::ZeroPrice);
    }
    Ok(Amount::new(icy_amount.value / price.value, BTC_DECIMALS))
}

pub fn service_fee(subtotal: &Amount, cfg: &FeeConfig) -> Result<Amount, FeeError> {
    if subtotal.decimals != BTC_DECIMALS {
        return Err(FeeError::NotSatoshis);
    }
    let proportional = cfg.rate.apply_floor(subtotal.value)?;
    let fee = std::cmp::max(proportional, U256::from(cfg.min_fee_sats));
    Ok(Amount::new(fee, BTC_DECIMALS))
}

pub fn quote(subtotal: &Amount, cfg: &FeeConfig) -> Result<Quote, FeeError> {
    let fee = service_fee(subtotal, cfg)?;
    let total = subtotal
        .checked_sub(&fee)
        .ok_or(FeeError::FeeExceedsSubtotal {
            subtotal: *subtotal,
            fee,
        })?;
    Ok(Quote {
        subtotal: *subtotal,
        service_fee: fee,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::ICY_DECIMALS;

    fn cfg(rate: &str, min: u64) -> FeeConfig {
        FeeConfig {
            rate: FeeRate::parse(rate).unwrap(),
            min_fee_sats: min,
        }
    }

    #[test]
    fn minimum_fee_applies_to_small_subtotals() {
        let q = quote(&Amount::sats(100_000), &cfg("0.01", 2000)).unwrap();
        assert_eq!(q.service_fee, Amount::sats(2_000));
        assert_eq!(q.total, Amount::sats(98_000));
    }

    #[test]
    fn percentage_fee_applies_to_large_subtotals() {
        let q = quote(&Amount::sats(500_000), &cfg("0.01", 2000)).unwrap();
        assert_eq!(q.service_fee, Amount::sats(5_000));
        assert_eq!(q.total, Amount::sats(495_000));
    }

    #[test]
    fn fee_larger_than_subtotal_is_an_error() {
        let err = quote(&Amount::sats(1_500), &cfg("0.01", 2000)).unwrap_err();
        assert!(matches!(err, FeeError::FeeExceedsSubtotal { .. }));
    }

    #[test]
    fn subtotal_equal_to_fee_gives_zero_total() {
        let q = quote(&Amount::sats(2_000), &cfg("0.01", 2000)).unwrap();
        assert!(q.total.is_zero());
    }

    #[test]
    fn sat_amount_truncates() {
        // 1 sat costs 0.0035 ICY
        let price = Amount::parse_decimal("0.0035", ICY_DECIMALS).unwrap();
        let icy = Amount::parse_decimal("100", ICY_DECIMALS).unwrap();
        let sats = sat_amount(&icy, &price).unwrap();
        assert_eq!(sats.to_sats(), Some(28_571));
    }

    #[test]
    fn zero_price_is_rejected() {
        let icy = Amount::parse_decimal("1", ICY_DECIMALS).unwrap();
        assert_eq!(
            sat_amount(&icy, &Amount::zero(ICY_DECIMALS)),
            Err(FeeError::ZeroPrice)
        );
    }
}
