use alloy::primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use rust_decimal::Decimal;

use crate::models::{AggregationResult, TransferRecord};

/// Sums matched transfers and prices them at a fixed conversion rate.
#[derive(Debug, Clone)]
pub struct Aggregator {
    rate: BigDecimal,
    decimals: i64,
}

fn to_bigint(amount: &U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &amount.to_be_bytes::<32>())
}

/// Drop trailing fractional zeros without switching whole numbers to an
/// exponent form, so `48750` prints as `48750` rather than `4.875E+4`.
fn tidy(value: BigDecimal) -> BigDecimal {
    let value = value.normalized();
    if value.as_bigint_and_exponent().1 < 0 {
        value.with_scale(0)
    } else {
        value
    }
}

impl Aggregator {
    /// `decimals` is the token's base-unit exponent.
    pub fn new(rate: Decimal, decimals: u32) -> Self {
        // mantissa / 10^scale is the rate exactly
        let rate = BigDecimal::new(BigInt::from(rate.mantissa()), i64::from(rate.scale()));
        Self {
            rate,
            decimals: i64::from(decimals),
        }
    }

    /// Total of `records` in display units and its allocation. Arithmetic is
    /// arbitrary precision, so no input is too large and nothing is rounded.
    pub fn aggregate(&self, records: &[TransferRecord]) -> AggregationResult {
        // Sum in base units; display scaling happens once, on the total.
        let total: BigInt = records.iter().map(|r| to_bigint(&r.amount)).sum();

        let contribution = tidy(BigDecimal::new(total, self.decimals));
        let expected_allocation = tidy(&contribution * &self.rate);

        AggregationResult {
            contribution,
            expected_allocation,
        }
    }
}
