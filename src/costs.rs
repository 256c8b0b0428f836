//! Cost estimation for analyzer token usage.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Blended USD price per token across input and output (≈ $3 / MTok).
pub const COST_PER_TOKEN: Decimal = dec!(0.000003);

/// Estimated spend for `tokens`, rounded to micro-dollars.
pub fn estimate_cost(tokens: u64) -> Decimal {
    (Decimal::from(tokens) * COST_PER_TOKEN).round_dp(6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(estimate_cost(0), Decimal::ZERO);
    }

    #[test]
    fn cost_scales_with_tokens() {
        assert_eq!(estimate_cost(1_000), dec!(0.003));
        assert_eq!(estimate_cost(1_000_000), dec!(3));
    }
}
