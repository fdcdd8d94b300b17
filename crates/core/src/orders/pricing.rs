use rust_decimal::{Decimal, RoundingStrategy};

/// Renders amounts for customer-facing text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoneyFormat {
    symbol: String,
}

impl Default for MoneyFormat {
    fn default() -> Self {
        Self::new("$")
    }
}

impl MoneyFormat {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into() }
    }

    /// Whole amounts print without decimals (`$2800`), others with two (`$12.50`).
    pub fn format(&self, amount: Decimal) -> String {
        let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        if rounded.fract().is_zero() {
            format!("{}{}", self.symbol, rounded.trunc())
        } else {
            format!("{}{:.2}", self.symbol, rounded)
        }
    }
}
