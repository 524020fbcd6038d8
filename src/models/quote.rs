//! Top-of-book quote as delivered by the market data feed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Best bid/ask pair with a monotonic timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Best bid price in quote units
    pub bid: Decimal,

    /// Best ask price in quote units
    pub ask: Decimal,

    /// Monotonic timestamp, nanoseconds
    pub ts: u64,
}

impl Quote {
    pub fn new(bid: Decimal, ask: Decimal, ts: u64) -> Self {
        Self { bid, ask, ts }
    }

    /// Midpoint between bid and ask.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Current bid/ask spread.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mid_and_spread() {
        let q = Quote::new(dec!(1.10448), dec!(1.10452), 1);
        assert_eq!(q.mid(), dec!(1.10450));
        assert_eq!(q.spread(), dec!(0.00004));
    }
}
