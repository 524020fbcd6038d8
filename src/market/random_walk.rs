//! Seeded random-walk quote generator for the demo and paper-live modes.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Quote;

use super::QuoteFeed;

/// Mid-price random walk: each quote moves the mid by -1, 0, or +1
/// step. Deterministic for a given seed.
pub struct RandomWalkFeed {
    mid: Decimal,
    spread: Decimal,
    step: Decimal,
    ts: u64,
    interval_ns: u64,
    remaining: Option<u64>,
    rng: StdRng,
}

impl RandomWalkFeed {
    pub fn new(
        start_mid: Decimal,
        spread: Decimal,
        step: Decimal,
        start_ts: u64,
        interval_ns: u64,
        seed: u64,
        limit: Option<u64>,
    ) -> Self {
        Self {
            mid: start_mid,
            spread,
            step,
            ts: start_ts,
            interval_ns,
            remaining: limit,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// EUR/USD-flavoured walk around 1.1045 with a 0.2-pip spread.
    pub fn eurusd(start_ts: u64, seed: u64, limit: Option<u64>) -> Self {
        Self::new(
            dec!(1.10450),
            dec!(0.00002),
            dec!(0.0001),
            start_ts,
            1_000_000_000,
            seed,
            limit,
        )
    }
}

#[async_trait]
impl QuoteFeed for RandomWalkFeed {
    async fn next_quote(&mut self) -> Option<Quote> {
        match self.remaining.as_mut() {
            Some(0) => return None,
            Some(n) => *n -= 1,
            None => {}
        }

        let drift: i32 = self.rng.gen_range(-1..=1);
        self.mid += self.step * Decimal::from(drift);
        // Keep the walk away from zero so bids stay positive.
        let floor = self.spread * dec!(2);
        if self.mid < floor {
            self.mid = floor;
        }

        self.ts += self.interval_ns;
        let half = self.spread / dec!(2);
        Some(Quote::new(self.mid - half, self.mid + half, self.ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_walk_is_deterministic_per_seed() {
        let mut a = RandomWalkFeed::eurusd(0, 7, Some(10));
        let mut b = RandomWalkFeed::eurusd(0, 7, Some(10));
        for _ in 0..10 {
            assert_eq!(a.next_quote().await, b.next_quote().await);
        }
        assert!(a.next_quote().await.is_none());
    }

    #[tokio::test]
    async fn test_timestamps_are_monotonic_and_spread_positive() {
        let mut feed = RandomWalkFeed::eurusd(0, 42, Some(50));
        let mut last_ts = 0;
        while let Some(q) = feed.next_quote().await {
            assert!(q.ts > last_ts);
            assert!(q.spread() > Decimal::ZERO);
            assert!(q.bid > Decimal::ZERO);
            last_ts = q.ts;
        }
    }
}
