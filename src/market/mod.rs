//! Market data: quote feed interface and the bundled feed
//! implementations.

mod random_walk;
mod replay;

pub use random_walk::RandomWalkFeed;
pub use replay::ReplayFeed;

use async_trait::async_trait;

use crate::models::Quote;

/// Ordered, possibly gapped stream of quotes with monotonic timestamps.
/// `None` means the feed is exhausted.
#[async_trait]
pub trait QuoteFeed: Send {
    async fn next_quote(&mut self) -> Option<Quote>;
}
