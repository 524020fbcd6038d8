//! Historical quote replay from CSV for backtests.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Quote;

use super::QuoteFeed;

/// Replays quotes from a `ts_ns,bid,ask` CSV file, optionally windowed
/// by wall-clock dates. Rows outside the window and header/comment
/// lines are skipped.
pub struct ReplayFeed {
    quotes: std::vec::IntoIter<Quote>,
}

impl ReplayFeed {
    pub fn from_quotes(quotes: Vec<Quote>) -> Self {
        Self {
            quotes: quotes.into_iter(),
        }
    }

    pub fn from_csv_path(
        path: impl AsRef<Path>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening quote file {}", path.display()))?;

        let start_ns = start.and_then(|d| d.timestamp_nanos_opt()).map(|n| n as u64);
        let end_ns = end.and_then(|d| d.timestamp_nanos_opt()).map(|n| n as u64);

        let mut quotes = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading {} line {}", path.display(), line_no + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            // Header row: first field is not a timestamp.
            if line_no == 0 && !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }

            let mut fields = trimmed.split(',');
            let quote = (|| -> Result<Quote> {
                let ts = fields
                    .next()
                    .context("missing ts field")?
                    .trim()
                    .parse::<u64>()
                    .context("parsing ts")?;
                let bid = fields
                    .next()
                    .context("missing bid field")?
                    .trim()
                    .parse()
                    .context("parsing bid")?;
                let ask = fields
                    .next()
                    .context("missing ask field")?
                    .trim()
                    .parse()
                    .context("parsing ask")?;
                Ok(Quote::new(bid, ask, ts))
            })()
            .with_context(|| format!("{} line {}", path.display(), line_no + 1))?;

            if start_ns.is_some_and(|s| quote.ts < s) {
                continue;
            }
            if end_ns.is_some_and(|e| quote.ts >= e) {
                continue;
            }
            quotes.push(quote);
        }

        Ok(Self::from_quotes(quotes))
    }
}

#[async_trait]
impl QuoteFeed for ReplayFeed {
    async fn next_quote(&mut self) -> Option<Quote> {
        self.quotes.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn temp_csv(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("stepback-quotes-{}.csv", uuid::Uuid::new_v4()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_parses_rows_and_skips_header() {
        let path = temp_csv("ts_ns,bid,ask\n1000,1.1000,1.1002\n2000,1.1001,1.1003\n");
        let mut feed = ReplayFeed::from_csv_path(&path, None, None).unwrap();

        let q = feed.next_quote().await.unwrap();
        assert_eq!(q.ts, 1000);
        assert_eq!(q.bid, dec!(1.1000));
        assert_eq!(q.ask, dec!(1.1002));

        assert!(feed.next_quote().await.is_some());
        assert!(feed.next_quote().await.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_date_window_filters_rows() {
        let day_ns: u64 = 86_400_000_000_000;
        let rows = format!(
            "{},1.1,1.2\n{},1.1,1.2\n{},1.1,1.2\n",
            day_ns,
            2 * day_ns,
            3 * day_ns
        );
        let path = temp_csv(&rows);

        let start = DateTime::<Utc>::from_timestamp(2 * 86_400, 0);
        let end = DateTime::<Utc>::from_timestamp(3 * 86_400, 0);
        let mut feed = ReplayFeed::from_csv_path(&path, start, end).unwrap();

        let q = feed.next_quote().await.unwrap();
        assert_eq!(q.ts, 2 * day_ns);
        assert!(feed.next_quote().await.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_malformed_row_is_an_error() {
        let path = temp_csv("1000,1.1000\n");
        assert!(ReplayFeed::from_csv_path(&path, None, None).is_err());
        std::fs::remove_file(&path).ok();
    }
}
