//! Append-only trade journal.
//!
//! One JSON record per line: event kind, timestamp, ladder snapshot,
//! the trade when applicable, and a running stats snapshot. The journal
//! is the audit trail and the source of truth for ladder recovery: the
//! ordered sequence of ladder transition records reconstructs the
//! ladder exactly.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::{BalanceLadder, BaseRungLoss};
use crate::metrics::SessionStats;
use crate::models::TradeRecord;

/// Kind of journalled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    EngineStarted,
    EntrySubmitted,
    EntryRefused,
    OrderSubmitted,
    OrderFilled,
    TradeOpened,
    TradeClosed,
    LadderAdvanced,
    LadderSteppedBack,
    GatewayError,
    Paused,
    EngineStopped,
}

/// Ladder state embedded in every record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderSnapshot {
    pub history: Vec<Decimal>,
    pub step_index: usize,
    pub current_balance: Decimal,
}

impl From<&BalanceLadder> for LadderSnapshot {
    fn from(ladder: &BalanceLadder) -> Self {
        Self {
            history: ladder.history(),
            step_index: ladder.step_index(),
            current_balance: ladder.current_stake(),
        }
    }
}

/// Cumulative statistics embedded in every record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub max_step: usize,
    pub total_return: Decimal,
}

impl StatsSnapshot {
    fn capture(stats: &SessionStats, current_balance: Decimal) -> Self {
        Self {
            total_trades: stats.total_trades(),
            wins: stats.winning_trades(),
            losses: stats.losing_trades(),
            win_rate: stats.win_rate(),
            max_step: stats.max_step(),
            total_return: stats.total_return(current_balance),
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub kind: RecordKind,
    pub ts: u64,
    pub ladder: LadderSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<TradeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub stats: StatsSnapshot,
}

/// Append-only JSONL writer. Written from the orchestrator task only;
/// every record is flushed so the file survives a crash.
pub struct Journal {
    writer: BufWriter<File>,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("opening journal {}", path.as_ref().display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(
        &mut self,
        kind: RecordKind,
        ts: u64,
        ladder: &BalanceLadder,
        stats: &SessionStats,
        trade: Option<&TradeRecord>,
        note: Option<String>,
    ) -> Result<()> {
        let record = JournalRecord {
            kind,
            ts,
            ladder: LadderSnapshot::from(ladder),
            trade: trade.cloned(),
            note,
            stats: StatsSnapshot::capture(stats, ladder.current_stake()),
        };
        let line = serde_json::to_string(&record).context("encoding journal record")?;
        writeln!(self.writer, "{line}").context("writing journal record")?;
        self.writer.flush().context("flushing journal")?;
        Ok(())
    }

    /// Rebuild a ladder purely from the ordered transition records.
    pub fn replay<R: BufRead>(
        reader: R,
        growth_factor: Decimal,
        rounding_dp: u32,
        base_rung_loss: BaseRungLoss,
    ) -> Result<BalanceLadder> {
        let mut ladder: Option<BalanceLadder> = None;

        for line in reader.lines() {
            let line = line.context("reading journal line")?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord =
                serde_json::from_str(&line).context("decoding journal record")?;

            if ladder.is_none() {
                let initial = *record
                    .ladder
                    .history
                    .first()
                    .context("journal record with empty ladder history")?;
                ladder = Some(BalanceLadder::new(
                    initial,
                    growth_factor,
                    rounding_dp,
                    base_rung_loss,
                )?);
            }

            if let Some(l) = ladder.as_mut() {
                match record.kind {
                    RecordKind::LadderAdvanced => {
                        l.record_profit();
                    }
                    RecordKind::LadderSteppedBack => {
                        l.record_loss();
                    }
                    _ => {}
                }
            }
        }

        ladder.context("journal contains no records")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeOutcome;
    use rust_decimal_macros::dec;
    use std::io::BufReader;

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("stepback-journal-{tag}-{}.jsonl", uuid::Uuid::new_v4()))
    }

    fn ladder() -> BalanceLadder {
        BalanceLadder::new(dec!(100), dec!(1.30), 2, BaseRungLoss::MatchProfitTarget).unwrap()
    }

    #[test]
    fn test_records_are_newline_delimited_json() {
        let path = temp_path("encode");
        let mut journal = Journal::open(&path).unwrap();
        let mut l = ladder();
        let mut stats = SessionStats::new(dec!(100));

        journal
            .append(RecordKind::EngineStarted, 1, &l, &stats, None, None)
            .unwrap();
        l.record_profit();
        stats.record_outcome(TradeOutcome::Win, l.step_index());
        journal
            .append(RecordKind::LadderAdvanced, 2, &l, &stats, None, None)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let last: JournalRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last.kind, RecordKind::LadderAdvanced);
        assert_eq!(last.ladder.current_balance, dec!(130));
        assert_eq!(last.ladder.step_index, 1);
        assert_eq!(last.stats.total_trades, 1);
        assert_eq!(last.stats.total_return, dec!(0.30));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_replay_reconstructs_ladder() {
        let path = temp_path("replay");
        let mut journal = Journal::open(&path).unwrap();
        let mut l = ladder();
        let mut stats = SessionStats::new(dec!(100));

        journal
            .append(RecordKind::EngineStarted, 1, &l, &stats, None, None)
            .unwrap();

        // Win, win, loss, win: ends at [100, 130, 169].
        for (kind, outcome) in [
            (RecordKind::LadderAdvanced, TradeOutcome::Win),
            (RecordKind::LadderAdvanced, TradeOutcome::Win),
            (RecordKind::LadderSteppedBack, TradeOutcome::Loss),
            (RecordKind::LadderAdvanced, TradeOutcome::Win),
        ] {
            match outcome {
                TradeOutcome::Win => {
                    l.record_profit();
                }
                _ => {
                    l.record_loss();
                }
            }
            stats.record_outcome(outcome, l.step_index());
            journal
                .append(kind, 2, &l, &stats, None, None)
                .unwrap();
        }

        let file = std::fs::File::open(&path).unwrap();
        let replayed = Journal::replay(
            BufReader::new(file),
            dec!(1.30),
            2,
            BaseRungLoss::MatchProfitTarget,
        )
        .unwrap();

        assert_eq!(replayed.history(), l.history());
        assert_eq!(replayed.step_index(), l.step_index());
        assert_eq!(replayed.current_stake(), dec!(169));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_replay_of_empty_journal_fails() {
        let empty: &[u8] = b"";
        assert!(Journal::replay(
            BufReader::new(empty),
            dec!(1.30),
            2,
            BaseRungLoss::MatchProfitTarget
        )
        .is_err());
    }
}
