//! The trading core: a single-threaded event loop that reconciles
//! quotes, fills, and timers into ladder transitions.
//!
//! All trading state (ladder, tracker, runtime flags) is owned by this
//! task alone; events arrive on one channel and are processed in
//! arrival order, so state invariants hold at every await point.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::gateway::{with_retry, GatewayError, OrderGateway, RetryPolicy};
use crate::journal::{Journal, RecordKind};
use crate::metrics::SessionStats;
use crate::models::{Fill, Quote, Reject, TradeOutcome, TradeSide};
use crate::signal::{Decision, EngineView, EntryPredicate};

use super::config::EngineConfig;
use super::ladder::BalanceLadder;
use super::sizer::PositionSizer;
use super::tracker::{FillRole, TradePhase, TradeTracker};

/// Event kinds consumed by the engine, in channel-arrival order.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Quote(Quote),
    Fill(Fill),
    Reject(Reject),
    Timer { ts: u64 },
    Shutdown,
}

/// Whether the loop should keep running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Why new entries are currently refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockReason {
    /// An entry submission timed out; the order state is unknown until
    /// a fill or reject arrives.
    AmbiguousEntry,
    /// An open position could not be fully protected. Requires operator
    /// intervention.
    UnprotectedPosition,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::AmbiguousEntry => write!(f, "entry order state unknown"),
            BlockReason::UnprotectedPosition => {
                write!(f, "open position without full protection")
            }
        }
    }
}

/// The orchestrator. Owns every piece of trading state and the only
/// handle to the journal.
pub struct Engine {
    config: EngineConfig,
    ladder: BalanceLadder,
    sizer: PositionSizer,
    tracker: TradeTracker,
    stats: SessionStats,
    journal: Journal,
    gateway: Arc<dyn OrderGateway>,
    clock: Arc<dyn Clock>,
    predicate: Box<dyn EntryPredicate>,
    retry: RetryPolicy,
    last_quote: Option<Quote>,
    last_exit_ts: Option<u64>,
    block: Option<BlockReason>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn OrderGateway>,
        clock: Arc<dyn Clock>,
        predicate: Box<dyn EntryPredicate>,
        mut journal: Journal,
    ) -> Result<Self> {
        config.validate().context("engine configuration")?;
        let ladder = BalanceLadder::from_config(&config)?;
        let stats = SessionStats::new(config.initial_balance);
        let sizer = PositionSizer::new(config.instrument.clone(), config.rounding_dp);
        let tracker = TradeTracker::new(config.instrument.tick_size);

        journal.append(
            RecordKind::EngineStarted,
            clock.now(),
            &ladder,
            &stats,
            None,
            Some(format!(
                "instrument {} growth {}",
                config.instrument.id, config.growth_factor
            )),
        )?;
        info!(
            instrument = %config.instrument.id,
            initial_balance = %config.initial_balance,
            growth_factor = %config.growth_factor,
            "engine started"
        );

        Ok(Self {
            config,
            ladder,
            sizer,
            tracker,
            stats,
            journal,
            gateway,
            clock,
            predicate,
            retry: RetryPolicy::default(),
            last_quote: None,
            last_exit_ts: None,
            block: None,
        })
    }

    pub fn ladder(&self) -> &BalanceLadder {
        &self.ladder
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn has_open_trade(&self) -> bool {
        !self.tracker.is_idle()
    }

    /// Consume events until shutdown or channel closure. Errors are
    /// state invariant violations and abort the engine.
    pub async fn run(&mut self, rx: &mut mpsc::Receiver<EngineEvent>) -> Result<()> {
        while let Some(event) = rx.recv().await {
            if self.handle_event(event).await? == Flow::Stop {
                return Ok(());
            }
        }
        // Producers went away without an explicit shutdown.
        self.shutdown().await
    }

    /// Process one event. Public so backtests can drive the engine
    /// synchronously without a channel.
    pub async fn handle_event(&mut self, event: EngineEvent) -> Result<Flow> {
        match event {
            EngineEvent::Quote(quote) => self.on_quote(quote).await?,
            EngineEvent::Fill(fill) => self.on_fill(fill).await?,
            EngineEvent::Reject(reject) => self.on_reject(reject)?,
            EngineEvent::Timer { ts } => self.on_timer(ts).await?,
            EngineEvent::Shutdown => {
                self.shutdown().await?;
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn paused(&self) -> bool {
        self.ladder.consecutive_losses() >= self.config.max_consecutive_losses
    }

    fn delay_elapsed(&self, now: u64) -> bool {
        match self.last_exit_ts {
            Some(exit) => now.saturating_sub(exit) >= self.config.trade_delay.as_nanos() as u64,
            None => true,
        }
    }

    async fn on_quote(&mut self, quote: Quote) -> Result<()> {
        self.last_quote = Some(quote);

        // Entry gates, in order: single position, operator block,
        // loss-streak pause, trade delay.
        if !self.tracker.is_idle() {
            return Ok(());
        }
        if let Some(reason) = self.block {
            debug!(%reason, "entries blocked");
            return Ok(());
        }
        if self.paused() {
            debug!(
                consecutive_losses = self.ladder.consecutive_losses(),
                "paused after loss streak"
            );
            return Ok(());
        }
        if !self.delay_elapsed(quote.ts) {
            return Ok(());
        }

        let view = EngineView {
            current_stake: self.ladder.current_stake(),
            step_index: self.ladder.step_index(),
            consecutive_losses: self.ladder.consecutive_losses(),
            last_exit_ts: self.last_exit_ts,
        };
        let decision = match self.predicate.decide(&quote, &view) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "entry predicate failed, skipping");
                return Ok(());
            }
        };

        match decision {
            Decision::Skip => Ok(()),
            Decision::Enter(side) => self.enter(side, quote).await,
        }
    }

    async fn enter(&mut self, side: TradeSide, quote: Quote) -> Result<()> {
        let entry_price = match side {
            TradeSide::Long => quote.ask,
            TradeSide::Short => quote.bid,
        };

        let plan = match self.sizer.plan(&self.ladder, side, entry_price) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, stake = %self.ladder.current_stake(), "entry refused by sizer");
                self.journal.append(
                    RecordKind::EntryRefused,
                    quote.ts,
                    &self.ladder,
                    &self.stats,
                    None,
                    Some(e.to_string()),
                )?;
                return Ok(());
            }
        };

        if plan.residual_quantity > Decimal::ZERO {
            debug!(
                residual = %plan.residual_quantity,
                effective_risk = %plan.effective_risk,
                "quantity snapped down, effective risk recomputed"
            );
        }

        let entry_id = Uuid::new_v4().to_string();
        self.tracker
            .open_pending(&plan, entry_id.clone(), quote.ts)
            .context("state invariant violated")?;

        info!(
            side = side.as_str(),
            entry = %plan.entry_price,
            quantity = %plan.quantity,
            lots = %self.sizer.instrument().lots(plan.quantity).round_dp(4),
            stake = %plan.stake,
            take_profit = %plan.take_profit_price,
            stop_loss = %plan.stop_loss_price,
            loss_pct = %(plan.loss_percentage * Decimal::ONE_HUNDRED).round_dp(2),
            "entering position"
        );
        let trade = self.tracker.active().map(|t| t.record.clone());
        self.journal.append(
            RecordKind::EntrySubmitted,
            quote.ts,
            &self.ladder,
            &self.stats,
            trade.as_ref(),
            None,
        )?;

        let gateway = self.gateway.clone();
        let quantity = plan.quantity;
        let order_side = side.entry_order_side();
        let id = entry_id.clone();
        let submit = with_retry(&self.retry, "submit_market", move || {
            let gateway = gateway.clone();
            let id = id.clone();
            async move { gateway.submit_market(order_side, quantity, &id).await }
        })
        .await;

        match submit {
            Ok(_) => {
                self.journal.append(
                    RecordKind::OrderSubmitted,
                    quote.ts,
                    &self.ladder,
                    &self.stats,
                    trade.as_ref(),
                    Some("market entry".to_string()),
                )?;
            }
            Err(e) if e.is_transient() => {
                // Retries exhausted: the order state is unknown. Cancel
                // best-effort and refuse entries until a fill or reject
                // resolves the ambiguity.
                warn!(error = %e, client_id = %entry_id, "entry submission unresolved, blocking entries");
                let _ = self.gateway.cancel(&entry_id).await;
                self.block = Some(BlockReason::AmbiguousEntry);
                self.journal.append(
                    RecordKind::GatewayError,
                    quote.ts,
                    &self.ladder,
                    &self.stats,
                    trade.as_ref(),
                    Some(format!("entry unresolved: {e}")),
                )?;
            }
            Err(e) => {
                warn!(error = %e, "entry submission rejected, abandoning attempt");
                self.tracker.discard_pending();
                self.journal.append(
                    RecordKind::GatewayError,
                    quote.ts,
                    &self.ladder,
                    &self.stats,
                    trade.as_ref(),
                    Some(format!("entry rejected: {e}")),
                )?;
            }
        }
        Ok(())
    }

    async fn on_fill(&mut self, fill: Fill) -> Result<()> {
        match self.tracker.match_fill(&fill.client_id) {
            FillRole::Entry => self.on_entry_fill(fill).await,
            role @ (FillRole::StopLoss | FillRole::TakeProfit) => {
                self.on_exit_fill(role, fill).await
            }
            FillRole::Unknown => {
                warn!(client_id = %fill.client_id, "duplicate or unknown fill ignored");
                Ok(())
            }
        }
    }

    async fn on_entry_fill(&mut self, fill: Fill) -> Result<()> {
        if self.tracker.entry_filled(&fill).is_none() {
            warn!(client_id = %fill.client_id, "duplicate entry fill ignored");
            return Ok(());
        }
        if self.block == Some(BlockReason::AmbiguousEntry) {
            self.block = None;
        }

        let record = match self.tracker.active() {
            Some(active) => active.record.clone(),
            None => return Ok(()),
        };
        info!(
            entry = %record.entry_price,
            quantity = %record.quantity,
            "position opened"
        );
        self.journal.append(
            RecordKind::TradeOpened,
            fill.ts,
            &self.ladder,
            &self.stats,
            Some(&record),
            None,
        )?;

        // Protective legs: stop first, then take-profit.
        let exit_side = record.side.exit_order_side();

        let stop_id = Uuid::new_v4().to_string();
        let gateway = self.gateway.clone();
        let (price, quantity, id) = (record.stop_loss_price, record.quantity, stop_id.clone());
        let stop_submit = with_retry(&self.retry, "submit_stop", move || {
            let gateway = gateway.clone();
            let id = id.clone();
            async move { gateway.submit_stop(exit_side, price, quantity, &id).await }
        })
        .await;

        if let Err(e) = stop_submit {
            return self.protective_failure("stop", e, fill.ts, &record).await;
        }
        self.tracker.attach_stop(stop_id);

        let tp_id = Uuid::new_v4().to_string();
        let gateway = self.gateway.clone();
        let (price, quantity, id) = (record.take_profit_price, record.quantity, tp_id.clone());
        let tp_submit = with_retry(&self.retry, "submit_limit", move || {
            let gateway = gateway.clone();
            let id = id.clone();
            async move { gateway.submit_limit(exit_side, price, quantity, &id).await }
        })
        .await;

        if let Err(e) = tp_submit {
            return self.protective_failure("take-profit", e, fill.ts, &record).await;
        }
        self.tracker.attach_take_profit(tp_id);

        self.journal.append(
            RecordKind::OrderSubmitted,
            fill.ts,
            &self.ladder,
            &self.stats,
            Some(&record),
            Some(format!(
                "protective legs: stop {} take-profit {}",
                record.stop_loss_price, record.take_profit_price
            )),
        )?;
        Ok(())
    }

    /// A protective submission failed for good: the position is open
    /// but not fully protected. Report it and stop taking entries.
    async fn protective_failure(
        &mut self,
        leg: &str,
        e: GatewayError,
        ts: u64,
        record: &crate::models::TradeRecord,
    ) -> Result<()> {
        error!(leg, error = %e, "protective order submission failed, operator intervention required");
        self.tracker.force_pending_exit();
        self.block = Some(BlockReason::UnprotectedPosition);
        self.journal.append(
            RecordKind::GatewayError,
            ts,
            &self.ladder,
            &self.stats,
            Some(record),
            Some(format!("{leg} submission failed: {e}")),
        )?;
        Ok(())
    }

    async fn on_exit_fill(&mut self, role: FillRole, fill: Fill) -> Result<()> {
        let Some(settlement) = self.tracker.exit_filled(role, &fill) else {
            warn!(client_id = %fill.client_id, "duplicate exit fill ignored");
            return Ok(());
        };

        if settlement.out_of_band {
            warn!(
                exit = %fill.price,
                "exit beyond both protective bands, classified by P&L sign"
            );
        }

        if let Some(sibling) = settlement.sibling_id.as_deref() {
            if let Err(e) = self.gateway.cancel(sibling).await {
                warn!(client_id = %sibling, error = %e, "sibling cancel failed");
            }
        }

        let record = settlement.record;
        let outcome = record
            .outcome
            .context("settled trade carries no outcome")?;

        match outcome {
            TradeOutcome::Win => {
                let new_balance = self.ladder.record_profit();
                info!(
                    exit = %fill.price,
                    new_balance = %new_balance,
                    step = self.ladder.step_index(),
                    "winning trade, ladder advanced"
                );
                self.journal.append(
                    RecordKind::LadderAdvanced,
                    fill.ts,
                    &self.ladder,
                    &self.stats,
                    Some(&record),
                    None,
                )?;
            }
            TradeOutcome::Loss => {
                let new_balance = self.ladder.record_loss();
                info!(
                    exit = %fill.price,
                    new_balance = %new_balance,
                    consecutive_losses = self.ladder.consecutive_losses(),
                    "losing trade, stepped back"
                );
                self.journal.append(
                    RecordKind::LadderSteppedBack,
                    fill.ts,
                    &self.ladder,
                    &self.stats,
                    Some(&record),
                    None,
                )?;
            }
            TradeOutcome::NeutralClose => {
                info!(exit = %fill.price, "neutral close, ladder unchanged");
            }
        }

        self.stats.record_outcome(outcome, self.ladder.step_index());
        self.stats.record_equity(self.ladder.current_stake());
        self.last_exit_ts = Some(fill.ts);

        self.journal.append(
            RecordKind::TradeClosed,
            fill.ts,
            &self.ladder,
            &self.stats,
            Some(&record),
            None,
        )?;

        if outcome == TradeOutcome::Loss && self.paused() {
            warn!(
                consecutive_losses = self.ladder.consecutive_losses(),
                limit = self.config.max_consecutive_losses,
                "loss streak limit reached, pausing until reset"
            );
            self.journal.append(
                RecordKind::Paused,
                fill.ts,
                &self.ladder,
                &self.stats,
                None,
                Some(format!(
                    "{} consecutive losses",
                    self.ladder.consecutive_losses()
                )),
            )?;
        }
        Ok(())
    }

    fn on_reject(&mut self, reject: Reject) -> Result<()> {
        match self.tracker.match_fill(&reject.client_id) {
            FillRole::Entry => {
                warn!(reason = %reject.reason, "entry order rejected");
                self.tracker.discard_pending();
                if self.block == Some(BlockReason::AmbiguousEntry) {
                    self.block = None;
                }
                let ts = self.clock.now();
                self.journal.append(
                    RecordKind::GatewayError,
                    ts,
                    &self.ladder,
                    &self.stats,
                    None,
                    Some(format!("entry rejected: {}", reject.reason)),
                )?;
            }
            FillRole::StopLoss | FillRole::TakeProfit => {
                error!(
                    client_id = %reject.client_id,
                    reason = %reject.reason,
                    "protective order rejected, operator intervention required"
                );
                self.tracker.force_pending_exit();
                self.block = Some(BlockReason::UnprotectedPosition);
                let ts = self.clock.now();
                self.journal.append(
                    RecordKind::GatewayError,
                    ts,
                    &self.ladder,
                    &self.stats,
                    None,
                    Some(format!("protective leg rejected: {}", reject.reason)),
                )?;
            }
            FillRole::Unknown => {
                debug!(client_id = %reject.client_id, "reject for unknown order ignored");
            }
        }
        Ok(())
    }

    async fn on_timer(&mut self, ts: u64) -> Result<()> {
        let timed_out = self.tracker.active().is_some_and(|t| {
            t.phase == TradePhase::PendingEntry
                && ts.saturating_sub(t.submitted_at) > self.config.order_timeout.as_nanos() as u64
        });
        if !timed_out {
            return Ok(());
        }

        let entry_id = self
            .tracker
            .active()
            .map(|t| t.entry_id.clone())
            .unwrap_or_default();
        warn!(client_id = %entry_id, "entry fill never arrived, abandoning trade");
        let _ = self.gateway.cancel(&entry_id).await;
        self.tracker.discard_pending();
        if self.block == Some(BlockReason::AmbiguousEntry) {
            self.block = None;
        }
        self.journal.append(
            RecordKind::EntryRefused,
            ts,
            &self.ladder,
            &self.stats,
            None,
            Some("entry order timed out".to_string()),
        )?;
        Ok(())
    }

    /// Graceful shutdown: cancel resting legs, report any open position
    /// as a neutral close without moving the ladder, close the journal.
    async fn shutdown(&mut self) -> Result<()> {
        let now = self.clock.now();

        if let Some(active) = self.tracker.active() {
            let ids: Vec<String> = [
                Some(active.entry_id.clone()),
                active.stop_id.clone(),
                active.take_profit_id.clone(),
            ]
            .into_iter()
            .flatten()
            .collect();
            for id in ids {
                if let Err(e) = self.gateway.cancel(&id).await {
                    warn!(client_id = %id, error = %e, "cancel on shutdown failed");
                }
            }
        }

        if let Some(mut record) = self.tracker.abandon_open(now) {
            // Mark the last known touch so the record carries where the
            // market stood when the position was abandoned.
            record.exit_price = self.last_quote.map(|q| q.mid());
            info!("open position reported as neutral close on shutdown");
            self.stats
                .record_outcome(TradeOutcome::NeutralClose, self.ladder.step_index());
            self.journal.append(
                RecordKind::TradeClosed,
                now,
                &self.ladder,
                &self.stats,
                Some(&record),
                Some("neutral close on shutdown".to_string()),
            )?;
        }

        info!(
            total_trades = self.stats.total_trades(),
            wins = self.stats.winning_trades(),
            losses = self.stats.losing_trades(),
            win_rate = self.stats.win_rate(),
            final_balance = %self.ladder.current_stake(),
            max_step = self.stats.max_step(),
            "engine stopped"
        );
        self.journal.append(
            RecordKind::EngineStopped,
            now,
            &self.ladder,
            &self.stats,
            None,
            None,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::gateway::PaperGateway;
    use crate::models::{Ack, ExecutionEvent, Instrument, OrderSide};
    use crate::signal::AlwaysLong;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const SEC: u64 = 1_000_000_000;

    fn temp_journal() -> (Journal, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "stepback-engine-test-{}.jsonl",
            Uuid::new_v4()
        ));
        (Journal::open(&path).unwrap(), path)
    }

    struct Harness {
        engine: Engine,
        gateway: Arc<PaperGateway>,
        exec_rx: mpsc::UnboundedReceiver<ExecutionEvent>,
        clock: Arc<SimClock>,
        journal_path: std::path::PathBuf,
        seen_fills: Vec<Fill>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let (gateway, exec_rx) = PaperGateway::new();
            let clock = Arc::new(SimClock::new(0));
            let (journal, journal_path) = temp_journal();
            let engine = Engine::new(
                config,
                gateway.clone(),
                clock.clone(),
                Box::new(AlwaysLong),
                journal,
            )
            .unwrap();
            Self {
                engine,
                gateway,
                exec_rx,
                clock,
                journal_path,
                seen_fills: Vec::new(),
            }
        }

        /// Deliver a quote: the gateway sees it first (so resting legs
        /// trigger and market orders have a touch), then the engine,
        /// with execution events fed back in arrival order.
        async fn quote(&mut self, bid: rust_decimal::Decimal, ask: rust_decimal::Decimal, ts: u64) {
            let q = Quote::new(bid, ask, ts);
            self.clock.set(ts);
            self.gateway.on_quote(&q).await;
            self.drain().await;
            self.engine
                .handle_event(EngineEvent::Quote(q))
                .await
                .unwrap();
            self.drain().await;
        }

        async fn drain(&mut self) {
            while let Ok(ev) = self.exec_rx.try_recv() {
                let event = match ev {
                    ExecutionEvent::Fill(f) => {
                        self.seen_fills.push(f.clone());
                        EngineEvent::Fill(f)
                    }
                    ExecutionEvent::Reject(r) => EngineEvent::Reject(r),
                };
                self.engine.handle_event(event).await.unwrap();
            }
        }

        fn journal_contents(&self) -> String {
            std::fs::read_to_string(&self.journal_path).unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            std::fs::remove_file(&self.journal_path).ok();
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            trade_delay: Duration::from_secs(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_win_advances_ladder() {
        // Default 5 s trade delay keeps the winning quote from opening
        // a fresh position in the same tick.
        let mut h = Harness::new(EngineConfig::default());

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        assert!(h.engine.has_open_trade());

        // Rally through the take-profit band.
        h.quote(dec!(1.45000), dec!(1.45002), 10 * SEC).await;
        assert!(!h.engine.has_open_trade());
        assert_eq!(h.engine.ladder().history(), vec![dec!(100), dec!(130)]);
        assert_eq!(h.engine.stats().winning_trades(), 1);
        assert_eq!(h.engine.ladder().consecutive_losses(), 0);
    }

    #[tokio::test]
    async fn test_loss_at_base_holds_rung() {
        let mut h = Harness::new(EngineConfig::default());

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        // Crash through the stop band.
        h.quote(dec!(0.50000), dec!(0.50002), 10 * SEC).await;

        assert!(!h.engine.has_open_trade());
        assert_eq!(h.engine.ladder().history(), vec![dec!(100)]);
        assert_eq!(h.engine.stats().losing_trades(), 1);
        assert_eq!(h.engine.ladder().consecutive_losses(), 1);
    }

    #[tokio::test]
    async fn test_single_position_at_all_times() {
        let mut h = Harness::new(fast_config());

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        assert!(h.engine.has_open_trade());

        // More quotes inside the protective band do not open a second
        // trade.
        h.quote(dec!(1.10460), dec!(1.10462), 2 * SEC).await;
        h.quote(dec!(1.10470), dec!(1.10472), 3 * SEC).await;
        assert!(h.engine.has_open_trade());
        assert_eq!(h.engine.stats().total_trades(), 0);
    }

    #[tokio::test]
    async fn test_delay_gate_blocks_reentry() {
        let config = EngineConfig {
            trade_delay: Duration::from_secs(5),
            ..Default::default()
        };
        let mut h = Harness::new(config);

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        h.quote(dec!(1.45000), dec!(1.45002), 2 * SEC).await;
        assert!(!h.engine.has_open_trade());

        // 3 s after the close: still inside the delay window.
        h.quote(dec!(1.45000), dec!(1.45002), 5 * SEC).await;
        assert!(!h.engine.has_open_trade());

        // 7 s after the close: allowed again.
        h.quote(dec!(1.45000), dec!(1.45002), 9 * SEC).await;
        assert!(h.engine.has_open_trade());
    }

    #[tokio::test]
    async fn test_pause_after_consecutive_losses() {
        let config = EngineConfig {
            trade_delay: Duration::from_secs(0),
            max_consecutive_losses: 2,
            ..Default::default()
        };
        let mut h = Harness::new(config);

        // Loss one.
        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        h.quote(dec!(0.60000), dec!(0.60002), 2 * SEC).await;
        assert_eq!(h.engine.ladder().consecutive_losses(), 1);

        // Loss two: the crash quote both fills the stop of the first
        // re-entry and trips the pause.
        h.quote(dec!(0.60000), dec!(0.60002), 3 * SEC).await;
        assert!(h.engine.has_open_trade());
        h.quote(dec!(0.30000), dec!(0.30002), 4 * SEC).await;
        assert_eq!(h.engine.ladder().consecutive_losses(), 2);
        assert!(!h.engine.has_open_trade());

        // Paused: quotes are ignored.
        h.quote(dec!(1.10448), dec!(1.10450), 5 * SEC).await;
        assert!(!h.engine.has_open_trade());
        assert!(h.journal_contents().contains("\"kind\":\"paused\""));
    }

    #[tokio::test]
    async fn test_duplicate_fill_does_not_move_ladder() {
        let mut h = Harness::new(EngineConfig::default());

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        h.quote(dec!(1.45000), dec!(1.45002), 2 * SEC).await;
        assert_eq!(h.engine.ladder().history(), vec![dec!(100), dec!(130)]);

        // Replay the exit fill verbatim: ignored.
        let exit_fill = h.seen_fills.last().unwrap().clone();
        h.engine
            .handle_event(EngineEvent::Fill(exit_fill))
            .await
            .unwrap();
        assert_eq!(h.engine.ladder().history(), vec![dec!(100), dec!(130)]);
        assert_eq!(h.engine.stats().total_trades(), 1);

        // A fill for an id the engine never issued: ignored too.
        h.engine
            .handle_event(EngineEvent::Fill(Fill {
                client_id: "not-ours".to_string(),
                price: dec!(1.0),
                quantity: dec!(1),
                ts: 3 * SEC,
            }))
            .await
            .unwrap();
        assert_eq!(h.engine.stats().total_trades(), 1);
    }

    #[tokio::test]
    async fn test_entry_refused_below_exchange_minimum() {
        let config = EngineConfig {
            trade_delay: Duration::from_secs(0),
            instrument: Instrument {
                min_quantity: dec!(1000),
                ..Instrument::eurusd()
            },
            ..Default::default()
        };
        let mut h = Harness::new(config);

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        assert!(!h.engine.has_open_trade());
        assert_eq!(h.engine.stats().total_trades(), 0);
        assert_eq!(h.engine.ladder().history(), vec![dec!(100)]);
        assert!(h
            .journal_contents()
            .contains("\"kind\":\"entry_refused\""));
    }

    #[tokio::test]
    async fn test_shutdown_reports_neutral_close() {
        let mut h = Harness::new(fast_config());

        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        assert!(h.engine.has_open_trade());

        let flow = h
            .engine
            .handle_event(EngineEvent::Shutdown)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Stop);
        assert!(!h.engine.has_open_trade());
        assert_eq!(h.engine.stats().neutral_closes(), 1);
        assert_eq!(h.engine.ladder().history(), vec![dec!(100)]);
        assert!(h.journal_contents().contains("neutral close on shutdown"));
    }

    #[tokio::test]
    async fn test_journal_replay_matches_live_ladder() {
        let mut h = Harness::new(fast_config());

        // Win, win, loss.
        h.quote(dec!(1.10448), dec!(1.10450), SEC).await;
        h.quote(dec!(1.45000), dec!(1.45002), 2 * SEC).await;
        h.quote(dec!(1.45000), dec!(1.45002), 3 * SEC).await;
        h.quote(dec!(1.90000), dec!(1.90002), 4 * SEC).await;
        h.quote(dec!(1.90000), dec!(1.90002), 5 * SEC).await;
        h.quote(dec!(0.90000), dec!(0.90002), 6 * SEC).await;

        assert_eq!(
            h.engine.ladder().history(),
            vec![dec!(100), dec!(130)],
        );

        let file = std::fs::File::open(&h.journal_path).unwrap();
        let replayed = Journal::replay(
            std::io::BufReader::new(file),
            dec!(1.30),
            2,
            crate::engine::BaseRungLoss::MatchProfitTarget,
        )
        .unwrap();
        assert_eq!(replayed.history(), h.engine.ladder().history());
    }

    /// Gateway that accepts market orders but permanently rejects
    /// protective legs.
    struct NoProtectionGateway {
        events_tx: mpsc::UnboundedSender<ExecutionEvent>,
    }

    #[async_trait]
    impl OrderGateway for NoProtectionGateway {
        async fn submit_market(
            &self,
            _side: OrderSide,
            quantity: rust_decimal::Decimal,
            client_id: &str,
        ) -> Result<Ack, GatewayError> {
            let _ = self.events_tx.send(ExecutionEvent::Fill(Fill {
                client_id: client_id.to_string(),
                price: dec!(1.10450),
                quantity,
                ts: SEC,
            }));
            Ok(Ack {
                client_id: client_id.to_string(),
            })
        }

        async fn submit_stop(
            &self,
            _side: OrderSide,
            _trigger_price: rust_decimal::Decimal,
            _quantity: rust_decimal::Decimal,
            _client_id: &str,
        ) -> Result<Ack, GatewayError> {
            Err(GatewayError::Rejected("stop orders unsupported".to_string()))
        }

        async fn submit_limit(
            &self,
            _side: OrderSide,
            _price: rust_decimal::Decimal,
            _quantity: rust_decimal::Decimal,
            _client_id: &str,
        ) -> Result<Ack, GatewayError> {
            Err(GatewayError::Rejected("limit orders unsupported".to_string()))
        }

        async fn cancel(&self, client_id: &str) -> Result<Ack, GatewayError> {
            Ok(Ack {
                client_id: client_id.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_protective_rejection_blocks_entries() {
        let (events_tx, mut exec_rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(NoProtectionGateway { events_tx });
        let clock = Arc::new(SimClock::new(0));
        let (journal, path) = temp_journal();
        let mut engine = Engine::new(
            fast_config(),
            gateway,
            clock,
            Box::new(AlwaysLong),
            journal,
        )
        .unwrap();

        engine
            .handle_event(EngineEvent::Quote(Quote::new(
                dec!(1.10448),
                dec!(1.10450),
                SEC,
            )))
            .await
            .unwrap();
        while let Ok(ev) = exec_rx.try_recv() {
            let event = match ev {
                ExecutionEvent::Fill(f) => EngineEvent::Fill(f),
                ExecutionEvent::Reject(r) => EngineEvent::Reject(r),
            };
            engine.handle_event(event).await.unwrap();
        }

        // The position stays tracked as pending-exit and new entries
        // are refused until an operator steps in.
        assert!(engine.has_open_trade());
        engine
            .handle_event(EngineEvent::Quote(Quote::new(
                dec!(1.20000),
                dec!(1.20002),
                2 * SEC,
            )))
            .await
            .unwrap();
        assert_eq!(engine.stats().total_trades(), 0);
        assert_eq!(engine.ladder().history(), vec![dec!(100)]);

        std::fs::remove_file(&path).ok();
    }

    /// Gateway that acknowledges everything but never fills.
    struct SilentGateway;

    #[async_trait]
    impl OrderGateway for SilentGateway {
        async fn submit_market(
            &self,
            _side: OrderSide,
            _quantity: rust_decimal::Decimal,
            client_id: &str,
        ) -> Result<Ack, GatewayError> {
            Ok(Ack {
                client_id: client_id.to_string(),
            })
        }

        async fn submit_stop(
            &self,
            _side: OrderSide,
            _trigger_price: rust_decimal::Decimal,
            _quantity: rust_decimal::Decimal,
            client_id: &str,
        ) -> Result<Ack, GatewayError> {
            Ok(Ack {
                client_id: client_id.to_string(),
            })
        }

        async fn submit_limit(
            &self,
            _side: OrderSide,
            _price: rust_decimal::Decimal,
            _quantity: rust_decimal::Decimal,
            client_id: &str,
        ) -> Result<Ack, GatewayError> {
            Ok(Ack {
                client_id: client_id.to_string(),
            })
        }

        async fn cancel(&self, client_id: &str) -> Result<Ack, GatewayError> {
            Ok(Ack {
                client_id: client_id.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_entry_timeout_discards_trade() {
        let config = EngineConfig {
            trade_delay: Duration::from_secs(0),
            order_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let clock = Arc::new(SimClock::new(0));
        let (journal, path) = temp_journal();
        let mut engine = Engine::new(
            config,
            Arc::new(SilentGateway),
            clock,
            Box::new(AlwaysLong),
            journal,
        )
        .unwrap();

        engine
            .handle_event(EngineEvent::Quote(Quote::new(
                dec!(1.10448),
                dec!(1.10450),
                SEC,
            )))
            .await
            .unwrap();
        assert!(engine.has_open_trade());

        // Before the timeout: still pending.
        engine
            .handle_event(EngineEvent::Timer { ts: 5 * SEC })
            .await
            .unwrap();
        assert!(engine.has_open_trade());

        // Past the timeout: abandoned without ladder effect.
        engine
            .handle_event(EngineEvent::Timer { ts: 12 * SEC })
            .await
            .unwrap();
        assert!(!engine.has_open_trade());
        assert_eq!(engine.stats().total_trades(), 0);
        assert_eq!(engine.ladder().history(), vec![dec!(100)]);

        std::fs::remove_file(&path).ok();
    }
}
