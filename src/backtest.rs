//! Backtesting: replays historical quotes through the engine with the
//! paper gateway and reports performance statistics.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tracing::info;

use crate::clock::SimClock;
use crate::engine::{Engine, EngineConfig, EngineEvent};
use crate::gateway::PaperGateway;
use crate::journal::Journal;
use crate::market::QuoteFeed;
use crate::models::ExecutionEvent;
use crate::signal::EntryPredicate;

/// Backtest results summary.
#[derive(Debug, Clone)]
pub struct BacktestSummary {
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub neutral_closes: u64,
    pub win_rate: f64,
    pub max_step: usize,
    pub max_drawdown_pct: Decimal,
    pub quotes_processed: u64,
}

impl BacktestSummary {
    pub fn print_report(&self) {
        println!("\n=== Backtest Results ===\n");
        println!("Initial Balance: ${:.2}", self.initial_balance);
        println!("Final Balance:   ${:.2}", self.final_balance);
        println!("Total Return:    {:.2}%", self.total_return_pct);
        println!("Max Drawdown:    {:.2}%", self.max_drawdown_pct);
        println!();
        println!("Total Trades:    {}", self.total_trades);
        println!("Winning Trades:  {}", self.winning_trades);
        println!("Losing Trades:   {}", self.losing_trades);
        if self.neutral_closes > 0 {
            println!("Neutral Closes:  {}", self.neutral_closes);
        }
        println!("Win Rate:        {:.1}%", self.win_rate * 100.0);
        println!("Max Step:        {}", self.max_step);
        println!();
        println!("Quotes Replayed: {}", self.quotes_processed);
    }
}

/// Drives the engine synchronously: each quote reaches the gateway
/// first (fills it triggers are delivered to the engine immediately),
/// then the engine itself, preserving channel-arrival order.
pub struct BacktestRunner {
    config: EngineConfig,
}

impl BacktestRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        mut feed: impl QuoteFeed,
        predicate: Box<dyn EntryPredicate>,
        journal: Journal,
    ) -> Result<BacktestSummary> {
        let (gateway, mut exec_rx) = PaperGateway::new();
        let clock = Arc::new(SimClock::new(0));
        let mut engine = Engine::new(
            self.config.clone(),
            gateway.clone(),
            clock.clone(),
            predicate,
            journal,
        )?;

        let mut quotes_processed = 0u64;
        while let Some(quote) = feed.next_quote().await {
            quotes_processed += 1;
            clock.set(quote.ts);

            gateway.on_quote(&quote).await;
            drain_execution(&mut engine, &mut exec_rx).await?;
            engine.handle_event(EngineEvent::Quote(quote)).await?;
            drain_execution(&mut engine, &mut exec_rx).await?;
        }

        info!(quotes = quotes_processed, "quote replay finished");
        engine.handle_event(EngineEvent::Shutdown).await?;

        let stats = engine.stats();
        let ladder = engine.ladder();
        let final_balance = ladder.current_stake();
        Ok(BacktestSummary {
            initial_balance: stats.initial_balance(),
            final_balance,
            total_return_pct: stats.total_return(final_balance) * dec!(100),
            total_trades: stats.total_trades(),
            winning_trades: stats.winning_trades(),
            losing_trades: stats.losing_trades(),
            neutral_closes: stats.neutral_closes(),
            win_rate: stats.win_rate(),
            max_step: stats.max_step(),
            max_drawdown_pct: stats.max_drawdown() * dec!(100),
            quotes_processed,
        })
    }
}

async fn drain_execution(
    engine: &mut Engine,
    exec_rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>,
) -> Result<()> {
    while let Ok(event) = exec_rx.try_recv() {
        let event = match event {
            ExecutionEvent::Fill(fill) => EngineEvent::Fill(fill),
            ExecutionEvent::Reject(reject) => EngineEvent::Reject(reject),
        };
        engine.handle_event(event).await?;
    }
    Ok(())
}
