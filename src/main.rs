//! Step-Back Balance Trading Engine
//!
//! Single-instrument, single-position trading state machine over a
//! geometric balance ladder: wins advance one rung, losses are sized so
//! the realized amount steps the account back to the previous rung.

mod backtest;
mod clock;
mod engine;
mod gateway;
mod journal;
mod market;
mod metrics;
mod models;
mod signal;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use clock::Clock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::backtest::BacktestRunner;
use crate::clock::SystemClock;
use crate::engine::{Engine, EngineConfig, EngineEvent};
use crate::gateway::PaperGateway;
use crate::journal::Journal;
use crate::market::{QuoteFeed, RandomWalkFeed, ReplayFeed};
use crate::models::ExecutionEvent;
use crate::signal::AlwaysLong;

/// Step-back balance trading engine CLI.
#[derive(Parser)]
#[command(name = "stepback")]
#[command(about = "Step-back balance trading engine", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Seeded random-walk feed, paper execution, bounded run
    Demo,
    /// Historical CSV replay, paper execution
    Backtest,
    /// Wall-clock paced feed with paper execution
    Live,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading engine
    Run {
        #[arg(long, value_enum, default_value = "demo")]
        mode: Mode,

        /// First ladder rung in account currency
        #[arg(long, default_value = "100")]
        initial_balance: Decimal,

        /// Geometric step applied on a win
        #[arg(long, default_value = "1.30")]
        growth_factor: Decimal,

        /// Minimum seconds between a close and the next entry
        #[arg(long, default_value = "5")]
        trade_delay_secs: u64,

        /// Pause trading after this many losses in a row
        #[arg(long, default_value = "10")]
        max_consecutive_losses: u32,

        /// Journal output path (newline-delimited JSON)
        #[arg(long, default_value = "stepback-journal.jsonl")]
        journal: PathBuf,

        /// Quote CSV file, `ts_ns,bid,ask` rows (backtest mode)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Inclusive start date for backtests (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Exclusive end date for backtests (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Number of quotes to generate in demo mode
        #[arg(long, default_value = "500")]
        quotes: u64,

        /// Seed for the demo quote feed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Milliseconds between quotes in demo and live modes
        #[arg(long, default_value = "200")]
        pace_ms: u64,
    },

    /// Show the effective configuration
    Config {
        #[arg(long, default_value = "100")]
        initial_balance: Decimal,

        #[arg(long, default_value = "1.30")]
        growth_factor: Decimal,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to initialize logging");
        return ExitCode::FAILURE;
    }

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Configuration errors exit with a distinct code so
            // operators can tell a bad flag from an engine failure.
            let code = if e.downcast_ref::<engine::ConfigError>().is_some() {
                2
            } else {
                1
            };
            error!(error = %e, "fatal");
            eprintln!("error: {e:#}");
            ExitCode::from(code)
        }
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            mode,
            initial_balance,
            growth_factor,
            trade_delay_secs,
            max_consecutive_losses,
            journal,
            data,
            start_date,
            end_date,
            quotes,
            seed,
            pace_ms,
        } => {
            let config = EngineConfig {
                initial_balance,
                growth_factor,
                trade_delay: Duration::from_secs(trade_delay_secs),
                max_consecutive_losses,
                ..Default::default()
            };
            config.validate()?;

            let journal = Journal::open(&journal)?;

            match mode {
                Mode::Backtest => {
                    let data = data
                        .context("backtest mode requires --data <csv>")?;
                    let start = start_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());
                    let end = end_date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());
                    let feed = ReplayFeed::from_csv_path(&data, start, end)?;

                    let summary = BacktestRunner::new(config)
                        .run(feed, Box::new(AlwaysLong), journal)
                        .await?;
                    summary.print_report();
                }
                Mode::Demo => {
                    let clock = Arc::new(SystemClock::new());
                    let feed = RandomWalkFeed::eurusd(clock.now(), seed, Some(quotes));
                    run_session(config, feed, journal, clock, Duration::from_millis(pace_ms))
                        .await?;
                }
                Mode::Live => {
                    info!("live mode runs against the paper gateway; exchange adapters are out of scope");
                    let clock = Arc::new(SystemClock::new());
                    let feed = RandomWalkFeed::eurusd(clock.now(), seed, None);
                    run_session(config, feed, journal, clock, Duration::from_millis(pace_ms))
                        .await?;
                }
            }
            Ok(())
        }

        Commands::Config {
            initial_balance,
            growth_factor,
        } => {
            let config = EngineConfig {
                initial_balance,
                growth_factor,
                ..Default::default()
            };
            config.validate()?;

            println!("\n=== Engine Configuration ===\n");
            println!("Instrument:             {}", config.instrument.id);
            println!("Initial Balance:        ${}", config.initial_balance);
            println!("Growth Factor:          {}", config.growth_factor);
            println!(
                "Profit Target:          {}%",
                (config.growth_factor - Decimal::ONE) * Decimal::ONE_HUNDRED
            );
            println!("Trade Delay:            {:?}", config.trade_delay);
            println!("Max Consecutive Losses: {}", config.max_consecutive_losses);
            println!("Monetary Rounding:      {} dp, half-up", config.rounding_dp);
            println!("Base-Rung Loss Policy:  {:?}", config.base_rung_loss);
            println!();
            println!("Pip Size:               {}", config.instrument.pip_size);
            println!("Tick Size:              {}", config.instrument.tick_size);
            println!("Contract Size:          {}", config.instrument.contract_size);
            println!("Quantity Step:          {}", config.instrument.quantity_step);
            println!("Min Quantity:           {}", config.instrument.min_quantity);
            Ok(())
        }
    }
}

/// Demo and paper-live session: the feed, the execution stream, the
/// timer, and ctrl-c all enqueue onto one channel consumed by the
/// engine task in arrival order.
async fn run_session(
    config: EngineConfig,
    feed: impl QuoteFeed + 'static,
    journal: Journal,
    clock: Arc<SystemClock>,
    pace: Duration,
) -> Result<()> {
    let (gateway, mut exec_rx) = PaperGateway::new();
    let mut engine = Engine::new(
        config,
        gateway.clone(),
        clock.clone(),
        Box::new(AlwaysLong),
        journal,
    )?;

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(1024);

    // Market data task: the gateway sees each quote before the engine
    // so resting protective orders trigger in order.
    let feed_tx = tx.clone();
    let feed_gateway = gateway.clone();
    let feed_task = tokio::spawn(async move {
        let mut feed = feed;
        while let Some(quote) = feed.next_quote().await {
            feed_gateway.on_quote(&quote).await;
            if feed_tx.send(EngineEvent::Quote(quote)).await.is_err() {
                return;
            }
            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
        }
        info!("quote feed exhausted");
        let _ = feed_tx.send(EngineEvent::Shutdown).await;
    });

    // Execution stream forwarder.
    let exec_tx = tx.clone();
    let exec_task = tokio::spawn(async move {
        while let Some(event) = exec_rx.recv().await {
            let event = match event {
                ExecutionEvent::Fill(fill) => EngineEvent::Fill(fill),
                ExecutionEvent::Reject(reject) => EngineEvent::Reject(reject),
            };
            if exec_tx.send(event).await.is_err() {
                return;
            }
        }
    });

    // Periodic timer for entry-timeout enforcement.
    let timer_tx = tx.clone();
    let timer_clock = clock.clone();
    let timer_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let event = EngineEvent::Timer {
                ts: timer_clock.now(),
            };
            if timer_tx.send(event).await.is_err() {
                return;
            }
        }
    });

    // Shutdown signal.
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(EngineEvent::Shutdown).await;
        }
    });

    drop(tx);
    let result = engine.run(&mut rx).await;

    feed_task.abort();
    exec_task.abort();
    timer_task.abort();

    result?;
    print_session_report(&engine);
    Ok(())
}

fn print_session_report(engine: &Engine) {
    let stats = engine.stats();
    let final_balance = engine.ladder().current_stake();

    println!("\n=== Session Summary ===\n");
    println!("Initial Balance: ${:.2}", stats.initial_balance());
    println!("Final Balance:   ${:.2}", final_balance);
    println!(
        "Total Return:    {:.2}%",
        stats.total_return(final_balance) * Decimal::ONE_HUNDRED
    );
    println!("Total Trades:    {}", stats.total_trades());
    println!(
        "Wins / Losses:   {} / {}",
        stats.winning_trades(),
        stats.losing_trades()
    );
    println!("Win Rate:        {:.1}%", stats.win_rate() * 100.0);
    println!("Max Step:        {}", stats.max_step());
    println!(
        "Balance History: {:?}",
        engine.ladder().history()
    );
}
