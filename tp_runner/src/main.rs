//! Multi-table automation runner over a simulated surface.
//!
//! Builds an orchestrator from environment settings and a roster, runs every
//! table until Ctrl-C (or the run time elapses), then shuts down in order.

mod config;
mod logging;
mod sim;

use anyhow::Error;
use ctrlc::set_handler;
use log::info;
use pico_args::Arguments;
use tablepilot::{Orchestrator, TableId, store::Session};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use config::{Overrides, RunnerConfig};

const HELP: &str = "\
Run the multi-table automation core against simulated tables

USAGE:
  tp_runner [OPTIONS]

OPTIONS:
  --config         PATH    Roster JSON file              [default: env TP_ROSTER or generated]
  --data-dir       PATH    Root folder for sessions      [default: env TP_DATA_DIR or data/sessions]
  --tables         N       Generated tables (1-6)        [default: env TP_SIM_TABLES or 2]
  --fail-rate      P       Injected failure rate (0-1)   [default: env TP_SIM_FAIL_RATE or 0]
  --duration-secs  SECS    Stop after SECS seconds       [default: env TP_RUN_SECS or run until Ctrl-C]
  --reload-every   SECS    Simulate a surface reload     [default: env TP_SIM_RELOAD_SECS or never]
  --resume         PATH    Continue an existing session  [default: env TP_RESUME_DIR or a new session]

FLAGS:
  --simulate               Drive simulated tables (the only built-in surface)
  -h, --help               Print help information

ENVIRONMENT:
  RUST_LOG                 Log filter (e.g. info,tablepilot=debug)
  TP_CPU_THRESHOLD         CPU percent above which cadence is throttled
  TP_INTERVAL_NORMAL_MS    Sampling interval while the timer is high
  (See GlobalSettings for all TP_* options)
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    if !pargs.contains("--simulate") {
        anyhow::bail!("No capture backend is built in; run with --simulate (see --help)");
    }

    let overrides = Overrides {
        roster_path: pargs.opt_value_from_str("--config")?,
        data_dir: pargs.opt_value_from_str("--data-dir")?,
        tables: pargs.opt_value_from_str("--tables")?,
        fail_rate: pargs.opt_value_from_str("--fail-rate")?,
        duration_secs: pargs.opt_value_from_str("--duration-secs")?,
        reload_every_secs: pargs.opt_value_from_str("--reload-every")?,
        resume_dir: pargs.opt_value_from_str("--resume")?,
    };

    logging::init();

    let config = RunnerConfig::from_env(overrides)?;
    let roster = config.roster()?;
    let ids: Vec<TableId> = roster.tables.iter().map(|t| t.id).collect();

    let mut session = match &config.resume_dir {
        Some(dir) => Session::resume(dir)?,
        None => Session::create(&config.settings.data_dir, &config.settings, &ids)?,
    };
    let orchestrator = Orchestrator::new(
        config.settings.clone(),
        sim::collaborators(&config.sim, &roster),
        session.dir(),
    );

    let mut events = orchestrator.subscribe();
    let feed = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => logging::log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Status feed lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Catching signals for exit.
    let stop = CancellationToken::new();
    let signal = stop.clone();
    set_handler(move || signal.cancel())?;

    orchestrator.start().await;
    for table in roster.table_configs() {
        let table_id = table.id;
        orchestrator.add_table(table).await?;
        orchestrator.activate(table_id).await?;
    }
    info!(
        "Running {} table(s), session folder {}",
        ids.len(),
        session.dir().display()
    );

    match config.duration {
        Some(limit) => {
            tokio::select! {
                _ = stop.cancelled() => info!("Interrupted"),
                _ = tokio::time::sleep(limit) => info!("Run time of {:?} elapsed", limit),
            }
        }
        None => {
            stop.cancelled().await;
            info!("Interrupted");
        }
    }

    run_summary(&orchestrator).await;

    let flushed = orchestrator.shutdown().await?;
    info!("Flushed {} table(s)", flushed);
    feed.abort();

    session.close()?;
    Ok(())
}

async fn run_summary(orchestrator: &Orchestrator) {
    for snapshot in orchestrator.snapshots().await {
        let counts = &snapshot.counts;
        info!(
            "Table {}: {} rounds, {} decisions ({} correct, {} incorrect), {} skipped, {} errors{}",
            snapshot.table_id,
            counts.rounds,
            counts.decisions,
            counts.correct,
            counts.incorrect,
            counts.skipped,
            snapshot.errors.total_errors,
            if snapshot.errors.fallback_active {
                ", fallback recognition"
            } else {
                ""
            }
        );
    }
}
