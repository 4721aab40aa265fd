use std::{fs::File, path::PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use vault_ledger::{
    domain::Money,
    engine::{Engine, EngineConfig, LedgerError, MemoryStore, Store},
    output, parsing, snapshot,
};

fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    if let Some(log_level) = args.log_level {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = EngineConfig {
        rescan_threshold: match args.rescan_threshold {
            Some(threshold) => Money::try_from(threshold)?,
            None => Money::ZERO,
        },
    };
    let tables = snapshot::load(&args.snapshot_dir)?;
    let engine = Engine::new(MemoryStore::from(tables), config);

    match args.command {
        Command::Apply { events } => {
            let file = File::open(&events)
                .with_context(|| format!("opening {}", events.display()))?;
            let mut rdr = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(file);
            engine.process_events(parsing::deserialize_csv(&mut rdr));
            snapshot::save(&engine.store().snapshot(), &args.snapshot_dir)?;
            output::print_banks(&engine.store().snapshot(), std::io::stdout())?;
        }
        Command::Scan => {
            let report = engine.scan();
            output::print_drift(&report, std::io::stdout())?;
            let confirmed = report.confirmed().count();
            if confirmed > 0 {
                return Err(LedgerError::DriftDetected(confirmed).into());
            }
        }
        Command::Correct => {
            let summary = engine.correct();
            snapshot::save(&engine.store().snapshot(), &args.snapshot_dir)?;
            output::print_summary(&summary, std::io::stdout())?;
        }
        Command::Banks => {
            output::print_banks(&engine.store().snapshot(), std::io::stdout())?;
        }
    }
    Ok(())
}

#[derive(Parser)]
struct Arguments {
    /// Directory holding the CSV snapshot tables. Created on first write.
    snapshot_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
    #[arg(long, global = true)]
    log_level: Option<tracing::Level>,
    /// Drift below this amount is reported as needing a rescan.
    #[arg(long, global = true)]
    rescan_threshold: Option<Decimal>,
}

#[derive(Subcommand)]
enum Command {
    /// Processes an event CSV and saves the resulting state.
    Apply { events: PathBuf },
    /// Reports drift without writing.
    Scan,
    /// Scans, closes the drift found and saves.
    Correct,
    /// Prints the seven vaults.
    Banks,
}
