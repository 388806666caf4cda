//! Relay CLI - command-line interface for the HRV relay
//!
//! Commands:
//! - compute: Compute HRV from recorded beat intervals
//! - simulate: Run the wearable sampler and the phone receiver in one process
//! - decode: Decode an `/hrv_data` datagram into the entry the phone would store
//! - config: Print the default configuration

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use hrv_relay::sensor::SimulatedSource;
use hrv_relay::store::InMemoryHealthStore;
use hrv_relay::transport::SimDataLayer;
use hrv_relay::window::{self, SensorReading};
use hrv_relay::{
    HostReceiver, HrvEntry, HrvReceipt, Observers, RelayConfig, RelayError, RelayEvent, Sampler,
    RELAY_VERSION,
};

/// Relay - on-wearable HRV sampling relayed to a paired phone
#[derive(Parser)]
#[command(name = "relay")]
#[command(version = RELAY_VERSION)]
#[command(about = "Compute, simulate, and decode HRV relay data", long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute HRV from a JSON array of beat intervals (ms)
    Compute {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Run sampler, data layer, and receiver in one process
    Simulate {
        /// Number of measurement cycles to run
        #[arg(long, default_value = "1")]
        cycles: u32,

        /// Measurement window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,

        /// Rest period length in seconds
        #[arg(long)]
        rest_secs: Option<u64>,

        /// Resting heart rate the simulated sensor oscillates around
        #[arg(long, default_value = "65")]
        base_bpm: f64,

        /// Delay between simulated sensor readings in milliseconds
        #[arg(long, default_value = "1000")]
        spacing_ms: u64,
    },

    /// Decode an /hrv_data datagram (JSON)
    Decode {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), RelayCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compute { input } => cmd_compute(&input),
        Commands::Simulate {
            cycles,
            window_secs,
            rest_secs,
            base_bpm,
            spacing_ms,
        } => {
            let mut config = config;
            if let Some(secs) = window_secs {
                config.sampler.window_secs = secs;
            }
            if let Some(secs) = rest_secs {
                config.sampler.rest_secs = secs;
            }
            cmd_simulate(config, cycles, base_bpm, Duration::from_millis(spacing_ms)).await
        }
        Commands::Decode { input } => cmd_decode(&input),
        Commands::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RelayConfig, RelayCliError> {
    match path {
        Some(path) => Ok(RelayConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(RelayConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, RelayCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(RelayCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_compute(input: &Path) -> Result<(), RelayCliError> {
    let intervals: Vec<f64> = serde_json::from_str(&read_input(input)?)?;
    let result = window::compute_recorded(&intervals)?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn cmd_decode(input: &Path) -> Result<(), RelayCliError> {
    let receipt: HrvReceipt = serde_json::from_str(&read_input(input)?)?;
    let entry = HrvEntry::from_receipt(&receipt)?;
    println!("{}", serde_json::to_string(&entry)?);
    Ok(())
}

/// Readings for one simulated window: a slow oscillation around `base_bpm`,
/// with every fifth reading carrying no interval so the rate fallback is used.
fn simulated_readings(cycle: u32, base_bpm: f64, count: usize) -> Vec<SensorReading> {
    (0..count)
        .map(|i| {
            let phase = i as f64 * 0.7 + f64::from(cycle);
            let bpm = base_bpm + 4.0 * phase.sin();
            if i % 5 == 4 {
                SensorReading::from_bpm(bpm)
            } else {
                SensorReading::with_interval(bpm, 60_000.0 / bpm)
            }
        })
        .collect()
}

async fn cmd_simulate(
    config: RelayConfig,
    cycles: u32,
    base_bpm: f64,
    spacing: Duration,
) -> Result<(), RelayCliError> {
    let per_window = (config.sampler.window().as_millis() / spacing.as_millis().max(1)) as usize;

    let layer = SimDataLayer::new();
    let watch = layer.create_node();
    let phone = layer.create_node();
    let inbox = phone.take_inbox().ok_or(RelayCliError::Setup("phone inbox"))?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let observers = Observers::new();
    observers.register(Arc::new(move |event: &RelayEvent| {
        let _ = events_tx.send(event.clone());
    }));

    let store = Arc::new(InMemoryHealthStore::new());
    let _receiver = HostReceiver::new(store.clone(), &config)
        .with_observers(observers.clone())
        .spawn(inbox);

    let source = SimulatedSource::new()
        .with_spacing(spacing)
        .with_generator(move |cycle| simulated_readings(cycle, base_bpm, per_window));
    let handle = Sampler::new(Arc::new(source), Arc::new(watch), &config)
        .with_observers(observers)
        .start();

    let mut finished = 0;
    while finished < cycles {
        let Some(event) = events_rx.recv().await else {
            break;
        };
        match event {
            RelayEvent::Persisted(entry) => {
                println!("{}", serde_json::to_string(&entry)?);
                finished += 1;
            }
            RelayEvent::Skipped { .. } | RelayEvent::PersistFailed { .. } => finished += 1,
            RelayEvent::Transmitted(report) if report.delivered == 0 => finished += 1,
            _ => {}
        }
    }

    handle.stop().await;
    log::info!("Simulation finished, {} entries stored", store.hrv_entries().await.len());
    Ok(())
}

// Error types

#[derive(Debug)]
enum RelayCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Relay(RelayError),
    NoInput,
    Setup(&'static str),
}

impl From<io::Error> for RelayCliError {
    fn from(e: io::Error) -> Self {
        RelayCliError::Io(e)
    }
}

impl From<serde_json::Error> for RelayCliError {
    fn from(e: serde_json::Error) -> Self {
        RelayCliError::Json(e)
    }
}

impl From<RelayError> for RelayCliError {
    fn from(e: RelayError) -> Self {
        RelayCliError::Relay(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RelayCliError> for CliError {
    fn from(e: RelayCliError) -> Self {
        match e {
            RelayCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RelayCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RelayCliError::Relay(e) => {
                let hint = match &e {
                    RelayError::InsufficientSamples(_) => {
                        Some("Provide more than two intervals between 300 and 2000 ms".to_string())
                    }
                    RelayError::Decode(_) => {
                        Some("Datagram needs a non-negative rmssd and an epoch-ms timestamp".to_string())
                    }
                    _ => None,
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint,
                }
            }
            RelayCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "No input on stdin".to_string(),
                hint: Some("Pipe JSON into the command or pass --input <file>".to_string()),
            },
            RelayCliError::Setup(what) => CliError {
                code: "SETUP_ERROR".to_string(),
                message: format!("Could not set up {}", what),
                hint: None,
            },
        }
    }
}
