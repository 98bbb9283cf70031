//! Photic BCI demo application
//!
//! Runs the SSVEP classification engine against a synthetic producer and
//! emits detection events as JSON lines on stdout, one per detection tick.
//! Downstream collaborators (transports, UIs) consume that stream; this
//! binary contains no transport or UI logic of its own.
//!
//! # Usage
//!
//! ```bash
//! # Online detection against a synthetic 15 Hz stimulus
//! photic run --frequency 15 --duration 20
//!
//! # Correlation detector, four targets
//! photic run --detector cca --targets 8,10,12,15 --frequency 12
//!
//! # Scripted calibration sequence, then print the outcome
//! photic calibrate --detector psd
//! ```

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use photic_bci_core::config::{DetectorKind, EngineConfig};
use photic_bci_engine::{CalibrationPhase, Session, SyntheticSsvep};

/// Photic SSVEP engine demo
#[derive(Parser, Debug)]
#[command(name = "photic")]
#[command(author, version, about = "Photic SSVEP classification engine", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Sampling rate in Hz
    #[arg(long, default_value = "250")]
    rate: f64,

    /// Number of channels the synthetic producer simulates
    #[arg(long, default_value = "8")]
    channels: usize,

    /// Target stimulation frequencies in Hz
    #[arg(long, value_delimiter = ',', default_value = "10,15")]
    targets: Vec<f64>,

    /// Detection strategy: psd, cca, or fbcca
    #[arg(short, long, default_value = "psd")]
    detector: String,

    /// Minimum best score for a candidate (defaults per strategy)
    #[arg(long)]
    threshold: Option<f64>,

    /// Analysis window in seconds
    #[arg(long, default_value = "2.0")]
    window: f64,

    /// Detection tick interval in seconds
    #[arg(long, default_value = "0.25")]
    step: f64,

    /// RNG seed for the synthetic producer
    #[arg(long, default_value = "7")]
    seed: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Online detection against a synthetic stimulus
    Run {
        #[command(flatten)]
        engine: EngineArgs,

        /// Frequency the simulated subject attends, in Hz
        #[arg(short, long, default_value = "10.0")]
        frequency: f64,

        /// Synthetic signal-to-noise ratio
        #[arg(long, default_value = "3.0")]
        snr: f64,

        /// How long to run, in seconds
        #[arg(long, default_value = "20")]
        duration: u64,
    },

    /// Scripted calibration sequence against the synthetic producer
    Calibrate {
        #[command(flatten)]
        engine: EngineArgs,

        /// Synthetic signal-to-noise ratio
        #[arg(long, default_value = "4.0")]
        snr: f64,
    },
}

fn main() -> anyhow::Result<()> {
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
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Photic BCI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            engine,
            frequency,
            snr,
            duration,
        } => run_online(&engine, frequency, snr, duration),
        Commands::Calibrate { engine, snr } => run_calibration(&engine, snr),
    }
}

fn build_config(args: &EngineArgs) -> anyhow::Result<EngineConfig> {
    let detector = match args.detector.to_lowercase().as_str() {
        "psd" => DetectorKind::Psd,
        "cca" => DetectorKind::Cca,
        "fbcca" => DetectorKind::Fbcca,
        other => bail!("unknown detector kind: {other} (expected psd, cca, or fbcca)"),
    };
    // Correlation scores live in [0, 1]; SNR scores do not
    let threshold = args.threshold.unwrap_or(match detector {
        DetectorKind::Psd => 2.0,
        DetectorKind::Cca | DetectorKind::Fbcca => 0.25,
    });

    let config = EngineConfig {
        sampling_rate: args.rate,
        target_frequencies: args.targets.clone(),
        detector,
        min_score_threshold: threshold,
        window_seconds: args.window,
        step_seconds: args.step,
        buffer_seconds: (2.0 * args.window).max(4.0),
        filter_bank: photic_bci_core::config::FilterBankConfig {
            enabled: detector == DetectorKind::Fbcca,
            ..Default::default()
        },
        ..EngineConfig::default()
    };
    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

/// Producer loop: feed synthetic chunks at the hardware's natural cadence.
fn spawn_producer(
    synth: Arc<Mutex<SyntheticSsvep>>,
    handle: photic_bci_engine::IngestHandle,
    stop: photic_bci_engine::StopFlag,
    rate: f64,
) -> std::thread::JoinHandle<()> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let chunk_samples = ((rate * 0.05).round() as usize).max(1);
    std::thread::spawn(move || {
        while !stop.is_stopped() {
            let chunk = {
                let mut synth = match synth.lock() {
                    Ok(synth) => synth,
                    Err(poisoned) => poisoned.into_inner(),
                };
                synth.next_chunk(chunk_samples)
            };
            if let Err(err) = handle.ingest(&chunk, rate) {
                warn!(%err, "producer stopping");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    })
}

fn run_online(args: &EngineArgs, frequency: f64, snr: f64, duration: u64) -> anyhow::Result<()> {
    let config = build_config(args)?;
    let mut session = Session::new(config, args.channels)?;
    let handle = session.ingest_handle();
    let stop = session.stop_flag();

    info!(frequency, snr, duration, "starting synthetic online run");
    let synth = Arc::new(Mutex::new(SyntheticSsvep::new(
        args.rate,
        args.channels,
        frequency,
        snr,
        args.seed,
    )));
    let producer = spawn_producer(Arc::clone(&synth), handle, stop.clone(), args.rate);

    let (tx, rx) = mpsc::channel();
    let detector_thread = std::thread::spawn(move || {
        session.run_online(&tx);
    });

    let deadline = Instant::now() + Duration::from_secs(duration);
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    stop.stop();
    producer.join().ok();
    detector_thread.join().ok();
    info!("run complete");
    Ok(())
}

fn run_calibration(args: &EngineArgs, snr: f64) -> anyhow::Result<()> {
    let config = build_config(args)?;
    let mut session = Session::new(config, args.channels)?;
    let handle = session.ingest_handle();
    let stop = session.stop_flag();

    // The simulated subject rests until cued to a target
    let synth = Arc::new(Mutex::new(SyntheticSsvep::new(
        args.rate,
        args.channels,
        args.targets[0],
        snr,
        args.seed,
    )));
    if let Ok(mut synth) = synth.lock() {
        synth.set_stimulated(false);
    }
    let producer = spawn_producer(Arc::clone(&synth), handle, stop.clone(), args.rate);

    let cue_synth = Arc::clone(&synth);
    let result = session.run_calibration(move |phase| {
        info!(phase = %phase.label(), "calibration cue");
        let mut synth = match cue_synth.lock() {
            Ok(synth) => synth,
            Err(poisoned) => poisoned.into_inner(),
        };
        match phase {
            CalibrationPhase::Baseline => synth.set_stimulated(false),
            CalibrationPhase::Target { frequency } => {
                synth.set_stimulated(true);
                synth.set_frequency(*frequency);
            }
        }
    });

    stop.stop();
    producer.join().ok();

    let outcome = result?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
