use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use dual_sequencer::sim::{LogSink, SimulatedExternalClock, SimulatedPot};
use dual_sequencer::{
    ClockSource, ConfigError, InvalidPattern, MonotonicClock, Runtime, RuntimeError,
    RuntimeOptions, SequencerConfig, SequencerController, TimingCore, TriggerPattern,
    create_channel,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] InvalidPattern),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Failed to serialize configuration: {0}")]
    Ron(#[from] ron::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Dual-context step sequencer running on simulated hardware", long_about = None)]
struct Cli {
    /// RON configuration file; defaults are used for missing fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to run, in milliseconds.
    #[arg(short, long, default_value_t = 4_000)]
    duration_ms: u64,

    /// Initial tempo.
    #[arg(short, long)]
    bpm: Option<f32>,

    /// Step string such as "1010"; '1' fires every lane.
    #[arg(short, long)]
    pattern: Option<String>,

    /// Ignore the external clock input.
    #[arg(long)]
    internal_only: bool,

    /// Feed an external clock at this tempo.
    #[arg(long)]
    ext_bpm: Option<f32>,

    /// Delay before the first external edge, in milliseconds.
    #[arg(long, default_value_t = 0)]
    ext_start_ms: u64,

    /// Number of external edges before the cable is "unplugged".
    #[arg(long)]
    ext_edges: Option<u64>,

    /// Raw potentiometer readings to replay (comma separated).
    #[arg(long, value_delimiter = ',')]
    pot: Vec<u16>,

    /// Print the effective configuration as RON and exit.
    #[arg(long)]
    dump_config: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    timing: &'a dual_sequencer::TimingStatus,
    controller: &'a dual_sequencer::ControllerStatus,
    fires_per_lane: &'a [u64],
}

fn main() -> Result<(), AppError> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SequencerConfig::load(path)?,
        None => SequencerConfig::default(),
    };

    if cli.dump_config {
        println!("{}", config.to_ron_string()?);
        return Ok(());
    }

    run(&cli, &config)
}

fn run(cli: &Cli, config: &SequencerConfig) -> Result<(), AppError> {
    tracing::info!(duration_ms = cli.duration_ms, "starting sequencer");

    let clock = MonotonicClock::new();
    let (timing_end, control_end) = create_channel(
        config.channel.timing_to_control,
        config.channel.control_to_timing,
    );

    let pot = if cli.pot.is_empty() {
        // Mid-travel knob, maps to roughly 107 BPM with the default range
        SimulatedPot::constant(config.controller.pot_raw_max / 2)
    } else {
        SimulatedPot::new(cli.pot.clone())
    };
    let edges = cli.ext_bpm.map(|bpm| {
        let period = dual_sequencer::timing::clock::period_for_bpm(bpm, config.clock.steps_per_beat);
        let ext = SimulatedExternalClock::new(clock, cli.ext_start_ms * 1_000, period);
        match cli.ext_edges {
            Some(count) => ext.with_edge_count(count),
            None => ext,
        }
    });

    let timing = TimingCore::new(config, timing_end, pot, edges);
    let mut controller = SequencerController::new(config, control_end, LogSink::default());

    if let Some(steps) = &cli.pattern {
        controller.edit_pattern(TriggerPattern::simple(steps, config.scheduler.lanes)?)?;
    }
    if cli.internal_only {
        controller.set_preferred_source(ClockSource::Internal);
    }
    if let Some(bpm) = cli.bpm {
        controller.set_bpm(bpm);
    }

    let runtime = Runtime::spawn(timing, controller, clock, RuntimeOptions::default())?;
    thread::sleep(Duration::from_millis(cli.duration_ms));
    let report = runtime.stop()?;

    let summary = Summary {
        timing: &report.timing,
        controller: &report.controller,
        fires_per_lane: report.sink.totals(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
