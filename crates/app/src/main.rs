use std::{
    fs::File,
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use error_echo_core::{
    read_frames, AppConfig, BridgeEvent, EchoEngine, EchoError, IngestStats, Platform, Result,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

/// Longest the live loop sleeps between checks of the transport.
const MAX_IDLE_SECONDS: f64 = 0.05;

/// Epoch millisecond the simulated stream starts at.
const SIMULATED_EPOCH_MS: f64 = 1_500_000_000_000.0;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live {
            config,
            input,
            seed,
            duration,
        } => run_live(config.as_deref(), input, seed, duration),
        Commands::Simulate {
            config,
            rate,
            cycles,
            seed,
        } => run_simulate(config.as_deref(), rate, cycles, seed),
        Commands::Defaults => print_defaults(),
    }
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    if seed.is_some() {
        config.seed = seed;
    }
    Ok(config)
}

fn run_live(
    config: Option<&Path>,
    input: Option<PathBuf>,
    seed: Option<u64>,
    duration: Option<f64>,
) -> Result<()> {
    let config = load_config(config, seed)?;
    let mut engine = EchoEngine::new(config)?;
    let mut ingestor = engine.ingestor();

    tracing::info!(?input, duration, "starting live mode");
    let reader = thread::spawn(move || -> Result<IngestStats> {
        match input {
            Some(path) if path.as_os_str() != "-" => {
                read_frames(BufReader::new(File::open(path)?), &mut ingestor)
            }
            _ => read_frames(io::stdin().lock(), &mut ingestor),
        }
    });

    let clock = Instant::now();
    engine.start(0.0)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut stop_at = duration;

    loop {
        let now = clock.elapsed().as_secs_f64();
        engine.advance_to(now);
        emit(&mut out, engine.drain_events())?;

        if stop_at.is_some_and(|end| now >= end) {
            break;
        }
        if stop_at.is_none() && reader.is_finished() {
            // Let the last collected cycle play out before leaving.
            let transport = engine.transport();
            let position = transport.position();
            let play_out = transport
                .tempo_map()
                .span_seconds(position, position + engine.loop_cycle());
            stop_at = Some(now + 2.0 * play_out);
            tracing::info!(play_out_seconds = 2.0 * play_out, "input closed");
        }

        let idle = engine
            .next_due_seconds()
            .map_or(MAX_IDLE_SECONDS, |due| (due - now).clamp(0.0, MAX_IDLE_SECONDS));
        thread::sleep(Duration::from_secs_f64(idle));
    }

    if reader.is_finished() {
        match reader.join() {
            Ok(Ok(stats)) => log_stats(&stats),
            Ok(Err(err)) => tracing::warn!(%err, "input stream failed"),
            Err(_) => tracing::warn!("input reader panicked"),
        }
    }
    Ok(())
}

fn run_simulate(
    config: Option<&Path>,
    rate: f64,
    cycles: usize,
    seed: Option<u64>,
) -> Result<()> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(EchoError::InvalidInput("rate must be a positive number"));
    }

    let config = load_config(config, seed)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_os_rng(),
    };
    let mut engine = EchoEngine::new(config)?;
    let mut ingestor = engine.ingestor();
    let wanted_plans = cycles * engine.platforms().len();

    tracing::info!(rate, cycles, "starting simulation");
    engine.start(0.0)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut now = 0.0;
    let mut next_arrival = exponential_gap(&mut rng, rate);
    let mut plans = 0;

    while plans < wanted_plans {
        let due = engine.next_due_seconds().unwrap_or(f64::INFINITY);
        if next_arrival <= due {
            now = next_arrival;
            ingestor.handle_frame(&synthetic_frame(&mut rng, now));
            next_arrival += exponential_gap(&mut rng, rate);
            continue;
        }

        now = due;
        engine.advance_to(now);
        let events = engine.drain_events();
        plans += events
            .iter()
            .filter(|event| matches!(event, BridgeEvent::Plan(_)))
            .count();
        emit(&mut out, events)?;
    }

    tracing::info!(
        simulated_seconds = now,
        bpm = engine.tempo().current_bpm,
        "simulation finished"
    );
    log_stats(&ingestor.stats());
    Ok(())
}

fn exponential_gap(rng: &mut impl Rng, rate: f64) -> f64 {
    let uniform: f64 = rng.random();
    -(1.0 - uniform).ln() / rate
}

/// A frame as the live stream would send it, from any known platform.
fn synthetic_frame(rng: &mut impl Rng, now: f64) -> String {
    let platform = Platform::ALL[rng.random_range(0..Platform::ALL.len())];
    let latitude = rng.random_range(-90.0..90.0);
    let longitude = rng.random_range(-180.0..180.0);
    let timestamp = SIMULATED_EPOCH_MS + now * 1000.0;
    serde_json::json!([latitude, longitude, timestamp, platform]).to_string()
}

fn emit(out: &mut impl Write, events: Vec<BridgeEvent>) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    for event in &events {
        serde_json::to_writer(&mut *out, event)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn log_stats(stats: &IngestStats) {
    tracing::info!(
        accepted = stats.accepted,
        unknown_platform = stats.unknown_platform,
        malformed = stats.malformed,
        "ingestion summary"
    );
}

fn print_defaults() -> Result<()> {
    let text = serde_json::to_string_pretty(&AppConfig::default())?;
    writeln!(io::stdout(), "{text}")?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Turns a live error stream into looping music", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a live stream of `[lat, lon, timestamp_ms, "platform"]` frames.
    Live {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Frame source, newline-delimited or server-sent events. Reads
        /// stdin when omitted or `-`.
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Seed for the pitch walk.
        #[arg(long)]
        seed: Option<u64>,
        /// Stop after this many seconds.
        #[arg(short, long)]
        duration: Option<f64>,
    },
    /// Run against a synthetic stream on a virtual clock.
    Simulate {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Mean events per second across all platforms.
        #[arg(short, long, default_value_t = 40.0)]
        rate: f64,
        /// Number of loop cycles to lay out before stopping.
        #[arg(short = 'n', long, default_value_t = 4)]
        cycles: usize,
        /// Seed for the pitch walk and the synthetic stream.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the default configuration.
    Defaults,
}
