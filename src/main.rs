use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, TimeDelta};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use barkwatch::audio;
use barkwatch::config::{Config, DEFAULT_CONFIG_FILE};
use barkwatch::engine::{Collaborators, Engine, EngineHandle};
use barkwatch::feedback::FeedbackSelector;
use barkwatch::playback::CommandPlayer;
use barkwatch::spectrum::{AnalysisWindow, SpectralAnalyzer};
use barkwatch::store::{JsonFingerprintStore, JsonParameterStore, JsonlEventLog};

/// Pause between a lost device and the next attempt to open one.
const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// Listen for barks and answer with a familiar voice.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen on the microphone and play feedback on barks
    Listen {
        /// Give up after this many device restarts
        #[arg(long, default_value_t = 10)]
        max_restarts: u32,
    },

    /// Add recorded barks (WAV files) to the fingerprint library
    Learn {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show recent feedback events
    History {
        /// How many days back to look
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(i64).range(0..))]
        days: i64,

        /// Maximum number of events
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },

    /// List audio input devices
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from '{}'", cli.config.display()))?;

    match cli.command {
        Commands::Listen { max_restarts } => listen(config, max_restarts),
        Commands::Learn { files } => learn(&config, &files),
        Commands::History { days, limit } => history(&config, days, limit),
        Commands::Devices => devices(),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "barkwatch=debug" } else { "barkwatch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

fn listen(config: Config, max_restarts: u32) -> Result<()> {
    let selector = FeedbackSelector::scan(&config.paths.audio_dir, &config.voices);
    if selector.playable_voices().next().is_none() {
        warn!(
            dir = %config.paths.audio_dir.display(),
            "no voice clips found, feedback will be logged but not played"
        );
    }

    let collaborators = Collaborators {
        fingerprints: Arc::new(JsonFingerprintStore::new(&config.paths.fingerprints)),
        events: Arc::new(JsonlEventLog::new(&config.paths.events)),
        player: Arc::new(CommandPlayer::new(&config.playback)),
        parameters: Arc::new(JsonParameterStore::new(&config.paths.parameters)),
    };
    let device = config.device.clone();
    let sample_rate = config.sample_rate;

    let mut engine = Engine::new(config, collaborators, selector)?;
    let handle = engine.handle();

    // Graceful shutdown on Ctrl+C
    let h = handle.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        h.shutdown();
    })
    .context("Failed to set Ctrl+C handler")?;

    spawn_console(handle.clone())?;

    engine
        .supervise(max_restarts, RESTART_BACKOFF, || {
            let session = audio::build_input_stream(device.as_deref(), sample_rate)?;
            eprintln!("\n\u{1f436} Listening for barks. Type `help` for commands, Ctrl+C to quit.\n");
            Ok(session)
        })
        .context("Detection stopped")?;

    eprintln!("Goodbye.");
    Ok(())
}

/// Line-oriented control on stdin. The thread is left detached; it dies with
/// the process.
fn spawn_console(handle: EngineHandle) -> Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let words: Vec<&str> = line.split_whitespace().collect();
                match words.as_slice() {
                    [] => {}
                    ["manual"] => handle.manual_trigger(None),
                    ["manual", voice] => handle.manual_trigger(Some(voice.to_string())),
                    ["set", noise_db, fraction, cooldown] => {
                        match (noise_db.parse(), fraction.parse(), cooldown.parse()) {
                            (Ok(n), Ok(f), Ok(c)) => {
                                if let Err(e) = handle.set_thresholds(n, f, c) {
                                    eprintln!("rejected: {e}");
                                }
                            }
                            _ => eprintln!("usage: set <noise_db> <fraction> <cooldown_secs>"),
                        }
                    }
                    ["reload"] => handle.reload_voices(),
                    ["stop"] => {
                        handle.stop_detection();
                        eprintln!("Detection stopped. Type `start` to resume.");
                    }
                    ["start"] => handle.start_detection(),
                    ["state"] => {
                        let t = handle.thresholds();
                        let state = if handle.is_detecting() {
                            handle.state().to_string()
                        } else {
                            "stopped".to_string()
                        };
                        eprintln!(
                            "state: {state}  captures: {}  noise: {} dB  fraction: {}  cooldown: {}s",
                            handle.cycle(),
                            t.noise_db,
                            t.resemblance_fraction,
                            t.cooldown_secs
                        );
                    }
                    ["quit"] | ["exit"] => {
                        handle.shutdown();
                        break;
                    }
                    _ => eprintln!(
                        "commands: manual [voice] | set <noise_db> <fraction> <cooldown_secs> | reload | stop | start | state | quit"
                    ),
                }
            }
        })
        .context("Failed to start console thread")?;
    Ok(())
}

fn learn(config: &Config, files: &[PathBuf]) -> Result<()> {
    let store = JsonFingerprintStore::new(&config.paths.fingerprints);
    let mut analyzer = SpectralAnalyzer::new(config.analysis.learn_peak_ratio);

    for path in files {
        let window = read_wav(path)?;
        let peaks = analyzer.analyze(&window);
        if peaks.is_empty() {
            warn!(file = %path.display(), "no spectral peaks found, skipped");
            continue;
        }
        let fingerprint = store
            .append(peaks)
            .with_context(|| format!("Failed to store fingerprint for '{}'", path.display()))?;
        info!(
            file = %path.display(),
            id = fingerprint.id,
            peaks = fingerprint.peaks.len(),
            "fingerprint added"
        );
        eprintln!(
            "{} -> fingerprint #{} ({} peaks)",
            path.display(),
            fingerprint.id,
            fingerprint.peaks.len()
        );
    }
    Ok(())
}

/// Read a WAV file and mix it down to mono.
fn read_wav(path: &Path) -> Result<AnalysisWindow> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open '{}'", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to read samples from '{}'", path.display()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to read samples from '{}'", path.display()))?
        }
    };

    let ch = spec.channels.max(1) as usize;
    let samples = if ch == 1 {
        interleaved
    } else {
        interleaved
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    };

    Ok(AnalysisWindow {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn history(config: &Config, days: i64, limit: usize) -> Result<()> {
    let since = TimeDelta::try_days(days)
        .and_then(|span| Local::now().checked_sub_signed(span))
        .with_context(|| format!("--days {days} reaches outside the supported date range"))?;
    let log = JsonlEventLog::new(&config.paths.events);
    let events = log
        .recent(since, limit)
        .context("Failed to read event log")?;

    if events.is_empty() {
        eprintln!("No barks in the last {days} days.");
        return Ok(());
    }
    for event in events {
        println!(
            "{}  {:<9}  {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", event.mode),
            event.voice.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn devices() -> Result<()> {
    let names = audio::list_input_devices()?;
    if names.is_empty() {
        eprintln!("No input devices found.");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
