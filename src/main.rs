use anyhow::{Context, Result};
use audio_dispatch::audio::codec::SampleCodec;
use audio_dispatch::audio::format::AudioFormat;
use audio_dispatch::audio::source::{ByteSource, StreamSource};
use audio_dispatch::audio::wav::WavSource;
use audio_dispatch::cli::{Cli, Commands, is_stdin};
use audio_dispatch::config::Config;
use audio_dispatch::dispatch::{Dispatcher, DispatcherConfig, FirstWindow};
use audio_dispatch::logging::init_logging;
use audio_dispatch::stages::PlaybackStage;
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let dispatch = dispatcher_config(&cli, &config);

    match cli.command {
        Commands::Info { input, raw, json } => {
            show_info(&input, raw, json, &config, dispatch)?;
        }
        Commands::Play {
            input,
            raw,
            seconds,
        } => {
            play(&input, raw, seconds, &config, dispatch)?;
        }
        #[cfg(feature = "cpal-audio")]
        Commands::Record { device, duration } => {
            let device = device.or_else(|| config.capture.device.clone());
            record(device.as_deref(), duration, &config, dispatch)?;
        }
        #[cfg(feature = "cpal-audio")]
        Commands::Devices => {
            list_audio_devices()?;
        }
    }

    Ok(())
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else if let Some(default_path) = Config::default_path() {
        // Try default path, fall back to defaults
        Config::load_or_default(&default_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

/// Command-line flags take precedence over the config file.
fn dispatcher_config(cli: &Cli, config: &Config) -> DispatcherConfig {
    let mut dispatch = config.dispatcher_config();
    if let Some(size) = cli.buffer_size {
        dispatch.buffer_size = size;
    }
    if let Some(overlap) = cli.overlap {
        dispatch.overlap = overlap;
    }
    if cli.full_first {
        dispatch.first_window = FirstWindow::Full;
    }
    dispatch
}

/// Opens an input as a byte source plus the format its bytes are in.
fn open_input(
    input: &Path,
    raw: bool,
    config: &Config,
) -> Result<(Box<dyn ByteSource>, AudioFormat)> {
    if !raw {
        let source = if is_stdin(input) {
            WavSource::from_stdin()
        } else {
            WavSource::open(input)
        }
        .with_context(|| format!("Failed to open WAV input {}", input.display()))?;
        let format = source.format();
        return Ok((Box::new(source), format));
    }

    let format = config.audio_format();
    if is_stdin(input) {
        return Ok((Box::new(StreamSource::new(std::io::stdin())), format));
    }
    let file = File::open(input)
        .with_context(|| format!("Failed to open raw input {}", input.display()))?;
    let len = file.metadata()?.len();
    let source = StreamSource::new(BufReader::new(file)).with_total_bytes(len);
    Ok((Box::new(source), format))
}

#[derive(Serialize)]
struct InfoReport {
    format: AudioFormat,
    description: String,
    total_bytes: Option<u64>,
    total_frames: Option<u64>,
    duration_seconds: Option<f64>,
    buffer_size: usize,
    overlap: usize,
    step_size: usize,
    expected_windows: Option<u64>,
}

fn show_info(
    input: &Path,
    raw: bool,
    json: bool,
    config: &Config,
    dispatch: DispatcherConfig,
) -> Result<()> {
    let (source, format) = open_input(input, raw, config)?;
    let dispatcher = Dispatcher::new(source, format, dispatch)?;

    let total_frames = dispatcher.total_frames();
    let report = InfoReport {
        format,
        description: format.to_string(),
        total_bytes: dispatcher.total_bytes(),
        total_frames,
        duration_seconds: dispatcher.total_duration_seconds(),
        buffer_size: dispatch.buffer_size,
        overlap: dispatch.overlap,
        step_size: dispatch.step_size(),
        expected_windows: total_frames.map(|frames| dispatch.expected_windows(frames)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Format:   {}", report.description);
    match report.duration_seconds {
        Some(seconds) => println!("Duration: {:.3}s", seconds),
        None => println!("Duration: unknown"),
    }
    if let Some(frames) = report.total_frames {
        println!("Frames:   {}", frames);
    }
    println!(
        "Window:   {} frames, overlap {}, step {}",
        report.buffer_size, report.overlap, report.step_size
    );
    if let Some(windows) = report.expected_windows {
        println!("Windows:  {}", windows);
    }
    Ok(())
}

fn play(
    input: &Path,
    raw: bool,
    seconds: Option<f64>,
    config: &Config,
    dispatch: DispatcherConfig,
) -> Result<()> {
    let (source, format) = open_input(input, raw, config)?;
    let mut dispatcher = Dispatcher::new(source, format, dispatch)?;

    let mut playback = PlaybackStage::new(
        BufWriter::new(std::io::stdout()),
        SampleCodec::new(format)?,
    );
    if let Some(seconds) = seconds {
        playback = playback.with_byte_limit(format.seconds_to_bytes(seconds));
    }
    dispatcher.add_stage(playback)?;

    dispatcher.run();

    info!(
        windows = dispatcher.windows_dispatched(),
        seconds = dispatcher.elapsed_seconds(),
        "playback finished"
    );
    Ok(())
}

#[cfg(feature = "cpal-audio")]
fn record(
    device: Option<&str>,
    duration: Option<std::time::Duration>,
    config: &Config,
    dispatch: DispatcherConfig,
) -> Result<()> {
    let mut dispatcher = Dispatcher::from_microphone(device, config.format.sample_rate, dispatch)?;
    let format = *dispatcher.format();
    eprintln!("Recording: {}", format);

    dispatcher.add_stage(PlaybackStage::new(
        BufWriter::new(std::io::stdout()),
        SampleCodec::new(format)?,
    ))?;

    if let Some(duration) = duration {
        let handle = dispatcher.handle();
        std::thread::Builder::new()
            .name("record-timer".to_string())
            .spawn(move || {
                std::thread::sleep(duration);
                handle.stop();
            })?;
    }

    dispatcher.run();

    eprintln!("Recorded {:.1}s", dispatcher.elapsed_seconds());
    Ok(())
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = audio_dispatch::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}
