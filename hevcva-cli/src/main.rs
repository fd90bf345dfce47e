//! # hevcva
//!
//! Headless driver: decodes a raw HEVC stream on VA-API and hands the NV12
//! frames to a file, a shared-memory region, or nowhere.

#[cfg(not(target_os = "linux"))]
compile_error!("hevcva requires Linux VA-API");

mod shm;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use hevcva_core::{BoundaryRule, DecodeSession, Geometry, SessionConfig};

use crate::shm::ShmSink;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hevcva=info,hevcva_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args(&args)?;
    tracing::info!("hevcva v{} (core {})", env!("CARGO_PKG_VERSION"), hevcva_core::VERSION);

    run(options)
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Output {
    Null,
    File(PathBuf),
    Shm(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Options {
    input: PathBuf,
    frames: Option<u64>,
    loop_playback: bool,
    output: Output,
    config: SessionConfig,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut input: Option<PathBuf> = None;
    let mut frames: Option<u64> = None;
    let mut loop_playback = false;
    let mut output = Output::Null;
    let mut config_path: Option<PathBuf> = None;

    let mut device: Option<PathBuf> = None;
    let mut surfaces: Option<usize> = None;
    let mut size: Option<Geometry> = None;
    let mut boundary: Option<BoundaryRule> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
        };

        match flag {
            "--input" | "-i" => {
                input = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--frames" | "-n" => {
                let v = value()?;
                frames = Some(
                    v.parse::<u64>()
                        .map_err(|e| anyhow::anyhow!("Invalid frame count {}: {}", v, e))?,
                );
                i += 2;
            }
            "--loop" => {
                loop_playback = true;
                i += 1;
            }
            "--output" | "-o" => {
                output = Output::File(PathBuf::from(value()?));
                i += 2;
            }
            "--shm" => {
                let v = value()?;
                shm::normalize_name(v)?;
                output = Output::Shm(v.clone());
                i += 2;
            }
            "--device" => {
                device = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--surfaces" => {
                let v = value()?;
                surfaces = Some(
                    v.parse::<usize>()
                        .map_err(|e| anyhow::anyhow!("Invalid surface count {}: {}", v, e))?,
                );
                i += 2;
            }
            "--size" => {
                size = Some(value()?.parse::<Geometry>().map_err(anyhow::Error::msg)?);
                i += 2;
            }
            "--boundary" => {
                boundary = Some(value()?.parse::<BoundaryRule>().map_err(anyhow::Error::msg)?);
                i += 2;
            }
            "--config" => {
                config_path = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing required --input")
    })?;

    // Command-line flags override the config file.
    let mut config = match config_path {
        Some(path) => SessionConfig::from_json_file(&path)?,
        None => SessionConfig::default(),
    };
    if let Some(device) = device {
        config.device = device;
    }
    if let Some(surfaces) = surfaces {
        config.surface_count = surfaces;
    }
    if size.is_some() {
        config.geometry = size;
    }
    if let Some(boundary) = boundary {
        config.boundary = boundary;
    }
    config.validate()?;

    if loop_playback && frames.is_none() {
        tracing::warn!("--loop without --frames runs until interrupted");
    }

    Ok(Options {
        input,
        frames,
        loop_playback,
        output,
        config,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  hevcva --input <file.h265> [--frames <n>] [--loop]\n         \
         [--output <file.nv12> | --shm <name>]\n         \
         [--device <path>] [--surfaces <n>] [--size WxH]\n         \
         [--boundary slice|first-slice] [--config <file.json>]\n"
    );
}

// ============================================================================
// Frame Sinks
// ============================================================================

enum Sink {
    Null,
    File(BufWriter<File>),
    Shm { sink: ShmSink, name: String },
}

impl Sink {
    fn open(output: &Output) -> Result<Self> {
        Ok(match output {
            Output::Null => Sink::Null,
            Output::File(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Cannot create output {}", path.display()))?;
                tracing::info!("Writing raw NV12 to {}", path.display());
                Sink::File(BufWriter::new(file))
            }
            Output::Shm(name) => Sink::Shm {
                sink: ShmSink::new(),
                name: name.clone(),
            },
        })
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        match self {
            Sink::Null => {}
            Sink::File(writer) => writer.write_all(frame)?,
            Sink::Shm { sink, name } => sink.write(name, frame)?,
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::Null => {}
            Sink::File(mut writer) => writer.flush()?,
            Sink::Shm { mut sink, name } => sink.close(&name)?,
        }
        Ok(())
    }
}

// ============================================================================
// Decode Loop
// ============================================================================

fn run(options: Options) -> Result<()> {
    let mut session = open_session(options.config.clone());
    session
        .open(&options.input)
        .with_context(|| format!("Cannot start decoding {}", options.input.display()))?;

    if let Some(info) = session.stream_info() {
        tracing::info!("Stream: {}", json!(info));
    }

    let mut sink = Sink::open(&options.output)?;
    let started = Instant::now();
    let mut written: u64 = 0;
    let mut pass_frames: u64 = 0;

    while options.frames.map_or(true, |limit| written < limit) {
        let frame = match session.decode_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) if options.loop_playback && pass_frames > 0 => {
                tracing::debug!("End of stream, looping");
                session.reset()?;
                pass_frames = 0;
                continue;
            }
            Ok(None) => break,
            Err(e) => return Err(anyhow::Error::new(e).context(format!("Decode failed after {} frames", written))),
        };

        sink.write(frame.data)?;
        written += 1;
        pass_frames += 1;
    }
    sink.finish()?;

    let elapsed = started.elapsed();
    let stats = session.stats();
    let fps = if elapsed.as_secs_f64() > 0.0 {
        written as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    tracing::info!(
        "Decoded {} frames in {} ms ({:.1} fps)",
        written,
        elapsed.as_millis(),
        fps
    );
    println!(
        "{}",
        json!({
            "frames": written,
            "duration_ms": elapsed.as_millis() as u64,
            "stats": stats,
        })
    );

    session.close();
    Ok(())
}

fn open_session(config: SessionConfig) -> DecodeSession {
    DecodeSession::with_libva(config)
}
