// SPDX-License-Identifier: MIT
// jobgraph: frame driver for the dependency-ordered job scheduler
//
// - Builds the per-frame job graph (simulation, physics, occlusion,
//   rendering, window painting) on a worker pool.
// - Runs one graph iteration per engine tick and reports each frame on the
//   event bus.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use clap::Parser;
use jobgraph::config::{self, EngineConfig, LogLevel};
use jobgraph::engine::Engine;
use jobgraph::event_bus::Delivery;
use jobgraph::log_sink::LogSink;
use log::{error, info};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON config file. Command line options override its values.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Worker threads in the job pool
    #[arg(long)]
    workers: Option<usize>,

    /// Frames to run before shutting down
    #[arg(long)]
    iterations: Option<u64>,

    /// Milliseconds between engine ticks (0 runs frames back to back)
    #[arg(long = "frame-interval-ms", value_name = "MS")]
    frame_interval_ms: Option<u64>,

    /// How the event bus runs listeners
    #[arg(long, value_enum)]
    delivery: Option<Delivery>,

    #[arg(long = "log-level", value_enum)]
    log_level: Option<LogLevel>,

    /// Write the compiled frame graph in dot format
    #[arg(long = "dump-graph", value_name = "PATH")]
    dump_graph: Option<PathBuf>,

    /// Write log lines to this file through the queued log sink instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.workers == Some(0) {
        return Err("--workers must be at least 1".into());
    }

    if let (Some(dump), Some(log)) = (&args.dump_graph, &args.log_file) {
        if dump == log {
            return Err("--dump-graph and --log-file may not name the same file".into());
        }
    }

    Ok(())
}

fn resolve_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(interval) = args.frame_interval_ms {
        config.frame_interval_ms = interval;
    }
    if let Some(delivery) = args.delivery {
        config.delivery = delivery;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(path) = &args.dump_graph {
        config.dump_graph = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(level: LogLevel, log_file: Option<&PathBuf>) -> anyhow::Result<Option<&'static LogSink>> {
    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            let sink = LogSink::install(BufWriter::new(file), level.into())?;
            Ok(Some(sink))
        }
        None => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(level.as_filter()),
            )
            .init();
            Ok(None)
        }
    }
}

fn run(config: &EngineConfig) -> anyhow::Result<bool> {
    let engine = Engine::new(config)?;
    info!(
        "running {} frames on {} workers",
        config.iterations, config.workers
    );
    let summary = engine.run()?;
    engine.close();

    for (frame, failure) in &summary.failures {
        error!("frame {frame}: {failure}");
    }
    info!(
        "{} frames run, {} failed, {} painted",
        summary.frames,
        summary.failures.len(),
        engine.frames_painted()
    );
    Ok(summary.succeeded())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    };

    let sink = match init_logging(config.log_level, args.log_file.as_ref()) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Error: failed to set up logging: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = config::initialize_global_config(config) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    info!("Starting jobgraph");
    let exit_code = match run(config::get_config()) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    info!("Stopping jobgraph");

    if let Some(sink) = sink {
        log::Log::flush(sink);
    }
    std::process::exit(exit_code);
}
