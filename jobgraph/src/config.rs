// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::{bail, Context};
use clap::ValueEnum;
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::event_bus::Delivery;

/// Settings of the frame driver. Every key is optional in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker threads in the job pool
    pub workers: usize,
    /// Frames to run before shutting down
    pub iterations: u64,
    /// Tick interval. 0 runs frames back to back without a tick source.
    pub frame_interval_ms: u64,
    pub delivery: Delivery,
    pub log_level: LogLevel,
    /// Where to write the dot dump of the compiled frame graph
    pub dump_graph: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            iterations: 60,
            frame_interval_ms: 16,
            delivery: Delivery::default(),
            log_level: LogLevel::default(),
            dump_graph: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).context("config is not valid engine config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in config file {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        Ok(())
    }
}

/// Log verbosity, as accepted on the command line and in config files.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl LogLevel {
    /// Filter string understood by `env_logger`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// Set once in main() after file values and CLI overrides are merged.
pub static CONFIG: OnceLock<EngineConfig> = OnceLock::new();

pub fn initialize_global_config(config: EngineConfig) -> anyhow::Result<()> {
    if CONFIG.set(config).is_err() {
        bail!("global config was already initialized");
    }
    Ok(())
}

pub fn get_config() -> &'static EngineConfig {
    CONFIG.get().expect("global config is not initialized")
}
