//! Capture configuration (spec.md §6): a table of channels plus the global
//! `data_root`, loaded from a TOML file named on the command line, in the
//! same `clap` + `serde` + `toml` shape as the rest of this project's
//! configuration loading.

use std::fs::read_to_string;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Station {
    Wwv,
    Wwvh,
    Chu,
}

/// One multicast I/Q stream to join (spec.md §3 "Channel configuration",
/// §6 "Configuration").
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelConfig {
    pub channel_name: String,
    pub ssrc: u32,
    pub frequency_hz: f64,
    pub multicast_group: String,
    pub port: u16,
    #[serde(default = "ChannelConfig::sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "ChannelConfig::samples_per_packet")]
    pub samples_per_packet: u32,
    #[serde(default)]
    pub expected_stations: Vec<Station>,
}

impl ChannelConfig {
    fn sample_rate() -> u32 {
        16_000
    }

    fn samples_per_packet() -> u32 {
        320
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "Log::stdout")]
    pub stdout: bool,
    #[serde(default)]
    pub file_directory: Option<String>,
}

impl Log {
    fn stdout() -> bool {
        true
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            stdout: Self::stdout(),
            file_directory: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Directory under which each channel gets its own archive subdirectory
    /// and status file.
    pub data_root: PathBuf,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// Path to the capture configuration TOML file.
    #[arg(long, short)]
    config: String,
}

impl Config {
    /// Loads configuration from the file named by `--config`.
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(&Cli::parse().config)?)?)
    }
}
