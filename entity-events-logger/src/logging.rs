//! Process-wide `tracing` setup shared by the entity-events binaries.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs::File, str::FromStr, sync::Arc};
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter, Registry};

/// Defines the format for log messages.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

/// Defines the destination for log output.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// The terminal's error stream. Stdout is left to the program's own output.
    #[default]
    #[serde(alias = "stderr", alias = "stdout")]
    Console,
    File,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    /// Log level, e.g., "info", "debug", "trace". Unknown values fall back to "info".
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Path to the log file, required if output is "file".
    #[serde(alias = "file_path")]
    pub file_path: Option<String>,
    /// Extra per-target directives applied on top of `level`,
    /// e.g. `tokio_tungstenite=warn`.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            output: LogOutput::Console,
            file_path: None,
            directives: None,
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> Level {
        Level::from_str(self.level.trim()).unwrap_or(Level::INFO)
    }

    /// `level` for every target, overridden per target by `directives`.
    pub fn filter(&self) -> Result<EnvFilter> {
        let filter = EnvFilter::builder()
            .parse(self.directives.as_deref().unwrap_or_default())
            .context("Invalid log directives")?;
        Ok(filter.add_directive(LevelFilter::from_level(self.level()).into()))
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let subscriber = Registry::default().with(config.filter()?);

    match config.output {
        LogOutput::File => {
            let file_path = config
                .file_path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Log output is 'file' but 'file-path' is not specified"))?;
            let log_file = File::create(file_path)
                .with_context(|| format!("Failed to create log file '{}'", file_path))?;
            let file_writer = Arc::new(log_file);

            match config.format {
                LogFormat::Json => subscriber
                    .with(fmt::layer().with_writer(file_writer).json())
                    .try_init()?,
                LogFormat::Plain => subscriber
                    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                    .try_init()?,
            }
        }
        LogOutput::Console => {
            let writer = std::io::stderr;
            match config.format {
                LogFormat::Json => subscriber.with(fmt::layer().with_writer(writer).json()).try_init()?,
                LogFormat::Plain => subscriber.with(fmt::layer().with_writer(writer).compact()).try_init()?,
            }
        }
    };

    Ok(())
}
