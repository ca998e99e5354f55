//! Tracing setup
//!
//! `RUST_LOG` takes precedence over the configured level; `--verbose` raises
//! the default directive to DEBUG.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse a configured format name, unknown names fall back to compact
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Default level for the filter
pub fn default_level(config: &LoggingConfig, verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    config.level.parse().unwrap_or(Level::INFO)
}

/// Env filter seeded with the default level
pub fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = build_filter(default_level(config, verbose));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match LogFormat::parse(&config.format) {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info};

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CaptureWriter {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" Pretty "), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
    }

    #[test]
    fn test_default_level() {
        let mut config = LoggingConfig::default();
        assert_eq!(default_level(&config, false), Level::INFO);
        assert_eq!(default_level(&config, true), Level::DEBUG);

        config.level = "warn".to_string();
        assert_eq!(default_level(&config, false), Level::WARN);

        config.level = "loud".to_string();
        assert_eq!(default_level(&config, false), Level::INFO);
    }

    #[test]
    fn test_info_filter_drops_debug() {
        let writer = CaptureWriter::default();
        let make_writer = writer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("info"))
            .with_writer(move || make_writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            debug!("hidden line");
            info!("visible line");
        });

        let output = writer.contents();
        assert!(output.contains("visible line"));
        assert!(!output.contains("hidden line"));
    }

    #[test]
    fn test_json_output_is_parseable() {
        let writer = CaptureWriter::default();
        let make_writer = writer.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::new("info"))
            .with_writer(move || make_writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!(client = "abc", "Upload denied");
        });

        let output = writer.contents();
        let line = output.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "Upload denied");
        assert_eq!(value["fields"]["client"], "abc");
    }
}
