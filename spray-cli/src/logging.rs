use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();

        // Keep HTTP internals quiet
        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("rustls".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_file_info: false,
            enable_colors: true,
            module_levels,
        }
    }
}

impl LoggingConfig {
    pub fn from_flags(debug: bool, json_format: bool) -> Self {
        Self {
            level: if debug { "debug" } else { "info" }.to_string(),
            json_format,
            include_file_info: debug,
            ..Default::default()
        }
    }

    /// Build the filter; `RUST_LOG` wins over the configured level
    pub fn filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid log directive '{}': {}", directive, e))?,
            );
        }
        Ok(filter)
    }
}

/// Initialize logging based on the provided configuration
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.filter()?);

    // Try to initialize logging, ignore if already initialized
    let result = if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(config.include_file_info)
                    .with_line_number(config.include_file_info),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(config.include_file_info)
                    .with_file(config.include_file_info)
                    .with_line_number(config.include_file_info)
                    .with_ansi(config.enable_colors),
            )
            .try_init()
    };

    match result {
        Ok(_) => tracing::debug!("Logging initialized with level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }

    Ok(())
}
