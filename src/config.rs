use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::slow_query_analyzer::models::{DEFAULT_OPERATOR_PREFIX, DEFAULT_PRIMARY_KEY};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub analyzer: AnalyzerConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Slow query analyzer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Records faster than this are not considered slow (default: 0, keep all)
    #[serde(deserialize_with = "deserialize_duration_ms")]
    pub slow_ms: f64,
    /// Maximum predicate / plan nesting inspected before a subtree is opaque
    pub max_depth: usize,
    /// Primary-key field, skipped in suggestions and used as the fallback
    pub primary_key: String,
    /// Keys starting with this prefix are operators, not fields
    pub operator_prefix: String,
    /// Plan stage names that count as index use
    pub index_scan_stages: Vec<String>,
    /// Keep only the first N ranked recommendations
    pub top_n: Option<usize>,
}

/// Input format of the profile dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// One profile document per line
    Ndjson,
    /// A single JSON array of profile documents
    JsonArray,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: Option<String>,
    pub format: InputFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Write the report here instead of stdout
    pub path: Option<String>,
    pub pretty: bool,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "query-advisor")]
#[command(version, about = "Slow query pattern analyzer and index advisor")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Profile dump to analyze (overrides config file)
    #[arg(long, short = 'i', value_name = "PATH")]
    pub input: Option<String>,

    /// Input format (overrides config file)
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub format: Option<InputFormat>,

    /// Report output path (overrides config file, default: stdout)
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<String>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,

    /// Logging level (overrides config file, e.g., "info,query_advisor=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Slow threshold (overrides config file, e.g., "100", "100ms", "1s")
    #[arg(long, value_name = "DURATION")]
    pub slow_ms: Option<String>,

    /// Keep only the first N recommendations
    #[arg(long, value_name = "N")]
    pub top_n: Option<usize>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,query_advisor=debug")
    /// - APP_LOG_FILE: Log file path
    /// - APP_INPUT_PATH: Profile dump path
    /// - APP_OUTPUT_PATH: Report output path
    /// - APP_SLOW_MS: Slow threshold (accepts "100", "100ms", "2s")
    /// - APP_MAX_DEPTH: Maximum predicate / plan depth
    /// - APP_PRIMARY_KEY: Primary-key field name
    /// - APP_INDEX_SCAN_STAGES: Comma-separated index stage names
    /// - APP_TOP_N: Recommendation limit
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(file) = std::env::var("APP_LOG_FILE") {
            self.logging.file = Some(file).filter(|f| !f.trim().is_empty());
            tracing::info!("Override logging.file from env: {:?}", self.logging.file);
        }

        if let Ok(path) = std::env::var("APP_INPUT_PATH") {
            self.input.path = Some(path);
            tracing::info!("Override input.path from env: {:?}", self.input.path);
        }

        if let Ok(path) = std::env::var("APP_OUTPUT_PATH") {
            self.output.path = Some(path);
            tracing::info!("Override output.path from env: {:?}", self.output.path);
        }

        if let Ok(slow) = std::env::var("APP_SLOW_MS") {
            match parse_duration_to_ms(&slow) {
                Ok(val) => {
                    self.analyzer.slow_ms = val;
                    tracing::info!("Override analyzer.slow_ms from env: {}", self.analyzer.slow_ms);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_SLOW_MS '{}': {} (keep {})",
                    slow,
                    e,
                    self.analyzer.slow_ms
                ),
            }
        }

        if let Ok(depth) = std::env::var("APP_MAX_DEPTH")
            && let Ok(depth) = depth.parse()
        {
            self.analyzer.max_depth = depth;
            tracing::info!("Override analyzer.max_depth from env: {}", self.analyzer.max_depth);
        }

        if let Ok(pk) = std::env::var("APP_PRIMARY_KEY") {
            self.analyzer.primary_key = pk;
            tracing::info!("Override analyzer.primary_key from env: {}", self.analyzer.primary_key);
        }

        if let Ok(stages) = std::env::var("APP_INDEX_SCAN_STAGES") {
            self.analyzer.index_scan_stages = stages
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            tracing::info!(
                "Override analyzer.index_scan_stages from env: {:?}",
                self.analyzer.index_scan_stages
            );
        }

        if let Ok(top_n) = std::env::var("APP_TOP_N")
            && let Ok(top_n) = top_n.parse()
        {
            self.analyzer.top_n = Some(top_n);
            tracing::info!("Override analyzer.top_n from env: {}", top_n);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(input) = &args.input {
            self.input.path = Some(input.clone());
            tracing::info!("Override input.path from CLI: {}", input);
        }

        if let Some(format) = args.format {
            self.input.format = format;
            tracing::info!("Override input.format from CLI: {:?}", format);
        }

        if let Some(output) = &args.output {
            self.output.path = Some(output.clone());
            tracing::info!("Override output.path from CLI: {}", output);
        }

        if args.pretty {
            self.output.pretty = true;
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(slow) = &args.slow_ms {
            match parse_duration_to_ms(slow) {
                Ok(val) => {
                    self.analyzer.slow_ms = val;
                    tracing::info!("Override analyzer.slow_ms from CLI: {}", self.analyzer.slow_ms);
                },
                Err(e) => tracing::warn!(
                    "Invalid --slow-ms '{}': {} (keep {})",
                    slow,
                    e,
                    self.analyzer.slow_ms
                ),
            }
        }

        if let Some(top_n) = args.top_n {
            self.analyzer.top_n = Some(top_n);
            tracing::info!("Override analyzer.top_n from CLI: {}", top_n);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        self.analyzer.validate()?;

        if self.input.path.as_deref().is_none_or(|p| p.trim().is_empty()) {
            anyhow::bail!("No input given: set input.path, APP_INPUT_PATH or --input");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.slow_ms.is_finite() || self.slow_ms < 0.0 {
            anyhow::bail!("analyzer.slow_ms must be a non-negative number");
        }
        if self.max_depth == 0 {
            anyhow::bail!("analyzer.max_depth must be > 0");
        }
        if self.primary_key.trim().is_empty() {
            anyhow::bail!("analyzer.primary_key cannot be empty");
        }
        if self.index_scan_stages.is_empty() {
            tracing::warn!("analyzer.index_scan_stages is empty, every pattern will report a full scan");
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,query_advisor=debug".to_string(), file: None }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            slow_ms: 0.0,
            max_depth: 32,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            operator_prefix: DEFAULT_OPERATOR_PREFIX.to_string(),
            index_scan_stages: ["IXSCAN", "COUNT_SCAN", "DISTINCT_SCAN", "IDHACK", "EXPRESS_IXSCAN"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            top_n: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { path: None, format: InputFormat::Ndjson }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_ms(input: &str) -> Result<f64, String> {
    // Plain numbers are milliseconds
    if let Ok(val) = input.trim().parse::<f64>() {
        return if val.is_finite() && val >= 0.0 {
            Ok(val)
        } else {
            Err("must be a non-negative number".into())
        };
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) =
        s.split_at(s.chars().take_while(|c| c.is_ascii_digit() || *c == '.').count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: f64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit.trim() {
        "ms" | "msec" | "millis" => Ok(n),
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n * 1000.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60.0 * 1000.0),
        other => Err(format!("unsupported unit: {}", other)),
    }
}

// Accepts either a number of milliseconds or a string like "100ms", "2s"
fn deserialize_duration_ms<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = f64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of milliseconds or a string like '100ms', '2s'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as f64)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as f64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0.0 { Ok(v) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_ms(v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
