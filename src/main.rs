use anyhow::Context;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use query_advisor::config::{Config, LoggingConfig};
use query_advisor::services::slow_query_analyzer::{Report, SlowQueryAnalyzer};

fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    // Load configuration first
    let config = Config::load()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = init_logging(&config.logging);

    tracing::info!("Query advisor starting up");
    tracing::info!("Configuration loaded successfully");

    let input_path = config.input.path.as_deref().context("No input path configured")?;
    let file =
        File::open(input_path).with_context(|| format!("Failed to open input: {}", input_path))?;

    let analyzer = SlowQueryAnalyzer::new(config.analyzer.clone());
    let batch = analyzer
        .profile_reader()
        .read(BufReader::new(file), config.input.format)
        .with_context(|| format!("Failed to read profile dump: {}", input_path))?;
    tracing::info!(
        "Decoded {} records from {} ({} malformed)",
        batch.records.len(),
        input_path,
        batch.malformed
    );

    let report = analyzer.analyze_batch(&batch);
    write_report(&report, config.output.path.as_deref(), config.output.pretty)?;

    tracing::info!("Analysis complete: {} recommendations", report.recommendations.len());
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_filter = tracing_subscriber::EnvFilter::new(&logging.level);

    let registry = tracing_subscriber::registry().with(log_filter);

    // Add file logging if configured
    if let Some(log_file) = &logging.file {
        // Ensure log directory exists
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("query-advisor.log");
        // Remove .log extension if present (rolling appender adds date suffix)
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        Some(guard)
    } else {
        // stdout carries the report, console logs go to stderr
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
        None
    }
}

fn write_report(report: &Report, path: Option<&str>, pretty: bool) -> Result<(), anyhow::Error> {
    let mut writer: Box<dyn Write> = match path {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create output: {}", path))?;
            tracing::info!("Writing report to {}", path);
            Box::new(BufWriter::new(file))
        },
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    if pretty {
        serde_json::to_writer_pretty(&mut writer, report)?;
    } else {
        serde_json::to_writer(&mut writer, report)?;
    }
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_advisor::services::slow_query_analyzer::{OperationType, QueryRecord};
    use serde_json::json;

    #[test]
    fn test_init_logging_console_only() {
        let logging = LoggingConfig { level: "warn".to_string(), file: None };
        assert!(init_logging(&logging).is_none());
        tracing::warn!("console logging initialized");
    }

    #[test]
    fn test_write_report_to_file() {
        let record = QueryRecord::new("db.books", OperationType::Find, 42.0)
            .with_filter(json!({"status": 1}))
            .with_sort(json!({"score": {"$meta": "textScore"}}));
        let report = SlowQueryAnalyzer::default().analyze(&[record]);

        let path = std::env::temp_dir()
            .join(format!("query-advisor-report-{}.json", std::process::id()));
        let path_str = path.to_str().unwrap();
        write_report(&report, Some(path_str), true).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(written["summary"]["pattern_count"], json!(1));
        assert_eq!(
            written["recommendations"][0]["raw_sort"],
            json!({"score": {"$meta": "textScore"}})
        );
    }
}
