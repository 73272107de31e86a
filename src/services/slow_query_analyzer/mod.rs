//! Slow Query Analyzer
//!
//! Turns recorded slow operations into a ranked list of index
//! recommendations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SlowQueryAnalyzer                       │
//! │                                                              │
//! │  ProfileReader ──► QueryRecord ──► PatternAggregator         │
//! │   (parser)                          │  Normalizer            │
//! │                                     │  IndexUsageDetector    │
//! │                                     ▼                        │
//! │                              PatternAccumulator              │
//! │                                     │                        │
//! │                                     ▼                        │
//! │                               ReportBuilder                  │
//! │                                │  classify()                 │
//! │                                │  SuggestionGenerator        │
//! │                                ▼                             │
//! │                              Report                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use query_advisor::config::AnalyzerConfig;
//! use query_advisor::services::slow_query_analyzer::SlowQueryAnalyzer;
//!
//! let analyzer = SlowQueryAnalyzer::new(AnalyzerConfig::default());
//! let report = analyzer.analyze(&records);
//!
//! for entry in &report.recommendations {
//!     println!("{:?} {} {}", entry.priority, entry.namespace, entry.index_keys);
//! }
//! ```

pub mod analyzer;
pub mod models;
pub mod parser;


pub use analyzer::{PatternAccumulator, PatternAggregator, ReportBuilder, SharedPatternAccumulator};
pub use models::*;
pub use parser::{ProfileBatch, ProfileDocumentDecoder, ProfileReader};

use rayon::prelude::*;

use crate::config::AnalyzerConfig;

/// Single-batch analysis entry point
#[derive(Debug, Clone)]
pub struct SlowQueryAnalyzer {
    config: AnalyzerConfig,
    aggregator: PatternAggregator,
    report_builder: ReportBuilder,
}

impl SlowQueryAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let aggregator = PatternAggregator::new(&config);
        let report_builder = ReportBuilder::new(&config);
        Self { config, aggregator, report_builder }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Decoder configured with this analyzer's operator prefix
    pub fn profile_reader(&self) -> ProfileReader {
        ProfileReader::new(ProfileDocumentDecoder::new(&self.config.operator_prefix))
    }

    /// Sequential pass in arrival order
    pub fn analyze(&self, records: &[QueryRecord]) -> Report {
        self.report_builder.build(self.accumulate(records))
    }

    pub fn accumulate(&self, records: &[QueryRecord]) -> PatternAccumulator {
        records.iter().fold(PatternAccumulator::new(), |acc, record| self.aggregator.fold(acc, record))
    }

    /// Analyze a decoded dump, counting its undecodable documents as malformed
    pub fn analyze_batch(&self, batch: &ProfileBatch) -> Report {
        let mut acc = self.accumulate(&batch.records);
        for _ in 0..batch.malformed {
            acc.note_malformed();
        }
        self.report_builder.build(acc)
    }

    /// Same result as `analyze`, with records folded into independent
    /// per-thread accumulators that are merged at the end
    pub fn analyze_parallel(&self, records: &[QueryRecord]) -> Report {
        let acc = records
            .par_iter()
            .enumerate()
            .fold(PatternAccumulator::new, |mut acc, (idx, record)| {
                self.aggregator.ingest_at(&mut acc, idx as u64, record);
                acc
            })
            .reduce(PatternAccumulator::new, PatternAccumulator::merge);

        tracing::debug!(
            "Parallel aggregation finished: {} records, {} patterns",
            records.len(),
            acc.len()
        );
        self.report_builder.build(acc)
    }

    /// Build a report from an accumulator filled elsewhere
    /// (e.g. a `SharedPatternAccumulator` fed by several producers)
    pub fn report(&self, acc: PatternAccumulator) -> Report {
        self.report_builder.build(acc)
    }

    pub fn aggregator(&self) -> &PatternAggregator {
        &self.aggregator
    }
}

impl Default for SlowQueryAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}
