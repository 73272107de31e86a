//! Slow query analyzer module
//!
//! Normalization, index-usage detection, aggregation, ranking and index
//! suggestion for profiled slow operations.

pub mod aggregator;
pub mod index_usage;
pub mod normalizer;
pub mod priority;
pub mod report;
pub mod suggestion;

pub use aggregator::{
    IngestOutcome, IngestStats, PatternAccumulator, PatternAggregator, PatternKey, QueryPattern,
    SAMPLE_CAPACITY, SharedPatternAccumulator,
};
pub use index_usage::IndexUsageDetector;
pub use normalizer::{Normalizer, PredicateShape, ShapeNode};
pub use priority::classify;
pub use report::ReportBuilder;
pub use suggestion::SuggestionGenerator;
