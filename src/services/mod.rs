pub mod slow_query_analyzer;

pub use slow_query_analyzer::{
    PatternAccumulator, ProfileReader, QueryRecord, Report, SharedPatternAccumulator,
    SlowQueryAnalyzer,
};
