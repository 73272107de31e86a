//! Query Advisor Library
//!
//! Reads profiled slow operations, groups them by predicate shape and
//! turns each group into a prioritized index recommendation.

pub mod config;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::slow_query_analyzer::{Report, SlowQueryAnalyzer};
