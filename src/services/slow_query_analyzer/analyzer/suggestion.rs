//! Index Suggestion Generator
//!
//! Builds a compound index candidate from the raw (non-normalized) filter
//! and sort of a pattern: equality/range filter fields first, in the order
//! they were written, then sort fields not already covered. Every key is
//! ascending.

use crate::services::slow_query_analyzer::models::{
    DEFAULT_PRIMARY_KEY, IndexSuggestion, PredicateNode, SortSpec,
};
use crate::utils::unique_ordered;

#[derive(Debug, Clone)]
pub struct SuggestionGenerator {
    primary_key: String,
}

impl SuggestionGenerator {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self { primary_key: primary_key.into() }
    }

    pub fn suggest(&self, raw_query: &PredicateNode, raw_sort: &SortSpec) -> IndexSuggestion {
        let filter_fields = raw_query
            .entries()
            .iter()
            .filter(|(key, _)| !key.is_operator())
            .map(|(key, _)| key.as_str())
            .filter(|name| *name != self.primary_key);

        let fields = unique_ordered(filter_fields.chain(raw_sort.fields()).collect());

        if fields.is_empty() {
            IndexSuggestion::ascending([self.primary_key.as_str()])
        } else {
            IndexSuggestion::ascending(fields)
        }
    }
}

impl Default for SuggestionGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_KEY)
    }
}
