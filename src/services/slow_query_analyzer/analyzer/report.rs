//! Report Builder
//!
//! Turns a finished accumulator into ranked recommendations and a
//! per-namespace rollup. Priority and suggestion are derived here, once per
//! pattern.

use std::cmp::Ordering;

use super::aggregator::{PatternAccumulator, QueryPattern};
use super::priority::classify;
use super::suggestion::SuggestionGenerator;
use crate::config::AnalyzerConfig;
use crate::services::slow_query_analyzer::models::{
    NamespaceRollup, RecommendationEntry, Report, ReportSummary,
};
use crate::utils::group_by;

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    suggestions: SuggestionGenerator,
    top_n: Option<usize>,
}

impl ReportBuilder {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self { suggestions: SuggestionGenerator::new(&config.primary_key), top_n: config.top_n }
    }

    pub fn build(&self, acc: PatternAccumulator) -> Report {
        let stats = acc.stats();

        let mut ranked: Vec<(u64, RecommendationEntry)> =
            acc.into_patterns().map(|p| (p.first_sequence, self.entry_for(p))).collect();

        // Priority ascending, slower first, then arrival order for stability
        ranked.sort_by(|(seq_a, a), (seq_b, b)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| {
                    b.avg_duration_ms.partial_cmp(&a.avg_duration_ms).unwrap_or(Ordering::Equal)
                })
                .then_with(|| seq_a.cmp(seq_b))
        });

        let entries: Vec<RecommendationEntry> = ranked.into_iter().map(|(_, e)| e).collect();

        let mut summary = ReportSummary {
            records_seen: stats.seen,
            records_ingested: stats.ingested,
            malformed_skipped: stats.malformed,
            below_threshold_skipped: stats.below_threshold,
            pattern_count: entries.len(),
            full_scan_patterns: entries.iter().filter(|e| !e.used_index).count(),
            ..Default::default()
        };
        for entry in &entries {
            *summary.priority_counts.entry(entry.priority).or_default() += 1;
        }

        let namespaces = Self::rollup(&entries);

        let mut recommendations = entries;
        if let Some(limit) = self.top_n {
            recommendations.truncate(limit);
        }

        tracing::info!(
            "Report built: {} records seen, {} ingested, {} malformed, {} patterns ({} full scan)",
            summary.records_seen,
            summary.records_ingested,
            summary.malformed_skipped,
            summary.pattern_count,
            summary.full_scan_patterns
        );

        Report { summary, recommendations, namespaces }
    }

    fn entry_for(&self, pattern: QueryPattern) -> RecommendationEntry {
        let avg_duration_ms = pattern.avg_duration_ms();
        let priority = classify(pattern.count, avg_duration_ms);
        let suggested_index =
            self.suggestions.suggest(&pattern.raw_query_example, &pattern.raw_sort_example);
        let index_keys = suggested_index.key_document();

        RecommendationEntry {
            collection: collection_name(&pattern.namespace).to_string(),
            raw_query: pattern.raw_query_example.to_json(),
            raw_sort: pattern.raw_sort_example.to_json(),
            count: pattern.count,
            total_duration_ms: pattern.total_duration_ms,
            min_duration_ms: pattern.min_duration_ms,
            avg_duration_ms,
            max_duration_ms: pattern.max_duration_ms,
            used_index: pattern.used_index,
            priority,
            suggested_index,
            index_keys,
            operations: pattern.operations,
            first_seen: pattern.first_seen,
            last_seen: pattern.last_seen,
            namespace: pattern.namespace,
        }
    }

    /// Namespace totals, busiest first
    fn rollup(entries: &[RecommendationEntry]) -> Vec<NamespaceRollup> {
        let grouped = group_by(entries.iter().collect(), |e| e.namespace.clone());

        let mut rollups: Vec<NamespaceRollup> = grouped
            .into_iter()
            .map(|(namespace, group)| {
                let count: u64 = group.iter().map(|e| e.count).sum();
                let total_duration_ms: f64 = group.iter().map(|e| e.total_duration_ms).sum();
                let avg_duration_ms =
                    if count == 0 { 0.0 } else { total_duration_ms / count as f64 };
                NamespaceRollup { namespace, count, total_duration_ms, avg_duration_ms }
            })
            .collect();

        rollups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.namespace.cmp(&b.namespace)));
        rollups
    }
}

/// `db.collection` -> `collection`
fn collection_name(namespace: &str) -> &str {
    namespace.split_once('.').map_or(namespace, |(_, coll)| coll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::slow_query_analyzer::analyzer::aggregator::PatternAggregator;
    use crate::services::slow_query_analyzer::models::{OperationType, Priority, QueryRecord};
    use serde_json::json;

    fn build(records: &[QueryRecord], config: &AnalyzerConfig) -> Report {
        let agg = PatternAggregator::new(config);
        let acc = records.iter().fold(PatternAccumulator::new(), |acc, r| agg.fold(acc, r));
        ReportBuilder::new(config).build(acc)
    }

    fn record(ns: &str, field: &str, duration_ms: f64) -> QueryRecord {
        QueryRecord::new(ns, OperationType::Find, duration_ms).with_filter(json!({ field: 1 }))
    }

    #[test]
    fn test_empty_corpus_gives_empty_report() {
        let report = build(&[], &AnalyzerConfig::default());
        assert!(report.is_empty());
        assert!(report.namespaces.is_empty());
        assert_eq!(report.summary.pattern_count, 0);
        assert_eq!(report.summary.records_seen, 0);
    }

    #[test]
    fn test_entries_ordered_by_priority_then_avg() {
        let mut records = Vec::new();
        // P0: 11 x 250ms
        records.extend((0..11).map(|_| record("app.orders", "user_id", 250.0)));
        // P1: 1 x 900ms and 1 x 600ms
        records.push(record("app.books", "isbn", 600.0));
        records.push(record("app.books", "slug", 900.0));
        // P3
        records.push(record("app.users", "email", 20.0));
        // P2
        records.push(record("app.books", "title", 300.0));

        let report = build(&records, &AnalyzerConfig::default());
        let order: Vec<(Priority, f64)> =
            report.recommendations.iter().map(|e| (e.priority, e.avg_duration_ms)).collect();
        assert_eq!(
            order,
            vec![
                (Priority::P0, 250.0),
                (Priority::P1, 900.0),
                (Priority::P1, 600.0),
                (Priority::P2, 300.0),
                (Priority::P3, 20.0),
            ]
        );
        assert_eq!(report.summary.priority_counts.get(&Priority::P1), Some(&2));
        assert_eq!(report.recommendations[0].collection, "orders");
    }

    #[test]
    fn test_namespace_rollup_sorted_by_count() {
        let mut records: Vec<_> = (0..3).map(|_| record("app.books", "isbn", 100.0)).collect();
        records.push(record("app.books", "slug", 400.0));
        records.push(record("app.users", "email", 50.0));

        let report = build(&records, &AnalyzerConfig::default());
        assert_eq!(
            report.namespaces,
            vec![
                NamespaceRollup {
                    namespace: "app.books".to_string(),
                    count: 4,
                    total_duration_ms: 700.0,
                    avg_duration_ms: 175.0,
                },
                NamespaceRollup {
                    namespace: "app.users".to_string(),
                    count: 1,
                    total_duration_ms: 50.0,
                    avg_duration_ms: 50.0,
                },
            ]
        );
    }

    #[test]
    fn test_top_n_truncates_recommendations_only() {
        let records = vec![
            record("a.x", "f1", 10.0),
            record("a.y", "f2", 20.0),
            record("a.z", "f3", 30.0),
        ];
        let config = AnalyzerConfig { top_n: Some(1), ..Default::default() };
        let report = build(&records, &config);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].namespace, "a.z");
        assert_eq!(report.namespaces.len(), 3);
        assert_eq!(report.summary.pattern_count, 3);
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("qingyu.books"), "books");
        assert_eq!(collection_name("db.system.profile"), "system.profile");
        assert_eq!(collection_name("books"), "books");
    }
}
