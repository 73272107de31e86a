//! Pattern Aggregator
//!
//! Folds query records into per-(namespace, shape) patterns.
//!
//! ## Design
//!
//! | Type | Role |
//! |------|------|
//! | `PatternAggregator` | Stateless: normalizer, index detector, slow threshold |
//! | `PatternAccumulator` | Run-scoped state, passed into every ingest call |
//! | `SharedPatternAccumulator` | DashMap-backed, per-key locking for concurrent ingest |
//!
//! Independent accumulators combine with `PatternAccumulator::merge`, which is
//! commutative and associative, so sharded runs produce the same patterns as
//! a single sequential pass.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::index_usage::IndexUsageDetector;
use super::normalizer::{Normalizer, PredicateShape};
use crate::config::AnalyzerConfig;
use crate::services::slow_query_analyzer::models::{
    OperationType, PredicateNode, QueryRecord, SortSpec,
};

/// Samples retained per pattern
pub const SAMPLE_CAPACITY: usize = 5;

// ============================================================================
// Pattern
// ============================================================================

/// Grouping key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub namespace: String,
    pub shape: PredicateShape,
}

/// A retained record with its arrival position
#[derive(Debug, Clone)]
pub struct Sample {
    pub sequence: u64,
    pub record: QueryRecord,
}

/// Aggregate of all records sharing one (namespace, shape)
#[derive(Debug, Clone)]
pub struct QueryPattern {
    pub namespace: String,
    pub shape: PredicateShape,
    pub count: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    /// AND over every contribution
    pub used_index: bool,
    samples: Vec<Sample>,
    pub raw_query_example: PredicateNode,
    pub raw_sort_example: SortSpec,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub operations: BTreeMap<OperationType, u64>,
    /// Arrival position of the record the raw examples came from
    pub first_sequence: u64,
}

impl QueryPattern {
    fn new(key: PatternKey, sequence: u64, record: &QueryRecord, used_index: bool) -> Self {
        let mut pattern = Self {
            namespace: key.namespace,
            shape: key.shape,
            count: 0,
            total_duration_ms: 0.0,
            min_duration_ms: f64::INFINITY,
            max_duration_ms: 0.0,
            used_index: true,
            samples: Vec::with_capacity(SAMPLE_CAPACITY),
            raw_query_example: record.filter.clone(),
            raw_sort_example: record.sort.clone(),
            first_seen: None,
            last_seen: None,
            operations: BTreeMap::new(),
            first_sequence: sequence,
        };
        pattern.absorb(sequence, record, used_index);
        pattern
    }

    fn absorb(&mut self, sequence: u64, record: &QueryRecord, used_index: bool) {
        self.count += 1;
        self.total_duration_ms += record.duration_ms;
        self.min_duration_ms = self.min_duration_ms.min(record.duration_ms);
        self.max_duration_ms = self.max_duration_ms.max(record.duration_ms);
        self.used_index &= used_index;
        *self.operations.entry(record.operation).or_default() += 1;

        if let Some(ts) = record.timestamp {
            self.first_seen = Some(self.first_seen.map_or(ts, |seen| seen.min(ts)));
            self.last_seen = Some(self.last_seen.map_or(ts, |seen| seen.max(ts)));
        }

        if self.samples.len() < SAMPLE_CAPACITY {
            self.samples.push(Sample { sequence, record: record.clone() });
        }
    }

    /// Combine with a pattern for the same key built from other records
    pub fn merge(&mut self, other: QueryPattern) {
        self.count += other.count;
        self.total_duration_ms += other.total_duration_ms;
        self.min_duration_ms = self.min_duration_ms.min(other.min_duration_ms);
        self.max_duration_ms = self.max_duration_ms.max(other.max_duration_ms);
        self.used_index &= other.used_index;

        for (op, n) in other.operations {
            *self.operations.entry(op).or_default() += n;
        }

        self.first_seen = match (self.first_seen, other.first_seen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_seen = match (self.last_seen, other.last_seen) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if other.first_sequence < self.first_sequence {
            self.first_sequence = other.first_sequence;
            self.raw_query_example = other.raw_query_example;
            self.raw_sort_example = other.raw_sort_example;
        }

        self.samples.extend(other.samples);
        self.samples.sort_by_key(|s| s.sequence);
        self.samples.truncate(SAMPLE_CAPACITY);
    }

    pub fn avg_duration_ms(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.total_duration_ms / self.count as f64 }
    }

    pub fn samples(&self) -> impl Iterator<Item = &QueryRecord> {
        self.samples.iter().map(|s| &s.record)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ============================================================================
// Accumulator
// ============================================================================

/// Counters for one analysis run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub seen: u64,
    pub ingested: u64,
    pub malformed: u64,
    pub below_threshold: u64,
}

impl IngestStats {
    fn merge(&mut self, other: IngestStats) {
        self.seen += other.seen;
        self.ingested += other.ingested;
        self.malformed += other.malformed;
        self.below_threshold += other.below_threshold;
    }
}

/// Run-scoped pattern map
#[derive(Debug, Clone, Default)]
pub struct PatternAccumulator {
    patterns: HashMap<PatternKey, QueryPattern>,
    stats: IngestStats,
}

impl PatternAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &QueryPattern> {
        self.patterns.values()
    }

    pub fn into_patterns(self) -> impl Iterator<Item = QueryPattern> {
        self.patterns.into_values()
    }

    /// Count an input that never became a record (e.g. undecodable document)
    pub fn note_malformed(&mut self) {
        self.stats.seen += 1;
        self.stats.malformed += 1;
    }

    /// Commutative, associative combine of two independent accumulators
    pub fn merge(mut self, other: PatternAccumulator) -> Self {
        self.stats.merge(other.stats);
        for (key, pattern) in other.patterns {
            match self.patterns.get_mut(&key) {
                Some(existing) => existing.merge(pattern),
                None => {
                    self.patterns.insert(key, pattern);
                },
            }
        }
        self
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Outcome of routing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested,
    Malformed,
    BelowThreshold,
}

#[derive(Debug, Clone)]
pub struct PatternAggregator {
    normalizer: Normalizer,
    detector: IndexUsageDetector,
    slow_ms: f64,
}

impl PatternAggregator {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            normalizer: Normalizer::new(config.max_depth),
            detector: IndexUsageDetector::new(&config.index_scan_stages, config.max_depth),
            slow_ms: config.slow_ms,
        }
    }

    pub fn key_for(&self, record: &QueryRecord) -> PatternKey {
        PatternKey {
            namespace: record.namespace.clone(),
            shape: self.normalizer.shape_of(&record.filter, &record.sort),
        }
    }

    /// Ingest in arrival order; the record's position is the number seen so far
    pub fn ingest(&self, acc: &mut PatternAccumulator, record: &QueryRecord) -> IngestOutcome {
        let sequence = acc.stats.seen;
        self.ingest_at(acc, sequence, record)
    }

    /// Ingest with an explicit arrival position, used by sharded runs
    pub fn ingest_at(
        &self,
        acc: &mut PatternAccumulator,
        sequence: u64,
        record: &QueryRecord,
    ) -> IngestOutcome {
        acc.stats.seen += 1;

        let outcome = self.screen(record);
        match outcome {
            IngestOutcome::Malformed => acc.stats.malformed += 1,
            IngestOutcome::BelowThreshold => acc.stats.below_threshold += 1,
            IngestOutcome::Ingested => {
                acc.stats.ingested += 1;
                let used_index = self.detector.uses_index(record.plan_tree.as_ref());
                let key = self.key_for(record);
                match acc.patterns.get_mut(&key) {
                    Some(pattern) => pattern.absorb(sequence, record, used_index),
                    None => {
                        tracing::debug!(
                            "New pattern #{} {} {}",
                            acc.patterns.len() + 1,
                            key.namespace,
                            key.shape
                        );
                        let pattern = QueryPattern::new(key.clone(), sequence, record, used_index);
                        acc.patterns.insert(key, pattern);
                    },
                }
            },
        }
        outcome
    }

    /// Fold-style ingest: accumulator in, accumulator out
    pub fn fold(&self, mut acc: PatternAccumulator, record: &QueryRecord) -> PatternAccumulator {
        self.ingest(&mut acc, record);
        acc
    }

    fn screen(&self, record: &QueryRecord) -> IngestOutcome {
        if let Err(e) = record.validate() {
            tracing::debug!("Skipping malformed record (ns='{}'): {}", record.namespace, e);
            return IngestOutcome::Malformed;
        }
        if record.duration_ms < self.slow_ms {
            return IngestOutcome::BelowThreshold;
        }
        IngestOutcome::Ingested
    }
}

// ============================================================================
// Shared Accumulator
// ============================================================================

/// Concurrent pattern map
///
/// Mutations lock only the DashMap shard holding the key, so unrelated
/// patterns are updated in parallel.
#[derive(Debug, Default)]
pub struct SharedPatternAccumulator {
    patterns: DashMap<PatternKey, QueryPattern>,
    seen: AtomicU64,
    ingested: AtomicU64,
    malformed: AtomicU64,
    below_threshold: AtomicU64,
}

impl SharedPatternAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `sequence` is the record's position in the input
    pub fn ingest(
        &self,
        aggregator: &PatternAggregator,
        sequence: u64,
        record: &QueryRecord,
    ) -> IngestOutcome {
        self.seen.fetch_add(1, Ordering::Relaxed);

        let outcome = aggregator.screen(record);
        match outcome {
            IngestOutcome::Malformed => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
            },
            IngestOutcome::BelowThreshold => {
                self.below_threshold.fetch_add(1, Ordering::Relaxed);
            },
            IngestOutcome::Ingested => {
                self.ingested.fetch_add(1, Ordering::Relaxed);
                let used_index = aggregator.detector.uses_index(record.plan_tree.as_ref());
                let key = aggregator.key_for(record);
                self.patterns
                    .entry(key.clone())
                    .and_modify(|pattern| {
                        // Out-of-order arrival: keep the earliest record's raw example
                        let mut single = QueryPattern::new(key.clone(), sequence, record, used_index);
                        std::mem::swap(pattern, &mut single);
                        pattern.merge(single);
                    })
                    .or_insert_with(|| QueryPattern::new(key, sequence, record, used_index));
            },
        }
        outcome
    }

    pub fn into_accumulator(self) -> PatternAccumulator {
        PatternAccumulator {
            patterns: self.patterns.into_iter().collect(),
            stats: IngestStats {
                seen: self.seen.into_inner(),
                ingested: self.ingested.into_inner(),
                malformed: self.malformed.into_inner(),
                below_threshold: self.below_threshold.into_inner(),
            },
        }
    }
}
