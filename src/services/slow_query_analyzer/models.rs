//! Slow query analysis data models
//!
//! Input records as delivered by the profiling collector, and the
//! recommendation report handed to the external renderer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Prefix that marks a key as a query operator (`$and`, `$gt`, ...)
pub const DEFAULT_OPERATOR_PREFIX: &str = "$";

/// Primary-key field excluded from suggestions and used as fallback
pub const DEFAULT_PRIMARY_KEY: &str = "_id";

// ============================================================================
// Operation Type
// ============================================================================

/// Kind of database operation that produced a profile record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Find,
    Aggregate,
    Update,
    Remove,
    Insert,
    Command,
    Other,
}

impl OperationType {
    /// Map a profiler `op` string to an operation type
    pub fn from_profile_op(op: &str) -> Self {
        match op.trim().to_lowercase().as_str() {
            "query" | "find" => OperationType::Find,
            "aggregate" => OperationType::Aggregate,
            "update" | "findandmodify" => OperationType::Update,
            "remove" | "delete" => OperationType::Remove,
            "insert" => OperationType::Insert,
            "command" => OperationType::Command,
            _ => OperationType::Other,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Find => "find",
            OperationType::Aggregate => "aggregate",
            OperationType::Update => "update",
            OperationType::Remove => "remove",
            OperationType::Insert => "insert",
            OperationType::Command => "command",
            OperationType::Other => "other",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Predicate Tree
// ============================================================================

/// Key of a predicate mapping, classified once at conversion time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PredicateKey {
    /// Plain document field (`status`, `author.name`)
    Field(String),
    /// Reserved operator key (`$or`, `$in`)
    Operator(String),
}

impl PredicateKey {
    pub fn classify(key: &str, operator_prefix: &str) -> Self {
        if !operator_prefix.is_empty() && key.starts_with(operator_prefix) {
            PredicateKey::Operator(key.to_string())
        } else {
            PredicateKey::Field(key.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PredicateKey::Field(name) | PredicateKey::Operator(name) => name,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, PredicateKey::Operator(_))
    }
}

/// Filter predicate tree with explicit node kinds
///
/// Mapping entries keep the order in which the issuing code wrote them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PredicateNode {
    /// String, number, bool or null
    Literal(Value),
    Array(Vec<PredicateNode>),
    Mapping(Vec<(PredicateKey, PredicateNode)>),
}

impl Default for PredicateNode {
    fn default() -> Self {
        PredicateNode::Mapping(Vec::new())
    }
}

impl PredicateNode {
    /// Convert a JSON value, classifying keys that start with `operator_prefix`
    pub fn from_json(value: &Value, operator_prefix: &str) -> Self {
        match value {
            Value::Object(map) => PredicateNode::Mapping(
                map.iter()
                    .map(|(key, child)| {
                        (
                            PredicateKey::classify(key, operator_prefix),
                            Self::from_json(child, operator_prefix),
                        )
                    })
                    .collect(),
            ),
            Value::Array(items) => PredicateNode::Array(
                items.iter().map(|item| Self::from_json(item, operator_prefix)).collect(),
            ),
            literal => PredicateNode::Literal(literal.clone()),
        }
    }

    /// Back to JSON, preserving key order
    pub fn to_json(&self) -> Value {
        match self {
            PredicateNode::Literal(value) => value.clone(),
            PredicateNode::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            PredicateNode::Mapping(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, child) in entries {
                    map.insert(key.as_str().to_string(), child.to_json());
                }
                Value::Object(map)
            },
        }
    }

    /// Top-level entries, empty for non-mapping nodes
    pub fn entries(&self) -> &[(PredicateKey, PredicateNode)] {
        match self {
            PredicateNode::Mapping(entries) => entries,
            _ => &[],
        }
    }
}

impl From<Value> for PredicateNode {
    fn from(value: Value) -> Self {
        PredicateNode::from_json(&value, DEFAULT_OPERATOR_PREFIX)
    }
}

// ============================================================================
// Sort Specification
// ============================================================================

/// Direction read off a sort key's issued value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SortDirection {
    Ascending,
    Descending,
    /// `{ $meta: "textScore" }` style sort keys
    Meta(String),
    /// Anything else (`"hashed"`, nested documents)
    Other,
}

impl SortDirection {
    pub fn of(value: &PredicateNode) -> Self {
        match value {
            PredicateNode::Literal(Value::Number(n)) => {
                if n.as_f64().is_some_and(|v| v < 0.0) {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                }
            },
            PredicateNode::Literal(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "asc" | "ascending" | "1" => SortDirection::Ascending,
                "desc" | "descending" | "-1" => SortDirection::Descending,
                _ => SortDirection::Other,
            },
            PredicateNode::Mapping(entries) => entries
                .iter()
                .find(|(key, _)| key.as_str() == "$meta")
                .and_then(|(_, meta)| match meta {
                    PredicateNode::Literal(Value::String(kind)) => {
                        Some(SortDirection::Meta(kind.clone()))
                    },
                    _ => None,
                })
                .unwrap_or(SortDirection::Other),
            _ => SortDirection::Other,
        }
    }
}

/// One sort key with its value exactly as issued
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub value: PredicateNode,
}

impl SortKey {
    pub fn direction(&self) -> SortDirection {
        SortDirection::of(&self.value)
    }
}

/// Ordered sort specification; may be empty
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SortSpec(pub Vec<SortKey>);

impl SortSpec {
    /// Accepts `{field: dir, ...}` or `[[field, dir], ...]`
    ///
    /// Pairs without a string field name are dropped; a pair without a
    /// direction is ascending.
    pub fn from_json(value: &Value, operator_prefix: &str) -> Self {
        let key = |field: &str, dir: &Value| SortKey {
            field: field.to_string(),
            value: PredicateNode::from_json(dir, operator_prefix),
        };
        match value {
            Value::Object(map) => SortSpec(map.iter().map(|(field, dir)| key(field, dir)).collect()),
            Value::Array(pairs) => SortSpec(
                pairs
                    .iter()
                    .filter_map(|pair| {
                        let field = pair.get(0)?.as_str()?;
                        Some(key(field, pair.get(1).unwrap_or(&Value::from(1))))
                    })
                    .collect(),
            ),
            _ => SortSpec::default(),
        }
    }

    /// Object form, values unchanged
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.0.len());
        for key in &self.0 {
            map.insert(key.field.clone(), key.value.to_json());
        }
        Value::Object(map)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|k| k.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Value> for SortSpec {
    fn from(value: Value) -> Self {
        SortSpec::from_json(&value, DEFAULT_OPERATOR_PREFIX)
    }
}

// ============================================================================
// Execution Plan
// ============================================================================

/// One stage of an execution plan tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStage {
    pub stage: String,
    #[serde(default)]
    pub children: Vec<PlanStage>,
}

impl PlanStage {
    pub fn new(stage: impl Into<String>) -> Self {
        Self { stage: stage.into(), children: Vec::new() }
    }

    pub fn with_children(stage: impl Into<String>, children: Vec<PlanStage>) -> Self {
        Self { stage: stage.into(), children }
    }
}

// ============================================================================
// Query Record
// ============================================================================

/// Reasons a record cannot be folded into a pattern
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("Record has no namespace")]
    MissingNamespace,

    #[error("Invalid duration: {0}")]
    InvalidDuration(f64),
}

/// One observed slow operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub namespace: String,
    pub operation: OperationType,
    pub duration_ms: f64,
    pub filter: PredicateNode,
    pub sort: SortSpec,
    pub timestamp: Option<DateTime<Utc>>,
    pub plan_tree: Option<PlanStage>,
}

impl QueryRecord {
    /// Record with an empty filter, no sort, no timestamp and no plan
    pub fn new(namespace: impl Into<String>, operation: OperationType, duration_ms: f64) -> Self {
        Self {
            namespace: namespace.into(),
            operation,
            duration_ms,
            filter: PredicateNode::default(),
            sort: SortSpec::default(),
            timestamp: None,
            plan_tree: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<PredicateNode>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_sort(mut self, sort: impl Into<SortSpec>) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_plan(mut self, plan_tree: PlanStage) -> Self {
        self.plan_tree = Some(plan_tree);
        self
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.namespace.trim().is_empty() {
            return Err(RecordError::MissingNamespace);
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            return Err(RecordError::InvalidDuration(self.duration_ms));
        }
        Ok(())
    }
}

// ============================================================================
// Priority and Index Suggestion
// ============================================================================

/// Remediation priority, P0 most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexDirection {
    Ascending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexField {
    pub field: String,
    pub direction: IndexDirection,
}

/// Candidate compound index, fields in key order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSuggestion {
    pub fields: Vec<IndexField>,
}

impl IndexSuggestion {
    pub fn ascending<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|f| IndexField { field: f.into(), direction: IndexDirection::Ascending })
                .collect(),
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }

    /// Ordered key document, e.g. `{"status": 1, "title": 1}`
    pub fn key_document(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            let dir = match field.direction {
                IndexDirection::Ascending => 1,
            };
            map.insert(field.field.clone(), Value::from(dir));
        }
        Value::Object(map)
    }
}

// ============================================================================
// Report
// ============================================================================

/// One ranked recommendation
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationEntry {
    pub namespace: String,
    /// Namespace without its database prefix
    pub collection: String,
    pub raw_query: Value,
    pub raw_sort: Value,
    pub count: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: f64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
    pub used_index: bool,
    pub priority: Priority,
    pub suggested_index: IndexSuggestion,
    pub index_keys: Value,
    pub operations: BTreeMap<OperationType, u64>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Per-namespace totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceRollup {
    pub namespace: String,
    pub count: u64,
    pub total_duration_ms: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub records_seen: u64,
    pub records_ingested: u64,
    pub malformed_skipped: u64,
    pub below_threshold_skipped: u64,
    pub pattern_count: usize,
    pub full_scan_patterns: usize,
    pub priority_counts: BTreeMap<Priority, usize>,
}

/// Complete analysis output
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub summary: ReportSummary,
    pub recommendations: Vec<RecommendationEntry>,
    pub namespaces: Vec<NamespaceRollup>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }
}
