//! Profiler document decoder
//!
//! Maps one document from the database profiler collection to a
//! `QueryRecord`. Handles both the legacy layout (`query.filter`,
//! `query.orderby`) and the command layout (`command.filter`,
//! `command.pipeline`), plus extended-JSON numbers and dates.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::error::{ParseError, ParseResult};
use crate::services::slow_query_analyzer::models::{
    DEFAULT_OPERATOR_PREFIX, OperationType, PlanStage, PredicateNode, QueryRecord, SortSpec,
};

/// Stage names in a plan summary, e.g. "IXSCAN { status: 1 }, COLLSCAN"
static PLAN_SUMMARY_STAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|,)\s*([A-Z][A-Z_]*)\b").unwrap());

/// Child links used by execution stats trees
const CHILD_STAGE_KEYS: [&str; 5] =
    ["inputStage", "innerStage", "outerStage", "thenStage", "elseStage"];

/// Sort modifiers of the legacy query layout
const QUERY_MODIFIER_KEYS: [&str; 3] = ["sort", "orderby", "$orderby"];

/// Stage name for a synthetic root over several summary stages
const PLAN_SUMMARY_ROOT: &str = "PLAN_SUMMARY";

#[derive(Debug, Clone)]
pub struct ProfileDocumentDecoder {
    operator_prefix: String,
}

impl ProfileDocumentDecoder {
    pub fn new(operator_prefix: impl Into<String>) -> Self {
        Self { operator_prefix: operator_prefix.into() }
    }

    pub fn decode(&self, doc: &Value) -> ParseResult<QueryRecord> {
        let obj = doc.as_object().ok_or(ParseError::NotAnObject)?;

        let namespace = obj
            .get("ns")
            .ok_or_else(|| ParseError::MissingField("ns".to_string()))?
            .as_str()
            .ok_or_else(|| ParseError::InvalidField("ns".to_string(), "not a string".to_string()))?
            .to_string();

        let millis = obj.get("millis").ok_or_else(|| ParseError::MissingField("millis".to_string()))?;
        let duration_ms = number_value(millis).ok_or_else(|| {
            ParseError::InvalidField("millis".to_string(), format!("not a number: {}", millis))
        })?;

        let command = obj.get("command").and_then(Value::as_object);
        let query = obj.get("query");

        let operation = Self::operation(obj.get("op").and_then(Value::as_str), command);

        let filter = Self::filter_value(command, query)
            .map(|v| PredicateNode::from_json(v, &self.operator_prefix))
            .unwrap_or_default();
        let sort = Self::sort_value(command, query)
            .map(|v| SortSpec::from_json(v, &self.operator_prefix))
            .unwrap_or_default();

        let timestamp = obj.get("ts").and_then(|ts| {
            let parsed = timestamp_value(ts);
            if parsed.is_none() {
                tracing::debug!("Ignoring unparseable ts {} in {}", ts, namespace);
            }
            parsed
        });

        let plan_tree = obj.get("execStats").and_then(Self::plan_from_exec_stats).or_else(|| {
            obj.get("planSummary").and_then(Value::as_str).and_then(Self::plan_from_summary)
        });

        Ok(QueryRecord {
            namespace,
            operation,
            duration_ms,
            filter,
            sort,
            timestamp,
            plan_tree,
        })
    }

    fn operation(op: Option<&str>, command: Option<&Map<String, Value>>) -> OperationType {
        let op = op.map(OperationType::from_profile_op).unwrap_or(OperationType::Other);
        if op != OperationType::Command {
            return op;
        }

        // The command name is the first key of the command document
        match command.and_then(|c| c.keys().next()).map(|k| k.to_lowercase()).as_deref() {
            Some("aggregate") => OperationType::Aggregate,
            Some("find") => OperationType::Find,
            Some("findandmodify") | Some("update") => OperationType::Update,
            Some("delete") => OperationType::Remove,
            Some("insert") => OperationType::Insert,
            _ => OperationType::Command,
        }
    }

    fn filter_value<'a>(
        command: Option<&'a Map<String, Value>>,
        query: Option<&'a Value>,
    ) -> Option<&'a Value> {
        if let Some(command) = command {
            let filter = ["filter", "query", "q"].iter().find_map(|k| command.get(*k));
            if filter.is_some() {
                return filter;
            }
            if let Some(matched) = pipeline_stage(command, "$match") {
                return Some(matched);
            }
        }

        let query_doc = query?;
        let query = query_doc.as_object()?;
        if let Some(filter) =
            query.get("filter").or_else(|| query.get("$query")).or_else(|| query.get("query"))
        {
            return Some(filter);
        }

        // Legacy layout: the query document itself is the filter
        if query.keys().any(|k| QUERY_MODIFIER_KEYS.contains(&k.as_str())) {
            None
        } else {
            Some(query_doc)
        }
    }

    fn sort_value<'a>(
        command: Option<&'a Map<String, Value>>,
        query: Option<&'a Value>,
    ) -> Option<&'a Value> {
        if let Some(command) = command {
            if let Some(sort) = command.get("sort") {
                return Some(sort);
            }
            if let Some(sort) = pipeline_stage(command, "$sort") {
                return Some(sort);
            }
        }
        let query = query?.as_object()?;
        QUERY_MODIFIER_KEYS.iter().find_map(|k| query.get(*k))
    }

    fn plan_from_exec_stats(stats: &Value) -> Option<PlanStage> {
        let obj = stats.as_object()?;
        let stage = obj.get("stage").and_then(Value::as_str)?;

        let mut children: Vec<PlanStage> = CHILD_STAGE_KEYS
            .iter()
            .filter_map(|key| obj.get(*key))
            .filter_map(Self::plan_from_exec_stats)
            .collect();
        if let Some(inputs) = obj.get("inputStages").and_then(Value::as_array) {
            children.extend(inputs.iter().filter_map(Self::plan_from_exec_stats));
        }

        Some(PlanStage::with_children(stage, children))
    }

    fn plan_from_summary(summary: &str) -> Option<PlanStage> {
        let mut stages: Vec<PlanStage> = PLAN_SUMMARY_STAGE_REGEX
            .captures_iter(summary)
            .filter_map(|cap| cap.get(1))
            .map(|m| PlanStage::new(m.as_str()))
            .collect();

        match stages.len() {
            0 => None,
            1 => stages.pop(),
            _ => Some(PlanStage::with_children(PLAN_SUMMARY_ROOT, stages)),
        }
    }
}

impl Default for ProfileDocumentDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATOR_PREFIX)
    }
}

/// `stage` body from the first two pipeline stages; later stages see
/// reshaped documents and cannot use collection indexes
fn pipeline_stage<'a>(command: &'a Map<String, Value>, stage: &str) -> Option<&'a Value> {
    let pipeline = command.get("pipeline")?.as_array()?;
    pipeline
        .iter()
        .take(2)
        .filter_map(Value::as_object)
        .find_map(|s| s.get(stage))
}

/// Plain JSON number or extended JSON `{"$numberLong": "12"}`
fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => ["$numberInt", "$numberLong", "$numberDouble"]
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(|v| match v {
                Value::String(s) => s.trim().parse().ok(),
                other => other.as_f64(),
            }),
        _ => None,
    }
}

/// RFC 3339 string, epoch millis, or extended JSON `{"$date": ...}`
fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            DateTime::parse_from_rfc3339(s.trim()).ok().map(|dt| dt.with_timezone(&Utc))
        },
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => {
            let inner = map.get("$date")?;
            timestamp_value(inner).or_else(|| {
                number_value(inner)
                    .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
            })
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(doc: Value) -> ParseResult<QueryRecord> {
        ProfileDocumentDecoder::default().decode(&doc)
    }

    #[test]
    fn test_decode_find_command() {
        let record = decode(json!({
            "op": "query",
            "ns": "qingyu.books",
            "command": {
                "find": "books",
                "filter": {"status": "published", "title": {"$regex": "^rust"}},
                "sort": {"created_at": -1},
                "limit": 20
            },
            "millis": 350,
            "planSummary": "COLLSCAN",
            "ts": {"$date": "2024-05-01T08:30:00.000Z"}
        }))
        .unwrap();

        assert_eq!(record.namespace, "qingyu.books");
        assert_eq!(record.operation, OperationType::Find);
        assert_eq!(record.duration_ms, 350.0);
        assert_eq!(
            record.filter.to_json(),
            json!({"status": "published", "title": {"$regex": "^rust"}})
        );
        assert_eq!(record.sort.to_json(), json!({"created_at": -1}));
        assert_eq!(record.plan_tree, Some(PlanStage::new("COLLSCAN")));
        assert_eq!(record.timestamp.unwrap().to_rfc3339(), "2024-05-01T08:30:00+00:00");
    }

    #[test]
    fn test_exec_stats_take_precedence_over_plan_summary() {
        let record = decode(json!({
            "op": "query",
            "ns": "db.books",
            "command": {"find": "books", "filter": {"author_id": 7}},
            "millis": 12,
            "planSummary": "COLLSCAN",
            "execStats": {
                "stage": "LIMIT",
                "inputStage": {
                    "stage": "FETCH",
                    "inputStage": {"stage": "IXSCAN", "keyPattern": {"author_id": 1}}
                }
            }
        }))
        .unwrap();

        let root = record.plan_tree.unwrap();
        assert_eq!(root.stage, "LIMIT");
        assert_eq!(root.children[0].stage, "FETCH");
        assert_eq!(root.children[0].children[0].stage, "IXSCAN");
    }

    #[test]
    fn test_exec_stats_with_multiple_inputs() {
        let plan = ProfileDocumentDecoder::plan_from_exec_stats(&json!({
            "stage": "OR",
            "inputStages": [{"stage": "IXSCAN"}, {"stage": "COLLSCAN"}]
        }))
        .unwrap();
        assert_eq!(plan.children.len(), 2);
    }

    #[test]
    fn test_plan_summary_with_several_stages() {
        let plan = ProfileDocumentDecoder::plan_from_summary(
            "IXSCAN { status: 1, title: 1 }, IXSCAN { author_id: 1 }",
        )
        .unwrap();
        assert_eq!(plan.stage, PLAN_SUMMARY_ROOT);
        assert_eq!(plan.children, vec![PlanStage::new("IXSCAN"), PlanStage::new("IXSCAN")]);
        assert!(ProfileDocumentDecoder::plan_from_summary("").is_none());
    }

    #[test]
    fn test_aggregate_pipeline_match_and_sort() {
        let record = decode(json!({
            "op": "command",
            "ns": "db.chapters",
            "command": {
                "aggregate": "chapters",
                "pipeline": [
                    {"$match": {"book_id": "b1", "published": true}},
                    {"$sort": {"index": 1}},
                    {"$group": {"_id": "$book_id"}}
                ]
            },
            "millis": {"$numberLong": "812"}
        }))
        .unwrap();

        assert_eq!(record.operation, OperationType::Aggregate);
        assert_eq!(record.duration_ms, 812.0);
        assert_eq!(record.filter.to_json(), json!({"book_id": "b1", "published": true}));
        assert_eq!(record.sort.to_json(), json!({"index": 1}));
        assert!(record.plan_tree.is_none());
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn test_legacy_query_layout() {
        let wrapped = decode(json!({
            "op": "query",
            "ns": "db.users",
            "query": {"$query": {"email": "a@b.c"}, "$orderby": {"created_at": -1}},
            "millis": 5
        }))
        .unwrap();
        assert_eq!(wrapped.filter.to_json(), json!({"email": "a@b.c"}));
        assert_eq!(wrapped.sort.to_json(), json!({"created_at": -1}));

        let bare = decode(json!({
            "op": "query",
            "ns": "db.users",
            "query": {"email": "a@b.c"},
            "millis": 5
        }))
        .unwrap();
        assert_eq!(bare.filter.to_json(), json!({"email": "a@b.c"}));
        assert!(bare.sort.is_empty());
    }

    #[test]
    fn test_update_command_uses_q() {
        let record = decode(json!({
            "op": "update",
            "ns": "db.progress",
            "command": {"q": {"user_id": 1, "book_id": 2}, "u": {"$set": {"pos": 3}}},
            "millis": 40
        }))
        .unwrap();
        assert_eq!(record.operation, OperationType::Update);
        assert_eq!(record.filter.to_json(), json!({"user_id": 1, "book_id": 2}));
    }

    #[test]
    fn test_filter_source_precedence() {
        // Command document wins over the legacy query document
        let both = decode(json!({
            "op": "update",
            "ns": "db.progress",
            "command": {"q": {"user_id": 1}},
            "query": {"legacy": true},
            "millis": 3
        }))
        .unwrap();
        assert_eq!(both.filter.to_json(), json!({"user_id": 1}));

        // command.filter wins over a pipeline $match
        let filter_and_match = decode(json!({
            "op": "command",
            "ns": "db.books",
            "command": {
                "aggregate": "books",
                "filter": {"a": 1},
                "pipeline": [{"$match": {"b": 2}}]
            },
            "millis": 3
        }))
        .unwrap();
        assert_eq!(filter_and_match.filter.to_json(), json!({"a": 1}));

        // Legacy document holding only sort modifiers has no filter
        let modifiers_only = decode(json!({
            "op": "query",
            "ns": "db.books",
            "query": {"orderby": {"title": 1}},
            "millis": 3
        }))
        .unwrap();
        assert!(modifiers_only.filter.entries().is_empty());
        assert_eq!(modifiers_only.sort.to_json(), json!({"title": 1}));
    }

    #[test]
    fn test_sort_direction_is_kept_as_issued() {
        let record = decode(json!({
            "op": "query",
            "ns": "db.books",
            "command": {
                "find": "books",
                "filter": {},
                "sort": {"score": {"$meta": "textScore"}, "title": "desc"}
            },
            "millis": 3
        }))
        .unwrap();
        assert_eq!(
            record.sort.to_json(),
            json!({"score": {"$meta": "textScore"}, "title": "desc"})
        );
    }

    #[test]
    fn test_missing_fields_are_errors() {
        assert!(matches!(decode(json!([1, 2])), Err(ParseError::NotAnObject)));
        assert!(matches!(
            decode(json!({"millis": 1})),
            Err(ParseError::MissingField(f)) if f == "ns"
        ));
        assert!(matches!(
            decode(json!({"ns": "db.c"})),
            Err(ParseError::MissingField(f)) if f == "millis"
        ));
        assert!(matches!(
            decode(json!({"ns": "db.c", "millis": "slow"})),
            Err(ParseError::InvalidField(f, _)) if f == "millis"
        ));
    }

    #[test]
    fn test_unparseable_timestamp_is_ignored() {
        let record = decode(json!({"ns": "db.c", "millis": 1, "ts": "yesterday"})).unwrap();
        assert!(record.timestamp.is_none());
        assert_eq!(record.operation, OperationType::Other);
    }
}
