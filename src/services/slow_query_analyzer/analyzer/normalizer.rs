//! Predicate Normalizer
//!
//! Strips literal values out of filter and sort structures so that queries
//! issued with different parameters group under one shape. Key names, key
//! order and nesting are preserved; operator keys stay structural.

use serde::Serialize;
use std::fmt;

use crate::services::slow_query_analyzer::models::{PredicateKey, PredicateNode, SortSpec};

/// Canonical literal-free node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ShapeNode {
    /// Any literal or array value
    Placeholder,
    /// Subtree beyond the configured depth limit
    Opaque,
    Mapping(Vec<(PredicateKey, ShapeNode)>),
}

impl fmt::Display for ShapeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeNode::Placeholder => f.write_str("?"),
            ShapeNode::Opaque => f.write_str("…"),
            ShapeNode::Mapping(entries) => {
                f.write_str("{")?;
                for (i, (key, child)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key.as_str(), child)?;
                }
                f.write_str("}")
            },
        }
    }
}

/// Shape of a (filter, sort) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PredicateShape {
    pub filter: ShapeNode,
    pub sort: ShapeNode,
}

impl fmt::Display for PredicateShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter={} sort={}", self.filter, self.sort)
    }
}

/// Structural normalizer with an explicit recursion bound
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_depth: usize,
}

impl Normalizer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn shape_of(&self, filter: &PredicateNode, sort: &SortSpec) -> PredicateShape {
        PredicateShape { filter: self.normalize(filter), sort: self.normalize_sort(sort) }
    }

    /// Replace every literal and array with the placeholder
    pub fn normalize(&self, node: &PredicateNode) -> ShapeNode {
        self.normalize_at(node, 0)
    }

    fn normalize_at(&self, node: &PredicateNode, depth: usize) -> ShapeNode {
        match node {
            PredicateNode::Literal(_) | PredicateNode::Array(_) => ShapeNode::Placeholder,
            PredicateNode::Mapping(_) if depth >= self.max_depth => ShapeNode::Opaque,
            PredicateNode::Mapping(entries) => ShapeNode::Mapping(
                entries
                    .iter()
                    .map(|(key, child)| (key.clone(), self.normalize_at(child, depth + 1)))
                    .collect(),
            ),
        }
    }

    /// Sort keys keep their order; each value is walked like a filter value
    pub fn normalize_sort(&self, sort: &SortSpec) -> ShapeNode {
        ShapeNode::Mapping(
            sort.0
                .iter()
                .map(|key| {
                    (PredicateKey::Field(key.field.clone()), self.normalize_at(&key.value, 1))
                })
                .collect(),
        )
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(32)
    }
}
