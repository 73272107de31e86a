//! Index-Usage Detector
//!
//! A record counts as index-backed only if an index-scan stage exists
//! somewhere in its plan tree. A missing plan is never treated as index use.

use crate::services::slow_query_analyzer::models::PlanStage;

#[derive(Debug, Clone)]
pub struct IndexUsageDetector {
    /// Upper-cased stage names
    index_stages: Vec<String>,
    max_depth: usize,
}

impl IndexUsageDetector {
    pub fn new<I, S>(index_stages: I, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            index_stages: index_stages
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            max_depth,
        }
    }

    pub fn uses_index(&self, plan_tree: Option<&PlanStage>) -> bool {
        plan_tree.is_some_and(|root| self.visit(root, 0))
    }

    pub fn is_index_stage(&self, stage: &str) -> bool {
        let stage = stage.trim();
        self.index_stages.iter().any(|s| s.eq_ignore_ascii_case(stage))
    }

    // Nodes past max_depth are not inspected
    fn visit(&self, node: &PlanStage, depth: usize) -> bool {
        if depth >= self.max_depth {
            return false;
        }
        if self.is_index_stage(&node.stage) {
            return true;
        }
        node.children.iter().any(|child| self.visit(child, depth + 1))
    }
}

impl Default for IndexUsageDetector {
    fn default() -> Self {
        Self::new(["IXSCAN", "COUNT_SCAN", "DISTINCT_SCAN", "IDHACK", "EXPRESS_IXSCAN"], 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_plan_is_not_index_use() {
        assert!(!IndexUsageDetector::default().uses_index(None));
    }

    #[test]
    fn test_root_index_scan() {
        let plan = PlanStage::new("IXSCAN");
        assert!(IndexUsageDetector::default().uses_index(Some(&plan)));
    }

    #[test]
    fn test_top_level_collscan_is_full_scan() {
        let plan = PlanStage::with_children("COLLSCAN", vec![]);
        assert!(!IndexUsageDetector::default().uses_index(Some(&plan)));
    }

    #[test]
    fn test_index_scan_found_deep_in_tree() {
        let plan = PlanStage::with_children(
            "LIMIT",
            vec![
                PlanStage::with_children("SORT", vec![PlanStage::new("COLLSCAN")]),
                PlanStage::with_children(
                    "FETCH",
                    vec![PlanStage::with_children("OR", vec![PlanStage::new("ixscan")])],
                ),
            ],
        );
        assert!(IndexUsageDetector::default().uses_index(Some(&plan)));
    }

    #[test]
    fn test_no_index_stage_anywhere() {
        let plan = PlanStage::with_children(
            "PROJECTION_SIMPLE",
            vec![PlanStage::with_children("SORT", vec![PlanStage::new("COLLSCAN")])],
        );
        assert!(!IndexUsageDetector::default().uses_index(Some(&plan)));
    }

    #[test]
    fn test_depth_limit_fails_closed() {
        let detector = IndexUsageDetector::new(["IXSCAN"], 2);
        let plan = PlanStage::with_children(
            "LIMIT",
            vec![PlanStage::with_children("FETCH", vec![PlanStage::new("IXSCAN")])],
        );
        assert!(!detector.uses_index(Some(&plan)));

        let shallow = PlanStage::with_children("FETCH", vec![PlanStage::new("IXSCAN")]);
        assert!(detector.uses_index(Some(&shallow)));
    }
}
