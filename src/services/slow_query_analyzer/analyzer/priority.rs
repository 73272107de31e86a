//! Priority Classifier
//!
//! Ordered decision ladder, first matching rule wins:
//!
//! | Priority | Rule |
//! |----------|------|
//! | P0 | count > 10 and avg > 200ms |
//! | P1 | avg > 500ms |
//! | P2 | avg > 200ms or count > 5 |
//! | P3 | otherwise |

use crate::services::slow_query_analyzer::models::Priority;

const FREQUENT_COUNT: u64 = 10;
const RECURRING_COUNT: u64 = 5;
const SLOW_AVG_MS: f64 = 200.0;
const VERY_SLOW_AVG_MS: f64 = 500.0;

pub fn classify(count: u64, avg_duration_ms: f64) -> Priority {
    if count > FREQUENT_COUNT && avg_duration_ms > SLOW_AVG_MS {
        Priority::P0
    } else if avg_duration_ms > VERY_SLOW_AVG_MS {
        Priority::P1
    } else if avg_duration_ms > SLOW_AVG_MS || count > RECURRING_COUNT {
        Priority::P2
    } else {
        Priority::P3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ladder() {
        assert_eq!(classify(11, 250.0), Priority::P0);
        assert_eq!(classify(1, 600.0), Priority::P1);
        assert_eq!(classify(3, 250.0), Priority::P2);
        assert_eq!(classify(1, 50.0), Priority::P3);
    }

    #[test]
    fn test_rule_order_wins_over_thresholds() {
        assert_eq!(classify(11, 600.0), Priority::P0);
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        assert_eq!(classify(10, 250.0), Priority::P2);
        assert_eq!(classify(11, 200.0), Priority::P2);
        assert_eq!(classify(1, 500.0), Priority::P2);
        assert_eq!(classify(5, 200.0), Priority::P3);
        assert_eq!(classify(6, 10.0), Priority::P2);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P2 < Priority::P3);
    }
}
