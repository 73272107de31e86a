//! Collection helpers
//!
//! Small grouping and de-duplication helpers shared by the analyzer.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Group items by key, keeping each group in input order
///
/// # Example
/// ```ignore
/// let entries: Vec<&RecommendationEntry> = ...;
/// let by_namespace = group_by(entries, |e| e.namespace.clone());
/// ```
#[inline]
pub fn group_by<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, Vec<T>>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut map: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        map.entry(key_fn(&item)).or_default().push(item);
    }
    map
}

/// Remove duplicates, keeping the first occurrence of each item
///
/// # Example
/// ```ignore
/// let fields = vec!["status", "title", "status"];
/// let unique = unique_ordered(fields); // ["status", "title"]
/// ```
#[inline]
pub fn unique_ordered<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_keeps_input_order_within_group() {
        let items = vec![("a", 1), ("b", 2), ("a", 3), ("a", 4)];
        let grouped = group_by(items, |(k, _)| *k);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["a"], vec![("a", 1), ("a", 3), ("a", 4)]);
        assert_eq!(grouped["b"], vec![("b", 2)]);
    }

    #[test]
    fn test_unique_ordered_keeps_first_occurrence() {
        let fields = vec!["status", "title", "status", "created_at", "title"];
        assert_eq!(unique_ordered(fields), vec!["status", "title", "created_at"]);
    }

    #[test]
    fn test_unique_ordered_empty() {
        assert!(unique_ordered(Vec::<String>::new()).is_empty());
    }
}
