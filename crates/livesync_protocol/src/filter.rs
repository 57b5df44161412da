//! Collection filters shared by queries and change-feed subscriptions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Equality predicate on a single column, e.g. `project_id = 42`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqPredicate {
    /// Column name.
    pub column: String,
    /// Expected value, compared against the column's textual form.
    pub value: String,
}

impl EqPredicate {
    /// Returns true if the row satisfies the predicate.
    ///
    /// Strings compare verbatim; numbers and booleans compare by their JSON
    /// rendering, so `42` matches the predicate value `"42"`.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

/// A named collection, optionally scoped by an equality predicate.
///
/// The same filter is used for `fetch_all` and for the change-feed
/// subscription, so both paths see the same subset of rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFilter {
    /// Collection (table) name.
    pub collection: String,
    /// Optional scope.
    pub predicate: Option<EqPredicate>,
}

impl CollectionFilter {
    /// Creates an unscoped filter over a collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicate: None,
        }
    }

    /// Scopes the filter to rows where `column == value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.predicate = Some(EqPredicate {
            column: column.into(),
            value: value.to_string(),
        });
        self
    }

    /// Returns true if the row belongs to this filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.matches(row))
    }

    /// Topic name for the change-feed channel.
    ///
    /// Rendered as `collection` or `collection:column=eq.value`.
    pub fn topic(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CollectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            Some(p) => write!(f, "{}:{}=eq.{}", self.collection, p.column, p.value),
            None => f.write_str(&self.collection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unscoped_filter_matches_everything() {
        let filter = CollectionFilter::new("measurements");
        assert!(filter.matches(&json!({"id": "a"})));
        assert_eq!(filter.topic(), "measurements");
    }

    #[test]
    fn scoped_filter_compares_text_and_numbers() {
        let filter = CollectionFilter::new("measurements").eq("project_id", 42);
        assert_eq!(filter.topic(), "measurements:project_id=eq.42");

        assert!(filter.matches(&json!({"project_id": 42})));
        assert!(filter.matches(&json!({"project_id": "42"})));
        assert!(!filter.matches(&json!({"project_id": 7})));
        assert!(!filter.matches(&json!({"other": 42})));
        assert!(!filter.matches(&json!({"project_id": null})));
    }
}
