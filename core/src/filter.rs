//! Store-translatable filter predicates.
//!
//! A [`Filter`] is a boolean expression over document fields. It is data, not a
//! closure: every variant has a direct counterpart in a document store's query
//! language, so a repository can always hand the whole predicate to the store
//! instead of evaluating it in process. A predicate that needs external state simply
//! cannot be written.
//!
//! Field names are document paths. Nested fields use dots (`"stats.level"`).
//!
//! # Example
//!
//! ```
//! use service_common_core::filter::Filter;
//! use serde_json::json;
//!
//! let cheap_potions = Filter::eq("kind", "potion") & Filter::lt("price", 10);
//!
//! assert!(cheap_potions.matches(&json!({ "kind": "potion", "price": 4 })));
//! assert!(!cheap_potions.matches(&json!({ "kind": "potion", "price": 40 })));
//! ```
//!
//! # Evaluation Semantics
//!
//! [`Filter::matches`] is the reference evaluator used by in-memory stores. It follows
//! document-store rules rather than Rust equality:
//!
//! - numbers compare by value regardless of integer/float representation
//! - range comparisons only match values of the same kind (numbers with numbers,
//!   strings with strings)
//! - an array field matches when any element matches
//! - equality with `null` also matches a missing field

use crate::entity::ID_FIELD;
use serde_json::Value;
use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr, Not};
use uuid::Uuid;

/// Comparison operators supported by [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Field equals value
    Eq,
    /// Field does not equal value
    Ne,
    /// Field is greater than value
    Gt,
    /// Field is greater than or equal to value
    Gte,
    /// Field is less than value
    Lt,
    /// Field is less than or equal to value
    Lte,
}

impl Comparison {
    /// The document-store operator for this comparison.
    #[must_use]
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

/// A predicate over stored documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Matches the document whose identifier equals the given UUID
    Id(Uuid),
    /// Compares a field against a value
    Compare {
        /// Document path of the field
        field: String,
        /// Comparison operator
        op: Comparison,
        /// Right-hand operand
        value: Value,
    },
    /// Field equals one of the values
    In {
        /// Document path of the field
        field: String,
        /// Accepted values
        values: Vec<Value>,
    },
    /// Field equals none of the values
    NotIn {
        /// Document path of the field
        field: String,
        /// Rejected values
        values: Vec<Value>,
    },
    /// Field is present (or absent)
    Exists {
        /// Document path of the field
        field: String,
        /// `true` to require presence, `false` to require absence
        exists: bool,
    },
    /// Every filter matches
    And(Vec<Filter>),
    /// At least one filter matches
    Or(Vec<Filter>),
    /// The inner filter does not match
    Not(Box<Filter>),
}

impl Filter {
    /// A filter matching every document.
    #[must_use]
    pub const fn all() -> Self {
        Self::All
    }

    /// A filter matching the entity with the given identifier.
    #[must_use]
    pub const fn id(id: Uuid) -> Self {
        Self::Id(id)
    }

    fn compare(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field == value`
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    /// `field != value`
    #[must_use]
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ne, value)
    }

    /// `field > value`
    #[must_use]
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    /// `field >= value`
    #[must_use]
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gte, value)
    }

    /// `field < value`
    #[must_use]
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    /// `field <= value`
    #[must_use]
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lte, value)
    }

    /// `field` equals one of `values`.
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `field` equals none of `values`.
    #[must_use]
    pub fn not_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `field` is present in the document (even if null).
    #[must_use]
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
            exists: true,
        }
    }

    /// `field` is absent from the document.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
            exists: false,
        }
    }

    /// Every filter in `filters` matches. An empty list matches everything.
    #[must_use]
    pub fn all_of(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// At least one filter in `filters` matches. An empty list matches nothing.
    #[must_use]
    pub fn any_of(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Evaluate this filter against a JSON document.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Id(id) => lookup(document, ID_FIELD)
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .is_some_and(|stored| stored == *id),
            Self::Compare { field, op, value } => {
                let found = lookup(document, field);
                match op {
                    Comparison::Eq => equals(found, value),
                    Comparison::Ne => !equals(found, value),
                    Comparison::Gt => ordered(found, value, Ordering::is_gt),
                    Comparison::Gte => ordered(found, value, Ordering::is_ge),
                    Comparison::Lt => ordered(found, value, Ordering::is_lt),
                    Comparison::Lte => ordered(found, value, Ordering::is_le),
                }
            },
            Self::In { field, values } => {
                let found = lookup(document, field);
                values.iter().any(|value| equals(found, value))
            },
            Self::NotIn { field, values } => {
                let found = lookup(document, field);
                !values.iter().any(|value| equals(found, value))
            },
            Self::Exists { field, exists } => lookup(document, field).is_some() == *exists,
            Self::And(filters) => filters.iter().all(|filter| filter.matches(document)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(document)),
            Self::Not(inner) => !inner.matches(document),
        }
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(rhs);
                Self::And(filters)
            },
            lhs => Self::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(rhs);
                Self::Or(filters)
            },
            lhs => Self::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Filter {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

/// Resolve a dotted path inside a JSON document.
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

/// Candidate values a field contributes: the value itself plus its elements if it is an array.
fn candidates(found: &Value) -> impl Iterator<Item = &Value> {
    let elements = found.as_array().map(|items| items.iter()).into_iter().flatten();
    std::iter::once(found).chain(elements)
}

fn equals(found: Option<&Value>, expected: &Value) -> bool {
    match found {
        None => expected.is_null(),
        Some(found) => candidates(found).any(|candidate| same_value(candidate, expected)),
    }
}

fn ordered(found: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    found.is_some_and(|found| {
        candidates(found).any(|candidate| compare(candidate, expected).is_some_and(accept))
    })
}

fn same_value(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => compare(lhs, rhs) == Some(Ordering::Equal),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn potion() -> Value {
        json!({
            "_id": "6f1c1f8e-2b7a-4c55-9a43-51f0b1f3d2aa",
            "name": "Potion",
            "price": 5,
            "tags": ["healing", "consumable"],
            "stats": { "level": 3 },
            "retired_at": null
        })
    }

    #[test]
    fn equality_compares_numbers_by_value() {
        assert!(Filter::eq("price", 5.0).matches(&potion()));
        assert!(Filter::eq("price", 5).matches(&potion()));
        assert!(!Filter::eq("price", 6).matches(&potion()));
    }

    #[test]
    fn ranges_only_match_same_kind() {
        assert!(Filter::gt("price", 4).matches(&potion()));
        assert!(Filter::lte("price", 5).matches(&potion()));
        assert!(!Filter::lt("price", 5).matches(&potion()));
        assert!(!Filter::gt("price", "4").matches(&potion()));
        assert!(Filter::gte("name", "Pot").matches(&potion()));
    }

    #[test]
    fn nested_paths_resolve() {
        assert!(Filter::eq("stats.level", 3).matches(&potion()));
        assert!(!Filter::eq("stats.level.deeper", 3).matches(&potion()));
    }

    #[test]
    fn array_fields_match_any_element() {
        assert!(Filter::eq("tags", "healing").matches(&potion()));
        assert!(Filter::is_in("tags", ["weapon", "consumable"]).matches(&potion()));
        assert!(!Filter::is_in("tags", ["weapon"]).matches(&potion()));
        assert!(Filter::not_in("tags", ["weapon"]).matches(&potion()));
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        assert!(Filter::eq("does_not_exist", Value::Null).matches(&potion()));
        assert!(Filter::eq("retired_at", Value::Null).matches(&potion()));
        assert!(Filter::ne("does_not_exist", 1).matches(&potion()));
    }

    #[test]
    fn existence_distinguishes_null_from_missing() {
        assert!(Filter::exists("retired_at").matches(&potion()));
        assert!(Filter::missing("does_not_exist").matches(&potion()));
        assert!(!Filter::missing("name").matches(&potion()));
    }

    #[test]
    fn identifier_filter_uses_the_id_field() {
        let id = Uuid::parse_str("6f1c1f8e-2b7a-4c55-9a43-51f0b1f3d2aa").ok();
        assert!(id.is_some_and(|id| Filter::id(id).matches(&potion())));
        assert!(!Filter::id(Uuid::new_v4()).matches(&potion()));
    }

    #[test]
    fn operators_compose() {
        let filter = Filter::eq("name", "Potion") & Filter::lt("price", 10);
        assert!(filter.matches(&potion()));

        let filter = Filter::eq("name", "Elixir") | Filter::eq("name", "Potion");
        assert!(filter.matches(&potion()));

        assert!(!(!Filter::all()).matches(&potion()));
        assert_eq!(!!Filter::eq("name", "x"), Filter::eq("name", "x"));
    }

    #[test]
    fn chained_conjunctions_stay_flat() {
        let filter = Filter::eq("a", 1) & Filter::eq("b", 2) & Filter::eq("c", 3);
        assert!(matches!(filter, Filter::And(ref parts) if parts.len() == 3));
    }

    #[test]
    fn empty_groups_follow_identity_rules() {
        assert!(Filter::all_of([]).matches(&potion()));
        assert!(!Filter::any_of([]).matches(&potion()));
    }
}
