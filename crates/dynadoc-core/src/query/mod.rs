//! Query description: filters, ordering, limits and the resume token.
//!
//! A [`Query`] is plain data. [`QueryBuilder`](crate::collection::QueryBuilder)
//! wraps one together with its collection and hands it to the planner.

pub mod expr;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::iter::PaginationToken;

pub use expr::FilterExpr;

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    In,
    NotIn,
}

impl FilterOp {
    /// Whether the operator can drive a sort-key condition.
    pub fn is_key_condition(self) -> bool {
        !matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Equal => "=",
            FilterOp::LessThan => "<",
            FilterOp::GreaterThan => ">",
            FilterOp::LessThanOrEqual => "<=",
            FilterOp::GreaterThanOrEqual => ">=",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One `(field, op, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    op: FilterOp,
    value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_equality(&self) -> bool {
        self.op == FilterOp::Equal
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

/// Filters in insertion order plus ordering, paging and projection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    offset: usize,
    pagination_token: Option<PaginationToken>,
    field_paths: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn pagination_token(mut self, token: PaginationToken) -> Self {
        self.pagination_token = Some(token);
        self
    }

    /// Restrict results to these dotted paths (plus key fields).
    pub fn field_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn skip(&self) -> usize {
        self.offset
    }

    pub fn token(&self) -> Option<&PaginationToken> {
        self.pagination_token.as_ref()
    }

    pub fn requested_paths(&self) -> &[String] {
        &self.field_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filters_keep_insertion_order() {
        let query = Query::new()
            .filter("b", FilterOp::LessThan, 5)
            .filter("a", FilterOp::Equal, "x")
            .filter("c", FilterOp::In, json!([1, 2]));
        let fields: Vec<&str> = query.filters().iter().map(|f| f.field()).collect();
        assert_eq!(fields, vec!["b", "a", "c"]);
        assert!(query.filters()[1].is_equality());
    }

    #[test]
    fn test_paging_fields() {
        let query = Query::new()
            .limit(5)
            .offset(2)
            .order_by("year", false)
            .field_paths(["title", "info.pages"]);
        assert_eq!(query.max_results(), Some(5));
        assert_eq!(query.skip(), 2);
        assert_eq!(
            query.order(),
            Some(&OrderBy {
                field: "year".to_string(),
                ascending: false
            })
        );
        assert_eq!(query.requested_paths(), ["title", "info.pages"]);
        assert!(query.token().is_none());
    }

    #[test]
    fn test_filter_display() {
        let filter = Filter::new("title", FilterOp::NotIn, json!(["a"]));
        assert_eq!(filter.to_string(), "title NOT IN [\"a\"]");
        assert!(!FilterOp::In.is_key_condition());
        assert!(FilterOp::GreaterThanOrEqual.is_key_condition());
    }
}
