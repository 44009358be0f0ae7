//! Filter and condition expressions over native items.
//!
//! Planned queries carry their residual filters as a [`FilterExpr`], and
//! write preconditions are expressed the same way. Backends may translate an
//! expression into their own syntax or evaluate it directly with
//! [`FilterExpr::eval`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AttributeValue, Item, compare_attrs, resolve_attr};

/// A boolean expression evaluated against one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    // Comparisons: attribute path against a literal
    Eq(String, AttributeValue),
    Ne(String, AttributeValue),
    Lt(String, AttributeValue),
    Le(String, AttributeValue),
    Gt(String, AttributeValue),
    Ge(String, AttributeValue),
    In(String, Vec<AttributeValue>),

    // Existence checks
    AttributeExists(String),
    AttributeNotExists(String),

    // Boolean logic
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    /// Evaluate this expression against an item. A missing attribute never
    /// satisfies a comparison.
    pub fn eval(&self, item: &Item) -> bool {
        match self {
            FilterExpr::Eq(path, value) => compare_at(item, path, value) == Some(Ordering::Equal),
            FilterExpr::Ne(path, value) => compare_at(item, path, value) != Some(Ordering::Equal),
            FilterExpr::Lt(path, value) => compare_at(item, path, value) == Some(Ordering::Less),
            FilterExpr::Le(path, value) => matches!(
                compare_at(item, path, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterExpr::Gt(path, value) => {
                compare_at(item, path, value) == Some(Ordering::Greater)
            }
            FilterExpr::Ge(path, value) => matches!(
                compare_at(item, path, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterExpr::In(path, values) => values
                .iter()
                .any(|v| compare_at(item, path, v) == Some(Ordering::Equal)),

            FilterExpr::AttributeExists(path) => resolve_attr(item, path).is_some(),
            FilterExpr::AttributeNotExists(path) => resolve_attr(item, path).is_none(),

            FilterExpr::And(exprs) => exprs.iter().all(|e| e.eval(item)),
            FilterExpr::Or(exprs) => exprs.iter().any(|e| e.eval(item)),
            FilterExpr::Not(expr) => !expr.eval(item),
        }
    }

    /// Conjunction of `exprs`; `None` when empty, the single expression when
    /// there is only one.
    pub fn all(mut exprs: Vec<FilterExpr>) -> Option<FilterExpr> {
        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(FilterExpr::And(exprs)),
        }
    }
}

fn compare_at(item: &Item, path: &str, value: &AttributeValue) -> Option<Ordering> {
    compare_attrs(resolve_attr(item, path)?, value)
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Eq(p, v) => write!(f, "{p} = {v}"),
            FilterExpr::Ne(p, v) => write!(f, "{p} <> {v}"),
            FilterExpr::Lt(p, v) => write!(f, "{p} < {v}"),
            FilterExpr::Le(p, v) => write!(f, "{p} <= {v}"),
            FilterExpr::Gt(p, v) => write!(f, "{p} > {v}"),
            FilterExpr::Ge(p, v) => write!(f, "{p} >= {v}"),
            FilterExpr::In(p, values) => {
                write!(f, "{p} IN (")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            FilterExpr::AttributeExists(p) => write!(f, "attribute_exists({p})"),
            FilterExpr::AttributeNotExists(p) => write!(f, "attribute_not_exists({p})"),
            FilterExpr::And(exprs) => join(f, exprs, " AND "),
            FilterExpr::Or(exprs) => join(f, exprs, " OR "),
            FilterExpr::Not(expr) => write!(f, "NOT ({expr})"),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, exprs: &[FilterExpr], sep: &str) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match e {
            FilterExpr::And(_) | FilterExpr::Or(_) => write!(f, "({e})")?,
            _ => write!(f, "{e}")?,
        }
    }
    Ok(())
}
