//! Compile filters into a native key condition plus a residual expression.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Codec;
use crate::error::{Error, PlanError};
use crate::query::{Filter, FilterExpr, FilterOp};
use crate::types::{AttributeValue, Item, KeySchema, compare_attrs};

/// Sort key condition for a keyed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SortCondition {
    Eq(AttributeValue),
    Lt(AttributeValue),
    Le(AttributeValue),
    Gt(AttributeValue),
    Ge(AttributeValue),
}

impl SortCondition {
    fn new(op: FilterOp, value: AttributeValue) -> Option<Self> {
        Some(match op {
            FilterOp::Equal => SortCondition::Eq(value),
            FilterOp::LessThan => SortCondition::Lt(value),
            FilterOp::LessThanOrEqual => SortCondition::Le(value),
            FilterOp::GreaterThan => SortCondition::Gt(value),
            FilterOp::GreaterThanOrEqual => SortCondition::Ge(value),
            FilterOp::In | FilterOp::NotIn => return None,
        })
    }

    pub fn matches(&self, value: &AttributeValue) -> bool {
        let (_, bound) = self.symbol();
        let Some(ord) = compare_attrs(value, bound) else {
            return false;
        };
        match self {
            SortCondition::Eq(_) => ord == Ordering::Equal,
            SortCondition::Lt(_) => ord == Ordering::Less,
            SortCondition::Le(_) => ord != Ordering::Greater,
            SortCondition::Gt(_) => ord == Ordering::Greater,
            SortCondition::Ge(_) => ord != Ordering::Less,
        }
    }

    fn symbol(&self) -> (&'static str, &AttributeValue) {
        match self {
            SortCondition::Eq(v) => ("=", v),
            SortCondition::Lt(v) => ("<", v),
            SortCondition::Le(v) => ("<=", v),
            SortCondition::Gt(v) => (">", v),
            SortCondition::Ge(v) => (">=", v),
        }
    }
}

/// Partition equality plus an optional sort key condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCondition {
    pub partition_attr: String,
    pub partition_value: AttributeValue,
    pub sort: Option<(String, SortCondition)>,
}

impl KeyCondition {
    pub fn matches(&self, item: &Item) -> bool {
        let partition_ok = item
            .get(&self.partition_attr)
            .and_then(|v| compare_attrs(v, &self.partition_value))
            == Some(Ordering::Equal);
        if !partition_ok {
            return false;
        }
        match &self.sort {
            Some((attr, cond)) => item.get(attr).is_some_and(|v| cond.matches(v)),
            None => true,
        }
    }
}

impl fmt::Display for KeyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.partition_attr, self.partition_value)?;
        if let Some((attr, cond)) = &self.sort {
            let (op, value) = cond.symbol();
            write!(f, " AND {attr} {op} {value}")?;
        }
        Ok(())
    }
}

/// A compiled access: the key condition (if any) and the filters left over.
pub(crate) struct Compiled {
    pub key_condition: Option<KeyCondition>,
    pub residual: Vec<Filter>,
    pub filter: Option<FilterExpr>,
}

/// Split `filters` against `key`: the first equality on the partition key
/// and the first key-capable comparison on the sort key form the key
/// condition; everything else stays residual in insertion order. With no
/// key, every filter is residual.
pub(crate) fn compile(
    key: Option<&KeySchema>,
    filters: &[Filter],
    codec: &dyn Codec,
) -> Result<Compiled, Error> {
    let mut partition = None;
    let mut sort = None;

    if let Some(key) = key {
        partition = filters
            .iter()
            .position(|f| f.field() == key.partition && f.is_equality());
        if let Some(sk) = &key.sort {
            sort = filters
                .iter()
                .position(|f| f.field() == sk && f.op().is_key_condition());
        }
    }

    let key_condition = match (key, partition) {
        (Some(key), Some(p)) => {
            let sort = match (&key.sort, sort) {
                (Some(sk), Some(s)) => {
                    let value = codec.encode_value(filters[s].value())?;
                    SortCondition::new(filters[s].op(), value).map(|c| (sk.clone(), c))
                }
                _ => None,
            };
            Some(KeyCondition {
                partition_attr: key.partition.clone(),
                partition_value: codec.encode_value(filters[p].value())?,
                sort,
            })
        }
        _ => None,
    };

    let (partition_used, sort_used) = match &key_condition {
        Some(kc) => (partition, if kc.sort.is_some() { sort } else { None }),
        None => (None, None),
    };
    let residual: Vec<Filter> = filters
        .iter()
        .enumerate()
        .filter(|&(i, _)| Some(i) != partition_used && Some(i) != sort_used)
        .map(|(_, f)| f.clone())
        .collect();

    let exprs = residual
        .iter()
        .map(|f| filter_expr(f, codec))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Compiled {
        key_condition,
        residual,
        filter: FilterExpr::all(exprs),
    })
}

/// Translate one filter into an expression.
pub(crate) fn filter_expr(filter: &Filter, codec: &dyn Codec) -> Result<FilterExpr, Error> {
    let path = filter.field().to_string();
    let value = filter.value();
    Ok(match filter.op() {
        FilterOp::Equal => FilterExpr::Eq(path, codec.encode_value(value)?),
        FilterOp::LessThan => FilterExpr::Lt(path, codec.encode_value(value)?),
        FilterOp::LessThanOrEqual => FilterExpr::Le(path, codec.encode_value(value)?),
        FilterOp::GreaterThan => FilterExpr::Gt(path, codec.encode_value(value)?),
        FilterOp::GreaterThanOrEqual => FilterExpr::Ge(path, codec.encode_value(value)?),
        FilterOp::In => FilterExpr::In(path, list_values(filter, codec)?),
        FilterOp::NotIn => FilterExpr::Not(Box::new(FilterExpr::In(
            path,
            list_values(filter, codec)?,
        ))),
    })
}

fn list_values(filter: &Filter, codec: &dyn Codec) -> Result<Vec<AttributeValue>, Error> {
    let Value::Array(values) = filter.value() else {
        return Err(PlanError::ExpectedList {
            field: filter.field().to_string(),
            op: filter.op().symbol(),
        }
        .into());
    };
    values
        .iter()
        .map(|v| codec.encode_value(v).map_err(Error::from))
        .collect()
}
