//! Access path selection.
//!
//! Every collection registers one [`Queryable`] per access path: the primary
//! key first, then each secondary index in declaration order. For a query the
//! planner:
//!
//! 1. Keeps the queryables with an equality filter on their partition key
//!    (and, when the query orders its results, whose sort key is the order-by
//!    field).
//! 2. Picks the best survivor with [`compare_candidates`].
//! 3. Falls back to a full scan only when the collection allows scans.
//! 4. Compiles the winner's key condition; all other filters become the
//!    residual filter expression evaluated by the backend.

pub mod compile;

use std::cmp::Ordering;
use std::fmt::Write as _;

use tracing::debug;

use crate::codec::Codec;
use crate::error::{Error, PlanError};
use crate::iter::PaginationToken;
use crate::options::{CollectionOptions, IndexKind, Projection};
use crate::query::{Filter, FilterExpr, OrderBy, Query};
use crate::types::KeySchema;

pub use compile::{KeyCondition, SortCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryableKind {
    Primary,
    LocalIndex,
    GlobalIndex,
}

/// One candidate access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queryable {
    key: KeySchema,
    index_name: Option<String>,
    kind: QueryableKind,
    projection: Projection,
    position: usize,
}

impl Queryable {
    /// The primary key followed by every secondary index, in registration order.
    pub fn for_collection(options: &CollectionOptions) -> Vec<Queryable> {
        let primary = Queryable {
            key: options.key_schema(),
            index_name: None,
            kind: QueryableKind::Primary,
            projection: Projection::All,
            position: 0,
        };
        let indexes = options.indexes().iter().enumerate().map(|(i, def)| Queryable {
            key: def.key_schema(),
            index_name: Some(def.name.clone()),
            kind: match def.kind {
                IndexKind::Local => QueryableKind::LocalIndex,
                IndexKind::Global => QueryableKind::GlobalIndex,
            },
            projection: def.projection.clone(),
            position: i + 1,
        });
        std::iter::once(primary).chain(indexes).collect()
    }

    pub fn key(&self) -> &KeySchema {
        &self.key
    }

    /// `None` for the primary key.
    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn kind(&self) -> QueryableKind {
        self.kind
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_primary(&self) -> bool {
        self.kind == QueryableKind::Primary
    }

    /// Whether rows read through this path carry every requested field. An
    /// empty request asks for whole documents.
    pub fn projects(&self, paths: &[String], table_key: &KeySchema) -> bool {
        let included = match &self.projection {
            Projection::All => return true,
            Projection::KeysOnly => &[][..],
            Projection::Include(fields) => fields.as_slice(),
        };
        !paths.is_empty()
            && paths.iter().all(|path| {
                let top = crate::document::path::top_level(path);
                self.key.contains(top) || table_key.contains(top) || included.iter().any(|f| f == top)
            })
    }
}

/// How the plan reads the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// Keyed read through the chosen queryable.
    Query(KeyCondition),
    /// Full table scan with every filter in the residual expression.
    Scan,
}

/// A compiled query, ready for a transport.
#[derive(Debug, Clone)]
pub struct Plan {
    table: String,
    table_key: KeySchema,
    queryable: Option<Queryable>,
    access: Access,
    residual: Vec<Filter>,
    filter: Option<FilterExpr>,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    offset: usize,
    token: Option<PaginationToken>,
    field_paths: Vec<String>,
    fetch_by_key: bool,
}

impl Plan {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn table_key(&self) -> &KeySchema {
        &self.table_key
    }

    /// The chosen access path; `None` for a scan.
    pub fn queryable(&self) -> Option<&Queryable> {
        self.queryable.as_ref()
    }

    /// Index to read from; `None` for the primary key and for scans.
    pub fn index_name(&self) -> Option<&str> {
        self.queryable.as_ref().and_then(Queryable::index_name)
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn is_scan(&self) -> bool {
        self.access == Access::Scan
    }

    pub fn key_condition(&self) -> Option<&KeyCondition> {
        match &self.access {
            Access::Query(kc) => Some(kc),
            Access::Scan => None,
        }
    }

    /// Filters not covered by the key condition, in insertion order.
    pub fn residual_filters(&self) -> &[Filter] {
        &self.residual
    }

    /// The residual filters as one backend-evaluated expression.
    pub fn filter(&self) -> Option<&FilterExpr> {
        self.filter.as_ref()
    }

    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    /// Ascending unless the query orders descending.
    pub fn scan_forward(&self) -> bool {
        self.order_by.as_ref().is_none_or(|o| o.ascending)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn pagination_token(&self) -> Option<&PaginationToken> {
        self.token.as_ref()
    }

    pub fn field_paths(&self) -> &[String] {
        &self.field_paths
    }

    /// Whether rows must be re-read by primary key because the index does
    /// not project every requested field.
    pub fn fetch_by_key(&self) -> bool {
        self.fetch_by_key
    }

    /// Human-readable description of the plan.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "table: {}", self.table);
        match (&self.access, &self.queryable) {
            (Access::Scan, _) => {
                let _ = writeln!(out, "access: scan");
            }
            (Access::Query(kc), Some(q)) => {
                match q.index_name() {
                    None => {
                        let _ = writeln!(out, "access: query on primary key");
                    }
                    Some(name) => {
                        let kind = match q.kind() {
                            QueryableKind::LocalIndex => "local",
                            _ => "global",
                        };
                        let _ = writeln!(out, "access: query on {kind} index {name:?}");
                    }
                }
                let _ = writeln!(out, "key condition: {kc}");
            }
            (Access::Query(kc), None) => {
                let _ = writeln!(out, "key condition: {kc}");
            }
        }
        if !self.residual.is_empty() {
            let filters: Vec<String> = self.residual.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "filters: {}", filters.join(", "));
        }
        if let Some(order) = &self.order_by {
            let dir = if order.ascending { "ascending" } else { "descending" };
            let _ = writeln!(out, "order by: {} {dir}", order.field);
        }
        if let Some(limit) = self.limit {
            let _ = writeln!(out, "limit: {limit}");
        }
        if self.offset > 0 {
            let _ = writeln!(out, "offset: {}", self.offset);
        }
        if self.fetch_by_key {
            let _ = writeln!(out, "fetch by key: yes");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// QueryPlanner
// ---------------------------------------------------------------------------

/// Ranking inputs for one surviving candidate.
#[derive(Debug, Clone, Copy)]
pub struct CandidateRank {
    pub is_primary: bool,
    /// The sort key also carries a key-condition-capable filter.
    pub sort_filtered: bool,
    /// The path projects every requested field.
    pub projects_all: bool,
    pub position: usize,
}

/// Order two candidates; `Greater` means `a` is the better access path.
///
/// Primary key first, then a matched sort key, then full projection. Any
/// remaining tie goes to the earlier registration position.
pub fn compare_candidates(a: &CandidateRank, b: &CandidateRank) -> Ordering {
    a.is_primary
        .cmp(&b.is_primary)
        .then(a.sort_filtered.cmp(&b.sort_filtered))
        .then(a.projects_all.cmp(&b.projects_all))
        .then(b.position.cmp(&a.position))
}

/// Chooses an access path for a query and compiles it.
pub struct QueryPlanner<'a> {
    options: &'a CollectionOptions,
    queryables: &'a [Queryable],
    codec: &'a dyn Codec,
    scan_ordering: bool,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(
        options: &'a CollectionOptions,
        queryables: &'a [Queryable],
        codec: &'a dyn Codec,
    ) -> Self {
        Self {
            options,
            queryables,
            codec,
            scan_ordering: false,
        }
    }

    /// Accept order-by on scans (the transport orders scan results).
    pub fn with_scan_ordering(mut self, scan_ordering: bool) -> Self {
        self.scan_ordering = scan_ordering;
        self
    }

    pub fn plan(&self, query: &Query) -> Result<Plan, Error> {
        // 1. Validate filters before any selection.
        if query.filters().iter().any(|f| f.field().is_empty()) {
            return Err(PlanError::EmptyFilterField.into());
        }

        // 2. Candidates need an equality filter on their partition key.
        let mut candidates: Vec<&Queryable> = self
            .queryables
            .iter()
            .filter(|q| {
                query
                    .filters()
                    .iter()
                    .any(|f| f.is_equality() && f.field() == q.key.partition)
            })
            .collect();

        // 3. An order-by needs a candidate sorted on that field.
        if let Some(order) = query.order() {
            let had_candidates = !candidates.is_empty();
            candidates.retain(|q| q.key.sort.as_deref() == Some(order.field.as_str()));
            if had_candidates && candidates.is_empty() {
                return Err(PlanError::OrderByNotSortKey {
                    field: order.field.clone(),
                }
                .into());
            }
        }

        // 4. Rank survivors.
        let table_key = self.options.key_schema();
        let rank = |q: &Queryable| CandidateRank {
            is_primary: q.is_primary(),
            sort_filtered: q
                .key
                .sort
                .as_ref()
                .is_some_and(|sk| query.filters().iter().any(|f| f.field() == sk)),
            projects_all: q.projects(query.requested_paths(), &table_key),
            position: q.position,
        };
        let chosen = candidates
            .into_iter()
            .max_by(|a, b| compare_candidates(&rank(*a), &rank(*b)))
            .cloned();

        // 5. No index: scan if allowed.
        if chosen.is_none() {
            if !self.options.allow_scans() {
                return Err(PlanError::NoUsableIndex {
                    table: self.options.table_name().to_string(),
                }
                .into());
            }
            if let Some(order) = query.order()
                && !self.scan_ordering
            {
                return Err(PlanError::OrderByOnScan {
                    field: order.field.clone(),
                }
                .into());
            }
        }

        // 6. Compile key condition and residual filter.
        let compiled = compile::compile(chosen.as_ref().map(|q| &q.key), query.filters(), self.codec)?;
        let access = match compiled.key_condition {
            Some(kc) => Access::Query(kc),
            None => Access::Scan,
        };
        let fetch_by_key = chosen
            .as_ref()
            .is_some_and(|q| !q.projects(query.requested_paths(), &table_key));

        debug!(
            table = self.options.table_name(),
            index = chosen.as_ref().and_then(|q| q.index_name()).unwrap_or("<primary>"),
            scan = chosen.is_none(),
            residual = compiled.residual.len(),
            fetch_by_key,
            "planned query"
        );

        Ok(Plan {
            table: self.options.table_name().to_string(),
            table_key,
            queryable: chosen,
            access,
            residual: compiled.residual,
            filter: compiled.filter,
            order_by: query.order().cloned(),
            limit: query.max_results(),
            offset: query.skip(),
            token: query.token().cloned(),
            field_paths: query.requested_paths().to_vec(),
            fetch_by_key,
        })
    }
}
