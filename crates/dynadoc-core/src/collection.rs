//! Collections: the entry point tying options, codec and transport together.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::action::{ActionList, IdGenerator, UuidGenerator};
use crate::codec::{AttributeCodec, Codec};
use crate::error::{BackendError, Error, OptionsError};
use crate::iter::{DocumentIterator, PaginationToken};
use crate::options::CollectionOptions;
use crate::planner::{Plan, QueryPlanner, Queryable};
use crate::query::{FilterOp, Query};
use crate::transport::{BackendFault, ErrorTranslator, Transport, TransportError};

/// One table plus everything needed to plan and execute against it.
///
/// Cheap to clone; clones share options, access paths and the backend.
#[derive(Clone)]
pub struct Collection {
    options: Arc<CollectionOptions>,
    queryables: Arc<[Queryable]>,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    translator: Arc<dyn ErrorTranslator>,
    ids: Arc<dyn IdGenerator>,
}

impl Collection {
    pub fn builder(options: CollectionOptions) -> CollectionBuilder {
        CollectionBuilder {
            options,
            codec: None,
            transport: None,
            translator: None,
            ids: None,
        }
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Access paths in registration order: the primary key first.
    pub fn queryables(&self) -> &[Queryable] {
        &self.queryables
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn translator(&self) -> &dyn ErrorTranslator {
        self.translator.as_ref()
    }

    pub fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    /// Start a query.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder {
            collection: self,
            query: Query::new(),
        }
    }

    /// Start an action list.
    pub fn actions<'d>(&self) -> ActionList<'_, 'd> {
        ActionList::new(self)
    }

    /// Classify a transport error outside any write context.
    pub(crate) fn backend_error(&self, err: TransportError) -> Error {
        let kind = self.translator.classify(err.as_ref()).error_kind();
        BackendError::new(kind, err).into()
    }
}

/// Builder for [`Collection`]. A transport is required; the codec defaults
/// to [`AttributeCodec`] and ids to [`UuidGenerator`].
pub struct CollectionBuilder {
    options: CollectionOptions,
    codec: Option<Arc<dyn Codec>>,
    transport: Option<Arc<dyn Transport>>,
    translator: Option<Arc<dyn ErrorTranslator>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl CollectionBuilder {
    /// Use one value as both transport and error translator.
    pub fn backend<B>(mut self, backend: Arc<B>) -> Self
    where
        B: Transport + ErrorTranslator + 'static,
    {
        self.transport = Some(backend.clone() as Arc<dyn Transport>);
        self.translator = Some(backend as Arc<dyn ErrorTranslator>);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn ErrorTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Collection, Error> {
        let table = self.options.table_name().to_string();
        let transport = self
            .transport
            .ok_or_else(|| OptionsError::MissingTransport(table.clone()))?;
        let translator = self
            .translator
            .unwrap_or_else(|| Arc::new(UnclassifiedErrors));
        let queryables: Arc<[Queryable]> = Queryable::for_collection(&self.options).into();
        debug!(
            table = %table,
            queryables = queryables.len(),
            "built collection"
        );
        Ok(Collection {
            options: Arc::new(self.options),
            queryables,
            codec: self.codec.unwrap_or_else(|| Arc::new(AttributeCodec)),
            transport,
            translator,
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidGenerator)),
        })
    }
}

/// Translator used when none is supplied: every error is unknown.
struct UnclassifiedErrors;

impl ErrorTranslator for UnclassifiedErrors {
    fn classify(&self, _err: &(dyn std::error::Error + Send + Sync + 'static)) -> BackendFault {
        BackendFault::Unknown
    }
}

/// Fluent query construction against one collection.
#[derive(Clone)]
pub struct QueryBuilder<'c> {
    collection: &'c Collection,
    query: Query,
}

impl<'c> QueryBuilder<'c> {
    /// Add a filter; filters are ANDed together.
    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.query = self.query.filter(field, op, value);
        self
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.query = self.query.order_by(field, ascending);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    pub fn pagination_token(mut self, token: PaginationToken) -> Self {
        self.query = self.query.pagination_token(token);
        self
    }

    /// Restrict decoded documents to these paths (key fields always come back).
    pub fn field_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query = self.query.field_paths(paths);
        self
    }

    pub fn as_query(&self) -> &Query {
        &self.query
    }

    /// Choose an access path without touching the backend.
    pub fn plan(&self) -> Result<Plan, Error> {
        let collection = self.collection;
        let scan_ordering = collection.transport().capabilities().scan_ordering;
        QueryPlanner::new(
            collection.options(),
            collection.queryables(),
            collection.codec(),
        )
        .with_scan_ordering(scan_ordering)
        .plan(&self.query)
    }

    /// Human-readable description of the plan.
    pub fn explain(&self) -> Result<String, Error> {
        Ok(self.plan()?.explain())
    }

    /// Plan the query and return a lazy iterator over its results.
    pub fn get(self) -> Result<DocumentIterator<'c>, Error> {
        let plan = self.plan()?;
        Ok(DocumentIterator::new(self.collection, plan))
    }
}
