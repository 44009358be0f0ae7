//! Lazy paging over a planned query.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::collection::Collection;
use crate::document::Document;
use crate::error::Error;
use crate::planner::Plan;
use crate::types::{Item, Key};

/// Opaque resume position produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaginationToken(Vec<u8>);

impl PaginationToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Stops a [`DocumentIterator`] from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Single-pass iterator over the documents of one planned query.
///
/// Holds at most one page. The next page is fetched when the buffer empties
/// and the backend reported more results. Pages are requested no larger than
/// the rows still wanted, so after the limit is reached
/// [`pagination_token`](Self::pagination_token) resumes exactly after the
/// last returned document.
pub struct DocumentIterator<'c> {
    collection: &'c Collection,
    plan: Plan,
    buffer: VecDeque<Item>,
    next_token: Option<PaginationToken>,
    fetched: bool,
    to_skip: usize,
    remaining: Option<usize>,
    stopped: Arc<AtomicBool>,
}

impl<'c> DocumentIterator<'c> {
    pub(crate) fn new(collection: &'c Collection, plan: Plan) -> Self {
        Self {
            collection,
            next_token: plan.pagination_token().cloned(),
            to_skip: plan.offset(),
            remaining: plan.limit(),
            plan,
            buffer: VecDeque::new(),
            fetched: false,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Whether another document is available, fetching a page if needed.
    pub fn has_next(&mut self) -> Result<bool, Error> {
        loop {
            if self.is_stopped() || self.remaining == Some(0) {
                return Ok(false);
            }
            while self.to_skip > 0 && self.buffer.pop_front().is_some() {
                self.to_skip -= 1;
            }
            if !self.buffer.is_empty() {
                return Ok(true);
            }
            if self.fetched && self.next_token.is_none() {
                return Ok(false);
            }
            self.fetch_page()?;
        }
    }

    /// Decode the next document into `target`.
    ///
    /// Fails with [`Error::Exhausted`] when no documents remain.
    pub fn next(&mut self, target: &mut Document<'_>) -> Result<(), Error> {
        if !self.has_next()? {
            return Err(Error::Exhausted);
        }
        let Some(item) = self.buffer.pop_front() else {
            return Err(Error::Exhausted);
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        let codec = self.collection.codec();
        let paths = self.plan.field_paths();
        if paths.is_empty() {
            Document::decode(codec, &item, target)
        } else {
            let table_key = self.plan.table_key();
            let mut wanted: Vec<String> = table_key.attributes().map(str::to_string).collect();
            wanted.extend(paths.iter().cloned());
            Document::decode_paths(codec, &item, &wanted, target)
        }
    }

    /// Mark the iterator exhausted. A fetch already in flight finishes but
    /// its rows are discarded.
    pub fn stop(&mut self) {
        self.stop_handle().stop();
        self.buffer.clear();
        debug!(table = self.plan.table(), "iterator stopped");
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stopped))
    }

    /// The backend's resume position after the last fetched page; `None`
    /// when that page was the last one.
    ///
    /// Rows still buffered from that page are not covered by the token.
    /// Set a limit to make the token land right after the last row read.
    pub fn pagination_token(&self) -> Option<&PaginationToken> {
        self.next_token.as_ref()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn fetch_page(&mut self) -> Result<(), Error> {
        let page_limit = self.remaining.map(|r| r + self.to_skip);
        let transport = self.collection.transport();
        let page = transport
            .execute_query(&self.plan, page_limit, self.next_token.as_ref())
            .map_err(|e| self.collection.backend_error(e))?;
        self.fetched = true;

        if self.is_stopped() {
            trace!(table = self.plan.table(), "discarding page fetched after stop");
            return Ok(());
        }

        let mut items = page.items;
        if self.plan.fetch_by_key() && !items.is_empty() {
            items = self.fetch_full_items(&items)?;
        }
        debug!(
            table = self.plan.table(),
            index = self.plan.index_name().unwrap_or("<primary>"),
            rows = items.len(),
            more = page.next_token.is_some(),
            "fetched page"
        );
        self.buffer.extend(items);
        self.next_token = page.next_token;
        Ok(())
    }

    /// Re-read index rows by primary key. Rows deleted since the index read
    /// are dropped.
    fn fetch_full_items(&self, rows: &[Item]) -> Result<Vec<Item>, Error> {
        let table_key = self.plan.table_key();
        let keys: Vec<Key> = rows
            .iter()
            .filter_map(|row| Key::from_item(row, table_key))
            .collect();
        let mut full = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(crate::action::MAX_BATCH_GET_KEYS) {
            let found = self
                .collection
                .transport()
                .batch_get(self.plan.table(), chunk)
                .map_err(|e| self.collection.backend_error(e))?;
            full.extend(found.into_iter().flatten());
        }
        Ok(full)
    }
}

impl Iterator for DocumentIterator<'_> {
    type Item = Result<Map<String, Value>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(false) => None,
            Ok(true) => {
                let mut doc = Map::new();
                let result = DocumentIterator::next(self, &mut Document::from_map(&mut doc));
                Some(result.map(|()| doc))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
