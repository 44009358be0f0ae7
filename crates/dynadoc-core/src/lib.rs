//! # dynadoc
//!
//! Backend-agnostic document actions and query planning over partitioned
//! key-value stores (one partition key, an optional sort key, and any number
//! of local or global secondary indexes).
//!
//! A [`Collection`](collection::Collection) ties together the static
//! [`CollectionOptions`](options::CollectionOptions), a
//! [`Codec`](codec::Codec), and a [`Transport`](transport::Transport). Queries
//! are planned against the registered access paths and paged lazily; action
//! lists batch point operations and run an optional atomic group as one
//! transactional call.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dynadoc_core::collection::Collection;
//! use dynadoc_core::document::Document;
//! use dynadoc_core::memory::MemoryBackend;
//! use dynadoc_core::options::CollectionOptions;
//! use dynadoc_core::query::FilterOp;
//! use serde_json::json;
//!
//! let options = CollectionOptions::builder("books")
//!     .partition_key("title")
//!     .sort_key("author")
//!     .revision_field("revision")
//!     .build()
//!     .unwrap();
//!
//! let backend = Arc::new(MemoryBackend::new());
//! backend.create_table(&options).unwrap();
//! let books = Collection::builder(options).backend(backend).build().unwrap();
//!
//! let mut book = json!({"title": "Book1", "author": "A1", "pages": 120})
//!     .as_object()
//!     .cloned()
//!     .unwrap();
//! let mut actions = books.actions();
//! actions.create(Document::from_map(&mut book));
//! actions.run().unwrap();
//!
//! let mut iter = books
//!     .query()
//!     .filter("title", FilterOp::Equal, "Book1")
//!     .get()
//!     .unwrap();
//! while iter.has_next().unwrap() {
//!     let mut found = serde_json::Map::new();
//!     iter.next(&mut Document::from_map(&mut found)).unwrap();
//! }
//! ```

pub mod action;
pub mod codec;
pub mod collection;
pub mod document;
pub mod error;
pub mod iter;
pub mod memory;
pub mod options;
pub mod planner;
pub mod projection;
pub mod query;
pub mod transport;
pub mod types;
