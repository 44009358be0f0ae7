#![allow(dead_code)]

use std::sync::Arc;

use dynadoc_core::collection::Collection;
use dynadoc_core::document::Document;
use dynadoc_core::memory::MemoryBackend;
use dynadoc_core::options::{CollectionOptions, Projection};
use serde_json::{Map, Value, json};

/// Books keyed by (title, author) with a revision field, one local index
/// and two global ones.
pub fn books_options(allow_scans: bool) -> CollectionOptions {
    CollectionOptions::builder("books")
        .partition_key("title")
        .sort_key("author")
        .revision_field("revision")
        .allow_scans(allow_scans)
        .local_index("by-year", "year", Projection::All)
        .global_index("by-publisher", "publisher", Some("year"), Projection::KeysOnly)
        .global_index("by-genre", "genre", None, Projection::All)
        .build()
        .unwrap()
}

pub fn collection(options: CollectionOptions) -> (Collection, Arc<MemoryBackend>) {
    collection_with(options, MemoryBackend::new())
}

pub fn collection_with(
    options: CollectionOptions,
    backend: MemoryBackend,
) -> (Collection, Arc<MemoryBackend>) {
    let backend = Arc::new(backend);
    backend.create_table(&options).unwrap();
    let collection = Collection::builder(options)
        .backend(backend.clone())
        .build()
        .unwrap();
    (collection, backend)
}

pub fn doc(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Write every document with PUT in one action list.
pub fn seed(collection: &Collection, docs: Vec<Value>) {
    let mut maps: Vec<Map<String, Value>> = docs.into_iter().map(doc).collect();
    let mut actions = collection.actions();
    for m in maps.iter_mut() {
        actions.put(Document::from_map(m));
    }
    actions.run().unwrap();
}

pub fn library() -> Vec<Value> {
    vec![
        json!({"title": "Dune", "author": "Herbert", "publisher": "Chilton", "year": 1965, "genre": "sf", "price": 9}),
        json!({"title": "Dune", "author": "Anderson", "publisher": "Tor", "year": 1999, "genre": "sf", "price": 12}),
        json!({"title": "Emma", "author": "Austen", "publisher": "Murray", "year": 1815, "genre": "classic", "price": 5}),
        json!({"title": "Hyperion", "author": "Simmons", "publisher": "Doubleday", "year": 1989, "genre": "sf", "price": 11}),
        json!({"title": "Ubik", "author": "Dick", "publisher": "Doubleday", "year": 1969, "genre": "sf", "price": 8}),
        json!({"title": "Middlemarch", "author": "Eliot", "publisher": "Blackwood", "year": 1871, "genre": "classic", "price": 7}),
        json!({"title": "Neuromancer", "author": "Gibson", "publisher": "Ace", "year": 1984, "genre": "cyberpunk", "price": 10}),
    ]
}
