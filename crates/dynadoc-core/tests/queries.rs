mod common;

use std::thread;
use std::time::Duration;

use common::{books_options, collection, collection_with, doc, library, seed};
use dynadoc_core::document::Document;
use dynadoc_core::error::{Error, ErrorKind};
use dynadoc_core::iter::PaginationToken;
use dynadoc_core::memory::MemoryBackend;
use dynadoc_core::query::FilterOp;
use serde_json::{Map, Value, json};

fn titles(docs: &[Map<String, Value>]) -> Vec<String> {
    docs.iter()
        .map(|d| format!("{}/{}", d["title"].as_str().unwrap(), d["author"].as_str().unwrap()))
        .collect()
}

#[test]
fn test_primary_key_plan_for_key_filters() {
    let (books, _) = collection(books_options(false));
    let plan = books
        .query()
        .filter("title", FilterOp::Equal, "Book1")
        .filter("author", FilterOp::LessThan, "A2")
        .plan()
        .unwrap();
    assert_eq!(plan.index_name(), None);
    assert!(!plan.is_scan());
    assert_eq!(
        plan.key_condition().unwrap().to_string(),
        "title = \"Book1\" AND author < \"A2\""
    );
    assert!(plan.residual_filters().is_empty());
}

#[test]
fn test_global_index_plan_for_its_partition_key() {
    let (books, _) = collection(books_options(false));
    let plan = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .plan()
        .unwrap();
    assert_eq!(plan.index_name(), Some("by-genre"));
    assert!(!plan.fetch_by_key());
}

#[test]
fn test_no_usable_index_without_scans() {
    let (books, backend) = collection(books_options(false));
    let err = books
        .query()
        .filter("price", FilterOp::GreaterThan, 5)
        .get()
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(backend.stats().queries, 0);
}

#[test]
fn test_scan_keeps_every_filter_residual() {
    let (books, _) = collection(books_options(true));
    seed(&books, library());
    let query = books
        .query()
        .filter("price", FilterOp::GreaterThan, 9)
        .filter("genre", FilterOp::In, json!(["sf", "cyberpunk"]));
    let plan = query.plan().unwrap();
    assert!(plan.is_scan());
    assert_eq!(plan.residual_filters().len(), 2);

    let found: Vec<Map<String, Value>> = query.get().unwrap().map(Result::unwrap).collect();
    assert_eq!(
        titles(&found),
        vec!["Dune/Anderson", "Hyperion/Simmons", "Neuromancer/Gibson"]
    );
}

#[test]
fn test_query_partition_in_key_order() {
    let (books, _) = collection(books_options(false));
    seed(&books, library());
    let found: Vec<Map<String, Value>> = books
        .query()
        .filter("title", FilterOp::Equal, "Dune")
        .get()
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(titles(&found), vec!["Dune/Anderson", "Dune/Herbert"]);
    assert!(!found[0]["revision"].as_str().unwrap().is_empty());
}

#[test]
fn test_order_by_local_index_descending() {
    let (books, _) = collection(books_options(false));
    seed(&books, library());
    let query = books
        .query()
        .filter("title", FilterOp::Equal, "Dune")
        .order_by("year", false);
    assert_eq!(query.plan().unwrap().index_name(), Some("by-year"));
    let found: Vec<Map<String, Value>> = query.get().unwrap().map(Result::unwrap).collect();
    assert_eq!(titles(&found), vec!["Dune/Anderson", "Dune/Herbert"]);
}

#[test]
fn test_order_by_without_sort_key_fails() {
    let (books, _) = collection(books_options(true));
    let err = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .order_by("price", true)
        .plan()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = books.query().order_by("price", true).plan().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_keys_only_index_fetches_full_items() {
    let (books, backend) = collection(books_options(false));
    seed(&books, library());
    let query = books
        .query()
        .filter("publisher", FilterOp::Equal, "Doubleday");
    let plan = query.plan().unwrap();
    assert_eq!(plan.index_name(), Some("by-publisher"));
    assert!(plan.fetch_by_key());

    let found: Vec<Map<String, Value>> = query.get().unwrap().map(Result::unwrap).collect();
    // Index order: year ascending.
    assert_eq!(titles(&found), vec!["Ubik/Dick", "Hyperion/Simmons"]);
    assert_eq!(found[0]["price"], json!(8));
    assert_eq!(backend.stats().batch_gets, 1);
}

#[test]
fn test_field_paths_restrict_decoded_fields() {
    let (books, _) = collection(books_options(false));
    seed(&books, library());
    let found: Vec<Map<String, Value>> = books
        .query()
        .filter("genre", FilterOp::Equal, "classic")
        .field_paths(["year"])
        .get()
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(found.len(), 2);
    for d in &found {
        let mut names: Vec<&str> = d.keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["author", "title", "year"]);
    }
}

#[test]
fn test_limit_offset_and_resume_token() {
    let (books, _) = collection(books_options(false));
    seed(&books, library());

    let mut iter = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .offset(1)
        .limit(2)
        .get()
        .unwrap();
    let mut first = Vec::new();
    while iter.has_next().unwrap() {
        let mut d = Map::new();
        iter.next(&mut Document::from_map(&mut d)).unwrap();
        first.push(d);
    }
    assert_eq!(first.len(), 2);
    let token = iter.pagination_token().cloned().unwrap();

    let rest: Vec<Map<String, Value>> = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .pagination_token(token)
        .get()
        .unwrap()
        .map(Result::unwrap)
        .collect();

    let all: Vec<Map<String, Value>> = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .get()
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(all.len(), 4);
    assert_eq!(titles(&first), titles(&all[1..3]));
    assert_eq!(titles(&rest), titles(&all[3..]));
}

#[test]
fn test_token_follows_fetched_pages() {
    let (books, _) = collection(books_options(false));
    seed(&books, library());
    let mut d = Map::new();

    // Unlimited: the first page holds every match, so there is nothing to resume.
    let mut iter = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .get()
        .unwrap();
    iter.next(&mut Document::from_map(&mut d)).unwrap();
    assert!(iter.has_next().unwrap());
    assert!(iter.pagination_token().is_none());

    // Limited: the page stops at the limit and the token resumes after it.
    let mut iter = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .limit(1)
        .get()
        .unwrap();
    iter.next(&mut Document::from_map(&mut d)).unwrap();
    assert!(!iter.has_next().unwrap());
    assert!(iter.pagination_token().is_some());
}

#[test]
fn test_pages_concatenate_to_full_result() {
    let (books, backend) = collection(books_options(true));
    seed(&books, library());

    let full: Vec<Map<String, Value>> = books
        .query()
        .filter("year", FilterOp::GreaterThan, 1900)
        .get()
        .unwrap()
        .map(Result::unwrap)
        .collect();

    let mut paged = Vec::new();
    let mut token: Option<PaginationToken> = None;
    loop {
        let mut query = books
            .query()
            .filter("year", FilterOp::GreaterThan, 1900)
            .limit(2);
        if let Some(t) = token.take() {
            query = query.pagination_token(t);
        }
        let mut iter = query.get().unwrap();
        for d in iter.by_ref() {
            paged.push(d.unwrap());
        }
        match iter.pagination_token() {
            Some(t) => token = Some(t.clone()),
            None => break,
        }
    }
    assert_eq!(titles(&paged), titles(&full));
    assert!(backend.stats().queries > 2);
}

#[test]
fn test_exhausted_and_stop() {
    let (books, _) = collection(books_options(false));
    seed(&books, library());

    let mut iter = books
        .query()
        .filter("title", FilterOp::Equal, "Emma")
        .get()
        .unwrap();
    let mut d = Map::new();
    iter.next(&mut Document::from_map(&mut d)).unwrap();
    assert_eq!(d["author"], json!("Austen"));
    let err = iter.next(&mut Document::from_map(&mut d)).unwrap_err();
    assert!(matches!(err, Error::Exhausted));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut iter = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .get()
        .unwrap();
    assert!(iter.has_next().unwrap());
    iter.stop_handle().stop();
    assert!(!iter.has_next().unwrap());
    assert!(iter.next(&mut Document::from_map(&mut doc(json!({})))).is_err());
}

#[test]
fn test_stop_during_fetch_discards_page() {
    let (books, backend) = collection_with(
        books_options(false),
        MemoryBackend::new().with_latency(Duration::from_millis(200)),
    );
    seed(&books, library());
    let queries_before = backend.stats().queries;

    let mut iter = books
        .query()
        .filter("genre", FilterOp::Equal, "sf")
        .get()
        .unwrap();
    let handle = iter.stop_handle();
    let has_next = thread::scope(|s| {
        s.spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.stop();
        });
        iter.has_next().unwrap()
    });

    assert!(!has_next);
    assert_eq!(backend.stats().queries, queries_before + 1);
    assert!(iter.next(&mut Document::from_map(&mut Map::new())).is_err());
}

#[test]
fn test_explain_lists_access_and_filters() {
    let (books, _) = collection(books_options(false));
    let text = books
        .query()
        .filter("title", FilterOp::Equal, "Dune")
        .filter("year", FilterOp::GreaterThanOrEqual, 1990)
        .filter("price", FilterOp::LessThan, 20)
        .limit(5)
        .explain()
        .unwrap();
    assert!(text.contains("table: books"));
    assert!(text.contains("access: query on primary key"));
    assert!(text.contains("key condition: title = \"Dune\""));
    assert!(text.contains("filters: year >= 1990, price < 20"));
    assert!(text.contains("limit: 5"));
}
