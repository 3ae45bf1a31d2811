//! Shared helpers for integration tests.

#![allow(dead_code)]

use deedpull_core::index::{NewIndexDocument, RecordSource};
use deedpull_core::{Database, Queue};
use lopdf::{dictionary, Document, Object};
use tempfile::TempDir;

/// Creates a file-backed test store with migrations applied.
///
/// File-backed (not in-memory) so concurrent workers share one database.
pub async fn setup_queue() -> (Queue, TempDir) {
    let temp_dir = TempDir::new().expect("create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path, 8).await.expect("create database");
    (Queue::new(db), temp_dir)
}

/// Builds a minimal valid one-page PDF.
pub fn one_page_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("serialize test PDF");
    buffer
}

/// A pending row fixture with the given locator.
pub fn pending_row(book: i64, page: i64) -> NewIndexDocument {
    NewIndexDocument {
        source: Some(RecordSource::DuProcess),
        book: Some(book),
        page: Some(page),
        ..NewIndexDocument::default()
    }
}
