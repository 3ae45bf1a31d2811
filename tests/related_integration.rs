//! Integration tests for the related-items parser against a real store.

use deedpull_core::index::NewIndexDocument;
use deedpull_core::related::{RelatedItemsParser, RelatedRef};

mod support;
use support::{pending_row, setup_queue};

fn parse_column(raw: &str) -> Vec<RelatedRef> {
    serde_json::from_str(raw).expect("related_items column holds valid JSON")
}

#[tokio::test]
async fn test_parser_writes_structured_references() {
    let (queue, _temp) = setup_queue().await;

    // Referenced target exists at (500, 12).
    let target = queue.insert(&pending_row(500, 12)).await.unwrap();
    let source = queue
        .insert(&NewIndexDocument {
            related_items_raw: Some("12345 bk:500/12\n67890 bk:501 /  13\n12345 bk:500/12".into()),
            ..pending_row(9, 264)
        })
        .await
        .unwrap();

    let parser = RelatedItemsParser::new(queue.clone(), 100);
    let report = parser.run(false).await.unwrap();

    assert_eq!(report.rows_with_refs, 1);
    assert_eq!(report.refs_parsed, 2);
    assert_eq!(report.refs_matched, 1);
    assert_eq!(report.rows_updated, 1);

    let doc = queue.get(source).await.unwrap().unwrap();
    let refs = parse_column(doc.related_items.as_deref().unwrap());

    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].instrument_number, 12345);
    assert_eq!(refs[0].book, 500);
    assert_eq!(refs[0].page, 12);
    assert!(refs[0].exists_in_db);
    assert_eq!(refs[0].target_id, Some(target));

    assert_eq!(refs[1].instrument_number, 67890);
    assert_eq!(refs[1].book, 501);
    assert_eq!(refs[1].page, 13);
    assert!(!refs[1].exists_in_db);
    assert!(refs[1].target_id.is_none());
}

#[tokio::test]
async fn test_exists_in_db_iff_target_id() {
    let (queue, _temp) = setup_queue().await;

    queue.insert(&pending_row(700, 1)).await.unwrap();
    queue
        .insert(&NewIndexDocument {
            related_items_raw: Some("1 bk:700/1\n2 bk:700/2".into()),
            ..pending_row(9, 1)
        })
        .await
        .unwrap();

    let parser = RelatedItemsParser::new(queue.clone(), 100);
    parser.run(false).await.unwrap();

    let rows = queue.fetch_related_raw_batch(0, 100).await.unwrap();
    for (id, _) in rows {
        let doc = queue.get(id).await.unwrap().unwrap();
        for reference in parse_column(doc.related_items.as_deref().unwrap()) {
            assert_eq!(reference.exists_in_db, reference.target_id.is_some());
        }
    }
}

#[tokio::test]
async fn test_first_seen_row_wins_on_shared_book_page() {
    let (queue, _temp) = setup_queue().await;

    // Two rows share (800, 3); the lower id is the cross-reference target.
    let first = queue.insert(&pending_row(800, 3)).await.unwrap();
    let _second = queue
        .insert(&NewIndexDocument {
            source: Some(deedpull_core::index::RecordSource::Historical),
            ..pending_row(800, 3)
        })
        .await
        .unwrap();

    let source = queue
        .insert(&NewIndexDocument {
            related_items_raw: Some("99 bk:800/3".into()),
            ..pending_row(9, 2)
        })
        .await
        .unwrap();

    let parser = RelatedItemsParser::new(queue.clone(), 100);
    parser.run(false).await.unwrap();

    let doc = queue.get(source).await.unwrap().unwrap();
    let refs = parse_column(doc.related_items.as_deref().unwrap());
    assert_eq!(refs[0].target_id, Some(first));
}

#[tokio::test]
async fn test_parser_is_idempotent() {
    let (queue, _temp) = setup_queue().await;

    queue.insert(&pending_row(500, 12)).await.unwrap();
    let source = queue
        .insert(&NewIndexDocument {
            related_items_raw: Some("12345 bk:500/12\n67890 bk:501/13".into()),
            ..pending_row(9, 264)
        })
        .await
        .unwrap();

    let parser = RelatedItemsParser::new(queue.clone(), 100);

    parser.run(false).await.unwrap();
    let first = queue.get(source).await.unwrap().unwrap().related_items;

    parser.run(false).await.unwrap();
    let second = queue.get(source).await.unwrap().unwrap().related_items;

    assert_eq!(first, second, "rerun must produce identical JSON");
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let (queue, _temp) = setup_queue().await;

    let source = queue
        .insert(&NewIndexDocument {
            related_items_raw: Some("12345 bk:500/12".into()),
            ..pending_row(9, 264)
        })
        .await
        .unwrap();

    let parser = RelatedItemsParser::new(queue.clone(), 100);
    let report = parser.run(true).await.unwrap();

    assert_eq!(report.refs_parsed, 1);
    assert_eq!(report.rows_updated, 0);
    assert!(queue
        .get(source)
        .await
        .unwrap()
        .unwrap()
        .related_items
        .is_none());
}

#[tokio::test]
async fn test_parser_pages_through_batches() {
    let (queue, _temp) = setup_queue().await;

    for page in 1..=25 {
        queue
            .insert(&NewIndexDocument {
                related_items_raw: Some(format!("{page} bk:900/{page}")),
                ..pending_row(9, page)
            })
            .await
            .unwrap();
    }

    // Batch size far below the row count forces multiple fetches.
    let parser = RelatedItemsParser::new(queue.clone(), 4);
    let report = parser.run(false).await.unwrap();

    assert_eq!(report.rows_processed, 25);
    assert_eq!(report.rows_updated, 25);
}

#[tokio::test]
async fn test_stats_counts_coverage() {
    let (queue, _temp) = setup_queue().await;

    queue.insert(&pending_row(9, 1)).await.unwrap();
    queue
        .insert(&NewIndexDocument {
            related_items_raw: Some("1 bk:2/3".into()),
            ..pending_row(9, 2)
        })
        .await
        .unwrap();

    let parser = RelatedItemsParser::new(queue.clone(), 100);

    let before = parser.stats().await.unwrap();
    assert_eq!(before.total_rows, 2);
    assert_eq!(before.rows_with_raw, 1);
    assert_eq!(before.rows_parsed, 0);

    parser.run(false).await.unwrap();

    let after = parser.stats().await.unwrap();
    assert_eq!(after.rows_parsed, 1);
}
