mod common;

use std::time::{Duration, Instant};

use bson::{doc, oid::ObjectId};
use serde::Deserialize;

use docstore_core::{
    context::OpContext,
    descriptor::{Aggregator, Counter, Deleter, EstimateCounter, Finder, OneFinder, Updater},
    error::DocumentStoreError,
    options::{FindOptions, UpdateOptions},
    pipeline::{Accumulator, Stage},
    query::{Field, Sort, SortDirection},
};
use docstore_memory::InMemoryServer;

use common::{DATABASE, EventCounter, Order, store};

async fn seeded(server: &InMemoryServer, count: usize) -> Vec<Order> {
    let store = store(server);
    let mut orders: Vec<Order> = (0..count)
        .map(|i| Order::new(&format!("sku-{i}"), i as i64, if i % 2 == 0 { "paid" } else { "open" }))
        .collect();
    store.insert_many(&OpContext::background(), &mut orders).await.unwrap();
    orders
}

#[tokio::test]
async fn insert_then_find_by_id() {
    let server = InMemoryServer::new();
    let store = store(&server);
    let ctx = store.context();

    let mut order = Order::new("sku-1", 3, "open");
    store.insert_one(&ctx, &mut order).await.unwrap();
    let id = order.id.expect("insert assigns an id");

    let mut found = Order::default();
    let hit = store
        .find_one(&ctx, OneFinder::new(&mut found).filter(Field::new("_id").eq(id)))
        .await
        .unwrap();

    assert!(hit);
    assert_eq!(found, order);
}

#[tokio::test]
async fn caller_supplied_id_is_kept() {
    let server = InMemoryServer::new();
    let store = store(&server);
    let id = ObjectId::new();

    let mut order = Order { id: Some(id), ..Order::new("sku-1", 1, "open") };
    store.insert_one(&store.context(), &mut order).await.unwrap();

    assert_eq!(order.id, Some(id));
    assert_eq!(server.documents(DATABASE, "orders").await[0].get_object_id("_id").unwrap(), id);
}

#[tokio::test]
async fn find_one_miss_leaves_target_untouched() {
    let server = InMemoryServer::new();
    seeded(&server, 2).await;
    let store = store(&server);

    let mut target = Order::new("sentinel", 0, "none");
    let hit = store
        .find_one(&store.context(), OneFinder::new(&mut target).filter(Field::new("sku").eq("missing")))
        .await
        .unwrap();

    assert!(!hit);
    assert_eq!(target.sku, "sentinel");
}

#[tokio::test]
async fn find_many_applies_filters_and_options_and_closes_cursor() {
    let server = InMemoryServer::new();
    seeded(&server, 6).await;
    let store = store(&server);

    let mut paid = vec![Order::new("stale", 0, "stale")];
    store
        .find_many(
            &store.context(),
            Finder::new()
                .filter(Field::new("status").eq("paid"))
                .filter(Field::new("qty").gte(1))
                .options(FindOptions::default().sort(Sort::new("qty", SortDirection::Desc)))
                .options(FindOptions::default().limit(1))
                .records(&mut paid),
        )
        .await
        .unwrap();

    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].qty, 4);
    assert_eq!(server.open_cursors(), 0);
}

#[tokio::test]
async fn find_many_without_destination_sends_nothing() {
    let server = InMemoryServer::new();
    let store = store(&server);

    let err = store
        .find_many(&store.context(), Finder::<Order>::new().filter(Field::new("status").eq("paid")))
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::InvalidDescriptor(_)));
    assert_eq!(server.operations(), 0);
}

#[tokio::test]
async fn insert_many_assigns_ids_by_position() {
    let server = InMemoryServer::new();
    let orders = seeded(&server, 3).await;

    let stored = server.documents(DATABASE, "orders").await;
    for (order, document) in orders.iter().zip(&stored) {
        assert_eq!(order.id, Some(document.get_object_id("_id").unwrap()));
        assert_eq!(order.sku, document.get_str("sku").unwrap());
    }

    let store = store(&server);
    let mut empty: Vec<Order> = Vec::new();
    let err = store.insert_many(&store.context(), &mut empty).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
}

#[tokio::test]
async fn update_one_without_match_changes_nothing() {
    let server = InMemoryServer::new();
    seeded(&server, 2).await;
    let store = store(&server);

    let modified = store
        .update_one(
            &store.context(),
            Updater::<Order>::new().filter(Field::new("sku").eq("missing")).set("status", "void"),
        )
        .await
        .unwrap();

    assert_eq!(modified, 0);
}

#[tokio::test]
async fn update_one_rejects_empty_filter_or_payload_before_io() {
    let server = InMemoryServer::new();
    let store = store(&server);
    let ctx = store.context();

    let no_filter = store
        .update_one(&ctx, Updater::<Order>::new().set("status", "void"))
        .await
        .unwrap_err();
    let no_payload = store
        .update_one(&ctx, Updater::<Order>::new().filter(Field::new("sku").eq("sku-1")))
        .await
        .unwrap_err();
    let many_no_payload = store.update_many(&ctx, Updater::<Order>::new()).await.unwrap_err();

    assert!(matches!(no_filter, DocumentStoreError::InvalidDescriptor(_)));
    assert!(matches!(no_payload, DocumentStoreError::InvalidDescriptor(_)));
    assert!(matches!(many_no_payload, DocumentStoreError::InvalidDescriptor(_)));
    assert_eq!(server.operations(), 0);
}

#[tokio::test]
async fn update_sets_fields_only() {
    let server = InMemoryServer::new();
    let orders = seeded(&server, 4).await;
    let store = store(&server);
    let ctx = store.context();

    let modified = store
        .update_many(&ctx, Updater::<Order>::new().filter(Field::new("status").eq("open")).set("status", "shipped"))
        .await
        .unwrap();
    assert_eq!(modified, 2);

    let mut first = Order::default();
    store
        .find_one(&ctx, OneFinder::new(&mut first).filter(Field::new("_id").eq(orders[1].id.unwrap())))
        .await
        .unwrap();
    assert_eq!(first.status, "shipped");
    assert_eq!(first.sku, "sku-1");

    let everything = store
        .update_many(&ctx, Updater::<Order>::new().update(doc! { "status": "archived" }))
        .await
        .unwrap();
    assert_eq!(everything, 4);
}

#[tokio::test]
async fn update_one_upserts_when_asked() {
    let server = InMemoryServer::new();
    let store = store(&server);
    let ctx = store.context();

    store
        .update_one(
            &ctx,
            Updater::<Order>::new()
                .filter(Field::new("sku").eq("sku-9"))
                .set("qty", 9_i64)
                .set("status", "open")
                .options(UpdateOptions::default().upsert(true)),
        )
        .await
        .unwrap();

    let mut created = Order::default();
    assert!(store.find_one(&ctx, OneFinder::new(&mut created).filter(Field::new("sku").eq("sku-9"))).await.unwrap());
    assert_eq!(created.qty, 9);
    assert!(created.id.is_some());
}

#[tokio::test]
async fn delete_one_needs_an_identifier() {
    let server = InMemoryServer::new();
    let orders = seeded(&server, 2).await;
    let store = store(&server);
    let ctx = store.context();

    let err = store.delete_one(&ctx, &Order::new("sku-0", 0, "paid")).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));

    assert_eq!(store.delete_one(&ctx, &orders[0]).await.unwrap(), 1);
    assert_eq!(store.delete_one(&ctx, &orders[0]).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_many_with_empty_filter_clears_collection() {
    let server = InMemoryServer::new();
    seeded(&server, 5).await;
    let store = store(&server);
    let ctx = store.context();

    let deleted = store.delete_many(&ctx, Deleter::<Order>::new()).await.unwrap();

    assert_eq!(deleted, 5);
    assert_eq!(store.count_documents(&ctx, Counter::<Order>::new()).await.unwrap(), 0);
}

#[derive(Debug, Deserialize)]
struct StatusTotal {
    #[serde(rename = "_id")]
    status: String,
    units: i64,
    orders: i64,
}

#[tokio::test]
async fn aggregate_decodes_into_projection_type() {
    let server = InMemoryServer::new();
    seeded(&server, 5).await;
    let store = store(&server);

    let mut totals: Vec<StatusTotal> = Vec::new();
    store
        .aggregate(
            &store.context(),
            Aggregator::<Order, StatusTotal>::new()
                .stage(
                    Stage::group_by(Some("status"))
                        .accumulate("units", Accumulator::Sum("qty".into()))
                        .accumulate("orders", Accumulator::Count),
                )
                .stage(Stage::sort("_id", SortDirection::Asc))
                .records(&mut totals),
        )
        .await
        .unwrap();

    assert_eq!(totals.len(), 2);
    assert_eq!((totals[0].status.as_str(), totals[0].units, totals[0].orders), ("open", 4, 2));
    assert_eq!((totals[1].status.as_str(), totals[1].units, totals[1].orders), ("paid", 6, 3));
    assert_eq!(server.open_cursors(), 0);
}

#[tokio::test]
async fn aggregate_requires_pipeline_and_destination() {
    let server = InMemoryServer::new();
    let store = store(&server);
    let ctx = store.context();

    let mut out: Vec<Order> = Vec::new();
    let empty = store
        .aggregate(&ctx, Aggregator::<Order>::new().records(&mut out))
        .await
        .unwrap_err();
    let no_records = store
        .aggregate(&ctx, Aggregator::<Order>::new().stage(Stage::Limit(1)))
        .await
        .unwrap_err();

    assert!(matches!(empty, DocumentStoreError::InvalidDescriptor(_)));
    assert!(matches!(no_records, DocumentStoreError::InvalidDescriptor(_)));
    assert_eq!(server.operations(), 0);
}

#[tokio::test]
async fn estimate_ignores_filters_while_exact_count_applies_them() {
    let server = InMemoryServer::new();
    seeded(&server, 5).await;
    let store = store(&server);
    let ctx = store.context();

    let exact = store
        .count_documents(&ctx, Counter::<Order>::new().filter(Field::new("status").eq("open")))
        .await
        .unwrap();
    let estimate = store.estimated_document_count(&ctx, EstimateCounter::<Order>::new()).await.unwrap();

    assert_eq!(exact, 2);
    assert_eq!(estimate, 5);
}

#[tokio::test]
async fn cancelled_find_returns_promptly_and_store_stays_usable() {
    let server = InMemoryServer::new();
    seeded(&server, 3).await;
    let store = store(&server);
    server.set_latency(Duration::from_millis(500));

    let ctx = OpContext::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let mut records = Vec::new();
    let err = store
        .find_many(&ctx, Finder::<Order>::new().records(&mut records))
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(records.is_empty());

    server.set_latency(Duration::ZERO);
    let mut records = Vec::new();
    store
        .find_many(&store.context(), Finder::<Order>::new().records(&mut records))
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(server.open_cursors(), 0);
}

#[tokio::test]
async fn deadline_expiry_mid_iteration_still_closes_cursor() {
    let server = InMemoryServer::new();
    seeded(&server, 10).await;
    let store = store(&server);
    server.set_latency(Duration::from_millis(30));

    let mut records = vec![Order::new("previous", 0, "kept")];
    let err = store
        .find_many(
            &OpContext::with_timeout(Duration::from_millis(100)),
            Finder::<Order>::new().records(&mut records),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::TimedOut));
    assert_eq!(records[0].sku, "previous");
    assert_eq!(server.open_cursors(), 0);
}

#[tokio::test]
async fn failed_cursor_close_is_logged_not_returned() {
    let server = InMemoryServer::new();
    seeded(&server, 3).await;
    let counter = EventCounter::default();
    let store = store(&server).with_logger(counter.logger());
    server.fail_cursor_closes(1);

    let mut records = Vec::new();
    let result = store
        .find_many(&store.context(), Finder::<Order>::new().records(&mut records))
        .await;

    assert!(result.is_ok());
    assert_eq!(records.len(), 3);
    assert_eq!(counter.warnings(), 1);
    assert_eq!(server.open_cursors(), 1);
}

#[tokio::test]
async fn update_one_touches_a_single_match() {
    let server = InMemoryServer::new();
    seeded(&server, 4).await;
    let store = store(&server);
    let ctx = store.context();

    let modified = store
        .update_one(&ctx, Updater::<Order>::new().filter(Field::new("status").eq("paid")).set("status", "void"))
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let voided = store
        .count_documents(&ctx, Counter::<Order>::new().filter(Field::new("status").eq("void")))
        .await
        .unwrap();
    assert_eq!(voided, 1);
}
