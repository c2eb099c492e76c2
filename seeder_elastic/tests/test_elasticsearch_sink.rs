use std::{sync::Arc, time::Duration};

use common::{FakeElasticsearch, start_fake_elasticsearch};
use seeder_core::{
    AccumulatorOptions, ErrorKind, RecordGenerator, RunOptions, SeedError, default_customers,
    pipeline::Orchestrator,
    receivable::index_mapping,
    sink::{BulkDocument, BulkSink, CollectionStatus, SinkError},
};
use seeder_elastic::ElasticsearchSink;
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod common;

#[tokio::test]
async fn test_ping() {
    let (url, _state) = start_fake_elasticsearch(FakeElasticsearch::default()).await;
    let sink = ElasticsearchSink::new(url).unwrap();

    sink.ping().await.unwrap();
}

#[tokio::test]
async fn test_ping_unreachable() {
    // Nothing listens on the discard port.
    let sink =
        ElasticsearchSink::with_timeout("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();

    let err = sink.ping().await.unwrap_err();
    assert!(matches!(err, SinkError::Unavailable { .. }));
}

#[tokio::test]
async fn test_create_index_twice() {
    let (url, state) = start_fake_elasticsearch(FakeElasticsearch::default()).await;
    let sink = ElasticsearchSink::new(url).unwrap();

    let first = sink
        .create_collection("receivables", &index_mapping())
        .await
        .unwrap();
    let second = sink
        .create_collection("receivables", &index_mapping())
        .await
        .unwrap();

    assert_eq!(first, CollectionStatus::Created);
    assert_eq!(second, CollectionStatus::AlreadyExists);

    let state = state.lock().unwrap();
    assert_eq!(
        state.indices["receivables"].mapping["mappings"]["properties"]["valor_original"]["type"],
        "double"
    );
}

#[tokio::test]
async fn test_bulk_write_item_results() {
    let (url, state) = start_fake_elasticsearch(FakeElasticsearch::default()).await;
    let sink = ElasticsearchSink::new(url).unwrap();

    let results = sink
        .bulk_write(
            "receivables",
            vec![
                BulkDocument::new("a", json!({ "value": 1 }).to_string()),
                BulkDocument::new("b", "{ not json"),
                BulkDocument::new("a", json!({ "value": 2 }).to_string()),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[2].is_ok());

    let failure = results[1].as_ref().unwrap_err();
    assert_eq!(failure.status, 400);
    assert_eq!(failure.kind(), ErrorKind::Validation);

    let state = state.lock().unwrap();
    let index = &state.indices["receivables"];
    assert_eq!(index.documents.len(), 1);
    assert_eq!(index.documents["a"], json!({ "value": 2 }));
}

#[tokio::test]
async fn test_bulk_write_overloaded() {
    let (url, _state) = start_fake_elasticsearch(FakeElasticsearch {
        overloaded_requests: 1,
        ..Default::default()
    })
    .await;
    let sink = ElasticsearchSink::new(url).unwrap();
    let documents = vec![BulkDocument::new("a", "{}")];

    let err = sink
        .bulk_write("receivables", documents.clone())
        .await
        .unwrap_err();
    assert!(err.is_overloaded());

    sink.bulk_write("receivables", documents).await.unwrap();
}

#[tokio::test]
async fn test_refresh_missing_index() {
    let (url, _state) = start_fake_elasticsearch(FakeElasticsearch::default()).await;
    let sink = ElasticsearchSink::new(url).unwrap();

    let err = sink.refresh("missing").await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn test_seed_into_elasticsearch() {
    let (url, state) = start_fake_elasticsearch(FakeElasticsearch {
        overloaded_requests: 1,
        ..Default::default()
    })
    .await;
    let sink = Arc::new(ElasticsearchSink::new(url).unwrap());

    let options = RunOptions::default()
        .with_collection("ciclo_vida_recebivel")
        .with_total_records(250)
        .with_concurrency(8)
        .with_accumulator(
            AccumulatorOptions::default()
                .with_flush_interval(Duration::from_millis(50))
                .with_overload_retry(Duration::from_millis(10), 2),
        );
    let generator = RecordGenerator::new(default_customers()).unwrap();

    let report = Orchestrator::new(sink, generator, options)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 250);
    assert_eq!(report.failed, 0);

    let state = state.lock().unwrap();
    let index = &state.indices["ciclo_vida_recebivel"];
    assert_eq!(index.documents.len(), 250);
    assert_eq!(state.refreshes, 1);

    for (id, document) in &index.documents {
        assert_eq!(document["id_recebivel"], id.as_str());
        assert!(document["codigo_cliente"].as_str().unwrap().starts_with("CLI-"));
    }
}

#[tokio::test]
async fn test_seed_aborts_when_cluster_is_down() {
    let sink = Arc::new(
        ElasticsearchSink::with_timeout("http://127.0.0.1:9", Duration::from_secs(2)).unwrap(),
    );
    let generator = RecordGenerator::new(default_customers()).unwrap();

    let err = Orchestrator::new(sink, generator, RunOptions::default().with_total_records(10))
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SeedError::Connect { .. }));
    assert_eq!(err.kind().exit_code(), 75);
}
