#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Just enough of the Elasticsearch REST API to exercise the sink.
#[derive(Debug, Default)]
pub struct FakeElasticsearch {
    pub indices: HashMap<String, FakeIndex>,
    /// Number of upcoming bulk requests answered with 429.
    pub overloaded_requests: usize,
    pub bulk_requests: usize,
    pub refreshes: usize,
}

#[derive(Debug, Default)]
pub struct FakeIndex {
    pub mapping: Value,
    pub documents: HashMap<String, Value>,
}

pub type SharedState = Arc<Mutex<FakeElasticsearch>>;

/// Starts the fake cluster on a random local port.
pub async fn start_fake_elasticsearch(state: FakeElasticsearch) -> (String, SharedState) {
    let state = Arc::new(Mutex::new(state));

    let app = Router::new()
        .route("/", get(cluster_info))
        .route("/_bulk", post(bulk))
        .route("/{index}", put(create_index))
        .route("/{index}/_refresh", post(refresh))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr: SocketAddr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake server");
    });

    (format!("http://{addr}"), state)
}

fn error(status: StatusCode, error_type: &str, reason: &str) -> Response {
    (
        status,
        Json(json!({
            "error": { "type": error_type, "reason": reason },
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

async fn cluster_info() -> Json<Value> {
    Json(json!({
        "name": "fake-node",
        "cluster_name": "fake-cluster",
        "version": { "number": "8.15.0" },
        "tagline": "You Know, for Search"
    }))
}

async fn create_index(
    State(state): State<SharedState>,
    Path(index): Path<String>,
    Json(mapping): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();

    if state.indices.contains_key(&index) {
        return error(
            StatusCode::BAD_REQUEST,
            "resource_already_exists_exception",
            &format!("index [{index}] already exists"),
        );
    }

    state.indices.insert(
        index.clone(),
        FakeIndex {
            mapping,
            ..Default::default()
        },
    );

    Json(json!({ "acknowledged": true, "index": index })).into_response()
}

async fn bulk(State(state): State<SharedState>, headers: HeaderMap, body: String) -> Response {
    let mut state = state.lock().unwrap();
    state.bulk_requests += 1;

    if headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) != Some("application/x-ndjson") {
        return error(
            StatusCode::NOT_ACCEPTABLE,
            "media_type_header_exception",
            "expected application/x-ndjson",
        );
    }

    if state.overloaded_requests > 0 {
        state.overloaded_requests -= 1;
        return error(
            StatusCode::TOO_MANY_REQUESTS,
            "es_rejected_execution_exception",
            "rejected execution of coordinating operation",
        );
    }

    let mut lines = body.lines();
    let mut items = Vec::new();

    while let (Some(action), Some(source)) = (lines.next(), lines.next()) {
        let action: Value = serde_json::from_str(action).expect("action line");
        let index = action["index"]["_index"].as_str().unwrap_or_default().to_string();
        let id = action["index"]["_id"].as_str().unwrap_or_default().to_string();

        let item = match serde_json::from_str::<Value>(source) {
            Ok(document) => {
                let target = state.indices.entry(index.clone()).or_default();
                let status = if target.documents.insert(id.clone(), document).is_some() {
                    200
                } else {
                    201
                };
                json!({ "index": { "_index": index, "_id": id, "status": status } })
            }
            Err(err) => json!({ "index": {
                "_index": index,
                "_id": id,
                "status": 400,
                "error": { "type": "document_parsing_exception", "reason": err.to_string() }
            } }),
        };
        items.push(item);
    }

    let errors = items.iter().any(|item| item["index"]["error"].is_object());
    Json(json!({ "took": 1, "errors": errors, "items": items })).into_response()
}

async fn refresh(State(state): State<SharedState>, Path(index): Path<String>) -> Response {
    let mut state = state.lock().unwrap();

    if !state.indices.contains_key(&index) {
        return error(
            StatusCode::NOT_FOUND,
            "index_not_found_exception",
            &format!("no such index [{index}]"),
        );
    }

    state.refreshes += 1;
    Json(json!({ "_shards": { "total": 1, "successful": 1, "failed": 0 } })).into_response()
}
