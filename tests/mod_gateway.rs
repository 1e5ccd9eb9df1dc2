use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use axum::response::Response;
use bson::doc;
use querylab::errors::GatewayError;
use querylab::gateway::{GatewayState, SharedState, connect_in_background, router};
use querylab::query::Invocation;
use querylab::store::{DocumentStore, MemoryStore, Outcome, SharedStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn library() -> SharedStore {
    let store = MemoryStore::new();
    store.insert_many(
        "books",
        [
            doc! { "_id": 1, "title": "Dune", "year": 1965, "genre": "sf" },
            doc! { "_id": 2, "title": "Emma", "year": 1815, "genre": "classic" },
            doc! { "_id": 3, "title": "Neuromancer", "year": 1984, "genre": "sf" },
        ],
    );
    Arc::new(store)
}

fn connected() -> SharedState {
    Arc::new(GatewayState::with_store(library(), "books"))
}

struct FailingStore;

#[async_trait]
impl DocumentStore for FailingStore {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn execute(&self, _: &Invocation) -> Result<Outcome, GatewayError> {
        Err(GatewayError::Execution("unknown operator: $foo".into()))
    }
}

struct PanickingStore;

#[async_trait]
impl DocumentStore for PanickingStore {
    fn backend(&self) -> &'static str {
        "panicking"
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn execute(&self, _: &Invocation) -> Result<Outcome, GatewayError> {
        panic!("driver bug")
    }
}

async fn post_raw(state: SharedState, body: &str) -> Response {
    router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .header(http::header::CONTENT_TYPE, "application/json")
                .uri("/api/query/execute")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_query(state: SharedState, query: &str) -> (StatusCode, Value) {
    let resp = post_raw(state, &json!({ "query": query }).to_string()).await;
    let status = resp.status();
    (status, body_json(resp).await)
}

async fn body_json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_health(state: SharedState) -> Value {
    let resp = router(state)
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await
}

#[tokio::test]
async fn not_connected_regardless_of_query() {
    for body in [
        json!({ "query": "db.books.find()" }).to_string(),
        json!({ "query": "garbage" }).to_string(),
        json!({ "query": "" }).to_string(),
        json!({}).to_string(),
        "not json at all".to_string(),
    ] {
        let resp = post_raw(Arc::new(GatewayState::default()), &body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(
            body_json(resp).await,
            json!({ "error": "Not connected to database. Please connect first." })
        );
    }
}

#[tokio::test]
async fn missing_or_blank_query() {
    for body in [json!({}).to_string(), json!({ "query": "" }).to_string(), json!({ "query": "  \n" }).to_string()] {
        let resp = post_raw(connected(), &body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await, json!({ "error": "Query is required" }));
    }
}

#[tokio::test]
async fn find_returns_list_and_count() {
    let (status, body) = post_query(connected(), "db.books.find({ genre: 'sf' }, { title: 1, _id: 0 });").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": true, "result": [{ "title": "Dune" }, { "title": "Neuromancer" }], "count": 2 })
    );
}

#[tokio::test]
async fn find_with_modifiers() {
    let (_, body) = post_query(connected(), "db.books.find().sort({ year: -1 }).skip(1).limit(1)").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["result"][0]["title"], "Dune");
}

#[tokio::test]
async fn aggregate_result_is_listed() {
    let (status, body) = post_query(
        connected(),
        "db.books.aggregate([{ $match: { genre: 'sf' } }, { $count: 'n' }])",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!([{ "n": 2 }]));
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn single_document_counts_as_one() {
    let (_, body) = post_query(connected(), "db.books.findOne({ year: 1815 })").await;
    assert_eq!(body["result"]["title"], "Emma");
    assert_eq!(body["count"], 1);

    let (_, body) = post_query(connected(), "db.books.findOne({ year: 3000 })").await;
    assert_eq!(body["result"], Value::Null);
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn scalar_count_is_reported_as_result() {
    let (_, body) = post_query(connected(), "db.books.countDocuments({ genre: 'sf' })").await;
    assert_eq!(body["result"], 2);
    assert_eq!(body["count"], 1);

    let (_, body) = post_query(connected(), "db.books.distinct('genre')").await;
    assert_eq!(body["result"], json!(["sf", "classic"]));
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn json_descriptor_queries_default_collection() {
    let state = connected();
    let (status, body) =
        post_query(state, r#"{"operation": "find", "filter": {"genre": "classic"}, "project": {"_id": 0, "year": 1}}"#)
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!([{ "year": 1815 }]));
}

#[tokio::test]
async fn classification_errors_are_client_errors() {
    let (status, body) = post_query(connected(), "SELECT * FROM books").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Query must start with db.collection.method() or be valid JSON" }));

    let (status, body) = post_query(connected(), "db.books.find(").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid method call format" }));

    let (status, body) = post_query(connected(), "db.books.remove({})").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Unsupported operation:"));
}

#[tokio::test]
async fn execution_fault_carries_details() {
    let state = Arc::new(GatewayState::with_store(Arc::new(FailingStore), "books"));
    let (status, body) = post_query(state, "db.books.find()").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid query format", "details": "unknown operator: $foo" }));
}

#[tokio::test]
async fn memory_store_semantic_errors_are_execution_faults() {
    let (status, body) = post_query(connected(), "db.books.find({ year: { $foo: 1 } })").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid query format");
    assert!(body["details"].as_str().is_some());
}

#[tokio::test]
async fn internal_fault_is_generic() {
    let state = Arc::new(GatewayState::with_store(Arc::new(PanickingStore), "books"));
    let (status, body) = post_query(state, "db.books.find()").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to execute query" }));
}

#[tokio::test]
async fn health_tracks_connection() {
    let state: SharedState = Arc::new(GatewayState::default());
    let body = get_health(state.clone()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected"], false);
    let ts = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");

    connect_in_background(state.clone(), async { Ok(library()) }).await.unwrap();
    assert_eq!(get_health(state).await["connected"], true);
}

#[tokio::test]
async fn failed_background_connect_stays_disconnected() {
    let state: SharedState = Arc::new(GatewayState::default());
    connect_in_background(state.clone(), async { Err(GatewayError::Execution("no route to host".into())) })
        .await
        .unwrap();
    assert!(!state.is_connected());
    let (_, body) = post_query(state, "db.books.find()").await;
    assert_eq!(body["error"], "Not connected to database. Please connect first.");
}

#[tokio::test]
async fn store_slot_is_filled_once() {
    let state = GatewayState::default();
    assert!(state.attach(library()).is_ok());
    assert!(state.attach(Arc::new(FailingStore)).is_err());
    assert_eq!(state.store().unwrap().backend(), "memory");
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let resp = router(connected())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/query/execute")
                .header(http::header::ORIGIN, "http://localhost:3000")
                .header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(http::header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn cors_preflight_allows_custom_headers() {
    let resp = router(connected())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/query/execute")
                .header(http::header::ORIGIN, "http://localhost:3000")
                .header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(http::header::ACCESS_CONTROL_REQUEST_HEADERS, "x-requested-with, authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::ACCESS_CONTROL_ALLOW_HEADERS], "*");
}
