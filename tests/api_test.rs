use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use grades_service::{
    db::{Database, DatabaseSettings, Grade, GradeInput, Sqlite},
    logging::{BatchLogger, LogEntry, LogSink},
    metrics::Metrics,
    server::{router, AppState},
};
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Clone, Default)]
struct RecordingSink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn send(&mut self, entry: &LogEntry) -> eyre::Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

struct TestApp {
    app: Router,
    logger: Arc<BatchLogger>,
    sink: RecordingSink,
}

impl TestApp {
    async fn new() -> Self {
        let db = Sqlite::new(&DatabaseSettings {
            url: "sqlite::memory:".to_string(),
            metrics: Metrics::noop(),
        })
        .await
        .unwrap();

        Self::with_db(db)
    }

    fn with_db<D: Database>(db: D) -> Self {
        let sink = RecordingSink::default();
        let logger = Arc::new(BatchLogger::spawn(
            sink.clone(),
            100,
            Duration::from_secs(3600),
        ));
        let app = router(AppState::new(db, logger.clone(), Metrics::noop()));

        Self { app, logger, sink }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn shipped(&self) -> Vec<LogEntry> {
        self.logger.close().await;
        self.sink.entries.lock().unwrap().clone()
    }
}

fn alice() -> Value {
    json!({
        "student_name": "Alice",
        "email": "alice@example.com",
        "class": "Math",
        "grade": 90
    })
}

#[tokio::test]
async fn create_then_fetch_grade() {
    let app = TestApp::new().await;

    let (status, created) = app.call(Method::POST, "/api/v1/grades", Some(alice())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], 1);
    assert_eq!(created["student_name"], "Alice");

    let (status, fetched) = app.call(Method::GET, "/api/v1/grades/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, all) = app.call(Method::GET, "/api/v1/grades", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all, json!([created]));
}

#[tokio::test]
async fn list_is_empty_array_when_no_grades() {
    let app = TestApp::new().await;

    let (status, all) = app.call(Method::GET, "/api/v1/grades", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all, json!([]));
}

#[tokio::test]
async fn invalid_ids_are_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/api/v1/grades/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid grade ID");

    let (status, body) = app.call(Method::DELETE, "/api/v1/grades/-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ID must be a positive number");
}

#[tokio::test]
async fn missing_grade_is_not_found() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/api/v1/grades/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Grade not found");

    let (status, _) = app
        .call(Method::PUT, "/api/v1/grades/42", Some(alice()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/grades")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_replaces_all_fields() {
    let app = TestApp::new().await;
    app.call(Method::POST, "/api/v1/grades", Some(alice())).await;

    let (status, updated) = app
        .call(
            Method::PUT,
            "/api/v1/grades/1",
            Some(json!({ "student_name": "Alice B", "grade": 75 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        updated,
        json!({
            "id": 1,
            "student_name": "Alice B",
            "email": "",
            "class": "",
            "grade": 75
        })
    );

    let (_, fetched) = app.call(Method::GET, "/api/v1/grades/1", None).await;
    assert_eq!(fetched, updated);
}

#[tokio::test]
async fn delete_removes_grade() {
    let app = TestApp::new().await;
    app.call(Method::POST, "/api/v1/grades", Some(alice())).await;

    let (status, body) = app.call(Method::DELETE, "/api/v1/grades/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Grade deleted" }));

    let (status, _) = app.call(Method::GET, "/api/v1/grades/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn average_over_all_grades() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/api/v1/grades/avg", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "average": 0.0 }));

    for grade in [80, 90, 95] {
        let mut input = alice();
        input["grade"] = grade.into();
        app.call(Method::POST, "/api/v1/grades", Some(input)).await;
    }

    let (_, body) = app.call(Method::GET, "/api/v1/grades/avg", None).await;
    let average = body["average"].as_f64().unwrap();
    assert!((average - 88.333).abs() < 0.001, "average was {}", average);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/actuator/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["component"]["name"], "grades-service");
    assert!(body.get("failures").is_none());
}

#[tokio::test]
async fn requests_are_shipped_except_health() {
    let app = TestApp::new().await;

    app.call(Method::GET, "/actuator/health", None).await;
    app.call(Method::POST, "/api/v1/grades", Some(alice())).await;
    app.call(Method::GET, "/api/v1/grades/9", None).await;

    let shipped = app.shipped().await;
    assert_eq!(shipped.len(), 2);

    assert_eq!(shipped[0].message, "POST /api/v1/grades");
    assert_eq!(shipped[0].level, "info");
    assert_eq!(shipped[0].metadata["status"], "201");
    assert_eq!(shipped[0].metadata["method"], "POST");
    assert!(shipped[0].metadata.contains_key("latency_ms"));

    assert_eq!(shipped[1].message, "GET /api/v1/grades/9");
    assert_eq!(shipped[1].level, "warn");
    assert_eq!(shipped[1].metadata["status"], "404");
}

/// A store whose backend is gone.
#[derive(Clone, Debug)]
struct UnavailableDb;

#[async_trait]
impl Database for UnavailableDb {
    type Settings = ();

    async fn new(_settings: &Self::Settings) -> eyre::Result<Self> {
        Ok(Self)
    }

    async fn version(&self) -> eyre::Result<String> {
        Err(eyre::eyre!("connection refused"))
    }

    fn engine(&self) -> &'static str {
        "unavailable"
    }

    async fn ping(&self) -> eyre::Result<()> {
        Err(eyre::eyre!("connection refused"))
    }

    async fn list_grades(&self) -> eyre::Result<Vec<Grade>> {
        Err(eyre::eyre!("connection refused"))
    }

    async fn get_grade(&self, _id: i64) -> eyre::Result<Option<Grade>> {
        Err(eyre::eyre!("connection refused"))
    }

    async fn create_grade(&self, _input: GradeInput) -> eyre::Result<Grade> {
        Err(eyre::eyre!("connection refused"))
    }

    async fn update_grade(&self, _grade: &Grade) -> eyre::Result<()> {
        Err(eyre::eyre!("connection refused"))
    }

    async fn delete_grade(&self, _id: i64) -> eyre::Result<()> {
        Err(eyre::eyre!("connection refused"))
    }

    async fn average_grade(&self) -> eyre::Result<f64> {
        Err(eyre::eyre!("connection refused"))
    }
}

#[tokio::test]
async fn health_reports_unavailable_database() {
    let app = TestApp::with_db(UnavailableDb::new(&()).await.unwrap());

    let (status, body) = app.call(Method::GET, "/actuator/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "Unavailable");
    assert_eq!(body["failures"]["database"], "connection refused");
}

#[tokio::test]
async fn store_errors_are_internal_and_logged_as_errors() {
    let app = TestApp::with_db(UnavailableDb);

    let (status, body) = app.call(Method::GET, "/api/v1/grades", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let shipped = app.shipped().await;
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].level, "error");
    assert_eq!(shipped[0].metadata["status"], "500");
}
