//! Integration tests for the switchbind pipeline
//!
//! These tests drive whole pipelines end to end: identifier ordering, termination after the first
//! result, and fetching over HTTP from an in-process API server.

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchbind::source::{ChannelSource, StreamSource, WatchedFile};
use switchbind::test_utils::{MockFetcher, id_params};
use switchbind::{
    Callbacks, FetchError, HttpFetcher, JsonFetcher, Outcome, ParamKey, ParamMap, Pipeline,
    PipelineError, PipelineState,
};
use tokio::net::TcpListener;

#[derive(Debug, Clone, PartialEq)]
enum Event<E> {
    Value(E),
    Error(FetchError),
    Complete,
}

type Events<E> = Arc<Mutex<Vec<Event<E>>>>;

fn recording<E: Send + 'static>() -> (Callbacks<E>, Events<E>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (v, e, c) = (events.clone(), events.clone(), events.clone());
    let callbacks = Callbacks::new()
        .on_value(move |x| v.lock().unwrap().push(Event::Value(x)))
        .on_error(move |err| e.lock().unwrap().push(Event::Error(err)))
        .on_complete(move || c.lock().unwrap().push(Event::Complete));
    (callbacks, events)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct User {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    company: String,
}

async fn get_user(Path(id): Path<String>) -> Result<Json<serde_json::Value>, StatusCode> {
    match id.as_str() {
        "42" => Ok(Json(json!({"_id": "42", "name": "Ada", "company": "Analytical"}))),
        "43" => Ok(Json(json!({"_id": "43", "name": "Grace", "company": "Navy"}))),
        "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
        "garbled" => Ok(Json(json!({"unexpected": true}))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

/// Serve a tiny users API on an ephemeral port and return its base URL.
async fn spawn_users_api() -> url::Url {
    let app = Router::new().route("/api/users/{id}", get(get_user));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}").parse().unwrap()
}

#[tokio::test]
async fn test_latest_identifier_wins_when_both_succeed() {
    let (tx, source) = ChannelSource::channel(8);
    let fetcher = Arc::new(MockFetcher::<String>::new());
    let pipeline = Pipeline::with_shared_fetcher(source, ParamKey::default(), fetcher.clone());
    let (callbacks, events) = recording();

    let handle = pipeline.subscribe(callbacks).await.unwrap();
    tx.send(id_params("42")).await.unwrap();
    fetcher.wait_for_calls(1).await;
    tx.send(id_params("43")).await.unwrap();
    fetcher.wait_for_calls(2).await;

    // The older fetch settling later must not matter.
    fetcher.resolve("43", Ok("user 43".to_string()));
    fetcher.resolve("42", Ok("user 42".to_string()));

    assert_eq!(handle.join().await.unwrap(), Outcome::Value);
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Value("user 43".to_string()), Event::Complete]
    );
}

#[tokio::test]
async fn test_stale_success_settling_first_is_never_delivered() {
    let (tx, source) = ChannelSource::channel(8);
    let fetcher = Arc::new(MockFetcher::<String>::new());
    let pipeline = Pipeline::with_shared_fetcher(source, ParamKey::default(), fetcher.clone());
    let (callbacks, events) = recording();

    let handle = pipeline.subscribe(callbacks).await.unwrap();
    for (n, id) in ["1", "2", "3"].into_iter().enumerate() {
        tx.send(id_params(id)).await.unwrap();
        fetcher.wait_for_calls(n + 1).await;
    }

    fetcher.resolve("1", Ok("user 1".to_string()));
    fetcher.resolve("2", Ok("user 2".to_string()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(handle.state(), PipelineState::Active);

    fetcher.resolve("3", Ok("user 3".to_string()));
    assert_eq!(handle.join().await.unwrap(), Outcome::Value);
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Value("user 3".to_string()), Event::Complete]
    );
}

#[tokio::test]
async fn test_not_found_fires_error_once() {
    let (tx, source) = ChannelSource::channel(8);
    let fetcher = MockFetcher::<String>::new()
        .respond_with("7", Err(FetchError::NotFound("7".to_string())));
    let pipeline = Pipeline::new(source, ParamKey::default(), fetcher);
    let (callbacks, events) = recording();

    let handle = pipeline.subscribe(callbacks).await.unwrap();
    tx.send(id_params("7")).await.unwrap();

    assert_eq!(
        handle.join().await.unwrap(),
        Outcome::Failed(FetchError::NotFound("7".to_string()))
    );
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Error(FetchError::NotFound("7".to_string()))]
    );
}

#[tokio::test]
async fn test_identifiers_after_first_result_are_ignored() {
    let (tx, source) = ChannelSource::channel(8);
    let fetcher = Arc::new(MockFetcher::<String>::new().respond_with("1", Ok("user 1".to_string())));
    let pipeline = Pipeline::with_shared_fetcher(source, ParamKey::default(), fetcher.clone());
    let (callbacks, events) = recording();

    let mut handle = pipeline.subscribe(callbacks).await.unwrap();
    tx.send(id_params("1")).await.unwrap();
    handle.terminated().await;
    assert_eq!(handle.state(), PipelineState::Terminated);
    assert_eq!(handle.join().await.unwrap(), Outcome::Value);

    // The source has been unsubscribed; "2" goes nowhere.
    assert!(tx.send(id_params("2")).await.is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Value("user 1".to_string()), Event::Complete]
    );
}

#[tokio::test]
async fn test_stale_failure_is_dropped_and_latest_failure_ends_pipeline() {
    let (tx, source) = ChannelSource::channel(8);
    let fetcher = Arc::new(MockFetcher::<String>::new());
    let pipeline = Pipeline::with_shared_fetcher(source, ParamKey::default(), fetcher.clone());
    let (callbacks, events) = recording();

    let handle = pipeline.subscribe(callbacks).await.unwrap();
    tx.send(id_params("1")).await.unwrap();
    fetcher.wait_for_calls(1).await;
    tx.send(id_params("2")).await.unwrap();
    fetcher.wait_for_calls(2).await;

    // "1" was superseded; its failure may not even reach the pipeline.
    let _ = fetcher.resolve("1", Err(FetchError::Transport("connection reset".to_string())));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(handle.state(), PipelineState::Active);

    fetcher.resolve("2", Err(FetchError::NotFound("2".to_string())));
    assert_eq!(
        handle.join().await.unwrap(),
        Outcome::Failed(FetchError::NotFound("2".to_string()))
    );
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Error(FetchError::NotFound("2".to_string()))]
    );

    // Terminated on the error: the source is gone and nothing else is fetched.
    assert!(tx.send(id_params("3")).await.is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_source_ending_without_identifiers_completes() {
    let (tx, source) = ChannelSource::channel(8);
    let pipeline = Pipeline::new(source, ParamKey::default(), MockFetcher::<String>::new());
    let (callbacks, events) = recording();

    let handle = pipeline.subscribe(callbacks).await.unwrap();
    drop(tx);

    assert_eq!(handle.join().await.unwrap(), Outcome::Completed);
    assert_eq!(*events.lock().unwrap(), vec![Event::Complete]);
}

#[tokio::test]
async fn test_second_subscribe_to_single_use_source_fails() {
    let (_tx, source) = ChannelSource::channel(8);
    let pipeline = Pipeline::new(source, ParamKey::default(), MockFetcher::<String>::new());

    let first = pipeline.subscribe(Callbacks::new()).await.unwrap();
    assert!(pipeline.subscribe(Callbacks::new()).await.is_err());
    assert_eq!(first.stop().await.unwrap(), Outcome::Cancelled);
}

#[tokio::test]
async fn test_http_fetch_of_typed_entity() {
    let base_url = spawn_users_api().await;
    let source = StreamSource::new(tokio_stream::iter(vec![id_params("42")]));
    let fetcher = HttpFetcher::<User>::builder().base_url(base_url).build();
    let pipeline = Pipeline::new(source, ParamKey::default(), fetcher);

    let user = pipeline.first_value().await.unwrap();
    assert_eq!(
        user,
        Some(User {
            id: "42".to_string(),
            name: "Ada".to_string(),
            company: "Analytical".to_string(),
        })
    );
}

#[tokio::test]
async fn test_http_not_found_reaches_error_callback() {
    let base_url = spawn_users_api().await;
    let (tx, source) = ChannelSource::channel(8);
    let fetcher = JsonFetcher::builder().base_url(base_url).build();
    let pipeline = Pipeline::new(source, ParamKey::default(), fetcher);
    let (callbacks, events) = recording();

    let handle = pipeline.subscribe(callbacks).await.unwrap();
    tx.send(id_params("nobody")).await.unwrap();

    assert_eq!(
        handle.join().await.unwrap(),
        Outcome::Failed(FetchError::NotFound("nobody".to_string()))
    );
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Error(FetchError::NotFound("nobody".to_string()))]
    );
}

#[tokio::test]
async fn test_http_error_statuses_and_bad_bodies() {
    let base_url = spawn_users_api().await;

    let source = StreamSource::new(tokio_stream::iter(vec![id_params("broken")]));
    let fetcher = JsonFetcher::builder().base_url(base_url.clone()).build();
    let result = Pipeline::new(source, ParamKey::default(), fetcher)
        .first_value()
        .await;
    assert!(
        matches!(
            &result,
            Err(PipelineError::Fetch(FetchError::Status { id, status: 500 })) if id == "broken"
        ),
        "{result:?}"
    );

    let source = StreamSource::new(tokio_stream::iter(vec![id_params("garbled")]));
    let fetcher = HttpFetcher::<User>::builder().base_url(base_url).build();
    let result = Pipeline::new(source, ParamKey::default(), fetcher)
        .first_value()
        .await;
    assert!(
        matches!(result, Err(PipelineError::Fetch(FetchError::Decode(_)))),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_http_missing_identifier_is_reported_by_fetcher() {
    let base_url = spawn_users_api().await;
    let source = StreamSource::new(tokio_stream::iter(vec![
        [("userId", "42")].into_iter().collect::<ParamMap>(),
    ]));
    let fetcher = JsonFetcher::builder().base_url(base_url).build();
    let pipeline = Pipeline::new(source, ParamKey::default(), fetcher);

    let result = pipeline.first_value().await;
    assert!(
        matches!(result, Err(PipelineError::Fetch(FetchError::MissingIdentifier))),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_watched_file_drives_http_fetch() {
    let base_url = spawn_users_api().await;
    let path = std::env::temp_dir().join(format!("switchbind-it-{}.json", std::process::id()));
    tokio::fs::write(&path, r#"{"id": "43"}"#).await.unwrap();

    let fetcher = HttpFetcher::<User>::builder().base_url(base_url).build();
    let pipeline = Pipeline::new(WatchedFile(path.clone()), ParamKey::default(), fetcher);
    let user = pipeline.first_value().await.unwrap();

    assert_eq!(user.map(|u| u.name), Some("Grace".to_string()));
    let _ = tokio::fs::remove_file(&path).await;
}
