use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use watch_progress::{
    models::{ProgressKey, ProgressUpdate},
    Beacon, HttpBeacon, HttpProgressClient, InMemoryProgressStore, ProgressError, ProgressStore,
};

type SharedStore = Arc<InMemoryProgressStore>;

/// Error wrapper mapping store errors onto the service's status codes
struct ApiError(ProgressError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProgressError::Validation(_) => StatusCode::BAD_REQUEST,
            ProgressError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileQuery {
    user_id: String,
    profile_id: i32,
    limit: Option<usize>,
    since: Option<DateTime<Utc>>,
}

async fn find(
    State(store): State<SharedStore>,
    Path((content_id, episode_id)): Path<(i64, i32)>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = ProgressKey::new(q.user_id, q.profile_id, content_id, episode_id);
    let progress = store.find_progress(&key).await?;
    Ok(Json(json!({ "progress": progress })))
}

async fn upsert(
    State(store): State<SharedStore>,
    Json(update): Json<ProgressUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = store.upsert_progress(update).await?;
    Ok(Json(json!({ "progress": record })))
}

async fn mark_completed(
    State(store): State<SharedStore>,
    Json(key): Json<ProgressKey>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = store.mark_completed(&key).await?;
    Ok(Json(json!({ "progress": record })))
}

async fn for_content(
    State(store): State<SharedStore>,
    Path(content_id): Path<i64>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = store
        .list_progress_for_content(&q.user_id, q.profile_id, content_id)
        .await?;
    Ok(Json(json!({ "progress": records })))
}

async fn history(
    State(store): State<SharedStore>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = store
        .list_recent_progress(&q.user_id, q.profile_id, q.limit.unwrap_or(10))
        .await?;
    Ok(Json(json!({ "history": records })))
}

async fn updates(
    State(store): State<SharedStore>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = store
        .list_updated_since(&q.user_id, q.profile_id, q.since)
        .await?;
    Ok(Json(json!({ "updates": records })))
}

async fn statistics(
    State(store): State<SharedStore>,
    Query(q): Query<ProfileQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = store.watch_statistics(&q.user_id, q.profile_id).await?;
    Ok(Json(json!(stats)))
}

async fn beacon(State(store): State<SharedStore>, Json(update): Json<ProgressUpdate>) -> StatusCode {
    match store.upsert_progress(update).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

fn fake_service(store: SharedStore) -> Router {
    Router::new()
        .route("/api/video/progress", put(upsert))
        .route("/api/video/progress/updates", get(updates))
        .route("/api/video/progress/content/:content_id", get(for_content))
        .route("/api/video/progress/:content_id/:episode_id", get(find))
        .route("/api/video/mark-completed", post(mark_completed))
        .route("/api/video/history", get(history))
        .route("/api/video/statistics", get(statistics))
        .route("/api/video/update-progress", post(beacon))
        .with_state(store)
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn create_test_client() -> (HttpProgressClient, SharedStore) {
    let store = Arc::new(InMemoryProgressStore::default());
    let base_url = serve(fake_service(store.clone())).await;
    (HttpProgressClient::new(base_url), store)
}

fn key(episode_id: i32) -> ProgressKey {
    ProgressKey::new("user-1", 1, 42, episode_id)
}

fn update(episode_id: i32, current_time: f64) -> ProgressUpdate {
    ProgressUpdate {
        key: key(episode_id),
        current_time,
        duration: 1000.0,
        device_info: Some("laptop".to_string()),
    }
}

#[tokio::test]
async fn test_upsert_then_find() {
    let (client, _) = create_test_client().await;

    let record = client.upsert_progress(update(1, 500.0)).await.unwrap();
    assert_eq!(record.watch_percentage, 50);
    assert!(!record.completed);

    let found = client.find_progress(&key(1)).await.unwrap().unwrap();
    assert_eq!(found.current_time, 500.0);
    assert_eq!(found.device_info, "laptop");
    assert_eq!(found.key, key(1));
}

#[tokio::test]
async fn test_find_missing_is_none() {
    let (client, _) = create_test_client().await;
    assert!(client.find_progress(&key(3)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_upsert_twice_keeps_one_record() {
    let (client, store) = create_test_client().await;

    client.upsert_progress(update(1, 100.0)).await.unwrap();
    let record = client.upsert_progress(update(1, 950.0)).await.unwrap();

    assert!(record.completed);
    assert_eq!(record.watch_percentage, 95);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_invalid_payload_maps_to_validation() {
    let (client, _) = create_test_client().await;
    let mut bad = update(1, 100.0);
    bad.key.profile_id = 9;

    let err = client.upsert_progress(bad).await.unwrap_err();
    assert!(matches!(err, ProgressError::Validation(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_mark_completed_missing_maps_to_not_found() {
    let (client, _) = create_test_client().await;

    let err = client.mark_completed(&key(1)).await.unwrap_err();
    assert!(matches!(err, ProgressError::NotFound(_)));

    client.upsert_progress(update(1, 400.0)).await.unwrap();
    let record = client.mark_completed(&key(1)).await.unwrap();
    assert!(record.completed);
    assert_eq!(record.watch_percentage, 100);
    assert_eq!(record.current_time, 1000.0);
}

#[tokio::test]
async fn test_content_progress_and_history() {
    let (client, _) = create_test_client().await;
    for (episode, time) in [(3, 600.0), (1, 30.0), (2, 300.0)] {
        client.upsert_progress(update(episode, time)).await.unwrap();
    }

    let episodes: Vec<i32> = client
        .list_progress_for_content("user-1", 1, 42)
        .await
        .unwrap()
        .iter()
        .map(|r| r.key.episode_id)
        .collect();
    assert_eq!(episodes, vec![1, 2, 3]);

    let history = client.list_recent_progress("user-1", 1, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.current_time >= 120.0));
}

#[tokio::test]
async fn test_updates_since() {
    let (client, _) = create_test_client().await;
    client.upsert_progress(update(1, 200.0)).await.unwrap();

    let all = client.list_updated_since("user-1", 1, None).await.unwrap();
    assert_eq!(all.len(), 1);

    let later = Utc::now() + chrono::Duration::seconds(60);
    let none = client
        .list_updated_since("user-1", 1, Some(later))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_statistics() {
    let (client, _) = create_test_client().await;
    client.upsert_progress(update(1, 1000.0)).await.unwrap();
    client.upsert_progress(update(2, 800.0)).await.unwrap();

    let stats = client.watch_statistics("user-1", 1).await.unwrap();
    assert_eq!(stats.total_content_count, 1);
    assert_eq!(stats.completed_content_count, 1);
    assert_eq!(stats.total_watch_time_hours, 0.5);
    assert_eq!(stats.average_watch_percentage, 90.0);
}

#[tokio::test]
async fn test_service_failure_is_transient() {
    let app = Router::new().route(
        "/api/video/progress",
        put(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    );
    let client = HttpProgressClient::new(serve(app).await);

    let err = client.upsert_progress(update(1, 100.0)).await.unwrap_err();
    assert!(matches!(err, ProgressError::Upstream(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    let client = HttpProgressClient::new("http://127.0.0.1:1");
    let err = client.find_progress(&key(1)).await.unwrap_err();
    assert!(matches!(err, ProgressError::HttpClient(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_beacon_delivers_update() {
    let (client, store) = create_test_client().await;
    let beacon = HttpBeacon::new(client);

    beacon.send(update(1, 321.0));

    let mut delivered = None;
    for _ in 0..50 {
        delivered = store.find_progress(&key(1)).await.unwrap();
        if delivered.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered.unwrap().current_time, 321.0);
}
