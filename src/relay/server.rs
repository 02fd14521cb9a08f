//! HTTP log relay: accepts session and snapshot records and appends each as
//! one JSON line to `<log_dir>/flow.log`.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path as UrlPath, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value as JsonValue};
use tokio::{fs, io::AsyncWriteExt, net::TcpListener, sync::Mutex};

use crate::db::SessionRecord;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

pub const LOG_FILE_NAME: &str = "flow.log";
const MAX_BODY_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerConfig {
    pub port: u16,
    pub log_dir: PathBuf,
    pub allowed_origin: String,
}

#[derive(Clone)]
pub struct RelayState {
    log_dir: Arc<PathBuf>,
    allowed_origin: HeaderValue,
    write_lock: Arc<Mutex<()>>,
}

impl RelayState {
    pub fn new(log_dir: PathBuf, allowed_origin: &str) -> Result<Self> {
        let allowed_origin = HeaderValue::from_str(allowed_origin)
            .with_context(|| format!("invalid allowed origin '{allowed_origin}'"))?;
        Ok(Self {
            log_dir: Arc::new(log_dir),
            allowed_origin,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }

    async fn append(&self, record: &SessionRecord) -> Result<()> {
        let line = format!("{}\n", serde_json::to_string(record)?);
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(self.log_dir.as_path())
            .await
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())
            .await
            .with_context(|| format!("failed to open {}", self.log_file().display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route(
            "/api/log/{kind}",
            post(append_record).options(preflight).fallback(not_found),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

async fn cors(State(state): State<RelayState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        state.allowed_origin.clone(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "Not found")
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

async fn append_record(
    State(state): State<RelayState>,
    UrlPath(kind): UrlPath<String>,
    body: Bytes,
) -> Response {
    if kind != "session" && kind != "snapshot" {
        return not_found().await;
    }

    let payload: JsonValue = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(_) => return failure(StatusCode::BAD_REQUEST, "Invalid JSON"),
        }
    };

    let record: SessionRecord = match serde_json::from_value(payload) {
        Ok(record) => record,
        Err(_) => return failure(StatusCode::BAD_REQUEST, "Invalid session payload"),
    };

    match state.append(&record).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(err) => {
            log_error!("Log write error for {kind} {}: {err:#}", record.id);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Log write failed")
        }
    }
}

pub async fn run_relay_server(config: RelayServerConfig) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind log relay on {addr}"))?;
    serve_on(listener, config.log_dir.as_path(), &config.allowed_origin).await
}

pub async fn serve_on(listener: TcpListener, log_dir: &Path, allowed_origin: &str) -> Result<()> {
    let state = RelayState::new(log_dir.to_path_buf(), allowed_origin)?;
    let addr = listener.local_addr()?;

    log_info!("Flow log relay listening on http://{addr}");
    log_info!("Writing logs to {}", state.log_file().display());

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("log relay server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{HttpLogRelay, LogRelay, RelayEvent};
    use tempfile::tempdir;

    const ORIGIN: &str = "http://localhost:3000";

    async fn spawn_relay(log_dir: PathBuf) -> SocketAddr {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = build_router(RelayState::new(log_dir, ORIGIN).expect("state"));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    #[tokio::test]
    async fn appends_valid_records_as_json_lines() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let addr = spawn_relay(log_dir.clone()).await;

        let relay = HttpLogRelay::new(format!("http://{addr}/api/log")).unwrap();
        let session = SessionRecord::completed_flow(1_000, 61_000, 60);
        let snapshot = SessionRecord::flow_snapshot(1_000, 31_000, 30);
        relay.send(RelayEvent::Session, &session).await.unwrap();
        relay.send(RelayEvent::Snapshot, &snapshot).await.unwrap();

        let contents = std::fs::read_to_string(log_dir.join(LOG_FILE_NAME)).unwrap();
        let lines: Vec<SessionRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![session, snapshot]);
    }

    #[tokio::test]
    async fn rejects_malformed_bodies() {
        let dir = tempdir().unwrap();
        let addr = spawn_relay(dir.path().to_path_buf()).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/api/log/session");

        let response = client.post(&url).body("{not json").send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: JsonValue = response.json().await.unwrap();
        assert_eq!(body["error"], "Invalid JSON");

        let response = client
            .post(&url)
            .json(&json!({ "id": "x", "type": "NAP" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: JsonValue = response.json().await.unwrap();
        assert_eq!(body["error"], "Invalid session payload");

        assert!(!dir.path().join(LOG_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn duration_must_be_whole_non_negative_seconds() {
        let dir = tempdir().unwrap();
        let addr = spawn_relay(dir.path().to_path_buf()).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/api/log/snapshot");

        let mut payload = serde_json::to_value(SessionRecord::flow_snapshot(0, 90_500, 90)).unwrap();
        for duration in [json!(90.5), json!(-1)] {
            payload["duration"] = duration;
            let response = client.post(&url).json(&payload).send().await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
            let body: JsonValue = response.json().await.unwrap();
            assert_eq!(body["error"], "Invalid session payload");
        }

        payload["duration"] = json!(90);
        let response = client.post(&url).json(&payload).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_routes_and_methods_are_not_found() {
        let dir = tempdir().unwrap();
        let addr = spawn_relay(dir.path().to_path_buf()).await;
        let client = reqwest::Client::new();

        let record = SessionRecord::completed_flow(0, 1_000, 1);
        for url in [
            format!("http://{addr}/api/log/other"),
            format!("http://{addr}/elsewhere"),
        ] {
            let response = client.post(&url).json(&record).send().await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        }

        let response = client
            .get(format!("http://{addr}/api/log/session"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preflight_carries_cors_headers() {
        let dir = tempdir().unwrap();
        let addr = spawn_relay(dir.path().to_path_buf()).await;

        let response = reqwest::Client::new()
            .request(
                reqwest::Method::OPTIONS,
                format!("http://{addr}/api/log/session"),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            ORIGIN
        );
        assert_eq!(
            response.headers()["access-control-allow-methods"],
            "POST, OPTIONS"
        );
    }
}
