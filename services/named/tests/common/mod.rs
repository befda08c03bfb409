//! Fakes shared by the provisioning tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use named::transfer::{RemoteTransfer, TransferSession, TransferTarget};
use named::{Metrics, ProvisionResult, Provisioner, ProvisionerConfig, Zone};

pub const TOKEN: &str = "AQIC5wM2LY4SfczntBbXvEAOuECbqMY3J4NW3byH6xwgkGE=@AAJTSQACMDE=#";

/// What the recording transfer saw
#[derive(Debug, Default)]
pub struct Recording {
    pub targets: Vec<TransferTarget>,
    /// Remote path and content of every copied file
    pub files: Vec<(String, String)>,
    pub commands: Vec<String>,
    pub closed: usize,
}

/// [`RemoteTransfer`] that records instead of connecting
#[derive(Clone, Default)]
pub struct RecordingTransfer {
    pub recording: Arc<Mutex<Recording>>,
    pub script_output: String,
}

impl RecordingTransfer {
    pub fn snapshot<T>(&self, f: impl FnOnce(&Recording) -> T) -> T {
        f(&self.recording.lock().unwrap())
    }
}

#[async_trait]
impl RemoteTransfer for RecordingTransfer {
    async fn open(&self, target: &TransferTarget) -> ProvisionResult<Box<dyn TransferSession>> {
        self.recording.lock().unwrap().targets.push(target.clone());
        Ok(Box::new(RecordingSession {
            recording: Arc::clone(&self.recording),
            script_output: self.script_output.clone(),
        }))
    }
}

struct RecordingSession {
    recording: Arc<Mutex<Recording>>,
    script_output: String,
}

#[async_trait]
impl TransferSession for RecordingSession {
    async fn copy_files(&mut self, local_paths: &[PathBuf], remote_dir: &str) -> ProvisionResult<()> {
        for path in local_paths {
            let content = std::fs::read_to_string(path).unwrap();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.recording
                .lock()
                .unwrap()
                .files
                .push((format!("{}/{}", remote_dir, name), content));
        }
        Ok(())
    }

    async fn run_script(&mut self, command_line: &str) -> ProvisionResult<String> {
        self.recording
            .lock()
            .unwrap()
            .commands
            .push(command_line.to_string());
        Ok(self.script_output.clone())
    }

    async fn close(self: Box<Self>) -> ProvisionResult<()> {
        self.recording.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Agents held by the fake OpenAM, keyed by name
#[derive(Clone, Default)]
pub struct FakeAm {
    pub agents: Arc<Mutex<HashMap<String, Value>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeAm {
    pub fn agent_count(&self) -> usize {
        self.agents.lock().unwrap().len()
    }

    pub fn agent(&self, name: &str) -> Option<Value> {
        self.agents.lock().unwrap().get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("nav-isso").and_then(|v| v.to_str().ok()) == Some(TOKEN)
}

async fn authenticate(State(am): State<FakeAm>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    am.record("authenticate".to_string());
    if headers.contains_key("X-OpenAM-Username") && headers.contains_key("X-OpenAM-Password") {
        (
            StatusCode::OK,
            Json(json!({"tokenId": TOKEN, "successUrl": "/openam/console"})),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"code": 401})))
    }
}

async fn get_agent(State(am): State<FakeAm>, Path(name): Path<String>, headers: HeaderMap) -> StatusCode {
    am.record(format!("get {}", name));
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if am.agents.lock().unwrap().contains_key(&name) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn delete_agent(State(am): State<FakeAm>, Path(name): Path<String>, headers: HeaderMap) -> StatusCode {
    am.record(format!("delete {}", name));
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    match am.agents.lock().unwrap().remove(&name) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

async fn create_agent(
    State(am): State<FakeAm>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> StatusCode {
    let name = payload["username"].as_str().unwrap_or_default().to_string();
    am.record(format!("create {}", name));
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if query.get("_action").map(String::as_str) != Some("create") {
        return StatusCode::BAD_REQUEST;
    }

    let mut agents = am.agents.lock().unwrap();
    if agents.contains_key(&name) {
        return StatusCode::CONFLICT;
    }
    agents.insert(name, payload);
    StatusCode::CREATED
}

/// Start the fake OpenAM on a random port and return its base URL
pub async fn start_fake_am(am: FakeAm) -> String {
    let app = Router::new()
        .route("/json/authenticate", post(authenticate))
        .route("/json/agents/", post(create_agent))
        .route("/json/agents/:name", get(get_agent).delete(delete_agent))
        .with_state(am);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn provisioner(
    fasit_url: &str,
    zone: Zone,
    repo_url: &str,
    staging_dir: &std::path::Path,
    transfer: RecordingTransfer,
) -> Provisioner {
    Provisioner::new(
        reqwest::Client::new(),
        ProvisionerConfig::new(fasit_url, zone)
            .with_policy_repo_url(repo_url)
            .with_staging_dir(staging_dir),
        Arc::new(Metrics::new().unwrap()),
        Arc::new(transfer),
    )
}

pub async fn mock_environment<'a>(fasit: &'a MockServer, name: &str, class: &str) -> Mock<'a> {
    let path = format!("/api/v2/environments/{}", name);
    let body = json!({"name": name, "environmentclass": class});
    fasit
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200).json_body(body);
        })
        .await
}

pub async fn mock_application<'a>(fasit: &'a MockServer, name: &str) -> Mock<'a> {
    let path = format!("/api/v2/applications/{}", name);
    let body = json!({"name": name});
    fasit
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200).json_body(body);
        })
        .await
}

/// Scoped resource lookup answering with `resource`, or 404 when `None`
pub async fn mock_scoped_resource<'a>(
    fasit: &'a MockServer,
    alias: &str,
    resource_type: &str,
    resource: Option<Value>,
) -> Mock<'a> {
    let alias = alias.to_string();
    let resource_type = resource_type.to_string();
    fasit
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/scopedresource")
                .query_param("alias", alias)
                .query_param("type", resource_type);
            match resource {
                Some(body) => {
                    then.status(200).json_body(body);
                }
                None => {
                    then.status(404).body("not found");
                }
            }
        })
        .await
}

pub async fn mock_secret<'a>(fasit: &'a MockServer, id: &str, value: &str) -> Mock<'a> {
    let path = format!("/api/v2/secrets/{}", id);
    let value = value.to_string();
    fasit
        .mock_async(|when, then| {
            when.method(GET).path(path).header_exists("Authorization");
            then.status(200).body(value);
        })
        .await
}

pub fn secret_ref(fasit: &MockServer, id: &str) -> Value {
    json!({"ref": fasit.url(format!("/api/v2/secrets/{}", id))})
}
