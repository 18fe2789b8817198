//! ClearML REST client
//!
//! Speaks the ClearML apiserver JSON protocol directly: `auth.login` for a
//! bearer token, then `projects.*`, `tasks.*`, `events.add_batch` and
//! `models.*` calls. Weights go to the file server when one is configured.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::ClearMlConfig;
use crate::training::Hyperparameters;
use super::ExperimentTracker;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MODEL_TAGS: [&str; 2] = ["trained", "production-ready"];
/// Iteration ClearML uses for single-value (summary) scalars
const SINGLE_VALUE_ITER: i64 = -(1 << 31);

#[derive(Error, Debug)]
enum TrackingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} failed ({code}): {message}")]
    Api {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Unexpected response from {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracking is not configured")]
    Disabled,
}

type TrackingResult<T> = std::result::Result<T, TrackingError>;

/// Experiment tracker backed by a ClearML server
pub struct ClearMlTracker {
    client: Option<Client>,
    config: ClearMlConfig,
    cache_dir: PathBuf,
    token: Mutex<Option<String>>,
    project_id: Mutex<Option<String>>,
}

impl std::fmt::Debug for ClearMlTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClearMlTracker")
            .field("api_host", &self.config.api_host)
            .field("project", &self.config.project)
            .field("enabled", &self.enabled())
            .finish()
    }
}

impl ClearMlTracker {
    /// Enabled only with a complete credential set and a working HTTP client.
    /// Fetched weights are cached under `cache_dir`.
    pub fn new(config: &ClearMlConfig, cache_dir: impl Into<PathBuf>) -> Self {
        let client = if config.is_complete() {
            match Client::builder().timeout(HTTP_TIMEOUT).build() {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not build ClearML HTTP client");
                    None
                }
            }
        } else {
            None
        };

        if client.is_some() {
            tracing::info!(api_host = ?config.api_host, project = %config.project, "ClearML tracking enabled");
        } else {
            tracing::warn!("ClearML tracking disabled");
        }

        Self {
            client,
            config: config.clone(),
            cache_dir: cache_dir.into(),
            token: Mutex::new(None),
            project_id: Mutex::new(None),
        }
    }

    fn client(&self) -> TrackingResult<&Client> {
        self.client.as_ref().ok_or(TrackingError::Disabled)
    }

    fn api_url(&self, endpoint: &str) -> TrackingResult<String> {
        let host = self.config.api_host.as_deref().ok_or(TrackingError::Disabled)?;
        Ok(format!("{}/{}", host.trim_end_matches('/'), endpoint))
    }

    fn token(&self) -> TrackingResult<String> {
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let response = self
            .client()?
            .post(self.api_url("auth.login")?)
            .basic_auth(
                self.config.access_key.as_deref().unwrap_or_default(),
                self.config.secret_key.as_deref(),
            )
            .json(&json!({}))
            .send()?;
        let data = unwrap_response("auth.login", response)?;
        let token = data["token"]
            .as_str()
            .ok_or_else(|| TrackingError::Malformed("auth.login".into()))?
            .to_string();
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Bearer-authenticated POST. A 401 drops the cached token and the
    /// request goes out once more after a fresh login.
    fn send(
        &self,
        endpoint: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> TrackingResult<Value> {
        let url = self.api_url(endpoint)?;
        let mut relogged = false;
        loop {
            let token = self.token()?;
            let response = build(self.client()?.post(&url).bearer_auth(token)).send()?;
            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                *self.token.lock() = None;
                if !relogged {
                    tracing::debug!(endpoint = %endpoint, "ClearML token rejected, logging in again");
                    relogged = true;
                    continue;
                }
            }
            return unwrap_response(endpoint, response);
        }
    }

    fn call(&self, endpoint: &str, body: Value) -> TrackingResult<Value> {
        self.send(endpoint, |req| req.json(&body))
    }

    fn project_id(&self) -> TrackingResult<String> {
        let mut cached = self.project_id.lock();
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let name = self.config.project.as_str();
        let found = self.call("projects.get_all", json!({ "name": name, "only_fields": ["id", "name"] }))?;
        let existing = found["projects"]
            .as_array()
            .and_then(|projects| projects.iter().find(|p| p["name"] == name))
            .and_then(|p| p["id"].as_str())
            .map(str::to_string);

        let id = match existing {
            Some(id) => id,
            None => {
                let created = self.call(
                    "projects.create",
                    json!({ "name": name, "description": "Models trained by modelhub" }),
                )?;
                string_field(&created, "id", "projects.create")?
            }
        };
        *cached = Some(id.clone());
        Ok(id)
    }

    fn try_create_run(&self, run_name: &str, model_type: &str, hyperparameters: &Hyperparameters) -> TrackingResult<String> {
        let project = self.project_id()?;
        let created = self.call(
            "tasks.create",
            json!({
                "name": run_name,
                "project": project,
                "type": "training",
                "hyperparams": hyperparams_section(model_type, hyperparameters),
            }),
        )?;
        let task_id = string_field(&created, "id", "tasks.create")?;
        self.call("tasks.started", json!({ "task": task_id }))?;
        Ok(task_id)
    }

    fn add_events(&self, events: &[Value]) -> TrackingResult<()> {
        let body = events
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        self.send("events.add_batch", |req| {
            req.header(reqwest::header::CONTENT_TYPE, "application/json-lines").body(body.clone())
        })?;
        Ok(())
    }

    /// Upload weights and return the URI the model is registered under.
    fn store_weights(&self, path: &Path, model_name: &str) -> TrackingResult<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TrackingError::Malformed(path.display().to_string()))?;

        match self.config.files_host.as_deref() {
            Some(files_host) => {
                let folder = format!(
                    "{}/{}/{}",
                    files_host.trim_end_matches('/'),
                    self.config.project,
                    model_name
                );
                let form = multipart::Form::new().file(file_name.clone(), path)?;
                let response = self
                    .client()?
                    .post(&folder)
                    .bearer_auth(self.token()?)
                    .multipart(form)
                    .send()?;
                if !response.status().is_success() {
                    return Err(TrackingError::Api {
                        endpoint: folder,
                        code: response.status().as_u16() as i64,
                        message: response.text().unwrap_or_default(),
                    });
                }
                Ok(format!("{}/{}", folder, file_name))
            }
            None => {
                let absolute = std::fs::canonicalize(path)?;
                Ok(format!("file://{}", absolute.display()))
            }
        }
    }

    fn try_upload(
        &self,
        run_id: &str,
        path: &Path,
        model_name: &str,
        metadata: &BTreeMap<String, Value>,
    ) -> TrackingResult<String> {
        let uri = self.store_weights(path, model_name)?;
        let project = self.project_id()?;
        let created = self.call(
            "models.create",
            json!({
                "uri": uri,
                "name": model_name,
                "comment": format!("Trained in task {}. Weights: {}", run_id, uri),
                "tags": MODEL_TAGS,
                "task": run_id,
                "project": project,
                "framework": "modelhub",
                "ready": true,
            }),
        )?;
        let model_id = string_field(&created, "id", "models.create")?;

        if !metadata.is_empty() {
            let items: Vec<Value> = metadata
                .iter()
                .map(|(key, value)| json!({ "key": key, "type": "str", "value": scalar_string(value) }))
                .collect();
            self.call(
                "models.add_or_update_metadata",
                json!({ "model": model_id, "metadata": items }),
            )?;
        }
        tracing::info!(model = %model_name, model_id = %model_id, uri = %uri, "Model registered in ClearML");
        Ok(model_id)
    }

    fn try_fetch(&self, model_name: &str) -> TrackingResult<PathBuf> {
        let found = self.call(
            "models.get_all",
            json!({
                "name": model_name,
                "order_by": ["-created"],
                "page": 0,
                "page_size": 1,
                "only_fields": ["id", "name", "uri"],
            }),
        )?;
        let uri = found["models"]
            .as_array()
            .and_then(|models| models.iter().find(|m| m["name"] == model_name))
            .and_then(|m| m["uri"].as_str())
            .ok_or_else(|| TrackingError::Malformed(format!("models.get_all: no model named '{}'", model_name)))?
            .to_string();

        if let Some(local) = uri.strip_prefix("file://") {
            let path = PathBuf::from(local);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(TrackingError::Malformed(format!("registered file {} is missing", local)))
            };
        }

        let file_name = uri
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("weights.model")
            .to_string();
        let response = self.client()?.get(&uri).bearer_auth(self.token()?).send()?;
        if !response.status().is_success() {
            return Err(TrackingError::Api {
                endpoint: uri,
                code: response.status().as_u16() as i64,
                message: "download failed".into(),
            });
        }
        let bytes = response.bytes()?;

        let dir = self.cache_dir.join(model_name);
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(file_name);
        std::fs::write(&target, &bytes)?;
        Ok(target)
    }
}

fn unwrap_response(endpoint: &str, response: reqwest::blocking::Response) -> TrackingResult<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|_| TrackingError::Malformed(format!("{} (HTTP {})", endpoint, status)))?;
    let code = body["meta"]["result_code"].as_i64().unwrap_or(status.as_u16() as i64);
    if !status.is_success() || code != 200 {
        return Err(TrackingError::Api {
            endpoint: endpoint.to_string(),
            code,
            message: body["meta"]["result_msg"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(body["data"].clone())
}

fn string_field(data: &Value, key: &str, endpoint: &str) -> TrackingResult<String> {
    data[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TrackingError::Malformed(endpoint.to_string()))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn hyperparams_section(model_type: &str, hyperparameters: &Hyperparameters) -> Value {
    let param = |name: &str, value: String| {
        json!({ "section": "General", "name": name, "value": value })
    };
    let mut general = Map::new();
    for (name, value) in hyperparameters {
        general.insert(name.clone(), param(name, scalar_string(value)));
    }
    general.insert("model_type".into(), param("model_type", model_type.to_string()));
    json!({ "General": general })
}

fn scalar_events(run_id: &str, metrics: &BTreeMap<String, f64>, iteration: Option<u64>) -> Vec<Value> {
    let timestamp = Utc::now().timestamp_millis();
    let (metric, iter) = match iteration {
        Some(i) => ("Metrics", i as i64),
        None => ("Summary", SINGLE_VALUE_ITER),
    };
    metrics
        .iter()
        .map(|(name, value)| {
            json!({
                "type": "training_stats_scalar",
                "task": run_id,
                "metric": metric,
                "variant": name,
                "value": value,
                "iter": iter,
                "timestamp": timestamp,
            })
        })
        .collect()
}

fn log_event(run_id: &str, message: &str, iteration: Option<u64>) -> Value {
    let msg = match iteration {
        Some(i) => format!("[Iteration {}] {}", i, message),
        None => message.to_string(),
    };
    json!({
        "type": "log",
        "task": run_id,
        "level": "info",
        "worker": "modelhub",
        "msg": msg,
        "timestamp": Utc::now().timestamp_millis(),
    })
}

impl ExperimentTracker for ClearMlTracker {
    fn enabled(&self) -> bool {
        self.client.is_some()
    }

    fn create_run(&self, run_name: &str, model_type: &str, hyperparameters: &Hyperparameters) -> Option<String> {
        if !self.enabled() {
            return None;
        }
        match self.try_create_run(run_name, model_type, hyperparameters) {
            Ok(id) => {
                tracing::info!(run = %run_name, task_id = %id, "ClearML task created");
                Some(id)
            }
            Err(e) => {
                tracing::error!(run = %run_name, error = %e, "Could not create ClearML task");
                None
            }
        }
    }

    fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>, iteration: Option<u64>) {
        if !self.enabled() || metrics.is_empty() {
            return;
        }
        match self.add_events(&scalar_events(run_id, metrics, iteration)) {
            Ok(()) => tracing::info!(task_id = %run_id, ?iteration, "Metrics logged to ClearML"),
            Err(e) => tracing::error!(task_id = %run_id, error = %e, "Could not log metrics to ClearML"),
        }
    }

    fn log_progress(&self, run_id: &str, message: &str, iteration: Option<u64>) {
        if !self.enabled() {
            return;
        }
        if let Err(e) = self.add_events(&[log_event(run_id, message, iteration)]) {
            tracing::error!(task_id = %run_id, error = %e, "Could not log progress to ClearML");
        }
    }

    fn upload_artifact(
        &self,
        run_id: &str,
        path: &Path,
        model_name: &str,
        metadata: &BTreeMap<String, Value>,
    ) -> Option<String> {
        if !self.enabled() {
            return None;
        }
        match self.try_upload(run_id, path, model_name, metadata) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(model = %model_name, error = %e, "Could not upload model to ClearML");
                None
            }
        }
    }

    fn fetch_artifact(&self, model_name: &str) -> Option<PathBuf> {
        if !self.enabled() {
            return None;
        }
        match self.try_fetch(model_name) {
            Ok(path) => {
                tracing::info!(model = %model_name, path = %path.display(), "Model fetched from ClearML");
                Some(path)
            }
            Err(e) => {
                tracing::error!(model = %model_name, error = %e, "Could not fetch model from ClearML");
                None
            }
        }
    }

    fn close_run(&self, run_id: &str) {
        if !self.enabled() {
            return;
        }
        if let Err(e) = self.call("tasks.completed", json!({ "task": run_id, "force": true })) {
            tracing::error!(task_id = %run_id, error = %e, "Could not close ClearML task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    /// Minimal apiserver: numbered tokens from `auth.login`, `projects.get_all`
    /// refusing tokens for which `reject` holds
    struct FakeApi {
        logins: AtomicUsize,
        reject: fn(&str) -> bool,
    }

    async fn login(State(api): State<Arc<FakeApi>>) -> Json<Value> {
        let n = api.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({ "meta": { "result_code": 200 }, "data": { "token": format!("t{}", n) } }))
    }

    async fn projects(
        State(api): State<Arc<FakeApi>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_start_matches("Bearer ");
        if (api.reject)(token) {
            let meta = json!({ "meta": { "result_code": 401, "result_msg": "Invalid token" } });
            return (StatusCode::UNAUTHORIZED, Json(meta));
        }
        let data = json!({ "projects": [{ "id": "p1", "name": body["name"] }] });
        (StatusCode::OK, Json(json!({ "meta": { "result_code": 200 }, "data": data })))
    }

    fn fake_api(reject: fn(&str) -> bool) -> (ClearMlTracker, Arc<FakeApi>) {
        let api = Arc::new(FakeApi { logins: AtomicUsize::new(0), reject });
        let app = Router::new()
            .route("/auth.login", post(login))
            .route("/projects.get_all", post(projects))
            .with_state(api.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        let config = ClearMlConfig {
            api_host: Some(format!("http://{}", addr)),
            access_key: Some("key".into()),
            secret_key: Some("secret".into()),
            ..Default::default()
        };
        (ClearMlTracker::new(&config, std::env::temp_dir()), api)
    }

    #[test]
    fn test_expired_token_is_renewed_once() {
        let (tracker, api) = fake_api(|token| token == "t1");
        assert_eq!(tracker.project_id().unwrap(), "p1");
        assert_eq!(api.logins.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.token.lock().as_deref(), Some("t2"));
    }

    #[test]
    fn test_second_unauthorized_gives_up() {
        let (tracker, api) = fake_api(|_| true);
        match tracker.project_id() {
            Err(TrackingError::Api { code, .. }) => assert_eq!(code, 401),
            other => panic!("expected an API error, got {:?}", other),
        }
        assert_eq!(api.logins.load(Ordering::SeqCst), 2);
        assert!(tracker.token.lock().is_none());
    }

    #[test]
    fn test_incomplete_credentials_disable() {
        let config = ClearMlConfig {
            api_host: Some("http://127.0.0.1:9".into()),
            access_key: Some("key".into()),
            ..Default::default()
        };
        let tracker = ClearMlTracker::new(&config, std::env::temp_dir());
        assert!(!tracker.enabled());
        assert!(tracker.create_run("r", "RandomForest", &Hyperparameters::new()).is_none());
        assert!(tracker.fetch_artifact("r").is_none());
    }

    #[test]
    fn test_unreachable_server_is_swallowed() {
        let config = ClearMlConfig {
            api_host: Some("http://127.0.0.1:9".into()),
            access_key: Some("key".into()),
            secret_key: Some("secret".into()),
            ..Default::default()
        };
        let tracker = ClearMlTracker::new(&config, std::env::temp_dir());
        assert!(tracker.enabled());
        assert!(tracker.create_run("r", "RandomForest", &Hyperparameters::new()).is_none());
        tracker.log_progress("task", "hello", None);
        tracker.close_run("task");
    }

    #[test]
    fn test_hyperparams_section() {
        let mut hp = Hyperparameters::new();
        hp.insert("max_depth".into(), Value::Null);
        hp.insert("criterion".into(), json!("gini"));
        hp.insert("n_estimators".into(), json!(10));
        let section = hyperparams_section("RandomForest", &hp);
        assert_eq!(section["General"]["max_depth"]["value"], "None");
        assert_eq!(section["General"]["criterion"]["value"], "gini");
        assert_eq!(section["General"]["n_estimators"]["value"], "10");
        assert_eq!(section["General"]["model_type"]["value"], "RandomForest");
    }

    #[test]
    fn test_events() {
        let metrics: BTreeMap<String, f64> = [("accuracy".to_string(), 0.9)].into_iter().collect();
        let summary = scalar_events("t1", &metrics, None);
        assert_eq!(summary[0]["metric"], "Summary");
        assert_eq!(summary[0]["iter"], SINGLE_VALUE_ITER);
        let series = scalar_events("t1", &metrics, Some(3));
        assert_eq!(series[0]["metric"], "Metrics");
        assert_eq!(series[0]["iter"], 3);

        assert_eq!(log_event("t1", "done", Some(2))["msg"], "[Iteration 2] done");
        assert_eq!(log_event("t1", "done", None)["msg"], "done");
    }
}
