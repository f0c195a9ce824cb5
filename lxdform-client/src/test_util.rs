//! In-memory daemon for tests.
//!
//! [`MemoryDaemon`] implements [`Transport`] and answers the subset of the
//! REST API the provider uses: objects live in a map keyed by project and
//! path, every object carries an ETag derived from its content, writes with a
//! stale ETag fail with 412, and a few endpoints (operations, certificates,
//! cluster members) get dedicated handling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hyper::body::Bytes;
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::api::{ConfigMap, Operation, OPERATION_RUNNING, OPERATION_SUCCESS, Server};
use crate::cert;
use crate::error::Result;
use crate::transport::{Connector, Endpoint, Method, RawResponse, Request, TlsConfig, Transport};

/// A call the daemon received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub project: String,
    pub target: String,
    pub etag: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug)]
struct Failure {
    method: Method,
    path: String,
    status: u16,
    message: String,
    remaining: usize,
}

#[derive(Debug, Default)]
struct State {
    server: Server,
    objects: BTreeMap<(String, String), Value>,
    computed: Vec<(String, ConfigMap)>,
    operations: BTreeMap<String, Operation>,
    members: Vec<String>,
    secrets: Vec<String>,
    failures: Vec<Failure>,
    after_read: Vec<((String, String), Value)>,
    calls: Vec<RecordedCall>,
}

/// In-memory stand-in for a daemon.
#[derive(Debug)]
pub struct MemoryDaemon {
    name: String,
    state: Mutex<State>,
}

fn etag_of(value: &Value) -> String {
    let digest = Sha256::digest(value.to_string().as_bytes());
    hex::encode(&digest[..8])
}

fn split_query(path: &str) -> (String, BTreeMap<String, String>) {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path, ""),
    };
    let params = query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), unescape(v)))
        .collect();
    (unescape_path(path), params)
}

fn unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn unescape_path(path: &str) -> String {
    path.split('/').map(unescape).collect::<Vec<_>>().join("/")
}

fn sync(metadata: Value) -> Value {
    json!({"type": "sync", "status": "Success", "status_code": 200, "metadata": metadata})
}

fn error(status: u16, message: &str) -> (u16, Value) {
    (
        status,
        json!({"type": "error", "error": message, "error_code": status, "metadata": null}),
    )
}

/// Key field the daemon uses to name members of a collection.
fn key_field(collection: &str) -> &'static str {
    if collection.ends_with("/forwards") || collection.ends_with("/load-balancers") {
        "listen_address"
    } else {
        "name"
    }
}

impl Default for MemoryDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDaemon {
    /// A trusted, standalone daemon reporting version 5.21.
    pub fn new() -> Self {
        let server = Server {
            api_extensions: vec![
                "network_peer".to_string(),
                "storage_buckets".to_string(),
                "explicit_trust_token".to_string(),
                "clustering_groups".to_string(),
            ],
            api_status: "stable".to_string(),
            api_version: "1.0".to_string(),
            auth: "trusted".to_string(),
            auth_methods: vec!["tls".to_string()],
            public: false,
            environment: crate::api::ServerEnvironment {
                server: "lxd".to_string(),
                server_name: "memory".to_string(),
                server_version: "5.21".to_string(),
                addresses: vec!["127.0.0.1:8443".to_string()],
                ..Default::default()
            },
        };
        Self {
            name: "memory".to_string(),
            state: Mutex::new(State {
                server,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replaces the `GET /1.0` answer.
    pub fn set_server(&self, server: Server) {
        self.lock().server = server;
    }

    pub fn server(&self) -> Server {
        self.lock().server.clone()
    }

    /// Makes the daemon untrusted until one of `secrets` is presented.
    pub fn require_trust(&self, secrets: &[&str]) {
        let mut state = self.lock();
        state.server.auth = "untrusted".to_string();
        state.server.environment.server_version = String::new();
        state.secrets = secrets.iter().map(|s| s.to_string()).collect();
    }

    /// Config keys the daemon fills in on creation for objects posted to `collection`.
    pub fn set_computed_config(&self, collection: &str, config: &[(&str, &str)]) {
        let map = config
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.lock().computed.push((collection.to_string(), map));
    }

    pub fn set_cluster_members(&self, members: &[&str]) {
        let mut state = self.lock();
        state.members = members.iter().map(|m| m.to_string()).collect();
        state.server.environment.server_clustered = !members.is_empty();
    }

    /// Fails the next `count` calls of `method` on `path` with `status`.
    pub fn fail_next(&self, method: Method, path: &str, status: u16, message: &str, count: usize) {
        self.lock().failures.push(Failure {
            method,
            path: path.to_string(),
            status,
            message: message.to_string(),
            remaining: count,
        });
    }

    pub fn insert(&self, project: &str, path: &str, value: Value) {
        self.lock()
            .objects
            .insert((project.to_string(), path.to_string()), value);
    }

    pub fn object(&self, project: &str, path: &str) -> Option<Value> {
        self.lock()
            .objects
            .get(&(project.to_string(), path.to_string()))
            .cloned()
    }

    /// Mutates a stored object in place, as the daemon would on its own.
    pub fn mutate(&self, project: &str, path: &str, f: impl FnOnce(&mut Value)) {
        if let Some(v) = self
            .lock()
            .objects
            .get_mut(&(project.to_string(), path.to_string()))
        {
            f(v);
        }
    }

    /// Merges `patch` into an object right after its next read, as a
    /// concurrent writer would. A write carrying that read's ETag gets 412.
    pub fn patch_after_next_read(&self, project: &str, path: &str, patch: Value) {
        self.lock()
            .after_read
            .push(((project.to_string(), path.to_string()), patch));
    }

    pub fn remove(&self, project: &str, path: &str) {
        self.lock()
            .objects
            .remove(&(project.to_string(), path.to_string()));
    }

    pub fn operation(&self, id: &str) -> Option<Operation> {
        self.lock().operations.get(id).cloned()
    }

    /// Drops an operation, as if it expired.
    pub fn expire_operation(&self, id: &str) {
        self.lock().operations.remove(id);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls other than reads.
    pub fn writes(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != Method::Get)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn handle(&self, request: &Request) -> (u16, Value, Option<String>) {
        let (path, params) = split_query(&request.path);
        let project = params
            .get("project")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let target = params.get("target").cloned().unwrap_or_default();

        let mut state = self.lock();
        state.calls.push(RecordedCall {
            method: request.method,
            path: path.clone(),
            project: project.clone(),
            target,
            etag: request.etag.clone(),
            body: request.body.clone(),
        });

        if let Some(idx) = state
            .failures
            .iter()
            .position(|f| f.method == request.method && f.path == path && f.remaining > 0)
        {
            let failure = &mut state.failures[idx];
            failure.remaining -= 1;
            let (status, body) = error(failure.status, &failure.message.clone());
            return (status, body, None);
        }

        let body = request.body.clone().unwrap_or(Value::Null);

        match (request.method, path.as_str()) {
            (Method::Get, "/1.0") => {
                let value = serde_json::to_value(&state.server).unwrap_or(Value::Null);
                let etag = etag_of(&value);
                (200, sync(value), Some(etag))
            }
            (Method::Get, "/1.0/operations") => {
                let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for op in state.operations.values() {
                    let group = if op.is_running() { "running" } else { "success" };
                    grouped
                        .entry(group.to_string())
                        .or_default()
                        .push(serde_json::to_value(op).unwrap_or(Value::Null));
                }
                (200, sync(json!(grouped)), None)
            }
            (Method::Get, "/1.0/cluster/members") => {
                if state.members.is_empty() {
                    let (s, b) = error(400, "Server isn't part of a cluster");
                    return (s, b, None);
                }
                let members: Vec<Value> = state
                    .members
                    .iter()
                    .map(|m| json!({"server_name": m, "status": "Online"}))
                    .collect();
                (200, sync(json!(members)), None)
            }
            (Method::Post, "/1.0/certificates") => {
                Self::post_certificate(&mut state, &project, body)
            }
            (_, p) if p.starts_with("/1.0/operations/") => {
                let rest = &p["/1.0/operations/".len()..];
                let id = rest.trim_end_matches("/wait").to_string();
                match (request.method, state.operations.get(&id).cloned()) {
                    (_, None) => {
                        let (s, b) = error(404, "Operation not found");
                        (s, b, None)
                    }
                    (Method::Delete, Some(_)) => {
                        state.operations.remove(&id);
                        (200, sync(Value::Null), None)
                    }
                    (_, Some(op)) => {
                        (200, sync(serde_json::to_value(op).unwrap_or(Value::Null)), None)
                    }
                }
            }
            (Method::Get, _) => {
                let key = (project.clone(), path.clone());
                let Some(value) = state.objects.get(&key).cloned() else {
                    let (s, b) = error(404, "Not found");
                    return (s, b, None);
                };
                let etag = etag_of(&value);
                if let Some(idx) = state.after_read.iter().position(|(k, _)| *k == key) {
                    let (_, patch) = state.after_read.remove(idx);
                    if let (Some(dst), Value::Object(src)) =
                        (state.objects.get_mut(&key).and_then(Value::as_object_mut), patch)
                    {
                        dst.extend(src);
                    }
                }
                (200, sync(value), Some(etag))
            }
            (Method::Post, _) => Self::post_object(&mut state, &project, &path, body),
            (Method::Put, _) => {
                let key = (project.clone(), path.clone());
                let Some(current) = state.objects.get(&key).cloned() else {
                    let (s, b) = error(404, "Not found");
                    return (s, b, None);
                };
                if let Some(etag) = &request.etag
                    && *etag != etag_of(&current)
                {
                    let (s, b) = error(412, "ETag doesn't match");
                    return (s, b, None);
                }
                let mut updated = current;
                if let (Some(dst), Value::Object(src)) = (updated.as_object_mut(), body) {
                    for (k, v) in src {
                        dst.insert(k, v);
                    }
                }
                state.objects.insert(key, updated);
                (200, sync(Value::Null), None)
            }
            (Method::Delete, _) => {
                let key = (project.clone(), path.clone());
                if state.objects.remove(&key).is_none() {
                    let (s, b) = error(404, "Not found");
                    return (s, b, None);
                }
                let prefix = format!("{}/", path);
                state
                    .objects
                    .retain(|(p, k), _| !(p == &project && k.starts_with(&prefix)));
                (200, sync(Value::Null), None)
            }
            (Method::Patch, _) => {
                let (s, b) = error(501, "PATCH not supported");
                (s, b, None)
            }
        }
    }

    fn post_object(
        state: &mut State,
        project: &str,
        collection: &str,
        mut body: Value,
    ) -> (u16, Value, Option<String>) {
        let key_name = key_field(collection);
        let Some(name) = body.get(key_name).and_then(|v| v.as_str()).map(str::to_string) else {
            let (s, b) = error(400, "No name provided");
            return (s, b, None);
        };

        // Nested collections need their parent object.
        let parent = collection.rsplit_once('/').map(|(p, _)| p.to_string());
        if let Some(parent) = &parent {
            let segments = parent.split('/').filter(|s| !s.is_empty()).count();
            let parent = if collection.contains("/volumes/") {
                parent.trim_end_matches("/volumes").to_string()
            } else {
                parent.clone()
            };
            let parent_key = (project.to_string(), parent.clone());
            if segments >= 3 && !state.objects.contains_key(&parent_key) {
                let (s, b) = error(404, "Parent not found");
                return (s, b, None);
            }
        }

        let path = format!("{}/{}", collection, name);
        let key = (project.to_string(), path.clone());
        if state.objects.contains_key(&key) {
            let (s, b) = error(409, "already exists");
            return (s, b, None);
        }

        if let Some(obj) = body.as_object_mut() {
            let computed: Vec<ConfigMap> = state
                .computed
                .iter()
                .filter(|(c, _)| c == collection)
                .map(|(_, m)| m.clone())
                .collect();
            let config = obj
                .entry("config")
                .or_insert_with(|| json!({}));
            if let Some(config) = config.as_object_mut() {
                for map in computed {
                    for (k, v) in map {
                        config.entry(k).or_insert(Value::String(v));
                    }
                }
            }
            if collection.ends_with("/keys") {
                for field in ["access_key", "secret_key"] {
                    let empty = obj.get(field).and_then(|v| v.as_str()).is_none_or(str::is_empty);
                    if empty {
                        let suffix = uuid::Uuid::new_v4().simple().to_string();
                        obj.insert(
                            field.to_string(),
                            Value::String(format!("{}-{}", field, &suffix[..12])),
                        );
                    }
                }
            }
            if collection == "/1.0/storage-pools"
                || collection.contains("/volumes/")
                || collection.ends_with("/peers")
            {
                obj.entry("status").or_insert(json!("Created"));
            }
        }

        state.objects.insert(key, body.clone());

        // Volume creation runs as a background operation.
        if collection.contains("/volumes/") {
            let id = uuid::Uuid::new_v4().to_string();
            let op = Operation {
                id: id.clone(),
                class: "task".to_string(),
                status: "Success".to_string(),
                status_code: OPERATION_SUCCESS,
                ..Default::default()
            };
            state.operations.insert(id.clone(), op.clone());
            return (
                202,
                json!({
                    "type": "async",
                    "status": "Operation created",
                    "status_code": 100,
                    "operation": format!("/1.0/operations/{}", id),
                    "metadata": op,
                }),
                None,
            );
        }

        if collection.ends_with("/keys") {
            return (200, sync(body), None);
        }
        (200, sync(Value::Null), None)
    }

    fn post_certificate(
        state: &mut State,
        project: &str,
        body: Value,
    ) -> (u16, Value, Option<String>) {
        let field = |k: &str| {
            body.get(k)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        // Client asking to be trusted.
        let secret = if !field("trust_token").is_empty() {
            field("trust_token")
        } else {
            field("password")
        };
        if !secret.is_empty() {
            if state.secrets.iter().any(|s| *s == secret) {
                state.server.auth = "trusted".to_string();
                state.server.environment.server_version = "5.21".to_string();
                return (200, sync(Value::Null), None);
            }
            let (s, b) = error(403, "not authorized");
            return (s, b, None);
        }

        if body.get("token").and_then(|v| v.as_bool()).unwrap_or(false) {
            let id = uuid::Uuid::new_v4().to_string();
            let expires = chrono::Utc::now() + chrono::Duration::hours(24);
            let mut request = body.clone();
            if let Some(obj) = request.as_object_mut() {
                obj.remove("token");
            }
            let metadata = json!({
                "request": request,
                "fingerprint": "0123456789abcdef",
                "addresses": state.server.environment.addresses,
                "secret": uuid::Uuid::new_v4().simple().to_string(),
                "expiresAt": expires.to_rfc3339(),
            });
            let op = Operation {
                id: id.clone(),
                class: "token".to_string(),
                description: "Generating trust token".to_string(),
                created_at: Some(chrono::Utc::now()),
                status: "Running".to_string(),
                status_code: OPERATION_RUNNING,
                metadata: metadata.as_object().cloned(),
                may_cancel: true,
                ..Default::default()
            };
            state.operations.insert(id.clone(), op.clone());
            return (
                202,
                json!({
                    "type": "async",
                    "status": "Operation created",
                    "status_code": 100,
                    "operation": format!("/1.0/operations/{}", id),
                    "metadata": op,
                }),
                None,
            );
        }

        let encoded = field("certificate");
        let pem = match base64_to_pem(&encoded) {
            Some(pem) => pem,
            None => {
                let (s, b) = error(400, "Invalid certificate material");
                return (s, b, None);
            }
        };
        let fingerprint = match cert::fingerprint_pem(&pem) {
            Ok(f) => f,
            Err(_) => {
                let (s, b) = error(400, "Invalid certificate material");
                return (s, b, None);
            }
        };
        let key = (project.to_string(), format!("/1.0/certificates/{}", fingerprint));
        if state.objects.contains_key(&key) {
            let (s, b) = error(409, "Certificate already in trust store");
            return (s, b, None);
        }
        let kind = match field("type") {
            k if k.is_empty() => "client".to_string(),
            k => k,
        };
        state.objects.insert(
            key,
            json!({
                "fingerprint": fingerprint,
                "name": field("name"),
                "type": kind,
                "restricted": body.get("restricted").cloned().unwrap_or(json!(false)),
                "projects": body.get("projects").cloned().unwrap_or(json!([])),
                "certificate": pem,
                "description": field("description"),
            }),
        );
        (200, sync(Value::Null), None)
    }
}

fn base64_to_pem(encoded: &str) -> Option<String> {
    use base64::Engine;
    let der = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    if der.is_empty() {
        return None;
    }
    Some(cert::der_to_pem(&der))
}

#[async_trait]
impl Transport for MemoryDaemon {
    async fn send(&self, request: Request) -> Result<RawResponse> {
        let (status, body, etag) = self.handle(&request);
        Ok(RawResponse {
            status,
            etag,
            body: Bytes::from(body.to_string()),
        })
    }

    fn endpoint(&self) -> String {
        format!("memory://{}", self.name)
    }
}

/// [`Connector`] handing out in-memory daemons.
///
/// Every endpoint maps to the fallback daemon unless routed elsewhere.
#[derive(Debug)]
pub struct MemoryConnector {
    fallback: Arc<MemoryDaemon>,
    routes: Mutex<BTreeMap<String, Arc<MemoryDaemon>>>,
    server_certificate: String,
    connects: AtomicUsize,
    fetches: AtomicUsize,
    tls: Mutex<Vec<TlsConfig>>,
}

impl MemoryConnector {
    pub fn new(fallback: Arc<MemoryDaemon>) -> Self {
        Self {
            fallback,
            routes: Mutex::new(BTreeMap::new()),
            server_certificate: cert::der_to_pem(b"memory-daemon-certificate"),
            connects: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            tls: Mutex::new(Vec::new()),
        }
    }

    /// Serves `endpoint` (as in [`Endpoint::url`]) from `daemon`.
    pub fn route(&self, endpoint: &str, daemon: Arc<MemoryDaemon>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(endpoint.to_string(), daemon);
        }
    }

    /// PEM certificate returned by [`Connector::fetch_server_certificate`].
    pub fn server_certificate(&self) -> &str {
        &self.server_certificate
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// TLS settings of every connection opened so far.
    pub fn tls_configs(&self) -> Vec<TlsConfig> {
        self.tls.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint, tls: &TlsConfig) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut configs) = self.tls.lock() {
            configs.push(tls.clone());
        }
        let routed = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&endpoint.url()).cloned());
        let daemon: Arc<dyn Transport> = routed.unwrap_or_else(|| self.fallback.clone());
        Ok(daemon)
    }

    async fn fetch_server_certificate(&self, _endpoint: &Endpoint) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.server_certificate.clone())
    }
}
