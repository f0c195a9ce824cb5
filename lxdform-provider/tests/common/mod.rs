//! Shared setup: a provider wired to an in-memory daemon.

#![allow(dead_code)]

use std::sync::Arc;

use lxdform_client::test_util::{MemoryConnector, MemoryDaemon};
use lxdform_client::{InstanceServer, Transport};
use lxdform_provider::Provider;
use lxdform_provider::plan::PlanResult;
use serde_json::{Value, json};
use tempfile::TempDir;

pub struct Harness {
    pub daemon: Arc<MemoryDaemon>,
    pub connector: Arc<MemoryConnector>,
    pub provider: Provider,
    pub dir: TempDir,
}

/// Provider configured with a single unix remote `local`.
pub async fn harness() -> Harness {
    harness_with(json!({
        "generate_client_certificates": false,
        "remote": [{"name": "local", "scheme": "unix", "default": true}],
    }))
    .await
}

/// Provider configured with `config`, `config_dir` pointing at a fresh
/// temporary directory.
pub async fn harness_with(mut config: Value) -> Harness {
    let daemon = Arc::new(MemoryDaemon::new());
    let connector = Arc::new(MemoryConnector::new(daemon.clone()));
    let dir = tempfile::tempdir().unwrap();

    config["config_dir"] = json!(dir.path().display().to_string());
    let provider = Provider::new()
        .with_connector(connector.clone())
        .with_env(|_| None);
    let diags = provider.configure(config).await;
    assert!(!diags.has_error(), "configure failed: {}", diags);

    Harness {
        daemon,
        connector,
        provider,
        dir,
    }
}

impl Harness {
    /// Client talking straight to the daemon, bypassing the provider.
    pub fn server(&self) -> InstanceServer {
        let transport: Arc<dyn Transport> = self.daemon.clone();
        InstanceServer::new(transport)
    }

    pub async fn plan(&self, type_name: &str, prior: Option<&Value>, config: Value) -> PlanResult {
        self.provider
            .plan(type_name, prior.cloned(), Some(config))
            .await
            .unwrap_or_else(|d| panic!("plan {} failed: {}", type_name, d))
    }

    /// Plans and creates a resource, returning its state.
    pub async fn create(&self, type_name: &str, config: Value) -> Value {
        let plan = self.plan(type_name, None, config).await;
        self.provider
            .create(type_name, plan.planned.unwrap())
            .await
            .unwrap_or_else(|d| panic!("create {} failed: {}", type_name, d))
            .expect("resource missing after create")
    }

    /// Plans an in-place change against `state` and applies it.
    pub async fn update(&self, type_name: &str, state: &Value, config: Value) -> Value {
        let plan = self.plan(type_name, Some(state), config).await;
        assert!(
            plan.requires_replace.is_empty(),
            "unexpected replace: {:?}",
            plan.requires_replace
        );
        self.provider
            .update(type_name, plan.planned.unwrap(), state.clone())
            .await
            .unwrap_or_else(|d| panic!("update {} failed: {}", type_name, d))
            .expect("resource missing after update")
    }

    pub async fn read(&self, type_name: &str, state: &Value) -> Option<Value> {
        self.provider
            .read(type_name, state.clone())
            .await
            .unwrap_or_else(|d| panic!("read {} failed: {}", type_name, d))
    }
}

pub fn config_map(value: &Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default()
}
