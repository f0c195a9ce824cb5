use std::sync::Arc;

use lxdform_client::Method;
use lxdform_client::test_util::{MemoryConnector, MemoryDaemon};
use lxdform_provider::ProviderError;
use lxdform_provider::certs;
use lxdform_provider::registry::{Protocol, Registry, RemoteConfig, Scheme};
use serde_json::json;
use tempfile::TempDir;

fn https_remote(name: &str) -> RemoteConfig {
    RemoteConfig {
        name: name.to_string(),
        address: "lxd.example.org".to_string(),
        scheme: Scheme::Https,
        ..Default::default()
    }
}

/// Config dir holding a client certificate, so https bootstraps can load one.
async fn config_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(certs::client_cert_path(dir.path()), "client cert")
        .await
        .unwrap();
    tokio::fs::write(certs::client_key_path(dir.path()), "client key")
        .await
        .unwrap();
    dir
}

#[tokio::test]
async fn test_concurrent_bootstrap_authenticates_once() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.require_trust(&["secret"]);
    let connector = Arc::new(MemoryConnector::new(daemon.clone()));
    std::fs::create_dir_all(dir.path().join("servercerts")).unwrap();
    std::fs::write(dir.path().join("servercerts/prod.crt"), "pinned").unwrap();

    let registry = Registry::new(dir.path(), connector.clone());
    registry
        .add_remote(RemoteConfig {
            token: Some("secret".to_string()),
            ..https_remote("prod")
        })
        .await;

    let (a, b) = tokio::join!(
        registry.instance_server("prod", "p1", ""),
        registry.instance_server("prod", "p2", "node-2"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.project(), "p1");
    assert_eq!(b.project(), "p2");
    assert_eq!(b.target(), "node-2");

    let auths: Vec<_> = daemon
        .calls()
        .into_iter()
        .filter(|c| c.method == Method::Post && c.path == "/1.0/certificates")
        .collect();
    assert_eq!(auths.len(), 1);
    assert_eq!(auths[0].body.as_ref().unwrap()["trust_token"], "secret");
    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.fetches(), 0);
    assert_eq!(
        connector.tls_configs()[0].server_cert.as_deref(),
        Some("pinned")
    );

    // Both handles share the connection but keep their own scope.
    daemon.clear_calls();
    let _ = a.get_network("br0").await;
    let _ = b.get_network("br0").await;
    let calls = daemon.calls();
    assert_eq!(calls[0].project, "p1");
    assert_eq!(calls[1].project, "p2");
    assert_eq!(calls[1].target, "node-2");
}

#[tokio::test]
async fn test_password_authentication() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.require_trust(&["hunter2"]);
    std::fs::create_dir_all(dir.path().join("servercerts")).unwrap();
    std::fs::write(dir.path().join("servercerts/lab.crt"), "pinned").unwrap();

    let registry = Registry::new(dir.path(), Arc::new(MemoryConnector::new(daemon.clone())));
    registry
        .add_remote(RemoteConfig {
            password: Some("hunter2".to_string()),
            ..https_remote("lab")
        })
        .await;
    registry.instance_server("lab", "", "").await.unwrap();

    let auth = daemon
        .calls()
        .into_iter()
        .find(|c| c.method == Method::Post && c.path == "/1.0/certificates")
        .unwrap();
    assert_eq!(auth.body.unwrap()["password"], "hunter2");
    assert!(daemon.server().is_trusted());
}

#[tokio::test]
async fn test_password_refused_by_newer_daemons() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.require_trust(&["hunter2"]);
    let mut server = daemon.server();
    server.environment.server_version = "6.0".to_string();
    daemon.set_server(server);
    std::fs::create_dir_all(dir.path().join("servercerts")).unwrap();
    std::fs::write(dir.path().join("servercerts/lab.crt"), "pinned").unwrap();

    let registry = Registry::new(dir.path(), Arc::new(MemoryConnector::new(daemon.clone())));
    registry
        .add_remote(RemoteConfig {
            password: Some("hunter2".to_string()),
            ..https_remote("lab")
        })
        .await;
    let err = registry.instance_server("lab", "", "").await.unwrap_err();

    assert!(matches!(err, ProviderError::AuthFailed { .. }));
    assert!(daemon.writes().is_empty());
}

#[tokio::test]
async fn test_unknown_certificate_is_pinned_when_accepted() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.fail_next(Method::Get, "/1.0", 500, "x509: certificate signed by unknown authority", 1);
    let connector = Arc::new(MemoryConnector::new(daemon.clone()));

    let registry = Registry::new(dir.path(), connector.clone()).accept_remote_certificate(true);
    registry.add_remote(https_remote("lab")).await;
    registry.instance_server("lab", "", "").await.unwrap();

    assert_eq!(connector.fetches(), 1);
    assert_eq!(connector.connects(), 2);
    let pinned = std::fs::read_to_string(dir.path().join("servercerts/lab.crt")).unwrap();
    assert_eq!(pinned, connector.server_certificate());
    let last = connector.tls_configs().pop().unwrap();
    assert_eq!(last.server_cert.as_deref(), Some(connector.server_certificate()));
}

#[tokio::test]
async fn test_unknown_certificate_is_rejected_by_default() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.fail_next(Method::Get, "/1.0", 500, "x509: certificate signed by unknown authority", 1);
    let connector = Arc::new(MemoryConnector::new(daemon));

    let registry = Registry::new(dir.path(), connector.clone());
    registry.add_remote(https_remote("lab")).await;
    let err = registry.instance_server("lab", "", "").await.unwrap_err();

    assert!(matches!(err, ProviderError::Certificate(_)));
    assert_eq!(connector.fetches(), 0);
    assert!(!dir.path().join("servercerts/lab.crt").exists());
}

#[tokio::test]
async fn test_old_daemon_is_refused() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    let mut server = daemon.server();
    server.environment.server_version = "3.0".to_string();
    daemon.set_server(server);
    std::fs::create_dir_all(dir.path().join("servercerts")).unwrap();
    std::fs::write(dir.path().join("servercerts/old.crt"), "pinned").unwrap();

    let registry = Registry::new(dir.path(), Arc::new(MemoryConnector::new(daemon)));
    registry.add_remote(https_remote("old")).await;
    let err = registry.instance_server("old", "", "").await.unwrap_err();

    match err {
        ProviderError::VersionMismatch { remote, version, .. } => {
            assert_eq!(remote, "old");
            assert_eq!(version, "3.0");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_unknown_remote_and_default_selection() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = Arc::new(MemoryDaemon::new());
    let registry = Registry::new(dir.path(), Arc::new(MemoryConnector::new(daemon)));
    registry
        .add_remote(RemoteConfig {
            default: true,
            ..RemoteConfig::local("local")
        })
        .await;

    assert_eq!(registry.default_remote().await, "local");
    assert_eq!(registry.select_remote("missing").await, "local");
    assert!(registry.instance_server("", "", "").await.is_ok());

    let err = registry.instance_server("missing", "", "").await.unwrap_err();
    assert!(matches!(err, ProviderError::RemoteNotFound(name) if name == "missing"));
}

#[tokio::test]
async fn test_image_alias_through_lxd_remote() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.insert(
        "default",
        "/1.0/images/aliases/debian/12",
        json!({"name": "debian/12", "target": "c0ffee"}),
    );
    let registry = Registry::new(dir.path(), Arc::new(MemoryConnector::new(daemon)));
    registry.add_remote(RemoteConfig::local("local")).await;
    registry
        .add_remote(RemoteConfig {
            protocol: Protocol::Simplestreams,
            ..https_remote("images")
        })
        .await;

    let images = registry.image_server("local").await.unwrap();
    assert_eq!(images.resolve_alias("debian/12").await.unwrap(), "c0ffee");

    // Image-only remotes cannot manage resources.
    let err = registry.instance_server("images", "", "").await.unwrap_err();
    assert!(matches!(err, ProviderError::Config(_)));
}

#[tokio::test]
async fn test_token_sent_as_password_to_daemons_without_explicit_tokens() {
    let dir = config_dir().await;
    let daemon = Arc::new(MemoryDaemon::new());
    daemon.require_trust(&["legacy-token"]);
    let mut server = daemon.server();
    server
        .api_extensions
        .retain(|ext| ext != "explicit_trust_token");
    daemon.set_server(server);
    std::fs::create_dir_all(dir.path().join("servercerts")).unwrap();
    std::fs::write(dir.path().join("servercerts/lab.crt"), "pinned").unwrap();

    let registry = Registry::new(dir.path(), Arc::new(MemoryConnector::new(daemon.clone())));
    registry
        .add_remote(RemoteConfig {
            token: Some("legacy-token".to_string()),
            ..https_remote("lab")
        })
        .await;
    registry.instance_server("lab", "", "").await.unwrap();

    let auth = daemon
        .calls()
        .into_iter()
        .find(|c| c.method == Method::Post && c.path == "/1.0/certificates")
        .unwrap();
    let body = auth.body.unwrap();
    assert_eq!(body["password"], "legacy-token");
    assert!(body.get("trust_token").and_then(|t| t.as_str()).unwrap_or_default().is_empty());
    assert!(daemon.server().is_trusted());
}
