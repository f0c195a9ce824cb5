//! HTTP transport tests against a mock daemon.

use std::sync::Arc;

use lxdform_client::api::NetworkPut;
use lxdform_client::{ClientError, HttpsTransport, InstanceServer, TlsConfig};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_for(mock: &MockServer) -> InstanceServer {
    let transport = HttpsTransport::new(mock.uri(), &TlsConfig::default()).unwrap();
    InstanceServer::new(Arc::new(transport))
}

#[tokio::test]
async fn test_get_returns_object_and_etag() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1.0/networks/br0"))
        .and(query_param("project", "web"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"e1\"")
                .set_body_json(json!({
                    "type": "sync",
                    "status": "Success",
                    "status_code": 200,
                    "metadata": {
                        "name": "br0",
                        "type": "bridge",
                        "managed": true,
                        "config": {"ipv4.address": "10.0.0.1/24"}
                    }
                })),
        )
        .mount(&mock)
        .await;

    let server = server_for(&mock).await.use_project("web");
    let (net, etag) = server.get_network("br0").await.unwrap();

    assert_eq!(net.kind, "bridge");
    assert_eq!(net.config["ipv4.address"], "10.0.0.1/24");
    assert_eq!(etag, "\"e1\"");
}

#[tokio::test]
async fn test_update_sends_if_match() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/1.0/networks/br0"))
        .and(header("If-Match", "\"e1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "sync",
            "status_code": 200,
            "metadata": {}
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    server
        .update_network("br0", &NetworkPut::default(), "\"e1\"")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_error_envelope_maps_to_typed_errors() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1.0/profiles/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "type": "error",
            "error": "Profile not found",
            "error_code": 404
        })))
        .mount(&mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/1.0/networks/br0"))
        .respond_with(ResponseTemplate::new(412).set_body_json(json!({
            "type": "error",
            "error": "ETag doesn't match",
            "error_code": 412
        })))
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;

    let err = server.get_profile("missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "not found: Profile not found");

    let err = server
        .update_network("br0", &NetworkPut::default(), "\"stale\"")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::EtagMismatch(_)));
}

#[tokio::test]
async fn test_get_operations_flattens_groups() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1.0/operations"))
        .and(query_param("recursion", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "sync",
            "status_code": 200,
            "metadata": {
                "running": [{"id": "a", "class": "token", "status_code": 103}],
                "success": [{"id": "b", "class": "task", "status_code": 200}]
            }
        })))
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let ops = server.get_operations().await.unwrap();

    assert_eq!(ops.len(), 2);
    assert!(ops.iter().any(|o| o.id == "a" && o.is_running()));
}
