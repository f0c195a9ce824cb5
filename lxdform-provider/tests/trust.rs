mod common;

use common::harness;
use lxdform_client::cert;
use serde_json::json;

fn pem(seed: &str) -> String {
    cert::der_to_pem(format!("client certificate {}", seed).as_bytes())
}

#[tokio::test]
async fn test_certificate_lifecycle() {
    let h = harness().await;
    let content = pem("ci");
    let fingerprint = cert::fingerprint_pem(&content).unwrap();

    let state = h
        .create(
            "lxd_trust_certificate",
            json!({"name": "ci", "content": content, "projects": ["web", "db"]}),
        )
        .await;
    assert_eq!(state["fingerprint"], fingerprint.as_str());
    assert_eq!(state["type"], "client");
    assert_eq!(state["projects"], json!(["db", "web"]));

    let path = format!("/1.0/certificates/{}", fingerprint);
    let stored = h.daemon.object("default", &path).unwrap();
    assert_eq!(stored["restricted"], true);

    let state = h
        .update(
            "lxd_trust_certificate",
            &state,
            json!({
                "name": "ci-runner",
                "description": "build farm",
                "content": content,
                "projects": ["db", "web"],
            }),
        )
        .await;
    assert_eq!(state["name"], "ci-runner");
    let stored = h.daemon.object("default", &path).unwrap();
    assert_eq!(stored["name"], "ci-runner");
    assert_eq!(stored["description"], "build farm");

    h.provider
        .delete("lxd_trust_certificate", state.clone())
        .await
        .unwrap();
    assert!(h.daemon.object("default", &path).is_none());
    assert!(h.read("lxd_trust_certificate", &state).await.is_none());
}

#[tokio::test]
async fn test_certificate_content_change_replaces() {
    let h = harness().await;
    let first = pem("first");
    let second = pem("second");

    let state = h
        .create("lxd_trust_certificate", json!({"name": "ci", "content": first}))
        .await;

    let plan = h
        .plan(
            "lxd_trust_certificate",
            Some(&state),
            json!({"name": "ci", "content": second}),
        )
        .await;
    assert_eq!(plan.requires_replace, vec!["fingerprint".to_string()]);
    let planned = plan.planned.unwrap();
    let new_fingerprint = cert::fingerprint_pem(&second).unwrap();
    assert_eq!(planned["fingerprint"], new_fingerprint.as_str());

    // The host destroys, then creates.
    h.provider
        .delete("lxd_trust_certificate", state.clone())
        .await
        .unwrap();
    let replaced = h
        .provider
        .create("lxd_trust_certificate", planned)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replaced["fingerprint"], new_fingerprint.as_str());
    assert_ne!(replaced["fingerprint"], state["fingerprint"]);
}

#[tokio::test]
async fn test_certificate_requires_content_or_path() {
    let h = harness().await;

    let err = h
        .provider
        .plan("lxd_trust_certificate", None, Some(json!({"name": "ci"})))
        .await
        .unwrap_err();
    assert!(err.has_error());
}

#[tokio::test]
async fn test_token_trigger_always_leaves_state() {
    let h = harness().await;

    let state = h
        .create("lxd_trust_token", json!({"name": "ci", "trigger": "always"}))
        .await;
    let op = state["operation_id"].as_str().unwrap().to_string();
    assert!(!state["token"].as_str().unwrap().is_empty());
    assert!(!state["expires_at"].as_str().unwrap().is_empty());
    assert!(h.daemon.operation(&op).is_some());

    h.daemon.expire_operation(&op);
    assert!(h.read("lxd_trust_token", &state).await.is_none());
}

#[tokio::test]
async fn test_token_trigger_once_keeps_token() {
    let h = harness().await;

    let state = h.create("lxd_trust_token", json!({"name": "ci"})).await;
    assert_eq!(state["trigger"], "once");
    let op = state["operation_id"].as_str().unwrap().to_string();

    h.daemon.expire_operation(&op);
    let read = h.read("lxd_trust_token", &state).await.unwrap();
    assert_eq!(read["token"], state["token"]);
    assert_eq!(read["operation_id"], op.as_str());
}

#[tokio::test]
async fn test_token_delete_cancels_operation() {
    let h = harness().await;

    let state = h
        .create("lxd_trust_token", json!({"name": "ci", "projects": ["web"]}))
        .await;
    let op = state["operation_id"].as_str().unwrap().to_string();
    let request = h.daemon.operation(&op).unwrap().metadata.unwrap()["request"].clone();
    assert_eq!(request["restricted"], true);
    assert_eq!(request["projects"], json!(["web"]));

    h.provider.delete("lxd_trust_token", state.clone()).await.unwrap();
    assert!(h.daemon.operation(&op).is_none());

    // A token that is already gone is left alone.
    h.provider.delete("lxd_trust_token", state).await.unwrap();
}

#[tokio::test]
async fn test_token_cannot_be_imported() {
    let h = harness().await;

    let err = h.provider.import("lxd_trust_token", "ci").await.unwrap_err();
    assert_eq!(err.first_error().unwrap().summary, "Resource Import Not Implemented");
}
