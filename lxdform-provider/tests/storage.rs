mod common;

use common::harness;
use serde_json::json;

#[tokio::test]
async fn test_pool_computed_keys_depend_on_driver() {
    let h = harness().await;

    let zfs = h
        .create(
            "lxd_storage_pool",
            json!({"name": "tank", "driver": "zfs", "config": {"size": "128MiB"}}),
        )
        .await;
    let dir = h
        .create(
            "lxd_storage_pool",
            json!({"name": "files", "driver": "dir", "config": {"size": "128MiB"}}),
        )
        .await;
    assert_eq!(zfs["config"], json!({"size": "128MiB"}));
    assert_eq!(dir["config"], json!({"size": "128MiB"}));

    for name in ["tank", "files"] {
        let path = format!("/1.0/storage-pools/{}", name);
        h.daemon.mutate("default", &path, |pool| {
            pool["config"]["source"] = json!(format!("/var/lib/incus/storage-pools/{}", name));
        });
    }

    let zfs = h.read("lxd_storage_pool", &zfs).await.unwrap();
    assert_eq!(zfs["config"], json!({"size": "128MiB"}));
    assert_eq!(
        zfs["config_state"]["source"],
        "/var/lib/incus/storage-pools/tank"
    );

    let dir = h.read("lxd_storage_pool", &dir).await.unwrap();
    assert_eq!(dir["config"], json!({"size": "128MiB"}));
}

#[tokio::test]
async fn test_pool_update_keeps_daemon_keys() {
    let h = harness().await;
    h.daemon
        .set_computed_config("/1.0/storage-pools", &[("zfs.pool_name", "tank"), ("size", "5GiB")]);

    let state = h
        .create("lxd_storage_pool", json!({"name": "tank", "driver": "zfs"}))
        .await;
    assert!(state["config"].is_null());
    assert_eq!(state["config_state"]["zfs.pool_name"], "tank");

    h.update(
        "lxd_storage_pool",
        &state,
        json!({"name": "tank", "driver": "zfs", "description": "fast"}),
    )
    .await;

    let stored = h.daemon.object("default", "/1.0/storage-pools/tank").unwrap();
    assert_eq!(stored["description"], "fast");
    assert_eq!(stored["config"]["zfs.pool_name"], "tank");
    assert_eq!(stored["config"]["size"], "5GiB");
}

#[tokio::test]
async fn test_volume_lifecycle() {
    let h = harness().await;
    h.create("lxd_storage_pool", json!({"name": "tank", "driver": "dir"})).await;

    let state = h
        .create(
            "lxd_volume",
            json!({"pool": "tank", "name": "data", "config": {"size": "1GiB"}}),
        )
        .await;

    assert_eq!(state["type"], "custom");
    assert_eq!(state["content_type"], "filesystem");
    assert_eq!(state["config"], json!({"size": "1GiB"}));
    assert!(
        h.daemon
            .object("default", "/1.0/storage-pools/tank/volumes/custom/data")
            .is_some()
    );

    h.provider.delete("lxd_volume", state.clone()).await.unwrap();
    assert!(h.read("lxd_volume", &state).await.is_none());
}

#[tokio::test]
async fn test_volume_import_reads_content_type() {
    let h = harness().await;

    let imported = h
        .provider
        .import("lxd_volume", "local:web/tank/disk0,content_type=block")
        .await
        .unwrap();
    assert_eq!(imported["remote"], "local");
    assert_eq!(imported["project"], "web");
    assert_eq!(imported["pool"], "tank");
    assert_eq!(imported["name"], "disk0");
    assert_eq!(imported["content_type"], "block");

    let err = h
        .provider
        .import("lxd_volume", "tank/disk0,size=1GiB")
        .await
        .unwrap_err();
    assert_eq!(err.first_error().unwrap().summary, "Invalid import ID");
}

#[tokio::test]
async fn test_bucket_and_generated_keys() {
    let h = harness().await;
    h.create("lxd_storage_pool", json!({"name": "s3", "driver": "dir"})).await;

    let bucket = h
        .create("lxd_storage_bucket", json!({"pool": "s3", "name": "assets"}))
        .await;
    assert_eq!(bucket["name"], "assets");

    let key = h
        .create(
            "lxd_storage_bucket_key",
            json!({"pool": "s3", "storage_bucket": "assets", "name": "ci"}),
        )
        .await;
    assert_eq!(key["role"], "read-only");
    let access_key = key["access_key"].as_str().unwrap().to_string();
    assert!(access_key.starts_with("access_key-"));
    assert!(key["secret_key"].as_str().unwrap().starts_with("secret_key-"));

    // Changing the role keeps the generated credentials.
    let key = h
        .update(
            "lxd_storage_bucket_key",
            &key,
            json!({"pool": "s3", "storage_bucket": "assets", "name": "ci", "role": "admin"}),
        )
        .await;
    assert_eq!(key["role"], "admin");
    assert_eq!(key["access_key"], access_key.as_str());

    // Removing the bucket takes its keys along.
    h.provider.delete("lxd_storage_bucket", bucket).await.unwrap();
    assert!(h.read("lxd_storage_bucket_key", &key).await.is_none());
}
