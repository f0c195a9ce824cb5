mod common;

use common::harness;
use lxdform_client::Method;
use serde_json::json;

const LIVE_BRIDGE: &[(&str, &str)] = &[
    ("ipv4.address", "10.150.19.1/24"),
    ("ipv4.nat", "true"),
    ("ipv6.address", "fd42::1/64"),
    ("ipv6.nat", "true"),
    ("volatile.bridge.hwaddr", "00:16:3e:aa:bb:cc"),
];

#[tokio::test]
async fn test_network_config_keeps_computed_keys_out_of_state() {
    let h = harness().await;
    h.daemon.set_computed_config("/1.0/networks", LIVE_BRIDGE);

    let state = h
        .create(
            "lxd_network",
            json!({"name": "br0", "config": {"ipv4.address": "10.150.19.1/24"}}),
        )
        .await;

    assert_eq!(state["config"], json!({"ipv4.address": "10.150.19.1/24"}));
    assert_eq!(
        state["config_state"],
        json!({
            "ipv4.address": "10.150.19.1/24",
            "ipv4.nat": "true",
            "ipv6.address": "fd42::1/64",
            "ipv6.nat": "true",
        })
    );
    assert_eq!(state["managed"], false);

    // A refresh against unchanged live state is a no-op.
    let read = h.read("lxd_network", &state).await.unwrap();
    assert_eq!(read, state);
}

#[tokio::test]
async fn test_network_update_sends_observed_etag() {
    let h = harness().await;
    h.daemon.set_computed_config("/1.0/networks", LIVE_BRIDGE);
    let state = h
        .create(
            "lxd_network",
            json!({"name": "br0", "config": {"ipv4.address": "10.150.19.1/24"}}),
        )
        .await;

    let (_, etag) = h.server().get_network("br0").await.unwrap();
    h.daemon.clear_calls();

    let updated = h
        .update(
            "lxd_network",
            &state,
            json!({
                "name": "br0",
                "description": "lab bridge",
                "config": {"ipv4.address": "10.150.19.1/24", "dns.domain": "lab"},
            }),
        )
        .await;

    let calls = h.daemon.calls();
    let put = calls
        .iter()
        .position(|c| c.method == Method::Put)
        .expect("no PUT issued");
    assert!(
        calls[..put]
            .iter()
            .any(|c| c.method == Method::Get && c.path == "/1.0/networks/br0"),
        "update without a fresh read"
    );
    assert_eq!(calls[put].etag.as_deref(), Some(etag.as_str()));

    let body = calls[put].body.as_ref().unwrap();
    assert_eq!(body["config"]["ipv4.nat"], "true");
    assert_eq!(body["config"]["ipv6.address"], "fd42::1/64");
    assert_eq!(body["config"]["dns.domain"], "lab");
    assert!(body["config"].get("volatile.bridge.hwaddr").is_some());

    assert_eq!(updated["description"], "lab bridge");
    assert_eq!(
        updated["config"],
        json!({"ipv4.address": "10.150.19.1/24", "dns.domain": "lab"})
    );
}

#[tokio::test]
async fn test_network_removed_out_of_band() {
    let h = harness().await;
    let state = h.create("lxd_network", json!({"name": "br0"})).await;
    assert!(state["config"].is_null());

    h.daemon.remove("default", "/1.0/networks/br0");
    assert!(h.read("lxd_network", &state).await.is_none());

    // Deleting what is already gone succeeds.
    h.provider.delete("lxd_network", state).await.unwrap();
}

#[tokio::test]
async fn test_network_in_project() {
    let h = harness().await;
    h.create("lxd_network", json!({"name": "br0", "project": "web"})).await;

    assert!(h.daemon.object("web", "/1.0/networks/br0").is_some());
    assert!(h.daemon.object("default", "/1.0/networks/br0").is_none());
}

async fn peer(h: &common::Harness) -> serde_json::Value {
    h.create("lxd_network", json!({"name": "ovn0"})).await;
    h.create(
        "lxd_network_peer",
        json!({"network": "ovn0", "name": "to-ovn1", "target_network": "ovn1"}),
    )
    .await
}

#[tokio::test]
async fn test_network_peer_delete_retries() {
    let h = harness().await;
    let state = peer(&h).await;
    assert_eq!(state["status"], "Created");
    assert_eq!(state["target_project"], "default");

    let path = "/1.0/networks/ovn0/peers/to-ovn1";
    h.daemon.fail_next(Method::Delete, path, 500, "peer is busy", 2);
    h.daemon.clear_calls();

    h.provider.delete("lxd_network_peer", state).await.unwrap();

    let deletes = h
        .daemon
        .calls()
        .into_iter()
        .filter(|c| c.method == Method::Delete && c.path == path)
        .count();
    assert_eq!(deletes, 3);
    assert!(h.daemon.object("default", path).is_none());
}

#[tokio::test]
async fn test_network_peer_delete_gives_up() {
    let h = harness().await;
    let state = peer(&h).await;

    let path = "/1.0/networks/ovn0/peers/to-ovn1";
    h.daemon.fail_next(Method::Delete, path, 500, "peer is busy", 3);

    let err = h.provider.delete("lxd_network_peer", state).await.unwrap_err();
    assert_eq!(
        err.first_error().unwrap().summary,
        "Failed to remove network peer \"ovn0/to-ovn1\""
    );
    assert!(h.daemon.object("default", path).is_some());
}

#[tokio::test]
async fn test_network_acl_rules() {
    let h = harness().await;

    let state = h
        .create(
            "lxd_network_acl",
            json!({
                "name": "web",
                "ingress": [
                    {"action": "allow", "protocol": "tcp", "destination_port": "80,443"},
                    {"action": "drop", "source": "10.0.0.0/8"},
                ],
            }),
        )
        .await;

    let ingress = state["ingress"].as_array().unwrap();
    assert_eq!(ingress.len(), 2);
    assert!(ingress.iter().any(|r| r["action"] == "drop" && r["source"] == "10.0.0.0/8"));
    assert!(state["egress"].is_null());

    let stored = h.daemon.object("default", "/1.0/network-acls/web").unwrap();
    assert_eq!(stored["ingress"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_network_forward_keyed_by_listen_address() {
    let h = harness().await;
    h.create("lxd_network", json!({"name": "br0"})).await;

    let state = h
        .create(
            "lxd_network_forward",
            json!({
                "network": "br0",
                "listen_address": "192.0.2.10",
                "ports": [{
                    "protocol": "tcp",
                    "listen_port": "80",
                    "target_address": "10.0.0.2",
                }],
            }),
        )
        .await;

    assert_eq!(state["listen_address"], "192.0.2.10");
    assert_eq!(state["ports"][0]["target_address"], "10.0.0.2");
    assert!(
        h.daemon
            .object("default", "/1.0/networks/br0/forwards/192.0.2.10")
            .is_some()
    );

    let imported = h
        .provider
        .import("lxd_network_forward", "br0/192.0.2.10")
        .await
        .unwrap();
    assert_eq!(imported["network"], "br0");
    assert_eq!(imported["listen_address"], "192.0.2.10");
}

#[tokio::test]
async fn test_network_zone_and_record() {
    let h = harness().await;

    h.create(
        "lxd_network_zone",
        json!({"name": "lab.example.org", "config": {"dns.nameservers": "ns1.lab.example.org"}}),
    )
    .await;
    let record = h
        .create(
            "lxd_network_zone_record",
            json!({
                "zone": "lab.example.org",
                "name": "www",
                "entry": [{"type": "A", "value": "192.0.2.20", "ttl": 300}],
            }),
        )
        .await;

    assert_eq!(record["entry"][0]["value"], "192.0.2.20");
    assert!(
        h.daemon
            .object("default", "/1.0/network-zones/lab.example.org/records/www")
            .is_some()
    );

    h.provider
        .delete("lxd_network_zone_record", record.clone())
        .await
        .unwrap();
    assert!(h.read("lxd_network_zone_record", &record).await.is_none());
}

#[tokio::test]
async fn test_concurrent_change_fails_update_with_one_diagnostic() {
    let h = harness().await;
    let state = h
        .create("lxd_network", json!({"name": "br0", "description": "lab"}))
        .await;

    let plan = h
        .plan("lxd_network", Some(&state), json!({"name": "br0", "description": "prod"}))
        .await;

    // Someone else edits the network between our read and our write.
    h.daemon.patch_after_next_read(
        "default",
        "/1.0/networks/br0",
        json!({"description": "edited elsewhere"}),
    );
    let err = h
        .provider
        .update("lxd_network", plan.planned.unwrap(), state)
        .await
        .unwrap_err();

    let errors: Vec<_> = err.iter().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].summary, "Failed to update network \"br0\"");
    assert!(errors[0].detail.contains("ETag"));

    let stored = h.daemon.object("default", "/1.0/networks/br0").unwrap();
    assert_eq!(stored["description"], "edited elsewhere");
}
