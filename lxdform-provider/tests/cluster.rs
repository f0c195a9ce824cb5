mod common;

use common::harness;
use serde_json::json;

#[tokio::test]
async fn test_minimal_cluster_group() {
    let h = harness().await;

    let state = h
        .create("lxd_cluster_group", json!({"name": "G", "description": "", "config": {}}))
        .await;

    assert_eq!(state["name"], "G");
    assert_eq!(state["description"], "");
    assert_eq!(state["config"], json!({}));
    assert!(h.daemon.object("default", "/1.0/cluster/groups/G").is_some());
}

#[tokio::test]
async fn test_assignment_rejects_non_member() {
    let h = harness().await;
    h.daemon.set_cluster_members(&["node-1", "node-2"]);
    h.create("lxd_cluster_group", json!({"name": "G"})).await;
    h.daemon.clear_calls();

    let plan = h
        .plan(
            "lxd_cluster_group_assignment",
            None,
            json!({"cluster_group": "G", "member": "node-X"}),
        )
        .await;
    let err = h
        .provider
        .create("lxd_cluster_group_assignment", plan.planned.unwrap())
        .await
        .unwrap_err();

    assert_eq!(
        err.first_error().unwrap().summary,
        "Member with name \"node-X\" is not part of the cluster"
    );
    assert!(h.daemon.writes().is_empty());
}

#[tokio::test]
async fn test_assignment_lifecycle() {
    let h = harness().await;
    h.daemon.set_cluster_members(&["node-1", "node-2"]);
    let group = h.create("lxd_cluster_group", json!({"name": "G"})).await;

    let state = h
        .create(
            "lxd_cluster_group_assignment",
            json!({"cluster_group": "G", "member": "node-1"}),
        )
        .await;
    assert_eq!(state["id"], "G/node-1");
    let stored = h.daemon.object("default", "/1.0/cluster/groups/G").unwrap();
    assert_eq!(stored["members"], json!(["node-1"]));

    let read = h.read("lxd_cluster_group_assignment", &state).await;
    assert_eq!(read.as_ref(), Some(&state));

    // Assigning twice is an error.
    let plan = h
        .plan(
            "lxd_cluster_group_assignment",
            None,
            json!({"cluster_group": "G", "member": "node-1"}),
        )
        .await;
    let err = h
        .provider
        .create("lxd_cluster_group_assignment", plan.planned.unwrap())
        .await
        .unwrap_err();
    assert_eq!(
        err.first_error().unwrap().summary,
        "Member \"node-1\" is already assigned to cluster group \"G\""
    );

    // Updating the group keeps its members.
    h.update("lxd_cluster_group", &group, json!({"name": "G", "description": "rack 1"}))
        .await;
    let stored = h.daemon.object("default", "/1.0/cluster/groups/G").unwrap();
    assert_eq!(stored["description"], "rack 1");
    assert_eq!(stored["members"], json!(["node-1"]));

    h.provider
        .delete("lxd_cluster_group_assignment", state.clone())
        .await
        .unwrap();
    let stored = h.daemon.object("default", "/1.0/cluster/groups/G").unwrap();
    assert_eq!(stored["members"], json!([]));
    assert!(h.read("lxd_cluster_group_assignment", &state).await.is_none());

    // Removing an assignment that is already gone succeeds.
    h.provider
        .delete("lxd_cluster_group_assignment", state)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cluster_group_import_rejects_project() {
    let h = harness().await;

    let imported = h.provider.import("lxd_cluster_group", "local:G").await.unwrap();
    assert_eq!(imported["name"], "G");
    assert_eq!(imported["remote"], "local");

    let err = h
        .provider
        .import("lxd_cluster_group", "local:proj/G")
        .await
        .unwrap_err();
    assert_eq!(err.first_error().unwrap().summary, "Invalid import ID");
}
