//! Integration tests for instance-group membership reconciliation.
//!
//! Drive the manager against the in-memory fake backend and assert on the
//! resulting membership and the recorded call log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lbsync_cloud::fake::{FakeCloud, FakeOp, FakeRecorder, FakeZoneDirectory};
use lbsync_cloud::{CloudError, CloudResult, EventType, InstanceGroup, NamedPort};
use lbsync_controller::instancegroups::{EVENT_ADD_NODES, EVENT_REMOVE_NODES};
use lbsync_controller::{
    ControllerError, InstanceGroupManager, ManagerConfig, MembershipReconciler, Namer, NodeSource,
    ReconcilerConfig,
};
use tokio::sync::watch;

const BASE: &str = "https://www.googleapis.com/compute/v1/projects/proj/";
const ZONE_A: &str = "us-central1-a";
const ZONE_B: &str = "us-central1-b";
const GROUP: &str = "k8s-ig--uid1";

struct Harness {
    cloud: Arc<FakeCloud>,
    recorder: Arc<FakeRecorder>,
    manager: InstanceGroupManager,
}

fn harness(zones: FakeZoneDirectory, max_ig_size: usize) -> Harness {
    let cloud = Arc::new(FakeCloud::new());
    let recorder = Arc::new(FakeRecorder::new());
    let manager = InstanceGroupManager::new(ManagerConfig {
        cloud: cloud.clone(),
        zones: Arc::new(zones),
        recorder: recorder.clone(),
        namer: Namer::new("k8s", "uid1"),
        base_path: BASE.to_string(),
        max_ig_size,
    });
    Harness {
        cloud,
        recorder,
        manager,
    }
}

fn url(zone: &str, name: &str) -> String {
    format!("{BASE}zones/{zone}/instances/{name}")
}

fn nodes(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn zone_a(names: &[&str]) -> FakeZoneDirectory {
    names
        .iter()
        .fold(FakeZoneDirectory::new(), |dir, n| dir.with_node(n, ZONE_A))
}

async fn seed_group(cloud: &FakeCloud, zone: &str, members: &[&str]) {
    cloud.insert_instance_group(zone, InstanceGroup::named(GROUP)).await;
    cloud
        .insert_members(zone, GROUP, members.iter().map(|m| url(zone, m)))
        .await;
}

#[tokio::test]
async fn test_sync_adds_all_nodes_to_empty_group() {
    let h = harness(zone_a(&["a", "b", "c"]), 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;

    h.manager.sync(&nodes(&["a", "b", "c"])).await.unwrap();

    let adds = h.cloud.calls_for(FakeOp::AddInstances).await;
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].scope, ZONE_A);
    assert_eq!(
        adds[0].items,
        vec![url(ZONE_A, "a"), url(ZONE_A, "b"), url(ZONE_A, "c")]
    );
    assert!(h.cloud.calls_for(FakeOp::RemoveInstances).await.is_empty());
}

#[tokio::test]
async fn test_sync_removes_before_adding() {
    let h = harness(zone_a(&["a", "b", "c"]), 1000);
    seed_group(&h.cloud, ZONE_A, &["a", "b", "x"]).await;

    h.manager.sync(&nodes(&["a", "b", "c"])).await.unwrap();

    let mutations: Vec<_> = h
        .cloud
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c.op, FakeOp::AddInstances | FakeOp::RemoveInstances))
        .collect();
    assert_eq!(mutations.len(), 2);
    assert_eq!(mutations[0].op, FakeOp::RemoveInstances);
    assert_eq!(mutations[0].items, vec![url(ZONE_A, "x")]);
    assert_eq!(mutations[1].op, FakeOp::AddInstances);
    assert_eq!(mutations[1].items, vec![url(ZONE_A, "c")]);

    assert_eq!(
        h.cloud.members(ZONE_A, GROUP).await.unwrap(),
        vec![url(ZONE_A, "a"), url(ZONE_A, "b"), url(ZONE_A, "c")]
    );
}

#[tokio::test]
async fn test_second_sync_is_a_no_op() {
    let h = harness(zone_a(&["a", "b"]), 1000);
    seed_group(&h.cloud, ZONE_A, &["z"]).await;

    h.manager.sync(&nodes(&["a", "b"])).await.unwrap();
    h.cloud.clear_calls().await;
    h.manager.sync(&nodes(&["a", "b"])).await.unwrap();

    assert!(h.cloud.calls_for(FakeOp::AddInstances).await.is_empty());
    assert!(h.cloud.calls_for(FakeOp::RemoveInstances).await.is_empty());
}

#[tokio::test]
async fn test_sync_truncates_to_lexicographically_first_names() {
    let h = harness(zone_a(&["d", "c", "a", "b"]), 2);
    seed_group(&h.cloud, ZONE_A, &["c"]).await;

    h.manager.sync(&nodes(&["d", "c", "a", "b"])).await.unwrap();

    assert_eq!(
        h.cloud.members(ZONE_A, GROUP).await.unwrap(),
        vec![url(ZONE_A, "a"), url(ZONE_A, "b")]
    );
}

#[tokio::test]
async fn test_missing_group_is_not_an_error() {
    let h = harness(zone_a(&["a"]), 1000);

    h.manager.sync(&nodes(&["a"])).await.unwrap();

    assert!(h.cloud.calls_for(FakeOp::AddInstances).await.is_empty());
}

#[tokio::test]
async fn test_group_deleted_before_add_is_tolerated() {
    let h = harness(zone_a(&["a"]), 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;
    h.cloud
        .inject(
            FakeOp::AddInstances,
            Some(ZONE_A),
            CloudError::NotFound("instance group".to_string()),
        )
        .await;

    h.manager.sync(&nodes(&["a"])).await.unwrap();
}

#[tokio::test]
async fn test_unresolvable_nodes_are_skipped() {
    let h = harness(zone_a(&["a"]), 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;

    h.manager.sync(&nodes(&["a", "ghost"])).await.unwrap();

    assert_eq!(
        h.cloud.members(ZONE_A, GROUP).await.unwrap(),
        vec![url(ZONE_A, "a")]
    );
}

#[tokio::test]
async fn test_node_hostnames_are_canonicalized() {
    let h = harness(zone_a(&["node-1.c.proj.internal"]), 1000);
    seed_group(&h.cloud, ZONE_A, &["node-1"]).await;

    h.manager
        .sync(&nodes(&["node-1.c.proj.internal"]))
        .await
        .unwrap();

    assert!(h.cloud.calls_for(FakeOp::AddInstances).await.is_empty());
    assert!(h.cloud.calls_for(FakeOp::RemoveInstances).await.is_empty());
}

#[tokio::test]
async fn test_zone_failure_does_not_block_other_zones() {
    let zones = FakeZoneDirectory::new()
        .with_node("a", ZONE_A)
        .with_node("b", ZONE_B);
    let h = harness(zones, 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;
    seed_group(&h.cloud, ZONE_B, &[]).await;
    h.cloud
        .inject(
            FakeOp::AddInstances,
            Some(ZONE_A),
            CloudError::Transient("rate limited".to_string()),
        )
        .await;

    let err = h.manager.sync(&nodes(&["a", "b"])).await.unwrap_err();

    let failures = err.zone_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].zone, ZONE_A);
    assert!(failures[0].error.is_transient());
    assert_eq!(
        h.cloud.members(ZONE_B, GROUP).await.unwrap(),
        vec![url(ZONE_B, "b")]
    );
}

#[tokio::test]
async fn test_remove_failure_skips_add() {
    let h = harness(zone_a(&["a"]), 1000);
    seed_group(&h.cloud, ZONE_A, &["x"]).await;
    h.cloud
        .inject(
            FakeOp::RemoveInstances,
            None,
            CloudError::Internal("backend error".to_string()),
        )
        .await;

    let err = h.manager.sync(&nodes(&["a"])).await.unwrap_err();

    assert!(matches!(err, ControllerError::Zones(_)));
    assert!(h.cloud.calls_for(FakeOp::AddInstances).await.is_empty());

    let warnings: Vec<_> = h
        .recorder
        .events()
        .into_iter()
        .filter(|e| e.event_type == EventType::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, EVENT_REMOVE_NODES);
}

#[tokio::test]
async fn test_remove_on_missing_group_still_adds() {
    let h = harness(zone_a(&["a"]), 1000);
    seed_group(&h.cloud, ZONE_A, &["x"]).await;
    h.cloud
        .inject(
            FakeOp::RemoveInstances,
            None,
            CloudError::NotFound("instance group".to_string()),
        )
        .await;

    h.manager.sync(&nodes(&["a"])).await.unwrap();

    let adds = h.cloud.calls_for(FakeOp::AddInstances).await;
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].items, vec![url(ZONE_A, "a")]);
}

#[tokio::test]
async fn test_membership_changes_emit_events() {
    let h = harness(zone_a(&["a"]), 1000);
    seed_group(&h.cloud, ZONE_A, &["x"]).await;

    h.manager.sync(&nodes(&["a"])).await.unwrap();

    let events = h.recorder.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].reason, EVENT_REMOVE_NODES);
    assert_eq!(events[1].reason, EVENT_ADD_NODES);
    assert!(events.iter().all(|e| e.event_type == EventType::Normal));
    assert!(events[1].message.contains("[a]"));
    assert!(events[1].message.contains(GROUP));
}

#[tokio::test]
async fn test_ensure_creates_groups_with_named_ports() {
    let zones = FakeZoneDirectory::new()
        .with_node("a", ZONE_A)
        .with_node("b", ZONE_B)
        .with_unready_node("c", "us-central1-c");
    let h = harness(zones, 1000);

    let groups = h
        .manager
        .ensure_instance_groups_and_ports(GROUP, &[30001, 30002, 30001])
        .await
        .unwrap();

    assert_eq!(groups.len(), 2);
    let expected = vec![
        NamedPort {
            name: "port30001".to_string(),
            port: 30001,
        },
        NamedPort {
            name: "port30002".to_string(),
            port: 30002,
        },
    ];
    for group in &groups {
        assert_eq!(group.named_ports, expected);
    }
    assert!(h.cloud.instance_group("us-central1-c", GROUP).await.is_none());
}

#[tokio::test]
async fn test_ensure_only_appends_missing_ports() {
    let h = harness(zone_a(&["a"]), 1000);
    let mut group = InstanceGroup::named(GROUP);
    group.named_ports.push(NamedPort {
        name: "custom".to_string(),
        port: 80,
    });
    h.cloud.insert_instance_group(ZONE_A, group).await;

    h.manager
        .ensure_instance_groups_and_ports(GROUP, &[80, 443])
        .await
        .unwrap();

    let sets = h.cloud.calls_for(FakeOp::SetNamedPorts).await;
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].items, vec!["custom:80", "port443:443"]);
    assert!(h.cloud.calls_for(FakeOp::CreateInstanceGroup).await.is_empty());

    h.cloud.clear_calls().await;
    h.manager
        .ensure_instance_groups_and_ports(GROUP, &[80, 443])
        .await
        .unwrap();
    assert!(h.cloud.calls_for(FakeOp::SetNamedPorts).await.is_empty());
}

#[tokio::test]
async fn test_ensure_unions_existing_ports_across_zones() {
    let zones = FakeZoneDirectory::new()
        .with_node("a", ZONE_A)
        .with_node("b", ZONE_B);
    let h = harness(zones, 1000);
    let mut group = InstanceGroup::named(GROUP);
    group.named_ports.push(NamedPort {
        name: "port9000".to_string(),
        port: 9000,
    });
    h.cloud.insert_instance_group(ZONE_A, group).await;

    let groups = h
        .manager
        .ensure_instance_groups_and_ports(GROUP, &[80])
        .await
        .unwrap();

    let expected = vec![
        NamedPort {
            name: "port80".to_string(),
            port: 80,
        },
        NamedPort {
            name: "port9000".to_string(),
            port: 9000,
        },
    ];
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert_eq!(group.named_ports, expected);
    }

    let stored_b = h.cloud.instance_group(ZONE_B, GROUP).await.unwrap();
    assert!(stored_b.has_port(80));
    assert!(stored_b.has_port(9000));
}

#[tokio::test]
async fn test_ensure_tolerates_group_created_concurrently() {
    let h = harness(zone_a(&["a"]), 1000);
    // The first lookup misses, then creation collides with the existing group.
    h.cloud.insert_instance_group(ZONE_A, InstanceGroup::named(GROUP)).await;
    h.cloud
        .inject_once(
            FakeOp::GetInstanceGroup,
            Some(ZONE_A),
            CloudError::NotFound(GROUP.to_string()),
        )
        .await;

    let groups = h
        .manager
        .ensure_instance_groups_and_ports(GROUP, &[80])
        .await
        .unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, GROUP);
    assert!(groups[0].has_port(80));
    assert_eq!(h.cloud.calls_for(FakeOp::CreateInstanceGroup).await.len(), 1);
    assert_eq!(h.cloud.calls_for(FakeOp::GetInstanceGroup).await.len(), 2);
}

#[tokio::test]
async fn test_ensure_propagates_create_failure() {
    let h = harness(zone_a(&["a"]), 1000);
    h.cloud
        .inject(
            FakeOp::CreateInstanceGroup,
            None,
            CloudError::User("invalid network".to_string()),
        )
        .await;

    let err = h
        .manager
        .ensure_instance_groups_and_ports(GROUP, &[80])
        .await
        .unwrap_err();
    assert!(err.is_user_error());
}

#[tokio::test]
async fn test_delete_tolerates_missing_and_in_use_groups() {
    let zones = FakeZoneDirectory::new()
        .with_node("a", ZONE_A)
        .with_node("b", ZONE_B)
        .with_unready_node("c", "us-central1-c");
    let h = harness(zones, 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;
    seed_group(&h.cloud, ZONE_B, &[]).await;
    h.cloud
        .inject(
            FakeOp::DeleteInstanceGroup,
            Some(ZONE_B),
            CloudError::InUse("backend service bs1".to_string()),
        )
        .await;

    h.manager.delete_instance_group(GROUP).await.unwrap();

    assert!(h.cloud.instance_group(ZONE_A, GROUP).await.is_none());
    assert!(h.cloud.instance_group(ZONE_B, GROUP).await.is_some());
    assert_eq!(h.cloud.calls_for(FakeOp::DeleteInstanceGroup).await.len(), 3);
}

#[tokio::test]
async fn test_delete_reports_every_failed_zone() {
    let zones = FakeZoneDirectory::new()
        .with_node("a", ZONE_A)
        .with_node("b", ZONE_B);
    let h = harness(zones, 1000);
    h.cloud
        .inject(
            FakeOp::DeleteInstanceGroup,
            None,
            CloudError::Internal("boom".to_string()),
        )
        .await;

    let err = h.manager.delete_instance_group(GROUP).await.unwrap_err();

    let zones: Vec<_> = err.zone_failures().iter().map(|f| f.zone.as_str()).collect();
    assert_eq!(zones, vec![ZONE_A, ZONE_B]);
}

#[tokio::test]
async fn test_list_returns_owned_groups_once() {
    let zones = FakeZoneDirectory::new()
        .with_node("a", ZONE_A)
        .with_node("b", ZONE_B);
    let h = harness(zones, 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;
    seed_group(&h.cloud, ZONE_B, &[]).await;
    h.cloud
        .insert_instance_group(ZONE_A, InstanceGroup::named("k8s-ig--other"))
        .await;

    assert_eq!(h.manager.list().await.unwrap(), vec![GROUP.to_string()]);
}

#[tokio::test]
async fn test_zone_listing_failure_fails_ensure_delete_and_list() {
    let zones =
        zone_a(&["a"]).with_list_error(CloudError::Transient("node lister down".to_string()));
    let h = harness(zones, 1000);

    let expect_transient = |err: ControllerError| match err {
        ControllerError::Cloud(e) => assert!(e.is_transient()),
        other => panic!("unexpected error: {other:?}"),
    };

    expect_transient(
        h.manager
            .ensure_instance_groups_and_ports(GROUP, &[80])
            .await
            .unwrap_err(),
    );
    expect_transient(h.manager.delete_instance_group(GROUP).await.unwrap_err());
    expect_transient(h.manager.list().await.unwrap_err());
    assert!(h.cloud.calls().await.is_empty());
}

struct StaticNodes(Vec<String>);

#[async_trait]
impl NodeSource for StaticNodes {
    async fn candidate_nodes(&self) -> CloudResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_reconciler_syncs_until_shutdown() {
    let h = harness(zone_a(&["a", "b"]), 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;
    let cloud = Arc::clone(&h.cloud);

    let reconciler = MembershipReconciler::new(
        Arc::new(h.manager),
        Arc::new(StaticNodes(nodes(&["a", "b"]))),
        ReconcilerConfig {
            sync_interval: Duration::from_millis(10),
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        cloud.members(ZONE_A, GROUP).await.unwrap(),
        vec![url(ZONE_A, "a"), url(ZONE_A, "b")]
    );
    assert_eq!(cloud.calls_for(FakeOp::AddInstances).await.len(), 1);
}

#[tokio::test]
async fn test_reconciler_stops_when_shutdown_sender_dropped() {
    let h = harness(zone_a(&["a"]), 1000);
    seed_group(&h.cloud, ZONE_A, &[]).await;

    let reconciler = MembershipReconciler::new(
        Arc::new(h.manager),
        Arc::new(StaticNodes(nodes(&["a"]))),
        ReconcilerConfig {
            sync_interval: Duration::from_secs(3600),
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
