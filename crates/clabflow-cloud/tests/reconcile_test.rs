//! Reconciler behaviour against the in-memory control plane

use clabflow_cloud::memory::{Call, MemoryCluster};
use clabflow_cloud::{
    ApplyError, ClusterClient, Reconciler, ResourceStatus, RetryPolicy, SyncContext, SyncOutcome,
};
use clabflow_core::{
    ManagedResource, ResourceId, ResourceKind, Topology, desired_resources, load_topology_str,
    map_topology,
};
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "clab-dc1";

/// 2 spines, 4 leaves, 16 links
fn leaf_spine(leaves: usize) -> Topology {
    let mut yaml = String::from(
        "name: dc1\ntopology:\n  kinds:\n    nokia_srlinux:\n      image: ghcr.io/nokia/srlinux:24.10.1\n  nodes:\n",
    );
    let mut names = vec!["spine1".to_string(), "spine2".to_string()];
    names.extend((1..=leaves).map(|i| format!("leaf{i}")));
    for (i, name) in names.iter().enumerate() {
        yaml.push_str(&format!(
            "    {name}: {{kind: nokia_srlinux, mgmt-ipv4: 172.20.20.{}}}\n",
            i + 2
        ));
    }
    yaml.push_str("  links:\n");
    for spine in 1..=2 {
        for leaf in 1..=leaves {
            for lane in 0..2 {
                let spine_port = (leaf - 1) * 2 + lane + 1;
                let leaf_port = 49 + (spine - 1) * 2 + lane;
                yaml.push_str(&format!(
                    "    - endpoints: [\"spine{spine}:e1-{spine_port}\", \"leaf{leaf}:e1-{leaf_port}\"]\n"
                ));
            }
        }
    }
    load_topology_str(&yaml).unwrap()
}

fn context() -> SyncContext {
    SyncContext::new("dc1", NAMESPACE).with_retry(RetryPolicy::immediate(3))
}

fn node_id(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Node, name)
}

fn kinds_of(calls: &[Call]) -> Vec<ResourceKind> {
    calls
        .iter()
        .filter_map(|c| c.resource().map(|id| id.kind))
        .collect()
}

async fn install(cluster: &MemoryCluster, desired: Vec<ManagedResource>) -> clabflow_cloud::SyncReport {
    let ctx = context();
    Reconciler::new(cluster, &ctx).reconcile(desired).await
}

#[tokio::test]
async fn test_empty_cluster_gets_exactly_22_creates_in_order() {
    let cluster = MemoryCluster::new();
    let desired = map_topology(&leaf_spine(4));

    let report = install(&cluster, desired).await;
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert!(report.is_success());

    let mutations = cluster.mutations();
    let creates: Vec<_> = mutations
        .iter()
        .filter(|c| matches!(c, Call::Create(_)))
        .collect();
    assert_eq!(creates.len(), 22);
    assert_eq!(
        mutations
            .iter()
            .filter(|c| matches!(c, Call::EnsureNamespace(_)))
            .count(),
        1
    );

    let kinds = kinds_of(&mutations);
    let first_link = kinds.iter().position(|k| *k == ResourceKind::Link).unwrap();
    assert_eq!(first_link, 6);
    assert!(kinds[first_link..].iter().all(|k| *k == ResourceKind::Link));

    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Node), 6);
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Link), 16);
    assert!(cluster.contains(NAMESPACE, &node_id("dc1-spine1")));
    assert_eq!(report.fabric, Some(ResourceStatus::Created));
}

#[tokio::test]
async fn test_converged_topology_issues_no_mutations() {
    let cluster = MemoryCluster::new();
    let desired = map_topology(&leaf_spine(4));
    install(&cluster, desired.clone()).await;
    cluster.clear_calls();

    let report = install(&cluster, desired).await;
    assert!(cluster.mutations().is_empty());
    assert_eq!(report.summary.no_change, 22);
    assert_eq!(report.count(|s| *s == ResourceStatus::Unchanged), 22);
    assert_eq!(report.fabric, None);
}

#[tokio::test]
async fn test_seeded_cluster_is_converged() {
    let cluster = MemoryCluster::new();
    let desired = map_topology(&leaf_spine(2));
    for resource in &desired {
        cluster.seed(NAMESPACE, resource);
    }

    let report = install(&cluster, desired).await;
    assert!(cluster.mutations().is_empty());
    assert!(report.is_success());
}

#[tokio::test]
async fn test_drift_is_updated_with_current_token() {
    let cluster = MemoryCluster::new();
    let desired = map_topology(&leaf_spine(2));
    install(&cluster, desired.clone()).await;

    let leaf = node_id("dc1-leaf1");
    cluster.tamper(NAMESPACE, &leaf, serde_json::json!({"node": "someone-else"}));
    cluster.clear_calls();

    let report = install(&cluster, desired.clone()).await;
    assert_eq!(cluster.mutations(), vec![Call::Update(leaf.clone())]);
    assert_eq!(report.status_of(&leaf), Some(&ResourceStatus::Updated));

    let expected = desired.iter().find(|r| r.id == leaf).unwrap().spec_value();
    assert_eq!(cluster.spec_of(NAMESPACE, &leaf), Some(expected));
}

#[tokio::test]
async fn test_removed_entities_are_deleted_links_first() {
    let cluster = MemoryCluster::new();
    install(&cluster, map_topology(&leaf_spine(4))).await;
    cluster.clear_calls();

    // leaf3 and leaf4 disappear with their 8 links; spines lose interfaces
    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert!(report.is_success());
    assert_eq!(report.summary.delete, 10);
    assert_eq!(report.summary.update, 2);

    let mutations = cluster.mutations();
    let deletes: Vec<Call> = mutations
        .iter()
        .filter(|c| matches!(c, Call::Delete(_)))
        .cloned()
        .collect();
    let kinds = kinds_of(&deletes);
    let first_node = kinds.iter().position(|k| *k == ResourceKind::Node).unwrap();
    assert_eq!(first_node, 8);
    assert!(kinds[first_node..].iter().all(|k| *k == ResourceKind::Node));

    // updates come before any delete
    let last_update = mutations
        .iter()
        .rposition(|c| matches!(c, Call::Update(_)))
        .unwrap();
    let first_delete = mutations
        .iter()
        .position(|c| matches!(c, Call::Delete(_)))
        .unwrap();
    assert!(last_update < first_delete);
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Node), 4);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let cluster = MemoryCluster::new();
    let leaf = node_id("dc1-leaf1");
    cluster.fail_next(leaf.clone(), ApplyError::Transient("503".into()));
    cluster.fail_next(leaf.clone(), ApplyError::Transient("503".into()));

    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert!(report.is_success());
    let attempts = cluster
        .calls()
        .iter()
        .filter(|c| **c == Call::Create(leaf.clone()))
        .count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_one_resource_and_its_links() {
    let cluster = MemoryCluster::new();
    let leaf = node_id("dc1-leaf1");
    for _ in 0..3 {
        cluster.fail_next(leaf.clone(), ApplyError::Transient("timeout".into()));
    }

    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert!(!report.is_success());
    assert!(matches!(report.status_of(&leaf), Some(ResourceStatus::Failed(_))));

    // 4 links touch leaf1; none of them is attempted
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 5);
    for link in failed.iter().filter(|r| r.id.kind == ResourceKind::Link) {
        assert!(!cluster.calls().contains(&Call::Create(link.id.clone())));
    }

    // everything else is in place
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Node), 3);
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Link), 4);
}

#[tokio::test]
async fn test_unreadable_resource_is_failed_without_mutation() {
    let cluster = MemoryCluster::new();
    let leaf = node_id("dc1-leaf2");
    cluster.always_transient(leaf.clone());

    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert!(matches!(report.status_of(&leaf), Some(ResourceStatus::Failed(_))));
    assert!(!cluster.calls().contains(&Call::Create(leaf)));
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Node), 3);
}

#[tokio::test]
async fn test_single_conflict_is_resolved_by_reread() {
    let cluster = MemoryCluster::new();
    let leaf = node_id("dc1-leaf1");
    cluster.fail_next(leaf.clone(), ApplyError::Conflict { stale_token: None });

    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert!(report.is_success());
    assert_eq!(report.status_of(&leaf), Some(&ResourceStatus::Created));

    let calls = cluster.calls();
    let on_leaf: Vec<_> = calls
        .iter()
        .filter(|c| c.resource() == Some(&leaf))
        .collect();
    // initial read, conflicting create, re-read, create
    assert_eq!(
        on_leaf,
        vec![
            &Call::Get(leaf.clone()),
            &Call::Create(leaf.clone()),
            &Call::Get(leaf.clone()),
            &Call::Create(leaf.clone()),
        ]
    );
}

#[tokio::test]
async fn test_stale_token_update_is_retried_once() {
    let cluster = MemoryCluster::new();
    let desired = map_topology(&leaf_spine(2));
    install(&cluster, desired.clone()).await;

    let leaf = node_id("dc1-leaf2");
    cluster.tamper(NAMESPACE, &leaf, serde_json::json!({}));
    cluster.fail_next(leaf.clone(), ApplyError::Conflict { stale_token: None });
    cluster.clear_calls();

    let report = install(&cluster, desired).await;
    assert_eq!(report.status_of(&leaf), Some(&ResourceStatus::Updated));
    assert_eq!(
        cluster.mutations(),
        vec![Call::Update(leaf.clone()), Call::Update(leaf)]
    );
}

#[tokio::test]
async fn test_second_conflict_fails_resource() {
    let cluster = MemoryCluster::new();
    let leaf = node_id("dc1-leaf1");
    cluster.fail_next(leaf.clone(), ApplyError::Conflict { stale_token: None });
    cluster.fail_next(leaf.clone(), ApplyError::Conflict { stale_token: None });

    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert!(matches!(report.status_of(&leaf), Some(ResourceStatus::Failed(_))));
    assert_eq!(
        cluster
            .calls()
            .iter()
            .filter(|c| **c == Call::Create(leaf.clone()))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_fatal_error_aborts_and_keeps_applied_resources() {
    let cluster = MemoryCluster::new();
    cluster.fatal_after(8);

    let report = install(&cluster, map_topology(&leaf_spine(4))).await;
    assert!(matches!(report.outcome, SyncOutcome::Aborted(_)));
    assert_eq!(report.count(|s| s.is_present()), 8);
    assert_eq!(report.count(ResourceStatus::is_failed), 1);
    assert_eq!(report.count(|s| *s == ResourceStatus::Skipped), 13);
    assert_eq!(
        cluster.count(NAMESPACE, ResourceKind::Node) + cluster.count(NAMESPACE, ResourceKind::Link),
        8
    );
}

#[tokio::test]
async fn test_fabric_failure_aborts_before_any_resource() {
    let cluster = MemoryCluster::new();
    cluster.fail_next(
        ResourceId::new(ResourceKind::Fabric, NAMESPACE),
        ApplyError::Fatal("unauthorized".into()),
    );

    let report = install(&cluster, map_topology(&leaf_spine(2))).await;
    assert!(matches!(report.outcome, SyncOutcome::Aborted(_)));
    assert!(matches!(report.fabric, Some(ResourceStatus::Failed(_))));
    assert!(
        cluster
            .mutations()
            .iter()
            .all(|c| matches!(c, Call::EnsureNamespace(_)))
    );
}

#[tokio::test]
async fn test_cancellation_then_resume_creates_the_rest() {
    let cluster = MemoryCluster::new();
    let desired = map_topology(&leaf_spine(4));

    let cancel = CancellationToken::new();
    cluster.cancel_after(10, cancel.clone());
    let ctx = context().with_cancel(cancel);
    let report = Reconciler::new(&cluster, &ctx).reconcile(desired.clone()).await;

    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    assert_eq!(report.count(|s| *s == ResourceStatus::Created), 10);
    assert_eq!(report.count(|s| *s == ResourceStatus::Skipped), 12);
    assert_eq!(
        cluster.count(NAMESPACE, ResourceKind::Node) + cluster.count(NAMESPACE, ResourceKind::Link),
        10
    );

    cluster.clear_calls();
    let report = install(&cluster, desired).await;
    assert!(report.is_success());
    let creates = cluster
        .mutations()
        .iter()
        .filter(|c| matches!(c, Call::Create(_)))
        .count();
    assert_eq!(creates, 12);
    assert_eq!(report.count(|s| *s == ResourceStatus::Unchanged), 10);
}

#[tokio::test]
async fn test_plan_does_not_mutate() {
    let cluster = MemoryCluster::new();
    let ctx = context();
    let (_, plan) = Reconciler::new(&cluster, &ctx)
        .plan(map_topology(&leaf_spine(4)))
        .await
        .unwrap();

    assert_eq!(plan.summary().create, 22);
    assert!(cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_teardown_removes_everything() {
    let cluster = MemoryCluster::new();
    install(&cluster, map_topology(&leaf_spine(4))).await;
    cluster.clear_calls();

    let ctx = context();
    let report = Reconciler::new(&cluster, &ctx).teardown().await;
    assert!(report.is_success());
    assert_eq!(report.count(|s| *s == ResourceStatus::Deleted), 22);
    assert_eq!(report.fabric, Some(ResourceStatus::Deleted));
    assert!(!cluster.has_namespace(NAMESPACE));

    let mutations = cluster.mutations();
    assert_eq!(mutations.last(), Some(&Call::DeleteNamespace(NAMESPACE.to_string())));
    let kinds = kinds_of(&mutations);
    assert_eq!(kinds.iter().position(|k| *k == ResourceKind::Node), Some(16));
}

#[tokio::test]
async fn test_other_topologies_are_not_touched() {
    let cluster = MemoryCluster::new();
    install(&cluster, map_topology(&leaf_spine(2))).await;

    let ctx = SyncContext::new("other", "clab-other").with_retry(RetryPolicy::immediate(1));
    let report = Reconciler::new(&cluster, &ctx).teardown().await;
    assert!(report.resources.is_empty());
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Node), 4);
    assert_eq!(cluster.name(), "memory");
}

#[tokio::test]
async fn test_shared_resources_are_created_before_nodes() {
    let cluster = MemoryCluster::new();
    let report = install(&cluster, desired_resources(&leaf_spine(2))).await;
    assert!(report.is_success());

    let kinds = kinds_of(&cluster.mutations());
    assert_eq!(kinds.len(), 5 + 4 + 8);
    assert!(kinds.windows(2).all(|w| w[0] <= w[1]), "{:?}", kinds);
    assert!(kinds[..5].iter().all(ResourceKind::is_shared));
    assert_eq!(cluster.count(NAMESPACE, ResourceKind::Profile), 1);
    assert!(cluster.contains(
        NAMESPACE,
        &ResourceId::new(ResourceKind::Profile, "dc1-srl-24.10.1")
    ));
}

#[tokio::test]
async fn test_failed_profile_fails_its_nodes_and_links() {
    let cluster = MemoryCluster::new();
    let profile = ResourceId::new(ResourceKind::Profile, "dc1-srl-24.10.1");
    cluster.always_transient(profile.clone());

    let report = install(&cluster, desired_resources(&leaf_spine(2))).await;
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert!(!report.is_success());
    assert!(report.status_of(&profile).is_some_and(ResourceStatus::is_failed));

    let spine = report.status_of(&node_id("dc1-spine1")).cloned();
    assert_eq!(
        spine,
        Some(ResourceStatus::Failed(format!("dependency {} failed", profile)))
    );
    assert_eq!(report.failed().count(), 1 + 4 + 8);
    assert!(
        cluster
            .mutations()
            .iter()
            .filter_map(Call::resource)
            .all(|id| id.kind.is_shared())
    );
}

#[tokio::test]
async fn test_teardown_deletes_shared_resources_last() {
    let cluster = MemoryCluster::new();
    install(&cluster, desired_resources(&leaf_spine(2))).await;
    cluster.clear_calls();

    let ctx = context();
    let report = Reconciler::new(&cluster, &ctx).teardown().await;
    assert!(report.is_success());
    assert_eq!(report.count(|s| *s == ResourceStatus::Deleted), 17);

    let kinds = kinds_of(&cluster.mutations());
    assert!(kinds.windows(2).all(|w| w[0] >= w[1]), "{:?}", kinds);
    assert_eq!(kinds.last(), Some(&ResourceKind::Init));
    for kind in ResourceKind::NAMESPACED {
        assert_eq!(cluster.count(NAMESPACE, kind), 0, "{}", kind);
    }
}
