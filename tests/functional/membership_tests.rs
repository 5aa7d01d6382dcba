//! Membership tests: `forget_all`.

use valkey_topology::Error;

use crate::common::{MockCluster, controller_with};

const A: &str = "127.0.0.1:7000";
const B: &str = "127.0.0.1:7001";
const C: &str = "127.0.0.1:7002";
const D: &str = "127.0.0.1:7003";

fn four_node_cluster() -> MockCluster {
    let cluster = MockCluster::new();
    cluster.add_master(A, 0..=8191);
    cluster.add_master(B, 8192..=16383);
    cluster.add_slave(C, A);
    cluster.add_master(D, []);
    cluster
}

#[tokio::test]
async fn test_forget_all_reaches_every_other_node() {
    let cluster = four_node_cluster();
    let mut controller = controller_with(&cluster, A, Default::default()).await;
    let target_id = cluster.id(D);

    controller.forget_all(D).await.unwrap();

    assert_eq!(
        cluster.commands(),
        vec![
            format!("{A} CLUSTER FORGET {target_id}"),
            format!("{B} CLUSTER FORGET {target_id}"),
            format!("{C} CLUSTER FORGET {target_id}"),
        ]
    );
    assert!(!controller.observed().contains(D));
    assert_eq!(controller.observed().len(), 3);
}

#[tokio::test]
async fn test_forget_all_aborts_on_first_failure() {
    let cluster = four_node_cluster();
    cluster.fail_command(B, "CLUSTER FORGET");
    let mut controller = controller_with(&cluster, A, Default::default()).await;

    let err = controller.forget_all(D).await.unwrap_err();
    assert!(matches!(
        err,
        Error::CommandFailed { ref address, command: "CLUSTER FORGET", .. } if address == B
    ));
    assert!(err.is_retryable());
    assert!(cluster.position(&format!("{C} CLUSTER FORGET")).is_none());
}

#[tokio::test]
async fn test_forget_unknown_node() {
    let cluster = four_node_cluster();
    let mut controller = controller_with(&cluster, A, Default::default()).await;

    let err = controller.forget_all("127.0.0.1:7999").await.unwrap_err();
    assert!(matches!(err, Error::NodeNotFound(_)));
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_forget_skips_disconnected_peers() {
    let cluster = four_node_cluster();
    cluster.set_down(C, true);
    let mut controller = controller_with(&cluster, A, Default::default()).await;

    controller.forget_all(D).await.unwrap();

    assert!(cluster.position(&format!("{C} CLUSTER FORGET")).is_none());
    assert!(cluster.position(&format!("{B} CLUSTER FORGET")).is_some());
}

/// Forgetting the seed moves cluster-wide reads to another node.
#[tokio::test]
async fn test_forget_seed_falls_back_to_other_node() {
    let cluster = MockCluster::new();
    cluster.add_master(A, 0..=16383);
    cluster.add_master(B, []);
    cluster.add_master(D, []);
    let mut controller = controller_with(&cluster, D, Default::default()).await;

    controller.forget_all(D).await.unwrap();

    assert!(!controller.observed().contains(D));
    assert!(controller.observed().contains(A));
}

/// Every node down means nothing to refresh from.
#[tokio::test]
async fn test_refresh_with_no_reachable_node() {
    let cluster = four_node_cluster();
    let mut controller = controller_with(&cluster, A, Default::default()).await;
    for address in [A, B, C, D] {
        cluster.set_down(address, true);
    }

    let err = controller.refresh().await.unwrap_err();
    match err {
        Error::NoReachableNode(tried) => assert_eq!(tried.len(), 4),
        other => panic!("expected NoReachableNode, got {other}"),
    }
}
