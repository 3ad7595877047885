use podquorum::{
    generate_id, Config, ConfigBuilder, ConsensusEngine, Error, LabelSelector, MembershipWatcher,
    StartOptions,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;

use harness::{
    constant::{APP_LABEL, PEER_ADDRS, PEER_IPS, PEER_PORT, SELF_ADDR, SELF_IP, SELF_POD},
    fakes::{FakeEngine, FakeNode, FakeRegistry},
    logger::build_logger,
    utils::test_config,
};

async fn start_node(engine: &FakeEngine, dir: &tempfile::TempDir) -> Arc<FakeNode> {
    let options = StartOptions {
        data_dir: dir.path().to_path_buf(),
        address: SELF_ADDR.to_owned(),
        peers: vec![],
    };
    Arc::new(engine.start(options).await.unwrap())
}

fn watcher(
    node: Arc<FakeNode>,
    registry: &FakeRegistry,
    config: &Config,
) -> MembershipWatcher<FakeNode, FakeRegistry> {
    MembershipWatcher::new(
        node,
        Arc::new(registry.clone()),
        LabelSelector::new("app", APP_LABEL),
        SELF_ADDR.to_owned(),
        config,
        build_logger(),
    )
}

/// Registry listing the own pod plus the given sibling IPs.
fn registry_with(ips: &[&str]) -> FakeRegistry {
    let registry = FakeRegistry::new(SELF_IP, APP_LABEL);
    registry.add_pod(SELF_POD, Some(SELF_IP), PEER_PORT, true);
    for (i, ip) in ips.iter().enumerate() {
        registry.add_pod(&format!("kvstore-{}", i + 1), Some(ip), PEER_PORT, true);
    }
    registry
}

#[tokio::test]
async fn test_vanished_member_is_removed_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_members(SELF_ADDR, &[SELF_ADDR, PEER_ADDRS[0], PEER_ADDRS[1]]);
    let registry = registry_with(&[PEER_IPS[0]]);
    let node = start_node(&engine, &dir).await;
    let mut watcher = watcher(node, &registry, &test_config(&dir));

    let report = watcher.tick().await.unwrap();

    assert_eq!(report.leader, SELF_ADDR);
    assert_eq!(report.members, 3);
    assert_eq!(report.live, 2);
    assert_eq!(report.removed, vec![generate_id(PEER_ADDRS[1])]);
    assert!(report.failed.is_empty());
    assert_eq!(engine.removals(), vec![generate_id(PEER_ADDRS[1])]);

    // Nothing left to do on the next tick.
    let report = watcher.tick().await.unwrap();
    assert!(report.missing.is_empty());
    assert_eq!(engine.removals().len(), 1);
}

#[tokio::test]
async fn test_own_member_survives_empty_registry() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_members(SELF_ADDR, &[SELF_ADDR, PEER_ADDRS[0]]);
    let registry = FakeRegistry::new(SELF_IP, APP_LABEL);
    let node = start_node(&engine, &dir).await;
    let mut watcher = watcher(node, &registry, &test_config(&dir));

    let report = watcher.tick().await.unwrap();

    assert_eq!(report.live, 0);
    assert_eq!(report.removed, vec![generate_id(PEER_ADDRS[0])]);
    assert!(!engine.removals().contains(&generate_id(SELF_ADDR)));
    assert_eq!(engine.members().len(), 1);
}

#[tokio::test]
async fn test_failed_removal_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_members(
        SELF_ADDR,
        &[SELF_ADDR, PEER_ADDRS[0], PEER_ADDRS[1], PEER_ADDRS[2]],
    );
    let registry = registry_with(&[]);
    let stuck = generate_id(PEER_ADDRS[0]);
    engine.fail_removals_of(stuck, 1);
    let node = start_node(&engine, &dir).await;
    let mut watcher = watcher(node, &registry, &test_config(&dir));

    let report = watcher.tick().await.unwrap();

    assert_eq!(report.failed, vec![stuck]);
    assert_eq!(
        report.removed,
        vec![generate_id(PEER_ADDRS[1]), generate_id(PEER_ADDRS[2])]
    );

    // The failed member is still missing and is retried.
    let report = watcher.tick().await.unwrap();
    assert_eq!(report.removed, vec![stuck]);
    assert_eq!(engine.members().len(), 1);
}

#[tokio::test]
async fn test_failed_queries_skip_the_tick() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_members(SELF_ADDR, &[SELF_ADDR, PEER_ADDRS[0]]);
    let registry = registry_with(&[]);
    let node = start_node(&engine, &dir).await;
    let mut watcher = watcher(node, &registry, &test_config(&dir));

    engine.fail_next_leader_queries(1);
    assert!(matches!(watcher.tick().await, Err(Error::Engine(_))));

    registry.fail_next_lists(1);
    assert!(matches!(watcher.tick().await, Err(Error::Registry(_))));
    assert!(engine.removals().is_empty());

    let report = watcher.tick().await.unwrap();
    assert_eq!(report.removed, vec![generate_id(PEER_ADDRS[0])]);
}

#[tokio::test]
async fn test_eviction_threshold_defers_removal() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigBuilder::from_config(test_config(&dir))
        .eviction_threshold(2)
        .build();
    let engine = FakeEngine::with_members(SELF_ADDR, &[SELF_ADDR, PEER_ADDRS[0], PEER_ADDRS[1]]);
    let registry = FakeRegistry::new(SELF_IP, APP_LABEL);
    registry.add_pod(SELF_POD, Some(SELF_IP), PEER_PORT, true);
    registry.add_pod("kvstore-2", Some(PEER_IPS[1]), PEER_PORT, true);
    let node = start_node(&engine, &dir).await;
    let mut watcher = watcher(node, &registry, &config);

    let flapping = generate_id(PEER_ADDRS[1]);
    let gone = generate_id(PEER_ADDRS[0]);

    let report = watcher.tick().await.unwrap();
    assert_eq!(report.deferred, vec![gone]);
    assert!(report.removed.is_empty());

    // kvstore-2 disappears for one tick only, its counter starts over.
    registry.remove_pod("kvstore-2");
    let report = watcher.tick().await.unwrap();
    assert_eq!(report.removed, vec![gone]);
    assert_eq!(report.deferred, vec![flapping]);

    registry.add_pod("kvstore-2", Some(PEER_IPS[1]), PEER_PORT, true);
    let report = watcher.tick().await.unwrap();
    assert!(report.missing.is_empty());

    registry.remove_pod("kvstore-2");
    let report = watcher.tick().await.unwrap();
    assert_eq!(report.deferred, vec![flapping]);
    assert_eq!(engine.removals(), vec![gone]);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_ticks_until_quit() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_members(SELF_ADDR, &[SELF_ADDR, PEER_ADDRS[0]]);
    let registry = registry_with(&[]);
    let node = start_node(&engine, &dir).await;
    let config = test_config(&dir);
    let interval = config.watch_interval();
    let watcher = watcher(node, &registry, &config);

    let (tx_quit_signal, rx_quit_signal) = oneshot::channel();
    let handle = tokio::spawn(watcher.run(rx_quit_signal));

    // No check before the first interval has elapsed.
    tokio::time::sleep(interval / 2).await;
    assert_eq!(registry.list_calls(), 0);

    tokio::time::sleep(interval).await;
    assert_eq!(registry.list_calls(), 1);
    assert_eq!(engine.removals(), vec![generate_id(PEER_ADDRS[0])]);

    tx_quit_signal.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_pods_of_other_workloads_do_not_count_as_live() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::with_members(SELF_ADDR, &[SELF_ADDR, PEER_ADDRS[0]]);
    let registry = registry_with(&[]);
    // Same IP and port, but a different workload.
    registry.add_labeled_pod("cache-0", Some(PEER_IPS[0]), PEER_PORT, true, "cache");
    let node = start_node(&engine, &dir).await;
    let mut watcher = watcher(node, &registry, &test_config(&dir));

    let report = watcher.tick().await.unwrap();

    assert_eq!(report.live, 1);
    assert_eq!(report.removed, vec![generate_id(PEER_ADDRS[0])]);
    assert_eq!(registry.selectors(), vec![format!("app={}", APP_LABEL)]);
}
