//! Single-node cluster tests.
//!
//! Tests basic cluster operations with a single node.

mod common;

use common::TestCluster;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_cluster::ClusterError;
use tessera_core::prelude::*;
use tessera_core::providers::MockClock;

fn chunk_write(block: BlockId, name: &str, data: &[u8], overwrite: bool) -> ContainerCommand {
    ContainerCommand::write_chunk(block, ChunkInfo::for_data(name, 0, data), data.to_vec(), overwrite)
}

fn core_code(err: &ClusterError) -> Option<&'static str> {
    err.as_core().map(TesseraError::code)
}

#[tokio::test]
async fn test_single_node_startup() {
    let mut cluster = TestCluster::new(1).await;
    cluster.initialize().await;

    let leader_idx = cluster.wait_for_leader(5000).await;
    assert_eq!(leader_idx, Some(0), "Single node should become leader");

    let node = &cluster.nodes[0];
    assert!(node.is_leader().await);
    assert_eq!(node.leader().await, Some(1));
    assert!(node.leadership_context().is_leader());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_container_commands_are_idempotent_through_consensus() {
    let mut cluster = TestCluster::started(1).await;
    let node = cluster.leader().await;

    let c1 = ContainerId::new(1);
    let block = BlockId::new(c1, 7);
    let data = b"replicated chunk".to_vec();

    let create = ContainerCommand::create(c1);
    let created = node
        .apply_container_command(create.clone())
        .await
        .expect("create container");
    assert_eq!(
        node.apply_container_command(create).await.expect("retry create"),
        created
    );

    let write = chunk_write(block, "chunk-0", &data, false);
    let written = node
        .apply_container_command(write.clone())
        .await
        .expect("write chunk");
    assert_eq!(
        node.apply_container_command(write.clone())
            .await
            .expect("retry write"),
        written
    );

    let put = ContainerCommand::put_block(BlockData::new(
        block,
        1,
        vec![ChunkInfo::for_data("chunk-0", 0, &data)],
    ));
    node.apply_container_command(put).await.expect("put block");

    node.apply_container_command(ContainerCommand::close(c1))
        .await
        .expect("close container");

    // A new write is rejected once the container is closed.
    let late = chunk_write(BlockId::new(c1, 8), "chunk-0", b"late", false);
    let err = node
        .apply_container_command(late)
        .await
        .expect_err("write to closed container");
    assert_eq!(core_code(&err), Some("E102"), "unexpected error: {err}");

    // A retry of the earlier write still gets its recorded success.
    assert_eq!(
        node.apply_container_command(write).await.expect("late retry"),
        written
    );

    let state = node.state_machine().state();
    assert_eq!(state.containers.state(c1), Some(ContainerState::Closed));
    assert_eq!(state.containers.read_chunk(block, "chunk-0").unwrap(), data);
    drop(state);

    let report = node.scrub_container(c1).expect("scrub");
    assert!(report.is_clean());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_create_snapshot() {
    let mut cluster = TestCluster::started(1).await;
    let node = cluster.leader().await;

    assert!(node.create_bucket("vol", "b").await.expect("create bucket"));
    assert!(!node.create_bucket("vol", "b").await.expect("create bucket again"));

    let generated = node
        .create_snapshot("vol", "b", "")
        .await
        .expect("create snapshot");
    assert!(generated.name.starts_with('s'), "generated name {}", generated.name);
    assert_eq!(generated.table_key(), format!("/vol/b/{}", generated.name));
    assert_eq!(generated.path_prev_id, None);

    let named = node
        .create_snapshot("vol", "b", "nightly")
        .await
        .expect("create named snapshot");
    assert_eq!(named.path_prev_id, Some(generated.snapshot_id));
    assert!(named.creation_sequence > generated.creation_sequence);

    let err = node
        .create_snapshot("vol", "b", "nightly")
        .await
        .expect_err("duplicate name");
    assert!(matches!(
        err.as_core(),
        Some(TesseraError::SnapshotExists { .. })
    ));

    let err = node
        .create_snapshot("vol", "missing", "x")
        .await
        .expect_err("unknown bucket");
    assert!(matches!(
        err.as_core(),
        Some(TesseraError::BucketNotFound { .. })
    ));

    let names: Vec<_> = node
        .list_snapshots("vol", "b")
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"nightly".to_string()));
    assert_eq!(
        node.snapshot_info("vol", "b", "nightly").expect("lookup"),
        named
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_generated_names_are_unique() {
    // Every create reads the same instant, so generated names collide.
    let clock = Arc::new(MockClock::at_millis(1_700_000_000_000));
    let mut cluster = TestCluster::with_clock(1, clock).await;
    cluster.initialize().await;
    cluster.wait_for_leader(5000).await.expect("No leader elected");
    let node = cluster.leader().await;
    node.create_bucket("vol", "b").await.expect("create bucket");

    let (a, b, c) = tokio::join!(
        node.create_snapshot("vol", "b", ""),
        node.create_snapshot("vol", "b", ""),
        node.create_snapshot("vol", "b", ""),
    );
    let names: BTreeSet<_> = [a, b, c]
        .into_iter()
        .map(|r| r.expect("concurrent create").name)
        .collect();
    let expected: BTreeSet<_> = [
        "s20231114-221320.000",
        "s20231114-221320.000-1",
        "s20231114-221320.000-2",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(names, expected);
    assert!(!node.is_snapshot_chain_corrupted());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_nested_bucket_names_rejected() {
    let mut cluster = TestCluster::started(1).await;
    let node = cluster.leader().await;

    node.create_bucket("vol", "b").await.expect("create bucket");
    let err = node
        .create_bucket("vol", "b/x")
        .await
        .expect_err("nested bucket name");
    assert_eq!(core_code(&err), Some("E208"), "unexpected error: {err}");

    node.create_snapshot("vol", "b", "s1").await.expect("snapshot");
    let err = node
        .create_snapshot("vol", "b/x", "s2")
        .await
        .expect_err("snapshot of nested bucket name");
    assert_eq!(core_code(&err), Some("E208"), "unexpected error: {err}");
    assert_eq!(node.list_snapshots("vol", "b").len(), 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_state_survives_restart() {
    let mut cluster = TestCluster::started(1).await;

    let last = {
        let node = cluster.leader().await;
        node.create_bucket("vol", "b").await.expect("create bucket");
        node.put_key("vol", "b", "k1", 10, "aaa").await.expect("put key");

        let mut last = None;
        for i in 0..5 {
            let info = node
                .create_snapshot("vol", "b", &format!("snap-{i}"))
                .await
                .expect("create snapshot");
            last = Some(info);
        }
        last.expect("created snapshots")
    };

    cluster.restart(0).await;
    cluster.wait_for_leader(10_000).await.expect("leader after restart");
    let node = cluster.leader().await;

    assert!(!node.is_snapshot_chain_corrupted());
    assert_eq!(node.list_snapshots("vol", "b").len(), 5);
    assert_eq!(node.snapshot_info("vol", "b", "snap-4").expect("lookup"), last);

    let next = node
        .create_snapshot("vol", "b", "after-restart")
        .await
        .expect("create after restart");
    assert_eq!(next.path_prev_id, Some(last.snapshot_id));
    assert_eq!(next.global_prev_id, Some(last.snapshot_id));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_diff_completes() {
    let mut cluster = TestCluster::started(1).await;
    let node = cluster.leader().await;

    node.create_bucket("vol", "b").await.expect("create bucket");
    node.put_key("vol", "b", "keep", 1, "k").await.expect("put");
    node.put_key("vol", "b", "edit", 1, "old").await.expect("put");
    node.put_key("vol", "b", "gone", 1, "g").await.expect("put");
    node.put_key("vol", "b", "before", 1, "r").await.expect("put");
    node.create_snapshot("vol", "b", "s1").await.expect("snapshot s1");

    node.put_key("vol", "b", "edit", 2, "new").await.expect("modify");
    node.delete_key("vol", "b", "gone").await.expect("delete");
    node.rename_key("vol", "b", "before", "after").await.expect("rename");
    node.put_key("vol", "b", "born", 1, "n").await.expect("create");
    node.create_snapshot("vol", "b", "s2").await.expect("snapshot s2");

    let request = SnapshotDiffRequest::new("vol", "b", "s1", "s2");
    let resp = cluster.poll_diff(&request, 10_000).await;
    let report = resp.report.expect("done diff has a report");
    assert_eq!(report.total_entries, 4);
    assert_eq!(report.next_token, None);

    let entries: BTreeSet<_> = report.entries.into_iter().collect();
    let expected: BTreeSet<_> = [
        DiffEntry::create("born"),
        DiffEntry::delete("gone"),
        DiffEntry::modify("edit"),
        DiffEntry::rename("before", "after"),
    ]
    .into_iter()
    .collect();
    assert_eq!(entries, expected);

    let jobs = node
        .list_snapshot_diff_jobs("vol", "b", Some(JobStatus::Done))
        .expect("list jobs");
    assert_eq!(jobs.len(), 1);

    let err = node
        .snapshot_diff(&SnapshotDiffRequest::new("vol", "b", "s1", "nope"))
        .await
        .expect_err("unknown snapshot");
    assert_eq!(core_code(&err), Some("E202"), "unexpected error: {err}");

    cluster.shutdown().await;
}
