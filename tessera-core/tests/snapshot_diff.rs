//! Integration tests for the snapshot diff engine with a durable job table.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tessera_core::prelude::*;

fn registry_with_diff(keys: usize) -> Arc<RwLock<SnapshotRegistry>> {
    let leader = LeadershipContext::leader(1, 1);
    let manager = SnapshotManager::default();
    let mut ns = KeyNamespace::new();
    ns.create_bucket("vol", "bucket").unwrap();
    let mut registry = SnapshotRegistry::new();
    let mut index = 1;

    let s1 = manager.prepare(&leader, &registry, "vol", "bucket", "snap1").unwrap();
    index += 1;
    registry
        .apply_create(s1, index, ns.checkpoint("vol", "bucket").unwrap())
        .unwrap();

    for i in 0..keys {
        index += 1;
        ns.put_key("vol", "bucket", &format!("key{i}"), 1, "c", index).unwrap();
    }

    let s2 = manager.prepare(&leader, &registry, "vol", "bucket", "snap2").unwrap();
    index += 1;
    registry
        .apply_create(s2, index, ns.checkpoint("vol", "bucket").unwrap())
        .unwrap();
    Arc::new(RwLock::new(registry))
}

async fn wait_done(
    engine: &Arc<SnapshotDiffEngine>,
    ctx: &LeadershipContext,
    request: &SnapshotDiffRequest,
) -> SnapshotDiffResponse {
    let mut response = engine.request_diff(ctx, request).unwrap();
    for _ in 0..400 {
        if response.job_status == JobStatus::Done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(response.wait_time_ms.min(10))).await;
        response = engine.request_diff(ctx, request).unwrap();
    }
    response
}

#[tokio::test]
async fn test_diff_after_hundred_keys() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileDiffJobStore::open(dir.path().join("diff_jobs.json")).unwrap());
    let engine = SnapshotDiffEngine::new(
        DiffEngineConfig {
            batch_size: 16,
            ..DiffEngineConfig::default()
        },
        registry_with_diff(100),
        store,
        Arc::new(SystemClock),
    );

    let ctx = LeadershipContext::leader(1, 1);
    let request = SnapshotDiffRequest::new("vol", "bucket", "snap1", "snap2");
    let response = wait_done(&engine, &ctx, &request).await;
    assert_eq!(response.job_status, JobStatus::Done);
    assert_eq!(response.report.unwrap().entries.len(), 100);
}

#[tokio::test]
async fn test_job_table_survives_process_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diff_jobs.json");
    let registry = registry_with_diff(40);
    let request = SnapshotDiffRequest::new("vol", "bucket", "snap1", "snap2");

    // First process: accepts the job, then loses leadership before any worker ran.
    {
        let store = Arc::new(FileDiffJobStore::open(&path).unwrap());
        let engine = SnapshotDiffEngine::new(
            DiffEngineConfig::default(),
            registry.clone(),
            store,
            Arc::new(SystemClock),
        );
        let first = engine
            .request_diff(&LeadershipContext::leader(1, 1), &request)
            .unwrap();
        assert_eq!(first.job_status, JobStatus::InProgress);
        engine.on_leadership_lost();
    }

    // Second process on the same node wins a later term and finishes the job.
    let store = Arc::new(FileDiffJobStore::open(&path).unwrap());
    assert_eq!(store.load_all().unwrap().len(), 1);
    let engine = SnapshotDiffEngine::new(
        DiffEngineConfig::default(),
        registry,
        store,
        Arc::new(SystemClock),
    );
    let ctx = LeadershipContext::leader(1, 2);
    assert_eq!(engine.on_leadership_acquired(&ctx).unwrap(), 1);

    let response = wait_done(&engine, &ctx, &request).await;
    assert_eq!(response.job_status, JobStatus::Done);
    assert_eq!(response.report.unwrap().total_entries, 40);

    let jobs = engine.list_jobs("vol", "bucket", Some(JobStatus::Done)).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].entries_found, 40);
}

#[tokio::test]
async fn test_concurrent_identical_requests_observe_one_job() {
    let registry = registry_with_diff(10);
    let store = Arc::new(MemoryDiffJobStore::new());
    let engine = SnapshotDiffEngine::new(
        DiffEngineConfig::default(),
        registry,
        store.clone(),
        Arc::new(SystemClock),
    );
    let ctx = LeadershipContext::leader(1, 1);
    let request = SnapshotDiffRequest::new("vol", "bucket", "snap1", "snap2");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let request = request.clone();
            tokio::spawn(async move { engine.request_diff(&ctx, &request).unwrap() })
        })
        .collect();
    for task in tasks {
        let response = task.await.unwrap();
        assert_ne!(response.job_status, JobStatus::Rejected);
    }
    assert_eq!(store.load_all().unwrap().len(), 1);

    let done = wait_done(&engine, &ctx, &request).await;
    assert_eq!(done.report.unwrap().total_entries, 10);
}
