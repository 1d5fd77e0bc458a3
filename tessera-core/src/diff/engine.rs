//! Asynchronous snapshot diff engine.
//!
//! Jobs are keyed by [`DiffJobKey`]; a request for a key that already has a
//! job observes that job instead of starting another computation. Workers run
//! on the Tokio runtime, off the replication path, bounded by a semaphore, and
//! persist their cursor after every batch so a job interrupted by a leadership
//! change can be resumed.

use super::catalog::SnapshotCatalog;
use super::compute::diff_batch;
use super::job::{DiffJobKey, DiffJobSummary, DiffOptions, JobStatus, SnapshotDiffJob};
use super::report::{SnapshotDiffReport, page, parse_token};
use super::store::DiffJobStore;
use crate::error::{Result, TesseraError};
use crate::leadership::LeadershipContext;
use crate::providers::Clock;
use crate::snapshot::SnapshotInfo;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Diff engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEngineConfig {
    /// Jobs computing at the same time.
    pub max_concurrent_jobs: usize,
    /// Queued plus running jobs before new keys are rejected.
    pub max_queued_jobs: usize,
    /// Objects compared between two progress checkpoints.
    pub batch_size: usize,
    /// Page size used when a request asks for 0.
    pub default_page_size: usize,
    /// Largest accepted page size.
    pub max_page_size: usize,
    /// Suggested delay before polling an unfinished job again.
    pub wait_time_hint_ms: u64,
    /// Age after which finished jobs are purged.
    pub job_max_age_ms: u64,
}

impl Default for DiffEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_queued_jobs: 64,
            batch_size: 256,
            default_page_size: 1000,
            max_page_size: 10_000,
            wait_time_hint_ms: 1000,
            job_max_age_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

impl DiffEngineConfig {
    /// Check that every bound is usable.
    pub fn validate(&self) -> Result<()> {
        let fail = |cause: &str| -> Result<()> {
            Err(TesseraError::Config {
                cause: cause.to_string(),
            })
        };
        if self.max_concurrent_jobs == 0 {
            return fail("diff.max_concurrent_jobs must be at least 1");
        }
        if self.max_queued_jobs == 0 {
            return fail("diff.max_queued_jobs must be at least 1");
        }
        if self.batch_size == 0 {
            return fail("diff.batch_size must be at least 1");
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return fail("diff.default_page_size must be between 1 and max_page_size");
        }
        Ok(())
    }
}

/// A diff request as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiffRequest {
    /// Volume.
    pub volume: String,
    /// Bucket.
    pub bucket: String,
    /// Older snapshot name.
    pub from_snapshot: String,
    /// Newer snapshot name.
    pub to_snapshot: String,
    /// Paging token from a previous report.
    pub token: Option<String>,
    /// Entries per page; 0 selects the default.
    pub page_size: usize,
    /// Computation flags.
    pub options: DiffOptions,
}

impl SnapshotDiffRequest {
    /// Request the first page with default settings.
    pub fn new(
        volume: impl Into<String>,
        bucket: impl Into<String>,
        from_snapshot: impl Into<String>,
        to_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            volume: volume.into(),
            bucket: bucket.into(),
            from_snapshot: from_snapshot.into(),
            to_snapshot: to_snapshot.into(),
            token: None,
            page_size: 0,
            options: DiffOptions::default(),
        }
    }

    /// Set the paging token.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the computation flags.
    #[must_use]
    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }
}

/// What a requester learns about its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiffResponse {
    /// Current job status.
    pub job_status: JobStatus,
    /// Suggested delay before polling again; 0 once finished.
    pub wait_time_ms: u64,
    /// Requested page, once the job is DONE.
    pub report: Option<SnapshotDiffReport>,
    /// Failure or rejection reason.
    pub reason: Option<String>,
}

/// Leader-side scheduler and executor of diff jobs.
pub struct SnapshotDiffEngine {
    config: DiffEngineConfig,
    catalog: Arc<dyn SnapshotCatalog>,
    store: Arc<dyn DiffJobStore>,
    clock: Arc<dyn Clock>,
    jobs: DashMap<DiffJobKey, SnapshotDiffJob>,
    workers: DashMap<DiffJobKey, Arc<AtomicBool>>,
    permits: Arc<Semaphore>,
    /// Term in which this engine loaded the job table as leader. Held for
    /// the whole takeover, so requests wait until the table is loaded.
    leading_term: Mutex<Option<u64>>,
}

impl std::fmt::Debug for SnapshotDiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotDiffEngine")
            .field("jobs", &self.jobs.len())
            .field("workers", &self.workers.len())
            .field("leading_term", &*self.leading_term.lock())
            .finish()
    }
}

impl SnapshotDiffEngine {
    /// Create an engine. It stays idle until it is told it leads.
    pub fn new(
        config: DiffEngineConfig,
        catalog: Arc<dyn SnapshotCatalog>,
        store: Arc<dyn DiffJobStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Arc::new(Self {
            config,
            catalog,
            store,
            clock,
            jobs: DashMap::new(),
            workers: DashMap::new(),
            permits,
            leading_term: Mutex::new(None),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &DiffEngineConfig {
        &self.config
    }

    /// Submit or poll a diff.
    ///
    /// Must be called from within a Tokio runtime: a new job spawns its
    /// worker. It is IN_PROGRESS when a worker slot is free and QUEUED until
    /// one frees up otherwise. A FAILED or CANCELLED job is reported once and
    /// then forgotten, so the next identical request starts a fresh job.
    pub fn request_diff(
        self: &Arc<Self>,
        ctx: &LeadershipContext,
        request: &SnapshotDiffRequest,
    ) -> Result<SnapshotDiffResponse> {
        ctx.require_leader()?;
        self.ensure_leading(ctx)?;

        let page_size = self.page_size(request.page_size)?;
        let offset = parse_token(request.token.as_deref())?;
        let (key, from, to) = self.job_key(request)?;

        let active = self.jobs.iter().filter(|j| j.status.is_active()).count();
        let (job, permit) = match self.jobs.entry(key.clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), None),
            Entry::Vacant(slot) => {
                if active >= self.config.max_queued_jobs {
                    tracing::warn!(key = %key, active, "Rejected snapshot diff, queue full");
                    return Ok(SnapshotDiffResponse {
                        job_status: JobStatus::Rejected,
                        wait_time_ms: self.config.wait_time_hint_ms,
                        report: None,
                        reason: Some(format!("{active} diff jobs already queued")),
                    });
                }
                let mut job =
                    SnapshotDiffJob::new(key.clone(), from.name, to.name, self.clock.now_millis());
                let permit = self.try_permit();
                if permit.is_some() {
                    job.status = JobStatus::InProgress;
                }
                slot.insert(job.clone());
                (job, Some(permit))
            }
        };

        if let Some(permit) = permit {
            if let Err(e) = self.store.save(&job) {
                self.jobs.remove(&key);
                return Err(e);
            }
            tracing::info!(key = %key, status = %job.status, "Submitted snapshot diff job");
            self.spawn_worker(key, permit);
        }

        self.respond(job, offset, page_size)
    }

    fn respond(
        &self,
        job: SnapshotDiffJob,
        offset: usize,
        page_size: usize,
    ) -> Result<SnapshotDiffResponse> {
        match job.status {
            JobStatus::Done => {
                let (entries, next_token) = page(&job.entries, offset, page_size);
                Ok(SnapshotDiffResponse {
                    job_status: JobStatus::Done,
                    wait_time_ms: 0,
                    report: Some(SnapshotDiffReport {
                        volume: job.key.volume.clone(),
                        bucket: job.key.bucket.clone(),
                        from_snapshot: job.from_name.clone(),
                        to_snapshot: job.to_name.clone(),
                        entries,
                        next_token,
                        total_entries: job.entries.len(),
                    }),
                    reason: None,
                })
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                self.jobs.remove(&job.key);
                self.store.remove(&job.key)?;
                tracing::info!(key = %job.key, status = %job.status, "Reported finished snapshot diff job");
                Ok(SnapshotDiffResponse {
                    job_status: job.status,
                    wait_time_ms: 0,
                    report: None,
                    reason: job.reason,
                })
            }
            JobStatus::Queued | JobStatus::InProgress | JobStatus::Rejected => {
                Ok(SnapshotDiffResponse {
                    job_status: job.status,
                    wait_time_ms: self.config.wait_time_hint_ms,
                    report: None,
                    reason: None,
                })
            }
        }
    }

    fn page_size(&self, requested: usize) -> Result<usize> {
        match requested {
            0 => Ok(self.config.default_page_size),
            n if n > self.config.max_page_size => Err(TesseraError::InvalidDiffRequest {
                cause: format!(
                    "page size {n} exceeds the maximum of {}",
                    self.config.max_page_size
                ),
            }),
            n => Ok(n),
        }
    }

    fn job_key(&self, request: &SnapshotDiffRequest) -> Result<(DiffJobKey, SnapshotInfo, SnapshotInfo)> {
        let invalid = |cause: String| TesseraError::InvalidDiffRequest { cause };
        for (field, value) in [
            ("volume", &request.volume),
            ("bucket", &request.bucket),
            ("from snapshot", &request.from_snapshot),
            ("to snapshot", &request.to_snapshot),
        ] {
            if value.is_empty() {
                return Err(invalid(format!("{field} is empty")));
            }
        }
        if request.from_snapshot == request.to_snapshot {
            return Err(invalid("from and to name the same snapshot".to_string()));
        }

        let from = self
            .catalog
            .resolve(&request.volume, &request.bucket, &request.from_snapshot)?;
        let to = self
            .catalog
            .resolve(&request.volume, &request.bucket, &request.to_snapshot)?;
        if from.creation_sequence >= to.creation_sequence {
            return Err(invalid(format!(
                "snapshot {} is not older than {}",
                from.name, to.name
            )));
        }

        let key = DiffJobKey {
            volume: request.volume.clone(),
            bucket: request.bucket.clone(),
            from_snapshot: from.snapshot_id,
            to_snapshot: to.snapshot_id,
            options: request.options,
        };
        Ok((key, from, to))
    }

    /// Cancel an unfinished job.
    ///
    /// Returns the job's status afterwards; finished jobs are left as they are.
    pub fn cancel_diff(
        self: &Arc<Self>,
        ctx: &LeadershipContext,
        request: &SnapshotDiffRequest,
    ) -> Result<JobStatus> {
        ctx.require_leader()?;
        self.ensure_leading(ctx)?;
        let (key, _, _) = self.job_key(request)?;

        let mut job = self
            .jobs
            .get_mut(&key)
            .ok_or_else(|| TesseraError::DiffJobNotFound {
                job_key: key.to_string(),
            })?;
        if job.status.is_active() {
            job.status = JobStatus::Cancelled;
            job.updated_at_ms = self.clock.now_millis();
            self.store.save(&job)?;
            if let Some(flag) = self.workers.get(&key) {
                flag.store(true, Ordering::SeqCst);
            }
            tracing::info!(key = %key, "Cancelled snapshot diff job");
        }
        Ok(job.status)
    }

    /// Persisted jobs of a bucket, optionally filtered by status, oldest first.
    pub fn list_jobs(
        &self,
        volume: &str,
        bucket: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<DiffJobSummary>> {
        let mut jobs: Vec<DiffJobSummary> = self
            .store
            .load_all()?
            .into_iter()
            .filter(|job| job.key.volume == volume && job.key.bucket == bucket)
            .filter(|job| status.is_none_or(|s| job.status == s))
            .map(|job| job.summary())
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(jobs)
    }

    /// Remove finished jobs last updated more than `job_max_age_ms` before `now_ms`.
    pub fn purge_expired(&self, now_ms: u64) -> Result<usize> {
        let mut purged = 0;
        for job in self.store.load_all()? {
            let expired = job.updated_at_ms.saturating_add(self.config.job_max_age_ms) <= now_ms;
            if job.status.is_terminal() && expired {
                self.store.remove(&job.key)?;
                self.jobs.remove(&job.key);
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "Purged expired snapshot diff jobs");
        }
        Ok(purged)
    }

    fn ensure_leading(self: &Arc<Self>, ctx: &LeadershipContext) -> Result<()> {
        self.on_leadership_acquired(ctx).map(|_| ())
    }

    /// Take over the persisted job table after winning an election.
    ///
    /// Unfinished jobs with a persisted cursor resume from it; those without
    /// restart from scratch as IN_PROGRESS. Calling it again for the same term
    /// does nothing. Returns the number of jobs put back to work.
    pub fn on_leadership_acquired(self: &Arc<Self>, ctx: &LeadershipContext) -> Result<usize> {
        ctx.require_leader()?;
        let mut term = self.leading_term.lock();
        if *term == Some(ctx.term) {
            return Ok(0);
        }
        // The term is published only once the table is loaded. A failed load
        // leaves it unset and the next request retries the takeover.
        *term = None;
        self.stop_workers();
        self.jobs.clear();

        let now = self.clock.now_millis();
        let mut revived = 0;
        for mut job in self.store.load_all()? {
            let key = job.key.clone();
            if job.status.is_active() {
                if job.has_progress() {
                    job.status = JobStatus::InProgress;
                    job.updated_at_ms = now;
                    tracing::info!(key = %key, entries = job.entries.len(), "Resuming snapshot diff job");
                } else {
                    job.restart(now);
                    tracing::info!(key = %key, "Restarting snapshot diff job");
                }
                self.store.save(&job)?;
                self.jobs.insert(key.clone(), job);
                let permit = self.try_permit();
                self.spawn_worker(key, permit);
                revived += 1;
            } else {
                self.jobs.insert(key, job);
            }
        }
        *term = Some(ctx.term);

        tracing::info!(node_id = ctx.node_id, term = ctx.term, revived, "Diff engine leading");
        Ok(revived)
    }

    /// Stop all workers after losing leadership.
    ///
    /// Progress already persisted stays in the job table for the next leader
    /// term on this node.
    pub fn on_leadership_lost(&self) {
        let was = self.leading_term.lock().take();
        if was.is_none() {
            return;
        }
        self.stop_workers();
        self.jobs.clear();
        tracing::info!(term = ?was, "Diff engine stepped down");
    }

    fn stop_workers(&self) {
        for worker in self.workers.iter() {
            worker.value().store(true, Ordering::SeqCst);
        }
        self.workers.clear();
    }

    fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    fn spawn_worker(self: &Arc<Self>, key: DiffJobKey, permit: Option<OwnedSemaphorePermit>) {
        let cancel = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.workers.insert(key.clone(), Arc::clone(&cancel)) {
            previous.store(true, Ordering::SeqCst);
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_job(&key, &cancel, permit).await;
            engine
                .workers
                .remove_if(&key, |_, flag| Arc::ptr_eq(flag, &cancel));
        });
    }

    async fn run_job(
        &self,
        key: &DiffJobKey,
        cancel: &AtomicBool,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let _permit = match permit {
            Some(permit) => permit,
            None => match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        if cancel.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.compute(key, cancel).await {
            let reason = e.to_string();
            let recorded = self.update(key, cancel, |job| {
                job.status = JobStatus::Failed;
                job.reason = Some(reason.clone());
            });
            match recorded {
                Ok(true) => tracing::warn!(key = %key, %reason, "Snapshot diff job failed"),
                Ok(false) => {}
                Err(persist) => {
                    tracing::error!(key = %key, error = %persist, "Could not record diff job failure")
                }
            }
        }
    }

    async fn compute(&self, key: &DiffJobKey, cancel: &AtomicBool) -> Result<()> {
        let from = self.catalog.checkpoint(&key.from_snapshot)?;
        let to = self.catalog.checkpoint(&key.to_snapshot)?;
        if !self.update(key, cancel, |job| job.status = JobStatus::InProgress)? {
            return Ok(());
        }

        loop {
            let cursor = match self.jobs.get(key) {
                Some(job) if job.status.is_active() => job.cursor,
                _ => return Ok(()),
            };
            let batch = diff_batch(&from, &to, cursor, self.config.batch_size);
            let complete = batch.complete;
            let applied = self.update(key, cancel, |job| {
                job.entries.extend(batch.entries);
                job.cursor = batch.cursor;
                if complete {
                    job.status = JobStatus::Done;
                }
            })?;
            if !applied {
                return Ok(());
            }
            if complete {
                tracing::info!(key = %key, "Snapshot diff job done");
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// Mutate and persist an active job. Returns false if the job was
    /// cancelled, finished or dropped in the meantime.
    fn update(
        &self,
        key: &DiffJobKey,
        cancel: &AtomicBool,
        f: impl FnOnce(&mut SnapshotDiffJob),
    ) -> Result<bool> {
        if cancel.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(mut job) = self.jobs.get_mut(key) else {
            return Ok(false);
        };
        if !job.status.is_active() {
            return Ok(false);
        }
        f(&mut job);
        job.updated_at_ms = self.clock.now_millis();
        self.store.save(&job)?;
        Ok(true)
    }
}
