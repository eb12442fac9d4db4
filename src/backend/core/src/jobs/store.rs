//! Durable job status store with transition history.
//!
//! `JobStatusStore` is the sole durable record of jobs and their history.
//! Storage goes through the [`StatusBackend`] trait; an in-memory backend
//! serves embedded use and tests, a Redis backend serves multi-process
//! deployments.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

use super::job::{Job, JobHistoryEntry, JobId, JobStatus, JobType};

// ═══════════════════════════════════════════════════════════════════════════════
// Queue Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Derived queue statistics. Never stored independently; computed from the
/// live job set on request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs across all statuses
    pub total_jobs: usize,
    /// Pending jobs
    pub pending: usize,
    /// Running jobs
    pub running: usize,
    /// Completed jobs
    pub completed: usize,
    /// Failed jobs
    pub failed: usize,
    /// Cancelled jobs
    pub cancelled: usize,
    /// Live count of pending jobs (same as `pending`; kept as the queue-depth
    /// figure consumed by the allocator)
    pub queue_length: usize,
    /// Average processing time in milliseconds over jobs that have both a
    /// start and a completion timestamp
    pub average_processing_time_ms: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Trait for status store backends.
#[async_trait]
pub trait StatusBackend: Send + Sync {
    /// Upsert a job record.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Delete a job record; returns whether a record existed.
    async fn delete(&self, id: JobId) -> Result<bool>;

    /// All job records in insertion (admission sequence) order.
    async fn all(&self) -> Result<Vec<Job>>;

    /// Append a history entry for a job, pruning oldest past `cap`.
    async fn append_history(&self, entry: &JobHistoryEntry, cap: usize) -> Result<()>;

    /// History entries for one job, oldest first.
    async fn history_for(&self, id: JobId) -> Result<Vec<JobHistoryEntry>>;

    /// Drop all history entries for a job.
    async fn delete_history(&self, id: JobId) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct InMemoryState {
    jobs: HashMap<JobId, Job>,
    // Admission order of ids; stale ids are skipped on read
    order: Vec<JobId>,
    history: HashMap<JobId, VecDeque<JobHistoryEntry>>,
}

/// In-memory status backend for embedded use and tests.
#[derive(Default)]
pub struct InMemoryStatusBackend {
    state: RwLock<InMemoryState>,
}

impl InMemoryStatusBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusBackend for InMemoryStatusBackend {
    async fn put(&self, job: &Job) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job.id) {
            state.order.push(job.id);
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.jobs.remove(&id).is_some();
        if existed {
            state.order.retain(|&o| o != id);
        }
        Ok(existed)
    }

    async fn all(&self) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect())
    }

    async fn append_history(&self, entry: &JobHistoryEntry, cap: usize) -> Result<()> {
        let mut state = self.state.write().await;
        let entries = state.history.entry(entry.job_id).or_default();
        entries.push_back(entry.clone());
        while entries.len() > cap {
            entries.pop_front();
        }
        Ok(())
    }

    async fn history_for(&self, id: JobId) -> Result<Vec<JobHistoryEntry>> {
        Ok(self
            .state
            .read()
            .await
            .history
            .get(&id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_history(&self, id: JobId) -> Result<()> {
        self.state.write().await.history.remove(&id);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis-backed status backend for multi-process deployments.
///
/// Jobs live in a hash keyed by job id; history lives in one list per job,
/// trimmed to the cap on every append.
pub struct RedisStatusBackend {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStatusBackend {
    /// Create a new Redis status backend.
    ///
    /// # Arguments
    /// * `client` - A connected Redis client
    /// * `key_prefix` - Prefix for all store keys (e.g. `"morph:jobs"`)
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn jobs_key(&self) -> String {
        format!("{}:records", self.key_prefix)
    }

    fn history_key(&self, id: JobId) -> String {
        format!("{}:history:{}", self.key_prefix, id)
    }

    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl StatusBackend for RedisStatusBackend {
    async fn put(&self, job: &Job) -> Result<()> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.get_conn().await?;
        redis::cmd("HSET")
            .arg(self.jobs_key())
            .arg(job.id.to_string())
            .arg(&serialized)
            .query_async::<_, i64>(&mut conn)
            .await?;
        tracing::debug!(job_id = %job.id, "Job record written");
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = redis::cmd("HGET")
            .arg(self.jobs_key())
            .arg(id.to_string())
            .query_async(&mut conn)
            .await?;
        match value {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let removed: i64 = redis::cmd("HDEL")
            .arg(self.jobs_key())
            .arg(id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn all(&self) -> Result<Vec<Job>> {
        let mut conn = self.get_conn().await?;
        let raw: Vec<String> = redis::cmd("HVALS")
            .arg(self.jobs_key())
            .query_async(&mut conn)
            .await?;
        let mut jobs = raw
            .iter()
            .map(|r| serde_json::from_str::<Job>(r))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // Hash iteration order is arbitrary; admission sequence restores it
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn append_history(&self, entry: &JobHistoryEntry, cap: usize) -> Result<()> {
        let serialized = serde_json::to_string(entry)?;
        let mut conn = self.get_conn().await?;
        let key = self.history_key(entry.job_id);
        redis::cmd("RPUSH")
            .arg(&key)
            .arg(&serialized)
            .query_async::<_, i64>(&mut conn)
            .await?;
        redis::cmd("LTRIM")
            .arg(&key)
            .arg(-(cap as i64))
            .arg(-1)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn history_for(&self, id: JobId) -> Result<Vec<JobHistoryEntry>> {
        let mut conn = self.get_conn().await?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.history_key(id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .iter()
            .map(|r| serde_json::from_str(r))
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn delete_history(&self, id: JobId) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("DEL")
            .arg(self.history_key(id))
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status Store
// ═══════════════════════════════════════════════════════════════════════════════

/// The durable job state and history store.
pub struct JobStatusStore {
    backend: Arc<dyn StatusBackend>,
    max_history: usize,
}

impl JobStatusStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn StatusBackend>, max_history: usize) -> Self {
        Self {
            backend,
            max_history: max_history.max(1),
        }
    }

    /// Create an in-memory store (for embedded use and tests).
    pub fn in_memory(max_history: usize) -> Self {
        Self::new(Arc::new(InMemoryStatusBackend::new()), max_history)
    }

    /// Persist a new job record, appending a history entry.
    pub async fn save(&self, job: &Job) -> Result<()> {
        self.backend.put(job).await?;
        self.backend
            .append_history(&JobHistoryEntry::snapshot(job, None), self.max_history)
            .await?;
        Ok(())
    }

    /// Update an existing job record, appending a history entry.
    ///
    /// An update for an unknown id logs and upserts rather than erroring, so
    /// a late status report for a pruned job cannot fail its reporter.
    pub async fn update(&self, job: &Job) -> Result<()> {
        if self.backend.get(job.id).await?.is_none() {
            tracing::warn!(job_id = %job.id, status = %job.status, "Update for unknown job id, upserting");
        }
        self.backend.put(job).await?;
        self.backend
            .append_history(&JobHistoryEntry::snapshot(job, None), self.max_history)
            .await?;
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.backend.get(id).await
    }

    /// Delete a job and its history; returns whether a record existed.
    pub async fn delete(&self, id: JobId) -> Result<bool> {
        let existed = self.backend.delete(id).await?;
        if existed {
            self.backend.delete_history(id).await?;
        }
        Ok(existed)
    }

    /// All jobs in admission order.
    pub async fn get_all_jobs(&self) -> Result<Vec<Job>> {
        self.backend.all().await
    }

    /// Jobs with the given status, in admission order.
    pub async fn get_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self
            .backend
            .all()
            .await?
            .into_iter()
            .filter(|j| j.status == status)
            .collect())
    }

    /// Jobs with the given type, in admission order.
    pub async fn get_jobs_by_type(&self, job_type: JobType) -> Result<Vec<Job>> {
        Ok(self
            .backend
            .all()
            .await?
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect())
    }

    /// Transition history, most recent first.
    ///
    /// With an id, returns that job's history; without, aggregates history
    /// across all jobs. `limit` truncates after sorting.
    pub async fn get_job_history(
        &self,
        id: Option<JobId>,
        limit: Option<usize>,
    ) -> Result<Vec<JobHistoryEntry>> {
        let mut entries = match id {
            Some(id) => self.backend.history_for(id).await?,
            None => {
                let mut all = Vec::new();
                for job in self.backend.all().await? {
                    all.extend(self.backend.history_for(job.id).await?);
                }
                all
            }
        };
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Remove finished jobs older than `max_age_hours`, plus their history.
    ///
    /// Only jobs that have left the active path ({completed, failed,
    /// cancelled}) are eligible; pending and running jobs are never removed
    /// regardless of age. Age is measured from the finish timestamp.
    /// Returns the number of removed jobs.
    pub async fn cleanup_old_jobs(&self, max_age_hours: u64) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours as i64);
        let mut removed = 0;

        for job in self.backend.all().await? {
            let eligible = matches!(
                job.status,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            );
            if !eligible {
                continue;
            }
            let reference = job.finished_at.unwrap_or(job.created_at);
            if reference < cutoff && self.backend.delete(job.id).await? {
                self.backend.delete_history(job.id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, max_age_hours, "Cleaned up old jobs");
        }
        Ok(removed)
    }

    /// Compute queue statistics from the live job set.
    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let jobs = self.backend.all().await?;
        let mut stats = QueueStats {
            total_jobs: jobs.len(),
            ..Default::default()
        };

        let mut total_processing_ms = 0i64;
        let mut processed = 0usize;

        for job in &jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
            if let Some(duration) = job.processing_time() {
                total_processing_ms += duration.num_milliseconds();
                processed += 1;
            }
        }

        stats.queue_length = stats.pending;
        stats.average_processing_time_ms = if processed > 0 {
            total_processing_ms as f64 / processed as f64
        } else {
            0.0
        };

        Ok(stats)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{JobFailure, JobRequest};

    fn make_job(seq: u64, job_type: JobType) -> Job {
        let request = JobRequest::new(job_type.as_str(), serde_json::json!({"seq": seq}));
        Job::from_request(request, job_type, seq, 3)
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = JobStatusStore::in_memory(10);
        let job = make_job(1, JobType::Convert);

        store.save(&job).await.unwrap();
        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);

        assert!(store.delete(job.id).await.unwrap());
        assert!(!store.delete(job.id).await.unwrap());
        assert!(store.get(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_id_upserts() {
        let store = JobStatusStore::in_memory(10);
        let job = make_job(1, JobType::Extract);

        // Never saved; update must not error
        store.update(&job).await.unwrap();
        assert!(store.get(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_filtered_views_keep_insertion_order() {
        let store = JobStatusStore::in_memory(10);
        let mut jobs = Vec::new();
        for seq in 1..=4 {
            let job_type = if seq % 2 == 0 {
                JobType::Convert
            } else {
                JobType::Repack
            };
            let job = make_job(seq, job_type);
            store.save(&job).await.unwrap();
            jobs.push(job);
        }

        let all = store.get_all_jobs().await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|j| j.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);

        let converts = store.get_jobs_by_type(JobType::Convert).await.unwrap();
        assert_eq!(converts.len(), 2);

        let pending = store.get_jobs_by_status(JobStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 4);
    }

    #[tokio::test]
    async fn test_history_capped_and_newest_first() {
        let store = JobStatusStore::in_memory(3);
        let mut job = make_job(1, JobType::Convert);
        store.save(&job).await.unwrap();

        job.mark_running();
        store.update(&job).await.unwrap();
        job.mark_completed(serde_json::json!({}));
        store.update(&job).await.unwrap();
        // 3 entries so far; two more saves push the oldest out
        store.update(&job).await.unwrap();
        store.update(&job).await.unwrap();

        let history = store.get_job_history(Some(job.id), None).await.unwrap();
        assert_eq!(history.len(), 3);
        // Newest first
        assert!(history[0].timestamp >= history[1].timestamp);
        assert!(history[1].timestamp >= history[2].timestamp);

        let limited = store.get_job_history(Some(job.id), Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_spares_active_jobs() {
        let store = JobStatusStore::in_memory(10);

        let mut old_completed = make_job(1, JobType::Convert);
        old_completed.mark_running();
        old_completed.mark_completed(serde_json::json!({}));
        old_completed.finished_at = Some(Utc::now() - ChronoDuration::hours(48));
        store.save(&old_completed).await.unwrap();

        let mut old_failed = make_job(2, JobType::Convert);
        old_failed.mark_running();
        old_failed.mark_failed(JobFailure::fatal("X", "nope"));
        old_failed.finished_at = Some(Utc::now() - ChronoDuration::hours(48));
        store.save(&old_failed).await.unwrap();

        // Pending job, artificially ancient
        let mut old_pending = make_job(3, JobType::Convert);
        old_pending.created_at = Utc::now() - ChronoDuration::hours(999);
        store.save(&old_pending).await.unwrap();

        let mut running = make_job(4, JobType::Convert);
        running.mark_running();
        running.started_at = Some(Utc::now() - ChronoDuration::hours(999));
        store.save(&running).await.unwrap();

        let removed = store.cleanup_old_jobs(24).await.unwrap();
        assert_eq!(removed, 2);

        assert!(store.get(old_pending.id).await.unwrap().is_some());
        assert!(store.get(running.id).await.unwrap().is_some());
        assert!(store.get(old_completed.id).await.unwrap().is_none());
        // History went with the record
        let history = store
            .get_job_history(Some(old_completed.id), None)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let store = JobStatusStore::in_memory(10);

        let pending = make_job(1, JobType::Convert);
        store.save(&pending).await.unwrap();

        let mut running = make_job(2, JobType::Convert);
        running.mark_running();
        store.save(&running).await.unwrap();

        let mut completed = make_job(3, JobType::Convert);
        completed.mark_running();
        completed.mark_completed(serde_json::json!({}));
        store.save(&completed).await.unwrap();

        let stats = store.get_queue_stats().await.unwrap();
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queue_length, 1);
        assert_eq!(
            stats.total_jobs,
            stats.pending + stats.running + stats.completed + stats.failed + stats.cancelled
        );
    }
}
