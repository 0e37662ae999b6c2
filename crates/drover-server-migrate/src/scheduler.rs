// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded-concurrency migration worker.
//!
//! A single poll loop claims queued repositories into an active set and runs
//! each one on its own task. The active set is the only shared mutable state;
//! it is locked for set operations only, never across an await.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_migrate_core::{MigrationStatus, Repository, RepositoryId};
use drover_server_config::WorkerConfig;
use drover_server_db::{RepositoryFilter, RepositoryStore};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::BatchManager;
use crate::error::{MigrateError, Result};
use crate::executor::Executor;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_WORKER_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
	pub poll_interval: Duration,
	pub worker_count: usize,
	/// Also claim `dry_run_queued` repositories.
	pub dry_run_enabled: bool,
}

impl Default for WorkerSettings {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			worker_count: DEFAULT_WORKER_COUNT,
			dry_run_enabled: true,
		}
	}
}

impl WorkerSettings {
	pub fn from_config(config: &WorkerConfig) -> Self {
		Self {
			poll_interval: Duration::from_secs(config.poll_interval_secs),
			worker_count: config.worker_count as usize,
			dry_run_enabled: config.dry_run_enabled,
		}
	}

	/// Zero values fall back to the defaults.
	fn normalized(self) -> Self {
		Self {
			poll_interval: if self.poll_interval.is_zero() {
				DEFAULT_POLL_INTERVAL
			} else {
				self.poll_interval
			},
			worker_count: if self.worker_count == 0 {
				DEFAULT_WORKER_COUNT
			} else {
				self.worker_count
			},
			dry_run_enabled: self.dry_run_enabled,
		}
	}

	fn claimable_statuses(&self) -> Vec<MigrationStatus> {
		let mut statuses = vec![MigrationStatus::QueuedForMigration];
		if self.dry_run_enabled {
			statuses.push(MigrationStatus::DryRunQueued);
		}
		statuses
	}
}

type ActiveSet = Arc<Mutex<HashSet<RepositoryId>>>;

/// Releases a claimed slot when the unit of work ends, however it ends.
struct SlotGuard {
	active: ActiveSet,
	id: RepositoryId,
}

impl Drop for SlotGuard {
	fn drop(&mut self) {
		self.active.lock().remove(&self.id);
	}
}

struct WorkerInner {
	repositories: Arc<dyn RepositoryStore>,
	executor: Arc<dyn Executor>,
	batches: Option<BatchManager>,
	settings: WorkerSettings,
	active: ActiveSet,
	running: AtomicBool,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
pub struct MigrationWorkerBuilder {
	repositories: Option<Arc<dyn RepositoryStore>>,
	executor: Option<Arc<dyn Executor>>,
	batches: Option<BatchManager>,
	settings: WorkerSettings,
}

impl MigrationWorkerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn repositories(mut self, repositories: Arc<dyn RepositoryStore>) -> Self {
		self.repositories = Some(repositories);
		self
	}

	pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
		self.executor = Some(executor);
		self
	}

	/// Settle batches as their members finish.
	pub fn batch_manager(mut self, batches: BatchManager) -> Self {
		self.batches = Some(batches);
		self
	}

	pub fn settings(mut self, settings: WorkerSettings) -> Self {
		self.settings = settings;
		self
	}

	pub fn build(self) -> Result<MigrationWorker> {
		let repositories = self.repositories.ok_or_else(|| {
			MigrateError::Configuration("migration worker requires a repository store".into())
		})?;
		let executor = self
			.executor
			.ok_or_else(|| MigrateError::Configuration("migration worker requires an executor".into()))?;

		let (shutdown_tx, _) = broadcast::channel(1);
		Ok(MigrationWorker {
			inner: Arc::new(WorkerInner {
				repositories,
				executor,
				batches: self.batches,
				settings: self.settings.normalized(),
				active: Arc::new(Mutex::new(HashSet::new())),
				running: AtomicBool::new(false),
				tasks: Mutex::new(Vec::new()),
			}),
			shutdown_tx,
			loop_handle: tokio::sync::Mutex::new(None),
		})
	}
}

pub struct MigrationWorker {
	inner: Arc<WorkerInner>,
	shutdown_tx: broadcast::Sender<()>,
	loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MigrationWorker {
	pub fn builder() -> MigrationWorkerBuilder {
		MigrationWorkerBuilder::new()
	}

	pub fn settings(&self) -> &WorkerSettings {
		&self.inner.settings
	}

	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		if self.inner.running.swap(true, Ordering::SeqCst) {
			return Err(MigrateError::AlreadyRunning);
		}

		let inner = Arc::clone(&self.inner);
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let interval = inner.settings.poll_interval;

		let handle = tokio::spawn(async move {
			loop {
				if let Err(e) = poll(&inner).await {
					warn!(error = %e, "Migration poll failed");
				}
				tokio::select! {
					_ = tokio::time::sleep(interval) => {}
					_ = shutdown_rx.recv() => {
						info!("Migration poll loop shutting down");
						break;
					}
				}
			}
		});
		*self.loop_handle.lock().await = Some(handle);

		info!(
			worker_count = self.inner.settings.worker_count,
			poll_interval_secs = interval.as_secs(),
			dry_run_enabled = self.inner.settings.dry_run_enabled,
			"Migration worker started"
		);
		Ok(())
	}

	/// Stop polling and wait for every claimed repository to finish.
	#[instrument(skip(self))]
	pub async fn stop(&self) {
		if self.inner.running.swap(false, Ordering::SeqCst) {
			let _ = self.shutdown_tx.send(());
			if let Some(handle) = self.loop_handle.lock().await.take() {
				let _ = handle.await;
			}
		}

		let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
		let waited = handles.len();
		futures::future::join_all(handles).await;

		info!(waited, "Migration worker stopped");
	}

	/// Run a single poll tick. Returns how many repositories were dispatched.
	pub async fn poll_once(&self) -> Result<usize> {
		poll(&self.inner).await
	}

	pub fn is_running(&self) -> bool {
		self.inner.running.load(Ordering::SeqCst)
	}

	pub fn is_active(&self, id: RepositoryId) -> bool {
		self.inner.active.lock().contains(&id)
	}

	pub fn active_count(&self) -> usize {
		self.inner.active.lock().len()
	}

	pub fn active_migrations(&self) -> Vec<RepositoryId> {
		let mut ids: Vec<RepositoryId> = self.inner.active.lock().iter().copied().collect();
		ids.sort();
		ids
	}
}

async fn poll(inner: &Arc<WorkerInner>) -> Result<usize> {
	inner.tasks.lock().retain(|h| !h.is_finished());

	let worker_count = inner.settings.worker_count;
	let occupied = inner.active.lock().len();
	let available = worker_count.saturating_sub(occupied);
	if available == 0 {
		debug!(occupied, "All worker slots busy");
		return Ok(0);
	}

	// Claimed repositories stay queued until their executor moves them, so
	// over-fetch by the number already held.
	let filter = RepositoryFilter::with_statuses(inner.settings.claimable_statuses())
		.limit((available + occupied) as i64);
	let candidates = inner.repositories.list_repositories(&filter).await?;

	let mut dispatched = 0;
	for repo in candidates {
		let id = repo.id;
		{
			let mut active = inner.active.lock();
			if active.len() >= worker_count {
				break;
			}
			if !active.insert(id) {
				continue;
			}
		}

		let slot = SlotGuard {
			active: Arc::clone(&inner.active),
			id,
		};
		let handle = tokio::spawn(run_unit(
			Arc::clone(&inner.executor),
			inner.batches.clone(),
			repo,
			slot,
		));
		inner.tasks.lock().push(handle);
		dispatched += 1;
	}

	if dispatched > 0 {
		debug!(dispatched, "Dispatched queued repositories");
	}
	Ok(dispatched)
}

async fn run_unit(
	executor: Arc<dyn Executor>,
	batches: Option<BatchManager>,
	repo: Repository,
	_slot: SlotGuard,
) {
	let repo_id = repo.id;
	let batch_id = repo.batch_id;

	match executor.execute(repo).await {
		Ok(outcome) => debug!(repo_id = %repo_id, ?outcome, "Repository execution finished"),
		Err(e) => error!(repo_id = %repo_id, error = %e, "Repository execution errored"),
	}

	if let (Some(batches), Some(batch_id)) = (batches, batch_id) {
		if let Err(e) = batches.refresh_completion(batch_id).await {
			warn!(batch_id = %batch_id, error = %e, "Failed to refresh batch completion");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::executor::ExecutionOutcome;
	use crate::testing::{github_repo, Harness};
	use async_trait::async_trait;
	use std::sync::atomic::AtomicUsize;
	use tokio::sync::Semaphore;

	/// Holds every execution until a permit is released.
	struct GatedExecutor {
		gate: Semaphore,
		started: AtomicUsize,
		current: AtomicUsize,
		peak: AtomicUsize,
		delay: Duration,
		repositories: Arc<dyn RepositoryStore>,
	}

	impl GatedExecutor {
		fn new(repositories: Arc<dyn RepositoryStore>, permits: usize, delay: Duration) -> Self {
			Self {
				gate: Semaphore::new(permits),
				started: AtomicUsize::new(0),
				current: AtomicUsize::new(0),
				peak: AtomicUsize::new(0),
				delay,
				repositories,
			}
		}
	}

	#[async_trait]
	impl Executor for GatedExecutor {
		async fn execute(&self, repo: Repository) -> Result<ExecutionOutcome> {
			self.started.fetch_add(1, Ordering::SeqCst);
			let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(now, Ordering::SeqCst);

			self.repositories
				.update_status_where(repo.id, repo.status, MigrationStatus::PreMigration)
				.await?;
			let permit = self.gate.acquire().await.map_err(|e| MigrateError::InvalidState(e.to_string()))?;
			permit.forget();
			tokio::time::sleep(self.delay).await;
			self.repositories
				.update_status_where(repo.id, MigrationStatus::PreMigration, MigrationStatus::MigrationFailed)
				.await?;

			self.current.fetch_sub(1, Ordering::SeqCst);
			Ok(ExecutionOutcome::Completed(MigrationStatus::Complete))
		}
	}

	fn worker(h: &Harness, executor: Arc<GatedExecutor>, worker_count: usize) -> MigrationWorker {
		MigrationWorker::builder()
			.repositories(h.repos.clone())
			.executor(executor)
			.settings(WorkerSettings {
				poll_interval: Duration::from_millis(5),
				worker_count,
				dry_run_enabled: true,
			})
			.build()
			.unwrap()
	}

	async fn wait_for(mut check: impl FnMut() -> bool) {
		for _ in 0..500 {
			if check() {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("condition not reached in time");
	}

	#[test]
	fn test_zero_settings_fall_back_to_defaults() {
		let settings = WorkerSettings {
			poll_interval: Duration::ZERO,
			worker_count: 0,
			dry_run_enabled: false,
		}
		.normalized();
		assert_eq!(settings.poll_interval, Duration::from_secs(30));
		assert_eq!(settings.worker_count, 5);
		assert_eq!(settings.claimable_statuses(), vec![MigrationStatus::QueuedForMigration]);
	}

	#[tokio::test]
	async fn test_builder_requires_collaborators() {
		let h = Harness::new().await;
		let err = MigrationWorker::builder()
			.repositories(h.repos.clone())
			.build()
			.err()
			.unwrap();
		assert!(matches!(err, MigrateError::Configuration(_)));

		let executor: Arc<dyn Executor> = Arc::new(h.executor());
		let err = MigrationWorker::builder().executor(executor).build().err().unwrap();
		assert!(matches!(err, MigrateError::Configuration(_)));
	}

	#[tokio::test]
	async fn test_full_slots_dispatch_nothing() {
		let h = Harness::new().await;
		let executor = Arc::new(GatedExecutor::new(h.repos.clone(), 0, Duration::ZERO));
		let worker = worker(&h, executor.clone(), 1);

		let first = h
			.insert(github_repo("acme/a", MigrationStatus::QueuedForMigration))
			.await;
		assert_eq!(worker.poll_once().await.unwrap(), 1);
		assert!(worker.is_active(first));

		h.insert(github_repo("acme/b", MigrationStatus::QueuedForMigration))
			.await;
		assert_eq!(worker.poll_once().await.unwrap(), 0);
		assert_eq!(worker.active_count(), 1);
		assert_eq!(worker.active_migrations(), vec![first]);

		executor.gate.add_permits(10);
		worker.stop().await;
		assert_eq!(worker.active_count(), 0);
	}

	#[tokio::test]
	async fn test_claimed_repository_is_not_claimed_twice() {
		let h = Harness::new().await;
		let executor = Arc::new(GatedExecutor::new(h.repos.clone(), 0, Duration::ZERO));
		let worker = worker(&h, executor.clone(), 4);
		h.insert(github_repo("acme/a", MigrationStatus::QueuedForMigration))
			.await;

		assert_eq!(worker.poll_once().await.unwrap(), 1);
		assert_eq!(worker.poll_once().await.unwrap(), 0);

		executor.gate.add_permits(10);
		worker.stop().await;
		assert_eq!(executor.started.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_dry_run_claims_follow_setting() {
		let h = Harness::new().await;
		let executor = Arc::new(GatedExecutor::new(h.repos.clone(), 10, Duration::ZERO));
		let worker = MigrationWorker::builder()
			.repositories(h.repos.clone())
			.executor(executor.clone())
			.settings(WorkerSettings {
				poll_interval: Duration::from_millis(5),
				worker_count: 2,
				dry_run_enabled: false,
			})
			.build()
			.unwrap();
		h.insert(github_repo("acme/a", MigrationStatus::DryRunQueued))
			.await;

		assert_eq!(worker.poll_once().await.unwrap(), 0);
		worker.stop().await;
	}

	#[tokio::test]
	async fn test_start_twice_is_rejected() {
		let h = Harness::new().await;
		let executor = Arc::new(GatedExecutor::new(h.repos.clone(), 10, Duration::ZERO));
		let worker = worker(&h, executor, 1);

		worker.start().await.unwrap();
		assert!(worker.is_running());
		assert!(matches!(
			worker.start().await.unwrap_err(),
			MigrateError::AlreadyRunning
		));
		worker.stop().await;
		assert!(!worker.is_running());
	}

	#[tokio::test]
	async fn test_active_set_never_exceeds_worker_count() {
		let h = Harness::new().await;
		let executor = Arc::new(GatedExecutor::new(
			h.repos.clone(),
			100,
			Duration::from_millis(20),
		));
		let worker = worker(&h, executor.clone(), 2);
		for i in 0..6 {
			h.insert(github_repo(&format!("acme/r{i}"), MigrationStatus::QueuedForMigration))
				.await;
		}

		worker.start().await.unwrap();
		let observed = executor.clone();
		wait_for(move || observed.started.load(Ordering::SeqCst) == 6).await;
		worker.stop().await;

		assert!(executor.peak.load(Ordering::SeqCst) <= 2);
		assert_eq!(worker.active_count(), 0);
	}

	#[tokio::test]
	async fn test_stop_waits_for_in_flight_units() {
		let h = Harness::new().await;
		let executor = Arc::new(GatedExecutor::new(
			h.repos.clone(),
			10,
			Duration::from_millis(150),
		));
		let worker = worker(&h, executor.clone(), 3);
		h.insert(github_repo("acme/slow", MigrationStatus::QueuedForMigration))
			.await;

		worker.start().await.unwrap();
		let observed = executor.clone();
		wait_for(move || observed.started.load(Ordering::SeqCst) == 1).await;
		assert_eq!(worker.active_count(), 1);

		worker.stop().await;
		assert_eq!(worker.active_count(), 0);
		assert_eq!(executor.current.load(Ordering::SeqCst), 0);
	}
}
