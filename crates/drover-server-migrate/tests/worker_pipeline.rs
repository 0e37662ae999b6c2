// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end: operator queues a batch, the worker drives every member
//! through the real pipeline against scripted remote clients.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_migrate_core::{
	BatchId, BatchStatus, ExclusionFlags, GitHubProperties, GitProperties, HistoryStatus,
	MigrationPhase, MigrationStatus, NewBatch, PlatformProperties, Repository, RepositoryId,
	SourceKind, ValidationLimits,
};
use drover_server_db::testing::create_migrated_test_pool;
use drover_server_db::{SqliteBatchStore, SqliteHistoryStore, SqliteRepositoryStore};
use drover_server_migrate::{
	ArchiveUrls, BatchManager, ClientError, DestinationClient, ExecutionOutcome, Executor,
	ExecutorSettings, ExportState, ImportRequest, MigrateError, MigrationOperations,
	MigrationWorker, PipelineExecutor, RemoteState, SourceClient, WorkerSettings,
};
use parking_lot::Mutex;

struct ScriptedSource;

#[async_trait]
impl SourceClient for ScriptedSource {
	async fn fetch_metadata(&self, repo: &Repository) -> Result<GitProperties, ClientError> {
		Ok(repo.git.clone())
	}

	async fn start_export(
		&self,
		repo: &Repository,
		_exclusions: &ExclusionFlags,
		_lock_source: bool,
	) -> Result<i64, ClientError> {
		Ok(10_000 + repo.id.0)
	}

	async fn export_state(
		&self,
		_repo: &Repository,
		migration_id: i64,
	) -> Result<ExportState, ClientError> {
		Ok(ExportState::Exported(ArchiveUrls {
			git_archive_url: format!("https://archives.test/{migration_id}.tar.gz"),
			metadata_archive_url: Some(format!("https://archives.test/{migration_id}-meta.tar.gz")),
		}))
	}

	async fn unlock(&self, _repo: &Repository, _migration_id: i64) -> Result<(), ClientError> {
		Ok(())
	}
}

/// Imports for targets named in `failing` end in a remote failure.
#[derive(Default)]
struct ScriptedDestination {
	failing: HashSet<String>,
	requests: Mutex<Vec<ImportRequest>>,
}

#[async_trait]
impl DestinationClient for ScriptedDestination {
	async fn repository_exists(&self, _org: &str, _name: &str) -> Result<bool, ClientError> {
		Ok(false)
	}

	async fn start_import(&self, request: &ImportRequest) -> Result<String, ClientError> {
		self.requests.lock().push(request.clone());
		Ok(request.target_name.clone())
	}

	async fn import_state(&self, migration_id: &str) -> Result<RemoteState, ClientError> {
		if self.failing.contains(migration_id) {
			Ok(RemoteState::Failed("import rejected by destination".into()))
		} else {
			Ok(RemoteState::Succeeded)
		}
	}
}

struct Env {
	repos: Arc<SqliteRepositoryStore>,
	batches: Arc<SqliteBatchStore>,
	history: Arc<SqliteHistoryStore>,
	ops: MigrationOperations,
}

async fn env() -> Env {
	let pool = create_migrated_test_pool().await;
	let repos = Arc::new(SqliteRepositoryStore::new(pool.clone()));
	let batches = Arc::new(SqliteBatchStore::new(pool.clone()));
	let history = Arc::new(SqliteHistoryStore::new(pool));
	let ops = MigrationOperations::new(batches.clone(), repos.clone(), ValidationLimits::default());
	Env {
		repos,
		batches,
		history,
		ops,
	}
}

async fn insert(env: &Env, full_name: &str) -> RepositoryId {
	let mut repo =
		Repository::discovered(full_name, PlatformProperties::GitHub(GitHubProperties::default()));
	repo.source_url = Some(format!("https://github.com/{full_name}"));
	env.repos.save_repository(&repo).await.unwrap()
}

fn pipeline_worker(env: &Env, destination: ScriptedDestination, worker_count: usize) -> MigrationWorker {
	let executor = PipelineExecutor::new(
		env.repos.clone(),
		env.history.clone(),
		Arc::new(destination),
		ExecutorSettings {
			status_poll_interval: Duration::from_millis(1),
			default_org: Some("acme-emu".into()),
			..Default::default()
		},
	)
	.with_source(SourceKind::GitHub, Arc::new(ScriptedSource));

	MigrationWorker::builder()
		.repositories(env.repos.clone())
		.executor(Arc::new(executor))
		.batch_manager(BatchManager::new(env.batches.clone(), env.repos.clone()))
		.settings(WorkerSettings {
			poll_interval: Duration::from_millis(10),
			worker_count,
			dry_run_enabled: true,
		})
		.build()
		.unwrap()
}

async fn wait_for_batch(env: &Env, batch_id: BatchId, expected: BatchStatus) {
	for _ in 0..500 {
		let batch = env.ops.batch_manager().get(batch_id).await.unwrap();
		if batch.status == expected {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("batch {batch_id} never reached {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_migrates_end_to_end() {
	let env = env().await;
	let ids = vec![
		insert(&env, "acme/api").await,
		insert(&env, "acme/web").await,
		insert(&env, "acme/docs").await,
	];
	let batch = env
		.ops
		.create_batch(&NewBatch {
			name: "wave-1".into(),
			..Default::default()
		})
		.await
		.unwrap();
	env.ops
		.batch_manager()
		.add_repositories(batch.id, &ids)
		.await
		.unwrap();

	let worker = pipeline_worker(&env, ScriptedDestination::default(), 2);
	worker.start().await.unwrap();
	assert_eq!(env.ops.start_batch(batch.id).await.unwrap(), 3);

	wait_for_batch(&env, batch.id, BatchStatus::Completed).await;
	worker.stop().await;

	for id in &ids {
		let repo = env.repos.get_repository_by_id(*id).await.unwrap().unwrap();
		assert_eq!(repo.status, MigrationStatus::Complete);
		assert!(repo.migrated_at.is_some());
		let history = env.history.list_history(*id).await.unwrap();
		assert_eq!(history.len(), 4);
		assert!(history.iter().all(|h| h.status == HistoryStatus::Completed));
	}

	let stats = env.ops.batch_manager().compute_stats(batch.id).await.unwrap();
	assert_eq!(stats.progress_percent, 100.0);
	let batch = env.ops.batch_manager().get(batch.id).await.unwrap();
	assert!(batch.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_member_is_retried_by_operator() {
	let env = env().await;
	let ok = insert(&env, "acme/ok").await;
	let flaky = insert(&env, "acme/flaky").await;
	let batch = env
		.ops
		.create_batch(&NewBatch {
			name: "wave-2".into(),
			..Default::default()
		})
		.await
		.unwrap();
	env.ops
		.batch_manager()
		.add_repositories(batch.id, &[ok, flaky])
		.await
		.unwrap();

	let failing = ScriptedDestination {
		failing: HashSet::from(["flaky".to_string()]),
		..Default::default()
	};
	let worker = pipeline_worker(&env, failing, 2);
	worker.start().await.unwrap();
	env.ops.start_batch(batch.id).await.unwrap();
	wait_for_batch(&env, batch.id, BatchStatus::CompletedWithErrors).await;
	worker.stop().await;

	let repo = env.repos.get_repository_by_id(flaky).await.unwrap().unwrap();
	assert_eq!(repo.status, MigrationStatus::MigrationFailed);
	let failed_row = env
		.history
		.list_history(flaky)
		.await
		.unwrap()
		.into_iter()
		.find(|h| h.status == HistoryStatus::Failed)
		.unwrap();
	assert_eq!(failed_row.phase, MigrationPhase::Migration);

	// Destination recovered; the operator retries.
	let worker = pipeline_worker(&env, ScriptedDestination::default(), 2);
	worker.start().await.unwrap();
	assert_eq!(env.ops.retry_batch_failures(batch.id).await.unwrap(), 1);
	wait_for_batch(&env, batch.id, BatchStatus::Completed).await;
	worker.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dry_run_batch_records_timing() {
	let env = env().await;
	let id = insert(&env, "acme/api").await;
	let batch = env
		.ops
		.create_batch(&NewBatch {
			name: "trial".into(),
			..Default::default()
		})
		.await
		.unwrap();
	env.ops
		.batch_manager()
		.add_repositories(batch.id, &[id])
		.await
		.unwrap();

	let worker = pipeline_worker(&env, ScriptedDestination::default(), 1);
	worker.start().await.unwrap();
	assert_eq!(env.ops.dry_run_batch(batch.id).await.unwrap(), 1);

	for _ in 0..500 {
		let batch = env.ops.batch_manager().get(batch.id).await.unwrap();
		if batch.dry_run_completed_at.is_some() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	worker.stop().await;

	let batch = env.ops.batch_manager().get(batch.id).await.unwrap();
	assert!(batch.dry_run_completed_at.is_some());
	assert!(batch.dry_run_duration_seconds.is_some());
	assert_eq!(batch.status, BatchStatus::Pending);

	let repo = env.repos.get_repository_by_id(id).await.unwrap().unwrap();
	assert_eq!(repo.status, MigrationStatus::DryRunComplete);
	assert!(repo.last_dry_run_at.is_some());
}

/// Pulls the repository out of its batch while the import is being started,
/// the way an operator edits membership mid run.
struct DetachingDestination {
	manager: BatchManager,
	batch_id: BatchId,
	repo_id: RepositoryId,
	inner: ScriptedDestination,
}

#[async_trait]
impl DestinationClient for DetachingDestination {
	async fn repository_exists(&self, org: &str, name: &str) -> Result<bool, ClientError> {
		self.inner.repository_exists(org, name).await
	}

	async fn start_import(&self, request: &ImportRequest) -> Result<String, ClientError> {
		let removed = self
			.manager
			.remove_repositories(self.batch_id, &[self.repo_id])
			.await
			.unwrap();
		assert_eq!(removed, 1);
		self.inner.start_import(request).await
	}

	async fn import_state(&self, migration_id: &str) -> Result<RemoteState, ClientError> {
		self.inner.import_state(migration_id).await
	}
}

#[tokio::test]
async fn membership_change_during_dry_run_is_kept() {
	let env = env().await;
	let id = insert(&env, "acme/api").await;
	let batch = env
		.ops
		.create_batch(&NewBatch {
			name: "trial".into(),
			..Default::default()
		})
		.await
		.unwrap();
	env.ops
		.batch_manager()
		.add_repositories(batch.id, &[id])
		.await
		.unwrap();
	assert_eq!(env.ops.dry_run_batch(batch.id).await.unwrap(), 1);

	let destination = DetachingDestination {
		manager: BatchManager::new(env.batches.clone(), env.repos.clone()),
		batch_id: batch.id,
		repo_id: id,
		inner: ScriptedDestination::default(),
	};
	let executor = PipelineExecutor::new(
		env.repos.clone(),
		env.history.clone(),
		Arc::new(destination),
		ExecutorSettings {
			status_poll_interval: Duration::ZERO,
			default_org: Some("acme-emu".into()),
			..Default::default()
		},
	)
	.with_source(SourceKind::GitHub, Arc::new(ScriptedSource));

	let repo = env.repos.get_repository_by_id(id).await.unwrap().unwrap();
	let outcome = executor.execute(repo).await.unwrap();
	assert!(matches!(
		outcome,
		ExecutionOutcome::Completed(MigrationStatus::DryRunComplete)
	));

	let repo = env.repos.get_repository_by_id(id).await.unwrap().unwrap();
	assert_eq!(repo.status, MigrationStatus::DryRunComplete);
	assert!(repo.batch_id.is_none());
	assert!(repo.last_dry_run_at.is_some());
	let batch = env.ops.batch_manager().get(batch.id).await.unwrap();
	assert_eq!(batch.repository_count, 0);
}

/// Runs operator commands against the repository while its archive export
/// is being polled.
struct OperatorDuringExport {
	ops: MigrationOperations,
	batch_id: BatchId,
	repo_id: RepositoryId,
	polls: AtomicUsize,
}

#[async_trait]
impl SourceClient for OperatorDuringExport {
	async fn fetch_metadata(&self, repo: &Repository) -> Result<GitProperties, ClientError> {
		ScriptedSource.fetch_metadata(repo).await
	}

	async fn start_export(
		&self,
		repo: &Repository,
		exclusions: &ExclusionFlags,
		lock_source: bool,
	) -> Result<i64, ClientError> {
		ScriptedSource.start_export(repo, exclusions, lock_source).await
	}

	async fn export_state(
		&self,
		repo: &Repository,
		migration_id: i64,
	) -> Result<ExportState, ClientError> {
		self.polls.fetch_add(1, Ordering::SeqCst);

		let summary = self.ops.revalidate_all().await.unwrap();
		assert_eq!(summary.validated, 0);
		assert_eq!(summary.skipped_in_flight, 1);
		assert!(self.ops.revalidate_repository(self.repo_id).await.is_err());
		assert!(self
			.ops
			.rollback_repository(self.repo_id, "changed my mind")
			.await
			.is_err());
		assert!(self.ops.batch_manager().delete(self.batch_id).await.is_err());
		assert!(self.ops.start_batch(self.batch_id).await.is_err());

		ScriptedSource.export_state(repo, migration_id).await
	}

	async fn unlock(&self, repo: &Repository, migration_id: i64) -> Result<(), ClientError> {
		ScriptedSource.unlock(repo, migration_id).await
	}
}

#[tokio::test]
async fn operator_commands_during_export_leave_the_run_alone() {
	let env = env().await;
	let id = insert(&env, "acme/api").await;
	let batch = env
		.ops
		.create_batch(&NewBatch {
			name: "wave-1".into(),
			..Default::default()
		})
		.await
		.unwrap();
	env.ops
		.batch_manager()
		.add_repositories(batch.id, &[id])
		.await
		.unwrap();
	assert_eq!(env.ops.start_batch(batch.id).await.unwrap(), 1);

	let source = Arc::new(OperatorDuringExport {
		ops: MigrationOperations::new(
			env.batches.clone(),
			env.repos.clone(),
			ValidationLimits::default(),
		),
		batch_id: batch.id,
		repo_id: id,
		polls: AtomicUsize::new(0),
	});
	let executor = PipelineExecutor::new(
		env.repos.clone(),
		env.history.clone(),
		Arc::new(ScriptedDestination::default()),
		ExecutorSettings {
			status_poll_interval: Duration::ZERO,
			default_org: Some("acme-emu".into()),
			..Default::default()
		},
	)
	.with_source(SourceKind::GitHub, source.clone());

	let repo = env.repos.get_repository_by_id(id).await.unwrap().unwrap();
	let outcome = executor.execute(repo).await.unwrap();
	assert!(matches!(
		outcome,
		ExecutionOutcome::Completed(MigrationStatus::Complete)
	));
	assert!(source.polls.load(Ordering::SeqCst) >= 1);

	let repo = env.repos.get_repository_by_id(id).await.unwrap().unwrap();
	assert_eq!(repo.status, MigrationStatus::Complete);
	assert_eq!(repo.batch_id, Some(batch.id));
	assert!(!repo.is_source_locked);
	let batch = env.ops.batch_manager().get(batch.id).await.unwrap();
	assert_eq!(batch.repository_count, 1);
}

/// Sleeps before finishing so `stop` has something to wait on.
struct DelayedExecutor {
	delay: Duration,
	finished: AtomicUsize,
}

#[async_trait]
impl Executor for DelayedExecutor {
	async fn execute(&self, _repo: Repository) -> Result<ExecutionOutcome, MigrateError> {
		tokio::time::sleep(self.delay).await;
		self.finished.fetch_add(1, Ordering::SeqCst);
		Ok(ExecutionOutcome::Completed(MigrationStatus::Complete))
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_returns_only_after_active_set_drains() {
	let env = env().await;
	let id = insert(&env, "acme/slow").await;
	env.repos
		.update_status_where(id, MigrationStatus::Pending, MigrationStatus::QueuedForMigration)
		.await
		.unwrap();

	let executor = Arc::new(DelayedExecutor {
		delay: Duration::from_millis(300),
		finished: AtomicUsize::new(0),
	});
	let worker = MigrationWorker::builder()
		.repositories(env.repos.clone())
		.executor(executor.clone())
		.settings(WorkerSettings {
			poll_interval: Duration::from_secs(60),
			worker_count: 1,
			dry_run_enabled: false,
		})
		.build()
		.unwrap();

	worker.start().await.unwrap();
	for _ in 0..100 {
		if worker.is_active(id) {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	assert!(worker.is_active(id));

	worker.stop().await;
	assert_eq!(worker.active_count(), 0);
	assert!(worker.active_migrations().is_empty());
	assert_eq!(executor.finished.load(Ordering::SeqCst), 1);
}
