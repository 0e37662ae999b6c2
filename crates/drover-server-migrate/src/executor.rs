// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-repository migration pipelines.
//!
//! An [`Executor`] drives one repository from its queued status to a terminal
//! one. Every phase opens a history row, calls the remote collaborators and
//! closes the row. A failed phase ends the attempt: the repository moves to
//! the phase's failure status and waits for an operator retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use drover_migrate_core::{
	validate, HistoryId, HistoryOutcome, LogLevel, MigrationPhase, MigrationStatus,
	NewMigrationHistory, NewMigrationLog, PlatformProperties, Repository, SourceKind,
	ValidationLimits,
};
use drover_server_config::ServerConfig;
use drover_server_db::{HistoryStore, RepositoryStore};
use tracing::{debug, info, instrument, warn};

use crate::client::{
	ArchiveUrls, DestinationClient, ExportState, ImportRequest, ImportSource, RemoteState,
	SourceClient,
};
use crate::error::{MigrateError, Result};

/// Which pipeline a repository's status selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
	DryRun,
	Migration,
}

impl ExecutionMode {
	pub fn for_status(status: MigrationStatus) -> Option<Self> {
		match status {
			MigrationStatus::Pending | MigrationStatus::DryRunQueued => Some(ExecutionMode::DryRun),
			MigrationStatus::QueuedForMigration => Some(ExecutionMode::Migration),
			_ => None,
		}
	}

	fn failure_status(&self) -> MigrationStatus {
		match self {
			ExecutionMode::DryRun => MigrationStatus::DryRunFailed,
			ExecutionMode::Migration => MigrationStatus::MigrationFailed,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
	/// The pipeline reached its success status.
	Completed(MigrationStatus),
	Failed {
		status: MigrationStatus,
		phase: MigrationPhase,
		error: String,
	},
	/// Non-git source; parked in `remediation_required`.
	RemediationRequired,
	/// Nothing to do for the repository's current status.
	Skipped(String),
}

#[async_trait]
pub trait Executor: Send + Sync {
	async fn execute(&self, repo: Repository) -> Result<ExecutionOutcome>;
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
	/// Delay between remote status polls.
	pub status_poll_interval: Duration,
	pub default_org: Option<String>,
	pub limits: ValidationLimits,
}

impl Default for ExecutorSettings {
	fn default() -> Self {
		Self {
			status_poll_interval: Duration::from_secs(
				drover_server_config::sections::worker::DEFAULT_STATUS_POLL_INTERVAL_SECS,
			),
			default_org: None,
			limits: ValidationLimits::default(),
		}
	}
}

impl ExecutorSettings {
	pub fn from_config(config: &ServerConfig) -> Self {
		Self {
			status_poll_interval: Duration::from_secs(config.worker.status_poll_interval_secs),
			default_org: config.destination.default_org.clone(),
			limits: config.limits.validation_limits(),
		}
	}
}

/// Executor for GitHub-like and Azure-DevOps-like sources, dispatching on the
/// repository's platform bundle.
pub struct PipelineExecutor {
	repositories: Arc<dyn RepositoryStore>,
	history: Arc<dyn HistoryStore>,
	sources: HashMap<SourceKind, Arc<dyn SourceClient>>,
	destination: Arc<dyn DestinationClient>,
	settings: ExecutorSettings,
}

impl PipelineExecutor {
	pub fn new(
		repositories: Arc<dyn RepositoryStore>,
		history: Arc<dyn HistoryStore>,
		destination: Arc<dyn DestinationClient>,
		settings: ExecutorSettings,
	) -> Self {
		Self {
			repositories,
			history,
			sources: HashMap::new(),
			destination,
			settings,
		}
	}

	pub fn with_source(mut self, kind: SourceKind, client: Arc<dyn SourceClient>) -> Self {
		self.sources.insert(kind, client);
		self
	}

	fn source_for(&self, kind: SourceKind) -> Result<Arc<dyn SourceClient>> {
		self
			.sources
			.get(&kind)
			.cloned()
			.ok_or_else(|| MigrateError::Preflight(format!("no source client registered for {kind}")))
	}

	/// Destination `(org, name)` for a repository.
	fn target(&self, repo: &Repository) -> Result<(String, String)> {
		if let Some((org, name)) = repo
			.destination_full_name
			.as_deref()
			.and_then(|full| full.split_once('/'))
		{
			return Ok((org.to_string(), name.to_string()));
		}

		let org = self
			.settings
			.default_org
			.clone()
			.ok_or_else(|| MigrateError::Preflight("no destination organization configured".into()))?;
		Ok((org, repo.name().to_string()))
	}

	async fn ensure_target_free(&self, org: &str, name: &str) -> Result<()> {
		if self.destination.repository_exists(org, name).await? {
			return Err(MigrateError::Preflight(format!(
				"destination repository {org}/{name} already exists"
			)));
		}
		Ok(())
	}

	async fn await_export(
		&self,
		source: &dyn SourceClient,
		repo: &Repository,
		migration_id: i64,
	) -> Result<ArchiveUrls> {
		loop {
			match source.export_state(repo, migration_id).await? {
				ExportState::Exported(urls) => return Ok(urls),
				ExportState::Failed(message) => return Err(MigrateError::RemoteFailed(message)),
				state => {
					debug!(repo_id = %repo.id, migration_id, ?state, "archive export not ready");
					tokio::time::sleep(self.settings.status_poll_interval).await;
				}
			}
		}
	}

	async fn await_import(&self, migration_id: &str) -> Result<()> {
		loop {
			match self.destination.import_state(migration_id).await? {
				RemoteState::Succeeded => return Ok(()),
				RemoteState::Failed(message) => return Err(MigrateError::RemoteFailed(message)),
				state => {
					debug!(migration_id, ?state, "import not finished");
					tokio::time::sleep(self.settings.status_poll_interval).await;
				}
			}
		}
	}

	async fn mark_remediation(&self, repo: Repository) -> Result<ExecutionOutcome> {
		repo
			.status
			.transition(MigrationStatus::RemediationRequired)?;
		let moved = self
			.repositories
			.update_status_where(repo.id, repo.status, MigrationStatus::RemediationRequired)
			.await?;
		if !moved {
			return Ok(ExecutionOutcome::Skipped(format!(
				"repository {} changed status before remediation could be recorded",
				repo.id
			)));
		}
		warn!(repo_id = %repo.id, full_name = %repo.full_name, "Non-git repository requires remediation");
		Ok(ExecutionOutcome::RemediationRequired)
	}

	async fn run(&self, repo: Repository, mode: ExecutionMode) -> Result<ExecutionOutcome> {
		let initial_phase = match mode {
			ExecutionMode::DryRun => MigrationPhase::DryRun,
			ExecutionMode::Migration => MigrationPhase::PreMigration,
		};
		let mut attempt = Attempt::new(self, repo, initial_phase);

		let entry = match mode {
			ExecutionMode::DryRun => MigrationStatus::DryRunInProgress,
			ExecutionMode::Migration => MigrationStatus::PreMigration,
		};
		if !attempt.advance(entry).await? {
			return Ok(ExecutionOutcome::Skipped(format!(
				"repository {} was claimed by another worker",
				attempt.repo.id
			)));
		}

		let result = match mode {
			ExecutionMode::DryRun => self.dry_run_phases(&mut attempt).await,
			ExecutionMode::Migration => self.migration_phases(&mut attempt).await,
		};

		match result {
			Ok(status) => Ok(ExecutionOutcome::Completed(status)),
			Err(err) if err.is_execution_failure() => attempt.fail(mode.failure_status(), &err).await,
			Err(err) => {
				if let Err(record_err) = attempt.fail(mode.failure_status(), &err).await {
					warn!(error = %record_err, "could not record failed attempt");
				}
				Err(err)
			}
		}
	}

	async fn dry_run_phases(&self, attempt: &mut Attempt<'_>) -> Result<MigrationStatus> {
		let (org, name) = self.target(&attempt.repo)?;
		attempt
			.begin(
				MigrationPhase::DryRun,
				format!("dry run into {org}/{name}"),
			)
			.await?;

		self.ensure_target_free(&org, &name).await?;
		let source_url = attempt
			.repo
			.source_url
			.clone()
			.ok_or_else(|| MigrateError::Preflight("repository has no source URL".into()))?;

		let request = ImportRequest {
			source: ImportSource::Direct { source_url },
			target_org: org,
			target_name: name,
			exclusions: attempt.repo.exclusions,
			dry_run: true,
		};
		let remote_id = self.destination.start_import(&request).await?;
		attempt
			.log(LogLevel::Info, "start_import", format!("dry-run import {remote_id} started"))
			.await?;
		self.await_import(&remote_id).await?;

		let finished_at = Utc::now();
		self.repositories
			.record_dry_run(attempt.repo.id, finished_at)
			.await?;
		attempt.repo.last_dry_run_at = Some(finished_at);
		attempt.advance_or_fail(MigrationStatus::DryRunComplete).await?;
		attempt.finish("dry run completed").await?;

		Ok(MigrationStatus::DryRunComplete)
	}

	async fn migration_phases(&self, attempt: &mut Attempt<'_>) -> Result<MigrationStatus> {
		attempt
			.begin(MigrationPhase::PreMigration, "pre-flight checks")
			.await?;
		let (org, name) = self.target(&attempt.repo)?;
		let source = self.source_for(attempt.repo.source_kind())?;
		self.ensure_target_free(&org, &name).await?;

		attempt.repo.git = source.fetch_metadata(&attempt.repo).await?;
		let report = validate(&attempt.repo, &self.settings.limits);
		let blocker = report.blockers.first().map(|f| f.message.clone());
		attempt.repo.validation = report.into_state(Utc::now());
		self.repositories
			.record_validation(attempt.repo.id, Some(&attempt.repo.git), &attempt.repo.validation)
			.await?;
		if let Some(message) = blocker {
			return Err(MigrateError::Preflight(message));
		}
		attempt.finish("pre-flight checks passed").await?;

		let import_source = match &attempt.repo.platform {
			PlatformProperties::GitHub(_) => {
				attempt
					.advance_or_fail(MigrationStatus::ArchiveGenerating)
					.await?;
				attempt
					.begin(MigrationPhase::ArchiveGeneration, "generating migration archives")
					.await?;

				// A metadata-only migration leaves the source writable.
				let lock_source = !attempt.repo.exclusions.exclude_git_data;
				let exclusions = attempt.repo.exclusions;
				let migration_id = source
					.start_export(&attempt.repo, &exclusions, lock_source)
					.await?;
				self.repositories
					.record_source_lock(attempt.repo.id, migration_id, lock_source)
					.await?;
				attempt.repo.source_migration_id = Some(migration_id);
				attempt.repo.is_source_locked = lock_source;

				let urls = self
					.await_export(source.as_ref(), &attempt.repo, migration_id)
					.await?;
				attempt
					.finish(format!("archives ready for export {migration_id}"))
					.await?;
				ImportSource::Archives(urls)
			}
			PlatformProperties::AzureDevOps(_) => {
				let source_url = attempt
					.repo
					.source_url
					.clone()
					.ok_or_else(|| MigrateError::Preflight("repository has no source URL".into()))?;
				ImportSource::Direct { source_url }
			}
		};

		attempt
			.advance_or_fail(MigrationStatus::MigratingContent)
			.await?;
		attempt
			.begin(MigrationPhase::Migration, format!("importing into {org}/{name}"))
			.await?;
		let request = ImportRequest {
			source: import_source,
			target_org: org.clone(),
			target_name: name.clone(),
			exclusions: attempt.repo.exclusions,
			dry_run: false,
		};
		let remote_id = self.destination.start_import(&request).await?;
		attempt
			.log(LogLevel::Info, "start_import", format!("import {remote_id} started"))
			.await?;
		self.await_import(&remote_id).await?;
		attempt.finish("content migrated").await?;
		attempt
			.advance_or_fail(MigrationStatus::MigrationComplete)
			.await?;

		attempt
			.advance_or_fail(MigrationStatus::PostMigration)
			.await?;
		attempt
			.begin(MigrationPhase::PostMigration, "post-migration cleanup")
			.await?;
		if attempt.repo.is_source_locked {
			if let Some(migration_id) = attempt.repo.source_migration_id {
				source.unlock(&attempt.repo, migration_id).await?;
			}
			self.repositories.clear_source_lock(attempt.repo.id).await?;
			attempt.repo.is_source_locked = false;
			attempt.repo.source_migration_id = None;
		}
		let destination = format!("{org}/{name}");
		let migrated_at = Utc::now();
		self.repositories
			.record_migrated(attempt.repo.id, &destination, migrated_at)
			.await?;
		attempt.repo.destination_full_name = Some(destination);
		attempt.repo.migrated_at = Some(migrated_at);
		attempt.advance_or_fail(MigrationStatus::Complete).await?;
		attempt.finish("migration complete").await?;

		Ok(MigrationStatus::Complete)
	}
}

#[async_trait]
impl Executor for PipelineExecutor {
	#[instrument(skip(self, repo), fields(repo_id = %repo.id, full_name = %repo.full_name, status = %repo.status))]
	async fn execute(&self, repo: Repository) -> Result<ExecutionOutcome> {
		let Some(mode) = ExecutionMode::for_status(repo.status) else {
			return Ok(ExecutionOutcome::Skipped(format!(
				"status {} has no pipeline",
				repo.status
			)));
		};

		if repo.requires_remediation() {
			return self.mark_remediation(repo).await;
		}

		let outcome = self.run(repo, mode).await?;
		info!(?mode, ?outcome, "Execution finished");
		Ok(outcome)
	}
}

/// One execution attempt: the repository as the executor last wrote it, plus
/// the history row currently open.
struct Attempt<'a> {
	executor: &'a PipelineExecutor,
	repo: Repository,
	phase: MigrationPhase,
	open: Option<HistoryId>,
}

impl<'a> Attempt<'a> {
	fn new(executor: &'a PipelineExecutor, repo: Repository, phase: MigrationPhase) -> Self {
		Self {
			executor,
			repo,
			phase,
			open: None,
		}
	}

	/// Compare-and-set the status. False when another writer moved the row.
	async fn advance(&mut self, to: MigrationStatus) -> Result<bool> {
		self.repo.status.transition(to)?;
		let moved = self
			.executor
			.repositories
			.update_status_where(self.repo.id, self.repo.status, to)
			.await?;
		if moved {
			self.repo.status = to;
		}
		Ok(moved)
	}

	async fn advance_or_fail(&mut self, to: MigrationStatus) -> Result<()> {
		if self.advance(to).await? {
			Ok(())
		} else {
			Err(MigrateError::InvalidState(format!(
				"repository {} left {} during execution",
				self.repo.id, self.repo.status
			)))
		}
	}

	async fn begin(&mut self, phase: MigrationPhase, message: impl Into<String>) -> Result<()> {
		let message = message.into();
		let entry = NewMigrationHistory::started(self.repo.id, phase).with_message(message.clone());
		let id = self.executor.history.create_history(&entry).await?;
		self.phase = phase;
		self.open = Some(id);
		self.log(LogLevel::Info, "begin", message).await
	}

	async fn finish(&mut self, message: impl Into<String>) -> Result<()> {
		let message = message.into();
		if let Some(id) = self.open {
			self
				.executor
				.history
				.complete_history(id, &HistoryOutcome::completed(message.clone()))
				.await?;
			self.log(LogLevel::Info, "complete", message).await?;
			self.open = None;
		}
		Ok(())
	}

	async fn log(&self, level: LogLevel, operation: &str, message: impl Into<String>) -> Result<()> {
		self
			.executor
			.history
			.append_log(&NewMigrationLog {
				repository_id: self.repo.id,
				history_id: self.open,
				level,
				phase: self.phase,
				operation: operation.to_string(),
				message: message.into(),
				details: None,
			})
			.await?;
		Ok(())
	}

	/// Close the attempt as failed: error on the open history row (one is
	/// opened if the failure came before any phase began) and the repository
	/// moved to `failure`.
	async fn fail(
		&mut self,
		failure: MigrationStatus,
		error: &MigrateError,
	) -> Result<ExecutionOutcome> {
		let message = error.to_string();
		let history_id = match self.open {
			Some(id) => id,
			None => {
				self
					.executor
					.history
					.create_history(&NewMigrationHistory::started(self.repo.id, self.phase))
					.await?
			}
		};
		self.open = Some(history_id);
		self.log(LogLevel::Error, "fail", message.clone()).await?;
		self
			.executor
			.history
			.complete_history(history_id, &HistoryOutcome::failed(message.clone()))
			.await?;
		self.open = None;

		if self.repo.status.can_transition_to(failure) && !self.advance(failure).await? {
			warn!(repo_id = %self.repo.id, "status changed before failure could be recorded");
		}

		warn!(
			repo_id = %self.repo.id,
			phase = %self.phase,
			error = %message,
			"Migration attempt failed"
		);
		Ok(ExecutionOutcome::Failed {
			status: self.repo.status,
			phase: self.phase,
			error: message,
		})
	}
}
