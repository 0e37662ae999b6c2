// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator-triggered operations.
//!
//! Bulk status changes go through compare-and-set updates so a repository an
//! executor has claimed is never rewritten from here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use drover_migrate_core::{
	plan_waves, validate, Batch, BatchId, BatchStatus, BatchUpdate, MigrationStatus, NewBatch,
	PlanItem, Repository, RepositoryId, SourceKind, ValidationLimits, ValidationReport, WavePlan,
};
use drover_server_db::{BatchStore, RepositoryFilter, RepositoryStore, RollbackRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::batch::BatchManager;
use crate::client::SourceClient;
use crate::error::{MigrateError, Result};

const REVALIDATE_PAGE_SIZE: i64 = 500;

/// Counts from [`MigrationOperations::revalidate_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationSummary {
	pub validated: usize,
	pub blocked: usize,
	pub remediation_required: usize,
	pub skipped_in_flight: usize,
}

pub struct MigrationOperations {
	batches: Arc<dyn BatchStore>,
	repositories: Arc<dyn RepositoryStore>,
	manager: BatchManager,
	sources: HashMap<SourceKind, Arc<dyn SourceClient>>,
	limits: ValidationLimits,
}

impl MigrationOperations {
	pub fn new(
		batches: Arc<dyn BatchStore>,
		repositories: Arc<dyn RepositoryStore>,
		limits: ValidationLimits,
	) -> Self {
		Self {
			manager: BatchManager::new(batches.clone(), repositories.clone()),
			batches,
			repositories,
			sources: HashMap::new(),
			limits,
		}
	}

	/// Register the source client used to release source locks on unlock.
	pub fn with_source(mut self, kind: SourceKind, client: Arc<dyn SourceClient>) -> Self {
		self.sources.insert(kind, client);
		self
	}

	pub fn batch_manager(&self) -> &BatchManager {
		&self.manager
	}

	async fn repository(&self, id: RepositoryId) -> Result<Repository> {
		self
			.repositories
			.get_repository_by_id(id)
			.await?
			.ok_or_else(|| MigrateError::NotFound(format!("repository {id}")))
	}

	async fn members(&self, batch_id: BatchId) -> Result<Vec<Repository>> {
		Ok(self
			.repositories
			.list_repositories(&RepositoryFilter::in_batch(batch_id))
			.await?)
	}

	/// Move every member in one of `from` to `to`. Returns how many moved.
	async fn move_members(
		&self,
		members: &[Repository],
		to: MigrationStatus,
		eligible: impl Fn(MigrationStatus) -> bool,
	) -> Result<usize> {
		let mut moved = 0;
		for repo in members.iter().filter(|r| eligible(r.status)) {
			repo.status.transition(to)?;
			if self
				.repositories
				.update_status_where(repo.id, repo.status, to)
				.await?
			{
				moved += 1;
			}
		}
		Ok(moved)
	}

	#[instrument(skip(self, batch), fields(name = %batch.name))]
	pub async fn create_batch(&self, batch: &NewBatch) -> Result<Batch> {
		if batch.name.trim().is_empty() {
			return Err(MigrateError::Validation("batch name must not be empty".into()));
		}
		let created = self.batches.create_batch(batch).await?;
		info!(batch_id = %created.id, "Batch created");
		Ok(created)
	}

	#[instrument(skip(self, update), fields(batch_id = %batch_id))]
	pub async fn update_batch(&self, batch_id: BatchId, update: BatchUpdate) -> Result<Batch> {
		let mut batch = self.manager.get(batch_id).await?;
		if !batch.status.accepts_membership_changes() {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is {} and can no longer be edited",
				batch.status
			)));
		}
		if matches!(&update.name, Some(name) if name.trim().is_empty()) {
			return Err(MigrateError::Validation("batch name must not be empty".into()));
		}
		batch.apply_update(update);
		self.batches.update_batch(&batch).await?;
		Ok(batch)
	}

	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn mark_ready(&self, batch_id: BatchId) -> Result<Batch> {
		self.manager.get(batch_id).await?;
		if !self
			.batches
			.transition_batch(batch_id, &[BatchStatus::Pending], BatchStatus::Ready)
			.await?
		{
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is not pending"
			)));
		}
		self.manager.get(batch_id).await
	}

	/// Queue every dry-run-eligible member for a dry run.
	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn dry_run_batch(&self, batch_id: BatchId) -> Result<usize> {
		let mut batch = self.manager.get(batch_id).await?;
		if !batch.status.accepts_membership_changes() {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is {}; dry runs need a pending or ready batch",
				batch.status
			)));
		}

		// Stamp before queueing so a fast worker finds the dry run open.
		batch.dry_run_started_at = Some(Utc::now());
		batch.dry_run_completed_at = None;
		batch.dry_run_duration_seconds = None;
		self.batches.update_batch(&batch).await?;

		let members = self.members(batch_id).await?;
		let queued = self
			.move_members(&members, MigrationStatus::DryRunQueued, |s| {
				s.is_dry_run_eligible()
			})
			.await?;

		info!(queued, "Batch dry run queued");
		Ok(queued)
	}

	/// Start the batch and queue its eligible members for migration. Refused
	/// while a member's dry run is still queued or running.
	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn start_batch(&self, batch_id: BatchId) -> Result<usize> {
		let dry_running = self
			.members(batch_id)
			.await?
			.iter()
			.filter(|r| {
				matches!(
					r.status,
					MigrationStatus::DryRunQueued | MigrationStatus::DryRunInProgress
				)
			})
			.count();
		if dry_running > 0 {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} has {dry_running} dry runs still queued or running"
			)));
		}

		let batch = self.manager.start(batch_id).await?;
		let members = self.members(batch_id).await?;

		for repo in members.iter().filter(|r| r.status.is_batch_eligible()) {
			let exclusions = repo.exclusions.merged_with(&batch.exclusions);
			let destination = match (&repo.destination_full_name, &batch.destination_org) {
				(None, Some(org)) => Some(format!("{org}/{}", repo.name())),
				_ => None,
			};
			if exclusions == repo.exclusions && destination.is_none() {
				continue;
			}
			self.repositories
				.apply_batch_defaults(repo.id, &exclusions, destination.as_deref())
				.await?;
		}

		let queued = self
			.move_members(&members, MigrationStatus::QueuedForMigration, |s| {
				s.is_batch_eligible()
			})
			.await?;

		info!(queued, "Batch members queued for migration");
		Ok(queued)
	}

	/// Requeue failed members. A settled batch with errors reopens.
	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn retry_batch_failures(&self, batch_id: BatchId) -> Result<usize> {
		let batch = self.manager.get(batch_id).await?;
		if !batch.status.can_retry() {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is {}; nothing to retry",
				batch.status
			)));
		}

		if matches!(
			batch.status,
			BatchStatus::CompletedWithErrors | BatchStatus::Failed
		) {
			let reopened = self
				.batches
				.transition_batch(
					batch_id,
					&[BatchStatus::CompletedWithErrors, BatchStatus::Failed],
					BatchStatus::InProgress,
				)
				.await?;
			if reopened {
				if let Some(mut batch) = self.batches.get_batch(batch_id).await? {
					batch.completed_at = None;
					batch.last_migration_attempt_at = Some(Utc::now());
					self.batches.update_batch(&batch).await?;
				}
			}
		}

		let members = self.members(batch_id).await?;
		let dry_runs = self
			.move_members(&members, MigrationStatus::DryRunQueued, |s| {
				s == MigrationStatus::DryRunFailed
			})
			.await?;
		let migrations = self
			.move_members(&members, MigrationStatus::QueuedForMigration, |s| {
				s == MigrationStatus::MigrationFailed
			})
			.await?;

		info!(dry_runs, migrations, "Batch failures requeued");
		Ok(dry_runs + migrations)
	}

	#[instrument(skip(self, reason), fields(repo_id = %repo_id))]
	pub async fn rollback_repository(
		&self,
		repo_id: RepositoryId,
		reason: &str,
	) -> Result<RollbackRecord> {
		let repo = self.repository(repo_id).await?;
		if !repo.status.is_rollback_eligible() {
			return Err(MigrateError::InvalidState(format!(
				"repository {repo_id} is {} and cannot be rolled back",
				repo.status
			)));
		}

		let record = self.repositories.rollback_repository(repo_id, reason).await?;
		info!(
			previous_status = %record.previous_status,
			previous_batch_id = ?record.previous_batch_id,
			"Repository rolled back"
		);
		Ok(record)
	}

	/// Clear a stuck source lock. The remote unlock runs first when a source
	/// migration id is known; the status is left alone.
	#[instrument(skip(self), fields(repo_id = %repo_id))]
	pub async fn unlock_repository(&self, repo_id: RepositoryId) -> Result<Repository> {
		let repo = self.repository(repo_id).await?;

		if let (true, Some(migration_id)) = (repo.is_source_locked, repo.source_migration_id) {
			match self.sources.get(&repo.source_kind()) {
				Some(source) => source.unlock(&repo, migration_id).await?,
				None => warn!(
					source_kind = %repo.source_kind(),
					"No source client registered; clearing lock locally only"
				),
			}
		}

		self.repositories.clear_source_lock(repo_id).await?;
		info!("Repository unlocked");
		self.repository(repo_id).await
	}

	#[instrument(skip(self), fields(repo_id = %repo_id))]
	pub async fn revalidate_repository(&self, repo_id: RepositoryId) -> Result<ValidationReport> {
		let mut repo = self.repository(repo_id).await?;
		if repo.status.is_in_flight() || repo.status.is_queued() {
			return Err(MigrateError::InvalidState(format!(
				"repository {repo_id} is {} and owned by the worker",
				repo.status
			)));
		}
		let report = self.apply_validation(&mut repo).await?;
		Ok(report)
	}

	/// Persist fresh validation. Status only moves through compare-and-set,
	/// so a row the worker claimed meanwhile keeps the worker's status.
	async fn apply_validation(&self, repo: &mut Repository) -> Result<ValidationReport> {
		let report = validate(repo, &self.limits);
		repo.validation = report.clone().into_state(Utc::now());
		self.repositories
			.record_validation(repo.id, None, &repo.validation)
			.await?;

		if repo.requires_remediation()
			&& repo
				.status
				.can_transition_to(MigrationStatus::RemediationRequired)
			&& self
				.repositories
				.update_status_where(repo.id, repo.status, MigrationStatus::RemediationRequired)
				.await?
		{
			repo.status = MigrationStatus::RemediationRequired;
		}
		Ok(report)
	}

	/// Recompute validation for every repository not owned by an executor.
	#[instrument(skip(self))]
	pub async fn revalidate_all(&self) -> Result<RevalidationSummary> {
		let mut summary = RevalidationSummary::default();
		let mut offset = 0;

		loop {
			let page = self
				.repositories
				.list_repositories(&RepositoryFilter {
					limit: Some(REVALIDATE_PAGE_SIZE),
					offset: Some(offset),
					..Default::default()
				})
				.await?;
			if page.is_empty() {
				break;
			}
			offset += page.len() as i64;

			for mut repo in page {
				if repo.status.is_in_flight() || repo.status.is_queued() {
					summary.skipped_in_flight += 1;
					continue;
				}
				let report = self.apply_validation(&mut repo).await?;
				summary.validated += 1;
				if !report.blockers.is_empty() {
					summary.blocked += 1;
				}
				if repo.status == MigrationStatus::RemediationRequired {
					summary.remediation_required += 1;
				}
			}
		}

		info!(
			validated = summary.validated,
			blocked = summary.blocked,
			remediation_required = summary.remediation_required,
			"Revalidation finished"
		);
		Ok(summary)
	}

	/// Order repositories into dependency-respecting waves.
	#[instrument(skip(self, repo_ids), fields(count = repo_ids.len()))]
	pub async fn plan_waves(&self, repo_ids: &[RepositoryId]) -> Result<WavePlan> {
		let mut items = Vec::with_capacity(repo_ids.len());
		for &id in repo_ids {
			let repo = self.repository(id).await?;
			items.push(PlanItem::from(&repo));
		}
		let dependencies = self.repositories.list_dependencies(repo_ids).await?;
		let plan = plan_waves(&items, &dependencies);

		info!(
			waves = plan.waves.len(),
			cycles = plan.cycles.len(),
			"Wave plan computed"
		);
		Ok(plan)
	}

	pub async fn plan_batch_waves(&self, batch_id: BatchId) -> Result<WavePlan> {
		self.manager.get(batch_id).await?;
		let ids: Vec<RepositoryId> = self
			.members(batch_id)
			.await?
			.into_iter()
			.map(|r| r.id)
			.collect();
		self.plan_waves(&ids).await
	}
}
