// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch lifecycle: membership, deletion, start and completion.

use std::sync::Arc;

use chrono::Utc;
use drover_migrate_core::{Batch, BatchId, BatchStats, BatchStatus, MigrationStatus, RepositoryId};
use drover_server_db::{BatchStore, RepositoryFilter, RepositoryStore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{MigrateError, Result};

/// Per-repository result of [`BatchManager::add_repositories`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddResult {
	pub repository_id: RepositoryId,
	pub added: bool,
	pub reason: Option<String>,
}

impl AddResult {
	fn added(repository_id: RepositoryId) -> Self {
		Self {
			repository_id,
			added: true,
			reason: None,
		}
	}

	fn rejected(repository_id: RepositoryId, reason: impl Into<String>) -> Self {
		Self {
			repository_id,
			added: false,
			reason: Some(reason.into()),
		}
	}
}

#[derive(Clone)]
pub struct BatchManager {
	batches: Arc<dyn BatchStore>,
	repositories: Arc<dyn RepositoryStore>,
}

impl BatchManager {
	pub fn new(batches: Arc<dyn BatchStore>, repositories: Arc<dyn RepositoryStore>) -> Self {
		Self {
			batches,
			repositories,
		}
	}

	pub async fn get(&self, batch_id: BatchId) -> Result<Batch> {
		self
			.batches
			.get_batch(batch_id)
			.await?
			.ok_or_else(|| MigrateError::NotFound(format!("batch {batch_id}")))
	}

	/// Load a batch that still accepts membership changes.
	async fn get_open(&self, batch_id: BatchId) -> Result<Batch> {
		let batch = self.get(batch_id).await?;
		if !batch.status.accepts_membership_changes() {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is {} and no longer accepts membership changes",
				batch.status
			)));
		}
		Ok(batch)
	}

	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn compute_stats(&self, batch_id: BatchId) -> Result<BatchStats> {
		self.get(batch_id).await?;
		let members = self
			.repositories
			.list_repositories(&RepositoryFilter::in_batch(batch_id))
			.await?;
		Ok(BatchStats::from_statuses(
			batch_id,
			members.into_iter().map(|r| r.status),
		))
	}

	/// Add repositories to an open batch. Only a missing or closed batch fails
	/// the whole call; every repository gets its own verdict.
	#[instrument(skip(self, repo_ids), fields(batch_id = %batch_id, requested = repo_ids.len()))]
	pub async fn add_repositories(
		&self,
		batch_id: BatchId,
		repo_ids: &[RepositoryId],
	) -> Result<Vec<AddResult>> {
		self.get_open(batch_id).await?;

		let mut results = Vec::with_capacity(repo_ids.len());
		for &repo_id in repo_ids {
			let Some(repo) = self.repositories.get_repository_by_id(repo_id).await? else {
				results.push(AddResult::rejected(repo_id, "repository not found"));
				continue;
			};

			match repo.batch_id {
				Some(existing) if existing == batch_id => {
					results.push(AddResult::rejected(repo_id, "repository is already in this batch"));
					continue;
				}
				Some(existing) => {
					results.push(AddResult::rejected(
						repo_id,
						format!("repository is already assigned to batch {existing}"),
					));
					continue;
				}
				None => {}
			}

			if let Some(reason) = repo.batch_ineligibility() {
				results.push(AddResult::rejected(repo_id, reason));
				continue;
			}

			if self.repositories.assign_to_batch(repo_id, batch_id).await? {
				results.push(AddResult::added(repo_id));
			} else {
				results.push(AddResult::rejected(
					repo_id,
					"repository was assigned to another batch concurrently",
				));
			}
		}

		let count = self.batches.refresh_repository_count(batch_id).await?;
		let added = results.iter().filter(|r| r.added).count();
		info!(added, repository_count = count, "Repositories added to batch");
		Ok(results)
	}

	/// Remove members from an open batch. Non-members are skipped.
	#[instrument(skip(self, repo_ids), fields(batch_id = %batch_id, requested = repo_ids.len()))]
	pub async fn remove_repositories(
		&self,
		batch_id: BatchId,
		repo_ids: &[RepositoryId],
	) -> Result<usize> {
		self.get_open(batch_id).await?;

		let mut removed = 0;
		for &repo_id in repo_ids {
			if self.repositories.detach_from_batch(repo_id, batch_id).await? {
				removed += 1;
			}
		}

		let count = self.batches.refresh_repository_count(batch_id).await?;
		info!(removed, repository_count = count, "Repositories removed from batch");
		Ok(removed)
	}

	pub async fn can_delete(&self, batch_id: BatchId) -> Result<bool> {
		Ok(self.get(batch_id).await?.status.can_delete())
	}

	/// Detach every member, then delete the batch row.
	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn delete(&self, batch_id: BatchId) -> Result<()> {
		let batch = self.get(batch_id).await?;
		if !batch.status.can_delete() {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is {} and cannot be deleted",
				batch.status
			)));
		}

		let members = self
			.repositories
			.list_repositories(&RepositoryFilter::in_batch(batch_id))
			.await?;
		for member in &members {
			if let Err(e) = self.repositories.detach_from_batch(member.id, batch_id).await {
				warn!(repo_id = %member.id, error = %e, "Failed to detach repository from batch");
			}
		}

		if !self.batches.delete_batch(batch_id).await? {
			return Err(MigrateError::NotFound(format!("batch {batch_id}")));
		}
		info!(detached = members.len(), "Batch deleted");
		Ok(())
	}

	/// Move a pending or ready batch to `in_progress`. Members are untouched.
	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn start(&self, batch_id: BatchId) -> Result<Batch> {
		let batch = self.get(batch_id).await?;
		if !batch.status.can_start() {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} is {} and cannot be started",
				batch.status
			)));
		}

		let moved = self
			.batches
			.transition_batch(
				batch_id,
				&[BatchStatus::Pending, BatchStatus::Ready],
				BatchStatus::InProgress,
			)
			.await?;
		if !moved {
			return Err(MigrateError::InvalidState(format!(
				"batch {batch_id} changed status while starting"
			)));
		}

		let mut batch = self.get(batch_id).await?;
		let now = Utc::now();
		batch.started_at = Some(now);
		batch.last_migration_attempt_at = Some(now);
		batch.completed_at = None;
		self.batches.update_batch(&batch).await?;

		info!(repository_count = batch.repository_count, "Batch started");
		Ok(batch)
	}

	/// Settle the batch once its members stop moving. Returns the new batch
	/// status when this call completed the batch.
	#[instrument(skip(self), fields(batch_id = %batch_id))]
	pub async fn refresh_completion(&self, batch_id: BatchId) -> Result<Option<BatchStatus>> {
		let Some(mut batch) = self.batches.get_batch(batch_id).await? else {
			return Ok(None);
		};
		let members = self
			.repositories
			.list_repositories(&RepositoryFilter::in_batch(batch_id))
			.await?;
		let statuses: Vec<MigrationStatus> = members.iter().map(|r| r.status).collect();

		if batch.dry_run_started_at.is_some()
			&& batch.dry_run_completed_at.is_none()
			&& !statuses.iter().any(|s| {
				matches!(
					s,
					MigrationStatus::DryRunQueued | MigrationStatus::DryRunInProgress
				)
			}) {
			let now = Utc::now();
			batch.dry_run_completed_at = Some(now);
			batch.dry_run_duration_seconds = batch
				.dry_run_started_at
				.map(|started| (now - started).num_seconds());
			self.batches.update_batch(&batch).await?;
			info!(
				duration_seconds = ?batch.dry_run_duration_seconds,
				"Batch dry run finished"
			);
		}

		if batch.status != BatchStatus::InProgress {
			return Ok(None);
		}

		let stats = BatchStats::from_statuses(batch_id, statuses);
		if !stats.is_settled() {
			return Ok(None);
		}

		let status = stats.final_status();
		if !self
			.batches
			.transition_batch(batch_id, &[BatchStatus::InProgress], status)
			.await?
		{
			return Ok(None);
		}

		if let Some(mut batch) = self.batches.get_batch(batch_id).await? {
			batch.completed_at = Some(Utc::now());
			self.batches.update_batch(&batch).await?;
		}

		info!(
			status = %status,
			completed = stats.completed_count,
			failed = stats.failed_count,
			"Batch finished"
		);
		Ok(Some(status))
	}
}
