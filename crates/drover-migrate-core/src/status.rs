// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository migration status state machine.
//!
//! Every status a repository can hold, the legal edges between them, and the
//! status groups (batch eligibility, in-flight, failure, stats buckets) live
//! here. Consumers ask this module instead of matching on status strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
	Pending,
	DryRunQueued,
	DryRunInProgress,
	DryRunComplete,
	DryRunFailed,
	PreMigration,
	ArchiveGenerating,
	QueuedForMigration,
	MigratingContent,
	MigrationComplete,
	MigrationFailed,
	PostMigration,
	Complete,
	RolledBack,
	/// Source item that cannot be migrated as-is (e.g. a non-git repository).
	RemediationRequired,
}

/// Aggregate bucket used for batch progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
	Completed,
	InProgress,
	Pending,
	Failed,
}

impl MigrationStatus {
	pub const ALL: [MigrationStatus; 15] = [
		MigrationStatus::Pending,
		MigrationStatus::DryRunQueued,
		MigrationStatus::DryRunInProgress,
		MigrationStatus::DryRunComplete,
		MigrationStatus::DryRunFailed,
		MigrationStatus::PreMigration,
		MigrationStatus::ArchiveGenerating,
		MigrationStatus::QueuedForMigration,
		MigrationStatus::MigratingContent,
		MigrationStatus::MigrationComplete,
		MigrationStatus::MigrationFailed,
		MigrationStatus::PostMigration,
		MigrationStatus::Complete,
		MigrationStatus::RolledBack,
		MigrationStatus::RemediationRequired,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			MigrationStatus::Pending => "pending",
			MigrationStatus::DryRunQueued => "dry_run_queued",
			MigrationStatus::DryRunInProgress => "dry_run_in_progress",
			MigrationStatus::DryRunComplete => "dry_run_complete",
			MigrationStatus::DryRunFailed => "dry_run_failed",
			MigrationStatus::PreMigration => "pre_migration",
			MigrationStatus::ArchiveGenerating => "archive_generating",
			MigrationStatus::QueuedForMigration => "queued_for_migration",
			MigrationStatus::MigratingContent => "migrating_content",
			MigrationStatus::MigrationComplete => "migration_complete",
			MigrationStatus::MigrationFailed => "migration_failed",
			MigrationStatus::PostMigration => "post_migration",
			MigrationStatus::Complete => "complete",
			MigrationStatus::RolledBack => "rolled_back",
			MigrationStatus::RemediationRequired => "remediation_required",
		}
	}

	/// Statuses a repository may hold when it is added to a batch.
	pub fn is_batch_eligible(&self) -> bool {
		matches!(
			self,
			MigrationStatus::Pending
				| MigrationStatus::DryRunComplete
				| MigrationStatus::DryRunFailed
				| MigrationStatus::MigrationFailed
				| MigrationStatus::RolledBack
		)
	}

	/// Statuses from which a dry run may be queued.
	pub fn is_dry_run_eligible(&self) -> bool {
		matches!(
			self,
			MigrationStatus::Pending
				| MigrationStatus::DryRunComplete
				| MigrationStatus::DryRunFailed
				| MigrationStatus::MigrationFailed
				| MigrationStatus::RolledBack
		)
	}

	/// Statuses owned by a running executor. Nothing else may write these rows.
	pub fn is_in_flight(&self) -> bool {
		matches!(
			self,
			MigrationStatus::DryRunInProgress
				| MigrationStatus::PreMigration
				| MigrationStatus::ArchiveGenerating
				| MigrationStatus::MigratingContent
				| MigrationStatus::MigrationComplete
				| MigrationStatus::PostMigration
		)
	}

	/// Waiting for a worker slot.
	pub fn is_queued(&self) -> bool {
		matches!(
			self,
			MigrationStatus::DryRunQueued | MigrationStatus::QueuedForMigration
		)
	}

	/// Recoverable failure states. All of them remain batch-eligible.
	pub fn is_failure(&self) -> bool {
		matches!(
			self,
			MigrationStatus::DryRunFailed | MigrationStatus::MigrationFailed | MigrationStatus::RolledBack
		)
	}

	pub fn is_rollback_eligible(&self) -> bool {
		matches!(
			self,
			MigrationStatus::Complete | MigrationStatus::MigrationFailed
		)
	}

	pub fn bucket(&self) -> StatusBucket {
		match self {
			MigrationStatus::Complete => StatusBucket::Completed,
			MigrationStatus::DryRunFailed
			| MigrationStatus::MigrationFailed
			| MigrationStatus::RolledBack
			| MigrationStatus::RemediationRequired => StatusBucket::Failed,
			MigrationStatus::Pending | MigrationStatus::DryRunComplete => StatusBucket::Pending,
			MigrationStatus::DryRunQueued
			| MigrationStatus::DryRunInProgress
			| MigrationStatus::PreMigration
			| MigrationStatus::ArchiveGenerating
			| MigrationStatus::QueuedForMigration
			| MigrationStatus::MigratingContent
			| MigrationStatus::MigrationComplete
			| MigrationStatus::PostMigration => StatusBucket::InProgress,
		}
	}

	/// Legal successor states.
	pub fn successors(&self) -> &'static [MigrationStatus] {
		use MigrationStatus::*;
		match self {
			Pending => &[DryRunQueued, DryRunInProgress, QueuedForMigration, RemediationRequired],
			DryRunQueued => &[DryRunInProgress, Pending, RemediationRequired],
			DryRunInProgress => &[DryRunComplete, DryRunFailed],
			DryRunComplete => &[DryRunQueued, PreMigration, QueuedForMigration],
			DryRunFailed => &[DryRunQueued, QueuedForMigration],
			PreMigration => &[ArchiveGenerating, QueuedForMigration, MigratingContent, MigrationFailed],
			ArchiveGenerating => &[QueuedForMigration, MigratingContent, MigrationFailed],
			QueuedForMigration => &[
				PreMigration,
				MigratingContent,
				MigrationFailed,
				RemediationRequired,
			],
			MigratingContent => &[MigrationComplete, MigrationFailed],
			MigrationComplete => &[PostMigration, MigrationFailed],
			PostMigration => &[Complete, MigrationFailed],
			MigrationFailed => &[DryRunQueued, QueuedForMigration, RolledBack],
			Complete => &[RolledBack],
			RolledBack => &[Pending, DryRunQueued, QueuedForMigration],
			RemediationRequired => &[Pending],
		}
	}

	pub fn can_transition_to(&self, next: MigrationStatus) -> bool {
		self.successors().contains(&next)
	}

	/// Validate an edge, returning the new status on success.
	pub fn transition(self, next: MigrationStatus) -> Result<MigrationStatus> {
		if self.can_transition_to(next) {
			Ok(next)
		} else {
			Err(CoreError::InvalidTransition {
				from: self,
				to: next,
			})
		}
	}
}

impl fmt::Display for MigrationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MigrationStatus {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self> {
		MigrationStatus::ALL
			.iter()
			.copied()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
	}
}
