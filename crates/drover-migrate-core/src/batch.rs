// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch record, batch status rules, and progress aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::repository::ExclusionFlags;
use crate::status::{MigrationStatus, StatusBucket};

/// Database identifier of a batch row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub i64);

impl fmt::Display for BatchId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i64> for BatchId {
	fn from(id: i64) -> Self {
		Self(id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
	Pending,
	Ready,
	InProgress,
	Completed,
	CompletedWithErrors,
	Failed,
}

impl BatchStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			BatchStatus::Pending => "pending",
			BatchStatus::Ready => "ready",
			BatchStatus::InProgress => "in_progress",
			BatchStatus::Completed => "completed",
			BatchStatus::CompletedWithErrors => "completed_with_errors",
			BatchStatus::Failed => "failed",
		}
	}

	/// Membership can change only before the batch starts.
	pub fn accepts_membership_changes(&self) -> bool {
		matches!(self, BatchStatus::Pending | BatchStatus::Ready)
	}

	pub fn can_start(&self) -> bool {
		matches!(self, BatchStatus::Pending | BatchStatus::Ready)
	}

	pub fn can_delete(&self) -> bool {
		matches!(self, BatchStatus::Pending)
	}

	/// Finished batches whose failed members can be retried.
	pub fn can_retry(&self) -> bool {
		matches!(
			self,
			BatchStatus::InProgress | BatchStatus::CompletedWithErrors | BatchStatus::Failed
		)
	}
}

impl fmt::Display for BatchStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BatchStatus {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(BatchStatus::Pending),
			"ready" => Ok(BatchStatus::Ready),
			"in_progress" => Ok(BatchStatus::InProgress),
			"completed" => Ok(BatchStatus::Completed),
			"completed_with_errors" => Ok(BatchStatus::CompletedWithErrors),
			"failed" => Ok(BatchStatus::Failed),
			_ => Err(CoreError::UnknownBatchStatus(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
	pub id: BatchId,
	pub name: String,
	pub description: Option<String>,
	pub status: BatchStatus,
	/// Denormalized member count, kept equal to the number of member rows.
	pub repository_count: i64,
	pub destination_org: Option<String>,
	pub exclusions: ExclusionFlags,
	pub created_at: DateTime<Utc>,
	pub scheduled_at: Option<DateTime<Utc>>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub dry_run_started_at: Option<DateTime<Utc>>,
	pub dry_run_completed_at: Option<DateTime<Utc>>,
	pub dry_run_duration_seconds: Option<i64>,
	pub last_migration_attempt_at: Option<DateTime<Utc>>,
}

/// Operator input for a new batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBatch {
	pub name: String,
	pub description: Option<String>,
	pub destination_org: Option<String>,
	#[serde(default)]
	pub exclusions: ExclusionFlags,
	pub scheduled_at: Option<DateTime<Utc>>,
}

/// Partial update of the operator-editable batch fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
	pub name: Option<String>,
	pub description: Option<String>,
	pub destination_org: Option<String>,
	pub exclusions: Option<ExclusionFlags>,
	pub scheduled_at: Option<DateTime<Utc>>,
}

impl Batch {
	pub fn apply_update(&mut self, update: BatchUpdate) {
		if let Some(name) = update.name {
			self.name = name;
		}
		if update.description.is_some() {
			self.description = update.description;
		}
		if update.destination_org.is_some() {
			self.destination_org = update.destination_org;
		}
		if let Some(exclusions) = update.exclusions {
			self.exclusions = exclusions;
		}
		if update.scheduled_at.is_some() {
			self.scheduled_at = update.scheduled_at;
		}
	}
}

/// Aggregate progress of a batch's member repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
	pub batch_id: BatchId,
	pub total: i64,
	pub completed_count: i64,
	pub in_progress_count: i64,
	pub pending_count: i64,
	pub failed_count: i64,
	pub progress_percent: f64,
}

impl BatchStats {
	pub fn from_statuses<I>(batch_id: BatchId, statuses: I) -> Self
	where
		I: IntoIterator<Item = MigrationStatus>,
	{
		let mut stats = BatchStats {
			batch_id,
			total: 0,
			completed_count: 0,
			in_progress_count: 0,
			pending_count: 0,
			failed_count: 0,
			progress_percent: 0.0,
		};

		for status in statuses {
			stats.total += 1;
			match status.bucket() {
				StatusBucket::Completed => stats.completed_count += 1,
				StatusBucket::InProgress => stats.in_progress_count += 1,
				StatusBucket::Pending => stats.pending_count += 1,
				StatusBucket::Failed => stats.failed_count += 1,
			}
		}

		stats.progress_percent = progress_percent(stats.completed_count, stats.total);
		stats
	}

	/// Every member has reached a terminal state.
	pub fn is_settled(&self) -> bool {
		self.in_progress_count == 0 && self.pending_count == 0
	}

	/// Final batch status once every member is settled.
	pub fn final_status(&self) -> BatchStatus {
		if self.completed_count == self.total {
			BatchStatus::Completed
		} else if self.completed_count == 0 {
			BatchStatus::Failed
		} else {
			BatchStatus::CompletedWithErrors
		}
	}
}

/// Percentage rounded to two decimals; zero for an empty batch.
pub fn progress_percent(completed: i64, total: i64) -> f64 {
	if total <= 0 {
		return 0.0;
	}
	let raw = completed as f64 / total as f64 * 100.0;
	(raw * 100.0).round() / 100.0
}
