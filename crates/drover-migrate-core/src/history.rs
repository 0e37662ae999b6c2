// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only migration history and diagnostic log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::repository::RepositoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(pub i64);

impl fmt::Display for HistoryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Pipeline phase a history row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
	DryRun,
	PreMigration,
	ArchiveGeneration,
	Migration,
	PostMigration,
	Rollback,
}

impl MigrationPhase {
	pub fn as_str(&self) -> &'static str {
		match self {
			MigrationPhase::DryRun => "dry_run",
			MigrationPhase::PreMigration => "pre_migration",
			MigrationPhase::ArchiveGeneration => "archive_generation",
			MigrationPhase::Migration => "migration",
			MigrationPhase::PostMigration => "post_migration",
			MigrationPhase::Rollback => "rollback",
		}
	}
}

impl fmt::Display for MigrationPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MigrationPhase {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"dry_run" => Ok(MigrationPhase::DryRun),
			"pre_migration" => Ok(MigrationPhase::PreMigration),
			"archive_generation" => Ok(MigrationPhase::ArchiveGeneration),
			"migration" => Ok(MigrationPhase::Migration),
			"post_migration" => Ok(MigrationPhase::PostMigration),
			"rollback" => Ok(MigrationPhase::Rollback),
			_ => Err(CoreError::UnknownPhase(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
	InProgress,
	Completed,
	Failed,
}

impl HistoryStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			HistoryStatus::InProgress => "in_progress",
			HistoryStatus::Completed => "completed",
			HistoryStatus::Failed => "failed",
		}
	}
}

impl FromStr for HistoryStatus {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"in_progress" => Ok(HistoryStatus::InProgress),
			"completed" => Ok(HistoryStatus::Completed),
			"failed" => Ok(HistoryStatus::Failed),
			_ => Err(CoreError::UnknownValue {
				kind: "history status",
				value: s.to_string(),
			}),
		}
	}
}

/// One phase attempt for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationHistory {
	pub id: HistoryId,
	pub repository_id: RepositoryId,
	pub status: HistoryStatus,
	pub phase: MigrationPhase,
	pub message: Option<String>,
	pub error_message: Option<String>,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_seconds: Option<i64>,
}

/// A history row about to be opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMigrationHistory {
	pub repository_id: RepositoryId,
	pub phase: MigrationPhase,
	pub status: HistoryStatus,
	pub message: Option<String>,
	pub started_at: DateTime<Utc>,
}

impl NewMigrationHistory {
	pub fn started(repository_id: RepositoryId, phase: MigrationPhase) -> Self {
		Self {
			repository_id,
			phase,
			status: HistoryStatus::InProgress,
			message: None,
			started_at: Utc::now(),
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}
}

/// How an open history row is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryOutcome {
	pub status: HistoryStatus,
	pub message: Option<String>,
	pub error_message: Option<String>,
}

impl HistoryOutcome {
	pub fn completed(message: impl Into<String>) -> Self {
		Self {
			status: HistoryStatus::Completed,
			message: Some(message.into()),
			error_message: None,
		}
	}

	pub fn failed(error: impl Into<String>) -> Self {
		Self {
			status: HistoryStatus::Failed,
			message: None,
			error_message: Some(error.into()),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

impl LogLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Debug => "debug",
			LogLevel::Info => "info",
			LogLevel::Warn => "warn",
			LogLevel::Error => "error",
		}
	}
}

impl FromStr for LogLevel {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"debug" => Ok(LogLevel::Debug),
			"info" => Ok(LogLevel::Info),
			"warn" => Ok(LogLevel::Warn),
			"error" => Ok(LogLevel::Error),
			_ => Err(CoreError::UnknownValue {
				kind: "log level",
				value: s.to_string(),
			}),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationLog {
	pub id: i64,
	pub repository_id: RepositoryId,
	pub history_id: Option<HistoryId>,
	pub level: LogLevel,
	pub phase: MigrationPhase,
	pub operation: String,
	pub message: String,
	pub details: Option<String>,
	pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMigrationLog {
	pub repository_id: RepositoryId,
	pub history_id: Option<HistoryId>,
	pub level: LogLevel,
	pub phase: MigrationPhase,
	pub operation: String,
	pub message: String,
	pub details: Option<String>,
}
