// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capability interfaces for the source and destination migration APIs.
//!
//! The orchestration core never talks HTTP itself. Hosts supply concrete
//! clients; retries, backoff and request timeouts belong to those clients.

use async_trait::async_trait;
use drover_migrate_core::{ExclusionFlags, GitProperties, Repository};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a source or destination client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
	/// Credentials rejected by the remote API.
	#[error("unauthorized")]
	Unauthorized,

	/// Rate limit exceeded.
	#[error("rate limit exceeded")]
	RateLimited,

	/// Request timed out.
	#[error("request timed out")]
	Timeout,

	/// The remote object does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	/// The remote API returned an error.
	#[error("API error: {status} - {message}")]
	Api { status: u16, message: String },

	/// The capability is not offered by this client.
	#[error("unsupported operation: {0}")]
	Unsupported(String),
}

impl ClientError {
	pub fn api(status: u16, message: impl Into<String>) -> Self {
		Self::Api {
			status,
			message: message.into(),
		}
	}

	pub fn is_retryable(&self) -> bool {
		match self {
			ClientError::RateLimited | ClientError::Timeout => true,
			ClientError::Api { status, .. } => *status >= 500,
			_ => false,
		}
	}
}

/// Archive locations produced by a source export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveUrls {
	pub git_archive_url: String,
	pub metadata_archive_url: Option<String>,
}

/// State of a source-side archive export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportState {
	Pending,
	Exporting,
	Exported(ArchiveUrls),
	Failed(String),
}

/// State of a destination-side import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteState {
	Queued,
	InProgress,
	Succeeded,
	Failed(String),
}

impl RemoteState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, RemoteState::Succeeded | RemoteState::Failed(_))
	}
}

/// Where the destination pulls repository content from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportSource {
	/// Archives previously exported from the source.
	Archives(ArchiveUrls),
	/// The destination reads from the source repository URL directly.
	Direct { source_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
	pub source: ImportSource,
	pub target_org: String,
	pub target_name: String,
	pub exclusions: ExclusionFlags,
	/// Trial import that is discarded afterwards.
	pub dry_run: bool,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
	/// Current git measurements for `repo`.
	async fn fetch_metadata(&self, repo: &Repository) -> Result<GitProperties, ClientError>;

	/// Start an archive export and return the source migration id.
	async fn start_export(
		&self,
		repo: &Repository,
		exclusions: &ExclusionFlags,
		lock_source: bool,
	) -> Result<i64, ClientError>;

	async fn export_state(
		&self,
		repo: &Repository,
		migration_id: i64,
	) -> Result<ExportState, ClientError>;

	/// Release a source lock taken by the export identified by `migration_id`.
	async fn unlock(&self, repo: &Repository, migration_id: i64) -> Result<(), ClientError>;
}

#[async_trait]
pub trait DestinationClient: Send + Sync {
	async fn repository_exists(&self, org: &str, name: &str) -> Result<bool, ClientError>;

	/// Start an import and return the destination migration id.
	async fn start_import(&self, request: &ImportRequest) -> Result<String, ClientError>;

	async fn import_state(&self, migration_id: &str) -> Result<RemoteState, ClientError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_retryable_classification() {
		assert!(ClientError::RateLimited.is_retryable());
		assert!(ClientError::Timeout.is_retryable());
		assert!(ClientError::api(502, "bad gateway").is_retryable());
		assert!(!ClientError::api(422, "unprocessable").is_retryable());
		assert!(!ClientError::Unauthorized.is_retryable());
		assert!(!ClientError::NotFound("acme/widgets".into()).is_retryable());
	}

	#[test]
	fn test_remote_state_terminal() {
		assert!(RemoteState::Succeeded.is_terminal());
		assert!(RemoteState::Failed("x".into()).is_terminal());
		assert!(!RemoteState::Queued.is_terminal());
		assert!(!RemoteState::InProgress.is_terminal());
	}
}
