// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for migration orchestration.

use drover_migrate_core::CoreError;
use drover_server_db::DbError;
use thiserror::Error;

use crate::client::ClientError;

pub type Result<T> = std::result::Result<T, MigrateError>;

#[derive(Debug, Error)]
pub enum MigrateError {
	#[error("storage error: {0}")]
	Db(#[from] DbError),

	#[error(transparent)]
	Core(#[from] CoreError),

	#[error("remote API error: {0}")]
	Client(#[from] ClientError),

	#[error("remote migration failed: {0}")]
	RemoteFailed(String),

	#[error("pre-flight check failed: {0}")]
	Preflight(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("invalid state: {0}")]
	InvalidState(String),

	#[error("validation failed: {0}")]
	Validation(String),

	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("migration worker is already running")]
	AlreadyRunning,
}

impl MigrateError {
	/// Failures that end one execution attempt and are recorded on the
	/// repository, as opposed to errors that abort the caller.
	pub fn is_execution_failure(&self) -> bool {
		matches!(
			self,
			MigrateError::Client(_) | MigrateError::RemoteFailed(_) | MigrateError::Preflight(_)
		)
	}
}
