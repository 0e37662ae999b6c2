// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the migration domain model.

use thiserror::Error;

use crate::status::MigrationStatus;

/// Result type for core domain operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the pure domain layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
	#[error("invalid status transition from {from} to {to}")]
	InvalidTransition {
		from: MigrationStatus,
		to: MigrationStatus,
	},

	#[error("unknown migration status: {0}")]
	UnknownStatus(String),

	#[error("unknown batch status: {0}")]
	UnknownBatchStatus(String),

	#[error("unknown migration phase: {0}")]
	UnknownPhase(String),

	#[error("unknown value for {kind}: {value}")]
	UnknownValue { kind: &'static str, value: String },
}
