// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Domain model for the drover repository migration engine.
//!
//! This crate holds the pieces of the engine that need no I/O: the repository
//! status state machine, the repository, batch, history and dependency records,
//! the validation/complexity engine, and the dependency-aware wave planner.

pub mod batch;
pub mod dependency;
pub mod error;
pub mod history;
pub mod planner;
pub mod repository;
pub mod status;
pub mod validation;

pub use batch::{progress_percent, Batch, BatchId, BatchStats, BatchStatus, BatchUpdate, NewBatch};
pub use dependency::{DependencyType, RepositoryDependency};
pub use error::{CoreError, Result};
pub use history::{
	HistoryId, HistoryOutcome, HistoryStatus, LogLevel, MigrationHistory, MigrationLog,
	MigrationPhase, NewMigrationHistory, NewMigrationLog,
};
pub use planner::{plan_waves, PlanItem, UnplannedDependency, Wave, WavePlan};
pub use repository::{
	AzureDevOpsProperties, ExclusionFlags, GitHubProperties, GitProperties, LargeFile,
	PlatformProperties, Repository, RepositoryId, SourceKind, ValidationState,
};
pub use status::{MigrationStatus, StatusBucket};
pub use validation::{
	validate, ComplexityBreakdown, ComplexityRating, Finding, FindingCode, Severity,
	ValidationLimits, ValidationReport,
};
