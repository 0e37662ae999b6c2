// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Migration orchestration for drover.
//!
//! - [`executor`]: per-repository dry-run and migration pipelines
//! - [`batch`]: batch membership, start and completion
//! - [`operations`]: operator actions (queueing, retry, rollback, unlock, revalidation, planning)
//! - [`scheduler`]: the bounded-concurrency worker that drives queued repositories
//!
//! Remote APIs are consumed through the [`client`] traits.

pub mod batch;
pub mod client;
pub mod error;
pub mod executor;
pub mod operations;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use batch::{AddResult, BatchManager};
pub use client::{
	ArchiveUrls, ClientError, DestinationClient, ExportState, ImportRequest, ImportSource,
	RemoteState, SourceClient,
};
pub use error::{MigrateError, Result};
pub use executor::{ExecutionMode, ExecutionOutcome, Executor, ExecutorSettings, PipelineExecutor};
pub use operations::{MigrationOperations, RevalidationSummary};
pub use scheduler::{MigrationWorker, MigrationWorkerBuilder, WorkerSettings};
