// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for the drover migration engine.
//!
//! Each concern exposes a `*Store` trait consumed by the orchestration layer
//! and a `Sqlite*Store` implementation over a shared [`sqlx::SqlitePool`].
//! Platform property bundles and validation findings are stored as JSON text.

pub mod batch;
mod convert;
pub mod error;
pub mod history;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use batch::{BatchStore, SqliteBatchStore};
pub use error::{DbError, Result};
pub use history::{HistoryStore, SqliteHistoryStore};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use repository::{
	BatchFilter, RepositoryFilter, RepositoryStore, RollbackRecord, SqliteRepositoryStore,
};
