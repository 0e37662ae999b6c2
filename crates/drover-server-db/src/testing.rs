// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test helpers shared by this crate and by downstream orchestration tests.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::migrations::run_migrations;

/// A single-connection in-memory pool with no schema.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect(":memory:")
		.await
		.unwrap()
}

/// An in-memory pool with every migration applied.
pub async fn create_migrated_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool).await.unwrap();
	pool
}
