// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::Result;

const MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_create_migration_tables",
		include_str!("../migrations/001_create_migration_tables.sql"),
	),
	(
		"002_create_repository_dependencies",
		include_str!("../migrations/002_create_repository_dependencies.sql"),
	),
];

/// Run all database migrations.
///
/// # Errors
/// Returns `DbError::Sqlx` if a statement fails for a reason other than the
/// object already existing.
///
/// # Note
/// Migrations are idempotent - safe to run multiple times.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for (name, sql) in MIGRATIONS {
		for stmt in sql.split(';').filter(|s| !s.trim().is_empty()) {
			if let Err(e) = sqlx::query(stmt).execute(pool).await {
				let msg = e.to_string();
				if !msg.contains("already exists") && !msg.contains("duplicate column") {
					tracing::error!(migration = %name, error = %e, "migration failed");
					return Err(e.into());
				}
			}
		}
		tracing::debug!(migration = %name, "migration applied");
	}
	Ok(())
}
