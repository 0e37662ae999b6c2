// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_migrate_core::{
	HistoryId, HistoryOutcome, MigrationHistory, MigrationLog, NewMigrationHistory,
	NewMigrationLog, RepositoryId,
};
use sqlx::{
	sqlite::{SqlitePool, SqliteRow},
	Row, Sqlite,
};

use crate::convert::{opt_ts, parse_opt_ts, parse_ts};
use crate::error::Result;

#[async_trait]
pub trait HistoryStore: Send + Sync {
	async fn create_history(&self, entry: &NewMigrationHistory) -> Result<HistoryId>;
	async fn complete_history(&self, id: HistoryId, outcome: &HistoryOutcome) -> Result<bool>;
	async fn get_history(&self, id: HistoryId) -> Result<Option<MigrationHistory>>;
	async fn list_history(&self, repository_id: RepositoryId) -> Result<Vec<MigrationHistory>>;
	async fn append_log(&self, entry: &NewMigrationLog) -> Result<i64>;
	async fn list_logs(&self, history_id: HistoryId) -> Result<Vec<MigrationLog>>;
}

#[derive(Clone)]
pub struct SqliteHistoryStore {
	pool: SqlitePool,
}

impl SqliteHistoryStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, entry), fields(repo_id = %entry.repository_id, phase = %entry.phase))]
	pub async fn create_history(&self, entry: &NewMigrationHistory) -> Result<HistoryId> {
		insert_history(&self.pool, entry, None).await
	}

	/// Close an open history row. Rows that already have `completed_at` are
	/// never rewritten; returns false for them.
	#[tracing::instrument(skip(self, outcome), fields(history_id = %id, status = outcome.status.as_str()))]
	pub async fn complete_history(&self, id: HistoryId, outcome: &HistoryOutcome) -> Result<bool> {
		let started_at: Option<String> = sqlx::query_scalar(
			"SELECT started_at FROM migration_history WHERE id = ? AND completed_at IS NULL",
		)
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;

		let Some(started_at) = started_at else {
			return Ok(false);
		};

		let now = Utc::now();
		let duration = (now - parse_ts(&started_at)?).num_seconds().max(0);

		let result = sqlx::query(
			r#"
			UPDATE migration_history
			SET status = ?, message = COALESCE(?, message), error_message = ?,
				completed_at = ?, duration_seconds = ?
			WHERE id = ? AND completed_at IS NULL
			"#,
		)
		.bind(outcome.status.as_str())
		.bind(&outcome.message)
		.bind(&outcome.error_message)
		.bind(now.to_rfc3339())
		.bind(duration)
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self), fields(history_id = %id))]
	pub async fn get_history(&self, id: HistoryId) -> Result<Option<MigrationHistory>> {
		let row = sqlx::query(
			r#"
			SELECT id, repository_id, status, phase, message, error_message, started_at, completed_at, duration_seconds
			FROM migration_history
			WHERE id = ?
			"#,
		)
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_history(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repository_id))]
	pub async fn list_history(&self, repository_id: RepositoryId) -> Result<Vec<MigrationHistory>> {
		let rows = sqlx::query(
			r#"
			SELECT id, repository_id, status, phase, message, error_message, started_at, completed_at, duration_seconds
			FROM migration_history
			WHERE repository_id = ?
			ORDER BY id ASC
			"#,
		)
		.bind(repository_id.0)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_history).collect()
	}

	#[tracing::instrument(skip(self, entry), fields(repo_id = %entry.repository_id, operation = %entry.operation))]
	pub async fn append_log(&self, entry: &NewMigrationLog) -> Result<i64> {
		let result = sqlx::query(
			r#"
			INSERT INTO migration_logs (repository_id, history_id, level, phase, operation, message, details, timestamp)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(entry.repository_id.0)
		.bind(entry.history_id.map(|h| h.0))
		.bind(entry.level.as_str())
		.bind(entry.phase.as_str())
		.bind(&entry.operation)
		.bind(&entry.message)
		.bind(&entry.details)
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(result.last_insert_rowid())
	}

	#[tracing::instrument(skip(self), fields(history_id = %history_id))]
	pub async fn list_logs(&self, history_id: HistoryId) -> Result<Vec<MigrationLog>> {
		let rows = sqlx::query(
			r#"
			SELECT id, repository_id, history_id, level, phase, operation, message, details, timestamp
			FROM migration_logs
			WHERE history_id = ?
			ORDER BY id ASC
			"#,
		)
		.bind(history_id.0)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_log).collect()
	}
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
	async fn create_history(&self, entry: &NewMigrationHistory) -> Result<HistoryId> {
		SqliteHistoryStore::create_history(self, entry).await
	}

	async fn complete_history(&self, id: HistoryId, outcome: &HistoryOutcome) -> Result<bool> {
		SqliteHistoryStore::complete_history(self, id, outcome).await
	}

	async fn get_history(&self, id: HistoryId) -> Result<Option<MigrationHistory>> {
		SqliteHistoryStore::get_history(self, id).await
	}

	async fn list_history(&self, repository_id: RepositoryId) -> Result<Vec<MigrationHistory>> {
		SqliteHistoryStore::list_history(self, repository_id).await
	}

	async fn append_log(&self, entry: &NewMigrationLog) -> Result<i64> {
		SqliteHistoryStore::append_log(self, entry).await
	}

	async fn list_logs(&self, history_id: HistoryId) -> Result<Vec<MigrationLog>> {
		SqliteHistoryStore::list_logs(self, history_id).await
	}
}

/// Insert a history row, already closed when `completed_at` is given.
pub(crate) async fn insert_history<'e, E>(
	executor: E,
	entry: &NewMigrationHistory,
	completed_at: Option<DateTime<Utc>>,
) -> Result<HistoryId>
where
	E: sqlx::Executor<'e, Database = Sqlite>,
{
	let duration = completed_at.map(|done| (done - entry.started_at).num_seconds().max(0));

	let result = sqlx::query(
		r#"
		INSERT INTO migration_history (repository_id, status, phase, message, started_at, completed_at, duration_seconds)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(entry.repository_id.0)
	.bind(entry.status.as_str())
	.bind(entry.phase.as_str())
	.bind(&entry.message)
	.bind(entry.started_at.to_rfc3339())
	.bind(opt_ts(completed_at))
	.bind(duration)
	.execute(executor)
	.await?;

	Ok(HistoryId(result.last_insert_rowid()))
}

fn row_to_history(row: &SqliteRow) -> Result<MigrationHistory> {
	let status: String = row.get("status");
	let phase: String = row.get("phase");
	let started_at: String = row.get("started_at");

	Ok(MigrationHistory {
		id: HistoryId(row.get("id")),
		repository_id: RepositoryId(row.get("repository_id")),
		status: status.parse()?,
		phase: phase.parse()?,
		message: row.get("message"),
		error_message: row.get("error_message"),
		started_at: parse_ts(&started_at)?,
		completed_at: parse_opt_ts(row.get("completed_at"))?,
		duration_seconds: row.get("duration_seconds"),
	})
}

fn row_to_log(row: &SqliteRow) -> Result<MigrationLog> {
	let level: String = row.get("level");
	let phase: String = row.get("phase");
	let timestamp: String = row.get("timestamp");

	Ok(MigrationLog {
		id: row.get("id"),
		repository_id: RepositoryId(row.get("repository_id")),
		history_id: row.get::<Option<i64>, _>("history_id").map(HistoryId),
		level: level.parse()?,
		phase: phase.parse()?,
		operation: row.get("operation"),
		message: row.get("message"),
		details: row.get("details"),
		timestamp: parse_ts(&timestamp)?,
	})
}
