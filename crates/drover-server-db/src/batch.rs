// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::Utc;
use drover_migrate_core::{Batch, BatchId, BatchStatus, NewBatch};
use sqlx::{
	sqlite::{SqlitePool, SqliteRow},
	QueryBuilder, Row, Sqlite,
};

use crate::convert::{opt_ts, parse_opt_ts, parse_ts};
use crate::error::{DbError, Result};

const BATCH_COLUMNS: &str = "id, name, description, status, repository_count, destination_org, \
	exclusions, created_at, scheduled_at, started_at, completed_at, dry_run_started_at, \
	dry_run_completed_at, dry_run_duration_seconds, last_migration_attempt_at";

#[async_trait]
pub trait BatchStore: Send + Sync {
	async fn create_batch(&self, batch: &NewBatch) -> Result<Batch>;
	async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>>;
	async fn list_batches(&self) -> Result<Vec<Batch>>;
	async fn update_batch(&self, batch: &Batch) -> Result<()>;
	async fn transition_batch(
		&self,
		id: BatchId,
		from: &[BatchStatus],
		to: BatchStatus,
	) -> Result<bool>;
	async fn delete_batch(&self, id: BatchId) -> Result<bool>;
	async fn refresh_repository_count(&self, id: BatchId) -> Result<i64>;
}

#[derive(Clone)]
pub struct SqliteBatchStore {
	pool: SqlitePool,
}

impl SqliteBatchStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, batch), fields(name = %batch.name))]
	pub async fn create_batch(&self, batch: &NewBatch) -> Result<Batch> {
		let now = Utc::now();
		let result = sqlx::query(
			r#"
			INSERT INTO batches (name, description, status, repository_count, destination_org, exclusions, created_at, scheduled_at)
			VALUES (?, ?, ?, 0, ?, ?, ?, ?)
			"#,
		)
		.bind(&batch.name)
		.bind(&batch.description)
		.bind(BatchStatus::Pending.as_str())
		.bind(&batch.destination_org)
		.bind(serde_json::to_string(&batch.exclusions)?)
		.bind(now.to_rfc3339())
		.bind(opt_ts(batch.scheduled_at))
		.execute(&self.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
				DbError::Conflict(format!("batch '{}' already exists", batch.name))
			}
			_ => DbError::Sqlx(e),
		})?;

		let id = BatchId(result.last_insert_rowid());
		tracing::info!(batch_id = %id, name = %batch.name, "batch created");

		self
			.get_batch(id)
			.await?
			.ok_or_else(|| DbError::Internal(format!("batch {id} vanished after insert")))
	}

	#[tracing::instrument(skip(self), fields(batch_id = %id))]
	pub async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>> {
		let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?"))
			.bind(id.0)
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| row_to_batch(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_batches(&self) -> Result<Vec<Batch>> {
		let rows = sqlx::query(&format!(
			"SELECT {BATCH_COLUMNS} FROM batches ORDER BY created_at ASC, id ASC"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_batch).collect()
	}

	/// Persist every mutable column except `repository_count`, which only
	/// [`Self::refresh_repository_count`] writes.
	#[tracing::instrument(skip(self, batch), fields(batch_id = %batch.id, status = %batch.status))]
	pub async fn update_batch(&self, batch: &Batch) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE batches
			SET name = ?, description = ?, status = ?, destination_org = ?, exclusions = ?,
				scheduled_at = ?, started_at = ?, completed_at = ?, dry_run_started_at = ?,
				dry_run_completed_at = ?, dry_run_duration_seconds = ?, last_migration_attempt_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&batch.name)
		.bind(&batch.description)
		.bind(batch.status.as_str())
		.bind(&batch.destination_org)
		.bind(serde_json::to_string(&batch.exclusions)?)
		.bind(opt_ts(batch.scheduled_at))
		.bind(opt_ts(batch.started_at))
		.bind(opt_ts(batch.completed_at))
		.bind(opt_ts(batch.dry_run_started_at))
		.bind(opt_ts(batch.dry_run_completed_at))
		.bind(batch.dry_run_duration_seconds)
		.bind(opt_ts(batch.last_migration_attempt_at))
		.bind(batch.id.0)
		.execute(&self.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
				DbError::Conflict(format!("batch '{}' already exists", batch.name))
			}
			_ => DbError::Sqlx(e),
		})?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("batch {}", batch.id)));
		}

		Ok(())
	}

	/// Compare-and-set on the batch status. Returns false when the batch is
	/// missing or not in one of `from`.
	#[tracing::instrument(skip(self, from), fields(batch_id = %id, to = %to))]
	pub async fn transition_batch(
		&self,
		id: BatchId,
		from: &[BatchStatus],
		to: BatchStatus,
	) -> Result<bool> {
		if from.is_empty() {
			return Ok(false);
		}

		let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE batches SET status = ");
		qb.push_bind(to.as_str());
		qb.push(" WHERE id = ").push_bind(id.0);
		qb.push(" AND status IN (");
		let mut separated = qb.separated(", ");
		for status in from {
			separated.push_bind(status.as_str());
		}
		separated.push_unseparated(")");

		let result = qb.build().execute(&self.pool).await?;
		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self), fields(batch_id = %id))]
	pub async fn delete_batch(&self, id: BatchId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM batches WHERE id = ?")
			.bind(id.0)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Recompute the denormalized member count from the repositories table.
	#[tracing::instrument(skip(self), fields(batch_id = %id))]
	pub async fn refresh_repository_count(&self, id: BatchId) -> Result<i64> {
		recount_batch(&self.pool, id).await?;

		let count: Option<i64> =
			sqlx::query_scalar("SELECT repository_count FROM batches WHERE id = ?")
				.bind(id.0)
				.fetch_optional(&self.pool)
				.await?;

		count.ok_or_else(|| DbError::NotFound(format!("batch {id}")))
	}
}

#[async_trait]
impl BatchStore for SqliteBatchStore {
	async fn create_batch(&self, batch: &NewBatch) -> Result<Batch> {
		SqliteBatchStore::create_batch(self, batch).await
	}

	async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>> {
		SqliteBatchStore::get_batch(self, id).await
	}

	async fn list_batches(&self) -> Result<Vec<Batch>> {
		SqliteBatchStore::list_batches(self).await
	}

	async fn update_batch(&self, batch: &Batch) -> Result<()> {
		SqliteBatchStore::update_batch(self, batch).await
	}

	async fn transition_batch(
		&self,
		id: BatchId,
		from: &[BatchStatus],
		to: BatchStatus,
	) -> Result<bool> {
		SqliteBatchStore::transition_batch(self, id, from, to).await
	}

	async fn delete_batch(&self, id: BatchId) -> Result<bool> {
		SqliteBatchStore::delete_batch(self, id).await
	}

	async fn refresh_repository_count(&self, id: BatchId) -> Result<i64> {
		SqliteBatchStore::refresh_repository_count(self, id).await
	}
}

pub(crate) async fn recount_batch<'e, E>(executor: E, id: BatchId) -> Result<()>
where
	E: sqlx::Executor<'e, Database = Sqlite>,
{
	sqlx::query(
		r#"
		UPDATE batches
		SET repository_count = (SELECT COUNT(*) FROM repositories WHERE batch_id = ?)
		WHERE id = ?
		"#,
	)
	.bind(id.0)
	.bind(id.0)
	.execute(executor)
	.await?;

	Ok(())
}

fn row_to_batch(row: &SqliteRow) -> Result<Batch> {
	let status: String = row.get("status");
	let exclusions: String = row.get("exclusions");
	let created_at: String = row.get("created_at");

	Ok(Batch {
		id: BatchId(row.get("id")),
		name: row.get("name"),
		description: row.get("description"),
		status: status.parse()?,
		repository_count: row.get("repository_count"),
		destination_org: row.get("destination_org"),
		exclusions: serde_json::from_str(&exclusions)?,
		created_at: parse_ts(&created_at)?,
		scheduled_at: parse_opt_ts(row.get("scheduled_at"))?,
		started_at: parse_opt_ts(row.get("started_at"))?,
		completed_at: parse_opt_ts(row.get("completed_at"))?,
		dry_run_started_at: parse_opt_ts(row.get("dry_run_started_at"))?,
		dry_run_completed_at: parse_opt_ts(row.get("dry_run_completed_at"))?,
		dry_run_duration_seconds: row.get("dry_run_duration_seconds"),
		last_migration_attempt_at: parse_opt_ts(row.get("last_migration_attempt_at"))?,
	})
}
