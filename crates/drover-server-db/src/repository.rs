// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_migrate_core::{
	BatchId, DependencyType, ExclusionFlags, GitProperties, HistoryId, HistoryStatus,
	MigrationPhase, MigrationStatus, NewMigrationHistory, Repository, RepositoryDependency,
	RepositoryId, SourceKind, ValidationState,
};
use sqlx::{
	sqlite::{SqlitePool, SqliteRow},
	QueryBuilder, Row, Sqlite,
};

use crate::batch::recount_batch;
use crate::convert::{opt_ts, parse_opt_ts, parse_ts};
use crate::error::{DbError, Result};
use crate::history::insert_history;

const REPOSITORY_COLUMNS: &str = "id, full_name, source_id, source_url, destination_full_name, \
	status, batch_id, exclusions, is_source_locked, source_migration_id, git_properties, \
	platform_properties, validation, discovered_at, last_discovery_at, last_dry_run_at, \
	migrated_at, updated_at";

/// Batch membership constraint for [`RepositoryFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchFilter {
	#[default]
	Any,
	Unbatched,
	Batch(BatchId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryFilter {
	/// Empty means any status.
	pub statuses: Vec<MigrationStatus>,
	pub batch: BatchFilter,
	pub source_kind: Option<SourceKind>,
	pub limit: Option<i64>,
	pub offset: Option<i64>,
}

impl RepositoryFilter {
	pub fn with_statuses(statuses: impl IntoIterator<Item = MigrationStatus>) -> Self {
		Self {
			statuses: statuses.into_iter().collect(),
			..Default::default()
		}
	}

	pub fn in_batch(batch_id: BatchId) -> Self {
		Self {
			batch: BatchFilter::Batch(batch_id),
			..Default::default()
		}
	}

	pub fn limit(mut self, limit: i64) -> Self {
		self.limit = Some(limit);
		self
	}
}

/// What a rollback changed, for the caller's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRecord {
	pub repository_id: RepositoryId,
	pub previous_status: MigrationStatus,
	pub previous_batch_id: Option<BatchId>,
	pub history_id: HistoryId,
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
	async fn get_repository_by_id(&self, id: RepositoryId) -> Result<Option<Repository>>;
	async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<Repository>>;
	async fn list_repositories(&self, filter: &RepositoryFilter) -> Result<Vec<Repository>>;
	async fn save_repository(&self, repo: &Repository) -> Result<RepositoryId>;
	async fn record_validation(
		&self,
		id: RepositoryId,
		git: Option<&GitProperties>,
		validation: &ValidationState,
	) -> Result<()>;
	async fn record_source_lock(&self, id: RepositoryId, migration_id: i64, locked: bool)
		-> Result<()>;
	async fn clear_source_lock(&self, id: RepositoryId) -> Result<()>;
	async fn record_dry_run(&self, id: RepositoryId, at: DateTime<Utc>) -> Result<()>;
	async fn record_migrated(
		&self,
		id: RepositoryId,
		destination_full_name: &str,
		at: DateTime<Utc>,
	) -> Result<()>;
	async fn apply_batch_defaults(
		&self,
		id: RepositoryId,
		exclusions: &ExclusionFlags,
		destination_full_name: Option<&str>,
	) -> Result<()>;
	async fn assign_to_batch(&self, id: RepositoryId, batch_id: BatchId) -> Result<bool>;
	async fn detach_from_batch(&self, id: RepositoryId, batch_id: BatchId) -> Result<bool>;
	async fn update_status_where(
		&self,
		id: RepositoryId,
		from: MigrationStatus,
		to: MigrationStatus,
	) -> Result<bool>;
	async fn add_dependency(&self, dependency: &RepositoryDependency) -> Result<()>;
	async fn list_dependencies(&self, ids: &[RepositoryId]) -> Result<Vec<RepositoryDependency>>;
	async fn rollback_repository(&self, id: RepositoryId, reason: &str) -> Result<RollbackRecord>;
}

#[derive(Clone)]
pub struct SqliteRepositoryStore {
	pool: SqlitePool,
}

impl SqliteRepositoryStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self), fields(repo_id = %id))]
	pub async fn get_repository_by_id(&self, id: RepositoryId) -> Result<Option<Repository>> {
		let row = sqlx::query(&format!(
			"SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?"
		))
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_repository(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<Repository>> {
		let row = sqlx::query(&format!(
			"SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE full_name = ? COLLATE NOCASE"
		))
		.bind(full_name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_repository(&r)).transpose()
	}

	#[tracing::instrument(skip(self, filter), fields(statuses = filter.statuses.len()))]
	pub async fn list_repositories(&self, filter: &RepositoryFilter) -> Result<Vec<Repository>> {
		let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
			"SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE 1 = 1"
		));

		if !filter.statuses.is_empty() {
			qb.push(" AND status IN (");
			let mut separated = qb.separated(", ");
			for status in &filter.statuses {
				separated.push_bind(status.as_str());
			}
			separated.push_unseparated(")");
		}

		match filter.batch {
			BatchFilter::Any => {}
			BatchFilter::Unbatched => {
				qb.push(" AND batch_id IS NULL");
			}
			BatchFilter::Batch(batch_id) => {
				qb.push(" AND batch_id = ").push_bind(batch_id.0);
			}
		}

		if let Some(kind) = filter.source_kind {
			qb.push(" AND source_kind = ").push_bind(kind.as_str());
		}

		qb.push(" ORDER BY id ASC");
		match (filter.limit, filter.offset) {
			(Some(limit), offset) => {
				qb.push(" LIMIT ").push_bind(limit);
				qb.push(" OFFSET ").push_bind(offset.unwrap_or(0));
			}
			(None, Some(offset)) => {
				qb.push(" LIMIT -1 OFFSET ").push_bind(offset);
			}
			(None, None) => {}
		}

		let rows = qb.build().fetch_all(&self.pool).await?;
		rows.iter().map(row_to_repository).collect()
	}

	#[tracing::instrument(skip(self, repo), fields(full_name = %repo.full_name))]
	pub async fn save_repository(&self, repo: &Repository) -> Result<RepositoryId> {
		let result = sqlx::query(
			r#"
			INSERT INTO repositories (
				full_name, source_kind, source_id, source_url, destination_full_name, status,
				batch_id, exclusions, is_source_locked, source_migration_id, git_properties,
				platform_properties, validation, has_oversized_repository, complexity_score,
				discovered_at, last_discovery_at, last_dry_run_at, migrated_at, updated_at
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&repo.full_name)
		.bind(repo.source_kind().as_str())
		.bind(&repo.source_id)
		.bind(&repo.source_url)
		.bind(&repo.destination_full_name)
		.bind(repo.status.as_str())
		.bind(repo.batch_id.map(|b| b.0))
		.bind(serde_json::to_string(&repo.exclusions)?)
		.bind(repo.is_source_locked)
		.bind(repo.source_migration_id)
		.bind(serde_json::to_string(&repo.git)?)
		.bind(serde_json::to_string(&repo.platform)?)
		.bind(serde_json::to_string(&repo.validation)?)
		.bind(repo.validation.has_oversized_repository)
		.bind(repo.validation.complexity_score)
		.bind(repo.discovered_at.to_rfc3339())
		.bind(opt_ts(repo.last_discovery_at))
		.bind(opt_ts(repo.last_dry_run_at))
		.bind(opt_ts(repo.migrated_at))
		.bind(Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
				DbError::Conflict(format!("repository {} already exists", repo.full_name))
			}
			_ => DbError::Sqlx(e),
		})?;

		let id = RepositoryId(result.last_insert_rowid());
		tracing::debug!(repo_id = %id, "repository saved");
		Ok(id)
	}

	/// Persist validation results, and refreshed git metadata when given.
	/// Status and batch membership are untouched.
	#[tracing::instrument(skip(self, git, validation), fields(repo_id = %id))]
	pub async fn record_validation(
		&self,
		id: RepositoryId,
		git: Option<&GitProperties>,
		validation: &ValidationState,
	) -> Result<()> {
		let git = git.map(serde_json::to_string).transpose()?;
		let result = sqlx::query(
			r#"
			UPDATE repositories
			SET git_properties = COALESCE(?, git_properties), validation = ?,
				has_oversized_repository = ?, complexity_score = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(git)
		.bind(serde_json::to_string(validation)?)
		.bind(validation.has_oversized_repository)
		.bind(validation.complexity_score)
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		expect_row(result.rows_affected(), id)
	}

	/// Store the source-side migration id and whether the source is locked.
	#[tracing::instrument(skip(self), fields(repo_id = %id))]
	pub async fn record_source_lock(
		&self,
		id: RepositoryId,
		migration_id: i64,
		locked: bool,
	) -> Result<()> {
		let result = sqlx::query(
			"UPDATE repositories SET source_migration_id = ?, is_source_locked = ?, updated_at = ? WHERE id = ?",
		)
		.bind(migration_id)
		.bind(locked)
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		expect_row(result.rows_affected(), id)
	}

	#[tracing::instrument(skip(self), fields(repo_id = %id))]
	pub async fn clear_source_lock(&self, id: RepositoryId) -> Result<()> {
		let result = sqlx::query(
			"UPDATE repositories SET source_migration_id = NULL, is_source_locked = 0, updated_at = ? WHERE id = ?",
		)
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		expect_row(result.rows_affected(), id)
	}

	#[tracing::instrument(skip(self), fields(repo_id = %id))]
	pub async fn record_dry_run(&self, id: RepositoryId, at: DateTime<Utc>) -> Result<()> {
		let result =
			sqlx::query("UPDATE repositories SET last_dry_run_at = ?, updated_at = ? WHERE id = ?")
				.bind(at.to_rfc3339())
				.bind(Utc::now().to_rfc3339())
				.bind(id.0)
				.execute(&self.pool)
				.await?;

		expect_row(result.rows_affected(), id)
	}

	#[tracing::instrument(skip(self), fields(repo_id = %id))]
	pub async fn record_migrated(
		&self,
		id: RepositoryId,
		destination_full_name: &str,
		at: DateTime<Utc>,
	) -> Result<()> {
		let result = sqlx::query(
			"UPDATE repositories SET destination_full_name = ?, migrated_at = ?, updated_at = ? WHERE id = ?",
		)
		.bind(destination_full_name)
		.bind(at.to_rfc3339())
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		expect_row(result.rows_affected(), id)
	}

	/// Replace the exclusion flags and fill the destination name when none is
	/// set yet.
	#[tracing::instrument(skip(self, exclusions), fields(repo_id = %id))]
	pub async fn apply_batch_defaults(
		&self,
		id: RepositoryId,
		exclusions: &ExclusionFlags,
		destination_full_name: Option<&str>,
	) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE repositories
			SET exclusions = ?, destination_full_name = COALESCE(destination_full_name, ?),
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(serde_json::to_string(exclusions)?)
		.bind(destination_full_name)
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		expect_row(result.rows_affected(), id)
	}

	/// Claim an unbatched repository for `batch_id`. Returns false when the
	/// repository already belongs to a batch or does not exist.
	#[tracing::instrument(skip(self), fields(repo_id = %id, batch_id = %batch_id))]
	pub async fn assign_to_batch(&self, id: RepositoryId, batch_id: BatchId) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE repositories SET batch_id = ?, updated_at = ? WHERE id = ? AND batch_id IS NULL",
		)
		.bind(batch_id.0)
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self), fields(repo_id = %id, batch_id = %batch_id))]
	pub async fn detach_from_batch(&self, id: RepositoryId, batch_id: BatchId) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE repositories SET batch_id = NULL, updated_at = ? WHERE id = ? AND batch_id = ?",
		)
		.bind(Utc::now().to_rfc3339())
		.bind(id.0)
		.bind(batch_id.0)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	/// Compare-and-set on the status column.
	#[tracing::instrument(skip(self), fields(repo_id = %id, from = %from, to = %to))]
	pub async fn update_status_where(
		&self,
		id: RepositoryId,
		from: MigrationStatus,
		to: MigrationStatus,
	) -> Result<bool> {
		let result =
			sqlx::query("UPDATE repositories SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
				.bind(to.as_str())
				.bind(Utc::now().to_rfc3339())
				.bind(id.0)
				.bind(from.as_str())
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self, dependency), fields(repo_id = %dependency.repository_id, dependency = %dependency.dependency_full_name))]
	pub async fn add_dependency(&self, dependency: &RepositoryDependency) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO repository_dependencies (
				repository_id, dependency_full_name, dependency_type, is_local, dependency_url, detected_at
			)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(repository_id, dependency_full_name, dependency_type) DO UPDATE SET
				is_local = excluded.is_local,
				dependency_url = excluded.dependency_url,
				detected_at = excluded.detected_at
			"#,
		)
		.bind(dependency.repository_id.0)
		.bind(&dependency.dependency_full_name)
		.bind(dependency.dependency_type.as_str())
		.bind(dependency.is_local)
		.bind(&dependency.dependency_url)
		.bind(dependency.detected_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn list_dependencies(&self, ids: &[RepositoryId]) -> Result<Vec<RepositoryDependency>> {
		if ids.is_empty() {
			return Ok(vec![]);
		}

		let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
			"SELECT repository_id, dependency_full_name, dependency_type, is_local, dependency_url, detected_at \
			 FROM repository_dependencies WHERE repository_id IN (",
		);
		let mut separated = qb.separated(", ");
		for id in ids {
			separated.push_bind(id.0);
		}
		separated.push_unseparated(") ORDER BY repository_id, id");

		let rows = qb.build().fetch_all(&self.pool).await?;
		rows.iter().map(row_to_dependency).collect()
	}

	/// Roll a repository back in one transaction: status becomes `rolled_back`,
	/// batch membership is cleared, the prior batch is recounted and a
	/// `rollback` history row is appended.
	#[tracing::instrument(skip(self, reason), fields(repo_id = %id))]
	pub async fn rollback_repository(&self, id: RepositoryId, reason: &str) -> Result<RollbackRecord> {
		let mut tx = self.pool.begin().await?;

		let row = sqlx::query("SELECT status, batch_id FROM repositories WHERE id = ?")
			.bind(id.0)
			.fetch_optional(&mut *tx)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("repository {id}")))?;

		let status: String = row.get("status");
		let previous_status: MigrationStatus = status.parse()?;
		let previous_batch_id = row.get::<Option<i64>, _>("batch_id").map(BatchId);

		if !previous_status.is_rollback_eligible() {
			return Err(DbError::Conflict(format!(
				"repository {id} cannot be rolled back from status '{previous_status}'"
			)));
		}

		let now = Utc::now();
		sqlx::query(
			"UPDATE repositories SET status = ?, batch_id = NULL, updated_at = ? WHERE id = ?",
		)
		.bind(MigrationStatus::RolledBack.as_str())
		.bind(now.to_rfc3339())
		.bind(id.0)
		.execute(&mut *tx)
		.await?;

		if let Some(batch_id) = previous_batch_id {
			recount_batch(&mut *tx, batch_id).await?;
		}

		let entry = NewMigrationHistory {
			repository_id: id,
			phase: MigrationPhase::Rollback,
			status: HistoryStatus::Completed,
			message: Some(reason.to_string()),
			started_at: now,
		};
		let history_id = insert_history(&mut *tx, &entry, Some(now)).await?;

		tx.commit().await?;

		tracing::info!(
			repo_id = %id,
			previous_status = %previous_status,
			previous_batch_id = ?previous_batch_id.map(|b| b.0),
			"repository rolled back"
		);

		Ok(RollbackRecord {
			repository_id: id,
			previous_status,
			previous_batch_id,
			history_id,
		})
	}
}

#[async_trait]
impl RepositoryStore for SqliteRepositoryStore {
	async fn get_repository_by_id(&self, id: RepositoryId) -> Result<Option<Repository>> {
		SqliteRepositoryStore::get_repository_by_id(self, id).await
	}

	async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<Repository>> {
		SqliteRepositoryStore::get_repository_by_full_name(self, full_name).await
	}

	async fn list_repositories(&self, filter: &RepositoryFilter) -> Result<Vec<Repository>> {
		SqliteRepositoryStore::list_repositories(self, filter).await
	}

	async fn save_repository(&self, repo: &Repository) -> Result<RepositoryId> {
		SqliteRepositoryStore::save_repository(self, repo).await
	}

	async fn record_validation(
		&self,
		id: RepositoryId,
		git: Option<&GitProperties>,
		validation: &ValidationState,
	) -> Result<()> {
		SqliteRepositoryStore::record_validation(self, id, git, validation).await
	}

	async fn record_source_lock(
		&self,
		id: RepositoryId,
		migration_id: i64,
		locked: bool,
	) -> Result<()> {
		SqliteRepositoryStore::record_source_lock(self, id, migration_id, locked).await
	}

	async fn clear_source_lock(&self, id: RepositoryId) -> Result<()> {
		SqliteRepositoryStore::clear_source_lock(self, id).await
	}

	async fn record_dry_run(&self, id: RepositoryId, at: DateTime<Utc>) -> Result<()> {
		SqliteRepositoryStore::record_dry_run(self, id, at).await
	}

	async fn record_migrated(
		&self,
		id: RepositoryId,
		destination_full_name: &str,
		at: DateTime<Utc>,
	) -> Result<()> {
		SqliteRepositoryStore::record_migrated(self, id, destination_full_name, at).await
	}

	async fn apply_batch_defaults(
		&self,
		id: RepositoryId,
		exclusions: &ExclusionFlags,
		destination_full_name: Option<&str>,
	) -> Result<()> {
		SqliteRepositoryStore::apply_batch_defaults(self, id, exclusions, destination_full_name)
			.await
	}

	async fn assign_to_batch(&self, id: RepositoryId, batch_id: BatchId) -> Result<bool> {
		SqliteRepositoryStore::assign_to_batch(self, id, batch_id).await
	}

	async fn detach_from_batch(&self, id: RepositoryId, batch_id: BatchId) -> Result<bool> {
		SqliteRepositoryStore::detach_from_batch(self, id, batch_id).await
	}

	async fn update_status_where(
		&self,
		id: RepositoryId,
		from: MigrationStatus,
		to: MigrationStatus,
	) -> Result<bool> {
		SqliteRepositoryStore::update_status_where(self, id, from, to).await
	}

	async fn add_dependency(&self, dependency: &RepositoryDependency) -> Result<()> {
		SqliteRepositoryStore::add_dependency(self, dependency).await
	}

	async fn list_dependencies(&self, ids: &[RepositoryId]) -> Result<Vec<RepositoryDependency>> {
		SqliteRepositoryStore::list_dependencies(self, ids).await
	}

	async fn rollback_repository(&self, id: RepositoryId, reason: &str) -> Result<RollbackRecord> {
		SqliteRepositoryStore::rollback_repository(self, id, reason).await
	}
}

// =========================================================================
// Row Conversion Helpers
// =========================================================================

fn expect_row(rows_affected: u64, id: RepositoryId) -> Result<()> {
	if rows_affected == 0 {
		return Err(DbError::NotFound(format!("repository {id}")));
	}
	Ok(())
}

fn row_to_repository(row: &SqliteRow) -> Result<Repository> {
	let status: String = row.get("status");
	let exclusions: String = row.get("exclusions");
	let git: String = row.get("git_properties");
	let platform: String = row.get("platform_properties");
	let validation: String = row.get("validation");
	let discovered_at: String = row.get("discovered_at");
	let updated_at: String = row.get("updated_at");

	Ok(Repository {
		id: RepositoryId(row.get("id")),
		full_name: row.get("full_name"),
		source_id: row.get("source_id"),
		source_url: row.get("source_url"),
		destination_full_name: row.get("destination_full_name"),
		status: status.parse()?,
		batch_id: row.get::<Option<i64>, _>("batch_id").map(BatchId),
		exclusions: serde_json::from_str(&exclusions)?,
		is_source_locked: row.get("is_source_locked"),
		source_migration_id: row.get("source_migration_id"),
		git: serde_json::from_str(&git)?,
		platform: serde_json::from_str(&platform)?,
		validation: serde_json::from_str(&validation)?,
		discovered_at: parse_ts(&discovered_at)?,
		last_discovery_at: parse_opt_ts(row.get("last_discovery_at"))?,
		last_dry_run_at: parse_opt_ts(row.get("last_dry_run_at"))?,
		migrated_at: parse_opt_ts(row.get("migrated_at"))?,
		updated_at: parse_ts(&updated_at)?,
	})
}

fn row_to_dependency(row: &SqliteRow) -> Result<RepositoryDependency> {
	let dependency_type: String = row.get("dependency_type");
	let detected_at: String = row.get("detected_at");

	Ok(RepositoryDependency {
		repository_id: RepositoryId(row.get("repository_id")),
		dependency_full_name: row.get("dependency_full_name"),
		dependency_type: dependency_type.parse::<DependencyType>()?,
		is_local: row.get("is_local"),
		dependency_url: row.get("dependency_url"),
		detected_at: parse_ts(&detected_at)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::batch::SqliteBatchStore;
	use crate::history::SqliteHistoryStore;
	use crate::testing::create_migrated_test_pool;
	use drover_migrate_core::{
		AzureDevOpsProperties, BatchStatus, GitHubProperties, NewBatch, PlatformProperties,
	};

	fn github(full_name: &str) -> Repository {
		Repository::discovered(full_name, PlatformProperties::GitHub(GitHubProperties::default()))
	}

	async fn setup() -> (SqliteRepositoryStore, SqliteBatchStore, SqliteHistoryStore) {
		let pool = create_migrated_test_pool().await;
		(
			SqliteRepositoryStore::new(pool.clone()),
			SqliteBatchStore::new(pool.clone()),
			SqliteHistoryStore::new(pool),
		)
	}

	#[tokio::test]
	async fn test_save_and_get_roundtrip() {
		let (repos, _, _) = setup().await;
		let mut repo = github("acme/widgets");
		repo.git.total_size_bytes = 1234;
		repo.validation.complexity_score = Some(7);
		let id = repos.save_repository(&repo).await.unwrap();

		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert_eq!(loaded.full_name, "acme/widgets");
		assert_eq!(loaded.git.total_size_bytes, 1234);
		assert_eq!(loaded.validation.complexity_score, Some(7));
		assert_eq!(loaded.status, MigrationStatus::Pending);

		let by_name = repos
			.get_repository_by_full_name("ACME/Widgets")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(by_name.id, id);
	}

	#[tokio::test]
	async fn test_duplicate_full_name_is_conflict() {
		let (repos, _, _) = setup().await;
		repos.save_repository(&github("acme/widgets")).await.unwrap();
		let err = repos.save_repository(&github("acme/widgets")).await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn test_field_writes_on_missing_repository_are_not_found() {
		let (repos, _, _) = setup().await;
		let ghost = RepositoryId(42);
		assert!(matches!(
			repos.clear_source_lock(ghost).await.unwrap_err(),
			DbError::NotFound(_)
		));
		assert!(matches!(
			repos.record_dry_run(ghost, Utc::now()).await.unwrap_err(),
			DbError::NotFound(_)
		));
	}

	#[tokio::test]
	async fn test_field_writes_leave_status_and_membership_alone() {
		let (repos, batches, _) = setup().await;
		let id = repos.save_repository(&github("acme/a")).await.unwrap();
		let batch = batches
			.create_batch(&NewBatch {
				name: "one".to_string(),
				..Default::default()
			})
			.await
			.unwrap();
		assert!(repos.assign_to_batch(id, batch.id).await.unwrap());
		assert!(repos
			.update_status_where(id, MigrationStatus::Pending, MigrationStatus::QueuedForMigration)
			.await
			.unwrap());

		let git = GitProperties {
			total_size_bytes: 99,
			..Default::default()
		};
		let validation = ValidationState {
			complexity_score: Some(12),
			has_oversized_repository: true,
			..Default::default()
		};
		repos.record_validation(id, Some(&git), &validation).await.unwrap();
		repos.record_source_lock(id, 77, true).await.unwrap();
		repos.record_dry_run(id, Utc::now()).await.unwrap();
		repos
			.apply_batch_defaults(
				id,
				&ExclusionFlags {
					exclude_releases: true,
					..Default::default()
				},
				Some("emu/a"),
			)
			.await
			.unwrap();
		repos.record_migrated(id, "emu/renamed", Utc::now()).await.unwrap();

		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert_eq!(loaded.status, MigrationStatus::QueuedForMigration);
		assert_eq!(loaded.batch_id, Some(batch.id));
		assert_eq!(loaded.git.total_size_bytes, 99);
		assert!(loaded.validation.has_oversized_repository);
		assert!(loaded.is_source_locked);
		assert_eq!(loaded.source_migration_id, Some(77));
		assert!(loaded.last_dry_run_at.is_some());
		assert!(loaded.exclusions.exclude_releases);
		assert_eq!(loaded.destination_full_name.as_deref(), Some("emu/renamed"));
		assert!(loaded.migrated_at.is_some());

		repos.clear_source_lock(id).await.unwrap();
		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert!(!loaded.is_source_locked);
		assert_eq!(loaded.source_migration_id, None);
		assert_eq!(loaded.status, MigrationStatus::QueuedForMigration);
	}

	#[tokio::test]
	async fn test_validation_without_metadata_keeps_git_properties() {
		let (repos, _, _) = setup().await;
		let mut repo = github("acme/a");
		repo.git.branch_count = 12;
		let id = repos.save_repository(&repo).await.unwrap();

		let validation = ValidationState {
			complexity_score: Some(3),
			..Default::default()
		};
		repos.record_validation(id, None, &validation).await.unwrap();
		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert_eq!(loaded.git.branch_count, 12);
		assert_eq!(loaded.validation.complexity_score, Some(3));
	}

	#[tokio::test]
	async fn test_batch_defaults_keep_existing_destination() {
		let (repos, _, _) = setup().await;
		let mut repo = github("acme/a");
		repo.destination_full_name = Some("emu/chosen".to_string());
		let id = repos.save_repository(&repo).await.unwrap();

		repos
			.apply_batch_defaults(id, &ExclusionFlags::default(), Some("emu/a"))
			.await
			.unwrap();
		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert_eq!(loaded.destination_full_name.as_deref(), Some("emu/chosen"));
	}

	#[tokio::test]
	async fn test_list_with_status_and_source_filters() {
		let (repos, _, _) = setup().await;
		let a = repos.save_repository(&github("acme/a")).await.unwrap();
		let mut queued = github("acme/b");
		queued.status = MigrationStatus::QueuedForMigration;
		let b = repos.save_repository(&queued).await.unwrap();
		let ado = Repository::discovered(
			"contoso/proj/c",
			PlatformProperties::AzureDevOps(AzureDevOpsProperties {
				is_git: true,
				..Default::default()
			}),
		);
		let c = repos.save_repository(&ado).await.unwrap();

		let pending = repos
			.list_repositories(&RepositoryFilter::with_statuses([MigrationStatus::Pending]))
			.await
			.unwrap();
		let ids: Vec<_> = pending.iter().map(|r| r.id).collect();
		assert_eq!(ids, vec![a, c]);

		let queued = repos
			.list_repositories(&RepositoryFilter::with_statuses([
				MigrationStatus::QueuedForMigration,
			]))
			.await
			.unwrap();
		assert_eq!(queued.len(), 1);
		assert_eq!(queued[0].id, b);

		let ado_only = repos
			.list_repositories(&RepositoryFilter {
				source_kind: Some(SourceKind::AzureDevOps),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(ado_only.len(), 1);
		assert_eq!(ado_only[0].id, c);

		let limited = repos
			.list_repositories(&RepositoryFilter::default().limit(2))
			.await
			.unwrap();
		assert_eq!(limited.len(), 2);
	}

	#[tokio::test]
	async fn test_assign_is_conditional_on_unbatched() {
		let (repos, batches, _) = setup().await;
		let id = repos.save_repository(&github("acme/a")).await.unwrap();
		let first = batches
			.create_batch(&NewBatch {
				name: "one".to_string(),
				..Default::default()
			})
			.await
			.unwrap();
		let second = batches
			.create_batch(&NewBatch {
				name: "two".to_string(),
				..Default::default()
			})
			.await
			.unwrap();

		assert!(repos.assign_to_batch(id, first.id).await.unwrap());
		assert!(!repos.assign_to_batch(id, second.id).await.unwrap());
		assert!(!repos.detach_from_batch(id, second.id).await.unwrap());
		assert!(repos.detach_from_batch(id, first.id).await.unwrap());
		assert!(repos.assign_to_batch(id, second.id).await.unwrap());
	}

	#[tokio::test]
	async fn test_update_status_where_is_compare_and_set() {
		let (repos, _, _) = setup().await;
		let id = repos.save_repository(&github("acme/a")).await.unwrap();
		assert!(repos
			.update_status_where(id, MigrationStatus::Pending, MigrationStatus::QueuedForMigration)
			.await
			.unwrap());
		assert!(!repos
			.update_status_where(id, MigrationStatus::Pending, MigrationStatus::DryRunQueued)
			.await
			.unwrap());
		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert_eq!(loaded.status, MigrationStatus::QueuedForMigration);
	}

	#[tokio::test]
	async fn test_dependencies_roundtrip() {
		let (repos, _, _) = setup().await;
		let a = repos.save_repository(&github("acme/a")).await.unwrap();
		let b = repos.save_repository(&github("acme/b")).await.unwrap();
		repos
			.add_dependency(&RepositoryDependency::local(a, "acme/b", DependencyType::Submodule))
			.await
			.unwrap();
		repos
			.add_dependency(&RepositoryDependency::local(a, "acme/b", DependencyType::Submodule))
			.await
			.unwrap();
		repos
			.add_dependency(&RepositoryDependency::external(b, "npm/left-pad", DependencyType::Package))
			.await
			.unwrap();

		let deps = repos.list_dependencies(&[a, b]).await.unwrap();
		assert_eq!(deps.len(), 2);
		assert!(deps[0].is_local);
		assert_eq!(deps[1].dependency_type, DependencyType::Package);
		assert!(repos.list_dependencies(&[]).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_rollback_of_complete_repository_in_batch() {
		let (repos, batches, history) = setup().await;
		let batch = batches
			.create_batch(&NewBatch {
				name: "wave-7".to_string(),
				..Default::default()
			})
			.await
			.unwrap();
		let mut repo = github("acme/a");
		repo.status = MigrationStatus::Complete;
		let id = repos.save_repository(&repo).await.unwrap();
		let other = repos.save_repository(&github("acme/b")).await.unwrap();
		repos.assign_to_batch(id, batch.id).await.unwrap();
		repos.assign_to_batch(other, batch.id).await.unwrap();
		assert_eq!(batches.refresh_repository_count(batch.id).await.unwrap(), 2);

		let record = repos.rollback_repository(id, "bad cutover").await.unwrap();
		assert_eq!(record.previous_status, MigrationStatus::Complete);
		assert_eq!(record.previous_batch_id, Some(batch.id));

		let loaded = repos.get_repository_by_id(id).await.unwrap().unwrap();
		assert_eq!(loaded.status, MigrationStatus::RolledBack);
		assert!(loaded.batch_id.is_none());

		let batch = batches.get_batch(batch.id).await.unwrap().unwrap();
		assert_eq!(batch.repository_count, 1);
		assert_eq!(batch.status, BatchStatus::Pending);

		let rows = history.list_history(id).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].phase, MigrationPhase::Rollback);
		assert_eq!(rows[0].message.as_deref(), Some("bad cutover"));
		assert!(rows[0].completed_at.is_some());
	}

	#[tokio::test]
	async fn test_rollback_rejects_pending_repository() {
		let (repos, _, history) = setup().await;
		let id = repos.save_repository(&github("acme/a")).await.unwrap();
		let err = repos.rollback_repository(id, "oops").await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
		assert!(history.list_history(id).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_rollback_missing_repository() {
		let (repos, _, _) = setup().await;
		let err = repos
			.rollback_repository(RepositoryId(99), "oops")
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}
}
