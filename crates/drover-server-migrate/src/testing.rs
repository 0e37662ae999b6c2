// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scripted collaborators and an in-memory store harness for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_migrate_core::{
	AzureDevOpsProperties, ExclusionFlags, GitHubProperties, GitProperties, MigrationStatus,
	PlatformProperties, Repository, RepositoryId, SourceKind,
};
use drover_server_db::testing::create_migrated_test_pool;
use drover_server_db::{SqliteBatchStore, SqliteHistoryStore, SqliteRepositoryStore};
use parking_lot::Mutex;

use crate::client::{
	ArchiveUrls, ClientError, DestinationClient, ExportState, ImportRequest, RemoteState,
	SourceClient,
};
use crate::executor::{ExecutorSettings, PipelineExecutor};

pub fn github_repo(full_name: &str, status: MigrationStatus) -> Repository {
	let mut repo =
		Repository::discovered(full_name, PlatformProperties::GitHub(GitHubProperties::default()));
	repo.status = status;
	repo.source_url = Some(format!("https://github.com/{full_name}"));
	repo
}

pub fn ado_repo(full_name: &str, is_git: bool, status: MigrationStatus) -> Repository {
	let mut parts = full_name.split('/');
	let organization = parts.next().unwrap_or_default().to_string();
	let project = parts.next().unwrap_or_default().to_string();
	let mut repo = Repository::discovered(
		full_name,
		PlatformProperties::AzureDevOps(AzureDevOpsProperties {
			organization,
			project,
			is_git,
			..Default::default()
		}),
	);
	repo.status = status;
	repo.source_url = Some(format!("https://dev.azure.com/{full_name}"));
	repo
}

#[derive(Default)]
pub struct FakeSource {
	metadata: Mutex<Option<GitProperties>>,
	exports: AtomicUsize,
	unlocks: AtomicUsize,
}

impl FakeSource {
	pub fn set_metadata(&self, edit: impl FnOnce(&mut GitProperties)) {
		let mut git = GitProperties::default();
		edit(&mut git);
		*self.metadata.lock() = Some(git);
	}

	pub fn exports(&self) -> usize {
		self.exports.load(Ordering::SeqCst)
	}

	pub fn unlocks(&self) -> usize {
		self.unlocks.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl SourceClient for FakeSource {
	async fn fetch_metadata(&self, repo: &Repository) -> Result<GitProperties, ClientError> {
		Ok(self.metadata.lock().clone().unwrap_or_else(|| repo.git.clone()))
	}

	async fn start_export(
		&self,
		_repo: &Repository,
		_exclusions: &ExclusionFlags,
		_lock_source: bool,
	) -> Result<i64, ClientError> {
		let n = self.exports.fetch_add(1, Ordering::SeqCst);
		Ok(1000 + n as i64)
	}

	async fn export_state(
		&self,
		repo: &Repository,
		migration_id: i64,
	) -> Result<ExportState, ClientError> {
		Ok(ExportState::Exported(ArchiveUrls {
			git_archive_url: format!("https://archives.test/{}/{migration_id}/git.tar.gz", repo.id),
			metadata_archive_url: None,
		}))
	}

	async fn unlock(&self, _repo: &Repository, _migration_id: i64) -> Result<(), ClientError> {
		self.unlocks.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

#[derive(Default)]
pub struct FakeDestination {
	existing: HashSet<String>,
	import_failure: Option<String>,
	imports: Mutex<Vec<ImportRequest>>,
	/// Polls answered `InProgress` before the terminal state.
	pending_polls: AtomicUsize,
}

impl FakeDestination {
	pub fn failing_import(message: &str) -> Self {
		Self {
			import_failure: Some(message.to_string()),
			..Default::default()
		}
	}

	pub fn with_existing(full_name: &str) -> Self {
		Self {
			existing: HashSet::from([full_name.to_string()]),
			..Default::default()
		}
	}

	pub fn slow(polls: usize) -> Self {
		Self {
			pending_polls: AtomicUsize::new(polls),
			..Default::default()
		}
	}

	pub fn imports(&self) -> Vec<ImportRequest> {
		self.imports.lock().clone()
	}
}

#[async_trait]
impl DestinationClient for FakeDestination {
	async fn repository_exists(&self, org: &str, name: &str) -> Result<bool, ClientError> {
		Ok(self.existing.contains(&format!("{org}/{name}")))
	}

	async fn start_import(&self, request: &ImportRequest) -> Result<String, ClientError> {
		let mut imports = self.imports.lock();
		imports.push(request.clone());
		Ok(format!("RM_{}", imports.len()))
	}

	async fn import_state(&self, _migration_id: &str) -> Result<RemoteState, ClientError> {
		let remaining = self.pending_polls.load(Ordering::SeqCst);
		if remaining > 0 {
			self.pending_polls.store(remaining - 1, Ordering::SeqCst);
			return Ok(RemoteState::InProgress);
		}
		Ok(match &self.import_failure {
			Some(message) => RemoteState::Failed(message.clone()),
			None => RemoteState::Succeeded,
		})
	}
}

pub struct Harness {
	pub repos: Arc<SqliteRepositoryStore>,
	pub batches: Arc<SqliteBatchStore>,
	pub history: Arc<SqliteHistoryStore>,
	pub source: Arc<FakeSource>,
	pub destination: Arc<FakeDestination>,
}

impl Harness {
	pub async fn new() -> Self {
		Self::with_clients(FakeSource::default(), FakeDestination::default()).await
	}

	pub async fn with_clients(source: FakeSource, destination: FakeDestination) -> Self {
		let pool = create_migrated_test_pool().await;
		Self {
			repos: Arc::new(SqliteRepositoryStore::new(pool.clone())),
			batches: Arc::new(SqliteBatchStore::new(pool.clone())),
			history: Arc::new(SqliteHistoryStore::new(pool)),
			source: Arc::new(source),
			destination: Arc::new(destination),
		}
	}

	pub fn settings() -> ExecutorSettings {
		ExecutorSettings {
			status_poll_interval: Duration::ZERO,
			default_org: Some("acme-emu".to_string()),
			..Default::default()
		}
	}

	pub fn executor(&self) -> PipelineExecutor {
		PipelineExecutor::new(
			self.repos.clone(),
			self.history.clone(),
			self.destination.clone(),
			Self::settings(),
		)
		.with_source(SourceKind::GitHub, self.source.clone())
		.with_source(SourceKind::AzureDevOps, self.source.clone())
	}

	pub async fn insert(&self, repo: Repository) -> RepositoryId {
		self.repos.save_repository(&repo).await.unwrap()
	}

	pub async fn repo(&self, id: RepositoryId) -> Repository {
		self.repos.get_repository_by_id(id).await.unwrap().unwrap()
	}
}
