// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository record and its platform-specific property bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::batch::BatchId;
use crate::error::CoreError;
use crate::status::MigrationStatus;
use crate::validation::{ComplexityBreakdown, ComplexityRating, Finding};

/// Database identifier of a repository row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(pub i64);

impl fmt::Display for RepositoryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i64> for RepositoryId {
	fn from(id: i64) -> Self {
		Self(id)
	}
}

/// Which kind of source system a repository was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
	#[serde(rename = "github")]
	GitHub,
	AzureDevOps,
}

impl SourceKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			SourceKind::GitHub => "github",
			SourceKind::AzureDevOps => "azure_devops",
		}
	}
}

impl fmt::Display for SourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SourceKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"github" => Ok(SourceKind::GitHub),
			"azure_devops" => Ok(SourceKind::AzureDevOps),
			_ => Err(CoreError::UnknownValue {
				kind: "source kind",
				value: s.to_string(),
			}),
		}
	}
}

/// Content the migration should leave behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionFlags {
	pub exclude_releases: bool,
	pub exclude_attachments: bool,
	pub exclude_metadata: bool,
	pub exclude_git_data: bool,
	pub exclude_owner_projects: bool,
}

impl ExclusionFlags {
	/// Union with batch-level defaults. A batch can add exclusions, never remove them.
	pub fn merged_with(&self, defaults: &ExclusionFlags) -> ExclusionFlags {
		ExclusionFlags {
			exclude_releases: self.exclude_releases || defaults.exclude_releases,
			exclude_attachments: self.exclude_attachments || defaults.exclude_attachments,
			exclude_metadata: self.exclude_metadata || defaults.exclude_metadata,
			exclude_git_data: self.exclude_git_data || defaults.exclude_git_data,
			exclude_owner_projects: self.exclude_owner_projects || defaults.exclude_owner_projects,
		}
	}

	pub fn is_empty(&self) -> bool {
		*self == ExclusionFlags::default()
	}
}

/// A file recorded during discovery because it is large enough to matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeFile {
	pub path: String,
	pub size_bytes: i64,
}

/// Git-level measurements shared by every source kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitProperties {
	pub total_size_bytes: i64,
	pub default_branch: Option<String>,
	pub branch_count: i64,
	pub tag_count: i64,
	pub commit_count: i64,
	pub contributor_count: i64,
	pub largest_commit_bytes: Option<i64>,
	pub longest_ref_name: Option<String>,
	pub large_files: Vec<LargeFile>,
	pub has_lfs: bool,
	pub has_submodules: bool,
}

impl GitProperties {
	pub fn largest_file(&self) -> Option<&LargeFile> {
		self.large_files.iter().max_by_key(|f| f.size_bytes)
	}
}

/// Features only GitHub-like sources expose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubProperties {
	pub visibility: Option<String>,
	pub is_archived: bool,
	pub is_fork: bool,
	pub has_wiki: bool,
	pub has_pages: bool,
	pub has_discussions: bool,
	pub has_projects: bool,
	pub has_packages: bool,
	pub has_rulesets: bool,
	pub has_code_scanning: bool,
	pub has_dependabot: bool,
	pub has_secret_scanning: bool,
	pub workflow_count: i64,
	pub webhook_count: i64,
	pub environment_count: i64,
	pub release_count: i64,
	pub branch_protection_count: i64,
}

/// Features only Azure-DevOps-like sources expose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureDevOpsProperties {
	pub organization: String,
	pub project: String,
	/// False for TFVC repositories, which cannot be migrated as git.
	pub is_git: bool,
	pub has_wiki: bool,
	pub has_boards: bool,
	pub pipeline_count: i64,
	pub work_item_count: i64,
	pub pull_request_count: i64,
	pub branch_policy_count: i64,
	pub service_hook_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PlatformProperties {
	#[serde(rename = "github")]
	GitHub(GitHubProperties),
	AzureDevOps(AzureDevOpsProperties),
}

impl PlatformProperties {
	pub fn kind(&self) -> SourceKind {
		match self {
			PlatformProperties::GitHub(_) => SourceKind::GitHub,
			PlatformProperties::AzureDevOps(_) => SourceKind::AzureDevOps,
		}
	}
}

/// Persisted output of the validation engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationState {
	pub complexity_score: Option<i32>,
	pub complexity_rating: Option<ComplexityRating>,
	pub complexity_breakdown: Option<ComplexityBreakdown>,
	pub has_oversized_repository: bool,
	pub has_oversized_commits: bool,
	pub has_long_refs: bool,
	pub has_blocking_files: bool,
	pub has_large_file_warnings: bool,
	pub blockers: Vec<Finding>,
	pub warnings: Vec<Finding>,
	pub validated_at: Option<DateTime<Utc>>,
}

impl ValidationState {
	pub fn has_blockers(&self) -> bool {
		!self.blockers.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
	pub id: RepositoryId,
	/// `owner/name` for GitHub, `org/project/name` for Azure DevOps.
	pub full_name: String,
	pub source_id: Option<String>,
	pub source_url: Option<String>,
	pub destination_full_name: Option<String>,
	pub status: MigrationStatus,
	pub batch_id: Option<BatchId>,
	pub exclusions: ExclusionFlags,
	pub is_source_locked: bool,
	pub source_migration_id: Option<i64>,
	pub git: GitProperties,
	pub platform: PlatformProperties,
	pub validation: ValidationState,
	pub discovered_at: DateTime<Utc>,
	pub last_discovery_at: Option<DateTime<Utc>>,
	pub last_dry_run_at: Option<DateTime<Utc>>,
	pub migrated_at: Option<DateTime<Utc>>,
	pub updated_at: DateTime<Utc>,
}

impl Repository {
	/// A freshly discovered repository. The id is assigned by storage.
	pub fn discovered(full_name: impl Into<String>, platform: PlatformProperties) -> Self {
		let now = Utc::now();
		Self {
			id: RepositoryId(0),
			full_name: full_name.into(),
			source_id: None,
			source_url: None,
			destination_full_name: None,
			status: MigrationStatus::Pending,
			batch_id: None,
			exclusions: ExclusionFlags::default(),
			is_source_locked: false,
			source_migration_id: None,
			git: GitProperties::default(),
			platform,
			validation: ValidationState::default(),
			discovered_at: now,
			last_discovery_at: Some(now),
			last_dry_run_at: None,
			migrated_at: None,
			updated_at: now,
		}
	}

	pub fn source_kind(&self) -> SourceKind {
		self.platform.kind()
	}

	/// Short repository name, the last path segment of `full_name`.
	pub fn name(&self) -> &str {
		self
			.full_name
			.rsplit('/')
			.next()
			.unwrap_or(self.full_name.as_str())
	}

	/// Non-git sources (TFVC) must be remediated before they can migrate.
	pub fn requires_remediation(&self) -> bool {
		matches!(&self.platform, PlatformProperties::AzureDevOps(ado) if !ado.is_git)
	}

	/// Why this repository cannot join a batch, if it cannot.
	pub fn batch_ineligibility(&self) -> Option<String> {
		if self.validation.has_oversized_repository {
			return Some("repository exceeds the destination repository size limit".to_string());
		}
		if !self.status.is_batch_eligible() {
			return Some(format!(
				"repository status '{}' is not eligible for batch assignment",
				self.status
			));
		}
		None
	}
}
