// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Migration-risk scoring and blocker detection.
//!
//! [`validate`] is a pure function of an already-discovered [`Repository`] and
//! the destination's [`ValidationLimits`]. It never performs I/O, so running it
//! twice over the same record yields the same report.
//!
//! The complexity score is the sum of independent components:
//!
//! | Component      | Inputs                                                    |
//! |----------------|-----------------------------------------------------------|
//! | `size`         | total repository size                                     |
//! | `activity`     | branch and commit volume                                  |
//! | `features`     | LFS, submodules, GitHub feature surface                   |
//! | `contributors` | distinct contributor count                                |
//! | `platform`     | Azure DevOps boards, pipelines, policies, hooks           |
//!
//! Blockers are reported separately and never feed the score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::repository::{
	AzureDevOpsProperties, GitHubProperties, GitProperties, PlatformProperties, Repository,
	ValidationState,
};

const MIB: i64 = 1024 * 1024;
const GIB: i64 = 1024 * MIB;

/// Destination-side ceilings the engine checks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLimits {
	pub max_repository_bytes: i64,
	pub max_commit_bytes: i64,
	pub max_file_bytes: i64,
	pub large_file_warning_bytes: i64,
	pub max_ref_name_len: usize,
}

impl Default for ValidationLimits {
	fn default() -> Self {
		Self {
			max_repository_bytes: 40 * GIB,
			max_commit_bytes: 2 * GIB,
			max_file_bytes: 400 * MIB,
			large_file_warning_bytes: 100 * MIB,
			max_ref_name_len: 255,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityRating {
	Simple,
	Medium,
	Complex,
	VeryComplex,
}

impl ComplexityRating {
	pub fn from_score(score: i32) -> Self {
		match score {
			i32::MIN..=5 => ComplexityRating::Simple,
			6..=10 => ComplexityRating::Medium,
			11..=17 => ComplexityRating::Complex,
			_ => ComplexityRating::VeryComplex,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ComplexityRating::Simple => "simple",
			ComplexityRating::Medium => "medium",
			ComplexityRating::Complex => "complex",
			ComplexityRating::VeryComplex => "very_complex",
		}
	}
}

impl fmt::Display for ComplexityRating {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ComplexityRating {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"simple" => Ok(ComplexityRating::Simple),
			"medium" => Ok(ComplexityRating::Medium),
			"complex" => Ok(ComplexityRating::Complex),
			"very_complex" => Ok(ComplexityRating::VeryComplex),
			_ => Err(CoreError::UnknownValue {
				kind: "complexity rating",
				value: s.to_string(),
			}),
		}
	}
}

/// Named score components. `total` is always their sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityBreakdown {
	pub size: i32,
	pub activity: i32,
	pub features: i32,
	pub contributors: i32,
	pub platform: i32,
	pub total: i32,
}

impl ComplexityBreakdown {
	fn new(size: i32, activity: i32, features: i32, contributors: i32, platform: i32) -> Self {
		Self {
			size,
			activity,
			features,
			contributors,
			platform,
			total: size + activity + features + contributors + platform,
		}
	}

	pub fn rating(&self) -> ComplexityRating {
		ComplexityRating::from_score(self.total)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
	OversizedRepository,
	OversizedCommit,
	LongRefName,
	OversizedFile,
	LargeFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Blocker,
	Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
	pub code: FindingCode,
	pub severity: Severity,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
}

impl Finding {
	fn blocker(code: FindingCode, message: String) -> Self {
		Self {
			code,
			severity: Severity::Blocker,
			message,
			path: None,
		}
	}

	fn with_path(mut self, path: &str) -> Self {
		self.path = Some(path.to_string());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
	pub breakdown: ComplexityBreakdown,
	pub rating: ComplexityRating,
	pub blockers: Vec<Finding>,
	pub warnings: Vec<Finding>,
}

impl ValidationReport {
	pub fn score(&self) -> i32 {
		self.breakdown.total
	}

	pub fn has_code(&self, code: FindingCode) -> bool {
		self.blockers
			.iter()
			.chain(self.warnings.iter())
			.any(|f| f.code == code)
	}

	/// Persistable form, with the eligibility flags derived from the findings.
	pub fn into_state(self, validated_at: DateTime<Utc>) -> ValidationState {
		ValidationState {
			complexity_score: Some(self.breakdown.total),
			complexity_rating: Some(self.rating),
			complexity_breakdown: Some(self.breakdown),
			has_oversized_repository: self.has_code(FindingCode::OversizedRepository),
			has_oversized_commits: self.has_code(FindingCode::OversizedCommit),
			has_long_refs: self.has_code(FindingCode::LongRefName),
			has_blocking_files: self.has_code(FindingCode::OversizedFile),
			has_large_file_warnings: self.has_code(FindingCode::LargeFile),
			blockers: self.blockers,
			warnings: self.warnings,
			validated_at: Some(validated_at),
		}
	}
}

/// Score a repository and collect its blockers and warnings.
pub fn validate(repo: &Repository, limits: &ValidationLimits) -> ValidationReport {
	let git = &repo.git;
	let (features, platform) = match &repo.platform {
		PlatformProperties::GitHub(gh) => (git_feature_score(git) + github_feature_score(gh), 0),
		PlatformProperties::AzureDevOps(ado) => (git_feature_score(git), azure_devops_score(ado)),
	};

	let breakdown = ComplexityBreakdown::new(
		size_score(git.total_size_bytes),
		activity_score(git),
		features,
		contributor_score(git.contributor_count),
		platform,
	);
	let (blockers, warnings) = findings(git, limits);

	ValidationReport {
		rating: breakdown.rating(),
		breakdown,
		blockers,
		warnings,
	}
}

fn size_score(bytes: i64) -> i32 {
	match bytes {
		b if b >= 20 * GIB => 4,
		b if b >= 5 * GIB => 3,
		b if b >= GIB => 2,
		b if b >= 100 * MIB => 1,
		_ => 0,
	}
}

fn activity_score(git: &GitProperties) -> i32 {
	let branches = match git.branch_count {
		n if n > 100 => 2,
		n if n > 20 => 1,
		_ => 0,
	};
	let commits = match git.commit_count {
		n if n > 50_000 => 3,
		n if n > 10_000 => 2,
		n if n > 1_000 => 1,
		_ => 0,
	};
	branches + commits
}

fn git_feature_score(git: &GitProperties) -> i32 {
	i32::from(git.has_lfs) * 2 + i32::from(git.has_submodules) * 2
}

fn github_feature_score(gh: &GitHubProperties) -> i32 {
	let flags = [
		gh.has_wiki,
		gh.has_pages,
		gh.has_discussions,
		gh.has_projects,
		gh.has_rulesets,
		gh.has_code_scanning || gh.has_dependabot || gh.has_secret_scanning,
		gh.webhook_count > 0,
		gh.environment_count > 0,
		gh.branch_protection_count > 0,
		gh.release_count > 0,
	];
	let mut score = flags.iter().filter(|f| **f).count() as i32;
	if gh.has_packages {
		score += 2;
	}
	score += match gh.workflow_count {
		n if n > 10 => 2,
		n if n > 0 => 1,
		_ => 0,
	};
	score
}

fn azure_devops_score(ado: &AzureDevOpsProperties) -> i32 {
	let mut score = 0;
	if ado.has_boards || ado.work_item_count > 0 {
		score += 2;
	}
	if ado.work_item_count > 1_000 {
		score += 1;
	}
	if ado.pipeline_count > 0 {
		score += 2;
	}
	if ado.pipeline_count > 10 {
		score += 1;
	}
	if ado.has_wiki {
		score += 1;
	}
	if ado.branch_policy_count > 0 {
		score += 1;
	}
	if ado.service_hook_count > 0 {
		score += 1;
	}
	if ado.pull_request_count > 500 {
		score += 1;
	}
	score
}

fn contributor_score(count: i64) -> i32 {
	match count {
		n if n > 100 => 3,
		n if n > 25 => 2,
		n if n > 5 => 1,
		_ => 0,
	}
}

fn findings(git: &GitProperties, limits: &ValidationLimits) -> (Vec<Finding>, Vec<Finding>) {
	let mut blockers = Vec::new();
	let mut warnings = Vec::new();

	if git.total_size_bytes > limits.max_repository_bytes {
		blockers.push(Finding::blocker(
			FindingCode::OversizedRepository,
			format!(
				"repository size {} bytes exceeds the {} byte limit",
				git.total_size_bytes, limits.max_repository_bytes
			),
		));
	}

	if let Some(commit) = git.largest_commit_bytes.filter(|b| *b > limits.max_commit_bytes) {
		blockers.push(Finding::blocker(
			FindingCode::OversizedCommit,
			format!(
				"a commit of {commit} bytes exceeds the {} byte per-commit limit",
				limits.max_commit_bytes
			),
		));
	}

	if let Some(name) = git
		.longest_ref_name
		.as_deref()
		.filter(|n| n.len() > limits.max_ref_name_len)
	{
		blockers.push(Finding::blocker(
			FindingCode::LongRefName,
			format!(
				"reference name of {} bytes exceeds the {} byte limit",
				name.len(),
				limits.max_ref_name_len
			),
		));
	}

	for file in &git.large_files {
		if file.size_bytes > limits.max_file_bytes {
			blockers.push(
				Finding::blocker(
					FindingCode::OversizedFile,
					format!(
						"file of {} bytes exceeds the {} byte file limit",
						file.size_bytes, limits.max_file_bytes
					),
				)
				.with_path(&file.path),
			);
		} else if file.size_bytes > limits.large_file_warning_bytes {
			warnings.push(Finding {
				code: FindingCode::LargeFile,
				severity: Severity::Warning,
				message: format!(
					"file of {} bytes should move to LFS after migration",
					file.size_bytes
				),
				path: Some(file.path.clone()),
			});
		}
	}

	(blockers, warnings)
}
