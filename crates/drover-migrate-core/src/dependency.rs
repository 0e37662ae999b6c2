// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inter-repository dependency edges consumed by the wave planner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::repository::RepositoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
	Submodule,
	Workflow,
	DependencyGraph,
	Package,
}

impl DependencyType {
	pub fn as_str(&self) -> &'static str {
		match self {
			DependencyType::Submodule => "submodule",
			DependencyType::Workflow => "workflow",
			DependencyType::DependencyGraph => "dependency_graph",
			DependencyType::Package => "package",
		}
	}
}

impl fmt::Display for DependencyType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for DependencyType {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"submodule" => Ok(DependencyType::Submodule),
			"workflow" => Ok(DependencyType::Workflow),
			"dependency_graph" => Ok(DependencyType::DependencyGraph),
			"package" => Ok(DependencyType::Package),
			_ => Err(CoreError::UnknownValue {
				kind: "dependency type",
				value: s.to_string(),
			}),
		}
	}
}

/// `repository_id` depends on `dependency_full_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDependency {
	pub repository_id: RepositoryId,
	pub dependency_full_name: String,
	pub dependency_type: DependencyType,
	/// True when the dependency is itself a repository in migration scope.
	pub is_local: bool,
	pub dependency_url: Option<String>,
	pub detected_at: DateTime<Utc>,
}

impl RepositoryDependency {
	pub fn local(
		repository_id: RepositoryId,
		dependency_full_name: impl Into<String>,
		dependency_type: DependencyType,
	) -> Self {
		Self {
			repository_id,
			dependency_full_name: dependency_full_name.into(),
			dependency_type,
			is_local: true,
			dependency_url: None,
			detected_at: Utc::now(),
		}
	}

	pub fn external(
		repository_id: RepositoryId,
		dependency_full_name: impl Into<String>,
		dependency_type: DependencyType,
	) -> Self {
		Self {
			is_local: false,
			..Self::local(repository_id, dependency_full_name, dependency_type)
		}
	}
}
