// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destination size and naming ceilings used by repository validation.

use drover_migrate_core::ValidationLimits;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfigLayer {
	pub max_repository_bytes: Option<i64>,
	pub max_commit_bytes: Option<i64>,
	pub max_file_bytes: Option<i64>,
	pub large_file_warning_bytes: Option<i64>,
	pub max_ref_name_len: Option<usize>,
}

impl LimitsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_repository_bytes.is_some() {
			self.max_repository_bytes = other.max_repository_bytes;
		}
		if other.max_commit_bytes.is_some() {
			self.max_commit_bytes = other.max_commit_bytes;
		}
		if other.max_file_bytes.is_some() {
			self.max_file_bytes = other.max_file_bytes;
		}
		if other.large_file_warning_bytes.is_some() {
			self.large_file_warning_bytes = other.large_file_warning_bytes;
		}
		if other.max_ref_name_len.is_some() {
			self.max_ref_name_len = other.max_ref_name_len;
		}
	}

	pub fn finalize(self) -> LimitsConfig {
		let defaults = ValidationLimits::default();
		LimitsConfig {
			max_repository_bytes: self
				.max_repository_bytes
				.unwrap_or(defaults.max_repository_bytes),
			max_commit_bytes: self.max_commit_bytes.unwrap_or(defaults.max_commit_bytes),
			max_file_bytes: self.max_file_bytes.unwrap_or(defaults.max_file_bytes),
			large_file_warning_bytes: self
				.large_file_warning_bytes
				.unwrap_or(defaults.large_file_warning_bytes),
			max_ref_name_len: self.max_ref_name_len.unwrap_or(defaults.max_ref_name_len),
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
	pub max_repository_bytes: i64,
	pub max_commit_bytes: i64,
	pub max_file_bytes: i64,
	pub large_file_warning_bytes: i64,
	pub max_ref_name_len: usize,
}

impl Default for LimitsConfig {
	fn default() -> Self {
		LimitsConfigLayer::default().finalize()
	}
}

impl LimitsConfig {
	pub fn validation_limits(&self) -> ValidationLimits {
		ValidationLimits {
			max_repository_bytes: self.max_repository_bytes,
			max_commit_bytes: self.max_commit_bytes,
			max_file_bytes: self.max_file_bytes,
			large_file_warning_bytes: self.large_file_warning_bytes,
			max_ref_name_len: self.max_ref_name_len,
		}
	}
}
