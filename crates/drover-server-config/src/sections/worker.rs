// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Migration worker configuration section.

use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_WORKER_COUNT: u32 = 5;
pub const DEFAULT_STATUS_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfigLayer {
	pub poll_interval_secs: Option<u64>,
	pub worker_count: Option<u32>,
	pub status_poll_interval_secs: Option<u64>,
	pub dry_run_enabled: Option<bool>,
}

impl WorkerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.poll_interval_secs.is_some() {
			self.poll_interval_secs = other.poll_interval_secs;
		}
		if other.worker_count.is_some() {
			self.worker_count = other.worker_count;
		}
		if other.status_poll_interval_secs.is_some() {
			self.status_poll_interval_secs = other.status_poll_interval_secs;
		}
		if other.dry_run_enabled.is_some() {
			self.dry_run_enabled = other.dry_run_enabled;
		}
	}

	/// Zero intervals and a zero worker count fall back to the defaults.
	pub fn finalize(self) -> WorkerConfig {
		WorkerConfig {
			poll_interval_secs: self
				.poll_interval_secs
				.filter(|v| *v > 0)
				.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
			worker_count: self
				.worker_count
				.filter(|v| *v > 0)
				.unwrap_or(DEFAULT_WORKER_COUNT),
			status_poll_interval_secs: self
				.status_poll_interval_secs
				.filter(|v| *v > 0)
				.unwrap_or(DEFAULT_STATUS_POLL_INTERVAL_SECS),
			dry_run_enabled: self.dry_run_enabled.unwrap_or(true),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
	pub poll_interval_secs: u64,
	pub worker_count: u32,
	pub status_poll_interval_secs: u64,
	/// Also claim `dry_run_queued` repositories.
	pub dry_run_enabled: bool,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
			worker_count: DEFAULT_WORKER_COUNT,
			status_poll_interval_secs: DEFAULT_STATUS_POLL_INTERVAL_SECS,
			dry_run_enabled: true,
		}
	}
}
