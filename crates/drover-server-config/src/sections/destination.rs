// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destination defaults applied when a batch carries no override.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DestinationConfigLayer {
	pub default_org: Option<String>,
}

impl DestinationConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.default_org.is_some() {
			self.default_org = other.default_org;
		}
	}

	pub fn finalize(self) -> DestinationConfig {
		DestinationConfig {
			default_org: self.default_org.filter(|s| !s.trim().is_empty()),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DestinationConfig {
	pub default_org: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_blank_org_is_none() {
		let config = DestinationConfigLayer {
			default_org: Some("  ".to_string()),
		}
		.finalize();
		assert!(config.default_org.is_none());
	}
}
