// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Logging configuration section.

use serde::{Deserialize, Serialize};

fn default_level() -> String {
	"info".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfigLayer {
	pub level: Option<String>,
}

impl LoggingConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.level.is_some() {
			self.level = other.level;
		}
	}

	pub fn finalize(self) -> LoggingConfig {
		LoggingConfig {
			level: self.level.unwrap_or_else(default_level),
		}
	}
}

/// Filter directive handed to the tracing subscriber when `RUST_LOG` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
	pub level: String,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: default_level(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_level() {
		assert_eq!(LoggingConfig::default().level, "info");
		assert_eq!(LoggingConfigLayer::default().finalize().level, "info");
	}

	#[test]
	fn test_directive_passthrough() {
		let layer: LoggingConfigLayer =
			toml::from_str(r#"level = "drover_server_migrate=debug,info""#).unwrap();
		assert_eq!(layer.finalize().level, "drover_server_migrate=debug,info");
	}
}
