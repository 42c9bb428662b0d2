//! Secret detection models and configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

/// One credential-shaped substring found in scanned text.
///
/// Within any scan result, matches are sorted ascending by `start_offset`
/// and never overlap.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SecretMatch {
    /// Catalog name, e.g. "GitHub Personal Access Token".
    pub secret_type: String,
    pub matched_text: String,
    pub redacted_text: String,
    #[ts(type = "number")]
    pub start_offset: usize,
    #[ts(type = "number")]
    pub end_offset: usize,
    /// 1-based line, present when line numbering is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    pub line_number: Option<usize>,
}

/// What to do when command output contains secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Record the finding, leave the output untouched.
    Warn,
    /// Replace each secret with a redaction marker.
    #[default]
    Redact,
    /// Suppress the entire output.
    Block,
}

/// Process-wide secret detection settings.
///
/// Readers take an atomic snapshot; writers publish a replacement, so a
/// running scan never observes a half-updated config.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DetectionConfig {
    #[serde(default)]
    pub mode: DetectionMode,
    #[serde(default = "default_true")]
    pub enable_line_numbers: bool,
    /// Caps how many matches per type are reported upward. Detection itself
    /// is never skipped.
    #[serde(default = "default_max_per_type")]
    #[ts(type = "number")]
    pub max_secrets_per_type: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_per_type() -> usize {
    10
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::default(),
            enable_line_numbers: true,
            max_secrets_per_type: default_max_per_type(),
        }
    }
}

/// Result of scanning one block of output.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScanReport {
    pub has_secrets: bool,
    /// Total matches detected (before per-type reporting caps).
    #[ts(type = "number")]
    pub count: usize,
    pub matches: Vec<SecretMatch>,
    #[ts(type = "Record<string, number>")]
    pub by_type: HashMap<String, usize>,
    /// Present when the configured mode is not `warn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_text: Option<String>,
}
