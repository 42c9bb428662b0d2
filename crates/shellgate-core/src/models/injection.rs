//! Prompt-injection detection models.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Detection sensitivity presets mapping to confidence thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Confidence at or above which detection is declared.
    pub const fn threshold(&self) -> f64 {
        match self {
            Self::Low => 0.3,
            Self::Medium => 0.5,
            Self::High => 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum InjectionSeverity {
    Low,
    Medium,
    High,
}

/// One rule hit inside the scanned text.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InjectionPatternMatch {
    /// Rule identifier, e.g. "ignore_instructions".
    pub pattern_type: String,
    pub severity: InjectionSeverity,
    pub matched_span: String,
}

/// Outcome of scanning text for manipulation attempts.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InjectionReport {
    pub detected: bool,
    /// Sum of triggered rule weights, capped at 1.0.
    pub confidence: f64,
    pub reason: String,
    pub patterns: Vec<InjectionPatternMatch>,
}
