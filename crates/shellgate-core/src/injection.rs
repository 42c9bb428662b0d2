//! Prompt-injection detection.
//!
//! A fixed rule set contributes weighted evidence; confidence is the capped
//! sum of triggered weights and detection is declared against the
//! sensitivity threshold. Sanitization replaces the matched spans with a
//! neutral marker and never fails.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{InjectionPatternMatch, InjectionReport, InjectionSeverity, Sensitivity};

struct InjectionRule {
    pattern_type: &'static str,
    severity: InjectionSeverity,
    weight: f64,
    regex: Regex,
}

static RULES: Lazy<Vec<InjectionRule>> = Lazy::new(|| {
    let specs: &[(&str, InjectionSeverity, f64, &str)] = &[
        (
            "ignore_instructions",
            InjectionSeverity::High,
            0.6,
            r"(?i)\b(?:ignore|disregard|forget)\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier|your)\s+(?:instructions?|prompts?|rules?|directives?)",
        ),
        (
            "role_override",
            InjectionSeverity::Medium,
            0.3,
            r"(?i)\b(?:you\s+are\s+now|act\s+as|pretend\s+to\s+be|from\s+now\s+on\s+you)\b",
        ),
        (
            "system_impersonation",
            InjectionSeverity::High,
            0.4,
            r"(?i)(?:\[system\]|<<sys>>|<\|im_start\|>\s*system|^\s*system\s*:|\bsystem\s+prompt\b)",
        ),
        (
            "instruction_override",
            InjectionSeverity::Medium,
            0.4,
            r"(?i)\b(?:new|updated)\s+instructions?\b|\boverride\s+(?:the\s+)?(?:system|safety|security)\b",
        ),
        (
            "tool_injection",
            InjectionSeverity::Medium,
            0.3,
            r#"(?i)(?:<tool_call>|<function_call>|"tool_name"\s*:|\binvoke\s+tool\b)"#,
        ),
    ];

    specs
        .iter()
        .map(|(pattern_type, severity, weight, source)| InjectionRule {
            pattern_type,
            severity: *severity,
            weight: *weight,
            regex: Regex::new(source).expect("injection rule regex"),
        })
        .collect()
});

/// Marker written over sanitized spans.
const FILTERED_MARKER: &str = "[FILTERED]";

/// Result of sanitizing a piece of text.
#[derive(Debug, Clone)]
pub struct SanitizeOutcome {
    pub original: String,
    pub sanitized: String,
    pub modified: bool,
}

/// Detector over the fixed rule set.
#[derive(Default)]
pub struct InjectionDetector {
    sensitivity: Sensitivity,
}

impl InjectionDetector {
    pub fn new(sensitivity: Sensitivity) -> Self {
        Self { sensitivity }
    }

    /// Scan with the detector's configured sensitivity.
    pub fn detect(&self, text: &str) -> InjectionReport {
        self.detect_with_sensitivity(text, self.sensitivity)
    }

    /// Scan with an explicit sensitivity override.
    pub fn detect_with_sensitivity(&self, text: &str, sensitivity: Sensitivity) -> InjectionReport {
        let mut confidence = 0.0;
        let mut patterns = Vec::new();

        for rule in RULES.iter() {
            if let Some(m) = rule.regex.find(text) {
                confidence += rule.weight;
                patterns.push(InjectionPatternMatch {
                    pattern_type: rule.pattern_type.to_string(),
                    severity: rule.severity,
                    matched_span: m.as_str().to_string(),
                });
            }
        }

        let confidence = confidence.min(1.0);
        let detected = !patterns.is_empty() && confidence >= sensitivity.threshold();

        let reason = if detected {
            let kinds: Vec<&str> = patterns.iter().map(|p| p.pattern_type.as_str()).collect();
            format!("Prompt injection detected: {}", kinds.join(", "))
        } else {
            "No manipulation patterns found".to_string()
        };

        InjectionReport {
            detected,
            confidence,
            reason,
            patterns,
        }
    }

    /// Copy of `text` with every rule match replaced by a neutral marker.
    pub fn sanitize(&self, text: &str) -> SanitizeOutcome {
        let mut sanitized = text.to_string();
        for rule in RULES.iter() {
            sanitized = rule
                .regex
                .replace_all(&sanitized, FILTERED_MARKER)
                .into_owned();
        }

        SanitizeOutcome {
            original: text.to_string(),
            modified: sanitized != text,
            sanitized,
        }
    }
}
