//! Three-tier command classifier.
//!
//! Maps a command string to a [`Classification`] by walking the rule layers
//! in precedence order: custom blocked, custom allowed, domain rules,
//! auto-approve, then the built-in BLOCK/ASK/ALLOW pattern store, and
//! finally the yellow/ask default for anything unknown. The first matching
//! layer wins and stops evaluation.

pub mod domains;

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::models::{Classification, CommandTier, CustomRuleSet, PolicyAction};
use crate::patterns::{PatternStore, compile_cached};

pub use domains::{domain_matches, extract_domains};

/// LLM-backed second-opinion classifier. The backend is out of scope; the
/// gateway only defines the seam.
#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(&self, command: &str) -> anyhow::Result<Classification>;
}

/// Inputs longer than this are classified against a prefix; regex evaluation
/// stays bounded regardless of input size.
const MAX_SCAN_CHARS: usize = 10_000;

/// Stable reason strings the dashboard matches on.
pub const REASON_DANGEROUS: &str = "Command matched dangerous operation patterns";
pub const REASON_ELEVATED: &str = "Command matched elevated-risk operation patterns";
pub const REASON_SAFE: &str = "Command matched safe operation patterns";
pub const REASON_UNKNOWN: &str = "Unknown command - requires approval for safety";

/// The classifier. Holds a swappable pattern store; custom rules are
/// supplied per call.
pub struct CommandClassifier {
    store: RwLock<Arc<PatternStore>>,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CommandClassifier {
    pub fn new(store: PatternStore) -> Self {
        Self {
            store: RwLock::new(Arc::new(store)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PatternStore::with_defaults())
    }

    /// Swap in a new pattern store. In-flight classifications keep the
    /// snapshot they started with.
    pub fn replace_patterns(&self, store: PatternStore) {
        *self.store.write().expect("pattern store lock") = Arc::new(store);
    }

    /// Classify without caller-specific rules.
    pub fn classify(&self, command: &str) -> Classification {
        self.classify_with_rules(command, None)
    }

    /// Classify with an optional per-caller rule set layered on top of the
    /// built-in catalog.
    pub fn classify_with_rules(
        &self,
        command: &str,
        rules: Option<&CustomRuleSet>,
    ) -> Classification {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Classification::new(
                command,
                CommandTier::Green,
                PolicyAction::Allow,
                "Empty command",
            );
        }

        let eval = bounded_prefix(trimmed);

        if let Some(rules) = rules {
            if let Some(pattern) = first_regex_match(&rules.blocked_commands, eval) {
                return Classification::new(
                    command,
                    CommandTier::Red,
                    PolicyAction::Block,
                    "Command blocked by custom rule",
                )
                .with_pattern(pattern);
            }

            if let Some(pattern) = first_regex_match(&rules.allowed_commands, eval) {
                return Classification::new(
                    command,
                    CommandTier::Green,
                    PolicyAction::Allow,
                    "Command allowed by custom rule",
                )
                .with_pattern(pattern);
            }

            let found = extract_domains(eval);
            for domain in &found {
                if rules
                    .blocked_domains
                    .iter()
                    .any(|rule| domain_matches(domain, rule))
                {
                    return Classification::new(
                        command,
                        CommandTier::Red,
                        PolicyAction::Block,
                        format!("Domain blocked by policy: {domain}"),
                    );
                }
            }
            if !rules.allowed_domains.is_empty() {
                for domain in &found {
                    let permitted = rules
                        .allowed_domains
                        .iter()
                        .any(|rule| domain_matches(domain, rule));
                    if !permitted {
                        return Classification::new(
                            command,
                            CommandTier::Red,
                            PolicyAction::Block,
                            format!("Domain not in allowlist: {domain}"),
                        );
                    }
                }
            }

            if let Some(pattern) = first_regex_match(&rules.auto_approve_patterns, eval) {
                return Classification::new(
                    command,
                    CommandTier::Green,
                    PolicyAction::Allow,
                    "Command auto-approved by custom rule",
                )
                .with_pattern(pattern);
            }
        }

        let store = self.store.read().expect("pattern store lock").clone();

        if let Some(pattern) = store.first_block_match(eval) {
            return Classification::new(command, CommandTier::Red, PolicyAction::Block, REASON_DANGEROUS)
                .with_pattern(pattern.source.clone());
        }
        if let Some(pattern) = store.first_ask_match(eval) {
            return Classification::new(command, CommandTier::Yellow, PolicyAction::Ask, REASON_ELEVATED)
                .with_pattern(pattern.source.clone());
        }
        if let Some(pattern) = store.first_allow_match(eval) {
            return Classification::new(command, CommandTier::Green, PolicyAction::Allow, REASON_SAFE)
                .with_pattern(pattern.source.clone());
        }

        Classification::new(command, CommandTier::Yellow, PolicyAction::Ask, REASON_UNKNOWN)
    }
}

/// First rule in `sources` that matches `command`, skipping sources that
/// fail validation or compilation.
fn first_regex_match(sources: &[String], command: &str) -> Option<String> {
    sources
        .iter()
        .find(|source| {
            compile_cached(source)
                .map(|regex| regex.is_match(command))
                .unwrap_or(false)
        })
        .cloned()
}

fn bounded_prefix(command: &str) -> &str {
    match command.char_indices().nth(MAX_SCAN_CHARS) {
        Some((idx, _)) => &command[..idx],
        None => command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> CommandClassifier {
        CommandClassifier::with_defaults()
    }

    #[test]
    fn test_empty_command_is_green() {
        let c = classifier().classify("");
        assert_eq!(c.tier, CommandTier::Green);
        assert_eq!(c.action, PolicyAction::Allow);
        assert_eq!(c.reason, "Empty command");

        let c = classifier().classify("   \t ");
        assert_eq!(c.action, PolicyAction::Allow);
    }

    #[test]
    fn test_safe_command_allowed() {
        let c = classifier().classify("ls -la");
        assert_eq!(c.tier, CommandTier::Green);
        assert_eq!(c.action, PolicyAction::Allow);
        assert!(c.matched_pattern.is_some());
    }

    #[test]
    fn test_dangerous_command_blocked() {
        let c = classifier().classify("rm -rf /");
        assert_eq!(c.tier, CommandTier::Red);
        assert_eq!(c.action, PolicyAction::Block);
        assert_eq!(c.reason, REASON_DANGEROUS);
    }

    #[test]
    fn test_risky_command_asks() {
        let c = classifier().classify("rm build.log");
        assert_eq!(c.tier, CommandTier::Yellow);
        assert_eq!(c.action, PolicyAction::Ask);
        assert!(c.requires_approval);
    }

    #[test]
    fn test_unknown_command_defaults_to_ask() {
        let c = classifier().classify("frobnicate --all");
        assert_eq!(c.tier, CommandTier::Yellow);
        assert_eq!(c.action, PolicyAction::Ask);
        assert_eq!(c.reason, REASON_UNKNOWN);
        assert!(c.matched_pattern.is_none());
    }

    #[test]
    fn test_custom_block_beats_builtin_allow() {
        let rules = CustomRuleSet {
            blocked_commands: vec![r"^ls\b".to_string()],
            ..Default::default()
        };
        let c = classifier().classify_with_rules("ls -la", Some(&rules));
        assert_eq!(c.tier, CommandTier::Red);
        assert_eq!(c.action, PolicyAction::Block);
    }

    #[test]
    fn test_custom_allow_beats_builtin_ask() {
        let rules = CustomRuleSet {
            allowed_commands: vec![r"^rm\s+scratch/".to_string()],
            ..Default::default()
        };
        let c = classifier().classify_with_rules("rm scratch/tmp.txt", Some(&rules));
        assert_eq!(c.action, PolicyAction::Allow);
    }

    #[test]
    fn test_blocked_domain() {
        let rules = CustomRuleSet {
            blocked_domains: vec!["evil.net".to_string()],
            ..Default::default()
        };
        let c = classifier().classify_with_rules("curl https://api.evil.net/x", Some(&rules));
        assert_eq!(c.action, PolicyAction::Block);
        assert!(c.reason.contains("evil.net"));
    }

    #[test]
    fn test_domain_allowlist_blocks_outsiders() {
        let rules = CustomRuleSet {
            allowed_domains: vec!["example.com".to_string()],
            ..Default::default()
        };
        let c = classifier().classify_with_rules("curl https://other.org/x", Some(&rules));
        assert_eq!(c.action, PolicyAction::Block);

        let c = classifier().classify_with_rules("curl https://api.example.com/x", Some(&rules));
        // Passes the domain gate, then falls through to the ASK tier for curl.
        assert_eq!(c.action, PolicyAction::Ask);
    }

    #[test]
    fn test_blocked_domain_beats_allowlist() {
        let rules = CustomRuleSet {
            blocked_domains: vec!["bad.example.com".to_string()],
            allowed_domains: vec!["example.com".to_string()],
            ..Default::default()
        };
        let c =
            classifier().classify_with_rules("curl https://bad.example.com/x", Some(&rules));
        assert_eq!(c.action, PolicyAction::Block);
        assert!(c.reason.contains("blocked"));
    }

    #[test]
    fn test_auto_approve_pattern() {
        let rules = CustomRuleSet {
            auto_approve_patterns: vec![r"^rm\s+-rf\s+node_modules$".to_string()],
            ..Default::default()
        };
        let c = classifier().classify_with_rules("rm -rf node_modules", Some(&rules));
        assert_eq!(c.action, PolicyAction::Allow);
    }

    #[test]
    fn test_long_input_still_classified() {
        let mut command = String::from("echo ");
        command.push_str(&"x".repeat(20_000));
        let c = classifier().classify(&command);
        assert_eq!(c.action, PolicyAction::Allow);
        assert_eq!(c.command.len(), command.len());
    }

    #[test]
    fn test_replace_patterns() {
        let classifier = CommandClassifier::with_defaults();
        classifier.replace_patterns(PatternStore::new(
            &[(r"^forbidden\b", "test block")],
            &[],
            &[],
        ));

        let c = classifier.classify("forbidden thing");
        assert_eq!(c.action, PolicyAction::Block);

        // ls no longer matches anything; falls to the unknown default.
        let c = classifier.classify("ls");
        assert_eq!(c.action, PolicyAction::Ask);
    }
}
