//! Versioned allow/ask/block pattern lists.
//!
//! The store holds three ordered regex lists scanned BLOCK first, then ASK,
//! then ALLOW; the first match within a list wins. The store is immutable at
//! runtime except through [`PatternStore::replace`], so classification never
//! observes a half-updated rule set.
//!
//! Pattern compilation is validated at load time: sources longer than 100
//! characters or containing stacked unbounded quantifiers (adjacent, or a
//! quantified group ending in one) are rejected, logged, and skipped. Compiled regexes are cached by source string and
//! shared with the classifier's custom-rule evaluation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Hard cap on pattern source length.
const MAX_PATTERN_LEN: usize = 100;

static COMPILE_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Compile a regex through the shared cache, validating the source first.
///
/// Returns `None` (after logging) for sources that fail validation or
/// compilation.
pub fn compile_cached(source: &str) -> Option<Regex> {
    if let Err(reason) = validate_pattern_source(source) {
        warn!(pattern = %source, reason = %reason, "Rejected unsafe pattern");
        return None;
    }

    let mut cache = COMPILE_CACHE.lock().expect("pattern cache lock");
    if let Some(regex) = cache.get(source) {
        return Some(regex.clone());
    }

    match Regex::new(source) {
        Ok(regex) => {
            cache.insert(source.to_string(), regex.clone());
            Some(regex)
        }
        Err(error) => {
            warn!(pattern = %source, error = %error, "Failed to compile pattern");
            None
        }
    }
}

/// Reject sources that are oversized or carry stacked unbounded
/// quantifiers, the usual shape of catastrophic backtracking: either two
/// adjacent quantifiers (`a**`, `a{2,}+`) or a quantified group whose body
/// ends in an unbounded quantifier (`(a+)+`, `(x*)*`).
fn validate_pattern_source(source: &str) -> Result<(), String> {
    if source.len() > MAX_PATTERN_LEN {
        return Err(format!(
            "pattern exceeds {MAX_PATTERN_LEN} characters ({})",
            source.len()
        ));
    }

    let bytes = source.as_bytes();
    for (i, window) in bytes.windows(2).enumerate() {
        let first_unbounded = matches!(window[0], b'*' | b'+' | b'}');
        let second_unbounded = matches!(window[1], b'*' | b'+');
        // An escaped quantifier is a literal, not a quantifier.
        let escaped = i > 0 && bytes[i - 1] == b'\\';
        if first_unbounded && second_unbounded && !escaped {
            return Err("adjacent unbounded quantifiers".to_string());
        }
    }

    for i in 0..bytes.len() {
        if bytes[i] != b')' || (i > 0 && bytes[i - 1] == b'\\') {
            continue;
        }
        let group_quantified = bytes.get(i + 1).is_some_and(|b| matches!(b, b'*' | b'+'));
        if !group_quantified || i == 0 {
            continue;
        }
        let last_in_group = bytes[i - 1];
        let last_escaped = i >= 2 && bytes[i - 2] == b'\\';
        if matches!(last_in_group, b'*' | b'+' | b'}') && !last_escaped {
            return Err("quantified group ending in an unbounded quantifier".to_string());
        }
    }

    Ok(())
}

/// A compiled policy rule.
#[derive(Debug, Clone)]
pub struct PolicyPattern {
    pub source: String,
    pub description: String,
    regex: Regex,
}

impl PolicyPattern {
    pub fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// The three-tier rule catalog.
#[derive(Debug, Clone)]
pub struct PatternStore {
    block: Vec<PolicyPattern>,
    ask: Vec<PolicyPattern>,
    allow: Vec<PolicyPattern>,
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PatternStore {
    /// Build a store from raw `(source, description)` lists, skipping any
    /// source that fails validation or compilation.
    pub fn new(
        block: &[(&str, &str)],
        ask: &[(&str, &str)],
        allow: &[(&str, &str)],
    ) -> Self {
        Self {
            block: compile_list(block),
            ask: compile_list(ask),
            allow: compile_list(allow),
        }
    }

    /// The built-in catalog.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BLOCK, DEFAULT_ASK, DEFAULT_ALLOW)
    }

    pub fn first_block_match(&self, command: &str) -> Option<&PolicyPattern> {
        self.block.iter().find(|p| p.is_match(command))
    }

    pub fn first_ask_match(&self, command: &str) -> Option<&PolicyPattern> {
        self.ask.iter().find(|p| p.is_match(command))
    }

    pub fn first_allow_match(&self, command: &str) -> Option<&PolicyPattern> {
        self.allow.iter().find(|p| p.is_match(command))
    }

    pub fn block_len(&self) -> usize {
        self.block.len()
    }

    pub fn ask_len(&self) -> usize {
        self.ask.len()
    }

    pub fn allow_len(&self) -> usize {
        self.allow.len()
    }
}

fn compile_list(specs: &[(&str, &str)]) -> Vec<PolicyPattern> {
    specs
        .iter()
        .filter_map(|(source, description)| {
            compile_cached(source).map(|regex| PolicyPattern {
                source: (*source).to_string(),
                description: (*description).to_string(),
                regex,
            })
        })
        .collect()
}

/// Commands that are never executed.
const DEFAULT_BLOCK: &[(&str, &str)] = &[
    (
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+/(\s|\*|$)",
        "Recursive delete of the filesystem root",
    ),
    (r"\bsudo\s+rm\b", "Privileged delete"),
    (r":\(\)\s*\{\s*:\|:&\s*\}\s*;\s*:", "Fork bomb"),
    (r"\bmkfs(\.[a-z0-9]+)?\b", "Filesystem format"),
    (r"\bdd\b[^|;]*\bof=/dev/", "Raw device write"),
    (r">\s*/dev/sd[a-z]", "Disk overwrite"),
    (r"chmod\s+(-R\s+)?777\s+/(\s|$)", "World-writable root"),
    (r"(curl|wget)\s[^|;]*\|\s*(ba|z)?sh", "Remote script piped to shell"),
    (r"\b(shutdown|reboot|halt|poweroff)\b", "System power control"),
    (r"/etc/(shadow|sudoers)", "Credential store access"),
    (r">\s*/etc/", "System configuration overwrite"),
];

/// Commands that run only after human approval.
const DEFAULT_ASK: &[(&str, &str)] = &[
    (r"^rm\b", "Delete files"),
    (r"^sudo\b", "Privileged command"),
    (r"\bchmod\b", "Change permissions"),
    (r"\bchown\b", "Change ownership"),
    (r"^mv\b", "Move or rename files"),
    (r"^cp\s+-[a-zA-Z]*r", "Recursive copy"),
    (r"\bgit\s+(push|reset|rebase|checkout|merge)\b", "Git history or remote mutation"),
    (r"\bkill(all)?\b", "Process termination"),
    (r"\b(npm|cargo|pip|gem)\s+(publish|install)\b", "Package publication or install"),
    (r"^(curl|wget|fetch)\b", "Network fetch"),
    (r"\b(nc|netcat|ncat)\b", "Raw network connection"),
    (r"\bssh\b|\bscp\b", "Remote shell access"),
    (r"\b(docker|podman|systemctl)\b", "Service or container control"),
];

/// Read-only commands that pass without approval.
const DEFAULT_ALLOW: &[(&str, &str)] = &[
    (r"^ls\b", "List directory contents"),
    (r"^pwd$", "Print working directory"),
    (r"^cd\b", "Change directory"),
    (r"^echo\b", "Print text"),
    (r"^cat\b", "Display file contents"),
    (r"^head\b", "Display first lines"),
    (r"^tail\b", "Display last lines"),
    (r"^grep\b", "Search text"),
    (r"^find\b", "Find files"),
    (r"^which\b", "Locate a command"),
    (r"^whoami$", "Current user"),
    (r"^date\b", "Current date"),
    (r"^uptime$", "System uptime"),
    (r"^(df|du)\b", "Disk usage"),
    (r"^wc\b", "Word count"),
    (r"^env$", "Environment variables"),
    (r"^git\s+(status|log|diff|branch|show|remote)\b", "Git read-only"),
    (r"^(cargo|npm|pnpm)\s+(check|test|build|fmt)\b", "Project build and test"),
];
