//! Hostname extraction from shell commands.
//!
//! Pulls candidate domains out of network-capable commands (`curl`, `wget`,
//! `fetch`, `nc`, `ssh`, `scp`) and any embedded `http(s)://` URLs so the
//! classifier can apply per-caller domain rules.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://([A-Za-z0-9._-]+)").expect("url host regex"));

/// Flags that consume the following token, per command family.
const CURL_VALUE_FLAGS: &[&str] = &[
    "-X", "-H", "-d", "-o", "-F", "-u", "-A", "-e", "-T", "--request", "--header", "--data",
    "--output", "--user", "--upload-file",
];
const NC_VALUE_FLAGS: &[&str] = &["-p", "-w", "-s", "-q"];
const SSH_VALUE_FLAGS: &[&str] = &["-p", "-i", "-l", "-o", "-F", "-P"];

/// Extract deduplicated hostnames referenced by a command.
pub fn extract_domains(command: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for caps in URL_HOST.captures_iter(command) {
        push_host(&mut found, &caps[1]);
    }

    let tokens: Vec<&str> = command.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        match *token {
            "curl" | "wget" | "fetch" => {
                collect_args(&tokens[i + 1..], CURL_VALUE_FLAGS, &mut found, |arg| {
                    parse_host(arg)
                });
            }
            "nc" | "netcat" | "ncat" => {
                // First non-flag argument is the host; the port follows.
                collect_first_arg(&tokens[i + 1..], NC_VALUE_FLAGS, &mut found, |arg| {
                    parse_host(arg)
                });
            }
            "ssh" => {
                collect_first_arg(&tokens[i + 1..], SSH_VALUE_FLAGS, &mut found, |arg| {
                    parse_host(arg.rsplit('@').next().unwrap_or(arg))
                });
            }
            "scp" => {
                // Only remote specs (user@host:path or host:path) name a host.
                collect_args(&tokens[i + 1..], SSH_VALUE_FLAGS, &mut found, |arg| {
                    if !arg.contains(':') && !arg.contains('@') {
                        return None;
                    }
                    let without_user = arg.rsplit('@').next().unwrap_or(arg);
                    parse_host(without_user.split(':').next().unwrap_or(without_user))
                });
            }
            _ => {}
        }
    }

    found
}

/// True when `host` is `rule` or a subdomain of it.
pub fn domain_matches(host: &str, rule: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let rule = rule.to_ascii_lowercase();
    host == rule || host.ends_with(&format!(".{rule}"))
}

fn collect_args(
    args: &[&str],
    value_flags: &[&str],
    found: &mut Vec<String>,
    parse: impl Fn(&str) -> Option<String>,
) {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if is_separator(arg) {
            break;
        }
        if arg.starts_with('-') {
            skip_next = value_flags.contains(arg);
            continue;
        }
        if let Some(host) = parse(arg) {
            push_host_owned(found, host);
        }
    }
}

fn collect_first_arg(
    args: &[&str],
    value_flags: &[&str],
    found: &mut Vec<String>,
    parse: impl Fn(&str) -> Option<String>,
) {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if is_separator(arg) {
            break;
        }
        if arg.starts_with('-') {
            skip_next = value_flags.contains(arg);
            continue;
        }
        if let Some(host) = parse(arg) {
            push_host_owned(found, host);
        }
        break;
    }
}

fn is_separator(token: &str) -> bool {
    matches!(token, "|" | "||" | "&&" | ";")
}

/// Normalize one argument into a hostname, or reject it.
fn parse_host(arg: &str) -> Option<String> {
    let arg = arg.trim_matches(|c| c == '"' || c == '\'');
    let without_scheme = arg
        .strip_prefix("https://")
        .or_else(|| arg.strip_prefix("http://"))
        .unwrap_or(arg);
    let host_port = without_scheme.split('/').next()?;
    let host = host_port.split(':').next()?.trim_end_matches('.');

    if host.is_empty() || !host.contains('.') {
        return None;
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    // Require an alphabetic top-level label so bare version numbers and
    // file-looking arguments with numeric extensions do not qualify.
    let last_label = host.rsplit('.').next()?;
    if !last_label.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    Some(host.to_ascii_lowercase())
}

fn push_host(found: &mut Vec<String>, raw: &str) {
    if let Some(host) = parse_host(raw) {
        push_host_owned(found, host);
    }
}

fn push_host_owned(found: &mut Vec<String>, host: String) {
    if !found.contains(&host) {
        found.push(host);
    }
}
