//! Read-only allowlist for remote shell commands.
//!
//! A command is dispatchable only if it matches one of the whitelisted
//! read-only patterns AND contains none of the shell metacharacters that
//! could compose it into something else. Violations are surfaced as blocked
//! results, never dispatched.

use std::sync::OnceLock;

use regex::Regex;

/// Shell metacharacters that immediately disqualify a command.
const METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '<', '>', '{', '}', '\\'];

/// The read-only command patterns. Anchored on both ends; a command must
/// match one in full.
const READONLY_PATTERNS: &[&str] = &[
    r"^uptime$",
    r"^whoami$",
    r"^id$",
    r"^hostname$",
    r"^date$",
    r"^ping -c [1-5] [A-Za-z0-9.\-]+$",
    r"^ls /[A-Za-z0-9._/\-]*$",
    r"^uname( -a)?$",
    r"^free( -[hm])?$",
    r"^df( -[hm])?$",
    r"^docker ps$",
    r"^docker stats --no-stream$",
    r"^systemctl status [A-Za-z0-9.@_\-]+$",
    r"^journalctl -u [A-Za-z0-9.@_\-]+( -n [0-9]{1,3})?( --no-pager)?$",
];

fn compiled_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        READONLY_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("readonly pattern is a valid regex"))
            .collect()
    })
}

/// Check a remote command against the read-only policy.
///
/// Returns `Err` with a human-readable cause on violation.
pub fn check_ssh_command(command: &str) -> Result<(), String> {
    let command = command.trim();

    if command.is_empty() {
        return Err("empty command".to_string());
    }

    if let Some(ch) = command.chars().find(|c| METACHARACTERS.contains(c)) {
        return Err(format!(
            "command contains forbidden shell metacharacter '{ch}'"
        ));
    }

    if !compiled_patterns().iter().any(|p| p.is_match(command)) {
        return Err(format!(
            "command '{command}' is not in the read-only allowlist"
        ));
    }

    Ok(())
}
