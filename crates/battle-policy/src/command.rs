//! Command screening at three escalating strictness levels.
//!
//! Every level applies the remote-code-execution deny-list and the catastrophic
//! patterns. `Strict` additionally refuses shell metacharacters; `Balanced`
//! fast-paths a set of interactive/dev-tool invocation shapes and otherwise only
//! refuses command chaining that ends in a deletion.
//!
//! The balanced allow-list and the permissive deny-list are heuristics over whole
//! command strings. They keep honest mistakes out of a PTY; they do not make a
//! hostile command safe.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{GuardError, Result};
use crate::level::SecurityLevel;

/// Shell metacharacters refused in strict mode and stripped from arguments
pub const SHELL_METACHARACTERS: &[char] = &[
    '|', ';', '&', '$', '`', '(', ')', '<', '>', '{', '}', '\n', '\r', '!', '#',
];

/// Longest command line accepted at any level
pub const MAX_COMMAND_LENGTH: usize = 10_000;

static REMOTE_EXECUTION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(curl|wget|fetch)\b[^|]*\|\s*(sudo\s+)?(ba|z|da|k)?sh\b",
        r"/dev/(tcp|udp)/",
        r"\b(nc|ncat|netcat)\b[^|;&]*\s-[a-zA-Z]*[ec]\b",
        r"\bbase64\s+(-d|--decode)\b[^|]*\|\s*(ba|z|da)?sh\b",
        r#"\beval\s+["']?\$\(\s*(curl|wget)\b"#,
        r"\b(python[23]?|perl|ruby)\s+-[a-zA-Z]*[ce]\s+.*\bsocket\b",
    ])
});

static CATASTROPHIC: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // fork bombs
        r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:?\s*&\s*\}\s*;\s*:",
        r"\b\w+\s*\(\s*\)\s*\{[^}]*\|[^}]*&[^}]*\}\s*;",
        // recursive deletion of /, ~ or $HOME
        r"\brm\s+(?:-{1,2}[\w-]+\s+)*(?:/\*?|~/?|\$HOME/?)(?:[\s;&|]|$)",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\b[^;&|]*\bof=/dev/(sd|hd|nvme|disk|mmcblk)",
        r">\s*/dev/(sd|hd|nvme|disk|mmcblk)",
        r"\bchmod\s+(?:-[a-zA-Z]*R[a-zA-Z]*\s+)?0?777\s+/(?:\s|$)",
        // credential material
        r"/etc/(shadow|gshadow|sudoers)\b",
        r"\.ssh/(id_[A-Za-z0-9_]+|authorized_keys)",
        r"\.aws/credentials",
        r"\.gnupg/",
        r"\.netrc\b",
        r"\.docker/config\.json",
    ])
});

static CHAINED_DELETION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?:;|&&|\|\||\||&)\s*(?:sudo\s+)?rm\s",
        r"\$\(\s*(?:sudo\s+)?rm\s",
        r"`\s*(?:sudo\s+)?rm\s",
    ])
});

static BALANCED_ALLOW_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:npx?|yarn|pnpm|bun|node|deno|python3?|pip3?|cargo|rustc|go|make|git|vim?|nvim|nano|emacs|less|more|man|top|htop|btop|bash|sh|zsh|fish|echo|printf|cat|ls|pwd|tmux|watch|tail|head|grep|rg|fzf|sqlite3|psql|mysql|redis-cli|irb|ghci|lua)(?:\s+[^;&|`$<>]*)?$",
    )
    .expect("balanced allow-list is a valid regex")
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in guard pattern is a valid regex"))
        .collect()
}

/// Outcome of screening one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandValidation {
    pub valid: bool,
    /// Normalized command, present when `valid`
    pub sanitized: Option<String>,
    /// Reason, present when not `valid`
    pub error: Option<String>,
}

impl CommandValidation {
    fn accepted(command: &str) -> Self {
        Self {
            valid: true,
            sanitized: Some(command.to_string()),
            error: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            sanitized: None,
            error: Some(reason.into()),
        }
    }

    /// Convert into a `Result`, yielding the sanitized command
    pub fn into_result(self) -> Result<String> {
        match (self.valid, self.sanitized) {
            (true, Some(sanitized)) => Ok(sanitized),
            _ => Err(GuardError::CommandRejected(
                self.error.unwrap_or_else(|| "command rejected".to_string()),
            )),
        }
    }
}

/// Screen a command line at the given level
pub fn validate_command(command: &str, level: SecurityLevel) -> CommandValidation {
    validate_command_with(command, level, &[])
}

/// Screen a command line, also rejecting any of `extra_blocked`
pub fn validate_command_with(
    command: &str,
    level: SecurityLevel,
    extra_blocked: &[Regex],
) -> CommandValidation {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return CommandValidation::rejected("empty command");
    }
    if trimmed.contains('\0') {
        return CommandValidation::rejected("command contains a NUL byte");
    }
    if trimmed.len() > MAX_COMMAND_LENGTH {
        return CommandValidation::rejected(format!(
            "command exceeds {} bytes",
            MAX_COMMAND_LENGTH
        ));
    }

    if REMOTE_EXECUTION.iter().any(|re| re.is_match(trimmed)) {
        return CommandValidation::rejected("remote code execution pattern");
    }
    if CATASTROPHIC.iter().any(|re| re.is_match(trimmed)) {
        return CommandValidation::rejected("catastrophic command pattern");
    }
    if let Some(re) = extra_blocked.iter().find(|re| re.is_match(trimmed)) {
        return CommandValidation::rejected(format!("blocked by pattern {}", re.as_str()));
    }

    match level {
        SecurityLevel::Strict => {
            if let Some(c) = contains_shell_metacharacters(trimmed) {
                return CommandValidation::rejected(format!(
                    "shell metacharacter {:?} not allowed in strict mode",
                    c
                ));
            }
        }
        SecurityLevel::Balanced => {
            if is_allow_listed(trimmed) {
                return CommandValidation::accepted(trimmed);
            }
            if CHAINED_DELETION.iter().any(|re| re.is_match(trimmed)) {
                return CommandValidation::rejected("command chaining with deletion");
            }
        }
        SecurityLevel::Permissive => {}
    }

    CommandValidation::accepted(trimmed)
}

/// First shell metacharacter in `s`, if any
pub fn contains_shell_metacharacters(s: &str) -> Option<char> {
    s.chars().find(|c| SHELL_METACHARACTERS.contains(c))
}

/// Whether the command matches one of the balanced-mode invocation shapes
pub fn is_allow_listed(command: &str) -> bool {
    BALANCED_ALLOW_LIST.is_match(command.trim())
}
