//! Argument, path and environment sanitizers plus log redaction.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::command::SHELL_METACHARACTERS;
use crate::error::{GuardError, Result};

/// Dynamic-linker injection variables, dropped from any environment handed to a child
pub const INJECTION_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_DEBUG_OUTPUT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
];

/// Replacement for masked environment values
pub const MASKED_VALUE: &str = "***";

static CREDENTIAL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(secret|token|passw(or)?d|api[_-]?key|private[_-]?key|credential|auth|session[_-]?key|access[_-]?key)")
        .expect("credential key pattern is a valid regex")
});

static ABSOLUTE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:~|\b[A-Za-z]:)?(?:/[\w.\-]+){2,}/?")
        .expect("path pattern is a valid regex")
});

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 pattern is a valid regex")
});

static PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":\d{2,5}\b").expect("port pattern is a valid regex")
});

/// Strip shell metacharacters and `..` segments from each argument independently
pub fn sanitize_args(args: &[String]) -> Vec<String> {
    args.iter().map(|arg| sanitize_arg(arg)).collect()
}

fn sanitize_arg(arg: &str) -> String {
    let stripped: String = arg
        .chars()
        .filter(|c| *c != '\0' && !SHELL_METACHARACTERS.contains(c))
        .collect();

    if !stripped.contains("..") {
        return stripped;
    }

    let absolute = stripped.starts_with('/');
    let kept: Vec<&str> = stripped
        .split('/')
        .filter(|segment| *segment != "..")
        .collect();
    let joined = kept.join("/");
    // Dropping a leading ".." must not turn "../x" into "/x"
    if !absolute {
        joined.trim_start_matches('/').to_string()
    } else {
        joined
    }
}

/// Resolve `path` against `base` and reject anything that escapes it.
///
/// Normalization is lexical; symlinks inside `base` are not followed.
pub fn validate_path(path: impl AsRef<Path>, base: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let base = base.as_ref();

    if path.as_os_str().to_string_lossy().contains('\0') {
        return Err(GuardError::PathRejected("path contains a NUL byte".to_string()));
    }

    let base = normalize(&absolutize(base)?);
    let candidate = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    };

    if !candidate.starts_with(&base) {
        return Err(GuardError::PathRejected(
            "path escapes its base directory".to_string(),
        ));
    }
    Ok(candidate)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| GuardError::PathRejected(format!("cannot resolve working directory: {}", e)))?;
    Ok(cwd.join(path))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Drop linker-injection variables and mask credential-like values
pub fn sanitize_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    strip_injection_vars(env)
        .into_iter()
        .map(|(key, value)| {
            if is_credential_key(&key) {
                (key, MASKED_VALUE.to_string())
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Drop linker-injection variables only; values are passed through untouched
pub fn strip_injection_vars(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .filter(|(key, _)| !is_injection_var(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn is_injection_var(key: &str) -> bool {
    INJECTION_ENV_VARS.iter().any(|v| v.eq_ignore_ascii_case(key))
}

pub fn is_credential_key(key: &str) -> bool {
    CREDENTIAL_KEY.is_match(key)
}

/// Replace file paths, IPv4 addresses and ports before a message is logged or surfaced
pub fn redact_sensitive(message: &str) -> String {
    let redacted = IPV4.replace_all(message, "[ip]");
    let redacted = PORT.replace_all(&redacted, ":[port]");
    ABSOLUTE_PATH.replace_all(&redacted, "[path]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_args_strips_metacharacters_and_traversal() {
        let args = vec![
            "hello; rm".to_string(),
            "../../etc/passwd".to_string(),
            "/var/../../tmp".to_string(),
            "$(whoami)".to_string(),
            "plain".to_string(),
        ];
        assert_eq!(
            sanitize_args(&args),
            vec![
                "hello rm".to_string(),
                "etc/passwd".to_string(),
                "/var/tmp".to_string(),
                "whoami".to_string(),
                "plain".to_string(),
            ]
        );
    }

    #[test]
    fn test_validate_path_inside_base() {
        let base = Path::new("/srv/project");
        assert_eq!(
            validate_path("src/./main.rs", base).unwrap(),
            PathBuf::from("/srv/project/src/main.rs")
        );
        assert_eq!(
            validate_path("/srv/project/a/../b", base).unwrap(),
            PathBuf::from("/srv/project/b")
        );
    }

    #[test]
    fn test_validate_path_rejects_escape_and_nul() {
        let base = Path::new("/srv/project");
        assert!(validate_path("../other", base).is_err());
        assert!(validate_path("/etc/passwd", base).is_err());
        assert!(validate_path("a/../../..", base).is_err());
        assert!(validate_path("bad\0name", base).is_err());
        // Sibling directory sharing a prefix is still outside
        assert!(validate_path("/srv/project-evil/x", base).is_err());
    }

    #[test]
    fn test_sanitize_env() {
        let mut env = BTreeMap::new();
        env.insert("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string());
        env.insert("DYLD_INSERT_LIBRARIES".to_string(), "x".to_string());
        env.insert("GITHUB_TOKEN".to_string(), "ghp_123".to_string());
        env.insert("db_password".to_string(), "hunter2".to_string());
        env.insert("PATH".to_string(), "/usr/bin".to_string());

        let sanitized = sanitize_env(&env);
        assert!(!sanitized.contains_key("LD_PRELOAD"));
        assert!(!sanitized.contains_key("DYLD_INSERT_LIBRARIES"));
        assert_eq!(sanitized["GITHUB_TOKEN"], MASKED_VALUE);
        assert_eq!(sanitized["db_password"], MASKED_VALUE);
        assert_eq!(sanitized["PATH"], "/usr/bin");

        let stripped = strip_injection_vars(&env);
        assert_eq!(stripped["GITHUB_TOKEN"], "ghp_123");
        assert!(!stripped.contains_key("LD_PRELOAD"));
    }

    #[test]
    fn test_redact_sensitive() {
        let message = "failed to open /home/alice/.config/app.json from 192.168.1.20:8080";
        let redacted = redact_sensitive(message);
        assert!(!redacted.contains("alice"));
        assert!(!redacted.contains("192.168"));
        assert!(!redacted.contains("8080"));
        assert!(redacted.contains("[path]"));
        assert!(redacted.contains("[ip]"));
    }
}
