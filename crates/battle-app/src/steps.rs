//! `--step kind:value` parsing and execution

use anyhow::Result;
use battle_terminal::{Key, Session};
use std::time::Duration;

/// One scripted interaction with the program under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Wait for literal text
    Expect(String),
    /// Wait for a regular expression
    Regex(String),
    /// Type text with key notation expanded
    Send(String),
    Key(Key),
    Wait(Duration),
    Resize { cols: u16, rows: u16 },
    Screenshot(String),
}

impl std::str::FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| format!("step '{}' must look like kind:value", s))?;

        let step = match kind.trim().to_lowercase().as_str() {
            "expect" => Self::Expect(value.to_string()),
            "regex" => {
                battle_terminal::Pattern::regex(value).map_err(|e| e.to_string())?;
                Self::Regex(value.to_string())
            }
            "send" => Self::Send(value.to_string()),
            "key" => Self::Key(value.parse::<Key>().map_err(|e| e.to_string())?),
            "wait" => Self::Wait(parse_duration(value)?),
            "resize" => {
                let (cols, rows) = value
                    .split_once(['x', 'X'])
                    .ok_or_else(|| format!("resize needs COLSxROWS, got '{}'", value))?;
                let cols = cols.trim().parse::<u16>().map_err(|e| format!("cols: {}", e))?;
                let rows = rows.trim().parse::<u16>().map_err(|e| format!("rows: {}", e))?;
                if cols == 0 || rows == 0 {
                    return Err("resize dimensions must be non-zero".to_string());
                }
                Self::Resize { cols, rows }
            }
            "screenshot" => Self::Screenshot(value.to_string()),
            other => {
                return Err(format!(
                    "unknown step kind '{}' (expected expect, regex, send, key, wait, resize or screenshot)",
                    other
                ))
            }
        };
        Ok(step)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expect(text) => write!(f, "expect {:?}", text),
            Self::Regex(pattern) => write!(f, "expect /{}/", pattern),
            Self::Send(text) => write!(f, "send {:?}", text),
            Self::Key(key) => write!(f, "key {}", key),
            Self::Wait(duration) => write!(f, "wait {}ms", duration.as_millis()),
            Self::Resize { cols, rows } => write!(f, "resize {}x{}", cols, rows),
            Self::Screenshot(name) => write!(f, "screenshot {}", name),
        }
    }
}

/// `250`, `250ms`, `2s`
fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    let parsed = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs)
    } else {
        value.parse::<u64>().map(Duration::from_millis)
    };
    parsed.map_err(|_| format!("invalid duration '{}'", value))
}

impl Step {
    pub async fn execute(&self, session: &mut Session, expect_timeout: Duration) -> Result<()> {
        match self {
            Self::Expect(text) => session.expect(text.as_str(), expect_timeout).await?,
            Self::Regex(pattern) => session.expect_regex(pattern, expect_timeout).await?,
            Self::Send(text) => session.send_keys(text)?,
            Self::Key(key) => session.press(*key)?,
            Self::Wait(duration) => session.wait(*duration).await,
            Self::Resize { cols, rows } => session.resize(*cols, *rows)?,
            Self::Screenshot(name) => {
                let shot = session.screenshot(name)?;
                tracing::info!(path = %shot.html_path.display(), "Screenshot saved");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_steps() {
        assert_eq!("expect:Hello: world".parse::<Step>().unwrap(), Step::Expect("Hello: world".into()));
        assert_eq!("send:ls[ENTER]".parse::<Step>().unwrap(), Step::Send("ls[ENTER]".into()));
        assert_eq!("key:ctrl+c".parse::<Step>().unwrap(), Step::Key(Key::Ctrl('C')));
        assert_eq!("wait:2s".parse::<Step>().unwrap(), Step::Wait(Duration::from_secs(2)));
        assert_eq!("wait:150".parse::<Step>().unwrap(), Step::Wait(Duration::from_millis(150)));
        assert_eq!(
            "resize:120x40".parse::<Step>().unwrap(),
            Step::Resize { cols: 120, rows: 40 }
        );
        assert_eq!("regex:v\\d+".parse::<Step>().unwrap(), Step::Regex("v\\d+".into()));
    }

    #[test]
    fn test_reject_bad_steps() {
        assert!("expect".parse::<Step>().is_err());
        assert!("click:ok".parse::<Step>().is_err());
        assert!("regex:(".parse::<Step>().is_err());
        assert!("resize:0x10".parse::<Step>().is_err());
        assert!("wait:soon".parse::<Step>().is_err());
        assert!("key:hyper+q".parse::<Step>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Step::Expect("ok".into()).to_string(), "expect \"ok\"");
        assert_eq!(Step::Key(Key::Enter).to_string(), "key enter");
    }
}
