//! Screenshot artifacts: raw, plain-text and HTML renditions of captured output

use battle_replay::{ansi_to_html, html::escape_html};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::buffer::strip_ansi;
use crate::error::Result;

/// Paths of the three files written for one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub name: String,
    pub ansi_path: PathBuf,
    pub text_path: PathBuf,
    pub html_path: PathBuf,
}

/// Restrict a capture name to characters that are safe in a file name
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "screenshot".to_string()
    } else {
        cleaned
    }
}

/// Write `<name>.ansi`, `<name>.txt` and `<name>.html` under `dir`
pub fn capture(dir: &Path, name: &str, raw: &str) -> Result<Screenshot> {
    fs::create_dir_all(dir)?;
    let name = sanitize_name(name);

    let ansi_path = dir.join(format!("{}.ansi", name));
    let text_path = dir.join(format!("{}.txt", name));
    let html_path = dir.join(format!("{}.html", name));

    fs::write(&ansi_path, raw)?;
    fs::write(&text_path, strip_ansi(raw))?;
    fs::write(&html_path, html_page(&name, raw))?;

    info!(name = %name, dir = %dir.display(), "Screenshot captured");
    Ok(Screenshot {
        name,
        ansi_path,
        text_path,
        html_path,
    })
}

fn html_page(name: &str, raw: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n\
         <style>body {{ background: #1e1e1e; color: #d4d4d4; }} \
         pre {{ font-family: monospace; line-height: 1.2; }}</style>\n</head>\n\
         <body>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape_html(name),
        ansi_to_html(raw)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("after login"), "after_login");
        assert_eq!(sanitize_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_name("   "), "screenshot");
    }

    #[test]
    fn test_capture_writes_three_files() {
        let dir = TempDir::new().unwrap();
        let shot = capture(dir.path(), "menu", "\x1b[31mred\x1b[0m <ok>").unwrap();

        assert_eq!(fs::read_to_string(&shot.ansi_path).unwrap(), "\x1b[31mred\x1b[0m <ok>");
        assert_eq!(fs::read_to_string(&shot.text_path).unwrap(), "red <ok>");
        let html = fs::read_to_string(&shot.html_path).unwrap();
        assert!(html.contains("<span style=\"color:#cd3131;\">red</span> &lt;ok&gt;"));
        assert_eq!(shot.text_path, dir.path().join("menu.txt"));
    }
}
