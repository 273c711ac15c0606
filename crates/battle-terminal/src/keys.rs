//! Named keys and the byte sequences a terminal expects for them

use crate::error::{Result, TerminalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Tab,
    Backspace,
    Escape,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    /// F1 ..= F12
    F(u8),
    /// Control chord, stored uppercase (`Ctrl('C')` is 0x03)
    Ctrl(char),
    /// Meta chord, sent as ESC followed by the character
    Alt(char),
    Char(char),
}

impl Key {
    /// Exact bytes written to the PTY
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Enter => b"\r".to_vec(),
            Self::Tab => b"\t".to_vec(),
            Self::Backspace => vec![0x7f],
            Self::Escape => vec![0x1b],
            Self::Space => b" ".to_vec(),
            Self::Up => b"\x1b[A".to_vec(),
            Self::Down => b"\x1b[B".to_vec(),
            Self::Right => b"\x1b[C".to_vec(),
            Self::Left => b"\x1b[D".to_vec(),
            Self::Home => b"\x1b[H".to_vec(),
            Self::End => b"\x1b[F".to_vec(),
            Self::PageUp => b"\x1b[5~".to_vec(),
            Self::PageDown => b"\x1b[6~".to_vec(),
            Self::Insert => b"\x1b[2~".to_vec(),
            Self::Delete => b"\x1b[3~".to_vec(),
            Self::F(n) => function_key(*n).as_bytes().to_vec(),
            Self::Ctrl(c) => vec![control_byte(*c).unwrap_or(b'?')],
            Self::Alt(c) => {
                let mut bytes = vec![0x1b];
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                bytes
            }
            Self::Char(c) => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf).as_bytes().to_vec()
            }
        }
    }

    /// Canonical name, as stored in replay `key` events
    pub fn name(&self) -> String {
        match self {
            Self::Enter => "enter".into(),
            Self::Tab => "tab".into(),
            Self::Backspace => "backspace".into(),
            Self::Escape => "escape".into(),
            Self::Space => "space".into(),
            Self::Up => "up".into(),
            Self::Down => "down".into(),
            Self::Left => "left".into(),
            Self::Right => "right".into(),
            Self::Home => "home".into(),
            Self::End => "end".into(),
            Self::PageUp => "pageup".into(),
            Self::PageDown => "pagedown".into(),
            Self::Insert => "insert".into(),
            Self::Delete => "delete".into(),
            Self::F(n) => format!("f{}", n),
            Self::Ctrl(c) => format!("ctrl+{}", c.to_ascii_lowercase()),
            Self::Alt(c) => format!("alt+{}", c),
            Self::Char(c) => c.to_string(),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Key {
    type Err = TerminalError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TerminalError::InvalidPattern(format!("unknown key '{}'", s));

        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(if c == ' ' { Self::Space } else { Self::Char(c) });
        }

        let lower = s.trim().to_lowercase();
        let key = match lower.as_str() {
            "enter" | "return" | "cr" => Self::Enter,
            "tab" => Self::Tab,
            "backspace" | "bs" => Self::Backspace,
            "escape" | "esc" => Self::Escape,
            "space" => Self::Space,
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" | "pgup" => Self::PageUp,
            "pagedown" | "pgdn" => Self::PageDown,
            "insert" | "ins" => Self::Insert,
            "delete" | "del" => Self::Delete,
            other => {
                if let Some(n) = other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=12).contains(&n) {
                        return Ok(Self::F(n));
                    }
                    return Err(invalid());
                }
                let chord = |prefix: &[&str]| {
                    prefix.iter().find_map(|p| other.strip_prefix(p)).and_then(|rest| {
                        let mut chars = rest.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => Some(c),
                            _ => None,
                        }
                    })
                };
                if let Some(c) = chord(&["ctrl+", "ctrl-", "c-", "^"]) {
                    let c = c.to_ascii_uppercase();
                    if control_byte(c).is_none() {
                        return Err(invalid());
                    }
                    Self::Ctrl(c)
                } else if let Some(c) = chord(&["alt+", "alt-", "meta+", "m-"]) {
                    Self::Alt(c)
                } else {
                    return Err(invalid());
                }
            }
        };
        Ok(key)
    }
}

/// Control byte for `^X` notation
fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_uppercase() {
        c @ 'A'..='Z' => Some(c as u8 - b'A' + 1),
        '@' => Some(0x00),
        '[' => Some(0x1b),
        '\\' => Some(0x1c),
        ']' => Some(0x1d),
        '^' => Some(0x1e),
        '_' => Some(0x1f),
        '?' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> &'static str {
    match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        _ => "\x1b[24~",
    }
}

/// Expand inline key notation into bytes.
///
/// `^C` becomes a control byte and bracketed names such as `[ENTER]`, `[UP]`
/// or `[F5]` become their escape sequences. Anything else passes through, so
/// a literal `[` or `^` that does not form a key is kept as typed.
pub fn expand_notation(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        let width = c.len_utf8();
        match c {
            '^' => {
                if let Some(byte) = rest[1..].chars().next().and_then(control_byte) {
                    result.push(byte);
                    rest = &rest[2..];
                    continue;
                }
            }
            '[' => {
                if let Some(end) = rest.find(']') {
                    let name = &rest[1..end];
                    if name.len() > 1 {
                        if let Ok(key) = name.parse::<Key>() {
                            result.extend(key.bytes());
                            rest = &rest[end + 1..];
                            continue;
                        }
                    }
                }
            }
            _ => {}
        }
        let mut buf = [0u8; 4];
        result.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        rest = &rest[width..];
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        assert_eq!("enter".parse::<Key>().unwrap().bytes(), b"\r");
        assert_eq!("UP".parse::<Key>().unwrap().bytes(), b"\x1b[A");
        assert_eq!("f12".parse::<Key>().unwrap().bytes(), b"\x1b[24~");
        assert_eq!("ctrl+c".parse::<Key>().unwrap().bytes(), vec![0x03]);
        assert_eq!("^D".parse::<Key>().unwrap(), Key::Ctrl('D'));
        assert_eq!("alt+x".parse::<Key>().unwrap().bytes(), b"\x1bx");
        assert_eq!("q".parse::<Key>().unwrap(), Key::Char('q'));
        assert_eq!(" ".parse::<Key>().unwrap(), Key::Space);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!("f13".parse::<Key>().is_err());
        assert!("hyper+x".parse::<Key>().is_err());
        assert!("ctrl+1".parse::<Key>().is_err());
    }

    #[test]
    fn test_names_round_trip() {
        for key in [Key::PageDown, Key::F(7), Key::Ctrl('C'), Key::Alt('b'), Key::Backspace] {
            assert_eq!(key.name().parse::<Key>().unwrap(), key);
        }
    }

    #[test]
    fn test_expand_notation() {
        assert_eq!(expand_notation("ls[ENTER]"), b"ls\r");
        assert_eq!(expand_notation("^C"), vec![0x03]);
        assert_eq!(expand_notation("[UP][UP][F1]"), b"\x1b[A\x1b[A\x1bOP");
        assert_eq!(expand_notation("a[1] ^ 2"), b"a[1] ^ 2");
        assert_eq!(expand_notation("héllo^"), "héllo^".as_bytes());
    }
}
