//! HTML rendering of terminal output
//!
//! `ansi_to_html` converts a raw byte stream's SGR colors into inline-styled
//! spans; `screen_to_html` renders an emulated vt100 screen cell by cell.

use std::fmt::Write as _;

const BASE_COLORS: [&str; 16] = [
    "#000000", "#cd3131", "#0dbc79", "#e5e510", "#2472c8", "#bc3fbc", "#11a8cd", "#e5e5e5",
    "#666666", "#f14c4c", "#23d18b", "#f5f543", "#3b8eea", "#d670d6", "#29b8db", "#ffffff",
];

/// CSS color for an xterm 256-color palette index
pub fn palette_color(index: u8) -> String {
    match index {
        0..=15 => BASE_COLORS[index as usize].to_string(),
        16..=231 => {
            let i = index - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
            format!(
                "#{:02x}{:02x}{:02x}",
                level(i / 36),
                level((i / 6) % 6),
                level(i % 6)
            )
        }
        232..=255 => {
            let gray = 8 + (index - 232) * 10;
            format!("#{:02x}{:02x}{:02x}", gray, gray, gray)
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Style {
    fg: Option<String>,
    bg: Option<String>,
    bold: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

impl Style {
    fn css(&self) -> String {
        let (fg, bg) = if self.inverse {
            (
                Some(self.bg.clone().unwrap_or_else(|| "#1e1e1e".to_string())),
                Some(self.fg.clone().unwrap_or_else(|| "#d4d4d4".to_string())),
            )
        } else {
            (self.fg.clone(), self.bg.clone())
        };

        let mut css = String::new();
        if let Some(fg) = fg {
            let _ = write!(css, "color:{};", fg);
        }
        if let Some(bg) = bg {
            let _ = write!(css, "background-color:{};", bg);
        }
        if self.bold {
            css.push_str("font-weight:bold;");
        }
        if self.italic {
            css.push_str("font-style:italic;");
        }
        if self.underline {
            css.push_str("text-decoration:underline;");
        }
        css
    }

    fn apply_sgr(&mut self, params: &str) {
        let codes: Vec<u16> = if params.is_empty() {
            vec![0]
        } else {
            params
                .split(';')
                .map(|p| p.parse().unwrap_or(0))
                .collect()
        };

        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                0 => *self = Style::default(),
                1 => self.bold = true,
                3 => self.italic = true,
                4 => self.underline = true,
                7 => self.inverse = true,
                22 => self.bold = false,
                23 => self.italic = false,
                24 => self.underline = false,
                27 => self.inverse = false,
                code @ 30..=37 => self.fg = Some(palette_color((code - 30) as u8)),
                code @ 90..=97 => self.fg = Some(palette_color((code - 90 + 8) as u8)),
                code @ 40..=47 => self.bg = Some(palette_color((code - 40) as u8)),
                code @ 100..=107 => self.bg = Some(palette_color((code - 100 + 8) as u8)),
                39 => self.fg = None,
                49 => self.bg = None,
                code @ (38 | 48) => {
                    let (color, consumed) = extended_color(&codes[i + 1..]);
                    if code == 38 {
                        self.fg = color.or(self.fg.take());
                    } else {
                        self.bg = color.or(self.bg.take());
                    }
                    i += consumed;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// Parses `5;n` or `2;r;g;b`; returns the color and how many codes it used
fn extended_color(rest: &[u16]) -> (Option<String>, usize) {
    match rest {
        [5, n, ..] => (Some(palette_color((*n).min(255) as u8)), 2),
        [2, r, g, b, ..] => (
            Some(format!(
                "#{:02x}{:02x}{:02x}",
                (*r).min(255),
                (*g).min(255),
                (*b).min(255)
            )),
            4,
        ),
        _ => (None, rest.len()),
    }
}

fn push_run(out: &mut String, style: &Style, text: &str) {
    if text.is_empty() {
        return;
    }
    let css = style.css();
    if css.is_empty() {
        out.push_str(&escape_html(text));
    } else {
        let _ = write!(out, "<span style=\"{}\">{}</span>", css, escape_html(text));
    }
}

/// Convert text with ANSI escapes into HTML with inline color spans.
///
/// SGR sequences become styles; every other escape sequence is dropped.
pub fn ansi_to_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut style = Style::default();
    let mut run = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if c != '\r' {
                run.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                let mut params = String::new();
                let mut terminator = None;
                for next in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&next) {
                        terminator = Some(next);
                        break;
                    }
                    params.push(next);
                }
                if terminator == Some('m') {
                    push_run(&mut out, &style, &run);
                    run.clear();
                    style.apply_sgr(&params);
                }
            }
            Some(']') => {
                // OSC, terminated by BEL or ESC \
                chars.next();
                while let Some(next) = chars.next() {
                    if next == '\x07' {
                        break;
                    }
                    if next == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }

    push_run(&mut out, &style, &run);
    out
}

fn vt_color(color: vt100::Color) -> Option<String> {
    match color {
        vt100::Color::Default => None,
        vt100::Color::Idx(i) => Some(palette_color(i)),
        vt100::Color::Rgb(r, g, b) => Some(format!("#{:02x}{:02x}{:02x}", r, g, b)),
    }
}

/// Render the visible vt100 screen as rows of styled spans
pub fn screen_to_html(screen: &vt100::Screen) -> String {
    let (rows, cols) = screen.size();
    let mut out = String::new();

    for row in 0..rows {
        let mut style = Style::default();
        let mut run = String::new();
        let mut line = String::new();

        for col in 0..cols {
            let Some(cell) = screen.cell(row, col) else {
                continue;
            };
            if cell.is_wide_continuation() {
                continue;
            }

            let cell_style = Style {
                fg: vt_color(cell.fgcolor()),
                bg: vt_color(cell.bgcolor()),
                bold: cell.bold(),
                italic: cell.italic(),
                underline: cell.underline(),
                inverse: cell.inverse(),
            };
            if cell_style != style {
                push_run(&mut line, &style, &run);
                run.clear();
                style = cell_style;
            }

            let contents = cell.contents();
            if contents.is_empty() {
                run.push(' ');
            } else {
                run.push_str(&contents);
            }
        }

        if style == Style::default() {
            run.truncate(run.trim_end().len());
        }
        push_run(&mut line, &style, &run);
        out.push_str(&line);
        if row + 1 < rows {
            out.push('\n');
        }
    }
    out
}
