use vt100::Parser;

use super::DEFAULT_SCROLLBACK_LINES;

/// Emulated terminal screen fed with the same output as the buffer
pub struct ScreenBuffer {
    parser: Parser,
    cols: u16,
    rows: u16,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16) -> Self {
        let (cols, rows) = (cols.max(1), rows.max(1));
        Self {
            parser: Parser::new(rows, cols, DEFAULT_SCROLLBACK_LINES),
            cols,
            rows,
        }
    }

    /// Feed output to the VT100 parser
    pub fn process_output(&mut self, data: &str) {
        self.parser.process(data.as_bytes());
    }

    /// Visible screen as text, or with ANSI attributes when `include_colors`
    pub fn contents(&self, include_colors: bool) -> String {
        let screen = self.parser.screen();
        if include_colors {
            String::from_utf8_lossy(&screen.contents_formatted()).to_string()
        } else {
            screen.contents()
        }
    }

    /// Get cursor position (row, col)
    pub fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    /// Get terminal size (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Resize in place, keeping what is on screen
    pub fn resize(&mut self, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        self.parser.set_size(rows, cols);
    }

    pub fn reset(&mut self) {
        self.parser = Parser::new(self.rows, self.cols, DEFAULT_SCROLLBACK_LINES);
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }
}

impl std::fmt::Debug for ScreenBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenBuffer")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .finish()
    }
}
