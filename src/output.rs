//! Output capture and sanitization for process logs.
//!
//! This module provides the append-only text buffer each process writes into
//! (`OutputBuffer`) and the helpers that clean raw terminal output before it is
//! stored or displayed.

use std::sync::OnceLock;

use regex::Regex;
use strip_ansi_escapes::strip;

/// Growing text buffer holding everything a process printed.
///
/// Between calls to [`OutputBuffer::clear`] or [`OutputBuffer::reset`] the
/// content only ever grows.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    text: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one line of output followed by a line break.
    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    /// Appends a supervisor marker on its own line, separated from the output.
    pub fn push_marker(&mut self, marker: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push('\n');
        self.text.push_str(marker);
        self.text.push('\n');
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Replaces the whole buffer with `marker`.
    pub fn reset(&mut self, marker: &str) {
        self.text.clear();
        self.text.push_str(marker);
        self.text.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

}

fn cursor_controls() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Erase-in-line (CSI K), cursor to first column (CSI G), raw CR and BS.
    RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-2]?K|\x1b\[[01]?G|[\r\x08]").expect("cursor control pattern")
    })
}

/// Removes control sequences that would corrupt a line-oriented text view.
///
/// Colors and other SGR sequences are left in place.
pub fn sanitize_line(line: &str) -> String {
    cursor_controls().replace_all(line, "").into_owned()
}

/// Strips every ANSI escape sequence for plain display. Invalid UTF-8 is replaced.
pub fn strip_ansi(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_line_clears_and_carriage_returns() {
        assert_eq!(sanitize_line("\x1b[2K\rbuilding 40%"), "building 40%");
        assert_eq!(sanitize_line("a\x1b[Kb\x1b[0Kc\x1b[1K"), "abc");
        assert_eq!(sanitize_line("\x1b[Gx\x1b[1Gy\x1b[0G"), "xy");
        assert_eq!(sanitize_line("ab\x08c\r"), "abc");
    }

    #[test]
    fn sanitize_keeps_colors_and_other_moves() {
        let colored = "\x1b[31mred\x1b[0m";
        assert_eq!(sanitize_line(colored), colored);
        assert_eq!(sanitize_line("\x1b[5Gcol"), "\x1b[5Gcol");
    }

    #[test]
    fn strip_ansi_removes_sgr() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[0m done"), "ok done");
    }

    #[test]
    fn buffer_grows_until_cleared() {
        let mut buffer = OutputBuffer::new();
        buffer.push_line("hello");
        buffer.push_line("world");
        assert_eq!(buffer.as_str(), "hello\nworld\n");
        buffer.clear();
        assert_eq!(buffer.as_str(), "");
    }

    #[test]
    fn markers_sit_on_their_own_line() {
        let mut buffer = OutputBuffer::new();
        buffer.push_line("serving");
        buffer.push_marker("stopping...");
        assert_eq!(buffer.as_str(), "serving\n\nstopping...\n");

        buffer.reset("restarting...");
        assert_eq!(buffer.as_str(), "restarting...\n");
    }
}
