//! Shared text helpers for log parsing and display.

use regex::Regex;
use std::sync::LazyLock;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("invalid ANSI regex"));

/// Remove ANSI escape codes from a string.
pub fn strip_ansi(s: &str) -> String {
    ANSI_RE.replace_all(s, "").into_owned()
}

/// Split text into lines with trailing `\r` stripped from each line.
///
/// Empty input yields no lines.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n')
        .map(|l| l.trim_end_matches(['\r', '\n']).to_string())
        .collect()
}

/// Drop trailing empty lines (the artifact of a final `\n`).
pub fn trim_trailing_empty(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
}

/// Right-trim line-join output of whitespace and line terminators.
pub fn trim_right(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r', '\t', ' '])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m text"), "red text");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn split_lines_strips_carriage_returns() {
        assert_eq!(split_lines("a\r\nb\nc"), vec!["a", "b", "c"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn split_lines_keeps_internal_blanks() {
        assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn trim_trailing_empty_removes_only_tail() {
        let mut lines = vec!["a".to_string(), String::new(), "b".to_string(), String::new()];
        trim_trailing_empty(&mut lines);
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn trim_right_removes_mixed_whitespace() {
        assert_eq!(trim_right("body \n\r\t "), "body");
    }
}
