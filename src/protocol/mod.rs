//! Request markers shared by every provider conversation.
//!
//! A wrapped prompt starts with an anchor line (`CCB_REQ_ID: <id>`) and
//! instructs the provider to finish with a done line (`CCB_DONE: <id>`).
//! Reply extraction keys off these two markers; everything here must stay
//! byte-stable because providers echo the lines verbatim.

mod providers;

pub use providers::{
    is_valid_provider, prefix_to_provider, protocol_prefix, provider_names, session_filename,
    spec_for, ProviderSpec, ALL_PROVIDERS,
};

use chrono::Local;
use regex::Regex;
use std::sync::LazyLock;

use crate::textutil::{split_lines, trim_right};

/// Prefix of the anchor line injected at the start of every wrapped prompt.
pub const REQ_ID_PREFIX: &str = "CCB_REQ_ID:";
/// Prefix of the done line the provider is instructed to echo last.
pub const DONE_PREFIX: &str = "CCB_DONE:";

// Matches any *_DONE tag line (e.g. "CODEX_DONE",
// "GEMINI_DONE: 20260125-143000-123-12345").
static GENERIC_DONE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[A-Z][A-Z0-9_]*_DONE(?:\s*:\s*\d{8}-\d{6}-\d{3}-\d+)?\s*$")
        .expect("invalid generic done-tag regex")
});

static CCB_DONE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*CCB_DONE\s*:").expect("invalid done-prefix regex"));

static ANY_CCB_DONE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*CCB_DONE:\s*\d{8}-\d{6}-\d{3}-\d+\s*$").expect("invalid done-line regex")
});

/// Generate a unique request ID with datetime-PID format.
///
/// Format: `YYYYMMDD-HHMMSS-mmm-PID` (e.g. `20260125-143000-123-12345`).
pub fn make_req_id() -> String {
    let now = Local::now();
    format!(
        "{}-{:03}-{}",
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_millis(),
        std::process::id()
    )
}

/// Compiled matcher for the `CCB_DONE` line of a specific request.
pub fn done_line_re(req_id: &str) -> Regex {
    let escaped = regex::escape(req_id);
    Regex::new(&format!(r"^\s*CCB_DONE:\s*{escaped}\s*$")).expect("invalid done matcher")
}

/// Wrap a message with the anchor and done-marker instructions.
///
/// The same wrapping is used for every provider; only the transport differs.
pub fn wrap_prompt(message: &str, req_id: &str) -> String {
    let message = trim_right(message);
    format!(
        "{REQ_ID_PREFIX} {req_id}\n\n{message}\n\nIMPORTANT:\n\
         - Reply normally.\n\
         - Reply normally, in English.\n\
         - End your reply with this exact final line (verbatim, on its own line):\n\
         {DONE_PREFIX} {req_id}\n"
    )
}

// A generic *_DONE tag that is NOT a CCB_DONE line. Several provider CLIs
// print their own completion tags into the pane; those must never be
// mistaken for the bridge's marker.
fn is_generic_done_tag(line: &str) -> bool {
    GENERIC_DONE_TAG_RE.is_match(line) && !CCB_DONE_PREFIX_RE.is_match(line)
}

// Trailing noise = blank line or a foreign *_DONE tag.
fn is_trailing_noise_line(line: &str) -> bool {
    line.trim().is_empty() || is_generic_done_tag(line)
}

/// True iff `text` ends (modulo trailing noise) with the `CCB_DONE` line for
/// `req_id`.
pub fn is_done(text: &str, req_id: &str) -> bool {
    let re = done_line_re(req_id);
    let lines = split_lines(text);
    for line in lines.iter().rev() {
        if is_trailing_noise_line(line) {
            continue;
        }
        return re.is_match(line);
    }
    false
}

/// Remove the `CCB_DONE` marker for `req_id` and surrounding trailing noise.
pub fn strip_done(text: &str, req_id: &str) -> String {
    let mut lines = split_lines(text);
    if lines.is_empty() {
        return String::new();
    }

    while lines.last().is_some_and(|l| is_trailing_noise_line(l)) {
        lines.pop();
    }

    let re = done_line_re(req_id);
    if lines.last().is_some_and(|l| re.is_match(l)) {
        lines.pop();
    }

    while lines.last().is_some_and(|l| is_trailing_noise_line(l)) {
        lines.pop();
    }

    trim_right(&lines.join("\n")).to_string()
}

/// Remove trailing marker lines for display commands (e.g. `pend`), where we
/// want a clean view regardless of which request produced the reply.
pub fn strip_trailing_markers(text: &str) -> String {
    let mut lines = split_lines(text);
    while let Some(last) = lines.last() {
        if is_trailing_noise_line(last) || ANY_CCB_DONE_LINE_RE.is_match(last) {
            lines.pop();
            continue;
        }
        break;
    }
    trim_right(&lines.join("\n")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQ: &str = "20250101-000000-000-1000";

    #[test]
    fn req_id_has_datetime_pid_shape() {
        let id = make_req_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4, "got: {id}");
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 3);
        assert_eq!(parts[3], std::process::id().to_string());
    }

    #[test]
    fn wrap_prompt_has_anchor_first_and_done_last() {
        let wrapped = wrap_prompt("what is 6*7", REQ);
        let lines: Vec<&str> = wrapped.lines().collect();
        assert_eq!(lines[0], format!("CCB_REQ_ID: {REQ}"));
        assert_eq!(*lines.last().unwrap(), format!("CCB_DONE: {REQ}"));
        assert!(wrapped.contains("what is 6*7"));
    }

    #[test]
    fn wrap_prompt_trims_trailing_whitespace() {
        let wrapped = wrap_prompt("hello  \n\n", REQ);
        assert!(wrapped.contains("hello\n\nIMPORTANT:"));
    }

    #[test]
    fn is_done_detects_final_marker() {
        let text = format!("reply body\nCCB_DONE: {REQ}");
        assert!(is_done(&text, REQ));
        assert!(!is_done("reply body", REQ));
        assert!(!is_done(&text, "20250101-000000-000-9999"));
    }

    #[test]
    fn is_done_skips_blank_tail() {
        let text = format!("42\nCCB_DONE: {REQ}\n\n  \n");
        assert!(is_done(&text, REQ));
    }

    // Foreign *_DONE tags below the marker are pane noise, not content.
    #[test]
    fn is_done_ignores_generic_done_tags() {
        let text = format!("42\nCCB_DONE: {REQ}\nCODEX_DONE\nGEMINI_DONE: {REQ}");
        assert!(is_done(&text, REQ));
        // A generic tag alone is not the marker.
        assert!(!is_done("42\nCODEX_DONE", REQ));
    }

    #[test]
    fn strip_done_removes_marker_and_noise() {
        let text = format!("42\n\nCCB_DONE: {REQ}\nCODEX_DONE\n");
        assert_eq!(strip_done(&text, REQ), "42");
    }

    #[test]
    fn strip_done_preserves_interior_content() {
        let text = format!("line one\n\nline two\nCCB_DONE: {REQ}");
        assert_eq!(strip_done(&text, REQ), "line one\n\nline two");
    }

    // Inserting and removing a done marker is a left inverse on wrapped
    // form: only the echoed marker goes away, the instruction block stays.
    #[test]
    fn strip_done_inverts_wrap_plus_marker() {
        let wrapped = wrap_prompt("the body", REQ);
        let echoed = format!("{wrapped}\nCCB_DONE: {REQ}");
        let stripped = strip_done(&echoed, REQ);
        assert_eq!(stripped, crate::textutil::trim_right(&wrapped));
        assert!(stripped.contains("the body"));
    }

    #[test]
    fn strip_trailing_markers_removes_any_done_line() {
        let text = format!("answer\nCCB_DONE: {REQ}\n\nCLAUDE_DONE");
        assert_eq!(strip_trailing_markers(&text), "answer");
        assert_eq!(strip_trailing_markers("plain reply"), "plain reply");
    }

    #[test]
    fn strip_trailing_markers_keeps_interior_marker() {
        let text = format!("before\nCCB_DONE: {REQ}\nafter");
        assert_eq!(strip_trailing_markers(&text), text);
    }
}
