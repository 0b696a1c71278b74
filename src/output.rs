//! CLI output conventions, atomic file writes, and stdin decoding.

use std::fs;
use std::path::Path;

/// Process exit code for success.
pub const EXIT_OK: i32 = 0;
/// Process exit code for configuration/IO failures.
pub const EXIT_ERROR: i32 = 1;
/// Process exit code for timeouts, pane death, or an empty `pend`.
pub const EXIT_NO_REPLY: i32 = 2;

/// Write content to a file atomically via temp file + rename.
pub fn atomic_write_text(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let tmp = dir.join(format!(".{base}.tmp"));

    if let Err(e) = fs::write(&tmp, content) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Join message parts with spaces and trim the result.
pub fn normalize_message_parts(parts: &[String]) -> String {
    parts.join(" ").trim().to_string()
}

/// Decode raw stdin bytes robustly, handling BOMs and encoding overrides.
///
/// UTF-8 and UTF-16 LE/BE byte-order marks win over everything; otherwise
/// `CCB_STDIN_ENCODING` may force an encoding name (only `utf-8` variants are
/// honored; anything else falls back to lossy UTF-8).
pub fn decode_stdin_bytes(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    if data.len() >= 3 && data[0] == 0xEF && data[1] == 0xBB && data[2] == 0xBF {
        return String::from_utf8_lossy(&data[3..]).into_owned();
    }
    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xFE {
        return decode_utf16_le(&data[2..]);
    }
    if data.len() >= 2 && data[0] == 0xFE && data[1] == 0xFF {
        return decode_utf16_be(&data[2..]);
    }

    // A forced override can only pick UTF-8 today; other names are a
    // best-effort lossy decode, matching historical behavior.
    let _forced = std::env::var("CCB_STDIN_ENCODING").unwrap_or_default();
    String::from_utf8_lossy(data).into_owned()
}

fn decode_utf16_le(data: &[u8]) -> String {
    let data = &data[..data.len() - data.len() % 2];
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_utf16_be(data: &[u8]) -> String {
    let data = &data[..data.len() - data.len() % 2];
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Print a formatted error message to stderr.
pub fn errorf(msg: &str) {
    eprintln!("{msg}");
}
