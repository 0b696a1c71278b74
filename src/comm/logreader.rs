//! Incremental forward log reading with offset tracking and a carry buffer.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct ReaderState {
    /// Current read position.
    offset: u64,
    /// Incomplete line from the last read.
    carry: String,
}

/// Incremental file reader safe for concurrent use.
///
/// Each `read_new` call returns only lines appended since the previous call;
/// a trailing partial line is buffered and completed by a later read. File
/// truncation (`size < offset`) resets the reader.
#[derive(Debug)]
pub struct LogReader {
    path: PathBuf,
    state: Mutex<ReaderState>,
}

impl LogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(ReaderState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read lines appended since the last call.
    pub fn read_new(&self) -> std::io::Result<Vec<String>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut f = File::open(&self.path)?;
        let size = f.metadata()?.len();

        if size < state.offset {
            state.offset = 0;
            state.carry.clear();
        }
        if size == state.offset {
            return Ok(Vec::new());
        }

        f.seek(SeekFrom::Start(state.offset))?;
        let mut data = String::new();
        let read = f.read_to_string(&mut data)?;
        state.offset += read as u64;

        let text = format!("{}{}", state.carry, data);
        state.carry.clear();

        let mut parts: Vec<&str> = text.split('\n').collect();
        // The element after the final separator is either empty (text ended
        // with \n) or an incomplete line; either way it becomes the carry.
        state.carry = parts.pop().unwrap_or_default().to_string();

        Ok(parts
            .into_iter()
            .map(|p| p.trim_end_matches('\r').to_string())
            .collect())
    }

    /// Read all lines from the file, moving the offset to the end.
    pub fn read_all(&self) -> std::io::Result<Vec<String>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let data = std::fs::read_to_string(&self.path)?;
        state.offset = data.len() as u64;
        state.carry.clear();

        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut lines: Vec<String> = data
            .split('\n')
            .map(|p| p.trim_end_matches('\r').to_string())
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        Ok(lines)
    }

    /// Read the last `n` lines without changing the offset.
    pub fn read_tail(&self, n: usize) -> std::io::Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let f = File::open(&self.path)?;
        let reader = BufReader::new(f);
        let mut all: Vec<String> = Vec::new();
        for line in reader.lines() {
            all.push(line?);
        }
        if all.len() > n {
            all.drain(..all.len() - n);
        }
        Ok(all)
    }

    /// Reset the offset to the beginning of the file.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.offset = 0;
        state.carry.clear();
    }

    /// Move the offset to the current end of the file.
    ///
    /// Subsequent `read_new` calls only return data appended after this
    /// point. A missing file resets to zero rather than erroring.
    pub fn seek_end(&self) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                state.offset = meta.len();
                state.carry.clear();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                state.offset = 0;
                state.carry.clear();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current read offset (for diagnostics).
    pub fn offset(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).offset
    }
}
