//! Chunked backward file scanning for efficient tail reads of large logs.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Reads a file from the end toward the beginning in chunks.
#[derive(Debug)]
pub struct ReverseReader {
    path: PathBuf,
    pub chunk_size: usize,
}

impl ReverseReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last `n` lines, returned in forward order (oldest first).
    pub fn read_last_lines(&self, n: usize) -> std::io::Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut f = File::open(&self.path)?;
        let file_size = f.metadata()?.len();
        if file_size == 0 {
            return Ok(Vec::new());
        }

        let chunk_size = self.chunk_size.max(1) as u64;
        let mut collected: Vec<String> = Vec::new();
        let mut pos = file_size;
        // Partial first token of a chunk taken mid-line; reattached to the
        // next backward chunk.
        let mut leftover: Vec<u8> = Vec::new();

        while pos > 0 && collected.len() < n + 1 {
            let read_size = chunk_size.min(pos);
            pos -= read_size;

            let mut buf = vec![0u8; read_size as usize];
            f.seek(SeekFrom::Start(pos))?;
            f.read_exact(&mut buf)?;

            buf.extend_from_slice(&leftover);
            leftover.clear();

            let mut parts: Vec<&[u8]> = buf.split(|&b| b == b'\n').collect();
            if pos > 0 {
                leftover = parts.remove(0).to_vec();
            }

            for part in parts.into_iter().rev() {
                collected.push(decode_line(part));
            }
        }

        if !leftover.is_empty() {
            collected.push(decode_line(&leftover));
        }

        // Lines were gathered newest-first.
        collected.reverse();

        while collected.last().is_some_and(|l| l.is_empty()) {
            collected.pop();
        }
        if collected.len() > n {
            collected.drain(..collected.len() - n);
        }
        Ok(collected)
    }

    /// Search backward for the last line matching the predicate.
    ///
    /// Returns the line and its 0-based index in the whole file, or `None`
    /// when nothing matches. The backward scan stops at the first hit; the
    /// index is then computed with one forward pass.
    pub fn find_last<P>(&self, predicate: P) -> std::io::Result<Option<(String, usize)>>
    where
        P: Fn(&str) -> bool,
    {
        let mut f = File::open(&self.path)?;
        let file_size = f.metadata()?.len();
        if file_size == 0 {
            return Ok(None);
        }

        let chunk_size = self.chunk_size.max(1) as u64;
        let mut pos = file_size;
        let mut leftover: Vec<u8> = Vec::new();

        while pos > 0 {
            let read_size = chunk_size.min(pos);
            pos -= read_size;

            let mut buf = vec![0u8; read_size as usize];
            f.seek(SeekFrom::Start(pos))?;
            f.read_exact(&mut buf)?;

            buf.extend_from_slice(&leftover);
            leftover.clear();

            let mut parts: Vec<&[u8]> = buf.split(|&b| b == b'\n').collect();
            if pos > 0 {
                leftover = parts.remove(0).to_vec();
            }

            for part in parts.iter().rev() {
                let line = decode_line(part);
                if predicate(&line) {
                    return Ok(self.index_of_last_match(&predicate)?);
                }
            }
        }

        if !leftover.is_empty() {
            let line = decode_line(&leftover);
            if predicate(&line) {
                return Ok(Some((line, 0)));
            }
        }

        Ok(None)
    }

    // One forward pass to attach a line index to a known-present match.
    fn index_of_last_match<P>(&self, predicate: &P) -> std::io::Result<Option<(String, usize)>>
    where
        P: Fn(&str) -> bool,
    {
        let data = std::fs::read(&self.path)?;
        let mut lines: Vec<String> = data
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        for (idx, line) in lines.iter().enumerate().rev() {
            if predicate(line) {
                return Ok(Some((line.clone(), idx)));
            }
        }
        Ok(None)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = match bytes.last() {
        Some(b'\r') => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    fn numbered_file(tmp: &TestTempDir, count: usize) -> PathBuf {
        let body: String = (0..count).map(|i| format!("line-{i}\n")).collect();
        tmp.write_text("rev.log", &body)
    }

    #[test]
    fn last_lines_come_back_in_forward_order() {
        let tmp = TestTempDir::new("reverse");
        let path = numbered_file(&tmp, 10);
        let reader = ReverseReader::new(&path);
        assert_eq!(
            reader.read_last_lines(3).unwrap(),
            vec!["line-7", "line-8", "line-9"]
        );
    }

    #[test]
    fn short_files_return_everything() {
        let tmp = TestTempDir::new("reverse");
        let path = numbered_file(&tmp, 2);
        let reader = ReverseReader::new(&path);
        assert_eq!(reader.read_last_lines(50).unwrap(), vec!["line-0", "line-1"]);
    }

    // The tail must be identical no matter how the chunk boundary lands.
    #[test]
    fn result_is_chunk_size_independent() {
        let tmp = TestTempDir::new("reverse");
        let path = numbered_file(&tmp, 40);
        let baseline = ReverseReader::with_chunk_size(&path, 4096)
            .read_last_lines(15)
            .unwrap();
        for chunk in [1usize, 2, 3, 7, 16, 64] {
            let got = ReverseReader::with_chunk_size(&path, chunk)
                .read_last_lines(15)
                .unwrap();
            assert_eq!(got, baseline, "chunk size {chunk} diverged");
        }
    }

    #[test]
    fn empty_and_zero_requests_yield_nothing() {
        let tmp = TestTempDir::new("reverse");
        let path = tmp.write_text("rev.log", "");
        let reader = ReverseReader::new(&path);
        assert!(reader.read_last_lines(5).unwrap().is_empty());
        let path = numbered_file(&tmp, 3);
        assert!(ReverseReader::new(&path).read_last_lines(0).unwrap().is_empty());
    }

    #[test]
    fn missing_trailing_newline_is_a_line() {
        let tmp = TestTempDir::new("reverse");
        let path = tmp.write_text("rev.log", "a\nb\nlast-no-newline");
        let reader = ReverseReader::with_chunk_size(&path, 4);
        assert_eq!(
            reader.read_last_lines(2).unwrap(),
            vec!["b", "last-no-newline"]
        );
    }

    #[test]
    fn find_last_reports_line_and_index() {
        let tmp = TestTempDir::new("reverse");
        let path = tmp.write_text("rev.log", "x\nmark one\ny\nmark two\nz\n");
        let reader = ReverseReader::with_chunk_size(&path, 6);
        let (line, idx) = reader
            .find_last(|l| l.starts_with("mark"))
            .unwrap()
            .expect("must find a mark");
        assert_eq!(line, "mark two");
        assert_eq!(idx, 3);
    }

    #[test]
    fn find_last_returns_none_without_match() {
        let tmp = TestTempDir::new("reverse");
        let path = numbered_file(&tmp, 5);
        let reader = ReverseReader::new(&path);
        assert!(reader.find_last(|l| l.contains("absent")).unwrap().is_none());
    }

    #[test]
    fn find_last_matches_first_file_line() {
        let tmp = TestTempDir::new("reverse");
        let path = tmp.write_text("rev.log", "needle\nplain\n");
        let reader = ReverseReader::with_chunk_size(&path, 3);
        let (line, idx) = reader
            .find_last(|l| l == "needle")
            .unwrap()
            .expect("must find the first line");
        assert_eq!(line, "needle");
        assert_eq!(idx, 0);
    }
}
