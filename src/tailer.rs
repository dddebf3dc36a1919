use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// How much of the file tail is read per backward step
const CHUNK_SIZE: u64 = 64 * 1024;

/// Read the last `n` complete lines of `path`, oldest first.
///
/// A missing or unreadable file yields an empty vec; whether enough sources
/// were readable overall is the caller's concern. A trailing partial line
/// (no terminating newline) is dropped. Non-UTF-8 bytes are replaced, never
/// a panic.
pub fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Skipping log source {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let len = match file.seek(SeekFrom::End(0)) {
        Ok(l) => l,
        Err(e) => {
            debug!("Cannot seek {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    if len == 0 {
        return Vec::new();
    }

    // Walk backward in chunks until we have seen n newlines (plus the one
    // terminating the last line) or hit the start of the file.
    let mut buf: Vec<u8> = Vec::new();
    let mut pos = len;
    let mut newlines = 0usize;

    while pos > 0 && newlines <= n {
        let step = CHUNK_SIZE.min(pos);
        pos -= step;

        let mut chunk = vec![0u8; step as usize];
        if file.seek(SeekFrom::Start(pos)).is_err() || file.read_exact(&mut chunk).is_err() {
            debug!("Read failed on {}", path.display());
            return Vec::new();
        }

        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.split('\n').collect();

    // Without a terminating newline the final fragment is incomplete.
    if !text.ends_with('\n') {
        lines.pop();
    } else {
        // split() leaves an empty trailing element after the final newline
        lines.pop();
    }

    // The first element may be a partial line cut by the chunk boundary;
    // keeping only the last n drops it whenever we over-read.
    let start = lines.len().saturating_sub(n);
    lines[start..]
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_missing_file_is_empty() {
        assert!(tail_lines(Path::new("/nonexistent/nope.log"), 10).is_empty());
    }

    #[test]
    fn test_last_n_in_order() {
        let f = write_file(b"one\ntwo\nthree\nfour\n");
        let lines = tail_lines(f.path(), 2);
        assert_eq!(lines, vec!["three".to_string(), "four".to_string()]);
    }

    #[test]
    fn test_fewer_lines_than_requested() {
        let f = write_file(b"only\n");
        let lines = tail_lines(f.path(), 100);
        assert_eq!(lines, vec!["only".to_string()]);
    }

    #[test]
    fn test_partial_trailing_line_dropped() {
        let f = write_file(b"complete\npartial");
        let lines = tail_lines(f.path(), 10);
        assert_eq!(lines, vec!["complete".to_string()]);
    }

    #[test]
    fn test_binary_garbage_does_not_panic() {
        let f = write_file(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n']);
        let lines = tail_lines(f.path(), 10);
        assert_eq!(lines.last().unwrap(), "ok");
    }

    #[test]
    fn test_large_file_crosses_chunks() {
        let mut content = Vec::new();
        for i in 0..10_000 {
            content.extend_from_slice(format!("line number {} with some padding text\n", i).as_bytes());
        }
        let f = write_file(&content);
        let lines = tail_lines(f.path(), 3);
        assert_eq!(
            lines,
            vec![
                "line number 9997 with some padding text".to_string(),
                "line number 9998 with some padding text".to_string(),
                "line number 9999 with some padding text".to_string(),
            ]
        );
    }

    #[test]
    fn test_zero_lines() {
        let f = write_file(b"a\nb\n");
        assert!(tail_lines(f.path(), 0).is_empty());
    }
}
