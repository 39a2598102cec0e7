//! Server log file access.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Read the whole server log.
pub fn contents(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))
}

/// Read the last `lines` lines of the log without loading the whole file.
///
/// Seeks backwards in chunks sized by `lines * avg_line_width`, doubling
/// until enough complete lines are covered. `lines == 0` returns every line
/// of the file.
pub fn tail(path: &Path, lines: usize, avg_line_width: usize) -> Result<Vec<String>> {
    if lines == 0 {
        return Ok(contents(path)?.lines().map(str::to_string).collect());
    }

    let mut file = File::open(path).map_err(|e| Error::io_with_path(e, path))?;
    let len = file
        .metadata()
        .map_err(|e| Error::io_with_path(e, path))?
        .len();

    let mut chunk = (lines * avg_line_width.max(1)).max(1) as u64;
    loop {
        let start = len.saturating_sub(chunk);
        file.seek(SeekFrom::Start(start))
            .map_err(|e| Error::io_with_path(e, path))?;
        let mut buf = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| Error::io_with_path(e, path))?;
        let text = String::from_utf8_lossy(&buf);
        let mut collected: Vec<&str> = text.lines().collect();

        if start > 0 {
            // The first line of a mid-file chunk is almost certainly partial.
            collected.remove(0);
        }

        if start == 0 || collected.len() >= lines {
            let skip = collected.len().saturating_sub(lines);
            return Ok(collected[skip..].iter().map(|l| l.to_string()).collect());
        }

        chunk *= 2;
    }
}
