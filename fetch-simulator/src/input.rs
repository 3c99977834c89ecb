//! Input data handling for fetch simulation
//!
//! Parses request traces from CSV files. Each line is `timestamp_ms,key`,
//! where the timestamp is milliseconds since the start of the trace. Files
//! are streamed one line at a time.

use crate::models::Request;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error types for trace parsing
#[derive(Debug, Error)]
pub enum TraceParseError {
    #[error("failed to read trace: {0}")]
    Io(#[from] io::Error),
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
}

/// Reader for request traces
pub struct TraceReader {
    input_dir: PathBuf,
}

impl TraceReader {
    /// Create a new reader for the given input directory
    pub fn new<P: AsRef<Path>>(input_dir: P) -> Self {
        Self {
            input_dir: input_dir.as_ref().to_path_buf(),
        }
    }

    /// Get all trace files in the input directory, sorted by name
    pub fn trace_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.input_dir)? {
            let path = entry?.path();
            if path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == "csv" || ext == "log" || ext == "txt")
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse a single line. Returns `None` for blank lines, comments and the header.
    pub fn parse_line(line: &str, line_num: usize) -> Result<Option<Request>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || (line_num == 0 && line.contains("timestamp"))
        {
            return Ok(None);
        }

        let (ts, key) = line
            .split_once(',')
            .ok_or_else(|| "expected 'timestamp_ms,key'".to_string())?;
        let millis = ts
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid timestamp '{ts}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err("missing key".to_string());
        }

        Ok(Some(Request::new(
            Duration::from_millis(millis),
            key.to_string(),
        )))
    }

    /// Stream every request in every trace file, in file order.
    pub fn stream_requests(&self) -> Result<RequestIterator, TraceParseError> {
        Ok(RequestIterator::new(self.trace_files()?))
    }
}

/// Iterator that streams requests from multiple trace files
pub struct RequestIterator {
    files: Vec<PathBuf>,
    current_file_index: usize,
    current_reader: Option<BufReader<File>>,
    current_line_num: usize,
    line_buffer: String,
}

impl RequestIterator {
    fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            current_file_index: 0,
            current_reader: None,
            current_line_num: 0,
            line_buffer: String::with_capacity(128),
        }
    }

    fn open_next_file(&mut self) -> io::Result<bool> {
        let Some(path) = self.files.get(self.current_file_index) else {
            return Ok(false);
        };
        let file = File::open(path)?;
        self.current_reader = Some(BufReader::with_capacity(1024 * 1024, file));
        self.current_line_num = 0;
        self.current_file_index += 1;
        Ok(true)
    }

    fn current_file_name(&self) -> String {
        self.current_file_index
            .checked_sub(1)
            .and_then(|i| self.files.get(i))
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

impl Iterator for RequestIterator {
    type Item = Result<Request, TraceParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_reader.is_none() {
                match self.open_next_file() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e.into())),
                }
            }

            let reader = self.current_reader.as_mut()?;
            self.line_buffer.clear();
            match reader.read_line(&mut self.line_buffer) {
                Ok(0) => {
                    self.current_reader = None;
                }
                Ok(_) => {
                    let line_num = self.current_line_num;
                    self.current_line_num += 1;
                    match TraceReader::parse_line(&self.line_buffer, line_num) {
                        Ok(Some(request)) => return Some(Ok(request)),
                        Ok(None) => {}
                        Err(message) => {
                            return Some(Err(TraceParseError::Parse {
                                file: self.current_file_name(),
                                line: line_num + 1,
                                message,
                            }))
                        }
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
