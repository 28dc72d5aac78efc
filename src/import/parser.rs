//! Delimited text parsing into column shards
//!
//! The coordinator sniffs the first line of a source to settle the separator,
//! header and column count, then hands every node a set of byte ranges. A
//! line belongs to the range that contains its first byte, so every line of a
//! file is parsed by exactly one node.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::store::{CellValue, Shard, ShardBuilder, StoreError};

/// Field separator of a text source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    Comma,
    Semicolon,
    Tab,
    /// Runs of spaces or tabs
    Whitespace,
}

impl Separator {
    fn delimiter(&self) -> Option<u8> {
        match self {
            Separator::Comma => Some(b','),
            Separator::Semicolon => Some(b';'),
            Separator::Tab => Some(b'\t'),
            Separator::Whitespace => None,
        }
    }

    /// Guess the separator from a sample line
    pub fn detect(line: &str) -> Self {
        if line.contains(',') {
            Separator::Comma
        } else if line.contains(';') {
            Separator::Semicolon
        } else if line.contains('\t') {
            Separator::Tab
        } else {
            Separator::Whitespace
        }
    }

    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self.delimiter() {
            Some(d) => line.split(d as char).collect(),
            None => line.split_whitespace().collect(),
        }
    }
}

/// Resolved parse settings shared by every node of one import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseSetup {
    pub separator: Separator,
    pub has_header: bool,
    pub column_count: usize,
    pub chunk_rows: usize,
}

impl ParseSetup {
    /// Settle separator, header and column count from the first line
    pub fn sniff(
        first_line: &str,
        separator: Option<Separator>,
        header: Option<bool>,
        chunk_rows: usize,
    ) -> Self {
        let line = first_line.trim_end_matches(['\r', '\n']);
        let separator = separator.unwrap_or_else(|| Separator::detect(line));
        let tokens = separator.split(line);
        let has_header =
            header.unwrap_or_else(|| tokens.iter().any(|token| parse_cell(token).is_err()));
        Self {
            separator,
            has_header,
            column_count: tokens.len(),
            chunk_rows,
        }
    }
}

/// A byte range of one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSegment {
    pub path: PathBuf,
    pub start: u64,
    pub end: u64,
}

impl FileSegment {
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Split a file of `len` bytes into `parts` contiguous ranges
pub fn split_file(path: &Path, len: u64, parts: usize) -> Vec<FileSegment> {
    let parts = parts.max(1) as u64;
    (0..parts)
        .map(|i| FileSegment {
            path: path.to_path_buf(),
            start: len * i / parts,
            end: len * (i + 1) / parts,
        })
        .collect()
}

/// Streams the lines whose first byte lies inside a segment
pub struct SegmentLines {
    reader: BufReader<File>,
    pos: u64,
    end: u64,
}

impl SegmentLines {
    pub fn open(segment: &FileSegment) -> io::Result<Self> {
        let mut file = File::open(&segment.path)?;
        let mut pos = segment.start;
        if pos > 0 && !segment.is_empty() {
            // A line that started before our range belongs to the previous one
            file.seek(SeekFrom::Start(pos - 1))?;
        }
        let mut reader = BufReader::new(file);
        if pos > 0 && !segment.is_empty() {
            let mut partial = Vec::new();
            pos = pos - 1 + reader.read_until(b'\n', &mut partial)? as u64;
        }
        Ok(Self {
            reader,
            pos,
            end: if segment.is_empty() { pos } else { segment.end },
        })
    }

    /// Replace `line` with the next line, terminator included; false once the range is done
    pub fn next_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        line.clear();
        if self.pos >= self.end {
            return Ok(false);
        }
        let read = self.reader.read_until(b'\n', line)?;
        self.pos += read as u64;
        Ok(read > 0)
    }
}

/// The body of one segment as a byte stream: no header, no blank lines
struct SegmentBody {
    lines: SegmentLines,
    skip_header: bool,
    line: Vec<u8>,
    offset: usize,
}

impl SegmentBody {
    fn new(lines: SegmentLines, skip_header: bool) -> Self {
        Self {
            lines,
            skip_header,
            line: Vec::new(),
            offset: 0,
        }
    }

    /// Next non-blank body line, or `None` at the end of the segment
    fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            if !self.lines.next_line(&mut self.line)? {
                return Ok(None);
            }
            if std::mem::take(&mut self.skip_header) {
                continue;
            }
            if !self.line.iter().all(u8::is_ascii_whitespace) {
                self.offset = 0;
                return Ok(Some(&self.line));
            }
        }
    }
}

impl Read for SegmentBody {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.line.len() && self.next_line()?.is_none() {
            return Ok(0);
        }
        let n = out.len().min(self.line.len() - self.offset);
        out[..n].copy_from_slice(&self.line[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// Read the first line of a file
pub fn first_line(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line)
}

/// A token that is neither a number nor an NA marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonNumeric;

/// Parse one cell; `Err` marks text that is read as NA
pub fn parse_cell(token: &str) -> Result<CellValue, NonNumeric> {
    let text = token.trim().trim_matches('"').trim();
    if text.is_empty()
        || text == "?"
        || text.eq_ignore_ascii_case("na")
        || text.eq_ignore_ascii_case("nan")
    {
        return Ok(CellValue::Na);
    }
    match parse_decimal(text) {
        Some(cell) => Ok(cell),
        None => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(CellValue::Float)
            .ok_or(NonNumeric),
    }
}

/// Parse `[+-]digits[.digits][(e|E)[+-]digits]` into an i64 mantissa and exponent
fn parse_decimal(text: &str) -> Option<CellValue> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let negative = match bytes.first()? {
        b'-' => {
            i += 1;
            true
        }
        b'+' => {
            i += 1;
            false
        }
        _ => false,
    };

    let mut mantissa: i64 = 0;
    let mut exponent: i32 = 0;
    let mut digits = 0;
    let mut seen_point = false;
    while i < bytes.len() {
        match bytes[i] {
            b @ b'0'..=b'9' => {
                mantissa = mantissa.checked_mul(10)?.checked_add((b - b'0') as i64)?;
                if seen_point {
                    exponent -= 1;
                }
                digits += 1;
            }
            b'.' if !seen_point => seen_point = true,
            b'e' | b'E' => break,
            _ => return None,
        }
        i += 1;
    }
    if digits == 0 {
        return None;
    }
    if i < bytes.len() {
        // Exponent part
        let exp: i32 = text[i + 1..].parse().ok()?;
        exponent = exponent.checked_add(exp)?;
        if exponent.abs() > 300 {
            return None;
        }
    }
    if negative {
        mantissa = -mantissa;
    }
    Some(CellValue::Decimal { mantissa, exponent })
}

/// Output of parsing one node's segments
#[derive(Debug)]
pub struct ParsedShard {
    pub shard: Shard,
    pub non_numeric: usize,
}

/// Why a node could not parse its segments
#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    #[error("cannot read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {}", .path.display(), .source)]
    Shape {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error("{}: malformed record: {}", .path.display(), .reason)]
    Malformed { path: PathBuf, reason: String },
}

/// Accumulates parsed rows of one node
struct RowSink {
    builder: ShardBuilder,
    row: Vec<CellValue>,
    non_numeric: usize,
}

impl RowSink {
    fn push<S: AsRef<str>>(
        &mut self,
        fields: impl IntoIterator<Item = S>,
        path: &Path,
    ) -> Result<(), ParseFailure> {
        self.row.clear();
        for field in fields {
            let cell = parse_cell(field.as_ref()).unwrap_or_else(|_| {
                self.non_numeric += 1;
                CellValue::Na
            });
            self.row.push(cell);
        }
        self.builder
            .push_row(&self.row)
            .map_err(|source| ParseFailure::Shape {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Parse byte ranges into a shard of compressed column chunks
///
/// Segments are streamed; only the current record is held in memory
/// besides the chunks being built.
pub fn parse_segments(
    segments: &[FileSegment],
    setup: &ParseSetup,
) -> Result<ParsedShard, ParseFailure> {
    let mut sink = RowSink {
        builder: ShardBuilder::new(setup.column_count, setup.chunk_rows),
        row: Vec::with_capacity(setup.column_count),
        non_numeric: 0,
    };

    for segment in segments {
        let io_failure = |source: io::Error| ParseFailure::Io {
            path: segment.path.clone(),
            source,
        };
        let lines = SegmentLines::open(segment).map_err(io_failure)?;
        let skip_header = setup.has_header && segment.start == 0;
        let mut body = SegmentBody::new(lines, skip_header);

        match setup.separator.delimiter() {
            Some(delimiter) => {
                let mut reader = csv::ReaderBuilder::new()
                    .delimiter(delimiter)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(body);
                let mut record = csv::ByteRecord::new();
                loop {
                    let more = reader.read_byte_record(&mut record).map_err(|e| {
                        ParseFailure::Malformed {
                            path: segment.path.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    if !more {
                        break;
                    }
                    sink.push(record.iter().map(String::from_utf8_lossy), &segment.path)?;
                }
            }
            None => {
                while let Some(line) = body.next_line().map_err(io_failure)? {
                    let text = String::from_utf8_lossy(line);
                    sink.push(text.split_whitespace(), &segment.path)?;
                }
            }
        }
    }

    Ok(ParsedShard {
        shard: sink.builder.finish(),
        non_numeric: sink.non_numeric,
    })
}
