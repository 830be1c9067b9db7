//! Byte-offset resumable CSV reading.
//!
//! Record boundaries come from the `csv` parser itself, so a quoted field
//! spanning several physical lines is consumed in one piece and a stray quote
//! inside an unquoted cell is plain text. Every offset the cursor reports is
//! a position the parser can seek back to, even in a fresh process.

use crate::{Error, Result};
use encoding_rs::WINDOWS_1252;
use std::fs::File;
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One data record and the offset just past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Cell texts in column order.
    pub cells: Vec<String>,
    /// Byte offset of the next record.
    pub end_offset: u64,
}

/// A resumable reader over a delimited file.
#[derive(Debug)]
pub struct CsvCursor {
    path: PathBuf,
    delimiter: u8,
    file_size: u64,
    headers: Vec<String>,
    data_start: u64,
    offset: u64,
    reader: Option<csv::Reader<File>>,
}

impl CsvCursor {
    /// Opens `path` and reads its header row.
    ///
    /// A missing or zero-length file opens successfully with no headers and
    /// yields no rows; callers decide whether that is fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_size = std::fs::metadata(&path).map_or(0, |m| m.len());
        let mut cursor = Self {
            path,
            delimiter,
            file_size,
            headers: Vec::new(),
            data_start: 0,
            offset: 0,
            reader: None,
        };
        if file_size == 0 {
            return Ok(cursor);
        }

        cursor.reader = Some(open_reader(&cursor.path, delimiter)?);
        if let Some(header) = cursor.next_record()? {
            cursor.headers = header.cells;
            cursor.data_start = header.end_offset;
        }
        cursor.offset = cursor.data_start;
        Ok(cursor)
    }

    /// Raw header texts, BOM removed.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// File size recorded at open.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Offset of the first data record.
    #[must_use]
    pub const fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Offset of the next record to be read.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Path being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Progress of the cursor through the file.
    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        percent_complete(self.offset, self.file_size)
    }

    /// Returns `true` once every byte has been consumed.
    ///
    /// A record ending in `\r\n` leaves the offset on its `\n`, so this can
    /// be `false` with no records left; [`CsvCursor::at_end`] settles that.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.offset >= self.file_size
    }

    /// Positions the cursor at `offset`.
    ///
    /// Offsets inside the header row are moved to the first data record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or sought.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if self.file_size == 0 {
            self.offset = 0;
            self.reader = None;
            return Ok(());
        }
        let target = offset.max(self.data_start).min(self.file_size);
        if self.reader.is_none() {
            self.reader = Some(open_reader(&self.path, self.delimiter)?);
        }
        if let Some(reader) = self.reader.as_mut() {
            let mut position = csv::Position::new();
            position.set_byte(target);
            reader
                .seek(position)
                .map_err(|e| Error::operation("seek_csv", e))?;
        }
        self.offset = target;
        Ok(())
    }

    /// Reads the next non-blank data record.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a malformed record.
    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        if self.reader.is_none() {
            self.seek(self.offset)?;
        }
        self.next_record()
    }

    /// Reads up to `count` records starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a malformed record.
    pub fn read_batch(&mut self, start_offset: u64, count: usize) -> Result<Vec<RawRow>> {
        self.seek(start_offset)?;
        let mut rows = Vec::with_capacity(count.min(1024));
        while rows.len() < count {
            match self.next_record()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Returns `true` if no data record is left past the current offset.
    ///
    /// Looks one record ahead and seeks back when one is found. When none is
    /// found the offset moves to the end of the file, so trailing blank lines
    /// and a dangling line terminator count as consumed.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a malformed record.
    pub fn at_end(&mut self) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(true);
        }
        let resume = self.offset;
        if self.next_row()?.is_some() {
            self.seek(resume)?;
            return Ok(false);
        }
        self.offset = self.offset.max(self.file_size);
        Ok(true)
    }

    /// Returns the first data record without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a malformed record.
    pub fn sample(&self) -> Result<Option<Vec<String>>> {
        let mut sampler = Self {
            path: self.path.clone(),
            delimiter: self.delimiter,
            file_size: self.file_size,
            headers: Vec::new(),
            data_start: self.data_start,
            offset: self.data_start,
            reader: None,
        };
        Ok(sampler.next_row()?.map(|row| row.cells))
    }

    fn next_record(&mut self) -> Result<Option<RawRow>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut record = csv::ByteRecord::new();
        loop {
            let at_start = reader.position().byte() == 0;
            let more = reader
                .read_byte_record(&mut record)
                .map_err(|e| Error::operation("read_csv", e))?;
            self.offset = reader.position().byte();
            if !more {
                return Ok(None);
            }
            if is_blank(&record) {
                continue;
            }

            let cells = record
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let cell = if i == 0 && at_start {
                        cell.strip_prefix(UTF8_BOM).unwrap_or(cell)
                    } else {
                        cell
                    };
                    decode_cell(cell)
                })
                .collect();
            return Ok(Some(RawRow {
                cells,
                end_offset: self.offset,
            }));
        }
    }
}

fn open_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| Error::operation("open_csv", e))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(file))
}

/// A single whitespace-only cell. Empty lines never reach here.
fn is_blank(record: &csv::ByteRecord) -> bool {
    record.len() <= 1
        && record
            .get(0)
            .is_none_or(|cell| cell.iter().all(u8::is_ascii_whitespace))
}

/// Decodes a cell as UTF-8, falling back to Windows-1252.
#[must_use]
pub fn decode_cell(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text.into_owned()
        },
    }
}

/// Percentage of `size` covered by `offset`.
///
/// Never reports 100 before the end of the file; a zero-length file
/// reports 0.
#[must_use]
pub fn percent_complete(offset: u64, size: u64) -> u8 {
    if size == 0 {
        return 0;
    }
    if offset >= size {
        return 100;
    }
    let size = u128::from(size);
    let scaled = (u128::from(offset) * 100 + size / 2) / size;
    u8::try_from(scaled.min(99)).unwrap_or(99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_headers_strip_bom() {
        let file = csv_file(b"\xEF\xBB\xBFID,Title\n1,Hello\n");
        let cursor = CsvCursor::open(file.path(), b',').unwrap();
        assert_eq!(cursor.headers(), ["ID", "Title"]);
        assert_eq!(cursor.data_start(), 12);
    }

    #[test]
    fn test_read_batch_and_resume() {
        let file = csv_file(b"ID,Title\n1,a\n2,b\n3,c\n");
        let mut cursor = CsvCursor::open(file.path(), b',').unwrap();

        let first = cursor.read_batch(0, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].cells, vec!["2", "b"]);

        let mut resumed = CsvCursor::open(file.path(), b',').unwrap();
        let rest = resumed.read_batch(first[1].end_offset, 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].cells, vec!["3", "c"]);
        assert_eq!(resumed.percent_complete(), 100);
    }

    #[test]
    fn test_multiline_quoted_field_is_one_record() {
        let file = csv_file(b"ID,Description\n1,\"line one\nline \"\"two\"\"\"\n2,x\n");
        let mut cursor = CsvCursor::open(file.path(), b',').unwrap();
        let rows = cursor.read_batch(0, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells[1], "line one\nline \"two\"");
        assert_eq!(rows[1].cells, vec!["2", "x"]);
    }

    #[test]
    fn test_stray_quote_in_unquoted_cell_is_text() {
        let file = csv_file(b"Title,Status\n5\" TV,publish\nLamp,draft\nDesk,draft\n");
        let mut cursor = CsvCursor::open(file.path(), b',').unwrap();
        let rows = cursor.read_batch(0, 10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].cells, vec!["5\" TV", "publish"]);
        assert_eq!(rows[2].cells, vec!["Desk", "draft"]);

        let mut resumed = CsvCursor::open(file.path(), b',').unwrap();
        let rest = resumed.read_batch(rows[0].end_offset, 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].cells, vec!["Lamp", "draft"]);
    }

    #[test]
    fn test_at_end_settles_crlf_and_trailing_blank_lines() {
        let file = csv_file(b"ID,Title\r\n1,a\r\n2,b\r\n\r\n");
        let mut cursor = CsvCursor::open(file.path(), b',').unwrap();
        let first = cursor.read_batch(0, 1).unwrap();
        assert!(!cursor.at_end().unwrap());
        assert_eq!(cursor.offset(), first[0].end_offset);

        let second = cursor.next_row().unwrap().unwrap();
        assert_eq!(second.cells, vec!["2", "b"]);
        assert!(cursor.at_end().unwrap());
        assert_eq!(cursor.offset(), cursor.file_size());
        assert_eq!(cursor.percent_complete(), 100);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let file = csv_file(b"ID;Title\r\n\r\n1;a\r\n\r\n");
        let mut cursor = CsvCursor::open(file.path(), b';').unwrap();
        let rows = cursor.read_batch(0, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells, vec!["1", "a"]);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_windows_1252_fallback() {
        let file = csv_file(b"Title\ncaf\xE9\n");
        let mut cursor = CsvCursor::open(file.path(), b',').unwrap();
        let rows = cursor.read_batch(0, 1).unwrap();
        assert_eq!(rows[0].cells[0], "caf\u{e9}");
    }

    #[test]
    fn test_missing_and_empty_files_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut missing = CsvCursor::open(dir.path().join("nope.csv"), b',').unwrap();
        assert!(missing.headers().is_empty());
        assert!(missing.read_batch(0, 5).unwrap().is_empty());
        assert_eq!(missing.percent_complete(), 0);

        let empty = csv_file(b"");
        let mut cursor = CsvCursor::open(empty.path(), b',').unwrap();
        assert!(cursor.read_batch(0, 5).unwrap().is_empty());
        assert!(cursor.sample().unwrap().is_none());
    }

    #[test]
    fn test_sample_does_not_move_cursor() {
        let file = csv_file(b"ID\n1\n2\n");
        let cursor = CsvCursor::open(file.path(), b',').unwrap();
        assert_eq!(cursor.sample().unwrap(), Some(vec!["1".to_string()]));
        assert_eq!(cursor.offset(), cursor.data_start());
    }

    #[test]
    fn test_percent_complete_bounds() {
        assert_eq!(percent_complete(0, 0), 0);
        assert_eq!(percent_complete(0, 200), 0);
        assert_eq!(percent_complete(199, 200), 99);
        assert_eq!(percent_complete(200, 200), 100);
        assert_eq!(percent_complete(50, 200), 25);
    }
}
