//! Upload validation.
//!
//! Checks a stored upload before the controller leaves the `upload` stage.

use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Extensions accepted for uploads.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["csv", "tsv", "txt"];

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 1024;

/// Validates an uploaded CSV file.
///
/// Returns the file size in bytes.
///
/// # Errors
///
/// - [`Error::EmptyFile`] if the file is missing or zero-length
/// - [`Error::UnsupportedFile`] if the extension is not one of
///   [`ALLOWED_EXTENSIONS`] or the file looks binary
/// - [`Error::OperationFailed`] if the file cannot be read
pub fn validate_upload(path: &Path) -> Result<u64> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => {
            return Err(Error::EmptyFile(format!("{} is not a file", path.display())));
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::EmptyFile(format!("{} does not exist", path.display())));
        },
        Err(e) => return Err(Error::operation("stat_upload", e)),
    };
    if metadata.len() == 0 {
        return Err(Error::EmptyFile(format!("{} is empty", path.display())));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::UnsupportedFile(format!(
            "expected one of {}, got '{}'",
            ALLOWED_EXTENSIONS.join(", "),
            path.display()
        )));
    }

    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)
        .and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut head))
        .map_err(|e| Error::operation("read_upload", e))?;
    if head.contains(&0) {
        return Err(Error::UnsupportedFile(format!(
            "{} contains binary data",
            path.display()
        )));
    }

    Ok(metadata.len())
}
