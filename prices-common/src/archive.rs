//! Unpack uploaded price-list archives into memory.
//!
//! The archive kind is decided by the declared `type` and the uploaded file name extension,
//! never by sniffing the payload. A payload that does not read as the declared kind is
//! rejected rather than guessed at.
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

/// Entry name to raw bytes, ordered by name so entry selection is deterministic.
pub type ArchiveEntries = BTreeMap<String, Vec<u8>>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("{0} is not a supported archive type")]
    UnknownKind(String),
    #[error("unsupported file type or type mismatch (expected {declared}, got {extension:?})")]
    KindMismatch {
        declared: ArchiveKind,
        extension: String,
    },
    #[error("payload is not a readable {kind} archive: {reason}")]
    NotAnArchive { kind: ArchiveKind, reason: String },
    #[error("archive holds no .csv entry")]
    MissingCsv,
}

/// The two archive formats accepted on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
}

impl ArchiveKind {
    /// An empty declaration means zip.
    pub fn from_declared(declared: &str) -> Result<Self, ArchiveError> {
        match declared.trim() {
            "" | "zip" => Ok(ArchiveKind::Zip),
            "tar" => Ok(ArchiveKind::Tar),
            other => Err(ArchiveError::UnknownKind(other.to_owned())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Extract every file entry of `payload`, after checking `file_name` carries the extension
/// of `kind`.
pub fn extract(
    payload: &[u8],
    file_name: &str,
    kind: ArchiveKind,
) -> Result<ArchiveEntries, ArchiveError> {
    let extension = file_extension(file_name);
    debug!("uploaded file extension: {}", extension);

    if extension != kind.extension() {
        return Err(ArchiveError::KindMismatch {
            declared: kind,
            extension: extension.to_owned(),
        });
    }

    match kind {
        ArchiveKind::Zip => extract_zip(payload),
        ArchiveKind::Tar => extract_tar(payload),
    }
}

/// Pick the first `.csv` entry in name order, skipping macOS resource forks.
pub fn select_csv_entry(entries: &ArchiveEntries) -> Result<(&str, &[u8]), ArchiveError> {
    let mut csv_entries = entries
        .iter()
        .filter(|(name, _)| file_extension(name) == "csv" && !is_resource_fork(name));

    let (name, content) = csv_entries.next().ok_or(ArchiveError::MissingCsv)?;

    let ignored = csv_entries.count();
    if ignored > 0 {
        warn!(
            "archive holds {} more .csv entries, only {} is ingested",
            ignored, name
        );
    }

    Ok((name.as_str(), content.as_slice()))
}

/// Finder zips carry `__MACOSX/._<name>` AppleDouble entries next to each file.
fn is_resource_fork(name: &str) -> bool {
    let path = Path::new(name);
    let under_macosx = path
        .components()
        .next()
        .is_some_and(|first| first.as_os_str() == "__MACOSX");
    let apple_double = path
        .file_name()
        .and_then(|file_name| file_name.to_str())
        .is_some_and(|file_name| file_name.starts_with("._"));

    under_macosx || apple_double
}

fn file_extension(name: &str) -> &str {
    Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
}

fn extract_zip(payload: &[u8]) -> Result<ArchiveEntries, ArchiveError> {
    let not_an_archive = |reason: String| ArchiveError::NotAnArchive {
        kind: ArchiveKind::Zip,
        reason,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(payload)).map_err(|e| not_an_archive(e.to_string()))?;
    let mut entries = ArchiveEntries::new();

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| not_an_archive(e.to_string()))?;
        if file.is_dir() {
            continue;
        }

        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| not_an_archive(format!("{}: {}", file.name(), e)))?;
        entries.insert(file.name().to_owned(), content);
    }

    Ok(entries)
}

fn extract_tar(payload: &[u8]) -> Result<ArchiveEntries, ArchiveError> {
    let not_an_archive = |reason: String| ArchiveError::NotAnArchive {
        kind: ArchiveKind::Tar,
        reason,
    };

    let mut archive = tar::Archive::new(Cursor::new(payload));
    let mut entries = ArchiveEntries::new();

    for entry in archive.entries().map_err(|e| not_an_archive(e.to_string()))? {
        let mut entry = entry.map_err(|e| not_an_archive(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| not_an_archive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| not_an_archive(format!("{}: {}", name, e)))?;
        entries.insert(name, content);
    }

    Ok(entries)
}
