//! File format detection.
//!
//! The dispatch key is the lower-cased file extension. Every extension maps
//! to exactly one [`FileFormat`]; anything unrecognized becomes
//! [`FileFormat::Unsupported`] and is reported as skipped by the ingestion
//! pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileFormat {
    PlainText,
    Pdf,
    Word,
    PowerPoint,
    Spreadsheet,
    Csv,
    Json,
    Xml,
    Image,
    Archive,
    /// Carries the lower-cased extension (empty when the file has none).
    Unsupported(String),
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" | "rst" | "log" | "text" => FileFormat::PlainText,
            "pdf" => FileFormat::Pdf,
            "docx" => FileFormat::Word,
            "pptx" => FileFormat::PowerPoint,
            "xlsx" | "xlsm" | "xls" | "ods" => FileFormat::Spreadsheet,
            "csv" | "tsv" => FileFormat::Csv,
            "json" => FileFormat::Json,
            "xml" => FileFormat::Xml,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" => FileFormat::Image,
            "zip" => FileFormat::Archive,
            _ => FileFormat::Unsupported(ext),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_extension(&ext)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, FileFormat::Unsupported(_))
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::PlainText => write!(f, "text"),
            FileFormat::Pdf => write!(f, "pdf"),
            FileFormat::Word => write!(f, "word"),
            FileFormat::PowerPoint => write!(f, "powerpoint"),
            FileFormat::Spreadsheet => write!(f, "spreadsheet"),
            FileFormat::Csv => write!(f, "csv"),
            FileFormat::Json => write!(f, "json"),
            FileFormat::Xml => write!(f, "xml"),
            FileFormat::Image => write!(f, "image"),
            FileFormat::Archive => write!(f, "archive"),
            FileFormat::Unsupported(ext) if ext.is_empty() => write!(f, "unsupported"),
            FileFormat::Unsupported(ext) => write!(f, "unsupported (.{})", ext),
        }
    }
}

/// A file discovered during traversal, ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Where the bytes live now (possibly inside a temporary expansion dir).
    pub path: PathBuf,
    /// Stable display path used for attribution.
    pub origin: String,
    pub format: FileFormat,
}

impl SourceFile {
    pub fn new(path: PathBuf, origin: impl Into<String>) -> Self {
        let format = FileFormat::from_path(&path);
        Self {
            path,
            origin: origin.into(),
            format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        assert_eq!(FileFormat::from_path(Path::new("a/B.PDF")), FileFormat::Pdf);
        assert_eq!(FileFormat::from_path(Path::new("notes.Md")), FileFormat::PlainText);
        assert_eq!(FileFormat::from_path(Path::new("x.ZIP")), FileFormat::Archive);
    }

    #[test]
    fn unknown_and_legacy_formats_are_unsupported() {
        assert_eq!(
            FileFormat::from_path(Path::new("a.exe")),
            FileFormat::Unsupported("exe".to_string())
        );
        assert!(!FileFormat::from_path(Path::new("old.doc")).is_supported());
        assert!(!FileFormat::from_path(Path::new("Makefile")).is_supported());
    }
}
