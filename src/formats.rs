//! Extension-based format routing.
//!
//! Every file the system touches is classified once into a [`FileFormat`];
//! downstream code matches on the variant instead of comparing extension
//! strings. [`FileFormat::Unknown`] is a real variant with no capabilities.

use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_EXCEL: &str = "application/vnd.ms-excel";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_ZIP: &str = "application/zip";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pdf,
    /// Modern OOXML workbook (`.xlsx`).
    Xlsx,
    /// Legacy BIFF workbook (`.xls`).
    Xls,
    Csv,
    Zip,
    Unknown,
}

impl FileFormat {
    /// Classify a filename, URL path or local path by its extension.
    pub fn from_name(name: &str) -> Self {
        // Strip query strings and fragments so URLs classify like paths.
        let name = name.split(['?', '#']).next().unwrap_or(name);
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => FileFormat::Pdf,
            Some("xlsx") => FileFormat::Xlsx,
            Some("xls") => FileFormat::Xls,
            Some("csv") => FileFormat::Csv,
            Some("zip") => FileFormat::Zip,
            _ => FileFormat::Unknown,
        }
    }

    /// MIME type used when the server does not declare one.
    pub fn mime_type(self) -> &'static str {
        match self {
            FileFormat::Pdf => MIME_PDF,
            FileFormat::Xlsx | FileFormat::Xls => MIME_EXCEL,
            FileFormat::Csv => MIME_CSV,
            FileFormat::Zip => MIME_ZIP,
            FileFormat::Unknown => MIME_OCTET_STREAM,
        }
    }

    /// Whether the format is published on authority portals and worth fetching.
    pub fn is_discoverable(self) -> bool {
        !matches!(self, FileFormat::Unknown)
    }

    /// Whether an archive member of this format is retained on expansion.
    /// Nested archives are not expanded.
    pub fn is_archive_member(self) -> bool {
        matches!(
            self,
            FileFormat::Pdf | FileFormat::Xlsx | FileFormat::Xls | FileFormat::Csv
        )
    }

    pub fn is_archive(self) -> bool {
        self == FileFormat::Zip
    }
}

/// Pick the MIME type for a fetched resource: the server-declared content
/// type wins, otherwise the extension mapping.
pub fn resolve_mime_type(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim).filter(|ct| !ct.is_empty()) {
        Some(ct) => ct.to_string(),
        None => FileFormat::from_name(filename).mime_type().to_string(),
    }
}
