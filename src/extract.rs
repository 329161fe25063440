//! Text extraction for stored artifacts (PDF, XLSX, CSV).
//!
//! Extraction is a pipeline stage: the repository supplies a local path,
//! this module returns plain UTF-8 text. Routing is by [`FileFormat`]:
//!
//! | Format | Extractor |
//! |--------|-----------|
//! | pdf | `pdf-extract` |
//! | xlsx | `zip` + `quick-xml`, one `=== Sheet: <name> ===` block per sheet |
//! | csv | lossy UTF-8 |
//! | xls, unknown | [`RegwatchError::UnsupportedFormat`] |
//! | zip | [`RegwatchError::UnsupportedFormat`] (members are tracked as their own documents) |
//!
//! Callers treat `UnsupportedFormat` as an empty result, see [`extract_or_empty`].

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::RegwatchError;
use crate::formats::FileFormat;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Turns a stored artifact into text.
///
/// Implementations are synchronous; the stage runner calls them on the
/// blocking thread pool.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, RegwatchError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextExtractor;

impl TextExtractor for FileTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, RegwatchError> {
        let name = path.to_string_lossy().to_string();
        match FileFormat::from_name(&name) {
            FileFormat::Pdf => {
                let bytes = std::fs::read(path)?;
                pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
                    RegwatchError::Extraction {
                        name,
                        message: e.to_string(),
                    }
                })
            }
            FileFormat::Xlsx => {
                let bytes = std::fs::read(path)?;
                extract_xlsx(&bytes).map_err(|message| RegwatchError::Extraction { name, message })
            }
            FileFormat::Csv => {
                let bytes = std::fs::read(path)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            FileFormat::Xls => Err(RegwatchError::UnsupportedFormat(format!(
                "legacy .xls workbook: {}",
                name
            ))),
            FileFormat::Zip => Err(RegwatchError::UnsupportedFormat(format!(
                "archive container: {}",
                name
            ))),
            FileFormat::Unknown => Err(RegwatchError::UnsupportedFormat(name)),
        }
    }
}

/// Run `extractor`, mapping [`RegwatchError::UnsupportedFormat`] to an empty
/// string. Every other error is returned unchanged.
pub fn extract_or_empty(
    extractor: &dyn TextExtractor,
    path: &Path,
) -> Result<String, RegwatchError> {
    match extractor.extract(path) {
        Err(RegwatchError::UnsupportedFormat(what)) => {
            tracing::debug!(%what, "no extractor, treating as empty");
            Ok(String::new())
        }
        other => other,
    }
}

type XlsxArchive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(
    archive: &mut XlsxArchive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;

    // Workbooks without any text cells carry no sharedStrings part.
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let display_names = read_sheet_names(&mut archive).unwrap_or_default();

    let mut blocks = Vec::new();
    for (idx, part) in list_worksheet_parts(&archive)
        .into_iter()
        .take(XLSX_MAX_SHEETS)
        .enumerate()
    {
        let xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        let rows = extract_sheet_rows(&xml, &shared_strings)?;
        let name = display_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        blocks.push(format!("=== Sheet: {} ===\n{}\n", name, rows.join("\n")));
    }
    Ok(blocks.join("\n"))
}

fn read_shared_strings(archive: &mut XlsxArchive<'_>) -> Result<Vec<String>, String> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            // Rich-text runs split one string over several <t> elements.
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_names(archive: &mut XlsxArchive<'_>) -> Result<Vec<String>, String> {
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut names = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = e
                    .try_get_attribute("name")
                    .ok()
                    .flatten()
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                if let Some(name) = name {
                    names.push(name);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn list_worksheet_parts(archive: &XlsxArchive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    SharedString,
    Inline,
    Literal,
}

/// One comma-joined line per `<row>`.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, String> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut kind = CellKind::Literal;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = match e.try_get_attribute("t").ok().flatten() {
                        Some(a) if a.value.as_ref() == b"s" => CellKind::SharedString,
                        Some(a) if a.value.as_ref() == b"inlineStr" => CellKind::Inline,
                        _ => CellKind::Literal,
                    };
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                let text = match kind {
                    CellKind::SharedString => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned(),
                    CellKind::Inline | CellKind::Literal => Some(value.to_string()),
                };
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    row.push(text);
                    cell_count += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => kind = CellKind::Literal,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(","));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(","));
    }
    Ok(rows)
}
