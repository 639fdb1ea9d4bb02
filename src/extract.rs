//! Multi-format normalization of uploaded documents.
//!
//! [`normalize`] turns raw upload bytes into a [`File`]: a content hash, one
//! or more text [`Unit`]s with source metadata, and upload metadata. The
//! format is picked from the filename extension. Everything here is pure:
//! no filesystem or network access.
//!
//! | Format | Units | Locator |
//! |--------|-------|---------|
//! | PDF | one per page | `page_number`, `total_pages` |
//! | DOCX | one | document |
//! | TXT | one | document |
//! | CSV | one per data row | `row` |

use std::collections::BTreeMap;
use std::io::Read;

use chrono::Utc;
use sha2::{Digest, Sha256};

use knowba_core::models::{File, FileKind, Locator, Unit, UnitMetadata};

use crate::error::IngestError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Format used for the `uploaded_at` metadata value.
pub const UPLOADED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalize one upload.
///
/// The id is computed from the complete byte stream before extraction, so
/// identical bytes always produce the identical id.
///
/// # Errors
///
/// - [`IngestError::UnsupportedFormat`] for extensions outside pdf/docx/txt/csv.
/// - [`IngestError::Decode`] for TXT that is not valid UTF-8.
/// - [`IngestError::Parse`] for unreadable PDF, DOCX, or CSV content.
pub fn normalize(bytes: &[u8], filename: &str) -> Result<File, IngestError> {
    let kind = FileKind::from_filename(filename).ok_or_else(|| IngestError::UnsupportedFormat {
        name: filename.to_string(),
    })?;

    let id = content_id(bytes);

    let units = match kind {
        FileKind::Pdf => pdf_units(bytes, filename)?,
        FileKind::Docx => vec![Unit::new(
            &docx_text(bytes, filename)?,
            document_metadata(filename),
        )],
        FileKind::Txt => {
            let text = std::str::from_utf8(bytes).map_err(|source| IngestError::Decode {
                name: filename.to_string(),
                source,
            })?;
            vec![Unit::new(text, document_metadata(filename))]
        }
        FileKind::Csv => csv_units(bytes, filename)?,
    };

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "uploaded_at".to_string(),
        Utc::now().format(UPLOADED_AT_FORMAT).to_string(),
    );
    metadata.insert("size_bytes".to_string(), bytes.len().to_string());

    Ok(File {
        name: filename.to_string(),
        id,
        kind,
        metadata,
        units,
    })
}

/// Hex SHA-256 of the raw bytes.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn document_metadata(filename: &str) -> UnitMetadata {
    UnitMetadata {
        source: filename.to_string(),
        locator: Locator::Document,
    }
}

fn parse_error(filename: &str, kind: FileKind, reason: impl ToString) -> IngestError {
    IngestError::Parse {
        name: filename.to_string(),
        kind,
        reason: reason.to_string(),
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("malformed PDF: {}", detail)
}

fn pdf_units(bytes: &[u8], filename: &str) -> Result<Vec<Unit>, IngestError> {
    // pdf-extract panics on some malformed inputs (missing fonts, unknown
    // encodings) instead of returning an error.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|panic| parse_error(filename, FileKind::Pdf, panic_reason(panic.as_ref())))?
        .map_err(|e| parse_error(filename, FileKind::Pdf, e))?;
    let total_pages = pages.len() as u32;

    Ok(pages
        .iter()
        .enumerate()
        .map(|(idx, text)| {
            Unit::new(
                text,
                UnitMetadata {
                    source: filename.to_string(),
                    locator: Locator::Page {
                        page_number: idx as u32 + 1,
                        total_pages,
                    },
                },
            )
        })
        .collect())
}

fn docx_text(bytes: &[u8], filename: &str) -> Result<String, IngestError> {
    let ooxml = |e: &dyn std::fmt::Display| parse_error(filename, FileKind::Docx, e);

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ooxml(&e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml(&"word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ooxml(&e))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml(&"word/document.xml exceeds size limit"));
    }

    extract_w_t_elements(&doc_xml).map_err(|e| ooxml(&e))
}

/// Concatenate `w:t` runs; each `w:p` paragraph ends with a newline and
/// `w:tab`/`w:br` become a tab/newline. Drawings and other markup are skipped.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(te) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn csv_units(bytes: &[u8], filename: &str) -> Result<Vec<Unit>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(filename, FileKind::Csv, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut units = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| parse_error(filename, FileKind::Csv, e))?;
        let content = headers
            .iter()
            .zip(record.iter())
            .map(|(column, value)| format!("{}: {}", column, value.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        units.push(Unit::new(
            &content,
            UnitMetadata {
                source: filename.to_string(),
                locator: Locator::Row { row: row as u64 },
            },
        ));
    }
    Ok(units)
}
