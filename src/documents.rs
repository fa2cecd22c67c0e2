//! Plain-text extraction for the document types the analysis service accepts.

use crate::error::{PipelineError, Result};
use log::{error, info, warn};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Xlsx,
    Csv,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

pub fn extract_text(path: &Path) -> Result<String> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| PipelineError::Extraction {
        path: path.to_path_buf(),
        reason: "unsupported file type".to_string(),
    })?;

    let text = match kind {
        DocumentKind::Pdf => read_pdf(path),
        DocumentKind::Docx => read_docx(path),
        DocumentKind::Xlsx => read_xlsx(path),
        DocumentKind::Csv => read_csv(path),
    }?;

    info!("Extracted {} characters from {:?}: {}", text.len(), kind, path.display());
    Ok(text)
}

/// Concatenate the text of every readable document. Unsupported or unreadable
/// files contribute nothing.
pub fn combine_text<P: AsRef<Path>>(paths: &[P]) -> String {
    let mut combined = String::new();

    for path in paths {
        let path = path.as_ref();
        if DocumentKind::from_path(path).is_none() {
            warn!("Unsupported file type: {}", path.display());
            continue;
        }
        match extract_text(path) {
            Ok(text) => {
                combined.push_str(&text);
                if !text.ends_with('\n') {
                    combined.push('\n');
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    combined
}

fn extraction_error(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::Extraction {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_pdf(path: &Path) -> Result<String> {
    let doc = lopdf::Document::load(path).map_err(|e| extraction_error(path, e))?;
    let mut content = String::new();

    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) if !text.is_empty() => {
                content.push_str(&text);
                content.push('\n');
            }
            Ok(_) => {}
            Err(e) => warn!("Page {} of {}: {}", page_number, path.display(), e),
        }
    }

    Ok(content)
}

fn read_zip_entry(path: &Path, entry: &str) -> Result<Option<String>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| extraction_error(path, e))?;
    let mut xml = String::new();
    let found = match archive.by_name(entry) {
        Ok(mut part) => {
            part.read_to_string(&mut xml)?;
            Ok(Some(xml))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(extraction_error(path, e)),
    };
    found
}

fn read_docx(path: &Path) -> Result<String> {
    let xml = read_zip_entry(path, "word/document.xml")?
        .ok_or_else(|| extraction_error(path, "missing word/document.xml"))?;
    Ok(docx_paragraphs(&xml).join("\n"))
}

fn docx_paragraphs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                current.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) if in_text => push_entity(&mut current, &e),
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => (),
        }
        buf.clear();
    }

    paragraphs
}

fn read_xlsx(path: &Path) -> Result<String> {
    let shared = match read_zip_entry(path, "xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml),
        None => Vec::new(),
    };
    let sheet = read_zip_entry(path, "xl/worksheets/sheet1.xml")?
        .ok_or_else(|| extraction_error(path, "workbook has no first worksheet"))?;

    let rows = sheet_rows(&sheet, &shared);
    Ok(rows
        .iter()
        .map(|row| row.join("\t"))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn shared_strings(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                current.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) if in_text => push_entity(&mut current, &e),
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => (),
        }
        buf.clear();
    }

    strings
}

fn sheet_rows(xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut cell_is_shared = false;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_is_shared = e
                        .attributes()
                        .flatten()
                        .any(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s");
                }
                b"v" | b"t" => {
                    in_value = true;
                    value.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_value => {
                value.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::GeneralRef(e)) if in_value => push_entity(&mut value, &e),
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"v" | b"t" => {
                    in_value = false;
                    let raw = std::mem::take(&mut value);
                    let cell = if cell_is_shared {
                        raw.trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|idx| shared.get(idx).cloned())
                            .unwrap_or(raw)
                    } else {
                        raw
                    };
                    row.push(cell);
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => (),
        }
        buf.clear();
    }

    rows
}

/// Append the character an entity reference (`amp`, `#38`, `#x26`) stands for.
/// Unknown names are kept verbatim.
fn push_entity(out: &mut String, name: &[u8]) {
    let name = String::from_utf8_lossy(name);
    match resolve_entity(&name) {
        Some(c) => out.push(c),
        None => {
            out.push('&');
            out.push_str(&name);
            out.push(';');
        }
    }
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn read_csv(path: &Path) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| extraction_error(path, e))?;

    let mut content = String::new();
    for record in reader.records() {
        let record = record.map_err(|e| extraction_error(path, e))?;
        content.push_str(&record.iter().collect::<Vec<_>>().join(","));
        content.push('\n');
    }
    Ok(content)
}
