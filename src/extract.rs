//! Text extraction for non-plain document formats.
//!
//! Connectors supply raw bytes plus a detected [`DocumentFormat`]; this module
//! returns plain UTF-8 text. Extraction failures are per-file errors — the
//! indexer skips the file and keeps going.

use std::io::Read;
use std::path::Path;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Document formats supported by the indexing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Read as UTF-8 directly: .txt, .md, .csv.
    Plain,
    Pdf,
    Docx,
    Epub,
    Ipynb,
    Html,
}

impl DocumentFormat {
    /// Detect the format from a file extension. Unknown extensions are not
    /// indexed.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "csv" => Some(Self::Plain),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "epub" => Some(Self::Epub),
            "ipynb" => Some(Self::Ipynb),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Zip(String),
    Xml(String),
    Notebook(String),
    Utf8(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Zip(e) => write!(f, "ZIP extraction failed: {}", e),
            ExtractError::Xml(e) => write!(f, "XML extraction failed: {}", e),
            ExtractError::Notebook(e) => write!(f, "notebook extraction failed: {}", e),
            ExtractError::Utf8(e) => write!(f, "invalid UTF-8: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract plain text from raw file bytes.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Plain => String::from_utf8(bytes.to_vec())
            .map_err(|e| ExtractError::Utf8(e.to_string())),
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Epub => extract_epub(bytes),
        DocumentFormat::Ipynb => extract_ipynb(bytes),
        DocumentFormat::Html => extract_html(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Zip(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Zip(e.to_string()))?;
    if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
        return Err(ExtractError::Zip(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_ZIP_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Zip(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    extract_t_elements(&xml)
}

/// Collect the text of every `<w:t>`/`<t>` run in a WordprocessingML body.
fn extract_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_epub(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Zip(e.to_string()))?;

    // Spine order is approximated by sorted entry names; good enough for
    // retrieval text.
    let mut chapter_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(".xhtml") || n.ends_with(".html") || n.ends_with(".htm"))
        .map(|s| s.to_string())
        .collect();
    chapter_names.sort();

    let mut out = String::new();
    for name in chapter_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = markup_to_text(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_html(bytes: &[u8]) -> Result<String, ExtractError> {
    markup_to_text(bytes)
}

/// Strip tags from an HTML/XHTML document, skipping script and style bodies.
fn markup_to_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0u32;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if (name.as_ref() == b"script" || name.as_ref() == b"style") && skip_depth > 0 {
                    skip_depth -= 1;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if skip_depth == 0 => {
                let text = te.unescape().unwrap_or_default();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(trimmed);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Concatenate markdown and code cell sources from a Jupyter notebook.
fn extract_ipynb(bytes: &[u8]) -> Result<String, ExtractError> {
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ExtractError::Notebook(e.to_string()))?;
    let cells = json
        .get("cells")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ExtractError::Notebook("missing cells array".to_string()))?;

    let mut out = String::new();
    for cell in cells {
        let cell_type = cell.get("cell_type").and_then(|t| t.as_str()).unwrap_or("");
        if cell_type != "markdown" && cell_type != "code" {
            continue;
        }
        let source = match cell.get("source") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(lines)) => lines
                .iter()
                .filter_map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(""),
            _ => continue,
        };
        let trimmed = source.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(trimmed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("notes.md")),
            Some(DocumentFormat::Plain)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b/deck.IPYNB")),
            Some(DocumentFormat::Ipynb)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("binary.exe")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Zip(_)));
    }

    #[test]
    fn html_strips_tags_and_script() {
        let html = b"<html><head><style>p { color: red }</style></head>\
                     <body><p>Hello <b>world</b></p><script>var x = 1;</script></body></html>";
        let text = extract_text(html, DocumentFormat::Html).unwrap();
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn ipynb_joins_markdown_and_code_cells() {
        let nb = serde_json::json!({
            "cells": [
                {"cell_type": "markdown", "source": ["# Title\n", "Intro text"]},
                {"cell_type": "code", "source": "print('hi')"},
                {"cell_type": "raw", "source": "ignored"},
            ]
        });
        let text = extract_text(nb.to_string().as_bytes(), DocumentFormat::Ipynb).unwrap();
        assert!(text.contains("# Title"));
        assert!(text.contains("print('hi')"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn ipynb_without_cells_is_an_error() {
        let err = extract_text(b"{}", DocumentFormat::Ipynb).unwrap_err();
        assert!(matches!(err, ExtractError::Notebook(_)));
    }

    #[test]
    fn plain_rejects_invalid_utf8() {
        let err = extract_text(&[0xff, 0xfe, 0x00], DocumentFormat::Plain).unwrap_err();
        assert!(matches!(err, ExtractError::Utf8(_)));
    }
}
