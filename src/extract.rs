//! Decode stored files to plain text.
//!
//! Supported: `.txt` and `.md` (UTF-8, invalid bytes replaced), `.pdf`
//! (pdf-extract) and `.docx` (the `word/document.xml` part, one line per
//! paragraph). Control characters other than newline and tab are removed
//! from every result.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Turns a file into text. `None` means "skip this file".
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path) -> Option<String>;
}

/// The built-in decoder for txt, md, pdf and docx files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl Decoder for FileDecoder {
    fn decode(&self, path: &Path) -> Option<String> {
        match decode_file(path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(file = %path.display(), reason = %e, "skipping file");
                None
            }
        }
    }
}

pub fn is_supported(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("txt" | "md" | "pdf" | "docx")
    )
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn decode_file(path: &Path) -> Result<String, ExtractError> {
    let ext = extension(path).unwrap_or_default();
    let text = match ext.as_str() {
        "txt" | "md" => String::from_utf8_lossy(&std::fs::read(path)?).into_owned(),
        "pdf" => extract_pdf(&std::fs::read(path)?)?,
        "docx" => extract_docx(&std::fs::read(path)?)?,
        _ => return Err(ExtractError::Unsupported(path.display().to_string())),
    };
    Ok(strip_control_chars(&text))
}

/// Remove control characters except `\n` and `\t`; `\r\n` becomes `\n`.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_from_xml(&doc_xml)
}

/// Collect `w:t` runs, ending a line at each `w:p` and turning `w:tab`
/// and `w:br` into a tab and a newline.
fn paragraphs_from_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
