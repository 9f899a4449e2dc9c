//! Decoding of the supported file formats, through the public decoder and
//! through the content store's input expansion.

use std::fs;
use std::io::Write;

use tempfile::TempDir;

use m3::content_store::ContentStore;
use m3::extract::{decode_file, is_supported, Decoder, ExtractError, FileDecoder};

fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn docx_paragraphs_decode_to_lines() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("interview.docx");
    fs::write(
        &path,
        docx_with_paragraphs(&["Q: How long is a shift?", "A: Twelve hours, sometimes more."]),
    )
    .unwrap();

    let text = FileDecoder.decode(&path).unwrap();
    assert_eq!(
        text,
        "Q: How long is a shift?\nA: Twelve hours, sometimes more."
    );
}

#[test]
fn docx_without_document_part_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("empty.docx");
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("docProps/core.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<cp/>").unwrap();
        zip.finish().unwrap();
    }
    fs::write(&path, buf).unwrap();

    assert!(matches!(decode_file(&path), Err(ExtractError::Docx(_))));
    assert!(FileDecoder.decode(&path).is_none());
}

#[test]
fn corrupt_pdf_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.pdf");
    fs::write(&path, b"not a valid pdf").unwrap();
    assert!(FileDecoder.decode(&path).is_none());
}

#[test]
fn markdown_and_text_decode_verbatim() {
    let tmp = TempDir::new().unwrap();
    let md = tmp.path().join("fieldnotes.md");
    fs::write(&md, "# Day 1\n\n\tArrived at the depot.\r\n").unwrap();
    assert_eq!(
        FileDecoder.decode(&md).unwrap(),
        "# Day 1\n\n\tArrived at the depot.\n"
    );
}

#[test]
fn directory_expansion_only_picks_supported_formats() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("corpus");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("a.txt"), "a").unwrap();
    fs::write(dir.join("b.docx"), docx_with_paragraphs(&["b"])).unwrap();
    fs::write(dir.join("c.xlsx"), "c").unwrap();
    fs::write(dir.join("d.jpg"), "d").unwrap();

    let expansion = ContentStore::expand(&[dir.display().to_string()]);
    let names: Vec<String> = expansion
        .files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["a.txt", "b.docx"]);
    assert!(!is_supported(&dir.join("c.xlsx")));
}
