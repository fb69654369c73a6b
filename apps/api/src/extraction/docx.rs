//! Raw text from WordprocessingML (`.docx`) files.
//!
//! Only `word/document.xml` is read. Runs are concatenated, paragraphs are
//! separated by a blank line, tabs and breaks are kept as whitespace, and all
//! formatting is dropped.

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("not a valid .docx archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("could not read word/document.xml: {0}")]
    Io(#[from] std::io::Error),
}

/// Matches the tokens that carry text or layout: text runs, tabs, line breaks,
/// and paragraph ends. The run's open tag must not end in `/`, so an empty
/// `<w:t/>` never opens a run.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<w:t(?:\s(?:[^>]*[^/>])?)?>(.*?)</w:t>|<w:tab\s*/>|<w:(?:br|cr)(?:\s[^>]*)?/>|</w:p>",
    )
    .expect("static docx token regex")
});

/// Predefined entities plus decimal and hex character references.
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#x([0-9A-Fa-f]+)|#([0-9]+)|(lt|gt|quot|apos|amp));")
        .expect("static xml entity regex")
});

pub fn extract_docx_text(bytes: &[u8]) -> Result<String, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name(DOCUMENT_PART)?.read_to_string(&mut xml)?;
    Ok(document_xml_to_text(&xml))
}

pub fn document_xml_to_text(xml: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for token in TOKEN.captures_iter(xml) {
        if let Some(run) = token.get(1) {
            current.push_str(&unescape_xml(run.as_str()));
            continue;
        }
        match token.get(0).map(|m| m.as_str()) {
            Some("</w:p>") => paragraphs.push(std::mem::take(&mut current)),
            Some(tag) if tag.starts_with("<w:tab") => current.push('\t'),
            Some(_) => current.push('\n'),
            None => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs.join("\n\n").trim().to_string()
}

fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let decoded = if let Some(hex) = caps.get(1) {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = caps.get(2) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match caps.get(3).map(|m| m.as_str()) {
                    Some("lt") => Some('<'),
                    Some("gt") => Some('>'),
                    Some("quot") => Some('"'),
                    Some("apos") => Some('\''),
                    Some("amp") => Some('&'),
                    _ => None,
                }
            };
            // Out-of-range references are left as written.
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
