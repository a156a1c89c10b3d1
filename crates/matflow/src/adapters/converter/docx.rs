//! DOCX to PDF conversion: paragraph text laid out as Helvetica pages.

use std::io::{Read, Seek};

use lopdf::{dictionary, Document, Object, Stream};
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::Reader;

use crate::adapters::ConversionError;

const LINES_PER_PAGE: usize = 50;
const MAX_LINE_CHARS: usize = 95;

/// Reads a DOCX container and returns the bytes of an equivalent text PDF.
pub fn docx_to_pdf<R: Read + Seek>(reader: R) -> Result<Vec<u8>, ConversionError> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| ConversionError::Malformed(format!("Not a DOCX container: {}", e)))?;

    let text = extract_docx_text(&mut archive)?;
    let missing = unrepresentable_chars(&text);
    if missing > 0 {
        tracing::warn!(
            chars = missing,
            "Characters outside WinAnsi replaced with '?'; configure render.soffice for full fidelity"
        );
    }
    let lines = wrap_lines(&text);
    build_pdf(&lines)
}

fn extract_docx_text<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, ConversionError> {
    let mut document_xml = archive.by_name("word/document.xml").map_err(|e| {
        ConversionError::Malformed(format!("Failed to find word/document.xml: {}", e))
    })?;

    let mut xml_content = String::new();
    document_xml
        .read_to_string(&mut xml_content)
        .map_err(|e| ConversionError::Malformed(format!("Failed to read document.xml: {}", e)))?;

    parse_document_xml(&xml_content)
}

/// Collects `w:t` runs, one line per `w:p`, honouring `w:tab` and `w:br`.
fn parse_document_xml(xml: &str) -> Result<String, ConversionError> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_element = true;
                }
            }
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" => text.push('\n'),
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    let decoded = e
                        .decode()
                        .map_err(|e| ConversionError::Malformed(format!("Bad XML text: {}", e)))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text_element {
                    push_reference(&mut text, &e)?;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ConversionError::Malformed(format!(
                    "XML parsing error at {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(text)
}

/// Resolves `&amp;`-style entities and `&#233;` character references.
fn push_reference(text: &mut String, reference: &BytesRef<'_>) -> Result<(), ConversionError> {
    let bad = |e: String| ConversionError::Malformed(format!("Bad XML reference: {}", e));

    if let Some(c) = reference.resolve_char_ref().map_err(|e| bad(e.to_string()))? {
        text.push(c);
        return Ok(());
    }

    let name = reference.decode().map_err(|e| bad(e.to_string()))?;
    match resolve_predefined_entity(&name) {
        Some(value) => text.push_str(value),
        None => return Err(bad(format!("unknown entity '&{};'", name))),
    }
    Ok(())
}

fn wrap_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let paragraph = paragraph.replace('\t', "    ");
        if paragraph.chars().count() <= MAX_LINE_CHARS {
            lines.push(paragraph);
            continue;
        }

        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let needed = current.chars().count() + word.chars().count() + 1;
            if !current.is_empty() && needed > MAX_LINE_CHARS {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

fn build_pdf(lines: &[String]) -> Result<Vec<u8>, ConversionError> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
    );

    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        }),
    );

    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![lines]
    } else {
        lines.chunks(LINES_PER_PAGE).collect()
    };

    let mut page_ids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            page_content(chunk).into_bytes(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| ConversionError::Write {
        path: "renderable.pdf".into(),
        reason: e.to_string(),
    })?;

    Ok(buffer)
}

fn page_content(lines: &[String]) -> String {
    let mut content = String::from("BT\n/F1 11 Tf\n50 742 Td\n14 TL\n");
    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(line)));
    }
    content.push_str("ET\n");
    content
}

/// Encodes `s` as a WinAnsi PDF string body. Bytes above 0x7E are written
/// as octal escapes; characters outside WinAnsi become `?`.
fn escape_pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\\' => out.push_str("\\\\"),
            ' '..='~' => out.push(c),
            _ => match win_ansi_byte(c) {
                Some(byte) => out.push_str(&format!("\\{:03o}", byte)),
                None => out.push('?'),
            },
        }
    }
    out
}

/// WinAnsiEncoding code for a non-ASCII character, if it has one.
fn win_ansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        '\u{A0}'..='\u{FF}' => c as u32 as u8,
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Characters the built-in layout cannot draw with the standard font.
fn unrepresentable_chars(text: &str) -> usize {
    text.chars()
        .filter(|&c| !(c == '\t' || c == '\n' || (' '..='~').contains(&c)) && win_ansi_byte(c).is_none())
        .count()
}
