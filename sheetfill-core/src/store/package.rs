//! XLSX package plumbing: zip parts, workbook/relationship parsing and the
//! small XML rewrites a save needs outside the worksheets

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use zip::ZipArchive;

use crate::error::StoreError;

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";
pub(crate) const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
pub(crate) const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub(crate) const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// One file inside the zip package
#[derive(Debug, Clone)]
pub(crate) struct Part {
    pub name: String,
    pub data: Vec<u8>,
}

/// Read every file of the archive, keeping the original order
pub(crate) fn read_parts<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<Part>, StoreError> {
    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        parts.push(Part { name, data });
    }
    Ok(parts)
}

/// `<sheet name=".." r:id=".."/>` entries of workbook.xml, in workbook order
pub(crate) fn parse_sheet_entries(workbook_xml: &[u8]) -> Result<Vec<(String, String)>, StoreError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = String::new();
                let mut r_id = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.local_name().as_ref() {
                        b"name" => name = attr.unescape_value()?.to_string(),
                        // r:id; the prefix varies between producers
                        b"id" => r_id = attr.unescape_value()?.to_string(),
                        _ => {}
                    }
                }
                sheets.push((name, r_id));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Relationship Id -> Target map of a .rels part
pub(crate) fn parse_relationships(rels_xml: &[u8]) -> Result<HashMap<String, String>, StoreError> {
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = String::new();
                let mut target = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = attr.unescape_value()?.to_string(),
                        b"Target" => target = attr.unescape_value()?.to_string(),
                        _ => {}
                    }
                }
                rels.insert(id, target);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Turn a workbook relationship target into a zip part name
pub(crate) fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        absolute.to_string()
    } else {
        // Relative to `xl/`
        format!("xl/{}", target)
    }
}

/// Read the shared string table (`<si>` entries, phonetic runs excluded)
pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, StoreError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                strings.push(read_rich_text(&mut reader, b"si")?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Concatenate the `<t>` runs up to the closing `end` tag, skipping `<rPh>`
/// (furigana) runs
pub(crate) fn read_rich_text<R: std::io::BufRead>(
    reader: &mut Reader<R>,
    end: &[u8],
) -> Result<String, StoreError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"rPh" => phonetic_depth += 1,
                b"t" if phonetic_depth == 0 => text.push_str(&read_text_node(reader)?),
                _ => {}
            },
            Event::End(e) => {
                let local = e.local_name();
                if local.as_ref() == b"rPh" {
                    phonetic_depth = phonetic_depth.saturating_sub(1);
                } else if local.as_ref() == end {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Read text content up to the closing tag of the current node
pub(crate) fn read_text_node<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<String, StoreError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(e.unescape()?.as_ref()),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::End(_) => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Whether the worksheet XML carries a `<sheetProtection>` element
pub(crate) fn has_sheet_protection(sheet_xml: &[u8]) -> Result<bool, StoreError> {
    let mut reader = Reader::from_reader(sheet_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheetProtection" => {
                return Ok(true);
            }
            Event::Eof => return Ok(false),
            _ => {}
        }
        buf.clear();
    }
}

/// Drop the `<Override>` for `part_name` (e.g. "/xl/calcChain.xml") from [Content_Types].xml
pub(crate) fn remove_content_type_override(xml: &[u8], part_name: &str) -> Result<Vec<u8>, StoreError> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) if e.local_name().as_ref() == b"Override" => {
                if attribute_value(&e, b"PartName")?.as_deref() != Some(part_name) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

/// Drop every `<Relationship>` whose Target ends with `target_suffix`
pub(crate) fn remove_relationship(xml: &[u8], target_suffix: &str) -> Result<Vec<u8>, StoreError> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let target = attribute_value(&e, b"Target")?.unwrap_or_default();
                if !target.ends_with(target_suffix) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

// CT_Workbook children that must come after <calcPr>
const AFTER_CALC_PR: &[&[u8]] = &[
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// Ask Excel to recalculate every formula when the workbook is opened
pub(crate) fn force_full_calc_on_load(workbook_xml: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut reader = Reader::from_reader(workbook_xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut prefix = String::new();
    let mut done = false;
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) if !done && e.local_name().as_ref() == b"calcPr" => {
                writer.write_event(Event::Empty(with_attribute(&e, b"fullCalcOnLoad", "1")?))?;
                done = true;
            }
            Event::Start(e) if !done && e.local_name().as_ref() == b"calcPr" => {
                writer.write_event(Event::Start(with_attribute(&e, b"fullCalcOnLoad", "1")?))?;
                done = true;
                depth += 1;
            }
            Event::Start(e) => {
                if depth == 0 {
                    prefix = element_prefix(&e);
                }
                if !done && depth == 1 && AFTER_CALC_PR.contains(&e.local_name().as_ref()) {
                    write_calc_pr(&mut writer, &prefix)?;
                    done = true;
                }
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                if !done && depth == 1 && AFTER_CALC_PR.contains(&e.local_name().as_ref()) {
                    write_calc_pr(&mut writer, &prefix)?;
                    done = true;
                }
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if !done && depth == 0 {
                    write_calc_pr(&mut writer, &prefix)?;
                    done = true;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

fn write_calc_pr<W: std::io::Write>(writer: &mut Writer<W>, prefix: &str) -> Result<(), StoreError> {
    let name = qualify(prefix, "calcPr");
    let mut calc_pr = BytesStart::new(name.as_str());
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    writer.write_event(Event::Empty(calc_pr))?;
    Ok(())
}

/// Unescaped value of the attribute named `key`
pub(crate) fn attribute_value(e: &BytesStart, key: &[u8]) -> Result<Option<String>, StoreError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

/// Copy of `e` with `key` set to `value` (replacing any existing value)
pub(crate) fn with_attribute(
    e: &BytesStart,
    key: &[u8],
    value: &str,
) -> Result<BytesStart<'static>, StoreError> {
    let mut updated = e.to_owned();
    updated.clear_attributes();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != key {
            updated.push_attribute(attr);
        }
    }
    updated.push_attribute((key, value.as_bytes()));
    Ok(updated)
}

/// Copy of `e` without the attribute named `key`
pub(crate) fn without_attribute(e: &BytesStart, key: &[u8]) -> Result<BytesStart<'static>, StoreError> {
    let mut updated = e.to_owned();
    updated.clear_attributes();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != key {
            updated.push_attribute(attr);
        }
    }
    Ok(updated)
}

/// Namespace prefix of an element ("x" for `<x:row>`), empty when unprefixed
pub(crate) fn element_prefix(e: &BytesStart) -> String {
    e.name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
        .unwrap_or_default()
}

/// Element name carrying `prefix`
pub(crate) fn qualify(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}
