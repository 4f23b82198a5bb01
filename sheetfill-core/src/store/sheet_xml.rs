//! Worksheet XML: reading cell values and merging staged writes into `<sheetData>`

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, Cursor, Write};

use super::formula;
use super::package::{
    attribute_value, element_prefix, qualify, read_rich_text, read_text_node, with_attribute,
    without_attribute,
};
use crate::address::{self, CellAddress, CellRange};
use crate::error::StoreError;
use crate::value::{CellValue, format_number};

/// Staged changes for one worksheet
pub(crate) struct SheetEdit<'a> {
    pub cells: &'a BTreeMap<CellAddress, CellValue>,
    pub remove_protection: bool,
}

/// Rewritten worksheet plus whether formulas need recalculating
pub(crate) struct MergeOutcome {
    pub xml: Vec<u8>,
    pub needs_recalc: bool,
}

type RowCells<'a> = BTreeMap<u32, &'a CellValue>;

/// Stream `xml` into a new worksheet with the staged cells applied.
///
/// Rows and cells stay in ascending order; missing ones are inserted where they
/// belong. A replaced cell keeps its style attribute and loses its old value,
/// type and formula. Shared formulas that lose their anchor cell are spelled
/// out in each remaining cell, and array formulas that take a write are reduced
/// to their cached values.
pub(crate) fn merge_cells(xml: &[u8], edit: &SheetEdit) -> Result<MergeOutcome, StoreError> {
    let fixups = scan_formula_groups(xml, edit.cells)?;
    let mut pending: BTreeMap<u32, RowCells> = BTreeMap::new();
    for (addr, value) in edit.cells {
        pending.entry(addr.row).or_default().insert(addr.col, value);
    }
    let staged_bounds = edit
        .cells
        .keys()
        .fold(None, |bounds: Option<CellRange>, addr| match bounds {
            Some(range) => Some(range.include(*addr)),
            None => Some(CellRange::new(*addr, *addr)),
        });

    let mut merger = Merger {
        writer: Writer::new(Cursor::new(Vec::new())),
        prefix: String::new(),
        pending,
        row_pending: None,
        current_row: 0,
        current_col: 0,
        needs_recalc: fixups.is_active()
            || edit
                .cells
                .values()
                .any(|value| matches!(value, CellValue::Formula(_))),
    };

    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    let mut in_sheet_data = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                merger.prefix = element_prefix(&e);
                in_sheet_data = true;
                merger.writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                merger.prefix = element_prefix(&e);
                merger.writer.write_event(Event::Start(e.borrow()))?;
                merger.flush_rows_before(u32::MAX)?;
                merger.writer.write_event(Event::End(e.to_end()))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                merger.flush_rows_before(u32::MAX)?;
                in_sheet_data = false;
                merger.writer.write_event(Event::End(e))?;
            }

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                merger.open_row(&e, false)?;
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                merger.open_row(&e, true)?;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                merger.close_row(e)?;
            }

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                if merger.open_cell(&e, false)? && skip_element(&mut reader, &mut skip_buf)? {
                    merger.needs_recalc = true;
                }
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                merger.open_cell(&e, true)?;
            }

            Event::Start(e) if in_sheet_data && fixups.is_active() && e.local_name().as_ref() == b"f" => {
                let text = read_text_node(&mut reader)?;
                merger.copy_formula(&e, Some(&text), &fixups)?;
            }
            Event::Empty(e) if in_sheet_data && fixups.is_active() && e.local_name().as_ref() == b"f" => {
                merger.copy_formula(&e, None, &fixups)?;
            }

            Event::Start(e) if edit.remove_protection && e.local_name().as_ref() == b"sheetProtection" => {
                skip_element(&mut reader, &mut skip_buf)?;
            }
            Event::Empty(e) if edit.remove_protection && e.local_name().as_ref() == b"sheetProtection" => {}

            Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                let grown = match (staged_bounds, attribute_value(&e, b"ref")?) {
                    (Some(bounds), Some(current)) => parse_dimension(&current)
                        .map(|range| range.union(&bounds))
                        .map(|range| with_attribute(&e, b"ref", &range.to_string()))
                        .transpose()?,
                    _ => None,
                };
                match grown {
                    Some(dimension) => merger.writer.write_event(Event::Empty(dimension))?,
                    None => merger.writer.write_event(Event::Empty(e))?,
                }
            }

            Event::Eof => break,
            e => merger.writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(MergeOutcome {
        xml: merger.writer.into_inner().into_inner(),
        needs_recalc: merger.needs_recalc,
    })
}

struct Merger<'a, W: Write> {
    writer: Writer<W>,
    prefix: String,
    // Staged rows not reached yet
    pending: BTreeMap<u32, RowCells<'a>>,
    // Staged cells of the row being copied, if it has any
    row_pending: Option<RowCells<'a>>,
    current_row: u32,
    current_col: u32,
    needs_recalc: bool,
}

impl<W: Write> Merger<'_, W> {
    fn open_row(&mut self, e: &BytesStart, is_empty: bool) -> Result<(), StoreError> {
        self.current_row = row_number(e, self.current_row)?;
        self.current_col = 0;
        self.flush_rows_before(self.current_row)?;

        match self.pending.remove(&self.current_row) {
            None if is_empty => self.writer.write_event(Event::Empty(e.borrow()))?,
            None => self.writer.write_event(Event::Start(e.borrow()))?,
            Some(cells) => {
                // spans is a per-row hint that new cells may invalidate
                let row = without_attribute(e, b"spans")?;
                self.writer.write_event(Event::Start(row.borrow()))?;
                if is_empty {
                    self.write_cells(cells)?;
                    self.writer.write_event(Event::End(row.to_end()))?;
                } else {
                    self.row_pending = Some(cells);
                }
            }
        }
        Ok(())
    }

    fn close_row(&mut self, e: BytesEnd) -> Result<(), StoreError> {
        if let Some(cells) = self.row_pending.take() {
            self.write_cells(cells)?;
        }
        self.writer.write_event(Event::End(e))?;
        Ok(())
    }

    /// Copy or replace one existing cell. Returns true when the caller must
    /// skip the original cell's content (it was replaced).
    fn open_cell(&mut self, e: &BytesStart, is_empty: bool) -> Result<bool, StoreError> {
        self.current_col = match attribute_value(e, b"r")? {
            Some(r) => {
                address::resolve(&r)
                    .map_err(|_| StoreError::Malformed(format!("invalid cell reference '{}'", r)))?
                    .col
            }
            None => self.current_col + 1,
        };

        let Some(cells) = self.row_pending.as_mut() else {
            let copy = if is_empty { Event::Empty(e.borrow()) } else { Event::Start(e.borrow()) };
            self.writer.write_event(copy)?;
            return Ok(false);
        };
        let later = cells.split_off(&self.current_col);
        let earlier = std::mem::replace(cells, later);
        let replacement = cells.remove(&self.current_col);
        self.write_cells(earlier)?;

        match replacement {
            Some(value) => {
                let addr = CellAddress::new(self.current_row, self.current_col);
                write_cell(&mut self.writer, &self.prefix, Some(e), addr, value)?;
                Ok(!is_empty)
            }
            None if is_empty => {
                self.writer.write_event(Event::Empty(e.borrow()))?;
                Ok(false)
            }
            None => {
                self.writer.write_event(Event::Start(e.borrow()))?;
                Ok(false)
            }
        }
    }

    /// Copy the `<f>` of a cell kept as is, rewriting it when its formula group
    /// was broken up. `text` is `None` for an empty `<f/>`.
    fn copy_formula(
        &mut self,
        e: &BytesStart,
        text: Option<&str>,
        fixups: &FormulaFixups,
    ) -> Result<(), StoreError> {
        let here = CellAddress::new(self.current_row, self.current_col);
        match attribute_value(e, b"t")?.as_deref() {
            // The cached <v> stays behind as a plain value
            Some("array") if fixups.broken_arrays.contains(&here) => return Ok(()),
            Some("shared") => {
                let orphaned = attribute_value(e, b"si")?
                    .and_then(|si| fixups.orphaned_shared.get(&si));
                if let Some((anchor, anchor_formula)) = orphaned {
                    let rows = i64::from(here.row) - i64::from(anchor.row);
                    let cols = i64::from(here.col) - i64::from(anchor.col);
                    let moved = formula::translate(anchor_formula, rows, cols);
                    return write_text_element(&mut self.writer, &self.prefix, "f", &moved, false);
                }
            }
            _ => {}
        }

        match text {
            Some(text) => {
                self.writer.write_event(Event::Start(e.borrow()))?;
                self.writer.write_event(Event::Text(BytesText::new(text)))?;
                self.writer.write_event(Event::End(e.to_end()))?;
            }
            None => self.writer.write_event(Event::Empty(e.borrow()))?,
        }
        Ok(())
    }

    /// Write every staged row numbered below `row` as a new `<row>`
    fn flush_rows_before(&mut self, row: u32) -> Result<(), StoreError> {
        let later = self.pending.split_off(&row);
        let earlier = std::mem::replace(&mut self.pending, later);
        for (r, cells) in earlier {
            let name = qualify(&self.prefix, "row");
            let mut new_row = BytesStart::new(name.as_str());
            new_row.push_attribute(("r", r.to_string().as_str()));
            self.writer.write_event(Event::Start(new_row.borrow()))?;
            let previous = std::mem::replace(&mut self.current_row, r);
            self.write_cells(cells)?;
            self.current_row = previous;
            self.writer.write_event(Event::End(new_row.to_end()))?;
        }
        Ok(())
    }

    fn write_cells(&mut self, cells: RowCells) -> Result<(), StoreError> {
        for (col, value) in cells {
            let addr = CellAddress::new(self.current_row, col);
            write_cell(&mut self.writer, &self.prefix, None, addr, value)?;
        }
        Ok(())
    }
}

/// Write a `<c>` element for `value`, carrying over the original cell's
/// attributes (style, phonetic flag) when there is one
fn write_cell<W: Write>(
    writer: &mut Writer<W>,
    prefix: &str,
    original: Option<&BytesStart>,
    addr: CellAddress,
    value: &CellValue,
) -> Result<(), StoreError> {
    let name = qualify(prefix, "c");
    let mut cell = BytesStart::new(name.as_str());
    cell.push_attribute(("r", addr.to_string().as_str()));
    if let Some(original) = original {
        for attr in original.attributes() {
            let attr = attr?;
            // cm/vm point into rich-value metadata that no longer applies
            if !matches!(attr.key.as_ref(), b"r" | b"t" | b"cm" | b"vm") {
                cell.push_attribute(attr);
            }
        }
    }

    match value {
        CellValue::Empty => {
            writer.write_event(Event::Empty(cell))?;
            return Ok(());
        }
        CellValue::Bool(_) => cell.push_attribute(("t", "b")),
        CellValue::Text(_) => cell.push_attribute(("t", "inlineStr")),
        CellValue::Number(_) | CellValue::Formula(_) => {}
    }

    writer.write_event(Event::Start(cell.borrow()))?;
    match value {
        CellValue::Number(n) => write_text_element(writer, prefix, "v", &format_number(*n), false)?,
        CellValue::Bool(b) => write_text_element(writer, prefix, "v", if *b { "1" } else { "0" }, false)?,
        CellValue::Formula(f) => write_text_element(writer, prefix, "f", f, false)?,
        CellValue::Text(s) => {
            let is_name = qualify(prefix, "is");
            let is = BytesStart::new(is_name.as_str());
            writer.write_event(Event::Start(is.borrow()))?;
            write_text_element(writer, prefix, "t", &sanitize_text(s), true)?;
            writer.write_event(Event::End(is.to_end()))?;
        }
        CellValue::Empty => {}
    }
    writer.write_event(Event::End(cell.to_end()))?;
    Ok(())
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    prefix: &str,
    local: &str,
    text: &str,
    preserve_space: bool,
) -> Result<(), StoreError> {
    let name = qualify(prefix, local);
    let mut element = BytesStart::new(name.as_str());
    if preserve_space {
        element.push_attribute(("xml:space", "preserve"));
    }
    writer.write_event(Event::Start(element.borrow()))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(element.to_end()))?;
    Ok(())
}

// XML 1.0 forbids most control characters, even escaped
fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Consume events up to the end of the element just opened. Returns whether a
/// `<f>` (formula) was inside.
fn skip_element<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<bool, StoreError> {
    let mut depth = 1usize;
    let mut saw_formula = false;
    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Start(e) => {
                saw_formula |= e.local_name().as_ref() == b"f";
                depth += 1;
            }
            Event::Empty(e) => saw_formula |= e.local_name().as_ref() == b"f",
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(saw_formula);
                }
            }
            Event::Eof => {
                return Err(StoreError::Malformed(
                    "worksheet ended inside an element".to_string(),
                ));
            }
            _ => {}
        }
    }
}

/// Formula groups the staged writes break up
#[derive(Debug, Default)]
struct FormulaFixups {
    // si of each shared formula whose anchor is overwritten, with the anchor
    // cell and its formula text
    orphaned_shared: HashMap<String, (CellAddress, String)>,
    // Anchors of array formulas whose range takes a write
    broken_arrays: HashSet<CellAddress>,
}

impl FormulaFixups {
    fn is_active(&self) -> bool {
        !self.orphaned_shared.is_empty() || !self.broken_arrays.is_empty()
    }
}

fn scan_formula_groups(
    xml: &[u8],
    staged: &BTreeMap<CellAddress, CellValue>,
) -> Result<FormulaFixups, StoreError> {
    let mut fixups = FormulaFixups::default();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current_row = 0u32;
    let mut current_col = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                current_row = row_number(&e, current_row)?;
                current_col = 0;
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                current_col = cell_column(&e)?.unwrap_or(current_col + 1);
            }
            // Only anchors carry `ref`
            Event::Start(e) if e.local_name().as_ref() == b"f" => {
                let anchor = CellAddress::new(current_row, current_col);
                let group = attribute_value(&e, b"ref")?.as_deref().and_then(parse_dimension);
                match (attribute_value(&e, b"t")?.as_deref(), group) {
                    (Some("shared"), Some(_)) if staged.contains_key(&anchor) => {
                        if let Some(si) = attribute_value(&e, b"si")? {
                            let text = read_text_node(&mut reader)?;
                            fixups.orphaned_shared.insert(si, (anchor, text));
                        }
                    }
                    (Some("array"), Some(range)) if staged.keys().any(|addr| range.contains(*addr)) => {
                        fixups.broken_arrays.insert(anchor);
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(fixups)
}

fn row_number(e: &BytesStart, previous: u32) -> Result<u32, StoreError> {
    match attribute_value(e, b"r")? {
        Some(r) => r
            .parse::<u32>()
            .map_err(|_| StoreError::Malformed(format!("invalid row number '{}'", r))),
        None => Ok(previous.saturating_add(1)),
    }
}

fn parse_dimension(reference: &str) -> Option<CellRange> {
    CellRange::parse(reference)
        .or_else(|_| address::resolve(reference).map(|addr| CellRange::new(addr, addr)))
        .ok()
}

/// Read every non-empty cell of a worksheet
pub(crate) fn read_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<BTreeMap<CellAddress, CellValue>, StoreError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cells = BTreeMap::new();
    let mut current_row = 0u32;
    let mut current_col = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                current_row = row_number(&e, current_row)?;
                current_col = 0;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                current_col = cell_column(&e)?.unwrap_or(current_col + 1);
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                current_col = cell_column(&e)?.unwrap_or(current_col + 1);
                let cell_type = attribute_value(&e, b"t")?.unwrap_or_default();
                let value = parse_cell_contents(&mut reader, &cell_type, shared_strings)?;
                if !value.is_empty() {
                    cells.insert(CellAddress::new(current_row, current_col), value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(cells)
}

fn cell_column(e: &BytesStart) -> Result<Option<u32>, StoreError> {
    attribute_value(e, b"r")?
        .map(|r| {
            address::resolve(&r)
                .map(|addr| addr.col)
                .map_err(|_| StoreError::Malformed(format!("invalid cell reference '{}'", r)))
        })
        .transpose()
}

fn parse_cell_contents<R: BufRead>(
    reader: &mut Reader<R>,
    cell_type: &str,
    shared_strings: &[String],
) -> Result<CellValue, StoreError> {
    let mut raw_value = None;
    let mut formula = None;
    let mut inline = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"v" => raw_value = Some(read_text_node(reader)?),
                b"f" => {
                    let text = read_text_node(reader)?;
                    if !text.is_empty() {
                        formula = Some(text);
                    }
                }
                b"is" => inline = Some(read_rich_text(reader, b"is")?),
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"c" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let value = match (cell_type, raw_value) {
        ("inlineStr", _) => CellValue::Text(inline.unwrap_or_default()),
        ("s", Some(v)) => {
            let idx = v.trim().parse::<usize>().unwrap_or(0);
            CellValue::Text(shared_strings.get(idx).cloned().unwrap_or_default())
        }
        ("b", Some(v)) => CellValue::Bool(v.trim() == "1"),
        ("str" | "e" | "d", Some(v)) => CellValue::Text(v),
        (_, Some(v)) => match v.trim().parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => CellValue::Text(v),
        },
        (_, None) => formula.map(CellValue::Formula).unwrap_or_default(),
    };
    Ok(value)
}
