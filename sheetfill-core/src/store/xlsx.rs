//! Template store for .xlsx/.xlsm packages.
//!
//! The package is read fully into memory on open. Saving streams every part
//! back out unchanged except the worksheets that were written to or
//! unprotected (plus the calc-chain cleanup formula changes require), so
//! styles, drawings and VBA projects survive untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::WorkbookStore;
use super::package::{
    self, CALC_CHAIN_PART, CONTENT_TYPES_PART, Part, SHARED_STRINGS_PART, WORKBOOK_PART,
    WORKBOOK_RELS_PART,
};
use super::sheet_xml::{self, SheetEdit};
use crate::address::{CellAddress, CellRange};
use crate::error::{FillError, Result, StoreError};
use crate::value::CellValue;

#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    part: String,
}

/// An .xlsx/.xlsm workbook opened for template filling
#[derive(Debug)]
pub struct XlsxTemplate {
    path: PathBuf,
    parts: Vec<Part>,
    sheets: Vec<SheetEntry>,
    sheet_names: Vec<String>,
    shared_strings: Vec<String>,
    staged: HashMap<String, BTreeMap<CellAddress, CellValue>>,
    unprotected: HashSet<String>,
}

impl XlsxTemplate {
    /// Open an .xlsx or .xlsm file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::load(path).map_err(|source| FillError::WorkbookLoad {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load(path: &Path) -> Result<Self, StoreError> {
        let is_xlsx = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("xlsx") || s.eq_ignore_ascii_case("xlsm"))
            .unwrap_or(false);
        if !is_xlsx {
            return Err(StoreError::UnsupportedFormat(path.display().to_string()));
        }

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;
        let parts = package::read_parts(&mut archive)?;

        let find = |name: &str| parts.iter().find(|p| p.name == name).map(|p| p.data.as_slice());
        let workbook_xml = find(WORKBOOK_PART)
            .ok_or_else(|| StoreError::Malformed(format!("missing {}", WORKBOOK_PART)))?;
        let rels = match find(WORKBOOK_RELS_PART) {
            Some(xml) => package::parse_relationships(xml)?,
            None => HashMap::new(),
        };

        let mut sheets = Vec::new();
        for (name, r_id) in package::parse_sheet_entries(workbook_xml)? {
            let target = rels.get(&r_id).ok_or_else(|| {
                StoreError::Malformed(format!("relationship '{}' not found for sheet '{}'", r_id, name))
            })?;
            sheets.push(SheetEntry {
                name,
                part: package::resolve_target(target),
            });
        }

        let shared_strings = match find(SHARED_STRINGS_PART) {
            Some(xml) => package::parse_shared_strings(xml)?,
            None => Vec::new(),
        };

        debug!(
            path = %path.display(),
            parts = parts.len(),
            sheets = sheets.len(),
            "opened template package"
        );

        Ok(Self {
            path: path.to_path_buf(),
            sheet_names: sheets.iter().map(|s| s.name.clone()).collect(),
            parts,
            sheets,
            shared_strings,
            staged: HashMap::new(),
            unprotected: HashSet::new(),
        })
    }

    /// Number of staged cell writes not yet saved
    pub fn staged_cells(&self) -> usize {
        self.staged.values().map(BTreeMap::len).sum()
    }

    fn sheet_part(&self, sheet: &str) -> Result<&str> {
        self.sheets
            .iter()
            .find(|s| s.name == sheet)
            .map(|s| s.part.as_str())
            .ok_or_else(|| FillError::SheetNotFound(sheet.to_string()))
    }

    fn part_data(&self, name: &str) -> Option<&[u8]> {
        self.parts.iter().find(|p| p.name == name).map(|p| p.data.as_slice())
    }

    fn load_cells(&self, part: &str) -> Result<BTreeMap<CellAddress, CellValue>> {
        let xml = self.part_data(part).ok_or_else(|| FillError::WorkbookLoad {
            path: self.path.clone(),
            source: StoreError::Malformed(format!("missing worksheet part {}", part)),
        })?;
        sheet_xml::read_cells(xml, &self.shared_strings).map_err(|source| FillError::WorkbookLoad {
            path: self.path.clone(),
            source,
        })
    }

    /// Render the package with all staged edits applied
    fn render(&self) -> Result<Vec<Part>, StoreError> {
        let no_cells = BTreeMap::new();
        let mut rewritten: HashMap<&str, Vec<u8>> = HashMap::new();
        let mut needs_recalc = false;

        for sheet in &self.sheets {
            let cells = self.staged.get(&sheet.part);
            let remove_protection = self.unprotected.contains(&sheet.part);
            if cells.is_none() && !remove_protection {
                continue;
            }
            let xml = self
                .part_data(&sheet.part)
                .ok_or_else(|| StoreError::Malformed(format!("missing worksheet part {}", sheet.part)))?;
            let outcome = sheet_xml::merge_cells(
                xml,
                &SheetEdit {
                    cells: cells.unwrap_or(&no_cells),
                    remove_protection,
                },
            )?;
            needs_recalc |= outcome.needs_recalc;
            rewritten.insert(sheet.part.as_str(), outcome.xml);
        }

        let mut parts = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let data = if let Some(xml) = rewritten.remove(part.name.as_str()) {
                xml
            } else if needs_recalc {
                // The calc chain lists formula cells; a stale one makes Excel repair the file
                match part.name.as_str() {
                    CALC_CHAIN_PART => continue,
                    CONTENT_TYPES_PART => package::remove_content_type_override(
                        &part.data,
                        &format!("/{}", CALC_CHAIN_PART),
                    )?,
                    WORKBOOK_RELS_PART => package::remove_relationship(&part.data, "calcChain.xml")?,
                    WORKBOOK_PART => package::force_full_calc_on_load(&part.data)?,
                    _ => part.data.clone(),
                }
            } else {
                part.data.clone()
            };
            parts.push(Part {
                name: part.name.clone(),
                data,
            });
        }
        Ok(parts)
    }

    fn write_package(&self, path: &Path) -> Result<(), StoreError> {
        let parts = self.render()?;

        // Write next to the destination first so a failed save leaves the old file intact
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workbook.xlsx".to_string());
        let temp_path = path.with_file_name(format!(".{}.sheetfill-tmp", file_name));

        let result = write_zip(&parts, &temp_path)
            .and_then(|()| fs::rename(&temp_path, path).map_err(StoreError::from));
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}

fn write_zip(parts: &[Part], path: &Path) -> Result<(), StoreError> {
    let output_file = File::create(path)?;
    let mut zip_writer = ZipWriter::new(output_file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for part in parts {
        zip_writer.start_file(part.name.as_str(), options)?;
        zip_writer.write_all(&part.data)?;
    }
    zip_writer.finish()?;
    Ok(())
}

impl WorkbookStore for XlsxTemplate {
    fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    fn unprotect_sheet(&mut self, sheet: &str) -> bool {
        let Some(part) = self
            .sheets
            .iter()
            .find(|s| s.name == sheet)
            .map(|s| s.part.clone())
        else {
            return false;
        };

        let protected = self
            .part_data(&part)
            .map(package::has_sheet_protection)
            .unwrap_or(Ok(false));
        match protected {
            Ok(true) => {
                debug!(sheet, "removing sheet protection");
                self.unprotected.insert(part);
                true
            }
            Ok(false) => false,
            Err(err) => {
                debug!(sheet, error = %err, "could not inspect sheet protection");
                false
            }
        }
    }

    fn read_cell(&self, sheet: &str, addr: CellAddress) -> Result<CellValue> {
        let part = self.sheet_part(sheet)?;
        if let Some(value) = self.staged.get(part).and_then(|cells| cells.get(&addr)) {
            return Ok(value.clone());
        }
        Ok(self.load_cells(part)?.remove(&addr).unwrap_or_default())
    }

    fn write_cell(&mut self, sheet: &str, addr: CellAddress, value: CellValue) -> Result<()> {
        if !addr.is_within_sheet_limits() {
            return Err(FillError::InvalidAddress(addr.to_string()));
        }
        let part = self.sheet_part(sheet)?.to_string();
        self.staged.entry(part).or_default().insert(addr, value);
        Ok(())
    }

    fn used_range(&self, sheet: &str) -> Result<Option<CellRange>> {
        let part = self.sheet_part(sheet)?;
        let mut cells = self.load_cells(part)?;
        if let Some(staged) = self.staged.get(part) {
            for (addr, value) in staged {
                cells.insert(*addr, value.clone());
            }
        }
        Ok(cells
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(addr, _)| *addr)
            .fold(None, |range: Option<CellRange>, addr| match range {
                Some(range) => Some(range.include(addr)),
                None => Some(CellRange::new(addr, addr)),
            }))
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.write_package(path).map_err(|source| FillError::WorkbookSave {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            cells = self.staged_cells(),
            "saved workbook"
        );
        Ok(())
    }
}
