//! Read-only store backed by calamine (xlsx, xlsm, xlsb, xls, ods)

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::WorkbookStore;
use crate::address::{CellAddress, CellRange};
use crate::error::{FillError, Result, StoreError};
use crate::value::CellValue;

/// A workbook opened for reading only
pub struct CalamineBook {
    path: PathBuf,
    workbook: RefCell<Sheets<BufReader<File>>>,
    sheet_names: Vec<String>,
    // Sheets are decoded on first access
    ranges: RefCell<HashMap<String, Range<Data>>>,
}

impl CalamineBook {
    /// Open any spreadsheet format calamine understands
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let workbook = open_workbook_auto(path).map_err(|err| FillError::WorkbookLoad {
            path: path.to_path_buf(),
            source: StoreError::Calamine(err),
        })?;
        let sheet_names = workbook.sheet_names();
        debug!(path = %path.display(), sheets = sheet_names.len(), "opened workbook for reading");

        Ok(Self {
            path: path.to_path_buf(),
            workbook: RefCell::new(workbook),
            sheet_names,
            ranges: RefCell::new(HashMap::new()),
        })
    }

    /// Run `f` on the decoded range of `sheet`
    fn with_range<T>(&self, sheet: &str, f: impl FnOnce(&Range<Data>) -> T) -> Result<T> {
        if !self.sheet_names.iter().any(|name| name == sheet) {
            return Err(FillError::SheetNotFound(sheet.to_string()));
        }

        let mut ranges = self.ranges.borrow_mut();
        if !ranges.contains_key(sheet) {
            let range = self
                .workbook
                .borrow_mut()
                .worksheet_range(sheet)
                .map_err(|err| FillError::WorkbookLoad {
                    path: self.path.clone(),
                    source: StoreError::Calamine(err),
                })?;
            ranges.insert(sheet.to_string(), range);
        }

        let range = ranges
            .get(sheet)
            .ok_or_else(|| FillError::SheetNotFound(sheet.to_string()))?;
        Ok(f(range))
    }
}

impl WorkbookStore for CalamineBook {
    fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    fn unprotect_sheet(&mut self, _sheet: &str) -> bool {
        false
    }

    fn read_cell(&self, sheet: &str, addr: CellAddress) -> Result<CellValue> {
        self.with_range(sheet, |range| {
            // calamine positions are 0-based and absolute
            range
                .get_value((addr.row - 1, addr.col - 1))
                .map(CellValue::from)
                .unwrap_or_default()
        })
    }

    fn write_cell(&mut self, _sheet: &str, _addr: CellAddress, _value: CellValue) -> Result<()> {
        Err(FillError::ReadOnly {
            path: self.path.clone(),
        })
    }

    fn used_range(&self, sheet: &str) -> Result<Option<CellRange>> {
        self.with_range(sheet, |range| {
            let (start_row, start_col) = range.start().unwrap_or((0, 0));
            let mut bounds: Option<CellRange> = None;
            for (row, col, data) in range.used_cells() {
                if matches!(data, Data::Empty) {
                    continue;
                }
                let addr = CellAddress::new(start_row + row as u32 + 1, start_col + col as u32 + 1);
                bounds = Some(match bounds {
                    Some(found) => found.include(addr),
                    None => CellRange::new(addr, addr),
                });
            }
            bounds
        })
    }

    fn save(&mut self, _path: &Path) -> Result<()> {
        Err(FillError::ReadOnly {
            path: self.path.clone(),
        })
    }
}
