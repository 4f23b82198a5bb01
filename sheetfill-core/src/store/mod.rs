//! Workbook stores: the open/read/write/save surface the job runner drives

mod calamine_book;
mod formula;
mod package;
mod sheet_xml;
mod xlsx;

pub use calamine_book::CalamineBook;
pub use xlsx::XlsxTemplate;

use std::path::Path;

use crate::address::{CellAddress, CellRange};
use crate::error::Result;
use crate::value::CellValue;

/// An open workbook.
///
/// Sheet arguments are exact names as returned by [`WorkbookStore::sheet_names`];
/// fuzzy matching happens in [`crate::locator`] before the store is called.
/// The handle is released when the store is dropped.
pub trait WorkbookStore {
    /// Sheet names in workbook order
    fn sheet_names(&self) -> &[String];

    /// Remove protection from a sheet. Best-effort: `false` means the sheet was
    /// unknown, not protected, or the store cannot change it.
    fn unprotect_sheet(&mut self, sheet: &str) -> bool;

    /// Read the value stored at `addr`, including writes not yet saved
    fn read_cell(&self, sheet: &str, addr: CellAddress) -> Result<CellValue>;

    /// Stage a value for `addr`
    fn write_cell(&mut self, sheet: &str, addr: CellAddress, value: CellValue) -> Result<()>;

    /// Bounding range of the non-empty cells, `None` for an empty sheet
    fn used_range(&self, sheet: &str) -> Result<Option<CellRange>>;

    /// Persist the workbook to `path`
    fn save(&mut self, path: &Path) -> Result<()>;
}
