//! sheetfill-core: Core library for filling Excel templates from JSON jobs
//!
//! A job either transcribes blocks of values into sheets of an .xlsx/.xlsm
//! template (keeping its formatting, drawings and macros) or reads a list of
//! names out of a workbook. Sheets are matched by name fragment, so callers
//! only need to know roughly what a sheet is called.

pub mod address;
pub mod config;
pub mod error;
pub mod job;
pub mod locator;
pub mod report;
pub mod runner;
pub mod store;
pub mod value;

pub use address::{CellAddress, CellRange, ColumnSelection};
pub use config::FillConfig;
pub use error::{FillError, Result};
pub use job::{Job, JobAction};
pub use report::JobResult;
pub use runner::run;
pub use store::{CalamineBook, WorkbookStore, XlsxTemplate};
pub use value::CellValue;
