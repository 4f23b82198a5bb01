//! JSON job descriptions
//!
//! A job file names one action plus its parameters:
//!
//! ```json
//! {
//!   "action": "write_template",
//!   "template_path": "C:/templates/report.xlsx",
//!   "output_path": "C:/out/report.xlsx",
//!   "operations": [
//!     { "sheet_name": "Report", "start_cell": "B3", "data": [["A", 1], ["B", 2]] }
//!   ],
//!   "log_dir": "C:/logs"
//! }
//! ```
//!
//! Job-level fields are validated up front. Operations are kept as raw JSON and
//! decoded one at a time by the write pass, so one malformed operation only
//! skips itself.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::address::{self, CellAddress};
use crate::error::{FillError, Result};
use crate::value::CellValue;

/// A decoded job file
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub action: JobAction,
    /// Directory for the diagnostic log
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    WriteTemplate(WriteTemplateJob),
    ReadRoster(ReadRosterJob),
}

impl JobAction {
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::WriteTemplate(_) => "write_template",
            JobAction::ReadRoster(_) => "read_roster",
        }
    }
}

/// Transcribe data blocks into a template workbook
#[derive(Debug, Clone, PartialEq)]
pub struct WriteTemplateJob {
    pub template_path: PathBuf,
    /// Destination; the template is overwritten when absent
    pub output_path: Option<PathBuf>,
    /// Raw operations, decoded with [`WriteOperation::decode`]
    pub operations: Vec<Value>,
}

impl WriteTemplateJob {
    /// Where the filled workbook is saved
    pub fn output_path(&self) -> &Path {
        self.output_path.as_deref().unwrap_or(&self.template_path)
    }
}

/// Extract a list of names from a sheet
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRosterJob {
    pub file_path: PathBuf,
    pub sheet_name: Option<String>,
    /// Column letter ("D") or range ("A1:B10")
    pub column: Option<String>,
    pub has_header: Option<bool>,
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RawAction {
    WriteTemplate(RawWriteTemplate),
    ReadRoster(RawReadRoster),
}

#[derive(Deserialize)]
struct RawWriteTemplate {
    template_path: Option<String>,
    operations: Option<Vec<Value>>,
    output_path: Option<String>,
}

#[derive(Deserialize)]
struct RawReadRoster {
    file_path: Option<String>,
    sheet_name: Option<String>,
    column: Option<String>,
    has_header: Option<bool>,
}

impl Job {
    /// Decode a job file's contents
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(FillError::InvalidJob)?;
        let log_dir = non_empty(value.get("log_dir").and_then(Value::as_str)).map(PathBuf::from);

        let raw = if value.get("action").is_some() {
            serde_json::from_value(value).map_err(FillError::InvalidJob)?
        } else if value.get("template_path").is_some() {
            // Job files written before `action` existed only knew about templates
            RawAction::WriteTemplate(serde_json::from_value(value).map_err(FillError::InvalidJob)?)
        } else {
            return Err(FillError::MissingParameter("action".to_string()));
        };

        let action = match raw {
            RawAction::WriteTemplate(raw) => JobAction::WriteTemplate(WriteTemplateJob {
                template_path: required_path(raw.template_path, "template_path")?,
                output_path: non_empty(raw.output_path.as_deref()).map(PathBuf::from),
                operations: raw
                    .operations
                    .ok_or_else(|| FillError::MissingParameter("operations".to_string()))?,
            }),
            RawAction::ReadRoster(raw) => JobAction::ReadRoster(ReadRosterJob {
                file_path: required_path(raw.file_path, "file_path")?,
                sheet_name: non_empty(raw.sheet_name.as_deref()).map(str::to_string),
                column: non_empty(raw.column.as_deref()).map(str::to_string),
                has_header: raw.has_header,
            }),
        };

        Ok(Job { action, log_dir })
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|s| !s.is_empty())
}

fn required_path(path: Option<String>, field: &str) -> Result<PathBuf> {
    non_empty(path.as_deref())
        .map(PathBuf::from)
        .ok_or_else(|| FillError::MissingParameter(field.to_string()))
}

/// One block of values to transcribe into a sheet
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    pub sheet_name: String,
    pub start: CellAddress,
    pub rows: Vec<Vec<CellValue>>,
    /// Column offset from `start` for each value position of a row
    pub column_offsets: Option<Vec<u32>>,
}

#[derive(Deserialize)]
struct RawOperation {
    sheet_name: Option<String>,
    start_cell: Option<String>,
    data: Option<Value>,
    column_offsets: Option<Vec<u32>>,
}

impl WriteOperation {
    /// Decode and validate one entry of `operations`
    pub fn decode(value: &Value) -> Result<Self> {
        let raw = RawOperation::deserialize(value).map_err(|e| FillError::InvalidValue {
            field: "operation".to_string(),
            reason: e.to_string(),
        })?;

        let sheet_name = non_empty(raw.sheet_name.as_deref())
            .ok_or_else(|| FillError::MissingParameter("sheet_name".to_string()))?
            .to_string();
        let start_cell = non_empty(raw.start_cell.as_deref())
            .ok_or_else(|| FillError::MissingParameter("start_cell".to_string()))?;
        let rows = decode_rows(raw.data.as_ref())?;
        let start = address::resolve(start_cell)?;

        Ok(WriteOperation {
            sheet_name,
            start,
            rows,
            column_offsets: raw.column_offsets.filter(|offsets| !offsets.is_empty()),
        })
    }

    /// Target address of every value that has one, in row-major order.
    ///
    /// Fails if any target falls outside the worksheet, so an operation is
    /// written entirely or not at all.
    pub fn placements(&self) -> Result<Vec<(CellAddress, &CellValue)>> {
        let mut placements = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                let offset = match &self.column_offsets {
                    Some(offsets) => match offsets.get(j) {
                        Some(offset) => *offset,
                        None => continue,
                    },
                    None => j as u32,
                };
                let addr = CellAddress::new(
                    self.start.row.saturating_add(i as u32),
                    self.start.col.saturating_add(offset),
                );
                if !addr.is_within_sheet_limits() {
                    return Err(FillError::InvalidAddress(addr.to_string()));
                }
                placements.push((addr, value));
            }
        }
        Ok(placements)
    }

    /// Values with no entry in `column_offsets`
    pub fn unplaced_values(&self) -> usize {
        match &self.column_offsets {
            Some(offsets) => self
                .rows
                .iter()
                .map(|row| row.len().saturating_sub(offsets.len()))
                .sum(),
            None => 0,
        }
    }
}

fn decode_rows(data: Option<&Value>) -> Result<Vec<Vec<CellValue>>> {
    let items = match data {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) | Some(Value::Null) | None => {
            return Err(FillError::MissingParameter("data".to_string()));
        }
        Some(_) => {
            return Err(FillError::InvalidValue {
                field: "data".to_string(),
                reason: "expected an array of rows".to_string(),
            });
        }
    };

    // A flat list of scalars is a single row
    if items.iter().all(|item| !item.is_array()) {
        return Ok(vec![decode_row(items, 0)?]);
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Array(row) => decode_row(row, i),
            _ => Err(FillError::InvalidValue {
                field: format!("data[{}]", i),
                reason: "mixes rows and single values".to_string(),
            }),
        })
        .collect()
}

fn decode_row(row: &[Value], i: usize) -> Result<Vec<CellValue>> {
    row.iter()
        .enumerate()
        .map(|(j, value)| {
            CellValue::from_json(value).ok_or_else(|| FillError::InvalidValue {
                field: format!("data[{}][{}]", i, j),
                reason: "nested arrays and objects cannot be written to a cell".to_string(),
            })
        })
        .collect()
}
