//! Job execution: the template write pass and the roster read pass

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::{CellAddress, ColumnSelection, MAX_ROW};
use crate::config::{FillConfig, RosterDefaults};
use crate::error::{FillError, Result};
use crate::job::{Job, JobAction, ReadRosterJob, WriteOperation, WriteTemplateJob};
use crate::locator;
use crate::report::JobResult;
use crate::store::{CalamineBook, WorkbookStore, XlsxTemplate};

/// Run a decoded job to completion
pub fn run(job: &Job, config: &FillConfig) -> Result<JobResult> {
    info!(action = job.action.name(), "running job");
    match &job.action {
        JobAction::WriteTemplate(write) => write_template(write),
        JobAction::ReadRoster(roster) => read_roster(roster, &config.roster),
    }
}

/// Tally of a write pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteSummary {
    pub processed: usize,
    /// Reason for each skipped operation, in job order
    pub skipped: Vec<String>,
}

/// Fill the template and save it when anything was written
pub fn write_template(job: &WriteTemplateJob) -> Result<JobResult> {
    let mut store = XlsxTemplate::open(&job.template_path)?;
    let summary = apply_operations(&mut store, &job.operations)?;

    if summary.processed > 0 {
        store.save(job.output_path())?;
    } else {
        warn!(
            template = %job.template_path.display(),
            "no operation was processed, workbook left unchanged"
        );
    }

    info!(
        processed = summary.processed,
        skipped = summary.skipped.len(),
        "write pass finished"
    );
    Ok(JobResult::written(summary.processed, summary.skipped))
}

/// Apply every operation in order.
///
/// Operations that fail on their own (bad address, unknown sheet, missing or
/// malformed fields) are skipped with a warning. Store failures abort.
pub fn apply_operations<S: WorkbookStore>(store: &mut S, operations: &[Value]) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();
    for (i, operation) in operations.iter().enumerate() {
        let number = i + 1;
        match apply_operation(store, operation) {
            Ok(cells) => {
                debug!(operation = number, cells, "operation applied");
                summary.processed += 1;
            }
            Err(err) if err.is_operation_local() => {
                warn!(operation = number, error = %err, "skipping operation");
                summary.skipped.push(format!("operation {}: {}", number, err));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(summary)
}

fn apply_operation<S: WorkbookStore>(store: &mut S, operation: &Value) -> Result<usize> {
    let operation = WriteOperation::decode(operation)?;
    let sheet = locator::locate(&operation.sheet_name, store.sheet_names())
        .map(str::to_string)
        .ok_or_else(|| FillError::SheetNotFound(operation.sheet_name.clone()))?;
    if sheet != operation.sheet_name {
        debug!(requested = %operation.sheet_name, sheet = %sheet, "matched sheet by name fragment");
    }

    let placements = operation.placements()?;
    let unplaced = operation.unplaced_values();
    if unplaced > 0 {
        warn!(sheet = %sheet, values = unplaced, "values without a column offset were not written");
    }

    // Protection removal is best-effort; writes go ahead either way
    let _ = store.unprotect_sheet(&sheet);

    for (addr, value) in &placements {
        store.write_cell(&sheet, *addr, (*value).clone())?;
    }
    Ok(placements.len())
}

/// Where and how a roster is read
#[derive(Debug, Clone, PartialEq)]
pub struct RosterQuery {
    /// Requested sheet names, tried in order
    pub sheet_names: Vec<String>,
    pub selection: ColumnSelection,
    pub has_header: bool,
}

impl RosterQuery {
    /// Fill the fields the job leaves out from the configured defaults
    pub fn from_job(job: &ReadRosterJob, defaults: &RosterDefaults) -> Result<Self> {
        let sheet_names = match &job.sheet_name {
            Some(name) => vec![name.clone()],
            None => defaults.sheet_names.clone(),
        };
        let column = job.column.as_deref().unwrap_or(&defaults.column);
        Ok(Self {
            sheet_names,
            selection: ColumnSelection::parse(column)?,
            has_header: job.has_header.unwrap_or(defaults.has_header),
        })
    }
}

/// Read the list of names a roster job asks for
pub fn read_roster(job: &ReadRosterJob, defaults: &RosterDefaults) -> Result<JobResult> {
    let query = RosterQuery::from_job(job, defaults)?;
    let store = CalamineBook::open(&job.file_path)?;
    let names = extract_names(&store, &query)?;
    info!(names = names.len(), file = %job.file_path.display(), "roster read");
    Ok(JobResult::roster(names))
}

/// Collect one name per non-blank row of the selection.
///
/// The non-empty cells of a row are trimmed and joined with a single space.
/// Only the part of the selection that overlaps the used range is read.
pub fn extract_names<S: WorkbookStore>(store: &S, query: &RosterQuery) -> Result<Vec<String>> {
    let sheet = locator::locate_any(&query.sheet_names, store.sheet_names())
        .ok_or_else(|| FillError::SheetNotFound(query.sheet_names.join(" / ")))?;
    let Some(used) = store.used_range(sheet)? else {
        return Ok(Vec::new());
    };

    let (first, last) = match query.selection {
        ColumnSelection::Column(col) => (CellAddress::new(1, col), CellAddress::new(MAX_ROW, col)),
        ColumnSelection::Range(range) => (range.start, range.end),
    };
    // The header is the first row of the selection, used or not
    let header_rows = u32::from(query.has_header);
    let rows = first.row.saturating_add(header_rows).max(used.start.row)..=last.row.min(used.end.row);
    let cols = first.col.max(used.start.col)..=last.col.min(used.end.col);
    debug!(sheet, rows = ?rows, cols = ?cols, "reading roster");

    let mut names = Vec::new();
    for row in rows {
        let mut parts = Vec::new();
        for col in cols.clone() {
            let text = store.read_cell(sheet, CellAddress::new(row, col))?.as_text();
            if let Some(text) = text {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
        }
        if !parts.is_empty() {
            names.push(parts.join(" "));
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{CellRange, resolve};
    use crate::value::CellValue;
    use serde_json::json;
    use std::cell::Cell;
    use std::collections::{BTreeMap, HashSet};
    use std::path::{Path, PathBuf};

    /// In-memory store used to exercise the passes without a package on disk
    #[derive(Default)]
    struct MemoryStore {
        sheet_names: Vec<String>,
        cells: BTreeMap<(String, CellAddress), CellValue>,
        protected: HashSet<String>,
        saved: Vec<PathBuf>,
        reads: Cell<usize>,
    }

    impl MemoryStore {
        fn with_sheets(names: &[&str]) -> Self {
            Self {
                sheet_names: names.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn set(&mut self, sheet: &str, addr: &str, value: CellValue) {
            self.cells.insert((sheet.to_string(), resolve(addr).unwrap()), value);
        }

        fn get(&self, sheet: &str, addr: &str) -> CellValue {
            self.read_cell(sheet, resolve(addr).unwrap()).unwrap()
        }
    }

    impl WorkbookStore for MemoryStore {
        fn sheet_names(&self) -> &[String] {
            &self.sheet_names
        }

        fn unprotect_sheet(&mut self, sheet: &str) -> bool {
            self.protected.remove(sheet)
        }

        fn read_cell(&self, sheet: &str, addr: CellAddress) -> Result<CellValue> {
            self.reads.set(self.reads.get() + 1);
            Ok(self
                .cells
                .get(&(sheet.to_string(), addr))
                .cloned()
                .unwrap_or_default())
        }

        fn write_cell(&mut self, sheet: &str, addr: CellAddress, value: CellValue) -> Result<()> {
            self.cells.insert((sheet.to_string(), addr), value);
            Ok(())
        }

        fn used_range(&self, sheet: &str) -> Result<Option<CellRange>> {
            Ok(self
                .cells
                .iter()
                .filter(|((name, _), value)| name == sheet && !value.is_empty())
                .map(|((_, addr), _)| CellRange::new(*addr, *addr))
                .reduce(|a, b| a.union(&b)))
        }

        fn save(&mut self, path: &Path) -> Result<()> {
            self.saved.push(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_apply_operations_writes_values() {
        let mut store = MemoryStore::with_sheets(&["Summary", "Data 2024"]);
        store.protected.insert("Data 2024".to_string());
        let operations = vec![json!({
            "sheet_name": "Data",
            "start_cell": "B2",
            "data": [["a", 1], [true, null]]
        })];

        let summary = apply_operations(&mut store, &operations).unwrap();
        assert_eq!(summary, WriteSummary { processed: 1, skipped: Vec::new() });
        assert_eq!(store.get("Data 2024", "B2"), CellValue::Text("a".into()));
        assert_eq!(store.get("Data 2024", "C2"), CellValue::Number(1.0));
        assert_eq!(store.get("Data 2024", "B3"), CellValue::Bool(true));
        assert!(store.protected.is_empty());
    }

    #[test]
    fn test_apply_operations_skips_bad_operations() {
        let mut store = MemoryStore::with_sheets(&["Sheet1"]);
        let operations = vec![
            json!({"sheet_name": "Sheet1", "start_cell": "A1", "data": [[1]]}),
            json!({"sheet_name": "Missing", "start_cell": "A1", "data": [[2]]}),
            json!({"sheet_name": "Sheet1", "start_cell": "??", "data": [[3]]}),
            json!({"sheet_name": "Sheet1", "data": [[4]]}),
            json!({"sheet_name": "Sheet1", "start_cell": "A2", "data": [[{"x": 1}]]}),
            json!({"sheet_name": "Sheet1", "start_cell": "A3", "data": [[5]]}),
        ];

        let summary = apply_operations(&mut store, &operations).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped.len(), 4);
        assert!(summary.skipped[0].starts_with("operation 2:"));
        assert!(summary.skipped[0].contains("Missing"));
        assert_eq!(store.get("Sheet1", "A1"), CellValue::Number(1.0));
        assert_eq!(store.get("Sheet1", "A2"), CellValue::Empty);
        assert_eq!(store.get("Sheet1", "A3"), CellValue::Number(5.0));
    }

    #[test]
    fn test_operation_outside_sheet_writes_nothing() {
        let mut store = MemoryStore::with_sheets(&["Sheet1"]);
        let operations = vec![json!({"sheet_name": "Sheet1", "start_cell": "XFC1", "data": [[1, 2, 3]]})];

        let summary = apply_operations(&mut store, &operations).unwrap();
        assert_eq!(summary.processed, 0);
        assert!(store.cells.is_empty());
    }

    #[test]
    fn test_column_offsets() {
        let mut store = MemoryStore::with_sheets(&["Sheet1"]);
        let operations = vec![json!({
            "sheet_name": "Sheet1",
            "start_cell": "A1",
            "data": [["x", "y", "z"]],
            "column_offsets": [0, 2]
        })];

        apply_operations(&mut store, &operations).unwrap();
        assert_eq!(store.get("Sheet1", "A1"), CellValue::Text("x".into()));
        assert_eq!(store.get("Sheet1", "B1"), CellValue::Empty);
        assert_eq!(store.get("Sheet1", "C1"), CellValue::Text("y".into()));
        assert_eq!(store.cells.len(), 2);
    }

    fn query(sheet_names: &[&str], selection: &str, has_header: bool) -> RosterQuery {
        RosterQuery {
            sheet_names: sheet_names.iter().map(|s| s.to_string()).collect(),
            selection: ColumnSelection::parse(selection).unwrap(),
            has_header,
        }
    }

    fn roster_store() -> MemoryStore {
        let mut store = MemoryStore::with_sheets(&["表紙", "名前リスト"]);
        store.set("名前リスト", "D1", CellValue::Text("氏名".into()));
        store.set("名前リスト", "D2", CellValue::Text("  山田  ".into()));
        store.set("名前リスト", "E2", CellValue::Text("太郎".into()));
        store.set("名前リスト", "D3", CellValue::Text("   ".into()));
        store.set("名前リスト", "D4", CellValue::Number(42.0));
        store.set("名前リスト", "E4", CellValue::Text("花子".into()));
        store.set("名前リスト", "D5", CellValue::Text("鈴木".into()));
        store
    }

    #[test]
    fn test_extract_names_column() {
        let store = roster_store();
        let names = extract_names(&store, &query(&["リスト", "List"], "D", false)).unwrap();
        assert_eq!(names, vec!["氏名", "山田", "42", "鈴木"]);

        let names = extract_names(&store, &query(&["リスト"], "D", true)).unwrap();
        assert_eq!(names, vec!["山田", "42", "鈴木"]);
    }

    #[test]
    fn test_extract_names_range() {
        let store = roster_store();
        let names = extract_names(&store, &query(&["名前リスト"], "D1:E4", true)).unwrap();
        assert_eq!(names, vec!["山田 太郎", "42 花子"]);
    }

    #[test]
    fn test_extract_names_reads_only_used_cells() {
        let store = roster_store();
        let names = extract_names(&store, &query(&["名前リスト"], "A1:XFD1048576", true)).unwrap();
        assert_eq!(names, vec!["山田 太郎", "42 花子", "鈴木"]);
        // Used block is D1:E5, minus the header row
        assert_eq!(store.reads.get(), 8);
    }

    #[test]
    fn test_extract_names_header_on_last_row() {
        let store = roster_store();
        let far = CellAddress::new(u32::MAX, 4);
        let query = RosterQuery {
            sheet_names: vec!["名前リスト".to_string()],
            selection: ColumnSelection::Range(CellRange::new(far, far)),
            has_header: true,
        };
        assert!(extract_names(&store, &query).unwrap().is_empty());
        assert_eq!(store.reads.get(), 0);
    }

    #[test]
    fn test_extract_names_missing_sheet() {
        let store = roster_store();
        let err = extract_names(&store, &query(&["Members"], "D", false)).unwrap_err();
        assert!(matches!(err, FillError::SheetNotFound(name) if name == "Members"));
    }

    #[test]
    fn test_extract_names_empty_sheet() {
        let store = MemoryStore::with_sheets(&["List"]);
        assert!(extract_names(&store, &query(&["List"], "D", false)).unwrap().is_empty());
    }

    #[test]
    fn test_roster_query_defaults() {
        let job = ReadRosterJob {
            file_path: PathBuf::from("names.xlsx"),
            sheet_name: None,
            column: None,
            has_header: None,
        };
        let query = RosterQuery::from_job(&job, &RosterDefaults::default()).unwrap();
        assert_eq!(query.sheet_names, vec!["リスト", "List"]);
        assert_eq!(query.selection, ColumnSelection::Column(4));
        assert!(!query.has_header);

        let job = ReadRosterJob {
            sheet_name: Some("Members".into()),
            column: Some("B".into()),
            has_header: Some(true),
            ..job
        };
        let query = RosterQuery::from_job(&job, &RosterDefaults::default()).unwrap();
        assert_eq!(query.sheet_names, vec!["Members"]);
        assert_eq!(query.selection, ColumnSelection::Column(2));
        assert!(query.has_header);
    }
}
