//! Scalar cell values exchanged with a workbook store

use calamine::Data;
use serde_json::Value;

/// Cell value types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// Formula text without the leading '='
    Formula(String),
}

impl CellValue {
    /// Convert a JSON scalar from a job file.
    ///
    /// Strings starting with '=' become formulas. Arrays and objects have no
    /// cell representation and return `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(CellValue::Empty),
            Value::Bool(b) => Some(CellValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(CellValue::Number),
            Value::String(s) => Some(match s.strip_prefix('=') {
                Some(formula) if !formula.is_empty() => CellValue::Formula(formula.to_string()),
                _ => CellValue::Text(s.clone()),
            }),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Render the value as display text, `None` for empty cells and formulas
    /// without a cached result
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty | CellValue::Formula(_) => None,
            CellValue::Number(n) => Some(format_number(*n)),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Bool(true) => Some("TRUE".to_string()),
            CellValue::Bool(false) => Some("FALSE".to_string()),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Empty,
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => CellValue::Text(e.to_string()),
        }
    }
}

/// Format a number the way it is stored in worksheet XML ("3", not "3.0")
pub fn format_number(n: f64) -> String {
    // f64's Display already drops a zero fraction
    n.to_string()
}
