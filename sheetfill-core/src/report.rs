//! Result document written back to the caller

use serde::{Deserialize, Serialize};

/// Outcome of one job. Absent fields are left out of the JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    /// One line per skipped write operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    /// A finished write pass
    pub fn written(processed: usize, skipped: Vec<String>) -> Self {
        Self {
            success: true,
            message: Some(format!(
                "{}件の操作をExcelファイルに正常に転記しました。",
                processed
            )),
            skipped: (!skipped.is_empty()).then_some(skipped),
            ..Default::default()
        }
    }

    /// A finished roster pass
    pub fn roster(names: Vec<String>) -> Self {
        Self {
            success: true,
            message: Some(format!("{}件の名前を読み込みました。", names.len())),
            names: Some(names),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Serialize as pretty JSON; non-ASCII text is kept as-is
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
