//! Configuration file (`sheetfill.toml`) with fallbacks for job fields

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::address::ColumnSelection;
use crate::error::{FillError, Result};

/// Name of the configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "sheetfill.toml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FillConfig {
    /// Where the diagnostic log goes when the job does not say
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub roster: RosterDefaults,
}

impl FillConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |message: String| FillError::Config {
            path: path.to_path_buf(),
            message,
        };

        let content = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: FillConfig = toml::from_str(&content).map_err(|e| config_error(e.to_string()))?;
        config.validate().map_err(|e| config_error(e.to_string()))?;
        Ok(config)
    }

    /// Check that the defaults are usable as job fields
    pub fn validate(&self) -> Result<()> {
        if self.roster.sheet_names.is_empty() || self.roster.sheet_names.iter().any(String::is_empty) {
            return Err(FillError::MissingParameter("roster.sheet_names".to_string()));
        }
        ColumnSelection::parse(&self.roster.column)?;
        Ok(())
    }
}

/// Defaults for `read_roster` jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RosterDefaults {
    /// Sheet names tried in order when the job has no `sheet_name`
    pub sheet_names: Vec<String>,
    /// Column letter or range read when the job has no `column`
    pub column: String,
    pub has_header: bool,
}

impl Default for RosterDefaults {
    fn default() -> Self {
        Self {
            sheet_names: vec!["リスト".to_string(), "List".to_string()],
            column: "D".to_string(),
            has_header: false,
        }
    }
}
