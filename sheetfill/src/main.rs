mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use sheetfill_core::config::DEFAULT_CONFIG_FILE;
use sheetfill_core::{FillConfig, Job, JobResult};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

use logging::DiagnosticLog;

#[derive(Debug, Parser)]
#[command(name = "sheetfill")]
#[command(about = "Fill Excel templates and read rosters from JSON job files", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON job file (deleted after the run)
    #[arg(value_name = "INPUT_JSON")]
    input: PathBuf,

    /// Where to write the JSON result (stdout when omitted)
    #[arg(value_name = "OUTPUT_JSON")]
    output: Option<PathBuf>,

    /// Path to configuration file (default: sheetfill.toml in the working directory)
    #[arg(short, long, value_name = "TOML")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => err.exit(),
        Err(err) => return reject_arguments(&err),
    };

    let inputs = load_inputs(&cli);
    let log = DiagnosticLog::open(&log_dir(inputs.as_ref().ok()));

    let success = log.in_scope(|| {
        let result = match inputs.and_then(|(config, job)| run_job(&job, &config)) {
            Ok(result) => result,
            Err(err) => {
                error!(error = ?err, "job failed");
                JobResult::failure(format!("{:#}", err))
            }
        };

        let emitted = emit(&result, cli.output.as_deref());
        if let Err(err) = &emitted {
            error!(error = ?err, "could not write the result");
        }
        remove_input(&cli.input);

        result.success && emitted.is_ok()
    });

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Bad command lines still answer with a JSON result on stdout
fn reject_arguments(err: &clap::Error) -> ExitCode {
    let log = DiagnosticLog::open(&log_dir(None));
    log.in_scope(|| {
        let message = usage_message(err);
        error!(error = %err, "invalid command line");
        if let Err(err) = emit(&JobResult::failure(message), None) {
            error!(error = ?err, "could not write the result");
        }
    });
    ExitCode::FAILURE
}

fn usage_message(err: &clap::Error) -> String {
    match err.kind() {
        ErrorKind::MissingRequiredArgument => "No input JSON file path provided.".to_string(),
        _ => err
            .to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("error: ")
            .to_string(),
    }
}

fn load_inputs(cli: &Cli) -> Result<(FillConfig, Job)> {
    let config = load_config(cli.config.as_deref())?;
    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read job file {}", cli.input.display()))?;
    let job = Job::from_json(&text)
        .with_context(|| format!("Failed to decode job file {}", cli.input.display()))?;
    Ok((config, job))
}

/// Explicit `--config`, else `sheetfill.toml` in the working directory, else defaults
fn load_config(path: Option<&Path>) -> Result<FillConfig> {
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    match path {
        Some(path) => Ok(FillConfig::from_file(path)?),
        None if default_path.exists() => Ok(FillConfig::from_file(default_path)?),
        None => Ok(FillConfig::default()),
    }
}

fn run_job(job: &Job, config: &FillConfig) -> Result<JobResult> {
    let result = sheetfill_core::run(job, config)
        .with_context(|| format!("{} job failed", job.action.name()))?;
    info!(success = result.success, "job finished");
    Ok(result)
}

/// Job `log_dir`, then config `log_dir`, then the executable's directory, then temp
fn log_dir(inputs: Option<&(FillConfig, Job)>) -> PathBuf {
    inputs
        .and_then(|(config, job)| job.log_dir.clone().or_else(|| config.log_dir.clone()))
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        })
        .unwrap_or_else(std::env::temp_dir)
}

fn emit(result: &JobResult, output: Option<&Path>) -> Result<()> {
    let json = result.to_json().context("Failed to serialize the result")?;
    match output {
        Some(path) => fs::write(path, json.as_bytes())
            .with_context(|| format!("Failed to write result to {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json).context("Failed to write result to stdout")
        }
    }
}

/// The job file is consumed by the run whatever the outcome
fn remove_input(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "could not remove job file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_job(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("job.json");
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_log_dir_prefers_job_then_config() {
        let mut config = FillConfig::default();
        config.log_dir = Some(PathBuf::from("from-config"));
        let job = Job::from_json(r#"{"action": "read_roster", "file_path": "a.xlsx", "log_dir": "from-job"}"#).unwrap();
        assert_eq!(log_dir(Some(&(config.clone(), job))), PathBuf::from("from-job"));

        let job = Job::from_json(r#"{"action": "read_roster", "file_path": "a.xlsx"}"#).unwrap();
        assert_eq!(log_dir(Some(&(config, job))), PathBuf::from("from-config"));

        let fallback = log_dir(None);
        assert!(fallback.is_absolute());
    }

    #[test]
    fn test_load_inputs_reports_bad_job() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            input: write_job(dir.path(), "{\"action\": \"read_roster\"}"),
            output: None,
            config: None,
        };
        let err = load_inputs(&cli).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to decode job file"));
        assert!(message.contains("file_path"));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("missing.toml").as_path())).is_err());
    }

    #[test]
    fn test_emit_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        emit(&JobResult::roster(vec!["佐藤".to_string()]), Some(path.as_path())).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["names"][0], "佐藤");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_usage_message() {
        let err = Cli::try_parse_from(["sheetfill"]).unwrap_err();
        assert_eq!(usage_message(&err), "No input JSON file path provided.");

        let err = Cli::try_parse_from(["sheetfill", "job.json", "out.json", "extra"]).unwrap_err();
        let message = usage_message(&err);
        assert!(message.contains("extra"), "{message}");
        assert!(!message.starts_with("error:"));
    }

    #[test]
    fn test_remove_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_job(dir.path(), "{}");
        remove_input(&path);
        assert!(!path.exists());
        // A second removal is silent
        remove_input(&path);
    }
}
