use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::models::ledger::RunMeta;

pub const ENV_OUTPUT: &str = "GITHUB_OUTPUT";
pub const ENV_STEP_SUMMARY: &str = "GITHUB_STEP_SUMMARY";
pub const ENV_RUN_ID: &str = "GITHUB_RUN_ID";
pub const ENV_RUN_NUMBER: &str = "GITHUB_RUN_NUMBER";
pub const ENV_REF: &str = "GITHUB_REF";

#[derive(Error, Debug)]
#[error("Failed to append to {}: {source}", path.display())]
pub struct PipelineError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

/// Key/value outputs and step summary consumed by the calling workflow.
/// Unset paths turn every call into a no-op, which is the local-run case.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    output_file: Option<PathBuf>,
    summary_file: Option<PathBuf>,
}

impl PipelineOutput {
    pub fn new(output_file: Option<PathBuf>, summary_file: Option<PathBuf>) -> Self {
        Self {
            output_file,
            summary_file,
        }
    }

    pub fn from_env() -> Self {
        let path = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self::new(path(ENV_OUTPUT), path(ENV_STEP_SUMMARY))
    }

    /// Emit one `key=value` output.
    pub fn set(&self, key: &str, value: impl std::fmt::Display) -> Result<(), PipelineError> {
        match &self.output_file {
            Some(path) => append(path, &format!("{}={}\n", key, value)),
            None => Ok(()),
        }
    }

    /// Append Markdown lines to the step summary.
    pub fn summary(&self, lines: &[String]) -> Result<(), PipelineError> {
        match &self.summary_file {
            Some(path) => append(path, &format!("{}\n", lines.join("\n"))),
            None => Ok(()),
        }
    }
}

/// Run metadata from the workflow environment. Prefers the run id over the run number.
pub fn run_meta<F>(lookup: F) -> RunMeta
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
    RunMeta {
        run_id: get(ENV_RUN_ID).or_else(|| get(ENV_RUN_NUMBER)),
        git_ref: get(ENV_REF),
    }
}

fn append(path: &Path, text: &str) -> Result<(), PipelineError> {
    let err = |source: std::io::Error| PipelineError {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(err)?;
    file.write_all(text.as_bytes()).map_err(err)
}
