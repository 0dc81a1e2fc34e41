use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use suitepool_model::SuiteRef;

use super::{FailureRecord, RunStats};
use crate::error::CoreError;

/// Machine-readable result of one suite.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub suite: Option<SuiteRef>,
    pub stats: RunStats,
    pub failures: Vec<FailureRecord>,
}

/// Writes one JSON document per finished suite into a directory.
#[derive(Debug, Clone)]
pub struct ReportSink {
    dir: PathBuf,
}

impl ReportSink {
    /// `url` is a directory path, optionally prefixed with `file://`.
    pub fn new(url: &str) -> Result<Self, CoreError> {
        let dir = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        if dir.as_os_str().is_empty() {
            return Err(CoreError::Report("empty reports location".into()));
        }
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, suite: &SuiteRef) -> PathBuf {
        self.dir.join(format!("{}.json", suite.file_stem()))
    }

    pub fn write(&self, suite: &SuiteRef, report: &SuiteReport) -> Result<PathBuf, CoreError> {
        let path = self.path_for(suite);
        let body =
            serde_json::to_vec_pretty(report).map_err(|e| CoreError::Report(e.to_string()))?;
        fs::write(&path, body)?;
        Ok(path)
    }
}
