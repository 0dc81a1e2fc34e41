use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Opaque identifier of one test suite (usually a file path).
///
/// Immutable once queued; a suite is dispatched to exactly one runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuiteRef(String);

impl SuiteRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name friendly form of the identifier, used for report files.
    pub fn file_stem(&self) -> String {
        let trimmed = self.0.trim_start_matches("./").trim_start_matches('/');
        trimmed
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for SuiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SuiteRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SuiteRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Selects which suite adapter a runner worker loads and how the
/// reporter reconstructs the relayed event stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteType {
    /// Test-lifecycle suites speaking TAP.
    #[default]
    Tap,
    /// BDD suites reporting through Cucumber messages.
    Cucumber,
}

impl SuiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuiteType::Tap => "tap",
            SuiteType::Cucumber => "cucumber",
        }
    }
}

impl fmt::Display for SuiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuiteType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tap" | "mocha" => Ok(SuiteType::Tap),
            "cucumber" | "bdd" => Ok(SuiteType::Cucumber),
            _ => Err(ModelError::UnknownSuiteType(s.to_string())),
        }
    }
}
