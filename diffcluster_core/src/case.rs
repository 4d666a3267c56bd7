use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque name of one fuzz input / execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuzzCaseId(String);

impl FuzzCaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FuzzCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FuzzCaseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FuzzCaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
