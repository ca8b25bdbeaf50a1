use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::artifact::GeneratedArtifact;

/// Outcome summary for one action, fit for direct display.
///
/// Both success and failure travel through this struct, never through a
/// thrown error, so a caller always has a message to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResult {
    pub succeeded: bool,
    pub message: String,
    #[serde(default)]
    pub saved_paths: Vec<PathBuf>,
}

impl StatusResult {
    pub fn success(message: impl Into<String>, saved_paths: Vec<PathBuf>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            saved_paths,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            saved_paths: Vec::new(),
        }
    }
}

/// Everything one action hands back: artifacts for display plus the
/// status line.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub artifacts: Vec<GeneratedArtifact>,
    pub status: StatusResult,
}

impl ActionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            artifacts: Vec::new(),
            status: StatusResult::failure(message),
        }
    }
}
