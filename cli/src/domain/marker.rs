//! Completion marker left on a fully hardened host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::shell::{read_file_command, write_file_command};

pub const MARKER_PATH: &str = "/etc/bulwark/hardened.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub profile: String,
    /// SHA-256 of the installed filter documents.
    pub rule_fingerprint: String,
    pub management_port: u16,
    pub completed_at: DateTime<Utc>,
    pub bulwark_version: String,
}

impl CompletionMarker {
    /// Commands that write the marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be serialized.
    pub fn write_commands(&self) -> Result<Vec<String>, serde_json::Error> {
        let body = serde_json::to_string_pretty(self)?;
        Ok(vec![
            "install -d -m 755 /etc/bulwark".to_string(),
            write_file_command(MARKER_PATH, &body),
        ])
    }

    /// Parse marker file content; `None` when absent or unreadable.
    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        serde_json::from_str(content.trim()).ok()
    }
}

#[must_use]
pub fn read_command() -> String {
    read_file_command(MARKER_PATH)
}

#[must_use]
pub fn teardown_commands() -> Vec<String> {
    vec![format!("rm -f {MARKER_PATH}")]
}
