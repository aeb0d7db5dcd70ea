//! Append-only audit log of identity lifecycle events.
//!
//! Format: `2026-02-11T10:30:00Z | user_created | org=org1 | message=Created new user "alice".`

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

const AUDIT_FILENAME: &str = "audit.log";

pub fn audit_log_path() -> PathBuf {
    warden_common::paths::warden_log_dir().join(AUDIT_FILENAME)
}

/// Append one entry to the log at `path`, creating it if needed.
pub fn append_entry_to(
    path: &Path,
    event: &str,
    fields: &[(&str, &str)],
) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let mut line = format!("{timestamp} | {event}");
    for (key, value) in fields {
        // Keep one entry per line whatever the caller passes in.
        let value = value.replace(['\n', '\r'], " ");
        line.push_str(&format!(" | {key}={value}"));
    }
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;

    tracing::debug!(event, "Audit log entry written");
    Ok(())
}

/// Whole log at `path`; empty when nothing was logged yet.
pub fn read_log_at(path: &Path) -> Result<String, std::io::Error> {
    if path.exists() {
        std::fs::read_to_string(path)
    } else {
        Ok(String::new())
    }
}

/// Lines of `log` recorded for organization `org_id`.
pub fn entries_for_org<'a>(log: &'a str, org_id: &str) -> Vec<&'a str> {
    let field = format!("org={org_id}");
    log.lines()
        .filter(|line| line.split(" | ").any(|part| part == field))
        .collect()
}
