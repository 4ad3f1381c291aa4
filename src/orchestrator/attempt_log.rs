//! Append-only record of everything tried during one recovery attempt,
//! structurally enforced by only exposing a `push` method (no remove, no
//! index-assign) so a finished job's history can never be edited after
//! the fact — grounded on spec.md §4.4's ordered-mechanism loop and the
//! original's accumulated completion-summary string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mechanisms::MechanismKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLogEntry {
    pub mechanism: MechanismKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Redacted stdout/error detail; never contains a raw credential.
    pub detail: String,
}

impl AttemptLogEntry {
    pub fn elapsed_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttemptLog {
    entries: Vec<AttemptLogEntry>,
}

impl AttemptLog {
    pub fn new() -> Self {
        AttemptLog::default()
    }

    pub fn push(&mut self, entry: AttemptLogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AttemptLogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_mechanism(&self) -> Option<MechanismKind> {
        self.entries.last().map(|e| e.mechanism)
    }

    /// Mirrors the original's final completion line:
    /// `"{mechanism_and_args}: {captured_stdout_trimmed}. Completed in {seconds:.3} seconds"`
    /// (spec.md §4.4) — the captured (redacted) detail text, not the outcome word.
    pub fn summary_line(&self) -> String {
        match self.entries.last() {
            Some(entry) => format!(
                "{}: {}. Completed in {:.3} seconds",
                entry.mechanism.name(),
                entry.detail.trim(),
                entry.elapsed_seconds()
            ),
            None => "no mechanism attempted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(outcome: AttemptOutcome, seconds: i64, detail: &str) -> AttemptLogEntry {
        let started = Utc::now();
        AttemptLogEntry {
            mechanism: MechanismKind::SshReboot,
            started_at: started,
            finished_at: started + ChronoDuration::seconds(seconds),
            outcome,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn summary_line_reflects_last_entry() {
        let mut log = AttemptLog::new();
        log.push(entry(AttemptOutcome::Failed, 2, "connection refused"));
        log.push(entry(AttemptOutcome::Succeeded, 5, "  Connection to t-w1064-ms-001 closed.  "));
        assert_eq!(
            log.summary_line(),
            "ssh_reboot: Connection to t-w1064-ms-001 closed.. Completed in 5.000 seconds"
        );
    }

    #[test]
    fn empty_log_has_no_summary_mechanism() {
        let log = AttemptLog::new();
        assert_eq!(log.summary_line(), "no mechanism attempted");
        assert!(log.is_empty());
    }
}
