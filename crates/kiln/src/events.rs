//! Append-only JSONL build event log.
//!
//! Every rule and step transition is recorded as a [`BuildEvent`]; the log
//! can be flushed to `events.jsonl` for audit and loaded back for
//! inspection.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use kiln_types::{BuildEvent, BuildEventType};

/// Default events file name.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Get the events file path for a state directory.
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// Append-only event log for one build session.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<BuildEvent>,
}

impl EventLog {
    /// Create a new empty event log.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Record a new event.
    pub fn record(&mut self, event: BuildEvent) {
        self.events.push(event);
    }

    /// Record an event stamped with the current time.
    pub fn record_now(&mut self, event_type: BuildEventType, subject: impl Into<String>) {
        self.record(BuildEvent {
            timestamp: Utc::now(),
            event_type,
            subject: subject.into(),
        });
    }

    /// All recorded events, in order.
    pub fn events(&self) -> &[BuildEvent] {
        &self.events
    }

    /// Events whose subject matches exactly.
    pub fn for_subject(&self, subject: &str) -> Vec<&BuildEvent> {
        self.events.iter().filter(|e| e.subject == subject).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append all recorded events to a JSONL file.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event")?;
            writeln!(writer, "{line}")
                .with_context(|| format!("failed to append to {}", path.display()))?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    /// Load a previously written event log.
    pub fn load_from_file(path: &Path) -> Result<EventLog> {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut log = EventLog::new();
        for line in reader.lines() {
            let line = line.context("failed to read events line")?;
            if line.trim().is_empty() {
                continue;
            }
            let event: BuildEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event line: {line}"))?;
            log.record(event);
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_and_filter() {
        let mut log = EventLog::new();
        log.record_now(BuildEventType::RuleStarted, "//x:y");
        log.record_now(
            BuildEventType::StepFinished {
                step: "dx".into(),
                duration_ms: 3,
            },
            "//x:y",
        );
        log.record_now(BuildEventType::RuleStarted, "//x:z");

        assert_eq!(log.len(), 3);
        assert_eq!(log.for_subject("//x:y").len(), 2);
        assert_eq!(log.for_subject("//x:z").len(), 1);
    }

    #[test]
    fn roundtrips_through_jsonl() {
        let td = tempdir().expect("tempdir");
        let path = events_path(td.path());

        let mut log = EventLog::new();
        log.record_now(BuildEventType::RuleStarted, "//x:y");
        log.record_now(
            BuildEventType::RuleFailed {
                class: kiln_types::FailureClass::Execution,
                message: "boom".into(),
            },
            "//x:y",
        );
        log.write_to_file(&path).expect("write");

        let loaded = EventLog::load_from_file(&path).expect("load");
        assert_eq!(loaded.events(), log.events());
    }

    #[test]
    fn write_appends_across_sessions() {
        let td = tempdir().expect("tempdir");
        let path = events_path(td.path());

        let mut first = EventLog::new();
        first.record_now(BuildEventType::RuleStarted, "//x:y");
        first.write_to_file(&path).expect("write");

        let mut second = EventLog::new();
        second.record_now(BuildEventType::RuleStarted, "//x:z");
        second.write_to_file(&path).expect("write");

        let loaded = EventLog::load_from_file(&path).expect("load");
        assert_eq!(loaded.len(), 2);
    }
}
