//! Audit trail of side-effecting actions taken on behalf of agents.
//!
//! Every authorization decision on a tool call and every tool execution is
//! recorded here, kept in memory and forwarded to any number of sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Agent the action was taken for.
    pub actor: String,
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The authorization service refused an action
    PermissionDenied { action: String },
    /// A tool ran (successfully or not)
    ToolExecution { tool_name: String, duration_ms: u64 },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Where audit entries are written besides the in-memory log.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit logger forwarding to sinks.
pub struct AuditLogger {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.entries.lock().unwrap().len();
        f.debug_struct("AuditLogger")
            .field("entry_count", &count)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        for sink in &self.sinks {
            sink.record(&entry);
        }
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Entries recorded for one agent.
    pub fn entries_for(&self, actor: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.actor == actor)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn tool_run(name: &str) -> AuditEvent {
        AuditEvent::ToolExecution {
            tool_name: name.into(),
            duration_ms: 3,
        }
    }

    #[test]
    fn log_and_filter() {
        let logger = AuditLogger::new();
        logger.log(tool_run("lookup"), "ada", "lookup", AuditOutcome::Success, None);
        logger.log(
            AuditEvent::PermissionDenied {
                action: "tool.invoke".into(),
            },
            "bob",
            "shell",
            AuditOutcome::Denied,
            Some("rule 0".into()),
        );
        logger.log(tool_run("lookup"), "bob", "lookup", AuditOutcome::Failure, None);

        assert_eq!(logger.count(), 3);
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Denied).len(), 1);
        assert_eq!(logger.entries_for("bob").len(), 2);
        assert_eq!(logger.entries()[0].actor, "ada");
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(tool_run("lookup")).unwrap();
        assert_eq!(json["type"], "tool_execution");
        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, tool_run("lookup"));
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.target.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![
            Box::new(TestSink {
                received: received.clone(),
            }),
            Box::new(TracingSink),
        ]);
        logger.log(tool_run("lookup"), "ada", "lookup", AuditOutcome::Success, None);

        assert_eq!(*received.lock().unwrap(), vec!["lookup".to_string()]);
    }

    #[test]
    fn debug_format() {
        let debug_str = format!("{:?}", AuditLogger::default());
        assert!(debug_str.contains("entry_count"));
    }
}
