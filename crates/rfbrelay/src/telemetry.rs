//! JSONL session event log.
//!
//! Every line is one event: `{"event", "ts", "conn", "seq", "payload"}`.
//! Lines from concurrent connections interleave but never tear; `seq` counts
//! events within one connection.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Result, ServerError};

/// Shared event log; a no-op when no path was configured.
#[derive(Debug, Default)]
pub struct TelemetryLog {
    file: Option<Mutex<File>>,
}

impl TelemetryLog {
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(Mutex::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| ServerError::Telemetry {
                        path: path.display().to_string(),
                        source,
                    })?,
            )),
            None => None,
        };
        Ok(Self { file })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Event writer for connection `conn`.
    #[must_use]
    pub fn connection(&self, conn: u64) -> ConnectionEvents<'_> {
        ConnectionEvents {
            log: self,
            conn,
            seq: 0,
        }
    }

    fn append(&self, line: &Value) -> std::io::Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}")?;
        file.flush()
    }
}

/// Per-connection view of the log.
#[derive(Debug)]
pub struct ConnectionEvents<'a> {
    log: &'a TelemetryLog,
    conn: u64,
    seq: u64,
}

impl ConnectionEvents<'_> {
    /// Append one event. Failures are logged, never fatal to the session.
    pub fn emit(&mut self, event: &str, payload: Value) {
        if !self.log.is_enabled() {
            return;
        }
        let line = json!({
            "event": event,
            "ts": now_rfc3339(),
            "conn": self.conn,
            "seq": self.seq,
            "payload": payload,
        });
        self.seq = self.seq.saturating_add(1);
        if let Err(error) = self.log.append(&line) {
            tracing::warn!(%error, event, "telemetry write failed");
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn disabled_log_writes_nothing() {
        let log = TelemetryLog::open(None).expect("open");
        assert!(!log.is_enabled());
        log.connection(1).emit("session_start", json!({}));
    }

    #[test]
    fn events_carry_conn_and_sequence() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let log = TelemetryLog::open(Some(&path)).expect("open");

        let mut first = log.connection(7);
        let mut second = log.connection(8);
        first.emit("session_start", json!({ "route": "playback" }));
        second.emit("session_error", json!({ "error": "boom" }));
        first.emit("session_end", json!({ "packets": 2 }));

        let lines: Vec<Value> = std::fs::read_to_string(&path)
            .expect("read")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "session_start");
        assert_eq!(lines[0]["conn"], 7);
        assert_eq!(lines[0]["seq"], 0);
        assert_eq!(lines[1]["conn"], 8);
        assert_eq!(lines[1]["seq"], 0);
        assert_eq!(lines[2]["seq"], 1);
        assert_eq!(lines[2]["payload"]["packets"], 2);
        assert!(lines[2]["ts"].as_str().is_some_and(|ts| ts.contains('T')));
    }

    #[test]
    fn unopenable_path_is_reported() {
        let dir = tempdir().expect("tempdir");
        let error = TelemetryLog::open(Some(&dir.path().join("missing/events.jsonl")))
            .expect_err("missing parent");
        assert!(matches!(error, ServerError::Telemetry { .. }));
    }
}
