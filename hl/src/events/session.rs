//! Session log - persists closed attempts to JSONL files
//!
//! One line per closed attempt, written to
//! `<sessions-dir>/<session-id>/session.jsonl`. [`SessionRecorder`] is the
//! shared handle a `RetryEngine` writes to as each attempt closes. It does not
//! go through the event bus, so a full channel never loses an audit record.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sink::SinkError;
use crate::domain::Attempt;

const SESSION_FILE: &str = "session.jsonl";

/// One persisted attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(flatten)]
    pub attempt: Attempt,
}

/// Writer for per-session JSONL files
pub struct SessionLog {
    sessions_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl SessionLog {
    /// Create a session log rooted at `sessions_dir`
    pub fn new(sessions_dir: impl AsRef<Path>) -> Self {
        let sessions_dir = sessions_dir.as_ref().to_path_buf();
        debug!(?sessions_dir, "SessionLog::new: called");
        Self {
            sessions_dir,
            writers: HashMap::new(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Append a closed attempt to its session file
    pub fn append(&mut self, session_id: &str, attempt: &Attempt) -> Result<(), SinkError> {
        debug!(%session_id, attempt = attempt.attempt_number, "SessionLog::append: called");
        check_session_id(session_id)?;

        let writer = match self.writers.entry(session_id.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let dir = self.sessions_dir.join(session_id);
                fs::create_dir_all(&dir)?;
                let path = dir.join(SESSION_FILE);
                debug!(?path, "SessionLog::append: opening session file");
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                e.insert(BufWriter::new(file))
            }
        };

        let record = SessionRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            attempt: attempt.clone(),
        };
        let json = serde_json::to_string(&record)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Close the writer for a session
    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "SessionLog::close_session: called");
        if let Some(mut writer) = self.writers.remove(session_id)
            && let Err(e) = writer.flush()
        {
            warn!(%session_id, error = %e, "close_session: flush failed");
        }
    }

    /// Flush every open writer
    pub fn flush_all(&mut self) -> Result<(), SinkError> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn check_session_id(session_id: &str) -> Result<(), SinkError> {
    let ok = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(SinkError::Rejected(format!("invalid session id: {:?}", session_id)))
    }
}

/// Read the attempts recorded for a session
///
/// Unparseable lines are skipped with a warning. A missing session yields an
/// empty list.
pub fn read_session(sessions_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<SessionRecord>> {
    let path = sessions_dir.as_ref().join(session_id).join(SESSION_FILE);
    debug!(?path, "read_session: called");

    if !path.exists() {
        debug!(?path, "read_session: no session file");
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path)?;
    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line, error = %e, "read_session: failed to parse line");
            }
        }
    }

    debug!(count = records.len(), "read_session: loaded records");
    Ok(records)
}

/// Thread-safe session log shared by the engines that persist to it
pub struct SessionRecorder {
    log: Mutex<SessionLog>,
}

impl SessionRecorder {
    pub fn new(sessions_dir: impl AsRef<Path>) -> Self {
        Self {
            log: Mutex::new(SessionLog::new(sessions_dir)),
        }
    }

    /// Persist one closed attempt; blocks on the file write
    pub fn record(&self, session_id: &str, attempt: &Attempt) -> Result<(), SinkError> {
        self.lock()?.append(session_id, attempt)
    }

    /// Flush and release the writer for a finished session
    pub fn finish(&self, session_id: &str) {
        match self.lock() {
            Ok(mut log) => log.close_session(session_id),
            Err(e) => warn!(%session_id, error = %e, "finish: session not closed"),
        }
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        self.lock()?.flush_all()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SessionLog>, SinkError> {
        self.log
            .lock()
            .map_err(|_| SinkError::Rejected("session log lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, OpenAttempt};
    use tempfile::tempdir;

    fn attempt(n: u32, success: bool, cost: f64) -> Attempt {
        let mut open = OpenAttempt::open(n, "baseline");
        open.record(Action::new("execute", "run", "ok", success).with_cost(cost, 10));
        open.close(if success { "done" } else { "failed" }, success)
    }

    #[test]
    fn test_append_creates_file() {
        let temp = tempdir().unwrap();
        let mut log = SessionLog::new(temp.path());
        log.append("sess-1", &attempt(1, false, 0.1)).unwrap();
        log.append("sess-1", &attempt(2, true, 0.2)).unwrap();

        let path = temp.path().join("sess-1").join(SESSION_FILE);
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let temp = tempdir().unwrap();
        let mut log = SessionLog::new(temp.path());
        let written = attempt(3, true, 0.125);
        log.append("sess-rt", &written).unwrap();

        let records = read_session(temp.path(), "sess-rt").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempt.attempt_number, 3);
        assert!(records[0].attempt.success);
        assert_eq!(records[0].attempt.total_cost, 0.125);
        assert_eq!(records[0].attempt, written);
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let temp = tempdir().unwrap();
        let mut log = SessionLog::new(temp.path());
        log.append("sess-bad", &attempt(1, true, 0.0)).unwrap();
        log.close_session("sess-bad");

        let path = temp.path().join("sess-bad").join(SESSION_FILE);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("not json\n");
        fs::write(&path, content).unwrap();

        assert_eq!(read_session(temp.path(), "sess-bad").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_session_is_empty() {
        let temp = tempdir().unwrap();
        assert!(read_session(temp.path(), "nope").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_session_ids() {
        let temp = tempdir().unwrap();
        let mut log = SessionLog::new(temp.path());
        assert!(log.append("../escape", &attempt(1, true, 0.0)).is_err());
        assert!(log.append("", &attempt(1, true, 0.0)).is_err());
    }

    #[test]
    fn test_recorder_persists_and_finishes() {
        let temp = tempdir().unwrap();
        let recorder = SessionRecorder::new(temp.path());
        recorder.record("sess-rec", &attempt(1, false, 0.5)).unwrap();
        recorder.record("sess-rec", &attempt(2, true, 0.25)).unwrap();
        recorder.finish("sess-rec");
        recorder.flush().unwrap();

        let records = read_session(temp.path(), "sess-rec").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].attempt.attempt_number, 2);

        // a finished session can be reopened and appended to
        recorder.record("sess-rec", &attempt(3, true, 0.0)).unwrap();
        assert_eq!(read_session(temp.path(), "sess-rec").unwrap().len(), 3);
    }

    #[test]
    fn test_close_unknown_session_is_noop() {
        let temp = tempdir().unwrap();
        let mut log = SessionLog::new(temp.path());
        log.close_session("never-opened");
        assert!(read_session(temp.path(), "never-opened").unwrap().is_empty());
    }
}
