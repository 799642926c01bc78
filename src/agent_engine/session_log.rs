//! Per-session log stream.
//!
//! The loop records what it did through [`SessionLog`]. Two sinks ship with
//! the crate: an in-memory log a host can render from, and a JSONL file per
//! session under the platform data directory.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TapClawError, TapClawResult};

pub type SessionId = String;
pub type LogId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Info,
    ToolUse,
    Reply,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Ongoing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    pub kind: LogType,
    pub status: LogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogRecord {
    pub fn new(kind: LogType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            status: match kind {
                LogType::Error => LogStatus::Error,
                _ => LogStatus::Completed,
            },
            detail: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogType::Info, message)
    }

    pub fn with_status(mut self, status: LogStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

#[async_trait]
pub trait SessionLog: Send + Sync {
    async fn create_session(&self, goal: &str, provider: &str) -> TapClawResult<SessionId>;

    async fn append(&self, session: &SessionId, record: LogRecord) -> TapClawResult<LogId>;

    async fn update_status(&self, log: LogId, status: LogStatus) -> TapClawResult<()>;

    async fn finish(
        &self,
        session: &SessionId,
        status: SessionStatus,
        summary: Option<&str>,
    ) -> TapClawResult<()>;
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: LogId,
    pub ts: DateTime<Utc>,
    pub record: LogRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub goal: String,
    pub provider: String,
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub entries: Vec<LogEntry>,
}

#[derive(Default)]
pub struct MemorySessionLog {
    sessions: Mutex<Vec<SessionRecord>>,
    next_id: AtomicU64,
}

impl MemorySessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.lock().clone()
    }

    pub fn session(&self, id: &str) -> Option<SessionRecord> {
        self.lock().iter().find(|s| s.id == id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SessionRecord>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionLog for MemorySessionLog {
    async fn create_session(&self, goal: &str, provider: &str) -> TapClawResult<SessionId> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().push(SessionRecord {
            id: id.clone(),
            goal: goal.to_string(),
            provider: provider.to_string(),
            status: SessionStatus::Running,
            summary: None,
            entries: Vec::new(),
        });
        Ok(id)
    }

    async fn append(&self, session: &SessionId, record: LogRecord) -> TapClawResult<LogId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut sessions = self.lock();
        let target = sessions
            .iter_mut()
            .find(|s| &s.id == session)
            .ok_or_else(|| TapClawError::Session(format!("unknown session {session}")))?;
        target.entries.push(LogEntry {
            id,
            ts: Utc::now(),
            record,
        });
        Ok(id)
    }

    async fn update_status(&self, log: LogId, status: LogStatus) -> TapClawResult<()> {
        let mut sessions = self.lock();
        let entry = sessions
            .iter_mut()
            .flat_map(|s| s.entries.iter_mut())
            .find(|e| e.id == log)
            .ok_or_else(|| TapClawError::Session(format!("unknown log entry {log}")))?;
        entry.record.status = status;
        Ok(())
    }

    async fn finish(
        &self,
        session: &SessionId,
        status: SessionStatus,
        summary: Option<&str>,
    ) -> TapClawResult<()> {
        let mut sessions = self.lock();
        let target = sessions
            .iter_mut()
            .find(|s| &s.id == session)
            .ok_or_else(|| TapClawError::Session(format!("unknown session {session}")))?;
        target.status = status;
        target.summary = summary.map(str::to_string);
        Ok(())
    }
}

// ── JSONL ────────────────────────────────────────────────────────────────────

/// One line of a `session_<id>.jsonl` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalLine {
    Created { ts: i64, goal: String, provider: String },
    Entry { ts: i64, id: LogId, record: LogRecord },
    Status { ts: i64, id: LogId, status: LogStatus },
    Finished { ts: i64, status: SessionStatus, summary: Option<String> },
}

pub struct JsonlSessionLog {
    dir: PathBuf,
    next_id: AtomicU64,
    /// Which session file each log id was written to.
    owners: Mutex<HashMap<LogId, SessionId>>,
}

impl JsonlSessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> TapClawResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_id: AtomicU64::new(0),
            owners: Mutex::new(HashMap::new()),
        })
    }

    /// Log under the configured directory, or the platform data dir.
    pub fn open(dir: Option<&Path>) -> TapClawResult<Self> {
        match dir {
            Some(d) => Self::new(d),
            None => Self::new(default_sessions_dir()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session: &str) -> PathBuf {
        self.dir.join(format!("session_{session}.jsonl"))
    }

    /// Read a session file back.
    pub fn read(&self, session: &str) -> TapClawResult<Vec<JournalLine>> {
        let content = std::fs::read_to_string(self.path_for(session))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(TapClawError::from))
            .collect()
    }

    fn write_line(&self, session: &str, line: &JournalLine) -> TapClawResult<()> {
        let path = self.path_for(session);
        let json = serde_json::to_string(line)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(path = %path.display(), "session log line written");
        Ok(())
    }

    fn owners(&self) -> std::sync::MutexGuard<'_, HashMap<LogId, SessionId>> {
        self.owners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionLog for JsonlSessionLog {
    async fn create_session(&self, goal: &str, provider: &str) -> TapClawResult<SessionId> {
        let id = uuid::Uuid::new_v4().to_string();
        self.write_line(
            &id,
            &JournalLine::Created {
                ts: Utc::now().timestamp_millis(),
                goal: goal.to_string(),
                provider: provider.to_string(),
            },
        )?;
        tracing::info!(session = %id, path = %self.path_for(&id).display(), "session log created");
        Ok(id)
    }

    async fn append(&self, session: &SessionId, record: LogRecord) -> TapClawResult<LogId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.write_line(
            session,
            &JournalLine::Entry {
                ts: Utc::now().timestamp_millis(),
                id,
                record,
            },
        )?;
        self.owners().insert(id, session.clone());
        Ok(id)
    }

    async fn update_status(&self, log: LogId, status: LogStatus) -> TapClawResult<()> {
        let session = self
            .owners()
            .get(&log)
            .cloned()
            .ok_or_else(|| TapClawError::Session(format!("unknown log entry {log}")))?;
        self.write_line(
            &session,
            &JournalLine::Status {
                ts: Utc::now().timestamp_millis(),
                id: log,
                status,
            },
        )
    }

    async fn finish(
        &self,
        session: &SessionId,
        status: SessionStatus,
        summary: Option<&str>,
    ) -> TapClawResult<()> {
        // a finished session's entries can no longer change
        self.owners().retain(|_, owner| *owner != *session);
        self.write_line(
            session,
            &JournalLine::Finished {
                ts: Utc::now().timestamp_millis(),
                status,
                summary: summary.map(str::to_string),
            },
        )
    }
}

/// `<data_local_dir>/tapclaw/sessions`, falling back to the working directory.
fn default_sessions_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(base) => base.join("tapclaw").join("sessions"),
        None => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("sessions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_log_tracks_entries_and_statuses() {
        let log = MemorySessionLog::new();
        let session = log.create_session("open settings", "OpenAI").await.unwrap();
        let started = log
            .append(&session, LogRecord::info("Agent started...").with_status(LogStatus::Ongoing))
            .await
            .unwrap();
        log.append(&session, LogRecord::new(LogType::Reply, "done"))
            .await
            .unwrap();
        log.update_status(started, LogStatus::Completed).await.unwrap();
        log.finish(&session, SessionStatus::Success, Some("done"))
            .await
            .unwrap();

        let record = log.session(&session).unwrap();
        assert_eq!(record.status, SessionStatus::Success);
        assert_eq!(record.summary.as_deref(), Some("done"));
        assert_eq!(record.entries.len(), 2);
        assert_eq!(record.entries[0].record.status, LogStatus::Completed);
        assert!(record.entries[0].id < record.entries[1].id);
    }

    #[tokio::test]
    async fn memory_log_rejects_unknown_ids() {
        let log = MemorySessionLog::new();
        assert!(log
            .append(&"missing".to_string(), LogRecord::info("x"))
            .await
            .is_err());
        assert!(log.update_status(7, LogStatus::Error).await.is_err());
    }

    #[tokio::test]
    async fn jsonl_log_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlSessionLog::new(dir.path()).unwrap();
        let session = log.create_session("goal", "Google Gemini").await.unwrap();
        let id = log
            .append(
                &session,
                LogRecord::new(LogType::ToolUse, "Clicked node 1 successfully")
                    .with_detail(Some("Button \"Login\" #1".into())),
            )
            .await
            .unwrap();
        log.update_status(id, LogStatus::Error).await.unwrap();
        log.finish(&session, SessionStatus::Error, Some("boom"))
            .await
            .unwrap();

        let lines = log.read(&session).unwrap();
        assert_eq!(lines.len(), 4);
        assert!(matches!(&lines[0], JournalLine::Created { provider, .. } if provider == "Google Gemini"));
        match &lines[1] {
            JournalLine::Entry { record, .. } => {
                assert_eq!(record.kind, LogType::ToolUse);
                assert_eq!(record.detail.as_deref(), Some("Button \"Login\" #1"));
            }
            other => panic!("unexpected line {other:?}"),
        }
        assert!(matches!(lines[2], JournalLine::Status { status: LogStatus::Error, .. }));
        assert!(matches!(lines[3], JournalLine::Finished { status: SessionStatus::Error, .. }));
    }

    #[tokio::test]
    async fn jsonl_log_forgets_entries_of_finished_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlSessionLog::new(dir.path()).unwrap();
        let done = log.create_session("first", "OpenAI").await.unwrap();
        let running = log.create_session("second", "OpenAI").await.unwrap();
        let old = log.append(&done, LogRecord::info("Agent started...")).await.unwrap();
        let live = log.append(&running, LogRecord::info("Agent started...")).await.unwrap();

        log.finish(&done, SessionStatus::Success, None).await.unwrap();

        assert_eq!(log.owners().len(), 1);
        assert!(log.update_status(old, LogStatus::Completed).await.is_err());
        log.update_status(live, LogStatus::Completed).await.unwrap();
        assert_eq!(log.read(&done).unwrap().len(), 3);
    }
}
