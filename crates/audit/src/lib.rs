//! Append-only JSONL audit log.
//!
//! One JSON object per line, UTF-8, newline-terminated. The runtime never
//! overwrites or removes an entry; total ordering reflects real-time
//! arrival. A single mutex serializes appends, and live subscribers are
//! fed from inside the same critical section so the stream order always
//! equals disk order.
//!
//! Subscribers have bounded buffers. A subscriber that cannot keep up is
//! dropped entirely — entries are never reordered or selectively skipped
//! for a live stream.

pub mod metrics;
pub mod query;
pub mod security;

pub use metrics::{compute_metrics, Metrics};
pub use query::{query_filtered, read_all, tail, QueryFilter};
pub use security::{detect_alerts, Alert, Severity};

use domekit_core::audit::AuditEntry;
use domekit_core::error::AuditError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Buffered entries per live subscriber before it is considered slow.
pub const SUBSCRIBER_BUFFER: usize = 256;

struct LogInner {
    file: File,
    /// Byte offset of the next append; strictly monotonic.
    offset: u64,
    subscribers: Vec<mpsc::Sender<AuditEntry>>,
}

/// The append-only audit log writer.
pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl AuditLog {
    /// Open (or create) the log at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                offset,
                subscribers: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    ///
    /// Serializes the entry onto a single line, advances the byte offset,
    /// and fans the entry out to every live subscriber. Slow or closed
    /// subscribers are dropped.
    pub fn append(&self, entry: &AuditEntry) -> Result<u64, AuditError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut inner = self.inner.lock().expect("audit log lock poisoned");
        let at = inner.offset;
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;
        inner.offset += line.len() as u64;

        inner.subscribers.retain(|tx| match tx.try_send(entry.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("dropping slow audit subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        Ok(at)
    }

    /// The byte offset the next append will land at.
    pub fn offset(&self) -> u64 {
        self.inner.lock().expect("audit log lock poisoned").offset
    }

    /// Subscribe to live appends. Every entry appended after this call is
    /// delivered in append order until the receiver is dropped or falls
    /// behind by more than [`SUBSCRIBER_BUFFER`] entries.
    pub fn subscribe(&self) -> mpsc::Receiver<AuditEntry> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.inner
            .lock()
            .expect("audit log lock poisoned")
            .subscribers
            .push(tx);
        rx
    }

    /// Number of live subscribers (drops are lazy, counted at next append).
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("audit log lock poisoned")
            .subscribers
            .len()
    }

    /// All entries for one request, in append order. Linear scan.
    pub fn by_request(&self, request_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(read_all(&self.path)?
            .into_iter()
            .filter(|e| e.request_id == request_id)
            .collect())
    }

    /// Total number of entries on disk.
    pub fn entry_count(&self) -> Result<usize, AuditError> {
        Ok(read_all(&self.path)?.len())
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domekit_core::audit::AuditEvent;

    fn entry(request_id: &str, event: AuditEvent) -> AuditEntry {
        AuditEntry::new(request_id, event).with_app("test-app")
    }

    #[test]
    fn append_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        let mut last = None;
        for i in 0..10 {
            let at = log
                .append(&entry(&format!("req-{i}"), AuditEvent::RequestStart))
                .unwrap();
            if let Some(prev) = last {
                assert!(at > prev, "offset must strictly increase");
            }
            last = Some(at);
        }
        assert_eq!(log.offset(), log.size_bytes());
    }

    #[test]
    fn parse_serialize_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        let mut detail = serde_json::Map::new();
        detail.insert("tool".into(), serde_json::json!("sql_query"));
        let original = AuditEntry::new("req-1", AuditEvent::ToolCall)
            .with_app("app")
            .with_model("llama3.2")
            .with_detail(detail);
        log.append(&original).unwrap();

        let read = read_all(log.path()).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0], original);
    }

    #[test]
    fn reopen_preserves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let log = AuditLog::open(&path).unwrap();
            log.append(&entry("req-1", AuditEvent::RequestStart)).unwrap();
        }
        let log = AuditLog::open(&path).unwrap();
        log.append(&entry("req-2", AuditEvent::RequestStart)).unwrap();

        let all = read_all(&path).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].request_id, "req-1");
        assert_eq!(all[1].request_id, "req-2");
    }

    #[test]
    fn by_request_filters_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        log.append(&entry("a", AuditEvent::RequestStart)).unwrap();
        log.append(&entry("b", AuditEvent::RequestStart)).unwrap();
        log.append(&entry("a", AuditEvent::ToolCall)).unwrap();
        log.append(&entry("a", AuditEvent::RequestEnd)).unwrap();

        let a = log.by_request("a").unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].event, AuditEvent::RequestStart);
        assert_eq!(a[1].event, AuditEvent::ToolCall);
        assert_eq!(a[2].event, AuditEvent::RequestEnd);
    }

    #[tokio::test]
    async fn subscriber_receives_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        let mut rx = log.subscribe();
        for i in 0..5 {
            log.append(&entry(&format!("req-{i}"), AuditEvent::RequestStart))
                .unwrap();
        }

        for i in 0..5 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.request_id, format!("req-{i}"));
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_not_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        let mut rx = log.subscribe();
        assert_eq!(log.subscriber_count(), 1);

        // Overflow the bounded buffer without ever receiving.
        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            log.append(&entry(&format!("req-{i}"), AuditEvent::RequestStart))
                .unwrap();
        }
        assert_eq!(log.subscriber_count(), 0, "slow subscriber must be dropped");

        // What was buffered before the drop is still strictly in order.
        let mut expected = 0;
        while let Ok(got) = rx.try_recv() {
            assert_eq!(got.request_id, format!("req-{expected}"));
            expected += 1;
        }
        assert_eq!(expected, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn concurrent_requests_interleave_but_keep_per_request_order() {
        use domekit_core::audit::AuditEvent::*;

        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let mut rx = log.subscribe();

        let mut handles = Vec::new();
        for name in ["a", "b"] {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for event in [RequestStart, ToolCall, ToolResult, RequestEnd] {
                    log.append(&AuditEntry::new(name, event)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..8 {
            received.push(rx.recv().await.unwrap());
        }
        assert_eq!(received.len(), 8);

        for name in ["a", "b"] {
            let events: Vec<_> = received
                .iter()
                .filter(|e| e.request_id == name)
                .map(|e| e.event)
                .collect();
            assert_eq!(events, vec![RequestStart, ToolCall, ToolResult, RequestEnd]);
        }

        // Stream order equals disk order.
        let on_disk = read_all(log.path()).unwrap();
        let stream_keys: Vec<_> = received.iter().map(|e| (e.request_id.clone(), e.event)).collect();
        let disk_keys: Vec<_> = on_disk.iter().map(|e| (e.request_id.clone(), e.event)).collect();
        assert_eq!(stream_keys, disk_keys);
    }
}
