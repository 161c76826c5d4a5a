//! Process-wide session statistics.
//!
//! The registry is the only state shared across sessions. It is constructed
//! once at startup and handed to each session by shared ownership; all
//! mutation is atomic increments or a short-lived lock on the error ring.
//! An external health/status surface reads it through [`SessionRegistry::snapshot`];
//! the relay itself never serves that surface.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// How many recent error records are retained.
pub const ERROR_HISTORY_LIMIT: usize = 32;

/// Byte counters owned by one session, shared with the registry for
/// read-only reporting.
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Bytes received from the client channel.
    pub bytes_from_client: AtomicU64,
    /// Bytes sent to the client channel.
    pub bytes_to_client: AtomicU64,
}

/// A recorded error with its wall-clock timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub message: String,
}

/// Aggregated counters for all sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_session_id: AtomicU64,
    active_sessions: AtomicU64,
    total_sessions: AtomicU64,
    reconnect_attempts: AtomicU64,
    errors: Mutex<VecDeque<ErrorRecord>>,
    session_counters: Mutex<HashMap<u64, Arc<SessionCounters>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session: allocates its monotonic id and its shared
    /// byte counters, and bumps the active/total counts.
    pub fn register_session(&self) -> (u64, Arc<SessionCounters>) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);

        let counters = Arc::new(SessionCounters::default());
        self.session_counters
            .lock()
            .expect("session counters lock poisoned")
            .insert(id, Arc::clone(&counters));
        (id, counters)
    }

    /// Releases a session's registry state at teardown.
    pub fn unregister_session(&self, id: u64) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.session_counters
            .lock()
            .expect("session counters lock poisoned")
            .remove(&id);
    }

    /// Counts one backend reconnect attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Appends an error record, evicting the oldest past the history limit.
    pub fn record_error(&self, message: impl Into<String>) {
        let record = ErrorRecord {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            message: message.into(),
        };
        let mut errors = self.errors.lock().expect("error ring lock poisoned");
        if errors.len() == ERROR_HISTORY_LIMIT {
            errors.pop_front();
        }
        errors.push_back(record);
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Read-only view for the external health/stat surface.
    pub fn snapshot(&self) -> StatsSnapshot {
        let recent_errors = self
            .errors
            .lock()
            .expect("error ring lock poisoned")
            .iter()
            .cloned()
            .collect();
        let sessions = self
            .session_counters
            .lock()
            .expect("session counters lock poisoned")
            .iter()
            .map(|(id, c)| SessionSnapshot {
                session_id: *id,
                bytes_from_client: c.bytes_from_client.load(Ordering::Relaxed),
                bytes_to_client: c.bytes_to_client.load(Ordering::Relaxed),
            })
            .collect();

        StatsSnapshot {
            active_sessions: self.active_sessions(),
            total_sessions: self.total_sessions(),
            reconnect_attempts: self.reconnect_attempts(),
            recent_errors,
            sessions,
        }
    }
}

/// Per-session byte counters as reported to the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: u64,
    pub bytes_from_client: u64,
    pub bytes_to_client: u64,
}

/// Point-in-time statistics for the health/stat surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub active_sessions: u64,
    pub total_sessions: u64,
    pub reconnect_attempts: u64,
    pub recent_errors: Vec<ErrorRecord>,
    pub sessions: Vec<SessionSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = SessionRegistry::new();
        let (id1, _c1) = registry.register_session();
        let (id2, _c2) = registry.register_session();

        assert_ne!(id1, id2);
        assert_eq!(registry.active_sessions(), 2);
        assert_eq!(registry.total_sessions(), 2);

        registry.unregister_session(id1);
        assert_eq!(registry.active_sessions(), 1);
        assert_eq!(registry.total_sessions(), 2);
    }

    #[test]
    fn test_session_ids_monotonic() {
        let registry = SessionRegistry::new();
        let mut prev = None;
        for _ in 0..5 {
            let (id, _) = registry.register_session();
            if let Some(p) = prev {
                assert!(id > p);
            }
            prev = Some(id);
        }
    }

    #[test]
    fn test_reconnect_counter() {
        let registry = SessionRegistry::new();
        registry.record_reconnect_attempt();
        registry.record_reconnect_attempt();
        assert_eq!(registry.reconnect_attempts(), 2);
    }

    #[test]
    fn test_error_ring_bounded() {
        let registry = SessionRegistry::new();
        for i in 0..(ERROR_HISTORY_LIMIT + 10) {
            registry.record_error(format!("error {}", i));
        }
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.recent_errors.len(), ERROR_HISTORY_LIMIT);
        // Oldest entries were evicted.
        assert_eq!(snapshot.recent_errors[0].message, "error 10");
    }

    #[test]
    fn test_snapshot_includes_session_bytes() {
        let registry = SessionRegistry::new();
        let (id, counters) = registry.register_session();
        counters.bytes_from_client.fetch_add(42, Ordering::Relaxed);
        counters.bytes_to_client.fetch_add(7, Ordering::Relaxed);

        let snapshot = registry.snapshot();
        let entry = snapshot
            .sessions
            .iter()
            .find(|s| s.session_id == id)
            .unwrap();
        assert_eq!(entry.bytes_from_client, 42);
        assert_eq!(entry.bytes_to_client, 7);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = SessionRegistry::new();
        registry.register_session();
        registry.record_error("backend connection refused");

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert!(json.contains("active_sessions"));
        assert!(json.contains("backend connection refused"));
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        r.record_reconnect_attempt();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.reconnect_attempts(), 800);
    }
}
