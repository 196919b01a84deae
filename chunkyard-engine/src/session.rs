//! Upload session lifecycle: Open -> Merging -> Closed
//!
//! The staging store stays the source of truth for whether a session has data.
//! The registry only records what the store cannot express: which sessions are
//! being closed right now, how many chunk writes are in flight, and which ids
//! were closed recently.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use chunkyard_core::*;
use tracing::trace;

const CLOSED_HISTORY: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: SessionState,
    writers: usize,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<UploadId, Entry>,
    closed_order: VecDeque<UploadId>,
}

impl Sessions {
    /// Drop entries that carry no information beyond what the store holds
    fn prune(&mut self, upload: &UploadId) {
        if let Some(entry) = self.entries.get(upload) {
            if entry.state == SessionState::Open && entry.writers == 0 {
                self.entries.remove(upload);
            }
        }
    }

    fn mark_closed(&mut self, upload: &UploadId) {
        if let Some(entry) = self.entries.get_mut(upload) {
            entry.state = SessionState::Closed;
        }
        self.closed_order.push_back(upload.clone());

        while self.closed_order.len() > CLOSED_HISTORY {
            if let Some(oldest) = self.closed_order.pop_front() {
                let still_closed = self
                    .entries
                    .get(&oldest)
                    .is_some_and(|e| e.state == SessionState::Closed);
                if still_closed && !self.closed_order.contains(&oldest) {
                    self.entries.remove(&oldest);
                }
            }
        }
    }
}

/// In-memory lifecycle tracker shared by the receiver and the merge engine
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        // Every mutation leaves the map consistent, so a poisoned lock is still usable
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an in-flight chunk write. Refused while the session is being closed.
    pub fn begin_write(&self, upload: &UploadId) -> Result<WriteGuard<'_>> {
        let mut sessions = self.lock();
        let entry = sessions.entries.entry(upload.clone()).or_insert(Entry {
            state: SessionState::Open,
            writers: 0,
        });

        if entry.state == SessionState::Merging {
            return Err(ChunkyardError::SessionBusy {
                upload_id: upload.to_string(),
                state: SessionState::Merging,
            });
        }

        // Writing to a closed id starts a fresh session under the same name
        entry.state = SessionState::Open;
        entry.writers += 1;
        trace!(upload_id = %upload, writers = entry.writers, "write started");

        Ok(WriteGuard { registry: self, upload: upload.clone() })
    }

    /// Take exclusive ownership of a session for a merge or an abandon.
    ///
    /// Refused while another close is running or while chunk writes are in flight.
    pub fn begin_close(&self, upload: &UploadId) -> Result<CloseGuard<'_>> {
        let mut sessions = self.lock();
        let prior = sessions.entries.get(upload).copied();

        if let Some(entry) = prior {
            if entry.state == SessionState::Merging || entry.writers > 0 {
                return Err(ChunkyardError::SessionBusy {
                    upload_id: upload.to_string(),
                    state: entry.state,
                });
            }
        }

        sessions.entries.insert(
            upload.clone(),
            Entry { state: SessionState::Merging, writers: 0 },
        );
        trace!(upload_id = %upload, "close started");

        Ok(CloseGuard {
            registry: self,
            upload: upload.clone(),
            prior: prior.map(|e| e.state),
            completed: false,
        })
    }

    /// State recorded in memory, if any. `None` means the store decides.
    pub fn state(&self, upload: &UploadId) -> Option<SessionState> {
        self.lock().entries.get(upload).map(|e| e.state)
    }

    /// Number of chunk writes currently in flight for `upload`
    pub fn writers(&self, upload: &UploadId) -> usize {
        self.lock().entries.get(upload).map(|e| e.writers).unwrap_or(0)
    }
}

/// Held for the duration of one chunk write
pub struct WriteGuard<'a> {
    registry: &'a SessionRegistry,
    upload: UploadId,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut sessions = self.registry.lock();
        if let Some(entry) = sessions.entries.get_mut(&self.upload) {
            entry.writers = entry.writers.saturating_sub(1);
        }
        sessions.prune(&self.upload);
    }
}

/// Held while a merge or abandon owns a session.
///
/// Dropping without [`CloseGuard::complete`] reopens the session, so a failed
/// merge leaves its chunks available for a retry.
pub struct CloseGuard<'a> {
    registry: &'a SessionRegistry,
    upload: UploadId,
    prior: Option<SessionState>,
    completed: bool,
}

impl CloseGuard<'_> {
    /// Mark the session Closed
    pub fn complete(mut self) {
        self.completed = true;
        self.registry.lock().mark_closed(&self.upload);
    }
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let mut sessions = self.registry.lock();
        match self.prior {
            Some(state) => {
                if let Some(entry) = sessions.entries.get_mut(&self.upload) {
                    entry.state = state;
                }
            }
            None => {
                sessions.entries.remove(&self.upload);
            }
        }
        trace!(upload_id = %self.upload, "close abandoned, state restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> UploadId {
        UploadId::new(s).unwrap()
    }

    #[test]
    fn test_write_guard_tracks_writers() {
        let registry = SessionRegistry::new();
        let upload = id("abc123");

        let first = registry.begin_write(&upload).unwrap();
        let second = registry.begin_write(&upload).unwrap();
        assert_eq!(registry.writers(&upload), 2);
        assert_eq!(registry.state(&upload), Some(SessionState::Open));

        drop(first);
        assert_eq!(registry.writers(&upload), 1);
        drop(second);
        assert_eq!(registry.writers(&upload), 0);
        assert_eq!(registry.state(&upload), None);
    }

    #[test]
    fn test_close_refused_while_writing() {
        let registry = SessionRegistry::new();
        let upload = id("abc123");

        let write = registry.begin_write(&upload).unwrap();
        let err = registry.begin_close(&upload).err().unwrap();
        assert!(matches!(
            err,
            ChunkyardError::SessionBusy { state: SessionState::Open, .. }
        ));

        drop(write);
        assert!(registry.begin_close(&upload).is_ok());
    }

    #[test]
    fn test_write_refused_while_merging() {
        let registry = SessionRegistry::new();
        let upload = id("abc123");

        let close = registry.begin_close(&upload).unwrap();
        assert_eq!(registry.state(&upload), Some(SessionState::Merging));
        assert!(matches!(
            registry.begin_write(&upload).err().unwrap(),
            ChunkyardError::SessionBusy { state: SessionState::Merging, .. }
        ));
        assert!(registry.begin_close(&upload).is_err());

        close.complete();
        assert_eq!(registry.state(&upload), Some(SessionState::Closed));
    }

    #[test]
    fn test_failed_close_restores_state() {
        let registry = SessionRegistry::new();
        let upload = id("abc123");

        drop(registry.begin_close(&upload).unwrap());
        assert_eq!(registry.state(&upload), None);

        registry.begin_close(&upload).unwrap().complete();
        drop(registry.begin_close(&upload).unwrap());
        assert_eq!(registry.state(&upload), Some(SessionState::Closed));
    }

    #[test]
    fn test_closed_session_reopens_on_write() {
        let registry = SessionRegistry::new();
        let upload = id("abc123");

        registry.begin_close(&upload).unwrap().complete();
        let write = registry.begin_write(&upload).unwrap();
        assert_eq!(registry.state(&upload), Some(SessionState::Open));
        drop(write);
        assert_eq!(registry.state(&upload), None);
    }

    #[test]
    fn test_closed_history_is_bounded() {
        let registry = SessionRegistry::new();
        for i in 0..(CLOSED_HISTORY + 10) {
            registry.begin_close(&id(&format!("u{}", i))).unwrap().complete();
        }

        assert_eq!(registry.state(&id("u0")), None);
        assert_eq!(
            registry.state(&id(&format!("u{}", CLOSED_HISTORY + 9))),
            Some(SessionState::Closed)
        );
        assert!(registry.lock().entries.len() <= CLOSED_HISTORY);
    }
}
