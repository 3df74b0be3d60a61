// Bounded command/response history per device
//
// Appending never waits on readers: the ring is only locked for a push,
// and subscribers get entries through a broadcast channel that drops
// the oldest message for slow receivers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Local>,
    pub command: String,
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: Arc<Mutex<VecDeque<AuditEntry>>>,
    capacity: usize,
    informer: broadcast::Sender<AuditEntry>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let (informer, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            informer,
        }
    }

    pub fn record(&self, command: &str, response: &str) {
        let entry = AuditEntry {
            at: Local::now(),
            command: command.to_string(),
            response: response.to_string(),
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            if self.capacity > 0 {
                entries.push_back(entry.clone());
            }
        }

        // No receivers is not an error
        let _ = self.informer.send(entry);
    }

    /// Copy of the current history, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receive every entry recorded from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.informer.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.record(&format!("M{}", i), "ok");
        }
        let commands: Vec<String> = log.entries().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["M2", "M3", "M4"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_subscribers_see_new_entries() {
        let log = AuditLog::new(10);
        let mut rx = log.subscribe();
        log.record("I", "2");
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.command, "I");
        assert_eq!(entry.response, "2");
    }

    #[test]
    fn test_record_without_subscribers() {
        let log = AuditLog::new(2);
        log.record("ME", "1");
        assert!(!log.is_empty());
    }
}
