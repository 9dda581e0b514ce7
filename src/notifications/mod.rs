//! Notification records produced by any subsystem and consumed by transports
//! (email/SMS/push) that live outside this crate. The core only produces and
//! retains records; dispatch is someone else's problem.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const HISTORY_CAPACITY: usize = 1000;

/// Urgency bucket, independent of [`crate::error::middleware::ErrorSeverity`]
/// — notifications are user-facing, errors are operational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

/// One notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub timestamp: u64,
    pub priority: Priority,
    pub category: String,
    pub title: String,
    pub message: String,
    pub channels: Vec<String>,
    pub expires_at: Option<u64>,
    pub persistent: bool,
}

impl Notification {
    /// Construct a notification with no channels/expiry set; callers append
    /// channels and an expiry as their dispatch policy requires.
    pub fn new(priority: Priority, category: String, title: String, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            priority,
            category,
            title,
            message,
            channels: Vec::new(),
            expires_at: None,
            persistent: false,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded (1000-entry) notification history. Dispatch to real transports is
/// out of scope; this is the record of intent.
#[derive(Default)]
pub struct NotificationCenter {
    history: Mutex<VecDeque<Notification>>,
}

impl NotificationCenter {
    /// Construct an empty center.
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Record a new notification, evicting the oldest if at capacity.
    pub fn push(&self, notification: Notification) {
        let mut history = self.history.lock();
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(notification);
    }

    /// Snapshot of the current history, newest last.
    pub fn history(&self) -> Vec<Notification> {
        self.history.lock().iter().cloned().collect()
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    /// Whether any notification is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_read_back_history() {
        let center = NotificationCenter::new();
        center.push(Notification::new(
            Priority::Normal,
            "energy".to_string(),
            "title".to_string(),
            "message".to_string(),
        ));
        assert_eq!(center.len(), 1);
        assert_eq!(center.history()[0].category, "energy");
    }

    #[test]
    fn history_bounded_to_1000() {
        let center = NotificationCenter::new();
        for i in 0..1100 {
            center.push(Notification::new(
                Priority::Low,
                "test".to_string(),
                format!("n{i}"),
                "msg".to_string(),
            ));
        }
        assert_eq!(center.len(), 1000);
        // Oldest 100 evicted; the first retained title should be n100.
        assert_eq!(center.history()[0].title, "n100");
    }
}
