use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, info, warn};

pub const ACTIVITY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Upload,
    Approval,
    Lifecycle,
    Processing,
    Ingest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub category: ActivityCategory,
    pub message: String,
    pub severity: Severity,
}

impl ActivityEvent {
    pub fn new(category: ActivityCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            message: message.into(),
            severity,
        }
    }
}

/// Receives human-readable activity as jobs move.
pub trait ActivitySink: Send + Sync {
    fn emit(&self, event: ActivityEvent);
}

/// Bounded feed of the most recent events, newest last. Each event is also logged.
#[derive(Debug)]
pub struct ActivityFeed {
    capacity: usize,
    events: Mutex<VecDeque<ActivityEvent>>,
}

impl ActivityFeed {
    pub fn new() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<ActivityEvent> {
        let guard = self.events.lock().expect("activity mutex poisoned");
        guard.iter().rev().cloned().collect()
    }
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySink for ActivityFeed {
    fn emit(&self, event: ActivityEvent) {
        match event.severity {
            Severity::Error => error!(category = ?event.category, "{}", event.message),
            Severity::Warning => warn!(category = ?event.category, "{}", event.message),
            Severity::Info | Severity::Success => {
                info!(category = ?event.category, "{}", event.message)
            }
        }

        let mut guard = self.events.lock().expect("activity mutex poisoned");
        if self.capacity == 0 {
            return;
        }
        while guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_most_recent_events() {
        let feed = ActivityFeed::new();
        for index in 0..(ACTIVITY_CAPACITY + 7) {
            feed.emit(ActivityEvent::new(
                ActivityCategory::Ingest,
                Severity::Info,
                format!("event {index}"),
            ));
        }

        let recent = feed.recent();
        assert_eq!(recent.len(), ACTIVITY_CAPACITY);
        assert_eq!(recent[0].message, format!("event {}", ACTIVITY_CAPACITY + 6));
        assert_eq!(recent[ACTIVITY_CAPACITY - 1].message, "event 7");
    }
}
