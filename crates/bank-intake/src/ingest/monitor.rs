use crate::statements::{FileType, ProcessingSummary};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

const RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestErrorRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub message: String,
}

/// Running totals for the polling loop, shown on the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestStats {
    pub polls: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub drop_location: String,
    pub drop_connected: bool,
    pub files_found: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub last_processed: Option<DateTime<Utc>>,
    pub total_transactions: u64,
    pub total_amount: Decimal,
    pub files_by_type: BTreeMap<FileType, u64>,
    pub recent_errors: VecDeque<IngestErrorRecord>,
}

#[derive(Debug, Default)]
pub struct IngestMonitor {
    stats: Mutex<IngestStats>,
}

impl IngestMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IngestStats {
        self.stats.lock().expect("monitor mutex poisoned").clone()
    }

    pub fn record_poll(&self, location: &str, connected: bool) {
        let mut stats = self.stats.lock().expect("monitor mutex poisoned");
        stats.polls += 1;
        stats.last_poll = Some(Utc::now());
        stats.drop_location = location.to_string();
        stats.drop_connected = connected;
    }

    pub fn record_found(&self, count: usize) {
        let mut stats = self.stats.lock().expect("monitor mutex poisoned");
        stats.files_found += count as u64;
    }

    pub fn record_processed(&self, summary: &ProcessingSummary) {
        let mut stats = self.stats.lock().expect("monitor mutex poisoned");
        stats.files_processed += 1;
        stats.last_processed = Some(Utc::now());
        stats.total_transactions += summary.transactions as u64;
        stats.total_amount += summary.total_amount;
        *stats.files_by_type.entry(summary.file_type).or_default() += 1;
    }

    pub fn record_failed(&self, file: &str, message: &str) {
        {
            let mut stats = self.stats.lock().expect("monitor mutex poisoned");
            stats.files_failed += 1;
        }
        self.record_error(Some(file), message);
    }

    pub fn record_error(&self, file: Option<&str>, message: &str) {
        let mut stats = self.stats.lock().expect("monitor mutex poisoned");
        if stats.recent_errors.len() == RECENT_ERRORS {
            stats.recent_errors.pop_front();
        }
        stats.recent_errors.push_back(IngestErrorRecord {
            timestamp: Utc::now(),
            file: file.map(str::to_string),
            message: message.to_string(),
        });
    }
}
