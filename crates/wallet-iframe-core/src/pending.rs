//! The parent-side pending-request map.

use crate::envelope::ProgressPayload;
use crate::error::WalletError;
use std::collections::HashMap;

pub type ResultSender = Box<dyn FnOnce(Result<serde_json::Value, WalletError>) + Send>;
pub type ProgressCallback = Box<dyn FnMut(&ProgressPayload) + Send>;

pub struct PendingRequest {
    pub resolve: Option<ResultSender>,
    pub on_progress: Option<ProgressCallback>,
    pub sticky: bool,
    /// Monotonic deadline in clock milliseconds; refreshed on every
    /// PROGRESS message since progress counts as liveness.
    pub deadline_millis: u64,
}

/// Owns the exclusive in-memory map of outstanding requests on the
/// parent side.
#[derive(Default)]
pub struct PendingRequestMap {
    entries: HashMap<String, PendingRequest>,
}

impl PendingRequestMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request_id: impl Into<String>, entry: PendingRequest) {
        self.entries.insert(request_id.into(), entry);
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn refresh_deadline(&mut self, request_id: &str, new_deadline_millis: u64) {
        if let Some(entry) = self.entries.get_mut(request_id) {
            entry.deadline_millis = new_deadline_millis;
        }
    }

    pub fn take(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.entries.remove(request_id)
    }

    pub fn notify_progress(&mut self, request_id: &str, payload: &ProgressPayload) {
        if let Some(entry) = self.entries.get_mut(request_id) {
            if let Some(cb) = entry.on_progress.as_mut() {
                cb(payload);
            }
        }
    }

    /// Requests whose deadline has passed as of `now_millis`.
    pub fn expired(&self, now_millis: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.deadline_millis <= now_millis)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
