//! Progress Channel (C5): a per-job outbound event stream.
//!
//! Events are tagged records broadcast to whatever observer is currently
//! connected. If no observer is attached, sends are dropped — the core
//! never blocks on send (§4.3). The process-wide map of per-job broadcast
//! senders is the only global-ish state in the system (§9); it is a
//! concurrency-safe map keyed by `job_id`, matching the pattern the
//! teacher uses for its own WebSocket broadcast hub.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{BestPracticeRecord, Decision};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    PageProgress {
        job_id: i64,
        current: usize,
        total: usize,
        status: PageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_title: Option<String>,
    },
    StageStatus {
        agent: String,
        status: PageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    BpCases {
        records: Vec<BestPracticeRecord>,
    },
    Interrupt {
        job_id: i64,
        agent: String,
        results: String,
        feedback_suggestion: String,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        quality_issues: Vec<String>,
    },
    PageCompleted {
        current: usize,
        total: usize,
        page_title: String,
        page_id: String,
        page_report: String,
        page_decision: Decision,
        page_decision_reason: String,
    },
    Completed {
        report: String,
        decision: Decision,
        decision_reason: String,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        decisions: Vec<Decision>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Processing,
    Completed,
}

/// Process-wide registry of per-job broadcast channels.
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<i64, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, job_id: i64) -> broadcast::Sender<ProgressEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe to a job's events. Creates the channel if this is the
    /// first observer or the first emission for this job.
    pub fn subscribe(&self, job_id: i64) -> broadcast::Receiver<ProgressEvent> {
        self.sender_for(job_id).subscribe()
    }

    /// Fire-and-forget emit. Silently drops the event if no observer is
    /// attached (`send` returning `Err` means zero receivers).
    pub fn emit(&self, job_id: i64, event: ProgressEvent) {
        let _ = self.sender_for(job_id).send(event);
    }

    /// Drop the channel for a job once its orchestration has reached a
    /// terminal event and no receivers remain attached.
    pub fn teardown(&self, job_id: i64) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(sender) = channels.get(&job_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&job_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_observer_does_not_panic_or_block() {
        let hub = ProgressHub::new();
        hub.emit(
            1,
            ProgressEvent::Error {
                message: "no one is listening".into(),
            },
        );
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_emitted_order() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe(1);
        hub.emit(
            1,
            ProgressEvent::PageProgress {
                job_id: 1,
                current: 1,
                total: 1,
                status: PageStatus::Processing,
                page_title: None,
            },
        );
        hub.emit(
            1,
            ProgressEvent::StageStatus {
                agent: "BP_Scouter".into(),
                status: PageStatus::Completed,
                message: None,
            },
        );
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::PageProgress { .. }));
        assert!(matches!(second, ProgressEvent::StageStatus { .. }));
    }

    #[test]
    fn event_serializes_with_tagged_envelope() {
        let event = ProgressEvent::Error {
            message: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["message"], "boom");
    }
}
