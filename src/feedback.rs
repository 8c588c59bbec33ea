//! Feedback Inbox (C4): a per-job one-slot rendezvous for HITL responses.
//!
//! `reset` followed by `await_feedback` observes only values published
//! strictly after the reset — each job's slot carries a generation counter
//! bumped by `reset` so a publish from a stale generation is invisible to a
//! waiter that reset after it was sent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub text: Option<String>,
    pub skip: bool,
}

impl Feedback {
    pub fn skip() -> Self {
        Self {
            text: None,
            skip: true,
        }
    }

    pub fn is_effectively_skip(&self) -> bool {
        self.skip || self.text.as_deref().unwrap_or("").trim().is_empty()
    }
}

struct Slot {
    generation: u64,
    pending: Option<(u64, Feedback)>,
    notify: Notify,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            generation: 0,
            pending: None,
            notify: Notify::new(),
        }
    }
}

/// Process-wide map of per-job feedback slots, keyed by `job_id`.
#[derive(Default)]
pub struct FeedbackInbox {
    slots: Mutex<HashMap<i64, Slot>>,
}

impl FeedbackInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear any pending value and bump the generation, so in-flight
    /// publishes from the previous stage cannot be observed by the next
    /// `await_feedback`.
    pub fn reset(&self, job_id: i64) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(job_id).or_default();
        slot.generation += 1;
        slot.pending = None;
    }

    /// Store exactly one pending value, replacing any unconsumed prior
    /// value (last-writer-wins).
    pub fn publish(&self, job_id: i64, value: Feedback) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(job_id).or_default();
        let generation = slot.generation;
        slot.pending = Some((generation, value));
        slot.notify.notify_one();
    }

    /// Wait until a value is published after the most recent `reset`, or the
    /// timeout elapses (treated as `{skip: true}` by the caller).
    pub async fn await_feedback(&self, job_id: i64, timeout: Duration) -> Feedback {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (generation, notified) = {
                let mut slots = self.slots.lock().unwrap();
                let slot = slots.entry(job_id).or_default();
                if let Some((gen, value)) = slot.pending.take() {
                    if gen == slot.generation {
                        return value;
                    }
                    continue;
                }
                (slot.generation, slot.notify.notified())
            };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Feedback::skip();
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Feedback::skip();
            }
            let mut slots = self.slots.lock().unwrap();
            let slot = slots.entry(job_id).or_default();
            if let Some((gen, value)) = slot.pending.take() {
                if gen == generation {
                    return value;
                }
            }
        }
    }
}
