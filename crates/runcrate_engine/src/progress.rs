//! Per-job progress broadcast: a bounded FIFO per job id, non-blocking on
//! the producer side, awaited by at most one consumer.

use runcrate_model::{JobId, ProgressEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const PROGRESS_CAPACITY: usize = 100;

pub struct ProgressChannel {
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    capacity: usize,
}

impl ProgressChannel {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Non-blocking push; evicts the oldest unread entry when full so a slow
    /// consumer sees fresh output rather than a complete backlog.
    pub fn push(&self, event: ProgressEvent) {
        let mut queue = self.queue.lock().expect("progress queue lock");
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<ProgressEvent> {
        self.queue.lock().expect("progress queue lock").pop_front()
    }

    /// Awaits the next event. Single-consumer.
    pub async fn pop(&self) -> ProgressEvent {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("progress queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Channels keyed by job id, owned by the orchestrator's lifetime. Channels
/// are opened at submission and closed by the consumer after it observes a
/// terminal status.
#[derive(Default)]
pub struct ProgressRegistry {
    channels: Mutex<HashMap<JobId, Arc<ProgressChannel>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the job's channel, creating it when absent. A job has at most
    /// one live channel.
    pub fn open(&self, job_id: &str) -> Arc<ProgressChannel> {
        self.channels
            .lock()
            .expect("progress registry lock")
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(ProgressChannel::with_capacity(PROGRESS_CAPACITY)))
            .clone()
    }

    pub fn subscribe(&self, job_id: &str) -> Option<Arc<ProgressChannel>> {
        self.channels
            .lock()
            .expect("progress registry lock")
            .get(job_id)
            .cloned()
    }

    pub fn close(&self, job_id: &str) {
        self.channels
            .lock()
            .expect("progress registry lock")
            .remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runcrate_model::JobStatus;

    fn event(line: &str) -> ProgressEvent {
        ProgressEvent {
            status: JobStatus::Building,
            line: line.to_string(),
        }
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let channel = ProgressChannel::with_capacity(3);
        for i in 0..10 {
            channel.push(event(&format!("line {}", i)));
            assert!(channel.len() <= 3);
        }
        // oldest entries were evicted
        assert_eq!(channel.try_pop().unwrap().line, "line 7");
        assert_eq!(channel.try_pop().unwrap().line, "line 8");
        assert_eq!(channel.try_pop().unwrap().line, "line 9");
        assert!(channel.try_pop().is_none());
    }

    #[tokio::test]
    async fn pop_sees_events_pushed_before_waiting() {
        let channel = ProgressChannel::with_capacity(10);
        channel.push(event("early"));
        assert_eq!(channel.pop().await.line, "early");
    }

    #[tokio::test]
    async fn pop_wakes_on_later_push() {
        let channel = Arc::new(ProgressChannel::with_capacity(10));
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pop().await })
        };
        tokio::task::yield_now().await;
        channel.push(event("late"));
        assert_eq!(consumer.await.unwrap().line, "late");
    }

    #[tokio::test]
    async fn consumer_stops_at_terminal_status() {
        let channel = ProgressChannel::with_capacity(10);
        channel.push(event("building"));
        channel.push(ProgressEvent {
            status: JobStatus::Completed,
            line: "done".into(),
        });
        let mut seen = Vec::new();
        loop {
            let event = channel.pop().await;
            let terminal = event.status.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        assert_eq!(seen.len(), 2);
        assert!(channel.is_empty());
    }

    #[test]
    fn registry_reuses_the_live_channel() {
        let registry = ProgressRegistry::new();
        let first = registry.open("job-1");
        let again = registry.open("job-1");
        assert!(Arc::ptr_eq(&first, &again));

        assert!(registry.subscribe("job-1").is_some());
        registry.close("job-1");
        assert!(registry.subscribe("job-1").is_none());
    }
}
