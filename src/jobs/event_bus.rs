//! Fan-out bus for job state-change events
//!
//! Every subscriber owns a bounded queue. A slow subscriber never stalls
//! producers or its peers: when its queue is full the oldest buffered event
//! is dropped to admit the newest, so a consumer that falls behind sees
//! current state rather than stale history. Events are serialized once per
//! emit and shared across subscribers.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::error;
use uuid::Uuid;

use crate::jobs::store::Job;

/// Per-subscriber queue capacity.
pub const SUBSCRIBER_QUEUE_SIZE: usize = 100;

/// A job state-change event as broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Created { job: Job },
    Updated { job: Job },
    Deleted { job_id: Uuid },
    Cleared { count: usize },
}

/// One serialized event, shared by every subscriber queue. Carries enough
/// metadata for consumers to filter without re-parsing the payload.
#[derive(Debug)]
pub struct BusMessage {
    /// The event serialized once at emission time.
    pub json: String,
    /// Job the event concerns, when it concerns exactly one.
    pub job_id: Option<Uuid>,
    /// Whether the job reached a terminal status in this event.
    pub terminal: bool,
}

struct SubscriberQueue {
    items: Mutex<VecDeque<Arc<BusMessage>>>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    /// Drop-oldest backpressure: a full queue discards its head to make
    /// room, and exactly one buffered event is lost.
    fn push(&self, message: Arc<BusMessage>) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(message);
        drop(items);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Arc<BusMessage>> {
        self.items.lock().pop_front()
    }
}

/// Scoped handle to a subscriber queue. Dropping it removes the queue from
/// the bus, so cleanup happens on every exit path of a consumer.
pub struct Subscription {
    bus: Arc<JobEventBus>,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Arc<BusMessage> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking the queue, so an emit
            // between the check and the await is not missed.
            notified.as_mut().enable();
            if let Some(message) = self.queue.pop() {
                return message;
            }
            notified.await;
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<BusMessage>> {
        self.queue.pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.bus.subscribers.lock();
        subscribers.retain(|q| !Arc::ptr_eq(q, &self.queue));
    }
}

/// Broadcasts job events to all current subscribers.
#[derive(Default)]
pub struct JobEventBus {
    subscribers: Mutex<Vec<Arc<SubscriberQueue>>>,
}

impl JobEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber with the default queue capacity.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        self.subscribe_with_capacity(SUBSCRIBER_QUEUE_SIZE)
    }

    pub fn subscribe_with_capacity(self: &Arc<Self>, capacity: usize) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        });
        self.subscribers.lock().push(queue.clone());
        Subscription {
            bus: self.clone(),
            queue,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Serialize the event once and push it to every current subscriber.
    pub fn emit(&self, event: &JobEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize job event");
                return;
            }
        };
        let (job_id, terminal) = match event {
            JobEvent::Created { job } | JobEvent::Updated { job } => {
                (Some(job.id), job.status.is_terminal())
            }
            JobEvent::Deleted { job_id } => (Some(*job_id), false),
            JobEvent::Cleared { .. } => (None, false),
        };
        let message = Arc::new(BusMessage {
            json,
            job_id,
            terminal,
        });

        // Snapshot so concurrent subscribe/unsubscribe cannot corrupt delivery.
        let subscribers: Vec<Arc<SubscriberQueue>> = self.subscribers.lock().clone();
        for queue in subscribers {
            queue.push(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(count: usize) -> JobEvent {
        JobEvent::Cleared { count }
    }

    #[tokio::test]
    async fn events_delivered_in_emission_order() {
        let bus = Arc::new(JobEventBus::new());
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(&cleared(i));
        }
        for i in 0..5 {
            let message = sub.recv().await;
            assert_eq!(message.json, format!(r#"{{"type":"cleared","count":{i}}}"#));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_exactly_one_oldest() {
        let bus = Arc::new(JobEventBus::new());
        let mut sub = bus.subscribe_with_capacity(3);

        for i in 0..4 {
            bus.emit(&cleared(i));
        }

        // Oldest (count=0) was dropped; 1, 2 and the newest 3 remain.
        let received: Vec<String> = std::iter::from_fn(|| sub.try_recv())
            .map(|m| m.json.clone())
            .collect();
        assert_eq!(
            received,
            vec![
                r#"{"type":"cleared","count":1}"#,
                r#"{"type":"cleared","count":2}"#,
                r#"{"type":"cleared","count":3}"#,
            ]
        );
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = Arc::new(JobEventBus::new());
        let sub = bus.subscribe();
        let sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub2);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let bus = Arc::new(JobEventBus::new());
        let mut slow = bus.subscribe_with_capacity(1);
        let mut fast = bus.subscribe();

        for i in 0..10 {
            bus.emit(&cleared(i));
        }

        // Slow kept only the newest event.
        assert_eq!(slow.try_recv().unwrap().json, r#"{"type":"cleared","count":9}"#);
        assert!(slow.try_recv().is_none());

        // Fast saw all ten.
        let count = std::iter::from_fn(|| fast.try_recv()).count();
        assert_eq!(count, 10);
    }
}
