//! Non-blocking event delivery

use crate::event::{EventRecord, EventSink};
use crate::AlertError;
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What happened to a dispatched event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    /// Not attributed to a known driver
    DroppedUnknownUser,
    /// Channel full; the frame loop never waits on delivery
    DroppedFull,
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub queued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Bounded queue in front of an `EventSink`, drained by a tokio task
pub struct EventDispatcher {
    tx: mpsc::Sender<EventRecord>,
    handle: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl EventDispatcher {
    /// Spawn the delivery worker on the current runtime
    pub fn spawn(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<EventRecord>(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match sink.record(&event) {
                    Ok(()) => {
                        worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            event_type = %event.event_type,
                            user_id = event.user_id,
                            "Event delivered"
                        );
                    }
                    Err(e) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        counter!("dms_events_failed_total").increment(1);
                        error!(event_type = %event.event_type, error = %e, "Event delivery failed");
                    }
                }
            }
            info!("Event dispatcher drained");
        });

        Self {
            tx,
            handle,
            counters,
        }
    }

    /// Queue an event without waiting
    pub fn dispatch(&self, event: EventRecord) -> DispatchOutcome {
        if !event.is_attributed() {
            debug!(event_type = %event.event_type, "Dropping event for unknown user");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::DroppedUnknownUser;
        }

        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Queued
            }
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("dms_events_dropped_total").increment(1);
                warn!(event_type = %event.event_type, "Event queue full, dropping event");
                DispatchOutcome::DroppedFull
            }
            Err(TrySendError::Closed(_)) => DispatchOutcome::Closed,
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait until every queued event has been handed to the sink
    pub async fn shutdown(self) -> Result<DispatchStats, AlertError> {
        let Self {
            tx,
            handle,
            counters,
        } = self;
        drop(tx);
        handle.await.map_err(|_| AlertError::Closed)?;
        Ok(DispatchStats {
            queued: counters.queued.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<EventRecord>>,
    }

    impl EventSink for CollectingSink {
        fn record(&self, event: &EventRecord) -> Result<(), AlertError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record(&self, _event: &EventRecord) -> Result<(), AlertError> {
            Err(AlertError::Sink("disk full".into()))
        }
    }

    fn drowsy(user_id: u32) -> EventRecord {
        EventRecord::new(user_id, "DROWSY", "Drowsiness", "Eyes Closed Too Long", Severity::High)
            .with_measurement(3.2, 0.14)
    }

    #[tokio::test]
    async fn test_delivers_known_user_events() {
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = EventDispatcher::spawn(sink.clone(), 8);

        assert_eq!(dispatcher.dispatch(drowsy(4)), DispatchOutcome::Queued);
        assert_eq!(
            dispatcher.dispatch(drowsy(crate::UNKNOWN_USER_ID)),
            DispatchOutcome::DroppedUnknownUser
        );

        let stats = dispatcher.shutdown().await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, 4);
        assert_eq!(events[0].event_type, "DROWSY");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_instead_of_blocking() {
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = EventDispatcher::spawn(sink.clone(), 2);

        // The worker cannot run until we yield, so the queue fills up
        assert_eq!(dispatcher.dispatch(drowsy(1)), DispatchOutcome::Queued);
        assert_eq!(dispatcher.dispatch(drowsy(1)), DispatchOutcome::Queued);
        assert_eq!(dispatcher.dispatch(drowsy(1)), DispatchOutcome::DroppedFull);

        let stats = dispatcher.shutdown().await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failures_are_counted() {
        let dispatcher = EventDispatcher::spawn(Arc::new(FailingSink), 4);
        dispatcher.dispatch(drowsy(2));
        let stats = dispatcher.shutdown().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }
}
