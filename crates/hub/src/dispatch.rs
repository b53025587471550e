//! Fire-and-forget delivery with per-endpoint ordering.
//!
//! Each routing endpoint gets its own queue drained by one worker task, so
//! deliveries to the same endpoint complete in arrival order while
//! different endpoints proceed independently.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    hubrelay_channels::{Deliverer, Delivery},
    tokio::sync::mpsc,
    tokio_util::task::TaskTracker,
    tracing::{debug, warn},
};

use crate::delivery::deliver_with_retry;

/// An endpoint queue with nothing to deliver for this long is retired.
pub const QUEUE_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct DeliveryDispatcher {
    inner: Arc<Inner>,
}

struct Queue {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Inner {
    deliverer: Arc<dyn Deliverer>,
    retry_delay: Duration,
    queues: DashMap<String, Queue>,
    next_id: AtomicU64,
    tracker: TaskTracker,
}

impl DeliveryDispatcher {
    pub fn new(deliverer: Arc<dyn Deliverer>, retry_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                deliverer,
                retry_delay,
                queues: DashMap::new(),
                next_id: AtomicU64::new(0),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Queue a delivery behind earlier ones for the same endpoint. Never blocks.
    ///
    /// The send happens under the map entry so a worker cannot retire
    /// between lookup and send.
    pub fn dispatch(&self, delivery: Delivery) {
        match self.inner.queues.entry(delivery.endpoint.clone()) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(returned)) = entry.get().tx.send(delivery) {
                    // Worker gone; replace it.
                    let queue = self.spawn_worker(&returned.endpoint);
                    send_to_new(&queue, returned);
                    entry.insert(queue);
                }
            },
            Entry::Vacant(entry) => {
                let queue = self.spawn_worker(&delivery.endpoint);
                send_to_new(&queue, delivery);
                entry.insert(queue);
            },
        }
    }

    /// Endpoints with a live worker.
    pub fn active_endpoints(&self) -> usize {
        self.inner.queues.len()
    }

    /// Stop accepting work and wait up to `timeout` for queued deliveries.
    /// Returns `false` if the deadline passed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.queues.clear();
        self.inner.tracker.close();
        match tokio::time::timeout(timeout, self.inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    pending = self.inner.tracker.len(),
                    "in-flight deliveries still running at shutdown deadline"
                );
                false
            },
        }
    }

    fn spawn_worker(&self, endpoint: &str) -> Queue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let endpoint = endpoint.to_string();
        debug!(endpoint = %endpoint, "starting delivery queue");
        self.inner.tracker.spawn(async move {
            loop {
                match tokio::time::timeout(QUEUE_IDLE_TIMEOUT, rx.recv()).await {
                    Ok(Some(delivery)) => {
                        deliver_with_retry(inner.deliverer.as_ref(), &delivery, inner.retry_delay)
                            .await;
                    },
                    Ok(None) => break,
                    Err(_) => {
                        // Only retire if nothing slipped in; dispatch sends under this entry.
                        let retired = inner
                            .queues
                            .remove_if(&endpoint, |_, queue| queue.id == id && rx.is_empty());
                        if retired.is_some() {
                            break;
                        }
                    },
                }
            }
            debug!(endpoint = %endpoint, "delivery queue closed");
        });
        Queue { id, tx }
    }
}

fn send_to_new(queue: &Queue, delivery: Delivery) {
    if let Err(mpsc::error::SendError(lost)) = queue.tx.send(delivery) {
        warn!(endpoint = %lost.endpoint, "delivery queue closed before first message");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        hubrelay_channels::DeliveryError,
        std::sync::Mutex,
    };

    /// Records deliveries; the first delivery to `slow` takes a while.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Deliverer for Recorder {
        async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
            if delivery.content == "slow-1" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.seen.lock().unwrap().push(delivery.content.clone());
            Ok(())
        }
    }

    fn delivery(endpoint: &str, content: &str) -> Delivery {
        Delivery {
            label: "acme".into(),
            endpoint: endpoint.into(),
            content: content.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_endpoint_keeps_order_other_endpoints_do_not_wait() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = DeliveryDispatcher::new(recorder.clone(), Duration::from_secs(2));

        dispatcher.dispatch(delivery("thread:t-1", "slow-1"));
        dispatcher.dispatch(delivery("thread:t-1", "slow-2"));
        dispatcher.dispatch(delivery("alice", "fast"));
        assert_eq!(dispatcher.active_endpoints(), 2);

        assert!(dispatcher.shutdown(Duration::from_secs(30)).await);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![
            "fast", "slow-1", "slow-2"
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_deadline() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = DeliveryDispatcher::new(recorder, Duration::from_secs(2));
        dispatcher.dispatch(delivery("thread:t-1", "slow-1"));
        assert!(!dispatcher.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queues_are_retired_and_recreated_on_demand() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = DeliveryDispatcher::new(recorder.clone(), Duration::from_secs(2));

        dispatcher.dispatch(delivery("alice", "first"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dispatcher.active_endpoints(), 1);

        tokio::time::sleep(QUEUE_IDLE_TIMEOUT).await;
        assert_eq!(dispatcher.active_endpoints(), 0);

        dispatcher.dispatch(delivery("alice", "second"));
        assert_eq!(dispatcher.active_endpoints(), 1);
        assert!(dispatcher.shutdown(Duration::from_secs(30)).await);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["first", "second"]);
    }
}
