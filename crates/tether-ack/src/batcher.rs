//! Size- and time-bounded batching of resolved acknowledgments.

use std::sync::{Arc, Weak};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tether_core::EventAck;
use tether_core::metric_names::ACK_BATCHES_FLUSHED_TOTAL;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives each flushed batch.
pub type FlushFn = Arc<dyn Fn(Vec<EventAck>) + Send + Sync>;

/// Accumulates acks and hands them to a flush callback in batches.
///
/// A batch is flushed when it reaches `max_size` or `interval` after its
/// first ack, whichever comes first. The callback always runs on its own
/// task, so [`add`](Self::add) never waits on it. At most one flush timer is
/// live at a time.
#[derive(Clone)]
pub struct AckBatcher {
    inner: Arc<BatcherInner>,
}

struct BatcherInner {
    max_size: usize,
    interval: Duration,
    on_flush: FlushFn,
    state: Mutex<BatchState>,
}

#[derive(Default)]
struct BatchState {
    batch: Vec<EventAck>,
    timer: Option<(u64, JoinHandle<()>)>,
    generation: u64,
    closed: bool,
}

impl BatchState {
    /// Take the batch and disarm the timer.
    fn drain(&mut self) -> Vec<EventAck> {
        if let Some((_, timer)) = self.timer.take() {
            timer.abort();
        }
        std::mem::take(&mut self.batch)
    }
}

impl AckBatcher {
    /// Batcher flushing at `max_size` acks (minimum 1) or after `interval`.
    pub fn new(
        max_size: usize,
        interval: Duration,
        on_flush: impl Fn(Vec<EventAck>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                max_size: max_size.max(1),
                interval,
                on_flush: Arc::new(on_flush),
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Append an ack. Must be called from within a tokio runtime.
    pub fn add(&self, ack: EventAck) {
        let ready = {
            let mut state = self.inner.state.lock();
            state.batch.push(ack);
            if state.closed {
                warn!("ack added after close, flushing immediately");
                Some(state.drain())
            } else if state.batch.len() >= self.inner.max_size {
                Some(state.drain())
            } else {
                if state.timer.is_none() {
                    state.generation += 1;
                    let generation = state.generation;
                    let timer = tokio::spawn(flush_after(
                        Arc::downgrade(&self.inner),
                        generation,
                        self.inner.interval,
                    ));
                    state.timer = Some((generation, timer));
                }
                None
            }
        };
        if let Some(batch) = ready {
            self.inner.dispatch(batch);
        }
    }

    /// Flush whatever is pending now.
    pub fn flush(&self) {
        let batch = self.inner.state.lock().drain();
        self.inner.dispatch(batch);
    }

    /// Flush the remainder and stop the timer. Later adds flush immediately.
    pub fn close(&self) {
        let batch = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.drain()
        };
        debug!(remaining = batch.len(), "ack batcher closed");
        self.inner.dispatch(batch);
    }

    /// Acks waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().batch.len()
    }
}

impl BatcherInner {
    fn dispatch(&self, batch: Vec<EventAck>) {
        if batch.is_empty() {
            return;
        }
        counter!(ACK_BATCHES_FLUSHED_TOTAL).increment(1);
        debug!(size = batch.len(), "flushing ack batch");
        let on_flush = Arc::clone(&self.on_flush);
        drop(tokio::spawn(async move { on_flush(batch) }));
    }
}

async fn flush_after(inner: Weak<BatcherInner>, generation: u64, interval: Duration) {
    tokio::time::sleep(interval).await;
    let Some(inner) = inner.upgrade() else { return };
    let batch = {
        let mut state = inner.state.lock();
        if !matches!(state.timer, Some((armed, _)) if armed == generation) {
            return;
        }
        // This task owns the handle; release it without aborting.
        state.timer = None;
        std::mem::take(&mut state.batch)
    };
    inner.dispatch(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn batcher(
        max_size: usize,
        interval: Duration,
    ) -> (AckBatcher, mpsc::UnboundedReceiver<Vec<EventAck>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let batcher = AckBatcher::new(max_size, interval, move |batch| {
            let _ = tx.send(batch);
        });
        (batcher, rx)
    }

    fn ack(n: usize) -> EventAck {
        EventAck::success(format!("ack_{n}"), None)
    }

    #[tokio::test(start_paused = true)]
    async fn size_threshold_flushes_once() {
        let (batcher, mut rx) = batcher(3, Duration::from_secs(1));
        for n in 0..3 {
            batcher.add(ack(n));
        }

        let batch = rx.recv().await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["ack_0", "ack_1", "ack_2"]);
        assert_eq!(batcher.pending_len(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flushes_partial_batch_once() {
        let (batcher, mut rx) = batcher(3, Duration::from_millis(100));
        batcher.add(ack(0));
        assert_eq!(batcher.pending_len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn new_timer_after_each_flush() {
        let (batcher, mut rx) = batcher(10, Duration::from_millis(100));
        batcher.add(ack(0));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        batcher.add(ack(1));
        batcher.add(ack(2));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn close_flushes_remainder() {
        let (batcher, mut rx) = batcher(10, Duration::from_secs(60));
        batcher.add(ack(0));
        batcher.add(ack(1));
        batcher.close();
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        batcher.add(ack(2));
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manual_flush_and_empty_flush() {
        let (batcher, mut rx) = batcher(10, Duration::from_secs(60));
        batcher.flush();
        batcher.add(ack(0));
        batcher.flush();
        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert!(rx.try_recv().is_err());
    }
}
