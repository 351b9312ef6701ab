//! Pending acknowledgment tracking.
//!
//! Every pending entry lives in one map guarded by one mutex. Three paths can
//! resolve an entry: an arriving ack ([`AckManager::handle_ack`]), its timer,
//! and explicit cancellation (caller abandonment or parent-token
//! cancellation). Each path first removes the entry from the map under the
//! lock and only the path that removed it acts on it, so an entry is resolved
//! exactly once. Timer stop, delivery and token cancellation run after the
//! lock is released.
//!
//! Entries carry a sequence number. Timer tasks remove only the entry they
//! were armed for, so a stale timer can never resolve a later entry that
//! reuses the same ack id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tether_core::metric_names::{ACKS_PENDING, ACKS_RESOLVED_TOTAL};
use tether_core::{
    CancellationToken, ConnectionRef, EventAck, EventError, EventMessage, Result, ids,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default time to wait for an acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback invoked once with the resolution of a callback-mode send.
pub type AckCallback = Box<dyn FnOnce(EventAck) + Send + 'static>;

enum Delivery {
    Channel(oneshot::Sender<Resolution>),
    Callback(AckCallback),
}

enum Resolution {
    Acked(EventAck),
    TimedOut(EventAck),
}

impl Resolution {
    fn into_ack(self) -> EventAck {
        match self {
            Self::Acked(ack) | Self::TimedOut(ack) => ack,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Acked(_) => "acked",
            Self::TimedOut(_) => "timeout",
        }
    }
}

struct PendingAck {
    seq: u64,
    event: EventMessage,
    delivery: Delivery,
    timer: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

struct Inner {
    pending: Mutex<HashMap<String, PendingAck>>,
    next_seq: AtomicU64,
    default_timeout: Duration,
}

/// Pairs outbound events with their acknowledgments.
///
/// Cloning is cheap; clones share the pending map.
#[derive(Clone)]
pub struct AckManager {
    inner: Arc<Inner>,
}

impl Default for AckManager {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TIMEOUT)
    }
}

impl AckManager {
    /// Manager using `default_timeout` when a send passes no timeout.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                default_timeout,
            }),
        }
    }

    /// Timeout applied when a send passes `None`.
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Send `event` and wait for its acknowledgment.
    ///
    /// An ack id is generated when the event has none. The entry is
    /// registered before the event is transmitted. A send failure removes
    /// the entry and is returned as is. When no ack arrives within the
    /// timeout, [`EventError::AckTimeout`] is returned; cancelling `ctx`
    /// abandons the wait with [`EventError::Cancelled`]. An already
    /// cancelled `ctx` fails the same way before anything is sent.
    pub async fn send_with_ack(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: EventMessage,
        timeout: Option<Duration>,
    ) -> Result<EventAck> {
        refuse_if_cancelled(ctx)?;
        let (tx, rx) = oneshot::channel();
        let Outbound {
            ack_id,
            event,
            payload,
        } = Outbound::prepare(event)?;
        let seq = self.register(ctx, &ack_id, event, Delivery::Channel(tx), timeout)?;
        let mut guard = AbandonOnDrop {
            manager: self,
            ack_id: ack_id.clone(),
            seq,
            armed: true,
        };

        if let Err(err) = conn.send_json(&payload).await {
            warn!(
                ack_id = %ack_id,
                conn_id = conn.id(),
                error = %err,
                "send failed, dropping pending ack"
            );
            guard.armed = false;
            let _ = self.abandon(&ack_id, Some(seq), "send_failed");
            return Err(err.into());
        }

        let outcome = rx.await;
        guard.armed = false;
        match outcome {
            Ok(Resolution::Acked(ack)) => Ok(ack),
            Ok(Resolution::TimedOut(_)) => Err(EventError::AckTimeout { ack_id }),
            Err(_closed) => Err(EventError::Cancelled {
                message: format!("acknowledgment '{ack_id}' abandoned"),
            }),
        }
    }

    /// Send `event` and return immediately; `callback` runs on its own task
    /// with the ack, or with a timeout ack if none arrives in time.
    ///
    /// Returns the ack id, usable with [`cancel_ack`](Self::cancel_ack).
    /// Nothing is sent when `ctx` is already cancelled.
    pub async fn send_with_callback(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: EventMessage,
        callback: impl FnOnce(EventAck) + Send + 'static,
        timeout: Option<Duration>,
    ) -> Result<String> {
        refuse_if_cancelled(ctx)?;
        let Outbound {
            ack_id,
            event,
            payload,
        } = Outbound::prepare(event)?;
        let seq = self.register(
            ctx,
            &ack_id,
            event,
            Delivery::Callback(Box::new(callback)),
            timeout,
        )?;

        if let Err(err) = conn.send_json(&payload).await {
            warn!(
                ack_id = %ack_id,
                conn_id = conn.id(),
                error = %err,
                "send failed, dropping pending ack"
            );
            let _ = self.abandon(&ack_id, Some(seq), "send_failed");
            return Err(err.into());
        }
        Ok(ack_id)
    }

    /// Resolve the pending entry matching `ack.id`.
    ///
    /// Unknown or already-resolved ids yield [`EventError::NoPendingAck`].
    /// Must be called from within a tokio runtime.
    pub fn handle_ack(&self, ack: EventAck) -> Result<()> {
        let Some(entry) = self.take(&ack.id, None) else {
            debug!(ack_id = %ack.id, "ack for unknown or resolved id");
            return Err(EventError::NoPendingAck { ack_id: ack.id });
        };
        debug!(
            ack_id = %ack.id,
            event_type = %entry.event.event_type,
            success = ack.success,
            "ack received"
        );
        finish(entry, Some(Resolution::Acked(ack)), true);
        Ok(())
    }

    /// Abandon a pending entry without delivering anything.
    ///
    /// Returns whether the id was pending.
    pub fn cancel_ack(&self, ack_id: &str) -> bool {
        self.abandon(ack_id, None, "cancelled")
    }

    /// Abandon every pending entry, returning how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingAck> = {
            let mut pending = self.inner.pending.lock();
            let drained = pending.drain().map(|(_, entry)| entry).collect();
            gauge!(ACKS_PENDING).set(0.0);
            drained
        };
        let count = drained.len();
        for entry in drained {
            counter!(ACKS_RESOLVED_TOTAL, "outcome" => "cancelled").increment(1);
            finish(entry, None, true);
        }
        if count > 0 {
            debug!(count, "abandoned all pending acks");
        }
        count
    }

    /// Number of acknowledgments currently awaited.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether `ack_id` is awaited.
    pub fn is_pending(&self, ack_id: &str) -> bool {
        self.inner.pending.lock().contains_key(ack_id)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn register(
        &self,
        ctx: &CancellationToken,
        ack_id: &str,
        event: EventMessage,
        delivery: Delivery,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.inner.default_timeout);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let cancel = ctx.child_token();

        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(ack_id) {
                return Err(EventError::invalid_argument(format!(
                    "acknowledgment '{ack_id}' is already pending"
                )));
            }
            let _ = pending.insert(
                ack_id.to_owned(),
                PendingAck {
                    seq,
                    event,
                    delivery,
                    timer: None,
                    cancel: cancel.clone(),
                },
            );
            set_pending_gauge(pending.len());
        }

        let timer = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            ack_id.to_owned(),
            seq,
            timeout,
            cancel,
        ));

        // The entry may already be resolved by the time the timer exists.
        let mut pending = self.inner.pending.lock();
        match pending.get_mut(ack_id) {
            Some(entry) if entry.seq == seq => entry.timer = Some(timer),
            _ => timer.abort(),
        }
        drop(pending);

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        debug!(ack_id, timeout_ms, "ack registered");
        Ok(seq)
    }

    fn take(&self, ack_id: &str, seq: Option<u64>) -> Option<PendingAck> {
        take(&self.inner, ack_id, seq)
    }

    fn abandon(&self, ack_id: &str, seq: Option<u64>, outcome: &'static str) -> bool {
        match self.take(ack_id, seq) {
            Some(entry) => {
                counter!(ACKS_RESOLVED_TOTAL, "outcome" => outcome).increment(1);
                finish(entry, None, true);
                true
            }
            None => false,
        }
    }
}

/// Abandons the entry if `send_with_ack` is dropped before resolution.
struct AbandonOnDrop<'a> {
    manager: &'a AckManager,
    ack_id: String,
    seq: u64,
    armed: bool,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.manager.abandon(&self.ack_id, Some(self.seq), "cancelled");
        }
    }
}

/// An event ready for transmission with its correlation id.
struct Outbound {
    ack_id: String,
    event: EventMessage,
    payload: serde_json::Value,
}

impl Outbound {
    /// Assign an ack id if missing and encode the envelope.
    fn prepare(mut event: EventMessage) -> Result<Self> {
        let ack_id = match event.ack_id() {
            Some(id) => id.to_owned(),
            None => {
                let id = ids::new_ack_id();
                event.ack_id = Some(id.clone());
                id
            }
        };
        let _ = event.ensure_timestamp();
        let payload = serde_json::to_value(&event)?;
        Ok(Self {
            ack_id,
            event,
            payload,
        })
    }
}

/// A request whose caller already gave up is never transmitted.
fn refuse_if_cancelled(ctx: &CancellationToken) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(EventError::Cancelled {
            message: "acknowledgment request cancelled before send".into(),
        });
    }
    Ok(())
}

fn take(inner: &Inner, ack_id: &str, seq: Option<u64>) -> Option<PendingAck> {
    let mut pending = inner.pending.lock();
    let matches = pending
        .get(ack_id)
        .is_some_and(|entry| seq.is_none_or(|seq| entry.seq == seq));
    if !matches {
        return None;
    }
    let entry = pending.remove(ack_id);
    set_pending_gauge(pending.len());
    entry
}

/// Act on an entry already removed from the map. `resolution == None`
/// abandons it: the channel closes without a value and callbacks never run.
fn finish(entry: PendingAck, resolution: Option<Resolution>, stop_timer: bool) {
    if stop_timer {
        if let Some(timer) = &entry.timer {
            timer.abort();
        }
    }
    if let Some(resolution) = resolution {
        counter!(ACKS_RESOLVED_TOTAL, "outcome" => resolution.outcome()).increment(1);
        match entry.delivery {
            Delivery::Channel(tx) => {
                // The receiver may already be gone.
                let _ = tx.send(resolution);
            }
            Delivery::Callback(callback) => {
                let ack = resolution.into_ack();
                drop(tokio::spawn(async move { callback(ack) }));
            }
        }
    }
    entry.cancel.cancel();
}

async fn run_timer(
    inner: Weak<Inner>,
    ack_id: String,
    seq: u64,
    timeout: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = tokio::time::sleep(timeout) => {
            let Some(inner) = inner.upgrade() else { return };
            if let Some(entry) = take(&inner, &ack_id, Some(seq)) {
                warn!(
                    ack_id = %ack_id,
                    event_type = %entry.event.event_type,
                    "acknowledgment timed out"
                );
                let ack = EventAck::timed_out(&ack_id);
                finish(entry, Some(Resolution::TimedOut(ack)), false);
            }
        }
        () = cancel.cancelled() => {
            // Parent cancellation abandons; resolution by other paths is a no-op here.
            let Some(inner) = inner.upgrade() else { return };
            if let Some(entry) = take(&inner, &ack_id, Some(seq)) {
                debug!(ack_id = %ack_id, "pending ack abandoned by caller context");
                counter!(ACKS_RESOLVED_TOTAL, "outcome" => "cancelled").increment(1);
                finish(entry, None, false);
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_pending_gauge(len: usize) {
    gauge!(ACKS_PENDING).set(len as f64);
}
