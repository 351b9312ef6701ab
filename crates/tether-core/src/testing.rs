//! In-memory [`Connection`] double for tests.
//!
//! Enabled for this crate's own tests and, via the `testing` feature, for
//! dependent crates' dev builds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionError, ConnectionRef};

/// Records everything sent through it.
pub struct RecordingConnection {
    id: String,
    ctx: CancellationToken,
    sent: Mutex<Vec<Value>>,
    emitted: Mutex<Vec<(String, Value)>>,
    closed: Mutex<Option<(u16, String)>>,
    fail_sends: AtomicBool,
    tap: Option<mpsc::UnboundedSender<Value>>,
}

impl RecordingConnection {
    /// Create a connection with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ctx: CancellationToken::new(),
            sent: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
            tap: None,
        }
    }

    /// Create a connection whose `send_json` values are also forwarded to
    /// the returned receiver.
    pub fn with_tap(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = Self::new(id);
        conn.tap = Some(tx);
        (conn, rx)
    }

    /// Create a connection whose sends always fail.
    pub fn failing(id: impl Into<String>) -> Self {
        let conn = Self::new(id);
        conn.set_failing(true);
        conn
    }

    /// Wrap in an `Arc<dyn Connection>`.
    pub fn into_ref(self) -> ConnectionRef {
        Arc::new(self)
    }

    /// Toggle send failures.
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    /// Values passed to `send_json`.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// `(event_type, data)` pairs passed to `emit_with_context`.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().clone()
    }

    /// Close code and reason, if closed.
    pub fn closed(&self) -> Option<(u16, String)> {
        self.closed.lock().clone()
    }

    fn check_open(&self) -> Result<(), ConnectionError> {
        if self.fail_sends.load(Ordering::SeqCst) || self.closed.lock().is_some() {
            return Err(ConnectionError::Closed {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn context(&self) -> CancellationToken {
        self.ctx.clone()
    }

    async fn send_json(&self, value: &Value) -> Result<(), ConnectionError> {
        self.check_open()?;
        self.sent.lock().push(value.clone());
        if let Some(tap) = &self.tap {
            let _ = tap.send(value.clone());
        }
        Ok(())
    }

    async fn emit_with_context(
        &self,
        _ctx: &CancellationToken,
        event_type: &str,
        data: Value,
    ) -> Result<(), ConnectionError> {
        self.check_open()?;
        self.emitted.lock().push((event_type.to_owned(), data));
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        *self.closed.lock() = Some((code, reason.to_owned()));
        self.ctx.cancel();
        Ok(())
    }
}
