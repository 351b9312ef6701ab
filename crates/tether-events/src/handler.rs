//! Event handlers.
//!
//! Two flavors implement [`TypedEventHandler`]:
//!
//! - [`FnHandler`]: receives the raw [`EventMessage`]
//! - [`TypedHandler`]: receives the payload coerced into a concrete type `T`
//!
//! Coercion (see [`coerce`]) uses the payload directly when `T` is the JSON
//! value type itself and otherwise deserializes the payload into `T`.

use std::any::{Any, TypeId};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::{CancellationToken, ConnectionRef, EventError, EventMessage, Result};

/// Trait implemented by every event handler.
#[async_trait]
pub trait TypedEventHandler: Send + Sync {
    /// Process one event received on `conn`.
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()>;

    /// Event type this handler is written for.
    fn event_type(&self) -> &str;

    /// Check the payload before [`handle`](Self::handle) runs.
    fn validate(&self, _data: &Value) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn TypedEventHandler>;

type DataValidator = Box<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;
type PayloadValidator<T> = Box<dyn Fn(&T) -> std::result::Result<(), String> + Send + Sync>;

/// Handler backed by an async function over the raw event.
pub struct FnHandler<F> {
    event_type: String,
    func: F,
    validator: Option<DataValidator>,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(CancellationToken, ConnectionRef, EventMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Wrap `func` as a handler for `event_type`.
    pub fn new(event_type: impl Into<String>, func: F) -> Self {
        Self {
            event_type: event_type.into(),
            func,
            validator: None,
        }
    }

    /// Reject payloads for which `validator` returns an error.
    #[must_use]
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }
}

#[async_trait]
impl<F, Fut> TypedEventHandler for FnHandler<F>
where
    F: Fn(CancellationToken, ConnectionRef, EventMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        (self.func)(ctx.clone(), Arc::clone(conn), event.clone()).await
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn validate(&self, data: &Value) -> Result<()> {
        match &self.validator {
            Some(validator) => validator(data).map_err(|message| EventError::Validation {
                event_type: self.event_type.clone(),
                message,
            }),
            None => Ok(()),
        }
    }
}

/// Handler bound to a concrete payload type `T`.
pub struct TypedHandler<T, F> {
    event_type: String,
    func: F,
    validator: Option<PayloadValidator<T>>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F, Fut> TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(CancellationToken, ConnectionRef, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Wrap `func` as a handler for `event_type` receiving `T`.
    pub fn new(event_type: impl Into<String>, func: F) -> Self {
        Self {
            event_type: event_type.into(),
            func,
            validator: None,
            _payload: PhantomData,
        }
    }

    /// Reject coerced payloads for which `validator` returns an error.
    #[must_use]
    pub fn with_validator(
        mut self,
        validator: impl Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }
}

#[async_trait]
impl<T, F, Fut> TypedEventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(CancellationToken, ConnectionRef, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        let payload = coerce::<T>(&event.data)?;
        (self.func)(ctx.clone(), Arc::clone(conn), payload).await
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn validate(&self, data: &Value) -> Result<()> {
        let payload = coerce::<T>(data).map_err(|e| EventError::Validation {
            event_type: self.event_type.clone(),
            message: e.to_string(),
        })?;
        if let Some(validator) = &self.validator {
            validator(&payload).map_err(|message| EventError::Validation {
                event_type: self.event_type.clone(),
                message,
            })?;
        }
        Ok(())
    }
}

/// Convert a payload into `T`.
///
/// A payload already of type `T` (i.e. `T` is [`Value`]) is used as is;
/// anything else goes through serde. Failure names both the expected Rust
/// type and the JSON kind received.
pub fn coerce<T: DeserializeOwned + 'static>(data: &Value) -> Result<T> {
    if TypeId::of::<T>() == TypeId::of::<Value>() {
        let direct: Box<dyn Any> = Box::new(data.clone());
        if let Ok(value) = direct.downcast::<T>() {
            return Ok(*value);
        }
    }
    serde_json::from_value(data.clone()).map_err(|e| EventError::Coercion {
        expected: std::any::type_name::<T>().to_owned(),
        actual: json_kind(data).to_owned(),
        message: e.to_string(),
    })
}

/// JSON kind of a value, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
