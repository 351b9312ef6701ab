//! Events every tetherd instance answers.
//!
//! | event | data | reply |
//! |---|---|---|
//! | `ping` | anything | `pong` echoing the data |
//! | `namespace.join` | `{namespace}` | `namespace.joined` |
//! | `namespace.leave` | `{namespace}` | `namespace.left` |
//! | `namespace.emit` | `{namespace, type, data}` | fan-out to members |
//!
//! Clients never create namespaces: joining a name the router does not know
//! fails with `InvalidArgument`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tether_core::{CancellationToken, ConnectionRef, EventError, EventMessage, Result};
use tether_events::{EventRouter, TypedHandler};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct NamespaceRequest {
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct EmitRequest {
    namespace: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Register the built-in events on `router`.
pub fn register(router: &EventRouter) -> Result<()> {
    router.on_fn("ping", |ctx, conn, event| async move {
        conn.emit_with_context(&ctx, "pong", event.data).await?;
        Ok(())
    })?;

    let r = router.clone();
    let join_handler = TypedHandler::new("namespace.join", move |ctx, conn, req| {
        join(r.clone(), ctx, conn, req)
    })
    .with_validator(|req: &NamespaceRequest| named(&req.namespace));
    router.on("namespace.join", Arc::new(join_handler))?;

    let r = router.clone();
    let leave_handler = TypedHandler::new("namespace.leave", move |ctx, conn, req| {
        leave(r.clone(), ctx, conn, req)
    })
    .with_validator(|req: &NamespaceRequest| named(&req.namespace));
    router.on("namespace.leave", Arc::new(leave_handler))?;

    let r = router.clone();
    let emit_handler = TypedHandler::new("namespace.emit", move |ctx, conn, req| {
        emit(r.clone(), ctx, conn, req)
    })
    .with_validator(|req: &EmitRequest| {
        named(&req.namespace)?;
        if req.event_type.is_empty() {
            return Err("event type must not be empty".into());
        }
        Ok(())
    });
    router.on("namespace.emit", Arc::new(emit_handler))?;

    Ok(())
}

fn named(namespace: &str) -> std::result::Result<(), String> {
    if namespace.trim().is_empty() {
        return Err("namespace must not be empty".into());
    }
    Ok(())
}

async fn join(
    router: EventRouter,
    ctx: CancellationToken,
    conn: ConnectionRef,
    req: NamespaceRequest,
) -> Result<()> {
    let ns = router.get_namespace(&req.namespace).ok_or_else(|| {
        EventError::invalid_argument(format!("no such namespace '{}'", req.namespace))
    })?;
    ns.join(&ctx, &conn).await?;
    conn.emit_with_context(
        &ctx,
        "namespace.joined",
        json!({ "namespace": ns.name(), "members": ns.member_count() }),
    )
    .await?;
    Ok(())
}

async fn leave(
    router: EventRouter,
    ctx: CancellationToken,
    conn: ConnectionRef,
    req: NamespaceRequest,
) -> Result<()> {
    let was_member = router
        .get_namespace(&req.namespace)
        .is_some_and(|ns| ns.leave(conn.id()));
    conn.emit_with_context(
        &ctx,
        "namespace.left",
        json!({ "namespace": req.namespace, "wasMember": was_member }),
    )
    .await?;
    Ok(())
}

async fn emit(
    router: EventRouter,
    ctx: CancellationToken,
    conn: ConnectionRef,
    req: EmitRequest,
) -> Result<()> {
    let ns = router
        .get_namespace(&req.namespace)
        .filter(|ns| ns.is_member(conn.id()))
        .ok_or_else(|| {
            EventError::unauthorized(format!("not a member of namespace '{}'", req.namespace))
        })?;
    debug!(
        namespace = %req.namespace,
        event_type = %req.event_type,
        members = ns.member_count(),
        "fanning out"
    );
    ns.emit(&ctx, EventMessage::new(req.event_type, req.data))
        .await
}
