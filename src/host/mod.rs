//! Channel host abstraction: the injected subscription factory.
//!
//! This module defines the capability the binding consumes. A channel host
//! owns the actual transport (an ActionCable connection, a relay, an
//! in-process registry) and exposes exactly what the binding needs:
//!
//! ```text
//! ChannelHost                         SubscriptionHandle
//!     │                                      │
//!     │  create(descriptor, handlers)        │  send(payload)
//!     │ ───────────────────────────────►     │  perform(method, payload)
//!     │                                      │
//!     │  remove(handle)                      │
//!     │ ───────────────────────────────►     │
//!     ▼
//!   fires connected / disconnected /
//!   received / rejected handlers
//! ```
//!
//! The host is passed to the binding explicitly at initialization -- there is
//! no ambient lookup. Transport concerns (reconnection, framing, auth) live
//! entirely behind the trait.
//!
//! # Event contract
//!
//! Handler invocations are serialized, never concurrent, and first fire
//! after `create` has returned. A subscription the server refuses does not
//! fail at the `create` call site; it fails asynchronously through the
//! `rejected` handler.

// Rust guideline compliant 2026-02

pub mod loopback;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use loopback::LoopbackHost;

/// Opaque identity of a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Mint a fresh id. Host implementations call this in `create`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncate for display
        let full = self.0.to_string();
        write!(f, "{}", &full[..8])
    }
}

/// Identity of a channel: static name plus per-subscription parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Channel class name (e.g. `"RoomChannel"`).
    pub channel: String,
    /// Subscription parameters. `Null` means no params.
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub params: Value,
}

impl ChannelDescriptor {
    /// Build a descriptor from a channel name and params.
    #[must_use]
    pub fn new(channel: impl Into<String>, params: Value) -> Self {
        Self {
            channel: channel.into(),
            params,
        }
    }

    /// Stringified identifier JSON in ActionCable form: the channel name
    /// with object params flattened alongside it.
    ///
    /// Non-object, non-null params are kept under a `"params"` key.
    #[must_use]
    pub fn identifier(&self) -> String {
        let mut identifier = serde_json::json!({ "channel": self.channel });
        match &self.params {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    identifier[key] = value.clone();
                }
            }
            other => identifier["params"] = other.clone(),
        }
        identifier.to_string()
    }
}

/// The live subscription returned by [`ChannelHost::create`].
///
/// Exclusively owned by one binding instance. Both operations are
/// fire-and-forget: delivery failure surfaces as a later `disconnected`
/// event, not as a return value.
pub trait SubscriptionHandle: Send + Sync {
    /// Subscription identity, used by `remove` and by tests.
    fn id(&self) -> SubscriptionId;

    /// Send a message to the channel.
    fn send(&self, payload: Value);

    /// Invoke a named remote action with client-computed arguments.
    fn perform(&self, method: &str, payload: Value);
}

impl fmt::Debug for dyn SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// The subscription factory the binding depends on.
pub trait ChannelHost: Send + Sync {
    /// Create a subscription for `descriptor`, registering the four
    /// lifecycle handlers.
    ///
    /// Infallible at the call site: a refused subscription reports through
    /// the `rejected` handler.
    fn create(
        &self,
        descriptor: &ChannelDescriptor,
        handlers: SubscriptionHandlers,
    ) -> Arc<dyn SubscriptionHandle>;

    /// Remove a subscription. Idempotent: removing an already-removed
    /// handle is a no-op.
    fn remove(&self, handle: &Arc<dyn SubscriptionHandle>);
}

type EventFn = Box<dyn Fn() + Send + Sync>;
type ReceiveFn = Box<dyn Fn(Value) + Send + Sync>;

fn noop() -> EventFn {
    Box::new(|| {})
}

/// The four lifecycle callbacks registered with a subscription.
///
/// Unset handlers default to no-ops. Hosts fire these serially as the
/// corresponding protocol events arrive.
pub struct SubscriptionHandlers {
    connected: EventFn,
    disconnected: EventFn,
    received: ReceiveFn,
    rejected: EventFn,
}

impl SubscriptionHandlers {
    /// Start building a handler set.
    #[must_use]
    pub fn builder() -> SubscriptionHandlersBuilder {
        SubscriptionHandlersBuilder::default()
    }

    /// Fire the `connected` handler.
    pub fn connected(&self) {
        (self.connected)();
    }

    /// Fire the `disconnected` handler.
    pub fn disconnected(&self) {
        (self.disconnected)();
    }

    /// Fire the `received` handler with a raw payload.
    pub fn received(&self, payload: Value) {
        (self.received)(payload);
    }

    /// Fire the `rejected` handler.
    pub fn rejected(&self) {
        (self.rejected)();
    }
}

impl Default for SubscriptionHandlers {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for SubscriptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandlers").finish_non_exhaustive()
    }
}

/// Builder for [`SubscriptionHandlers`].
#[derive(Default)]
pub struct SubscriptionHandlersBuilder {
    connected: Option<EventFn>,
    disconnected: Option<EventFn>,
    received: Option<ReceiveFn>,
    rejected: Option<EventFn>,
}

impl SubscriptionHandlersBuilder {
    /// Set the `connected` handler.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connected = Some(Box::new(f));
        self
    }

    /// Set the `disconnected` handler.
    #[must_use]
    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Box::new(f));
        self
    }

    /// Set the `received` handler.
    #[must_use]
    pub fn on_received(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.received = Some(Box::new(f));
        self
    }

    /// Set the `rejected` handler.
    #[must_use]
    pub fn on_rejected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.rejected = Some(Box::new(f));
        self
    }

    /// Finish, filling unset handlers with no-ops.
    #[must_use]
    pub fn build(self) -> SubscriptionHandlers {
        SubscriptionHandlers {
            connected: self.connected.unwrap_or_else(noop),
            disconnected: self.disconnected.unwrap_or_else(noop),
            received: self.received.unwrap_or_else(|| Box::new(|_| {})),
            rejected: self.rejected.unwrap_or_else(noop),
        }
    }
}

impl fmt::Debug for SubscriptionHandlersBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandlersBuilder")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_identifier_flattens_object_params() {
        let descriptor = ChannelDescriptor::new(
            "RoomChannel",
            serde_json::json!({ "room_id": 7, "mode": "chat" }),
        );

        let parsed: Value =
            serde_json::from_str(&descriptor.identifier()).expect("valid identifier JSON");
        assert_eq!(parsed["channel"], "RoomChannel");
        assert_eq!(parsed["room_id"], 7);
        assert_eq!(parsed["mode"], "chat");
    }

    #[test]
    fn test_identifier_null_params() {
        let descriptor = ChannelDescriptor::new("RoomChannel", Value::Null);

        let parsed: Value =
            serde_json::from_str(&descriptor.identifier()).expect("valid identifier JSON");
        assert_eq!(parsed, serde_json::json!({ "channel": "RoomChannel" }));
    }

    #[test]
    fn test_identifier_scalar_params_kept_under_key() {
        let descriptor = ChannelDescriptor::new("RoomChannel", serde_json::json!(42));

        let parsed: Value =
            serde_json::from_str(&descriptor.identifier()).expect("valid identifier JSON");
        assert_eq!(parsed["channel"], "RoomChannel");
        assert_eq!(parsed["params"], 42);
    }

    #[test]
    fn test_descriptor_serde_skips_null_params() {
        let descriptor = ChannelDescriptor::new("RoomChannel", Value::Null);
        let text = serde_json::to_string(&descriptor).expect("serializable");
        assert_eq!(text, r#"{"channel":"RoomChannel"}"#);

        let back: ChannelDescriptor = serde_json::from_str(&text).expect("deserializable");
        assert_eq!(back, descriptor);
    }

    #[test]
    fn test_default_handlers_are_noops() {
        let handlers = SubscriptionHandlers::default();
        handlers.connected();
        handlers.disconnected();
        handlers.received(serde_json::json!({"x": 1}));
        handlers.rejected();
    }

    #[test]
    fn test_builder_wires_handlers() {
        let fired = Arc::new(AtomicUsize::new(0));
        let handlers = {
            let fired = Arc::clone(&fired);
            SubscriptionHandlers::builder()
                .on_received(move |payload| {
                    assert_eq!(payload["x"], 1);
                    fired.fetch_add(1, Ordering::SeqCst);
                })
                .build()
        };

        handlers.received(serde_json::json!({"x": 1}));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_id_display_truncates() {
        let id = SubscriptionId::new();
        assert_eq!(id.to_string().len(), 8);
    }
}
