//! In-process channel host with no transport.
//!
//! `LoopbackHost` keeps an identifier-keyed subscription registry and lets a
//! driver (a test, a local demo, a simulation harness) deliver the four
//! lifecycle events by subscription id. Every `send` and `perform` is
//! recorded per subscription for later inspection.
//!
//! Events delivered to a removed subscription are dropped, the same way a
//! cable connection ignores messages for unknown identifiers. Recording, by
//! contrast, never stops: a `send` on a stale handle is still visible to
//! assertions, it just reaches no subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::{ChannelDescriptor, ChannelHost, SubscriptionHandle, SubscriptionHandlers, SubscriptionId};

#[derive(Debug)]
struct Entry {
    descriptor: ChannelDescriptor,
    handlers: Arc<SubscriptionHandlers>,
    subscribed: bool,
    sent: Vec<Value>,
    performed: Vec<(String, Value)>,
}

#[derive(Debug, Default)]
struct Registry {
    entries: HashMap<SubscriptionId, Entry>,
    created: Vec<SubscriptionId>,
}

/// An in-process [`ChannelHost`] for tests and local development.
#[derive(Debug, Default)]
pub struct LoopbackHost {
    registry: Arc<Mutex<Registry>>,
}

/// Handle returned by [`LoopbackHost::create`].
#[derive(Debug)]
struct LoopbackSubscription {
    id: SubscriptionId,
    registry: Arc<Mutex<Registry>>,
}

impl LoopbackHost {
    /// Create a new host behind an `Arc`, ready for injection.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a server ack: fires the `connected` handler.
    pub fn confirm(&self, id: SubscriptionId) {
        if let Some(handlers) = self.live_handlers(id) {
            log::debug!("[cable] loopback confirming subscription {id}");
            handlers.connected();
        }
    }

    /// Deliver a server refusal: fires the `rejected` handler.
    pub fn reject(&self, id: SubscriptionId) {
        if let Some(handlers) = self.live_handlers(id) {
            log::debug!("[cable] loopback rejecting subscription {id}");
            handlers.rejected();
        }
    }

    /// Deliver a server-initiated drop: fires the `disconnected` handler.
    pub fn drop_subscription(&self, id: SubscriptionId) {
        if let Some(handlers) = self.live_handlers(id) {
            log::debug!("[cable] loopback dropping subscription {id}");
            handlers.disconnected();
        }
    }

    /// Deliver an inbound message: fires the `received` handler.
    pub fn deliver(&self, id: SubscriptionId, payload: Value) {
        if let Some(handlers) = self.live_handlers(id) {
            handlers.received(payload);
        }
    }

    /// Total number of subscriptions ever created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.lock().created.len()
    }

    /// Id of the most recently created subscription.
    #[must_use]
    pub fn last_created(&self) -> Option<SubscriptionId> {
        self.lock().created.last().copied()
    }

    /// Whether the subscription is currently registered (created and not
    /// yet removed).
    #[must_use]
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.lock()
            .entries
            .get(&id)
            .is_some_and(|entry| entry.subscribed)
    }

    /// Descriptor the subscription was created with.
    #[must_use]
    pub fn descriptor(&self, id: SubscriptionId) -> Option<ChannelDescriptor> {
        self.lock()
            .entries
            .get(&id)
            .map(|entry| entry.descriptor.clone())
    }

    /// Payloads sent through the subscription's handle, in order.
    #[must_use]
    pub fn sent(&self, id: SubscriptionId) -> Vec<Value> {
        self.lock()
            .entries
            .get(&id)
            .map(|entry| entry.sent.clone())
            .unwrap_or_default()
    }

    /// `(method, payload)` pairs performed through the subscription's
    /// handle, in order.
    #[must_use]
    pub fn performed(&self, id: SubscriptionId) -> Vec<(String, Value)> {
        self.lock()
            .entries
            .get(&id)
            .map(|entry| entry.performed.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().expect("registry lock poisoned")
    }

    /// Clone the handlers out of the registry so the lock is not held while
    /// a handler runs (handlers re-enter the host through `remove`).
    fn live_handlers(&self, id: SubscriptionId) -> Option<Arc<SubscriptionHandlers>> {
        let registry = self.lock();
        let entry = registry.entries.get(&id)?;
        if !entry.subscribed {
            log::trace!("[cable] loopback event for removed subscription {id}, dropping");
            return None;
        }
        Some(Arc::clone(&entry.handlers))
    }
}

impl ChannelHost for LoopbackHost {
    fn create(
        &self,
        descriptor: &ChannelDescriptor,
        handlers: SubscriptionHandlers,
    ) -> Arc<dyn SubscriptionHandle> {
        let id = SubscriptionId::new();
        {
            let mut registry = self.lock();
            registry.entries.insert(
                id,
                Entry {
                    descriptor: descriptor.clone(),
                    handlers: Arc::new(handlers),
                    subscribed: true,
                    sent: Vec::new(),
                    performed: Vec::new(),
                },
            );
            registry.created.push(id);
        }
        log::debug!(
            "[cable] loopback subscription {id} created for {}",
            descriptor.identifier()
        );
        Arc::new(LoopbackSubscription {
            id,
            registry: Arc::clone(&self.registry),
        })
    }

    fn remove(&self, handle: &Arc<dyn SubscriptionHandle>) {
        let id = handle.id();
        let mut registry = self.lock();
        match registry.entries.get_mut(&id) {
            Some(entry) if entry.subscribed => {
                entry.subscribed = false;
                log::debug!("[cable] loopback subscription {id} removed");
            }
            _ => log::trace!("[cable] loopback remove for unknown subscription {id}, ignoring"),
        }
    }
}

impl SubscriptionHandle for LoopbackSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn send(&self, payload: Value) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        if let Some(entry) = registry.entries.get_mut(&self.id) {
            if !entry.subscribed {
                log::warn!("[cable] send on removed subscription {}", self.id);
            }
            entry.sent.push(payload);
        }
    }

    fn perform(&self, method: &str, payload: Value) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        if let Some(entry) = registry.entries.get_mut(&self.id) {
            if !entry.subscribed {
                log::warn!("[cable] perform '{method}' on removed subscription {}", self.id);
            }
            entry.performed.push((method.to_string(), payload));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor() -> ChannelDescriptor {
        ChannelDescriptor::new("RoomChannel", json!({ "room_id": 1 }))
    }

    #[test]
    fn test_create_registers_and_records() {
        let host = LoopbackHost::new();
        let handle = host.create(&descriptor(), SubscriptionHandlers::default());
        let id = handle.id();

        assert!(host.is_subscribed(id));
        assert_eq!(host.created_count(), 1);
        assert_eq!(host.last_created(), Some(id));
        assert_eq!(
            host.descriptor(id).map(|d| d.channel),
            Some("RoomChannel".to_string())
        );

        handle.send(json!({"body": "hi"}));
        handle.perform("speak", json!({"body": "hello"}));

        assert_eq!(host.sent(id), vec![json!({"body": "hi"})]);
        assert_eq!(
            host.performed(id),
            vec![("speak".to_string(), json!({"body": "hello"}))]
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let host = LoopbackHost::new();
        let handle = host.create(&descriptor(), SubscriptionHandlers::default());
        let id = handle.id();

        host.remove(&handle);
        assert!(!host.is_subscribed(id));

        // Second removal is a no-op
        host.remove(&handle);
        assert!(!host.is_subscribed(id));
    }

    #[test]
    fn test_events_after_removal_are_dropped() {
        let fired = Arc::new(AtomicUsize::new(0));
        let handlers = {
            let fired = Arc::clone(&fired);
            SubscriptionHandlers::builder()
                .on_received(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
                .build()
        };

        let host = LoopbackHost::new();
        let handle = host.create(&descriptor(), handlers);
        let id = handle.id();

        host.deliver(id, json!({"x": 1}));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        host.remove(&handle);
        host.deliver(id, json!({"x": 2}));
        host.confirm(id);
        host.drop_subscription(id);
        host.reject(id);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_handle_sends_are_still_recorded() {
        let host = LoopbackHost::new();
        let handle = host.create(&descriptor(), SubscriptionHandlers::default());
        let id = handle.id();

        host.remove(&handle);
        handle.send(json!({"late": true}));

        // Recorded so tests can assert nothing *should* have been sent
        assert_eq!(host.sent(id), vec![json!({"late": true})]);
    }

    #[test]
    fn test_handler_may_reenter_host() {
        let host = LoopbackHost::new();

        // The rejected handler calls back into the host; this must not
        // deadlock on the registry lock.
        let registry_host = Arc::clone(&host);
        let handlers = SubscriptionHandlers::builder()
            .on_rejected(move || {
                assert_eq!(registry_host.created_count(), 1);
            })
            .build();

        let handle = host.create(&descriptor(), handlers);
        host.reject(handle.id());
    }
}
