//! Bound broadcasters and remote methods.
//!
//! A payload builder is a user-supplied pure function from call-site
//! arguments to a JSON payload. On every successful connection the binding
//! wraps each builder around the live subscription handle; on teardown the
//! wrappers revert to their unbound form, which still computes the payload
//! (builders are pure) but drops it instead of touching a stale handle.

use std::sync::Arc;

use serde_json::Value;

use crate::host::SubscriptionHandle;

/// Pure function computing a payload from call-site arguments.
pub type PayloadBuilder = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A client-to-server one-way message sender bound to a channel
/// subscription.
#[derive(Clone)]
pub struct Broadcaster {
    name: String,
    builder: PayloadBuilder,
    handle: Option<Arc<dyn SubscriptionHandle>>,
}

impl Broadcaster {
    pub(crate) fn unbound(name: String, builder: PayloadBuilder) -> Self {
        Self {
            name,
            builder,
            handle: None,
        }
    }

    pub(crate) fn bound(
        name: String,
        builder: PayloadBuilder,
        handle: Arc<dyn SubscriptionHandle>,
    ) -> Self {
        Self {
            name,
            builder,
            handle: Some(handle),
        }
    }

    /// Broadcaster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this broadcaster is bound to a live subscription.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Compute the payload from `args` and send it to the channel.
    ///
    /// Unbound broadcasters drop the payload. A panicking builder
    /// propagates; it is not caught here.
    pub fn broadcast(&self, args: &[Value]) {
        let payload = (self.builder)(args);
        match &self.handle {
            Some(handle) => {
                log::debug!("[cable] broadcasting '{}': {payload}", self.name);
                handle.send(payload);
            }
            None => {
                log::warn!(
                    "[cable] dropping broadcast '{}' -- not connected",
                    self.name
                );
            }
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("name", &self.name)
            .field("bound", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

/// A named server-side action invoked with client-computed arguments.
#[derive(Clone)]
pub struct RemoteMethod {
    channel: String,
    name: String,
    builder: PayloadBuilder,
    handle: Option<Arc<dyn SubscriptionHandle>>,
}

impl RemoteMethod {
    pub(crate) fn unbound(channel: String, name: String, builder: PayloadBuilder) -> Self {
        Self {
            channel,
            name,
            builder,
            handle: None,
        }
    }

    pub(crate) fn bound(
        channel: String,
        name: String,
        builder: PayloadBuilder,
        handle: Arc<dyn SubscriptionHandle>,
    ) -> Self {
        Self {
            channel,
            name,
            builder,
            handle: Some(handle),
        }
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this method is bound to a live subscription.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Compute the arguments from `args` and perform the remote action.
    ///
    /// Unbound methods drop the call. A panicking builder propagates; it is
    /// not caught here.
    pub fn call(&self, args: &[Value]) {
        let payload = (self.builder)(args);
        match &self.handle {
            Some(handle) => {
                log::debug!("[cable] calling {}#{}: {payload}", self.channel, self.name);
                handle.perform(&self.name, payload);
            }
            None => {
                log::warn!(
                    "[cable] dropping call {}#{} -- not connected",
                    self.channel,
                    self.name
                );
            }
        }
    }
}

impl std::fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("channel", &self.channel)
            .field("name", &self.name)
            .field("bound", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ChannelDescriptor, ChannelHost, LoopbackHost, SubscriptionHandlers};
    use serde_json::json;

    fn builder() -> PayloadBuilder {
        Arc::new(|args| json!({ "body": args.first().cloned().unwrap_or(Value::Null) }))
    }

    #[test]
    fn test_bound_broadcaster_sends_built_payload() {
        let host = LoopbackHost::new();
        let handle = host.create(
            &ChannelDescriptor::new("RoomChannel", Value::Null),
            SubscriptionHandlers::default(),
        );

        let broadcaster = Broadcaster::bound("say".into(), builder(), Arc::clone(&handle));
        broadcaster.broadcast(&[json!("hi")]);

        assert_eq!(host.sent(handle.id()), vec![json!({"body": "hi"})]);
    }

    #[test]
    fn test_unbound_broadcaster_drops_payload() {
        let broadcaster = Broadcaster::unbound("say".into(), builder());
        assert!(!broadcaster.is_bound());
        // Nothing to send through; must not panic.
        broadcaster.broadcast(&[json!("hi")]);
    }

    #[test]
    fn test_bound_method_performs_named_action() {
        let host = LoopbackHost::new();
        let handle = host.create(
            &ChannelDescriptor::new("RoomChannel", Value::Null),
            SubscriptionHandlers::default(),
        );

        let method = RemoteMethod::bound(
            "RoomChannel".into(),
            "speak".into(),
            builder(),
            Arc::clone(&handle),
        );
        method.call(&[json!("hello")]);

        assert_eq!(
            host.performed(handle.id()),
            vec![("speak".to_string(), json!({"body": "hello"}))]
        );
    }

    #[test]
    fn test_unbound_method_drops_call() {
        let method = RemoteMethod::unbound("RoomChannel".into(), "speak".into(), builder());
        assert!(!method.is_bound());
        method.call(&[json!("hello")]);
    }
}
