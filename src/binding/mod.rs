//! Channel binding: one subscription's lifecycle, bound to a props surface.
//!
//! [`ChannelBinding`] owns exactly one channel subscription obtained from an
//! injected [`ChannelHost`] and translates its lifecycle into props:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──connected──► Connected
//!      ▲                        │                         │
//!      │                   rejected /                disconnect /
//!      │                   disconnected              disconnected /
//!      │                        │                    rejected
//!      └────────────────────────┴─────────────────────────┘
//! ```
//!
//! The sole state variable is a locally tracked `connected` flag; a
//! subscription handle exists exactly while a connection is pending or
//! live. A `disconnected` event that arrives while the local flag is still
//! false is handled as a rejection -- the flag, not the host, decides.
//!
//! All user-supplied callbacks (lifecycle callbacks, the receive transform,
//! payload builders) run with no internal lock held, so a callback may call
//! back into the binding.

// Rust guideline compliant 2026-02

mod actions;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;

use crate::host::{ChannelDescriptor, ChannelHost, SubscriptionHandle, SubscriptionHandlers};
use crate::props::{PropsBag, ResolvedProps};

pub use actions::{Broadcaster, PayloadBuilder, RemoteMethod};

/// Resolves per-connect subscription params from the passthrough props.
pub type ParamsResolver = Arc<dyn Fn(&PropsBag) -> Value + Send + Sync>;

/// Invoked with the live handle after a successful connection.
pub type ConnectCallback = Arc<dyn Fn(&Arc<dyn SubscriptionHandle>) + Send + Sync>;

/// Invoked on disconnection or rejection.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

/// Transforms a raw inbound payload (plus the current data props) into the
/// props fragment stored for the view. `None` clears the fragment.
pub type ReceiveTransform = Arc<dyn Fn(Value, &PropsBag) -> Option<PropsBag> + Send + Sync>;

/// Construction-time options for a [`ChannelBinding`].
///
/// Built with [`BindingOptions::builder`]; only the channel name is
/// required. Unset callbacks are no-ops, the receive transform defaults to
/// wrapping the raw payload under the channel name, and `auto_connect`
/// defaults to true.
pub struct BindingOptions {
    channel: String,
    params: Option<ParamsResolver>,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<LifecycleCallback>,
    on_reject: Option<LifecycleCallback>,
    on_receive: Option<ReceiveTransform>,
    broadcasters: BTreeMap<String, PayloadBuilder>,
    server_methods: BTreeMap<String, PayloadBuilder>,
    auto_connect: bool,
}

impl BindingOptions {
    /// Start building options.
    #[must_use]
    pub fn builder() -> BindingOptionsBuilder {
        BindingOptionsBuilder::new()
    }

    /// Channel name these options subscribe to.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn resolve_params(&self, props: &PropsBag) -> Value {
        match &self.params {
            Some(resolver) => resolver(props),
            None => Value::Null,
        }
    }

    /// Apply the receive transform. The default wraps the raw payload under
    /// the channel name.
    fn transform(&self, payload: Value, props: &PropsBag) -> Option<PropsBag> {
        match &self.on_receive {
            Some(transform) => transform(payload, props),
            None => {
                let mut fragment = PropsBag::new();
                fragment.insert(self.channel.clone(), payload);
                Some(fragment)
            }
        }
    }

    fn notify_connect(&self, handle: &Arc<dyn SubscriptionHandle>) {
        if let Some(cb) = &self.on_connect {
            cb(handle);
        }
    }

    fn notify_disconnect(&self) {
        if let Some(cb) = &self.on_disconnect {
            cb();
        }
    }

    fn notify_reject(&self) {
        if let Some(cb) = &self.on_reject {
            cb();
        }
    }
}

impl std::fmt::Debug for BindingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingOptions")
            .field("channel", &self.channel)
            .field(
                "broadcasters",
                &self.broadcasters.keys().collect::<Vec<_>>(),
            )
            .field(
                "server_methods",
                &self.server_methods.keys().collect::<Vec<_>>(),
            )
            .field("auto_connect", &self.auto_connect)
            .finish_non_exhaustive()
    }
}

/// Builder for [`BindingOptions`].
pub struct BindingOptionsBuilder {
    channel: Option<String>,
    params: Option<ParamsResolver>,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<LifecycleCallback>,
    on_reject: Option<LifecycleCallback>,
    on_receive: Option<ReceiveTransform>,
    broadcasters: BTreeMap<String, PayloadBuilder>,
    server_methods: BTreeMap<String, PayloadBuilder>,
    auto_connect: bool,
}

impl Default for BindingOptionsBuilder {
    fn default() -> Self {
        Self {
            channel: None,
            params: None,
            on_connect: None,
            on_disconnect: None,
            on_reject: None,
            on_receive: None,
            broadcasters: BTreeMap::new(),
            server_methods: BTreeMap::new(),
            auto_connect: true,
        }
    }
}

impl BindingOptionsBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel name (required).
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set the params resolver applied to the passthrough props on connect.
    #[must_use]
    pub fn params(mut self, resolver: impl Fn(&PropsBag) -> Value + Send + Sync + 'static) -> Self {
        self.params = Some(Arc::new(resolver));
        self
    }

    /// Set the connect callback, invoked with the live handle.
    #[must_use]
    pub fn on_connect(
        mut self,
        cb: impl Fn(&Arc<dyn SubscriptionHandle>) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(cb));
        self
    }

    /// Set the disconnect callback.
    #[must_use]
    pub fn on_disconnect(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(cb));
        self
    }

    /// Set the reject callback.
    #[must_use]
    pub fn on_reject(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reject = Some(Arc::new(cb));
        self
    }

    /// Set the receive transform. The default wraps the raw payload under
    /// the channel name.
    #[must_use]
    pub fn on_receive(
        mut self,
        transform: impl Fn(Value, &PropsBag) -> Option<PropsBag> + Send + Sync + 'static,
    ) -> Self {
        self.on_receive = Some(Arc::new(transform));
        self
    }

    /// Register a named broadcaster payload builder.
    #[must_use]
    pub fn broadcaster(
        mut self,
        name: impl Into<String>,
        builder: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.broadcasters.insert(name.into(), Arc::new(builder));
        self
    }

    /// Register a named remote-method payload builder.
    #[must_use]
    pub fn server_method(
        mut self,
        name: impl Into<String>,
        builder: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.server_methods.insert(name.into(), Arc::new(builder));
        self
    }

    /// Whether to connect immediately at initialization. Defaults to true.
    #[must_use]
    pub fn auto_connect(mut self, enable: bool) -> Self {
        self.auto_connect = enable;
        self
    }

    /// Build the options.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is not set.
    #[must_use]
    pub fn build(self) -> BindingOptions {
        BindingOptions {
            channel: self.channel.expect("channel is required"),
            params: self.params,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
            on_reject: self.on_reject,
            on_receive: self.on_receive,
            broadcasters: self.broadcasters,
            server_methods: self.server_methods,
            auto_connect: self.auto_connect,
        }
    }
}

impl std::fmt::Debug for BindingOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingOptionsBuilder")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Mutable binding state, guarded by one mutex.
struct Inner {
    /// Live or pending subscription. `None` when disconnected. Replaced
    /// only by connect, cleared only by release.
    handle: Option<Arc<dyn SubscriptionHandle>>,
    connected: bool,
    /// Last received-payload fragment; replaced wholesale per message.
    fragment: Option<PropsBag>,
    broadcasters: BTreeMap<String, Broadcaster>,
    methods: BTreeMap<String, RemoteMethod>,
    passthrough: PropsBag,
}

/// Shared internals behind the binding, the control object, and the
/// subscription handlers.
struct Core {
    options: BindingOptions,
    host: Arc<dyn ChannelHost>,
    inner: Mutex<Inner>,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("binding state lock poisoned")
    }

    fn unbound_broadcasters(&self) -> BTreeMap<String, Broadcaster> {
        self.options
            .broadcasters
            .iter()
            .map(|(name, builder)| {
                (
                    name.clone(),
                    Broadcaster::unbound(name.clone(), Arc::clone(builder)),
                )
            })
            .collect()
    }

    fn unbound_methods(&self) -> BTreeMap<String, RemoteMethod> {
        self.options
            .server_methods
            .iter()
            .map(|(name, builder)| {
                (
                    name.clone(),
                    RemoteMethod::unbound(
                        self.options.channel.clone(),
                        name.clone(),
                        Arc::clone(builder),
                    ),
                )
            })
            .collect()
    }

    fn bound_broadcasters(
        &self,
        handle: &Arc<dyn SubscriptionHandle>,
    ) -> BTreeMap<String, Broadcaster> {
        self.options
            .broadcasters
            .iter()
            .map(|(name, builder)| {
                (
                    name.clone(),
                    Broadcaster::bound(name.clone(), Arc::clone(builder), Arc::clone(handle)),
                )
            })
            .collect()
    }

    fn bound_methods(
        &self,
        handle: &Arc<dyn SubscriptionHandle>,
    ) -> BTreeMap<String, RemoteMethod> {
        self.options
            .server_methods
            .iter()
            .map(|(name, builder)| {
                (
                    name.clone(),
                    RemoteMethod::bound(
                        self.options.channel.clone(),
                        name.clone(),
                        Arc::clone(builder),
                        Arc::clone(handle),
                    ),
                )
            })
            .collect()
    }

    /// Clear the handle and connection state, reset bindings to their
    /// unbound defaults, and hand back the released handle so the caller
    /// can unregister it outside the lock.
    ///
    /// This runs before any user callback is notified: the invariant is
    /// that the handle is gone by the time callbacks observe the binding.
    fn release_locked(&self, inner: &mut Inner) -> Option<Arc<dyn SubscriptionHandle>> {
        let handle = inner.handle.take();
        inner.connected = false;
        inner.broadcasters = self.unbound_broadcasters();
        inner.methods = self.unbound_methods();
        handle
    }

    /// Build the four subscription handlers. They hold the core weakly:
    /// the host keeps the handlers alive, and a strong capture would cycle
    /// through `Core::host` back to the host.
    fn subscription_handlers(self: &Arc<Self>) -> SubscriptionHandlers {
        let weak = Arc::downgrade(self);
        let connected = Weak::clone(&weak);
        let disconnected = Weak::clone(&weak);
        let received = Weak::clone(&weak);
        let rejected = weak;

        SubscriptionHandlers::builder()
            .on_connected(move || {
                if let Some(core) = connected.upgrade() {
                    core.handle_connected();
                }
            })
            .on_disconnected(move || {
                if let Some(core) = disconnected.upgrade() {
                    core.handle_disconnected();
                }
            })
            .on_received(move |payload| {
                if let Some(core) = received.upgrade() {
                    core.handle_received(payload);
                }
            })
            .on_rejected(move || {
                if let Some(core) = rejected.upgrade() {
                    core.handle_rejected();
                }
            })
            .build()
    }

    /// Connect with explicit params. No-op while connected; a pending
    /// unconfirmed subscription is removed from the host and replaced.
    fn connect_to_channel(self: &Arc<Self>, params: Value) {
        let stale = {
            let mut inner = self.lock();
            if inner.connected {
                log::debug!("[cable] already connected to {}", self.options.channel);
                return;
            }
            inner.handle.take()
        };
        if let Some(stale) = stale {
            self.host.remove(&stale);
        }

        log::info!("[cable] connecting to {}", self.options.channel);

        let descriptor = ChannelDescriptor::new(self.options.channel.clone(), params);
        let handle = self.host.create(&descriptor, self.subscription_handlers());

        // Handlers first fire after `create` returns (host event contract),
        // so the handle is in place before any event can observe it.
        self.lock().handle = Some(handle);
    }

    /// Connect with params resolved from the current passthrough props.
    fn connect(self: &Arc<Self>) {
        let passthrough = self.lock().passthrough.clone();
        // Resolver is user code; run it outside the lock.
        let params = self.options.resolve_params(&passthrough);
        self.connect_to_channel(params);
    }

    /// Explicit disconnect. No-op while not connected; otherwise releases
    /// the subscription and notifies the disconnect callback directly (the
    /// synthesized disconnected path -- re-entering the event handler after
    /// the flag is cleared would misread the disconnect as a rejection).
    fn disconnect_from_channel(&self) {
        let handle = {
            let mut inner = self.lock();
            if !inner.connected {
                log::debug!(
                    "[cable] disconnect requested but not connected to {}",
                    self.options.channel
                );
                return;
            }
            self.release_locked(&mut inner)
        };

        log::info!("[cable] disconnecting from {}", self.options.channel);

        if let Some(handle) = handle {
            self.host.remove(&handle);
        }
        self.options.notify_disconnect();
    }

    /// Unmount path: release any subscription without notifying callbacks.
    fn teardown(&self) {
        let handle = {
            let mut inner = self.lock();
            self.release_locked(&mut inner)
        };
        if let Some(handle) = handle {
            log::info!("[cable] removing subscription to {}", self.options.channel);
            self.host.remove(&handle);
        }
    }

    /// Server acked the subscription: bind broadcasters and methods to the
    /// live handle, mark connected, notify the connect callback.
    fn handle_connected(&self) {
        let handle = {
            let mut inner = self.lock();
            let Some(handle) = inner.handle.as_ref().map(Arc::clone) else {
                // Event raced past a teardown; nothing to bind to.
                log::debug!(
                    "[cable] connected event for {} with no subscription, ignoring",
                    self.options.channel
                );
                return;
            };
            inner.broadcasters = self.bound_broadcasters(&handle);
            inner.methods = self.bound_methods(&handle);
            inner.connected = true;
            handle
        };

        log::info!("[cable] connected to {}", self.options.channel);
        self.options.notify_connect(&handle);
    }

    /// Inbound message: transform and replace the stored fragment.
    fn handle_received(&self, payload: Value) {
        log::debug!(
            "[cable] received data from {}: {payload}",
            self.options.channel
        );

        let data_props = {
            let inner = self.lock();
            match &inner.fragment {
                Some(fragment) => PropsBag::merged(&[&inner.passthrough, fragment]),
                None => inner.passthrough.clone(),
            }
        };

        // Transform is user code; run it outside the lock.
        let fragment = self.options.transform(payload, &data_props);
        self.lock().fragment = fragment;
    }

    /// Server or transport dropped the subscription. The locally tracked
    /// flag alone disambiguates: not yet connected means the subscription
    /// never came up, which is handled as a rejection.
    fn handle_disconnected(&self) {
        let (was_connected, handle) = {
            let mut inner = self.lock();
            let was_connected = inner.connected;
            let handle = self.release_locked(&mut inner);
            (was_connected, handle)
        };

        if let Some(handle) = handle {
            self.host.remove(&handle);
        }

        if was_connected {
            log::info!("[cable] disconnected from {}", self.options.channel);
            self.options.notify_disconnect();
        } else {
            log::info!(
                "[cable] disconnected from {} before connecting, treating as rejection",
                self.options.channel
            );
            self.options.notify_reject();
        }
    }

    /// Server refused the subscription.
    fn handle_rejected(&self) {
        let handle = {
            let mut inner = self.lock();
            self.release_locked(&mut inner)
        };
        if let Some(handle) = handle {
            self.host.remove(&handle);
        }

        log::info!("[cable] subscription to {} rejected", self.options.channel);
        self.options.notify_reject();
    }

    fn cable_control(self: &Arc<Self>, connected: bool) -> CableControl {
        CableControl {
            connected,
            core: Arc::downgrade(self),
        }
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("channel", &self.options.channel)
            .finish_non_exhaustive()
    }
}

/// Binds a props-driven view to a single channel subscription.
///
/// Construct with [`ChannelBinding::initialize`]; the subscription is
/// released when the binding is dropped (or torn down explicitly).
///
/// # Example
///
/// ```
/// use cable_binding::{BindingOptions, ChannelBinding, LoopbackHost, PropsBag};
/// use serde_json::json;
///
/// let host = LoopbackHost::new();
/// let options = BindingOptions::builder()
///     .channel("RoomChannel")
///     .broadcaster("say", |args| json!({ "body": args.first().cloned() }))
///     .build();
///
/// let binding = ChannelBinding::initialize(options, host.clone(), PropsBag::new());
/// let id = host.last_created().expect("auto-connected");
/// host.confirm(id);
///
/// let props = binding.current_props();
/// assert!(props.cable.connected());
/// props.broadcasters["say"].broadcast(&[json!("hi")]);
/// assert_eq!(host.sent(id).len(), 1);
/// ```
#[derive(Debug)]
pub struct ChannelBinding {
    core: Arc<Core>,
}

impl ChannelBinding {
    /// Initialize a binding against `host` with the initial passthrough
    /// props. Connects immediately unless `auto_connect` was disabled,
    /// resolving params from the passthrough bag.
    #[must_use]
    pub fn initialize(
        options: BindingOptions,
        host: Arc<dyn ChannelHost>,
        passthrough: PropsBag,
    ) -> Self {
        let core = Arc::new(Core {
            inner: Mutex::new(Inner {
                handle: None,
                connected: false,
                fragment: None,
                broadcasters: BTreeMap::new(),
                methods: BTreeMap::new(),
                passthrough,
            }),
            options,
            host,
        });

        // Pre-connection state carries the unbound defaults.
        {
            let mut inner = core.lock();
            inner.broadcasters = core.unbound_broadcasters();
            inner.methods = core.unbound_methods();
        }

        let binding = Self { core };
        if binding.core.options.auto_connect {
            binding.core.connect();
        }
        binding
    }

    /// Channel name this binding subscribes to.
    #[must_use]
    pub fn channel(&self) -> &str {
        self.core.options.channel()
    }

    /// Whether the subscription is currently connected.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.core.lock().connected
    }

    /// Connect with params resolved from the current passthrough props.
    /// No-op while connected.
    pub fn connect(&self) {
        self.core.connect();
    }

    /// Connect with explicit params. No-op while connected.
    pub fn connect_to_channel(&self, params: Value) {
        self.core.connect_to_channel(params);
    }

    /// Disconnect and notify the disconnect callback. No-op while not
    /// connected.
    pub fn disconnect_from_channel(&self) {
        self.core.disconnect_from_channel();
    }

    /// Replace the passthrough props (the explicit analog of a parent
    /// re-render with new props).
    pub fn update_passthrough(&self, props: PropsBag) {
        self.core.lock().passthrough = props;
    }

    /// Resolve the current view surface.
    #[must_use]
    pub fn current_props(&self) -> ResolvedProps {
        let inner = self.core.lock();
        ResolvedProps::resolve(
            &inner.passthrough,
            inner.fragment.as_ref(),
            inner.broadcasters.clone(),
            inner.methods.clone(),
            self.core.cable_control(inner.connected),
        )
    }

    /// The control object, with the connected flag as of this call.
    #[must_use]
    pub fn cable(&self) -> CableControl {
        self.core.cable_control(self.connected())
    }

    /// Explicit unmount: release the subscription without invoking user
    /// callbacks. Equivalent to dropping the binding.
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for ChannelBinding {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

/// Control surface exposed to the wrapped view: the connected flag plus
/// connect/disconnect entry points.
///
/// Holds the binding weakly; calls after the binding is dropped are no-ops.
#[derive(Clone)]
pub struct CableControl {
    connected: bool,
    core: Weak<Core>,
}

impl CableControl {
    /// Connected flag as of the resolution this control was taken from.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Connect with explicit params. No-op if the binding is gone or
    /// already connected.
    pub fn connect_to_channel(&self, params: Value) {
        if let Some(core) = self.core.upgrade() {
            core.connect_to_channel(params);
        }
    }

    /// Disconnect from the channel. No-op if the binding is gone or not
    /// connected.
    pub fn disconnect_from_channel(&self) {
        if let Some(core) = self.core.upgrade() {
            core.disconnect_from_channel();
        }
    }
}

impl std::fmt::Debug for CableControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CableControl")
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}
