//! Cable Binding - bind a props-driven view to one real-time channel.
//!
//! This crate manages the lifecycle of a single publish/subscribe channel
//! subscription (connect, receive, disconnect, reject) against an
//! ActionCable-style subscription factory, and translates inbound messages
//! and outbound actions into a resolved props surface for a wrapped view.
//!
//! # Architecture
//!
//! ```text
//! ChannelBinding
//!     ├── ChannelHost (injected: create/remove subscriptions)
//!     ├── lifecycle state machine (connected flag + subscription handle)
//!     ├── Broadcaster / RemoteMethod bindings (rebuilt per connection)
//!     └── ResolvedProps (passthrough + payload fragment + bindings + cable)
//! ```
//!
//! The transport is not here: reconnection, framing, and authorization
//! belong to whatever implements [`ChannelHost`]. [`LoopbackHost`] is an
//! in-process implementation for tests and local development.
//!
//! # Modules
//!
//! - [`binding`] - the `ChannelBinding` lifecycle state machine and options
//! - [`host`] - the injected channel host capability and loopback host
//! - [`props`] - typed props bags and ordered merge resolution

// Library modules
pub mod binding;
pub mod host;
pub mod props;

// Re-export commonly used types
pub use binding::{
    BindingOptions, BindingOptionsBuilder, Broadcaster, CableControl, ChannelBinding,
    PayloadBuilder, RemoteMethod,
};
pub use host::{
    ChannelDescriptor, ChannelHost, LoopbackHost, SubscriptionHandle, SubscriptionHandlers,
    SubscriptionHandlersBuilder, SubscriptionId,
};
pub use props::{PropsBag, ResolvedProps, CABLE_PROP};
