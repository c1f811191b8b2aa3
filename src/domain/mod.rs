//! # Domain Layer
//!
//! Core types of the session lifecycle, independent of any network stack.
//!
//! ## Structure
//!
//! - **identity**: the account token a session authenticates as
//! - **proxy**: proxy descriptors, bindings, egress info and the resolver contract
//! - **session**: per-generation session state
//! - **transport**: endpoint, headers, transport events and the connector contract
//!
//! The `ProxyResolver` and `Connector` traits are implemented in the
//! infrastructure layer.

pub mod identity;
pub mod proxy;
pub mod session;
pub mod transport;

pub use identity::{EmptyIdentity, Identity};
pub use proxy::{
    EgressInfo, ProxyBinding, ProxyCredentials, ProxyDescriptor, ProxyResolver, ProxyScheme,
};
pub use session::{ConnectionState, Session};
pub use transport::{
    ConnectionHeaders, Connector, Endpoint, OutboundFrame, TransportEvent, TransportHandle,
    TransportPeer, ABNORMAL_CLOSURE,
};
