//! Broadcast chat server reachable over telnet and plain HTTP.
//!
//! Every message accepted from either side is fanned out to all connected
//! telnet clients, the sender included. Modules, leaves first:
//!
//! - [`message`] is the immutable chat event and its display rendering.
//! - [`client`] holds per-connection identity, the bounded delivery conduit,
//!   and the connection lifecycle states.
//! - [`hub`] owns the client registry and runs the single dispatch loop that
//!   serializes registrations and broadcasts.
//! - [`telnet`] drives line-oriented stream connections against the hub.
//! - [`ingress`] turns `/chat/<domain>/<sender>/<message>` HTTP calls into
//!   one broadcast each.
//! - [`config`] layers defaults, a TOML file, and command-line flags.
//! - [`server`] binds both listeners and runs them until shutdown.

pub mod client;
pub mod config;
pub mod hub;
pub mod ingress;
pub mod message;
pub mod server;
pub mod telnet;
