//! Rendezvous relay for peer-to-peer signaling.
//!
//! Two peers that cannot reach each other directly both connect to the
//! relay over TCP, announce an identity, and then exchange short text
//! lines through it until they can set up a direct connection. Nothing is
//! stored, acknowledged, or authenticated.
//!
//! - [`cli`] parses the command-line interfaces of both binaries.
//! - [`protocol`] frames `\n`-terminated lines and parses routing requests.
//! - [`registry`] maps identities to the connection currently claiming them.
//! - [`router`] serves one connection: registration, routing, cleanup.
//! - [`relay`] accepts TCP connections and spawns a router task for each.
//! - [`client`] is a small client used by `relay-client` and the tests.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
