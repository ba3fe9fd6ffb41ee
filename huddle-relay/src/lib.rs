//! Huddle signaling relay library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, assigns each one an identity, announces
//! joins and departures to the shared room, and forwards negotiation
//! messages between participants.

pub mod config;
pub mod relay;
pub mod room;
