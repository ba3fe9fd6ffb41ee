//! Shared protocol definitions for the Huddle signaling wire format.

pub mod peer;
pub mod signal;
