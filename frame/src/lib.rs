//! Wire protocol for the bidirectional session channel.
//!
//! Serde-only crate: frame types plus round-trip tests, no I/O. The gateway
//! serializes every frame as one JSON text message with `"type"` as the tag.

mod client;
mod server;

pub use client::{Attachment, ClientFrame, ClientMessage, PingKind};
pub use server::{ErrorFrame, ServerFrame};
