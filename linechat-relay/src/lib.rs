//! linechat relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts plain TCP connections, gives each client a unique
//! nickname, and broadcasts every line a client sends to all other clients.

pub mod broadcast;
pub mod config;
pub mod handler;
pub mod registry;
pub mod server;
pub mod sink;
