//! Classboard command-line client
//!
//! Joins a host, keeps a local board replica, and draws synthetic strokes
//! from console commands.

pub mod client;
pub mod console;
pub mod message_reader;

pub use client::{Client, ClientConfig, ClientHandle, ClientStatus};
