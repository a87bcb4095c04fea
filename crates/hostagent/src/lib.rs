//! Classboard host agent
//!
//! Runs the authoritative board session: sequences every operation, caches
//! strokes and background for late joiners, and relays to all connections
//! over QUIC.

pub mod authority;
pub mod cert;
pub mod console;
pub mod queue;
pub mod quic_server;
pub mod snapshot;

pub use authority::{ConnId, HostAuthority, SessionState};
pub use cert::HostCert;
pub use queue::{HostEvent, HostStatus, InboundQueue};
pub use quic_server::{HostConfig, HostHandle, QuicServer};
