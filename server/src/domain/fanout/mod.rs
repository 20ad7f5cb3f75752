//! Fan-out layer: connection manager, per-client pumps, cross-process relay

pub mod client;
pub mod frame;
pub mod manager;
pub mod relay;

pub use frame::{Frame, RelayEnvelope};
pub use manager::ConnectionManager;
