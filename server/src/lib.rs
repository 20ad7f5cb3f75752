//! Parley messaging core
//!
//! Real-time messaging subsystem of a multi-user chat service: message
//! pipeline with at-least-once archival, WebSocket fan-out with
//! cross-process relay, per-dependency circuit breakers, and session /
//! presence primitives.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
