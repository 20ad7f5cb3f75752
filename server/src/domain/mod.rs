//! Domain layer: pipeline, fan-out, breakers, sessions

pub mod breaker;
pub mod chat;
pub mod fanout;
pub mod sessions;

pub use breaker::Breakers;
pub use chat::{ChatPipeline, PipelineError};
pub use fanout::ConnectionManager;
pub use sessions::SessionManager;
