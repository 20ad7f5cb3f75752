//! Chat domain: message pipeline, batch archive writer, reliable queue

pub mod batcher;
pub mod pipeline;
pub mod queue;

pub use batcher::BatchWriter;
pub use pipeline::{ChatPipeline, PipelineError};
pub use queue::{QueueWorker, ReliableQueue};
