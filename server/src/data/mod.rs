//! Data layer: cache, pub/sub topics, archive log, durable store

pub mod archive;
pub mod cache;
pub mod error;
pub mod postgres;
pub mod store;
pub mod topics;
pub mod types;

pub use archive::ArchiveService;
pub use cache::CacheService;
pub use store::StoreService;
pub use topics::TopicService;
