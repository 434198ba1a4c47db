//! space-sync core library.
//!
//! This crate provides the components for one-directional synchronization of
//! a content space into another: configuration, API clients, rate limiting,
//! source and destination readers, transformation, deletion diffing, the
//! staged push pipeline, error logging and sync token persistence.

pub mod client;
pub mod config;
pub mod destination;
pub mod diff;
pub mod error_buffer;
pub mod errors;
pub mod models;
pub mod push;
pub mod rate_limit;
pub mod source;
pub mod sync_engine;
pub mod token_store;
pub mod transform;

// Re-exports for convenience.
pub use config::AppConfig;
pub use error_buffer::ErrorBuffer;
pub use rate_limit::RequestScheduler;
pub use sync_engine::{RunOptions, SpaceSync, SyncReport};
pub use token_store::{FileTokenStore, TokenStore};
