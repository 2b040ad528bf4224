//! Dropsite: a remote file tree mirrored into servable resources
//!
//! Dropsite keeps a local cache of a remote file tree in a sled store, syncs
//! it incrementally under per-node throttles, and derives one resource per
//! node (raw files, images, text, configuration and formatted pages) from
//! pattern-based site configuration.

pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod metadata;
pub mod remote;
pub mod resource;
pub mod site;
pub mod store;
pub mod sync;
pub mod task;
pub mod tooling;
pub mod tree;
pub mod types;
