//! RuuviTag measurement pipeline.
//!
//! A client aggregates the latest reading per sensor and streams each batch to
//! a server. The server appends every reading to a time-bounded in-memory
//! store, prunes and archives it on a timer, and triggers rendering of the
//! recent history no more often than a configured threshold.

pub mod aggregator;
pub mod aliases;
pub mod archive;
pub mod client;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod render;
pub mod scheduler;
pub mod store;
pub mod utils;
