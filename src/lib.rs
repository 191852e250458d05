//! Gator - A command-line RSS feed aggregator
//!
//! Users register, subscribe to feeds and run a scheduler that scrapes
//! one feed per tick into a SQLite store of posts.

pub mod commands;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod scheduler;

pub use error::{Error, Result};
