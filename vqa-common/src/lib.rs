//! # VQA Common Library
//!
//! Shared code for the voice QA validation services:
//! - Validation result and queue entry models
//! - SQLite bootstrap and schema
//! - Queue event types (QueueEvent enum) and EventBus
//! - Bootstrap configuration loading
//! - Database lock retry and timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
