//! # Crisis Common Library
//!
//! Shared code for the crisis-detection services:
//! - Common error type
//! - Root folder and TOML configuration helpers
//! - Event types and the broadcast EventBus
//! - Text normalization and content hashing

pub mod config;
pub mod error;
pub mod events;
pub mod text;

pub use error::{Error, Result};
