//! # Leadpool Common Library
//!
//! Shared code for the leadpool pipeline including:
//! - Database initialization and schema
//! - Row models for the system-of-record relations
//! - Configuration loading
//! - Error types
//! - Timestamp formatting helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
