//! Infrastructure layer
//!
//! - Configuration loading
//! - CLI argument processing

pub mod cli;
pub mod config;
