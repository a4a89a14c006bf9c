//! Core Elm architecture types
//!
//! - Messages and dispatch inputs
//! - The program contract and its builder
//! - Lifecycle phases and the error taxonomy
//! - The pure `union` merge

pub mod error;
pub mod lifecycle;
pub mod message;
pub mod program;
pub mod union;
