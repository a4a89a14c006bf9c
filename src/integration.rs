//! Runtime machinery
//!
//! - Dispatcher and state reader handed to programs and subscriptions
//! - Effect batcher coalescing dispatches per tick
//! - Subscription manager
//! - Runtime loop and the async host driver

pub mod app_runner;
pub mod batcher;
pub mod dispatcher;
pub mod runtime;
pub mod subscription;
