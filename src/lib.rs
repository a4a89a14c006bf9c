//! # Tealoop - a message-driven application runtime
//!
//! Tealoop runs programs written in the Elm architecture:
//!
//! - **Program** ([`Program`]): `init`, `view`, `update`, optional `subscriptions` and `done`
//! - **Message** ([`Message`]): a tagged event, `{ type, data }`
//! - **Dispatcher** ([`Dispatcher`]): the only way messages enter a program
//! - **Runtime** ([`Runtime`]): owns the committed state and is its only writer
//! - **Union** ([`union()`]): pure merge of state snapshots and patches
//!
//! Dispatches are queued. Everything dispatched within one tick is applied in
//! arrival order, one `update` per message, followed by a single `view`.
//!
//! ## Example
//!
//! ```rust
//! use tealoop::{run, Message, Program, RuntimeConfig, UpdateError};
//!
//! let program = Program::<i64>::builder()
//!     .init(|| Some(0))
//!     .view(|count, _send| println!("count = {count}"))
//!     .update(|count, msg, _send| match msg.kind.as_str() {
//!         "add" => Ok(count + msg.data_as::<i64>().unwrap_or(1)),
//!         other => Err(UpdateError::new(format!("unknown message {other}"))),
//!     })
//!     .build()?;
//!
//! let mut runtime = run(program, RuntimeConfig::default())?;
//! let send = runtime.dispatcher();
//! send.send(Message::new("add").with_data(2))?;
//! send.send("add")?;
//!
//! // both messages are applied in one tick and rendered once
//! runtime.flush()?;
//! assert_eq!(runtime.state().as_deref(), Some(&3));
//! runtime.done()?;
//! # Ok::<(), tealoop::RuntimeError>(())
//! ```
//!
//! ## Modules
//!
//! - [`core`] - messages, programs, errors and `union`
//! - [`integration`] - dispatcher, batcher, subscriptions, runtime loop and async driver
//! - [`infrastructure`] - configuration and CLI
//! - [`utils`] - logging, panic handling and paths
//! - [`app`] - the clock program run by the binary

pub mod app;
pub mod core;
pub mod infrastructure;
pub mod integration;
pub mod utils;

pub use crate::core::{
    error::{EffectError, RuntimeError, UpdateError},
    lifecycle::Phase,
    message::{DispatchInput, Message},
    program::{Program, ProgramBuilder},
    union::{union, ArrayMerge, Union},
};
pub use infrastructure::config::RuntimeConfig;
pub use integration::{
    app_runner::{AppRunner, ShutdownHandle},
    dispatcher::{batch, BatchGuard, Dispatcher, GetState},
    runtime::{run, Runtime, RuntimeStats, TickReport},
    subscription::{
        batch_effects, every, from_fn, StreamSubscription, Subscription, SubscriptionContext,
    },
};

/// Result type used by the binary
pub type Result<T> = color_eyre::eyre::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
