//! A small clock/counter program used by the `tealoop` binary.
//!
//! It ticks on a timer, bumps a counter every third tick from inside `update`,
//! merges settings patches with `union` and asks the host to stop after a
//! configured number of ticks.

use std::{io::Write, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    core::{
        error::{EffectError, RuntimeError, UpdateError},
        message::Message,
        program::Program,
        union::union,
    },
    infrastructure::config::DemoConfig,
    integration::{
        app_runner::ShutdownHandle,
        subscription::{batch_effects, every, from_fn, SubscriptionContext},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    pub count: i64,
    pub ticks: u64,
    pub last_tick: Option<String>,
    pub settings: Value,
}

impl Clock {
    fn step(&self) -> i64 {
        self.settings
            .get("step")
            .and_then(Value::as_i64)
            .unwrap_or(1)
    }

    pub fn render(&self) -> String {
        format!(
            "[{:>3}] count={} step={} at={}",
            self.ticks,
            self.count,
            self.step(),
            self.last_tick.as_deref().unwrap_or("-")
        )
    }
}

pub fn update(state: &Clock, msg: &Message) -> Result<Clock, UpdateError> {
    let mut next = state.clone();
    match msg.kind.as_str() {
        "tick" => {
            next.ticks += 1;
            next.last_tick = msg.data_as::<String>();
        }
        "increment" => next.count += state.step(),
        "decrement" => next.count -= state.step(),
        "reset" => next.count = 0,
        "configure" => {
            next.settings = union(Some(&state.settings), msg.data.as_ref()).unwrap_or(Value::Null);
        }
        other => return Err(UpdateError::new(format!("unknown message `{other}`"))),
    }
    Ok(next)
}

/// Build the clock program. `view` writes one line per render to `out`.
pub fn program<W>(
    config: &DemoConfig,
    mut out: W,
    shutdown: ShutdownHandle,
) -> Result<Program<Clock>, RuntimeError>
where
    W: Write + Send + 'static,
{
    let period = Duration::from_millis(config.tick_ms);
    let limit = config.ticks;

    Program::builder()
        .init(|| {
            Some(Clock {
                settings: json!({"step": 1, "label": "clock"}),
                ..Clock::default()
            })
        })
        .view(move |state: &Clock, _| {
            if let Err(e) = writeln!(out, "{}", state.render()) {
                tracing::warn!("failed to write view: {e}");
            }
        })
        .update(|state, msg, send| {
            let next = update(state, msg)?;
            if msg.is("tick") && next.ticks % 3 == 0 {
                send.send("increment").map_err(UpdateError::new)?;
            }
            Ok(next)
        })
        .subscriptions(move || {
            vec![batch_effects(vec![
                every(period, || {
                    Message::new("tick").with_data(chrono::Local::now().format("%H:%M:%S%.3f").to_string())
                }),
                from_fn(|ctx: SubscriptionContext<Clock>| {
                    ctx.send()
                        .send(Message::new("configure").with_data(json!({"step": 2})))
                        .map(|_| ())
                        .map_err(EffectError::new)
                }),
                from_fn(move |ctx: SubscriptionContext<Clock>| stop_after(ctx, limit, period, shutdown)),
            ])]
        })
        .done(|state| tracing::info!(count = state.count, ticks = state.ticks, "clock stopped"))
        .build()
}

/// Watch the committed state and request shutdown once `limit` ticks were applied
fn stop_after(
    ctx: SubscriptionContext<Clock>,
    limit: u64,
    period: Duration,
    shutdown: ShutdownHandle,
) -> Result<(), EffectError> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| EffectError::new(format!("stop_after needs a tokio runtime: {e}")))?;
    handle.spawn(async move {
        let mut interval = tokio::time::interval(period / 2);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = interval.tick() => {
                    let ticks = ctx.get_state().get().map(|s| s.ticks).unwrap_or_default();
                    if ticks >= limit {
                        shutdown.done();
                        break;
                    }
                }
            }
        }
    });
    Ok(())
}
