//! Long-lived effect producers started once when a program starts.
//!
//! Each subscription gets a [`SubscriptionContext`] carrying the dispatcher,
//! a state reader and a cancellation token that fires when the program is done.
//! Subscriptions own their lifetime and stop themselves by watching the token.

use std::{any, time::Duration};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::{
    core::{error::EffectError, message::Message},
    integration::dispatcher::{Dispatcher, GetState},
};

/// Everything a subscription may use to talk to its program
pub struct SubscriptionContext<S> {
    send: Dispatcher<S>,
    get_state: GetState<S>,
    token: CancellationToken,
}

impl<S> Clone for SubscriptionContext<S> {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
            get_state: self.get_state.clone(),
            token: self.token.clone(),
        }
    }
}

impl<S> SubscriptionContext<S> {
    pub fn new(send: Dispatcher<S>, get_state: GetState<S>, token: CancellationToken) -> Self {
        Self {
            send,
            get_state,
            token,
        }
    }

    pub fn send(&self) -> &Dispatcher<S> {
        &self.send
    }

    pub fn get_state(&self) -> &GetState<S> {
        &self.get_state
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the program is done
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// An independent effect producer
pub trait Subscription<S> {
    fn name(&self) -> &'static str {
        any::type_name::<Self>()
    }

    /// Set the subscription up. Called exactly once.
    fn start(self: Box<Self>, ctx: SubscriptionContext<S>) -> Result<(), EffectError>;
}

impl<S, F> Subscription<S> for F
where
    F: FnOnce(SubscriptionContext<S>) -> Result<(), EffectError>,
{
    fn start(self: Box<Self>, ctx: SubscriptionContext<S>) -> Result<(), EffectError> {
        (*self)(ctx)
    }
}

/// Box a closure as a subscription
pub fn from_fn<S, F>(f: F) -> Box<dyn Subscription<S>>
where
    S: 'static,
    F: FnOnce(SubscriptionContext<S>) -> Result<(), EffectError> + 'static,
{
    Box::new(f)
}

fn current_handle(what: &str) -> Result<Handle, EffectError> {
    Handle::try_current()
        .map_err(|e| EffectError::new(format!("{what} needs a tokio runtime: {e}")))
}

/// Forwards every message of a stream until it ends, the program is done, or a send is refused
pub struct StreamSubscription {
    stream: BoxStream<'static, Message>,
}

impl StreamSubscription {
    pub fn new(stream: impl Stream<Item = Message> + Send + 'static) -> Self {
        Self {
            stream: stream.boxed(),
        }
    }

    pub fn boxed<S>(self) -> Box<dyn Subscription<S>>
    where
        S: Send + Sync + 'static,
    {
        Box::new(self)
    }
}

impl<S> Subscription<S> for StreamSubscription
where
    S: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "stream"
    }

    fn start(self: Box<Self>, ctx: SubscriptionContext<S>) -> Result<(), EffectError> {
        let handle = current_handle("stream subscription")?;
        let mut stream = self.stream;
        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    next = stream.next() => match next {
                        Some(msg) => {
                            if let Err(e) = ctx.send().send(msg) {
                                if e.is_invalid_state() {
                                    break;
                                }
                                warn!("stream subscription dropped a message: {e}");
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!("stream subscription finished");
        });
        Ok(())
    }
}

/// Dispatches `make()` every `period`
pub struct Every<F> {
    period: Duration,
    make: F,
}

/// Periodic subscription; the first message arrives one `period` after start
pub fn every<S, F>(period: Duration, make: F) -> Box<dyn Subscription<S>>
where
    S: Send + Sync + 'static,
    F: FnMut() -> Message + Send + 'static,
{
    Box::new(Every { period, make })
}

impl<S, F> Subscription<S> for Every<F>
where
    S: Send + Sync + 'static,
    F: FnMut() -> Message + Send + 'static,
{
    fn name(&self) -> &'static str {
        "every"
    }

    fn start(self: Box<Self>, ctx: SubscriptionContext<S>) -> Result<(), EffectError> {
        if self.period.is_zero() {
            return Err(EffectError::new("every: period must be greater than zero"));
        }
        let handle = current_handle("every")?;
        let Every { period, mut make } = *self;
        handle.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = interval.tick() => {
                        if ctx.send().send(make()).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(?period, "periodic subscription finished");
        });
        Ok(())
    }
}

/// Several subscriptions started as one, each isolated from the others' failures
pub struct Batched<S> {
    members: Vec<Box<dyn Subscription<S>>>,
}

/// Combine subscriptions. Whatever they dispatch while starting is committed in one tick.
pub fn batch_effects<S>(members: Vec<Box<dyn Subscription<S>>>) -> Box<dyn Subscription<S>>
where
    S: 'static,
{
    Box::new(Batched { members })
}

impl<S> Subscription<S> for Batched<S>
where
    S: 'static,
{
    fn name(&self) -> &'static str {
        "batch_effects"
    }

    fn start(self: Box<Self>, ctx: SubscriptionContext<S>) -> Result<(), EffectError> {
        let total = self.members.len();
        let mut failures = Vec::new();
        {
            let batch = ctx.send().begin_batch();
            let batched = SubscriptionContext::new(
                batch.dispatcher().clone(),
                ctx.get_state().clone(),
                ctx.token(),
            );
            for member in self.members {
                let name = member.name();
                if let Err(e) = member.start(batched.clone()) {
                    warn!(subscription = name, "batched effect failed to start: {e}");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EffectError::new(format!(
                "{} of {total} batched effects failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

/// Outcome of starting a program's subscriptions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionReport {
    pub started: Vec<&'static str>,
    pub failed: Vec<(&'static str, EffectError)>,
}

impl SubscriptionReport {
    pub fn total(&self) -> usize {
        self.started.len() + self.failed.len()
    }
}

/// Starts subscriptions one by one; a failing setup never stops the rest
pub struct SubscriptionManager;

impl SubscriptionManager {
    pub fn start_all<S>(
        subscriptions: Vec<Box<dyn Subscription<S>>>,
        ctx: &SubscriptionContext<S>,
    ) -> SubscriptionReport {
        let mut report = SubscriptionReport::default();
        for subscription in subscriptions {
            let name = subscription.name();
            match subscription.start(ctx.clone()) {
                Ok(()) => report.started.push(name),
                Err(e) => {
                    warn!(subscription = name, "subscription failed to start: {e}");
                    report.failed.push((name, e));
                }
            }
        }
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "subscriptions started"
        );
        report
    }
}
