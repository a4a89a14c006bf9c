use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    core::{error::RuntimeError, lifecycle::Phase, program::Program, union::Union},
    infrastructure::config::RuntimeConfig,
    integration::{
        batcher::EffectBatcher,
        dispatcher::{self, Dispatcher, GetState},
        subscription::{SubscriptionContext, SubscriptionManager, SubscriptionReport},
    },
};

/// Owns one program instance and its committed state
///
/// The runtime is the only writer of the state. Dispatches are queued and applied
/// on [`Runtime::flush`], one `update` per message followed by one `view`.
pub struct Runtime<S> {
    program: Program<S>,
    config: RuntimeConfig,
    send: Dispatcher<S>,
    get_state: GetState<S>,
    batcher: EffectBatcher,
    token: CancellationToken,
    subscriptions: SubscriptionReport,
    stats: RuntimeStats,
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub applied: usize,
    pub envelopes: usize,
    pub rendered: bool,
}

/// Runtime statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub ticks: usize,
    pub messages_applied: usize,
    pub renders: usize,
    pub aborted_batches: usize,
    pub dropped_messages: usize,
    pub failed_subscriptions: usize,
}

impl<S> Runtime<S> {
    /// Create a runtime for `program` and bind its static dispatcher. Nothing runs yet.
    pub fn new(mut program: Program<S>, config: RuntimeConfig) -> Self {
        let (send, get_state, batcher) = dispatcher::channel(config.trace_messages);
        program.send = Some(send.clone());

        Self {
            program,
            config,
            send,
            get_state,
            batcher,
            token: CancellationToken::new(),
            subscriptions: SubscriptionReport::default(),
            stats: RuntimeStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.get_state.phase()
    }

    /// A dispatcher bound to this instance
    pub fn dispatcher(&self) -> Dispatcher<S> {
        self.send.clone()
    }

    pub fn get_state(&self) -> GetState<S> {
        self.get_state.clone()
    }

    /// The last committed state
    pub fn state(&self) -> Option<Arc<S>> {
        self.get_state.get()
    }

    pub fn program(&self) -> &Program<S> {
        &self.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn subscriptions(&self) -> &SubscriptionReport {
        &self.subscriptions
    }

    /// The merger configured for this runtime
    pub fn union(&self) -> Union {
        Union::new(self.config.array_merge)
    }

    /// Wait until something has been dispatched. Returns `false` once the runtime stopped receiving.
    pub async fn wait(&mut self) -> bool {
        self.batcher.wait().await
    }

    /// Apply everything dispatched since the last tick, then render once.
    ///
    /// Whatever `update` dispatches through the dispatcher it receives is held
    /// back and queued as one group after the commit.
    ///
    /// If `update` fails, the batch is aborted: the previous state stays
    /// committed, the remaining messages and the dispatches of the aborted
    /// updates are dropped and nothing is rendered.
    pub fn flush(&mut self) -> Result<TickReport, RuntimeError> {
        let phase = self.phase();
        if phase != Phase::Idle {
            return Err(RuntimeError::invalid_state("flush", phase));
        }

        let tick = self.batcher.drain(self.config.max_batch);
        if tick.is_empty() {
            return Ok(TickReport::default());
        }
        self.stats.ticks += 1;

        let mut state = self
            .get_state
            .get()
            .ok_or(RuntimeError::invalid_state("flush", phase))?;
        let total = tick.len();
        let effects = self.send.begin_batch();
        for (index, msg) in tick.messages.iter().enumerate() {
            if self.config.trace_messages {
                trace!(%msg, index, "update");
            }
            match (self.program.update)(&*state, msg, effects.dispatcher()) {
                Ok(next) => state = Arc::new(next),
                Err(source) => {
                    let dropped = total - index - 1;
                    let discarded = effects.discard();
                    self.stats.aborted_batches += 1;
                    self.stats.dropped_messages += dropped + discarded;
                    error!(
                        kind = %msg.kind,
                        index,
                        dropped,
                        discarded,
                        "update failed; keeping the last committed state: {source}"
                    );
                    return Err(RuntimeError::Update {
                        kind: msg.kind.clone(),
                        index,
                        dropped,
                        source,
                    });
                }
            }
        }

        self.get_state.shared().commit(Arc::clone(&state));
        self.stats.messages_applied += total;
        drop(effects);

        self.render(&state);
        debug!(applied = total, envelopes = tick.envelopes, "tick committed");

        Ok(TickReport {
            applied: total,
            envelopes: tick.envelopes,
            rendered: true,
        })
    }

    /// Stop the program: reject further dispatches, drop queued messages,
    /// cancel subscriptions and call `done` with the last committed state.
    pub fn done(&mut self) -> Result<(), RuntimeError> {
        let phase = self.phase();
        if phase.is_terminated() {
            return Err(RuntimeError::invalid_state("done", phase));
        }
        self.terminate();
        Ok(())
    }

    fn render(&mut self, state: &S) {
        (self.program.view)(state, &self.send);
        self.stats.renders += 1;
    }

    fn terminate(&mut self) {
        self.get_state.shared().set_phase(Phase::Terminated);
        self.token.cancel();

        let dropped = self.batcher.close();
        if dropped > 0 {
            warn!(dropped, "dropping messages queued before termination");
            self.stats.dropped_messages += dropped;
        }

        if let (Some(done), Some(state)) = (self.program.done.take(), self.get_state.get()) {
            done(&*state);
        }
        info!("program terminated");
    }
}

impl<S: Default> Runtime<S> {
    /// Run `init`, start the subscriptions and render the first state.
    ///
    /// Subscriptions start on entering Initialized, so anything they dispatch
    /// during setup is applied at the first flush.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        let phase = self.phase();
        if phase != Phase::Created {
            return Err(RuntimeError::invalid_state("start", phase));
        }
        let init = self
            .program
            .init
            .take()
            .ok_or(RuntimeError::InvalidProgram("init"))?;

        let state = Arc::new(init().unwrap_or_else(|| {
            debug!("init returned no state; starting from the default");
            S::default()
        }));
        self.get_state.shared().commit(Arc::clone(&state));
        self.get_state.shared().set_phase(Phase::Initialized);
        info!("program initialized");

        if let Some(subscriptions) = self.program.subscriptions.take() {
            let ctx = SubscriptionContext::new(
                self.send.clone(),
                self.get_state.clone(),
                self.token.child_token(),
            );
            self.subscriptions = SubscriptionManager::start_all(subscriptions(), &ctx);
            self.stats.failed_subscriptions = self.subscriptions.failed.len();
        }

        self.render(&state);

        self.get_state.shared().set_phase(Phase::Idle);
        Ok(())
    }
}

impl<S> Drop for Runtime<S> {
    fn drop(&mut self) {
        if !self.phase().is_terminated() {
            self.terminate();
        }
    }
}

/// Create a runtime for `program` and start it
pub fn run<S: Default>(program: Program<S>, config: RuntimeConfig) -> Result<Runtime<S>, RuntimeError> {
    let mut runtime = Runtime::new(program, config);
    runtime.start()?;
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::core::{
        error::{EffectError, UpdateError},
        message::{DispatchInput, Message},
        union::ArrayMerge,
    };
    use crate::integration::subscription::from_fn;

    type Views = Arc<Mutex<Vec<Vec<i64>>>>;

    /// Appends each message's `data` to the state; `fail` makes update error
    fn recorder(views: Views) -> Program<Vec<i64>> {
        Program::builder()
            .init(|| Some(Vec::new()))
            .view(move |state: &Vec<i64>, _| views.lock().push(state.clone()))
            .update(|state, msg, _| match msg.kind.as_str() {
                "push" => {
                    let mut next = state.clone();
                    next.push(msg.data_as::<i64>().unwrap_or_default());
                    Ok(next)
                }
                "fail" => Err(UpdateError::new("rejected")),
                other => Err(UpdateError::new(format!("unknown message `{other}`"))),
            })
            .build()
            .unwrap()
    }

    fn push(n: i64) -> Message {
        Message::new("push").with_data(n)
    }

    #[test]
    fn test_start_renders_initial_state() {
        let views = Views::default();
        let runtime = run(recorder(Arc::clone(&views)), RuntimeConfig::default()).unwrap();

        assert_eq!(runtime.phase(), Phase::Idle);
        assert_eq!(*views.lock(), vec![Vec::<i64>::new()]);
        assert!(runtime.program().send().is_some());
    }

    #[test]
    fn test_init_without_state_uses_default() {
        let program = Program::<i64>::builder()
            .init(|| None)
            .view(|_, _| {})
            .update(|s, _, _| Ok(*s + 1))
            .build()
            .unwrap();
        let runtime = run(program, RuntimeConfig::default()).unwrap();
        assert_eq!(runtime.state().as_deref(), Some(&0));
    }

    #[test]
    fn test_send_before_start_is_rejected() {
        let runtime = Runtime::new(recorder(Views::default()), RuntimeConfig::default());
        let err = runtime.dispatcher().send(push(1)).unwrap_err();
        assert_eq!(err, RuntimeError::invalid_state("send", Phase::Created));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut runtime = run(recorder(Views::default()), RuntimeConfig::default()).unwrap();
        assert!(runtime.start().unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_five_sends_render_once() {
        let views = Views::default();
        let mut runtime = run(recorder(Arc::clone(&views)), RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        for n in 1..=5 {
            send.send(push(n)).unwrap();
        }

        // nothing is applied until the tick is flushed
        assert_eq!(runtime.state().as_deref(), Some(&Vec::new()));

        let report = runtime.flush().unwrap();
        assert_eq!(
            report,
            TickReport {
                applied: 5,
                envelopes: 5,
                rendered: true
            }
        );
        assert_eq!(views.lock().len(), 2);
        assert_eq!(views.lock().last(), Some(&vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_empty_flush_does_not_render() {
        let views = Views::default();
        let mut runtime = run(recorder(Arc::clone(&views)), RuntimeConfig::default()).unwrap();
        assert_eq!(runtime.flush().unwrap(), TickReport::default());
        assert_eq!(views.lock().len(), 1);
        assert_eq!(runtime.stats().ticks, 0);
    }

    #[test]
    fn test_each_update_sees_the_previous_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let program = Program::<i64>::builder()
            .init(|| Some(10))
            .view(|_, _| {})
            .update(move |state, msg, _| {
                log.lock().push(*state);
                Ok(*state * 2 + msg.data_as::<i64>().unwrap_or_default())
            })
            .build()
            .unwrap();
        let mut runtime = run(program, RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        send.send(push(1)).unwrap();
        send.send(push(2)).unwrap();
        send.send(push(3)).unwrap();
        runtime.flush().unwrap();

        assert_eq!(*seen.lock(), vec![10, 21, 44]);
        assert_eq!(runtime.state().as_deref(), Some(&91));
    }

    #[test]
    fn test_update_failure_keeps_previous_state() {
        let views = Views::default();
        let mut runtime = run(recorder(Arc::clone(&views)), RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        send.send(push(1)).unwrap();
        runtime.flush().unwrap();

        send.send(push(2)).unwrap();
        send.send("fail").unwrap();
        send.send(push(3)).unwrap();
        let err = runtime.flush().unwrap_err();

        assert_eq!(
            err,
            RuntimeError::Update {
                kind: "fail".into(),
                index: 1,
                dropped: 1,
                source: UpdateError::new("rejected"),
            }
        );
        assert_eq!(runtime.state().as_deref(), Some(&vec![1]));
        assert_eq!(views.lock().len(), 2);
        assert_eq!(runtime.stats().aborted_batches, 1);

        // the loop keeps going with the last good state
        send.send(push(4)).unwrap();
        runtime.flush().unwrap();
        assert_eq!(runtime.state().as_deref(), Some(&vec![1, 4]));
    }

    #[test]
    fn test_sends_from_update_land_in_the_next_tick() {
        let program = Program::<i64>::builder()
            .init(|| Some(0))
            .view(|_, _| {})
            .update(|state, msg, send| {
                if msg.is("ping") {
                    send.send("pong").map_err(UpdateError::new)?;
                }
                Ok(*state + 1)
            })
            .build()
            .unwrap();
        let mut runtime = run(program, RuntimeConfig::default()).unwrap();
        runtime.dispatcher().send("ping").unwrap();

        assert_eq!(runtime.flush().unwrap().applied, 1);
        assert_eq!(runtime.flush().unwrap().applied, 1);
        assert_eq!(runtime.state().as_deref(), Some(&2));
    }

    #[test]
    fn test_aborted_batch_drops_dispatches_of_its_updates() {
        let program = Program::<Vec<String>>::builder()
            .init(|| Some(Vec::new()))
            .view(|_, _| {})
            .update(|state, msg, send| match msg.kind.as_str() {
                "charge" => {
                    send.send("charged").map_err(UpdateError::new)?;
                    Ok(state.clone())
                }
                "boom" => Err(UpdateError::new("boom")),
                other => {
                    let mut next = state.clone();
                    next.push(other.to_string());
                    Ok(next)
                }
            })
            .build()
            .unwrap();
        let mut runtime = run(program, RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        send.send("charge").unwrap();
        send.send("boom").unwrap();

        assert!(runtime.flush().is_err());
        assert_eq!(runtime.stats().dropped_messages, 1);
        assert_eq!(runtime.flush().unwrap(), TickReport::default());
        assert_eq!(runtime.state().as_deref(), Some(&Vec::new()));

        // a committed batch delivers its dispatches as one group
        send.send("charge").unwrap();
        send.send("charge").unwrap();
        assert_eq!(runtime.flush().unwrap().applied, 2);
        let report = runtime.flush().unwrap();
        assert_eq!((report.applied, report.envelopes), (2, 1));
        assert_eq!(
            runtime.state().as_deref(),
            Some(&vec![String::from("charged"), String::from("charged")])
        );
    }

    #[test]
    fn test_max_batch_spreads_messages_over_ticks() {
        let config = RuntimeConfig {
            max_batch: Some(2),
            ..RuntimeConfig::default()
        };
        let mut runtime = run(recorder(Views::default()), config).unwrap();
        let send = runtime.dispatcher();
        for n in 0..5 {
            send.send(push(n)).unwrap();
        }

        let applied: Vec<usize> = (0..4).map(|_| runtime.flush().unwrap().applied).collect();
        assert_eq!(applied, vec![2, 2, 1, 0]);
    }

    #[test]
    fn test_done_rejects_sends_and_drops_queue() {
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let finished = Arc::new(Mutex::new(None));
        let last = Arc::clone(&finished);
        let program = Program::<i64>::builder()
            .init(|| Some(3))
            .view(|_, _| {})
            .update(move |s, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(*s)
            })
            .done(move |state| *last.lock() = Some(*state))
            .build()
            .unwrap();
        let mut runtime = run(program, RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        send.send("queued").unwrap();

        runtime.done().unwrap();
        assert_eq!(runtime.phase(), Phase::Terminated);
        assert_eq!(*finished.lock(), Some(3));
        assert_eq!(runtime.stats().dropped_messages, 1);

        assert!(send.send("late").unwrap_err().is_invalid_state());
        assert!(runtime.flush().unwrap_err().is_invalid_state());
        assert!(runtime.done().unwrap_err().is_invalid_state());
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_runs_done() {
        let finished = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&finished);
        let program = Program::<i64>::builder()
            .init(|| Some(0))
            .view(|_, _| {})
            .update(|s, _, _| Ok(*s))
            .done(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let runtime = run(program, RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        drop(runtime);

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(send.send("after").is_err());
    }

    #[test]
    fn test_subscription_isolation() {
        let program = Program::<i64>::builder()
            .init(|| Some(0))
            .view(|_, _| {})
            .update(|s, msg, _| Ok(*s + msg.data_as::<i64>().unwrap_or_default()))
            .subscriptions(|| {
                vec![
                    from_fn(|_: SubscriptionContext<i64>| Err(EffectError::new("setup failed"))),
                    from_fn(|ctx: SubscriptionContext<i64>| {
                        ctx.send()
                            .send(Message::new("add").with_data(5))
                            .map(|_| ())
                            .map_err(EffectError::new)
                    }),
                ]
            })
            .build()
            .unwrap();
        let mut runtime = run(program, RuntimeConfig::default()).unwrap();

        assert_eq!(runtime.subscriptions().failed.len(), 1);
        assert_eq!(runtime.subscriptions().started.len(), 1);
        assert_eq!(runtime.stats().failed_subscriptions, 1);
        runtime.flush().unwrap();
        assert_eq!(runtime.state().as_deref(), Some(&5));
    }

    #[test]
    fn test_subscriptions_start_before_first_render() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (on_view, on_start) = (Arc::clone(&events), Arc::clone(&events));
        let program = Program::<i64>::builder()
            .init(|| Some(0))
            .view(move |_, _| on_view.lock().push("view"))
            .update(|s, _, _| Ok(*s))
            .subscriptions(move || {
                vec![from_fn(move |ctx: SubscriptionContext<i64>| {
                    assert_eq!(ctx.get_state().phase(), Phase::Initialized);
                    on_start.lock().push("subscribe");
                    Ok(())
                })]
            })
            .build()
            .unwrap();
        let _runtime = run(program, RuntimeConfig::default()).unwrap();
        assert_eq!(*events.lock(), vec!["subscribe", "view"]);
    }

    #[test]
    fn test_subscriptions_see_cancellation_on_done() {
        let token = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&token);
        let program = Program::<i64>::builder()
            .init(|| Some(0))
            .view(|_, _| {})
            .update(|s, _, _| Ok(*s))
            .subs(move || {
                vec![from_fn(move |ctx: SubscriptionContext<i64>| {
                    *slot.lock() = Some(ctx.token());
                    Ok(())
                })]
            })
            .build()
            .unwrap();
        let mut runtime = run(program, RuntimeConfig::default()).unwrap();
        let token = token.lock().clone().unwrap();
        assert!(!token.is_cancelled());

        runtime.done().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_derived_dispatch_uses_committed_state() {
        let mut runtime = run(recorder(Views::default()), RuntimeConfig::default()).unwrap();
        let send = runtime.dispatcher();
        send.send(push(7)).unwrap();
        runtime.flush().unwrap();

        let msg = send
            .send(DispatchInput::derived(|state: &Vec<i64>, _| {
                Ok(push(state.iter().sum::<i64>() * 2))
            }))
            .unwrap();
        assert_eq!(msg, push(14));
        runtime.flush().unwrap();
        assert_eq!(runtime.state().as_deref(), Some(&vec![7, 14]));
    }

    #[test]
    fn test_union_follows_config() {
        let config = RuntimeConfig {
            array_merge: ArrayMerge::ByIndex,
            ..RuntimeConfig::default()
        };
        let runtime = run(recorder(Views::default()), config).unwrap();
        assert_eq!(
            runtime.union().merge(Some(&json!([1, 2])), Some(&json!([9]))),
            Some(json!([9, 2]))
        );
    }
}
