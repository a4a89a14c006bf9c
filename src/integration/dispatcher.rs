//! The single entry point for messages.
//!
//! A [`Dispatcher`] resolves its input to a [`Message`] at the call site and
//! queues it for the runtime; `update` and `view` only run at the next flush.

use std::{fmt, mem, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
    core::{
        error::RuntimeError,
        lifecycle::Phase,
        message::{DispatchInput, Message},
    },
    integration::batcher::{EffectBatcher, Envelope},
};

/// Messages held back by one caller's open batch
#[derive(Debug, Default)]
struct BatchScope {
    depth: usize,
    pending: Vec<Message>,
}

type Scope = Arc<Mutex<BatchScope>>;

/// State shared between the runtime and every handle it gives out.
///
/// Locks are only held for pointer swaps, never while user code runs.
pub(crate) struct Shared<S> {
    committed: RwLock<Option<Arc<S>>>,
    phase: RwLock<Phase>,
    trace_messages: bool,
}

impl<S> Shared<S> {
    pub(crate) fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.phase.write() = phase;
    }

    pub(crate) fn snapshot(&self) -> Option<Arc<S>> {
        self.committed.read().clone()
    }

    pub(crate) fn commit(&self, state: Arc<S>) {
        *self.committed.write() = Some(state);
    }
}

/// Create a connected dispatcher, state reader and batcher for one runtime instance
pub(crate) fn channel<S>(trace_messages: bool) -> (Dispatcher<S>, GetState<S>, EffectBatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        committed: RwLock::new(None),
        phase: RwLock::new(Phase::Created),
        trace_messages,
    });

    let get_state = GetState {
        shared: Arc::clone(&shared),
    };
    let send = Dispatcher {
        tx,
        shared,
        scope: None,
    };
    (send, get_state, EffectBatcher::new(rx))
}

/// Handle for sending messages into a running program
///
/// A dispatcher handed out by [`BatchGuard::dispatcher`] buffers into that
/// batch while it is open and sends directly once it closed. Every other
/// handle is unaffected by the batch.
pub struct Dispatcher<S> {
    tx: mpsc::UnboundedSender<Envelope>,
    shared: Arc<Shared<S>>,
    scope: Option<Scope>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
            scope: self.scope.clone(),
        }
    }
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("phase", &self.shared.phase())
            .field("closed", &self.tx.is_closed())
            .field("batching", &self.is_batching())
            .finish()
    }
}

impl<S> Dispatcher<S> {
    /// Dispatch a message, or a function deriving one from the committed state.
    ///
    /// Returns the resolved message. The state transition happens later.
    pub fn send(&self, input: impl Into<DispatchInput<S>>) -> Result<Message, RuntimeError> {
        self.send_with(input, None)
    }

    /// Like [`Dispatcher::send`] with a payload.
    ///
    /// A literal message gets `data` as its payload; a derived input receives it as argument.
    pub fn send_with(
        &self,
        input: impl Into<DispatchInput<S>>,
        data: Option<Value>,
    ) -> Result<Message, RuntimeError> {
        let phase = self.shared.phase();
        if !phase.accepts_dispatch() {
            debug!(%phase, "dispatch rejected");
            return Err(RuntimeError::invalid_state("send", phase));
        }

        let msg = match input.into() {
            DispatchInput::Literal(msg) => match data {
                Some(data) => msg.with_data(data),
                None => msg,
            },
            DispatchInput::Derived(derive) => {
                let state = self
                    .shared
                    .snapshot()
                    .ok_or(RuntimeError::invalid_state("send", phase))?;
                derive(&*state, data).inspect_err(|e| warn!("derived dispatch failed: {e}"))?
            }
        };

        if !msg.is_valid() {
            return Err(RuntimeError::InvalidMessage);
        }
        if self.shared.trace_messages {
            trace!(%msg, "dispatch");
        }

        self.enqueue(msg.clone())?;
        Ok(msg)
    }

    /// Open a batch owned by the caller.
    ///
    /// Dispatches made through [`BatchGuard::dispatcher`] (or its clones) are
    /// held until the guard drops and then committed as one group. Opening a
    /// batch from a dispatcher that is already batching nests into it.
    pub fn begin_batch(&self) -> BatchGuard<S> {
        let scope = match &self.scope {
            Some(scope) if scope.lock().depth > 0 => Arc::clone(scope),
            _ => Scope::default(),
        };
        scope.lock().depth += 1;
        BatchGuard {
            dispatcher: Dispatcher {
                tx: self.tx.clone(),
                shared: Arc::clone(&self.shared),
                scope: Some(scope),
            },
        }
    }

    /// Run `effects` in order and commit everything they dispatch through the
    /// dispatcher they receive in a single tick
    pub fn batch<I, F>(&self, effects: I)
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(&Dispatcher<S>),
    {
        let batch = self.begin_batch();
        for effect in effects {
            effect(batch.dispatcher());
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Whether the runtime stopped receiving
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether dispatches through this handle are currently held by an open batch
    pub fn is_batching(&self) -> bool {
        self.scope.as_ref().is_some_and(|scope| scope.lock().depth > 0)
    }

    fn enqueue(&self, msg: Message) -> Result<(), RuntimeError> {
        if let Some(scope) = &self.scope {
            let mut scope = scope.lock();
            if scope.depth > 0 {
                scope.pending.push(msg);
                return Ok(());
            }
        }

        self.tx
            .send(Envelope::Single(msg))
            .map_err(|_| RuntimeError::invalid_state("send", Phase::Terminated))
    }
}

/// Run `effects` through `send` and commit their dispatches together
pub fn batch<S, I, F>(send: &Dispatcher<S>, effects: I)
where
    I: IntoIterator<Item = F>,
    F: FnOnce(&Dispatcher<S>),
{
    send.batch(effects);
}

/// Keeps a dispatch batch open; the outermost guard delivers it on drop
#[must_use = "the batch is committed when the guard is dropped"]
pub struct BatchGuard<S> {
    dispatcher: Dispatcher<S>,
}

impl<S> BatchGuard<S> {
    /// The dispatcher whose sends belong to this batch
    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Close the whole batch without delivering it. Returns the number of discarded messages.
    pub(crate) fn discard(self) -> usize {
        let discarded = self.scope().map_or(0, |scope| {
            let mut scope = scope.lock();
            scope.depth = 0;
            mem::take(&mut scope.pending).len()
        });
        drop(self);
        discarded
    }

    fn scope(&self) -> Option<&Scope> {
        self.dispatcher.scope.as_ref()
    }
}

impl<S> Drop for BatchGuard<S> {
    fn drop(&mut self) {
        let Some(scope) = self.scope() else {
            return;
        };
        let pending = {
            let mut scope = scope.lock();
            scope.depth = scope.depth.saturating_sub(1);
            if scope.depth == 0 {
                mem::take(&mut scope.pending)
            } else {
                Vec::new()
            }
        };
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        if self.dispatcher.tx.send(Envelope::Batch(pending)).is_err() {
            warn!(count, "runtime terminated before the batch was delivered; dropping it");
        }
    }
}

/// Read-only access to the last committed state
pub struct GetState<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for GetState<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> GetState<S> {
    /// The committed state at call time, `None` before `init` ran
    pub fn get(&self) -> Option<Arc<S>> {
        self.shared.snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    pub(crate) fn shared(&self) -> &Shared<S> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::core::error::EffectError;

    fn idle_channel(state: i32) -> (Dispatcher<i32>, GetState<i32>, EffectBatcher) {
        let (send, get_state, batcher) = channel(false);
        get_state.shared().commit(Arc::new(state));
        get_state.shared().set_phase(Phase::Idle);
        (send, get_state, batcher)
    }

    #[test]
    fn test_send_before_init_is_invalid_state() {
        let (send, _get_state, mut batcher) = channel::<i32>(false);
        let err = send.send("tick").unwrap_err();
        assert_eq!(err, RuntimeError::invalid_state("send", Phase::Created));
        assert!(batcher.drain(None).is_empty());
    }

    #[test]
    fn test_send_returns_resolved_message_and_queues_it() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        let msg = send.send_with("add", Some(json!(3))).unwrap();
        assert_eq!(msg, Message::new("add").with_data(3));

        let tick = batcher.drain(None);
        assert_eq!(tick.messages, vec![msg]);
    }

    #[test]
    fn test_derived_input_reads_committed_state() {
        let (send, _get_state, mut batcher) = idle_channel(41);
        let msg = send
            .send_with(
                DispatchInput::derived(|state: &i32, data| {
                    Ok(Message::new("answer").with_data(json!([state + 1, data])))
                }),
                Some(json!("hint")),
            )
            .unwrap();
        assert_eq!(msg.data, Some(json!([42, "hint"])));
        assert_eq!(batcher.drain(None).len(), 1);
    }

    #[test]
    fn test_failed_derived_input_leaves_queue_intact() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        send.send("first").unwrap();
        let err = send
            .send(DispatchInput::derived(|_: &i32, _| Err(EffectError::new("no network"))))
            .unwrap_err();
        assert_eq!(err, RuntimeError::Effect(EffectError::new("no network")));
        send.send("second").unwrap();

        let kinds: Vec<String> = batcher.drain(None).messages.into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec!["first", "second"]);
    }

    #[test]
    fn test_empty_type_is_rejected() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        assert_eq!(send.send(""), Err(RuntimeError::InvalidMessage));
        assert!(batcher.drain(None).is_empty());
    }

    #[test]
    fn test_batch_delivers_one_envelope_in_call_order() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        send.batch([
            Box::new(|send: &Dispatcher<i32>| {
                send.send("start").unwrap();
            }) as Box<dyn FnOnce(&Dispatcher<i32>)>,
            Box::new(|send: &Dispatcher<i32>| {
                send.send("success").unwrap();
            }),
        ]);

        let tick = batcher.drain(None);
        assert_eq!(tick.envelopes, 1);
        assert_eq!(tick.messages, vec![Message::new("start"), Message::new("success")]);
    }

    #[test]
    fn test_nested_batches_deliver_on_outermost_close() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        let outer = send.begin_batch();
        let batched = outer.dispatcher().clone();
        batched.send("a").unwrap();
        {
            let inner = batched.begin_batch();
            inner.dispatcher().send("b").unwrap();
        }
        assert!(batcher.drain(None).is_empty());
        batched.send("c").unwrap();
        drop(outer);

        let tick = batcher.drain(None);
        assert_eq!(tick.envelopes, 1);
        assert_eq!(tick.len(), 3);

        // the closed batch's handle sends directly again
        assert!(!batched.is_batching());
        batched.send("d").unwrap();
        assert_eq!(batcher.drain(None).messages, vec![Message::new("d")]);
    }

    #[test]
    fn test_open_batch_does_not_hold_other_handles() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        let other = send.clone();
        let guard = send.begin_batch();
        guard.dispatcher().send("grouped").unwrap();

        other.send("independent").unwrap();
        let tick = batcher.drain(None);
        assert_eq!(tick.messages, vec![Message::new("independent")]);
        assert!(!other.is_batching());

        drop(guard);
        assert_eq!(batcher.drain(None).messages, vec![Message::new("grouped")]);
    }

    #[test]
    fn test_discarded_batch_is_never_delivered() {
        let (send, _get_state, mut batcher) = idle_channel(0);
        let guard = send.begin_batch();
        let batched = guard.dispatcher().clone();
        batched.send("a").unwrap();
        batched.send("b").unwrap();

        assert_eq!(guard.discard(), 2);
        assert!(batcher.drain(None).is_empty());
        batched.send("c").unwrap();
        assert_eq!(batcher.drain(None).messages, vec![Message::new("c")]);
    }

    #[test]
    fn test_send_after_termination_is_invalid_state() {
        let (send, get_state, mut batcher) = idle_channel(0);
        get_state.shared().set_phase(Phase::Terminated);
        batcher.close();

        let err = send.send("late").unwrap_err();
        assert!(err.is_invalid_state());
        assert!(send.is_closed());
    }

    #[test]
    fn test_get_state_sees_commits() {
        let (_send, get_state, _batcher) = idle_channel(5);
        assert_eq!(get_state.get().as_deref(), Some(&5));
        get_state.shared().commit(Arc::new(6));
        assert_eq!(get_state.get().as_deref(), Some(&6));
    }
}
