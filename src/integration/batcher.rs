use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::core::message::Message;

/// Unit of delivery from a dispatcher to the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(Message),
    /// Messages dispatched inside one batch; never split across ticks
    Batch(Vec<Message>),
}

impl Envelope {
    pub fn len(&self) -> usize {
        match self {
            Envelope::Single(_) => 1,
            Envelope::Batch(messages) => messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_messages(self) -> Vec<Message> {
        match self {
            Envelope::Single(msg) => vec![msg],
            Envelope::Batch(messages) => messages,
        }
    }
}

/// Messages resolved together in one tick, in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    pub messages: Vec<Message>,
    pub envelopes: usize,
}

impl Tick {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Coalesces everything dispatched since the last tick into one ordered batch
#[derive(Debug)]
pub struct EffectBatcher {
    rx: mpsc::UnboundedReceiver<Envelope>,
    carry: VecDeque<Envelope>,
}

impl EffectBatcher {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            rx,
            carry: VecDeque::new(),
        }
    }

    /// Wait until at least one envelope is available. Returns `false` once closed and empty.
    pub async fn wait(&mut self) -> bool {
        if !self.carry.is_empty() {
            return true;
        }
        match self.rx.recv().await {
            Some(envelope) => {
                self.carry.push_back(envelope);
                true
            }
            None => false,
        }
    }

    /// Take the next tick. With `max`, stops at the first envelope boundary at or past it.
    pub fn drain(&mut self, max: Option<usize>) -> Tick {
        while let Ok(envelope) = self.rx.try_recv() {
            self.carry.push_back(envelope);
        }

        let mut tick = Tick::default();
        while let Some(envelope) = self.carry.pop_front() {
            tick.envelopes += 1;
            tick.messages.extend(envelope.into_messages());
            if max.is_some_and(|max| tick.messages.len() >= max) {
                break;
            }
        }
        tick
    }

    /// Messages received but not yet drained
    pub fn backlog(&self) -> usize {
        self.carry.iter().map(Envelope::len).sum()
    }

    /// Stop receiving and discard everything queued. Returns the number of dropped messages.
    pub(crate) fn close(&mut self) -> usize {
        self.rx.close();
        while let Ok(envelope) = self.rx.try_recv() {
            self.carry.push_back(envelope);
        }
        let dropped = self.backlog();
        self.carry.clear();
        dropped
    }
}
