//! The program contract driven by the runtime.
//!
//! A [`Program`] is assembled with [`Program::builder`]; `init`, `view` and
//! `update` are required and `build` fails fast when one is missing.

use std::fmt;

use crate::{
    core::{
        error::{RuntimeError, UpdateError},
        message::Message,
    },
    integration::{dispatcher::Dispatcher, subscription::Subscription},
};

pub type InitFn<S> = Box<dyn FnOnce() -> Option<S> + Send>;
pub type ViewFn<S> = Box<dyn FnMut(&S, &Dispatcher<S>) + Send>;
pub type UpdateFn<S> = Box<dyn FnMut(&S, &Message, &Dispatcher<S>) -> Result<S, UpdateError> + Send>;
pub type SubscriptionsFn<S> = Box<dyn FnOnce() -> Vec<Box<dyn Subscription<S>>> + Send>;
pub type DoneFn<S> = Box<dyn FnOnce(&S) + Send>;

/// A runnable program: `init`, `view`, `update` and the optional `subscriptions` and `done`
pub struct Program<S> {
    pub(crate) init: Option<InitFn<S>>,
    pub(crate) view: ViewFn<S>,
    pub(crate) update: UpdateFn<S>,
    pub(crate) subscriptions: Option<SubscriptionsFn<S>>,
    pub(crate) done: Option<DoneFn<S>>,
    pub(crate) send: Option<Dispatcher<S>>,
}

impl<S> Program<S> {
    pub fn builder() -> ProgramBuilder<S> {
        ProgramBuilder::default()
    }

    /// The dispatcher bound to this program once it has been handed to a runtime
    pub fn send(&self) -> Option<&Dispatcher<S>> {
        self.send.as_ref()
    }

    pub fn has_subscriptions(&self) -> bool {
        self.subscriptions.is_some()
    }

    pub fn has_done(&self) -> bool {
        self.done.is_some()
    }
}

impl<S> fmt::Debug for Program<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("initialized", &self.init.is_none())
            .field("subscriptions", &self.has_subscriptions())
            .field("done", &self.has_done())
            .field("bound", &self.send.is_some())
            .finish()
    }
}

pub struct ProgramBuilder<S> {
    init: Option<InitFn<S>>,
    view: Option<ViewFn<S>>,
    update: Option<UpdateFn<S>>,
    subscriptions: Option<SubscriptionsFn<S>>,
    done: Option<DoneFn<S>>,
}

impl<S> Default for ProgramBuilder<S> {
    fn default() -> Self {
        Self {
            init: None,
            view: None,
            update: None,
            subscriptions: None,
            done: None,
        }
    }
}

impl<S> ProgramBuilder<S> {
    /// Produce the initial state. Returning `None` starts from `S::default()`.
    pub fn init<F>(mut self, init: F) -> Self
    where
        F: FnOnce() -> Option<S> + Send + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }

    pub fn view<F>(mut self, view: F) -> Self
    where
        F: FnMut(&S, &Dispatcher<S>) + Send + 'static,
    {
        self.view = Some(Box::new(view));
        self
    }

    /// The transition function. Its result replaces the committed state.
    pub fn update<F>(mut self, update: F) -> Self
    where
        F: FnMut(&S, &Message, &Dispatcher<S>) -> Result<S, UpdateError> + Send + 'static,
    {
        self.update = Some(Box::new(update));
        self
    }

    /// Effects started once when the program starts
    pub fn subscriptions<F>(mut self, subscriptions: F) -> Self
    where
        F: FnOnce() -> Vec<Box<dyn Subscription<S>>> + Send + 'static,
    {
        self.subscriptions = Some(Box::new(subscriptions));
        self
    }

    /// Shorthand for [`ProgramBuilder::subscriptions`]
    pub fn subs<F>(self, subscriptions: F) -> Self
    where
        F: FnOnce() -> Vec<Box<dyn Subscription<S>>> + Send + 'static,
    {
        self.subscriptions(subscriptions)
    }

    pub fn done<F>(mut self, done: F) -> Self
    where
        F: FnOnce(&S) + Send + 'static,
    {
        self.done = Some(Box::new(done));
        self
    }

    pub fn build(self) -> Result<Program<S>, RuntimeError> {
        let init = self.init.ok_or(RuntimeError::InvalidProgram("init"))?;
        let view = self.view.ok_or(RuntimeError::InvalidProgram("view"))?;
        let update = self.update.ok_or(RuntimeError::InvalidProgram("update"))?;

        Ok(Program {
            init: Some(init),
            view,
            update,
            subscriptions: self.subscriptions,
            done: self.done,
            send: None,
        })
    }
}
