use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::EffectError;

/// A tagged event describing what happened
///
/// `kind` is the discriminant (serialized as `type`), `data` an arbitrary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
        }
    }

    /// Replace the payload
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Whether the discriminant is usable for dispatch
    pub fn is_valid(&self) -> bool {
        !self.kind.is_empty()
    }

    /// Deserialize the payload into `T`, if present and well-formed
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{}({data})", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

impl From<&str> for Message {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for Message {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

/// Resolves a message from the committed state and the optional send payload
pub type Derive<S> = Box<dyn FnOnce(&S, Option<Value>) -> Result<Message, EffectError>>;

/// What a caller hands to `send`: either a finished message or a function producing one
pub enum DispatchInput<S> {
    Literal(Message),
    Derived(Derive<S>),
}

impl<S> DispatchInput<S> {
    pub fn derived<F>(f: F) -> Self
    where
        F: FnOnce(&S, Option<Value>) -> Result<Message, EffectError> + 'static,
    {
        Self::Derived(Box::new(f))
    }
}

impl<S> fmt::Debug for DispatchInput<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(msg) => f.debug_tuple("Literal").field(msg).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl<S> From<Message> for DispatchInput<S> {
    fn from(msg: Message) -> Self {
        Self::Literal(msg)
    }
}

impl<S> From<&str> for DispatchInput<S> {
    fn from(kind: &str) -> Self {
        Self::Literal(Message::new(kind))
    }
}

impl<S> From<String> for DispatchInput<S> {
    fn from(kind: String) -> Self {
        Self::Literal(Message::new(kind))
    }
}
