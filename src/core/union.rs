//! Pure merging of state snapshots and partial-state patches.
//!
//! Mappings merge key by key with the right-hand side winning, nested mappings
//! merge recursively, and everything else is replaced wholesale. Merging values
//! of different shapes never fails: the right-hand side simply replaces the left.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How sequences are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMerge {
    /// The right-hand array replaces the left one
    #[default]
    Replace,
    /// Elements merge position by position; the longer tail passes through
    ByIndex,
}

/// A merger configured with an [`ArrayMerge`] policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Union {
    arrays: ArrayMerge,
}

impl Union {
    pub fn new(arrays: ArrayMerge) -> Self {
        Self { arrays }
    }

    pub fn array_policy(&self) -> ArrayMerge {
        self.arrays
    }

    /// Merge two optional values. A missing side yields the other one unchanged.
    pub fn merge(&self, a: Option<&Value>, b: Option<&Value>) -> Option<Value> {
        match (a, b) {
            (None, None) => None,
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (Some(a), Some(b)) => Some(self.merge_values(a, b)),
        }
    }

    pub fn merge_values(&self, a: &Value, b: &Value) -> Value {
        match (a, b) {
            (Value::Object(left), Value::Object(right)) => {
                Value::Object(self.merge_objects(left, right))
            }
            (Value::Array(left), Value::Array(right)) if self.arrays == ArrayMerge::ByIndex => {
                Value::Array(self.merge_arrays(left, right))
            }
            _ => b.clone(),
        }
    }

    fn merge_objects(&self, left: &Map<String, Value>, right: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = left.clone();
        for (key, value) in right {
            let next = match left.get(key) {
                Some(existing) => self.merge_values(existing, value),
                None => value.clone(),
            };
            merged.insert(key.clone(), next);
        }
        merged
    }

    fn merge_arrays(&self, left: &[Value], right: &[Value]) -> Vec<Value> {
        let len = left.len().max(right.len());
        (0..len)
            .filter_map(|i| self.merge(left.get(i), right.get(i)))
            .collect()
    }
}

/// Merge `b` into `a` with the default policy.
///
/// `union(a, None)` is `a`, `union(None, b)` is `b`.
pub fn union(a: Option<&Value>, b: Option<&Value>) -> Option<Value> {
    Union::default().merge(a, b)
}
