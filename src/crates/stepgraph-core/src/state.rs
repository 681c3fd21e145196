//! State model and per-field reducers
//!
//! Session state is an open JSON object ([`State`]). Nodes never return a whole new
//! state: they return a partial update holding only the fields they change, and the
//! scheduler folds every update of a superstep into the committed state through the
//! [`ReducerRegistry`].
//!
//! # Reducers
//!
//! | Reducer                  | Behaviour                                              |
//! |--------------------------|--------------------------------------------------------|
//! | [`OverwriteReducer`]     | new value replaces old (default for unlisted fields)   |
//! | [`PreferNonNullReducer`] | new value unless it is `null`, then keep the old one   |
//! | [`AppendReducer`]        | extend an array; `null` updates are ignored            |
//! | [`MergeReducer`]         | shallow object merge                                   |
//! | [`SumReducer`]           | numeric addition                                       |
//!
//! The registry always carries an error field (default `"error"`) bound to
//! [`PreferNonNullReducer`], so a node that clears nothing cannot erase the message
//! written by a failing sibling.
//!
//! # Ordering
//!
//! Updates are applied in frontier order, never completion order, so the merged state
//! is a function of the frontier alone. Only fields whose reducer reports
//! [`Reducer::co_reducible`] are expected to be written by more than one node in the
//! same superstep; other double writes are logged.
//!
//! ```rust
//! use stepgraph_core::state::{AppendReducer, ReducerRegistry};
//! use serde_json::json;
//!
//! let mut registry = ReducerRegistry::new();
//! registry.register("messages", AppendReducer);
//!
//! let mut state = json!({"messages": ["hi"]}).as_object().cloned().unwrap();
//! let update = json!({"messages": ["hello"], "error": null}).as_object().cloned().unwrap();
//! registry.apply(&mut state, &update).unwrap();
//!
//! assert_eq!(state["messages"], json!(["hi", "hello"]));
//! assert_eq!(state["error"], json!(null));
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Open field map threaded through a run
pub type State = Map<String, Value>;

/// Default name of the error field
pub const DEFAULT_ERROR_FIELD: &str = "error";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Reducer '{reducer}' failed on field '{field}': {reason}")]
    ReducerError {
        field: String,
        reducer: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Pure merge function for one field
pub trait Reducer: Send + Sync {
    /// Combine the committed value with an update. Missing fields arrive as `Null`.
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String>;

    fn name(&self) -> &str;

    /// Whether several nodes may write this field in one superstep
    fn co_reducible(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Keep the latest value, preferring non-null.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferNonNullReducer;

impl Reducer for PreferNonNullReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        if update.is_null() {
            Ok(current.clone())
        } else {
            Ok(update.clone())
        }
    }

    fn name(&self) -> &str {
        "prefer_non_null"
    }

    fn co_reducible(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        match (current, update) {
            (current, Value::Null) => Ok(current.clone()),
            (Value::Array(curr), Value::Array(upd)) => {
                let mut result = curr.clone();
                result.extend_from_slice(upd);
                Ok(Value::Array(result))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(curr), single) => {
                let mut result = curr.clone();
                result.push(single.clone());
                Ok(Value::Array(result))
            }
            (Value::Null, single) => Ok(Value::Array(vec![single.clone()])),
            _ => Err("append requires an array field".to_string()),
        }
    }

    fn name(&self) -> &str {
        "append"
    }

    fn co_reducible(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        match (current, update) {
            (Value::Object(curr), Value::Object(upd)) => {
                let mut result = curr.clone();
                for (key, value) in upd {
                    result.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(result))
            }
            (Value::Null, Value::Object(upd)) => Ok(Value::Object(upd.clone())),
            _ => Err("merge requires object values".to_string()),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        match (current, update) {
            (Value::Number(a), Value::Number(b)) => {
                let exact = match (a.as_i64(), b.as_i64()) {
                    (Some(a), Some(b)) => a.checked_add(b),
                    _ => None,
                };
                if let Some(sum) = exact {
                    Ok(Value::Number(sum.into()))
                } else if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
                    serde_json::Number::from_f64(a + b)
                        .map(Value::Number)
                        .ok_or_else(|| "sum is not a finite number".to_string())
                } else {
                    Err("cannot add non-numeric values".to_string())
                }
            }
            (Value::Null, Value::Number(_)) => Ok(update.clone()),
            _ => Err("sum requires numeric values".to_string()),
        }
    }

    fn name(&self) -> &str {
        "sum"
    }

    fn co_reducible(&self) -> bool {
        true
    }
}

/// Per-field merge policy
#[derive(Clone)]
pub struct ReducerRegistry {
    fields: HashMap<String, Arc<dyn Reducer>>,
    error_field: String,
}

impl std::fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|(k, r)| (k.as_str(), r.name()))
            .collect();
        fields.sort();
        f.debug_struct("ReducerRegistry")
            .field("fields", &fields)
            .field("error_field", &self.error_field)
            .finish()
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReducerRegistry {
    /// Registry with only the error field bound (to [`PreferNonNullReducer`])
    pub fn new() -> Self {
        let mut fields: HashMap<String, Arc<dyn Reducer>> = HashMap::new();
        fields.insert(DEFAULT_ERROR_FIELD.to_string(), Arc::new(PreferNonNullReducer));
        Self {
            fields,
            error_field: DEFAULT_ERROR_FIELD.to_string(),
        }
    }

    pub fn register(&mut self, field: impl Into<String>, reducer: impl Reducer + 'static) -> &mut Self {
        self.fields.insert(field.into(), Arc::new(reducer));
        self
    }

    /// Move the error field to another name, keeping its reducer.
    pub fn set_error_field(&mut self, field: impl Into<String>) -> &mut Self {
        let field = field.into();
        let reducer = self
            .fields
            .remove(&self.error_field)
            .unwrap_or_else(|| Arc::new(PreferNonNullReducer));
        self.fields.insert(field.clone(), reducer);
        self.error_field = field;
        self
    }

    pub fn error_field(&self) -> &str {
        &self.error_field
    }

    /// Name of the reducer bound to `field` (`overwrite` when unlisted)
    pub fn reducer_name(&self, field: &str) -> &str {
        self.fields.get(field).map(|r| r.name()).unwrap_or("overwrite")
    }

    pub fn is_co_reducible(&self, field: &str) -> bool {
        self.fields
            .get(field)
            .map(|r| r.co_reducible())
            .unwrap_or(false)
    }

    /// Fold one partial update into `state`.
    ///
    /// All fields are reduced before anything is written, so a failing reducer leaves
    /// `state` untouched. Fields absent from the update are never dropped.
    pub fn apply(&self, state: &mut State, update: &State) -> Result<()> {
        let mut staged = Vec::with_capacity(update.len());
        for (field, value) in update {
            let current = state.get(field).unwrap_or(&Value::Null);
            let reduced = match self.fields.get(field) {
                Some(reducer) => reducer.reduce(current, value).map_err(|reason| {
                    StateError::ReducerError {
                        field: field.clone(),
                        reducer: reducer.name().to_string(),
                        reason,
                    }
                })?,
                None => value.clone(),
            };
            staged.push((field.clone(), reduced));
        }
        for (field, value) in staged {
            state.insert(field, value);
        }
        Ok(())
    }

    /// Like [`apply`](Self::apply) but for an arbitrary JSON value, which must be an
    /// object (or `null`, meaning no change).
    pub fn apply_value(&self, state: &mut State, update: &Value) -> Result<()> {
        match update {
            Value::Null => Ok(()),
            Value::Object(update) => self.apply(state, update),
            other => Err(StateError::InvalidState(format!(
                "update must be an object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Partial update recording a node failure
    pub fn error_update(&self, message: impl Into<String>) -> State {
        let mut update = State::new();
        update.insert(self.error_field.clone(), Value::String(message.into()));
        update
    }

    /// Latest non-null error message in `state`
    pub fn latest_error(&self, state: &State) -> Option<String> {
        match state.get(&self.error_field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Copy of `base` with every key of `overlay` written over it
pub fn overlay(base: &State, overlay: Option<&State>) -> State {
    let mut view = base.clone();
    if let Some(overlay) = overlay {
        for (key, value) in overlay {
            view.insert(key.clone(), value.clone());
        }
    }
    view
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
