//! Checkpoint data model
//!
//! A [`Checkpoint`] is the durable snapshot of one session: the committed state, the
//! nodes that still have to run, the iteration counter, and a version stamp that grows
//! by one on every save. Nodes paused by an interrupt are recorded as [`PendingNode`]s
//! carrying an [`InterruptToken`].
//!
//! ```text
//! Checkpoint
//! ├── session_id
//! ├── state             {field: value, ...}
//! ├── pending_nodes     [PendingNode { node, state_override?, interrupt? }, ...]
//! ├── iteration_count
//! ├── version           0 on creation, +1 per save
//! └── source            input | loop | update
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CheckpointError, Result};

/// Session identifier type
pub type SessionId = String;

/// Field map persisted as the session state
pub type StateMap = Map<String, Value>;

/// On-disk format version written by this crate
pub const CURRENT_FORMAT: u32 = 1;

/// What produced the latest save of a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Seeded from caller input before the first superstep
    Input,
    /// Written at a superstep boundary
    Loop,
    /// Written by a manual state patch
    Update,
}

/// Marker for a node suspended while waiting for external input.
///
/// `value` is surfaced to the caller (e.g. a prompt); `context` holds whatever the node
/// computed before suspending so the continuation can use it without recomputing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptToken {
    pub id: Uuid,
    pub node: String,
    pub step: u64,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl InterruptToken {
    pub fn new(node: impl Into<String>, step: u64, value: Value, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            node: node.into(),
            step,
            value,
            context,
            created_at: Utc::now(),
        }
    }
}

/// One entry of the "next nodes to run" pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingNode {
    pub node: String,

    /// Per-node state override carried by a fan-out dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_override: Option<StateMap>,

    /// Present when the node is suspended and waits for a resume payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptToken>,
}

impl PendingNode {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            state_override: None,
            interrupt: None,
        }
    }

    pub fn with_override(mut self, state_override: StateMap) -> Self {
        self.state_override = Some(state_override);
        self
    }

    pub fn suspended(token: InterruptToken) -> Self {
        Self {
            node: token.node.clone(),
            state_override: None,
            interrupt: Some(token),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.interrupt.is_some()
    }
}

/// Durable snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version of this document
    pub format: u32,

    pub session_id: SessionId,

    pub state: StateMap,

    #[serde(default)]
    pub pending_nodes: Vec<PendingNode>,

    #[serde(default)]
    pub iteration_count: u64,

    /// Incremented on every save
    pub version: u64,

    pub source: CheckpointSource,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create the first checkpoint of a session
    pub fn new(session_id: impl Into<SessionId>, state: StateMap) -> Self {
        let now = Utc::now();
        Self {
            format: CURRENT_FORMAT,
            session_id: session_id.into(),
            state,
            pending_nodes: Vec::new(),
            iteration_count: 0,
            version: 0,
            source: CheckpointSource::Input,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the mutable parts of the snapshot and bump the version.
    pub fn advance(
        &mut self,
        state: StateMap,
        pending_nodes: Vec<PendingNode>,
        iteration_count: u64,
        source: CheckpointSource,
    ) {
        self.state = state;
        self.pending_nodes = pending_nodes;
        self.iteration_count = iteration_count;
        self.source = source;
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Logical `pendingNodes` list: node identifiers in scheduling order
    pub fn pending_node_ids(&self) -> Vec<&str> {
        self.pending_nodes.iter().map(|p| p.node.as_str()).collect()
    }

    pub fn interrupts(&self) -> impl Iterator<Item = &InterruptToken> {
        self.pending_nodes.iter().filter_map(|p| p.interrupt.as_ref())
    }

    /// A session is resumable while at least one pending node is suspended.
    pub fn is_resumable(&self) -> bool {
        self.pending_nodes.iter().any(PendingNode::is_suspended)
    }

    /// No nodes left to run
    pub fn is_terminal(&self) -> bool {
        self.pending_nodes.is_empty()
    }

    /// Pending nodes without any interrupt: a run abandoned between supersteps
    pub fn is_in_flight(&self) -> bool {
        !self.pending_nodes.is_empty() && !self.is_resumable()
    }

    pub fn validate(&self) -> Result<()> {
        if self.format > CURRENT_FORMAT {
            return Err(CheckpointError::invalid(format!(
                "unsupported checkpoint format {} (max {})",
                self.format, CURRENT_FORMAT
            )));
        }
        if self.session_id.is_empty() {
            return Err(CheckpointError::invalid("session_id is empty"));
        }
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            version: self.version,
            resumable: self.is_resumable(),
            pending_nodes: self
                .pending_node_ids()
                .into_iter()
                .map(str::to_string)
                .collect(),
            iteration_count: self.iteration_count,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight listing entry returned by `list_sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub version: u64,
    pub resumable: bool,
    pub pending_nodes: Vec<String>,
    pub iteration_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Check that a session id is safe to use as a storage key.
///
/// Accepts ASCII alphanumerics, `-` and `_`; uuids pass unchanged.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > 128 {
        return Err(CheckpointError::invalid(format!(
            "session id must be 1..=128 characters, got {}",
            session_id.len()
        )));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CheckpointError::invalid(format!(
            "session id '{}' contains unsupported characters",
            session_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> StateMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_checkpoint_is_terminal() {
        let cp = Checkpoint::new("s-1", state(json!({"counter": 0})));
        assert_eq!(cp.version, 0);
        assert!(cp.is_terminal());
        assert!(!cp.is_resumable());
        assert!(!cp.is_in_flight());
        assert_eq!(cp.source, CheckpointSource::Input);
    }

    #[test]
    fn test_advance_bumps_version() {
        let mut cp = Checkpoint::new("s-1", StateMap::new());
        cp.advance(
            state(json!({"counter": 1})),
            vec![PendingNode::new("b")],
            1,
            CheckpointSource::Loop,
        );
        assert_eq!(cp.version, 1);
        assert_eq!(cp.iteration_count, 1);
        assert_eq!(cp.pending_node_ids(), vec!["b"]);
        assert!(cp.is_in_flight());
    }

    #[test]
    fn test_suspended_pending_node_makes_resumable() {
        let mut cp = Checkpoint::new("s-1", StateMap::new());
        let token = InterruptToken::new("listen", 2, json!({"type": "waiting_for_input"}), Value::Null);
        cp.advance(
            StateMap::new(),
            vec![PendingNode::suspended(token.clone())],
            1,
            CheckpointSource::Loop,
        );
        assert!(cp.is_resumable());
        assert_eq!(cp.interrupts().next(), Some(&token));
        assert_eq!(cp.summary().pending_nodes, vec!["listen".to_string()]);
    }

    #[test]
    fn test_serde_skips_empty_attachments() {
        let node = PendingNode::new("a");
        let encoded = serde_json::to_value(&node).unwrap();
        assert_eq!(encoded, json!({"node": "a"}));
    }

    #[test]
    fn test_validate_rejects_future_format() {
        let mut cp = Checkpoint::new("s-1", StateMap::new());
        cp.format = CURRENT_FORMAT + 1;
        assert!(matches!(cp.validate(), Err(CheckpointError::Invalid(_))));
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("4b0f6e1c-93c1-4c52-9a52-3d9d2b1f7f10").is_ok());
        assert!(validate_session_id("user_42").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a b").is_err());
    }
}
