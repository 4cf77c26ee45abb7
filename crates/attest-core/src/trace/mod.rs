//! Nested, timed trace of validation activity.
//!
//! [`DebugTracer`] owns a forest of trace nodes stored in an arena. Starting
//! a trace while another is open makes it a child of the open one; ending
//! it restores the parent as current. One tracer belongs to one
//! orchestration call and is never shared between requests.
//!
//! ```
//! use std::collections::BTreeMap;
//! use attest_core::{DebugTracer, ValidationResult};
//!
//! let mut tracer = DebugTracer::new();
//! let attempt = tracer.start_trace("attempt 1", BTreeMap::new());
//! let check = tracer.start_trace("citation", BTreeMap::new());
//! tracer.end_trace(check, ValidationResult::pass()).unwrap();
//! tracer.end_trace(attempt, ValidationResult::pass()).unwrap();
//!
//! assert_eq!(tracer.export()[0].children.len(), 1);
//! ```

mod summary;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::result::ValidationResult;

pub use summary::render_traces;

/// Errors from ending traces.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("unknown trace handle {0}")]
    UnknownHandle(usize),

    #[error("trace '{name}' has already ended")]
    AlreadyEnded { name: String },
}

/// Opaque reference to a trace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceHandle(usize);

/// Exported trace node (plain nested record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationTrace {
    pub strategy_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ValidationTrace>,
}

impl ValidationTrace {
    /// Whether the node has ended with a passing result.
    pub fn passed(&self) -> bool {
        self.result.as_ref().is_some_and(ValidationResult::is_valid)
    }

    /// Number of nodes in this subtree, including itself.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ValidationTrace::node_count).sum::<usize>()
    }
}

#[derive(Debug)]
struct Node {
    strategy_name: String,
    started_at: DateTime<Utc>,
    started: Instant,
    ended_at: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
    result: Option<ValidationResult>,
    context: BTreeMap<String, JsonValue>,
    children: Vec<usize>,
}

/// Builds a tree of timed trace nodes.
#[derive(Debug, Default)]
pub struct DebugTracer {
    nodes: Vec<Node>,
    roots: Vec<usize>,
    /// Open traces, innermost last
    stack: Vec<usize>,
}

impl DebugTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a trace under the current one (or as a new root).
    pub fn start_trace(
        &mut self,
        strategy_name: impl Into<String>,
        context: BTreeMap<String, JsonValue>,
    ) -> TraceHandle {
        let id = self.nodes.len();
        self.nodes.push(Node {
            strategy_name: strategy_name.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            ended_at: None,
            elapsed: None,
            result: None,
            context,
            children: Vec::new(),
        });

        match self.stack.last() {
            Some(&parent) => self.nodes[parent].children.push(id),
            None => self.roots.push(id),
        }
        self.stack.push(id);
        TraceHandle(id)
    }

    /// Close a trace with its result.
    ///
    /// Closing a trace that is not the innermost open one also drops every
    /// trace opened above it from the active stack. Those stay in the tree
    /// without a result.
    pub fn end_trace(&mut self, handle: TraceHandle, result: ValidationResult) -> Result<(), TraceError> {
        let id = handle.0;
        let node = self.nodes.get_mut(id).ok_or(TraceError::UnknownHandle(id))?;
        if node.result.is_some() {
            return Err(TraceError::AlreadyEnded {
                name: node.strategy_name.clone(),
            });
        }

        node.ended_at = Some(Utc::now());
        node.elapsed = Some(node.started.elapsed());
        node.result = Some(result);

        if let Some(pos) = self.stack.iter().rposition(|&open| open == id) {
            self.stack.truncate(pos);
        }
        Ok(())
    }

    /// Move another tracer's roots under the current open trace (or in as
    /// roots). Traces still open in `other` stay without a result.
    pub fn absorb(&mut self, other: DebugTracer) {
        let offset = self.nodes.len();
        self.nodes.extend(other.nodes.into_iter().map(|mut node| {
            for child in &mut node.children {
                *child += offset;
            }
            node
        }));

        let roots = other.roots.into_iter().map(|id| id + offset);
        match self.stack.last() {
            Some(&parent) => self.nodes[parent].children.extend(roots),
            None => self.roots.extend(roots),
        }
    }

    /// The innermost open trace.
    pub fn current(&self) -> Option<TraceHandle> {
        self.stack.last().copied().map(TraceHandle)
    }

    /// Name of a traced node.
    pub fn name(&self, handle: TraceHandle) -> Option<&str> {
        self.nodes.get(handle.0).map(|n| n.strategy_name.as_str())
    }

    /// Total number of nodes recorded.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of root nodes.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Export the forest as plain nested records, in insertion order.
    pub fn export(&self) -> Vec<ValidationTrace> {
        self.roots.iter().map(|&id| self.export_node(id)).collect()
    }

    fn export_node(&self, id: usize) -> ValidationTrace {
        let node = &self.nodes[id];
        ValidationTrace {
            strategy_name: node.strategy_name.clone(),
            started_at: node.started_at,
            ended_at: node.ended_at,
            duration_ms: node.elapsed.map(|d| d.as_secs_f64() * 1000.0),
            result: node.result.clone(),
            context: node.context.clone(),
            children: node.children.iter().map(|&c| self.export_node(c)).collect(),
        }
    }

    /// Render the summary tree, depth-first.
    pub fn render_summary(&self) -> String {
        render_traces(&self.export(), true)
    }

    /// Print the summary to stdout.
    pub fn print_summary(&self) {
        print!("{}", self.render_summary());
    }

    /// Export as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export())
    }
}
