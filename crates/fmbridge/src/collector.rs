use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::models::tool::ToolCallRecord;

/// Proof that a turn was started with [`ToolCallCollector::reset`].
///
/// Only `reset` hands these out, so the calls of a turn can't be drained
/// without first clearing the previous turn's.
#[derive(Debug)]
pub struct Turn {
    epoch: u64,
}

impl Turn {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Default)]
struct State {
    epoch: u64,
    records: Vec<ToolCallRecord>,
}

/// Ordered log of the proxy tool invocations made during one turn
#[derive(Debug, Default)]
pub struct ToolCallCollector {
    state: Mutex<State>,
}

/// A process-unique id for a tool call
pub fn generate_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

impl ToolCallCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock can't leave the log half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the log and start a new turn
    pub fn reset(&self) -> Turn {
        let mut state = self.lock();
        state.epoch += 1;
        state.records.clear();
        Turn { epoch: state.epoch }
    }

    /// Record an invocation and return its generated call id
    pub fn append(&self, id: u64, name: &str, arguments: Map<String, Value>) -> String {
        let call_id = generate_call_id();
        let mut state = self.lock();
        state.records.push(ToolCallRecord {
            id,
            name: name.to_string(),
            arguments,
            call_id: call_id.clone(),
        });
        tracing::debug!(tool = name, call_id = %call_id, epoch = state.epoch, "collected tool call");
        call_id
    }

    /// Copy out the turn's records in call order. The log itself is left intact.
    ///
    /// A [`Turn`] from an earlier reset sees nothing: its records are gone.
    pub fn drain(&self, turn: &Turn) -> Vec<ToolCallRecord> {
        let state = self.lock();
        if state.epoch != turn.epoch {
            tracing::warn!(
                stale = turn.epoch,
                current = state.epoch,
                "Drain requested for a turn that has been reset"
            );
            return Vec::new();
        }
        state.records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_reset_append_drain() {
        let collector = ToolCallCollector::new();
        let turn = collector.reset();

        collector.append(1, "add", args(json!({"a": 1})));
        collector.append(2, "sub", args(json!({"a": 2})));
        collector.append(1, "add", args(json!({"a": 3})));

        let records = collector.drain(&turn);
        assert_eq!(records.len(), 3);
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["add", "sub", "add"]);
        assert_eq!(records[2].arguments["a"], json!(3));

        let ids: HashSet<_> = records.iter().map(|r| r.call_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(records.iter().all(|r| r.call_id.starts_with("call_")));
    }

    #[test]
    fn test_drain_leaves_records_in_place() {
        let collector = ToolCallCollector::new();
        let turn = collector.reset();
        collector.append(1, "add", Map::new());

        assert_eq!(collector.drain(&turn).len(), 1);
        assert_eq!(collector.drain(&turn).len(), 1);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_reset_clears_previous_turn() {
        let collector = ToolCallCollector::new();
        let first = collector.reset();
        collector.append(1, "add", Map::new());

        let second = collector.reset();
        assert!(collector.is_empty());
        assert!(collector.drain(&first).is_empty());
        assert!(collector.drain(&second).is_empty());
        assert!(second.epoch() > first.epoch());
    }

    #[test]
    fn test_concurrent_appends() {
        let collector = Arc::new(ToolCallCollector::new());
        let turn = collector.reset();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        collector.append(i, "tool", Map::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.drain(&turn).len(), 80);
    }
}
