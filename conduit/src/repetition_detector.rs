//! Repetition Detector: flags doom loops where an agent calls the same tool with the same
//! arguments over and over.

use std::sync::Mutex;

use serde_json::Value;

use crate::model::limits::{DOOM_STOP_THRESHOLD, DOOM_WARN_THRESHOLD};

/// What the Executor should do in response to a tool call, per the repetition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionAction {
    None,
    Warn,
    Stop,
}

struct Inner {
    last_key: Option<(String, String)>,
    consecutive_count: u32,
}

/// Tracks `(last_tool_name, last_args_hash, consecutive_count)` for one run.
pub struct RepetitionDetector {
    inner: Mutex<Inner>,
    warn_threshold: u32,
    stop_threshold: u32,
}

impl Default for RepetitionDetector {
    fn default() -> Self {
        Self::new(DOOM_WARN_THRESHOLD, DOOM_STOP_THRESHOLD)
    }
}

impl RepetitionDetector {
    pub fn new(warn_threshold: u32, stop_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_key: None,
                consecutive_count: 0,
            }),
            warn_threshold,
            stop_threshold,
        }
    }

    /// Records one tool call and returns the action the Executor should take.
    pub fn record(&self, tool_name: &str, args: &Value) -> RepetitionAction {
        let args_hash = hash_args(args);
        let key = (tool_name.to_string(), args_hash);

        let mut inner = self.inner.lock().expect("repetition detector mutex poisoned");
        if inner.last_key.as_ref() == Some(&key) {
            inner.consecutive_count += 1;
        } else {
            inner.last_key = Some(key);
            inner.consecutive_count = 1;
        }

        if inner.consecutive_count >= self.stop_threshold {
            RepetitionAction::Stop
        } else if inner.consecutive_count >= self.warn_threshold {
            RepetitionAction::Warn
        } else {
            RepetitionAction::None
        }
    }
}

/// Deterministic string representation of a tool call's arguments. `serde_json::Value`'s
/// object map is a `BTreeMap` (no `preserve_order` feature), so key order is already
/// stable across call sites.
fn hash_args(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_calls_reset_the_counter() {
        let d = RepetitionDetector::new(3, 5);
        assert_eq!(d.record("read_file", &serde_json::json!({"path": "a"})), RepetitionAction::None);
        assert_eq!(d.record("read_file", &serde_json::json!({"path": "b"})), RepetitionAction::None);
        assert_eq!(d.record("read_file", &serde_json::json!({"path": "a"})), RepetitionAction::None);
    }

    #[test]
    fn warn_then_stop_thresholds() {
        let d = RepetitionDetector::new(3, 5);
        let args = serde_json::json!({"path": "a"});
        assert_eq!(d.record("read_file", &args), RepetitionAction::None);
        assert_eq!(d.record("read_file", &args), RepetitionAction::None);
        assert_eq!(d.record("read_file", &args), RepetitionAction::Warn);
        assert_eq!(d.record("read_file", &args), RepetitionAction::Warn);
        assert_eq!(d.record("read_file", &args), RepetitionAction::Stop);
        assert_eq!(d.record("read_file", &args), RepetitionAction::Stop);
    }

    #[test]
    fn key_ordering_in_args_does_not_affect_hash() {
        let d = RepetitionDetector::new(2, 5);
        assert_eq!(
            d.record("t", &serde_json::json!({"a": 1, "b": 2})),
            RepetitionAction::None
        );
        assert_eq!(
            d.record("t", &serde_json::json!({"b": 2, "a": 1})),
            RepetitionAction::Warn
        );
    }
}
