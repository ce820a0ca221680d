//! Detection of repeated identical failing tool calls.
//!
//! The detector keeps a bounded per-agent history of recent calls, keyed
//! by `(tool_name, canonical-params fingerprint)`. When the trailing
//! records for one key are all failures and reach the configured
//! threshold, the scheduler annotates the next observation so the model
//! changes approach. The detector never fails calls itself.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::canonical;

#[derive(Debug, Clone)]
struct CallRecord {
    key: String,
    success: bool,
    #[allow(dead_code)]
    at: DateTime<Utc>,
}

/// Ring-buffer history of recent tool calls, per agent id.
#[derive(Debug)]
pub struct LoopDetector {
    max_history: usize,
    threshold: usize,
    history: Mutex<HashMap<String, VecDeque<CallRecord>>>,
}

impl LoopDetector {
    /// Create a detector remembering at most `max_history` calls per
    /// agent. A `threshold` of zero disables detection.
    #[must_use]
    pub fn new(max_history: usize, threshold: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            threshold,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Record the outcome of one call.
    pub fn record(&self, agent_id: &str, tool_name: &str, params: &Value, success: bool) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        let records = history.entry(agent_id.to_owned()).or_default();
        records.push_back(CallRecord {
            key: call_key(tool_name, params),
            success,
            at: Utc::now(),
        });
        while records.len() > self.max_history {
            records.pop_front();
        }
    }

    /// Whether the trailing calls for `(tool_name, params)` are all
    /// failures and have reached the threshold. Calls on other keys never
    /// reset the count; a success on the same key does.
    #[must_use]
    pub fn is_stuck(&self, agent_id: &str, tool_name: &str, params: &Value) -> bool {
        if self.threshold == 0 {
            return false;
        }
        let Ok(history) = self.history.lock() else {
            return false;
        };
        let Some(records) = history.get(agent_id) else {
            return false;
        };
        let key = call_key(tool_name, params);
        let mut streak = 0usize;
        for record in records.iter().rev().filter(|record| record.key == key) {
            if record.success {
                break;
            }
            streak += 1;
            if streak >= self.threshold {
                return true;
            }
        }
        false
    }

    /// Drop all history for one agent.
    pub fn reset(&self, agent_id: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.remove(agent_id);
        }
    }
}

fn call_key(tool_name: &str, params: &Value) -> String {
    format!("{tool_name}:{}", canonical::fingerprint(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn threshold_of_consecutive_failures_triggers() {
        let detector = LoopDetector::new(50, 3);
        let params = json!({"city": "Paris"});

        for i in 0..3 {
            assert!(!detector.is_stuck("a", "get_weather", &params), "i={i}");
            detector.record("a", "get_weather", &params, false);
        }
        assert!(detector.is_stuck("a", "get_weather", &params));
    }

    #[test]
    fn success_on_same_key_resets_the_streak() {
        let detector = LoopDetector::new(50, 3);
        let params = json!({"q": 1});

        detector.record("a", "t", &params, false);
        detector.record("a", "t", &params, false);
        detector.record("a", "t", &params, true);
        detector.record("a", "t", &params, false);
        assert!(!detector.is_stuck("a", "t", &params));

        detector.record("a", "t", &params, false);
        detector.record("a", "t", &params, false);
        assert!(detector.is_stuck("a", "t", &params));
    }

    #[test]
    fn other_keys_do_not_reset_the_streak() {
        let detector = LoopDetector::new(50, 2);
        let failing = json!({"x": 1});
        let other = json!({"x": 2});

        detector.record("a", "t", &failing, false);
        detector.record("a", "t", &other, true);
        detector.record("a", "other_tool", &failing, true);
        detector.record("a", "t", &failing, false);
        assert!(detector.is_stuck("a", "t", &failing));
        assert!(!detector.is_stuck("a", "t", &other));
    }

    #[test]
    fn key_order_in_params_does_not_matter() {
        let detector = LoopDetector::new(50, 2);
        let a: Value = serde_json::from_str(r#"{"city": "Paris", "units": "c"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"units": "c", "city": "Paris"}"#).unwrap();

        detector.record("a", "t", &a, false);
        detector.record("a", "t", &b, false);
        assert!(detector.is_stuck("a", "t", &a));
    }

    #[test]
    fn history_is_per_agent() {
        let detector = LoopDetector::new(50, 1);
        let params = json!({});
        detector.record("a", "t", &params, false);
        assert!(detector.is_stuck("a", "t", &params));
        assert!(!detector.is_stuck("b", "t", &params));
    }

    #[test]
    fn history_is_bounded() {
        let detector = LoopDetector::new(2, 3);
        let params = json!({});
        for _ in 0..10 {
            detector.record("a", "t", &params, false);
        }
        // Only two records survive, below the threshold of three.
        assert!(!detector.is_stuck("a", "t", &params));
    }

    #[test]
    fn zero_threshold_disables_detection() {
        let detector = LoopDetector::new(50, 0);
        let params = json!({});
        for _ in 0..5 {
            detector.record("a", "t", &params, false);
        }
        assert!(!detector.is_stuck("a", "t", &params));
    }

    #[test]
    fn reset_clears_agent_history() {
        let detector = LoopDetector::new(50, 1);
        let params = json!({});
        detector.record("a", "t", &params, false);
        detector.reset("a");
        assert!(!detector.is_stuck("a", "t", &params));
    }
}
