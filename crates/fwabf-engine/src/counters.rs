//! C8: Counters and trace sink.
//!
//! Plain per-label and per-policy counters plus a bounded ring of
//! per-packet trace records, in the spirit of the teacher's
//! `StatsSnapshot` (JSON-serializable, cheap to sample) but scoped to
//! what this engine's datapath actually needs to report (spec §2 C8,
//! §7 "Counters and trace entries are the only upward signal").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LabelCounters {
    pub hits: u64,
    pub misses: u64,
    pub enforced_hits: u64,
    pub enforced_misses: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PolicyCounters {
    pub matched: u64,
    pub applied: u64,
    pub fallback: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TraceOutcome {
    Forwarded { adjacency_index: u32 },
    FellBackToFib,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub sw_if_index: u32,
    pub policy_id: Option<u32>,
    pub flow_hash: u32,
    pub outcome: TraceOutcome,
}

pub struct CounterSink {
    labels: HashMap<u8, LabelCounters>,
    policies: HashMap<u32, PolicyCounters>,
    trace: Vec<TraceRecord>,
    trace_capacity: usize,
}

impl CounterSink {
    pub fn new(trace_capacity: usize) -> Self {
        CounterSink {
            labels: HashMap::new(),
            policies: HashMap::new(),
            trace: Vec::with_capacity(trace_capacity.min(1024)),
            trace_capacity,
        }
    }

    pub fn record_label_hit(&mut self, label: u8, enforced: bool) {
        let c = self.labels.entry(label).or_default();
        c.hits += 1;
        if enforced {
            c.enforced_hits += 1;
        }
    }

    pub fn record_label_miss(&mut self, label: u8, enforced: bool) {
        let c = self.labels.entry(label).or_default();
        c.misses += 1;
        if enforced {
            c.enforced_misses += 1;
        }
    }

    pub fn record_policy_matched(&mut self, policy_id: u32) {
        self.policies.entry(policy_id).or_default().matched += 1;
    }

    pub fn record_policy_applied(&mut self, policy_id: u32) {
        self.policies.entry(policy_id).or_default().applied += 1;
    }

    pub fn record_policy_fallback(&mut self, policy_id: u32) {
        self.policies.entry(policy_id).or_default().fallback += 1;
    }

    pub fn record_policy_dropped(&mut self, policy_id: u32) {
        self.policies.entry(policy_id).or_default().dropped += 1;
    }

    pub fn push_trace(&mut self, record: TraceRecord) {
        if self.trace_capacity == 0 {
            return;
        }
        if self.trace.len() >= self.trace_capacity {
            self.trace.remove(0);
        }
        self.trace.push(record);
    }

    pub fn label_counters(&self, label: u8) -> LabelCounters {
        self.labels.get(&label).copied().unwrap_or_default()
    }

    pub fn policy_counters(&self, policy_id: u32) -> PolicyCounters {
        self.policies.get(&policy_id).copied().unwrap_or_default()
    }

    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::json!({
            "labels": self.labels,
            "policies": self.policies,
            "trace_len": self.trace.len(),
        })
    }
}
