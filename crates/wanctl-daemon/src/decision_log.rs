//! Bounded, append-only log of [`DecisionRecord`]s backing the `decisions(limit)`
//! query (§6.3). Single-writer (the Orchestrator tick loop), multi-reader
//! (the IPC layer) — the same swap-a-whole-snapshot shape as
//! `wanctl_core::ring::TelemetryRing`, reused here instead of inventing a
//! second concurrency pattern for what is, structurally, the same problem:
//! one bounded append-mostly history read by readers who must never see a
//! torn write.

use std::sync::Arc;

use arc_swap::ArcSwap;
use wanctl_core::model::DecisionRecord;

const DEFAULT_CAPACITY: usize = 500;

pub struct DecisionLog {
    capacity: usize,
    records: ArcSwap<Vec<DecisionRecord>>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, records: ArcSwap::new(Arc::new(Vec::new())) }
    }

    pub fn push(&self, record: DecisionRecord) {
        let previous = self.records.load();
        let mut next = if previous.len() >= self.capacity {
            previous[previous.len() - self.capacity + 1..].to_vec()
        } else {
            previous.as_ref().clone()
        };
        next.push(record);
        self.records.store(Arc::new(next));
    }

    /// Tail of the log, newest last, capped at `limit` entries.
    pub fn tail(&self, limit: usize) -> Vec<DecisionRecord> {
        let records = self.records.load();
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn record(tick: u64) -> DecisionRecord {
        DecisionRecord {
            tick,
            timestamp: SystemTime::now(),
            previous_active: None,
            new_active: None,
            reason: format!("tick {tick}"),
            contributing_scores: Vec::new(),
            predictor_flags: Vec::new(),
        }
    }

    #[test]
    fn tail_respects_limit_and_order() {
        let log = DecisionLog::new(10);
        for i in 0..5 {
            log.push(record(i));
        }
        let tail = log.tail(2);
        assert_eq!(tail.iter().map(|r| r.tick).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn push_beyond_capacity_evicts_oldest() {
        let log = DecisionLog::new(3);
        for i in 0..5 {
            log.push(record(i));
        }
        let tail = log.tail(10);
        assert_eq!(tail.iter().map(|r| r.tick).collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}
