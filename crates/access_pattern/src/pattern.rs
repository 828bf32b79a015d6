//! Detects repeated short subsequences of range accesses and retains them
//! as predictive patterns until they age out (spec.md §4.11).

use std::collections::{
    HashMap,
    VecDeque,
};
use std::time::{
    Duration,
    Instant,
};

use sheet_common::A1Range;

use crate::access::{
    AccessEvent,
    AccessKind,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub sequence: Vec<A1Range>,
    pub frequency: u32,
    pub confidence: f64,
    pub(crate) last_seen: Instant,
}

impl Pattern {
    fn new(sequence: Vec<A1Range>, frequency: u32) -> Self {
        Self {
            sequence,
            frequency,
            confidence: (frequency as f64 / 10.0).min(0.95),
            last_seen: Instant::now(),
        }
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.last_seen.elapsed() >= max_age
    }
}

/// Scans the window's range accesses (document-open events don't
/// participate) for every contiguous length-2 and length-3 subsequence,
/// keeping those seen at least `frequency_threshold` times.
pub fn detect_patterns(window: &VecDeque<AccessEvent>, frequency_threshold: u32) -> Vec<Pattern> {
    let ranges: Vec<&A1Range> = window
        .iter()
        .filter_map(|event| match &event.kind {
            AccessKind::Range(range) => Some(range),
            AccessKind::DocumentOpen { .. } => None,
        })
        .collect();

    let mut patterns = Vec::new();
    for length in [2usize, 3usize] {
        if ranges.len() < length {
            continue;
        }
        let mut counts: HashMap<Vec<A1Range>, u32> = HashMap::new();
        for slice in ranges.windows(length) {
            let key: Vec<A1Range> = slice.iter().map(|range| (*range).clone()).collect();
            *counts.entry(key).or_insert(0) += 1;
        }
        for (sequence, frequency) in counts {
            if frequency >= frequency_threshold {
                patterns.push(Pattern::new(sequence, frequency));
            }
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(row: i64) -> A1Range {
        A1Range::new("Sheet1", row, 0, row, 0).unwrap()
    }

    fn event(range: A1Range) -> AccessEvent {
        AccessEvent { kind: AccessKind::Range(range), at: Instant::now() }
    }

    #[test]
    fn a_pair_repeated_twice_is_detected_at_the_default_threshold() {
        let window: VecDeque<AccessEvent> =
            VecDeque::from([event(range(0)), event(range(1)), event(range(0)), event(range(1))]);
        let patterns = detect_patterns(&window, 2);
        assert!(patterns.iter().any(|p| p.sequence == vec![range(0), range(1)] && p.frequency == 2));
    }

    #[test]
    fn a_pair_seen_once_is_not_a_pattern() {
        let window: VecDeque<AccessEvent> = VecDeque::from([event(range(0)), event(range(1))]);
        let patterns = detect_patterns(&window, 2);
        assert!(patterns.is_empty());
    }
}
