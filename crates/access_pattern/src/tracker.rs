//! Per-document sliding window of accesses, the patterns detected within
//! it, and the combined prediction the three strategies agree to surface
//! (spec.md §4.11).

use std::collections::VecDeque;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use sheet_common::config::AccessPatternConfig;
use sheet_common::DocumentHandle;

use crate::access::AccessEvent;
use crate::pattern::{
    detect_patterns,
    Pattern,
};
use crate::predict::{
    self,
    Prediction,
};
use crate::access::AccessKind;

struct DocumentState {
    window: VecDeque<AccessEvent>,
    patterns: Vec<Pattern>,
}

impl DocumentState {
    fn new() -> Self {
        Self { window: VecDeque::new(), patterns: Vec::new() }
    }
}

pub struct AccessPatternTracker {
    config: AccessPatternConfig,
    documents: DashMap<DocumentHandle, Mutex<DocumentState>>,
}

impl AccessPatternTracker {
    pub fn new(config: AccessPatternConfig) -> Self {
        Self { config, documents: DashMap::new() }
    }

    pub fn record(&self, document_id: &DocumentHandle, kind: AccessKind) {
        let entry = self.documents.entry(document_id.clone()).or_insert_with(|| Mutex::new(DocumentState::new()));
        let mut state = entry.lock();

        state.window.push_back(AccessEvent { kind, at: Instant::now() });
        while state.window.len() > self.config.window_size {
            state.window.pop_front();
        }
        sheet_metrics::access_pattern::log_access_recorded();

        for detected in detect_patterns(&state.window, self.config.frequency_threshold) {
            match state.patterns.iter_mut().find(|existing| existing.sequence == detected.sequence) {
                Some(existing) => *existing = detected,
                None => {
                    sheet_metrics::access_pattern::log_pattern_detected(detected.sequence.len());
                    state.patterns.push(detected);
                },
            }
        }

        let max_age = self.config.pattern_window * 2;
        let before = state.patterns.len();
        state.patterns.retain(|pattern| !pattern.is_stale(max_age));
        for _ in 0..(before - state.patterns.len()) {
            sheet_metrics::access_pattern::log_pattern_evicted();
        }
    }

    /// Combines the Pattern, Adjacency, and Common strategies for whatever
    /// has been recorded for this document so far. Unknown documents (no
    /// accesses recorded yet) simply predict nothing.
    pub fn predict(&self, document_id: &DocumentHandle) -> Vec<Prediction> {
        let Some(entry) = self.documents.get(document_id) else {
            return Vec::new();
        };
        let state = entry.lock();
        let predictions = predict::combine(&state.window, &state.patterns);
        for prediction in &predictions {
            sheet_metrics::access_pattern::log_prediction_emitted(prediction.strategy);
        }
        predictions
    }
}

#[cfg(test)]
mod tests {
    use sheet_common::A1Range;

    use super::*;

    fn range(row: i64) -> A1Range {
        A1Range::new("Sheet1", row, 0, row, 0).unwrap()
    }

    #[test]
    fn repeated_access_pairs_feed_the_pattern_strategy() {
        let tracker = AccessPatternTracker::new(AccessPatternConfig::default());
        let doc = DocumentHandle::new("d1");
        for _ in 0..2 {
            tracker.record(&doc, AccessKind::Range(range(0)));
            tracker.record(&doc, AccessKind::Range(range(1)));
        }
        tracker.record(&doc, AccessKind::Range(range(0)));

        let predictions = tracker.predict(&doc);
        assert!(predictions.iter().any(|p| p.strategy == "pattern" && p.range == range(1)));
    }

    #[test]
    fn a_fresh_open_predicts_a_top_left_window() {
        let tracker = AccessPatternTracker::new(AccessPatternConfig::default());
        let doc = DocumentHandle::new("d1");
        tracker.record(&doc, AccessKind::DocumentOpen { sheet_name: "Sheet1".to_string() });

        let predictions = tracker.predict(&doc);
        assert!(predictions.iter().any(|p| p.strategy == "common"));
    }

    #[test]
    fn an_unknown_document_predicts_nothing() {
        let tracker = AccessPatternTracker::new(AccessPatternConfig::default());
        let doc = DocumentHandle::new("never-seen");
        assert!(tracker.predict(&doc).is_empty());
    }
}
