//! Combines the three prediction strategies spec.md §4.11 names. Pure and
//! infallible by construction: any range arithmetic that would fail just
//! drops that one prediction instead of propagating an error, since
//! predictions must never block a real request.

use std::collections::VecDeque;

use sheet_common::A1Range;

use crate::access::{
    AccessEvent,
    AccessKind,
};
use crate::pattern::Pattern;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub range: A1Range,
    pub confidence: f64,
    pub strategy: &'static str,
}

const COMMON_WINDOW_ROWS: i64 = 9;
const COMMON_WINDOW_COLS: i64 = 9;

pub fn combine(window: &VecDeque<AccessEvent>, patterns: &[Pattern]) -> Vec<Prediction> {
    let mut predictions = pattern_strategy(window, patterns);
    predictions.extend(adjacency_strategy(window));
    predictions.extend(common_strategy(window));
    predictions
}

fn last_range(window: &VecDeque<AccessEvent>) -> Option<&A1Range> {
    window.iter().rev().find_map(|event| match &event.kind {
        AccessKind::Range(range) => Some(range),
        AccessKind::DocumentOpen { .. } => None,
    })
}

fn recent_ranges(window: &VecDeque<AccessEvent>, count: usize) -> Vec<&A1Range> {
    let mut ranges: Vec<&A1Range> = window
        .iter()
        .rev()
        .filter_map(|event| match &event.kind {
            AccessKind::Range(range) => Some(range),
            AccessKind::DocumentOpen { .. } => None,
        })
        .take(count)
        .collect();
    ranges.reverse();
    ranges
}

/// If the most recent accesses match a known pattern's prefix, predict its
/// next element with that pattern's confidence.
fn pattern_strategy(window: &VecDeque<AccessEvent>, patterns: &[Pattern]) -> Vec<Prediction> {
    let mut predictions = Vec::new();
    for pattern in patterns {
        let prefix_len = pattern.sequence.len() - 1;
        let recent = recent_ranges(window, prefix_len);
        if recent.len() == prefix_len && recent.iter().zip(&pattern.sequence).all(|(a, b)| **a == *b) {
            predictions.push(Prediction {
                range: pattern.sequence[prefix_len].clone(),
                confidence: pattern.confidence,
                strategy: "pattern",
            });
        }
    }
    predictions
}

/// Predicts the horizontal and vertical neighbor of the current range.
fn adjacency_strategy(window: &VecDeque<AccessEvent>) -> Vec<Prediction> {
    let Some(current) = last_range(window) else {
        return Vec::new();
    };
    let width = current.end_col.saturating_sub(current.start_col).saturating_add(1);
    let height = current.end_row.saturating_sub(current.start_row).saturating_add(1);

    let mut predictions = Vec::new();
    if let Ok(right) = A1Range::new(
        current.sheet_name.clone(),
        current.start_row,
        current.start_col + width,
        current.end_row,
        current.end_col + width,
    ) {
        predictions.push(Prediction { range: right, confidence: 0.6, strategy: "adjacency_horizontal" });
    }
    if let Ok(down) = A1Range::new(
        current.sheet_name.clone(),
        current.start_row + height,
        current.start_col,
        current.end_row + height,
        current.end_col,
    ) {
        predictions.push(Prediction { range: down, confidence: 0.5, strategy: "adjacency_vertical" });
    }
    predictions
}

/// On a fresh document-open (nothing accessed since), predict a small
/// top-left window.
fn common_strategy(window: &VecDeque<AccessEvent>) -> Vec<Prediction> {
    let Some(AccessEvent { kind: AccessKind::DocumentOpen { sheet_name }, .. }) = window.back() else {
        return Vec::new();
    };
    match A1Range::new(sheet_name.clone(), 0, 0, COMMON_WINDOW_ROWS, COMMON_WINDOW_COLS) {
        Ok(range) => vec![Prediction { range, confidence: 0.7, strategy: "common" }],
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn range(row: i64, col: i64) -> A1Range {
        A1Range::new("Sheet1", row, col, row, col).unwrap()
    }

    fn range_event(range: A1Range) -> AccessEvent {
        AccessEvent { kind: AccessKind::Range(range), at: Instant::now() }
    }

    #[test]
    fn pattern_strategy_fires_when_the_prefix_matches() {
        let window: VecDeque<AccessEvent> = VecDeque::from([range_event(range(0, 0)), range_event(range(1, 0))]);
        let patterns = vec![Pattern {
            sequence: vec![range(0, 0), range(1, 0), range(2, 0)],
            frequency: 3,
            confidence: 0.3,
            last_seen: Instant::now(),
        }];
        let predictions = pattern_strategy(&window, &patterns);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].range, range(2, 0));
    }

    #[test]
    fn adjacency_strategy_predicts_right_and_down_neighbors() {
        let window: VecDeque<AccessEvent> = VecDeque::from([range_event(range(0, 0))]);
        let predictions = adjacency_strategy(&window);
        assert_eq!(predictions.len(), 2);
        assert!(predictions.iter().any(|p| p.range == range(0, 1) && p.strategy == "adjacency_horizontal"));
        assert!(predictions.iter().any(|p| p.range == range(1, 0) && p.strategy == "adjacency_vertical"));
    }

    #[test]
    fn common_strategy_only_fires_on_a_trailing_fresh_open() {
        let window: VecDeque<AccessEvent> = VecDeque::from([AccessEvent {
            kind: AccessKind::DocumentOpen { sheet_name: "Sheet1".to_string() },
            at: Instant::now(),
        }]);
        let predictions = common_strategy(&window);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].strategy, "common");

        let stale_window: VecDeque<AccessEvent> = VecDeque::from([
            AccessEvent { kind: AccessKind::DocumentOpen { sheet_name: "Sheet1".to_string() }, at: Instant::now() },
            range_event(range(0, 0)),
        ]);
        assert!(common_strategy(&stale_window).is_empty());
    }
}
