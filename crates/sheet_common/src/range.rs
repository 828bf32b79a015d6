//! A1-style range parsing and the overlap/adjacency/merge math that the
//! merger, dependency graph, and impact analyzer all build on. Kept as pure
//! functions over plain data per the Design Notes: this is the one piece of
//! the system worth extensive property testing.

use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};

/// Unbounded axis ends (whole row / whole column) sort last.
pub const UNBOUNDED: i64 = i64::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct A1Range {
    pub sheet_name: String,
    pub start_row: i64,
    pub start_col: i64,
    #[cfg_attr(any(test, feature = "testing"), proptest(strategy = "0i64..2000"))]
    pub end_row: i64,
    #[cfg_attr(any(test, feature = "testing"), proptest(strategy = "0i64..2000"))]
    pub end_col: i64,
}

impl A1Range {
    pub fn new(sheet_name: impl Into<String>, start_row: i64, start_col: i64, end_row: i64, end_col: i64) -> anyhow::Result<Self> {
        let range = Self {
            sheet_name: sheet_name.into(),
            start_row,
            start_col,
            end_row,
            end_col,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.start_row > self.end_row || self.start_col > self.end_col {
            anyhow::bail!(sheet_errors::ErrorMetadata::invalid_params(format!(
                "range start must not exceed end: {self}"
            )));
        }
        Ok(())
    }

    pub fn whole_row(sheet_name: impl Into<String>, row: i64) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            start_row: row,
            start_col: 0,
            end_row: row,
            end_col: UNBOUNDED,
        }
    }

    pub fn whole_column(sheet_name: impl Into<String>, col: i64) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            start_row: 0,
            start_col: col,
            end_row: UNBOUNDED,
            end_col: UNBOUNDED,
        }
    }

    pub fn whole_sheet(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            start_row: 0,
            start_col: 0,
            end_row: UNBOUNDED,
            end_col: UNBOUNDED,
        }
    }

    pub fn is_single_cell(&self) -> bool {
        self.start_row == self.end_row && self.start_col == self.end_col
    }

    pub fn row_count(&self) -> Option<i64> {
        (self.end_row != UNBOUNDED).then(|| self.end_row - self.start_row + 1)
    }

    pub fn col_count(&self) -> Option<i64> {
        (self.end_col != UNBOUNDED).then(|| self.end_col - self.start_col + 1)
    }

    /// Parses `Sheet1!A1:B10`, `A1:B10` (no sheet), `A:A` (whole column),
    /// `1:1` (whole row), and single-cell forms like `A1`.
    pub fn parse(sheet_name_default: &str, s: &str) -> anyhow::Result<Self> {
        let (sheet, rest) = match s.split_once('!') {
            Some((sheet, rest)) => (sheet.trim_matches('\'').to_string(), rest),
            None => (sheet_name_default.to_string(), s),
        };
        let (start_part, end_part) = match rest.split_once(':') {
            Some((a, b)) => (a, b),
            None => (rest, rest),
        };
        let start = parse_cell_ref(start_part, false)?;
        let end = parse_cell_ref(end_part, true)?;
        let range = Self {
            sheet_name: sheet,
            start_row: start.0,
            start_col: start.1,
            end_row: end.0,
            end_col: end.1,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn format(&self) -> String {
        let start = format_cell_ref(self.start_row, self.start_col);
        let end = format_cell_ref(self.end_row, self.end_col);
        if start == end {
            format!("{}!{}", self.sheet_name, start)
        } else {
            format!("{}!{}:{}", self.sheet_name, start, end)
        }
    }
}

impl fmt::Display for A1Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

fn parse_cell_ref(part: &str, is_end: bool) -> anyhow::Result<(i64, i64)> {
    let part = part.trim();
    if part.is_empty() {
        anyhow::bail!(sheet_errors::ErrorMetadata::invalid_params("empty cell reference"));
    }
    let col_chars: String = part.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let row_chars: &str = &part[col_chars.len()..];

    let col = if col_chars.is_empty() {
        if is_end { UNBOUNDED } else { 0 }
    } else {
        column_letters_to_index(&col_chars)?
    };
    let row = if row_chars.is_empty() {
        if is_end { UNBOUNDED } else { 0 }
    } else {
        row_chars
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!(sheet_errors::ErrorMetadata::invalid_params(format!("invalid row in {part}"))))?
            - 1
    };
    Ok((row, col))
}

fn column_letters_to_index(letters: &str) -> anyhow::Result<i64> {
    let mut index: i64 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            anyhow::bail!(sheet_errors::ErrorMetadata::invalid_params(format!("invalid column letters {letters}")));
        }
        index = index * 26 + (c.to_ascii_uppercase() as i64 - 'A' as i64 + 1);
    }
    Ok(index - 1)
}

fn format_cell_ref(row: i64, col: i64) -> String {
    if row == UNBOUNDED && col == UNBOUNDED {
        return String::new();
    }
    let col_part = if col == UNBOUNDED { String::new() } else { column_index_to_letters(col) };
    let row_part = if row == UNBOUNDED { String::new() } else { (row + 1).to_string() };
    format!("{col_part}{row_part}")
}

fn column_index_to_letters(mut index: i64) -> String {
    let mut buf = Vec::new();
    index += 1;
    while index > 0 {
        let rem = (index - 1) % 26;
        buf.push((b'A' + rem as u8) as char);
        index = (index - 1) / 26;
    }
    buf.iter().rev().collect()
}

/// `rangesOverlap(A,B) <=> rangesOverlap(B,A)`, reflexive for non-empty A.
/// Unbounded ends always compare as "past" any bounded end.
pub fn ranges_overlap(a: &A1Range, b: &A1Range) -> bool {
    if a.sheet_name != b.sheet_name {
        return false;
    }
    axis_overlaps(a.start_row, a.end_row, b.start_row, b.end_row)
        && axis_overlaps(a.start_col, a.end_col, b.start_col, b.end_col)
}

fn axis_overlaps(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Adjacent along exactly one axis (shares the other axis exactly) and not
/// already overlapping; used by the merger to fold in neighbors.
pub fn ranges_adjacent(a: &A1Range, b: &A1Range) -> bool {
    if a.sheet_name != b.sheet_name {
        return false;
    }
    let row_touch = a.start_row == b.end_row.saturating_add(1) || b.start_row == a.end_row.saturating_add(1);
    let col_touch = a.start_col == b.end_col.saturating_add(1) || b.start_col == a.end_col.saturating_add(1);
    let cols_align = axis_overlaps(a.start_col, a.end_col, b.start_col, b.end_col);
    let rows_align = axis_overlaps(a.start_row, a.end_row, b.start_row, b.end_row);
    (row_touch && cols_align) || (col_touch && rows_align)
}

/// Minimum bounding range covering both `a` and `b`. Panics if the sheets
/// differ; callers must group by sheet first.
pub fn bounding_range(a: &A1Range, b: &A1Range) -> A1Range {
    assert_eq!(a.sheet_name, b.sheet_name, "bounding_range requires same sheet");
    A1Range {
        sheet_name: a.sheet_name.clone(),
        start_row: a.start_row.min(b.start_row),
        start_col: a.start_col.min(b.start_col),
        end_row: max_unbounded(a.end_row, b.end_row),
        end_col: max_unbounded(a.end_col, b.end_col),
    }
}

fn max_unbounded(a: i64, b: i64) -> i64 {
    if a == UNBOUNDED || b == UNBOUNDED { UNBOUNDED } else { a.max(b) }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_roundtrips_bounded_ranges() {
        let r = A1Range::parse("Sheet1", "Sheet1!A1:C10").unwrap();
        assert_eq!(r.sheet_name, "Sheet1");
        assert_eq!((r.start_row, r.start_col, r.end_row, r.end_col), (0, 0, 9, 2));
        assert_eq!(r.format(), "Sheet1!A1:C10");
    }

    #[test]
    fn parse_single_cell() {
        let r = A1Range::parse("Sheet1", "B5").unwrap();
        assert!(r.is_single_cell());
        assert_eq!(r.format(), "Sheet1!B5");
    }

    #[test]
    fn parse_whole_column() {
        let r = A1Range::parse("Sheet1", "A:A").unwrap();
        assert_eq!(r.start_col, 0);
        assert_eq!(r.end_col, UNBOUNDED);
        assert_eq!(r.start_row, 0);
        assert_eq!(r.end_row, UNBOUNDED);
    }

    #[test]
    fn invalid_range_rejected() {
        assert!(A1Range::new("S", 5, 0, 0, 0).is_err());
    }

    #[test]
    fn overlap_is_symmetric_and_reflexive() {
        let a = A1Range::new("S", 0, 0, 5, 5).unwrap();
        let b = A1Range::new("S", 3, 3, 8, 8).unwrap();
        assert_eq!(ranges_overlap(&a, &b), ranges_overlap(&b, &a));
        assert!(ranges_overlap(&a, &a));
    }

    #[test]
    fn different_sheets_never_overlap() {
        let a = A1Range::new("S1", 0, 0, 5, 5).unwrap();
        let b = A1Range::new("S2", 0, 0, 5, 5).unwrap();
        assert!(!ranges_overlap(&a, &b));
    }

    #[test]
    fn adjacent_ranges_merge_to_bounding_box() {
        let a = A1Range::new("S", 0, 0, 0, 2).unwrap();
        let b = A1Range::new("S", 1, 0, 1, 2).unwrap();
        assert!(ranges_adjacent(&a, &b));
        let merged = bounding_range(&a, &b);
        assert_eq!((merged.start_row, merged.end_row), (0, 1));
    }

    #[test]
    fn unbounded_sorts_last_in_bounding_range() {
        let a = A1Range::whole_column("S", 0);
        let b = A1Range::new("S", 0, 0, 10, 0).unwrap();
        let merged = bounding_range(&a, &b);
        assert_eq!(merged.end_row, UNBOUNDED);
    }

    proptest! {
        #[test]
        fn overlap_symmetric_prop(a in any::<A1Range>(), b in any::<A1Range>()) {
            let same_sheet_b = A1Range { sheet_name: a.sheet_name.clone(), ..b };
            prop_assert_eq!(ranges_overlap(&a, &same_sheet_b), ranges_overlap(&same_sheet_b, &a));
        }

        #[test]
        fn parse_format_roundtrip(start_row in 0i64..500, start_col in 0i64..500, extra_row in 0i64..50, extra_col in 0i64..50) {
            let r = A1Range::new("Sheet1", start_row, start_col, start_row + extra_row, start_col + extra_col).unwrap();
            let reparsed = A1Range::parse("Sheet1", &r.format()).unwrap();
            prop_assert_eq!(r, reparsed);
        }
    }
}
