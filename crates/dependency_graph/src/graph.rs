//! The formula dependency graph: one node per formula cell, edges to the
//! ranges it references. Built once per `(document, revision)` by
//! [`crate::cache::DependencyGraphCache`] and reused until the document's
//! revision token changes.

use std::collections::{
    HashMap,
    HashSet,
};

use remote_client::FormulaCell;
use sheet_common::{
    range::ranges_overlap,
    A1Range,
    CellRef,
};

use crate::tokenizer::extract_references;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<CellRef, Vec<A1Range>>,
    dynamic: HashSet<CellRef>,
    /// Cycles found during construction, each a closed walk of formula
    /// cells that reference one another.
    pub cycles: Vec<Vec<CellRef>>,
}

impl DependencyGraph {
    pub fn build(formulas: &[FormulaCell]) -> Self {
        let mut edges = HashMap::with_capacity(formulas.len());
        let mut dynamic = HashSet::new();
        for f in formulas {
            let cell = CellRef { sheet_name: f.sheet_name.clone(), row: f.row, col: f.col };
            let refs = extract_references(&f.formula, &f.sheet_name);
            if refs.dynamic {
                dynamic.insert(cell.clone());
            }
            edges.insert(cell, refs.ranges);
        }
        let cycles = detect_cycles(&edges);
        Self { edges, dynamic, cycles }
    }

    pub fn formula_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_formula_cell(&self, cell: &CellRef) -> bool {
        self.edges.contains_key(cell)
    }

    /// Ranges that `cell`'s formula reads from. Empty for non-formula
    /// cells and for cells whose formula has no static references.
    pub fn dependencies_of(&self, cell: &CellRef) -> &[A1Range] {
        self.edges.get(cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True if `cell` references at least one target via `INDIRECT`/`OFFSET`,
    /// meaning its full set of dependencies can't be determined statically.
    pub fn is_dynamic(&self, cell: &CellRef) -> bool {
        self.dynamic.contains(cell)
    }

    /// Formula cells whose referenced ranges overlap `target`.
    pub fn formulas_depending_on(&self, target: &A1Range) -> Vec<CellRef> {
        self.edges
            .iter()
            .filter(|(_, ranges)| ranges.iter().any(|r| ranges_overlap(r, target)))
            .map(|(cell, _)| cell.clone())
            .collect()
    }
}

fn cell_in_range(cell: &CellRef, range: &A1Range) -> bool {
    cell.sheet_name == range.sheet_name
        && cell.row >= range.start_row
        && cell.row <= range.end_row
        && cell.col >= range.start_col
        && cell.col <= range.end_col
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Explicit white/gray/black DFS: a gray node is never recursed into
/// again, so a cycle is reported once and traversal always terminates,
/// even over a graph that isn't a DAG.
fn detect_cycles(edges: &HashMap<CellRef, Vec<A1Range>>) -> Vec<Vec<CellRef>> {
    let mut color: HashMap<CellRef, Color> = edges.keys().cloned().map(|c| (c, Color::White)).collect();
    let mut stack: Vec<CellRef> = Vec::new();
    let mut cycles = Vec::new();

    let nodes: Vec<CellRef> = edges.keys().cloned().collect();
    for node in nodes {
        if color.get(&node).copied().unwrap_or(Color::White) == Color::White {
            visit(&node, edges, &mut color, &mut stack, &mut cycles);
        }
    }
    cycles
}

fn visit(
    node: &CellRef,
    edges: &HashMap<CellRef, Vec<A1Range>>,
    color: &mut HashMap<CellRef, Color>,
    stack: &mut Vec<CellRef>,
    cycles: &mut Vec<Vec<CellRef>>,
) {
    color.insert(node.clone(), Color::Gray);
    stack.push(node.clone());

    if let Some(ranges) = edges.get(node) {
        for other in edges.keys() {
            if other == node || !ranges.iter().any(|r| cell_in_range(other, r)) {
                continue;
            }
            match color.get(other).copied().unwrap_or(Color::White) {
                Color::White => visit(other, edges, color, stack, cycles),
                Color::Gray => {
                    if let Some(pos) = stack.iter().position(|c| c == other) {
                        cycles.push(stack[pos..].to_vec());
                    }
                },
                Color::Black => {},
            }
        }
    }

    stack.pop();
    color.insert(node.clone(), Color::Black);
}
