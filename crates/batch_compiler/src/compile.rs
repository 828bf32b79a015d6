//! Turns an ordered list of mutations into the minimum number of remote
//! batch calls (spec.md §4.7, compilation rules 1-5). Pure and
//! synchronous: no network or time involved, so it's exhaustively
//! unit-testable on its own.

use sheet_common::Mutation;

/// A mutation plus whether its effect should be re-read and compared
/// after dispatch (spec.md §4.7 "Verification").
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub mutation: Mutation,
    pub verify: bool,
}

impl MutationRequest {
    pub fn new(mutation: Mutation) -> Self {
        Self { mutation, verify: false }
    }

    pub fn verified(mutation: Mutation) -> Self {
        Self { mutation, verify: true }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledCall {
    /// Endpoint families folded into this call, in first-seen order; a
    /// single family for most calls, more than one only when rule 3
    /// pulled a dependent mutation in after a structural one.
    pub families: Vec<&'static str>,
    pub requests: Vec<MutationRequest>,
    pub field_mask: Vec<String>,
    pub singleton: bool,
}

/// Groups consecutive mutations into [`CompiledCall`]s:
/// - rule 1: consecutive mutations in the same endpoint family share a call.
/// - rule 3: a mutation immediately following a structural one stays in
///   that call even if its family differs, since it may depend on the
///   structural change (e.g. writing into a sheet just added).
/// - rule 4: singleton mutations (`copy_sheet`) always get their own call.
/// - rule 2 falls out for free: everything is appended in submission order.
pub fn compile(requests: Vec<MutationRequest>) -> Vec<CompiledCall> {
    let mut calls: Vec<CompiledCall> = Vec::new();

    for request in requests {
        if request.mutation.is_singleton() {
            calls.push(CompiledCall {
                families: vec![request.mutation.endpoint_family()],
                field_mask: field_mask_for(request.mutation.endpoint_family()),
                singleton: true,
                requests: vec![request],
            });
            continue;
        }

        let family = request.mutation.endpoint_family();
        let extends_current = calls.last().is_some_and(|call| {
            !call.singleton
                && (call.families.last() == Some(&family) || call.requests.last().is_some_and(|r| r.mutation.is_structural()))
        });

        if extends_current {
            let call = calls.last_mut().expect("checked above");
            if call.families.last() != Some(&family) {
                call.families.push(family);
                call.field_mask = union_field_masks(&call.families);
            }
            call.requests.push(request);
        } else {
            calls.push(CompiledCall { families: vec![family], field_mask: field_mask_for(family), singleton: false, requests: vec![request] });
        }
    }

    calls
}

/// The minimal response fields needed to confirm each endpoint family's
/// call succeeded, per rule 5. Kept data-driven so adding a family means
/// adding one line here rather than touching the compiler logic.
fn field_mask_for(family: &'static str) -> Vec<String> {
    match family {
        "values" => vec!["range".to_string(), "updatedCells".to_string()],
        "sheets" => vec!["sheetId".to_string(), "title".to_string()],
        "copy_sheet" => vec!["sheetId".to_string()],
        "batch_update" => vec!["replies".to_string()],
        _ => vec![],
    }
}

fn union_field_masks(families: &[&'static str]) -> Vec<String> {
    let mut mask: Vec<String> = Vec::new();
    for family in families {
        for field in field_mask_for(family) {
            if !mask.contains(&field) {
                mask.push(field);
            }
        }
    }
    mask
}
