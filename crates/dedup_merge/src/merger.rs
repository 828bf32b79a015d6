//! Request merger (spec.md §4.5): reads against the same document and
//! render options that arrive within a short window are folded into one
//! bounding-range remote call, then sliced back to each caller's original
//! range. A request whose deadline is too tight to survive the window
//! dispatches immediately instead of joining a group.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;
use remote_client::{
    SharedRemoteClient,
    ValuesBlock,
};
use serde_json::Value as JsonValue;
use sheet_common::{
    config::MergerConfig,
    range::{
        bounding_range,
        ranges_adjacent,
        ranges_overlap,
    },
    A1Range,
    DocumentHandle,
    Scope,
};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    document_id: DocumentHandle,
    render_options: String,
}

struct PendingReader {
    range: A1Range,
    scope: Scope,
    responder: oneshot::Sender<anyhow::Result<ValuesBlock>>,
}

struct PendingGroup {
    readers: Vec<PendingReader>,
    flush_at: Instant,
}

/// One connected component of overlapping/adjacent ranges on a sheet, with
/// the indices of its original members into the request list.
pub struct MergedGroup {
    pub bounding: A1Range,
    pub member_indices: Vec<usize>,
}

/// Pure grouping: unions ranges pairwise by overlap/adjacency (same sheet
/// only) and returns the bounding range of each resulting component. Used
/// directly by unit tests and by `RequestMerger::flush`.
pub fn merge_ranges(ranges: &[A1Range]) -> Vec<MergedGroup> {
    let n = ranges.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let same_sheet = ranges[i].sheet_name == ranges[j].sheet_name;
            if same_sheet && (ranges_overlap(&ranges[i], &ranges[j]) || ranges_adjacent(&ranges[i], &ranges[j])) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }

    components
        .into_values()
        .map(|members| {
            let mut bounding = ranges[members[0]].clone();
            for &idx in &members[1..] {
                bounding = bounding_range(&bounding, &ranges[idx]);
            }
            MergedGroup { bounding, member_indices: members }
        })
        .collect()
}

/// Slices a merged read result back down to `target`'s original window.
/// Unbounded targets (whole row/column/sheet reads) get the merged block
/// verbatim, since there is nothing meaningful to slice.
pub fn slice_values(merged_range: &A1Range, merged_values: &[Vec<JsonValue>], target: &A1Range) -> Vec<Vec<JsonValue>> {
    let (Some(rows), Some(cols)) = (target.row_count(), target.col_count()) else {
        return merged_values.to_vec();
    };
    let row_offset = (target.start_row - merged_range.start_row).max(0) as usize;
    let col_offset = (target.start_col - merged_range.start_col).max(0) as usize;
    (0..rows as usize)
        .map(|r| {
            (0..cols as usize)
                .map(|c| {
                    merged_values
                        .get(row_offset + r)
                        .and_then(|row| row.get(col_offset + c))
                        .cloned()
                        .unwrap_or(JsonValue::Null)
                })
                .collect()
        })
        .collect()
}

pub struct RequestMerger {
    config: MergerConfig,
    client: SharedRemoteClient,
    groups: Mutex<HashMap<GroupKey, PendingGroup>>,
}

impl RequestMerger {
    pub fn new(config: MergerConfig, client: SharedRemoteClient) -> Arc<Self> {
        Arc::new(Self { config, client, groups: Mutex::new(HashMap::new()) })
    }

    /// Reads `range` from `doc`, joining any in-progress merge window for
    /// the same `(doc, render_options)` pair when there's time to spare.
    #[tracing::instrument(skip(self, scope), fields(document_id = %doc))]
    pub async fn read(
        self: &Arc<Self>,
        scope: &Scope,
        doc: &DocumentHandle,
        render_options: &str,
        range: A1Range,
    ) -> anyhow::Result<ValuesBlock> {
        if !self.config.enabled || scope.remaining() < self.config.window {
            sheet_metrics::dedup_merge::log_merger_api_call(&range.sheet_name);
            return self.client.read_values(scope, doc, &range, &[]).await;
        }

        let key = GroupKey { document_id: doc.clone(), render_options: render_options.to_string() };
        let (tx, rx) = oneshot::channel();
        let should_schedule = {
            let mut groups = self.groups.lock();
            match groups.get_mut(&key) {
                Some(group)
                    if group.readers.len() < self.config.max_group_size
                        && group.flush_at <= scope.deadline =>
                {
                    group.readers.push(PendingReader { range: range.clone(), scope: scope.clone(), responder: tx });
                    false
                },
                _ => {
                    groups.insert(
                        key.clone(),
                        PendingGroup {
                            readers: vec![PendingReader { range: range.clone(), scope: scope.clone(), responder: tx }],
                            flush_at: Instant::now() + self.config.window,
                        },
                    );
                    true
                },
            }
        };

        if should_schedule {
            let this = Arc::clone(self);
            let window = self.config.window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                this.flush(key).await;
            });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => self.client.read_values(scope, doc, &range, &[]).await,
        }
    }

    async fn flush(self: Arc<Self>, key: GroupKey) {
        let group = {
            let mut groups = self.groups.lock();
            groups.remove(&key)
        };
        let Some(group) = group else { return };

        let ranges: Vec<A1Range> = group.readers.iter().map(|r| r.range.clone()).collect();
        sheet_metrics::dedup_merge::log_merged_requests(&key.document_id.to_string(), ranges.len() as u64);
        let merged_groups = merge_ranges(&ranges);
        let mut readers: Vec<Option<PendingReader>> = group.readers.into_iter().map(Some).collect();

        for merged in merged_groups {
            sheet_metrics::dedup_merge::log_merger_api_call(&merged.bounding.sheet_name);
            let representative_scope = merged
                .member_indices
                .iter()
                .filter_map(|&i| readers[i].as_ref().map(|r| r.scope.clone()))
                .min_by_key(|s| s.deadline)
                .expect("a merged group always has at least one untaken member at flush time");

            let fetched = self.client.read_values(&representative_scope, &key.document_id, &merged.bounding, &[]).await;

            for &idx in &merged.member_indices {
                let Some(reader) = readers[idx].take() else { continue };
                let result = match &fetched {
                    Ok(block) => Ok(ValuesBlock {
                        range: reader.range.clone(),
                        values: slice_values(&merged.bounding, &block.values, &reader.range),
                    }),
                    Err(err) => Err(anyhow::anyhow!(
                        err.downcast_ref::<sheet_errors::ErrorMetadata>()
                            .cloned()
                            .unwrap_or_else(|| sheet_errors::ErrorMetadata::internal(err.to_string()))
                    )),
                };
                let _ = reader.responder.send(result);
            }
        }
    }
}
