//! Decoding of the base64+snappy encoded query-plan tree embedded in a slow
//! query log's `Plan` field into a human-readable ASCII tree.
//!
//! The wire format and the plan-id lookup table are fixed by the TiDB
//! optimizer that produces them; both are reproduced here exactly, including
//! the handful of gaps and compatibility shims the encoder carries (see
//! [`physical_id_to_type_string`]).

use std::fmt;

/// Sentinel payload used by the log producer when a plan was too large to
/// encode; decodes to a fixed human-readable placeholder instead of failing.
const PLAN_DISCARDED_ENCODED: &str = "[discard]";
const PLAN_DISCARDED_DECODED: &str = "(plan discarded because too long)";

const TREE_BODY: char = '│';
const TREE_MIDDLE_NODE: char = '├';
const TREE_LAST_NODE: char = '└';
const TREE_GAP: char = ' ';
const TREE_NODE_IDENTIFIER: char = '─';

const HEADER_FIELDS: &[&str] = &[
    "id",
    "task",
    "estRows",
    "operator info",
    "actRows",
    "execution info",
    "memory",
    "disk",
];

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to base64-decode plan payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to snappy-decompress plan payload: {0}")]
    Snappy(#[from] snap::Error),
    #[error("decode plan: invalid depth in row {row:?}: {source}")]
    InvalidDepth {
        row: String,
        source: std::num::ParseIntError,
    },
    #[error("decode plan: invalid plan id in row {row:?}: {value}")]
    InvalidPlanId { row: String, value: String },
    #[error("decode plan: invalid task type in row {row:?}: {value}")]
    InvalidTaskType { row: String, value: String },
}

type Result<T, E = PlanError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
struct PlanInfo {
    depth: usize,
    fields: Vec<String>,
}

/// Decodes a single `depth \t planId \t taskType \t ...` row.
///
/// Returns `Ok(None)` for rows with fewer than two tab-separated fields, per
/// the source format: such rows are skipped rather than treated as errors.
fn decode_plan_info(row: &str) -> Result<Option<PlanInfo>> {
    let values: Vec<&str> = row.split('\t').collect();
    if values.len() < 2 {
        return Ok(None);
    }

    let mut depth = 0usize;
    let mut fields = Vec::with_capacity(values.len().saturating_sub(1));
    for (i, v) in values.iter().enumerate() {
        match i {
            0 => {
                depth = v
                    .parse()
                    .map_err(|source| PlanError::InvalidDepth {
                        row: row.to_string(),
                        source,
                    })?;
            }
            1 => {
                let ids: Vec<&str> = v.split('_').collect();
                if ids.len() != 1 && ids.len() != 2 {
                    return Err(PlanError::InvalidPlanId {
                        row: row.to_string(),
                        value: (*v).to_string(),
                    });
                }
                let plan_id: i32 = ids[0].parse().map_err(|_| PlanError::InvalidPlanId {
                    row: row.to_string(),
                    value: (*v).to_string(),
                })?;
                let name = physical_id_to_type_string(plan_id);
                fields.push(match ids.get(1) {
                    Some(task_id) => format!("{name}_{task_id}"),
                    None => name.to_string(),
                });
            }
            2 => {
                fields.push(decode_task_type(v).map_err(|_| PlanError::InvalidTaskType {
                    row: row.to_string(),
                    value: (*v).to_string(),
                })?);
            }
            _ => fields.push((*v).to_string()),
        }
    }
    Ok(Some(PlanInfo { depth, fields }))
}

fn decode_task_type(s: &str) -> Result<String, ()> {
    let segs: Vec<&str> = s.split('_').collect();
    if segs[0] == "0" {
        return Ok("root".to_string());
    }
    // Be compatible with plan encodings that don't carry a store type.
    if segs.len() == 1 {
        return Ok("cop".to_string());
    }
    let store_type: u8 = segs[1].parse().map_err(|_| ())?;
    Ok(format!("cop[{}]", store_type_name(store_type)))
}

fn store_type_name(store_type: u8) -> &'static str {
    match store_type {
        0 => "tikv",
        1 => "tiflash",
        2 => "tidb",
        _ => "unspecified",
    }
}

/// Maps a TiDB physical-plan id to its type name. Ids and names are fixed by
/// the encoder and must not be renumbered: changing one breaks decoding of
/// already-persisted plan payloads.
///
/// Id 40 (`DataSource`) has no entry in the mapping table and falls through
/// to the `UnknownPlanID` placeholder; that gap is preserved here rather
/// than patched, for wire compatibility with already-persisted payloads.
fn physical_id_to_type_string(id: i32) -> String {
    let name = match id {
        1 => "Selection",
        2 => "Set",
        3 => "Projection",
        4 => "Aggregation",
        5 => "StreamAgg",
        6 => "HashAgg",
        7 => "Show",
        8 => "Join",
        9 => "Union",
        10 => "TableScan",
        11 => "MemTableScan",
        12 => "UnionScan",
        13 => "IndexScan",
        14 => "Sort",
        15 => "TopN",
        16 => "Limit",
        17 => "HashJoin",
        18 => "MergeJoin",
        19 => "IndexJoin",
        20 => "IndexMergeJoin",
        21 => "IndexHashJoin",
        22 => "Apply",
        23 => "MaxOneRow",
        24 => "Exists",
        25 => "TableDual",
        26 => "SelectLock",
        27 => "Insert",
        28 => "Update",
        29 => "Delete",
        30 => "IndexLookUp",
        31 => "TableReader",
        32 => "IndexReader",
        33 => "Window",
        34 => "TiKVSingleGather",
        35 => "IndexMerge",
        36 => "Point_Get",
        37 => "ShowDDLJobs",
        38 => "Batch_Point_Get",
        39 => "ClusterMemTableReader",
        // 40 (DataSource) intentionally absent, see doc comment above.
        41 => "LoadData",
        42 => "TableSample",
        43 => "TableFullScan",
        44 => "TableRangeScan",
        45 => "TableRowIDScan",
        46 => "IndexFullScan",
        47 => "IndexRangeScan",
        48 => "ExchangeReceiver",
        49 => "ExchangeSender",
        50 => "CTEFullScan",
        51 => "CTE",
        52 => "CTETable",
        _ => return format!("UnknownPlanID{id}"),
    };
    name.to_string()
}

fn decompress(encoded: &str) -> Result<String> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let mut decoder = snap::raw::Decoder::new();
    let bytes = decoder.decompress_vec(&raw)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A reusable scratch buffer for [`PlanDecoder::decode`]. Holding one per
/// call avoids reallocating the per-row bookkeeping vectors on every
/// invocation; it carries no long-lived state between calls.
#[derive(Debug, Default)]
pub struct PlanDecoder {
    plan_infos: Vec<PlanInfo>,
    indents: Vec<Vec<char>>,
}

impl PlanDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an encoded plan payload into its rendered ASCII tree.
    ///
    /// An empty payload decodes to an empty string. The literal
    /// `[discard]` token decodes to a fixed placeholder instead of being
    /// treated as malformed input.
    pub fn decode(&mut self, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }
        let decompressed = match decompress(encoded) {
            Ok(s) => s,
            Err(e) => {
                if encoded == PLAN_DISCARDED_ENCODED {
                    return Ok(PLAN_DISCARDED_DECODED.to_string());
                }
                return Err(e);
            }
        };
        self.build_plan_tree(&decompressed)
    }

    fn build_plan_tree(&mut self, plan_string: &str) -> Result<String> {
        self.plan_infos.clear();
        for row in plan_string.split('\n') {
            if let Some(info) = decode_plan_info(row)? {
                self.plan_infos.push(info);
            }
        }

        self.add_plan_header();
        self.init_plan_tree_indents();

        let mut cache_parent_index: std::collections::HashMap<usize, usize> =
            std::collections::HashMap::new();
        for i in 1..self.plan_infos.len() {
            let parent_index = self.find_parent_index(i, &mut cache_parent_index);
            self.fill_indent(parent_index, i);
        }

        self.align_fields();

        let mut out = String::new();
        for (i, p) in self.plan_infos.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push('\t');
            out.extend(self.indents[i].iter());
            for (j, field) in p.fields.iter().enumerate() {
                if j > 0 {
                    out.push('\t');
                }
                out.push_str(field);
            }
        }
        Ok(out)
    }

    fn add_plan_header(&mut self) {
        let Some(first) = self.plan_infos.first() else {
            return;
        };
        let width = HEADER_FIELDS.len().min(first.fields.len());
        let header = PlanInfo {
            depth: 0,
            fields: HEADER_FIELDS[..width].iter().map(|s| s.to_string()).collect(),
        };
        self.plan_infos.insert(0, header);
    }

    fn init_plan_tree_indents(&mut self) {
        self.indents.clear();
        for p in &self.plan_infos {
            let mut indent = vec![TREE_GAP; 2 * p.depth];
            if let Some(last) = indent.len().checked_sub(2) {
                indent[last] = TREE_LAST_NODE;
                indent[last + 1] = TREE_NODE_IDENTIFIER;
            }
            self.indents.push(indent);
        }
    }

    fn find_parent_index(
        &self,
        child_index: usize,
        cache: &mut std::collections::HashMap<usize, usize>,
    ) -> usize {
        cache.insert(self.plan_infos[child_index].depth, child_index);
        let parent_depth = self.plan_infos[child_index].depth.wrapping_sub(1);
        if let Some(&idx) = cache.get(&parent_depth) {
            return idx;
        }
        for i in (1..child_index).rev() {
            if self.plan_infos[i].depth == parent_depth {
                cache.insert(self.plan_infos[i].depth, i);
                return i;
            }
        }
        0
    }

    fn fill_indent(&mut self, parent_index: usize, child_index: usize) {
        let depth = self.plan_infos[child_index].depth;
        if depth == 0 {
            return;
        }
        let idx = depth * 2 - 2;
        for i in (parent_index + 1..child_index).rev() {
            if self.indents[i][idx] == TREE_LAST_NODE {
                self.indents[i][idx] = TREE_MIDDLE_NODE;
                break;
            }
            self.indents[i][idx] = TREE_BODY;
        }
    }

    fn align_fields(&mut self) {
        if self.plan_infos.is_empty() {
            return;
        }
        let max_len = self.plan_infos.iter().map(|p| p.fields.len()).max().unwrap_or(0);
        for p in &mut self.plan_infos {
            while p.fields.len() < max_len {
                p.fields.push(String::new());
            }
        }

        let fields_len = self.plan_infos[0].fields.len();
        if fields_len == 0 {
            return;
        }
        // The last column is never padded.
        for col in 0..fields_len - 1 {
            let max_field_len = self.max_field_len(col);
            for row in 0..self.plan_infos.len() {
                let cur = self.field_len(row, col);
                let pad = max_field_len.saturating_sub(cur);
                self.plan_infos[row].fields[col].push_str(&" ".repeat(pad));
            }
        }
    }

    fn max_field_len(&self, col: usize) -> usize {
        (0..self.plan_infos.len())
            .map(|row| self.field_len(row, col))
            .max()
            .unwrap_or(0)
    }

    fn field_len(&self, row: usize, col: usize) -> usize {
        if col == 0 {
            self.plan_infos[row].fields[0].len() + self.indents[row].len()
        } else {
            self.plan_infos[row].fields[col].len()
        }
    }
}

/// Decodes `encoded` using a fresh, one-shot [`PlanDecoder`].
pub fn decode_plan(encoded: &str) -> Result<String> {
    PlanDecoder::new().decode(encoded)
}

/// A small pool of reusable [`PlanDecoder`] instances, for call sites that
/// decode plans on a hot path and want to avoid reallocating the decoder's
/// scratch buffers on every call. Safe to share behind an `Arc`; each
/// [`PlanDecoderPool::lease`] hands out exclusive, caller-owned access to one
/// decoder for the lease's lifetime.
#[derive(Debug, Default)]
pub struct PlanDecoderPool {
    idle: std::sync::Mutex<Vec<PlanDecoder>>,
}

impl PlanDecoderPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self) -> PlanDecoderLease<'_> {
        let decoder = self.idle.lock().unwrap().pop().unwrap_or_default();
        PlanDecoderLease {
            pool: self,
            decoder: Some(decoder),
        }
    }
}

/// An exclusive lease of a [`PlanDecoder`] from a [`PlanDecoderPool`].
/// Returns the decoder to the pool on drop.
pub struct PlanDecoderLease<'a> {
    pool: &'a PlanDecoderPool,
    decoder: Option<PlanDecoder>,
}

impl std::ops::Deref for PlanDecoderLease<'_> {
    type Target = PlanDecoder;
    fn deref(&self) -> &PlanDecoder {
        self.decoder.as_ref().unwrap()
    }
}

impl std::ops::DerefMut for PlanDecoderLease<'_> {
    fn deref_mut(&mut self) -> &mut PlanDecoder {
        self.decoder.as_mut().unwrap()
    }
}

impl Drop for PlanDecoderLease<'_> {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            self.pool.idle.lock().unwrap().push(decoder);
        }
    }
}

impl fmt::Debug for PlanInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanInfo")
            .field("depth", &self.depth)
            .field("fields", &self.fields)
            .finish()
    }
}
