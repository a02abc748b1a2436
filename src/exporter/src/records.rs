//! Incremental processing of the newline-delimited export stream.
//!
//! Network chunks are split into complete lines as they arrive; only the
//! trailing partial line is carried over to the next chunk.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::assets::{AssetReference, DocumentNode};

const DRAFT_PREFIX: &str = "drafts.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Records written to the output file.
    pub documents: usize,
    pub drafts_skipped: usize,
    /// Lines that were not valid JSON; written through unchanged.
    pub unparsed: usize,
    pub bytes: u64,
}

pub struct RecordFilter {
    include_drafts: bool,
    scan_assets: bool,
    pending: Vec<u8>,
    stats: RecordStats,
    assets: BTreeSet<AssetReference>,
}

impl RecordFilter {
    pub fn new(include_drafts: bool, scan_assets: bool) -> Self {
        Self {
            include_drafts,
            scan_assets,
            pending: Vec::new(),
            stats: RecordStats::default(),
            assets: BTreeSet::new(),
        }
    }

    /// Consumes a chunk and appends every completed, kept line to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            self.handle_line(&pending[start..end], out);
            start = end + 1;
        }

        pending.drain(..start);
        self.pending = pending;
    }

    /// Flushes a final line that had no trailing newline.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        let pending = std::mem::take(&mut self.pending);
        self.handle_line(&pending, out);
    }

    pub fn stats(&self) -> RecordStats {
        self.stats
    }

    pub fn into_assets(self) -> BTreeSet<AssetReference> {
        self.assets
    }

    fn handle_line(&mut self, line: &[u8], out: &mut Vec<u8>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(record) => {
                if !self.include_drafts && is_draft(&record) {
                    self.stats.drafts_skipped += 1;
                    return;
                }
                if self.scan_assets {
                    DocumentNode::from(&record).collect_assets(&mut self.assets);
                }
            }
            Err(error) => {
                tracing::debug!(%error, "export line is not valid JSON; keeping it verbatim");
                self.stats.unparsed += 1;
            }
        }

        out.extend_from_slice(line);
        out.push(b'\n');
        self.stats.documents += 1;
        self.stats.bytes += line.len() as u64 + 1;
    }
}

fn is_draft(record: &Value) -> bool {
    record
        .get("_id")
        .and_then(Value::as_str)
        .is_some_and(|id| id.starts_with(DRAFT_PREFIX))
}
