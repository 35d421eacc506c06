//! Fan-in of per-chunk summaries.

use serde::Serialize;

/// Separator placed between consecutive chunk summaries.
pub const SEPARATOR: &str = "\n\n";

/// Summary of one chunk. `ok == false` marks a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialSummary {
    pub chunk_index: usize,
    pub text: String,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSummary {
    pub text: String,
    pub chunk_count: usize,
    /// Indices of chunks that only produced a placeholder.
    pub degraded_chunks: Vec<usize>,
}

impl MergedSummary {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_chunks.is_empty()
    }
}

/// Joins partial summaries in `chunk_index` order, regardless of the order in
/// which they were produced.
pub fn merge(mut partials: Vec<PartialSummary>) -> MergedSummary {
    partials.sort_by_key(|p| p.chunk_index);

    let degraded_chunks = partials
        .iter()
        .filter(|p| !p.ok)
        .map(|p| p.chunk_index)
        .collect();

    let text = partials
        .iter()
        .map(|p| p.text.trim())
        .collect::<Vec<_>>()
        .join(SEPARATOR);

    MergedSummary {
        text,
        chunk_count: partials.len(),
        degraded_chunks,
    }
}
