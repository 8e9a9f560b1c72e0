//! Ordering record for staged merge jobs

use serde::{Deserialize, Serialize};

/// File name of the ordering record inside a job directory
pub const ORDER_FILE_NAME: &str = "order.json";

/// Extension given to every staged upload
pub const STAGED_FILE_EXTENSION: &str = "pdf";

/// Name of the staged file for a zero-based upload position
pub fn staged_file_name(position: u32) -> String {
    format!("{}.{}", position, STAGED_FILE_EXTENSION)
}

/// One uploaded file: where it was staged and what the client called it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    #[serde(rename = "index")]
    pub position: u32,
    #[serde(rename = "name")]
    pub original_name: String,
}

/// Ordered sequence of uploads, written once per job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingRecord {
    entries: Vec<OrderEntry>,
}

impl OrderingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next upload. Positions are assigned by the caller.
    pub fn push(&mut self, position: u32, original_name: impl Into<String>) {
        self.entries.push(OrderEntry {
            position,
            original_name: original_name.into(),
        });
    }

    pub fn entries(&self) -> &[OrderEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// A staged file scheduled for merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInput {
    /// File name inside the job directory
    pub file_name: String,
    /// Name used in logs: the original upload name when known
    pub label: String,
}

/// Resolve the order in which staged files are merged.
///
/// With a record, the order is exactly the record's sequence, including
/// entries whose staged file has gone missing (the merge skips those).
/// Without one, every `.pdf` in the listing is merged in ascending
/// lexicographic order of its file name, so `10.pdf` sorts before `2.pdf`.
pub fn resolve_merge_order(record: Option<&OrderingRecord>, listing: &[String]) -> Vec<MergeInput> {
    match record {
        Some(record) => record
            .entries()
            .iter()
            .map(|entry| MergeInput {
                file_name: staged_file_name(entry.position),
                label: entry.original_name.clone(),
            })
            .collect(),
        None => {
            let suffix = format!(".{}", STAGED_FILE_EXTENSION);
            let mut names: Vec<&String> = listing
                .iter()
                .filter(|name| name.ends_with(&suffix))
                .collect();
            names.sort();
            names
                .into_iter()
                .map(|name| MergeInput {
                    file_name: name.clone(),
                    label: name.clone(),
                })
                .collect()
        }
    }
}
