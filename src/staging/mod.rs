//! On-disk staging for two-request merge jobs

pub mod manifest;
pub mod store;

pub use manifest::{
    resolve_merge_order, staged_file_name, MergeInput, OrderEntry, OrderingRecord,
    ORDER_FILE_NAME, STAGED_FILE_EXTENSION,
};
pub use store::{JobStore, JobWriter, MergePlan, StagedJob};
