//! qpdf FFI wrapper for PDF manipulation
//!
//! This module provides merging, password removal, and re-serialization into
//! a fresh unencrypted document using the qpdf crate (vendored FFI).

use crate::error::{Error, Result};
use qpdf::{ObjectStreamMode, QPdf, QPdfDictionary, QPdfObjectLike, QPdfObjectType};

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Document information entries carried over by [`QpdfWrapper::unlock`]
pub const METADATA_KEYS: [&str; 8] = [
    "/Title",
    "/Author",
    "/Subject",
    "/Keywords",
    "/Creator",
    "/Producer",
    "/CreationDate",
    "/ModDate",
];

/// One document to merge, with a label for logging
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub label: String,
    pub data: Vec<u8>,
}

/// Result of a merge that tolerates bad inputs
#[derive(Debug)]
pub struct MergeOutcome {
    /// The merged PDF
    pub data: Vec<u8>,
    /// Pages in the merged PDF
    pub page_count: u32,
    /// Labels of the inputs whose pages made it in, in order
    pub merged: Vec<String>,
    /// Inputs that were left out, with the reason
    pub skipped: Vec<(String, Error)>,
}

/// Helper: open a QPdf from memory, optionally with password
fn open_qpdf(data: &[u8], password: Option<&str>) -> Result<QPdf> {
    match password {
        Some(pwd) => QPdf::read_from_memory_encrypted(data, pwd).map_err(map_qpdf_error),
        None => QPdf::read_from_memory(data).map_err(map_qpdf_error),
    }
}

/// Open without a password. Documents protected only by an owner password
/// open transparently; anything needing a user password is rejected.
fn open_ignoring_encryption(data: &[u8]) -> Result<QPdf> {
    open_qpdf(data, None).map_err(|e| match e {
        Error::IncorrectPassword => Error::PasswordRequired,
        Error::QpdfError { reason } => Error::InvalidPdf { reason },
        other => other,
    })
}

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

/// Append every page of `source` to `dest`, all or nothing.
///
/// Source pages are handed to qpdf directly so that attributes inherited
/// from the source page tree (MediaBox, Resources, CropBox, Rotate) are
/// pushed onto each page before it is copied.
fn append_pages(dest: &QPdf, source: &QPdf) -> Result<u32> {
    let pages = source.get_pages().map_err(map_qpdf_error)?;
    let kept = dest.get_num_pages().map_err(map_qpdf_error)? as usize;

    for page in &pages {
        if let Err(e) = dest.add_page(page, false) {
            truncate_pages(dest, kept);
            return Err(map_qpdf_error(e));
        }
    }

    Ok(pages.len() as u32)
}

/// Drop every page of `dest` after the first `kept`.
fn truncate_pages(dest: &QPdf, kept: usize) {
    let pages = match dest.get_pages() {
        Ok(pages) => pages,
        Err(e) => {
            tracing::warn!(error = %e, "cannot list pages to roll back partial append");
            return;
        }
    };
    for page in pages.iter().skip(kept) {
        if let Err(e) = dest.remove_page(page) {
            tracing::warn!(error = %e, "failed to roll back partially appended page");
        }
    }
}

/// Copy the recognized document information strings. Returns how many were set.
fn copy_metadata(source: &QPdf, dest: &QPdf) -> usize {
    let Some(info) = source.get_trailer().and_then(|trailer| trailer.get("/Info")) else {
        return 0;
    };
    if !matches!(info.get_type(), QPdfObjectType::Dictionary) {
        return 0;
    }
    let info = QPdfDictionary::from(info);

    let fresh = dest.new_dictionary();
    let mut copied = 0;
    for key in METADATA_KEYS {
        if let Some(value) = info.get(key) {
            if matches!(value.get_type(), QPdfObjectType::String) {
                fresh.set(key, &dest.new_binary_string(value.as_binary_string()));
                copied += 1;
            }
        }
    }

    if copied == 0 {
        return 0;
    }

    match dest.get_trailer() {
        Some(trailer) => {
            trailer.set("/Info", &fresh.into_indirect());
            copied
        }
        None => {
            tracing::warn!("output document has no trailer, metadata dropped");
            0
        }
    }
}

fn write_unencrypted(qpdf: &QPdf) -> Result<Vec<u8>> {
    let mut writer = qpdf.writer();
    writer.preserve_encryption(false);
    writer.write_to_memory().map_err(map_qpdf_error)
}

impl QpdfWrapper {
    /// Merge documents in the given order, skipping the ones that fail
    ///
    /// An input that cannot be opened or whose pages cannot be copied is
    /// reported in [`MergeOutcome::skipped`] and contributes no pages. Only a
    /// failure to serialize the result is fatal.
    pub fn merge_documents(inputs: &[MergeSource]) -> Result<MergeOutcome> {
        let dest = QPdf::empty();
        let mut merged = Vec::new();
        let mut skipped = Vec::new();

        for input in inputs {
            let appended = open_ignoring_encryption(&input.data)
                .and_then(|source| append_pages(&dest, &source));

            match appended {
                Ok(pages) => {
                    tracing::debug!(file = %input.label, pages, "appended input");
                    merged.push(input.label.clone());
                }
                Err(e) => skipped.push((input.label.clone(), e)),
            }
        }

        let page_count = dest.get_num_pages().map_err(map_qpdf_error)?;
        let data = write_unencrypted(&dest)?;

        Ok(MergeOutcome {
            data,
            page_count,
            merged,
            skipped,
        })
    }

    /// Remove password protection
    ///
    /// # Arguments
    /// * `input_data` - Raw PDF bytes
    /// * `password` - Candidate password
    ///
    /// # Returns
    /// A fresh unencrypted PDF holding every page and the recognized
    /// document information entries of the source
    pub fn unlock(input_data: &[u8], password: &str) -> Result<Vec<u8>> {
        let source = open_qpdf(input_data, Some(password))?;

        if !source.is_encrypted() {
            return Err(Error::NotProtected);
        }

        let dest = QPdf::empty();
        let pages = append_pages(&dest, &source)?;
        let metadata_fields = copy_metadata(&source, &dest);
        tracing::debug!(pages, metadata_fields, "copied unlocked document");

        write_unencrypted(&dest)
    }

    /// Copy every page into a fresh unencrypted document
    ///
    /// Owner-password restrictions are dropped; a document that needs a user
    /// password fails with [`Error::PasswordRequired`]. The output has no
    /// object streams so object-level editors can read it back.
    pub fn rebuild_unencrypted(input_data: &[u8]) -> Result<Vec<u8>> {
        let source = open_ignoring_encryption(input_data)?;
        let dest = QPdf::empty();
        append_pages(&dest, &source)?;

        let mut writer = dest.writer();
        writer
            .preserve_encryption(false)
            .object_stream_mode(ObjectStreamMode::Disable);
        writer.write_to_memory().map_err(map_qpdf_error)
    }
}
