//! PDF processing layer
//!
//! qpdf handles loading, merging, decryption and re-serialization; lopdf
//! edits page content streams for the grayscale approximations.

pub mod grayscale;
mod qpdf;


pub use grayscale::{
    GrayStateInjection, GrayscaleConverter, GrayscaleOutput, GrayscaleStrategy, WashoutOverlay,
};
pub use qpdf::{MergeOutcome, MergeSource, QpdfWrapper, METADATA_KEYS};
