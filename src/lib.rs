//! PDF Toolkit Library
//!
//! This crate provides an HTTP service for PDF manipulation:
//! - `POST /api/merge` + `GET /api/merge?id=`: staged multi-file merge
//! - `POST /api/pdf/unlock`: remove password protection
//! - `POST /api/pdf/grayscale`: approximate grayscale conversion

pub mod error;
pub mod pdf;
pub mod server;
pub mod staging;

pub use error::{Error, ErrorKind, Result};
pub use server::{
    router, run_server, run_server_with_config, serve, AppState, ErrorResponse, MergeInfo,
    ServerConfig, UploadResponse,
};
