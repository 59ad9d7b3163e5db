//! Asset decoding
//!
//! Turns files on disk into raw vertex and pixel buffers. Nothing here touches
//! the GPU; uploads happen in [`crate::render`].

pub mod image_loader;
pub mod obj_loader;

pub use image_loader::{HdrImageData, ImageData};
pub use obj_loader::{ObjLoader, ObjModel};

use std::path::PathBuf;
use thiserror::Error;

/// Asset loading errors, always carrying the offending path
#[derive(Error, Debug)]
pub enum AssetError {
    /// File could not be read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// File was read but could not be decoded
    #[error("Failed to decode {path:?}: {reason}")]
    Decode {
        /// File that failed
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Text asset with a malformed line
    #[error("{path:?}:{line}: {reason}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What was wrong with the line
        reason: String,
    },
}
