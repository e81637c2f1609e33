//! Gzip helpers for report bodies.
//!
//! The HTTP sender compresses large bodies and marks them with
//! `Content-Encoding: gzip`; the inbox inflates them again.

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};
use thiserror::Error;

/// Default compression threshold in bytes (1KB).
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Value of the `Content-Encoding` header for compressed bodies.
pub const GZIP_ENCODING: &str = "gzip";

/// Compression errors.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Compression failed: {0}")]
    CompressionFailed(#[from] std::io::Error),

    #[error("UTF-8 decode failed: {0}")]
    Utf8Failed(#[from] std::string::FromUtf8Error),
}

/// Compresses bytes with gzip.
///
/// # Example
///
/// ```
/// use crashpost::compression::{gunzip, gzip};
///
/// let packed = gzip(b"crash report...").unwrap();
/// assert_eq!(gunzip(&packed).unwrap(), b"crash report...");
/// ```
pub fn gzip(plain: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain)?;
    Ok(encoder.finish()?)
}

/// Inflates a gzip stream.
pub fn gunzip(compressed: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Inflates a gzip stream that must hold UTF-8 text.
pub fn gunzip_to_string(compressed: &[u8]) -> Result<String, CompressionError> {
    Ok(String::from_utf8(gunzip(compressed)?)?)
}

/// Checks if a body should be compressed based on size.
///
/// Small bodies may not benefit from compression overhead.
pub fn should_compress(len: usize, threshold: usize) -> bool {
    len >= threshold
}

/// Compresses the body only if it reaches the size threshold. Returns the
/// body and whether it was compressed.
pub fn maybe_gzip(body: Vec<u8>, threshold: usize) -> Result<(Vec<u8>, bool), CompressionError> {
    if should_compress(body.len(), threshold) {
        Ok((gzip(&body)?, true))
    } else {
        Ok((body, false))
    }
}
