//! Binary delta encoding/decoding used by the packfile engine for `ofs-delta`/`ref-delta` records.

pub mod decode;
pub mod encode;
pub mod errors;
pub mod utils;

use std::io::Cursor;

pub use errors::GitDeltaError;

/// Apply a delta instruction stream to `base`, returning the reconstructed object bytes.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, GitDeltaError> {
    let mut cursor = Cursor::new(delta);
    decode::delta_decode(&mut cursor, base)
}

/// Build a delta instruction stream that reconstructs `target` when applied to `base`.
pub fn encode_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    encode::DeltaDiff::new(base, target).encode()
}
