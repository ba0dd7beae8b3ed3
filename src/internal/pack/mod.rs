//! Pack file encoder/decoder implementations, waitlists, and stream wrappers that faithfully
//! follow the [pack-format spec](https://git-scm.com/docs/pack-format).

pub mod cache_object;
pub mod decode;
pub mod encode;
pub mod entry;
pub mod waitlist;
pub mod wrapper;

use crate::hash::ObjectHash;

/// In-memory handle to a single packfile decode/encode session.
///
/// Unlike a full on-disk pack store, this holds no persisted `.idx` index and no object cache:
/// the packfile engine here is single-pass and streaming, matching the append-only tiered
/// object store it feeds into.
pub struct Pack {
    /// Number of objects declared in the pack header, filled in once `decode` has read it.
    pub number: usize,
    /// Pack trailer checksum, filled in once `decode` has verified it.
    pub signature: ObjectHash,
    /// Soft cap on the bytes of inflated base-object data kept around to resolve pending deltas.
    pub mem_limit: Option<usize>,
    /// Whether to remove any scratch files the session created once decoding finishes.
    pub clean_tmp: bool,
}

impl Pack {
    /// Start a new decode/encode session.
    ///
    /// `max_cache_size` and `thread_num` are accepted for API compatibility with larger
    /// deployments that tune batching/parallelism; this single-pass engine does not use them.
    pub fn new(
        mem_limit: Option<usize>,
        _max_cache_size: Option<usize>,
        _thread_num: Option<usize>,
        clean_tmp: bool,
    ) -> Self {
        Pack {
            number: 0,
            signature: ObjectHash::default(),
            mem_limit,
            clean_tmp,
        }
    }
}
