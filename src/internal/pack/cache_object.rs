//! In-memory representation of a single pack record while it is being decoded: either a fully
//! materialized base object, or a delta still waiting on its base.

use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;

/// What kind of pack record a [`CacheObject`] represents.
#[derive(Clone, Debug)]
pub enum CacheObjectInfo {
    /// A commit/tree/blob/tag record, fully decoded.
    BaseObject(ObjectType, ObjectHash),
    /// An offset-delta record; the base lives at `offset - relative_offset` in the same pack.
    OffsetDelta { base_offset: usize },
    /// A ref-delta record; the base is identified by hash, possibly outside this pack (thin pack).
    HashDelta { base_hash: ObjectHash },
}

/// A single pack record plus the bookkeeping the decoder needs to resolve and re-hash it.
#[derive(Clone, Debug)]
pub struct CacheObject {
    pub info: CacheObjectInfo,
    /// Byte offset of this record's header within the pack.
    pub offset: usize,
    /// CRC32 of the record's compressed-on-disk bytes.
    pub crc32: u32,
    /// Inflated payload: raw object bytes for a base object, delta instruction stream otherwise.
    pub data_decompressed: Vec<u8>,
    /// Running memory accounting handle, if the pack decoder is tracking a memory budget.
    pub mem_recorder: Option<std::sync::Arc<std::sync::atomic::AtomicUsize>>,
    /// Whether this record's base also lives inside this same pack (as opposed to a thin-pack
    /// ref-delta pointing outside it).
    pub is_delta_in_pack: bool,
}

impl CacheObject {
    pub fn obj_type(&self) -> Option<ObjectType> {
        match self.info {
            CacheObjectInfo::BaseObject(t, _) => Some(t),
            _ => None,
        }
    }

    pub fn hash(&self) -> Option<ObjectHash> {
        match self.info {
            CacheObjectInfo::BaseObject(_, h) => Some(h),
            _ => None,
        }
    }
}
