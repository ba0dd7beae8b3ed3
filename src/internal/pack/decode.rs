//! Decodes a packfile byte stream into a sequence of [`Entry`] values, resolving offset- and
//! ref-deltas against bases seen earlier in the same stream (or already known to the caller).

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Read};

use crate::delta::apply_delta;
use crate::errors::GitError;
use crate::hash::{ObjectHash, get_hash_kind};
use crate::internal::object::types::ObjectType;
use crate::internal::pack::Pack;
use crate::internal::pack::cache_object::{CacheObject, CacheObjectInfo};
use crate::internal::pack::entry::Entry;
use crate::internal::pack::waitlist::Waitlist;
use crate::internal::pack::wrapper::Wrapper;
use crate::internal::zlib::stream::inflate::ReadBoxed;
use crate::utils::read_bytes;

const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// A fully resolved base object kept around only long enough to serve as a delta base for
/// later records in the same pack.
struct ResolvedBase {
    obj_type: ObjectType,
    data: Vec<u8>,
}

impl Pack {
    /// Decode a packfile from `reader`, invoking `callback(entry, pack_offset)` for every
    /// object once it is fully resolved (bases immediately, deltas once their base is known).
    pub fn decode<R: BufRead>(
        &mut self,
        reader: &mut R,
        mut callback: impl FnMut(Entry, usize),
    ) -> Result<(), GitError> {
        let mut wrapper = Wrapper::new(reader);

        let magic: [u8; 4] = read_bytes(&mut wrapper, 4)?.try_into().unwrap();
        if &magic != PACK_SIGNATURE {
            return Err(GitError::InvalidPackHeader(format!(
                "bad pack signature: {magic:?}"
            )));
        }
        let version = u32::from_be_bytes(read_bytes(&mut wrapper, 4)?.try_into().unwrap());
        if version != 2 && version != 3 {
            return Err(GitError::InvalidPackHeader(format!(
                "unsupported pack version {version}"
            )));
        }
        let count = u32::from_be_bytes(read_bytes(&mut wrapper, 4)?.try_into().unwrap()) as usize;
        self.number = count;

        let waitlist = Waitlist::new();
        let mut resolved_by_offset: HashMap<usize, ResolvedBase> = HashMap::new();
        let mut offset_by_hash: HashMap<ObjectHash, usize> = HashMap::new();

        for _ in 0..count {
            let record_offset = wrapper.bytes_read();
            let (type_bits, size) = read_type_and_size(&mut wrapper)?;

            match type_bits {
                1 | 2 | 3 | 4 => {
                    let obj_type = ObjectType::from_pack_type_u8(type_bits)?;
                    let data = inflate_exact(&mut wrapper, size)?;
                    let hash = ObjectHash::from_type_and_data(obj_type, &data);
                    resolved_by_offset.insert(
                        record_offset,
                        ResolvedBase {
                            obj_type,
                            data: data.clone(),
                        },
                    );
                    offset_by_hash.insert(hash, record_offset);
                    callback(
                        Entry {
                            obj_type,
                            data: data.clone(),
                            hash,
                            chain_len: 0,
                        },
                        record_offset,
                    );
                    resolve_pending(
                        &waitlist,
                        record_offset,
                        hash,
                        obj_type,
                        data,
                        &mut resolved_by_offset,
                        &mut offset_by_hash,
                        &mut callback,
                    )?;
                }
                6 => {
                    let rel = read_ofs_delta_offset(&mut wrapper)?;
                    let base_offset = record_offset.checked_sub(rel).ok_or_else(|| {
                        GitError::DeltaObjectError(
                            "ofs-delta base offset underflows the pack".to_string(),
                        )
                    })?;
                    let delta_data = inflate_exact(&mut wrapper, size)?;

                    if let Some(base) = resolved_by_offset.get(&base_offset) {
                        let obj_type = base.obj_type;
                        let data = apply_delta(&base.data, &delta_data)
                            .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
                        let hash = ObjectHash::from_type_and_data(obj_type, &data);
                        resolved_by_offset.insert(
                            record_offset,
                            ResolvedBase {
                                obj_type,
                                data: data.clone(),
                            },
                        );
                        offset_by_hash.insert(hash, record_offset);
                        callback(
                            Entry {
                                obj_type,
                                data: data.clone(),
                                hash,
                                chain_len: 1,
                            },
                            record_offset,
                        );
                        resolve_pending(
                            &waitlist,
                            record_offset,
                            hash,
                            obj_type,
                            data,
                            &mut resolved_by_offset,
                            &mut offset_by_hash,
                            &mut callback,
                        )?;
                    } else {
                        waitlist.insert_offset(
                            base_offset,
                            CacheObject {
                                info: CacheObjectInfo::OffsetDelta { base_offset },
                                offset: record_offset,
                                crc32: 0,
                                data_decompressed: delta_data,
                                mem_recorder: None,
                                is_delta_in_pack: true,
                            },
                        );
                    }
                }
                7 => {
                    let hash_size = get_hash_kind().size();
                    let base_hash_bytes = read_bytes(&mut wrapper, hash_size)?;
                    let base_hash = ObjectHash::from_bytes(&base_hash_bytes)
                        .map_err(GitError::InvalidHashValue)?;
                    let delta_data = inflate_exact(&mut wrapper, size)?;

                    if let Some(&base_offset) = offset_by_hash.get(&base_hash) {
                        let obj_type = resolved_by_offset.get(&base_offset).unwrap().obj_type;
                        let base_data = resolved_by_offset.get(&base_offset).unwrap().data.clone();
                        let data = apply_delta(&base_data, &delta_data)
                            .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
                        let hash = ObjectHash::from_type_and_data(obj_type, &data);
                        resolved_by_offset.insert(
                            record_offset,
                            ResolvedBase {
                                obj_type,
                                data: data.clone(),
                            },
                        );
                        offset_by_hash.insert(hash, record_offset);
                        callback(
                            Entry {
                                obj_type,
                                data: data.clone(),
                                hash,
                                chain_len: 1,
                            },
                            record_offset,
                        );
                        resolve_pending(
                            &waitlist,
                            record_offset,
                            hash,
                            obj_type,
                            data,
                            &mut resolved_by_offset,
                            &mut offset_by_hash,
                            &mut callback,
                        )?;
                    } else {
                        waitlist.insert_ref(
                            base_hash,
                            CacheObject {
                                info: CacheObjectInfo::HashDelta { base_hash },
                                offset: record_offset,
                                crc32: 0,
                                data_decompressed: delta_data,
                                mem_recorder: None,
                                is_delta_in_pack: false,
                            },
                        );
                    }
                }
                other => {
                    return Err(GitError::InvalidPackFile(format!(
                        "unknown pack object type {other}"
                    )));
                }
            }
        }

        if !waitlist.map_offset.is_empty() || !waitlist.map_ref.is_empty() {
            return Err(GitError::UnCompletedPackObject(format!(
                "{} delta object(s) never found their base",
                waitlist.map_offset.len() + waitlist.map_ref.len()
            )));
        }

        let computed_signature = wrapper.final_hash();
        let trailer = read_bytes(&mut wrapper, get_hash_kind().size())?;
        let trailer_hash = ObjectHash::from_bytes(&trailer).map_err(GitError::InvalidHashValue)?;
        if trailer_hash != computed_signature {
            return Err(GitError::InvalidPackFile(format!(
                "pack checksum mismatch: header says {trailer_hash}, computed {computed_signature}"
            )));
        }
        self.signature = trailer_hash;

        Ok(())
    }
}

/// Drain any deltas waiting on `(offset, hash)` and apply them, recursively unlocking whatever
/// they in turn unblock.
#[allow(clippy::too_many_arguments)]
fn resolve_pending(
    waitlist: &Waitlist,
    offset: usize,
    hash: ObjectHash,
    obj_type: ObjectType,
    data: Vec<u8>,
    resolved_by_offset: &mut HashMap<usize, ResolvedBase>,
    offset_by_hash: &mut HashMap<ObjectHash, usize>,
    callback: &mut impl FnMut(Entry, usize),
) -> Result<(), GitError> {
    let mut pending: VecDeque<(usize, ObjectHash, ObjectType, Vec<u8>)> = VecDeque::new();
    pending.push_back((offset, hash, obj_type, data));

    while let Some((base_offset, base_hash, base_type, base_data)) = pending.pop_front() {
        for waiter in waitlist.take(base_offset, base_hash) {
            let data = apply_delta(&base_data, &waiter.data_decompressed)
                .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
            let hash = ObjectHash::from_type_and_data(base_type, &data);
            resolved_by_offset.insert(
                waiter.offset,
                ResolvedBase {
                    obj_type: base_type,
                    data: data.clone(),
                },
            );
            offset_by_hash.insert(hash, waiter.offset);
            callback(
                Entry {
                    obj_type: base_type,
                    data: data.clone(),
                    hash,
                    chain_len: 1,
                },
                waiter.offset,
            );
            pending.push_back((waiter.offset, hash, base_type, data));
        }
    }

    Ok(())
}

/// Decode the variable-length type+size header at the start of a pack record: the top bit of
/// each byte signals continuation, the first byte's bits 4-6 carry the 3-bit object type.
fn read_type_and_size(reader: &mut impl Read) -> Result<(u8, usize), GitError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let obj_type = (byte[0] >> 4) & 0x07;
    let mut size = (byte[0] & 0x0f) as usize;
    let mut shift = 4;

    while byte[0] & 0x80 != 0 {
        reader.read_exact(&mut byte)?;
        size |= ((byte[0] & 0x7f) as usize) << shift;
        shift += 7;
    }

    Ok((obj_type, size))
}

/// Decode an `ofs-delta` base reference: a variable-length *negative* offset, per
/// `val = byte & 0x7f; while msb set { val = ((val+1) << 7) | (next & 0x7f) }`.
fn read_ofs_delta_offset(reader: &mut impl Read) -> Result<usize, GitError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let mut value = (byte[0] & 0x7f) as u64;

    while byte[0] & 0x80 != 0 {
        reader.read_exact(&mut byte)?;
        value = ((value + 1) << 7) | (byte[0] & 0x7f) as u64;
    }

    Ok(value as usize)
}

/// Inflate exactly `size` bytes of zlib-compressed payload.
fn inflate_exact<R: BufRead>(reader: &mut R, size: usize) -> Result<Vec<u8>, GitError> {
    let mut rb = ReadBoxed::new_for_delta(reader);
    let mut buf = Vec::with_capacity(size);
    rb.read_to_end(&mut buf)?;
    if buf.len() != size {
        return Err(GitError::InvalidPackFile(format!(
            "expected {} decompressed bytes, got {}",
            size,
            buf.len()
        )));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::blob::Blob;
    use crate::internal::pack::encode::PackEncoder;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_decode_single_blob_pack() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content("hello pack");
        let entry = Entry::from(blob.clone());

        let (pack_tx, mut pack_rx) = mpsc::channel(16);
        let (entry_tx, entry_rx) = mpsc::channel(16);
        let mut encoder = PackEncoder::new(1, 10, pack_tx);
        entry_tx.send(entry).await.unwrap();
        drop(entry_tx);
        encoder.encode(entry_rx).await.unwrap();

        let mut bytes = Vec::new();
        while let Some(chunk) = pack_rx.recv().await {
            bytes.extend(chunk);
        }

        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = Cursor::new(bytes);
        let mut seen = Vec::new();
        pack.decode(&mut cursor, |entry, _offset| seen.push(entry))
            .unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].hash, blob.id);
        assert_eq!(seen[0].data, blob.data);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = Cursor::new(b"NOPE0000".to_vec());
        assert!(pack.decode(&mut cursor, |_, _| {}).is_err());
    }
}
