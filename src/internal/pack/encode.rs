//! Streams [`Entry`] values into a packfile byte stream, opportunistically ofs-delta-encoding
//! each entry against a recent window of same-typed entries when that is smaller than storing
//! it whole.

use std::collections::VecDeque;
use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};
use tokio::sync::mpsc;

use crate::delta::encode_delta;
use crate::errors::GitError;
use crate::internal::object::types::ObjectType;
use crate::internal::pack::entry::Entry;
use crate::utils::HashAlgorithm;

const PACK_VERSION: u32 = 2;

/// Encodes a stream of objects into a single packfile, writing output chunks to `pack_tx` as
/// they become available so the caller can forward them without buffering the whole pack.
pub struct PackEncoder {
    total_count: usize,
    window_size: usize,
    pack_tx: mpsc::Sender<Vec<u8>>,
}

impl PackEncoder {
    pub fn new(total_count: usize, window_size: usize, pack_tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            total_count,
            window_size,
            pack_tx,
        }
    }

    /// Drain `entry_rx` and write the resulting pack to `pack_tx`. Accepts anything convertible
    /// into an [`Entry`], so callers that thread pack-building metadata through the channel
    /// (see [`crate::internal::metadata::MetaAttached`]) don't need to strip it first.
    pub async fn encode<T: Into<Entry>>(
        &mut self,
        mut entry_rx: mpsc::Receiver<T>,
    ) -> Result<(), GitError> {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(b"PACK");
        header.extend_from_slice(&PACK_VERSION.to_be_bytes());
        header.extend_from_slice(&(self.total_count as u32).to_be_bytes());

        let mut running_hash = HashAlgorithm::new();
        running_hash.update(&header);
        self.send(header).await?;

        let mut offset = 12usize;
        let mut window: VecDeque<(usize, ObjectType, Vec<u8>)> = VecDeque::new();

        while let Some(item) = entry_rx.recv().await {
            let entry: Entry = item.into();

            let best_delta = if self.window_size > 0 {
                window
                    .iter()
                    .filter(|(_, obj_type, _)| *obj_type == entry.obj_type)
                    .map(|(base_offset, _, base_data)| (*base_offset, encode_delta(base_data, &entry.data)))
                    .filter(|(_, delta)| delta.len() < entry.data.len())
                    .min_by_key(|(_, delta)| delta.len())
            } else {
                None
            };

            let record_offset = offset;
            let record = match best_delta {
                Some((base_offset, delta_bytes)) => {
                    build_ofs_delta_record(record_offset, base_offset, &delta_bytes)?
                }
                None => build_base_record(entry.obj_type, &entry.data)?,
            };

            running_hash.update(&record);
            offset += record.len();
            self.send(record).await?;

            if self.window_size > 0 {
                if window.len() == self.window_size {
                    window.pop_front();
                }
                window.push_back((record_offset, entry.obj_type, entry.data));
            }
        }

        let trailer = running_hash.finalize();
        self.send(trailer).await?;

        Ok(())
    }

    async fn send(&self, chunk: Vec<u8>) -> Result<(), GitError> {
        self.pack_tx
            .send(chunk)
            .await
            .map_err(|_| GitError::PackEncodeError("pack output receiver dropped".to_string()))
    }
}

/// Encode the variable-length type+size header git uses for each pack record: the first byte's
/// bits 4-6 are the 3-bit type, bit 7 and onward continues a little-endian 7-bit size.
fn encode_type_and_size(type_bits: u8, size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = size >> 4;
    let mut first = (type_bits << 4) | ((size & 0x0f) as u8);
    if rest != 0 {
        first |= 0x80;
    }
    out.push(first);

    while rest != 0 {
        let mut byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

/// Inverse of the decoder's ofs-delta offset reader: `val = byte & 0x7f; while msb set { val =
/// ((val+1)<<7)|(next&0x7f) }`.
fn encode_ofs_delta_offset(ofs: usize) -> Vec<u8> {
    let mut bytes = vec![(ofs & 0x7f) as u8];
    let mut cur = ofs >> 7;
    while cur != 0 {
        cur -= 1;
        bytes.push(0x80 | (cur & 0x7f) as u8);
        cur >>= 7;
    }
    bytes.reverse();
    bytes
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish().map_err(GitError::from)
}

fn build_base_record(obj_type: ObjectType, data: &[u8]) -> Result<Vec<u8>, GitError> {
    let type_bits = obj_type.to_pack_type_u8()?;
    let mut record = encode_type_and_size(type_bits, data.len());
    record.extend(zlib_compress(data)?);
    Ok(record)
}

fn build_ofs_delta_record(
    record_offset: usize,
    base_offset: usize,
    delta: &[u8],
) -> Result<Vec<u8>, GitError> {
    let mut record = encode_type_and_size(6, delta.len());
    record.extend(encode_ofs_delta_offset(record_offset - base_offset));
    record.extend(zlib_compress(delta)?);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::blob::Blob;

    #[test]
    fn test_type_and_size_roundtrip_small() {
        let header = encode_type_and_size(3, 10);
        assert_eq!(header, vec![(3 << 4) | 10]);
    }

    #[test]
    fn test_type_and_size_roundtrip_large() {
        let header = encode_type_and_size(2, 300);
        // 300 = 0b1_0010_1100; low 4 bits = 0b1100 go in byte0, rest continues.
        assert_eq!(header.len(), 2);
        assert_eq!(header[0] & 0x80, 0x80);
    }

    #[test]
    fn test_ofs_delta_offset_roundtrip() {
        for ofs in [1usize, 127, 128, 200, 16384, 2_097_151] {
            let encoded = encode_ofs_delta_offset(ofs);
            // Decode using the same algorithm the pack decoder uses.
            let mut value = (encoded[0] & 0x7f) as u64;
            for &byte in &encoded[1..] {
                value = ((value + 1) << 7) | (byte & 0x7f) as u64;
            }
            assert_eq!(value as usize, ofs);
        }
    }

    #[tokio::test]
    async fn test_encode_emits_header_and_trailer() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content("encoder test");
        let entry = Entry::from(blob);

        let (pack_tx, mut pack_rx) = tokio::sync::mpsc::channel(8);
        let (entry_tx, entry_rx) = tokio::sync::mpsc::channel(8);
        entry_tx.send(entry).await.unwrap();
        drop(entry_tx);

        let mut encoder = PackEncoder::new(1, 10, pack_tx);
        encoder.encode(entry_rx).await.unwrap();

        let mut bytes = Vec::new();
        while let Some(chunk) = pack_rx.recv().await {
            bytes.extend(chunk);
        }

        assert_eq!(&bytes[0..4], b"PACK");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()), 1);
        // header + at least one record + a SHA-1 trailer
        assert!(bytes.len() > 12 + 20);
    }
}
