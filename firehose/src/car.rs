//! Minimal CARv1 reader for the `blocks` field of firehose commits.
//!
//! A CAR file is `varint(len) header` followed by any number of
//! `varint(len) cid block` sections. The header is DAG-CBOR and only names the
//! roots, which collection never needs, so it is skipped.

use crate::commit::BlockMap;
use crate::error::CarError;

/// Multihash code for sha2-256, the only hash used by CIDv0.
const SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

/// Leading byte of a binary CID inside DAG-CBOR tag 42.
const MULTIBASE_IDENTITY: u8 = 0x00;

/// Reads an unsigned LEB128 varint starting at `offset`. Returns the value
/// and the offset just past it.
pub(crate) fn read_varint(bytes: &[u8], offset: usize) -> Result<(u64, usize), CarError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut pos = offset;
    loop {
        let Some(&byte) = bytes.get(pos) else {
            return Err(CarError::TruncatedVarint(offset));
        };
        pos += 1;
        if shift >= 64 {
            return Err(CarError::VarintOverflow(offset));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
        shift += 7;
    }
}

/// Length in bytes of the CID at the start of `bytes`.
fn cid_len(bytes: &[u8], section_offset: usize) -> Result<usize, CarError> {
    if bytes.len() >= 2 && bytes[0] == SHA2_256 && bytes[1] == SHA2_256_LEN {
        // CIDv0 is a bare sha2-256 multihash.
        return Ok(2 + usize::from(SHA2_256_LEN));
    }

    let (version, pos) = read_varint(bytes, 0)?;
    if version != 1 {
        return Err(CarError::UnsupportedCidVersion(version));
    }
    let (_codec, pos) = read_varint(bytes, pos)?;
    let (_hash_code, pos) = read_varint(bytes, pos)?;
    let (digest_len, pos) = read_varint(bytes, pos)?;
    let end = usize::try_from(digest_len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= bytes.len())
        .ok_or(CarError::TruncatedCid(section_offset))?;
    Ok(end)
}

/// Key under which a binary CID is stored in a [`BlockMap`].
pub fn cid_key(cid: &[u8]) -> String {
    let cid = match cid.first() {
        Some(&MULTIBASE_IDENTITY) => &cid[1..],
        _ => cid,
    };
    hex::encode(cid)
}

/// Splits a CARv1 byte string into its blocks.
pub fn read_blocks(bytes: &[u8]) -> Result<BlockMap, CarError> {
    let mut blocks = BlockMap::new();
    if bytes.is_empty() {
        return Ok(blocks);
    }

    let (header_len, pos) = read_varint(bytes, 0)?;
    let mut pos = section_end(bytes, pos, header_len)?;

    while pos < bytes.len() {
        let section_offset = pos;
        let (section_len, start) = read_varint(bytes, pos)?;
        let end = section_end(bytes, start, section_len)?;
        let section = &bytes[start..end];
        let cid_end = cid_len(section, section_offset)?;
        blocks.insert(cid_key(&section[..cid_end]), section[cid_end..].to_vec());
        pos = end;
    }

    Ok(blocks)
}

fn section_end(bytes: &[u8], start: usize, len: u64) -> Result<usize, CarError> {
    let available = bytes.len().saturating_sub(start);
    match usize::try_from(len) {
        Ok(len) if len <= available => Ok(start + len),
        _ => Err(CarError::SectionOverrun {
            offset: start,
            len: usize::try_from(len).unwrap_or(usize::MAX),
            available,
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn write_varint(mut value: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    /// A dag-cbor, sha2-256 CIDv1 whose digest is `seed` repeated.
    pub(crate) fn test_cid(seed: u8) -> Vec<u8> {
        let mut cid = vec![0x01, 0x71, SHA2_256, SHA2_256_LEN];
        cid.extend(std::iter::repeat_n(seed, usize::from(SHA2_256_LEN)));
        cid
    }

    pub(crate) fn build_car(blocks: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        // {"roots": [], "version": 1}
        let header = [
            0xa2, 0x65, b'r', b'o', b'o', b't', b's', 0x80, 0x67, b'v', b'e', b'r', b's', b'i',
            b'o', b'n', 0x01,
        ];
        let mut car = Vec::new();
        write_varint(header.len() as u64, &mut car);
        car.extend_from_slice(&header);
        for (cid, data) in blocks {
            write_varint((cid.len() + data.len()) as u64, &mut car);
            car.extend_from_slice(cid);
            car.extend_from_slice(data);
        }
        car
    }

    #[test]
    fn varint_round_trips_multi_byte_values() {
        let mut buf = Vec::new();
        write_varint(300, &mut buf);
        assert_eq!(buf, vec![0xac, 0x02]);
        assert_eq!(read_varint(&buf, 0), Ok((300, 2)));
    }

    #[test]
    fn truncated_varint_is_an_error() {
        assert_eq!(read_varint(&[0x80, 0x80], 0), Err(CarError::TruncatedVarint(0)));
    }

    #[test]
    fn reads_every_block_keyed_by_cid() {
        let car = build_car(&[
            (test_cid(1), b"first".to_vec()),
            (test_cid(2), b"second".to_vec()),
        ]);

        let blocks = read_blocks(&car).unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[&hex::encode(test_cid(1))], b"first".to_vec());
        assert_eq!(blocks[&hex::encode(test_cid(2))], b"second".to_vec());
    }

    #[test]
    fn cid_key_strips_multibase_prefix() {
        let mut tagged = vec![MULTIBASE_IDENTITY];
        tagged.extend(test_cid(7));
        assert_eq!(cid_key(&tagged), cid_key(&test_cid(7)));
    }

    #[test]
    fn cidv0_sections_are_supported() {
        let mut cid = vec![SHA2_256, SHA2_256_LEN];
        cid.extend([9u8; 32]);
        let car = build_car(&[(cid.clone(), b"legacy".to_vec())]);

        let blocks = read_blocks(&car).unwrap();

        assert_eq!(blocks[&hex::encode(&cid)], b"legacy".to_vec());
    }

    #[test]
    fn overrunning_section_is_rejected() {
        let mut car = build_car(&[(test_cid(1), b"data".to_vec())]);
        car.truncate(car.len() - 2);

        assert!(matches!(
            read_blocks(&car),
            Err(CarError::SectionOverrun { .. })
        ));
    }
}
