//! Order-preserving encoding of structured index keys.
//!
//! Each field is encoded with a leading type tag so that the byte
//! lexicographic order of encodings matches the field order, and encodings
//! of different types sort by tag. Descending fields complement every byte
//! of the field encoding; the decoder consults the ordering to undo it.
//!
//! The encoder also emits "type bits", one tag byte per field, which the
//! decoder takes as the authoritative field types. Stores keep the type
//! bits as the trie value next to the encoded key.

use byteorder::{BigEndian, ByteOrder};

use super::{Datum, Direction, KeyOrdering};
use crate::error::{Error, Result};

// Type tags, ordered: these determine cross-type ordering.
const TYPE_BOOLEAN: u8 = 0x01;
const TYPE_INTEGER: u8 = 0x02;
const TYPE_FLOAT: u8 = 0x03;
const TYPE_STRING: u8 = 0x04;
const TYPE_BYTES: u8 = 0x05;

/// Sorts strictly before every encodable key (tags start at 0x01).
pub const MIN_KEY_SENTINEL: &[u8] = &[0x00];

/// Sorts strictly after every encodable key (tags end at 0x05).
pub const MAX_KEY_SENTINEL: &[u8] = &[0xff];

/// Width of an encoded row id.
pub const ROWID_LEN: usize = 8;

/// Encodes a row id so that byte order matches numeric order across the
/// whole i64 range. The sign bit is flipped so negatives sort first.
pub fn encode_rowid(id: i64) -> [u8; ROWID_LEN] {
    let mut buf = [0u8; ROWID_LEN];
    BigEndian::write_u64(&mut buf, (id as u64) ^ (1 << 63));
    buf
}

/// Decodes an 8-byte row id encoded by [`encode_rowid`].
pub fn decode_rowid(bytes: &[u8]) -> Result<i64> {
    if bytes.len() != ROWID_LEN {
        return Err(Error::Internal(format!("row id must be {ROWID_LEN} bytes")));
    }
    Ok((BigEndian::read_u64(bytes) ^ (1 << 63)) as i64)
}

/// Decodes the row id stored in the trailing 8 bytes of an entry key.
pub fn decode_rowid_at_end(bytes: &[u8]) -> Result<i64> {
    if bytes.len() < ROWID_LEN {
        return Err(Error::Internal("entry key too short for trailing row id".to_string()));
    }
    decode_rowid(&bytes[bytes.len() - ROWID_LEN..])
}

/// Length of an entry key before its trailing row id.
pub fn size_without_rowid(bytes: &[u8]) -> usize {
    bytes.len().saturating_sub(ROWID_LEN)
}

/// Encodes a structured key under the given ordering. Returns the encoded
/// bytes and the type bits needed to decode them.
pub fn encode_index_key(key: &[Datum], ordering: &KeyOrdering) -> (Vec<u8>, Vec<u8>) {
    let mut encoded = Vec::new();
    let mut type_bits = Vec::with_capacity(key.len());
    for (i, datum) in key.iter().enumerate() {
        let start = encoded.len();
        type_bits.push(encode_field(&mut encoded, datum));
        if ordering.direction(i) == Direction::Descending {
            for b in &mut encoded[start..] {
                *b = !*b;
            }
        }
    }
    (encoded, type_bits)
}

/// Decodes an encoded key back into its fields, using the type bits emitted
/// at encode time and the same ordering.
pub fn decode_index_key(
    encoded: &[u8],
    type_bits: &[u8],
    ordering: &KeyOrdering,
) -> Result<Vec<Datum>> {
    let mut key = Vec::with_capacity(type_bits.len());
    let mut pos = 0;
    for (i, &tag) in type_bits.iter().enumerate() {
        let mask = match ordering.direction(i) {
            Direction::Ascending => 0x00,
            Direction::Descending => 0xff,
        };
        key.push(decode_field(encoded, &mut pos, tag, mask)?);
    }
    if pos != encoded.len() {
        return Err(Error::Internal("trailing bytes after decoded key".to_string()));
    }
    Ok(key)
}

/// Appends one field's ascending encoding and returns its type tag.
fn encode_field(out: &mut Vec<u8>, datum: &Datum) -> u8 {
    match datum {
        Datum::Bool(b) => {
            out.push(TYPE_BOOLEAN);
            out.push(if *b { 0x01 } else { 0x00 });
            TYPE_BOOLEAN
        }
        Datum::Int(i) => {
            // Flip the sign bit so negative numbers sort before positive.
            out.push(TYPE_INTEGER);
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, (*i as u64) ^ (1 << 63));
            out.extend_from_slice(&buf);
            TYPE_INTEGER
        }
        Datum::Float(f) => {
            // IEEE 754 ordering: flip all bits if negative, else only the
            // sign bit.
            let bits = f.to_bits();
            let ordered = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
            out.push(TYPE_FLOAT);
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, ordered);
            out.extend_from_slice(&buf);
            TYPE_FLOAT
        }
        Datum::String(s) => {
            out.push(TYPE_STRING);
            encode_escaped(out, s.as_bytes());
            TYPE_STRING
        }
        Datum::Bytes(b) => {
            out.push(TYPE_BYTES);
            encode_escaped(out, b);
            TYPE_BYTES
        }
    }
}

/// Appends bytes with 0x00 escaped as 0x00 0xff and a 0x00 0x00 terminator,
/// so variable-length fields compose without breaking lexicographic order.
fn encode_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == 0x00 {
            out.extend_from_slice(&[0x00, 0xff]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

/// Decodes one field at `pos`, advancing it. `mask` is xor-applied to every
/// byte read, which undoes descending-field complementing.
fn decode_field(encoded: &[u8], pos: &mut usize, tag: u8, mask: u8) -> Result<Datum> {
    let read = |i: usize| -> Result<u8> {
        encoded
            .get(i)
            .map(|b| b ^ mask)
            .ok_or_else(|| Error::Internal("truncated encoded key".to_string()))
    };

    if read(*pos)? != tag {
        return Err(Error::Internal("encoded key does not match type bits".to_string()));
    }
    *pos += 1;

    match tag {
        TYPE_BOOLEAN => {
            let b = read(*pos)?;
            *pos += 1;
            match b {
                0x00 => Ok(Datum::Bool(false)),
                0x01 => Ok(Datum::Bool(true)),
                _ => Err(Error::Internal("invalid boolean encoding".to_string())),
            }
        }
        TYPE_INTEGER => {
            let mut buf = [0u8; 8];
            for (j, slot) in buf.iter_mut().enumerate() {
                *slot = read(*pos + j)?;
            }
            *pos += 8;
            Ok(Datum::Int((BigEndian::read_u64(&buf) ^ (1 << 63)) as i64))
        }
        TYPE_FLOAT => {
            let mut buf = [0u8; 8];
            for (j, slot) in buf.iter_mut().enumerate() {
                *slot = read(*pos + j)?;
            }
            *pos += 8;
            let ordered = BigEndian::read_u64(&buf);
            let bits = if ordered & (1 << 63) != 0 { ordered & !(1 << 63) } else { !ordered };
            Ok(Datum::Float(f64::from_bits(bits)))
        }
        TYPE_STRING => {
            let raw = decode_escaped(encoded, pos, mask)?;
            let s = String::from_utf8(raw)
                .map_err(|_| Error::Internal("invalid utf-8 in encoded string".to_string()))?;
            Ok(Datum::String(s))
        }
        TYPE_BYTES => Ok(Datum::Bytes(decode_escaped(encoded, pos, mask)?)),
        _ => Err(Error::Internal(format!("unknown key type tag {tag:#04x}"))),
    }
}

fn decode_escaped(encoded: &[u8], pos: &mut usize, mask: u8) -> Result<Vec<u8>> {
    let read = |i: usize| -> Result<u8> {
        encoded
            .get(i)
            .map(|b| b ^ mask)
            .ok_or_else(|| Error::Internal("truncated encoded key".to_string()))
    };

    let mut out = Vec::new();
    loop {
        let b = read(*pos)?;
        if b != 0x00 {
            out.push(b);
            *pos += 1;
            continue;
        }
        match read(*pos + 1)? {
            0xff => {
                out.push(0x00);
                *pos += 2;
            }
            0x00 => {
                *pos += 2;
                return Ok(out);
            }
            _ => return Err(Error::Internal("invalid escape in encoded key".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(datum: Datum) -> Vec<u8> {
        encode_index_key(&[datum], &KeyOrdering::ascending()).0
    }

    fn roundtrip(key: Vec<Datum>, ordering: &KeyOrdering) {
        let (encoded, type_bits) = encode_index_key(&key, ordering);
        let decoded = decode_index_key(&encoded, &type_bits, ordering).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn boolean_ordering() {
        assert!(encode_one(Datum::Bool(false)) < encode_one(Datum::Bool(true)));
        roundtrip(vec![Datum::Bool(false), Datum::Bool(true)], &KeyOrdering::ascending());
    }

    #[test]
    fn integer_ordering() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        let encoded: Vec<_> = values.iter().map(|v| encode_one(Datum::Int(*v))).collect();
        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i]);
        }
        for v in values {
            roundtrip(vec![Datum::Int(v)], &KeyOrdering::ascending());
        }
    }

    #[test]
    fn float_ordering() {
        let values = [-100.5, -1.0, 0.0, 1.0, 100.5];
        let encoded: Vec<_> = values.iter().map(|v| encode_one(Datum::Float(*v))).collect();
        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i]);
        }
        for v in values {
            roundtrip(vec![Datum::Float(v)], &KeyOrdering::ascending());
        }
    }

    #[test]
    fn string_ordering() {
        let values = ["", "a", "a\0b", "ab", "apple", "banana"];
        let encoded: Vec<_> =
            values.iter().map(|v| encode_one(Datum::String(v.to_string()))).collect();
        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i], "{:?} !< {:?}", values[i - 1], values[i]);
        }
        for v in values {
            roundtrip(vec![Datum::String(v.to_string())], &KeyOrdering::ascending());
        }
    }

    #[test]
    fn bytes_escaping() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x01, 0x02, 0x03],
            vec![0x00],
            vec![0x00, 0xff],
            vec![0xff, 0x00],
        ];
        for original in cases {
            roundtrip(vec![Datum::Bytes(original)], &KeyOrdering::ascending());
        }
    }

    #[test]
    fn mixed_type_ordering() {
        // bool < int < float < string < bytes, by tag.
        let encoded = [
            encode_one(Datum::Bool(true)),
            encode_one(Datum::Int(42)),
            encode_one(Datum::Float(2.5)),
            encode_one(Datum::String("hello".to_string())),
            encode_one(Datum::Bytes(vec![0x01, 0x02])),
        ];
        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i]);
        }
    }

    #[test]
    fn descending_inverts_order() {
        let desc = KeyOrdering::of(vec![Direction::Descending]);
        let (a, _) = encode_index_key(&[Datum::Int(1)], &desc);
        let (b, _) = encode_index_key(&[Datum::Int(2)], &desc);
        assert!(b < a);
        roundtrip(vec![Datum::Int(1)], &desc);
        roundtrip(vec![Datum::String("abc".to_string())], &desc);
    }

    #[test]
    fn compound_key_ordering_and_roundtrip() {
        let ordering = KeyOrdering::of(vec![Direction::Ascending, Direction::Descending]);
        let key = |s: &str, n: i64| vec![Datum::String(s.to_string()), Datum::Int(n)];
        let enc = |k: &[Datum]| encode_index_key(k, &ordering).0;

        // Same first field: second field descending.
        assert!(enc(&key("a", 2)) < enc(&key("a", 1)));
        // Different first field dominates.
        assert!(enc(&key("a", 1)) < enc(&key("b", 2)));

        roundtrip(key("hello", -7), &ordering);
    }

    #[test]
    fn sentinels_bound_all_keys() {
        let keys = [
            encode_one(Datum::Bool(false)),
            encode_one(Datum::Int(i64::MIN)),
            encode_one(Datum::String("".to_string())),
            encode_one(Datum::Bytes(vec![0xff; 16])),
        ];
        for k in &keys {
            assert!(MIN_KEY_SENTINEL < k.as_slice());
            assert!(MAX_KEY_SENTINEL > k.as_slice());
        }
    }

    #[test]
    fn rowid_ordering_and_roundtrip() {
        let ids = [i64::MIN, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<_> = ids.iter().map(|id| encode_rowid(*id)).collect();
        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i]);
        }
        for id in ids {
            assert_eq!(decode_rowid(&encode_rowid(id)).unwrap(), id);
        }
    }

    #[test]
    fn rowid_at_end() {
        let (mut key, _) =
            encode_index_key(&[Datum::String("x".to_string())], &KeyOrdering::ascending());
        let prefix_len = key.len();
        key.extend_from_slice(&encode_rowid(99));
        assert_eq!(decode_rowid_at_end(&key).unwrap(), 99);
        assert_eq!(size_without_rowid(&key), prefix_len);
    }
}
