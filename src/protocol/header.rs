//! Header block encoding
//!
//! The header block is a fixed size slot inside every frame. It starts
//! with an entry count byte followed by each entry as
//! `[nameByteLen][nameCharLen][name][typeTag][value]`. Numeric values are
//! fixed width big-endian, strings carry an extra `[byteLen][charLen]`
//! prefix. Char lengths count UTF-16 code units.

use bytes::{BufMut, BytesMut};

use super::{CodecError, CodecResult, DEFAULT_HEADER_SIZE};

/// A typed header value. The set of variants is closed on purpose, so an
/// unsupported value type cannot be constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl HeaderValue {
    /// Wire type tag
    pub fn tag(&self) -> u8 {
        match self {
            HeaderValue::Bool(_) => 1,
            HeaderValue::Byte(_) => 2,
            HeaderValue::I16(_) => 3,
            HeaderValue::U16(_) => 4,
            HeaderValue::I32(_) => 5,
            HeaderValue::U32(_) => 6,
            HeaderValue::I64(_) => 7,
            HeaderValue::U64(_) => 8,
            HeaderValue::F32(_) => 9,
            HeaderValue::F64(_) => 10,
            HeaderValue::Str(_) => 20,
        }
    }

    /// Number of bytes the value occupies after its type tag
    pub fn encoded_len(&self) -> usize {
        match self {
            HeaderValue::Bool(_) | HeaderValue::Byte(_) => 1,
            HeaderValue::I16(_) | HeaderValue::U16(_) => 2,
            HeaderValue::I32(_) | HeaderValue::U32(_) | HeaderValue::F32(_) => 4,
            HeaderValue::I64(_) | HeaderValue::U64(_) | HeaderValue::F64(_) => 8,
            HeaderValue::Str(s) => 2 + s.len(),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            HeaderValue::I32(v) => Some(*v),
            HeaderValue::I16(v) => Some(i32::from(*v)),
            HeaderValue::U16(v) => Some(i32::from(*v)),
            HeaderValue::Byte(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        match self {
            HeaderValue::Bool(v) => buf.put_u8(u8::from(*v)),
            HeaderValue::Byte(v) => buf.put_u8(*v),
            HeaderValue::I16(v) => buf.put_i16(*v),
            HeaderValue::U16(v) => buf.put_u16(*v),
            HeaderValue::I32(v) => buf.put_i32(*v),
            HeaderValue::U32(v) => buf.put_u32(*v),
            HeaderValue::I64(v) => buf.put_i64(*v),
            HeaderValue::U64(v) => buf.put_u64(*v),
            HeaderValue::F32(v) => buf.put_f32(*v),
            HeaderValue::F64(v) => buf.put_f64(*v),
            HeaderValue::Str(s) => {
                buf.put_u8(s.len() as u8);
                buf.put_u8(s.encode_utf16().count() as u8);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    fn read(tag: u8, cursor: &mut &[u8]) -> CodecResult<Self> {
        let value = match tag {
            1 => HeaderValue::Bool(take::<1>(cursor)?[0] != 0),
            2 => HeaderValue::Byte(take::<1>(cursor)?[0]),
            3 => HeaderValue::I16(i16::from_be_bytes(take(cursor)?)),
            4 => HeaderValue::U16(u16::from_be_bytes(take(cursor)?)),
            5 => HeaderValue::I32(i32::from_be_bytes(take(cursor)?)),
            6 => HeaderValue::U32(u32::from_be_bytes(take(cursor)?)),
            7 => HeaderValue::I64(i64::from_be_bytes(take(cursor)?)),
            8 => HeaderValue::U64(u64::from_be_bytes(take(cursor)?)),
            9 => HeaderValue::F32(f32::from_be_bytes(take(cursor)?)),
            10 => HeaderValue::F64(f64::from_be_bytes(take(cursor)?)),
            20 => {
                let [byte_len, _char_len] = take::<2>(cursor)?;
                HeaderValue::Str(read_utf8(cursor, byte_len as usize)?)
            }
            other => return Err(CodecError::UnknownValueTag(other)),
        };
        Ok(value)
    }
}

macro_rules! header_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HeaderValue {
                fn from(v: $ty) -> Self {
                    HeaderValue::$variant(v)
                }
            }
        )*
    };
}

header_value_from!(
    bool => Bool,
    u8 => Byte,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
);

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_string())
    }
}

/// A named header value
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderEntry {
    pub name: String,
    pub value: HeaderValue,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<HeaderValue>) -> CodecResult<Self> {
        let entry = Self {
            name: name.into(),
            value: value.into(),
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Bytes taken by this entry inside the header block
    pub fn encoded_len(&self) -> usize {
        2 + self.name.len() + 1 + self.value.encoded_len()
    }

    fn validate(&self) -> CodecResult<()> {
        if self.name.contains(':') {
            return Err(CodecError::InvalidHeaderName(self.name.clone()));
        }
        if self.name.len() > u8::MAX as usize {
            return Err(CodecError::InvalidHeaderName(self.name.clone()));
        }
        if let HeaderValue::Str(s) = &self.value {
            if s.len() > u8::MAX as usize {
                return Err(CodecError::HeaderValueTooLong(s.len()));
            }
        }
        Ok(())
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.name.len() as u8);
        buf.put_u8(self.name.encode_utf16().count() as u8);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(self.value.tag());
        self.value.write(buf);
    }
}

/// Ordered header entries bounded by the size of the header block
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    entries: Vec<HeaderEntry>,
    capacity: usize,
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Header {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HEADER_SIZE)
    }

    /// Create an empty header for a block of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Size of the header block this header encodes into
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes used inside the block, including the count byte
    pub fn encoded_len(&self) -> usize {
        1 + self.entries.iter().map(HeaderEntry::encoded_len).sum::<usize>()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// Append an entry. Fails without modifying the header when the entry
    /// would not fit into the block.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> CodecResult<()> {
        let entry = HeaderEntry::new(name, value)?;
        self.push_entry(entry)
    }

    pub fn push_entry(&mut self, entry: HeaderEntry) -> CodecResult<()> {
        entry.validate()?;
        let needed = self.encoded_len() + entry.encoded_len();
        if needed > self.capacity || self.entries.len() >= u8::MAX as usize {
            return Err(CodecError::HeaderOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Replace the value of an existing entry or append a new one
    pub fn set(&mut self, entry: HeaderEntry) -> CodecResult<()> {
        entry.validate()?;
        match self.entries.iter().position(|e| e.name == entry.name) {
            Some(idx) => {
                let needed = self.encoded_len() - self.entries[idx].encoded_len() + entry.encoded_len();
                if needed > self.capacity {
                    return Err(CodecError::HeaderOverflow {
                        needed,
                        capacity: self.capacity,
                    });
                }
                self.entries[idx] = entry;
                Ok(())
            }
            None => self.push_entry(entry),
        }
    }

    /// Write exactly `capacity` bytes, zero padded
    pub fn write_block(&self, buf: &mut BytesMut) {
        self.write_padded(buf, self.capacity);
    }

    /// Write the entries and pad with zeros up to `size` bytes. The caller
    /// guarantees `encoded_len() <= size`.
    pub fn write_padded(&self, buf: &mut BytesMut, size: usize) {
        let start = buf.len();
        buf.put_u8(self.entries.len() as u8);
        for entry in &self.entries {
            entry.write(buf);
        }
        let written = buf.len() - start;
        buf.put_bytes(0, size.saturating_sub(written));
    }

    /// Parse a header block. The block length becomes the capacity.
    pub fn read_block(block: &[u8]) -> CodecResult<Self> {
        let mut cursor = block;
        let [count] = take::<1>(&mut cursor)?;
        let mut entries = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let [name_len, _name_chars] = take::<2>(&mut cursor)?;
            let name = read_utf8(&mut cursor, name_len as usize)?;
            let [tag] = take::<1>(&mut cursor)?;
            let value = HeaderValue::read(tag, &mut cursor)?;
            entries.push(HeaderEntry { name, value });
        }

        Ok(Self {
            entries,
            capacity: block.len(),
        })
    }
}

fn take<const N: usize>(cursor: &mut &[u8]) -> CodecResult<[u8; N]> {
    if cursor.len() < N {
        return Err(CodecError::MalformedHeader(format!(
            "expected {} more bytes, {} left",
            N,
            cursor.len()
        )));
    }
    let (head, rest) = cursor.split_at(N);
    *cursor = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn read_utf8(cursor: &mut &[u8], len: usize) -> CodecResult<String> {
    if cursor.len() < len {
        return Err(CodecError::MalformedHeader(format!(
            "string of {} bytes runs past the header block",
            len
        )));
    }
    let (head, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(String::from_utf8(head.to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(header: &Header) -> Header {
        let mut buf = BytesMut::new();
        header.write_block(&mut buf);
        assert_eq!(buf.len(), header.capacity());
        Header::read_block(&buf).unwrap()
    }

    #[test]
    fn test_all_value_types_roundtrip() {
        let mut header = Header::with_capacity(256);
        header.push("b", true).unwrap();
        header.push("u8", 7u8).unwrap();
        header.push("i16", -300i16).unwrap();
        header.push("u16", 60000u16).unwrap();
        header.push("i32", -70000i32).unwrap();
        header.push("u32", 4_000_000_000u32).unwrap();
        header.push("i64", -5_000_000_000i64).unwrap();
        header.push("u64", u64::MAX).unwrap();
        header.push("f32", 1.5f32).unwrap();
        header.push("f64", -2.25f64).unwrap();
        header.push("s", "héllo").unwrap();

        let decoded = roundtrip(&header);
        assert_eq!(decoded, header);
        assert_eq!(decoded.get("s").and_then(HeaderValue::as_str), Some("héllo"));
    }

    #[test]
    fn test_numbers_are_big_endian() {
        let mut header = Header::new();
        header.push("ver", 1i32).unwrap();

        let mut buf = BytesMut::new();
        header.write_block(&mut buf);
        // count, name len, name chars, "ver", tag, value
        assert_eq!(&buf[..10], &[1, 3, 3, b'v', b'e', b'r', 5, 0, 0, 0]);
        assert_eq!(buf[10], 1);
    }

    #[test]
    fn test_name_with_colon_rejected() {
        let mut header = Header::new();
        let err = header.push("a:b", 1i32).unwrap_err();
        assert!(matches!(err, CodecError::InvalidHeaderName(_)));
        assert!(header.is_empty());
    }

    #[test]
    fn test_overflow_is_rejected_without_corruption() {
        let mut header = Header::new();
        let value = "x".repeat(100);
        header.push("first", value.as_str()).unwrap();

        let before = header.clone();
        let err = header.push("second", value.as_str()).unwrap_err();
        assert!(matches!(err, CodecError::HeaderOverflow { capacity: 128, .. }));
        assert_eq!(header, before);
        assert!(header.encoded_len() <= header.capacity());

        let decoded = roundtrip(&header);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn test_set_replaces_existing_entry() {
        let mut header = Header::new();
        header.push("ver", 1i32).unwrap();
        header.set(HeaderEntry::new("ver", 2i32).unwrap()).unwrap();
        header.set(HeaderEntry::new("room", "lobby").unwrap()).unwrap();

        assert_eq!(header.len(), 2);
        assert_eq!(header.get("ver").and_then(HeaderValue::as_i32), Some(2));
    }

    #[test]
    fn test_unknown_tag_is_error() {
        let block = [1u8, 1, 1, b'x', 11, 0, 0, 0, 0];
        let err = Header::read_block(&block).unwrap_err();
        assert!(matches!(err, CodecError::UnknownValueTag(11)));
    }

    #[test]
    fn test_truncated_block_is_error() {
        let block = [2u8, 1, 1, b'x', 5, 0, 0];
        assert!(matches!(
            Header::read_block(&block),
            Err(CodecError::MalformedHeader(_))
        ));
    }
}
