//! Protocol codec for framing packets
//!
//! Handles frame encoding, fragmentation of oversized payloads, stream
//! splitting and per-connection reassembly of continuation frames.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{
    ConnectionId, CoreCode, Header, Packet, DEFAULT_BUFFER_SIZE, DEFAULT_HEADER_SIZE,
    ENVELOPE_SIZE,
};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Header overflow: {needed} bytes needed (capacity: {capacity})")]
    HeaderOverflow { needed: usize, capacity: usize },

    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("Header string value too long: {0} bytes")]
    HeaderValueTooLong(usize),

    #[error("Unknown header value tag: {0}")]
    UnknownValueTag(u8),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Frame length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidFrameLength(usize),

    #[error("Invalid buffer size {buffer_size} for header block of {header_size} bytes")]
    InvalidBufferSize { buffer_size: usize, header_size: usize },

    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// A single frame after envelope and header decoding. The payload is kept
/// as raw bytes since a fragment may end inside a multi-byte character.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub code: i32,
    pub header: Header,
    pub payload: Bytes,
}

/// Encodes packets into frames and frames back into [`RawFrame`]s
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    buffer_size: usize,
    header_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            header_size: DEFAULT_HEADER_SIZE,
        }
    }
}

impl FrameCodec {
    pub fn new(buffer_size: usize, header_size: usize) -> CodecResult<Self> {
        if header_size == 0 || buffer_size <= ENVELOPE_SIZE + header_size {
            return Err(CodecError::InvalidBufferSize {
                buffer_size,
                header_size,
            });
        }
        Ok(Self {
            buffer_size,
            header_size,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Largest payload carried by a single frame
    pub fn max_payload(&self) -> usize {
        self.buffer_size - ENVELOPE_SIZE - self.header_size
    }

    /// Encode a packet into one or more frames. Every frame but the last
    /// carries [`CoreCode::LongData`] and the real header.
    pub fn encode(&self, packet: &Packet) -> CodecResult<Vec<Bytes>> {
        if packet.header.encoded_len() > self.header_size {
            return Err(CodecError::HeaderOverflow {
                needed: packet.header.encoded_len(),
                capacity: self.header_size,
            });
        }

        let payload = packet.payload.as_bytes();
        if payload.len() <= self.max_payload() {
            return Ok(vec![self.encode_frame(packet.code, &packet.header, payload)]);
        }

        let chunks: Vec<&[u8]> = payload.chunks(self.max_payload()).collect();
        let last = chunks.len() - 1;
        let frames = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let code = if i == last {
                    packet.code
                } else {
                    CoreCode::LongData.code()
                };
                self.encode_frame(code, &packet.header, chunk)
            })
            .collect();
        Ok(frames)
    }

    fn encode_frame(&self, code: i32, header: &Header, payload: &[u8]) -> Bytes {
        let body_len = 4 + self.header_size + payload.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32(body_len as u32);
        buf.put_i32(code);

        header.write_padded(&mut buf, self.header_size);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decode one whole frame, length prefix included
    pub fn decode(&self, frame: &[u8]) -> CodecResult<RawFrame> {
        let min = ENVELOPE_SIZE + self.header_size;
        if frame.len() < min {
            return Err(CodecError::FrameTooShort(frame.len()));
        }
        if frame.len() > self.buffer_size {
            return Err(CodecError::FrameTooLarge(frame.len(), self.buffer_size));
        }

        let mut cursor = frame;
        let declared = cursor.get_u32() as usize;
        if declared != frame.len() - 4 {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: frame.len() - 4,
            });
        }
        let code = cursor.get_i32();
        let header = Header::read_block(&cursor[..self.header_size])?;
        let payload = Bytes::copy_from_slice(&cursor[self.header_size..]);

        Ok(RawFrame {
            code,
            header,
            payload,
        })
    }
}

/// Splits a byte stream into whole frames using the length prefix
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    codec: FrameCodec,
}

impl FrameReader {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            buf: BytesMut::with_capacity(codec.buffer_size()),
            codec,
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame. On an impossible length prefix the
    /// buffered bytes are discarded so the stream can resynchronize.
    pub fn next_frame(&mut self) -> CodecResult<Option<Bytes>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        let min = 4 + self.codec.header_size();
        let max = self.codec.buffer_size() - 4;
        if declared < min || declared > max {
            self.buf.clear();
            return Err(CodecError::InvalidFrameLength(declared));
        }

        if self.buf.len() < declared + 4 {
            return Ok(None);
        }
        Ok(Some(self.buf.split_to(declared + 4).freeze()))
    }
}

/// Rebuilds fragmented payloads, keyed by source connection
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<ConnectionId, BytesMut>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. Returns the complete packet once a non-continuation
    /// frame arrives.
    pub fn push(&mut self, source: ConnectionId, frame: RawFrame) -> CodecResult<Option<Packet>> {
        if frame.code == CoreCode::LongData.code() {
            self.pending
                .entry(source)
                .or_default()
                .extend_from_slice(&frame.payload);
            return Ok(None);
        }

        let bytes = match self.pending.remove(&source) {
            Some(mut buffered) => {
                buffered.extend_from_slice(&frame.payload);
                buffered.to_vec()
            }
            None => frame.payload.to_vec(),
        };
        let payload = String::from_utf8(bytes)?;

        Ok(Some(Packet {
            code: frame.code,
            payload,
            header: frame.header,
            source: Some(source),
        }))
    }

    /// Drop any partial payload buffered for a source
    pub fn drop_source(&mut self, source: ConnectionId) {
        self.pending.remove(&source);
    }

    pub fn in_flight(&self, source: ConnectionId) -> bool {
        self.pending.contains_key(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        let mut header = Header::new();
        header.push("ver", 1i32).unwrap();
        header
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = FrameCodec::default();
        let packet = Packet::new(17, "Int32:4", header());

        let frames = codec.encode(&packet).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 8 + 128 + 7);

        let raw = codec.decode(&frames[0]).unwrap();
        assert_eq!(raw.code, 17);
        assert_eq!(raw.header, packet.header);

        let mut reassembler = Reassembler::new();
        let decoded = reassembler.push(ConnectionId(1), raw).unwrap().unwrap();
        assert_eq!(decoded.payload, "Int32:4");
        assert_eq!(decoded.source, Some(ConnectionId(1)));
    }

    #[test]
    fn test_empty_payload_is_one_frame() {
        let codec = FrameCodec::default();
        let frames = codec.encode(&Packet::new(CoreCode::NewClientConnected, "", header())).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 8 + 128);
    }

    #[test]
    fn test_fragmentation_into_three_frames() {
        let codec = FrameCodec::default();
        let max = codec.max_payload();
        assert_eq!(max, 8192 - 8 - 128);

        let payload: String = (0..max * 2 + 37)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let packet = Packet::new(99, payload.clone(), header());

        let frames = codec.encode(&packet).unwrap();
        assert_eq!(frames.len(), 3);

        let mut reassembler = Reassembler::new();
        let source = ConnectionId(7);
        let mut result = None;
        for (i, frame) in frames.iter().enumerate() {
            let raw = codec.decode(frame).unwrap();
            if i < 2 {
                assert_eq!(raw.code, CoreCode::LongData.code());
                assert_eq!(raw.header, packet.header);
            } else {
                assert_eq!(raw.code, 99);
            }
            result = reassembler.push(source, raw).unwrap();
        }

        let decoded = result.unwrap();
        assert_eq!(decoded.payload, payload);
        assert!(!reassembler.in_flight(source));
    }

    #[test]
    fn test_fragment_boundary_inside_multibyte_char() {
        let codec = FrameCodec::new(8 + 128 + 5, 128).unwrap();
        let payload = "ééééé";
        let frames = codec.encode(&Packet::new(5, payload, header())).unwrap();
        assert_eq!(frames.len(), 2);

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for frame in &frames {
            out = reassembler.push(ConnectionId(1), codec.decode(frame).unwrap()).unwrap();
        }
        assert_eq!(out.unwrap().payload, payload);
    }

    #[test]
    fn test_reassembly_is_per_source() {
        let codec = FrameCodec::new(8 + 128 + 4, 128).unwrap();
        let a = codec.encode(&Packet::new(1, "aaaaAA", header())).unwrap();
        let b = codec.encode(&Packet::new(2, "bbbbBB", header())).unwrap();

        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(ConnectionId(1), codec.decode(&a[0]).unwrap()).unwrap().is_none());
        assert!(reassembler.push(ConnectionId(2), codec.decode(&b[0]).unwrap()).unwrap().is_none());

        let pb = reassembler.push(ConnectionId(2), codec.decode(&b[1]).unwrap()).unwrap().unwrap();
        let pa = reassembler.push(ConnectionId(1), codec.decode(&a[1]).unwrap()).unwrap().unwrap();
        assert_eq!(pa.payload, "aaaaAA");
        assert_eq!(pb.payload, "bbbbBB");
    }

    #[test]
    fn test_header_overflow_rejected_at_encode() {
        let codec = FrameCodec::new(1024, 16).unwrap();
        let err = codec.encode(&Packet::new(1, "", header())).map(|_| ());
        assert!(err.is_ok());

        let mut big = Header::new();
        big.push("long-name-here", "long value here").unwrap();
        assert!(matches!(
            codec.encode(&Packet::new(1, "", big)),
            Err(CodecError::HeaderOverflow { capacity: 16, .. })
        ));
    }

    #[test]
    fn test_malformed_frames() {
        let codec = FrameCodec::default();
        assert!(matches!(codec.decode(&[0, 0, 0, 1]), Err(CodecError::FrameTooShort(4))));

        let mut frame = codec.encode(&Packet::new(1, "abc", header())).unwrap()[0].to_vec();
        frame[3] = frame[3].wrapping_add(1);
        assert!(matches!(codec.decode(&frame), Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn test_frame_reader_splits_stream() {
        let codec = FrameCodec::default();
        let mut stream = Vec::new();
        for payload in ["one", "two", ""] {
            for frame in codec.encode(&Packet::new(3, payload, header())).unwrap() {
                stream.extend_from_slice(&frame);
            }
        }

        let mut reader = FrameReader::new(codec);
        let mut frames = Vec::new();
        for chunk in stream.chunks(50) {
            reader.extend(chunk);
            while let Some(frame) = reader.next_frame().unwrap() {
                frames.push(codec.decode(&frame).unwrap());
            }
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[1].payload[..], b"two");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_frame_reader_resyncs_after_bad_length() {
        let codec = FrameCodec::default();
        let mut reader = FrameReader::new(codec);
        reader.extend(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3]);
        assert!(reader.next_frame().is_err());
        assert_eq!(reader.buffered(), 0);

        let frame = codec.encode(&Packet::new(3, "ok", header())).unwrap().remove(0);
        reader.extend(&frame);
        let next = reader.next_frame().unwrap().unwrap();
        assert_eq!(codec.decode(&next).unwrap().code, 3);
    }
}
