use std::fmt;
use std::ops::BitOr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChunkError, Result};

/// Chunk header: frame_id (4) + chunk_id (2) + flags (1) + reserved (1) + payload_len (2).
pub const HEADER_SIZE: usize = 10;

/// Per-chunk flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    /// No flags: a middle chunk.
    pub const NONE: Flags = Flags(0);
    /// First chunk of a frame.
    pub const START: Flags = Flags(0x01);
    /// Last chunk of a frame.
    pub const END: Flags = Flags(0x02);

    /// Wrap raw bits. Unknown bits are kept so they survive a re-encode.
    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags for the chunk at `chunk_id` that does (or does not) carry the
    /// frame's last byte.
    pub fn for_position(chunk_id: u16, is_last: bool) -> Self {
        let mut flags = Flags::NONE;
        if chunk_id == 0 {
            flags = flags | Flags::START;
        }
        if is_last {
            flags = flags | Flags::END;
        }
        flags
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({self})")
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Flags::START), self.contains(Flags::END)) {
            (true, true) => f.write_str("START|END"),
            (true, false) => f.write_str("START"),
            (false, true) => f.write_str("END"),
            (false, false) => f.write_str("-"),
        }
    }
}

/// Framing metadata carried in front of every chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Producer-assigned frame identity; wraps at 2^32.
    pub frame_id: u32,
    /// Zero-based position of this chunk within its frame.
    pub chunk_id: u16,
    pub flags: Flags,
    /// Zero on encode; whatever the peer sent on decode.
    pub reserved: u8,
    /// Number of payload bytes following the header.
    pub payload_len: u16,
}

impl FrameHeader {
    /// Create a header with the reserved byte zeroed.
    pub fn new(frame_id: u32, chunk_id: u16, flags: Flags, payload_len: u16) -> Self {
        Self {
            frame_id,
            chunk_id,
            flags,
            reserved: 0,
            payload_len,
        }
    }

    pub fn is_start(&self) -> bool {
        self.flags.contains(Flags::START)
    }

    pub fn is_end(&self) -> bool {
        self.flags.contains(Flags::END)
    }
}

/// Encode a header into its fixed wire form.
///
/// ```text
/// ┌────────────┬──────────┬───────┬──────────┬─────────────┐
/// │ frame_id   │ chunk_id │ flags │ reserved │ payload_len │
/// │ u32 LE     │ u16 LE   │ u8    │ u8 (0)   │ u16 LE      │
/// └────────────┴──────────┴───────┴──────────┴─────────────┘
/// ```
pub fn encode_header(header: &FrameHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut dst = &mut out[..];
    dst.put_u32_le(header.frame_id);
    dst.put_u16_le(header.chunk_id);
    dst.put_u8(header.flags.bits());
    dst.put_u8(header.reserved);
    dst.put_u16_le(header.payload_len);
    out
}

/// Decode a header from the first [`HEADER_SIZE`] bytes of `src`.
///
/// Only the length is checked. `payload_len` is not compared against anything;
/// it is the receiver's job to notice a lie.
pub fn decode_header(src: &[u8]) -> Result<FrameHeader> {
    if src.len() < HEADER_SIZE {
        return Err(ChunkError::MalformedHeader { len: src.len() });
    }

    let mut src = &src[..HEADER_SIZE];
    Ok(FrameHeader {
        frame_id: src.get_u32_le(),
        chunk_id: src.get_u16_le(),
        flags: Flags::from_bits(src.get_u8()),
        reserved: src.get_u8(),
        payload_len: src.get_u16_le(),
    })
}

/// One header plus exactly `payload_len` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Chunk {
    /// Split a received message into header and payload.
    ///
    /// Bytes beyond the declared payload length are ignored. A message whose
    /// payload is shorter than declared is rejected as a whole.
    pub fn parse(mut message: Bytes) -> Result<Self> {
        let header = decode_header(&message)?;
        let declared = header.payload_len as usize;
        let available = message.len() - HEADER_SIZE;
        if available < declared {
            return Err(ChunkError::ShortPayload {
                declared,
                available,
            });
        }

        message.advance(HEADER_SIZE);
        message.truncate(declared);
        Ok(Self {
            header,
            payload: message,
        })
    }

    /// Append header and payload to `dst` as a single message.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_slice(&encode_header(&self.header));
        dst.put_slice(&self.payload);
    }

    /// Total size on the wire.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_little_endian_in_order() {
        let header = FrameHeader::new(0x0403_0201, 0x0605, Flags::START | Flags::END, 0x0a09);
        assert_eq!(
            encode_header(&header),
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x03, 0x00, 0x09, 0x0a]
        );
    }

    #[test]
    fn decodes_documented_example() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x05, 0x00];
        let header = decode_header(&bytes).unwrap();

        assert_eq!(header.frame_id, 1);
        assert_eq!(header.chunk_id, 0);
        assert!(header.is_start());
        assert!(header.is_end());
        assert_eq!(header.reserved, 0);
        assert_eq!(header.payload_len, 5);
        assert_eq!(encode_header(&header), bytes);
    }

    #[test]
    fn decode_rejects_short_input() {
        let err = decode_header(&[0u8; HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, ChunkError::MalformedHeader { len: 9 }));

        assert!(matches!(
            decode_header(&[]),
            Err(ChunkError::MalformedHeader { len: 0 })
        ));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut bytes = encode_header(&FrameHeader::new(9, 2, Flags::NONE, 3)).to_vec();
        bytes.extend_from_slice(b"abc");
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.chunk_id, 2);
        assert_eq!(header.payload_len, 3);
    }

    #[test]
    fn decode_keeps_nonzero_reserved_and_unknown_flag_bits() {
        let bytes = [0, 0, 0, 0, 0, 0, 0xF1, 0x7F, 0, 0];
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.reserved, 0x7F);
        assert!(header.is_start());
        assert!(!header.is_end());
        assert_eq!(encode_header(&header), bytes);
    }

    #[test]
    fn flags_for_position() {
        assert_eq!(Flags::for_position(0, true), Flags::START | Flags::END);
        assert_eq!(Flags::for_position(0, false), Flags::START);
        assert_eq!(Flags::for_position(3, false), Flags::NONE);
        assert_eq!(Flags::for_position(3, true), Flags::END);
        assert_eq!((Flags::START | Flags::END).bits(), 3);
        assert_eq!((Flags::START | Flags::END).to_string(), "START|END");
    }

    #[test]
    fn chunk_parse_splits_header_and_payload() {
        let mut wire = BytesMut::new();
        wire.put_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x05, 0x00]);
        wire.put_slice(b"hello");

        let chunk = Chunk::parse(wire.freeze()).unwrap();
        assert_eq!(chunk.header.frame_id, 1);
        assert_eq!(chunk.payload.as_ref(), b"hello");
        assert_eq!(chunk.wire_size(), HEADER_SIZE + 5);
    }

    #[test]
    fn chunk_parse_truncates_to_declared_length() {
        let mut wire = BytesMut::new();
        wire.put_slice(&encode_header(&FrameHeader::new(1, 0, Flags::START, 2)));
        wire.put_slice(b"abcdef");

        let chunk = Chunk::parse(wire.freeze()).unwrap();
        assert_eq!(chunk.payload.as_ref(), b"ab");
    }

    #[test]
    fn chunk_parse_rejects_short_payload() {
        let mut wire = BytesMut::new();
        wire.put_slice(&encode_header(&FrameHeader::new(1, 0, Flags::START, 8)));
        wire.put_slice(b"abc");

        let err = Chunk::parse(wire.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::ShortPayload {
                declared: 8,
                available: 3
            }
        ));
    }

    #[test]
    fn chunk_encode_matches_parse() {
        let chunk = Chunk {
            header: FrameHeader::new(77, 4, Flags::END, 3),
            payload: Bytes::from_static(b"xyz"),
        };
        let mut wire = BytesMut::new();
        chunk.encode(&mut wire);

        assert_eq!(wire.len(), chunk.wire_size());
        assert_eq!(Chunk::parse(wire.freeze()).unwrap(), chunk);
    }
}
