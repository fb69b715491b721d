//! Wire format for diode frames and the MTU arithmetic that bounds their
//! payloads.
//!
//! A frame is one UDP datagram: a fixed 16-byte little-endian header
//! followed by an opaque payload. The header carries a sender-chosen
//! session id, a 1-based sequence number and a terminator flag; the seven
//! trailing bytes are reserved (zero on send, ignored on receive).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use thiserror::Error;

/// Size of the fixed frame header in octets.
pub const HEADER_SIZE: usize = 16;

/// Smallest MTU the protocol operates over (the IPv4 reassembly floor).
pub const MIN_MTU: u16 = 576;

/// IP (20 octets) plus UDP (8 octets) overhead subtracted from the MTU.
const PROTOCOL_OVERHEAD: usize = 28;

/// Frame parsing and MTU validation errors.
///
/// All of these are drop-the-datagram conditions on the receive path; none
/// of them terminate a session.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("datagram of {0} bytes is too short for a frame header")]
    Malformed(usize),

    #[error("terminator frame carries no descriptor payload")]
    EmptyDescriptor,

    #[error("payload of {len} bytes exceeds the MTU budget of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("MTU of {0} is below the minimum of {MIN_MTU}")]
    MtuTooSmall(u16),
}

/// Usable UDP datagram budget for a given MTU: header plus payload.
pub fn max_buffer_size(mtu: u16) -> Result<usize, FrameError> {
    if mtu < MIN_MTU {
        return Err(FrameError::MtuTooSmall(mtu));
    }
    Ok(mtu as usize - PROTOCOL_OVERHEAD)
}

/// Application payload budget for a given MTU.
pub fn max_payload_size(mtu: u16) -> Result<usize, FrameError> {
    Ok(max_buffer_size(mtu)? - HEADER_SIZE)
}

/// Parsed frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sender-chosen random identifier grouping one file's frames.
    pub session_id: u32,
    /// 1-based sequence number within the session.
    pub frame_count: u32,
    /// Non-zero on the wire marks the terminator frame; its payload is a
    /// descriptor rather than file data.
    pub eof: bool,
}

impl FrameHeader {
    /// Serialize the header into `buf` in wire order.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.session_id);
        buf.put_u32_le(self.frame_count);
        buf.put_u8(u8::from(self.eof));
        buf.put_bytes(0, 7);
    }
}

/// One received frame: header plus a zero-copy view of the payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Parse a datagram into a frame without copying the payload.
    ///
    /// `max_payload` is the MTU-derived payload budget; larger payloads are
    /// rejected at parse time rather than later in the pipeline.
    pub fn decode(mut datagram: Bytes, max_payload: usize) -> Result<Frame, FrameError> {
        if datagram.len() < HEADER_SIZE {
            return Err(FrameError::Malformed(datagram.len()));
        }

        let session_id = datagram.get_u32_le();
        let frame_count = datagram.get_u32_le();
        let eof = datagram.get_u8() != 0;
        datagram.advance(7);

        if datagram.len() > max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: datagram.len(),
                max: max_payload,
            });
        }
        if eof && datagram.is_empty() {
            return Err(FrameError::EmptyDescriptor);
        }

        Ok(Frame {
            header: FrameHeader {
                session_id,
                frame_count,
                eof,
            },
            payload: datagram,
        })
    }
}

// The reorder queue orders frames by sequence number alone; payload bytes do
// not participate in the comparison.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.header.frame_count == other.header.frame_count
    }
}

impl Eq for Frame {}

impl PartialOrd for Frame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frame {
    fn cmp(&self, other: &Self) -> Ordering {
        self.header.frame_count.cmp(&other.header.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(session_id: u32, frame_count: u32, eof: bool, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        FrameHeader {
            session_id,
            frame_count,
            eof,
        }
        .encode_into(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }

    #[test]
    fn header_fields_are_little_endian() {
        let raw = Bytes::from_static(&[
            0x03, 0x00, 0x00, 0x00, // session_id
            0x02, 0x00, 0x00, 0x00, // frame_count
            0x01, // eof
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved
            b'X',
        ]);
        let frame = Frame::decode(raw, 1024).unwrap();
        assert_eq!(frame.header.session_id, 3);
        assert_eq!(frame.header.frame_count, 2);
        assert!(frame.header.eof);
        assert_eq!(frame.payload.as_ref(), b"X");
    }

    #[test]
    fn header_fields_at_maximum() {
        let frame = Frame::decode(datagram(u32::MAX, u32::MAX, true, b"x"), 1024).unwrap();
        assert_eq!(frame.header.session_id, 0xFFFF_FFFF);
        assert_eq!(frame.header.frame_count, 0xFFFF_FFFF);
        assert!(frame.header.eof);
    }

    #[test]
    fn header_fields_near_maximum() {
        let frame = Frame::decode(datagram(0xFFFF_FF00, 0xFFFF_FF00, true, b"x"), 1024).unwrap();
        assert_eq!(frame.header.session_id, 0xFFFF_FF00);
        assert_eq!(frame.header.frame_count, 0xFFFF_FF00);
    }

    #[test]
    fn nonzero_eof_octet_is_a_terminator() {
        let mut raw = BytesMut::new();
        raw.put_slice(&3u32.to_le_bytes());
        raw.put_slice(&9u32.to_le_bytes());
        raw.put_u8(0x7f);
        raw.put_bytes(0, 7);
        raw.put_slice(b"desc");
        let frame = Frame::decode(raw.freeze(), 1024).unwrap();
        assert!(frame.header.eof);
    }

    #[test]
    fn short_datagram_is_malformed() {
        let result = Frame::decode(Bytes::from(vec![0u8; HEADER_SIZE - 1]), 1024);
        assert!(matches!(result, Err(FrameError::Malformed(15))));
    }

    #[test]
    fn terminator_without_descriptor_is_rejected() {
        let result = Frame::decode(datagram(1, 2, true, b""), 1024);
        assert!(matches!(result, Err(FrameError::EmptyDescriptor)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; 100];
        let result = Frame::decode(datagram(1, 1, false, &payload), 99);
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { len: 100, max: 99 })
        ));
    }

    #[test]
    fn buffer_budget_follows_the_mtu() {
        assert_eq!(max_buffer_size(1500).unwrap(), 1472);
        assert_eq!(max_buffer_size(9000).unwrap(), 8972);
        assert_eq!(max_payload_size(1500).unwrap(), 1456);
    }

    #[test]
    fn mtu_below_the_floor_is_rejected() {
        assert!(matches!(max_buffer_size(0), Err(FrameError::MtuTooSmall(0))));
        assert!(matches!(
            max_buffer_size(575),
            Err(FrameError::MtuTooSmall(575))
        ));
        assert!(max_buffer_size(576).is_ok());
    }

    #[test]
    fn frames_order_by_sequence_number() {
        let early = Frame::decode(datagram(1, 2, false, b"b"), 1024).unwrap();
        let late = Frame::decode(datagram(1, 7, false, b"a"), 1024).unwrap();
        assert!(early < late);
        assert_eq!(early, Frame::decode(datagram(9, 2, false, b"z"), 1024).unwrap());
    }
}
