//! Codec for the 48-byte CloakedDagger wrap header.
//!
//! The wrap is obfuscation, not a cipher: an 8-byte mask applied to the
//! payload cyclically, described by a fixed header whose first byte doubles
//! as the "is this stream wrapped" sniff. All multibyte fields are
//! big-endian, unlike the frame header.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size of the wrap header in octets.
pub const HEADER_SIZE: usize = 48;

/// Length of the XOR mask in octets.
pub const MASK_LENGTH: usize = 8;

/// First byte of a wrapped stream.
pub const IDENTIFIER_BYTE: u8 = 0xd1;

const MAGIC1: u32 = 0xd1df_5fff;
const MAGIC2: u32 = 0xff5f_dfd1;
const MAJOR_VERSION: u16 = 1;
const MINOR_VERSION: u16 = 0;
const ENCAPSULATION_XOR: u32 = 1;
const ENCAPSULATION_CONFIG: u16 = 3;

/// Wrap-layer errors. A bad header on a non-first frame drops that frame;
/// the session itself continues.
#[derive(Debug, Error)]
pub enum WrapError {
    #[error("wrap header truncated at {0} bytes")]
    Truncated(usize),

    #[error("wrap header magic bytes do not match")]
    BadMagic,

    #[error("unsupported wrap version {0}")]
    UnsupportedVersion(u16),

    #[error("wrap header length fields are inconsistent")]
    BadLength,

    #[error("chunk arrived before the session mask was established")]
    MaskNotInitialised,
}

/// Parsed CloakedDagger wrap header.
///
/// The sixteen bytes of checksum metadata between the mask and the trailing
/// magic are always zero on the wire and are not retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloakedDagger {
    pub major_version: u16,
    pub minor_version: u16,
    pub header_length: u32,
    pub encapsulation_type: u32,
    pub encapsulation_config: u16,
    pub encapsulation_data_length: u16,
    pub mask: [u8; MASK_LENGTH],
}

impl CloakedDagger {
    /// A standard header around the given mask, as produced by the wrapping
    /// device on the far side of the diode.
    pub fn with_mask(mask: [u8; MASK_LENGTH]) -> Self {
        CloakedDagger {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            header_length: HEADER_SIZE as u32,
            encapsulation_type: ENCAPSULATION_XOR,
            encapsulation_config: ENCAPSULATION_CONFIG,
            encapsulation_data_length: MASK_LENGTH as u16,
            mask,
        }
    }

    /// Decode and validate a wrap header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WrapError> {
        if buf.len() < HEADER_SIZE {
            return Err(WrapError::Truncated(buf.len()));
        }
        let mut cur = &buf[..HEADER_SIZE];

        let magic1 = cur.get_u32();
        let major_version = cur.get_u16();
        let minor_version = cur.get_u16();
        let header_length = cur.get_u32();
        let encapsulation_type = cur.get_u32();
        let encapsulation_config = cur.get_u16();
        let encapsulation_data_length = cur.get_u16();
        let mut mask = [0u8; MASK_LENGTH];
        cur.copy_to_slice(&mut mask);
        cur.advance(16); // checksum metadata, zero on the wire
        let magic2 = cur.get_u32();

        if magic1 != MAGIC1 || magic2 != MAGIC2 {
            return Err(WrapError::BadMagic);
        }
        if major_version != MAJOR_VERSION {
            return Err(WrapError::UnsupportedVersion(major_version));
        }
        if header_length as usize != HEADER_SIZE
            || encapsulation_data_length as usize != MASK_LENGTH
        {
            return Err(WrapError::BadLength);
        }

        Ok(CloakedDagger {
            major_version,
            minor_version,
            header_length,
            encapsulation_type,
            encapsulation_config,
            encapsulation_data_length,
            mask,
        })
    }

    /// Serialize the header back to its wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u32(MAGIC1);
        buf.put_u16(self.major_version);
        buf.put_u16(self.minor_version);
        buf.put_u32(self.header_length);
        buf.put_u32(self.encapsulation_type);
        buf.put_u16(self.encapsulation_config);
        buf.put_u16(self.encapsulation_data_length);
        buf.put_slice(&self.mask);
        buf.put_bytes(0, 16);
        buf.put_u32(MAGIC2);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_the_mask() {
        let header = CloakedDagger::with_mask([1, 2, 3, 4, 5, 6, 7, 8]);
        let raw = header.to_bytes();
        assert_eq!(raw[0], IDENTIFIER_BYTE);
        assert_eq!(CloakedDagger::decode(&raw).unwrap(), header);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let raw = CloakedDagger::with_mask([0; 8]).to_bytes();
        let result = CloakedDagger::decode(&raw[..HEADER_SIZE - 1]);
        assert!(matches!(result, Err(WrapError::Truncated(47))));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let mut raw = CloakedDagger::with_mask([0; 8]).to_bytes();
        raw[1] = 0x0a;
        assert!(matches!(
            CloakedDagger::decode(&raw),
            Err(WrapError::BadMagic)
        ));

        let mut raw = CloakedDagger::with_mask([0; 8]).to_bytes();
        raw[HEADER_SIZE - 1] = 0;
        assert!(matches!(
            CloakedDagger::decode(&raw),
            Err(WrapError::BadMagic)
        ));
    }

    #[test]
    fn unexpected_version_is_rejected() {
        let mut raw = CloakedDagger::with_mask([0; 8]).to_bytes();
        raw[5] = 2;
        assert!(matches!(
            CloakedDagger::decode(&raw),
            Err(WrapError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn inconsistent_lengths_are_rejected() {
        let mut raw = CloakedDagger::with_mask([0; 8]).to_bytes();
        raw[11] = 0x31; // header_length
        assert!(matches!(
            CloakedDagger::decode(&raw),
            Err(WrapError::BadLength)
        ));

        let mut raw = CloakedDagger::with_mask([0; 8]).to_bytes();
        raw[19] = 0x04; // encapsulation_data_length
        assert!(matches!(
            CloakedDagger::decode(&raw),
            Err(WrapError::BadLength)
        ));
    }
}
