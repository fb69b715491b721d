//! Streaming re-wrap of CloakedDagger payload chunks.
//!
//! Senders chunk a wrapped file at arbitrary byte boundaries and the
//! wrapping device re-masks every chunk from mask position 0. The receiver
//! must therefore re-align each chunk onto the first chunk's mask cycle so
//! that a consumer downstream sees exactly one wrap envelope followed by
//! one coherent masked stream.

use crate::cloaked_dagger::{self, CloakedDagger, IDENTIFIER_BYTE, MASK_LENGTH, WrapError};
use bytes::{BufMut, Bytes, BytesMut};

/// Per-session rewrap state: the first chunk's mask and the running offset
/// into the continuous output stream.
#[derive(Debug, Default)]
pub struct StreamingRewrapper {
    mask: Option<[u8; MASK_LENGTH]>,
    mask_index: u64,
}

impl StreamingRewrapper {
    pub fn new() -> Self {
        StreamingRewrapper::default()
    }

    /// Transform one chunk of an import stream.
    ///
    /// Unwrapped input (first byte is not the wrap identifier) passes
    /// through untouched, as do the header and payload of the first frame.
    /// Later frames have their wrap header stripped and their payload
    /// re-masked to continue the first frame's mask cycle.
    pub fn rewrap(&mut self, input: Bytes, frame_count: u32) -> Result<Bytes, WrapError> {
        if input.first() != Some(&IDENTIFIER_BYTE) {
            return Ok(input);
        }
        let chunk_mask = CloakedDagger::decode(&input)?.mask;

        if frame_count == 1 {
            self.mask = Some(chunk_mask);
            self.mask_index = (input.len() - cloaked_dagger::HEADER_SIZE) as u64;
            return Ok(input);
        }

        let session_mask = self.mask.ok_or(WrapError::MaskNotInitialised)?;
        let new_mask = self.rotated_mask(chunk_mask, session_mask);
        Ok(self.rewrap_data(&input[cloaked_dagger::HEADER_SIZE..], &new_mask))
    }

    /// Rotation-corrected XOR of the chunk mask against the session mask.
    ///
    /// Applying the result at position `mask_index mod 8` first removes the
    /// chunk's own mask (which restarted at 0) and then re-applies the
    /// session mask at the correct cycle offset.
    fn rotated_mask(
        &self,
        chunk_mask: [u8; MASK_LENGTH],
        session_mask: [u8; MASK_LENGTH],
    ) -> [u8; MASK_LENGTH] {
        let offset = (self.mask_index % MASK_LENGTH as u64) as usize;
        let mut new_mask = [0u8; MASK_LENGTH];
        for i in 0..MASK_LENGTH {
            let rotated = (i + offset) % MASK_LENGTH;
            new_mask[rotated] = chunk_mask[i] ^ session_mask[rotated];
        }
        new_mask
    }

    fn rewrap_data(&mut self, data: &[u8], new_mask: &[u8; MASK_LENGTH]) -> Bytes {
        let mut output = BytesMut::with_capacity(data.len());
        for &byte in data {
            output.put_u8(byte ^ new_mask[(self.mask_index % MASK_LENGTH as u64) as usize]);
            self.mask_index += 1;
        }
        output.freeze()
    }
}
