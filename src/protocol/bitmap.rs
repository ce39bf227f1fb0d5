//! Bitmap upload frames.
//!
//! An image is sent as `0x15` chunks, then the terminator, then a CRC frame
//! over the address prefix and the image bytes.

use super::opcodes::{OP_BITMAP_CHUNK, OP_BITMAP_CRC, OP_BITMAP_END};

pub const CHUNK_SIZE: usize = 194;
pub const ADDRESS_PREFIX: [u8; 4] = [0x00, 0x1C, 0x00, 0x00];
pub const TERMINATOR: [u8; 3] = [OP_BITMAP_END, 0x0D, 0x0E];

/// Chunk frames `[0x15, seq] + slice`; the first also carries the address
/// prefix. Empty images produce no frames.
pub fn chunk_frames(image: &[u8]) -> Vec<Vec<u8>> {
    image
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(index, slice)| {
            let mut frame = Vec::with_capacity(2 + ADDRESS_PREFIX.len() + slice.len());
            frame.push(OP_BITMAP_CHUNK);
            frame.push(index as u8);
            if index == 0 {
                frame.extend_from_slice(&ADDRESS_PREFIX);
            }
            frame.extend_from_slice(slice);
            frame
        })
        .collect()
}

pub fn terminator() -> Vec<u8> {
    TERMINATOR.to_vec()
}

/// `[0x16] + crc32(prefix ‖ image)` in big-endian order.
pub fn crc_frame(image: &[u8]) -> Vec<u8> {
    let crc = crc32([&ADDRESS_PREFIX[..], image]);
    let mut frame = vec![OP_BITMAP_CRC];
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Every frame needed to upload `image`, in send order.
pub fn upload_frames(image: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = chunk_frames(image);
    if !frames.is_empty() {
        frames.push(terminator());
        frames.push(crc_frame(image));
    }
    frames
}

/// CRC-32 (IEEE) over the concatenated parts.
fn crc32<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
