//! On-disk constants of the scf container format.
//!
//! # Layout
//! ```text
//! header            10 B   "scf10" + 5 × 0x00
//! payload length     8 B   u64, byte length of the payload area
//! payload            N B   raw stream contents, directory order, no padding
//! container uuid    16 B + marker
//! entry × n         52 B   id, type, encoding, offset, length, crc32 (each + marker)
//! terminator         2 B   marker in place of the next stream id
//! stream metadata    8 B + encoded mapping
//! user metadata      8 B + encoded mapping
//! ```
//!
//! # Endianness
//! Every integer is unsigned little-endian.  Widths are fixed per field and
//! never negotiated.

use serde::{Deserialize, Serialize};

/// Magic header identifying format and version.
pub const HEADER: &[u8; 10] = b"scf10\0\0\0\0\0";
/// Sentinel written after every structural field.
pub const MARKER: &[u8; 2] = b"\0\0";

/// Byte width of the payload-length field following the header.
pub const PAYLOAD_LEN_SIZE: usize = 8;
/// Absolute position of the first payload byte.
pub const PAYLOAD_START: u64 = (HEADER.len() + PAYLOAD_LEN_SIZE) as u64;

pub const UUID_SIZE:     usize = 16;
pub const TYPE_ID_SIZE:  usize = 2;
pub const ENCODING_SIZE: usize = 2;
pub const OFFSET_SIZE:   usize = 8;
pub const LENGTH_SIZE:   usize = 8;
pub const CHECKSUM_SIZE: usize = 4;

/// Size of one directory entry, markers included.
pub const ENTRY_SIZE: usize = UUID_SIZE
    + TYPE_ID_SIZE
    + ENCODING_SIZE
    + OFFSET_SIZE
    + LENGTH_SIZE
    + CHECKSUM_SIZE
    + 6 * MARKER.len();

/// Default chunk size: 40 KiB.  Bounds memory use while streaming.
pub const DEFAULT_CHUNK_SIZE: usize = 40960;
/// Largest total payload a container may declare (2^64 − 2).
pub const MAX_PAYLOAD_SIZE: u64 = u64::MAX - 1;

// ── Persisted code spaces ───────────────────────────────────────────────────
//
// Both are open: unknown codes are carried through unchanged so that a
// container written by a newer producer can be remuxed without loss.

/// Semantic content type of a stream (persisted as u16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(pub u16);

impl ContentType {
    pub const BINARY: ContentType = ContentType(0);

    /// Human-readable name (for diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            ContentType::BINARY => "binary",
            _                   => "unknown",
        }
    }
}

/// Encoding applied to a stream's bytes (persisted as u16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodingId(pub u16);

impl EncodingId {
    pub const NONE: EncodingId = EncodingId(0);

    pub fn name(self) -> &'static str {
        match self {
            EncodingId::NONE => "none",
            _                => "unknown",
        }
    }
}

/// True if `id` would be read back as the directory terminator.
#[inline]
pub fn is_reserved_id(id: &[u8; UUID_SIZE]) -> bool {
    id[..MARKER.len()] == MARKER[..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_ten_bytes() {
        assert_eq!(HEADER.len(), 10);
        assert_eq!(&HEADER[..5], b"scf10");
        assert!(HEADER[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn entry_size_matches_layout() {
        assert_eq!(ENTRY_SIZE, 52);
        assert_eq!(PAYLOAD_START, 18);
    }

    #[test]
    fn max_payload_is_two_below_wrap() {
        assert_eq!(MAX_PAYLOAD_SIZE as u128, (1u128 << 64) - 2);
    }

    #[test]
    fn unknown_codes_keep_their_value() {
        assert_eq!(ContentType(7).0, 7);
        assert_eq!(ContentType(7).name(), "unknown");
        assert_eq!(ContentType::default(), ContentType::BINARY);
        assert_eq!(EncodingId::default().name(), "none");
    }

    #[test]
    fn reserved_ids_start_with_marker() {
        let mut id = [0xAB; UUID_SIZE];
        assert!(!is_reserved_id(&id));
        id[0] = 0;
        id[1] = 0;
        assert!(is_reserved_id(&id));
    }
}
