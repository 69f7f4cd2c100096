use std::fmt;
use std::io;

use thiserror::Error;
use uuid::Uuid;

/// A structural field of the container, used to locate corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Header,
    PayloadLength,
    Payload,
    ContainerUuid,
    StreamId(usize),
    ContentType(usize),
    Encoding(usize),
    Offset(usize),
    Length(usize),
    Checksum(usize),
    StreamMetadata,
    UserMetadata,
    /// Raw content of a stream, read through its source.
    StreamContent(Uuid),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Header          => write!(f, "header"),
            Field::PayloadLength   => write!(f, "payload length"),
            Field::Payload         => write!(f, "payload area"),
            Field::ContainerUuid   => write!(f, "container uuid"),
            Field::StreamId(i)     => write!(f, "stream {i} id"),
            Field::ContentType(i)  => write!(f, "stream {i} type id"),
            Field::Encoding(i)     => write!(f, "stream {i} encoding id"),
            Field::Offset(i)       => write!(f, "stream {i} offset"),
            Field::Length(i)       => write!(f, "stream {i} length"),
            Field::Checksum(i)     => write!(f, "stream {i} crc32"),
            Field::StreamMetadata  => write!(f, "stream metadata"),
            Field::UserMetadata    => write!(f, "user metadata"),
            Field::StreamContent(id) => write!(f, "content of stream {id}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Malformed header: expected {}, found {}", hex::encode(crate::format::HEADER), hex::encode(.found))]
    InvalidHeader { found: [u8; 10] },

    #[error("Bad marker after {field} at byte {position}: expected {}, found {}", hex::encode(.expected), hex::encode(.found))]
    BadMarker {
        field:    Field,
        position: u64,
        expected: [u8; 2],
        found:    [u8; 2],
    },

    #[error("Truncated container: {field} at byte {position} ends early")]
    Truncated { field: Field, position: u64 },

    #[error("Undecodable {field}: {source}")]
    Metadata {
        field:  Field,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate stream id {0}")]
    DuplicateStream(Uuid),

    #[error("Stream id {0} begins with the directory terminator and cannot be stored")]
    ReservedStreamId(Uuid),

    #[error("Stream '{0}' not found in container")]
    StreamNotFound(Uuid),

    #[error("Stream '{0}' has not been written to the container yet")]
    Unwritten(Uuid),

    #[error("Stream '{id}' declares {declared} B but its source holds {actual} B")]
    LengthMismatch { id: Uuid, declared: u64, actual: u64 },

    #[error("Total payload {total} B exceeds maximum {max} B")]
    SizeExceeded { total: u128, max: u64 },

    #[error("Checksum mismatch for stream '{id}': stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { id: Uuid, stored: u32, computed: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ContainerError {
    /// True for errors caused by bytes that do not follow the format.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ContainerError::InvalidHeader { .. }
                | ContainerError::BadMarker { .. }
                | ContainerError::Metadata { .. }
                | ContainerError::DuplicateStream(_)
        )
    }

    /// Map a short read on `field` to [`ContainerError::Truncated`]; other
    /// I/O failures pass through unchanged.
    pub(crate) fn from_read(err: io::Error, field: Field, position: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ContainerError::Truncated { field, position }
        } else {
            ContainerError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
