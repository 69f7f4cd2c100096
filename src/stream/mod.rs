//! Stream descriptors and their content sources.
//!
//! A descriptor carries everything the directory persists about a stream
//! (id, type, encoding, placement, checksum) plus the in-memory
//! [`StreamSource`] that supplies its bytes at write time.  The source kind
//! is never persisted: every stream of an opened container is a
//! [`StreamSource::FilePart`] of the container file itself.

mod chunked;

pub use chunked::ChunkedRead;

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::directory::DirectoryEntry;
use crate::error::{ContainerError, Field, Result};
use crate::format::{is_reserved_id, ContentType, EncodingId, DEFAULT_CHUNK_SIZE};

/// Where a stream's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// In-memory buffer; must be exactly the declared length.
    LocalData(Vec<u8>),
    /// The entire named file.
    WholeFile(PathBuf),
    /// `length` bytes of `path` starting at `offset`; `None` reads to end-of-file.
    FilePart {
        path:   PathBuf,
        offset: u64,
        length: Option<u64>,
    },
}

impl StreamSource {
    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            StreamSource::LocalData(_)          => None,
            StreamSource::WholeFile(path)       => Some(path),
            StreamSource::FilePart { path, .. } => Some(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub id:           Uuid,
    pub content_type: ContentType,
    pub encoding:     EncodingId,
    /// Absolute position in the owning container; `None` until written or parsed.
    pub offset:       Option<u64>,
    /// Declared byte length.
    pub length:       u64,
    pub checksum:     Option<u32>,
    pub source:       StreamSource,
}

impl StreamDescriptor {
    /// A fresh v4 id that can never be mistaken for the directory terminator.
    pub fn generate_id() -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !is_reserved_id(id.as_bytes()) {
                return id;
            }
        }
    }

    fn with_source(source: StreamSource, length: u64) -> Self {
        Self {
            id:           Self::generate_id(),
            content_type: ContentType::BINARY,
            encoding:     EncodingId::NONE,
            offset:       None,
            length,
            checksum:     None,
            source,
        }
    }

    pub fn local_data(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let length = data.len() as u64;
        Self::with_source(StreamSource::LocalData(data), length)
    }

    /// Declared length is the file's size at the time of the call.
    pub fn whole_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let length = fs::metadata(&path)?.len();
        Ok(Self::with_source(StreamSource::WholeFile(path), length))
    }

    /// A byte range of `path`.  With `length == None` the range runs to
    /// end-of-file and the declared length is taken from the current file size.
    pub fn file_part(path: impl AsRef<Path>, offset: u64, length: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let declared = match length {
            Some(n) => n,
            None    => fs::metadata(&path)?.len().saturating_sub(offset),
        };
        Ok(Self::with_source(StreamSource::FilePart { path, offset, length }, declared))
    }

    /// Rebuild a descriptor from a parsed directory entry.  The stream's bytes
    /// live inside the container at `path`.
    pub fn from_container_entry(path: &Path, entry: &DirectoryEntry) -> Self {
        Self {
            id:           entry.id,
            content_type: entry.content_type,
            encoding:     entry.encoding,
            offset:       Some(entry.offset),
            length:       entry.length,
            checksum:     Some(entry.checksum),
            source:       StreamSource::FilePart {
                path:   path.to_owned(),
                offset: entry.offset,
                length: Some(entry.length),
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingId) -> Self {
        self.encoding = encoding;
        self
    }

    /// The full content as one buffer.  Not meant for large streams.
    pub fn read(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in self.read_chunked_with(DEFAULT_CHUNK_SIZE, false)? {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Chunked read; checksums by default when none is stored yet.
    pub fn read_chunked(&self, chunk_size: usize) -> Result<ChunkedRead<'_>> {
        self.read_chunked_with(chunk_size, self.checksum.is_none())
    }

    /// Chunked read of at most `chunk_size` bytes per chunk.
    ///
    /// The descriptor is never updated by the read.  Call
    /// [`ChunkedRead::finalize`] after exhausting the iterator to obtain the
    /// checksum and store it where needed.
    pub fn read_chunked_with(&self, chunk_size: usize, compute_checksum: bool) -> Result<ChunkedRead<'_>> {
        let field = Field::StreamContent(self.id);
        match &self.source {
            StreamSource::LocalData(data) => {
                let actual = data.len() as u64;
                if actual != self.length {
                    return Err(ContainerError::LengthMismatch {
                        id:       self.id,
                        declared: self.length,
                        actual,
                    });
                }
                Ok(ChunkedRead::memory(data, field, chunk_size, compute_checksum))
            }
            StreamSource::WholeFile(path) => {
                ChunkedRead::file_range(path, 0, None, field, chunk_size, compute_checksum)
            }
            StreamSource::FilePart { path, offset, length } => {
                ChunkedRead::file_range(path, *offset, *length, field, chunk_size, compute_checksum)
            }
        }
    }
}
