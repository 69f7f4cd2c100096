//! High-level [`Container`] API — the primary embedding surface.
//!
//! ```no_run
//! use scf::{Container, StreamDescriptor};
//!
//! // Write
//! let mut c = Container::create("out.scf");
//! let id = c.add_stream(StreamDescriptor::local_data(b"Hello, world!".to_vec()))?;
//! c.write()?;
//!
//! // Read
//! let c = Container::open("out.scf")?;
//! assert_eq!(c.read_stream(id)?, b"Hello, world!");
//! # Ok::<(), scf::ContainerError>(())
//! ```
//!
//! # Atomic writes
//! With [`ContainerOptions::use_temp`] (the default) `write()` produces the
//! new container beside the destination, fsyncs it and renames it into place.
//! A stream may therefore be sourced from the very file being replaced, and a
//! failed write leaves any existing container untouched.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::directory::{self, Directory, DirectoryEntry};
use crate::error::{ContainerError, Field, Result};
use crate::format::{is_reserved_id, DEFAULT_CHUNK_SIZE, HEADER, MAX_PAYLOAD_SIZE, PAYLOAD_START};
use crate::metadata::Metadata;
use crate::stream::{ChunkedRead, StreamDescriptor, StreamSource};

// ── ContainerOptions ─────────────────────────────────────────────────────────

/// Configuration for reading and writing a [`Container`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Upper bound on bytes held in memory per chunk while streaming.
    pub chunk_size: usize,
    /// Write through a temporary file and rename on success.
    pub use_temp:   bool,
    /// fsync the written file (and its directory after a rename).
    pub sync:       bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            use_temp:   true,
            sync:       true,
        }
    }
}

/// Where a stream landed in a freshly written container.
#[derive(Debug, Clone, Copy)]
struct Placement {
    offset:   u64,
    length:   u64,
    checksum: Option<u32>,
}

// ── Container ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Container {
    path:                PathBuf,
    pub uuid:            Uuid,
    streams:             Vec<StreamDescriptor>,
    pub stream_metadata: Metadata,
    pub metadata:        Metadata,
    pub options:         ContainerOptions,
}

impl Container {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// An empty container bound to `path`.  Nothing touches the disk until
    /// [`Container::write`].
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::create_with_options(path, ContainerOptions::default())
    }

    /// Same as [`Container::new`].
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self::new(path)
    }

    pub fn create_with_options<P: AsRef<Path>>(path: P, options: ContainerOptions) -> Self {
        Self {
            path:            path.as_ref().to_owned(),
            uuid:            Uuid::new_v4(),
            streams:         Vec::new(),
            stream_metadata: Metadata::new(),
            metadata:        Metadata::new(),
            options,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ContainerOptions::default())
    }

    /// Parse an existing container.  Every stream comes back as a
    /// [`StreamSource::FilePart`] of `path`.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ContainerOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut found = [0u8; 10];
        reader
            .read_exact(&mut found)
            .map_err(|e| ContainerError::from_read(e, Field::Header, 0))?;
        if &found != HEADER {
            return Err(ContainerError::InvalidHeader { found });
        }

        let payload_len = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| ContainerError::from_read(e, Field::PayloadLength, HEADER.len() as u64))?;
        let directory_start = PAYLOAD_START
            .checked_add(payload_len)
            .filter(|&end| end <= file_len)
            .ok_or(ContainerError::Truncated { field: Field::Payload, position: file_len })?;
        reader.seek(SeekFrom::Start(directory_start))?;

        let dir = Directory::read(&mut reader)?;
        let streams: Vec<StreamDescriptor> = dir.entries
            .iter()
            .map(|entry| StreamDescriptor::from_container_entry(&path, entry))
            .collect();

        debug!(path = %path.display(), uuid = %dir.uuid, streams = streams.len(), "opened container");
        Ok(Self {
            path,
            uuid:            dir.uuid,
            streams,
            stream_metadata: dir.stream_metadata,
            metadata:        dir.metadata,
            options,
        })
    }

    // ── Stream list ──────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }

    /// Streams in on-disk order.
    pub fn streams(&self) -> &[StreamDescriptor] { &self.streams }

    pub fn stream(&self, id: Uuid) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Append a stream; it is written after every stream already present.
    pub fn add_stream(&mut self, stream: StreamDescriptor) -> Result<Uuid> {
        let id = stream.id;
        if is_reserved_id(id.as_bytes()) {
            return Err(ContainerError::ReservedStreamId(id));
        }
        if self.stream(id).is_some() {
            return Err(ContainerError::DuplicateStream(id));
        }
        self.streams.push(stream);
        Ok(id)
    }

    pub fn remove_stream(&mut self, id: Uuid) -> Option<StreamDescriptor> {
        let pos = self.streams.iter().position(|s| s.id == id)?;
        Some(self.streams.remove(pos))
    }

    fn placement_of(&self, id: Uuid) -> Result<(u64, u64)> {
        let stream = self.stream(id).ok_or(ContainerError::StreamNotFound(id))?;
        let offset = stream.offset.ok_or(ContainerError::Unwritten(id))?;
        Ok((offset, stream.length))
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// The stored bytes of stream `id`, read from the container file.
    pub fn read_stream(&self, id: Uuid) -> Result<Vec<u8>> {
        let (offset, length) = self.placement_of(id)?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut data = Vec::new();
        file.take(length).read_to_end(&mut data)?;
        if (data.len() as u64) < length {
            return Err(ContainerError::Truncated {
                field:    Field::StreamContent(id),
                position: offset + data.len() as u64,
            });
        }
        Ok(data)
    }

    /// Lazily read stream `id` from the container file in chunks of at most
    /// `chunk_size` bytes.  The chunks total exactly the stream's length.
    pub fn chunked_stream(&self, id: Uuid, chunk_size: usize) -> Result<ChunkedRead<'static>> {
        let (offset, length) = self.placement_of(id)?;
        ChunkedRead::file_range(&self.path, offset, Some(length), Field::StreamContent(id), chunk_size, false)
    }

    /// Recompute the CRC32 of stream `id` from the container file and compare
    /// it with the stored checksum.  Returns the checksum on success.
    pub fn verify_stream(&self, id: Uuid) -> Result<u32> {
        let (offset, length) = self.placement_of(id)?;
        let stored = self
            .stream(id)
            .and_then(|s| s.checksum)
            .ok_or(ContainerError::Unwritten(id))?;

        let mut chunks = ChunkedRead::file_range(
            &self.path,
            offset,
            Some(length),
            Field::StreamContent(id),
            self.options.chunk_size,
            true,
        )?;
        for chunk in chunks.by_ref() {
            chunk?;
        }
        let position = offset + chunks.bytes_read();
        let computed = chunks
            .finalize()
            .ok_or(ContainerError::Truncated { field: Field::StreamContent(id), position })?;

        if computed != stored {
            return Err(ContainerError::ChecksumMismatch { id, stored, computed });
        }
        Ok(computed)
    }

    /// Verify every stream, failing on the first mismatch.
    pub fn verify(&self) -> Result<()> {
        for stream in &self.streams {
            self.verify_stream(stream.id)?;
        }
        Ok(())
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Write the container to its path.
    ///
    /// Every stream is streamed from its source and checksummed.  Once the new
    /// file is in place each descriptor carries its new offset, length and
    /// checksum; a failure before that leaves the descriptors as they were.
    ///
    /// Streams sourced from the container file itself always go through the
    /// temporary file, whatever [`ContainerOptions::use_temp`] says: writing in
    /// place would truncate them before they are read.
    pub fn write(&mut self) -> Result<()> {
        let total: u128 = self.streams.iter().map(|s| s.length as u128).sum();
        if total > MAX_PAYLOAD_SIZE as u128 {
            return Err(ContainerError::SizeExceeded { total, max: MAX_PAYLOAD_SIZE });
        }
        let declared = total as u64;

        let self_sourced = self.streams.iter().any(|s| s.source.path() == Some(self.path.as_path()));
        if self_sourced && !self.options.use_temp {
            debug!(path = %self.path.display(), "streams read from the container itself, writing through a temp file");
        }

        if self.options.use_temp || self_sourced {
            let temp = temp_path(&self.path);
            let placements = match self.write_file(&temp, declared) {
                Ok(placements) => placements,
                Err(e) => {
                    discard_temp(&temp);
                    return Err(e);
                }
            };
            if let Err(e) = fs::rename(&temp, &self.path) {
                discard_temp(&temp);
                return Err(e.into());
            }
            // The new file is live from here on.
            self.commit_placements(placements);
            if self.options.sync {
                sync_parent_dir(&self.path)?;
            }
        } else {
            let placements = self.write_file(&self.path, declared)?;
            self.commit_placements(placements);
        }

        debug!(path = %self.path.display(), uuid = %self.uuid, streams = self.streams.len(), "wrote container");
        Ok(())
    }

    /// Point every descriptor at where it landed in the file now at `path`.
    fn commit_placements(&mut self, placements: Vec<Placement>) {
        for (stream, placement) in self.streams.iter_mut().zip(placements) {
            // Ranges into the replaced file are stale; point them at the new one.
            if stream.source.path() == Some(self.path.as_path()) {
                stream.source = StreamSource::FilePart {
                    path:   self.path.clone(),
                    offset: placement.offset,
                    length: Some(placement.length),
                };
            }
            stream.offset   = Some(placement.offset);
            stream.length   = placement.length;
            stream.checksum = placement.checksum;
        }
    }

    fn write_file(&self, path: &Path, declared: u64) -> Result<Vec<Placement>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut out = BufWriter::new(file);
        let placements = self.encode(&mut out, declared)?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        if self.options.sync {
            file.sync_all()?;
        }
        Ok(placements)
    }

    /// Header, payload, directory, metadata.  The payload-length field is
    /// written from the declared lengths and patched if the sources yielded
    /// a different byte count.
    fn encode<W: Write + Seek>(&self, out: &mut W, declared: u64) -> Result<Vec<Placement>> {
        out.write_all(HEADER)?;
        out.write_u64::<LittleEndian>(declared)?;

        let mut position   = PAYLOAD_START;
        let mut entries    = Vec::with_capacity(self.streams.len());
        let mut placements = Vec::with_capacity(self.streams.len());

        for stream in &self.streams {
            let offset = position;
            let mut chunks = stream.read_chunked_with(self.options.chunk_size, true)?;
            for chunk in chunks.by_ref() {
                let chunk = chunk?;
                out.write_all(&chunk)?;
                position += chunk.len() as u64;
            }
            let checksum = chunks.finalize();
            let length = position - offset;
            trace!(id = %stream.id, offset, length, "wrote stream");

            entries.push(DirectoryEntry {
                id:           stream.id,
                content_type: stream.content_type,
                encoding:     stream.encoding,
                offset,
                length,
                checksum:     checksum.unwrap_or_default(),
            });
            placements.push(Placement { offset, length, checksum });
        }

        directory::write_stream_list(&mut *out, &self.uuid, &entries)?;
        directory::write_metadata_block(&mut *out, &self.stream_metadata, Field::StreamMetadata)?;
        directory::write_metadata_block(&mut *out, &self.metadata, Field::UserMetadata)?;

        let payload_len = position - PAYLOAD_START;
        if payload_len != declared {
            debug!(declared, payload_len, "patching payload length");
            out.seek(SeekFrom::Start(HEADER.len() as u64))?;
            out.write_u64::<LittleEndian>(payload_len)?;
            out.seek(SeekFrom::End(0))?;
        }
        Ok(placements)
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Sibling of `path` used while writing: `<name>.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("container"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn discard_temp(temp: &Path) {
    match fs::remove_file(temp) {
        Ok(()) => debug!(path = %temp.display(), "removed partial container"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "could not remove partial container"),
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn options_default_and_partial_json() {
        let opts = ContainerOptions::default();
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(opts.use_temp);
        assert!(opts.sync);

        let opts: ContainerOptions = serde_json::from_str(r#"{"use_temp": false}"#).unwrap();
        assert!(!opts.use_temp);
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn temp_path_is_a_sibling() {
        assert_eq!(temp_path(Path::new("/data/a.scf")), PathBuf::from("/data/a.scf.tmp"));
        assert_eq!(temp_path(Path::new("a.scf")), PathBuf::from("a.scf.tmp"));
    }

    #[test]
    fn encode_places_streams_after_header() {
        let mut c = Container::new("unused.scf");
        c.add_stream(StreamDescriptor::local_data(b"abc".to_vec())).unwrap();
        c.add_stream(StreamDescriptor::local_data(b"defgh".to_vec())).unwrap();

        let mut out = Cursor::new(Vec::new());
        let placements = c.encode(&mut out, 8).unwrap();
        let bytes = out.into_inner();

        assert_eq!(&bytes[..10], HEADER);
        assert_eq!(&bytes[10..18], &8u64.to_le_bytes());
        assert_eq!(&bytes[18..26], b"abcdefgh");
        assert_eq!(placements[0].offset, 18);
        assert_eq!(placements[1].offset, 21);
        assert_eq!(placements[1].length, 5);
        assert_eq!(placements[1].checksum, Some(crc32fast::hash(b"defgh")));
        assert_eq!(&bytes[26..42], c.uuid.as_bytes());
    }

    #[test]
    fn encode_patches_stale_declared_length() {
        let mut c = Container::new("unused.scf");
        c.add_stream(StreamDescriptor::local_data(b"abcd".to_vec())).unwrap();

        let mut out = Cursor::new(Vec::new());
        c.encode(&mut out, 99).unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[10..18], &4u64.to_le_bytes());
    }

    #[test]
    fn reserved_and_duplicate_ids_are_refused() {
        let mut c = Container::new("unused.scf");
        let reserved = Uuid::from_bytes([0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
        assert!(matches!(
            c.add_stream(StreamDescriptor::local_data(vec![1]).with_id(reserved)),
            Err(ContainerError::ReservedStreamId(_))
        ));

        let id = c.add_stream(StreamDescriptor::local_data(vec![1])).unwrap();
        assert!(matches!(
            c.add_stream(StreamDescriptor::local_data(vec![2]).with_id(id)),
            Err(ContainerError::DuplicateStream(_))
        ));
        assert_eq!(c.streams().len(), 1);
        assert!(c.remove_stream(id).is_some());
        assert!(c.streams().is_empty());
    }

    #[test]
    fn placements_are_committed_without_a_sync() {
        let mut c = Container::new("/data/a.scf");
        let own = c
            .add_stream(StreamDescriptor::from_container_entry(
                Path::new("/data/a.scf"),
                &DirectoryEntry {
                    id:           Uuid::from_bytes([0x11; 16]),
                    content_type: Default::default(),
                    encoding:     Default::default(),
                    offset:       500,
                    length:       3,
                    checksum:     7,
                },
            ))
            .unwrap();
        let local = c.add_stream(StreamDescriptor::local_data(b"abcde".to_vec())).unwrap();

        c.commit_placements(vec![
            Placement { offset: 18, length: 3, checksum: Some(0xAA) },
            Placement { offset: 21, length: 5, checksum: Some(0xBB) },
        ]);

        let own = c.stream(own).unwrap();
        assert_eq!(own.offset, Some(18));
        assert_eq!(own.checksum, Some(0xAA));
        match &own.source {
            StreamSource::FilePart { path, offset, length } => {
                assert_eq!(path, Path::new("/data/a.scf"));
                assert_eq!(*offset, 18);
                assert_eq!(*length, Some(3));
            }
            other => panic!("expected a file range, got {other:?}"),
        }

        let local = c.stream(local).unwrap();
        assert_eq!((local.offset, local.length, local.checksum), (Some(21), 5, Some(0xBB)));
        assert!(matches!(local.source, StreamSource::LocalData(_)));
    }

    #[test]
    fn unwritten_stream_cannot_be_read_from_disk() {
        let mut c = Container::new("unused.scf");
        let id = c.add_stream(StreamDescriptor::local_data(vec![1, 2])).unwrap();
        assert!(matches!(c.read_stream(id), Err(ContainerError::Unwritten(_))));
        assert!(matches!(c.read_stream(Uuid::new_v4()), Err(ContainerError::StreamNotFound(_))));
    }
}
