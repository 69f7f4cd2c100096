//! Directory codec: container uuid, stream list and the two metadata blocks.
//!
//! Every fixed-width field is followed by [`MARKER`].  The stream list has no
//! count; it ends where a stream-id slot starts with the marker instead of an
//! id.  That probe is the only ambiguous read in the format and is confined
//! to [`read_id_or_terminator`].

use std::collections::HashSet;
use std::io::{self, Read, Seek, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::trace;
use uuid::Uuid;

use crate::error::{ContainerError, Field, Result};
use crate::format::{ContentType, EncodingId, MARKER, UUID_SIZE};
use crate::metadata::{self, Metadata};

/// One persisted stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id:           Uuid,
    pub content_type: ContentType,
    pub encoding:     EncodingId,
    pub offset:       u64,
    pub length:       u64,
    pub checksum:     u32,
}

impl DirectoryEntry {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(self.id.as_bytes())?;
        writer.write_all(MARKER)?;
        writer.write_u16::<LittleEndian>(self.content_type.0)?;
        writer.write_all(MARKER)?;
        writer.write_u16::<LittleEndian>(self.encoding.0)?;
        writer.write_all(MARKER)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_all(MARKER)?;
        writer.write_u64::<LittleEndian>(self.length)?;
        writer.write_all(MARKER)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        writer.write_all(MARKER)?;
        Ok(())
    }

    /// Decode the fields that follow an already-read id.
    fn read_after_id<R: Read + Seek>(reader: &mut R, id: Uuid, index: usize) -> Result<Self> {
        expect_marker(reader, Field::StreamId(index))?;

        let content_type = ContentType(read_field(reader, Field::ContentType(index), |r| {
            r.read_u16::<LittleEndian>()
        })?);
        expect_marker(reader, Field::ContentType(index))?;

        let encoding = EncodingId(read_field(reader, Field::Encoding(index), |r| {
            r.read_u16::<LittleEndian>()
        })?);
        expect_marker(reader, Field::Encoding(index))?;

        let offset = read_field(reader, Field::Offset(index), |r| r.read_u64::<LittleEndian>())?;
        expect_marker(reader, Field::Offset(index))?;

        let length = read_field(reader, Field::Length(index), |r| r.read_u64::<LittleEndian>())?;
        expect_marker(reader, Field::Length(index))?;

        let checksum = read_field(reader, Field::Checksum(index), |r| r.read_u32::<LittleEndian>())?;
        expect_marker(reader, Field::Checksum(index))?;

        Ok(Self { id, content_type, encoding, offset, length, checksum })
    }
}

/// Everything stored after the payload area.
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    pub uuid:            Uuid,
    pub entries:         Vec<DirectoryEntry>,
    pub stream_metadata: Metadata,
    pub metadata:        Metadata,
}

impl Directory {
    /// Decode from the current position, which must be the first byte after
    /// the payload area.
    pub fn read<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let (uuid, entries) = read_stream_list(&mut reader)?;
        let stream_metadata = read_metadata_block(&mut reader, Field::StreamMetadata)?;
        let metadata = read_metadata_block(&mut reader, Field::UserMetadata)?;
        Ok(Self { uuid, entries, stream_metadata, metadata })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        write_stream_list(&mut writer, &self.uuid, &self.entries)?;
        write_metadata_block(&mut writer, &self.stream_metadata, Field::StreamMetadata)?;
        write_metadata_block(&mut writer, &self.metadata, Field::UserMetadata)?;
        Ok(())
    }
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// Container uuid, every entry, then the terminating marker.
pub fn write_stream_list<W: Write>(mut writer: W, uuid: &Uuid, entries: &[DirectoryEntry]) -> Result<()> {
    writer.write_all(uuid.as_bytes())?;
    writer.write_all(MARKER)?;
    for entry in entries {
        entry.write(&mut writer)?;
    }
    writer.write_all(MARKER)?;
    Ok(())
}

/// u64 length prefix followed by the encoded mapping.
pub fn write_metadata_block<W: Write>(mut writer: W, map: &Metadata, field: Field) -> Result<()> {
    let bytes = metadata::encode(map, field)?;
    writer.write_u64::<LittleEndian>(bytes.len() as u64)?;
    writer.write_all(&bytes)?;
    Ok(())
}

// ── Decoding ────────────────────────────────────────────────────────────────

pub fn read_stream_list<R: Read + Seek>(reader: &mut R) -> Result<(Uuid, Vec<DirectoryEntry>)> {
    let mut uuid = [0u8; UUID_SIZE];
    read_field(reader, Field::ContainerUuid, |r| r.read_exact(&mut uuid))?;
    expect_marker(reader, Field::ContainerUuid)?;

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    while let Some(id) = read_id_or_terminator(reader, entries.len())? {
        if !seen.insert(id) {
            return Err(ContainerError::DuplicateStream(id));
        }
        let entry = DirectoryEntry::read_after_id(reader, id, entries.len())?;
        trace!(index = entries.len(), id = %entry.id, offset = entry.offset, length = entry.length, "decoded entry");
        entries.push(entry);
    }
    Ok((Uuid::from_bytes(uuid), entries))
}

pub fn read_metadata_block<R: Read + Seek>(reader: &mut R, field: Field) -> Result<Metadata> {
    let len = read_field(reader, field, |r| r.read_u64::<LittleEndian>())?;
    let position = reader.stream_position()?;
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(ContainerError::Truncated { field, position: position + bytes.len() as u64 });
    }
    metadata::decode(&bytes, field)
}

/// Read the next stream-id slot.
///
/// The first two bytes are probed: the marker ends the list (`None`), an
/// empty read means the file ended before the terminator, anything else is
/// the start of a 16-byte id.
///
/// A damaged terminator is therefore indistinguishable from an id: the
/// metadata blocks behind it are decoded as one more entry, and the error
/// that eventually surfaces names a field of that phantom entry rather than
/// the terminator.
pub fn read_id_or_terminator<R: Read + Seek>(reader: &mut R, index: usize) -> Result<Option<Uuid>> {
    let position = reader.stream_position()?;
    let mut id = [0u8; UUID_SIZE];

    let probed = read_up_to(reader, &mut id[..MARKER.len()])?;
    if probed < MARKER.len() {
        return Err(ContainerError::Truncated { field: Field::StreamId(index), position: position + probed as u64 });
    }
    if id[..MARKER.len()] == MARKER[..] {
        return Ok(None);
    }

    reader
        .read_exact(&mut id[MARKER.len()..])
        .map_err(|e| ContainerError::from_read(e, Field::StreamId(index), position))?;
    Ok(Some(Uuid::from_bytes(id)))
}

/// Validate the marker that follows `field`.
fn expect_marker<R: Read + Seek>(reader: &mut R, field: Field) -> Result<()> {
    let position = reader.stream_position()?;
    let mut found = [0u8; 2];
    reader
        .read_exact(&mut found)
        .map_err(|e| ContainerError::from_read(e, field, position))?;
    if &found != MARKER {
        return Err(ContainerError::BadMarker { field, position, expected: *MARKER, found });
    }
    Ok(())
}

fn read_field<R, T, F>(reader: &mut R, field: Field, read: F) -> Result<T>
where
    R: Read + Seek,
    F: FnOnce(&mut R) -> io::Result<T>,
{
    let position = reader.stream_position()?;
    read(reader).map_err(|e| ContainerError::from_read(e, field, position))
}

/// Like `read_exact`, but reports how much was read instead of failing at EOF.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
