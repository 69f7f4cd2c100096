//! Free-form metadata mappings stored after the directory.
//!
//! The directory codec treats each block as opaque bytes; this module is the
//! only place that knows they are JSON.

use std::collections::BTreeMap;

use crate::error::{ContainerError, Field, Result};

/// String-keyed mapping persisted in the stream-metadata and user-metadata blocks.
pub type Metadata = BTreeMap<String, serde_json::Value>;

pub fn encode(map: &Metadata, field: Field) -> Result<Vec<u8>> {
    serde_json::to_vec(map).map_err(|source| ContainerError::Metadata { field, source })
}

/// An empty block decodes to an empty mapping.
pub fn decode(bytes: &[u8], field: Field) -> Result<Metadata> {
    if bytes.is_empty() {
        return Ok(Metadata::new());
    }
    serde_json::from_slice(bytes).map_err(|source| ContainerError::Metadata { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapping_survives_encoding() {
        let mut map = Metadata::new();
        map.insert("title".into(), json!("holiday"));
        map.insert("tracks".into(), json!([1, 2, 3]));
        let bytes = encode(&map, Field::UserMetadata).unwrap();
        assert_eq!(decode(&bytes, Field::UserMetadata).unwrap(), map);
    }

    #[test]
    fn empty_block_is_empty_mapping() {
        assert!(decode(&[], Field::StreamMetadata).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_a_format_error() {
        let err = decode(b"{not json", Field::StreamMetadata).unwrap_err();
        assert!(err.is_format_error());
        assert!(err.to_string().starts_with("Undecodable stream metadata"));
    }
}
