use chrono::{DateTime, Utc};
use std::io::{Read, Write};

use crate::codec::{self, Dict, Value};
use crate::error::{BakedError, Result};
use crate::frame::{try_read_record, write_record};
use crate::fragments::ContentHash;

/// Metadata key that carries the fragment table's content hash.
///
/// Only the writer sets it, and only when hashing is enabled; caller metadata
/// holding this key is rejected.  The value is a `bytes` value with the
/// 32-byte SHA-256 digest.
pub const HASH_KEY: &str = "--fh";

/// File extension every archive carries.
pub const EXTENSION: &str = ".baked";

/// The two records in front of the fragment table.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub created:  DateTime<Utc>,
    pub metadata: Dict,
}

impl Header {
    pub fn new(created: DateTime<Utc>, metadata: Dict) -> Self {
        Self { created, metadata }
    }

    /// Stored content hash, if the archive was built with hashing.
    pub fn content_hash(&self) -> Option<&[u8]> {
        self.metadata.get(HASH_KEY).and_then(Value::as_bytes)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        write_record(&mut writer, &codec::encode(&Value::DateTime(self.created))?)?;
        write_record(&mut writer, &codec::encode(&Value::Dict(self.metadata.clone()))?)?;
        Ok(())
    }

    /// Read both records.  A missing, truncated or mistyped record is
    /// [`BakedError::CorruptHeader`]; a record holding an unregistered type
    /// surfaces as [`BakedError::UnsupportedType`].
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let created = match decode_record(&mut reader, "creation timestamp not found")? {
            Value::DateTime(dt) => dt,
            _ => return Err(BakedError::CorruptHeader("creation timestamp is not a datetime")),
        };
        let metadata = match decode_record(&mut reader, "metadata not found")? {
            Value::Dict(dict) => dict,
            _ => return Err(BakedError::CorruptHeader("metadata is not a dict")),
        };
        Ok(Self { created, metadata })
    }
}

fn decode_record<R: Read>(reader: R, missing: &'static str) -> Result<Value> {
    let record = match try_read_record(reader) {
        Ok(Some(record)) => record,
        Ok(None) | Err(BakedError::Format(_)) => return Err(BakedError::CorruptHeader(missing)),
        Err(e) => return Err(e),
    };
    match codec::decode(&record) {
        Err(BakedError::Format(_)) => Err(BakedError::CorruptHeader(missing)),
        other => other,
    }
}

/// Copy of `metadata` with the content hash injected.
pub fn with_content_hash(metadata: &Dict, hash: ContentHash) -> Dict {
    let mut metadata = metadata.clone();
    metadata.insert(HASH_KEY, Value::Bytes(hash.to_vec()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn sample() -> Header {
        let mut metadata = Dict::new();
        metadata.insert("version", "1.2.0");
        Header::new(Utc.with_ymd_and_hms(2026, 3, 17, 12, 30, 0).unwrap(), metadata)
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample();
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(Header::read(Cursor::new(buf)).unwrap(), header);
    }

    #[test]
    fn test_missing_metadata() {
        let mut buf = Vec::new();
        sample().write(&mut buf).unwrap();
        let first_len = 8 + u64::from_le_bytes(buf[..8].try_into().unwrap()) as usize;
        buf.truncate(first_len);
        match Header::read(Cursor::new(buf)) {
            Err(BakedError::CorruptHeader(msg)) => assert_eq!(msg, "metadata not found"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_stream() {
        assert!(matches!(
            Header::read(Cursor::new(Vec::new())),
            Err(BakedError::CorruptHeader("creation timestamp not found"))
        ));
    }

    #[test]
    fn test_swapped_records() {
        let mut buf = Vec::new();
        write_record(&mut buf, &codec::encode(&Value::Dict(Dict::new())).unwrap()).unwrap();
        assert!(matches!(
            Header::read(Cursor::new(buf)),
            Err(BakedError::CorruptHeader("creation timestamp is not a datetime"))
        ));
    }

    #[test]
    fn test_content_hash_lookup() {
        let header = Header::new(Utc::now(), with_content_hash(&Dict::new(), [7u8; 32]));
        assert_eq!(header.content_hash(), Some(&[7u8; 32][..]));
        assert_eq!(sample().content_hash(), None);
    }
}
