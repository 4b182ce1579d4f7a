//! Fragment table: the index + body section of an archive.
//!
//! ```text
//! { [len][name][len=8][offset: u64 LE] }*N     index block
//! { [len][content] }*N                         body block
//! ```
//!
//! Offsets are measured from the first byte of the table to the body record
//! of each fragment:
//!
//! ```text
//! offset_i = index_block_size + Σ_{j<i} (8 + len(content_j))
//! index_block_size = Σ (len(name) + 24)
//! ```
//!
//! The entry count is never written.  Fragment 0's offset equals the size of
//! the index block, so a reader learns where the index ends from the first
//! entry alone.  Offsets therefore have to be exact, and fragments must never
//! be reordered once offsets have been computed: the table is append-only.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{FormatError, Result};
use crate::frame::{read_record, try_read_record, write_record, LENGTH_PREFIX_SIZE};

/// Bytes an index entry spends beyond its name: the name's length prefix,
/// the offset field's length prefix and the offset itself.
pub const INDEX_ENTRY_OVERHEAD: u64 = 3 * LENGTH_PREFIX_SIZE;

/// SHA-256 digest over all fragments, see [`FragmentTable::hash`].
pub type ContentHash = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name:    Vec<u8>,
    pub content: Vec<u8>,
}

/// One parsed index entry: fragment name and the absolute stream position of
/// its body record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name:   Vec<u8>,
    pub offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FragmentTable {
    fragments: Vec<Fragment>,
}

impl FragmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<Vec<u8>>, content: impl Into<Vec<u8>>) {
        self.fragments.push(Fragment { name: name.into(), content: content.into() });
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn index_block_size(&self) -> u64 {
        self.fragments
            .iter()
            .map(|f| f.name.len() as u64 + INDEX_ENTRY_OVERHEAD)
            .sum()
    }

    /// Offset of fragment `i`'s body record, relative to the table start.
    pub fn offset_of(&self, i: usize) -> u64 {
        self.index_block_size()
            + self.fragments[..i]
                .iter()
                .map(|f| f.content.len() as u64 + LENGTH_PREFIX_SIZE)
                .sum::<u64>()
    }

    /// Size of the serialized table.
    pub fn encoded_len(&self) -> u64 {
        self.offset_of(self.fragments.len())
    }

    /// SHA-256 over `name || content` of every fragment, in order.
    pub fn hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        for fragment in &self.fragments {
            hasher.update(&fragment.name);
            hasher.update(&fragment.content);
        }
        hasher.finalize().into()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let mut offset = self.index_block_size();
        for fragment in &self.fragments {
            write_record(&mut writer, &fragment.name)?;
            write_record(&mut writer, &offset.to_le_bytes())?;
            offset += fragment.content.len() as u64 + LENGTH_PREFIX_SIZE;
        }
        for fragment in &self.fragments {
            write_record(&mut writer, &fragment.content)?;
        }
        debug!(fragments = self.fragments.len(), bytes = offset, "wrote fragment table");
        Ok(())
    }
}

impl FromIterator<Fragment> for FragmentTable {
    fn from_iter<I: IntoIterator<Item = Fragment>>(iter: I) -> Self {
        Self { fragments: iter.into_iter().collect() }
    }
}

// ── Reading ──────────────────────────────────────────────────────────────────

fn read_entry<R: Read>(reader: &mut R) -> Result<(Vec<u8>, u64)> {
    let name = read_record(&mut *reader)?;
    let offset = read_record(&mut *reader)?;
    if offset.len() != 8 {
        return Err(FormatError::CorruptIndex(format!(
            "offset field is {} bytes, expected 8",
            offset.len()
        ))
        .into());
    }
    Ok((name, LittleEndian::read_u64(&offset)))
}

/// Parse the index of a table starting at the current stream position.
///
/// Returns entries in on-disk order with absolute offsets.  The scan stops
/// exactly at the end of the index block, which it learns from the first
/// entry's offset, and never touches a body record.  An entry that runs past
/// that boundary, or an offset pointing back into the index, is reported as
/// [`FormatError::CorruptIndex`] instead of guessing.
pub fn read_index<R: Read + Seek>(reader: &mut R) -> Result<Vec<IndexEntry>> {
    let start = reader.stream_position()?;

    let first_name = match try_read_record(&mut *reader)? {
        Some(name) => name,
        None => return Ok(Vec::new()),
    };
    let offset = read_record(&mut *reader)?;
    if offset.len() != 8 {
        return Err(FormatError::CorruptIndex(format!(
            "offset field is {} bytes, expected 8",
            offset.len()
        ))
        .into());
    }
    let first_offset = LittleEndian::read_u64(&offset);

    let boundary = start.checked_add(first_offset).ok_or_else(|| {
        FormatError::CorruptIndex(format!("first offset {first_offset} overflows"))
    })?;
    let mut position = reader.stream_position()?;
    if position > boundary {
        return Err(FormatError::CorruptIndex(format!(
            "first offset {first_offset} ends inside its own entry"
        ))
        .into());
    }

    let mut entries = vec![IndexEntry { name: first_name, offset: boundary }];
    while position < boundary {
        let (name, offset) = read_entry(reader)?;
        position = reader.stream_position()?;
        if position > boundary {
            return Err(FormatError::CorruptIndex(format!(
                "entry {} runs {} bytes past the index boundary",
                entries.len(),
                position - boundary
            ))
            .into());
        }
        if offset < first_offset {
            return Err(FormatError::CorruptIndex(format!(
                "entry {} points inside the index block",
                entries.len()
            ))
            .into());
        }
        let offset = start.checked_add(offset).ok_or_else(|| {
            FormatError::CorruptIndex(format!("entry {} offset {offset} overflows", entries.len()))
        })?;
        entries.push(IndexEntry { name, offset });
    }

    debug!(entries = entries.len(), index_end = boundary, "read fragment index");
    Ok(entries)
}

/// Recompute [`FragmentTable::hash`] from a serialized table starting at the
/// current stream position.
pub fn hash_from<R: Read + Seek>(reader: &mut R) -> Result<ContentHash> {
    let mut hasher = Sha256::new();
    for entry in read_index(reader)? {
        reader.seek(SeekFrom::Start(entry.offset))?;
        let content = read_record(&mut *reader)?;
        hasher.update(&entry.name);
        hasher.update(&content);
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BakedError;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn table(fragments: &[(&str, &[u8])]) -> FragmentTable {
        let mut table = FragmentTable::new();
        for (name, content) in fragments {
            table.push(name.as_bytes(), *content);
        }
        table
    }

    fn serialize(table: &FragmentTable, prefix: usize) -> Vec<u8> {
        let mut buf = vec![0xAA; prefix];
        table.write(&mut buf).unwrap();
        buf
    }

    /// Parse a serialized table and fetch every body through its offset.
    fn read_back(buf: &[u8], start: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut cursor = Cursor::new(buf);
        cursor.set_position(start);
        let entries = read_index(&mut cursor).unwrap();
        entries
            .into_iter()
            .map(|entry| {
                cursor.set_position(entry.offset);
                (entry.name, read_record(&mut cursor).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_offset_arithmetic() {
        let t = table(&[("a", b"12345"), ("bc", b""), ("def", b"xyz")]);
        assert_eq!(t.index_block_size(), (1 + 24) + (2 + 24) + (3 + 24));
        assert_eq!(t.offset_of(0), 78);
        assert_eq!(t.offset_of(1), 78 + 13);
        assert_eq!(t.offset_of(2), 78 + 13 + 8);
        assert_eq!(t.encoded_len(), serialize(&t, 0).len() as u64);
    }

    #[test]
    fn test_first_offset_is_index_size() {
        let t = table(&[("first", b"body"), ("second", b"more")]);
        let buf = serialize(&t, 0);
        // name record (8 + 5) then the offset record's prefix (8)
        let first_offset = LittleEndian::read_u64(&buf[21..29]);
        assert_eq!(first_offset, t.index_block_size());
    }

    #[test]
    fn test_empty_table() {
        let t = FragmentTable::new();
        let buf = serialize(&t, 4);
        assert_eq!(buf.len(), 4);
        assert!(read_back(&buf, 4).is_empty());
    }

    #[test]
    fn test_single_fragment() {
        let t = table(&[("only", b"one body")]);
        let buf = serialize(&t, 0);
        assert_eq!(read_back(&buf, 0), vec![(b"only".to_vec(), b"one body".to_vec())]);
    }

    #[test]
    fn test_offsets_are_absolute() {
        let t = table(&[("a", b"alpha"), ("b", b"beta")]);
        let buf = serialize(&t, 100);
        let mut cursor = Cursor::new(&buf);
        cursor.set_position(100);
        let entries = read_index(&mut cursor).unwrap();
        assert_eq!(entries[0].offset, 100 + t.offset_of(0));
        assert_eq!(entries[1].offset, 100 + t.offset_of(1));
        // the scan stops at the end of the index block
        assert_eq!(cursor.position(), 100 + t.index_block_size());
    }

    #[test]
    fn test_hash_matches_in_memory() {
        let t = table(&[("pkg.a", b"print(1)"), ("pkg.b", b""), ("c", b"\x00\xff")]);
        let buf = serialize(&t, 7);
        let mut cursor = Cursor::new(&buf);
        cursor.set_position(7);
        assert_eq!(hash_from(&mut cursor).unwrap(), t.hash());
    }

    #[test]
    fn test_hash_depends_on_order() {
        let ab = table(&[("a", b"1"), ("b", b"2")]);
        let ba = table(&[("b", b"2"), ("a", b"1")]);
        assert_ne!(ab.hash(), ba.hash());
    }

    #[test]
    fn test_corrupt_first_offset_aborts() {
        let t = table(&[("a", b"alpha"), ("b", b"beta")]);
        let mut buf = serialize(&t, 0);
        // shift fragment 0's offset by one byte: the boundary no longer lines
        // up with the end of an entry
        buf[17] += 1;
        let mut cursor = Cursor::new(&buf);
        assert!(matches!(
            read_index(&mut cursor),
            Err(BakedError::Format(FormatError::CorruptIndex(_)))
        ));
    }

    #[test]
    fn test_first_offset_inside_entry() {
        let t = table(&[("a", b"alpha")]);
        let mut buf = serialize(&t, 0);
        buf[17..25].copy_from_slice(&3u64.to_le_bytes());
        let mut cursor = Cursor::new(&buf);
        assert!(matches!(
            read_index(&mut cursor),
            Err(BakedError::Format(FormatError::CorruptIndex(_)))
        ));
    }

    /// Serialize `a`/`b` after a 10-byte prefix and overwrite entry 1's offset.
    fn with_second_offset(offset: u64) -> Vec<u8> {
        let t = table(&[("a", b"alpha"), ("b", b"beta")]);
        let mut buf = serialize(&t, 10);
        // prefix, entry 0 (8+1 + 8+8), entry 1's name record (8+1), offset prefix (8)
        let at = 10 + 25 + 9 + 8;
        buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
        buf
    }

    #[test]
    fn test_later_offset_overflow() {
        let buf = with_second_offset(u64::MAX);
        let mut cursor = Cursor::new(&buf);
        cursor.set_position(10);
        assert!(matches!(
            read_index(&mut cursor),
            Err(BakedError::Format(FormatError::CorruptIndex(_)))
        ));
    }

    #[test]
    fn test_later_offset_inside_index() {
        let buf = with_second_offset(0);
        let mut cursor = Cursor::new(&buf);
        cursor.set_position(10);
        assert!(matches!(
            read_index(&mut cursor),
            Err(BakedError::Format(FormatError::CorruptIndex(_)))
        ));
    }

    proptest! {
        #[test]
        fn prop_table_roundtrip(
            fragments in proptest::collection::vec(
                ("[a-z_]{1,12}", proptest::collection::vec(any::<u8>(), 0..64)),
                0..12,
            ),
            prefix in 0usize..32,
        ) {
            let mut t = FragmentTable::new();
            for (name, content) in &fragments {
                t.push(name.as_bytes(), content.clone());
            }
            let buf = serialize(&t, prefix);
            let expected: Vec<(Vec<u8>, Vec<u8>)> = fragments
                .into_iter()
                .map(|(name, content)| (name.into_bytes(), content))
                .collect();
            prop_assert_eq!(read_back(&buf, prefix as u64), expected);
        }
    }
}
