//! Length-prefixed records, the framing primitive used everywhere in the
//! format: header records, index entries, fragment bodies and the elements of
//! encoded lists and dicts.
//!
//! ```text
//! [ length: u64 LE ][ payload: length bytes ]
//! ```

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{FormatError, Result};

/// Size of the length prefix in front of every record.
pub const LENGTH_PREFIX_SIZE: u64 = 8;

/// Frame `payload` into a freshly allocated record.
pub fn pack_record(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE as usize + payload.len());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn write_record<W: Write>(mut writer: W, payload: &[u8]) -> io::Result<()> {
    writer.write_u64::<LittleEndian>(payload.len() as u64)?;
    writer.write_all(payload)
}

/// Read one record.  Running out of bytes anywhere inside it is a
/// [`FormatError`], including a stream that is already exhausted.
pub fn read_record<R: Read>(reader: R) -> Result<Vec<u8>> {
    try_read_record(reader)?.ok_or_else(|| FormatError::TruncatedLength { found: 0 }.into())
}

/// Like [`read_record`], but a stream at a clean end (zero bytes left)
/// yields `Ok(None)` instead of an error.
pub fn try_read_record<R: Read>(mut reader: R) -> Result<Option<Vec<u8>>> {
    let length = match read_length(&mut reader)? {
        Some(length) => length,
        None => return Ok(None),
    };

    // `take` keeps a corrupt length from turning into a huge allocation.
    let mut payload = Vec::new();
    (&mut reader).take(length).read_to_end(&mut payload)?;
    if payload.len() as u64 != length {
        return Err(FormatError::TruncatedPayload {
            declared: length,
            found:    payload.len() as u64,
        }
        .into());
    }
    Ok(Some(payload))
}

fn read_length<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut buf = [0u8; LENGTH_PREFIX_SIZE as usize];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        8 => Ok(Some(LittleEndian::read_u64(&buf))),
        found => Err(FormatError::TruncatedLength { found }.into()),
    }
}

// ── In-memory parsing ────────────────────────────────────────────────────────

/// Iterator over consecutive records packed into a byte slice.
///
/// Yields borrowed payloads.  The first framing error is yielded once and
/// ends the iteration.
pub struct Records<'a> {
    buf: &'a [u8],
}

impl<'a> Records<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = std::result::Result<&'a [u8], FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let buf = std::mem::take(&mut self.buf);
        if buf.len() < LENGTH_PREFIX_SIZE as usize {
            return Some(Err(FormatError::TruncatedLength { found: buf.len() }));
        }
        let (prefix, rest) = buf.split_at(LENGTH_PREFIX_SIZE as usize);
        let length = LittleEndian::read_u64(prefix);
        if length > rest.len() as u64 {
            return Some(Err(FormatError::TruncatedPayload {
                declared: length,
                found:    rest.len() as u64,
            }));
        }
        let (payload, tail) = rest.split_at(length as usize);
        self.buf = tail;
        Some(Ok(payload))
    }
}
