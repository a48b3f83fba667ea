//! Length-prefixed string tables addressed by byte offset.

use bytes::Bytes;

use crate::error::{FirmwareError, Result};
use crate::layout::{c_string, read_at, slice_at};
use zerocopy::byteorder::little_endian::U32;

/// A blob of NUL-terminated strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    strings: Bytes,
}

impl StringTable {
    /// Table over `strings`.
    #[must_use]
    pub fn new(strings: Bytes) -> Self {
        Self { strings }
    }

    /// Parse a table at `offset` in `buf`: a `u32` length, `header_pad`
    /// reserved bytes, then the strings.
    pub(crate) fn parse(buf: &Bytes, offset: usize, header_pad: usize) -> Result<Self> {
        let len = read_at::<U32>(buf, offset, "string table length")?.get() as usize;
        let start = offset + 4 + header_pad;
        slice_at(buf, start, len, "string table")?;
        Ok(Self {
            strings: buf.slice(start..start + len),
        })
    }

    /// String starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a format error if `offset` lies outside the table.
    pub fn get(&self, offset: u32) -> Result<String> {
        let tail = self.strings.get(offset as usize..).ok_or_else(|| {
            FirmwareError::format(format!(
                "string offset {offset:#x} outside {}-byte table",
                self.strings.len()
            ))
        })?;
        Ok(c_string(tail))
    }

    /// Table size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Raw table bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_offset() {
        let table = StringTable::new(Bytes::from_static(b"alpha\0beta\0"));
        assert_eq!(table.get(0).unwrap(), "alpha");
        assert_eq!(table.get(6).unwrap(), "beta");
        assert_eq!(table.get(8).unwrap(), "ta");
        assert!(table.get(64).unwrap_err().is_format());
    }

    #[test]
    fn parse_skips_header_padding() {
        let mut raw = 5u32.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0; 4]);
        raw.extend_from_slice(b"name\0");
        let table = StringTable::parse(&Bytes::from(raw), 0, 4).unwrap();
        assert_eq!(table.get(0).unwrap(), "name");
        assert_eq!(table.len(), 5);
    }
}
