//! Multi-object archive parser.
//!
//! A MOF bundles named UOF and SUOF objects behind one symbol table. Parsing
//! only indexes the archive; the selected object is handed to its own parser.

use std::mem::size_of;

use bytes::Bytes;
use tracing::debug;

use crate::checksum::checksum;
use crate::error::{FirmwareError, Result};
use crate::layout::{
    read_at, slice_at, to_usize, MofFileHeader, MofObjChunk, MofObjHeader, MOF_FILE_ID,
    MOF_MAJ_VER, MOF_MIN_VER, SUF_IMAG, SUF_OBJS, SYM_OBJS, UOF_IMAG, UOF_OBJS,
};
use crate::strtab::StringTable;
use crate::suof::read_wide_chunks;
use crate::uof::ChunkInfo;

const HEADER_LEN: usize = size_of::<MofFileHeader>();
const OBJ_HEADER_LEN: usize = size_of::<MofObjHeader>();
const OBJ_CHUNK_LEN: usize = size_of::<MofObjChunk>();
const CHECKSUM_START: usize = 8;

/// Kind of object stored in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Plain object.
    Uof,
    /// Signed object.
    Suof,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Uof => "UOF",
            Self::Suof => "SUOF",
        })
    }
}

/// One named object inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MofEntry {
    /// Object name.
    pub name: String,
    /// Object kind.
    pub kind: ObjectKind,
    /// File-relative byte offset.
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
}

/// Indexed MOF archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MofArchive {
    /// Top-level chunk table.
    pub chunks: Vec<ChunkInfo>,
    /// Shared symbol table.
    pub symbols: StringTable,
    /// Objects in group order (UOF group entries, then SUOF).
    pub entries: Vec<MofEntry>,
    buf: Bytes,
}

/// Whether `buf` starts with the MOF file id.
#[must_use]
pub fn is_mof(buf: &[u8]) -> bool {
    buf.len() >= 4 && u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) == MOF_FILE_ID
}

impl MofArchive {
    /// Parse and index a MOF file.
    ///
    /// # Errors
    ///
    /// Returns a format error for bad magic, version, checksum, chunk count,
    /// missing symbol table or out-of-bounds object.
    pub fn parse(buf: Bytes) -> Result<Self> {
        debug!("Parsing MOF ({} bytes)", buf.len());
        let hdr: MofFileHeader = read_at(&buf, 0, "MOF file header")?;
        if hdr.file_id.get() != MOF_FILE_ID {
            return Err(FirmwareError::format(format!(
                "MOF file id {:#010x}, expected {MOF_FILE_ID:#010x}",
                hdr.file_id.get()
            )));
        }
        if hdr.maj_ver != MOF_MAJ_VER || hdr.min_ver != MOF_MIN_VER {
            return Err(FirmwareError::format(format!(
                "MOF version {}.{} unsupported",
                hdr.maj_ver, hdr.min_ver
            )));
        }
        let num_chunks = usize::from(hdr.num_chunks.get());
        if num_chunks <= 1 || num_chunks > usize::from(hdr.max_chunks.get()) {
            return Err(FirmwareError::format(format!(
                "MOF chunk count {num_chunks} invalid (maximum {})",
                hdr.max_chunks.get()
            )));
        }
        let computed = checksum(&buf[CHECKSUM_START..]);
        if computed != hdr.checksum.get() {
            return Err(FirmwareError::format(format!(
                "MOF checksum {:#06x}, computed {computed:#06x}",
                hdr.checksum.get()
            )));
        }

        let chunks = read_wide_chunks(&buf, HEADER_LEN, num_chunks, "MOF chunk")?;
        let sym = chunks
            .iter()
            .find(|c| c.id == SYM_OBJS)
            .ok_or_else(|| FirmwareError::format("MOF has no SYM_OBJS chunk"))?;
        let symbols = StringTable::parse(&buf, sym.offset, 0)?;

        let mut entries = Vec::new();
        for group in chunks.iter().filter(|c| c.id == UOF_OBJS || c.id == SUF_OBJS) {
            parse_group(&buf, group, &symbols, &mut entries)?;
        }
        debug!("MOF indexed {} object(s)", entries.len());
        Ok(Self {
            chunks,
            symbols,
            entries,
            buf,
        })
    }

    /// Entry named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&MofEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Bytes of `entry`.
    #[must_use]
    pub fn object_bytes(&self, entry: &MofEntry) -> Bytes {
        self.buf.slice(entry.offset..entry.offset + entry.size)
    }
}

fn parse_group(
    buf: &[u8],
    group: &ChunkInfo,
    symbols: &StringTable,
    entries: &mut Vec<MofEntry>,
) -> Result<()> {
    let hdr: MofObjHeader = read_at(buf, group.offset, "MOF object header")?;
    let count = usize::from(hdr.num_chunks.get());
    if count > usize::from(hdr.max_chunks.get()) {
        return Err(FirmwareError::format(format!(
            "MOF group {} declares {count} objects, maximum {}",
            group.name(),
            hdr.max_chunks.get()
        )));
    }
    let group_body = slice_at(buf, group.offset, group.size, &group.name())?;
    for i in 0..count {
        let raw: MofObjChunk = read_at(group_body, OBJ_HEADER_LEN + i * OBJ_CHUNK_LEN, "MOF object chunk")?;
        let kind = match raw.id {
            UOF_IMAG => ObjectKind::Uof,
            SUF_IMAG => ObjectKind::Suof,
            other => {
                return Err(FirmwareError::format(format!(
                    "MOF object chunk {:?} has unknown kind",
                    String::from_utf8_lossy(&other)
                )));
            }
        };
        let rel = to_usize(raw.offset.get(), "MOF object offset")?;
        let size = to_usize(raw.size.get(), "MOF object size")?;
        slice_at(group_body, rel, size, "MOF object")?;
        entries.push(MofEntry {
            name: symbols.get(raw.name.get())?,
            kind,
            offset: group.offset + rel,
            size,
        });
    }
    Ok(())
}
