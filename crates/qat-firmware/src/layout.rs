//! On-disk layouts of the UOF, SUOF and MOF containers.
//!
//! Every struct here mirrors the byte layout of the container exactly.
//! Fields use little-endian wrapper types so the structs are alignment-free
//! and may be read from any offset with `read_from_prefix`.
//!
//! ```text
//! UOF   [file hdr 12][file chunk 20]*  ──► UOF_OBJS: [obj hdr 20][obj chunk 16]*
//!                                            UOF_STRT | UOF_IMAG* | UOF_IMEM
//! SUOF  [file hdr 16][chunk 24]*       ──► chunk 0 symbols, chunk 1.. signed images
//! MOF   [file hdr 16][chunk 24]*       ──► SYM_OBJS | UOF_OBJS | SUF_OBJS
//!                                            [obj hdr 8][obj chunk 32]*
//! ```

#![allow(missing_docs)]

use std::mem::size_of;

use zerocopy::byteorder::little_endian::{I16, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{FirmwareError, Result};

/// 8-byte chunk identifier.
pub type ChunkId = [u8; 8];

// ── Identifiers ──────────────────────────────────────────────────────────────

/// UOF file id.
pub const UOF_FILE_ID: u16 = 0xc6c2;
/// UOF major version.
pub const UOF_MAJ_VER: u8 = 0x04;
/// UOF minor version.
pub const UOF_MIN_VER: u8 = 0x11;

/// SUOF file id (`"SUOF"` read as a little-endian word).
pub const SUOF_FILE_ID: u32 = 0x5355_4f46;
/// SUOF major version.
pub const SUOF_MAJ_VER: u8 = 0;
/// SUOF minor version.
pub const SUOF_MIN_VER: u8 = 1;

/// MOF file id.
pub const MOF_FILE_ID: u32 = 0x0066_6f6d;
/// MOF major version.
pub const MOF_MAJ_VER: u8 = 0;
/// MOF minor version.
pub const MOF_MIN_VER: u8 = 1;

/// UOF object chunk inside a UOF file, also the UOF group inside a MOF.
pub const UOF_OBJS: ChunkId = *b"UOF_OBJS";
/// UOF string table.
pub const UOF_STRT: ChunkId = *b"UOF_STRT";
/// UOF image.
pub const UOF_IMAG: ChunkId = *b"UOF_IMAG";
/// UOF memory-init table.
pub const UOF_IMEM: ChunkId = *b"UOF_IMEM";
/// MOF symbol table.
pub const SYM_OBJS: ChunkId = *b"SYM_OBJS";
/// MOF SUOF group.
pub const SUF_OBJS: ChunkId = *b"SUF_OBJS";
/// SUOF object inside a MOF group, also used for SUOF image chunks.
pub const SUF_IMAG: ChunkId = *b"SUF_IMAG";

// ── UOF ──────────────────────────────────────────────────────────────────────

/// UOF file header (12 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofFileHeader {
    pub file_id: U16,
    pub reserved1: U16,
    pub min_ver: u8,
    pub maj_ver: u8,
    pub reserved2: U16,
    pub max_chunks: U16,
    pub num_chunks: U16,
}

/// UOF file chunk header (20 bytes). Offsets are file-relative.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofFileChunk {
    pub id: ChunkId,
    pub checksum: U32,
    pub offset: U32,
    pub size: U32,
}

/// UOF object header (20 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofObjHeader {
    pub ac_dev_type: U32,
    pub min_cpu_ver: U16,
    pub max_cpu_ver: U16,
    pub max_chunks: I16,
    pub num_chunks: I16,
    pub reserved1: U32,
    pub reserved2: U32,
}

/// UOF object chunk header (16 bytes). Offsets are object-relative.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofObjChunk {
    pub id: ChunkId,
    pub offset: U32,
    pub size: U32,
}

/// UOF image header (64 bytes). Table offsets are object-relative.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofImage {
    pub img_name: U32,
    pub ae_assigned: U32,
    pub ctx_assigned: U32,
    pub ac_dev_type: U32,
    pub entry_address: U32,
    pub fill_pattern: [U32; 2],
    pub reloadable_size: U32,
    pub sensitivity: u8,
    pub reserved: u8,
    pub ae_mode: U16,
    pub max_ver: U16,
    pub min_ver: U16,
    pub image_attrib: U16,
    pub reserved2: U16,
    pub page_region_num: U16,
    pub numpages: U16,
    pub reg_tab_offset: U32,
    pub init_reg_sym_tab: U32,
    pub sbreak_tab: U32,
    pub app_meta_data: U32,
}

/// UOF code page (32 bytes), immediately after its image header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofCodePage {
    pub page_region: u8,
    pub page_num: u8,
    pub def_page: u8,
    pub reserved: u8,
    pub beg_addr_v: U32,
    pub beg_addr_p: U32,
    pub neigh_reg_tab_offset: U32,
    pub uc_var_tab_offset: U32,
    pub imp_var_tab_offset: U32,
    pub imp_expr_tab_offset: U32,
    pub code_area_offset: U32,
}

/// Object table header: entry count, entries follow.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofObjTable {
    pub entry_num: U32,
}

/// Code area (8 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofCodeArea {
    pub micro_words_num: U32,
    pub uword_block_tab: U32,
}

/// Instruction block (16 bytes). `uword_offset` is object-relative.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofUwordBlock {
    pub start_addr: U32,
    pub num_words: U32,
    pub uword_offset: U32,
    pub reserved: U32,
}

/// Register-init symbol (16 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofInitRegSym {
    pub sym_name: U32,
    pub init_type: u8,
    pub value_type: u8,
    pub reg_type: u8,
    pub ctx: u8,
    pub reg_addr: U32,
    pub value: U32,
}

/// AE register descriptor (24 bytes), used by register and neighbor tables.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofAeReg {
    pub name: U32,
    pub vis_name: U32,
    pub reg_type: U16,
    pub addr: U16,
    pub access_mode: U16,
    pub visible: u8,
    pub reserved1: u8,
    pub ref_count: U16,
    pub reserved2: U16,
    pub xo_id: U32,
}

/// Software breakpoint (20 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofSbreak {
    pub page_num: U32,
    pub virt_uaddr: U32,
    pub sbreak_type: u8,
    pub reg_type: u8,
    pub reserved1: U16,
    pub addr_offset: U32,
    pub reg_addr: U32,
}

/// Memory-init record (20 bytes), followed by `val_attr_num` value pairs.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofInitMem {
    pub sym_name: U32,
    pub region: u8,
    pub scope: u8,
    pub reserved1: U16,
    pub addr: U32,
    pub num_in_bytes: U32,
    pub val_attr_num: U32,
}

/// Memory-init value (8 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UofMemVarAttr {
    pub offset_in_byte: U32,
    pub value: U32,
}

/// Bytes per packed instruction word in a UOF.
pub const UWORD_BYTES: usize = 6;

// ── SUOF ─────────────────────────────────────────────────────────────────────

/// SUOF file header (16 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SuofFileHeader {
    pub file_id: U32,
    pub checksum: U32,
    pub min_ver: u8,
    pub maj_ver: u8,
    pub fw_type: u8,
    pub reserved: u8,
    pub max_chunks: U16,
    pub num_chunks: U16,
}

/// 64-bit chunk header shared by SUOF and MOF (24 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct WideChunk {
    pub id: ChunkId,
    pub offset: U64,
    pub size: U64,
}

/// Prefix of every SUOF image chunk (8 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SuofObjHeader {
    pub img_length: U32,
    pub reserved: U32,
}

/// Signing header at the start of a signed image (128 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CssHeader {
    pub module_type: U32,
    pub header_len: U32,
    pub header_ver: U32,
    pub module_id: U32,
    pub module_vendor: U32,
    pub date: U32,
    pub size: U32,
    pub key_size: U32,
    pub module_size: U32,
    pub exponent_size: U32,
    pub fw_type: U32,
    pub reserved: [U32; 21],
}

/// AE-mode metadata inside a signed image (552 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SimgAeMode {
    pub file_id: U32,
    pub maj_ver: U16,
    pub min_ver: U16,
    pub dev_type: U32,
    pub devmax_ver: U16,
    pub devmin_ver: U16,
    pub ae_mask: U32,
    pub ctx_enables: U32,
    pub fw_type: u8,
    pub ctx_mode: u8,
    pub nn_mode: u8,
    pub lm0_mode: u8,
    pub lm1_mode: u8,
    pub scs_mode: u8,
    pub lm2_mode: u8,
    pub lm3_mode: u8,
    pub tindex_mode: u8,
    pub reserved: [u8; 7],
    pub simg_name: [u8; 256],
    pub appmeta_data: [u8; 256],
}

/// RSA modulus length of the firmware signing key.
pub const CSS_MODULUS_LEN: usize = 256;
/// RSA exponent length.
pub const CSS_EXPONENT_LEN: usize = 4;
/// Signature length.
pub const CSS_SIGNATURE_LEN: usize = 256;
/// Zero padding between modulus and exponent in the FCU key layout.
pub const CSS_KEY_PAD_LEN: usize = 252;
/// Offset of the AE-mode block inside a signed image.
pub const SIMG_AE_MODE_OFFSET: usize =
    CSS_HEADER_LEN + CSS_MODULUS_LEN + CSS_EXPONENT_LEN + CSS_SIGNATURE_LEN;
/// Initialization-sequence area after the AE-mode block.
pub const SIMG_INIT_SEQ_LEN: usize = 50 * 8;
/// Instruction area after the initialization sequence.
pub const SIMG_INSTS_LEN: usize = 0x4000 * 8;
/// Largest signed image the FCU accepts.
pub const CSS_MAX_IMAGE_LEN: usize = 0x40000;
/// CSS module type of AE firmware.
pub const CSS_AE_FIRMWARE: u32 = 0;

/// Size of [`CssHeader`].
pub const CSS_HEADER_LEN: usize = size_of::<CssHeader>();
/// Size of [`SimgAeMode`].
pub const SIMG_AE_MODE_LEN: usize = size_of::<SimgAeMode>();

// ── MOF ──────────────────────────────────────────────────────────────────────

/// MOF file header (16 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MofFileHeader {
    pub file_id: U32,
    pub checksum: U32,
    pub min_ver: u8,
    pub maj_ver: u8,
    pub reserved: U16,
    pub max_chunks: U16,
    pub num_chunks: U16,
}

/// MOF object-group header (8 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MofObjHeader {
    pub max_chunks: U16,
    pub num_chunks: U16,
    pub reserved: U32,
}

/// MOF object chunk (32 bytes). `offset` is relative to the group header,
/// `name` is an offset into the symbol table.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MofObjChunk {
    pub id: ChunkId,
    pub offset: U64,
    pub size: U64,
    pub name: U32,
    pub reserved: U32,
}

const _: () = {
    assert!(size_of::<UofFileHeader>() == 12);
    assert!(size_of::<UofFileChunk>() == 20);
    assert!(size_of::<UofObjHeader>() == 20);
    assert!(size_of::<UofObjChunk>() == 16);
    assert!(size_of::<UofImage>() == 64);
    assert!(size_of::<UofCodePage>() == 32);
    assert!(size_of::<UofUwordBlock>() == 16);
    assert!(size_of::<UofInitRegSym>() == 16);
    assert!(size_of::<UofAeReg>() == 24);
    assert!(size_of::<UofSbreak>() == 20);
    assert!(size_of::<UofInitMem>() == 20);
    assert!(size_of::<SuofFileHeader>() == 16);
    assert!(size_of::<WideChunk>() == 24);
    assert!(size_of::<CssHeader>() == 128);
    assert!(size_of::<SimgAeMode>() == 552);
    assert!(size_of::<MofFileHeader>() == 16);
    assert!(size_of::<MofObjHeader>() == 8);
    assert!(size_of::<MofObjChunk>() == 32);
};

// ── Bounds-checked access ────────────────────────────────────────────────────

/// Read a `T` at `offset`, rejecting reads past the end of `buf`.
pub(crate) fn read_at<T: FromBytes>(buf: &[u8], offset: usize, what: &str) -> Result<T> {
    let tail = buf
        .get(offset..)
        .ok_or_else(|| FirmwareError::format(format!("{what} offset {offset:#x} out of bounds")))?;
    T::read_from_prefix(tail)
        .map(|(value, _)| value)
        .map_err(|_| FirmwareError::format(format!("{what} at {offset:#x} truncated")))
}

/// `len` bytes at `offset`.
pub(crate) fn slice_at<'a>(buf: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            FirmwareError::format(format!(
                "{what} [{offset:#x}, +{len:#x}) exceeds {:#x}-byte buffer",
                buf.len()
            ))
        })
}

/// Convert a 64-bit on-disk offset or size to `usize`.
pub(crate) fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| FirmwareError::format(format!("{what} {value:#x} too large")))
}

/// NUL-terminated string at the start of `bytes`, lossily decoded.
pub(crate) fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Printable form of a chunk id.
#[must_use]
pub fn chunk_id_str(id: &ChunkId) -> String {
    c_string(id)
}
