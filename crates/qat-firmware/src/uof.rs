//! Plain (unsigned) firmware object parser.
//!
//! A UOF file is a chunk table whose `UOF_OBJS` chunk holds one object. The
//! object has its own chunk table; every offset inside it, including image
//! table offsets and instruction-block offsets, is relative to the object
//! start. Every file chunk's checksum is verified before anything inside it
//! is read.

use std::mem::size_of;

use bytes::Bytes;
use tracing::{debug, info};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::FromBytes;

use crate::checksum::checksum;
use crate::compat::DeviceTarget;
use crate::error::{FirmwareError, Result};
use crate::image::{
    ae_from_symbol, init_type, region, AeMode, EncapImage, EncapPage, InitMem, InitReg, InitScope,
    MemRegion, MemValue, UwordBlock,
};
use crate::layout::{
    chunk_id_str, read_at, slice_at, ChunkId, UofAeReg, UofCodeArea, UofCodePage, UofFileChunk,
    UofFileHeader, UofImage, UofInitMem, UofInitRegSym, UofMemVarAttr, UofObjChunk, UofObjHeader,
    UofSbreak, UofUwordBlock, UOF_FILE_ID, UOF_IMAG, UOF_IMEM, UOF_MAJ_VER, UOF_MIN_VER, UOF_OBJS,
    UOF_STRT, UWORD_BYTES,
};
use crate::strtab::StringTable;

const FILE_HEADER_LEN: usize = size_of::<UofFileHeader>();
const FILE_CHUNK_LEN: usize = size_of::<UofFileChunk>();
const OBJ_HEADER_LEN: usize = size_of::<UofObjHeader>();
const OBJ_CHUNK_LEN: usize = size_of::<UofObjChunk>();
const IMAGE_LEN: usize = size_of::<UofImage>();

/// Highest AE number an init-mem symbol may name.
pub const MAX_AE: u32 = 32;

/// Chunk descriptor: id, location and (for file chunks) stored checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk id.
    pub id: ChunkId,
    /// Byte offset (file-relative for file chunks, object-relative otherwise).
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
    /// Stored checksum, when the chunk carries one.
    pub checksum: Option<u32>,
}

impl ChunkInfo {
    /// Printable id.
    #[must_use]
    pub fn name(&self) -> String {
        chunk_id_str(&self.id)
    }
}

/// Parsed UOF object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UofObject {
    /// File major version.
    pub maj_ver: u8,
    /// File minor version.
    pub min_ver: u8,
    /// File-level chunk table.
    pub file_chunks: Vec<ChunkInfo>,
    /// Object-level chunk table.
    pub obj_chunks: Vec<ChunkInfo>,
    /// Device-type flags the object supports.
    pub ac_dev_type: u32,
    /// Lowest supported revision.
    pub min_cpu_ver: u16,
    /// Highest supported revision.
    pub max_cpu_ver: u16,
    /// Object string table.
    pub strings: StringTable,
    /// Images in chunk order.
    pub images: Vec<EncapImage>,
    /// Memory-init records in table order.
    pub init_mem: Vec<InitMem>,
}

/// Whether `buf` starts with the UOF file id.
#[must_use]
pub fn is_uof(buf: &[u8]) -> bool {
    buf.len() >= 2 && u16::from_le_bytes([buf[0], buf[1]]) == UOF_FILE_ID
}

impl UofObject {
    /// Parse and validate a UOF file.
    ///
    /// # Errors
    ///
    /// Returns a format error for bad magic, version, chunk bounds or
    /// checksum, and a compatibility error for images that use features the
    /// loader does not support.
    pub fn parse(buf: Bytes) -> Result<Self> {
        debug!("Parsing UOF ({} bytes)", buf.len());
        let hdr: UofFileHeader = read_at(&buf, 0, "UOF file header")?;
        if hdr.file_id.get() != UOF_FILE_ID {
            return Err(FirmwareError::format(format!(
                "UOF file id {:#06x}, expected {UOF_FILE_ID:#06x}",
                hdr.file_id.get()
            )));
        }
        if hdr.maj_ver != UOF_MAJ_VER || hdr.min_ver != UOF_MIN_VER {
            return Err(FirmwareError::format(format!(
                "UOF version {}.{:#x} unsupported",
                hdr.maj_ver, hdr.min_ver
            )));
        }
        let num_chunks = hdr.num_chunks.get();
        if num_chunks > hdr.max_chunks.get() {
            return Err(FirmwareError::format(format!(
                "UOF declares {num_chunks} chunks, maximum {}",
                hdr.max_chunks.get()
            )));
        }

        let mut file_chunks = Vec::with_capacity(usize::from(num_chunks));
        for i in 0..usize::from(num_chunks) {
            let raw: UofFileChunk = read_at(&buf, FILE_HEADER_LEN + i * FILE_CHUNK_LEN, "UOF file chunk")?;
            let chunk = ChunkInfo {
                id: raw.id,
                offset: raw.offset.get() as usize,
                size: raw.size.get() as usize,
                checksum: Some(raw.checksum.get()),
            };
            verify_chunk(&buf, &chunk)?;
            file_chunks.push(chunk);
        }

        let objs = file_chunks
            .iter()
            .find(|c| c.id == UOF_OBJS)
            .ok_or_else(|| FirmwareError::format("UOF has no UOF_OBJS chunk"))?;
        let obj = buf.slice(objs.offset..objs.offset + objs.size);
        let mut object = Self::parse_object(&obj)?;
        object.maj_ver = hdr.maj_ver;
        object.min_ver = hdr.min_ver;
        object.file_chunks = file_chunks;
        info!(
            "UOF parsed: {} image(s), {} init-mem record(s)",
            object.images.len(),
            object.init_mem.len()
        );
        Ok(object)
    }

    fn parse_object(obj: &Bytes) -> Result<Self> {
        let hdr: UofObjHeader = read_at(obj, 0, "UOF object header")?;
        let num_chunks = hdr.num_chunks.get();
        if num_chunks < 0 || num_chunks > hdr.max_chunks.get() {
            return Err(FirmwareError::format(format!(
                "UOF object declares {num_chunks} chunks, maximum {}",
                hdr.max_chunks.get()
            )));
        }

        let mut obj_chunks = Vec::new();
        for i in 0..num_chunks as usize {
            let raw: UofObjChunk = read_at(obj, OBJ_HEADER_LEN + i * OBJ_CHUNK_LEN, "UOF object chunk")?;
            let chunk = ChunkInfo {
                id: raw.id,
                offset: raw.offset.get() as usize,
                size: raw.size.get() as usize,
                checksum: None,
            };
            slice_at(obj, chunk.offset, chunk.size, &chunk.name())?;
            obj_chunks.push(chunk);
        }

        let strings = match obj_chunks.iter().find(|c| c.id == UOF_STRT) {
            Some(c) => StringTable::parse(obj, c.offset, 4)?,
            None => StringTable::default(),
        };

        let images = obj_chunks
            .iter()
            .filter(|c| c.id == UOF_IMAG)
            .map(|c| parse_image(obj, c.offset, &strings))
            .collect::<Result<Vec<_>>>()?;
        if images.is_empty() {
            return Err(FirmwareError::format("UOF object holds no images"));
        }

        let init_mem = match obj_chunks.iter().find(|c| c.id == UOF_IMEM) {
            Some(c) => parse_init_mem(obj, c.offset, &strings)?,
            None => Vec::new(),
        };

        Ok(Self {
            maj_ver: 0,
            min_ver: 0,
            file_chunks: Vec::new(),
            obj_chunks,
            ac_dev_type: hdr.ac_dev_type.get(),
            min_cpu_ver: hdr.min_cpu_ver.get(),
            max_cpu_ver: hdr.max_cpu_ver.get(),
            strings,
            images,
            init_mem,
        })
    }

    /// Check the object and every image against `target`.
    ///
    /// # Errors
    ///
    /// Returns a compatibility error for the first mismatch.
    pub fn check_compat(&self, target: &DeviceTarget) -> Result<()> {
        target.check_mask("UOF object", self.ac_dev_type, self.min_cpu_ver, self.max_cpu_ver)?;
        for image in &self.images {
            target.check_mask(
                &format!("image {}", image.name),
                image.ac_dev_type,
                image.min_ver,
                image.max_ver,
            )?;
        }
        Ok(())
    }

    /// Images assigned to AE `ae`.
    pub fn images_for(&self, ae: u8) -> impl Iterator<Item = (usize, &EncapImage)> + '_ {
        self.images
            .iter()
            .enumerate()
            .filter(move |(_, img)| img.assigned_to(ae))
    }
}

/// Verify that a file chunk lies inside `buf` and its checksum matches.
pub(crate) fn verify_chunk(buf: &[u8], chunk: &ChunkInfo) -> Result<()> {
    let body = slice_at(buf, chunk.offset, chunk.size, &chunk.name())?;
    let computed = checksum(body);
    match chunk.checksum {
        Some(stored) if stored != computed => Err(FirmwareError::format(format!(
            "chunk {} checksum {stored:#06x}, computed {computed:#06x}",
            chunk.name()
        ))),
        _ => Ok(()),
    }
}

/// Object table at `offset`: a `u32` count followed by entries.
fn read_table<T: FromBytes>(obj: &[u8], offset: u32, what: &str) -> Result<Vec<T>> {
    let offset = offset as usize;
    let count = read_at::<U32>(obj, offset, what)?.get() as usize;
    let first = offset + 4;
    let len = count
        .checked_mul(size_of::<T>())
        .ok_or_else(|| FirmwareError::format(format!("{what}: {count} entries overflow")))?;
    slice_at(obj, first, len, what)?;
    (0..count)
        .map(|i| read_at(obj, first + i * size_of::<T>(), what))
        .collect()
}

fn table_len(obj: &[u8], offset: u32, what: &str) -> Result<u32> {
    Ok(read_at::<U32>(obj, offset as usize, what)?.get())
}

fn parse_image(obj: &Bytes, offset: usize, strings: &StringTable) -> Result<EncapImage> {
    let img: UofImage = read_at(obj, offset, "UOF image")?;
    let page: UofCodePage = read_at(obj, offset + IMAGE_LEN, "UOF code page")?;
    let name = strings.get(img.img_name.get())?;
    let ae_mode = AeMode(img.ae_mode.get());

    if img.numpages.get() > 1 {
        return Err(FirmwareError::compatibility(format!(
            "image {name} has {} code pages, only one is supported",
            img.numpages.get()
        )));
    }
    if ae_mode.reloadable() {
        return Err(FirmwareError::compatibility(format!(
            "image {name} uses reloadable context mode"
        )));
    }
    if !matches!(ae_mode.ctx_mode(), 4 | 8) {
        return Err(FirmwareError::compatibility(format!(
            "image {name} context mode {} is neither 4 nor 8",
            ae_mode.ctx_mode()
        )));
    }
    if table_len(obj, page.neigh_reg_tab_offset.get(), "neighbor register table")? != 0 {
        return Err(FirmwareError::compatibility(format!(
            "image {name} carries a neighbor register table"
        )));
    }
    for (tab, what) in [
        (page.uc_var_tab_offset.get(), "microcode variable table"),
        (page.imp_var_tab_offset.get(), "imported variable table"),
        (page.imp_expr_tab_offset.get(), "imported expression table"),
    ] {
        if table_len(obj, tab, what)? != 0 {
            return Err(FirmwareError::compatibility(format!(
                "image {name} has a non-empty {what}"
            )));
        }
    }

    let area: UofCodeArea = read_at(obj, page.code_area_offset.get() as usize, "UOF code area")?;
    let blocks = read_table::<UofUwordBlock>(obj, area.uword_block_tab.get(), "uword block table")?
        .into_iter()
        .map(|b| decode_block(obj, &b))
        .collect::<Result<Vec<_>>>()?;

    let init_regs = read_table::<UofInitRegSym>(obj, img.init_reg_sym_tab.get(), "init regsym table")?
        .into_iter()
        .map(|sym| decode_init_reg(&name, &sym, strings))
        .collect::<Result<Vec<_>>>()?;

    let reg_count = read_table::<UofAeReg>(obj, img.reg_tab_offset.get(), "register table")?.len();
    let sbreak_count = read_table::<UofSbreak>(obj, img.sbreak_tab.get(), "sbreak table")?.len();
    let app_meta = strings
        .get(img.app_meta_data.get())
        .ok()
        .filter(|s| !s.is_empty());

    let fill = u64::from(img.fill_pattern[0].get()) | (u64::from(img.fill_pattern[1].get()) << 32);
    debug!(
        "Image {name}: ae_mask={:#x} ctx_mask={:#x} entry={:#x} words={} blocks={}",
        img.ae_assigned.get(),
        img.ctx_assigned.get(),
        img.entry_address.get(),
        area.micro_words_num.get(),
        blocks.len()
    );

    Ok(EncapImage {
        name,
        ae_assigned: img.ae_assigned.get(),
        ctx_assigned: img.ctx_assigned.get(),
        ac_dev_type: img.ac_dev_type.get(),
        entry_address: img.entry_address.get(),
        fill_pattern: fill,
        ae_mode,
        min_ver: img.min_ver.get(),
        max_ver: img.max_ver.get(),
        page: EncapPage {
            beg_addr_p: page.beg_addr_p.get(),
            beg_addr_v: page.beg_addr_v.get(),
            micro_words_num: area.micro_words_num.get(),
            def_page: page.def_page != 0,
            blocks,
        },
        init_regs,
        reg_count: u32::try_from(reg_count).unwrap_or(u32::MAX),
        sbreak_count: u32::try_from(sbreak_count).unwrap_or(u32::MAX),
        app_meta,
    })
}

fn decode_block(obj: &[u8], block: &UofUwordBlock) -> Result<UwordBlock> {
    let num = block.num_words.get() as usize;
    let len = num
        .checked_mul(UWORD_BYTES)
        .ok_or_else(|| FirmwareError::format("uword block size overflows"))?;
    let raw = slice_at(obj, block.uword_offset.get() as usize, len, "uword block")?;
    let words = raw
        .chunks_exact(UWORD_BYTES)
        .map(|w| {
            let mut le = [0u8; 8];
            le[..UWORD_BYTES].copy_from_slice(w);
            UwordBlock::decode_word(u64::from_le_bytes(le))
        })
        .collect();
    Ok(UwordBlock {
        start: block.start_addr.get(),
        words,
    })
}

fn decode_init_reg(image: &str, sym: &UofInitRegSym, strings: &StringTable) -> Result<InitReg> {
    let name = strings.get(sym.sym_name.get())?;
    let scope = match sym.init_type {
        init_type::REG => InitScope::AllContexts,
        init_type::REG_CTX => {
            if sym.ctx >= qat_chip::MAX_CTX {
                return Err(FirmwareError::format(format!(
                    "image {image}: init {name} names context {}",
                    sym.ctx
                )));
            }
            InitScope::Context(sym.ctx)
        }
        init_type::EXPR | init_type::EXPR_ENDIAN_SWAP => {
            return Err(FirmwareError::compatibility(format!(
                "image {image}: init {name} is an expression"
            )));
        }
        other => {
            return Err(FirmwareError::format(format!(
                "image {image}: init {name} has unknown init type {other}"
            )));
        }
    };
    let reg_num = u16::try_from(sym.reg_addr.get()).map_err(|_| {
        FirmwareError::format(format!("image {image}: init {name} register number too large"))
    })?;
    Ok(InitReg {
        name,
        scope,
        reg_type: sym.reg_type,
        reg_num,
        value: sym.value.get(),
    })
}

fn parse_init_mem(obj: &[u8], offset: usize, strings: &StringTable) -> Result<Vec<InitMem>> {
    let count = read_at::<U32>(obj, offset, "init-mem table")?.get();
    let mut cursor = offset + 4;
    let mut records = Vec::new();
    for _ in 0..count {
        let raw: UofInitMem = read_at(obj, cursor, "init-mem record")?;
        cursor += size_of::<UofInitMem>();
        let symbol = strings.get(raw.sym_name.get())?;
        let ae = ae_from_symbol(&symbol)
            .filter(|&ae| ae < MAX_AE)
            .ok_or_else(|| {
                FirmwareError::format(format!("init-mem symbol {symbol:?} names no valid AE"))
            })?;
        let region = match raw.region {
            region::LMEM => MemRegion::Lmem,
            region::UMEM => MemRegion::Umem,
            other => {
                return Err(FirmwareError::compatibility(format!(
                    "init-mem {symbol}: region {other} not loadable"
                )));
            }
        };
        let values = (0..raw.val_attr_num.get())
            .map(|_| {
                let attr: UofMemVarAttr = read_at(obj, cursor, "init-mem value")?;
                cursor += size_of::<UofMemVarAttr>();
                Ok(MemValue {
                    offset: attr.offset_in_byte.get(),
                    value: attr.value.get(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        records.push(InitMem {
            symbol,
            ae: ae as u8,
            region,
            addr: raw.addr.get(),
            num_in_bytes: raw.num_in_bytes.get(),
            values,
        });
    }
    Ok(records)
}
