//! Container writers.
//!
//! Builders emit byte-exact UOF, SUOF and MOF files with valid checksums.
//! The CLI uses them to bundle archives; tests use them to synthesize
//! firmware without vendor blobs.

use std::mem::size_of;

use zerocopy::byteorder::little_endian::{I16, U16, U32, U64};
use zerocopy::{FromZeros, IntoBytes};

use crate::checksum::checksum;
use crate::image::init_type;
use crate::layout::{
    ChunkId, CssHeader, MofFileHeader, MofObjChunk, MofObjHeader, SimgAeMode, SuofFileHeader,
    SuofObjHeader, UofAeReg, UofCodeArea, UofCodePage, UofFileChunk, UofFileHeader, UofImage,
    UofInitMem, UofInitRegSym, UofMemVarAttr, UofObjChunk, UofObjHeader, UofUwordBlock,
    WideChunk, CSS_AE_FIRMWARE, CSS_EXPONENT_LEN, CSS_HEADER_LEN, CSS_MODULUS_LEN,
    CSS_SIGNATURE_LEN, MOF_FILE_ID, MOF_MAJ_VER, MOF_MIN_VER, SUF_IMAG, SUF_OBJS, SUOF_FILE_ID,
    SUOF_MAJ_VER, SUOF_MIN_VER, SYM_OBJS, UOF_FILE_ID, UOF_IMAG, UOF_IMEM, UOF_MAJ_VER,
    UOF_MIN_VER, UOF_OBJS, UOF_STRT, UWORD_BYTES,
};
use crate::mof::ObjectKind;

/// Every family's device-type flag.
pub const ALL_DEV_TYPES: u32 = 0x0f40_0000;

/// Offsets into a growing string blob. Offset 0 is the empty string.
#[derive(Debug, Default)]
struct Strings(Vec<u8>);

impl Strings {
    fn new() -> Self {
        Self(vec![0])
    }

    fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        let off = self.0.len() as u32;
        self.0.extend_from_slice(s.as_bytes());
        self.0.push(0);
        off
    }
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn u32_at(len: usize) -> U32 {
    U32::new(u32::try_from(len).unwrap_or(u32::MAX))
}

// ── UOF ──────────────────────────────────────────────────────────────────────

/// Register-init entry to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRegSpec {
    /// Symbol name.
    pub name: String,
    /// Init type code (see [`init_type`]).
    pub init_type: u8,
    /// Register type code.
    pub reg_type: u8,
    /// Context for per-context entries.
    pub ctx: u8,
    /// Register number.
    pub reg_num: u32,
    /// Value.
    pub value: u32,
}

impl InitRegSpec {
    /// Entry applied to every assigned context.
    pub fn all_contexts(name: impl Into<String>, reg_type: u8, reg_num: u32, value: u32) -> Self {
        Self {
            name: name.into(),
            init_type: init_type::REG,
            reg_type,
            ctx: 0,
            reg_num,
            value,
        }
    }

    /// Entry applied to one context.
    pub fn one_context(name: impl Into<String>, ctx: u8, reg_type: u8, reg_num: u32, value: u32) -> Self {
        Self {
            name: name.into(),
            init_type: init_type::REG_CTX,
            reg_type,
            ctx,
            reg_num,
            value,
        }
    }
}

/// Memory-init record to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitMemSpec {
    /// Symbol name, led by the target AE number.
    pub symbol: String,
    /// Region code.
    pub region: u8,
    /// Base byte address.
    pub addr: u32,
    /// Declared extent in bytes.
    pub num_in_bytes: u32,
    /// `(byte offset, value)` pairs.
    pub values: Vec<(u32, u32)>,
}

/// Image to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UofImageSpec {
    /// Image name.
    pub name: String,
    /// AE assignment mask.
    pub ae_assigned: u32,
    /// Context assignment mask.
    pub ctx_assigned: u32,
    /// Device-type flags.
    pub ac_dev_type: u32,
    /// Entry address.
    pub entry_address: u32,
    /// Fill pattern.
    pub fill_pattern: u64,
    /// AE-mode word.
    pub ae_mode: u16,
    /// Lowest revision.
    pub min_ver: u16,
    /// Highest revision.
    pub max_ver: u16,
    /// Declared page count.
    pub numpages: u16,
    /// Physical base address of the page.
    pub beg_addr_p: u32,
    /// Logical base address of the page.
    pub beg_addr_v: u32,
    /// Words, emitted as one block at page offset 0.
    pub words: Vec<u64>,
    /// Register-init table.
    pub init_regs: Vec<InitRegSpec>,
    /// Placeholder neighbor-register entries.
    pub neighbor_regs: u32,
    /// Placeholder imported-variable entries.
    pub imported_vars: u32,
    /// Application metadata.
    pub app_meta: Option<String>,
}

impl UofImageSpec {
    /// Eight-context image for `ae_assigned` holding `words`.
    pub fn new(name: impl Into<String>, ae_assigned: u32, words: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            ae_assigned,
            ctx_assigned: 0xff,
            ac_dev_type: ALL_DEV_TYPES,
            entry_address: 0,
            fill_pattern: 0,
            ae_mode: 8,
            min_ver: 0,
            max_ver: 0xffff,
            numpages: 1,
            beg_addr_p: 0,
            beg_addr_v: 0,
            words,
            init_regs: Vec::new(),
            neighbor_regs: 0,
            imported_vars: 0,
            app_meta: None,
        }
    }
}

/// UOF file builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UofBuilder {
    /// Object device-type flags.
    pub ac_dev_type: u32,
    /// Lowest revision.
    pub min_cpu_ver: u16,
    /// Highest revision.
    pub max_cpu_ver: u16,
    /// Images.
    pub images: Vec<UofImageSpec>,
    /// Memory-init records.
    pub init_mem: Vec<InitMemSpec>,
}

impl Default for UofBuilder {
    fn default() -> Self {
        Self {
            ac_dev_type: ALL_DEV_TYPES,
            min_cpu_ver: 0,
            max_cpu_ver: 0xffff,
            images: Vec::new(),
            init_mem: Vec::new(),
        }
    }
}

impl UofBuilder {
    /// Empty builder accepting every family and revision.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image.
    #[must_use]
    pub fn image(mut self, image: UofImageSpec) -> Self {
        self.images.push(image);
        self
    }

    /// Add a memory-init record.
    #[must_use]
    pub fn init_mem(mut self, record: InitMemSpec) -> Self {
        self.init_mem.push(record);
        self
    }

    /// Emit the file.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let obj = self.build_object();
        let body_offset = size_of::<UofFileHeader>() + size_of::<UofFileChunk>();

        let mut hdr = UofFileHeader::new_zeroed();
        hdr.file_id = U16::new(UOF_FILE_ID);
        hdr.min_ver = UOF_MIN_VER;
        hdr.maj_ver = UOF_MAJ_VER;
        hdr.max_chunks = U16::new(1);
        hdr.num_chunks = U16::new(1);

        let chunk = UofFileChunk {
            id: UOF_OBJS,
            checksum: U32::new(checksum(&obj)),
            offset: u32_at(body_offset),
            size: u32_at(obj.len()),
        };

        let mut out = Vec::with_capacity(body_offset + obj.len());
        out.extend_from_slice(hdr.as_bytes());
        out.extend_from_slice(chunk.as_bytes());
        out.extend_from_slice(&obj);
        out
    }

    fn build_object(&self) -> Vec<u8> {
        let mut strings = Strings::new();
        let image_names: Vec<u32> = self.images.iter().map(|i| strings.add(&i.name)).collect();
        let meta_names: Vec<u32> = self
            .images
            .iter()
            .map(|i| i.app_meta.as_deref().map_or(0, |m| strings.add(m)))
            .collect();
        let reg_names: Vec<Vec<u32>> = self
            .images
            .iter()
            .map(|i| i.init_regs.iter().map(|r| strings.add(&r.name)).collect())
            .collect();
        let mem_names: Vec<u32> = self.init_mem.iter().map(|m| strings.add(&m.symbol)).collect();

        let num_chunks = 1 + self.images.len() + usize::from(!self.init_mem.is_empty());
        let table_len = size_of::<UofObjHeader>() + num_chunks * size_of::<UofObjChunk>();
        let mut obj = vec![0u8; table_len];
        let mut chunks: Vec<(ChunkId, usize, usize)> = Vec::new();

        let start = obj.len();
        obj.extend_from_slice(u32_at(strings.0.len()).as_bytes());
        obj.extend_from_slice(&[0; 4]);
        obj.extend_from_slice(&strings.0);
        pad4(&mut obj);
        chunks.push((UOF_STRT, start, obj.len() - start));

        for (idx, spec) in self.images.iter().enumerate() {
            let start = obj.len();
            write_image(&mut obj, spec, image_names[idx], meta_names[idx], &reg_names[idx]);
            chunks.push((UOF_IMAG, start, obj.len() - start));
        }

        if !self.init_mem.is_empty() {
            let start = obj.len();
            obj.extend_from_slice(u32_at(self.init_mem.len()).as_bytes());
            for (rec, &name) in self.init_mem.iter().zip(&mem_names) {
                let raw = UofInitMem {
                    sym_name: U32::new(name),
                    region: rec.region,
                    scope: 1,
                    reserved1: U16::ZERO,
                    addr: U32::new(rec.addr),
                    num_in_bytes: U32::new(rec.num_in_bytes),
                    val_attr_num: u32_at(rec.values.len()),
                };
                obj.extend_from_slice(raw.as_bytes());
                for &(offset, value) in &rec.values {
                    let attr = UofMemVarAttr {
                        offset_in_byte: U32::new(offset),
                        value: U32::new(value),
                    };
                    obj.extend_from_slice(attr.as_bytes());
                }
            }
            chunks.push((UOF_IMEM, start, obj.len() - start));
        }

        let hdr = UofObjHeader {
            ac_dev_type: U32::new(self.ac_dev_type),
            min_cpu_ver: U16::new(self.min_cpu_ver),
            max_cpu_ver: U16::new(self.max_cpu_ver),
            max_chunks: I16::new(i16::try_from(num_chunks).unwrap_or(i16::MAX)),
            num_chunks: I16::new(i16::try_from(num_chunks).unwrap_or(i16::MAX)),
            reserved1: U32::ZERO,
            reserved2: U32::ZERO,
        };
        obj[..size_of::<UofObjHeader>()].copy_from_slice(hdr.as_bytes());
        for (i, (id, offset, size)) in chunks.into_iter().enumerate() {
            let raw = UofObjChunk {
                id,
                offset: u32_at(offset),
                size: u32_at(size),
            };
            let at = size_of::<UofObjHeader>() + i * size_of::<UofObjChunk>();
            obj[at..at + size_of::<UofObjChunk>()].copy_from_slice(raw.as_bytes());
        }
        obj
    }
}

/// Append an empty or placeholder-filled object table; returns its offset.
fn push_table(obj: &mut Vec<u8>, count: u32, entry_len: usize) -> u32 {
    let at = obj.len();
    obj.extend_from_slice(U32::new(count).as_bytes());
    obj.resize(obj.len() + count as usize * entry_len, 0);
    u32_at(at).get()
}

fn write_image(obj: &mut Vec<u8>, spec: &UofImageSpec, name: u32, meta: u32, reg_names: &[u32]) {
    let start = obj.len();
    obj.resize(start + size_of::<UofImage>() + size_of::<UofCodePage>(), 0);

    let reg_tab = push_table(obj, 0, size_of::<UofAeReg>());
    let init_tab = u32_at(obj.len()).get();
    obj.extend_from_slice(u32_at(spec.init_regs.len()).as_bytes());
    for (reg, &sym) in spec.init_regs.iter().zip(reg_names) {
        let raw = UofInitRegSym {
            sym_name: U32::new(sym),
            init_type: reg.init_type,
            value_type: 0,
            reg_type: reg.reg_type,
            ctx: reg.ctx,
            reg_addr: U32::new(reg.reg_num),
            value: U32::new(reg.value),
        };
        obj.extend_from_slice(raw.as_bytes());
    }
    let sbreak_tab = push_table(obj, 0, 20);
    let neigh_tab = push_table(obj, spec.neighbor_regs, size_of::<UofAeReg>());
    let uc_var_tab = push_table(obj, 0, 4);
    let imp_var_tab = push_table(obj, spec.imported_vars, 4);
    let imp_expr_tab = push_table(obj, 0, 4);

    let words_at = obj.len();
    for &w in &spec.words {
        obj.extend_from_slice(&w.to_le_bytes()[..UWORD_BYTES]);
    }
    pad4(obj);
    let block_tab = u32_at(obj.len()).get();
    obj.extend_from_slice(U32::new(1).as_bytes());
    let block = UofUwordBlock {
        start_addr: U32::ZERO,
        num_words: u32_at(spec.words.len()),
        uword_offset: u32_at(words_at),
        reserved: U32::ZERO,
    };
    obj.extend_from_slice(block.as_bytes());
    let code_area = u32_at(obj.len()).get();
    let area = UofCodeArea {
        micro_words_num: u32_at(spec.words.len()),
        uword_block_tab: U32::new(block_tab),
    };
    obj.extend_from_slice(area.as_bytes());

    let mut img = UofImage::new_zeroed();
    img.img_name = U32::new(name);
    img.ae_assigned = U32::new(spec.ae_assigned);
    img.ctx_assigned = U32::new(spec.ctx_assigned);
    img.ac_dev_type = U32::new(spec.ac_dev_type);
    img.entry_address = U32::new(spec.entry_address);
    img.fill_pattern = [
        U32::new(spec.fill_pattern as u32),
        U32::new((spec.fill_pattern >> 32) as u32),
    ];
    img.ae_mode = U16::new(spec.ae_mode);
    img.max_ver = U16::new(spec.max_ver);
    img.min_ver = U16::new(spec.min_ver);
    img.page_region_num = U16::new(1);
    img.numpages = U16::new(spec.numpages);
    img.reg_tab_offset = U32::new(reg_tab);
    img.init_reg_sym_tab = U32::new(init_tab);
    img.sbreak_tab = U32::new(sbreak_tab);
    img.app_meta_data = U32::new(meta);

    let page = UofCodePage {
        page_region: 0,
        page_num: 0,
        def_page: 1,
        reserved: 0,
        beg_addr_v: U32::new(spec.beg_addr_v),
        beg_addr_p: U32::new(spec.beg_addr_p),
        neigh_reg_tab_offset: U32::new(neigh_tab),
        uc_var_tab_offset: U32::new(uc_var_tab),
        imp_var_tab_offset: U32::new(imp_var_tab),
        imp_expr_tab_offset: U32::new(imp_expr_tab),
        code_area_offset: U32::new(code_area),
    };
    let img_end = start + size_of::<UofImage>();
    obj[start..img_end].copy_from_slice(img.as_bytes());
    obj[img_end..img_end + size_of::<UofCodePage>()].copy_from_slice(page.as_bytes());
}

// ── SUOF ─────────────────────────────────────────────────────────────────────

/// Signed image to emit. Key and signature are filler bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedImageSpec {
    /// Image name.
    pub name: String,
    /// Application metadata.
    pub app_meta: String,
    /// AE mask.
    pub ae_mask: u32,
    /// Exact device-type flag.
    pub dev_type: u32,
    /// Lowest revision.
    pub devmin_ver: u16,
    /// Highest revision.
    pub devmax_ver: u16,
    /// Context mode.
    pub ctx_mode: u8,
    /// CSS module type.
    pub css_fw_type: u32,
    /// Bytes after the AE-mode block.
    pub body: Vec<u8>,
}

impl SignedImageSpec {
    /// AE firmware image for `dev_type` covering `ae_mask`.
    pub fn new(name: impl Into<String>, dev_type: u32, ae_mask: u32) -> Self {
        Self {
            name: name.into(),
            app_meta: String::new(),
            ae_mask,
            dev_type,
            devmin_ver: 0,
            devmax_ver: 0xffff,
            ctx_mode: 8,
            css_fw_type: CSS_AE_FIRMWARE,
            body: vec![0; 64],
        }
    }

    fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut css = CssHeader::new_zeroed();
        css.module_type = U32::new(6);
        css.header_len = u32_at(CSS_HEADER_LEN / 4);
        css.key_size = u32_at(CSS_MODULUS_LEN / 4);
        css.exponent_size = u32_at(CSS_EXPONENT_LEN / 4);
        css.fw_type = U32::new(self.css_fw_type);
        out.extend_from_slice(css.as_bytes());
        out.resize(out.len() + CSS_MODULUS_LEN, 0xa5);
        out.extend_from_slice(&[0x01, 0x00, 0x01, 0x00]);
        out.resize(out.len() + CSS_SIGNATURE_LEN, 0x5a);

        let mut mode = SimgAeMode::new_zeroed();
        mode.dev_type = U32::new(self.dev_type);
        mode.devmin_ver = U16::new(self.devmin_ver);
        mode.devmax_ver = U16::new(self.devmax_ver);
        mode.ae_mask = U32::new(self.ae_mask);
        mode.ctx_mode = self.ctx_mode;
        copy_c_string(&mut mode.simg_name, &self.name);
        copy_c_string(&mut mode.appmeta_data, &self.app_meta);
        out.extend_from_slice(mode.as_bytes());
        out.extend_from_slice(&self.body);
        let total = out.len();
        out[24..28].copy_from_slice(u32_at(total / 4).as_bytes());
        out
    }
}

fn copy_c_string(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

fn wide_chunk(id: ChunkId, offset: usize, size: usize) -> WideChunk {
    WideChunk {
        id,
        offset: U64::new(offset as u64),
        size: U64::new(size as u64),
    }
}

/// SUOF file builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuofBuilder {
    /// File-level firmware type.
    pub fw_type: u8,
    /// Signed images.
    pub images: Vec<SignedImageSpec>,
}

impl SuofBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image.
    #[must_use]
    pub fn image(mut self, image: SignedImageSpec) -> Self {
        self.images.push(image);
        self
    }

    /// Emit the file.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let num_chunks = 1 + self.images.len();
        let mut out = vec![0u8; size_of::<SuofFileHeader>() + num_chunks * size_of::<WideChunk>()];
        let mut chunks = Vec::with_capacity(num_chunks);

        let mut syms = Strings::new();
        for img in &self.images {
            syms.add(&img.name);
        }
        let start = out.len();
        out.extend_from_slice(u32_at(syms.0.len()).as_bytes());
        out.extend_from_slice(&syms.0);
        pad4(&mut out);
        chunks.push(wide_chunk(SYM_OBJS, start, out.len() - start));

        for img in &self.images {
            let signed = img.signed_bytes();
            let start = out.len();
            let obj = SuofObjHeader {
                img_length: u32_at(signed.len()),
                reserved: U32::ZERO,
            };
            out.extend_from_slice(obj.as_bytes());
            out.extend_from_slice(&signed);
            pad4(&mut out);
            chunks.push(wide_chunk(SUF_IMAG, start, out.len() - start));
        }

        for (i, c) in chunks.iter().enumerate() {
            let at = size_of::<SuofFileHeader>() + i * size_of::<WideChunk>();
            out[at..at + size_of::<WideChunk>()].copy_from_slice(c.as_bytes());
        }
        let mut hdr = SuofFileHeader::new_zeroed();
        hdr.file_id = U32::new(SUOF_FILE_ID);
        hdr.min_ver = SUOF_MIN_VER;
        hdr.maj_ver = SUOF_MAJ_VER;
        hdr.fw_type = self.fw_type;
        hdr.max_chunks = u16_of(num_chunks);
        hdr.num_chunks = u16_of(num_chunks);
        out[..size_of::<SuofFileHeader>()].copy_from_slice(hdr.as_bytes());
        seal(&mut out);
        out
    }
}

fn u16_of(n: usize) -> U16 {
    U16::new(u16::try_from(n).unwrap_or(u16::MAX))
}

/// Write the whole-file checksum stored at bytes 4..8.
fn seal(out: &mut [u8]) {
    let sum = checksum(&out[8..]);
    out[4..8].copy_from_slice(&sum.to_le_bytes());
}

// ── MOF ──────────────────────────────────────────────────────────────────────

/// MOF archive builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MofBuilder {
    objects: Vec<(String, ObjectKind, Vec<u8>)>,
}

impl MofBuilder {
    /// Empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named object.
    #[must_use]
    pub fn object(mut self, name: impl Into<String>, kind: ObjectKind, bytes: Vec<u8>) -> Self {
        self.objects.push((name.into(), kind, bytes));
        self
    }

    /// Number of objects added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Emit the archive: a symbol chunk followed by a UOF and a SUOF group.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        const NUM_CHUNKS: usize = 3;
        let mut out = vec![0u8; size_of::<MofFileHeader>() + NUM_CHUNKS * size_of::<WideChunk>()];
        let mut chunks = Vec::with_capacity(NUM_CHUNKS);

        let mut syms = Strings::new();
        let names: Vec<u32> = self.objects.iter().map(|(n, _, _)| syms.add(n)).collect();
        let start = out.len();
        out.extend_from_slice(u32_at(syms.0.len()).as_bytes());
        out.extend_from_slice(&syms.0);
        pad4(&mut out);
        chunks.push(wide_chunk(SYM_OBJS, start, out.len() - start));

        for (group_id, kind, obj_id) in [
            (UOF_OBJS, ObjectKind::Uof, UOF_IMAG),
            (SUF_OBJS, ObjectKind::Suof, SUF_IMAG),
        ] {
            let members: Vec<(usize, &Vec<u8>)> = self
                .objects
                .iter()
                .enumerate()
                .filter(|(_, (_, k, _))| *k == kind)
                .map(|(i, (_, _, b))| (i, b))
                .collect();
            let start = out.len();
            let hdr = MofObjHeader {
                max_chunks: u16_of(members.len()),
                num_chunks: u16_of(members.len()),
                reserved: U32::ZERO,
            };
            out.extend_from_slice(hdr.as_bytes());
            let table_at = out.len();
            out.resize(table_at + members.len() * size_of::<MofObjChunk>(), 0);
            for (slot, (idx, bytes)) in members.iter().enumerate() {
                pad4(&mut out);
                let rel = out.len() - start;
                out.extend_from_slice(bytes);
                let raw = MofObjChunk {
                    id: obj_id,
                    offset: U64::new(rel as u64),
                    size: U64::new(bytes.len() as u64),
                    name: U32::new(names[*idx]),
                    reserved: U32::ZERO,
                };
                let at = table_at + slot * size_of::<MofObjChunk>();
                out[at..at + size_of::<MofObjChunk>()].copy_from_slice(raw.as_bytes());
            }
            pad4(&mut out);
            chunks.push(wide_chunk(group_id, start, out.len() - start));
        }

        for (i, c) in chunks.iter().enumerate() {
            let at = size_of::<MofFileHeader>() + i * size_of::<WideChunk>();
            out[at..at + size_of::<WideChunk>()].copy_from_slice(c.as_bytes());
        }
        let hdr = MofFileHeader {
            file_id: U32::new(MOF_FILE_ID),
            checksum: U32::ZERO,
            min_ver: MOF_MIN_VER,
            maj_ver: MOF_MAJ_VER,
            reserved: U16::ZERO,
            max_chunks: u16_of(NUM_CHUNKS),
            num_chunks: u16_of(NUM_CHUNKS),
        };
        out[..size_of::<MofFileHeader>()].copy_from_slice(hdr.as_bytes());
        seal(&mut out);
        out
    }
}
