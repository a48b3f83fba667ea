//! Signed firmware object parser.
//!
//! Chunk 0 is a symbol table; every later chunk is one signed image bound
//! for the FCU. The images are never decoded into instructions here: the
//! signed bytes are handed to hardware verbatim.
//!
//! ```text
//! signed image
//! ┌────────────┬──────────┬──────────┬───────────┬─────────────┬──────────┬───────┐
//! │ CSS hdr 128│ mod 256  │ exp 4    │ sig 256   │ AE mode 552 │ init 400 │ insts │
//! └────────────┴──────────┴──────────┴───────────┴─────────────┴──────────┴───────┘
//! ```

use std::mem::size_of;

use bytes::Bytes;
use tracing::{debug, info};

use crate::checksum::checksum;
use crate::compat::DeviceTarget;
use crate::error::{FirmwareError, Result};
use crate::layout::{
    c_string, read_at, slice_at, to_usize, CssHeader, SimgAeMode, SuofFileHeader, SuofObjHeader,
    WideChunk, CSS_AE_FIRMWARE, CSS_EXPONENT_LEN, CSS_HEADER_LEN, CSS_MAX_IMAGE_LEN,
    CSS_MODULUS_LEN, CSS_SIGNATURE_LEN, SIMG_AE_MODE_LEN, SIMG_AE_MODE_OFFSET, SUOF_FILE_ID,
    SUOF_MAJ_VER, SUOF_MIN_VER,
};
use crate::strtab::StringTable;
use crate::uof::ChunkInfo;

const HEADER_LEN: usize = size_of::<SuofFileHeader>();
const CHUNK_LEN: usize = size_of::<WideChunk>();
const OBJ_HEADER_LEN: usize = size_of::<SuofObjHeader>();
/// Bytes before the checksummed region: file id and checksum.
const CHECKSUM_START: usize = 8;

/// One signed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedImage {
    /// Image name from the AE-mode block.
    pub name: String,
    /// Application metadata from the AE-mode block.
    pub app_meta: String,
    /// AEs the image loads onto.
    pub ae_mask: u32,
    /// Exact device-type flag the image was signed for.
    pub dev_type: u32,
    /// Lowest supported revision.
    pub devmin_ver: u16,
    /// Highest supported revision.
    pub devmax_ver: u16,
    /// Firmware type from the AE-mode block.
    pub fw_type: u8,
    /// Context mode (4 or 8).
    pub ctx_mode: u8,
    /// Shared-ustore mode.
    pub scs_mode: u8,
    /// CSS module type.
    pub css_fw_type: u32,
    /// Signed bytes, from the CSS header to the end of the image.
    pub data: Bytes,
}

impl SignedImage {
    /// CSS header bytes.
    #[must_use]
    pub fn css_header(&self) -> &[u8] {
        &self.data[..CSS_HEADER_LEN]
    }

    /// RSA modulus.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.data[CSS_HEADER_LEN..CSS_HEADER_LEN + CSS_MODULUS_LEN]
    }

    /// RSA exponent.
    #[must_use]
    pub fn exponent(&self) -> &[u8] {
        let start = CSS_HEADER_LEN + CSS_MODULUS_LEN;
        &self.data[start..start + CSS_EXPONENT_LEN]
    }

    /// Signature.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        let start = CSS_HEADER_LEN + CSS_MODULUS_LEN + CSS_EXPONENT_LEN;
        &self.data[start..start + CSS_SIGNATURE_LEN]
    }

    /// Everything after the signature: AE-mode block, init sequence, code.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[SIMG_AE_MODE_OFFSET..]
    }

    /// Total signed length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a parsed image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the image loads onto AE `ae`.
    #[must_use]
    pub fn targets(&self, ae: u8) -> bool {
        ae < 32 && self.ae_mask & (1 << ae) != 0
    }
}

/// Parsed SUOF container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuofContainer {
    /// Firmware type from the file header.
    pub fw_type: u8,
    /// Chunk table.
    pub chunks: Vec<ChunkInfo>,
    /// Symbol table.
    pub symbols: StringTable,
    /// Signed images in chunk order.
    pub images: Vec<SignedImage>,
}

/// Whether `buf` starts with the SUOF file id.
#[must_use]
pub fn is_suof(buf: &[u8]) -> bool {
    buf.len() >= 4 && u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) == SUOF_FILE_ID
}

impl SuofContainer {
    /// Parse and validate a SUOF file.
    ///
    /// # Errors
    ///
    /// Returns a format error for bad magic, version, checksum, chunk count
    /// or image bounds.
    pub fn parse(buf: Bytes) -> Result<Self> {
        debug!("Parsing SUOF ({} bytes)", buf.len());
        let hdr: SuofFileHeader = read_at(&buf, 0, "SUOF file header")?;
        if hdr.file_id.get() != SUOF_FILE_ID {
            return Err(FirmwareError::format(format!(
                "SUOF file id {:#010x}, expected {SUOF_FILE_ID:#010x}",
                hdr.file_id.get()
            )));
        }
        if hdr.maj_ver != SUOF_MAJ_VER || hdr.min_ver != SUOF_MIN_VER {
            return Err(FirmwareError::format(format!(
                "SUOF version {}.{} unsupported",
                hdr.maj_ver, hdr.min_ver
            )));
        }
        let num_chunks = usize::from(hdr.num_chunks.get());
        if num_chunks <= 1 {
            return Err(FirmwareError::format(format!(
                "SUOF needs a symbol chunk and at least one image, has {num_chunks} chunk(s)"
            )));
        }
        if num_chunks > usize::from(hdr.max_chunks.get()) {
            return Err(FirmwareError::format(format!(
                "SUOF declares {num_chunks} chunks, maximum {}",
                hdr.max_chunks.get()
            )));
        }
        let computed = checksum(&buf[CHECKSUM_START..]);
        if computed != hdr.checksum.get() {
            return Err(FirmwareError::format(format!(
                "SUOF checksum {:#06x}, computed {computed:#06x}",
                hdr.checksum.get()
            )));
        }

        let chunks = read_wide_chunks(&buf, HEADER_LEN, num_chunks, "SUOF chunk")?;
        let symbols = StringTable::parse(&buf, chunks[0].offset, 0)?;
        let images = chunks[1..]
            .iter()
            .map(|c| parse_signed_image(&buf, c))
            .collect::<Result<Vec<_>>>()?;

        info!("SUOF parsed: {} signed image(s)", images.len());
        Ok(Self {
            fw_type: hdr.fw_type,
            chunks,
            symbols,
            images,
        })
    }

    /// Check every image against `target`.
    ///
    /// # Errors
    ///
    /// Returns a compatibility error for the first mismatch.
    pub fn check_compat(&self, target: &DeviceTarget) -> Result<()> {
        for image in &self.images {
            target.check_exact(
                &format!("signed image {}", image.name),
                image.dev_type,
                image.devmin_ver,
                image.devmax_ver,
            )?;
        }
        Ok(())
    }

    /// Images in FCU load order: the image that covers AE 0 goes last.
    #[must_use]
    pub fn load_order(&self) -> Vec<&SignedImage> {
        let (ae0, rest): (Vec<_>, Vec<_>) = self.images.iter().partition(|img| img.targets(0));
        rest.into_iter().chain(ae0).collect()
    }
}

/// Read `count` 24-byte chunk headers at `offset`, bounds-checking each body.
pub(crate) fn read_wide_chunks(buf: &[u8], offset: usize, count: usize, what: &str) -> Result<Vec<ChunkInfo>> {
    (0..count)
        .map(|i| {
            let raw: WideChunk = read_at(buf, offset + i * CHUNK_LEN, what)?;
            let chunk = ChunkInfo {
                id: raw.id,
                offset: to_usize(raw.offset.get(), "chunk offset")?,
                size: to_usize(raw.size.get(), "chunk size")?,
                checksum: None,
            };
            slice_at(buf, chunk.offset, chunk.size, &chunk.name())?;
            Ok(chunk)
        })
        .collect()
}

fn parse_signed_image(buf: &Bytes, chunk: &ChunkInfo) -> Result<SignedImage> {
    let obj: SuofObjHeader = read_at(buf, chunk.offset, "SUOF image header")?;
    let len = obj.img_length.get() as usize;
    if len + OBJ_HEADER_LEN > chunk.size {
        return Err(FirmwareError::format(format!(
            "signed image of {len} bytes overflows its {}-byte chunk",
            chunk.size
        )));
    }
    if len < SIMG_AE_MODE_OFFSET + SIMG_AE_MODE_LEN {
        return Err(FirmwareError::format(format!(
            "signed image of {len} bytes is shorter than its fixed header"
        )));
    }
    if len > CSS_MAX_IMAGE_LEN {
        return Err(FirmwareError::format(format!(
            "signed image of {len} bytes exceeds {CSS_MAX_IMAGE_LEN:#x}"
        )));
    }
    let start = chunk.offset + OBJ_HEADER_LEN;
    let data = buf.slice(start..start + len);
    let css: CssHeader = read_at(&data, 0, "CSS header")?;
    if css.fw_type.get() != CSS_AE_FIRMWARE {
        return Err(FirmwareError::format(format!(
            "CSS module type {} is not AE firmware",
            css.fw_type.get()
        )));
    }
    let mode: SimgAeMode = read_at(&data, SIMG_AE_MODE_OFFSET, "AE mode block")?;
    let name = c_string(&mode.simg_name);
    debug!(
        "Signed image {name}: ae_mask={:#x} dev_type={:#x} len={len}",
        mode.ae_mask.get(),
        mode.dev_type.get()
    );
    Ok(SignedImage {
        name,
        app_meta: c_string(&mode.appmeta_data),
        ae_mask: mode.ae_mask.get(),
        dev_type: mode.dev_type.get(),
        devmin_ver: mode.devmin_ver.get(),
        devmax_ver: mode.devmax_ver.get(),
        fw_type: mode.fw_type,
        ctx_mode: mode.ctx_mode,
        scs_mode: mode.scs_mode,
        css_fw_type: css.fw_type.get(),
        data,
    })
}
