//! Signed (SUOF) loading through the FCU.
//!
//! Each signed image is copied into a DMA-visible buffer behind an
//! [`AuthChunk`] descriptor that gives the FCU the bus address of every
//! part. The FCU verifies the signature (AUTH), copies the code into each
//! target AE (LOAD), and finally releases every loaded AE at once (START).
//!
//! ```text
//! DMA buffer
//! ┌────────────┬─────────┬──────────────────────────────┬───────────┬──────────────────────┐
//! │ AuthChunk  │ CSS 128 │ modulus 256 │ pad 252 │ e 4 │ sig 256   │ AE mode │ init │ code │
//! └────────────┴─────────┴──────────────────────────────┴───────────┴──────────────────────┘
//!   80 bytes                  key area, 512 bytes                      image (len - 644)
//! ```

use std::mem::size_of;

use qat_chip::regs::fcu::{self, Command};
use qat_firmware::layout::{
    CSS_EXPONENT_LEN, CSS_HEADER_LEN, CSS_KEY_PAD_LEN, CSS_MODULUS_LEN, CSS_SIGNATURE_LEN,
    SIMG_AE_MODE_LEN, SIMG_AE_MODE_OFFSET, SIMG_INIT_SEQ_LEN,
};
use qat_firmware::{SignedImage, SuofContainer};
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::csr::Hal;
use crate::error::{QatError, Result};
use crate::mmio::RegisterWindow;
use crate::poll::{Poll, Step};

// ── DMA ──────────────────────────────────────────────────────────────────────

/// Memory the device can read by bus address.
pub trait DmaBuffer {
    /// Bus address of the first byte.
    fn bus_addr(&self) -> u64;

    /// Contents.
    fn as_slice(&self) -> &[u8];

    /// Contents, writable by the host.
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Source of [`DmaBuffer`]s.
pub trait DmaAllocator {
    /// Buffer type handed out.
    type Buffer: DmaBuffer;

    /// Zeroed buffer of `len` bytes.
    ///
    /// # Errors
    ///
    /// Resource exhaustion when no buffer can be provided.
    fn allocate(&mut self, len: usize) -> Result<Self::Buffer>;
}

/// Host-memory buffer with a synthetic bus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBuffer {
    bus_addr: u64,
    data: Vec<u8>,
}

impl DmaBuffer for HostBuffer {
    fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Allocator for devices without an IOMMU mapping, and for tests: buffers
/// are plain vectors and bus addresses are handed out from a counter.
#[derive(Debug, Clone)]
pub struct HostDma {
    next_bus: u64,
    limit: Option<usize>,
    allocated: usize,
}

impl Default for HostDma {
    fn default() -> Self {
        Self {
            next_bus: 0x1_0000_0000,
            limit: None,
            allocated: 0,
        }
    }
}

impl HostDma {
    /// Unbounded allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses requests beyond `bytes` in total.
    #[must_use]
    pub fn with_limit(bytes: usize) -> Self {
        Self {
            limit: Some(bytes),
            ..Self::default()
        }
    }

    /// Bytes handed out so far.
    #[must_use]
    pub const fn allocated(&self) -> usize {
        self.allocated
    }
}

impl DmaAllocator for HostDma {
    type Buffer = HostBuffer;

    fn allocate(&mut self, len: usize) -> Result<HostBuffer> {
        if let Some(limit) = self.limit {
            if self.allocated + len > limit {
                return Err(QatError::exhausted(format!(
                    "DMA request of {len} bytes exceeds the remaining {} bytes",
                    limit - self.allocated
                )));
            }
        }
        let buffer = HostBuffer {
            bus_addr: self.next_bus,
            data: vec![0; len],
        };
        self.allocated += len;
        self.next_bus += (len as u64).next_multiple_of(0x1000);
        Ok(buffer)
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

/// FCU authentication descriptor followed by the chunk bookkeeping words
/// (80 bytes). Addresses are split into high and low halves.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
#[allow(missing_docs)]
pub struct AuthChunk {
    pub img_len: U32,
    pub ae_mask: U32,
    pub css_hdr_high: U32,
    pub css_hdr_low: U32,
    pub img_high: U32,
    pub img_low: U32,
    pub signature_high: U32,
    pub signature_low: U32,
    pub fwsk_pub_high: U32,
    pub fwsk_pub_low: U32,
    pub img_ae_mode_data_high: U32,
    pub img_ae_mode_data_low: U32,
    pub img_ae_init_data_high: U32,
    pub img_ae_init_data_low: U32,
    pub img_ae_insts_high: U32,
    pub img_ae_insts_low: U32,
    pub chunk_size: U64,
    pub chunk_bus_addr: U64,
}

/// Size of [`AuthChunk`].
pub const AUTH_CHUNK_LEN: usize = size_of::<AuthChunk>();

/// Key area as the FCU expects it: modulus, zero pad, exponent.
pub const FCU_KEY_LEN: usize = CSS_MODULUS_LEN + CSS_KEY_PAD_LEN + CSS_EXPONENT_LEN;

fn split(addr: u64) -> (U32, U32) {
    (U32::new((addr >> 32) as u32), U32::new(addr as u32))
}

/// Bytes of DMA memory needed to authenticate `image`.
#[must_use]
pub fn auth_buffer_len(image: &SignedImage) -> usize {
    AUTH_CHUNK_LEN + CSS_HEADER_LEN + FCU_KEY_LEN + CSS_SIGNATURE_LEN + image.payload().len()
}

/// Lay out `image` in `buf` and return the descriptor written at its start.
/// Only AEs in `ae_mask` are named in the descriptor.
///
/// # Errors
///
/// Invalid input if `buf` is smaller than [`auth_buffer_len`].
pub fn write_auth_chunk(image: &SignedImage, ae_mask: u32, buf: &mut impl DmaBuffer) -> Result<AuthChunk> {
    let needed = auth_buffer_len(image);
    let base = buf.bus_addr();
    let data = buf.as_mut_slice();
    if data.len() < needed {
        return Err(QatError::invalid_input(format!(
            "DMA buffer of {} bytes cannot hold a {needed}-byte descriptor",
            data.len()
        )));
    }

    let css_at = AUTH_CHUNK_LEN;
    let key_at = css_at + CSS_HEADER_LEN;
    let sig_at = key_at + FCU_KEY_LEN;
    let img_at = sig_at + CSS_SIGNATURE_LEN;
    let payload = image.payload();

    data[css_at..key_at].copy_from_slice(image.css_header());
    data[key_at..key_at + CSS_MODULUS_LEN].copy_from_slice(image.modulus());
    data[key_at + CSS_MODULUS_LEN..key_at + CSS_MODULUS_LEN + CSS_KEY_PAD_LEN].fill(0);
    data[sig_at - CSS_EXPONENT_LEN..sig_at].copy_from_slice(image.exponent());
    data[sig_at..img_at].copy_from_slice(image.signature());
    data[img_at..img_at + payload.len()].copy_from_slice(payload);

    let bus = |offset: usize| base + offset as u64;
    let mode_addr = bus(img_at);
    let init_addr = mode_addr + SIMG_AE_MODE_LEN as u64;
    let insts_addr = init_addr + SIMG_INIT_SEQ_LEN as u64;

    let mut chunk = AuthChunk::new_zeroed();
    chunk.img_len = U32::new((image.len() - SIMG_AE_MODE_OFFSET) as u32);
    chunk.ae_mask = U32::new(image.ae_mask & ae_mask);
    (chunk.css_hdr_high, chunk.css_hdr_low) = split(bus(css_at));
    (chunk.img_high, chunk.img_low) = split(mode_addr);
    (chunk.signature_high, chunk.signature_low) = split(bus(sig_at));
    (chunk.fwsk_pub_high, chunk.fwsk_pub_low) = split(bus(key_at));
    (chunk.img_ae_mode_data_high, chunk.img_ae_mode_data_low) = split(mode_addr);
    (chunk.img_ae_init_data_high, chunk.img_ae_init_data_low) = split(init_addr);
    (chunk.img_ae_insts_high, chunk.img_ae_insts_low) = split(insts_addr);
    chunk.chunk_size = U64::new(needed as u64);
    chunk.chunk_bus_addr = U64::new(base);
    data[..AUTH_CHUNK_LEN].copy_from_slice(chunk.as_bytes());
    Ok(chunk)
}

// ── FCU protocol ─────────────────────────────────────────────────────────────

fn fcu_poll<W: RegisterWindow, T>(
    hal: &Hal<W>,
    operation: &str,
    check: impl FnMut(u32) -> Step<T>,
) -> Result<T> {
    let status = hal.map().fcu.status;
    let cfg = hal.config();
    Poll::sleeping(operation, cfg.fcu_retries, cfg.fcu_delay).run(|| Ok(hal.read_global(status)), check)
}

/// Point the FCU at the descriptor at `bus_addr` and authenticate it.
///
/// # Errors
///
/// Hardware fault on VERIFY_FAIL, hardware timeout if the FCU never
/// reports a verified image.
pub fn authenticate<W: RegisterWindow>(hal: &mut Hal<W>, bus_addr: u64) -> Result<()> {
    let fcu_regs = hal.map().fcu;
    hal.write_global(fcu_regs.dram_addr_hi, (bus_addr >> 32) as u32);
    hal.write_global(fcu_regs.dram_addr_lo, bus_addr as u32);
    hal.write_global(fcu_regs.control, fcu::control_word(Command::Auth, 0));
    fcu_poll(hal, "FCU authentication", |status| match fcu::state(status) {
        fcu::STS_VERIFY_FAIL => Step::Failed,
        fcu::STS_VERIFY_DONE if status & fcu::AUTHFWLD != 0 => Step::Done(()),
        _ => Step::Pending,
    })
}

fn loaded_mask<W: RegisterWindow>(hal: &Hal<W>, status: u32) -> u32 {
    match hal.map().fcu.ae_loaded {
        Some(reg) => hal.read_global(reg),
        None => status >> fcu::LOADED_AE_SHIFT,
    }
}

/// Ask the FCU to copy the authenticated image into `ae`.
///
/// # Errors
///
/// Precondition if the AE is running; hardware fault on LOAD_FAIL;
/// hardware timeout if the AE never shows as loaded.
pub fn load_ae<W: RegisterWindow>(hal: &mut Hal<W>, ae: u8) -> Result<()> {
    if hal.is_ae_active(ae)? {
        tracing::error!("AE {ae} is active, refusing to load");
        return Err(QatError::precondition(format!("AE {ae} is active")));
    }
    let control = hal.map().fcu.control;
    hal.write_global(control, fcu::control_word(Command::Load, ae));
    let hal = &*hal;
    fcu_poll(hal, "FCU load", |status| match fcu::state(status) {
        fcu::STS_LOAD_FAIL => Step::Failed,
        fcu::STS_LOAD_DONE if (loaded_mask(hal, status) >> ae) & 1 != 0 => Step::Done(()),
        _ => Step::Pending,
    })
}

/// Authenticate and load every image of `suof` in FCU order, staging each
/// through a buffer from `dma`. Returns the number of AEs loaded.
///
/// # Errors
///
/// Any allocation, FCU or precondition error; loading stops at the first.
pub fn load<W: RegisterWindow, D: DmaAllocator>(
    hal: &mut Hal<W>,
    suof: &SuofContainer,
    dma: &mut D,
) -> Result<usize> {
    let mut loaded = 0;
    for image in suof.load_order() {
        let mut buf = dma.allocate(auth_buffer_len(image))?;
        let chunk = write_auth_chunk(image, hal.ae_mask(), &mut buf)?;
        tracing::debug!(
            "Signed image {} staged at {:#x} for AEs {:#x}",
            image.name,
            buf.bus_addr(),
            chunk.ae_mask.get()
        );
        authenticate(hal, buf.bus_addr())?;
        let targets = chunk.ae_mask.get();
        let aes: Vec<u8> = hal.enabled_aes().filter(|ae| targets & (1 << ae) != 0).collect();
        for ae in aes {
            load_ae(hal, ae)?;
            tracing::info!("AE {ae} loaded with signed image {}", image.name);
            loaded += 1;
        }
    }
    Ok(loaded)
}

/// Release every loaded AE. Returns the number of enabled AEs the FCU
/// reports as loaded.
///
/// # Errors
///
/// Hardware timeout if START never completes.
pub fn start<W: RegisterWindow>(hal: &mut Hal<W>) -> Result<usize> {
    let control = hal.map().fcu.control;
    hal.write_global(control, fcu::control_word(Command::Start, 0));
    let status = fcu_poll(hal, "FCU start", |status| {
        if status & fcu::DONE != 0 {
            Step::Done(status)
        } else {
            Step::Pending
        }
    })?;
    let started = (loaded_mask(hal, status) & hal.ae_mask()).count_ones() as usize;
    tracing::info!("FCU started {started} AEs");
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use qat_chip::DeviceFamily;
    use qat_firmware::writer::{SignedImageSpec, SuofBuilder};

    fn signed(ae_mask: u32) -> SuofContainer {
        let spec = SignedImageSpec::new("img", DeviceFamily::C4xxx.dev_type_flag(), ae_mask);
        SuofContainer::parse(Bytes::from(SuofBuilder::new().image(spec).build())).unwrap()
    }

    #[test]
    fn descriptor_addresses_follow_the_layout() {
        let suof = signed(0b0111);
        let image = &suof.images[0];
        let mut dma = HostDma::new();
        let mut buf = dma.allocate(auth_buffer_len(image)).unwrap();
        let chunk = write_auth_chunk(image, 0b0011, &mut buf).unwrap();
        let base = buf.bus_addr();

        assert_eq!(AUTH_CHUNK_LEN, 80);
        assert_eq!(chunk.ae_mask.get(), 0b0011);
        assert_eq!(chunk.img_len.get() as usize, image.len() - SIMG_AE_MODE_OFFSET);
        assert_eq!(u64::from(chunk.css_hdr_low.get()), (base + 80) & 0xffff_ffff);
        assert_eq!(u64::from(chunk.css_hdr_high.get()), (base + 80) >> 32);
        let img = base + 80 + 128 + 512 + 256;
        assert_eq!(u64::from(chunk.img_low.get()), img & 0xffff_ffff);
        assert_eq!(u64::from(chunk.img_ae_init_data_low.get()), (img + 552) & 0xffff_ffff);
        assert_eq!(u64::from(chunk.img_ae_insts_low.get()), (img + 952) & 0xffff_ffff);
        assert_eq!(chunk.chunk_bus_addr.get(), base);

        let data = buf.as_slice();
        assert_eq!(&data[80..208], image.css_header());
        assert!(data[208 + 256..208 + 508].iter().all(|&b| b == 0));
        assert_eq!(&data[208 + 508..208 + 512], image.exponent());
        assert_eq!(&data[976..], image.payload());
    }

    #[test]
    fn small_buffer_is_rejected() {
        let suof = signed(1);
        let mut buf = HostDma::new().allocate(100).unwrap();
        assert!(write_auth_chunk(&suof.images[0], 1, &mut buf).is_err());
    }

    #[test]
    fn host_dma_limit_and_distinct_addresses() {
        let mut dma = HostDma::with_limit(0x3000);
        let a = dma.allocate(0x1800).unwrap();
        let b = dma.allocate(0x800).unwrap();
        assert_ne!(a.bus_addr(), b.bus_addr());
        assert_eq!(b.bus_addr() - a.bus_addr(), 0x2000);
        assert!(matches!(dma.allocate(0x1001), Err(QatError::ResourceExhausted { .. })));
        assert_eq!(dma.allocated(), 0x2000);
    }
}
