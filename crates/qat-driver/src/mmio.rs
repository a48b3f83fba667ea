//! Register windows.
//!
//! The HAL reaches hardware only through [`RegisterWindow`]: 32-bit access at
//! a byte offset. [`MappedRegion`] maps a PCI BAR from sysfs; [`MemoryWindow`]
//! is plain storage with a write log, used wherever a device is absent.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::ptr::NonNull;
use std::sync::Mutex;

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{QatError, Result};

/// 32-bit register access at a byte offset.
pub trait RegisterWindow {
    /// Read the register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`.
    fn write32(&mut self, offset: usize, value: u32);

    /// Window size in bytes.
    fn size(&self) -> usize;
}

impl<W: RegisterWindow + ?Sized> RegisterWindow for &mut W {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }

    fn size(&self) -> usize {
        (**self).size()
    }
}

impl<W: RegisterWindow + ?Sized> RegisterWindow for Box<W> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }

    fn size(&self) -> usize {
        (**self).size()
    }
}

// ── Mapped BAR ───────────────────────────────────────────────────────────────

/// PCI BAR mapped from `/sys/bus/pci/devices/<bdf>/resource<N>`.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    bdf: String,
    bar: usize,
}

// SAFETY: Send - the mapping is owned exclusively by this value and is valid
// process-wide, so moving it to another thread does not invalidate it.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Map BAR `bar` of PCI function `bdf` (e.g. `0000:3d:00.0`).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the resource file cannot be opened or
    /// mapped, or an invalid-input error if it is empty.
    pub fn open(bdf: &str, bar: usize) -> Result<Self> {
        let path = format!("/sys/bus/pci/devices/{bdf}/resource{bar}");
        tracing::debug!("Mapping {path}");

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(QatError::invalid_input(format!("{path} has zero size")));
        }

        // SAFETY: mmap of a device resource file.
        // Invariants: (1) fd just opened read/write and kept alive in `_file`;
        // (2) size non-zero, taken from the resource file; (3) offset 0;
        // (4) MAP_SHARED so stores reach the device; (5) unmapped in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| QatError::from(std::io::Error::from(e)))?;
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| QatError::invalid_input(format!("{path} mapped at null")))?;

        tracing::info!("Mapped BAR{bar} of {bdf}: {size:#x} bytes at {ptr:p}");
        Ok(Self {
            ptr,
            size,
            _file: file,
            bdf: bdf.to_string(),
            bar,
        })
    }

    /// PCI address of the mapped function.
    #[must_use]
    pub fn bdf(&self) -> &str {
        &self.bdf
    }

    /// BAR index.
    #[must_use]
    pub const fn bar(&self) -> usize {
        self.bar
    }

    fn in_bounds(&self, offset: usize) -> bool {
        offset % 4 == 0 && offset.checked_add(4).is_some_and(|end| end <= self.size)
    }
}

impl RegisterWindow for MappedRegion {
    /// Out-of-range or unaligned reads return all ones, as an aborted PCI
    /// read would.
    fn read32(&self, offset: usize) -> u32 {
        if !self.in_bounds(offset) {
            tracing::warn!("BAR{} read at {offset:#x} outside {:#x}", self.bar, self.size);
            return u32::MAX;
        }
        // SAFETY: volatile MMIO read. ptr is valid for `size` bytes (mmap in
        // open), offset+4 <= size and offset is 4-byte aligned (checked above).
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(offset).cast::<u32>()) }
    }

    /// Out-of-range or unaligned writes are dropped.
    fn write32(&mut self, offset: usize, value: u32) {
        if !self.in_bounds(offset) {
            tracing::warn!("BAR{} write at {offset:#x} outside {:#x}", self.bar, self.size);
            return;
        }
        // SAFETY: volatile MMIO write; same invariants as read32, and
        // `&mut self` makes this the only access in flight.
        unsafe {
            std::ptr::write_volatile(self.ptr.as_ptr().add(offset).cast::<u32>(), value);
        }
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly the mapping created in open(); Drop
        // runs once and no references into the mapping outlive self.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::warn!("munmap of BAR{} failed: {e}", self.bar);
        }
        tracing::debug!("Unmapped BAR{} of {}", self.bar, self.bdf);
    }
}

// ── In-memory window ─────────────────────────────────────────────────────────

type ReadHook = Box<dyn FnMut(usize, u32) -> u32 + Send>;

/// Sparse in-memory register file.
///
/// Reads return the last value written (zero if none), optionally passed
/// through a read hook that may substitute another value. Every write is
/// appended to a log in order.
pub struct MemoryWindow {
    size: usize,
    regs: HashMap<usize, u32>,
    log: Vec<(usize, u32)>,
    hook: Option<Mutex<ReadHook>>,
}

impl std::fmt::Debug for MemoryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWindow")
            .field("size", &self.size)
            .field("registers", &self.regs.len())
            .field("writes", &self.log.len())
            .field("hooked", &self.hook.is_some())
            .finish()
    }
}

impl MemoryWindow {
    /// Empty window of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            regs: HashMap::new(),
            log: Vec::new(),
            hook: None,
        }
    }

    /// Install `hook`, called on every read with the offset and stored
    /// value; its return value is what the reader sees.
    #[must_use]
    pub fn with_read_hook(mut self, hook: impl FnMut(usize, u32) -> u32 + Send + 'static) -> Self {
        self.hook = Some(Mutex::new(Box::new(hook)));
        self
    }

    /// Store `value` without logging it.
    pub fn poke(&mut self, offset: usize, value: u32) {
        self.regs.insert(offset, value);
    }

    /// Stored value, bypassing the read hook.
    #[must_use]
    pub fn peek(&self, offset: usize) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    /// Every write in order.
    #[must_use]
    pub fn writes(&self) -> &[(usize, u32)] {
        &self.log
    }

    /// Values written to `offset`, in order.
    #[must_use]
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.log.iter().filter(|(o, _)| *o == offset).map(|(_, v)| *v).collect()
    }

    /// Forget the write log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl RegisterWindow for MemoryWindow {
    fn read32(&self, offset: usize) -> u32 {
        let stored = self.peek(offset);
        match &self.hook {
            Some(hook) => match hook.lock() {
                Ok(mut f) => f(offset, stored),
                Err(_) => stored,
            },
            None => stored,
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.regs.insert(offset, value);
        self.log.push((offset, value));
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_window_stores_and_logs() {
        let mut w = MemoryWindow::new(0x1000);
        assert_eq!(w.read32(0x10), 0);
        w.write32(0x10, 7);
        w.write32(0x14, 8);
        w.write32(0x10, 9);
        assert_eq!(w.read32(0x10), 9);
        assert_eq!(w.writes(), &[(0x10, 7), (0x14, 8), (0x10, 9)]);
        assert_eq!(w.writes_to(0x10), vec![7, 9]);
    }

    #[test]
    fn poke_is_not_logged() {
        let mut w = MemoryWindow::new(0x100);
        w.poke(0x20, 0x55);
        assert_eq!(w.read32(0x20), 0x55);
        assert!(w.writes().is_empty());
    }

    #[test]
    fn read_hook_substitutes_values() {
        let mut ticks = 0;
        let w = MemoryWindow::new(0x100).with_read_hook(move |offset, stored| {
            if offset == 0x40 {
                ticks += 1;
                ticks
            } else {
                stored
            }
        });
        assert_eq!(w.read32(0x40), 1);
        assert_eq!(w.read32(0x40), 2);
        assert_eq!(w.read32(0x44), 0);
    }

    #[test]
    fn mutable_reference_is_a_window() {
        fn touch(mut w: impl RegisterWindow) {
            w.write32(0, 1);
        }
        let mut w = MemoryWindow::new(0x10);
        touch(&mut w);
        assert_eq!(w.read32(0), 1);
    }
}
