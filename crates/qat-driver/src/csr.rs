//! Register access.
//!
//! [`Hal`] owns the register window for one device and resolves every
//! typed register through the family's [`RegisterMap`]. AE-local accesses
//! are followed by a poll of the AE's local-CSR busy bit, retried up to
//! [`HalConfig::csr_retries`]. Indirect registers are reached by pointing
//! `CSR_CTX_POINTER` at a context, accessing, and restoring the pointer.
//!
//! ```text
//! write_indirect(ae, 0b0101, CTX_STS_INDIRECT, pc)
//!   save  CSR_CTX_POINTER
//!   ctx 0: CSR_CTX_POINTER = 0; CTX_STS_INDIRECT = pc
//!   ctx 2: CSR_CTX_POINTER = 2; CTX_STS_INDIRECT = pc
//!   restore CSR_CTX_POINTER
//! ```

use qat_chip::family::UPC_MASK;
use qat_chip::regs::{active_ctx, csr_status, ctx_enables};
use qat_chip::{DeviceFamily, GlobalCsr, LocalCsr, RegisterMap, MAX_CTX};

use crate::config::HalConfig;
use crate::error::{QatError, Result};
use crate::mmio::RegisterWindow;
use crate::poll::{Poll, Step};

/// Bits of `PROFILE_COUNT` that count cycles.
const PROFILE_MASK: u32 = 0xffff;

/// Register-level access to one device.
#[derive(Debug)]
pub struct Hal<W: RegisterWindow> {
    window: W,
    family: DeviceFamily,
    map: RegisterMap,
    config: HalConfig,
    ae_mask: u32,
}

impl<W: RegisterWindow> Hal<W> {
    /// Wrap `window` for a `family` device with the AEs in `ae_mask` enabled.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error if the window is smaller than the
    /// family's register map or `ae_mask` names AEs the family lacks.
    pub fn new(window: W, family: DeviceFamily, ae_mask: u32, config: HalConfig) -> Result<Self> {
        let map = family.register_map();
        let span = map.window_span(family.ae_count());
        if window.size() < span {
            return Err(QatError::invalid_input(format!(
                "{family} register window is {:#x} bytes, needs {span:#x}",
                window.size()
            )));
        }
        if ae_mask & !family.full_ae_mask() != 0 {
            return Err(QatError::invalid_input(format!(
                "AE mask {ae_mask:#x} exceeds {family}'s {} AEs",
                family.ae_count()
            )));
        }
        Ok(Self {
            window,
            family,
            map,
            config,
            ae_mask,
        })
    }

    /// Device family.
    pub const fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Register map in use.
    pub const fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Retry budgets.
    pub const fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Enabled-AE mask.
    pub const fn ae_mask(&self) -> u32 {
        self.ae_mask
    }

    /// Enabled AEs in ascending order.
    pub fn enabled_aes(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.family.ae_count()).filter(move |ae| self.ae_mask & (1 << ae) != 0)
    }

    /// Underlying window.
    pub const fn window(&self) -> &W {
        &self.window
    }

    /// Underlying window, mutably.
    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    /// Give back the window.
    pub fn into_window(self) -> W {
        self.window
    }

    fn check_ae(&self, ae: u8) -> Result<()> {
        if ae < self.family.ae_count() {
            Ok(())
        } else {
            Err(QatError::invalid_input(format!(
                "AE {ae} out of range ({} has {})",
                self.family,
                self.family.ae_count()
            )))
        }
    }

    // ── Global CSRs ──

    /// Read a global CSR.
    pub fn read_global(&self, csr: GlobalCsr) -> u32 {
        self.window.read32(self.map.global(csr).get())
    }

    /// Write a global CSR.
    pub fn write_global(&mut self, csr: GlobalCsr, value: u32) {
        tracing::trace!("global {:#x} <- {value:#010x}", csr.offset());
        self.window.write32(self.map.global(csr).get(), value);
    }

    // ── AE-local CSRs ──

    /// Read a local CSR of `ae`, retrying while the AE reports busy.
    ///
    /// # Errors
    ///
    /// Invalid input for an out-of-range AE, hardware timeout if the busy
    /// bit never clears.
    pub fn read_ae_csr(&self, ae: u8, csr: LocalCsr) -> Result<u32> {
        self.check_ae(ae)?;
        let offset = self.map.ae_local(ae, csr).get();
        let status = self.map.ae_local(ae, LocalCsr::LOCAL_CSR_STATUS).get();
        let mut value = 0;
        Poll::busy("local CSR read", self.config.csr_retries)
            .run(
                || {
                    value = self.window.read32(offset);
                    Ok(self.window.read32(status))
                },
                not_busy,
            )
            .inspect_err(|_| tracing::error!("AE {ae} {csr:?} read stuck busy"))?;
        Ok(value)
    }

    /// Write a local CSR of `ae`, retrying while the AE reports busy.
    ///
    /// # Errors
    ///
    /// Invalid input for an out-of-range AE, hardware timeout if the busy
    /// bit never clears.
    pub fn write_ae_csr(&mut self, ae: u8, csr: LocalCsr, value: u32) -> Result<()> {
        self.check_ae(ae)?;
        let offset = self.map.ae_local(ae, csr).get();
        let status = self.map.ae_local(ae, LocalCsr::LOCAL_CSR_STATUS).get();
        let window = &mut self.window;
        Poll::busy("local CSR write", self.config.csr_retries)
            .run(
                || {
                    window.write32(offset, value);
                    Ok(window.read32(status))
                },
                not_busy,
            )
            .inspect_err(|_| tracing::error!("AE {ae} {csr:?} write stuck busy"))
    }

    /// Read indirect CSR `csr` of context `ctx`.
    ///
    /// # Errors
    ///
    /// Invalid input for a bad AE or context, or any CSR-access error.
    pub fn read_indirect(&mut self, ae: u8, ctx: u8, csr: LocalCsr) -> Result<u32> {
        check_ctx(ctx)?;
        let saved = self.read_ae_csr(ae, LocalCsr::CSR_CTX_POINTER)?;
        self.write_ae_csr(ae, LocalCsr::CSR_CTX_POINTER, u32::from(ctx))?;
        let value = self.read_ae_csr(ae, csr)?;
        self.write_ae_csr(ae, LocalCsr::CSR_CTX_POINTER, saved)?;
        Ok(value)
    }

    /// Write `value` to indirect CSR `csr` of every context in `ctx_mask`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn write_indirect(&mut self, ae: u8, ctx_mask: u8, csr: LocalCsr, value: u32) -> Result<()> {
        let saved = self.read_ae_csr(ae, LocalCsr::CSR_CTX_POINTER)?;
        for ctx in ctxs(ctx_mask) {
            self.write_ae_csr(ae, LocalCsr::CSR_CTX_POINTER, u32::from(ctx))?;
            self.write_ae_csr(ae, csr, value)?;
        }
        self.write_ae_csr(ae, LocalCsr::CSR_CTX_POINTER, saved)
    }

    /// Write transfer register `reg` (hardware transfer address) of `ae`.
    ///
    /// # Errors
    ///
    /// Invalid input for an out-of-range AE.
    pub fn write_xfer(&mut self, ae: u8, reg: u16, value: u32) -> Result<()> {
        self.check_ae(ae)?;
        self.window.write32(self.map.ae_xfer(ae, reg).get(), value);
        Ok(())
    }

    // ── Context control ──

    /// `CTX_ENABLES` with the write-one-to-clear bits masked off.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn ctx_enables(&self, ae: u8) -> Result<u32> {
        Ok(self.read_ae_csr(ae, LocalCsr::CTX_ENABLES)? & ctx_enables::IGNORE_W1C_MASK)
    }

    /// Whether `ae` runs in four-context mode.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn four_ctx_mode(&self, ae: u8) -> Result<bool> {
        Ok(self.ctx_enables(ae)? & ctx_enables::IN_USE_CONTEXTS != 0)
    }

    /// Set the enable bits of `ctx_mask`. Odd contexts are dropped in
    /// four-context mode.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn enable_ctx(&mut self, ae: u8, ctx_mask: u8) -> Result<()> {
        let csr = self.ctx_enables(ae)?;
        let mask = if csr & ctx_enables::IN_USE_CONTEXTS != 0 {
            ctx_mask & qat_chip::EVEN_CTX_MASK
        } else {
            ctx_mask
        };
        self.write_ae_csr(ae, LocalCsr::CTX_ENABLES, csr | ctx_enables::enable_bits(mask))
    }

    /// Clear the enable bits of `ctx_mask`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn disable_ctx(&mut self, ae: u8, ctx_mask: u8) -> Result<()> {
        let csr = self.ctx_enables(ae)? & !ctx_enables::enable_bits(ctx_mask);
        self.write_ae_csr(ae, LocalCsr::CTX_ENABLES, csr)
    }

    /// Set the wake-up events of `ctx_mask`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn put_wakeup_event(&mut self, ae: u8, ctx_mask: u8, events: u32) -> Result<()> {
        self.write_indirect(ae, ctx_mask, LocalCsr::CTX_WAKEUP_EVENTS_INDIRECT, events)
    }

    /// Set the signal events of `ctx_mask`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn put_sig_event(&mut self, ae: u8, ctx_mask: u8, events: u32) -> Result<()> {
        self.write_indirect(ae, ctx_mask, LocalCsr::CTX_SIG_EVENTS_INDIRECT, events)
    }

    /// Point the program counter of every context in `ctx_mask` at `upc`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn set_pc(&mut self, ae: u8, ctx_mask: u8, upc: u32) -> Result<()> {
        self.write_indirect(ae, ctx_mask, LocalCsr::CTX_STS_INDIRECT, upc & UPC_MASK)
    }

    /// Whether any context of `ae` is enabled or the AE reports itself busy.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn is_ae_active(&self, ae: u8) -> Result<bool> {
        let enables = self.read_ae_csr(ae, LocalCsr::CTX_ENABLES)?;
        let active = self.read_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS)?;
        Ok(enables & ctx_enables::ENABLE_MASK != 0 || active & active_ctx::ABO != 0)
    }

    // ── Cycle counting ──

    fn profile_count(&self, ae: u8) -> Result<u32> {
        Ok(self.read_ae_csr(ae, LocalCsr::PROFILE_COUNT)? & PROFILE_MASK)
    }

    /// Wait until `cycles` AE cycles have elapsed. With `check_inactive`,
    /// return early once the minimum has elapsed and no context is active.
    ///
    /// # Errors
    ///
    /// Hardware timeout if the counter does not advance far enough within
    /// [`HalConfig::ae_retries`] samples.
    pub fn wait_cycles(&self, ae: u8, cycles: u32, check_inactive: bool) -> Result<()> {
        let base = self.profile_count(ae)?;
        let min = self.config.min_alive_cycles;
        Poll::busy("AE cycle wait", self.config.ae_retries)
            .run(
                || {
                    let busy = if check_inactive {
                        self.read_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS)? & active_ctx::ABO
                    } else {
                        0
                    };
                    Ok(self.profile_count(ae)? | busy)
                },
                |sample| {
                    let elapsed = elapsed(base, sample & PROFILE_MASK);
                    let idle = sample & active_ctx::ABO == 0;
                    if elapsed >= cycles || (check_inactive && idle && elapsed >= min) {
                        Step::Done(())
                    } else {
                        Step::Pending
                    }
                },
            )
            .inspect_err(|_| tracing::error!("AE {ae} did not run {cycles} cycles"))
    }

    /// Confirm `ae` is clocked: its cycle counter must advance by at least
    /// [`HalConfig::min_alive_cycles`].
    ///
    /// # Errors
    ///
    /// Hardware timeout if the counter stalls.
    pub fn check_ae_alive(&self, ae: u8) -> Result<()> {
        let base = self.profile_count(ae)?;
        let min = self.config.min_alive_cycles;
        Poll::busy("AE liveness check", self.config.ae_retries)
            .run(
                || self.profile_count(ae),
                |count| {
                    if elapsed(base, count) >= min {
                        Step::Done(())
                    } else {
                        Step::Pending
                    }
                },
            )
            .inspect_err(|_| tracing::error!("AE {ae} is inactive"))
    }
}

fn not_busy(status: u32) -> Step<()> {
    if status & csr_status::BUSY == 0 {
        Step::Done(())
    } else {
        Step::Pending
    }
}

/// Cycles from `base` to `now` on the 16-bit wrapping counter.
fn elapsed(base: u32, now: u32) -> u32 {
    now.wrapping_sub(base) & PROFILE_MASK
}

fn check_ctx(ctx: u8) -> Result<()> {
    if ctx < MAX_CTX {
        Ok(())
    } else {
        Err(QatError::invalid_input(format!("context {ctx} out of range")))
    }
}

/// Contexts named by `mask`, ascending.
pub fn ctxs(mask: u8) -> impl Iterator<Item = u8> {
    (0..MAX_CTX).filter(move |c| mask & (1 << c) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::MemoryWindow;

    fn hal() -> Hal<MemoryWindow> {
        let family = DeviceFamily::C62x;
        let span = family.register_map().window_span(family.ae_count());
        Hal::new(MemoryWindow::new(span), family, family.full_ae_mask(), HalConfig::default())
            .unwrap()
    }

    #[test]
    fn rejects_small_window_and_foreign_aes() {
        let family = DeviceFamily::C3xxx;
        assert!(Hal::new(MemoryWindow::new(0x100), family, 1, HalConfig::default()).is_err());
        let span = family.register_map().window_span(family.ae_count());
        assert!(Hal::new(MemoryWindow::new(span), family, 1 << 6, HalConfig::default()).is_err());
    }

    #[test]
    fn indirect_write_restores_pointer() {
        let mut hal = hal();
        let ptr = hal.map().ae_local(2, LocalCsr::CSR_CTX_POINTER).get();
        let pc = hal.map().ae_local(2, LocalCsr::CTX_STS_INDIRECT).get();
        hal.window_mut().poke(ptr, 5);
        hal.set_pc(2, 0b0101, 0x2_1234).unwrap();
        assert_eq!(hal.window().writes_to(ptr), vec![0, 2, 5]);
        assert_eq!(hal.window().writes_to(pc), vec![0x1234, 0x1234]);
    }

    #[test]
    fn busy_bit_exhausts_retry_budget() {
        let mut hal = hal();
        let status = hal.map().ae_local(1, LocalCsr::LOCAL_CSR_STATUS).get();
        hal.window_mut().poke(status, csr_status::BUSY);
        let err = hal.write_ae_csr(1, LocalCsr::CC_ENABLE, 1).unwrap_err();
        assert!(err.is_timeout());
        let target = hal.map().ae_local(1, LocalCsr::CC_ENABLE).get();
        assert_eq!(hal.window().writes_to(target).len(), 500);
    }

    #[test]
    fn enable_respects_four_context_mode() {
        let mut hal = hal();
        let off = hal.map().ae_local(0, LocalCsr::CTX_ENABLES).get();
        hal.window_mut().poke(off, ctx_enables::IN_USE_CONTEXTS);
        hal.enable_ctx(0, 0xff).unwrap();
        assert_eq!(
            hal.window().peek(off),
            ctx_enables::IN_USE_CONTEXTS | ctx_enables::enable_bits(0x55)
        );
        hal.disable_ctx(0, 0x01).unwrap();
        assert_eq!(
            hal.window().peek(off),
            ctx_enables::IN_USE_CONTEXTS | ctx_enables::enable_bits(0x54)
        );
    }

    #[test]
    fn stalled_counter_is_not_alive() {
        let hal = hal();
        assert!(hal.check_ae_alive(0).unwrap_err().is_timeout());
    }

    #[test]
    fn elapsed_wraps() {
        assert_eq!(elapsed(0xfff0, 0x0010), 0x20);
        assert_eq!(elapsed(5, 5), 0);
    }

    #[test]
    fn out_of_range_ae_is_invalid_input() {
        let hal = hal();
        assert!(matches!(
            hal.read_ae_csr(10, LocalCsr::CTX_ENABLES),
            Err(QatError::InvalidInput { .. })
        ));
    }
}
