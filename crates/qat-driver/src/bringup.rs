//! Device bring-up.
//!
//! Runs once per device before any firmware load:
//!
//! ```text
//! reset AEs+slices ─> clear reset (read back) ─> clocks on ─> liveness
//!        │
//!        │  clocks are written only after reset reads back clear, per
//!        │  domain; keep this order
//!        └─> CSR defaults ─> eSRAM init* ─> timestamps ─> xfer regs
//!              ─> clear GPRs (unsigned) ─> SIGNATURE_ENABLE
//!
//! * DH895xCC only
//! ```
//!
//! A step that exceeds its retry budget aborts bring-up; registers already
//! written stay written and the caller re-runs bring-up from the start.

use qat_chip::regs::{ae_misc, ctx_enables, esram, init, misc_control, wakeup};
use qat_chip::ucode::CLEAR_GPR_PROGRAM;
use qat_chip::{FirmwareMode, GlobalCsr, LocalCsr, ALL_CTX_MASK};

use crate::csr::Hal;
use crate::error::Result;
use crate::mmio::RegisterWindow;
use crate::poll::{Poll, Step};

/// Transfer registers zeroed per AE.
const XFER_REGS: u16 = 128;

/// Cycles the clear-GPR program is given per poll.
const CLEAR_GPR_CYCLES: u32 = 20;

fn reset_bits<W: RegisterWindow>(hal: &Hal<W>) -> Vec<(GlobalCsr, GlobalCsr, u32)> {
    let slices = hal.family().full_slice_mask();
    hal.map()
        .reset_domains
        .iter()
        .map(|d| (d.reset, d.clock, d.bits(hal.ae_mask(), slices)))
        .filter(|&(_, _, bits)| bits != 0)
        .collect()
}

/// Put every enabled AE and slice into reset.
pub fn reset<W: RegisterWindow>(hal: &mut Hal<W>) {
    for (reg, _, bits) in reset_bits(hal) {
        let value = hal.read_global(reg) | bits;
        hal.write_global(reg, value);
    }
}

/// Take the enabled AEs and slices out of reset, enable their clocks, and
/// confirm each AE is running.
///
/// # Errors
///
/// Hardware timeout if reset does not clear or an AE is not clocked.
pub fn clear_reset<W: RegisterWindow>(hal: &mut Hal<W>) -> Result<()> {
    let retries = hal.config().reset_retries;
    for (reg, clock, bits) in reset_bits(hal) {
        Poll::busy("reset clear", retries).run(
            || {
                let value = hal.read_global(reg);
                if value & bits != 0 {
                    hal.write_global(reg, value & !bits);
                }
                Ok(hal.read_global(reg))
            },
            |v| if v & bits == 0 { Step::Done(()) } else { Step::Pending },
        )?;
        let clk = hal.read_global(clock) | bits;
        hal.write_global(clock, clk);
    }
    let aes: Vec<u8> = hal.enabled_aes().collect();
    for ae in aes {
        hal.check_ae_alive(ae)?;
    }
    tracing::debug!("AEs {:#x} out of reset", hal.ae_mask());
    Ok(())
}

/// Write the post-reset defaults to every context CSR of `ae`.
///
/// # Errors
///
/// Any CSR-access error.
pub fn init_ae_defaults<W: RegisterWindow>(hal: &mut Hal<W>, ae: u8) -> Result<()> {
    hal.write_ae_csr(ae, LocalCsr::CTX_ENABLES, init::CTX_ENABLES)?;
    hal.write_indirect(ae, ALL_CTX_MASK, LocalCsr::CTX_STS_INDIRECT, init::PC)?;
    hal.write_ae_csr(ae, LocalCsr::CTX_ARB_CNTL, init::CTX_ARB)?;
    hal.write_ae_csr(ae, LocalCsr::CC_ENABLE, init::CC_ENABLE)?;
    hal.put_wakeup_event(ae, ALL_CTX_MASK, init::WAKEUP_EVENTS)?;
    hal.put_sig_event(ae, ALL_CTX_MASK, init::SIG_EVENTS)
}

fn init_esram<W: RegisterWindow>(hal: &mut Hal<W>) -> Result<()> {
    let csr = hal.read_global(GlobalCsr::ESRAM_AUTO_INIT);
    if csr & esram::TINIT != 0 && csr & esram::DONE != 0 {
        return Ok(());
    }
    hal.write_global(GlobalCsr::ESRAM_AUTO_INIT, csr | esram::TINIT);
    let first = hal.enabled_aes().next().unwrap_or(0);
    let hal_ref = &*hal;
    Poll::busy("eSRAM auto-init", hal_ref.config().esram_retries).run(
        || {
            hal_ref.wait_cycles(first, esram::SHRAM_INIT_CYCLES, false)?;
            Ok(hal_ref.read_global(GlobalCsr::ESRAM_AUTO_INIT))
        },
        |v| if v & esram::DONE != 0 { Step::Done(()) } else { Step::Pending },
    )?;
    hal.wait_cycles(first, esram::SHRAM_INIT_CYCLES, false)?;
    tracing::debug!("eSRAM initialised");
    Ok(())
}

fn reset_timestamps<W: RegisterWindow>(hal: &mut Hal<W>) -> Result<()> {
    let misc = hal.read_global(GlobalCsr::MISC_CONTROL);
    if misc & misc_control::TIMESTAMP_ENABLE != 0 {
        hal.write_global(GlobalCsr::MISC_CONTROL, misc & !misc_control::TIMESTAMP_ENABLE);
    }
    let aes: Vec<u8> = hal.enabled_aes().collect();
    for ae in aes {
        hal.write_ae_csr(ae, LocalCsr::TIMESTAMP_LOW, 0)?;
        hal.write_ae_csr(ae, LocalCsr::TIMESTAMP_HIGH, 0)?;
    }
    hal.write_global(GlobalCsr::MISC_CONTROL, misc | misc_control::TIMESTAMP_ENABLE);
    Ok(())
}

fn clear_xfer<W: RegisterWindow>(hal: &mut Hal<W>, ae: u8) -> Result<()> {
    for reg in 0..XFER_REGS {
        hal.write_xfer(ae, reg, 0)?;
    }
    Ok(())
}

/// Zero every GPR of every enabled AE by running the clear program on all
/// contexts, then restore the context defaults.
///
/// # Errors
///
/// Hardware timeout if a program does not finish; any CSR-access error.
pub fn clear_gpr<W: RegisterWindow>(hal: &mut Hal<W>) -> Result<()> {
    let nn_mode = if hal.family().has_extended_regfiles() {
        0
    } else {
        ctx_enables::NN_MODE
    };
    let aes: Vec<u8> = hal.enabled_aes().collect();
    for &ae in &aes {
        let misc = hal.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?;
        hal.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc & !ae_misc::SHARE_CS)?;
        let csr = hal.ctx_enables(ae)? | nn_mode;
        hal.write_ae_csr(ae, LocalCsr::CTX_ENABLES, csr)?;
        hal.wr_uwords(ae, 0, &CLEAR_GPR_PROGRAM)?;
        hal.set_pc(ae, ALL_CTX_MASK, 0)?;
        hal.write_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS, 0)?;
        hal.put_wakeup_event(ae, ALL_CTX_MASK, wakeup::VOLUNTARY)?;
        hal.put_sig_event(ae, ALL_CTX_MASK, 0)?;
        hal.enable_ctx(ae, ALL_CTX_MASK)?;
    }
    for &ae in &aes {
        hal.wait_cycles(ae, CLEAR_GPR_CYCLES, true)?;
        hal.disable_ctx(ae, ALL_CTX_MASK)?;
        init_ae_defaults(hal, ae)?;
    }
    tracing::debug!("GPRs cleared on AEs {:#x}", hal.ae_mask());
    Ok(())
}

/// Full bring-up for a device that will run firmware in `mode`.
///
/// # Errors
///
/// Hardware timeout from any step; bring-up must be re-run after a failure.
pub fn bring_up<W: RegisterWindow>(hal: &mut Hal<W>, mode: FirmwareMode) -> Result<()> {
    reset(hal);
    clear_reset(hal)?;
    let aes: Vec<u8> = hal.enabled_aes().collect();
    for &ae in &aes {
        init_ae_defaults(hal, ae)?;
    }
    if hal.family().needs_esram_init() {
        init_esram(hal)?;
    }
    reset_timestamps(hal)?;
    for &ae in &aes {
        clear_xfer(hal, ae)?;
    }
    if mode == FirmwareMode::Unsigned {
        clear_gpr(hal)?;
    }
    for &ae in &aes {
        let sig = hal.read_ae_csr(ae, LocalCsr::SIGNATURE_ENABLE)?;
        hal.write_ae_csr(ae, LocalCsr::SIGNATURE_ENABLE, sig | 1)?;
    }
    tracing::info!("{} bring-up complete, AEs {:#x}", hal.family(), hal.ae_mask());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::mmio::MemoryWindow;
    use qat_chip::DeviceFamily;

    fn hal(family: DeviceFamily, esram_done: bool) -> Hal<MemoryWindow> {
        let map = family.register_map();
        let counters: Vec<usize> = (0..family.ae_count())
            .map(|ae| map.ae_local(ae, LocalCsr::PROFILE_COUNT).get())
            .collect();
        let esram_at = map.global(GlobalCsr::ESRAM_AUTO_INIT).get();
        let mut tick = 0u32;
        let window = MemoryWindow::new(map.window_span(family.ae_count())).with_read_hook(
            move |offset, stored| {
                if counters.contains(&offset) {
                    tick = tick.wrapping_add(16);
                    tick
                } else if offset == esram_at && esram_done {
                    stored | esram::DONE
                } else {
                    stored
                }
            },
        );
        Hal::new(window, family, family.full_ae_mask(), HalConfig::default()).unwrap()
    }

    #[test]
    fn unsigned_bring_up_clears_reset_and_enables_signatures() {
        let family = DeviceFamily::C62x;
        let mut hal = hal(family, false);
        bring_up(&mut hal, FirmwareMode::Unsigned).unwrap();
        for (reg, clock, bits) in reset_bits(&hal) {
            assert_eq!(hal.read_global(reg) & bits, 0);
            assert_eq!(hal.read_global(clock) & bits, bits);
        }
        for ae in 0..family.ae_count() {
            let sig = hal.map().ae_local(ae, LocalCsr::SIGNATURE_ENABLE).get();
            assert_eq!(hal.window().peek(sig) & 1, 1);
            let enables = hal.map().ae_local(ae, LocalCsr::CTX_ENABLES).get();
            assert_eq!(hal.window().peek(enables), init::CTX_ENABLES);
        }
        let ustore = hal.map().ae_local(0, LocalCsr::USTORE_DATA_LOWER).get();
        assert!(hal.window().writes_to(ustore).len() >= CLEAR_GPR_PROGRAM.len());
    }

    #[test]
    fn clocks_are_enabled_after_reset_reads_back_clear() {
        let mut hal = hal(DeviceFamily::C62x, false);
        reset(&mut hal);
        clear_reset(&mut hal).unwrap();
        for (reg, clock, bits) in reset_bits(&hal) {
            let reg = hal.map().global(reg).get();
            let clock = hal.map().global(clock).get();
            let log = hal.window().writes();
            let released = log
                .iter()
                .rposition(|&(at, v)| at == reg && v & bits == 0)
                .unwrap();
            let clocked = log.iter().position(|&(at, _)| at == clock).unwrap();
            assert!(released < clocked);
        }
    }

    #[test]
    fn signed_bring_up_skips_gpr_clear() {
        let mut hal = hal(DeviceFamily::Qat4xxx, false);
        bring_up(&mut hal, FirmwareMode::Signed).unwrap();
        let ustore = hal.map().ae_local(0, LocalCsr::USTORE_DATA_LOWER).get();
        assert!(hal.window().writes_to(ustore).is_empty());
    }

    #[test]
    fn esram_init_waits_for_done() {
        let mut hal = hal(DeviceFamily::Dh895xcc, true);
        bring_up(&mut hal, FirmwareMode::Unsigned).unwrap();
        assert_ne!(hal.read_global(GlobalCsr::ESRAM_AUTO_INIT) & esram::TINIT, 0);
    }

    #[test]
    fn esram_that_never_finishes_times_out() {
        let mut hal = hal(DeviceFamily::Dh895xcc, false);
        let err = bring_up(&mut hal, FirmwareMode::Unsigned).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn stalled_counter_fails_liveness() {
        let family = DeviceFamily::C3xxx;
        let span = family.register_map().window_span(family.ae_count());
        let config = HalConfig::default().with_ae_retries(5);
        let mut hal = Hal::new(MemoryWindow::new(span), family, family.full_ae_mask(), config).unwrap();
        let err = bring_up(&mut hal, FirmwareMode::Unsigned).unwrap_err();
        assert!(err.is_timeout());
    }
}
