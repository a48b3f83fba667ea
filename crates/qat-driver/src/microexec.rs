//! Micro-program execution and register initialisation.
//!
//! Some AE state is reachable only by running instructions on the AE: GPRs,
//! transfer-out registers, next-neighbor registers and local memory. The
//! loader borrows one context, points it at a short program placed at
//! ustore address 0, lets it run to `ctx_arb[kill]`, then puts every piece of
//! state it touched back.
//!
//! ```text
//! save ──> clear SHARE_CS ──> write program @0 ──> pc=0, wake, enable
//!                                                        │
//! restore <── disable <── wait (cycles or inactive) <────┘
//! ```

use qat_chip::regs::{active_ctx, ae_misc, cc_enable, ctx_enables, ustore, wakeup};
use qat_chip::ucode::{
    self, immed_to_gpr, immed_via_gpr_b, lm_write, read_to_alu, reg_addr, with_ecc, MicroWord,
    RegAddr, RegType, CTX_ARB_KILL,
};
use qat_chip::{LocalCsr, MAX_CTX};

use crate::csr::{ctxs, Hal};
use crate::error::{QatError, Result};
use crate::mmio::RegisterWindow;

/// Programs at most this long have the ustore words they overwrite saved
/// and restored.
pub const MAX_EXEC_INST: usize = 100;

/// Cycles budgeted per instruction of a synthesized program.
pub const CYCLES_PER_INST: u32 = 5;

/// Highest register number accepted by [`Hal::init_reg`].
pub const MAX_REG_NUM: u16 = 128;

/// Cycles to wait after executing a single read-to-ALU instruction.
const READ_REG_CYCLES: u32 = 8;

/// Local-memory bytes per AE.
pub const LMEM_BYTES: u32 = qat_chip::family::LMEM_WORDS * 4;

/// State of one AE and context captured before a micro-program runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedContext {
    /// Ustore words at address 0 overwritten by the program, if saved.
    pub uwords: Option<Vec<MicroWord>>,
    /// Context wake-up events.
    pub wakeup_events: u32,
    /// Context program counter.
    pub pc: u32,
    /// `CTX_ENABLES` without write-one-to-clear bits.
    pub ctx_enables: u32,
    /// `CC_ENABLE`.
    pub cc_enable: u32,
    /// `ACTIVE_CTX_STATUS`.
    pub active_ctx: u32,
    /// `CTX_ARB_CNTL`.
    pub ctx_arb: u32,
    /// `AE_MISC_CONTROL`, including the shared-ustore bit.
    pub misc_control: u32,
    /// Local-memory address and byte-index registers, in restore order.
    pub lm_regs: Vec<(LocalCsr, u32)>,
    /// Future-count signal.
    pub count_signal: u32,
    /// Context signal events.
    pub sig_events: u32,
    /// Active signal events.
    pub active_sig_events: u32,
}

fn lm_registers(extended: bool) -> Vec<LocalCsr> {
    let mut regs = vec![
        LocalCsr::LM_ADDR_0_INDIRECT,
        LocalCsr::LM_ADDR_1_INDIRECT,
        LocalCsr::INDIRECT_LM_ADDR_0_BYTE_INDEX,
        LocalCsr::INDIRECT_LM_ADDR_1_BYTE_INDEX,
    ];
    if extended {
        regs.extend([
            LocalCsr::LM_ADDR_2_INDIRECT,
            LocalCsr::LM_ADDR_3_INDIRECT,
            LocalCsr::INDIRECT_LM_ADDR_2_BYTE_INDEX,
            LocalCsr::INDIRECT_LM_ADDR_3_BYTE_INDEX,
            LocalCsr::INDIRECT_T_INDEX,
            LocalCsr::INDIRECT_T_INDEX_BYTE_INDEX,
        ]);
    }
    regs
}

impl<W: RegisterWindow> Hal<W> {
    // ── Ustore ──

    /// Write `words` to the ustore of `ae` starting at `uaddr`, recomputing
    /// each word's ECC.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn wr_uwords(&mut self, ae: u8, uaddr: u32, words: &[MicroWord]) -> Result<()> {
        let saved = self.read_ae_csr(ae, LocalCsr::USTORE_ADDRESS)?;
        self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, uaddr | ustore::UA_ECS)?;
        for &word in words {
            let packed = with_ecc(word);
            self.write_ae_csr(ae, LocalCsr::USTORE_DATA_LOWER, packed as u32)?;
            self.write_ae_csr(ae, LocalCsr::USTORE_DATA_UPPER, (packed >> 32) as u32)?;
        }
        self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, saved)
    }

    /// Read `count` ustore words of `ae` starting at `uaddr`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn get_uwords(&mut self, ae: u8, uaddr: u32, count: usize) -> Result<Vec<MicroWord>> {
        let misc = self.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc & !ae_misc::SHARE_CS)?;
        let saved = self.read_ae_csr(ae, LocalCsr::USTORE_ADDRESS)?;
        let mut words = Vec::with_capacity(count);
        for addr in (uaddr..).take(count) {
            self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, addr | ustore::UA_ECS)?;
            let lo = self.read_ae_csr(ae, LocalCsr::USTORE_DATA_LOWER)?;
            let hi = self.read_ae_csr(ae, LocalCsr::USTORE_DATA_UPPER)?;
            words.push((u64::from(hi) << 32) | u64::from(lo));
        }
        self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, saved)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc)?;
        Ok(words)
    }

    /// Write 32-bit `values` into ustore memory of `ae` starting at word
    /// address `uaddr`.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn wr_umem(&mut self, ae: u8, uaddr: u32, values: &[u32]) -> Result<()> {
        let misc = self.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc & !ae_misc::SHARE_CS)?;
        self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, uaddr | ustore::UA_ECS)?;
        for &value in values {
            let (lo, hi) = ucode::umem_halves(value);
            self.write_ae_csr(ae, LocalCsr::USTORE_DATA_LOWER, lo)?;
            self.write_ae_csr(ae, LocalCsr::USTORE_DATA_UPPER, hi)?;
        }
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc)
    }

    // ── Execution ──

    fn check_exec_ctx(&self, ae: u8, ctx: u8) -> Result<()> {
        if ctx >= MAX_CTX {
            return Err(QatError::invalid_input(format!("context {ctx} out of range")));
        }
        if ctx & 1 != 0 && self.four_ctx_mode(ae)? {
            return Err(QatError::invalid_input(format!(
                "context {ctx} is unavailable on AE {ae} in four-context mode"
            )));
        }
        Ok(())
    }

    /// Capture the state a program run on `ctx` will disturb.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn save_context(&mut self, ae: u8, ctx: u8, program_len: usize) -> Result<SavedContext> {
        let mut lm_regs = Vec::new();
        for csr in lm_registers(self.family().has_extended_regfiles()) {
            lm_regs.push((csr, self.read_indirect(ae, ctx, csr)?));
        }
        let uwords = if program_len <= MAX_EXEC_INST {
            Some(self.get_uwords(ae, 0, program_len)?)
        } else {
            None
        };
        Ok(SavedContext {
            uwords,
            wakeup_events: self.read_indirect(ae, ctx, LocalCsr::CTX_WAKEUP_EVENTS_INDIRECT)?,
            pc: self.read_indirect(ae, ctx, LocalCsr::CTX_STS_INDIRECT)? & qat_chip::family::UPC_MASK,
            ctx_enables: self.ctx_enables(ae)?,
            cc_enable: self.read_ae_csr(ae, LocalCsr::CC_ENABLE)?,
            active_ctx: self.read_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS)?,
            ctx_arb: self.read_ae_csr(ae, LocalCsr::CTX_ARB_CNTL)?,
            misc_control: self.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?,
            lm_regs,
            count_signal: self.read_indirect(ae, ctx, LocalCsr::FUTURE_COUNT_SIGNAL_INDIRECT)?,
            sig_events: self.read_indirect(ae, ctx, LocalCsr::CTX_SIG_EVENTS_INDIRECT)?,
            active_sig_events: self.read_ae_csr(ae, LocalCsr::CTX_SIG_EVENTS_ACTIVE)?,
        })
    }

    /// Put back everything [`Hal::save_context`] captured.
    ///
    /// # Errors
    ///
    /// Any CSR-access error.
    pub fn restore_context(&mut self, ae: u8, ctx: u8, saved: &SavedContext) -> Result<()> {
        let mask = 1 << ctx;
        self.disable_ctx(ae, mask)?;
        if let Some(words) = &saved.uwords {
            self.wr_uwords(ae, 0, words)?;
        }
        self.put_wakeup_event(ae, mask, saved.wakeup_events)?;
        self.set_pc(ae, mask, saved.pc)?;
        self.write_ae_csr(ae, LocalCsr::CC_ENABLE, saved.cc_enable)?;
        self.write_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS, saved.active_ctx & active_ctx::ACNO)?;
        self.write_ae_csr(ae, LocalCsr::CTX_ARB_CNTL, saved.ctx_arb)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, saved.misc_control)?;
        for &(csr, value) in &saved.lm_regs {
            self.write_indirect(ae, mask, csr, value)?;
        }
        self.write_indirect(ae, mask, LocalCsr::FUTURE_COUNT_SIGNAL_INDIRECT, saved.count_signal)?;
        self.write_indirect(ae, mask, LocalCsr::CTX_SIG_EVENTS_INDIRECT, saved.sig_events)?;
        self.write_ae_csr(ae, LocalCsr::CTX_SIG_EVENTS_ACTIVE, saved.active_sig_events)?;
        self.write_ae_csr(ae, LocalCsr::CTX_ENABLES, saved.ctx_enables)
    }

    /// Run `program` on context `ctx` of `ae` and return `ALU_OUT`.
    ///
    /// The program is placed at ustore address 0 and must end in
    /// `ctx_arb[kill]`. State is restored even when the wait fails.
    ///
    /// # Errors
    ///
    /// Invalid input for an empty or oversized program or an unusable
    /// context; hardware timeout if the program does not finish within
    /// `max_cycles`.
    pub fn exec_micro(&mut self, ae: u8, ctx: u8, program: &[MicroWord], max_cycles: u32) -> Result<u32> {
        let ustore_words = self.family().ustore_words() as usize;
        if program.is_empty() || program.len() > ustore_words {
            return Err(QatError::invalid_input(format!(
                "micro-program of {} words does not fit a {ustore_words}-word ustore",
                program.len()
            )));
        }
        self.check_exec_ctx(ae, ctx)?;
        let saved = self.save_context(ae, ctx, program.len())?;
        tracing::trace!("AE {ae} ctx {ctx}: executing {} words", program.len());

        let run = self.run_program(ae, ctx, program, saved.ctx_enables, saved.cc_enable, max_cycles);
        let restored = self.restore_context(ae, ctx, &saved);
        let alu = run?;
        restored?;
        Ok(alu)
    }

    fn run_program(
        &mut self,
        ae: u8,
        ctx: u8,
        program: &[MicroWord],
        ctx_enables: u32,
        cc_enable: u32,
        max_cycles: u32,
    ) -> Result<u32> {
        let mask = 1 << ctx;
        let misc = self.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc & !ae_misc::SHARE_CS)?;
        self.write_ae_csr(ae, LocalCsr::CTX_ENABLES, ctx_enables)?;
        self.wr_uwords(ae, 0, program)?;
        self.write_indirect(ae, mask, LocalCsr::CTX_STS_INDIRECT, 0)?;
        self.write_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS, u32::from(ctx) & active_ctx::ACNO)?;
        self.write_ae_csr(ae, LocalCsr::CC_ENABLE, cc_enable & !cc_enable::PARITY_CHECK)?;
        self.put_wakeup_event(ae, mask, wakeup::VOLUNTARY)?;
        self.write_indirect(ae, mask, LocalCsr::CTX_SIG_EVENTS_INDIRECT, 0)?;
        self.write_ae_csr(ae, LocalCsr::CTX_SIG_EVENTS_ACTIVE, 0)?;
        self.enable_ctx(ae, mask)?;
        self.wait_cycles(ae, max_cycles, true)?;
        self.read_ae_csr(ae, LocalCsr::ALU_OUT)
    }

    // ── Register access ──

    /// Read context-relative register `num` of type `ty` through `ALU_OUT`.
    ///
    /// # Errors
    ///
    /// Invalid input for a register with no hardware address; any
    /// CSR-access error.
    pub fn rd_rel_reg(&mut self, ae: u8, ctx: u8, ty: RegType, num: u16) -> Result<u32> {
        self.check_exec_ctx(ae, ctx)?;
        let addr = resolve(ty, num)?;
        let saved_word = self.get_uwords(ae, 0, 1)?;
        let misc = self.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?;
        let ustore_addr = self.read_ae_csr(ae, LocalCsr::USTORE_ADDRESS)?;
        let active = self.read_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc & !ae_misc::SHARE_CS)?;

        self.wr_uwords(ae, 0, &[read_to_alu(ty, addr)])?;
        self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, ustore::UA_ECS)?;
        self.write_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS, u32::from(ctx) & active_ctx::ACNO)?;
        self.wait_cycles(ae, READ_REG_CYCLES, false)?;
        let value = self.read_ae_csr(ae, LocalCsr::ALU_OUT)?;

        self.write_ae_csr(ae, LocalCsr::USTORE_ADDRESS, ustore_addr)?;
        self.wr_uwords(ae, 0, &saved_word)?;
        self.write_ae_csr(ae, LocalCsr::ACTIVE_CTX_STATUS, active & active_ctx::ACNO)?;
        self.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc)?;
        Ok(value)
    }

    fn write_gpr(&mut self, ae: u8, ctx: u8, ty: RegType, num: u16, value: u32) -> Result<()> {
        let addr = resolve(ty, num)?;
        let program = immed_to_gpr(ty, addr, value);
        self.exec_micro(ae, ctx, &program, program.len() as u32 * CYCLES_PER_INST)
            .map(drop)
    }

    /// Stage `value` through GPR B0 into `dest`, preserving B0.
    fn write_via_b0(&mut self, ae: u8, ctx: u8, dest: RegAddr, value: u32) -> Result<()> {
        let staging = resolve(RegType::GpbRel, 0)?;
        let saved_b0 = self.rd_rel_reg(ae, ctx, RegType::GpbRel, 0)?;
        let program = immed_via_gpr_b(staging, dest, value);
        self.exec_micro(ae, ctx, &program, program.len() as u32 * CYCLES_PER_INST)?;
        self.write_gpr(ae, ctx, RegType::GpbRel, 0, saved_b0)
    }

    fn write_xfer_out(&mut self, ae: u8, ctx: u8, ty: RegType, num: u16, value: u32) -> Result<()> {
        let dest = resolve(ty, num)?;
        self.write_via_b0(ae, ctx, dest, value)
    }

    fn write_neighbor(&mut self, ae: u8, ctx: u8, num: u16, value: u32) -> Result<()> {
        let enables = self.ctx_enables(ae)?;
        if enables & ctx_enables::IN_USE_CONTEXTS != 0 {
            return Err(QatError::invalid_input(format!(
                "AE {ae}: next-neighbor registers are unavailable in four-context mode"
            )));
        }
        let dest = resolve(RegType::NeighRel, num)?;
        self.write_ae_csr(ae, LocalCsr::CTX_ENABLES, enables & !ctx_enables::NN_MODE)?;
        let written = self.write_via_b0(ae, ctx, dest, value);
        self.write_ae_csr(ae, LocalCsr::CTX_ENABLES, enables)?;
        written
    }

    fn write_xfer_in(&mut self, ae: u8, ctx: u8, ty: RegType, num: u16, value: u32) -> Result<()> {
        let (mask, dram_offset) = if self.four_ctx_mode(ae)? {
            if ctx & 1 != 0 {
                return Err(QatError::invalid_input(format!(
                    "context {ctx} is unavailable on AE {ae} in four-context mode"
                )));
            }
            (0x1f, 0x20)
        } else {
            (0x0f, 0x10)
        };
        let mut reg = (num & mask) + (u16::from(ctx) << 5);
        if ty.is_dram_xfer() {
            reg += dram_offset;
        }
        self.write_xfer(ae, reg, value)
    }

    /// Write context-relative register `num` of type `ty` on context `ctx`.
    ///
    /// # Errors
    ///
    /// Invalid input for types that cannot be written this way.
    pub fn write_rel_reg(&mut self, ae: u8, ctx: u8, ty: RegType, num: u16, value: u32) -> Result<()> {
        match ty {
            RegType::GpaRel | RegType::GpbRel => self.write_gpr(ae, ctx, ty, num, value),
            RegType::SrWrRel | RegType::DrWrRel => self.write_xfer_out(ae, ctx, ty, num, value),
            RegType::SrRel | RegType::SrRdRel | RegType::DrRel | RegType::DrRdRel => {
                self.write_xfer_in(ae, ctx, ty, num, value)
            }
            RegType::NeighRel => self.write_neighbor(ae, ctx, num, value),
            other => Err(QatError::invalid_input(format!(
                "register type {other:?} cannot be initialised"
            ))),
        }
    }

    /// Initialise register `num` of type `ty` on every context in
    /// `ctx_mask`. Absolute types ignore `ctx_mask`: the context is encoded
    /// in the register number.
    ///
    /// # Errors
    ///
    /// Invalid input for an out-of-range register or an unsupported type;
    /// any execution error.
    pub fn init_reg(&mut self, ae: u8, ctx_mask: u8, ty: RegType, num: u16, value: u32) -> Result<()> {
        if num >= MAX_REG_NUM {
            return Err(QatError::invalid_input(format!("register number {num} out of range")));
        }
        if ty.is_absolute() {
            let (ctx, rel) = if self.four_ctx_mode(ae)? {
                ((num >> 4) as u8 & 0x6, num & 0x1f)
            } else {
                ((num >> 4) as u8 & 0x7, num & 0x0f)
            };
            return self.write_rel_reg(ae, ctx, ty.relative(), rel, value);
        }
        for ctx in ctxs(ctx_mask) {
            self.write_rel_reg(ae, ctx, ty, num, value)?;
        }
        Ok(())
    }

    // ── Local memory ──

    /// Write `(byte address, value)` pairs into local memory of `ae` by
    /// micro-execution, splitting into several runs when one program would
    /// not fit the ustore.
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub fn write_lm_batch(&mut self, ae: u8, entries: &[(u32, u32)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let per_entry = ucode::LM_WRITE_TEMPLATE.len();
        let per_run = (self.family().ustore_words() as usize - 1) / per_entry;
        let scratch: Vec<(RegType, u16)> = vec![
            (RegType::GpaRel, 0),
            (RegType::GpaRel, 1),
            (RegType::GpaRel, 2),
            (RegType::GpbRel, 0),
            (RegType::GpbRel, 1),
        ];
        let mut saved = Vec::with_capacity(scratch.len());
        for &(ty, num) in &scratch {
            saved.push((ty, num, self.rd_rel_reg(ae, 0, ty, num)?));
        }

        for run in entries.chunks(per_run) {
            let mut program: Vec<MicroWord> = Vec::with_capacity(run.len() * per_entry + 1);
            for &(addr, value) in run {
                program.extend_from_slice(&lm_write(addr, value));
            }
            program.push(CTX_ARB_KILL);
            tracing::debug!("AE {ae}: writing {} local-memory words", run.len());
            self.exec_micro(ae, 0, &program, program.len() as u32 * CYCLES_PER_INST)?;
        }

        for (ty, num, value) in saved {
            self.write_gpr(ae, 0, ty, num, value)?;
        }
        Ok(())
    }
}

fn resolve(ty: RegType, num: u16) -> Result<RegAddr> {
    reg_addr(ty, num)
        .ok_or_else(|| QatError::invalid_input(format!("register {ty:?} {num} has no hardware address")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::mmio::MemoryWindow;
    use qat_chip::DeviceFamily;

    /// Window whose profile counter advances on every read.
    fn ticking_hal(family: DeviceFamily) -> Hal<MemoryWindow> {
        let map = family.register_map();
        let counters: Vec<usize> =
            (0..family.ae_count()).map(|ae| map.ae_local(ae, LocalCsr::PROFILE_COUNT).get()).collect();
        let mut tick = 0u32;
        let window = MemoryWindow::new(map.window_span(family.ae_count())).with_read_hook(
            move |offset, stored| {
                if counters.contains(&offset) {
                    tick = tick.wrapping_add(16);
                    tick
                } else {
                    stored
                }
            },
        );
        Hal::new(window, family, family.full_ae_mask(), HalConfig::default()).unwrap()
    }

    #[test]
    fn exec_restores_every_saved_register() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        let map = *hal.map();
        let cc = map.ae_local(1, LocalCsr::CC_ENABLE).get();
        let arb = map.ae_local(1, LocalCsr::CTX_ARB_CNTL).get();
        let enables = map.ae_local(1, LocalCsr::CTX_ENABLES).get();
        let lower = map.ae_local(1, LocalCsr::USTORE_DATA_LOWER).get();
        let upper = map.ae_local(1, LocalCsr::USTORE_DATA_UPPER).get();
        let misc = map.ae_local(1, LocalCsr::AE_MISC_CONTROL).get();
        let resident = qat_chip::ucode::with_ecc(0xfeed);
        hal.window_mut().poke(misc, ae_misc::SHARE_CS);
        hal.window_mut().poke(cc, 0x2000 | 0x7);
        hal.window_mut().poke(arb, 0x33);
        hal.window_mut().poke(enables, ctx_enables::enable_bits(0x04));
        hal.window_mut().poke(lower, resident as u32);
        hal.window_mut().poke(upper, (resident >> 32) as u32);

        let before = hal.save_context(1, 2, 4).unwrap();
        let program = immed_to_gpr(RegType::GpaRel, reg_addr(RegType::GpaRel, 3).unwrap(), 9);
        hal.exec_micro(1, 2, &program, 20).unwrap();

        // Parity checking is off while the program runs.
        assert!(hal.window().writes_to(cc).contains(&0x7));
        assert_eq!(hal.window().peek(cc), 0x2007);
        assert_eq!(hal.window().peek(arb), 0x33);
        assert_eq!(hal.window().peek(enables), ctx_enables::enable_bits(0x04));
        assert!(hal.window().writes_to(misc).contains(&0));
        assert_eq!(hal.window().peek(misc), ae_misc::SHARE_CS);
        let after = hal.save_context(1, 2, 4).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn exec_rejects_empty_and_odd_context_in_four_ctx_mode() {
        let mut hal = ticking_hal(DeviceFamily::C3xxx);
        assert!(hal.exec_micro(0, 0, &[], 10).is_err());
        let enables = hal.map().ae_local(0, LocalCsr::CTX_ENABLES).get();
        hal.window_mut().poke(enables, ctx_enables::IN_USE_CONTEXTS);
        let err = hal.exec_micro(0, 3, &[CTX_ARB_KILL], 10).unwrap_err();
        assert!(matches!(err, QatError::InvalidInput { .. }));
    }

    #[test]
    fn uwords_are_written_with_ecc_and_address_restored() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        let map = *hal.map();
        let addr = map.ae_local(0, LocalCsr::USTORE_ADDRESS).get();
        let lower = map.ae_local(0, LocalCsr::USTORE_DATA_LOWER).get();
        let upper = map.ae_local(0, LocalCsr::USTORE_DATA_UPPER).get();
        hal.window_mut().poke(addr, 0x42);
        hal.wr_uwords(0, 0x10, &[0x0F0_000C_0300]).unwrap();
        let packed = with_ecc(0x0F0_000C_0300);
        assert_eq!(hal.window().writes_to(addr), vec![0x10 | ustore::UA_ECS, 0x42]);
        assert_eq!(hal.window().writes_to(lower), vec![packed as u32]);
        assert_eq!(hal.window().writes_to(upper), vec![(packed >> 32) as u32]);
    }

    #[test]
    fn read_xfer_registers_are_written_directly() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        let map = *hal.map();
        hal.write_rel_reg(2, 1, RegType::DrRdRel, 3, 0xabcd).unwrap();
        let slot = map.ae_xfer(2, 3 + (1 << 5) + 0x10).get();
        assert_eq!(hal.window().peek(slot), 0xabcd);
    }

    #[test]
    fn absolute_types_decode_context_from_number() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        let map = *hal.map();
        // SR_RD_ABS 0x25: context 2, register 5.
        hal.init_reg(0, 0, RegType::SrRdAbs, 0x25, 7).unwrap();
        assert_eq!(hal.window().peek(map.ae_xfer(0, 5 + (2 << 5)).get()), 7);
    }

    #[test]
    fn unsupported_types_and_large_numbers_are_rejected() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        assert!(hal.init_reg(0, 1, RegType::Lmem, 0, 0).is_err());
        assert!(hal.init_reg(0, 1, RegType::GpaRel, 200, 0).is_err());
    }

    #[test]
    fn neighbor_write_refused_in_four_ctx_mode() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        let enables = hal.map().ae_local(0, LocalCsr::CTX_ENABLES).get();
        hal.window_mut().poke(enables, ctx_enables::IN_USE_CONTEXTS);
        assert!(hal.write_rel_reg(0, 0, RegType::NeighRel, 1, 5).is_err());
    }

    #[test]
    fn lm_batch_runs_one_program_per_ustore_load() {
        let mut hal = ticking_hal(DeviceFamily::C62x);
        let lower = hal.map().ae_local(3, LocalCsr::USTORE_DATA_LOWER).get();
        hal.write_lm_batch(3, &[(0, 1), (4, 2)]).unwrap();
        let kill = with_ecc(CTX_ARB_KILL) as u32;
        assert!(hal.window().writes_to(lower).contains(&kill));
    }
}
