//! Register map for QAT AE clusters.
//!
//! Offsets are fixed per hardware generation and are never discovered at
//! runtime. Every address handed to a register window is a [`CsrOffset`]
//! computed by a [`RegisterMap`]; raw integers only appear inside this module.
//!
//! ```text
//! Generation  AE-local base  Transfer base  Global base  FCU block
//! ─────────── ────────────── ────────────── ──────────── ──────────────
//! gen1/gen2   0x0002_0000    0x0002_0800    0x0003_0000  global + 0x8c0
//! gen3        0x0080_0000    0x0080_0800    0x0084_0000  global + 0x1000
//! gen4        0x0060_0000    0x0060_0800    0x0064_0000  global + 0x1000
//! ```

use crate::family::Generation;

/// Byte offset into a device register window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CsrOffset(usize);

impl CsrOffset {
    /// Wrap a raw byte offset.
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    /// Raw byte offset.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CsrOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

// ── AE-local CSRs ────────────────────────────────────────────────────────────

/// AE-local control/status register index (low 10 bits of the local address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalCsr(u16);

#[allow(missing_docs)]
impl LocalCsr {
    pub const USTORE_ADDRESS: Self = Self(0x000);
    pub const USTORE_DATA_LOWER: Self = Self(0x004);
    pub const USTORE_DATA_UPPER: Self = Self(0x008);
    pub const ALU_OUT: Self = Self(0x010);
    pub const CTX_ARB_CNTL: Self = Self(0x014);
    pub const CTX_ENABLES: Self = Self(0x018);
    pub const CC_ENABLE: Self = Self(0x01c);
    pub const CSR_CTX_POINTER: Self = Self(0x020);
    pub const CTX_STS_INDIRECT: Self = Self(0x040);
    pub const ACTIVE_CTX_STATUS: Self = Self(0x044);
    pub const CTX_SIG_EVENTS_INDIRECT: Self = Self(0x048);
    pub const CTX_SIG_EVENTS_ACTIVE: Self = Self(0x04c);
    pub const CTX_WAKEUP_EVENTS_INDIRECT: Self = Self(0x050);
    pub const LM_ADDR_0_INDIRECT: Self = Self(0x060);
    pub const LM_ADDR_1_INDIRECT: Self = Self(0x068);
    pub const FUTURE_COUNT_SIGNAL_INDIRECT: Self = Self(0x078);
    pub const TIMESTAMP_LOW: Self = Self(0x0c0);
    pub const TIMESTAMP_HIGH: Self = Self(0x0c4);
    pub const LM_ADDR_2_INDIRECT: Self = Self(0x0cc);
    pub const LM_ADDR_3_INDIRECT: Self = Self(0x0d4);
    pub const INDIRECT_LM_ADDR_0_BYTE_INDEX: Self = Self(0x0e0);
    pub const INDIRECT_LM_ADDR_1_BYTE_INDEX: Self = Self(0x0e8);
    pub const INDIRECT_T_INDEX: Self = Self(0x0f8);
    pub const INDIRECT_T_INDEX_BYTE_INDEX: Self = Self(0x0fc);
    pub const INDIRECT_LM_ADDR_2_BYTE_INDEX: Self = Self(0x10c);
    pub const INDIRECT_LM_ADDR_3_BYTE_INDEX: Self = Self(0x114);
    pub const PROFILE_COUNT: Self = Self(0x144);
    pub const SIGNATURE_ENABLE: Self = Self(0x150);
    pub const AE_MISC_CONTROL: Self = Self(0x160);
    pub const LOCAL_CSR_STATUS: Self = Self(0x180);
}

impl LocalCsr {
    /// Raw 10-bit local index.
    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }

    /// Whether the register is banked per context and reached through
    /// `CSR_CTX_POINTER`.
    #[must_use]
    pub const fn is_indirect(self) -> bool {
        matches!(
            self.0,
            0x040 | 0x048 | 0x050 | 0x060 | 0x068 | 0x078 | 0x0cc | 0x0d4 | 0x0e0 | 0x0e8
                | 0x0f8 | 0x0fc | 0x10c | 0x114
        )
    }
}

/// `CTX_ENABLES` bits.
pub mod ctx_enables {
    /// First context-enable bit; context `n` is bit `8 + n`.
    pub const ENABLE_SHIFT: u32 = 8;
    /// Mask of all context-enable bits.
    pub const ENABLE_MASK: u32 = 0xff << ENABLE_SHIFT;
    /// Four-context (in-use contexts) mode when set; eight-context when clear.
    pub const IN_USE_CONTEXTS: u32 = 1 << 31;
    /// Next-neighbor mode select.
    pub const NN_MODE: u32 = 1 << 20;
    /// Local-memory address 0 global mode.
    pub const LMADDR_0_GLOBAL: u32 = 1 << 16;
    /// Local-memory address 1 global mode.
    pub const LMADDR_1_GLOBAL: u32 = 1 << 17;
    /// T-index global mode.
    pub const T_INDEX_GLOBAL: u32 = 1 << 21;
    /// Local-memory address 2 global mode.
    pub const LMADDR_2_GLOBAL: u32 = 1 << 22;
    /// Local-memory address 3 global mode.
    pub const LMADDR_3_GLOBAL: u32 = 1 << 23;
    /// Write-1-to-clear status bits that must not be written back.
    pub const IGNORE_W1C_MASK: u32 = !((1 << 27) | (1 << 29) | (1 << 25));

    /// Enable bits for every context in `ctx_mask`.
    #[must_use]
    pub const fn enable_bits(ctx_mask: u8) -> u32 {
        (ctx_mask as u32) << ENABLE_SHIFT
    }
}

/// `ACTIVE_CTX_STATUS` fields.
pub mod active_ctx {
    /// Active context number.
    pub const ACNO: u32 = 0x7;
    /// AE busy/occupied bit; clear once every context has gone inactive.
    pub const ABO: u32 = 1 << 31;
}

/// `AE_MISC_CONTROL` bits.
pub mod ae_misc {
    /// Shared control store with the neighbor AE.
    pub const SHARE_CS: u32 = 1 << 2;
}

/// `USTORE_ADDRESS` bits.
pub mod ustore {
    /// Execute-from-control-store enable.
    pub const UA_ECS: u32 = 1 << 31;
}

/// `CC_ENABLE` bits.
pub mod cc_enable {
    /// Control-store parity checking.
    pub const PARITY_CHECK: u32 = 1 << 13;
}

/// `LOCAL_CSR_STATUS` bits.
pub mod csr_status {
    /// Set while a local-CSR access is still in flight.
    pub const BUSY: u32 = 0x1;
}

/// Context wake-up event bits.
pub mod wakeup {
    /// Voluntary context swap.
    pub const VOLUNTARY: u32 = 0x1;
}

/// Values written to every AE after reset.
pub mod init {
    #[allow(missing_docs)]
    pub const CTX_ENABLES: u32 = 0;
    #[allow(missing_docs)]
    pub const PC: u32 = 0;
    #[allow(missing_docs)]
    pub const WAKEUP_EVENTS: u32 = 1;
    #[allow(missing_docs)]
    pub const SIG_EVENTS: u32 = 1;
    #[allow(missing_docs)]
    pub const CC_ENABLE: u32 = 0x2000;
    #[allow(missing_docs)]
    pub const CTX_ARB: u32 = 0;
}

// ── Global CSRs ──────────────────────────────────────────────────────────────

/// Offset inside the global (cluster-wide) CSR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalCsr(u32);

#[allow(missing_docs)]
impl GlobalCsr {
    pub const MISC_CONTROL: Self = Self(0x04);
    pub const ICP_RESET: Self = Self(0x0c);
    pub const ICP_GLOBAL_CLK_ENABLE: Self = Self(0x50);
    pub const ICP_RESET_CPP0: Self = Self(0x938);
    pub const ICP_RESET_CPP1: Self = Self(0x93c);
    pub const ICP_GLOBAL_CLK_ENABLE_CPP0: Self = Self(0x964);
    pub const ICP_GLOBAL_CLK_ENABLE_CPP1: Self = Self(0x968);
    pub const ESRAM_AUTO_INIT: Self = Self(0xc1c);
}

impl GlobalCsr {
    /// Wrap a raw offset inside the global block.
    #[must_use]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Raw offset inside the global block.
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0
    }
}

/// Reset register bit positions.
pub mod reset {
    /// AE reset bits start here.
    pub const AE_LSB: u32 = 0;
    /// Accelerator-slice reset bits start here.
    pub const SLICE_LSB: u32 = 20;
}

/// Global `MISC_CONTROL` bits.
pub mod misc_control {
    /// Free-running timestamp counters enabled.
    pub const TIMESTAMP_ENABLE: u32 = 1 << 7;
}

/// eSRAM auto-initialization (DH895xCC).
pub mod esram {
    /// Trigger bit.
    pub const TINIT: u32 = 1 << 2;
    /// Completion bit.
    pub const DONE: u32 = 1 << 3;
    /// Cycles to wait after completion before touching shared RAM.
    pub const SHRAM_INIT_CYCLES: u32 = 1640;
}

/// One reset/clock domain: which AEs and slices its bits cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetDomain {
    /// Reset register.
    pub reset: GlobalCsr,
    /// Clock-enable register.
    pub clock: GlobalCsr,
    /// First AE covered by this domain.
    pub first_ae: u8,
    /// Number of AEs covered.
    pub ae_span: u8,
    /// First slice covered by this domain.
    pub first_slice: u8,
    /// Number of slices covered.
    pub slice_span: u8,
}

impl ResetDomain {
    /// Reset/clock bits for the part of `ae_mask` and `slice_mask` that
    /// falls inside this domain.
    #[must_use]
    pub const fn bits(&self, ae_mask: u32, slice_mask: u32) -> u32 {
        let ae = (ae_mask >> self.first_ae) & span_mask(self.ae_span);
        let slice = (slice_mask >> self.first_slice) & span_mask(self.slice_span);
        (ae << reset::AE_LSB) | (slice << reset::SLICE_LSB)
    }
}

const fn span_mask(span: u8) -> u32 {
    if span >= 32 {
        u32::MAX
    } else {
        (1 << span) - 1
    }
}

const SINGLE_DOMAIN: [ResetDomain; 1] = [ResetDomain {
    reset: GlobalCsr::ICP_RESET,
    clock: GlobalCsr::ICP_GLOBAL_CLK_ENABLE,
    first_ae: 0,
    ae_span: 20,
    first_slice: 0,
    slice_span: 12,
}];

const SPLIT_DOMAINS: [ResetDomain; 2] = [
    ResetDomain {
        reset: GlobalCsr::ICP_RESET_CPP0,
        clock: GlobalCsr::ICP_GLOBAL_CLK_ENABLE_CPP0,
        first_ae: 0,
        ae_span: 16,
        first_slice: 0,
        slice_span: 6,
    },
    ResetDomain {
        reset: GlobalCsr::ICP_RESET_CPP1,
        clock: GlobalCsr::ICP_GLOBAL_CLK_ENABLE_CPP1,
        first_ae: 16,
        ae_span: 16,
        first_slice: 6,
        slice_span: 6,
    },
];

// ── FCU (authentication / loading unit) ──────────────────────────────────────

/// FCU register block for one generation, as global-block offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcuRegisters {
    /// Command register.
    pub control: GlobalCsr,
    /// Status register.
    pub status: GlobalCsr,
    /// Dedicated loaded-AE bitmask register; `None` when the mask lives in
    /// `status` above [`fcu::LOADED_AE_SHIFT`].
    pub ae_loaded: Option<GlobalCsr>,
    /// Descriptor bus address, low half.
    pub dram_addr_lo: GlobalCsr,
    /// Descriptor bus address, high half.
    pub dram_addr_hi: GlobalCsr,
}

const FCU_LEGACY: FcuRegisters = FcuRegisters {
    control: GlobalCsr(0x8c0),
    status: GlobalCsr(0x8c4),
    ae_loaded: None,
    dram_addr_lo: GlobalCsr(0x8cc),
    dram_addr_hi: GlobalCsr(0x8d0),
};

const FCU_WIDE: FcuRegisters = FcuRegisters {
    control: GlobalCsr(0x1000),
    status: GlobalCsr(0x1004),
    ae_loaded: Some(GlobalCsr(0x1010)),
    dram_addr_lo: GlobalCsr(0x1014),
    dram_addr_hi: GlobalCsr(0x1018),
};

/// FCU command and status encoding.
pub mod fcu {
    /// FCU command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u32)]
    pub enum Command {
        /// No operation.
        Noop = 0,
        /// Authenticate the descriptor at the DRAM address registers.
        Auth = 1,
        /// Load the authenticated image into one AE.
        Load = 2,
        /// Start every loaded AE.
        Start = 3,
    }

    /// Bit position of the AE number in a LOAD command.
    pub const CTRL_AE_SHIFT: u32 = 8;

    /// Status field mask.
    pub const STS_MASK: u32 = 0x7;
    #[allow(missing_docs)]
    pub const STS_NONE: u32 = 0;
    #[allow(missing_docs)]
    pub const STS_VERIFY_DONE: u32 = 1;
    #[allow(missing_docs)]
    pub const STS_LOAD_DONE: u32 = 2;
    #[allow(missing_docs)]
    pub const STS_VERIFY_FAIL: u32 = 3;
    #[allow(missing_docs)]
    pub const STS_LOAD_FAIL: u32 = 4;
    #[allow(missing_docs)]
    pub const STS_BUSY: u32 = 5;
    /// Authenticated-firmware-loaded flag.
    pub const AUTHFWLD: u32 = 1 << 8;
    /// START completion flag.
    pub const DONE: u32 = 1 << 9;
    /// Loaded-AE bitmask position inside the legacy status register.
    pub const LOADED_AE_SHIFT: u32 = 22;

    /// Control word for `cmd`; `ae` is only meaningful for LOAD.
    #[must_use]
    pub const fn control_word(cmd: Command, ae: u8) -> u32 {
        cmd as u32 | ((ae as u32) << CTRL_AE_SHIFT)
    }

    /// Status field of a raw status value.
    #[must_use]
    pub const fn state(status: u32) -> u32 {
        status & STS_MASK
    }
}

// ── Per-generation map ───────────────────────────────────────────────────────

/// Register map for one hardware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    /// Generation the map describes.
    pub generation: Generation,
    /// Base of AE 0's local CSR page.
    pub ae_local_base: usize,
    /// Base of AE 0's transfer-register page.
    pub ae_xfer_base: usize,
    /// Base of the global CSR block.
    pub global_base: usize,
    /// FCU block.
    pub fcu: FcuRegisters,
    /// Reset/clock domains.
    pub reset_domains: &'static [ResetDomain],
}

/// Stride between consecutive AE pages.
pub const AE_STRIDE_SHIFT: u32 = 12;

/// Offset of the transfer page inside an AE page.
pub const LOCAL_TO_XFER: usize = 0x800;

impl RegisterMap {
    /// Fixed map for `generation`.
    #[must_use]
    pub const fn for_generation(generation: Generation) -> Self {
        let (ae, global, fcu, domains): (usize, usize, FcuRegisters, &'static [ResetDomain]) =
            match generation {
                Generation::Gen1 | Generation::Gen2 => {
                    (0x0002_0000, 0x0003_0000, FCU_LEGACY, &SINGLE_DOMAIN)
                }
                Generation::Gen3 => (0x0080_0000, 0x0084_0000, FCU_WIDE, &SPLIT_DOMAINS),
                Generation::Gen4 => (0x0060_0000, 0x0064_0000, FCU_WIDE, &SINGLE_DOMAIN),
            };
        Self {
            generation,
            ae_local_base: ae,
            ae_xfer_base: ae + LOCAL_TO_XFER,
            global_base: global,
            fcu,
            reset_domains: domains,
        }
    }

    /// Local CSR `csr` of AE `ae`.
    #[must_use]
    pub const fn ae_local(&self, ae: u8, csr: LocalCsr) -> CsrOffset {
        CsrOffset(
            self.ae_local_base + ((ae as usize) << AE_STRIDE_SHIFT) + (csr.0 as usize & 0x3ff),
        )
    }

    /// Transfer register `reg` (hardware register address) of AE `ae`.
    #[must_use]
    pub const fn ae_xfer(&self, ae: u8, reg: u16) -> CsrOffset {
        CsrOffset(
            self.ae_xfer_base + ((ae as usize) << AE_STRIDE_SHIFT) + ((reg as usize & 0xff) << 2),
        )
    }

    /// Global CSR.
    #[must_use]
    pub const fn global(&self, csr: GlobalCsr) -> CsrOffset {
        CsrOffset(self.global_base + csr.0 as usize)
    }

    /// Smallest window size that covers every register this map can name
    /// for `ae_count` AEs.
    #[must_use]
    pub const fn window_span(&self, ae_count: u8) -> usize {
        let ae_end = self.ae_local_base + ((ae_count as usize) << AE_STRIDE_SHIFT);
        let global_end = self.global_base + 0x2000;
        if ae_end > global_end {
            ae_end
        } else {
            global_end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_csr_address_arithmetic() {
        let map = RegisterMap::for_generation(Generation::Gen2);
        assert_eq!(map.ae_local(0, LocalCsr::CTX_ENABLES).get(), 0x2_0018);
        assert_eq!(map.ae_local(3, LocalCsr::LOCAL_CSR_STATUS).get(), 0x2_3180);
        assert_eq!(map.ae_xfer(1, 0x10).get(), 0x2_1840);
    }

    #[test]
    fn fcu_block_moves_with_generation() {
        let old = RegisterMap::for_generation(Generation::Gen1);
        let new = RegisterMap::for_generation(Generation::Gen4);
        assert_eq!(old.global(old.fcu.control).get(), 0x3_08c0);
        assert!(old.fcu.ae_loaded.is_none());
        assert_eq!(new.global(new.fcu.status).get(), 0x64_1004);
        assert!(new.fcu.ae_loaded.is_some());
    }

    #[test]
    fn split_reset_domains_partition_the_masks() {
        let map = RegisterMap::for_generation(Generation::Gen3);
        assert_eq!(map.reset_domains.len(), 2);
        let ae_mask = 0x0001_8001;
        let lo = map.reset_domains[0].bits(ae_mask, 0b11_0000_0001);
        let hi = map.reset_domains[1].bits(ae_mask, 0b11_0000_0001);
        assert_eq!(lo, 0x8001 | (1 << 20));
        assert_eq!(hi, 0x1 | (0b1100 << 20));
    }

    #[test]
    fn fcu_control_word_carries_ae() {
        assert_eq!(fcu::control_word(fcu::Command::Load, 5), 0x502);
        assert_eq!(fcu::control_word(fcu::Command::Start, 0), 3);
    }

    #[test]
    fn indirect_registers_are_flagged() {
        assert!(LocalCsr::CTX_STS_INDIRECT.is_indirect());
        assert!(LocalCsr::LM_ADDR_3_INDIRECT.is_indirect());
        assert!(!LocalCsr::CTX_ENABLES.is_indirect());
    }
}
