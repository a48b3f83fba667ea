//! AE micro-instruction encoding.
//!
//! An instruction word carries 44 significant bits. Bits 44..=50 hold a
//! 7-bit single-error-correcting code computed from fixed masks over the
//! significant bits. The remaining high bits are reserved.
//!
//! ```text
//!  63      51 50   44 43                                  0
//! ┌──────────┬───────┬─────────────────────────────────────┐
//! │ reserved │  ECC  │          instruction (44 bits)      │
//! └──────────┴───────┴─────────────────────────────────────┘
//! ```
//!
//! Register operands are 10-bit hardware addresses resolved from a
//! (register type, number) pair by [`reg_addr`].

/// One instruction word as stored in a ustore (ECC in bits 44..=50).
pub type MicroWord = u64;

/// Mask of the 44 significant instruction bits.
pub const SIGNIFICANT_MASK: u64 = (1 << 44) - 1;

/// Mask applied to words read from a firmware object.
pub const UWORD_MASK: u64 = 0xBFF_FFFF_FFFF;

/// Marker for an unpopulated word; replaced by the image fill pattern.
pub const INVALID_UWORD: u64 = 0xFFFF_FFFF_FFFF;

/// First ECC bit.
pub const ECC_SHIFT: u32 = 44;

/// `ctx_arb[kill]`: terminates a synthesized program.
pub const CTX_ARB_KILL: MicroWord = 0x0E0_0001_0000;

const ECC_MASKS: [u64; 7] = [
    0xff8_0000_7fff,
    0x1f8_01ff_801f,
    0xe38_7e07_81e1,
    0x7cb_8e38_8e22,
    0xaf5_b2c9_3244,
    0xf56_d552_5488,
    0xdaf_69a4_6910,
];

/// 7-bit ECC code for the significant bits of `word`.
#[must_use]
pub const fn ecc(word: u64) -> u8 {
    let bits = word & SIGNIFICANT_MASK;
    let mut code = 0u8;
    let mut i = 0;
    while i < ECC_MASKS.len() {
        code |= (((bits & ECC_MASKS[i]).count_ones() & 1) as u8) << i;
        i += 1;
    }
    code
}

/// `word` with its ECC bits recomputed.
#[must_use]
pub const fn with_ecc(word: u64) -> MicroWord {
    let cleared = word & !(0x7f << ECC_SHIFT);
    cleared | ((ecc(word) as u64) << ECC_SHIFT)
}

/// Whether the ECC bits stored in `word` match its significant bits.
#[must_use]
pub const fn ecc_matches(word: MicroWord) -> bool {
    ((word >> ECC_SHIFT) & 0x7f) as u8 == ecc(word)
}

// ── Register addressing ──────────────────────────────────────────────────────

/// Logical register type codes as encoded in firmware register-init tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RegType {
    NoDest = 0,
    GpaRel = 1,
    GpaAbs = 2,
    GpbRel = 3,
    GpbAbs = 4,
    SrRel = 5,
    SrRdRel = 6,
    SrWrRel = 7,
    SrAbs = 8,
    SrRdAbs = 9,
    SrWrAbs = 10,
    DrRel = 19,
    DrRdRel = 20,
    DrWrRel = 21,
    DrAbs = 22,
    DrRdAbs = 23,
    DrWrAbs = 24,
    Lmem = 26,
    Lmem0 = 27,
    Lmem1 = 28,
    NeighRel = 31,
    Lmem2 = 61,
    Lmem3 = 62,
}

/// Register type code with no [`RegType`] counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRegType(pub u8);

impl std::fmt::Display for UnknownRegType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown register type code {}", self.0)
    }
}

impl std::error::Error for UnknownRegType {}

impl TryFrom<u8> for RegType {
    type Error = UnknownRegType;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::NoDest,
            1 => Self::GpaRel,
            2 => Self::GpaAbs,
            3 => Self::GpbRel,
            4 => Self::GpbAbs,
            5 => Self::SrRel,
            6 => Self::SrRdRel,
            7 => Self::SrWrRel,
            8 => Self::SrAbs,
            9 => Self::SrRdAbs,
            10 => Self::SrWrAbs,
            19 => Self::DrRel,
            20 => Self::DrRdRel,
            21 => Self::DrWrRel,
            22 => Self::DrAbs,
            23 => Self::DrRdAbs,
            24 => Self::DrWrAbs,
            26 => Self::Lmem,
            27 => Self::Lmem0,
            28 => Self::Lmem1,
            31 => Self::NeighRel,
            61 => Self::Lmem2,
            62 => Self::Lmem3,
            other => return Err(UnknownRegType(other)),
        })
    }
}

impl RegType {
    /// Whether the register number names a context explicitly.
    #[must_use]
    pub const fn is_absolute(self) -> bool {
        matches!(
            self,
            Self::GpaAbs
                | Self::GpbAbs
                | Self::SrAbs
                | Self::SrRdAbs
                | Self::SrWrAbs
                | Self::DrAbs
                | Self::DrRdAbs
                | Self::DrWrAbs
        )
    }

    /// Context-relative counterpart of an absolute type; identity otherwise.
    #[must_use]
    pub const fn relative(self) -> Self {
        match self {
            Self::GpaAbs => Self::GpaRel,
            Self::GpbAbs => Self::GpbRel,
            Self::SrAbs => Self::SrRel,
            Self::SrRdAbs => Self::SrRdRel,
            Self::SrWrAbs => Self::SrWrRel,
            Self::DrAbs => Self::DrRel,
            Self::DrRdAbs => Self::DrRdRel,
            Self::DrWrAbs => Self::DrWrRel,
            other => other,
        }
    }

    /// Whether the type is a general-purpose register bank.
    #[must_use]
    pub const fn is_gpr(self) -> bool {
        matches!(self, Self::GpaRel | Self::GpaAbs | Self::GpbRel | Self::GpbAbs)
    }

    /// Transfer-in (read) register, written directly through the transfer page.
    #[must_use]
    pub const fn is_xfer_in(self) -> bool {
        matches!(
            self,
            Self::SrRel | Self::SrRdRel | Self::SrAbs | Self::SrRdAbs
                | Self::DrRel | Self::DrRdRel | Self::DrAbs | Self::DrRdAbs
        )
    }

    /// Transfer-out (write) register, reachable only through micro-execution.
    #[must_use]
    pub const fn is_xfer_out(self) -> bool {
        matches!(
            self,
            Self::SrWrRel | Self::SrWrAbs | Self::DrWrRel | Self::DrWrAbs
        )
    }

    /// DRAM transfer bank (as opposed to SRAM).
    #[must_use]
    pub const fn is_dram_xfer(self) -> bool {
        matches!(
            self,
            Self::DrRel | Self::DrRdRel | Self::DrWrRel | Self::DrAbs | Self::DrRdAbs | Self::DrWrAbs
        )
    }
}

/// 10-bit hardware register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegAddr(u16);

impl RegAddr {
    /// Raw address.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    const fn bits(self) -> u64 {
        (self.0 & 0x3ff) as u64
    }
}

/// Hardware address of register `num` of type `ty`.
///
/// Returns `None` for types that have no fixed address (the generic local
/// memory type and absolute read/write transfer aliases).
#[must_use]
pub const fn reg_addr(ty: RegType, num: u16) -> Option<RegAddr> {
    let addr = match ty {
        RegType::GpaAbs | RegType::GpbAbs => 0x80 | (num & 0x7f),
        RegType::GpaRel | RegType::GpbRel => num & 0x1f,
        RegType::SrRdRel | RegType::SrWrRel | RegType::SrRel => 0x180 | (num & 0x1f),
        RegType::SrAbs => 0x140 | ((num & 0x3) << 1),
        RegType::DrRdRel | RegType::DrWrRel | RegType::DrRel => 0x1c0 | (num & 0x1f),
        RegType::DrAbs => 0x100 | ((num & 0x3) << 1),
        RegType::NeighRel => 0x280 | (num & 0x1f),
        RegType::Lmem0 => 0x200,
        RegType::Lmem1 => 0x220,
        RegType::Lmem2 => 0x2c0,
        RegType::Lmem3 => 0x2e0,
        RegType::NoDest => 0x300 | (num & 0xff),
        RegType::SrRdAbs
        | RegType::SrWrAbs
        | RegType::DrRdAbs
        | RegType::DrWrAbs
        | RegType::Lmem => return None,
    };
    Some(RegAddr(addr))
}

// ── Instruction templates ────────────────────────────────────────────────────

/// Single instruction that copies a register to `ALU_OUT` when executed
/// from the control store.
#[must_use]
pub const fn read_to_alu(ty: RegType, addr: RegAddr) -> MicroWord {
    match ty {
        RegType::GpaRel => 0x0A0_7000_0000 | addr.bits(),
        _ => 0x0A0_3000_0000 | (addr.bits() << 10),
    }
}

const IMMED_HI: u64 = 0x0F4_4000_0000;
const IMMED_LO: u64 = 0x0F0_4000_0000;
const NOP: u64 = 0x0F0_000C_0300;

const fn no_dest(byte: u32) -> u64 {
    0x300 | (byte & 0xff) as u64
}

/// Immediate-load pair (high half, low half). The constant's low byte
/// travels as a NO_DEST operand in the field the destination does not use.
const fn immed_pair(dest: RegAddr, value: u32, dest_low: bool) -> [MicroWord; 2] {
    let halves = [(IMMED_HI, value >> 16), (IMMED_LO, value & 0xffff)];
    let mut out = [0; 2];
    let mut i = 0;
    while i < 2 {
        let (base, half) = halves[i];
        let src = no_dest(half);
        let operands = if dest_low {
            (src << 10) | dest.bits()
        } else {
            (dest.bits() << 10) | src
        };
        out[i] = base | (((half >> 8) as u64) << 20) | operands;
        i += 1;
    }
    out
}

/// Program that loads a 32-bit immediate into a context-relative GPR.
///
/// GPR A destinations take the constant on the B operand and vice versa.
#[must_use]
pub const fn immed_to_gpr(ty: RegType, dest: RegAddr, value: u32) -> [MicroWord; 4] {
    let dest_low = matches!(ty, RegType::GpaRel | RegType::GpaAbs);
    let [hi, lo] = immed_pair(dest, value, dest_low);
    [hi, lo, NOP, CTX_ARB_KILL]
}

/// Program that stages `value` through GPR B `staging` and moves it into a
/// transfer-out or next-neighbor register.
#[must_use]
pub const fn immed_via_gpr_b(staging: RegAddr, dest: RegAddr, value: u32) -> [MicroWord; 5] {
    let [hi, lo] = immed_pair(staging, value, false);
    let mv = 0x0A0_0000_0000 | (dest.bits() << 20) | (staging.bits() << 10);
    [hi, lo, mv, NOP, CTX_ARB_KILL]
}

/// Insert an 8+8 bit constant into the GPR-A operand fields.
#[must_use]
pub const fn insert_gpra_const(inst: MicroWord, value: u32) -> MicroWord {
    let v = value as u64;
    (inst & 0xFFF_F00C_03FF) | ((v << 12) & 0x0FF0_0000) | ((v << 10) & 0x0003_FC00)
}

/// Insert an 8+8 bit constant into the GPR-B operand fields.
#[must_use]
pub const fn insert_gprb_const(inst: MicroWord, value: u32) -> MicroWord {
    let v = value as u64;
    (inst & 0xFFF_F00F_FF00) | ((v << 12) & 0x0FF0_0000) | (v & 0xFF)
}

/// Template for one 32-bit local-memory write.
pub const LM_WRITE_TEMPLATE: [MicroWord; 9] = [
    0x0F0_400C_0000,
    0x0F4_400C_0000,
    0x0F0_4000_0300,
    0x0F4_4000_0300,
    0x0FC_066C_0000,
    0x0F0_000C_0300,
    0x0F0_000C_0300,
    0x0F0_000C_0300,
    0x0A0_2100_0000,
];

/// Instructions that write `value` to local-memory byte address `addr`.
#[must_use]
pub const fn lm_write(addr: u32, value: u32) -> [MicroWord; 9] {
    let mut p = LM_WRITE_TEMPLATE;
    p[0] = insert_gpra_const(p[0], addr);
    p[1] = insert_gpra_const(p[1], 0);
    p[2] = insert_gprb_const(p[2], value);
    p[3] = insert_gprb_const(p[3], value >> 16);
    p
}

/// Lower and upper ustore data words that store the 32-bit `value` in
/// ustore memory. Each 16-bit half carries its own parity bit.
#[must_use]
pub const fn umem_halves(value: u32) -> (u32, u32) {
    let lower = ((value & 0x0fff_0000) << 4)
        | (0x3 << 18)
        | ((value & 0xff00) << 2)
        | (0x3 << 8)
        | (value & 0xff);
    let mut upper = (0xf << 4) | ((value & 0xf000_0000) >> 28);
    upper |= ((value & 0xffff).count_ones() & 1) << 8;
    upper |= ((value >> 16).count_ones() & 1) << 9;
    (lower, upper)
}

/// Program that zeroes every GPR and transfer register of the running
/// context, used during bring-up.
pub const CLEAR_GPR_PROGRAM: [MicroWord; 87] = [
    0x0F0000C0000, 0x0F000000380, 0x0D805000011, 0x0FC082C0300,
    0x0F0000C0300, 0x0F0000C0300, 0x0F0000C0300, 0x0F0000C0300,
    0x0A0643C0000, 0x0BAC0000301, 0x0D802000101, 0x0F0000C0001,
    0x0FC066C0001, 0x0F0000C0300, 0x0F0000C0300, 0x0F0000C0300,
    0x0F000400300, 0x0A0610C0000, 0x0BAC0000301, 0x0D804400101,
    0x0A0580C0000, 0x0A0581C0000, 0x0A0582C0000, 0x0A0583C0000,
    0x0A0584C0000, 0x0A0585C0000, 0x0A0586C0000, 0x0A0587C0000,
    0x0A0588C0000, 0x0A0589C0000, 0x0A058AC0000, 0x0A058BC0000,
    0x0A058CC0000, 0x0A058DC0000, 0x0A058EC0000, 0x0A058FC0000,
    0x0A05C0C0000, 0x0A05C1C0000, 0x0A05C2C0000, 0x0A05C3C0000,
    0x0A05C4C0000, 0x0A05C5C0000, 0x0A05C6C0000, 0x0A05C7C0000,
    0x0A05C8C0000, 0x0A05C9C0000, 0x0A05CAC0000, 0x0A05CBC0000,
    0x0A05CCC0000, 0x0A05CDC0000, 0x0A05CEC0000, 0x0A05CFC0000,
    0x0A0400C0000, 0x0B0400C0000, 0x0A0401C0000, 0x0B0401C0000,
    0x0A0402C0000, 0x0B0402C0000, 0x0A0403C0000, 0x0B0403C0000,
    0x0A0404C0000, 0x0B0404C0000, 0x0A0405C0000, 0x0B0405C0000,
    0x0A0406C0000, 0x0B0406C0000, 0x0A0407C0000, 0x0B0407C0000,
    0x0A0408C0000, 0x0B0408C0000, 0x0A0409C0000, 0x0B0409C0000,
    0x0A040AC0000, 0x0B040AC0000, 0x0A040BC0000, 0x0B040BC0000,
    0x0A040CC0000, 0x0B040CC0000, 0x0A040DC0000, 0x0B040DC0000,
    0x0A040EC0000, 0x0B040EC0000, 0x0A040FC0000, 0x0B040FC0000,
    0x0D81581C010, 0x0E000010000, 0x0E000010000,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecc_round_trips_for_sample_words() {
        for &w in &[0u64, 1, 0x0F0_000C_0300, SIGNIFICANT_MASK, 0x0A0_2100_0000, 0x123_4567_89ab] {
            let packed = with_ecc(w);
            assert!(ecc_matches(packed));
            assert_eq!(packed & SIGNIFICANT_MASK, w & SIGNIFICANT_MASK);
        }
    }

    #[test]
    fn ecc_detects_single_bit_flip() {
        let packed = with_ecc(0x0F0_400C_0000);
        for bit in 0..44 {
            assert!(!ecc_matches(packed ^ (1 << bit)), "bit {bit}");
        }
    }

    #[test]
    fn ecc_replaces_stale_code() {
        let stale = 0x0F0_000C_0300 | (0x7f << ECC_SHIFT);
        assert_eq!(with_ecc(stale), with_ecc(0x0F0_000C_0300));
    }

    #[test]
    fn reg_addr_table() {
        assert_eq!(reg_addr(RegType::GpaRel, 3).map(RegAddr::get), Some(3));
        assert_eq!(reg_addr(RegType::GpbAbs, 0x11).map(RegAddr::get), Some(0x91));
        assert_eq!(reg_addr(RegType::SrAbs, 2).map(RegAddr::get), Some(0x144));
        assert_eq!(reg_addr(RegType::DrWrRel, 5).map(RegAddr::get), Some(0x1c5));
        assert_eq!(reg_addr(RegType::NeighRel, 1).map(RegAddr::get), Some(0x281));
        assert_eq!(reg_addr(RegType::Lmem3, 0).map(RegAddr::get), Some(0x2e0));
        assert_eq!(reg_addr(RegType::NoDest, 0x1ab).map(RegAddr::get), Some(0x3ab));
        assert_eq!(reg_addr(RegType::Lmem, 0), None);
        assert_eq!(reg_addr(RegType::DrRdAbs, 0), None);
    }

    #[test]
    fn reg_addr_is_pure() {
        for code in 0..=u8::MAX {
            if let Ok(ty) = RegType::try_from(code) {
                assert_eq!(reg_addr(ty, 7), reg_addr(ty, 7));
            }
        }
    }

    #[test]
    fn unknown_type_codes_are_rejected() {
        assert_eq!(RegType::try_from(11), Err(UnknownRegType(11)));
        assert_eq!(RegType::try_from(63), Err(UnknownRegType(63)));
    }

    #[test]
    fn immediate_load_into_gpr_a() {
        let dest = reg_addr(RegType::GpaRel, 2).unwrap();
        let p = immed_to_gpr(RegType::GpaRel, dest, 0x1234_5678);
        // hi half 0x1234: top byte 0x12 at bit 20, NO_DEST|0x34 on the A operand
        assert_eq!(p[0], 0x0F4_4000_0000 | (0x12 << 20) | (0x334 << 10) | 2);
        assert_eq!(p[1], 0x0F0_4000_0000 | (0x56 << 20) | (0x378 << 10) | 2);
        assert_eq!(p[3], CTX_ARB_KILL);
    }

    #[test]
    fn immediate_load_into_gpr_b_swaps_operands() {
        let dest = reg_addr(RegType::GpbRel, 2).unwrap();
        let p = immed_to_gpr(RegType::GpbRel, dest, 0x0000_00ff);
        assert_eq!(p[1], 0x0F0_4000_0000 | (2 << 10) | 0x3ff);
    }

    #[test]
    fn lm_write_patches_constants() {
        let p = lm_write(0x40, 0xdead_beef);
        assert_eq!(p[0], insert_gpra_const(LM_WRITE_TEMPLATE[0], 0x40));
        assert_eq!(p[2] & 0xff, 0xef);
        assert_eq!((p[2] >> 20) & 0xff, 0xbe);
        assert_eq!(p[3] & 0xff, 0xad);
        assert_eq!(p[8], LM_WRITE_TEMPLATE[8]);
    }

    #[test]
    fn umem_halves_split_value_and_parity() {
        let (lo, hi) = umem_halves(0x1234_5678);
        assert_eq!(lo & 0xff, 0x78);
        assert_eq!((lo >> 10) & 0xff, 0x56);
        assert_eq!((lo >> 20) & 0xfff, 0x234);
        assert_eq!(hi & 0xf, 0x1);
        // 0x5678 has eight set bits, 0x1234 has five.
        assert_eq!((hi >> 8) & 1, 0);
        assert_eq!((hi >> 9) & 1, 1);
    }

    #[test]
    fn clear_program_ends_with_kill() {
        assert_eq!(CLEAR_GPR_PROGRAM[CLEAR_GPR_PROGRAM.len() - 1], CTX_ARB_KILL);
    }
}
