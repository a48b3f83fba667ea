//! QAT device families.
//!
//! ```text
//! Family      Gen  AEs  Slices  Ustore   UOF dev-type  Reset domains  eSRAM init
//! ─────────── ──── ──── ─────── ──────── ───────────── ────────────── ──────────
//! DH895xCC     1    12    6     16K      0x0040_0000        1             yes
//! C62x         2    10    5     16K      0x0100_0000        1             no
//! C3xxx        2     6    3     16K      0x0200_0000        1             no
//! C4xxx        3    32   12     16K      0x0400_0000        2             no
//! 4xxx         4     9    1     16K      0x0800_0000        1             no
//! ```

use crate::regs::RegisterMap;

/// Hardware generation. Register bases and FCU layout are keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Generation {
    /// First generation (DH895xCC).
    Gen1,
    /// Second generation (C62x, C3xxx).
    Gen2,
    /// Third generation (C4xxx).
    Gen3,
    /// Fourth generation (4xxx).
    Gen4,
}

/// How firmware reaches the AE instruction stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    /// Host writes the instruction stores directly (UOF).
    Unsigned,
    /// FCU authenticates and copies signed images (SUOF).
    Signed,
}

/// Supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// DH895xCC.
    Dh895xcc,
    /// C62x.
    C62x,
    /// C3xxx.
    C3xxx,
    /// C4xxx.
    C4xxx,
    /// 4xxx.
    Qat4xxx,
}

/// Physical ustore size in instruction words, identical across families.
pub const USTORE_WORDS: u32 = 0x4000;

/// Local-memory capacity per AE, in 32-bit words.
pub const LMEM_WORDS: u32 = 1024;

/// Program-counter mask applied to every `CTX_STS_INDIRECT` write.
pub const UPC_MASK: u32 = 0x1_ffff;

impl DeviceFamily {
    /// All families, in generation order.
    pub const ALL: [Self; 5] = [
        Self::Dh895xcc,
        Self::C62x,
        Self::C3xxx,
        Self::C4xxx,
        Self::Qat4xxx,
    ];

    /// Hardware generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        match self {
            Self::Dh895xcc => Generation::Gen1,
            Self::C62x | Self::C3xxx => Generation::Gen2,
            Self::C4xxx => Generation::Gen3,
            Self::Qat4xxx => Generation::Gen4,
        }
    }

    /// Number of acceleration engines.
    #[must_use]
    pub const fn ae_count(self) -> u8 {
        match self {
            Self::Dh895xcc => 12,
            Self::C62x => 10,
            Self::C3xxx => 6,
            Self::C4xxx => 32,
            Self::Qat4xxx => 9,
        }
    }

    /// Number of accelerator slices sharing the reset/clock registers.
    #[must_use]
    pub const fn slice_count(self) -> u8 {
        match self {
            Self::Dh895xcc => 6,
            Self::C62x => 5,
            Self::C3xxx => 3,
            Self::C4xxx => 12,
            Self::Qat4xxx => 1,
        }
    }

    /// Bitmask with one bit per AE.
    #[must_use]
    pub const fn full_ae_mask(self) -> u32 {
        let n = self.ae_count() as u32;
        if n >= 32 {
            u32::MAX
        } else {
            (1 << n) - 1
        }
    }

    /// Bitmask with one bit per accelerator slice.
    #[must_use]
    pub const fn full_slice_mask(self) -> u32 {
        (1 << self.slice_count() as u32) - 1
    }

    /// Device-type flag carried by UOF objects and signed AE-mode blocks.
    #[must_use]
    pub const fn dev_type_flag(self) -> u32 {
        match self {
            Self::Dh895xcc => 0x0040_0000,
            Self::C62x => 0x0100_0000,
            Self::C3xxx => 0x0200_0000,
            Self::C4xxx => 0x0400_0000,
            Self::Qat4xxx => 0x0800_0000,
        }
    }

    /// Physical ustore size in words.
    #[must_use]
    pub const fn ustore_words(self) -> u32 {
        USTORE_WORDS
    }

    /// Whether two paired AEs may combine their ustores.
    ///
    /// 4xxx keeps the physical size even in shared mode.
    #[must_use]
    pub const fn doubles_shared_ustore(self) -> bool {
        !matches!(self, Self::Qat4xxx)
    }

    /// Extra register files (LM_ADDR_2/3, T-index) that must be saved around
    /// micro-execution.
    #[must_use]
    pub const fn has_extended_regfiles(self) -> bool {
        matches!(self.generation(), Generation::Gen4)
    }

    /// Whether bring-up must trigger eSRAM auto-initialization.
    #[must_use]
    pub const fn needs_esram_init(self) -> bool {
        matches!(self, Self::Dh895xcc)
    }

    /// Default firmware mode for the family.
    #[must_use]
    pub const fn default_firmware_mode(self) -> FirmwareMode {
        match self {
            Self::Dh895xcc | Self::C62x | Self::C3xxx => FirmwareMode::Unsigned,
            Self::C4xxx | Self::Qat4xxx => FirmwareMode::Signed,
        }
    }

    /// Wake-up event written to each context when unsigned firmware starts.
    #[must_use]
    pub const fn start_wakeup_event(self) -> u32 {
        match self.generation() {
            Generation::Gen4 => 0x8000_0000,
            _ => 0x1_0000,
        }
    }

    /// Register map for this family.
    #[must_use]
    pub const fn register_map(self) -> RegisterMap {
        RegisterMap::for_generation(self.generation())
    }

    /// Family whose UOF device-type flag equals `flag`.
    #[must_use]
    pub fn from_dev_type_flag(flag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.dev_type_flag() == flag)
    }

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dh895xcc => "dh895xcc",
            Self::C62x => "c6xx",
            Self::C3xxx => "c3xxx",
            Self::C4xxx => "c4xxx",
            Self::Qat4xxx => "4xxx",
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.name() == lower)
            .ok_or_else(|| format!("unknown device family: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ae_masks_cover_every_engine() {
        assert_eq!(DeviceFamily::Dh895xcc.full_ae_mask(), 0xfff);
        assert_eq!(DeviceFamily::C4xxx.full_ae_mask(), u32::MAX);
        assert_eq!(DeviceFamily::Qat4xxx.full_ae_mask().count_ones(), 9);
    }

    #[test]
    fn dev_type_flags_are_distinct() {
        for a in DeviceFamily::ALL {
            assert_eq!(DeviceFamily::from_dev_type_flag(a.dev_type_flag()), Some(a));
        }
    }

    #[test]
    fn family_names_round_trip() {
        for f in DeviceFamily::ALL {
            assert_eq!(f.name().parse::<DeviceFamily>(), Ok(f));
        }
        assert!("c9xx".parse::<DeviceFamily>().is_err());
    }
}
