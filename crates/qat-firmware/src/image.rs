//! Decoded firmware image model.
//!
//! These types own their data and outlive the container buffer they were
//! decoded from. The loader consumes them; nothing here touches hardware.

use qat_chip::ucode::{MicroWord, INVALID_UWORD, UWORD_MASK};

/// AE-mode word from an image header.
///
/// ```text
///  bit 14  T-index global       bits 7:4  next-neighbor mode
///  bit 12  reloadable context   bit 7     LM3 global (aliases NN bit 3)
///  bit 11  shared ustore        bit 6     LM2 global (aliases NN bit 2)
///  bit 9   LM1 global           bits 3:0  context mode (4 or 8)
///  bit 8   LM0 global
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AeMode(pub u16);

impl AeMode {
    /// Number of contexts the image runs with (4 or 8).
    #[must_use]
    pub const fn ctx_mode(self) -> u8 {
        (self.0 & 0xf) as u8
    }

    /// Context mask implied by the context mode.
    #[must_use]
    pub const fn ctx_mask(self) -> u8 {
        if self.ctx_mode() == 8 {
            qat_chip::ALL_CTX_MASK
        } else {
            qat_chip::EVEN_CTX_MASK
        }
    }

    /// Next-neighbor mode field.
    #[must_use]
    pub const fn nn_mode(self) -> u8 {
        ((self.0 >> 4) & 0xf) as u8
    }

    /// Local-memory bank `bank` (0..=3) in global addressing mode.
    #[must_use]
    pub const fn lm_global(self, bank: u8) -> bool {
        let bit = match bank {
            0 => 8,
            1 => 9,
            2 => 6,
            _ => 7,
        };
        (self.0 >> bit) & 1 != 0
    }

    /// Shared ustore with the neighbor AE.
    #[must_use]
    pub const fn shared_ustore(self) -> bool {
        (self.0 >> 11) & 1 != 0
    }

    /// Reloadable-context mode.
    #[must_use]
    pub const fn reloadable(self) -> bool {
        (self.0 >> 12) & 1 != 0
    }

    /// T-index global mode.
    #[must_use]
    pub const fn tindex_global(self) -> bool {
        (self.0 >> 14) & 1 != 0
    }
}

/// A run of consecutive instruction words inside a code page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UwordBlock {
    /// First word offset relative to the page's base address.
    pub start: u32,
    /// Decoded words. `None` marks an unpopulated word.
    pub words: Vec<Option<MicroWord>>,
}

impl UwordBlock {
    /// Decode a packed 6-byte word: the invalid marker becomes `None`,
    /// anything else is masked to its significant bits.
    #[must_use]
    pub fn decode_word(raw: u64) -> Option<MicroWord> {
        (raw != INVALID_UWORD).then_some(raw & UWORD_MASK)
    }

    fn covers(&self, addr: u32) -> bool {
        addr >= self.start && u64::from(addr) < u64::from(self.start) + self.words.len() as u64
    }
}

/// One code page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapPage {
    /// Physical ustore address of the first word.
    pub beg_addr_p: u32,
    /// Logical address of the first word.
    pub beg_addr_v: u32,
    /// Number of words the page occupies.
    pub micro_words_num: u32,
    /// Page is the image's default page.
    pub def_page: bool,
    /// Instruction blocks.
    pub blocks: Vec<UwordBlock>,
}

impl EncapPage {
    /// Word at page-relative `addr`, with unpopulated words replaced by `fill`.
    #[must_use]
    pub fn word_at(&self, addr: u32, fill: MicroWord) -> MicroWord {
        self.blocks
            .iter()
            .rev()
            .find(|b| b.covers(addr))
            .and_then(|b| b.words[(addr - b.start) as usize])
            .unwrap_or(fill)
    }

    /// Every word of the page in address order.
    #[must_use]
    pub fn words(&self, fill: MicroWord) -> Vec<MicroWord> {
        (0..self.micro_words_num).map(|a| self.word_at(a, fill)).collect()
    }
}

/// How a register-init entry is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitScope {
    /// Every context in the image's context mask.
    AllContexts,
    /// One named context.
    Context(u8),
}

/// Register initial value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReg {
    /// Symbol name.
    pub name: String,
    /// Contexts the value applies to.
    pub scope: InitScope,
    /// Raw register-type code; resolved against the register table at load.
    pub reg_type: u8,
    /// Register number.
    pub reg_num: u16,
    /// Value.
    pub value: u32,
}

/// Register-init type codes.
pub mod init_type {
    /// Value for every assigned context.
    pub const REG: u8 = 0;
    /// Value for one context.
    pub const REG_CTX: u8 = 1;
    /// Expression evaluated at load.
    pub const EXPR: u8 = 2;
    /// Byte-swapped expression.
    pub const EXPR_ENDIAN_SWAP: u8 = 3;
}

/// Decoded image header with its single code page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapImage {
    /// Image name.
    pub name: String,
    /// AEs the image is assigned to.
    pub ae_assigned: u32,
    /// Contexts the image is assigned to.
    pub ctx_assigned: u32,
    /// Device-type flags the image supports.
    pub ac_dev_type: u32,
    /// Entry address (logical).
    pub entry_address: u32,
    /// Fill pattern for unused ustore words.
    pub fill_pattern: MicroWord,
    /// AE mode.
    pub ae_mode: AeMode,
    /// Lowest supported hardware revision.
    pub min_ver: u16,
    /// Highest supported hardware revision.
    pub max_ver: u16,
    /// Code page.
    pub page: EncapPage,
    /// Register-init table.
    pub init_regs: Vec<InitReg>,
    /// Number of register-table entries.
    pub reg_count: u32,
    /// Number of software breakpoints.
    pub sbreak_count: u32,
    /// Application metadata string, if any.
    pub app_meta: Option<String>,
}

impl EncapImage {
    /// Whether the image is assigned to AE `ae`.
    #[must_use]
    pub fn assigned_to(&self, ae: u8) -> bool {
        ae < 32 && self.ae_assigned & (1 << ae) != 0
    }

    /// Context mask to use for load-time programming.
    #[must_use]
    pub fn ctx_mask(&self) -> u8 {
        self.ae_mode.ctx_mask()
    }
}

/// Region targeted by a memory-init record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemRegion {
    /// AE local memory.
    Lmem,
    /// Instruction-addressable ustore memory.
    Umem,
}

impl MemRegion {
    /// On-disk region code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Lmem => region::LMEM,
            Self::Umem => region::UMEM,
        }
    }
}

/// Memory-init region codes.
pub mod region {
    /// Shared SRAM; not loadable through the AE path.
    pub const SRAM: u8 = 0;
    /// AE local memory.
    pub const LMEM: u8 = 3;
    /// Ustore memory.
    pub const UMEM: u8 = 7;
}

/// One (byte offset, value) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemValue {
    /// Offset from the record's base address, in bytes.
    pub offset: u32,
    /// 32-bit value.
    pub value: u32,
}

/// Memory-init record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitMem {
    /// Symbol name; its leading decimal digits give the target AE.
    pub symbol: String,
    /// Target AE.
    pub ae: u8,
    /// Target region.
    pub region: MemRegion,
    /// Base byte address.
    pub addr: u32,
    /// Declared extent in bytes.
    pub num_in_bytes: u32,
    /// Values to write.
    pub values: Vec<MemValue>,
}

/// Target AE encoded in the leading decimal digits of an init-mem symbol.
///
/// At most 16 digits are considered.
#[must_use]
pub fn ae_from_symbol(symbol: &str) -> Option<u32> {
    let digits: String = symbol.chars().take(16).take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}
