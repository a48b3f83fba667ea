//! Silicon model for QAT acceleration-engine (AE) clusters.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the silicon that the loader programs: device families,
//! per-generation register maps, AE-local CSR bit definitions, the firmware
//! control unit (FCU) protocol, and the micro-instruction encoding used to
//! drive an AE from outside its resident program.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`family`] | Device families, AE counts, ustore sizes, UOF device-type flags |
//! | [`regs`] | Typed register offsets: AE-local, transfer, global, FCU blocks |
//! | [`ucode`] | Instruction words, ECC parity, register-address table, templates |
//!
//! # Address arithmetic
//!
//! ```text
//! AE-local CSR   = ae_local_base + (ae << 12) + (csr & 0x3ff)
//! transfer reg   = ae_xfer_base  + (ae << 12) + ((reg & 0xff) << 2)
//! global CSR     = global_base   + csr
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod family;
pub mod regs;
pub mod ucode;

pub use family::{DeviceFamily, FirmwareMode, Generation};
pub use regs::{CsrOffset, FcuRegisters, GlobalCsr, LocalCsr, RegisterMap};
pub use ucode::{MicroWord, RegAddr, RegType};

/// Maximum number of hardware contexts per AE.
pub const MAX_CTX: u8 = 8;

/// Context mask selecting all eight contexts.
pub const ALL_CTX_MASK: u8 = 0xff;

/// Context mask of the even contexts, used in four-context mode.
pub const EVEN_CTX_MASK: u8 = 0x55;
