//! Firmware loader and hardware abstraction layer for QAT acceleration
//! engines.
//!
//! Everything here is synchronous register access and bounded polling on
//! the calling thread. The register window is a trait, so the same code
//! drives a mapped PCI BAR or an in-memory window in tests.
//!
//! # Layers
//!
//! ```text
//! Device ─── bring-up ───────────────┐
//!    │                               │
//!    └── loader ─┬─ unsigned ─ batch │
//!                └─ signed (FCU)     │
//!                       │            │
//!            micro-execution engine  │
//!                       │            │
//!                    Hal (CSRs) ─────┘
//!                       │
//!               RegisterWindow (mmio)
//! ```
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`mmio`] | Register windows: mapped BAR and in-memory |
//! | [`csr`] | Global, local and indirect CSR access, context control |
//! | [`microexec`] | Ustore writes, save/execute/restore, register init |
//! | [`ae`] | Per-AE load state and image binding |
//! | [`loader`] | Unsigned and signed load paths, batch memory init |
//! | [`bringup`] | Reset, clocks, liveness and register defaults |
//! | [`registry`] | Device-id pool, VF remap table, usage counts |
//! | [`config`] | Retry budgets and delays |
//!
//! # Quick start
//!
//! ```no_run
//! use qat_chip::DeviceFamily;
//! use qat_driver::{Device, HalConfig, HostDma, MappedRegion};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let family = DeviceFamily::C62x;
//! let bar = MappedRegion::open("0000:3d:00.0", 0)?;
//! let mut dev = Device::new(bar, family, family.full_ae_mask(), 0, HalConfig::from_env())?;
//!
//! let fw = dev.open_firmware(std::fs::read("qat_c62x.bin")?.into(), None)?;
//! dev.bring_up()?;
//! dev.load(&fw, &mut HostDma::new())?;
//! dev.start()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod ae;
pub mod bringup;
pub mod config;
pub mod csr;
mod device;
mod error;
pub mod loader;
pub mod microexec;
pub mod mmio;
pub mod poll;
pub mod registry;

pub use ae::{AeSlice, AeState, AeTable};
pub use config::HalConfig;
pub use csr::Hal;
pub use device::Device;
pub use error::{QatError, Result};
pub use loader::{BatchInit, DmaAllocator, DmaBuffer, HostDma};
pub use microexec::SavedContext;
pub use mmio::{MappedRegion, MemoryWindow, RegisterWindow};
pub use registry::{BusIdentity, DeviceInfo, DeviceRole, Registry, UsageObserver, ALL_DEVICES, MAX_DEVICES};
