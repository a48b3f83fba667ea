//! Firmware containers for QAT acceleration engines.
//!
//! Parses the three container formats the loader accepts and decodes them
//! into owned image models. Nothing here touches hardware: the driver crate
//! consumes [`Container`] and writes what it describes.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`container`] | Format detection and the top-level [`Container`] |
//! | [`uof`] | Plain objects: images, code pages, register and memory init |
//! | [`suof`] | Signed objects handed to the firmware control unit |
//! | [`mof`] | Multi-object archives of named UOF and SUOF objects |
//! | [`image`] | Decoded image model shared with the loader |
//! | [`compat`] | Device-type and revision checks |
//! | [`writer`] | Builders that emit valid containers |
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use qat_chip::DeviceFamily;
//! use qat_firmware::writer::{UofBuilder, UofImageSpec};
//! use qat_firmware::{Container, DeviceTarget};
//!
//! let file = UofBuilder::new()
//!     .image(UofImageSpec::new("hello", 0b1, vec![0x1234; 4]))
//!     .build();
//! let container = Container::parse(Bytes::from(file), None).unwrap();
//! container
//!     .check_compat(&DeviceTarget::new(DeviceFamily::C62x, 0))
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc
)]

pub mod checksum;
pub mod compat;
pub mod container;
pub mod error;
pub mod image;
pub mod layout;
pub mod mof;
pub mod strtab;
pub mod suof;
pub mod uof;
pub mod writer;

pub use compat::DeviceTarget;
pub use container::{Container, ContainerKind};
pub use error::{FirmwareError, Result};
pub use image::{AeMode, EncapImage, EncapPage, InitMem, InitReg, InitScope, MemRegion, MemValue};
pub use mof::{MofArchive, MofEntry, ObjectKind};
pub use strtab::StringTable;
pub use suof::{SignedImage, SuofContainer};
pub use uof::{ChunkInfo, UofObject};
