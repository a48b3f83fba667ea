//! Image loaders.
//!
//! | Path | Container | Who writes the ustore |
//! |------|-----------|-----------------------|
//! | [`unsigned`] | UOF | host, through CSRs and micro-execution |
//! | [`signed`] | SUOF | FCU, after authenticating the image |
//!
//! Memory-init records of unsigned objects are queued by [`batch`] and
//! replayed before register initialisation.

pub mod batch;
pub mod signed;
pub mod unsigned;

pub use batch::{BatchEntry, BatchInit};
pub use signed::{AuthChunk, DmaAllocator, DmaBuffer, HostBuffer, HostDma};
