//! Container entry point: detect the format once, then parse.

use bytes::Bytes;
use tracing::debug;

use crate::compat::DeviceTarget;
use crate::error::{FirmwareError, Result};
use crate::mof::{is_mof, MofArchive, ObjectKind};
use crate::suof::{is_suof, SuofContainer};
use crate::uof::{is_uof, UofObject};

/// Top-level format of a buffer, decided from its leading magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Plain object.
    Uof,
    /// Signed object.
    Suof,
    /// Multi-object archive.
    Mof,
}

impl ContainerKind {
    /// Detect the format of `buf`.
    #[must_use]
    pub fn detect(buf: &[u8]) -> Option<Self> {
        if is_uof(buf) {
            Some(Self::Uof)
        } else if is_suof(buf) {
            Some(Self::Suof)
        } else if is_mof(buf) {
            Some(Self::Mof)
        } else {
            None
        }
    }
}

/// A loadable firmware object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    /// Unsigned images written by the host.
    Uof(UofObject),
    /// Signed images loaded by the FCU.
    Suof(SuofContainer),
}

impl Container {
    /// Parse `buf`. A bare UOF or SUOF is parsed directly; an archive is
    /// searched for `name`, or for its only object when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a format error for unrecognized or malformed input and an
    /// invalid-input error when the archive has no object by that name.
    pub fn parse(buf: Bytes, name: Option<&str>) -> Result<Self> {
        match ContainerKind::detect(&buf) {
            Some(ContainerKind::Uof) => UofObject::parse(buf).map(Self::Uof),
            Some(ContainerKind::Suof) => SuofContainer::parse(buf).map(Self::Suof),
            Some(ContainerKind::Mof) => {
                let archive = MofArchive::parse(buf)?;
                let entry = match name {
                    Some(n) => archive.find(n).ok_or_else(|| {
                        FirmwareError::invalid_input(format!("archive has no object named {n:?}"))
                    })?,
                    None => match archive.entries.as_slice() {
                        [only] => only,
                        entries => {
                            return Err(FirmwareError::invalid_input(format!(
                                "archive holds {} objects, a name is required",
                                entries.len()
                            )));
                        }
                    },
                };
                debug!("Selected {} object {:?} from archive", entry.kind, entry.name);
                let bytes = archive.object_bytes(entry);
                match entry.kind {
                    ObjectKind::Uof => UofObject::parse(bytes).map(Self::Uof),
                    ObjectKind::Suof => SuofContainer::parse(bytes).map(Self::Suof),
                }
            }
            None => Err(FirmwareError::format(format!(
                "unrecognized firmware magic {:02x?}",
                &buf[..buf.len().min(4)]
            ))),
        }
    }

    /// Check every image against `target`.
    ///
    /// # Errors
    ///
    /// Returns a compatibility error for the first mismatch.
    pub fn check_compat(&self, target: &DeviceTarget) -> Result<()> {
        match self {
            Self::Uof(uof) => uof.check_compat(target),
            Self::Suof(suof) => suof.check_compat(target),
        }
    }

    /// Whether the object is signed.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Suof(_))
    }
}
