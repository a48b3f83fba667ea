//! Device compatibility checks.

use qat_chip::DeviceFamily;

use crate::error::{FirmwareError, Result};

/// The device an image is about to be loaded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTarget {
    /// Device family.
    pub family: DeviceFamily,
    /// Product revision compared against image version ranges.
    pub revision: u16,
}

impl DeviceTarget {
    /// Target for `family` at `revision`.
    #[must_use]
    pub const fn new(family: DeviceFamily, revision: u16) -> Self {
        Self { family, revision }
    }

    /// Check a UOF-style `(dev_type mask, revision range)` pair.
    ///
    /// # Errors
    ///
    /// Returns a compatibility error naming `what` when the mask excludes
    /// this family or the revision is out of range.
    pub fn check_mask(&self, what: &str, dev_type_mask: u32, min_ver: u16, max_ver: u16) -> Result<()> {
        if dev_type_mask & self.family.dev_type_flag() == 0 {
            return Err(FirmwareError::compatibility(format!(
                "{what} built for device types {dev_type_mask:#x}, device is {} ({:#x})",
                self.family,
                self.family.dev_type_flag()
            )));
        }
        self.check_revision(what, min_ver, max_ver)
    }

    /// Check a signed-image `(exact dev_type, revision range)` pair.
    ///
    /// # Errors
    ///
    /// Returns a compatibility error when the type differs or the revision is
    /// out of range.
    pub fn check_exact(&self, what: &str, dev_type: u32, min_ver: u16, max_ver: u16) -> Result<()> {
        if dev_type != self.family.dev_type_flag() {
            return Err(FirmwareError::compatibility(format!(
                "{what} built for device type {dev_type:#x}, device is {} ({:#x})",
                self.family,
                self.family.dev_type_flag()
            )));
        }
        self.check_revision(what, min_ver, max_ver)
    }

    fn check_revision(&self, what: &str, min_ver: u16, max_ver: u16) -> Result<()> {
        if self.revision < min_ver || self.revision > max_ver {
            return Err(FirmwareError::compatibility(format!(
                "{what} supports revisions {min_ver:#x}..={max_ver:#x}, device is {:#x}",
                self.revision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_check_accepts_matching_family() {
        let t = DeviceTarget::new(DeviceFamily::C62x, 2);
        assert!(t.check_mask("object", 0x0100_0000 | 0x0200_0000, 0, 0xff).is_ok());
        assert!(t.check_mask("object", 0x0200_0000, 0, 0xff).unwrap_err().is_compatibility());
    }

    #[test]
    fn revision_bounds_are_inclusive() {
        let t = DeviceTarget::new(DeviceFamily::Qat4xxx, 5);
        assert!(t.check_exact("image", 0x0800_0000, 5, 5).is_ok());
        assert!(t.check_exact("image", 0x0800_0000, 6, 9).is_err());
        assert!(t.check_exact("image", 0x0800_0000, 0, 4).is_err());
        assert!(t.check_exact("image", 0x0400_0000, 0, 9).is_err());
    }
}
