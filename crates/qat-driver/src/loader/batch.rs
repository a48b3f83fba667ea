//! Deferred memory initialisation.
//!
//! Memory-init records are sorted into per-AE lists while the object is
//! scanned, then replayed: local-memory values as one generated program per
//! AE, ustore-memory values as direct word writes. Every record is checked
//! against its region's capacity before anything is queued, so a bad record
//! fails the load with nothing written.

use std::collections::BTreeMap;

use qat_chip::family::LMEM_WORDS;
use qat_chip::DeviceFamily;
use qat_firmware::{InitMem, MemRegion};

use crate::error::{QatError, Result};
use crate::mmio::RegisterWindow;
use crate::Hal;

/// One deferred 32-bit write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    /// Byte address inside the region.
    pub addr: u32,
    /// Value.
    pub value: u32,
}

/// Per-AE deferred writes for both regions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInit {
    lmem: BTreeMap<u8, Vec<BatchEntry>>,
    umem: BTreeMap<u8, Vec<BatchEntry>>,
}

/// Capacity of `region` in bytes on `family`.
#[must_use]
pub const fn region_bytes(family: DeviceFamily, region: MemRegion) -> u32 {
    match region {
        MemRegion::Lmem => LMEM_WORDS * 4,
        MemRegion::Umem => family.ustore_words() * 4,
    }
}

impl BatchInit {
    /// Sort `records` into per-AE lists. Records for AEs outside `ae_mask`
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Resource exhaustion if a record's declared range or any of its
    /// values falls outside the region.
    pub fn build(family: DeviceFamily, ae_mask: u32, records: &[InitMem]) -> Result<Self> {
        let mut batch = Self::default();
        for record in records {
            let capacity = region_bytes(family, record.region);
            let end = u64::from(record.addr) + u64::from(record.num_in_bytes);
            if end > u64::from(capacity) {
                return Err(QatError::exhausted(format!(
                    "{:?} init {:?} covers bytes {:#x}..{end:#x}, region holds {capacity:#x}",
                    record.region, record.symbol, record.addr
                )));
            }
            for v in &record.values {
                let at = u64::from(record.addr) + u64::from(v.offset);
                if at + 4 > u64::from(capacity) {
                    return Err(QatError::exhausted(format!(
                        "{:?} init {:?} writes byte {at:#x}, region holds {capacity:#x}",
                        record.region, record.symbol
                    )));
                }
            }

            if record.ae >= family.ae_count() || ae_mask & (1 << record.ae) == 0 {
                tracing::warn!("Skipping memory init {:?}: AE {} is not enabled", record.symbol, record.ae);
                continue;
            }
            let list = match record.region {
                MemRegion::Lmem => batch.lmem.entry(record.ae).or_default(),
                MemRegion::Umem => batch.umem.entry(record.ae).or_default(),
            };
            list.extend(record.values.iter().map(|v| BatchEntry {
                addr: record.addr + v.offset,
                value: v.value,
            }));
        }
        Ok(batch)
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lmem.is_empty() && self.umem.is_empty()
    }

    /// Queued local-memory writes for `ae`.
    #[must_use]
    pub fn lmem(&self, ae: u8) -> &[BatchEntry] {
        self.lmem.get(&ae).map(Vec::as_slice).unwrap_or_default()
    }

    /// Queued ustore-memory writes for `ae`.
    #[must_use]
    pub fn umem(&self, ae: u8) -> &[BatchEntry] {
        self.umem.get(&ae).map(Vec::as_slice).unwrap_or_default()
    }

    /// Perform every queued write.
    ///
    /// # Errors
    ///
    /// Any register-access or execution error.
    pub fn replay<W: RegisterWindow>(&self, hal: &mut Hal<W>) -> Result<()> {
        for (&ae, entries) in &self.lmem {
            let pairs: Vec<(u32, u32)> = entries.iter().map(|e| (e.addr, e.value)).collect();
            hal.write_lm_batch(ae, &pairs)?;
        }
        for (&ae, entries) in &self.umem {
            tracing::debug!("AE {ae}: writing {} ustore-memory words", entries.len());
            for e in entries {
                hal.wr_umem(ae, e.addr / 4, &[e.value])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qat_firmware::MemValue;

    fn record(ae: u8, region: MemRegion, addr: u32, len: u32, values: &[(u32, u32)]) -> InitMem {
        InitMem {
            symbol: format!("{ae}!table"),
            ae,
            region,
            addr,
            num_in_bytes: len,
            values: values.iter().map(|&(offset, value)| MemValue { offset, value }).collect(),
        }
    }

    #[test]
    fn sorts_by_ae_and_region() {
        let records = [
            record(1, MemRegion::Lmem, 0x10, 8, &[(0, 1), (4, 2)]),
            record(0, MemRegion::Umem, 0x100, 4, &[(0, 3)]),
            record(1, MemRegion::Lmem, 0x40, 4, &[(0, 4)]),
        ];
        let batch = BatchInit::build(DeviceFamily::C62x, 0b11, &records).unwrap();
        let lm: Vec<_> = batch.lmem(1).iter().map(|e| (e.addr, e.value)).collect();
        assert_eq!(lm, vec![(0x10, 1), (0x14, 2), (0x40, 4)]);
        assert_eq!(batch.umem(0), &[BatchEntry { addr: 0x100, value: 3 }]);
        assert!(batch.lmem(0).is_empty());
    }

    #[test]
    fn range_past_local_memory_is_exhausted() {
        let records = [record(0, MemRegion::Lmem, 4092, 8, &[(0, 1)])];
        let err = BatchInit::build(DeviceFamily::C62x, 1, &records).unwrap_err();
        assert!(matches!(err, QatError::ResourceExhausted { .. }));
    }

    #[test]
    fn value_past_ustore_memory_is_exhausted() {
        let records = [record(0, MemRegion::Umem, 0xfff8, 4, &[(8, 1)])];
        assert!(BatchInit::build(DeviceFamily::C62x, 1, &records).is_err());
    }

    #[test]
    fn disabled_ae_records_are_skipped() {
        let records = [record(5, MemRegion::Lmem, 0, 4, &[(0, 1)])];
        let batch = BatchInit::build(DeviceFamily::C62x, 1, &records).unwrap();
        assert!(batch.is_empty());
    }
}
