//! Per-AE loader state.
//!
//! An [`AeTable`] lives as long as the device. Each enabled AE carries the
//! image slices bound to it by the last unsigned load, the contexts that
//! were made live, and the effective ustore size after pairing. Reloading
//! firmware resets the table in place.

use qat_chip::{DeviceFamily, MAX_CTX};
use qat_firmware::UofObject;

use crate::error::{QatError, Result};

/// One image bound to one AE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeSlice {
    /// Index of the image in the object's image list.
    pub image: usize,
    /// Contexts the image is assigned to on this AE.
    pub ctx_mask: u8,
    /// Page resident per context; `Some(image)` once written.
    pub cur_page: [Option<usize>; MAX_CTX as usize],
}

impl AeSlice {
    fn new(image: usize, ctx_mask: u8) -> Self {
        Self {
            image,
            ctx_mask,
            cur_page: [None; MAX_CTX as usize],
        }
    }
}

/// State of one acceleration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeState {
    /// AE number.
    pub ae: u8,
    /// Whether the AE is in the device's enabled mask.
    pub enabled: bool,
    /// Physical ustore size in words.
    pub ustore_words: u32,
    /// Addressable ustore size after pairing with the neighbor.
    pub eff_ustore_words: u32,
    /// First ustore word not occupied by a loaded page.
    pub free_addr: u32,
    /// Words free from `free_addr` to the end of the effective ustore.
    pub free_size: u32,
    /// Contexts made live by the last load.
    pub live_ctx_mask: u8,
    /// The bound image asks to share its ustore with the neighbor.
    pub shareable: bool,
    /// Bound images.
    pub slices: Vec<AeSlice>,
}

impl AeState {
    fn new(ae: u8, enabled: bool, ustore_words: u32) -> Self {
        Self {
            ae,
            enabled,
            ustore_words,
            eff_ustore_words: ustore_words,
            free_addr: 0,
            free_size: ustore_words,
            live_ctx_mask: 0,
            shareable: false,
            slices: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.eff_ustore_words = self.ustore_words;
        self.free_addr = 0;
        self.free_size = self.ustore_words;
        self.live_ctx_mask = 0;
        self.shareable = false;
        self.slices.clear();
    }

    /// Whether any image is bound.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.slices.is_empty()
    }

    /// Record that `words` words at `base` are in use.
    pub fn claim(&mut self, base: u32, words: u32) {
        self.free_addr = base.saturating_add(words).min(self.eff_ustore_words);
        self.free_size = self.eff_ustore_words - self.free_addr;
    }
}

/// State of every AE on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeTable {
    aes: Vec<AeState>,
}

impl AeTable {
    /// Fresh table for `family` with the AEs in `ae_mask` enabled.
    #[must_use]
    pub fn new(family: DeviceFamily, ae_mask: u32) -> Self {
        let aes = (0..family.ae_count())
            .map(|ae| AeState::new(ae, ae_mask & (1 << ae) != 0, family.ustore_words()))
            .collect();
        Self { aes }
    }

    /// State of `ae`.
    #[must_use]
    pub fn get(&self, ae: u8) -> Option<&AeState> {
        self.aes.get(usize::from(ae))
    }

    /// Mutable state of `ae`.
    pub fn get_mut(&mut self, ae: u8) -> Option<&mut AeState> {
        self.aes.get_mut(usize::from(ae))
    }

    /// All AEs in order.
    pub fn iter(&self) -> impl Iterator<Item = &AeState> {
        self.aes.iter()
    }

    /// Enabled AEs in order.
    pub fn enabled(&self) -> impl Iterator<Item = &AeState> {
        self.aes.iter().filter(|a| a.enabled)
    }

    /// Forget every binding, keeping the enabled set.
    pub fn reset(&mut self) {
        self.aes.iter_mut().for_each(AeState::reset);
    }

    /// Bind every image of `uof` to the enabled AEs it is assigned to.
    ///
    /// # Errors
    ///
    /// Resource exhaustion if an AE would carry more slices than it has
    /// contexts; invalid input if two images on one AE claim the same
    /// context.
    pub fn bind(&mut self, uof: &UofObject) -> Result<()> {
        for state in self.aes.iter_mut().filter(|a| a.enabled) {
            for (index, image) in uof.images_for(state.ae) {
                let ctx_mask = (image.ctx_assigned & 0xff) as u8;
                if state.slices.len() >= usize::from(MAX_CTX) {
                    return Err(QatError::exhausted(format!(
                        "AE {} already carries {MAX_CTX} images",
                        state.ae
                    )));
                }
                if let Some(other) = state.slices.iter().find(|s| s.ctx_mask & ctx_mask != 0) {
                    return Err(QatError::invalid_input(format!(
                        "images {} and {} both claim contexts {:#04x} on AE {}",
                        uof.images[other.image].name,
                        image.name,
                        other.ctx_mask & ctx_mask,
                        state.ae
                    )));
                }
                state.shareable |= image.ae_mode.shared_ustore();
                state.slices.push(AeSlice::new(index, ctx_mask));
                tracing::debug!("AE {}: bound image {} to contexts {ctx_mask:#04x}", state.ae, image.name);
            }
        }
        Ok(())
    }

    /// Whether `ae` may double its ustore with its pair neighbor: the
    /// family supports it, `ae`'s image is shareable, and the neighbor is
    /// idle or carries the same image.
    #[must_use]
    pub fn can_double(&self, family: DeviceFamily, ae: u8) -> bool {
        let (Some(me), Some(pair)) = (self.get(ae), self.get(ae ^ 1)) else {
            return false;
        };
        if !family.doubles_shared_ustore() || !me.shareable {
            return false;
        }
        pair.is_idle() || same_images(me, pair)
    }

    /// Bitmask of AEs with live contexts.
    #[must_use]
    pub fn live_mask(&self) -> u32 {
        self.aes
            .iter()
            .filter(|a| a.live_ctx_mask != 0)
            .fold(0, |mask, a| mask | (1 << a.ae))
    }
}

fn same_images(a: &AeState, b: &AeState) -> bool {
    a.slices.len() == b.slices.len() && a.slices.iter().zip(&b.slices).all(|(x, y)| x.image == y.image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use qat_firmware::writer::{UofBuilder, UofImageSpec};

    fn object(images: Vec<UofImageSpec>) -> UofObject {
        let mut builder = UofBuilder::new();
        for image in images {
            builder = builder.image(image);
        }
        UofObject::parse(Bytes::from(builder.build())).unwrap()
    }

    #[test]
    fn binds_only_enabled_aes() {
        let uof = object(vec![UofImageSpec::new("a", 0b1011, vec![0; 4])]);
        let mut table = AeTable::new(DeviceFamily::C62x, 0b0011);
        table.bind(&uof).unwrap();
        assert_eq!(table.get(0).unwrap().slices.len(), 1);
        assert_eq!(table.get(1).unwrap().slices.len(), 1);
        assert!(table.get(3).unwrap().is_idle());
    }

    #[test]
    fn overlapping_contexts_are_rejected() {
        let uof = object(vec![
            UofImageSpec::new("a", 1, vec![0; 4]),
            UofImageSpec::new("b", 1, vec![0; 4]),
        ]);
        let mut table = AeTable::new(DeviceFamily::C62x, 1);
        assert!(matches!(table.bind(&uof), Err(QatError::InvalidInput { .. })));
    }

    #[test]
    fn doubling_requires_idle_or_matching_neighbor() {
        let mut shared = UofImageSpec::new("s", 0b0001, vec![0; 4]);
        shared.ae_mode |= 1 << 11;
        let other = UofImageSpec::new("o", 0b0010, vec![0; 4]);
        let uof = object(vec![shared.clone(), other]);
        let mut table = AeTable::new(DeviceFamily::C62x, 0b11);
        table.bind(&uof).unwrap();
        assert!(!table.can_double(DeviceFamily::C62x, 0));

        let uof = object(vec![shared]);
        table.reset();
        table.bind(&uof).unwrap();
        assert!(table.can_double(DeviceFamily::C62x, 0));
        assert!(!table.can_double(DeviceFamily::Qat4xxx, 0));
    }

    #[test]
    fn claim_tracks_free_region() {
        let mut table = AeTable::new(DeviceFamily::C3xxx, 1);
        let ae = table.get_mut(0).unwrap();
        ae.claim(0x10, 0x20);
        assert_eq!((ae.free_addr, ae.free_size), (0x30, 0x4000 - 0x30));
    }
}
