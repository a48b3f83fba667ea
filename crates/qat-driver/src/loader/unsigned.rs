//! Unsigned (UOF) loading: the host writes every instruction store itself.
//!
//! ```text
//! bind images ──> AE modes ──> memory batches ──> register inits
//!                                                       │
//!        start <── pc + live ctx <── fill + page ───────┘
//! ```
//!
//! With a shared ustore, two paired AEs present one store of twice the
//! physical size. Even logical addresses live in the even AE and odd ones
//! in the odd AE, so every write is split in two.

use qat_chip::regs::{ae_misc, ctx_enables};
use qat_chip::ucode::{MicroWord, RegType};
use qat_chip::LocalCsr;
use qat_firmware::{AeMode, EncapImage, InitScope, UofObject};

use crate::ae::AeTable;
use crate::csr::Hal;
use crate::error::{QatError, Result};
use crate::loader::batch::BatchInit;
use crate::mmio::RegisterWindow;

/// Words per ustore write burst.
const CHUNK_WORDS: usize = 1024;

/// Program the context, next-neighbor, local-memory and sharing modes of
/// `ae` for an image running in `mode`.
///
/// # Errors
///
/// Any CSR-access error.
pub fn set_ae_mode<W: RegisterWindow>(hal: &mut Hal<W>, ae: u8, mode: AeMode) -> Result<()> {
    let extended = hal.family().has_extended_regfiles();
    let mut csr = hal.ctx_enables(ae)?;
    let bits = [
        (ctx_enables::IN_USE_CONTEXTS, mode.ctx_mode() == 4),
        (ctx_enables::LMADDR_0_GLOBAL, mode.lm_global(0)),
        (ctx_enables::LMADDR_1_GLOBAL, mode.lm_global(1)),
    ];
    for (bit, on) in bits {
        csr = if on { csr | bit } else { csr & !bit };
    }
    if extended {
        for (bit, on) in [
            (ctx_enables::LMADDR_2_GLOBAL, mode.lm_global(2)),
            (ctx_enables::LMADDR_3_GLOBAL, mode.lm_global(3)),
            (ctx_enables::T_INDEX_GLOBAL, mode.tindex_global()),
        ] {
            csr = if on { csr | bit } else { csr & !bit };
        }
    } else if mode.nn_mode() != 0 {
        csr |= ctx_enables::NN_MODE;
    } else {
        csr &= !ctx_enables::NN_MODE;
    }
    hal.write_ae_csr(ae, LocalCsr::CTX_ENABLES, csr)?;

    let misc = hal.read_ae_csr(ae, LocalCsr::AE_MISC_CONTROL)?;
    let misc = if mode.shared_ustore() {
        misc | ae_misc::SHARE_CS
    } else {
        misc & !ae_misc::SHARE_CS
    };
    hal.write_ae_csr(ae, LocalCsr::AE_MISC_CONTROL, misc)
}

/// Write `words` at logical `uaddr` of `ae`'s ustore, splitting between
/// the pair when `doubled`.
///
/// # Errors
///
/// Any CSR-access error.
pub fn write_ustore<W: RegisterWindow>(
    hal: &mut Hal<W>,
    ae: u8,
    uaddr: u32,
    words: &[MicroWord],
    doubled: bool,
) -> Result<()> {
    if !doubled {
        let mut addr = uaddr;
        for chunk in words.chunks(CHUNK_WORDS) {
            hal.wr_uwords(ae, addr, chunk)?;
            addr += chunk.len() as u32;
        }
        return Ok(());
    }
    let (even, odd): (Vec<_>, Vec<_>) = (uaddr..)
        .zip(words.iter().copied())
        .partition(|&(addr, _)| addr & 1 == 0);
    let even: Vec<MicroWord> = even.into_iter().map(|(_, w)| w).collect();
    let odd: Vec<MicroWord> = odd.into_iter().map(|(_, w)| w).collect();
    tracing::debug!(
        "AE pair {}/{}: {} words at {uaddr:#x} split {}+{}",
        ae & !1,
        ae | 1,
        words.len(),
        even.len(),
        odd.len()
    );
    if !even.is_empty() {
        write_ustore(hal, ae & !1, (uaddr + 1) / 2, &even, false)?;
    }
    if !odd.is_empty() {
        write_ustore(hal, ae | 1, uaddr / 2, &odd, false)?;
    }
    Ok(())
}

fn apply_init_regs<W: RegisterWindow>(hal: &mut Hal<W>, ae: u8, image: &EncapImage) -> Result<()> {
    let assigned = image.ctx_mask();
    for reg in &image.init_regs {
        let ty = RegType::try_from(reg.reg_type).map_err(|e| {
            QatError::invalid_input(format!("image {} register {:?}: {e}", image.name, reg.name))
        })?;
        let ctx_mask = match reg.scope {
            InitScope::AllContexts => assigned,
            InitScope::Context(ctx) => {
                if ctx >= qat_chip::MAX_CTX || assigned & (1 << ctx) == 0 {
                    return Err(QatError::invalid_input(format!(
                        "image {} register {:?} targets context {ctx} outside {assigned:#04x}",
                        image.name, reg.name
                    )));
                }
                1 << ctx
            }
        };
        tracing::debug!("AE {ae}: init {:?} ({ty:?} {}) = {:#x}", reg.name, reg.reg_num, reg.value);
        hal.init_reg(ae, ctx_mask, ty, reg.reg_num, reg.value)?;
    }
    Ok(())
}

/// Load every image of `uof` onto the enabled AEs it is assigned to.
/// Returns the number of AEs that received code.
///
/// # Errors
///
/// Invalid input for unusable register inits or context assignments,
/// resource exhaustion for oversized pages or memory inits, and any
/// register-access or execution error.
pub fn load<W: RegisterWindow>(hal: &mut Hal<W>, table: &mut AeTable, uof: &UofObject) -> Result<usize> {
    let family = hal.family();
    table.reset();
    table.bind(uof)?;
    let batch = BatchInit::build(family, hal.ae_mask(), &uof.init_mem)?;

    for state in table.enabled() {
        if let Some(slice) = state.slices.first() {
            set_ae_mode(hal, state.ae, uof.images[slice.image].ae_mode)?;
        }
    }
    batch.replay(hal)?;

    let aes: Vec<u8> = table.enabled().map(|a| a.ae).collect();
    for &ae in &aes {
        let slices: Vec<usize> = table
            .get(ae)
            .map(|a| a.slices.iter().map(|s| s.image).collect())
            .unwrap_or_default();
        for index in slices {
            apply_init_regs(hal, ae, &uof.images[index])?;
        }
    }

    let mut written_pairs = 0u32;
    let mut loaded = 0;
    for ae in aes {
        let doubled = table.can_double(family, ae);
        let Some(state) = table.get_mut(ae) else {
            continue;
        };
        if state.slices.is_empty() {
            continue;
        }
        if state.shareable && !doubled {
            tracing::warn!("AE {ae}: shared ustore requested but the neighbor runs other code; loading unshared");
        }
        state.eff_ustore_words = if doubled {
            state.ustore_words * 2
        } else {
            state.ustore_words
        };

        let pair_bit = 1 << (ae >> 1);
        let skip_write = doubled && written_pairs & pair_bit != 0;
        if doubled {
            written_pairs |= pair_bit;
        }

        let eff = state.eff_ustore_words;
        let mut live = 0u8;
        let mut claimed = None;
        for (n, slice) in state.slices.iter_mut().enumerate() {
            let image = &uof.images[slice.image];
            let page = &image.page;
            let end = u64::from(page.beg_addr_p) + u64::from(page.micro_words_num);
            if end > u64::from(eff) {
                return Err(QatError::exhausted(format!(
                    "image {} needs ustore words up to {end:#x}, AE {ae} has {eff:#x}",
                    image.name
                )));
            }
            if skip_write {
                tracing::debug!("AE {ae}: ustore already written through AE {}", ae ^ 1);
            } else {
                let fill = image.fill_pattern;
                // Fill once per AE; later pages overlay it.
                if n == 0 {
                    let head = vec![fill; page.beg_addr_p as usize];
                    write_ustore(hal, ae, 0, &head, doubled)?;
                    let tail_start = page.beg_addr_p + page.micro_words_num;
                    let tail = vec![fill; (eff - tail_start) as usize];
                    write_ustore(hal, ae, tail_start, &tail, doubled)?;
                }
                write_ustore(hal, ae, page.beg_addr_p, &page.words(fill), doubled)?;
            }

            for ctx in 0..qat_chip::MAX_CTX {
                slice.cur_page[usize::from(ctx)] = (slice.ctx_mask & (1 << ctx) != 0).then_some(slice.image);
            }
            hal.set_pc(ae, slice.ctx_mask, image.entry_address)?;
            live |= slice.ctx_mask;
            claimed = Some((page.beg_addr_p, page.micro_words_num));
        }
        state.live_ctx_mask |= live;
        if let Some((base, words)) = claimed {
            state.claim(base, words);
        }
        tracing::info!("AE {ae} loaded ({} words effective ustore)", state.eff_ustore_words);
        loaded += 1;
    }
    Ok(loaded)
}

/// Wake every AE with live contexts and enable those contexts. Returns the
/// number of AEs started.
///
/// # Errors
///
/// Any CSR-access error.
pub fn start<W: RegisterWindow>(hal: &mut Hal<W>, table: &AeTable) -> Result<usize> {
    let wake = hal.family().start_wakeup_event();
    let mut started = 0;
    for state in table.enabled().filter(|a| a.live_ctx_mask != 0) {
        hal.put_wakeup_event(state.ae, !state.live_ctx_mask, wake)?;
        hal.enable_ctx(state.ae, state.live_ctx_mask)?;
        tracing::info!("AE {} started, contexts {:#04x}", state.ae, state.live_ctx_mask);
        started += 1;
    }
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::mmio::MemoryWindow;
    use qat_chip::regs::ustore;
    use qat_chip::DeviceFamily;

    fn hal(family: DeviceFamily) -> Hal<MemoryWindow> {
        let span = family.register_map().window_span(family.ae_count());
        Hal::new(MemoryWindow::new(span), family, family.full_ae_mask(), HalConfig::default()).unwrap()
    }

    #[test]
    fn shared_write_splits_between_pair() {
        let mut hal = hal(DeviceFamily::C62x);
        let map = *hal.map();
        let words: Vec<MicroWord> = (0..10).collect();
        write_ustore(&mut hal, 3, 0, &words, true).unwrap();
        let even = map.ae_local(2, LocalCsr::USTORE_DATA_LOWER).get();
        let odd = map.ae_local(3, LocalCsr::USTORE_DATA_LOWER).get();
        let low = |w: u64| qat_chip::ucode::with_ecc(w) as u32;
        assert_eq!(hal.window().writes_to(even), [0, 2, 4, 6, 8].map(low).to_vec());
        assert_eq!(hal.window().writes_to(odd), [1, 3, 5, 7, 9].map(low).to_vec());
    }

    #[test]
    fn shared_write_from_odd_address_follows_logical_parity() {
        let mut hal = hal(DeviceFamily::C62x);
        let map = *hal.map();
        write_ustore(&mut hal, 2, 1, &[0xa, 0xb], true).unwrap();
        let low = |w: u64| qat_chip::ucode::with_ecc(w) as u32;
        let data = |ae: u8| map.ae_local(ae, LocalCsr::USTORE_DATA_LOWER).get();
        let addr = |ae: u8| map.ae_local(ae, LocalCsr::USTORE_ADDRESS).get();

        // Logical 1 is odd-AE word 0, logical 2 is even-AE word 1.
        assert_eq!(hal.window().writes_to(data(3)), vec![low(0xa)]);
        assert_eq!(hal.window().writes_to(data(2)), vec![low(0xb)]);
        assert_eq!(hal.window().writes_to(addr(3))[0], ustore::UA_ECS);
        assert_eq!(hal.window().writes_to(addr(2))[0], 1 | ustore::UA_ECS);
    }

    #[test]
    fn shared_write_of_last_word_stays_in_odd_store() {
        let family = DeviceFamily::C62x;
        let mut hal = hal(family);
        let map = *hal.map();
        let last = 2 * family.ustore_words() - 1;
        write_ustore(&mut hal, 2, last, &[0x5], true).unwrap();

        let even_data = map.ae_local(2, LocalCsr::USTORE_DATA_LOWER).get();
        let odd_addr = map.ae_local(3, LocalCsr::USTORE_ADDRESS).get();
        assert!(hal.window().writes_to(even_data).is_empty());
        assert_eq!(
            hal.window().writes_to(odd_addr)[0],
            (family.ustore_words() - 1) | ustore::UA_ECS
        );
    }

    #[test]
    fn four_context_mode_sets_in_use_bit() {
        let mut hal = hal(DeviceFamily::C62x);
        let enables = hal.map().ae_local(0, LocalCsr::CTX_ENABLES).get();
        let misc = hal.map().ae_local(0, LocalCsr::AE_MISC_CONTROL).get();
        set_ae_mode(&mut hal, 0, AeMode(4 | (1 << 8) | (1 << 11) | (1 << 4))).unwrap();
        let csr = hal.window().peek(enables);
        assert_ne!(csr & ctx_enables::IN_USE_CONTEXTS, 0);
        assert_ne!(csr & ctx_enables::LMADDR_0_GLOBAL, 0);
        assert_ne!(csr & ctx_enables::NN_MODE, 0);
        assert_ne!(hal.window().peek(misc) & ae_misc::SHARE_CS, 0);
    }
}
