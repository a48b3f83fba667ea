//! End-to-end load scenarios against an in-memory register window
//!
//! The window stores values only; tests script the few registers the HAL
//! polls (cycle counters, FCU status) with a read hook.

use std::time::Duration;

use bytes::Bytes;
use qat_chip::regs::{ctx_enables, fcu};
use qat_chip::{DeviceFamily, LocalCsr};
use qat_driver::loader::signed;
use qat_driver::{
    BusIdentity, Device, DeviceInfo, DeviceRole, Hal, HalConfig, HostDma, MemoryWindow, QatError, Registry,
    MAX_DEVICES,
};
use qat_firmware::writer::{InitMemSpec, SignedImageSpec, SuofBuilder, UofBuilder, UofImageSpec};
use qat_firmware::SuofContainer;

fn config() -> HalConfig {
    HalConfig::default().with_fcu_delay(Duration::ZERO).with_fcu_retries(5)
}

/// Window whose per-AE cycle counters advance on every read and whose FCU
/// status register replays `fcu_script`, repeating the last entry.
fn scripted_window(family: DeviceFamily, fcu_script: Vec<u32>, loaded_aes: u32) -> MemoryWindow {
    let map = family.register_map();
    let counters: Vec<usize> = (0..family.ae_count())
        .map(|ae| map.ae_local(ae, LocalCsr::PROFILE_COUNT).get())
        .collect();
    let status = map.global(map.fcu.status).get();
    let loaded = map.fcu.ae_loaded.map(|r| map.global(r).get());
    let mut tick = 0u32;
    let mut step = 0usize;
    MemoryWindow::new(map.window_span(family.ae_count())).with_read_hook(move |offset, stored| {
        if counters.contains(&offset) {
            tick = tick.wrapping_add(16);
            tick
        } else if offset == status && !fcu_script.is_empty() {
            let value = fcu_script[step.min(fcu_script.len() - 1)];
            step += 1;
            value
        } else if Some(offset) == loaded {
            loaded_aes
        } else {
            stored
        }
    })
}

fn plain_hal(family: DeviceFamily) -> Hal<MemoryWindow> {
    let span = family.register_map().window_span(family.ae_count());
    Hal::new(MemoryWindow::new(span), family, family.full_ae_mask(), config()).expect("hal")
}

fn signed_object(family: DeviceFamily, ae_mask: u32) -> SuofContainer {
    let spec = SignedImageSpec::new("sym", family.dev_type_flag(), ae_mask);
    SuofContainer::parse(Bytes::from(SuofBuilder::new().image(spec).build())).expect("suof")
}

#[test]
fn test_corrupt_magic_is_rejected_without_register_writes() {
    let family = DeviceFamily::C62x;
    let span = family.register_map().window_span(family.ae_count());
    let dev = Device::new(MemoryWindow::new(span), family, family.full_ae_mask(), 0, config()).expect("device");

    let mut file = UofBuilder::new().image(UofImageSpec::new("a", 1, vec![1; 4])).build();
    file[0] ^= 0xff;
    let err = dev.open_firmware(Bytes::from(file), None).expect_err("corrupt magic");

    assert!(err.is_format(), "unexpected error: {err}");
    assert!(dev.hal().window().writes().is_empty());
}

#[test]
fn test_auth_that_never_verifies_times_out_before_load() {
    let mut hal = plain_hal(DeviceFamily::C4xxx);
    let suof = signed_object(DeviceFamily::C4xxx, 0b1);
    let err = signed::load(&mut hal, &suof, &mut HostDma::new()).expect_err("auth timeout");

    assert!(err.is_timeout(), "unexpected error: {err}");
    let control = hal.map().global(hal.map().fcu.control).get();
    assert_eq!(
        hal.window().writes_to(control),
        vec![fcu::control_word(fcu::Command::Auth, 0)]
    );
}

#[test]
fn test_verify_fail_is_a_hardware_fault() {
    let family = DeviceFamily::C4xxx;
    let window = scripted_window(family, vec![fcu::STS_VERIFY_FAIL], 0);
    let mut hal = Hal::new(window, family, family.full_ae_mask(), config()).expect("hal");
    let suof = signed_object(family, 0b1);
    let err = signed::load(&mut hal, &suof, &mut HostDma::new()).expect_err("verify fail");
    assert!(matches!(err, QatError::HardwareFault { .. }));
}

#[test]
fn test_active_ae_refuses_load_command() {
    let mut hal = plain_hal(DeviceFamily::C4xxx);
    let enables = hal.map().ae_local(0, LocalCsr::CTX_ENABLES).get();
    hal.window_mut().poke(enables, ctx_enables::enable_bits(0x01));

    let err = signed::load_ae(&mut hal, 0).expect_err("active AE");
    assert!(matches!(err, QatError::Precondition { .. }));
    let control = hal.map().global(hal.map().fcu.control).get();
    assert!(hal.window().writes_to(control).is_empty());
}

#[test]
fn test_shared_ustore_splits_ten_words_across_pair() {
    let family = DeviceFamily::C62x;
    let window = scripted_window(family, Vec::new(), 0);
    let mut dev = Device::new(window, family, family.full_ae_mask(), 0, config()).expect("device");

    let mut image = UofImageSpec::new("shared", 0b0100, (1..=10).collect());
    image.ae_mode |= 1 << 11;
    image.fill_pattern = 0;
    let fw = dev
        .open_firmware(Bytes::from(UofBuilder::new().image(image).build()), None)
        .expect("open");
    dev.bring_up().expect("bring-up");
    dev.hal_mut().window_mut().clear_log();

    assert_eq!(dev.load(&fw, &mut HostDma::new()).expect("load"), 1);
    assert_eq!(dev.ae_table().get(2).expect("AE 2").eff_ustore_words, 2 * family.ustore_words());

    let low = |w: u64| qat_chip::ucode::with_ecc(w) as u32;
    let tail = |ae: u8| {
        let at = dev.hal().map().ae_local(ae, LocalCsr::USTORE_DATA_LOWER).get();
        let writes = dev.hal().window().writes_to(at);
        writes[writes.len() - 5..].to_vec()
    };
    assert_eq!(tail(2), [1, 3, 5, 7, 9].map(low).to_vec());
    assert_eq!(tail(3), [2, 4, 6, 8, 10].map(low).to_vec());

    assert_eq!(dev.start().expect("start"), 1);
    let enables = dev.hal().map().ae_local(2, LocalCsr::CTX_ENABLES).get();
    assert_eq!(
        dev.hal().window().peek(enables) & ctx_enables::ENABLE_MASK,
        ctx_enables::enable_bits(0xff)
    );
}

#[test]
fn test_oversized_memory_init_fails_before_any_write() {
    let family = DeviceFamily::C62x;
    let window = scripted_window(family, Vec::new(), 0);
    let mut dev = Device::new(window, family, family.full_ae_mask(), 0, config()).expect("device");
    let file = UofBuilder::new()
        .image(UofImageSpec::new("a", 1, vec![1; 4]))
        .init_mem(InitMemSpec {
            symbol: "0!table".into(),
            region: 3,
            addr: 4092,
            num_in_bytes: 8,
            values: vec![(0, 1)],
        })
        .build();
    let fw = dev.open_firmware(Bytes::from(file), None).expect("open");
    dev.bring_up().expect("bring-up");
    dev.hal_mut().window_mut().clear_log();

    let err = dev.load(&fw, &mut HostDma::new()).expect_err("capacity");
    assert!(matches!(err, QatError::ResourceExhausted { .. }));
    assert!(dev.hal().window().writes().is_empty());
}

#[test]
fn test_signed_device_authenticates_loads_and_starts() {
    let family = DeviceFamily::Qat4xxx;
    let script = vec![
        fcu::STS_VERIFY_DONE | fcu::AUTHFWLD,
        fcu::STS_LOAD_DONE | (1 << fcu::LOADED_AE_SHIFT),
        fcu::DONE | (1 << fcu::LOADED_AE_SHIFT),
    ];
    let window = scripted_window(family, script, 0b1);
    let mut dev = Device::new(window, family, family.full_ae_mask(), 0, config()).expect("device");
    let spec = SignedImageSpec::new("sym", family.dev_type_flag(), 0b1);
    let fw = dev
        .open_firmware(Bytes::from(SuofBuilder::new().image(spec).build()), None)
        .expect("open");

    assert!(matches!(dev.load(&fw, &mut HostDma::new()), Err(QatError::Precondition { .. })));
    dev.bring_up().expect("bring-up");
    let mut dma = HostDma::new();
    assert_eq!(dev.load(&fw, &mut dma).expect("load"), 1);
    assert!(dma.allocated() > signed::AUTH_CHUNK_LEN);
    assert_eq!(dev.start().expect("start"), 1);
}

#[test]
fn test_unsigned_firmware_on_signed_device_is_incompatible() {
    let family = DeviceFamily::Qat4xxx;
    let span = family.register_map().window_span(family.ae_count());
    let dev = Device::new(MemoryWindow::new(span), family, family.full_ae_mask(), 0, config()).expect("device");
    let file = UofBuilder::new().image(UofImageSpec::new("a", 1, vec![1; 4])).build();
    let err = dev.open_firmware(Bytes::from(file), None).expect_err("mode mismatch");
    assert!(err.is_compatibility());
}

#[test]
fn test_full_pool_leaves_registry_unchanged() {
    let reg = Registry::new();
    let info = |n: usize| DeviceInfo {
        name: format!("qat{n}"),
        identity: BusIdentity::new(n as u8, 0, 0),
        role: DeviceRole::Physical,
    };
    let ids: Vec<u32> = (0..MAX_DEVICES).map(|n| reg.register(info(n)).expect("register")).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), MAX_DEVICES);

    let err = reg.register(info(MAX_DEVICES)).expect_err("pool full");
    assert!(matches!(err, QatError::ResourceExhausted { .. }));
    assert_eq!(reg.device_count(), MAX_DEVICES);
    for (n, &id) in ids.iter().enumerate() {
        let dev = reg.get_by_id(id).expect("still registered");
        assert_eq!(dev.info().name, format!("qat{n}"));
    }
}

#[test]
#[ignore] // Requires a QAT device bound to a userspace-accessible BAR
fn test_hardware_bring_up() {
    let bdf = std::env::var("QAT_TEST_BDF").unwrap_or_else(|_| "0000:3d:00.0".into());
    let family = DeviceFamily::C62x;
    let bar = qat_driver::MappedRegion::open(&bdf, 0).expect("map BAR");
    let mut dev = Device::new(bar, family, family.full_ae_mask(), 0, HalConfig::from_env()).expect("device");
    dev.bring_up().expect("bring-up");
}
