//! Container parsing tests
//!
//! Every fixture is produced by the writers, so the parsers are checked
//! against byte-exact containers without vendor firmware.

use bytes::Bytes;
use qat_chip::ucode::INVALID_UWORD;
use qat_chip::DeviceFamily;
use qat_firmware::image::{init_type, region};
use qat_firmware::writer::{
    InitMemSpec, InitRegSpec, MofBuilder, SignedImageSpec, SuofBuilder, UofBuilder, UofImageSpec,
};
use qat_firmware::{
    Container, ContainerKind, DeviceTarget, InitScope, MemRegion, MofArchive, ObjectKind,
    SuofContainer, UofObject,
};

fn sample_uof() -> Vec<u8> {
    let mut image = UofImageSpec::new("crypto", 0b11, vec![0x100, 0x200, INVALID_UWORD, 0x400]);
    image.fill_pattern = 0xdead;
    image.entry_address = 2;
    image.app_meta = Some("build 7".into());
    image.init_regs = vec![
        InitRegSpec::all_contexts("gpr_a3", 1, 3, 0x1111),
        InitRegSpec::one_context("gpr_b1", 5, 2, 1, 0x2222),
    ];
    UofBuilder::new()
        .image(image)
        .init_mem(InitMemSpec {
            symbol: "0!lm_table".into(),
            region: region::LMEM,
            addr: 0x10,
            num_in_bytes: 8,
            values: vec![(0, 0xaa), (4, 0xbb)],
        })
        .build()
}

fn sample_suof() -> Vec<u8> {
    let flag = DeviceFamily::C4xxx.dev_type_flag();
    SuofBuilder::new()
        .image(SignedImageSpec::new("first", flag, 0b0001))
        .image(SignedImageSpec::new("second", flag, 0b1110))
        .build()
}

// ── UOF ──

#[test]
fn test_uof_decodes_images_and_init_tables() {
    let uof = UofObject::parse(Bytes::from(sample_uof())).expect("parse");
    assert_eq!(uof.images.len(), 1);
    let img = &uof.images[0];
    assert_eq!(img.name, "crypto");
    assert_eq!(img.ae_assigned, 0b11);
    assert_eq!(img.entry_address, 2);
    assert_eq!(img.fill_pattern, 0xdead);
    assert_eq!(img.app_meta.as_deref(), Some("build 7"));
    assert_eq!(img.ae_mode.ctx_mode(), 8);

    // The unpopulated word takes the image's fill pattern.
    assert_eq!(img.page.words(img.fill_pattern), vec![0x100, 0x200, 0xdead, 0x400]);

    assert_eq!(img.init_regs.len(), 2);
    assert_eq!(img.init_regs[0].scope, InitScope::AllContexts);
    assert_eq!(img.init_regs[0].reg_num, 3);
    assert_eq!(img.init_regs[1].scope, InitScope::Context(5));
    assert_eq!(img.init_regs[1].value, 0x2222);

    assert_eq!(uof.init_mem.len(), 1);
    let mem = &uof.init_mem[0];
    assert_eq!(mem.ae, 0);
    assert_eq!(mem.region, MemRegion::Lmem);
    assert_eq!(mem.values.len(), 2);
    assert_eq!(mem.values[1].value, 0xbb);
}

#[test]
fn test_uof_parse_is_repeatable() {
    let bytes = Bytes::from(sample_uof());
    let a = UofObject::parse(bytes.clone()).expect("first parse");
    let b = UofObject::parse(bytes).expect("second parse");
    assert_eq!(a, b);
}

#[test]
fn test_uof_corrupted_magic_is_format_error() {
    let mut bytes = sample_uof();
    bytes[0] ^= 0xff;
    let err = UofObject::parse(Bytes::from(bytes)).unwrap_err();
    assert!(err.is_format(), "{err}");
}

#[test]
fn test_uof_payload_flip_fails_checksum() {
    let mut bytes = sample_uof();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let err = UofObject::parse(Bytes::from(bytes)).unwrap_err();
    assert!(err.is_format());
    assert!(err.to_string().contains("checksum"), "{err}");
}

#[test]
fn test_uof_truncated_is_format_error() {
    let bytes = sample_uof();
    let err = UofObject::parse(Bytes::copy_from_slice(&bytes[..bytes.len() / 2])).unwrap_err();
    assert!(err.is_format());
}

#[test]
fn test_uof_rejects_multiple_pages() {
    let mut image = UofImageSpec::new("paged", 1, vec![0; 2]);
    image.numpages = 2;
    let err = UofObject::parse(Bytes::from(UofBuilder::new().image(image).build())).unwrap_err();
    assert!(err.is_compatibility(), "{err}");
}

#[test]
fn test_uof_rejects_reloadable_mode() {
    let mut image = UofImageSpec::new("reload", 1, vec![0; 2]);
    image.ae_mode = 8 | (1 << 12);
    let err = UofObject::parse(Bytes::from(UofBuilder::new().image(image).build())).unwrap_err();
    assert!(err.is_compatibility());
}

#[test]
fn test_uof_rejects_odd_context_mode() {
    let mut image = UofImageSpec::new("six", 1, vec![0; 2]);
    image.ae_mode = 6;
    let err = UofObject::parse(Bytes::from(UofBuilder::new().image(image).build())).unwrap_err();
    assert!(err.is_compatibility());
}

#[test]
fn test_uof_rejects_neighbor_and_imported_tables() {
    let mut neigh = UofImageSpec::new("neigh", 1, vec![0; 2]);
    neigh.neighbor_regs = 1;
    let err = UofObject::parse(Bytes::from(UofBuilder::new().image(neigh).build())).unwrap_err();
    assert!(err.is_compatibility());

    let mut imports = UofImageSpec::new("imports", 1, vec![0; 2]);
    imports.imported_vars = 2;
    let err = UofObject::parse(Bytes::from(UofBuilder::new().image(imports).build())).unwrap_err();
    assert!(err.is_compatibility());
}

#[test]
fn test_uof_rejects_expression_init() {
    let mut image = UofImageSpec::new("expr", 1, vec![0; 2]);
    image.init_regs = vec![InitRegSpec {
        name: "e".into(),
        init_type: init_type::EXPR,
        reg_type: 1,
        ctx: 0,
        reg_num: 0,
        value: 0,
    }];
    let err = UofObject::parse(Bytes::from(UofBuilder::new().image(image).build())).unwrap_err();
    assert!(err.is_compatibility());
}

#[test]
fn test_uof_rejects_bad_init_mem_symbol() {
    let bytes = UofBuilder::new()
        .image(UofImageSpec::new("img", 1, vec![0; 2]))
        .init_mem(InitMemSpec {
            symbol: "99!too_far".into(),
            region: region::LMEM,
            addr: 0,
            num_in_bytes: 4,
            values: vec![(0, 1)],
        })
        .build();
    let err = UofObject::parse(Bytes::from(bytes)).unwrap_err();
    assert!(err.is_format());
}

#[test]
fn test_uof_sram_init_mem_is_not_loadable() {
    let bytes = UofBuilder::new()
        .image(UofImageSpec::new("img", 1, vec![0; 2]))
        .init_mem(InitMemSpec {
            symbol: "1!sram".into(),
            region: region::SRAM,
            addr: 0,
            num_in_bytes: 4,
            values: vec![(0, 1)],
        })
        .build();
    let err = UofObject::parse(Bytes::from(bytes)).unwrap_err();
    assert!(err.is_compatibility());
}

#[test]
fn test_uof_compat_checks_family_and_revision() {
    let mut image = UofImageSpec::new("c3only", 1, vec![0; 2]);
    image.ac_dev_type = DeviceFamily::C3xxx.dev_type_flag();
    image.min_ver = 1;
    image.max_ver = 2;
    let uof = UofObject::parse(Bytes::from(UofBuilder::new().image(image).build())).expect("parse");

    assert!(uof.check_compat(&DeviceTarget::new(DeviceFamily::C3xxx, 1)).is_ok());
    assert!(uof
        .check_compat(&DeviceTarget::new(DeviceFamily::C3xxx, 3))
        .unwrap_err()
        .is_compatibility());
    assert!(uof
        .check_compat(&DeviceTarget::new(DeviceFamily::C62x, 1))
        .unwrap_err()
        .is_compatibility());
}

// ── SUOF ──

#[test]
fn test_suof_parses_signed_images() {
    let suof = SuofContainer::parse(Bytes::from(sample_suof())).expect("parse");
    assert_eq!(suof.images.len(), 2);
    assert_eq!(suof.images[0].name, "first");
    assert_eq!(suof.images[1].ae_mask, 0b1110);
    assert_eq!(suof.images[0].modulus().len(), 256);
    assert!(suof.images[0].modulus().iter().all(|&b| b == 0xa5));
    assert_eq!(suof.images[0].signature().len(), 256);
}

#[test]
fn test_suof_loads_ae0_image_last() {
    let suof = SuofContainer::parse(Bytes::from(sample_suof())).expect("parse");
    let order: Vec<&str> = suof.load_order().iter().map(|i| i.name.as_str()).collect();
    assert_eq!(order, ["second", "first"]);
}

#[test]
fn test_suof_checksum_mismatch() {
    let mut bytes = sample_suof();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x80;
    let err = SuofContainer::parse(Bytes::from(bytes)).unwrap_err();
    assert!(err.is_format());
}

#[test]
fn test_suof_requires_an_image() {
    let bytes = SuofBuilder::new().build();
    let err = SuofContainer::parse(Bytes::from(bytes)).unwrap_err();
    assert!(err.is_format());
}

#[test]
fn test_suof_exact_device_match() {
    let suof = SuofContainer::parse(Bytes::from(sample_suof())).expect("parse");
    assert!(suof.check_compat(&DeviceTarget::new(DeviceFamily::C4xxx, 0)).is_ok());
    assert!(suof
        .check_compat(&DeviceTarget::new(DeviceFamily::Qat4xxx, 0))
        .unwrap_err()
        .is_compatibility());
}

#[test]
fn test_suof_rejects_non_ae_module() {
    let mut image = SignedImageSpec::new("pke", DeviceFamily::C4xxx.dev_type_flag(), 1);
    image.css_fw_type = 1;
    let bytes = SuofBuilder::new().image(image).build();
    assert!(SuofContainer::parse(Bytes::from(bytes)).unwrap_err().is_format());
}

// ── MOF and detection ──

#[test]
fn test_mof_selects_object_by_name() {
    let archive = MofBuilder::new()
        .object("plain.uof", ObjectKind::Uof, sample_uof())
        .object("signed.suof", ObjectKind::Suof, sample_suof())
        .build();
    let mof = MofArchive::parse(Bytes::from(archive.clone())).expect("index");
    assert_eq!(mof.entries.len(), 2);

    let plain = Container::parse(Bytes::from(archive.clone()), Some("plain.uof")).expect("uof");
    assert!(!plain.is_signed());
    let signed = Container::parse(Bytes::from(archive), Some("signed.suof")).expect("suof");
    assert!(signed.is_signed());
}

#[test]
fn test_mof_unknown_name_and_ambiguous_selection() {
    let archive = MofBuilder::new()
        .object("a", ObjectKind::Uof, sample_uof())
        .object("b", ObjectKind::Uof, sample_uof())
        .build();
    let err = Container::parse(Bytes::from(archive.clone()), Some("missing")).unwrap_err();
    assert!(matches!(err, qat_firmware::FirmwareError::InvalidInput { .. }));
    let err = Container::parse(Bytes::from(archive), None).unwrap_err();
    assert!(matches!(err, qat_firmware::FirmwareError::InvalidInput { .. }));
}

#[test]
fn test_mof_sole_object_needs_no_name() {
    let archive = MofBuilder::new().object("only", ObjectKind::Uof, sample_uof()).build();
    assert!(Container::parse(Bytes::from(archive), None).is_ok());
}

#[test]
fn test_detect_and_reject_unknown_magic() {
    assert_eq!(ContainerKind::detect(&sample_uof()), Some(ContainerKind::Uof));
    assert_eq!(ContainerKind::detect(&sample_suof()), Some(ContainerKind::Suof));
    assert_eq!(ContainerKind::detect(&[0, 0, 0, 0]), None);
    let err = Container::parse(Bytes::from_static(b"nope"), None).unwrap_err();
    assert!(err.is_format());
}
