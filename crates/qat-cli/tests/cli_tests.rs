//! Command-line tests against files written to a temporary directory

use std::path::Path;
use std::process::{Command, Output};

use qat_chip::DeviceFamily;
use qat_firmware::writer::{SignedImageSpec, SuofBuilder, UofBuilder, UofImageSpec};
use qat_firmware::MofArchive;

fn qat_fw(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_qat-fw"))
        .args(args)
        .output()
        .expect("run qat-fw")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn write_uof(dir: &Path) -> String {
    let path = dir.join("app.uof");
    let file = UofBuilder::new()
        .image(UofImageSpec::new("app_main", 0b11, vec![0x1234; 16]))
        .build();
    std::fs::write(&path, file).expect("write uof");
    path.display().to_string()
}

fn write_suof(dir: &Path) -> String {
    let path = dir.join("app.suof");
    let spec = SignedImageSpec::new("signed_main", DeviceFamily::Qat4xxx.dev_type_flag(), 0b1);
    std::fs::write(&path, SuofBuilder::new().image(spec).build()).expect("write suof");
    path.display().to_string()
}

#[test]
fn test_inspect_lists_images() {
    let dir = tempfile::tempdir().expect("tempdir");
    let uof = write_uof(dir.path());
    let out = qat_fw(&["inspect", &uof]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("UOF"), "{text}");
    assert!(text.contains("app_main"), "{text}");
}

#[test]
fn test_verify_accepts_good_and_rejects_flipped_byte() {
    let dir = tempfile::tempdir().expect("tempdir");
    let uof = write_uof(dir.path());
    assert!(qat_fw(&["verify", &uof, "--family", "c6xx"]).status.success());

    let mut bytes = std::fs::read(&uof).expect("read");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5a;
    std::fs::write(&uof, bytes).expect("write");
    assert!(!qat_fw(&["verify", &uof]).status.success());
}

#[test]
fn test_verify_rejects_wrong_family() {
    let dir = tempfile::tempdir().expect("tempdir");
    let suof = write_suof(dir.path());
    assert!(qat_fw(&["verify", &suof, "--family", "4xxx"]).status.success());
    assert!(!qat_fw(&["verify", &suof, "--family", "c4xxx"]).status.success());
    assert!(!qat_fw(&["verify", &suof, "--family", "nosuch"]).status.success());
}

#[test]
fn test_bundle_round_trips_through_inspect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let uof = write_uof(dir.path());
    let suof = write_suof(dir.path());
    let mof = dir.path().join("fw.mof");
    let mof_arg = mof.display().to_string();

    let out = qat_fw(&["bundle", "-o", &mof_arg, &format!("app={uof}"), &format!("sig={suof}")]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let archive = MofArchive::parse(std::fs::read(&mof).expect("read mof").into()).expect("parse mof");
    let names: Vec<&str> = archive.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["app", "sig"]);

    let text = stdout(&qat_fw(&["inspect", &mof_arg]));
    assert!(text.contains("2 objects"), "{text}");
    assert!(text.contains("signed_main"), "{text}");
    assert!(qat_fw(&["inspect", &mof_arg, "--name", "app"]).status.success());
    assert!(!qat_fw(&["inspect", &mof_arg, "--name", "missing"]).status.success());
}

#[test]
fn test_bundle_rejects_malformed_spec() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mof = dir.path().join("fw.mof").display().to_string();
    assert!(!qat_fw(&["bundle", "-o", &mof, "no-equals-sign"]).status.success());
    assert!(!Path::new(&mof).exists());
}
