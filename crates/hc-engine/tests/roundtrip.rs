//! End-to-end engine tests: encrypt → decrypt round-trips across split
//! counts, overwrite refusal, temp-file atomicity, and descriptor tampering.
//!
//! Each test gets its own TempDir; the engine resolves generated names
//! inside it while the plaintext lives in a `src/` subdirectory so the
//! decrypted output never collides with the original.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use hc_core::{HcError, ProgressEvent, ProgressFn};
use hc_engine::{keyfile, HcEngine};

const MIN: usize = 1 << 15;

struct Fixture {
    tmp: TempDir,
    input: PathBuf,
    name: String,
}

impl Fixture {
    fn new(name: &str, content: &[u8]) -> Self {
        let tmp = TempDir::new().unwrap();

        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();

        let input = src.join(name);
        std::fs::write(&input, content).unwrap();

        Self {
            tmp,
            input,
            name: name.to_string(),
        }
    }

    fn engine(&self) -> HcEngine {
        HcEngine::in_dir(self.tmp.path())
    }

    fn out(&self, suffix: &str) -> PathBuf {
        self.tmp.path().join(format!("{}{}", self.name, suffix))
    }

    fn decrypted(&self) -> PathBuf {
        self.tmp.path().join(&self.name)
    }

    fn residue(&self) -> Vec<String> {
        std::fs::read_dir(self.tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != "src")
            .collect()
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect()
}

#[test]
fn small_file_roundtrip_pads_to_min_block() {
    let fx = Fixture::new("hello.txt", b"HELLOWORLD");
    let engine = fx.engine();

    engine.encrypt_file(0, &fx.input, None).unwrap();

    assert!(fx.out(".hckey").exists());
    let ct = fx.out(".hc");
    assert_eq!(std::fs::metadata(&ct).unwrap().len(), MIN as u64);

    engine.decrypt_file(0, &fx.out(".hckey"), None).unwrap();

    assert_eq!(std::fs::read(fx.decrypted()).unwrap(), b"HELLOWORLD");
}

#[test]
fn min_block_file_splits_evenly_in_two() {
    let fx = Fixture::new("block.bin", &vec![0xAAu8; MIN]);
    let engine = fx.engine();

    engine.encrypt_file(2, &fx.input, None).unwrap();

    let a = std::fs::metadata(fx.out(".01.hc")).unwrap().len();
    let b = std::fs::metadata(fx.out(".02.hc")).unwrap().len();
    assert_eq!(a, (MIN / 2) as u64);
    assert_eq!(b, (MIN / 2) as u64);
    assert!(!fx.out(".hc").exists());

    engine.decrypt_file(2, &fx.out(".hckey"), None).unwrap();

    assert_eq!(std::fs::read(fx.decrypted()).unwrap(), vec![0xAAu8; MIN]);
}

#[test]
fn multi_segment_file_with_residual_roundtrips() {
    let content = patterned(3 * MIN + 7);
    let fx = Fixture::new("data.bin", &content);
    let engine = fx.engine();

    engine.encrypt_file(3, &fx.input, None).unwrap();

    let descriptor = keyfile::read_key_file(&fx.out(".hckey")).unwrap();

    // [2^16, 2^15] + 7-byte residual padded to 2^15.
    assert_eq!(descriptor.segments.len(), 3);

    let total_in: u64 = descriptor.segments.iter().map(|k| u64::from(k.in_size)).sum();
    let total_out: u64 = descriptor
        .segments
        .iter()
        .map(|k| u64::from(k.out_size))
        .sum();
    assert_eq!(total_in, content.len() as u64);
    assert_eq!(total_out, 4 * MIN as u64);

    let residuals: Vec<_> = descriptor
        .segments
        .iter()
        .filter(|k| k.in_size != k.out_size)
        .collect();
    assert_eq!(residuals.len(), 1);
    assert_eq!(residuals[0].in_size, 7);
    assert_eq!(residuals[0].out_size, MIN as u32);

    let split_total: u64 = (1..=3)
        .map(|i| std::fs::metadata(fx.out(&format!(".{i:02}.hc"))).unwrap().len())
        .sum();
    assert_eq!(split_total, total_out);

    engine.decrypt_file(3, &fx.out(".hckey"), None).unwrap();
    assert_eq!(std::fs::read(fx.decrypted()).unwrap(), content);
}

#[test]
fn roundtrip_across_split_counts() {
    for splits in [0u32, 2, 5, 16] {
        let content = patterned(2 * MIN + 1234);
        let fx = Fixture::new("multi.bin", &content);
        let engine = fx.engine();

        engine.encrypt_file(splits, &fx.input, None).unwrap();
        engine
            .decrypt_file(splits, &fx.out(".hckey"), None)
            .unwrap();

        assert_eq!(
            std::fs::read(fx.decrypted()).unwrap(),
            content,
            "splits={splits}"
        );
    }
}

#[test]
fn two_runs_share_nothing() {
    let content = patterned(MIN + 99);

    let fx_a = Fixture::new("same.bin", &content);
    let fx_b = Fixture::new("same.bin", &content);

    fx_a.engine().encrypt_file(0, &fx_a.input, None).unwrap();
    fx_b.engine().encrypt_file(0, &fx_b.input, None).unwrap();

    let key_a = std::fs::read_to_string(fx_a.out(".hckey")).unwrap();
    let key_b = std::fs::read_to_string(fx_b.out(".hckey")).unwrap();
    assert_ne!(key_a, key_b, "fresh keys, IVs and seeds every run");

    let ct_a = std::fs::read(fx_a.out(".hc")).unwrap();
    let ct_b = std::fs::read(fx_b.out(".hc")).unwrap();
    assert_ne!(ct_a, ct_b);
}

#[test]
fn existing_key_file_is_never_clobbered() {
    let fx = Fixture::new("guard.bin", &patterned(100));
    std::fs::write(fx.out(".hckey"), b"precious").unwrap();

    let err = fx.engine().encrypt_file(0, &fx.input, None).unwrap_err();

    assert_eq!(err, HcError::KeyFileAlreadyExists);
    assert_eq!(std::fs::read(fx.out(".hckey")).unwrap(), b"precious");
    assert_eq!(fx.residue(), vec![format!("{}.hckey", fx.name)]);
}

#[test]
fn existing_ciphertext_is_never_clobbered() {
    let fx = Fixture::new("guard.bin", &patterned(100));
    std::fs::write(fx.out(".02.hc"), b"precious").unwrap();

    let err = fx.engine().encrypt_file(2, &fx.input, None).unwrap_err();

    assert_eq!(err, HcError::OutputFileAlreadyExists);
    assert_eq!(std::fs::read(fx.out(".02.hc")).unwrap(), b"precious");
}

#[test]
fn decrypt_refuses_existing_target() {
    let fx = Fixture::new("target.bin", &patterned(200));
    let engine = fx.engine();

    engine.encrypt_file(0, &fx.input, None).unwrap();
    std::fs::write(fx.decrypted(), b"already here").unwrap();

    let err = engine.decrypt_file(0, &fx.out(".hckey"), None).unwrap_err();

    assert_eq!(err, HcError::OutputFileAlreadyExists);
    assert_eq!(std::fs::read(fx.decrypted()).unwrap(), b"already here");
}

#[test]
fn callback_abort_leaves_no_files_behind() {
    let fx = Fixture::new("abort.bin", &patterned(MIN));

    let mut cb: ProgressFn = Box::new(|event| {
        if matches!(event, ProgressEvent::EncryptProgress { .. }) {
            anyhow::bail!("host cancelled");
        }
        Ok(())
    });

    let err = fx
        .engine()
        .encrypt_file(2, &fx.input, Some(&mut cb))
        .unwrap_err();

    assert_eq!(err, HcError::CallbackException);
    assert!(
        fx.residue().is_empty(),
        "temp files must be cleaned up: {:?}",
        fx.residue()
    );
}

#[test]
fn progress_events_are_ordered_and_complete() {
    let fx = Fixture::new("events.bin", &patterned(MIN + 50));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut cb: ProgressFn = Box::new(move |event| {
        sink.lock().unwrap().push(event);
        Ok(())
    });

    fx.engine().encrypt_file(0, &fx.input, Some(&mut cb)).unwrap();

    let events = events.lock().unwrap();

    assert_eq!(events.first(), Some(&ProgressEvent::EncryptStart));
    assert_eq!(events.last(), Some(&ProgressEvent::EncryptEnd));
    assert!(events.contains(&ProgressEvent::KeyCreationStart));
    assert!(events.contains(&ProgressEvent::KeyCreationEnd));
    assert!(events.contains(&ProgressEvent::EncryptProgress { percent: 100 }));

    let mut last = 0u8;
    for event in events.iter() {
        if let ProgressEvent::EncryptProgress { percent } = event {
            assert!(*percent >= last, "overall progress must not move backwards");
            last = *percent;
        }
    }
}

#[test]
fn tampered_key_material_corrupts_the_plaintext() {
    let content = patterned(MIN);
    let fx = Fixture::new("tamper.bin", &content);
    let engine = fx.engine();

    engine.encrypt_file(0, &fx.input, None).unwrap();

    // Flip one nibble inside the <key> field, keeping it valid uppercase hex.
    let text = std::fs::read_to_string(fx.out(".hckey")).unwrap();
    let key_pos = text.find("<key>").unwrap() + "<key>".len();
    let mut bytes = text.into_bytes();
    bytes[key_pos] = if bytes[key_pos] == b'0' { b'1' } else { b'0' };
    std::fs::write(fx.out(".hckey"), bytes).unwrap();

    engine.decrypt_file(0, &fx.out(".hckey"), None).unwrap();

    assert_ne!(std::fs::read(fx.decrypted()).unwrap(), content);
}

#[test]
fn lowercased_key_file_is_a_bad_key() {
    let fx = Fixture::new("case.bin", &patterned(100));
    let engine = fx.engine();

    engine.encrypt_file(0, &fx.input, None).unwrap();

    let text = std::fs::read_to_string(fx.out(".hckey")).unwrap();
    std::fs::write(fx.out(".hckey"), text.to_lowercase()).unwrap();

    let err = engine.decrypt_file(0, &fx.out(".hckey"), None).unwrap_err();
    assert_eq!(err, HcError::BadKey);
}

#[test]
fn ciphertext_size_mismatch_is_fatal() {
    let fx = Fixture::new("sized.bin", &patterned(500));
    let engine = fx.engine();

    engine.encrypt_file(0, &fx.input, None).unwrap();

    let mut ct = std::fs::read(fx.out(".hc")).unwrap();
    ct.extend_from_slice(&[0u8; 256]);
    std::fs::write(fx.out(".hc"), &ct).unwrap();

    let err = engine.decrypt_file(0, &fx.out(".hckey"), None).unwrap_err();
    assert_eq!(err, HcError::InvalidInputFile);
}

#[test]
fn missing_ciphertext_piece_is_fatal() {
    let fx = Fixture::new("pieces.bin", &patterned(MIN));
    let engine = fx.engine();

    engine.encrypt_file(2, &fx.input, None).unwrap();
    std::fs::remove_file(fx.out(".02.hc")).unwrap();

    let err = engine.decrypt_file(2, &fx.out(".hckey"), None).unwrap_err();
    assert_eq!(err, HcError::CannotOpenInputFile);
}

#[test]
fn empty_input_is_rejected() {
    let fx = Fixture::new("empty.bin", b"");

    let err = fx.engine().encrypt_file(0, &fx.input, None).unwrap_err();
    assert_eq!(err, HcError::CannotOpenInputFile);
}

#[test]
fn missing_input_is_rejected() {
    let fx = Fixture::new("exists.bin", b"x");
    let missing = fx.tmp.path().join("src").join("nope.bin");

    let err = fx.engine().encrypt_file(0, &missing, None).unwrap_err();
    assert_eq!(err, HcError::CannotOpenInputFile);
}

#[test]
fn missing_key_file_is_rejected() {
    let fx = Fixture::new("nokey.bin", b"x");

    let err = fx
        .engine()
        .decrypt_file(0, Path::new("absent.hckey"), None)
        .unwrap_err();
    assert_eq!(err, HcError::CannotOpenKeyFile);
}

#[test]
fn output_names_drop_the_input_directory() {
    let fx = Fixture::new("named.bin", &patterned(64));
    let engine = fx.engine();

    engine.encrypt_file(0, &fx.input, None).unwrap();

    // Outputs land in the engine directory, not next to src/named.bin.
    assert!(fx.out(".hc").exists());
    assert!(!fx.input.with_extension("bin.hc").exists());
}
