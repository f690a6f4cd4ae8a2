//! The orchestrator: wires planner, codec, split IO and descriptor together,
//! with temp-file-then-rename atomicity on every output.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use hc_core::{HcError, HcResult, ProgressEvent, ProgressFn};
use hc_lfsr::{Lfsr, PolyTable, MAX_SIZE, MIN_SIZE};

use crate::codec::{decrypt_segment, encrypt_segment};
use crate::keyfile;
use crate::plan::build_keys;
use crate::split::{plan_split, JoinReader, SplitWriter};

/// Wraps the optional host callback; a callback error aborts the operation
/// as `CallbackException`.
pub struct Notifier<'a> {
    callback: Option<&'a mut ProgressFn>,
}

impl<'a> Notifier<'a> {
    pub fn new(callback: Option<&'a mut ProgressFn>) -> Self {
        Self { callback }
    }

    pub fn notify(&mut self, event: ProgressEvent) -> HcResult<()> {
        if let Some(cb) = self.callback.as_mut() {
            if let Err(err) = cb(event) {
                debug!(?event, %err, "progress callback failed");
                return Err(HcError::CallbackException);
            }
        }

        Ok(())
    }
}

/// Tracks every output this run intends to produce. Unless `commit` is
/// reached, dropping the set removes all temp files and anything already
/// renamed into place, so a failed run leaves no trace.
struct PendingOutputs {
    entries: Vec<PendingFile>,
    committed: bool,
}

struct PendingFile {
    temp: PathBuf,
    final_path: PathBuf,
    renamed: bool,
}

impl PendingOutputs {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            committed: false,
        }
    }

    fn add(&mut self, temp: PathBuf, final_path: PathBuf) -> usize {
        self.entries.push(PendingFile {
            temp,
            final_path,
            renamed: false,
        });
        self.entries.len() - 1
    }

    fn rename(&mut self, index: usize) -> std::io::Result<()> {
        let entry = &mut self.entries[index];
        fs::rename(&entry.temp, &entry.final_path)?;
        entry.renamed = true;
        Ok(())
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingOutputs {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        for entry in &self.entries {
            let _ = fs::remove_file(&entry.temp);
            if entry.renamed {
                let _ = fs::remove_file(&entry.final_path);
            }
        }
    }
}

/// The HyperCrypt engine.
///
/// Owns the polynomial registry and the directory in which generated file
/// names (ciphertext pieces, key file, decrypted output, temp files) are
/// resolved. Input paths may live anywhere; their directory component is
/// dropped when output names are derived.
pub struct HcEngine {
    table: PolyTable,
    dir: PathBuf,
}

impl HcEngine {
    /// Engine working in the current directory.
    pub fn new() -> Self {
        Self::in_dir(".")
    }

    /// Engine resolving generated names inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            table: PolyTable::new(),
            dir: dir.into(),
        }
    }

    /// Smallest segment ciphertext size.
    pub fn min_block_size(&self) -> u32 {
        MIN_SIZE
    }

    /// Largest segment ciphertext size.
    pub fn max_block_size(&self) -> u32 {
        MAX_SIZE
    }

    /// Encrypt `input` into `<name>.hc` (or `<name>.01.hc` … when `splits`
    /// is 2..=16) plus a `<name>.hckey` descriptor, where `<name>` is the
    /// input's file name. `splits == 0` means a single output file.
    pub fn encrypt_file(
        &self,
        splits: u32,
        input: &Path,
        progress: Option<&mut ProgressFn>,
    ) -> HcResult<()> {
        let mut notify = Notifier::new(progress);
        self.encrypt_inner(splits, input, &mut notify)
    }

    /// Decrypt the file set described by `key_path` into the key file's
    /// base name. `joins == 0` reads the single `<base>.hc`; 2..=16 reads
    /// `<base>.01.hc` … `<base>.NN.hc`.
    pub fn decrypt_file(
        &self,
        joins: u32,
        key_path: &Path,
        progress: Option<&mut ProgressFn>,
    ) -> HcResult<()> {
        let mut notify = Notifier::new(progress);
        self.decrypt_inner(joins, key_path, &mut notify)
    }

    fn encrypt_inner(
        &self,
        splits: u32,
        input: &Path,
        notify: &mut Notifier<'_>,
    ) -> HcResult<()> {
        if input.as_os_str().is_empty() {
            return Err(HcError::BadInputFileName);
        }

        notify.notify(ProgressEvent::EncryptStart)?;

        let input_name = input
            .file_name()
            .ok_or(HcError::BadInputFileName)?
            .to_string_lossy()
            .into_owned();

        let key_final = self.dir.join(format!("{input_name}.hckey"));
        if key_final.exists() {
            return Err(HcError::KeyFileAlreadyExists);
        }

        let out_finals: Vec<PathBuf> = if splits > 0 {
            (1..=splits)
                .map(|i| self.dir.join(format!("{input_name}.{i:02}.hc")))
                .collect()
        } else {
            vec![self.dir.join(format!("{input_name}.hc"))]
        };

        for path in &out_finals {
            if path.exists() {
                return Err(HcError::OutputFileAlreadyExists);
            }
        }

        let file_size = fs::metadata(input)
            .map_err(|_| HcError::CannotOpenInputFile)?
            .len();
        if file_size == 0 {
            return Err(HcError::CannotOpenInputFile);
        }

        let mut reader =
            BufReader::new(File::open(input).map_err(|_| HcError::CannotOpenInputFile)?);

        notify.notify(ProgressEvent::KeyCreationStart)?;
        let keys = build_keys(&self.table, file_size, notify)?;
        notify.notify(ProgressEvent::KeyCreationEnd)?;

        if keys.is_empty() {
            return Err(HcError::BadKey);
        }

        let total_out: u64 = keys.iter().map(|k| u64::from(k.out_size)).sum();
        let max_segment = keys.iter().map(|k| k.out_size).max().unwrap_or(0);

        let mut work = alloc_work_buffer(max_segment as usize)?;

        // A split output below the minimum permutation size cannot happen
        // with a well-formed plan; refuse rather than write nonsense.
        if splits > 0 && total_out < u64::from(MIN_SIZE) {
            return Err(HcError::BadKey);
        }

        let split_sizes = plan_split(total_out, splits);

        let mut pending = PendingOutputs::new();
        let mut out_files = Vec::with_capacity(out_finals.len());

        for (final_path, &size) in out_finals.iter().zip(&split_sizes) {
            let temp = self.temp_path();
            let file = File::create(&temp).map_err(|err| {
                debug!(%err, temp = %temp.display(), "creating output temp failed");
                HcError::CannotCreateOutputFile
            })?;
            pending.add(temp, final_path.clone());
            out_files.push((file, size));
        }

        let mut writer = SplitWriter::new(out_files);
        let mut lfsr = Lfsr::new(&self.table);

        notify.notify(ProgressEvent::EncryptProgress { percent: 0 })?;

        let mut done = 0u64;
        for key in &keys {
            encrypt_segment(&mut lfsr, key, &mut reader, &mut writer, &mut work, notify)?;

            done += u64::from(key.out_size);
            let percent = (done as f64 * 100.0 / total_out as f64) as u8;
            notify.notify(ProgressEvent::EncryptProgress { percent })?;
        }

        notify.notify(ProgressEvent::EncryptProgress { percent: 100 })?;

        drop(writer);

        let key_temp = self.temp_path();
        keyfile::write_key_file(&key_temp, &keys)?;
        let key_index = pending.add(key_temp, key_final);

        pending.rename(key_index).map_err(|err| {
            debug!(%err, "renaming key file failed");
            HcError::CannotWriteKeyFile
        })?;

        for index in 0..out_finals.len() {
            pending.rename(index).map_err(|err| {
                debug!(%err, "renaming output file failed");
                HcError::CannotWriteOutputFile
            })?;
        }

        pending.commit();

        info!(
            input = %input.display(),
            segments = keys.len(),
            total_out,
            splits,
            "encrypted"
        );

        notify.notify(ProgressEvent::EncryptEnd)?;

        Ok(())
    }

    fn decrypt_inner(&self, joins: u32, key_path: &Path, notify: &mut Notifier<'_>) -> HcResult<()> {
        if key_path.as_os_str().is_empty() {
            return Err(HcError::BadKeyFileName);
        }

        if !key_path.exists() {
            return Err(HcError::CannotOpenKeyFile);
        }

        let descriptor = keyfile::read_key_file(key_path)?;

        let mut max_segment = 0u32;
        {
            let mut probe = Lfsr::new(&self.table);
            for key in &descriptor.segments {
                if key.in_size == 0 || key.out_size == 0 {
                    return Err(HcError::BadKey);
                }
                if key.in_size > key.out_size {
                    return Err(HcError::BadKey);
                }
                if key.out_size > MAX_SIZE {
                    return Err(HcError::BadKey);
                }
                if probe.set_spec(key.lfsr_spec).is_err() {
                    return Err(HcError::BadKey);
                }

                max_segment = max_segment.max(key.out_size);
            }
        }

        let mut work = alloc_work_buffer(max_segment as usize)?;

        let base = Path::new(
            key_path
                .file_name()
                .ok_or(HcError::BadKeyFileName)?,
        )
        .file_stem()
        .ok_or(HcError::BadKeyFileName)?
        .to_string_lossy()
        .into_owned();

        let out_final = self.dir.join(&base);
        if out_final.exists() {
            return Err(HcError::OutputFileAlreadyExists);
        }

        notify.notify(ProgressEvent::DecryptStart)?;

        let input_paths: Vec<PathBuf> = if joins > 0 {
            (1..=joins)
                .map(|i| self.dir.join(format!("{base}.{i:02}.hc")))
                .collect()
        } else {
            vec![self.dir.join(format!("{base}.hc"))]
        };

        let mut input_files = Vec::with_capacity(input_paths.len());
        let mut total_file_size = 0u64;

        for path in &input_paths {
            let size = fs::metadata(path)
                .map_err(|_| HcError::CannotOpenInputFile)?
                .len();
            if size == 0 {
                return Err(HcError::CannotOpenInputFile);
            }

            total_file_size += size;
            input_files.push(File::open(path).map_err(|_| HcError::CannotOpenInputFile)?);
        }

        let total_out: u64 = descriptor
            .segments
            .iter()
            .map(|k| u64::from(k.out_size))
            .sum();
        let total_in: u64 = descriptor
            .segments
            .iter()
            .map(|k| u64::from(k.in_size))
            .sum();

        if total_out != total_file_size {
            return Err(HcError::InvalidInputFile);
        }

        let mut pending = PendingOutputs::new();
        let temp = self.temp_path();
        let out_file = File::create(&temp).map_err(|err| {
            debug!(%err, temp = %temp.display(), "creating output temp failed");
            HcError::CannotCreateOutputFile
        })?;
        pending.add(temp, out_final);

        let mut writer = BufWriter::new(out_file);
        let mut reader = JoinReader::new(input_files);
        let mut lfsr = Lfsr::new(&self.table);

        notify.notify(ProgressEvent::DecryptProgress { percent: 0 })?;

        let mut done = 0u64;
        for key in &descriptor.segments {
            decrypt_segment(&mut lfsr, key, &mut reader, &mut writer, &mut work, notify)?;

            done += u64::from(key.in_size);
            let percent = (done as f64 * 100.0 / total_in as f64) as u8;
            notify.notify(ProgressEvent::DecryptProgress { percent })?;
        }

        notify.notify(ProgressEvent::DecryptProgress { percent: 100 })?;

        writer
            .flush()
            .map_err(|_| HcError::CannotWriteOutputFile)?;
        drop(writer);

        pending.rename(0).map_err(|err| {
            debug!(%err, "renaming decrypted output failed");
            HcError::CannotWriteOutputFile
        })?;
        pending.commit();

        info!(
            key = %key_path.display(),
            segments = descriptor.segments.len(),
            total_in,
            joins,
            "decrypted"
        );

        notify.notify(ProgressEvent::DecryptEnd)?;

        Ok(())
    }

    /// A fresh `<random>-hctemp` path inside the engine directory.
    fn temp_path(&self) -> PathBuf {
        let tag: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();

        self.dir.join(format!("{tag}-hctemp"))
    }
}

impl Default for HcEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn alloc_work_buffer(len: usize) -> HcResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| HcError::BlockSizeTooBig)?;
    buf.resize(len, 0);
    Ok(buf)
}
