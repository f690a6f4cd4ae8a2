//! Per-segment encrypt/decrypt: AES-256-CBC over 256-byte chunks, with the
//! ciphertext bytes scattered through the segment at LFSR-emitted positions.
//!
//! The LFSR never emits index 0, so the last byte of a segment's final chunk
//! is anchored in slot 0 on encrypt and gathered back from slot 0 on
//! decrypt. `in_size` alone decides how many decrypted bytes are real; the
//! rest of the working buffer is random filler.

use std::io::{Read, Write};

use cbc::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use tracing::{debug, warn};

use hc_core::{HcError, HcResult, ProgressEvent};
use hc_lfsr::Lfsr;

use crate::engine::Notifier;
use crate::plan::SegmentKey;
use crate::CHUNK_SIZE;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_BLOCK: usize = 16;

/// Section progress with the reporting throttled to 5% steps.
struct SectionProgress {
    progress: f64,
    step: f64,
    reported: f64,
    make: fn(u8) -> ProgressEvent,
}

impl SectionProgress {
    fn new(in_size: u32, make: fn(u8) -> ProgressEvent) -> Self {
        Self {
            progress: 0.0,
            step: CHUNK_SIZE as f64 * 100.0 / f64::from(in_size),
            reported: 0.0,
            make,
        }
    }

    fn advance(&mut self, notify: &mut Notifier<'_>) -> HcResult<()> {
        self.progress += self.step;

        if self.progress - self.reported >= 5.0 {
            let percent = self.progress.min(100.0) as u8;
            notify.notify((self.make)(percent))?;
            self.reported = self.progress;
        }

        Ok(())
    }
}

/// Encrypt one segment: read `in_size` plaintext bytes from `input`, emit
/// `out_size` scrambled ciphertext bytes to `out`.
///
/// `work` is the shared staging buffer; it must hold at least `out_size`
/// bytes.
pub fn encrypt_segment<R: Read, W: Write>(
    lfsr: &mut Lfsr<'_>,
    key: &SegmentKey,
    input: &mut R,
    out: &mut W,
    work: &mut [u8],
    notify: &mut Notifier<'_>,
) -> HcResult<()> {
    if key.in_size == 0 || key.out_size < key.in_size {
        warn!(
            in_size = key.in_size,
            out_size = key.out_size,
            "segment sizes out of order"
        );
        return Err(HcError::Internal);
    }

    let out_size = key.out_size as usize;
    if out_size > work.len() {
        warn!(out_size, buffer = work.len(), "staging buffer too small");
        return Err(HcError::Internal);
    }
    let work = &mut work[..out_size];

    if lfsr.set_spec(key.lfsr_spec).is_err() {
        warn!(spec = key.lfsr_spec, "segment carries an unusable lfsr spec");
        return Err(HcError::Internal);
    }

    notify.notify(ProgressEvent::EncryptSectionStart)?;

    let mut rng = rand::thread_rng();

    // Positions the scatter will not reach must already hold noise, never
    // whatever the previous segment left behind.
    if key.out_size != key.in_size {
        rng.fill_bytes(work);
    }

    let mut cipher =
        Aes256CbcEnc::new_from_slices(&key.key, &key.iv).map_err(|_| HcError::Internal)?;

    let mut chunk = [0u8; CHUNK_SIZE];
    let mut indices = [0u32; CHUNK_SIZE];

    let mut remaining = key.in_size as usize;
    let mut section = SectionProgress::new(key.in_size, |percent| {
        ProgressEvent::EncryptSectionProgress { percent }
    });

    while remaining > 0 {
        let take = remaining.min(CHUNK_SIZE);

        if take < CHUNK_SIZE {
            rng.fill_bytes(&mut chunk[take..]);
        }

        input.read_exact(&mut chunk[..take]).map_err(|err| {
            debug!(%err, "short read from plaintext input");
            HcError::CannotReadInputFile
        })?;

        remaining -= take;

        for block in chunk.chunks_exact_mut(AES_BLOCK) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        if let Err(err) = lfsr.fill_next(&mut indices) {
            warn!(%err, "lfsr collapsed while scattering");
            return Err(HcError::Internal);
        }

        for j in 0..CHUNK_SIZE - 1 {
            *work
                .get_mut(indices[j] as usize)
                .ok_or(HcError::Internal)? = chunk[j];
        }

        // On the final chunk the last byte takes slot 0, the one position
        // the LFSR never emits.
        let anchor = if remaining == 0 {
            0
        } else {
            indices[CHUNK_SIZE - 1] as usize
        };
        *work.get_mut(anchor).ok_or(HcError::Internal)? = chunk[CHUNK_SIZE - 1];

        section.advance(notify)?;
    }

    out.write_all(work).map_err(|err| {
        debug!(%err, "writing segment ciphertext failed");
        // A WriteZero means the output file set ran out of reserved space,
        // not that a write to a live file failed.
        if err.kind() == std::io::ErrorKind::WriteZero {
            HcError::InvalidOutputFile
        } else {
            HcError::CannotWriteOutputFile
        }
    })?;

    notify.notify(ProgressEvent::EncryptSectionProgress { percent: 100 })?;
    notify.notify(ProgressEvent::EncryptSectionEnd)?;

    Ok(())
}

/// Decrypt one segment: read `out_size` ciphertext bytes from `input`, emit
/// the `in_size` real plaintext bytes to `out`.
pub fn decrypt_segment<R: Read, W: Write>(
    lfsr: &mut Lfsr<'_>,
    key: &SegmentKey,
    input: &mut R,
    out: &mut W,
    work: &mut [u8],
    notify: &mut Notifier<'_>,
) -> HcResult<()> {
    if lfsr.set_spec(key.lfsr_spec).is_err() {
        warn!(spec = key.lfsr_spec, "segment carries an unusable lfsr spec");
        return Err(HcError::Internal);
    }

    if key.in_size == 0 || key.in_size > key.out_size {
        return Err(HcError::BadKey);
    }

    let out_size = key.out_size as usize;
    if out_size > work.len() {
        warn!(out_size, buffer = work.len(), "staging buffer too small");
        return Err(HcError::Internal);
    }
    let work = &mut work[..out_size];

    input.read_exact(work).map_err(|err| {
        debug!(%err, "short read from ciphertext input");
        HcError::CannotReadInputFile
    })?;

    let mut cipher =
        Aes256CbcDec::new_from_slices(&key.key, &key.iv).map_err(|_| HcError::Internal)?;

    notify.notify(ProgressEvent::DecryptSectionStart)?;

    let mut chunk = [0u8; CHUNK_SIZE];
    let mut indices = [0u32; CHUNK_SIZE];

    let mut remaining = key.in_size as usize;
    let mut section = SectionProgress::new(key.in_size, |percent| {
        ProgressEvent::DecryptSectionProgress { percent }
    });

    while remaining > 0 {
        let take = remaining.min(CHUNK_SIZE);

        if let Err(err) = lfsr.fill_next(&mut indices) {
            warn!(%err, "lfsr collapsed while gathering");
            return Err(HcError::Internal);
        }

        for j in 0..CHUNK_SIZE - 1 {
            chunk[j] = *work.get(indices[j] as usize).ok_or(HcError::Internal)?;
        }

        let anchor = if remaining == take {
            0
        } else {
            indices[CHUNK_SIZE - 1] as usize
        };
        chunk[CHUNK_SIZE - 1] = *work.get(anchor).ok_or(HcError::Internal)?;

        for block in chunk.chunks_exact_mut(AES_BLOCK) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        out.write_all(&chunk[..take]).map_err(|err| {
            debug!(%err, "writing plaintext failed");
            HcError::CannotWriteOutputFile
        })?;

        remaining -= take;

        section.advance(notify)?;
    }

    notify.notify(ProgressEvent::DecryptSectionProgress { percent: 100 })?;
    notify.notify(ProgressEvent::DecryptSectionEnd)?;

    Ok(())
}
