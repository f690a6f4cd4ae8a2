//! Segment planning and key-material generation.
//!
//! A plaintext of length `L` is cut into segments whose ciphertext sizes are
//! powers of two in `[2^15, 2^28]`. Each segment gets its own LFSR spec,
//! AES-256 key and IV, and the finished list is shuffled so descriptor order
//! reveals nothing about plaintext order.

use rand::{Rng, RngCore};
use tracing::warn;

use hc_core::{HcError, HcResult, ProgressEvent};
use hc_lfsr::{Lfsr, PolyTable, MIN_SIZE};

use crate::engine::Notifier;

/// Everything needed to encrypt or decrypt one segment.
///
/// `in_size` is the plaintext byte count, `out_size` the ciphertext byte
/// count (a power of two, `>= in_size`); they differ only for the at most
/// one segment smaller than the minimum permutation size. `lfsr_spec` packs
/// the permutation seed (low 32 bits) and polynomial (high 32 bits).
#[derive(Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub in_size: u32,
    pub out_size: u32,
    pub lfsr_spec: u64,
    pub iv: [u8; 16],
    pub key: [u8; 32],
}

impl std::fmt::Debug for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentKey")
            .field("in_size", &self.in_size)
            .field("out_size", &self.out_size)
            .field("lfsr_spec", &self.lfsr_spec)
            .field("iv", &"[REDACTED]")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Cut `len` plaintext bytes into segment sizes.
///
/// Greedy descent: emit the largest registered power of two that is strictly
/// smaller than what remains, halving the cap otherwise. A remainder below
/// the cap at the minimum size survives as a trailing non-power-of-two
/// entry. When the power-of-two list covers at least three minimum segments
/// but holds fewer than the required count (three, or two when a remainder
/// exists), the first oversized entry is halved in place and its half
/// appended until the count is met.
pub fn plan_sizes(len: u64) -> Vec<u32> {
    let min = u64::from(MIN_SIZE);

    let mut sizes: Vec<u32> = Vec::new();
    let mut remaining = len;
    let mut cap = u64::from(hc_lfsr::MAX_SIZE);

    while remaining > 0 && cap >= min {
        if remaining > cap {
            sizes.push(cap as u32);
            remaining -= cap;
            continue;
        }

        cap /= 2;
    }

    let mut min_count = 3usize;
    if remaining > 0 {
        min_count -= 1;
    }

    let covered = len - remaining;

    if covered >= min * min_count as u64 && sizes.len() < min_count {
        while sizes.len() < min_count {
            for i in 0..sizes.len() {
                if sizes[i] > MIN_SIZE {
                    sizes[i] /= 2;
                    let half = sizes[i];
                    sizes.push(half);
                    break;
                }
            }
        }
    }

    if remaining > 0 {
        sizes.push(remaining as u32);
    }

    sizes
}

/// Plan segments for `file_size` bytes and draw key material for each.
///
/// Emits `KeyCreationProgress` as the plan is walked. The returned list is
/// in final (shuffled) processing order.
pub fn build_keys(
    table: &PolyTable,
    file_size: u64,
    notify: &mut Notifier<'_>,
) -> HcResult<Vec<SegmentKey>> {
    let sizes = plan_sizes(file_size);

    let mut keys = Vec::with_capacity(sizes.len());
    let mut lfsr = Lfsr::new(table);
    let mut rng = rand::thread_rng();
    let mut planned = 0u64;

    for &in_size in &sizes {
        let percent = (planned as f64 * 100.0 / file_size as f64) as u8;
        notify.notify(ProgressEvent::KeyCreationProgress { percent })?;
        planned += u64::from(in_size);

        let out_size = in_size.max(MIN_SIZE);

        let mut attempts = 4u32;
        loop {
            match lfsr.reset(out_size, 0, -1) {
                Ok(()) => break,
                Err(err) => {
                    attempts -= 1;
                    if attempts == 0 {
                        warn!(%err, out_size, "lfsr reset failed after retries");
                        return Err(HcError::Internal);
                    }
                }
            }
        }

        let lfsr_spec = lfsr.spec();
        if lfsr_spec == 0 {
            warn!(out_size, "lfsr produced a null spec");
            return Err(HcError::Internal);
        }

        let mut iv = [0u8; 16];
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut iv);
        rng.fill_bytes(&mut key);

        keys.push(SegmentKey {
            in_size,
            out_size,
            lfsr_spec,
            iv,
            key,
        });
    }

    shuffle_keys(&mut keys, &mut rng);

    notify.notify(ProgressEvent::KeyCreationProgress { percent: 100 })?;

    Ok(keys)
}

/// Shuffle the segment list, swapping position `i - 1` with a uniform pick
/// from `[i, n - 1]` for `i` in `1..n - 1`.
///
/// The last position is never a swap origin and one- or two-entry lists are
/// left untouched. Existing descriptors were produced by exactly this loop,
/// so its bounds are part of the format.
fn shuffle_keys<R: Rng>(keys: &mut [SegmentKey], rng: &mut R) {
    if keys.is_empty() {
        return;
    }

    let last = keys.len() - 1;

    for i in 1..last {
        let j = rng.gen_range(i..=last);
        keys.swap(i - 1, j);
    }
}
