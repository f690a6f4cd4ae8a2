//! Maximal-length Galois LFSR permutation source.
//!
//! An LFSR over `b` bits with a primitive feedback polynomial cycles through
//! every nonzero `b`-bit value exactly once before returning to its seed.
//! HyperCrypt uses that cycle as a byte-position permutation of
//! `[1, 2^b - 1]`: one LFSR step per emitted index, zero never emitted.
//!
//! Each shipped polynomial literal registers two usable variants: the
//! right-shifted mask and the bit-reversal of the literal within the `b`-bit
//! window, interleaved in that order. The registered masks are part of the
//! key-descriptor wire format.

mod table;

use rand::Rng;
use thiserror::Error;

use table::POLY_LITERALS;

pub const MIN_BITS: u32 = 15;
pub const MAX_BITS: u32 = 28;

/// Smallest supported permutation size, `2^15` = 32 KiB.
pub const MIN_SIZE: u32 = 1 << MIN_BITS;
/// Largest supported permutation size, `2^28` = 256 MiB.
pub const MAX_SIZE: u32 = 1 << MAX_BITS;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LfsrError {
    #[error("size {0} is not a registered power of two")]
    UnsupportedSize(u32),

    #[error("spec has a zero seed or polynomial")]
    BadSpec,

    #[error("polynomial {poly:#010x} does not generate a full period over {bits} bits")]
    NotMaximal { poly: u32, bits: u32 },

    #[error("sequence reached the zero state")]
    Degenerate,
}

/// One Galois step, shifting right.
#[inline]
fn step(state: u32, poly: u32) -> u32 {
    if state & 1 == 1 {
        (state >> 1) ^ poly
    } else {
        state >> 1
    }
}

/// Walk the cycle from `seed` and confirm it visits every value in
/// `[1, 2^bits - 1]` exactly once. Slot 0 is set by hand since a well-formed
/// sequence never produces it.
fn verify_poly(poly: u32, bits: u32, seed: u32) -> bool {
    let mask = (1u32 << bits) - 1;
    let seed = seed & mask;

    let words = (1usize << bits) / 64;
    let mut seen = vec![0u64; words];

    let mut state = seed;
    let mut period = 0u32;

    loop {
        if state > mask {
            break;
        }

        seen[(state >> 6) as usize] |= 1u64 << (state & 63);

        state = step(state, poly);
        period += 1;

        if state == seed || period >= mask {
            break;
        }
    }

    seen[0] |= 1;

    seen.iter().all(|&w| w == u64::MAX)
}

/// Registry of usable polynomial variants per register width.
///
/// Built once, up front, and shared by reference with every [`Lfsr`]; there
/// is no process-wide state.
#[derive(Debug, Clone)]
pub struct PolyTable {
    variants: Vec<Vec<u32>>,
}

impl PolyTable {
    pub fn new() -> Self {
        let mut variants = Vec::with_capacity(POLY_LITERALS.len());

        for (row, literals) in POLY_LITERALS.iter().enumerate() {
            let bits = MIN_BITS + row as u32;
            let mut entry = Vec::with_capacity(literals.len() * 2);

            for &m in *literals {
                entry.push(m >> 1);
                entry.push(reflect(m, bits));
            }

            variants.push(entry);
        }

        Self { variants }
    }

    /// Registered variants for a width, empty when the width is out of range.
    pub fn variants(&self, bits: u32) -> &[u32] {
        bits.checked_sub(MIN_BITS)
            .and_then(|i| self.variants.get(i as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for PolyTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit-reversal of `m` within the low `bits` bits.
fn reflect(m: u32, bits: u32) -> u32 {
    let mut p = 0u32;
    for j in 0..bits {
        p <<= 1;
        p |= (m >> j) & 1;
    }
    p
}

/// A positioned LFSR: a (polynomial, seed) pair plus the current state.
#[derive(Debug)]
pub struct Lfsr<'t> {
    table: &'t PolyTable,
    state: u32,
    seed: u32,
    poly: u32,
}

impl<'t> Lfsr<'t> {
    pub fn new(table: &'t PolyTable) -> Self {
        Self {
            table,
            state: 0,
            seed: 0,
            poly: 0,
        }
    }

    /// Re-key the generator for a permutation of `[1, size - 1]`.
    ///
    /// `size` must be `2^b` for a registered `b`. A negative `variant` picks
    /// a registered variant uniformly at random, otherwise
    /// `variant % variant_count` is used. A zero `seed` is drawn uniformly
    /// from `[1, size - 1]`. The chosen pair is full-period verified before
    /// it is stored.
    pub fn reset(&mut self, size: u32, seed: u32, variant: i32) -> Result<(), LfsrError> {
        self.poly = 0;

        let bits = (MIN_BITS..=MAX_BITS)
            .find(|&b| 1u32 << b == size)
            .ok_or(LfsrError::UnsupportedSize(size))?;

        let variants = self.table.variants(bits);
        let mut rng = rand::thread_rng();

        let index = if variant < 0 {
            rng.gen_range(0..variants.len())
        } else {
            variant as usize % variants.len()
        };

        let mask = (1u32 << bits) - 1;
        let mut seed = seed;
        while seed == 0 {
            seed = rng.gen_range(1..=mask);
        }
        seed &= mask;

        let poly = variants[index];

        if !verify_poly(poly, bits, seed) {
            return Err(LfsrError::NotMaximal { poly, bits });
        }

        self.poly = poly;
        self.seed = seed;
        self.state = seed;

        Ok(())
    }

    /// Pack the active (seed, polynomial) pair: seed in the low 32 bits,
    /// polynomial in the high 32. Returns 0 while the generator is unset.
    pub fn spec(&self) -> u64 {
        if self.seed == 0 || self.poly == 0 {
            return 0;
        }

        (u64::from(self.poly) << 32) | u64::from(self.seed)
    }

    /// Load a packed (seed, polynomial) pair and rewind to the seed.
    ///
    /// The polynomial is not re-verified; [`fill_next`](Self::fill_next)
    /// catches a non-maximal pair the moment it collapses to zero.
    pub fn set_spec(&mut self, spec: u64) -> Result<(), LfsrError> {
        let seed = spec as u32;
        let poly = (spec >> 32) as u32;

        if seed == 0 || poly == 0 {
            return Err(LfsrError::BadSpec);
        }

        self.seed = seed;
        self.poly = poly;
        self.state = seed;

        Ok(())
    }

    /// Advance one step and return the new state. Returns 0 while unset.
    pub fn next(&mut self) -> u32 {
        if self.poly == 0 {
            return 0;
        }

        self.state = step(self.state, self.poly);
        self.state
    }

    /// Fill `buf` with the next `buf.len()` sequence values, failing the
    /// first time the state collapses to zero.
    pub fn fill_next(&mut self, buf: &mut [u32]) -> Result<(), LfsrError> {
        for slot in buf.iter_mut() {
            self.state = step(self.state, self.poly);
            *slot = self.state;

            if self.state == 0 {
                return Err(LfsrError::Degenerate);
            }
        }

        Ok(())
    }
}
