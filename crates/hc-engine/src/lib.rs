//! hc-engine: the HyperCrypt encryption engine.
//!
//! Pipeline, per file:
//!
//! ```text
//! plaintext → power-of-two segment plan (fresh AES-256 key + IV + LFSR spec
//! per segment, list order shuffled) → per segment: AES-256-CBC over 256-byte
//! chunks, bytes scattered through the segment by an LFSR permutation →
//! ciphertext split across 1..16 output files → key descriptor written last
//! ```
//!
//! Decryption reverses the pipeline by replaying the descriptor's segment
//! list in order. All file outputs go through temp-then-rename so an aborted
//! run leaves nothing behind.

pub mod codec;
pub mod engine;
pub mod keyfile;
pub mod plan;
pub mod split;

pub use engine::HcEngine;
pub use keyfile::KeyDescriptor;
pub use plan::SegmentKey;

/// AES-CBC unit: segments are processed in chunks of this many bytes, and
/// split boundaries land on multiples of it.
pub const CHUNK_SIZE: usize = 256;

/// Descriptor format version, rendered as 8 uppercase hex digits.
pub const KEY_VERSION: u32 = 0x0001_0000;

/// Crypto scheme tag written into every descriptor segment.
pub const CRYPTO_SCHEME: &str = "AES-256";
