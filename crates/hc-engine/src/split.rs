//! Splitting ciphertext across output files and joining it back.
//!
//! The codec sees one logical byte stream; these adapters map it onto 1..16
//! real files. Split boundaries land on 256-byte multiples and never align
//! with segment boundaries on purpose.

use std::fs::File;
use std::io::{self, Read, Write};

/// Per-file byte budgets for `total` ciphertext bytes over `splits` files
/// (0 meaning a single file).
///
/// Every file but the last gets `total / splits` rounded up to the next
/// 256-byte boundary; the last absorbs the under-run.
pub fn plan_split(total: u64, splits: u32) -> Vec<u64> {
    if splits == 0 {
        return vec![total];
    }

    let mut chunk = total / u64::from(splits);
    if chunk & 0xFF != 0 {
        chunk = (chunk & !0xFF) + 0x100;
    }

    let mut sizes = Vec::with_capacity(splits as usize);
    let mut remaining = total;

    for _ in 0..splits {
        let take = remaining.min(chunk);
        sizes.push(take);
        remaining -= take;
    }

    sizes
}

struct SplitSlot {
    file: Option<File>,
    remaining: u64,
}

/// Writes a logical stream across reserved-size output files, closing each
/// file the moment its reservation is exhausted.
pub struct SplitWriter {
    slots: Vec<SplitSlot>,
    index: usize,
}

impl SplitWriter {
    /// `files` pairs an open output file with its reserved byte count.
    pub fn new(files: Vec<(File, u64)>) -> Self {
        let slots = files
            .into_iter()
            .map(|(file, remaining)| SplitSlot {
                file: Some(file),
                remaining,
            })
            .collect();

        Self { slots, index: 0 }
    }
}

impl Write for SplitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0usize;

        while written < buf.len() {
            let slot = self.slots.get_mut(self.index).ok_or_else(|| {
                io::Error::new(io::ErrorKind::WriteZero, "all output files exhausted")
            })?;

            if slot.remaining == 0 {
                slot.file = None;
                self.index += 1;
                continue;
            }

            let file = slot
                .file
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output file closed"))?;

            let take = ((buf.len() - written) as u64).min(slot.remaining) as usize;
            file.write_all(&buf[written..written + take])?;

            slot.remaining -= take as u64;
            written += take;

            if slot.remaining == 0 {
                slot.file = None;
                self.index += 1;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for slot in &mut self.slots {
            if let Some(file) = slot.file.as_mut() {
                file.flush()?;
            }
        }

        Ok(())
    }
}

/// Reads a logical stream out of consecutive input files, advancing to the
/// next file whenever the current one runs dry.
pub struct JoinReader {
    files: Vec<File>,
    index: usize,
}

impl JoinReader {
    pub fn new(files: Vec<File>) -> Self {
        Self { files, index: 0 }
    }
}

impl Read for JoinReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.index < self.files.len() {
            let n = self.files[self.index].read(buf)?;
            if n > 0 {
                return Ok(n);
            }

            self.index += 1;
        }

        Ok(0)
    }
}
