//! Progress notifications pushed by the engine during encrypt/decrypt.
//!
//! The engine reports two granularities: overall progress (cumulative over
//! the whole file) and per-section progress (within one segment). Percent
//! values are whole numbers in `0..=100`.

/// One progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    KeyCreationStart,
    KeyCreationProgress { percent: u8 },
    KeyCreationEnd,

    EncryptStart,
    EncryptProgress { percent: u8 },
    EncryptEnd,
    EncryptSectionStart,
    EncryptSectionProgress { percent: u8 },
    EncryptSectionEnd,

    DecryptStart,
    DecryptProgress { percent: u8 },
    DecryptEnd,
    DecryptSectionStart,
    DecryptSectionProgress { percent: u8 },
    DecryptSectionEnd,
}

/// Progress callback. Returning an `Err` cancels the running operation:
/// the engine aborts, cleans up its temp files, and surfaces
/// [`HcError::CallbackException`](crate::HcError::CallbackException).
pub type ProgressFn = Box<dyn FnMut(ProgressEvent) -> anyhow::Result<()> + Send>;
