use thiserror::Error;

pub type HcResult<T> = Result<T, HcError>;

/// Public error categories of the HyperCrypt engine.
///
/// The variants are the API contract: callers (and tests) match on them.
/// Internal conditions — a bad LFSR spec, a degenerate fill, an unexpected
/// EOF mid-segment — are logged at the site and collapse to [`Internal`]
/// before crossing this boundary.
///
/// [`Internal`]: HcError::Internal
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HcError {
    #[error("invalid input file")]
    InvalidInputFile,

    #[error("cannot open input file")]
    CannotOpenInputFile,

    #[error("cannot read input file")]
    CannotReadInputFile,

    #[error("bad input file name")]
    BadInputFileName,

    /// The output file set cannot take more data (all reservations
    /// exhausted mid-segment).
    #[error("invalid output file")]
    InvalidOutputFile,

    #[error("cannot create output file")]
    CannotCreateOutputFile,

    #[error("cannot write output file")]
    CannotWriteOutputFile,

    /// The key file path given for writing is unusable (empty).
    #[error("invalid key file")]
    InvalidKeyFile,

    #[error("cannot open key file")]
    CannotOpenKeyFile,

    #[error("cannot create key file")]
    CannotCreateKeyFile,

    #[error("cannot read key file")]
    CannotReadKeyFile,

    #[error("cannot write key file")]
    CannotWriteKeyFile,

    #[error("bad key")]
    BadKey,

    #[error("bad key file name")]
    BadKeyFileName,

    #[error("progress callback failed")]
    CallbackException,

    #[error("block size too big")]
    BlockSizeTooBig,

    #[error("output file already exists")]
    OutputFileAlreadyExists,

    #[error("key file already exists")]
    KeyFileAlreadyExists,

    #[error("internal error")]
    Internal,
}
