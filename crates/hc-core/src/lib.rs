pub mod error;
pub mod progress;

pub use error::{HcError, HcResult};
pub use progress::{ProgressEvent, ProgressFn};
