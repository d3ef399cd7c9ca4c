//! Cadenza Media
//!
//! Concrete media backends for the Cadenza pipeline:
//! - [`FileSource`]: Symphonia-backed streaming decode with accurate
//!   seeking and lofty-backed tag persistence
//! - [`LinearConverter`]: stateless channel remix and linear resample

#![forbid(unsafe_code)]

pub mod convert;
pub mod error;
pub mod source;

pub use convert::LinearConverter;
pub use error::{MediaError, Result};
pub use source::FileSource;
