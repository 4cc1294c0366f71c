//! Concrete step implementations.
//!
//! Filesystem building blocks live in [`fs`], archive manipulation in
//! [`zip`], and opaque external tool launches in [`tool`].

pub mod fs;
pub mod tool;
pub mod zip;

pub use fs::{ConcatStep, CopyFileStep, MakeDirStep, RemoveFileStep, WriteFileStep};
pub use tool::{CommandStep, DexMetaStep, DexStep, XzStep, ZipScrubStep};
pub use zip::RepackZipStep;
