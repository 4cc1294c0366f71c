//! Shipped rule-type descriptions.
//!
//! Each description converts one declared rule type into concrete rules.
//! External plugins register additional descriptions on the same registry
//! at startup.

mod android_binary;
mod prebuilt_jar;
mod python_binary;
mod python_library;

pub use android_binary::{AndroidBinaryDescription, AndroidBinaryRule};
pub use prebuilt_jar::{PrebuiltJarDescription, PrebuiltJarRule};
pub use python_binary::{PythonBinaryDescription, PythonBinaryRule};
pub use python_library::{PythonLibraryDescription, PythonLibraryRule};
pub use python_test::{PythonTestDescription, PythonTestRule, TestModulesRule};

use anyhow::Result;

use crate::description::DescriptionRegistry;

/// A registry with every shipped description installed.
pub fn default_registry() -> Result<DescriptionRegistry> {
    let mut registry = DescriptionRegistry::new();
    registry.register(PythonLibraryDescription)?;
    registry.register(PythonBinaryDescription)?;
    registry.register(PythonTestDescription)?;
    registry.register(PrebuiltJarDescription)?;
    registry.register(AndroidBinaryDescription)?;
    Ok(registry)
}
