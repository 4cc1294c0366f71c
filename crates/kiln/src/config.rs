//! Configuration file handling for kiln.
//!
//! Configuration is read from `.kiln.toml` with defaults for every field, so
//! a missing file is a valid (if spartan) configuration. Sections cover the
//! external tool programs, the dexing knobs, and the cell roots.
//!
//! # Example
//!
//! ```
//! use kiln::config::{Config, load_config};
//! use std::path::Path;
//!
//! // Load config from a directory (looks for .kiln.toml)
//! let config = load_config(Path::new(".")).expect("load config");
//! assert_eq!(config.xz_program(), "xz");
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".kiln.toml";

/// Get the config file path for a directory.
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete kiln configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// External tool programs.
    #[serde(default)]
    tools: ToolsConfig,
    /// Dexing and compression knobs.
    #[serde(default)]
    dex: DexConfig,
    /// Cell name → root path.
    #[serde(default)]
    cells: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ToolsConfig {
    dexer: Option<String>,
    xz: Option<String>,
    zip_scrubber: Option<String>,
    dex_analyzer: Option<String>,
    pex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DexConfig {
    threads: Option<usize>,
    xz_compression_level: u32,
    max_heap: Option<String>,
    min_sdk_version: Option<u32>,
    no_desugar: bool,
}

impl Default for DexConfig {
    fn default() -> Self {
        Self {
            threads: None,
            xz_compression_level: 4,
            max_heap: None,
            min_sdk_version: None,
            no_desugar: false,
        }
    }
}

impl Config {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dexer program.
    pub fn dexer_program(&self) -> &str {
        self.tools.dexer.as_deref().unwrap_or("d8")
    }

    /// The xz compressor program.
    pub fn xz_program(&self) -> &str {
        self.tools.xz.as_deref().unwrap_or("xz")
    }

    /// The zip scrubber program (normalizes archive metadata).
    pub fn zip_scrubber_program(&self) -> &str {
        self.tools.zip_scrubber.as_deref().unwrap_or("zipscrub")
    }

    /// The dex analyzer program (emits `.meta` files).
    pub fn dex_analyzer_program(&self) -> &str {
        self.tools.dex_analyzer.as_deref().unwrap_or("dexmeta")
    }

    /// The PEX linker program.
    pub fn pex_program(&self) -> &str {
        self.tools.pex.as_deref().unwrap_or("pex")
    }

    /// Configured dexing thread budget, if any.
    pub fn dex_threads(&self) -> Option<usize> {
        self.dex.threads
    }

    /// xz compression level for dex jars.
    pub fn xz_compression_level(&self) -> u32 {
        self.dex.xz_compression_level
    }

    /// Maximum dexer heap, e.g. `"2g"`.
    pub fn max_heap(&self) -> Option<&str> {
        self.dex.max_heap.as_deref()
    }

    /// Minimum platform version passed to the dexer.
    pub fn min_sdk_version(&self) -> Option<u32> {
        self.dex.min_sdk_version
    }

    /// Whether desugaring is disabled.
    pub fn no_desugar(&self) -> bool {
        self.dex.no_desugar
    }

    /// Root path of a named cell, if configured.
    pub fn cell_root(&self, name: &str) -> Option<&Path> {
        self.cells.get(name).map(PathBuf::as_path)
    }

    /// All configured cells, name → root.
    pub fn cells(&self) -> &BTreeMap<String, PathBuf> {
        &self.cells
    }

    /// Merge another config over this one; fields set in `other` win.
    pub fn merge(&self, other: &Config) -> Config {
        let mut merged = self.clone();
        if other.tools.dexer.is_some() {
            merged.tools.dexer = other.tools.dexer.clone();
        }
        if other.tools.xz.is_some() {
            merged.tools.xz = other.tools.xz.clone();
        }
        if other.tools.zip_scrubber.is_some() {
            merged.tools.zip_scrubber = other.tools.zip_scrubber.clone();
        }
        if other.tools.dex_analyzer.is_some() {
            merged.tools.dex_analyzer = other.tools.dex_analyzer.clone();
        }
        if other.tools.pex.is_some() {
            merged.tools.pex = other.tools.pex.clone();
        }
        if other.dex.threads.is_some() {
            merged.dex.threads = other.dex.threads;
        }
        if other.dex.xz_compression_level != DexConfig::default().xz_compression_level {
            merged.dex.xz_compression_level = other.dex.xz_compression_level;
        }
        if other.dex.max_heap.is_some() {
            merged.dex.max_heap = other.dex.max_heap.clone();
        }
        if other.dex.min_sdk_version.is_some() {
            merged.dex.min_sdk_version = other.dex.min_sdk_version;
        }
        if other.dex.no_desugar {
            merged.dex.no_desugar = true;
        }
        for (name, root) in &other.cells {
            merged.cells.insert(name.clone(), root.clone());
        }
        merged
    }
}

/// Load configuration from a directory; defaults when no file is present.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Find the nearest config file, walking up from `start`.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = config_path(d);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_file() {
        let td = tempdir().expect("tempdir");
        let config = load_config(td.path()).expect("load");
        assert_eq!(config.dexer_program(), "d8");
        assert_eq!(config.xz_program(), "xz");
        assert_eq!(config.xz_compression_level(), 4);
        assert_eq!(config.dex_threads(), None);
        assert!(!config.no_desugar());
    }

    #[test]
    fn full_config_parses() {
        let td = tempdir().expect("tempdir");
        let content = r#"
[tools]
dexer = "/opt/android/d8"
xz = "/usr/bin/xz"

[dex]
threads = 6
xz_compression_level = 9
max_heap = "4g"
min_sdk_version = 21
no_desugar = true

[cells]
toolchain = "/srv/toolchain"
"#;
        std::fs::write(config_path(td.path()), content).expect("write");

        let config = load_config(td.path()).expect("load");
        assert_eq!(config.dexer_program(), "/opt/android/d8");
        assert_eq!(config.dex_threads(), Some(6));
        assert_eq!(config.xz_compression_level(), 9);
        assert_eq!(config.max_heap(), Some("4g"));
        assert_eq!(config.min_sdk_version(), Some(21));
        assert!(config.no_desugar());
        assert_eq!(
            config.cell_root("toolchain"),
            Some(Path::new("/srv/toolchain"))
        );
        assert_eq!(config.cell_root("missing"), None);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let td = tempdir().expect("tempdir");
        std::fs::write(config_path(td.path()), "[dex]\nthreads = 2\n").expect("write");

        let config = load_config(td.path()).expect("load");
        assert_eq!(config.dex_threads(), Some(2));
        assert_eq!(config.dexer_program(), "d8"); // default
        assert_eq!(config.xz_compression_level(), 4); // default
    }

    #[test]
    fn merge_configs() {
        let td = tempdir().expect("tempdir");
        std::fs::write(config_path(td.path()), "[tools]\ndexer = 'dx'\n").expect("write");
        let base = load_config(td.path()).expect("load");

        let td2 = tempdir().expect("tempdir");
        std::fs::write(
            config_path(td2.path()),
            "[tools]\ndexer = 'd8-override'\n[dex]\nthreads = 8\n",
        )
        .expect("write");
        let over = load_config(td2.path()).expect("load");

        let merged = base.merge(&over);
        assert_eq!(merged.dexer_program(), "d8-override");
        assert_eq!(merged.dex_threads(), Some(8));
    }

    #[test]
    fn find_config_walks_up() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).expect("create dirs");
        std::fs::write(config_path(td.path()), "[dex]\nthreads = 1\n").expect("write");

        let found = find_config(&nested).expect("found");
        assert_eq!(found, config_path(td.path()));
    }

    #[test]
    fn find_config_returns_none_if_not_found() {
        let td = tempdir().expect("tempdir");
        assert!(find_config(td.path()).is_none());
    }

    #[test]
    fn rejects_malformed_file() {
        let td = tempdir().expect("tempdir");
        std::fs::write(config_path(td.path()), "[dex\nthreads = ").expect("write");
        assert!(load_config(td.path()).is_err());
    }
}
