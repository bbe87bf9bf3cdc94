//! Code generation configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the target can do inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Hardware 32-bit signed divide with remainder.
    pub integer_divide: bool,
    /// Inline truncation of a double to int32.
    pub fp_truncate: bool,
    /// Double arithmetic and comparison.
    pub floating_point: bool,
}

impl Capabilities {
    /// Capabilities of the build target.
    pub fn host() -> Self {
        Self {
            integer_divide: cfg!(target_arch = "x86_64") || cfg!(target_arch = "x86"),
            fp_truncate: true,
            floating_point: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::host()
    }
}

/// Configuration of one compiler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    pub capabilities: Capabilities,
    /// Plant profiling counter increments in generated code.
    pub emit_profiling: bool,
    /// Trace shape selection for every instruction.
    pub trace: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::host(),
            emit_profiling: true,
            trace: false,
        }
    }
}

impl JitConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    ///
    /// ```toml
    /// emit_profiling = false
    ///
    /// [capabilities]
    /// integer_divide = false
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("failed to parse config: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }
}
