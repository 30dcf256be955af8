//! Code-generator configuration
//!
//! The backend leaves calls to a known set of C standard-library functions
//! as externs instead of stubbing them out. That allow-list is embedded
//! here and can be extended from a TOML manifest (`--externs-manifest` on
//! the codegen CLI):
//!
//! ```toml
//! externs = ["my_runtime_helper", "printVec"]
//! ```

use serde::Deserialize;

/// C standard-library functions the emitted assembly may call directly.
pub const DEFAULT_EXTERNS: &[&str] = &[
    "printf", "scanf", "malloc", "free", "fopen", "fclose", "fread", "fwrite", "read", "write",
    "atoi", "atol", "puts", "putchar", "gets", "getchar", "exit", "abort", "memcpy", "memset",
    "strlen", "strcmp", "fflush",
];

/// Manifest file shape.
#[derive(Debug, Clone, Deserialize)]
struct ExternsManifest {
    #[serde(default)]
    externs: Vec<String>,
}

/// Configuration consumed by the code generator.
#[derive(Debug, Clone)]
pub struct CodegenConfig {
    externs: Vec<String>,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            externs: DEFAULT_EXTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CodegenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the allow-list from a TOML manifest. Defaults are kept;
    /// duplicates are ignored.
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        let manifest: ExternsManifest = toml::from_str(toml_str)
            .map_err(|e| format!("Failed to parse externs manifest: {}", e))?;
        let mut config = Self::default();
        for name in manifest.externs {
            config = config.with_extern(&name);
        }
        Ok(config)
    }

    pub fn with_extern(mut self, name: &str) -> Self {
        if !self.externs.iter().any(|e| e == name) {
            self.externs.push(name.to_string());
        }
        self
    }

    /// Membership test against a base (unmangled) name.
    pub fn is_standard_extern(&self, base_name: &str) -> bool {
        self.externs.iter().any(|e| e == base_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_libc_set() {
        let config = CodegenConfig::default();
        for name in ["puts", "printf", "malloc", "fflush", "strcmp"] {
            assert!(config.is_standard_extern(name), "missing {}", name);
        }
        assert!(!config.is_standard_extern("nowhere"));
    }

    #[test]
    fn manifest_extends_without_replacing() {
        let config = CodegenConfig::from_toml("externs = [\"printVec\", \"puts\"]").unwrap();
        assert!(config.is_standard_extern("printVec"));
        assert!(config.is_standard_extern("puts"));
        assert!(config.is_standard_extern("malloc"));
    }

    #[test]
    fn bad_manifest_reports_error() {
        let err = CodegenConfig::from_toml("externs = 5").unwrap_err();
        assert!(err.contains("externs manifest"), "got: {}", err);
    }

    #[test]
    fn empty_manifest_is_fine() {
        let config = CodegenConfig::from_toml("").unwrap();
        assert!(config.is_standard_extern("exit"));
    }
}
