use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level vkprime configuration, loaded from vkprime.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VkprimeConfig {
    #[serde(default)]
    pub primer: PrimerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Sizing knobs of the image primer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimerConfig {
    /// Staging image memory is the image's requirement times this factor
    #[serde(default = "default_staging_memory_factor")]
    pub staging_memory_factor: u64,
    /// Lower bound of every staging image allocation, in bytes
    #[serde(default = "default_min_staging_allocation")]
    pub min_staging_allocation: u64,
    /// Largest scratch buffer one copy batch may use, in bytes
    #[serde(default = "default_scratch_buffer_size")]
    pub scratch_buffer_size: u64,
    /// Batch offsets are rounded up to this before the size check
    #[serde(default = "default_scratch_buffer_alignment")]
    pub scratch_buffer_alignment: u64,
    /// Per-axis dispatch limit for image store jobs
    #[serde(default = "default_max_compute_group_count")]
    pub max_compute_group_count: [u32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// LZ4-compress large stream records
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Name recorded in the stream header
    #[serde(default = "default_producer")]
    pub producer: String,
}

impl Default for PrimerConfig {
    fn default() -> Self {
        Self {
            staging_memory_factor: default_staging_memory_factor(),
            min_staging_allocation: default_min_staging_allocation(),
            scratch_buffer_size: default_scratch_buffer_size(),
            scratch_buffer_alignment: default_scratch_buffer_alignment(),
            max_compute_group_count: default_max_compute_group_count(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            compress: true,
            producer: default_producer(),
        }
    }
}

impl PrimerConfig {
    /// Reject values the primer cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.staging_memory_factor == 0 {
            return Err(CoreError::ConfigError(
                "primer.staging_memory_factor must be at least 1".to_string(),
            ));
        }
        if !self.scratch_buffer_alignment.is_power_of_two() {
            return Err(CoreError::ConfigError(format!(
                "primer.scratch_buffer_alignment must be a power of two, got {}",
                self.scratch_buffer_alignment
            )));
        }
        if self.scratch_buffer_size < self.scratch_buffer_alignment {
            return Err(CoreError::ConfigError(format!(
                "primer.scratch_buffer_size ({}) is smaller than its alignment ({})",
                self.scratch_buffer_size, self.scratch_buffer_alignment
            )));
        }
        if self.max_compute_group_count.contains(&0) {
            return Err(CoreError::ConfigError(
                "primer.max_compute_group_count entries must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl VkprimeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: VkprimeConfig = toml::from_str(&content)?;
        config.primer.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring {}: {}", path, e);
                Self::default()
            }
        }
    }
}

/// Returns the default config file path.
/// Search order:
/// 1. System-wide config: `/etc/vkprime/vkprime.toml`
/// 2. Local fallback: `./vkprime.toml`
pub fn default_config_path() -> String {
    let system_path = "/etc/vkprime/vkprime.toml";
    if std::path::Path::new(system_path).exists() {
        return system_path.to_string();
    }
    "vkprime.toml".to_string()
}

fn default_staging_memory_factor() -> u64 {
    2
}

fn default_min_staging_allocation() -> u64 {
    256 * 1024
}

fn default_scratch_buffer_size() -> u64 {
    64 * 1024 * 1024
}

fn default_scratch_buffer_alignment() -> u64 {
    256
}

fn default_max_compute_group_count() -> [u32; 3] {
    [65536, 65536, 65536]
}

fn default_true() -> bool {
    true
}

fn default_producer() -> String {
    "vkprime".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: VkprimeConfig = toml::from_str(
            r#"
[primer]
scratch_buffer_size = 4096
"#,
        )
        .expect("parse");
        assert_eq!(config.primer.scratch_buffer_size, 4096);
        assert_eq!(config.primer.staging_memory_factor, 2);
        assert_eq!(config.primer.min_staging_allocation, 256 * 1024);
        assert_eq!(config.primer.max_compute_group_count, [65536; 3]);
        assert!(config.output.compress);
        config.primer.validate().expect("valid");
    }

    #[test]
    fn test_validate_rejects_bad_alignment() {
        let config = PrimerConfig {
            scratch_buffer_alignment: 100,
            ..PrimerConfig::default()
        };
        match config.validate() {
            Err(CoreError::ConfigError(msg)) => assert!(msg.contains("power of two")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = VkprimeConfig::load_or_default("/nonexistent/vkprime.toml");
        assert_eq!(config.primer.scratch_buffer_alignment, 256);
        assert_eq!(config.output.producer, "vkprime");
    }
}
