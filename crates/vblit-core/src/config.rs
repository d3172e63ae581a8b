use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::VblitResult;

/// Whether to render straight into YUV images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum YuvTargetMode {
    /// Use it when the driver advertises the extension.
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl YuvTargetMode {
    pub fn resolve(self, advertised: bool) -> bool {
        match self {
            YuvTargetMode::Auto => advertised,
            YuvTargetMode::Enabled => true,
            YuvTargetMode::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Skip the platform query and use this row alignment.
    pub alignment_override: Option<u32>,
    /// Used when the platform query fails.
    pub default_alignment: u32,
    pub yuv_target: YuvTargetMode,
    pub adreno_library: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            alignment_override: None,
            default_alignment: 128,
            yuv_target: YuvTargetMode::Auto,
            adreno_library: "libadreno_utils.so".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for a fence wait; unbounded when absent.
    pub fence_timeout_ms: Option<u64>,
}

impl SyncConfig {
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub egl_library: String,
    pub gles_library: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            egl_library: "libEGL.so.1".to_string(),
            gles_library: "libGLESv2.so.2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> VblitResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> VblitResult<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> VblitResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
