//! Configuration system
//!
//! Every knob the backend and the job layer read lives in [`EngineConfig`].
//! Files are TOML or RON, chosen by extension; every field has a default so a
//! partial file is enough.

pub use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gpu::FenceWait;
use crate::jobs::{AnimationDefaults, AnimationLimits};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            Some("ron") => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?,
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Render target size
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Render target width in pixels
    pub width: u32,
    /// Render target height in pixels
    pub height: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { width: 1024, height: 1024 }
    }
}

/// Shader search locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding precompiled `<name>.<stage>.spv` files
    pub shaders: Option<PathBuf>,
    /// Root that `#include` directives resolve against
    pub shader_include: Option<PathBuf>,
}

/// Validation layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanDebugConfig {
    /// Enable `VK_LAYER_KHRONOS_validation` and the debug messenger
    pub validation: bool,
    /// Raw `VkDebugUtilsMessageSeverityFlagsEXT` bits to report
    pub severity: u32,
    /// Raw `VkDebugUtilsMessageTypeFlagsEXT` bits to report
    pub message_type: u32,
}

impl Default for VulkanDebugConfig {
    fn default() -> Self {
        Self {
            validation: false,
            // VERBOSE | INFO | WARNING | ERROR
            severity: 0x0001 | 0x0010 | 0x0100 | 0x1000,
            // VALIDATION
            message_type: 0x0002,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Vulkan validation settings
    pub vulkan: VulkanDebugConfig,
}

/// Device-level behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Upper bound for render/compute fence waits; `None` waits forever
    pub fence_timeout_ms: Option<u64>,
}

impl GpuConfig {
    /// Fence wait policy derived from `fence_timeout_ms`
    pub fn fence_wait(&self) -> FenceWait {
        self.fence_timeout_ms
            .map_or(FenceWait::Unbounded, |ms| FenceWait::Timeout(Duration::from_millis(ms)))
    }
}

/// Default mesh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Quads per side of the default grid
    pub subdivisions: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { subdivisions: 64 }
    }
}

/// Animation time range defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRangeConfig {
    /// Uniform time of the first frame
    pub start: f32,
    /// Uniform time one frame past the last frame
    pub end: f32,
}

impl Default for TimeRangeConfig {
    fn default() -> Self {
        Self { start: 0.0, end: 1.0 }
    }
}

/// Animation defaults applied when a request leaves a field empty
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoDefaultsConfig {
    /// Frame count
    pub frames: u32,
    /// Frames per second
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate: u64,
    /// Time range
    pub time: TimeRangeConfig,
}

impl Default for VideoDefaultsConfig {
    fn default() -> Self {
        Self {
            frames: 60,
            fps: 30,
            bitrate: 400_000,
            time: TimeRangeConfig::default(),
        }
    }
}

/// Animation ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMaxConfig {
    /// Maximum frame count
    pub frames: u32,
    /// Maximum bitrate in bits per second
    pub bitrate: u64,
}

impl Default for VideoMaxConfig {
    fn default() -> Self {
        Self { frames: 300, bitrate: 2_000_000 }
    }
}

/// Progress reporting during animations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Emit progress reports at all
    pub enable: bool,
    /// Minimum delay between two reports
    pub delay_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { enable: true, delay_ms: 1000 }
    }
}

impl ProgressConfig {
    /// Report interval, `None` when reporting is off
    pub fn interval(&self) -> Option<Duration> {
        self.enable.then(|| Duration::from_millis(self.delay_ms))
    }
}

/// Animation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Defaults for unspecified request fields
    pub default: VideoDefaultsConfig,
    /// Ceilings for request fields
    pub max: VideoMaxConfig,
    /// Progress reporting
    pub progress: ProgressConfig,
}

impl VideoConfig {
    /// Defaults as consumed by the job layer
    pub fn defaults(&self) -> AnimationDefaults {
        AnimationDefaults {
            frames: self.default.frames,
            fps: self.default.fps,
            start: self.default.time.start,
            end: self.default.time.end,
            bitrate: self.default.bitrate,
        }
    }

    /// Limits as consumed by the job layer
    pub fn limits(&self) -> AnimationLimits {
        AnimationLimits {
            max_frames: self.max.frames,
            max_bitrate: self.max.bitrate,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Render target size
    pub image: ImageConfig,
    /// Shader search locations
    pub paths: PathsConfig,
    /// Debug settings
    pub debug: DebugConfig,
    /// Device behaviour
    pub gpu: GpuConfig,
    /// Default mesh
    pub grid: GridConfig,
    /// Animation settings
    pub video: VideoConfig,
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Directory for precompiled shaders, `./shaders` when unset
    pub fn shaders_dir(&self) -> PathBuf {
        self.paths.shaders.clone().unwrap_or_else(|| PathBuf::from("shaders"))
    }

    /// Include root, falling back to the shaders directory
    pub fn include_dir(&self) -> PathBuf {
        self.paths.shader_include.clone().unwrap_or_else(|| self.shaders_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let config = EngineConfig::default();
        assert_eq!(config.image.width, 1024);
        assert_eq!(config.image.height, 1024);
        assert!(!config.debug.vulkan.validation);
        assert_eq!(config.gpu.fence_wait(), FenceWait::Unbounded);
        assert_eq!(config.grid.subdivisions, 64);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
[image]
width = 256

[video.max]
frames = 10
"#,
        )
        .unwrap();

        assert_eq!(config.image.width, 256);
        assert_eq!(config.image.height, 1024);
        assert_eq!(config.video.max.frames, 10);
        assert_eq!(config.video.max.bitrate, VideoMaxConfig::default().bitrate);
    }

    #[test]
    fn test_fence_timeout_maps_to_policy() {
        let gpu = GpuConfig { fence_timeout_ms: Some(250) };
        assert_eq!(gpu.fence_wait(), FenceWait::Timeout(Duration::from_millis(250)));
    }

    #[test]
    fn test_progress_interval() {
        let mut progress = ProgressConfig::default();
        assert_eq!(progress.interval(), Some(Duration::from_secs(1)));
        progress.enable = false;
        assert_eq!(progress.interval(), None);
    }

    #[test]
    fn test_include_dir_falls_back_to_shaders_dir() {
        let mut config = EngineConfig::default();
        config.paths.shaders = Some(PathBuf::from("/opt/shaders"));
        assert_eq!(config.include_dir(), PathBuf::from("/opt/shaders"));

        config.paths.shader_include = Some(PathBuf::from("/opt/include"));
        assert_eq!(config.include_dir(), PathBuf::from("/opt/include"));
    }

    #[test]
    fn test_load_and_save_round_trip_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.image.width = 320;
        config.gpu.fence_timeout_ms = Some(5000);
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.image.width, 320);
        assert_eq!(loaded.gpu.fence_timeout_ms, Some(5000));
    }

    #[test]
    fn test_load_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        std::fs::write(&path, "(image: (width: 64, height: 32))").unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.image.width, 64);
        assert_eq!(loaded.image.height, 32);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{}").unwrap();

        assert!(matches!(
            EngineConfig::load_from_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
