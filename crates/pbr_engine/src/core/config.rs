//! # Demo Configuration
//!
//! Every tunable of the demo in one serializable tree: window, renderer,
//! image-based lighting sizes, camera, text overlay and asset paths.
//! Sections default individually, so a config file only needs the keys it
//! changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::config::{Config, ConfigError};
use crate::render::vulkan::allocator::mip_level_count;
use crate::render::vulkan::ShaderPair;

/// Window creation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Initial client width in pixels
    pub width: u32,
    /// Initial client height in pixels
    pub height: u32,
    /// Window title
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "PBR Demo".to_string(),
        }
    }
}

/// Descriptor pool capacity of every render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Uniform-buffer descriptors
    pub uniform_buffers: u32,
    /// Combined image/sampler descriptors
    pub combined_image_samplers: u32,
    /// Descriptor sets
    pub max_sets: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            uniform_buffers: 1024,
            combined_image_samplers: 1024,
            max_sets: 1024,
        }
    }
}

/// # Vulkan Renderer Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Requested MSAA sample count, clamped to what the device supports
    pub msaa_samples: u32,
    /// Descriptor pool capacity
    pub descriptor_pool: DescriptorPoolConfig,
    /// Whether to enable Vulkan validation layers (debug builds only)
    pub validation: bool,
}

impl RendererConfig {
    /// Set the requested sample count
    pub fn with_msaa_samples(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }
        if !self.msaa_samples.is_power_of_two() || self.msaa_samples > 64 {
            return Err(ConfigError::Invalid(format!(
                "msaa_samples must be a power of two up to 64, got {}",
                self.msaa_samples
            )));
        }
        let pool = &self.descriptor_pool;
        if pool.max_sets == 0 || pool.uniform_buffers == 0 || pool.combined_image_samplers == 0 {
            return Err(ConfigError::Invalid("descriptor pool capacity cannot be zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "PBR Demo".to_string(),
            msaa_samples: 8,
            descriptor_pool: DescriptorPoolConfig::default(),
            validation: cfg!(debug_assertions),
        }
    }
}

/// Image-based lighting precomputation sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IblConfig {
    /// Face size of the captured environment cubemap
    pub environment_size: u32,
    /// Face size of the irradiance cubemap
    pub irradiance_size: u32,
    /// Face size of mip 0 of the prefiltered cubemap
    pub prefilter_size: u32,
    /// Roughness levels rendered into the prefiltered cubemap
    pub prefilter_mip_levels: u32,
    /// Edge of the square BRDF lookup table
    pub brdf_lut_size: u32,
}

impl IblConfig {
    /// Validate sizes and the prefilter level count
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, size) in [
            ("environment_size", self.environment_size),
            ("irradiance_size", self.irradiance_size),
            ("prefilter_size", self.prefilter_size),
            ("brdf_lut_size", self.brdf_lut_size),
        ] {
            if size == 0 {
                return Err(ConfigError::Invalid(format!("{name} cannot be zero")));
            }
        }

        let full_chain = mip_level_count(self.prefilter_size, self.prefilter_size);
        if self.prefilter_mip_levels == 0 || self.prefilter_mip_levels > full_chain {
            return Err(ConfigError::Invalid(format!(
                "prefilter_mip_levels must be within 1..={full_chain} for a {} face, got {}",
                self.prefilter_size, self.prefilter_mip_levels
            )));
        }
        Ok(())
    }
}

impl Default for IblConfig {
    fn default() -> Self {
        Self {
            environment_size: 512,
            irradiance_size: 32,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            brdf_lut_size: 512,
        }
    }
}

/// Fly-camera parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Initial eye position
    pub position: [f32; 3],
    /// Initial look-at point
    pub target: [f32; 3],
    /// Radians of rotation per pixel of mouse movement
    pub sensitivity: f32,
    /// Units per second
    pub speed: f32,
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl CameraConfig {
    /// Validate the projection parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.near <= 0.0 || self.near >= self.far {
            return Err(ConfigError::Invalid(format!(
                "camera planes must satisfy 0 < near < far, got near={} far={}",
                self.near, self.far
            )));
        }
        if !(1.0..179.0).contains(&self.fov_degrees) {
            return Err(ConfigError::Invalid(format!("fov_degrees out of range: {}", self.fov_degrees)));
        }
        Ok(())
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 30.0],
            target: [0.0, 0.0, 0.0],
            sensitivity: 0.003,
            speed: 8.0,
            fov_degrees: 45.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

/// Text overlay parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// TrueType/OpenType font file
    pub font_path: PathBuf,
    /// Glyph rasterization height in pixels
    pub pixel_height: u32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from("resources/fonts/arial.ttf"),
            pixel_height: 48,
        }
    }
}

/// # Asset Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding compiled `<name>.vert.spv` / `<name>.frag.spv` pairs
    pub shader_dir: PathBuf,
    /// Sphere model used for the material grid and light markers
    pub sphere_model: PathBuf,
    /// Cube model used for the skybox and cubemap capture
    pub cube_model: PathBuf,
    /// Equirectangular Radiance HDR environment
    pub environment_hdr: PathBuf,
}

impl AssetConfig {
    /// Vertex shader `vertex` paired with fragment shader `fragment` from the shader directory
    pub fn shaders(&self, vertex: &str, fragment: &str) -> ShaderPair {
        ShaderPair::new(&self.shader_dir, vertex, fragment)
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("target/shaders"),
            sphere_model: PathBuf::from("resources/models/sphere.obj"),
            cube_model: PathBuf::from("resources/models/cube.obj"),
            environment_hdr: PathBuf::from("resources/textures/environment.hdr"),
        }
    }
}

/// # Complete Demo Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Window parameters
    pub window: WindowConfig,
    /// Renderer parameters
    pub renderer: RendererConfig,
    /// IBL precomputation sizes
    pub ibl: IblConfig,
    /// Camera parameters
    pub camera: CameraConfig,
    /// Text overlay parameters
    pub text: TextConfig,
    /// Asset locations
    pub assets: AssetConfig,
}

impl DemoConfig {
    /// Load from `path` when it exists, defaults otherwise, then validate
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            log::info!("[CONFIG] {} not found, using defaults", path.display());
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("window size cannot be zero".to_string()));
        }
        if self.text.pixel_height == 0 {
            return Err(ConfigError::Invalid("text pixel_height cannot be zero".to_string()));
        }
        self.renderer.validate()?;
        self.ibl.validate()?;
        self.camera.validate()
    }
}

impl Config for DemoConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_config_is_valid() {
        let config = DemoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.descriptor_pool.max_sets, 1024);
        assert_eq!(config.ibl.irradiance_size, 32);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [ibl]
            prefilter_size = 64
            prefilter_mip_levels = 7

            [window]
            title = "Spheres"
        "#;
        let config = DemoConfig::parse(text, ConfigFormat::Toml).expect("parse");

        assert_eq!(config.ibl.prefilter_size, 64);
        assert_eq!(config.ibl.prefilter_mip_levels, 7);
        assert_eq!(config.ibl.brdf_lut_size, 512);
        assert_eq!(config.window.title, "Spheres");
        assert_eq!(config.window.width, 1280);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefilter_levels_cannot_exceed_chain() {
        let ibl = IblConfig {
            prefilter_size: 64,
            prefilter_mip_levels: 8,
            ..IblConfig::default()
        };
        assert!(matches!(ibl.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_camera_planes_validated() {
        let camera = CameraConfig {
            near: 10.0,
            far: 1.0,
            ..CameraConfig::default()
        };
        assert!(camera.validate().is_err());
    }

    #[test]
    fn test_msaa_must_be_power_of_two() {
        assert!(RendererConfig::default().with_msaa_samples(3).validate().is_err());
        assert!(RendererConfig::default().with_msaa_samples(4).validate().is_ok());
    }

    #[test]
    fn test_shader_pair_naming() {
        let assets = AssetConfig::default();
        let pair = assets.shaders("cube", "prefilter");
        assert_eq!(pair.vertex, PathBuf::from("target/shaders").join("cube.vert.spv"));
        assert_eq!(pair.fragment, PathBuf::from("target/shaders").join("prefilter.frag.spv"));
    }
}
