//! PBR demo
//!
//! A 10x10 grid of spheres sweeping roughness and metalness, lit by four
//! point lights and a precomputed HDR environment, with an FPS overlay.
//!
//! Usage: `pbr_demo [config.toml|config.ron]`

mod scene;
mod system;

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use pbr_engine::assets::AssetError;
use pbr_engine::core::config::{ConfigError, DemoConfig};
use pbr_engine::foundation::logging;
use pbr_engine::render::vulkan::{VulkanError, WindowError};

use system::PbrDemo;

/// Used when no config path is given on the command line
const DEFAULT_CONFIG: &str = "resources/config/demo.toml";

/// Anything that stops the demo
#[derive(Error, Debug)]
pub enum DemoError {
    /// Config file unreadable or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window or surface creation failed
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Any GPU setup or frame failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Model, image or font could not be loaded
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
}

fn run() -> Result<(), DemoError> {
    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let config = DemoConfig::load_or_default(&path)?;

    let mut demo = PbrDemo::new(config)?;
    let result = demo.run();
    demo.cleanup();
    result.map_err(DemoError::from)
}

fn main() -> ExitCode {
    logging::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
