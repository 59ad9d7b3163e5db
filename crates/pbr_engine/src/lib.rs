//! # PBR Engine
//!
//! Vulkan building blocks for a physically based rendering demo.
//!
//! ## Features
//!
//! - **Render passes**: declarative draw units over swapchain or offscreen targets
//! - **Image-based lighting**: environment, irradiance, prefiltered and BRDF LUT precomputation
//! - **Text overlays**: fontdue glyph atlas with per-string quad meshes
//! - **Configuration**: TOML or RON files with validated defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use pbr_engine::core::config::DemoConfig;
//! use pbr_engine::render::vulkan::{VulkanContext, Window};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     pbr_engine::foundation::logging::init();
//!     let config = DemoConfig::load_or_default(Path::new("resources/config/demo.toml"))?;
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let context = VulkanContext::new(&mut window, &config.renderer)?;
//!     context.wait_idle()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod assets;
pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
