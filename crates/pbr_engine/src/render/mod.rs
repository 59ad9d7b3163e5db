//! # Rendering
//!
//! Everything above the raw Vulkan wrappers:
//!
//! - **Render passes**: one render pass, its attachments and framebuffers,
//!   and the draw units recorded into it
//! - **Precompute**: the one-shot image-based lighting stages
//! - **Text**: glyph atlas and per-string quad meshes
//! - **Resources**: meshes, texture sets and uniform blocks
//! - **Camera**: fly camera producing view and projection matrices
//!
//! Resources are owned by their creators. A [`RenderPass`] borrows raw
//! handles and must be cleaned up before anything it draws.

pub mod camera;
pub mod mesh;
pub mod precompute;
pub mod render_pass;
pub mod text;
pub mod uniform;
pub mod vertex_layout;
pub mod vulkan;

pub use camera::{Camera, CameraInput};
pub use mesh::{Geometry, Mesh, MeshBuffers, ModelTransform, TextureBinding, TextureSet};
pub use precompute::{precompute_ibl, IblTextures};
pub use render_pass::{
    draw_calls, DrawBatch, DrawCall, DrawItem, DrawUnitDescription, MeshBinding, RenderPass, RenderTarget,
    TargetOutput,
};
pub use text::{plan_text_update, TextEntry, TextOverlay, TextRegistry, TextUpdate};
pub use uniform::{LightsUniform, ModelUniform, RoughnessUniform, UniformBinding, UniformBlock, ViewProjection};
pub use vertex_layout::{ModelInstance, TextVertex, Vertex, VertexInput};
