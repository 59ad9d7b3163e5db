//! Shader modules and graphics pipeline construction
//!
//! Fixed-function state is the same for every pipeline: triangle lists,
//! dynamic viewport and scissor, counter-clockwise front faces and a
//! LESS_OR_EQUAL depth test. Only the blend mode, cull mode and sample count
//! vary.

use ash::{vk, Device};
use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::render::vertex_layout::VertexInput;
use crate::render::vulkan::{VulkanError, VulkanResult};

const ENTRY_POINT: &CStr = c"main";

/// Compiled SPIR-V module
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        if bytes.len() % 4 != 0 || bytes.is_empty() {
            return Err(VulkanError::InitializationFailed(format!(
                "SPIR-V bytecode length {} is not a positive multiple of 4",
                bytes.len()
            )));
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { device.create_shader_module(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load shader module from a SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: &Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to read shader file {}: {}", path.display(), e))
        })?;
        log::debug!("[VULKAN] Loaded {} bytes of SPIR-V from {:?}", bytes.len(), path);
        Self::from_bytes(device, &bytes)
    }

    /// Get the shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Paths of a vertex/fragment pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPair {
    /// Vertex stage SPIR-V
    pub vertex: PathBuf,
    /// Fragment stage SPIR-V
    pub fragment: PathBuf,
}

impl ShaderPair {
    /// `<dir>/<vertex>.vert.spv` with `<dir>/<fragment>.frag.spv`
    pub fn new(dir: &Path, vertex: &str, fragment: &str) -> Self {
        Self {
            vertex: dir.join(format!("{vertex}.vert.spv")),
            fragment: dir.join(format!("{fragment}.frag.spv")),
        }
    }

    /// Both stages share `name`
    pub fn named(dir: &Path, name: &str) -> Self {
        Self::new(dir, name, name)
    }
}

/// How fragment output combines with the attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite
    #[default]
    Opaque,
    /// Source-alpha over destination
    Alpha,
}

/// Per-pipeline state that is not fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineDescription {
    /// Colour blending
    pub blend: BlendMode,
    /// Faces culled; capture cubes are seen from inside and cull nothing
    pub cull_mode: vk::CullModeFlags,
    /// Must equal the sample count of the render pass
    pub samples: vk::SampleCountFlags,
}

impl Default for PipelineDescription {
    fn default() -> Self {
        Self {
            blend: BlendMode::Opaque,
            cull_mode: vk::CullModeFlags::BACK,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

impl PipelineDescription {
    /// Set the blend mode
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    /// Disable face culling
    pub fn double_sided(mut self) -> Self {
        self.cull_mode = vk::CullModeFlags::NONE;
        self
    }

    /// Match a render pass sample count
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

fn blend_attachment(blend: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    match blend {
        BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build(),
        BlendMode::Alpha => vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build(),
    }
}

/// Graphics pipeline and its layout
pub struct Pipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl Pipeline {
    /// Build a pipeline for subpass 0 of `render_pass` using one descriptor set layout
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        shaders: &ShaderPair,
        vertex_input: &VertexInput,
        set_layout: vk::DescriptorSetLayout,
        description: &PipelineDescription,
    ) -> VulkanResult<Self> {
        let vertex_shader = ShaderModule::from_file(device, &shaders.vertex)?;
        let fragment_shader = ShaderModule::from_file(device, &shaders.fragment)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.handle())
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.handle())
                .name(ENTRY_POINT)
                .build(),
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set when commands are recorded
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(description.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(description.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(description.blend == BlendMode::Opaque)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [blend_attachment(description.blend)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None).map_err(VulkanError::Api)? };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipeline = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match pipeline {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(e));
            }
        };
        let Some(pipeline) = pipeline else {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            return Err(VulkanError::InvalidOperation {
                reason: "driver returned no pipeline".to_string(),
            });
        };

        log::debug!(
            "[PASS] Built pipeline {:?} + {:?} ({:?}, {:?})",
            shaders.vertex.file_name(),
            shaders.fragment.file_name(),
            description.blend,
            description.samples
        );

        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_pair_paths() {
        let pair = ShaderPair::new(Path::new("target/shaders"), "cube", "irradiance");
        assert_eq!(pair.vertex, Path::new("target/shaders/cube.vert.spv"));
        assert_eq!(pair.fragment, Path::new("target/shaders/irradiance.frag.spv"));
        assert_eq!(ShaderPair::named(Path::new("s"), "pbr").fragment, Path::new("s/pbr.frag.spv"));
    }

    #[test]
    fn test_alpha_blend_state() {
        let opaque = blend_attachment(BlendMode::Opaque);
        let alpha = blend_attachment(BlendMode::Alpha);
        assert_eq!(opaque.blend_enable, vk::FALSE);
        assert_eq!(alpha.blend_enable, vk::TRUE);
        assert_eq!(alpha.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn test_description_builders() {
        let description = PipelineDescription::default()
            .with_blend(BlendMode::Alpha)
            .double_sided()
            .with_samples(vk::SampleCountFlags::TYPE_4);
        assert_eq!(description.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(description.samples, vk::SampleCountFlags::TYPE_4);
    }
}
