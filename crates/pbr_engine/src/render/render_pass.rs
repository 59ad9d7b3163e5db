//! Render passes: target, framebuffers, draw units and command recording
//!
//! A [`RenderPass`] owns its render-pass object, attachments, descriptor pool,
//! pipelines and command buffers. Mesh buffers, textures and uniform blocks
//! are borrowed by handle only and are never freed here.
//!
//! A pass either renders into the swapchain images or into `N` images of its
//! own. Own images end in the target's output layout so the precomputation
//! stages can copy them straight into cubemap faces. Draw units may name the
//! framebuffer they draw into; units without a target draw into every one.

use ash::{vk, Device};
use std::rc::Rc;

use crate::core::config::DescriptorPoolConfig;
use crate::render::mesh::{Mesh, MeshBuffers, TextureBinding};
use crate::render::text::TextOverlay;
use crate::render::uniform::UniformBinding;
use crate::render::vertex_layout::{TextVertex, Vertex, VertexInput};
use crate::render::vulkan::allocator::aspect_for_format;
use crate::render::vulkan::descriptor::binding_kinds;
use crate::render::vulkan::{
    BindingList, BlendMode, DescriptorPool, DescriptorSetLayout, Fence, Framebuffer, Image, ImageDescription,
    ImageView, Pipeline, PipelineDescription, Semaphore, ShaderPair, Swapchain, VulkanContext, VulkanError,
    VulkanResult,
};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const CLEAR_DEPTH: f32 = 1.0;

/// Layout the colour output is left in when the pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutput {
    /// Swapchain image, ready to present
    Present,
    /// Own image, ready to be sampled
    ShaderRead,
    /// Own image, ready to be copied out
    TransferSource,
}

impl TargetOutput {
    /// Final layout of the output attachment
    pub fn final_layout(self) -> vk::ImageLayout {
        match self {
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            Self::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }

    fn image_usage(self) -> vk::ImageUsageFlags {
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        match self {
            Self::Present => usage,
            Self::ShaderRead => usage | vk::ImageUsageFlags::SAMPLED,
            Self::TransferSource => usage | vk::ImageUsageFlags::TRANSFER_SRC,
        }
    }
}

/// Formats, sample count and output of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// Colour attachment format
    pub color_format: vk::Format,
    /// Depth attachment format
    pub depth_format: vk::Format,
    /// Rasterization samples; more than one adds a resolve attachment
    pub samples: vk::SampleCountFlags,
    /// Final layout of the output
    pub output: TargetOutput,
}

impl RenderTarget {
    /// Whether colour is resolved from a multisampled attachment
    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Attachments in framebuffer order: colour, depth, then the resolve target when multisampled
    pub fn attachment_descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let multisampled = self.is_multisampled();
        let color = vk::AttachmentDescription::builder()
            .format(self.color_format)
            .samples(self.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(if multisampled {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            })
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                self.output.final_layout()
            })
            .build();

        let depth = vk::AttachmentDescription::builder()
            .format(self.depth_format)
            .samples(self.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let mut attachments = vec![color, depth];
        if multisampled {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(self.color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(self.output.final_layout())
                    .build(),
            );
        }
        attachments
    }

    /// One clear value per attachment
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let color = vk::ClearValue {
            color: vk::ClearColorValue { float32: CLEAR_COLOR },
        };
        let depth = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: CLEAR_DEPTH,
                stencil: 0,
            },
        };
        let mut values = vec![color, depth];
        if self.is_multisampled() {
            values.push(color);
        }
        values
    }

    fn create_render_pass(&self, device: &Device) -> VulkanResult<vk::RenderPass> {
        let attachments = self.attachment_descriptions();

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_refs = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref);
        if self.is_multisampled() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        let subpasses = [subpass.build()];

        let attachment_stages =
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let incoming = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .build();
        // Own images are read after the pass, by a copy or a shader
        let outgoing = vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::SHADER_READ)
            .build();
        let dependencies = match self.output {
            TargetOutput::Present => vec![incoming],
            TargetOutput::ShaderRead | TargetOutput::TransferSource => vec![incoming, outgoing],
        };

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { device.create_render_pass(&create_info, None).map_err(VulkanError::Api) }
    }
}

/// Where the framebuffers of a pass come from
#[derive(Clone, Copy)]
pub enum FramebufferSource<'a> {
    /// One framebuffer per swapchain image
    Swapchain(&'a Swapchain),
    /// `count` framebuffers, each over an image owned by the pass
    Offscreen {
        /// Framebuffers to create
        count: usize,
    },
}

struct ColorResource {
    view: ImageView,
    image: Image,
}

impl ColorResource {
    fn new(ctx: &VulkanContext, description: &ImageDescription) -> VulkanResult<Self> {
        let image = Image::new(ctx, description)?;
        let view = ctx.create_image_view(
            image.handle(),
            description.format,
            aspect_for_format(description.format),
            1,
            vk::ImageViewType::TYPE_2D,
        )?;
        Ok(Self { view, image })
    }
}

/// Images and framebuffers sized to one extent
struct Attachments {
    extent: vk::Extent2D,
    framebuffers: Vec<Framebuffer>,
    outputs: Vec<ColorResource>,
    // Referenced by the framebuffers only
    _msaa_color: Option<ColorResource>,
    _depth: ColorResource,
}

impl Attachments {
    fn new(
        ctx: &VulkanContext,
        render_pass: vk::RenderPass,
        target: &RenderTarget,
        extent: vk::Extent2D,
        source: FramebufferSource<'_>,
    ) -> VulkanResult<Self> {
        let depth = ColorResource::new(
            ctx,
            &ImageDescription::new(
                extent.width,
                extent.height,
                target.depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .with_samples(target.samples),
        )?;

        let msaa_color = if target.is_multisampled() {
            Some(ColorResource::new(
                ctx,
                &ImageDescription::new(
                    extent.width,
                    extent.height,
                    target.color_format,
                    vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                )
                .with_samples(target.samples),
            )?)
        } else {
            None
        };

        let outputs = match source {
            FramebufferSource::Swapchain(_) => Vec::new(),
            FramebufferSource::Offscreen { count } => (0..count)
                .map(|_| {
                    ColorResource::new(
                        ctx,
                        &ImageDescription::new(
                            extent.width,
                            extent.height,
                            target.color_format,
                            target.output.image_usage(),
                        ),
                    )
                })
                .collect::<VulkanResult<Vec<_>>>()?,
        };

        let output_views: Vec<vk::ImageView> = match source {
            FramebufferSource::Swapchain(swapchain) => swapchain.image_views().to_vec(),
            FramebufferSource::Offscreen { .. } => outputs.iter().map(|output| output.view.handle()).collect(),
        };

        let framebuffers = output_views
            .iter()
            .map(|&output| {
                let views = match &msaa_color {
                    Some(color) => vec![color.view.handle(), depth.view.handle(), output],
                    None => vec![output, depth.view.handle()],
                };
                Framebuffer::new(ctx.device().clone(), render_pass, &views, extent)
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        Ok(Self {
            extent,
            framebuffers,
            outputs,
            _msaa_color: msaa_color,
            _depth: depth,
        })
    }
}

/// Per-mesh resources bound into one descriptor set
///
/// Built from borrowed handles; the pass copies them and never frees them.
#[derive(Clone)]
pub struct MeshBinding<'a> {
    /// Vertex, index and optional instance buffers
    pub buffers: MeshBuffers,
    /// Uniform blocks, bound first in this order
    pub uniforms: Vec<&'a dyn UniformBinding>,
    /// Textures, bound after the uniforms
    pub textures: Vec<TextureBinding>,
}

impl<'a> MeshBinding<'a> {
    /// Bind buffers with no descriptors yet
    pub fn new(buffers: MeshBuffers) -> Self {
        Self {
            buffers,
            uniforms: Vec::new(),
            textures: Vec::new(),
        }
    }

    /// Bind an uploaded mesh together with all of its textures
    pub fn from_mesh(mesh: &Mesh) -> VulkanResult<Self> {
        let buffers = mesh.buffers().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "cannot draw a mesh after cleanup".to_string(),
        })?;
        Ok(Self::new(buffers).textures(mesh.textures().bindings()))
    }

    /// Append a uniform block
    pub fn uniform(mut self, block: &'a dyn UniformBinding) -> Self {
        self.uniforms.push(block);
        self
    }

    /// Append a texture
    pub fn texture(mut self, texture: TextureBinding) -> Self {
        self.textures.push(texture);
        self
    }

    /// Append textures in order
    pub fn textures<I: IntoIterator<Item = TextureBinding>>(mut self, textures: I) -> Self {
        self.textures.extend(textures);
        self
    }

    fn binding_list(&self, texture_count: usize) -> BindingList {
        let list = self
            .uniforms
            .iter()
            .fold(BindingList::new(), |list, block| {
                list.uniform(block.buffer(), block.range(), block.stages())
            });
        self.textures
            .iter()
            .fold(list, |list, texture| list.texture(texture.view, texture.sampler))
            .truncate_textures(texture_count)
    }
}

/// Check the textures a mesh supplies against what the pipeline samples
///
/// Too few is an error. Extra textures are ignored with a warning.
pub fn check_texture_count(supplied: usize, expected: usize) -> VulkanResult<()> {
    if supplied < expected {
        return Err(VulkanError::InvalidOperation {
            reason: format!("mesh supplies {supplied} textures, pipeline samples {expected}"),
        });
    }
    if supplied > expected {
        log::warn!("[PASS] Mesh supplies {supplied} textures, only the first {expected} are bound");
    }
    Ok(())
}

/// Shaders, vertex layout and descriptor shape of a draw unit
#[derive(Debug, Clone)]
pub struct DrawUnitDescription {
    /// Vertex and fragment SPIR-V
    pub shaders: ShaderPair,
    /// Vertex buffer layout
    pub vertex_input: VertexInput,
    /// Stage visibility of each uniform binding, in binding order
    pub uniform_stages: Vec<vk::ShaderStageFlags>,
    /// Textures sampled after the uniforms
    pub texture_count: usize,
    /// Blend and cull state; the sample count is taken from the pass
    pub pipeline: PipelineDescription,
    /// Framebuffer drawn into; `None` draws into all of them
    pub target: Option<usize>,
}

impl DrawUnitDescription {
    /// Opaque, back-face culled, per-vertex [`Vertex`] input, no descriptors
    pub fn new(shaders: ShaderPair) -> Self {
        Self {
            shaders,
            vertex_input: Vertex::input(),
            uniform_stages: Vec::new(),
            texture_count: 0,
            pipeline: PipelineDescription::default(),
            target: None,
        }
    }

    /// Add a uniform binding visible to `stages`
    pub fn uniform(mut self, stages: vk::ShaderStageFlags) -> Self {
        self.uniform_stages.push(stages);
        self
    }

    /// Sample `count` textures
    pub fn textures(mut self, count: usize) -> Self {
        self.texture_count = count;
        self
    }

    /// Read a per-instance [`crate::render::vertex_layout::ModelInstance`] stream at binding 1
    pub fn instanced(mut self) -> Self {
        self.vertex_input = Vertex::instanced_input();
        self
    }

    /// Alpha-blended, double-sided [`TextVertex`] quads
    pub fn text(mut self) -> Self {
        self.vertex_input = TextVertex::input();
        self.pipeline = self.pipeline.with_blend(BlendMode::Alpha).double_sided();
        self
    }

    /// Set the blend mode
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.pipeline = self.pipeline.with_blend(blend);
        self
    }

    /// Cull nothing
    pub fn double_sided(mut self) -> Self {
        self.pipeline = self.pipeline.double_sided();
        self
    }

    /// Draw only into framebuffer `index`
    pub fn targeting(mut self, index: usize) -> Self {
        self.target = Some(index);
        self
    }
}

/// Mesh buffers and the descriptor set written for them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    /// Buffers bound for the draw; instances only for instanced units
    pub buffers: MeshBuffers,
    /// Set 0
    pub set: vk::DescriptorSet,
}

/// Handles one draw unit records, apart from the objects owning them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawBatch {
    /// Graphics pipeline
    pub pipeline: vk::Pipeline,
    /// Layout descriptor sets are bound through
    pub pipeline_layout: vk::PipelineLayout,
    /// One entry per mesh, drawn in order
    pub items: Vec<DrawItem>,
    /// Framebuffer drawn into; `None` draws into all of them
    pub target: Option<usize>,
}

impl DrawBatch {
    /// Descriptor sets of every item
    pub fn sets(&self) -> Vec<vk::DescriptorSet> {
        self.items.iter().map(|item| item.set).collect()
    }

    /// Swap in new items; returns the old items' sets, which the caller frees
    pub fn replace_items(&mut self, items: Vec<DrawItem>) -> Vec<vk::DescriptorSet> {
        let old = std::mem::replace(&mut self.items, items);
        old.iter().map(|item| item.set).collect()
    }
}

/// One indexed draw as it is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    /// Pipeline bound for the draw
    pub pipeline: vk::Pipeline,
    /// Layout the set is bound through
    pub pipeline_layout: vk::PipelineLayout,
    /// Vertex, index and instance buffers
    pub buffers: MeshBuffers,
    /// Set 0
    pub set: vk::DescriptorSet,
}

impl DrawCall {
    /// Instances drawn, 1 without an instance stream
    pub fn instance_count(&self) -> u32 {
        self.buffers.instances.map_or(1, |(_, count)| count)
    }
}

/// Draw calls of each framebuffer, in draw-unit order then mesh order
pub fn draw_calls(batches: &[&DrawBatch], framebuffer_count: usize) -> Vec<Vec<DrawCall>> {
    let targets: Vec<Option<usize>> = batches.iter().map(|batch| batch.target).collect();
    recording_plan(&targets, framebuffer_count)
        .into_iter()
        .map(|units| {
            units
                .into_iter()
                .flat_map(|unit| {
                    let batch = batches[unit];
                    batch.items.iter().map(move |item| DrawCall {
                        pipeline: batch.pipeline,
                        pipeline_layout: batch.pipeline_layout,
                        buffers: item.buffers,
                        set: item.set,
                    })
                })
                .collect()
        })
        .collect()
}

struct DrawUnit {
    batch: DrawBatch,
    pipeline: Rc<Pipeline>,
    layout: Rc<DescriptorSetLayout>,
    texture_count: usize,
    instanced: bool,
}

impl DrawUnit {
    fn new(
        pipeline: Rc<Pipeline>,
        layout: Rc<DescriptorSetLayout>,
        texture_count: usize,
        instanced: bool,
        items: Vec<DrawItem>,
        target: Option<usize>,
    ) -> Self {
        let batch = DrawBatch {
            pipeline: pipeline.handle(),
            pipeline_layout: pipeline.layout(),
            items,
            target,
        };
        Self {
            batch,
            pipeline,
            layout,
            texture_count,
            instanced,
        }
    }
}

/// Draw units each framebuffer records, in draw-unit order
pub fn recording_plan(targets: &[Option<usize>], framebuffer_count: usize) -> Vec<Vec<usize>> {
    (0..framebuffer_count)
        .map(|framebuffer| {
            targets
                .iter()
                .enumerate()
                .filter(|(_, target)| target.map_or(true, |t| t == framebuffer))
                .map(|(unit, _)| unit)
                .collect()
        })
        .collect()
}

/// Render-complete semaphores a pass needs
///
/// A swapchain image's semaphore stays pending until the present engine
/// consumes it, so swapchain passes keep one per image. Offscreen passes are
/// drained with a queue wait and need only one.
pub fn render_complete_count(output: TargetOutput, framebuffer_count: usize) -> usize {
    match output {
        TargetOutput::Present => framebuffer_count.max(1),
        TargetOutput::ShaderRead | TargetOutput::TransferSource => 1,
    }
}

/// Which render-complete semaphore a submission of `framebuffer` signals
pub fn render_complete_slot(framebuffer: Option<usize>, slots: usize) -> VulkanResult<usize> {
    match (framebuffer, slots) {
        (_, 1) => Ok(0),
        (Some(index), _) if index < slots => Ok(index),
        (Some(index), _) => Err(VulkanError::ResourceNotFound { id: index as u64 }),
        (None, _) => Err(VulkanError::InvalidOperation {
            reason: "swapchain passes submit one framebuffer at a time".to_string(),
        }),
    }
}

fn create_semaphores(device: &Device, count: usize) -> VulkanResult<Vec<Semaphore>> {
    (0..count).map(|_| Semaphore::new(device.clone())).collect()
}

struct PassState {
    command_buffers: Vec<vk::CommandBuffer>,
    units: Vec<DrawUnit>,
    attachments: Attachments,
    pool: DescriptorPool,
    render_complete: Vec<Semaphore>,
    handle: vk::RenderPass,
}

/// Render target, descriptor pool, draw units and their command buffers
pub struct RenderPass {
    device: Device,
    command_pool: vk::CommandPool,
    graphics_queue: vk::Queue,
    target: RenderTarget,
    state: Option<PassState>,
}

impl RenderPass {
    /// Create a pass over `extent` with framebuffers from `source`
    ///
    /// Swapchain sources must use [`TargetOutput::Present`]; offscreen
    /// sources must not.
    pub fn new(
        ctx: &VulkanContext,
        target: RenderTarget,
        extent: vk::Extent2D,
        source: FramebufferSource<'_>,
        pool_config: &DescriptorPoolConfig,
    ) -> VulkanResult<Self> {
        match (source, target.output) {
            (FramebufferSource::Swapchain(_), TargetOutput::Present) => {}
            (FramebufferSource::Offscreen { count }, TargetOutput::ShaderRead | TargetOutput::TransferSource)
                if count > 0 => {}
            _ => {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("{:?} output does not match the framebuffer source", target.output),
                })
            }
        }

        let device = ctx.device().clone();
        let handle = target.create_render_pass(&device)?;
        let resources = Attachments::new(ctx, handle, &target, extent, source).and_then(|attachments| {
            let pool = DescriptorPool::new(&device, pool_config)?;
            let count = render_complete_count(target.output, attachments.framebuffers.len());
            let render_complete = create_semaphores(&device, count)?;
            Ok((attachments, pool, render_complete))
        });
        let (attachments, pool, render_complete) = match resources {
            Ok(resources) => resources,
            Err(e) => {
                unsafe { device.destroy_render_pass(handle, None) };
                return Err(e);
            }
        };

        log::debug!(
            "[PASS] Created {:?} pass {}x{} with {} framebuffers, {:?}",
            target.output,
            extent.width,
            extent.height,
            attachments.framebuffers.len(),
            target.samples
        );

        Ok(Self {
            device,
            command_pool: ctx.command_pool(),
            graphics_queue: ctx.graphics_queue(),
            target,
            state: Some(PassState {
                command_buffers: Vec::new(),
                units: Vec::new(),
                attachments,
                pool,
                render_complete,
                handle,
            }),
        })
    }

    /// Multisampled pass over the swapchain images
    pub fn for_swapchain(
        ctx: &VulkanContext,
        swapchain: &Swapchain,
        samples: vk::SampleCountFlags,
        pool_config: &DescriptorPoolConfig,
    ) -> VulkanResult<Self> {
        let target = RenderTarget {
            color_format: swapchain.format().format,
            depth_format: ctx.find_depth_format()?,
            samples,
            output: TargetOutput::Present,
        };
        Self::new(
            ctx,
            target,
            swapchain.extent(),
            FramebufferSource::Swapchain(swapchain),
            pool_config,
        )
    }

    /// Single-sampled pass over `count` own images left ready for copying
    pub fn offscreen(
        ctx: &VulkanContext,
        color_format: vk::Format,
        size: u32,
        count: usize,
        pool_config: &DescriptorPoolConfig,
    ) -> VulkanResult<Self> {
        let target = RenderTarget {
            color_format,
            depth_format: ctx.find_depth_format()?,
            samples: vk::SampleCountFlags::TYPE_1,
            output: TargetOutput::TransferSource,
        };
        let extent = vk::Extent2D {
            width: size,
            height: size,
        };
        Self::new(ctx, target, extent, FramebufferSource::Offscreen { count }, pool_config)
    }

    fn state(&self) -> VulkanResult<&PassState> {
        self.state.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "render pass used after cleanup".to_string(),
        })
    }

    fn state_mut(&mut self) -> VulkanResult<&mut PassState> {
        self.state.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "render pass used after cleanup".to_string(),
        })
    }

    /// Build a pipeline and one descriptor set per mesh; returns the unit index
    pub fn add_draw_unit(
        &mut self,
        meshes: &[MeshBinding<'_>],
        description: &DrawUnitDescription,
    ) -> VulkanResult<usize> {
        let samples = self.target.samples;
        let device = self.device.clone();
        let state = self.state_mut()?;
        check_target(description.target, state.attachments.framebuffers.len())?;

        let kinds = binding_kinds(&description.uniform_stages, description.texture_count);
        let layout = Rc::new(DescriptorSetLayout::new(&device, &kinds)?);
        let pipeline = Rc::new(Pipeline::new(
            &device,
            state.handle,
            &description.shaders,
            &description.vertex_input,
            layout.handle(),
            &description.pipeline.with_samples(samples),
        )?);
        let instanced = description.vertex_input.is_instanced();
        let items = allocate_items(&state.pool, &layout, description.texture_count, instanced, meshes)?;

        state.units.push(DrawUnit::new(
            pipeline,
            layout,
            description.texture_count,
            instanced,
            items,
            description.target,
        ));
        log::debug!(
            "[PASS] Draw unit {} with {} meshes, target {:?}",
            state.units.len() - 1,
            meshes.len(),
            description.target
        );
        Ok(state.units.len() - 1)
    }

    /// Same as [`Self::add_draw_unit`] with a per-instance stream at binding 1
    ///
    /// Every mesh must have instances loaded; each is drawn with one call
    /// covering all of its instances.
    pub fn add_instanced_draw_unit(
        &mut self,
        meshes: &[MeshBinding<'_>],
        description: &DrawUnitDescription,
    ) -> VulkanResult<usize> {
        self.add_draw_unit(meshes, &description.clone().instanced())
    }

    /// Add a unit reusing the pipeline and layout of unit `source`
    pub fn share_draw_unit(
        &mut self,
        source: usize,
        meshes: &[MeshBinding<'_>],
        target: Option<usize>,
    ) -> VulkanResult<usize> {
        let state = self.state_mut()?;
        check_target(target, state.attachments.framebuffers.len())?;
        let unit = state.units.get(source).ok_or(VulkanError::ResourceNotFound { id: source as u64 })?;
        let (pipeline, layout, texture_count, instanced) = (
            Rc::clone(&unit.pipeline),
            Rc::clone(&unit.layout),
            unit.texture_count,
            unit.instanced,
        );
        let items = allocate_items(&state.pool, &layout, texture_count, instanced, meshes)?;

        state.units.push(DrawUnit::new(pipeline, layout, texture_count, instanced, items, target));
        Ok(state.units.len() - 1)
    }

    /// Rebuild the descriptor sets of unit `index` for new meshes, keeping its pipeline
    ///
    /// Commands must be re-recorded before the next submission.
    pub fn replace_draw_unit(&mut self, index: usize, meshes: &[MeshBinding<'_>]) -> VulkanResult<()> {
        let state = self.state_mut()?;
        let unit = state.units.get(index).ok_or(VulkanError::ResourceNotFound { id: index as u64 })?;
        let items = allocate_items(&state.pool, &unit.layout, unit.texture_count, unit.instanced, meshes)?;
        let old_sets = state.units[index].batch.replace_items(items);
        state.pool.free(&old_sets)
    }

    /// Record one command buffer per framebuffer from the current draw units
    pub fn record_commands(&mut self) -> VulkanResult<()> {
        let device = self.device.clone();
        let command_pool = self.command_pool;
        let clear_values = self.target.clear_values();
        let state = self.state_mut()?;
        let framebuffer_count = state.attachments.framebuffers.len();

        if state.command_buffers.len() != framebuffer_count {
            if !state.command_buffers.is_empty() {
                unsafe { device.free_command_buffers(command_pool, &state.command_buffers) };
                state.command_buffers.clear();
            }
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(framebuffer_count as u32);
            state.command_buffers = unsafe { device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api)? };
        }

        let extent = state.attachments.extent;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let batches: Vec<&DrawBatch> = state.units.iter().map(|unit| &unit.batch).collect();
        let calls = draw_calls(&batches, framebuffer_count);

        for ((&command_buffer, framebuffer), calls) in
            state.command_buffers.iter().zip(&state.attachments.framebuffers).zip(&calls)
        {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(state.handle)
                .framebuffer(framebuffer.handle())
                .render_area(render_area)
                .clear_values(&clear_values);

            unsafe {
                device
                    .begin_command_buffer(command_buffer, &begin_info)
                    .map_err(VulkanError::Api)?;
                device.cmd_begin_render_pass(command_buffer, &pass_info, vk::SubpassContents::INLINE);
                device.cmd_set_viewport(command_buffer, 0, &[viewport]);
                device.cmd_set_scissor(command_buffer, 0, &[render_area]);

                let mut bound = vk::Pipeline::null();
                for call in calls {
                    if call.pipeline != bound {
                        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, call.pipeline);
                        bound = call.pipeline;
                    }
                    match call.buffers.instances {
                        Some((instances, _)) => {
                            device.cmd_bind_vertex_buffers(command_buffer, 0, &[call.buffers.vertex, instances], &[0, 0]);
                        }
                        None => device.cmd_bind_vertex_buffers(command_buffer, 0, &[call.buffers.vertex], &[0]),
                    }
                    device.cmd_bind_index_buffer(command_buffer, call.buffers.index, 0, vk::IndexType::UINT32);
                    device.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        call.pipeline_layout,
                        0,
                        &[call.set],
                        &[],
                    );
                    device.cmd_draw_indexed(command_buffer, call.buffers.index_count, call.instance_count(), 0, 0, 0);
                }

                device.cmd_end_render_pass(command_buffer);
                device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
            }
        }

        log::trace!("[PASS] Recorded {} command buffers", framebuffer_count);
        Ok(())
    }

    /// Submit the commands of `framebuffer`, or of every framebuffer when `None`
    ///
    /// Signals the render-complete semaphore of `framebuffer` (swapchain
    /// passes) or the pass's single one (offscreen passes), and `fence` when
    /// given.
    pub fn submit(
        &self,
        framebuffer: Option<usize>,
        wait: Option<vk::Semaphore>,
        fence: Option<&Fence>,
    ) -> VulkanResult<()> {
        let state = self.state()?;
        let command_buffers: &[vk::CommandBuffer] = match framebuffer {
            Some(index) => std::slice::from_ref(
                state
                    .command_buffers
                    .get(index)
                    .ok_or(VulkanError::ResourceNotFound { id: index as u64 })?,
            ),
            None => &state.command_buffers,
        };
        if command_buffers.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "submit before record_commands".to_string(),
            });
        }

        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let slot = render_complete_slot(framebuffer, state.render_complete.len())?;
        let signal_semaphores = [state.render_complete[slot].handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(
                    self.graphics_queue,
                    &[submit_info],
                    fence.map_or_else(vk::Fence::null, Fence::handle),
                )
                .map_err(VulkanError::Api)
        }
    }

    /// Rebuild the draw unit of a changed string, attach strings added since
    /// the last update, and re-record
    ///
    /// Returns whether anything changed. The caller must have waited for
    /// the previous submission of this pass to retire.
    pub fn update_text(&mut self, ctx: &VulkanContext, text: &mut TextOverlay) -> VulkanResult<bool> {
        let update = text.plan_update();
        if update.is_empty() {
            return Ok(false);
        }

        if let Some(id) = update.rebuild {
            text.rebuild_text(ctx, id)?;
            if let Some(unit) = update.replace {
                self.replace_draw_unit(unit, &text.mesh_bindings(id)?)?;
            }
        }
        let attached = text.attach_new(self)?;
        self.record_commands()?;
        text.update_done();

        log::debug!(
            "[TEXT] Re-recorded pass (changed {:?}, {} strings attached)",
            update.rebuild,
            attached
        );
        Ok(true)
    }

    /// Rebuild attachments and framebuffers for a recreated swapchain and re-record
    ///
    /// Pipelines are kept; viewport and scissor are dynamic.
    pub fn resize(&mut self, ctx: &VulkanContext, swapchain: &Swapchain) -> VulkanResult<()> {
        if self.target.output != TargetOutput::Present {
            return Err(VulkanError::InvalidOperation {
                reason: "only swapchain passes can be resized".to_string(),
            });
        }
        if swapchain.format().format != self.target.color_format {
            return Err(VulkanError::UnsupportedFormat {
                format: swapchain.format().format,
                reason: "swapchain format changed across recreation".to_string(),
            });
        }

        let target = self.target;
        let device = self.device.clone();
        let state = self.state_mut()?;
        let extent = swapchain.extent();
        let handle = state.handle;
        let attachments = Attachments::new(ctx, handle, &target, extent, FramebufferSource::Swapchain(swapchain))?;
        let count = render_complete_count(target.output, attachments.framebuffers.len());
        if state.render_complete.len() != count {
            state.render_complete = create_semaphores(&device, count)?;
        }
        state.attachments = attachments;

        log::debug!("[PASS] Resized to {}x{}", extent.width, extent.height);
        self.record_commands()
    }

    /// Images owned by an offscreen pass, one per framebuffer
    pub fn color_images(&self) -> VulkanResult<Vec<vk::Image>> {
        Ok(self
            .state()?
            .attachments
            .outputs
            .iter()
            .map(|output| output.image.handle())
            .collect())
    }

    /// Semaphore signaled by [`Self::submit`] of `framebuffer`, waited on by its present
    pub fn render_complete(&self, framebuffer: usize) -> VulkanResult<vk::Semaphore> {
        let semaphores = &self.state()?.render_complete;
        let slot = render_complete_slot(Some(framebuffer), semaphores.len())?;
        Ok(semaphores[slot].handle())
    }

    /// Framebuffer extent
    pub fn extent(&self) -> VulkanResult<vk::Extent2D> {
        Ok(self.state()?.attachments.extent)
    }

    /// Number of framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.state
            .as_ref()
            .map_or(0, |state| state.attachments.framebuffers.len())
    }

    /// Number of draw units
    pub fn draw_unit_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.units.len())
    }

    /// Formats and output of the pass
    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Free command buffers, descriptor sets, pipelines, attachments and the pool
    ///
    /// Borrowed mesh buffers, textures and uniform blocks are left alone.
    /// Calling it again does nothing.
    pub fn cleanup(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        if !state.command_buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, &state.command_buffers) };
        }
        for unit in &state.units {
            if let Err(e) = state.pool.free(&unit.batch.sets()) {
                log::warn!("[PASS] Failed to free descriptor sets: {}", e);
            }
        }
        let handle = state.handle;
        drop(state);
        unsafe { self.device.destroy_render_pass(handle, None) };
        log::debug!("[PASS] Cleaned up {:?} pass", self.target.output);
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        if self.state.is_some() {
            log::warn!("[PASS] {:?} pass dropped without cleanup", self.target.output);
            self.cleanup();
        }
    }
}

fn check_target(target: Option<usize>, framebuffer_count: usize) -> VulkanResult<()> {
    match target {
        Some(index) if index >= framebuffer_count => Err(VulkanError::InvalidOperation {
            reason: format!("draw unit targets framebuffer {index}, pass has {framebuffer_count}"),
        }),
        _ => Ok(()),
    }
}

fn allocate_items(
    pool: &DescriptorPool,
    layout: &DescriptorSetLayout,
    texture_count: usize,
    instanced: bool,
    meshes: &[MeshBinding<'_>],
) -> VulkanResult<Vec<DrawItem>> {
    let mut items: Vec<DrawItem> = Vec::with_capacity(meshes.len());
    let result = meshes.iter().try_for_each(|mesh| {
        if instanced && mesh.buffers.instances.is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: "instanced draw unit given a mesh without instances".to_string(),
            });
        }
        check_texture_count(mesh.textures.len(), texture_count)?;
        let set = pool.create_set(layout, &mesh.binding_list(texture_count))?;
        items.push(DrawItem {
            buffers: MeshBuffers {
                instances: if instanced { mesh.buffers.instances } else { None },
                ..mesh.buffers
            },
            set,
        });
        Ok(())
    });

    if let Err(e) = result {
        let sets: Vec<vk::DescriptorSet> = items.iter().map(|item| item.set).collect();
        if let Err(free_error) = pool.free(&sets) {
            log::warn!("[PASS] Failed to free descriptor sets: {}", free_error);
        }
        return Err(e);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec2;
    use crate::render::text::{plan_text_update, TextRegistry};
    use ash::vk::Handle;
    use std::collections::HashMap;
    use std::path::Path;

    struct FakeBlock(u64);

    impl UniformBinding for FakeBlock {
        fn buffer(&self) -> vk::Buffer {
            vk::Buffer::from_raw(self.0)
        }

        fn range(&self) -> vk::DeviceSize {
            64
        }

        fn stages(&self) -> vk::ShaderStageFlags {
            vk::ShaderStageFlags::VERTEX
        }
    }

    fn buffers() -> MeshBuffers {
        MeshBuffers {
            vertex: vk::Buffer::from_raw(1),
            index: vk::Buffer::from_raw(2),
            index_count: 36,
            instances: None,
        }
    }

    fn texture(raw: u64) -> TextureBinding {
        TextureBinding {
            view: vk::ImageView::from_raw(raw),
            sampler: vk::Sampler::from_raw(99),
        }
    }

    #[test]
    fn test_each_face_unit_records_into_its_framebuffer_only() {
        let targets: Vec<Option<usize>> = (0..6).map(Some).collect();
        let plan = recording_plan(&targets, 6);
        assert_eq!(plan.len(), 6);
        for (framebuffer, units) in plan.iter().enumerate() {
            assert_eq!(units, &vec![framebuffer]);
        }
    }

    #[test]
    fn test_untargeted_units_record_everywhere_in_order() {
        let targets = [None, Some(1), None, Some(0)];
        let plan = recording_plan(&targets, 2);
        assert_eq!(plan[0], vec![0, 2, 3]);
        assert_eq!(plan[1], vec![0, 1, 2]);
        assert!(recording_plan(&targets, 0).is_empty());
    }

    #[test]
    fn test_target_bounds() {
        assert!(check_target(None, 1).is_ok());
        assert!(check_target(Some(5), 6).is_ok());
        assert!(matches!(check_target(Some(6), 6), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_texture_count_policy() {
        assert!(check_texture_count(3, 3).is_ok());
        assert!(check_texture_count(4, 3).is_ok());
        assert!(matches!(check_texture_count(2, 3), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_mesh_binding_orders_uniforms_then_textures() {
        let view = FakeBlock(10);
        let lights = FakeBlock(11);
        let binding = MeshBinding::new(buffers())
            .texture(texture(20))
            .uniform(&view)
            .textures([texture(21), texture(22)])
            .uniform(&lights);

        let list = binding.binding_list(2);
        assert_eq!(list.uniform_count(), 2);
        assert_eq!(list.texture_count(), 2);
        assert_eq!(
            list.kinds(),
            binding_kinds(&[vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::VERTEX], 2)
        );
    }

    #[test]
    fn test_single_sample_target_has_no_resolve() {
        let target = RenderTarget {
            color_format: vk::Format::R16G16B16A16_SFLOAT,
            depth_format: vk::Format::D32_SFLOAT,
            samples: vk::SampleCountFlags::TYPE_1,
            output: TargetOutput::TransferSource,
        };
        let attachments = target.attachment_descriptions();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(target.clear_values().len(), 2);
        assert!(target.output.image_usage().contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_multisampled_target_resolves_into_output() {
        let target = RenderTarget {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: vk::Format::D32_SFLOAT,
            samples: vk::SampleCountFlags::TYPE_4,
            output: TargetOutput::Present,
        };
        let attachments = target.attachment_descriptions();
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        let clear = target.clear_values();
        assert_eq!(clear.len(), 3);
        unsafe {
            assert_eq!(clear[0].color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(clear[1].depth_stencil.depth, 1.0);
        }
    }

    #[test]
    fn test_draw_unit_description_builders() {
        let shaders = ShaderPair::named(Path::new("shaders"), "pbr");
        let description = DrawUnitDescription::new(shaders.clone())
            .uniform(vk::ShaderStageFlags::VERTEX)
            .uniform(vk::ShaderStageFlags::FRAGMENT)
            .textures(3)
            .targeting(4);
        assert_eq!(description.uniform_stages.len(), 2);
        assert_eq!(description.target, Some(4));
        assert!(!description.vertex_input.is_instanced());
        assert!(description.clone().instanced().vertex_input.is_instanced());

        let text = DrawUnitDescription::new(shaders).textures(1).text();
        assert_eq!(text.pipeline.blend, BlendMode::Alpha);
        assert_eq!(text.pipeline.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(text.vertex_input.bindings[0].stride, 16);
    }

    #[test]
    fn test_swapchain_images_signal_their_own_semaphore() {
        assert_eq!(render_complete_count(TargetOutput::Present, 3), 3);
        assert_eq!(render_complete_count(TargetOutput::ShaderRead, 6), 1);
        assert_eq!(render_complete_count(TargetOutput::TransferSource, 1), 1);

        let slots: Vec<usize> = (0..3).map(|i| render_complete_slot(Some(i), 3).unwrap()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert!(matches!(
            render_complete_slot(Some(3), 3),
            Err(VulkanError::ResourceNotFound { id: 3 })
        ));
        assert!(matches!(
            render_complete_slot(None, 3),
            Err(VulkanError::InvalidOperation { .. })
        ));

        // Offscreen passes submit every framebuffer at once
        assert_eq!(render_complete_slot(None, 1).unwrap(), 0);
        assert_eq!(render_complete_slot(Some(5), 1).unwrap(), 0);
    }

    fn batch(pipeline: u64, items: Vec<DrawItem>, target: Option<usize>) -> DrawBatch {
        DrawBatch {
            pipeline: vk::Pipeline::from_raw(pipeline),
            pipeline_layout: vk::PipelineLayout::from_raw(pipeline + 100),
            items,
            target,
        }
    }

    fn item(vertex: u64, set: u64) -> DrawItem {
        DrawItem {
            buffers: MeshBuffers {
                vertex: vk::Buffer::from_raw(vertex),
                ..buffers()
            },
            set: vk::DescriptorSet::from_raw(set),
        }
    }

    #[test]
    fn test_draw_calls_follow_units_and_instances() {
        let mut instanced = item(30, 3);
        instanced.buffers.instances = Some((vk::Buffer::from_raw(31), 4));
        let scene = batch(1, vec![item(10, 1), item(20, 2)], None);
        let lights = batch(2, vec![instanced], Some(1));
        let calls = draw_calls(&[&scene, &lights], 2);

        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[1].len(), 3);
        assert_eq!(calls[1][2].pipeline, vk::Pipeline::from_raw(2));
        assert_eq!(calls[1][2].pipeline_layout, vk::PipelineLayout::from_raw(102));
        assert_eq!(calls[1][2].instance_count(), 4);
        assert_eq!(calls[0][1].instance_count(), 1);
        assert_eq!(calls[0][1].set, vk::DescriptorSet::from_raw(2));
    }

    #[test]
    fn test_changed_text_records_new_quads_only() {
        let mut registry = TextRegistry::new(HashMap::new(), 20.0);
        let fps = registry.add_text("FPS: 60", Vec2::zeros(), 0.05);
        let scene = batch(1, vec![item(10, 1)], None);
        let mut text = batch(2, vec![item(40, 4), item(41, 5)], None);

        registry.change_text(fps, "FPS: 9").unwrap();
        let update = plan_text_update(registry.need_update(), &[1], registry.len(), true);
        assert_eq!(update.replace, Some(1));

        let old_sets = text.replace_items(vec![item(50, 6)]);
        registry.update_done();
        assert_eq!(old_sets, vec![vk::DescriptorSet::from_raw(4), vk::DescriptorSet::from_raw(5)]);
        assert_eq!(text.sets(), vec![vk::DescriptorSet::from_raw(6)]);
        assert_eq!(registry.need_update(), None);

        let calls = draw_calls(&[&scene, &text], 1);
        let vertices: Vec<vk::Buffer> = calls[0].iter().map(|call| call.buffers.vertex).collect();
        assert_eq!(vertices, vec![vk::Buffer::from_raw(10), vk::Buffer::from_raw(50)]);
        assert!(calls[0]
            .iter()
            .all(|call| call.set != vk::DescriptorSet::from_raw(4) && call.set != vk::DescriptorSet::from_raw(5)));
    }
}
