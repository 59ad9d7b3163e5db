//! GPU resource allocation and transfer helpers
//!
//! Creation of buffers, images and views, one-time command submission,
//! layout transitions, copies (layer and mip addressed so single cubemap faces
//! can be written) and blit-based mipmap generation.
//!
//! Every helper that records commands submits them immediately and waits for
//! the graphics queue to drain before returning.

use ash::vk;

use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::image::{Image, ImageDescription, ImageView};
use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Levels in a full mip chain: `floor(log2(max(w, h))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Extent of mip `level`, halving and rounding down but never below 1
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shrink = |size: u32| size.checked_shr(level).unwrap_or(0).max(1);
    (shrink(width), shrink(height))
}

/// `UnsupportedFormat` unless `features` include linear filtering
///
/// Optional for 32-bit float formats, so HDR sources and blitted mip
/// chains both go through this.
pub fn check_linear_filter(format: vk::Format, features: vk::FormatFeatureFlags, purpose: &str) -> VulkanResult<()> {
    if features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
        return Ok(());
    }
    Err(VulkanError::UnsupportedFormat {
        format,
        reason: format!("{purpose} needs SAMPLED_IMAGE_FILTER_LINEAR"),
    })
}

/// Access mask and pipeline stage covering all use of an image in `layout`
pub fn layout_sync(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Image aspect implied by a format
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn image_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    range: vk::ImageSubresourceRange,
) -> (vk::ImageMemoryBarrier, vk::PipelineStageFlags, vk::PipelineStageFlags) {
    let (src_access, src_stage) = layout_sync(old_layout);
    let (dst_access, dst_stage) = layout_sync(new_layout);
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();
    (barrier, src_stage, dst_stage)
}

impl VulkanContext {
    /// Create a buffer and bind memory with `properties`
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Buffer> {
        Buffer::new(self, size, usage, properties)
    }

    /// Create an image and bind memory to it
    pub fn create_image(&self, description: &ImageDescription) -> VulkanResult<Image> {
        Image::new(self, description)
    }

    /// Create a view over every mip of `image`
    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        view_type: vk::ImageViewType,
    ) -> VulkanResult<ImageView> {
        ImageView::new(self.device().clone(), image, format, aspect, mip_levels, view_type)
    }

    /// Allocate and begin a primary command buffer for immediate submission
    pub fn begin_single_time_commands(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool())
            .command_buffer_count(1);

        let command_buffer = unsafe {
            self.device()
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
                .into_iter()
                .next()
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: "driver returned no command buffer".to_string(),
                })?
        };

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(command_buffer)
    }

    /// End, submit and wait for `command_buffer`, then free it
    pub fn end_single_time_commands(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let command_buffers = [command_buffer];
        let result = unsafe {
            self.device()
                .end_command_buffer(command_buffer)
                .and_then(|_| {
                    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
                    self.device()
                        .queue_submit(self.graphics_queue(), &[submit_info], vk::Fence::null())
                })
                .and_then(|_| self.device().queue_wait_idle(self.graphics_queue()))
        };
        unsafe {
            self.device().free_command_buffers(self.command_pool(), &command_buffers);
        }
        result.map_err(VulkanError::Api)
    }

    fn record_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
    ) {
        let (barrier, src_stage, dst_stage) = image_barrier(image, old_layout, new_layout, range);
        unsafe {
            self.device().cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Copy `size` bytes between buffers
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device().cmd_copy_buffer(command_buffer, src, dst, &[region]);
        }
        self.end_single_time_commands(command_buffer)
    }

    /// Copy tightly packed texels into mip 0 of one layer; the layer must be in TRANSFER_DST_OPTIMAL
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
        layer: u32,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: layer,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D { width, height, depth: 1 })
            .build();
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.end_single_time_commands(command_buffer)
    }

    /// Copy mip 0 layer 0 of `src` (TRANSFER_SRC_OPTIMAL) into `dst_layer`/`dst_mip` of `dst` (TRANSFER_DST_OPTIMAL)
    pub fn copy_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        width: u32,
        height: u32,
        dst_layer: u32,
        dst_mip: u32,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: dst_mip,
                base_array_layer: dst_layer,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            extent: vk::Extent3D { width, height, depth: 1 },
        };
        unsafe {
            self.device().cmd_copy_image(
                command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.end_single_time_commands(command_buffer)
    }

    /// Transition every mip of the first `layer_count` layers
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mip_levels: u32,
        layer_count: u32,
    ) -> VulkanResult<()> {
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect_for_format(format),
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count,
        };
        self.transition_subresource(image, old_layout, new_layout, range)
    }

    /// Transition an arbitrary subresource range
    pub fn transition_subresource(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        self.record_barrier(command_buffer, image, old_layout, new_layout, range);
        self.end_single_time_commands(command_buffer)
    }

    /// Fail unless optimally tiled `format` images can be linearly filtered
    pub fn require_linear_filter(&self, format: vk::Format, purpose: &str) -> VulkanResult<()> {
        check_linear_filter(format, self.format_properties(format).optimal_tiling_features, purpose)
    }

    /// Fill mips 1.. of one layer by successive linear blits from mip 0
    ///
    /// Every mip of the layer must be in TRANSFER_DST_OPTIMAL with mip 0
    /// written. On return the whole layer is SHADER_READ_ONLY_OPTIMAL.
    pub fn generate_mipmaps(
        &self,
        image: vk::Image,
        format: vk::Format,
        width: u32,
        height: u32,
        mip_levels: u32,
        layer: u32,
    ) -> VulkanResult<()> {
        self.require_linear_filter(format, "linear blitting")?;

        let level_range = |level: u32| vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: level,
            level_count: 1,
            base_array_layer: layer,
            layer_count: 1,
        };
        let level_layers = |level: u32| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: level,
            base_array_layer: layer,
            layer_count: 1,
        };

        let command_buffer = self.begin_single_time_commands()?;

        for level in 1..mip_levels {
            let (src_width, src_height) = mip_extent(width, height, level - 1);
            let (dst_width, dst_height) = mip_extent(width, height, level);

            self.record_barrier(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                level_range(level - 1),
            );

            let blit = vk::ImageBlit::builder()
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: src_width as i32,
                        y: src_height as i32,
                        z: 1,
                    },
                ])
                .src_subresource(level_layers(level - 1))
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: dst_width as i32,
                        y: dst_height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(level_layers(level))
                .build();

            unsafe {
                self.device().cmd_blit_image(
                    command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }

            self.record_barrier(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                level_range(level - 1),
            );
        }

        // The last level was only ever a blit destination
        self.record_barrier(
            command_buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            level_range(mip_levels.saturating_sub(1)),
        );

        self.end_single_time_commands(command_buffer)
    }

    /// Device-local image whose mip 0 of `layer` is filled from `pixels` via staging
    ///
    /// Leaves every mip of every layer in TRANSFER_DST_OPTIMAL when `layer` is 0;
    /// later layers assume the transition already happened.
    pub fn upload_layer(&self, image: &Image, pixels: &[u8], layer: u32) -> VulkanResult<()> {
        let staging = Buffer::with_data(self, vk::BufferUsageFlags::TRANSFER_SRC, pixels)?;
        if layer == 0 {
            self.transition_image_layout(
                image.handle(),
                image.format(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                image.mip_levels(),
                image.layers(),
            )?;
        }
        let extent = image.extent();
        self.copy_buffer_to_image(staging.handle(), image.handle(), extent.width, extent.height, layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(512, 512), 10);
        assert_eq!(mip_level_count(1024, 300), 11);
        assert_eq!(mip_level_count(300, 1023), 10);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_mip_chain_halves_down_to_one() {
        for (width, height) in [(512, 512), (640, 360), (7, 3), (1, 16)] {
            let levels = mip_level_count(width, height);
            assert_eq!(levels, (width.max(height) as f32).log2().floor() as u32 + 1);

            let mut previous = mip_extent(width, height, 0);
            assert_eq!(previous, (width, height));
            for level in 1..levels {
                let current = mip_extent(width, height, level);
                assert_eq!(current.0, (previous.0 / 2).max(1));
                assert_eq!(current.1, (previous.1 / 2).max(1));
                previous = current;
            }
            assert_eq!(previous.0.max(previous.1), 1);
        }
    }

    #[test]
    fn test_mip_extent_past_chain_clamps() {
        assert_eq!(mip_extent(8, 8, 40), (1, 1));
    }

    #[test]
    fn test_linear_filter_requirement() {
        let filterable = vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        assert!(check_linear_filter(vk::Format::R32G32B32A32_SFLOAT, filterable, "sampling").is_ok());

        let err = check_linear_filter(
            vk::Format::R32G32B32A32_SFLOAT,
            vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::TRANSFER_DST,
            "sampling an HDR environment",
        )
        .unwrap_err();
        match err {
            VulkanError::UnsupportedFormat { format, reason } => {
                assert_eq!(format, vk::Format::R32G32B32A32_SFLOAT);
                assert!(reason.starts_with("sampling an HDR environment"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_for_format(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_layout_sync_for_sampling() {
        let (access, stage) = layout_sync(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
        assert_eq!(stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let (access, stage) = layout_sync(vk::ImageLayout::UNDEFINED);
        assert!(access.is_empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }
}
