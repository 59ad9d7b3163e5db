//! Image, image view and sampler wrappers
//!
//! Each wrapper keeps a clone of the logical device and destroys its handle on
//! drop. Render passes only ever copy the raw handles out, so a pass can be
//! torn down without touching the images it sampled.

use ash::{vk, Device};

use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Everything needed to create one image and its memory
#[derive(Debug, Clone, Copy)]
pub struct ImageDescription {
    /// Width of mip 0
    pub width: u32,
    /// Height of mip 0
    pub height: u32,
    /// Mip levels allocated
    pub mip_levels: u32,
    /// Multisample count
    pub samples: vk::SampleCountFlags,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Memory properties of the backing allocation
    pub memory: vk::MemoryPropertyFlags,
    /// Array layers (6 for a cubemap)
    pub layers: u32,
    /// Creation flags (cube compatibility)
    pub flags: vk::ImageCreateFlags,
}

impl ImageDescription {
    /// Single-sampled, single-layer, single-mip device-local 2D image
    pub fn new(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            format,
            usage,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            layers: 1,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    /// Allocate `mip_levels` levels
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Multisampled attachment
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Six cube-compatible layers
    pub fn cubemap(mut self) -> Self {
        self.layers = 6;
        self.flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        self
    }
}

/// Image with its own device memory
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    description: ImageDescription,
}

impl Image {
    /// Create the image and bind freshly allocated memory to it
    pub fn new(ctx: &VulkanContext, description: &ImageDescription) -> VulkanResult<Self> {
        let device = ctx.device().clone();

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: description.width,
                height: description.height,
                depth: 1,
            })
            .mip_levels(description.mip_levels)
            .array_layers(description.layers)
            .format(description.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(description.usage)
            .samples(description.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .flags(description.flags);

        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = match ctx.find_memory_type(mem_requirements.memory_type_bits, description.memory) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let image = Self {
            device,
            image,
            memory,
            description: *description,
        };
        unsafe {
            image
                .device
                .bind_image_memory(image.image, image.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        log::debug!(
            "[VULKAN] Created image {}x{} {:?} ({} mips, {} layers)",
            description.width,
            description.height,
            description.format,
            description.mip_levels,
            description.layers
        );
        Ok(image)
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Creation parameters
    pub fn description(&self) -> &ImageDescription {
        &self.description
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.description.format
    }

    /// Mip 0 extent
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.description.width,
            height: self.description.height,
        }
    }

    /// Allocated mip levels
    pub fn mip_levels(&self) -> u32 {
        self.description.mip_levels
    }

    /// Array layers
    pub fn layers(&self) -> u32 {
        self.description.layers
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Image view wrapper
pub struct ImageView {
    device: Device,
    view: vk::ImageView,
}

impl ImageView {
    /// View over every mip of `image`; a `CUBE` view covers six layers
    pub fn new(
        device: Device,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        view_type: vk::ImageViewType,
    ) -> VulkanResult<Self> {
        let layer_count = if view_type == vk::ImageViewType::CUBE { 6 } else { 1 };

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count,
            });

        let view = unsafe { device.create_image_view(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, view })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// Sampler wrapper
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Trilinear, anisotropic sampler whose LOD range spans any mip chain
    pub fn new(ctx: &VulkanContext, address_mode: vk::SamplerAddressMode) -> VulkanResult<Self> {
        let device = ctx.device().clone();
        let max_anisotropy = ctx.physical_device().properties.limits.max_sampler_anisotropy;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { device.create_sampler(&sampler_info, None).map_err(VulkanError::Api)? };
        log::debug!("[VULKAN] Created sampler ({:?})", address_mode);
        Ok(Self { device, sampler })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}
