//! Descriptor set layouts, pools and writes
//!
//! A [`BindingList`] is the single description of what a descriptor set
//! holds. The layout bindings and the writes are both derived from it, so the
//! two can never disagree on binding numbers: uniform buffers take bindings
//! `0..U` in the order they were added, combined image samplers take
//! `U..U+T`.

use ash::{vk, Device};

use crate::core::config::DescriptorPoolConfig;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Shape of one binding, independent of the concrete resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Uniform buffer visible to `stages`
    Uniform {
        /// Shader stages reading the block
        stages: vk::ShaderStageFlags,
    },
    /// Combined image sampler, fragment stage
    Texture,
}

/// Binding shapes of `uniform_stages.len()` uniforms followed by `texture_count` textures
pub fn binding_kinds(uniform_stages: &[vk::ShaderStageFlags], texture_count: usize) -> Vec<BindingKind> {
    uniform_stages
        .iter()
        .map(|&stages| BindingKind::Uniform { stages })
        .chain(std::iter::repeat(BindingKind::Texture).take(texture_count))
        .collect()
}

/// Layout bindings numbered in list order
pub fn layout_bindings(kinds: &[BindingKind]) -> Vec<vk::DescriptorSetLayoutBinding> {
    kinds
        .iter()
        .enumerate()
        .map(|(binding, kind)| {
            let (descriptor_type, stages) = match *kind {
                BindingKind::Uniform { stages } => (vk::DescriptorType::UNIFORM_BUFFER, stages),
                BindingKind::Texture => (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT),
            };
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding as u32)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stages)
                .build()
        })
        .collect()
}

/// `InvalidOperation` unless `bindings` has exactly the shapes in `layout`
///
/// Catches a uniform count or stage mask that differs from the layout, and
/// textures that were not truncated to the layout's count.
pub fn check_shape(layout: &[BindingKind], bindings: &BindingList) -> VulkanResult<()> {
    let kinds = bindings.kinds();
    if kinds == layout {
        return Ok(());
    }
    Err(VulkanError::InvalidOperation {
        reason: format!("descriptor bindings {kinds:?} do not match layout {layout:?}"),
    })
}

#[derive(Debug, Clone, Copy)]
enum BindingResource {
    Uniform {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
        stages: vk::ShaderStageFlags,
    },
    Texture {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

impl BindingResource {
    fn kind(&self) -> BindingKind {
        match *self {
            Self::Uniform { stages, .. } => BindingKind::Uniform { stages },
            Self::Texture { .. } => BindingKind::Texture,
        }
    }
}

/// Payload of one descriptor write
#[derive(Debug, Clone, Copy)]
pub enum WriteInfo {
    /// Uniform buffer range
    Buffer(vk::DescriptorBufferInfo),
    /// Sampled image
    Image(vk::DescriptorImageInfo),
}

/// One descriptor write, addressed by binding number
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    /// Destination binding
    pub dst_binding: u32,
    /// Resource written
    pub info: WriteInfo,
}

/// Ordered resources of one descriptor set
#[derive(Debug, Clone, Default)]
pub struct BindingList {
    resources: Vec<BindingResource>,
}

impl BindingList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a uniform buffer range visible to `stages`
    pub fn uniform(mut self, buffer: vk::Buffer, range: vk::DeviceSize, stages: vk::ShaderStageFlags) -> Self {
        self.resources.push(BindingResource::Uniform { buffer, range, stages });
        self
    }

    /// Append a sampled texture
    pub fn texture(mut self, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        self.resources.push(BindingResource::Texture { view, sampler });
        self
    }

    /// Number of uniform bindings
    pub fn uniform_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| matches!(r, BindingResource::Uniform { .. }))
            .count()
    }

    /// Number of texture bindings
    pub fn texture_count(&self) -> usize {
        self.resources.len() - self.uniform_count()
    }

    /// Resources in binding order: uniforms first, then textures
    fn slots(&self) -> impl Iterator<Item = (u32, &BindingResource)> {
        let uniforms = self
            .resources
            .iter()
            .filter(|r| matches!(r, BindingResource::Uniform { .. }));
        let textures = self
            .resources
            .iter()
            .filter(|r| matches!(r, BindingResource::Texture { .. }));
        uniforms.chain(textures).enumerate().map(|(i, r)| (i as u32, r))
    }

    /// Binding shapes in binding order; two lists with equal shapes share a layout
    pub fn kinds(&self) -> Vec<BindingKind> {
        self.slots().map(|(_, r)| r.kind()).collect()
    }

    /// Keep only the first `count` textures
    pub fn truncate_textures(mut self, count: usize) -> Self {
        let mut kept = 0;
        self.resources.retain(|r| match r {
            BindingResource::Uniform { .. } => true,
            BindingResource::Texture { .. } => {
                kept += 1;
                kept <= count
            }
        });
        self
    }

    /// Layout bindings derived from the list
    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        layout_bindings(&self.kinds())
    }

    /// Writes derived from the list
    pub fn writes(&self) -> Vec<DescriptorWrite> {
        self.slots()
            .map(|(dst_binding, resource)| {
                let info = match *resource {
                    BindingResource::Uniform { buffer, range, .. } => WriteInfo::Buffer(vk::DescriptorBufferInfo {
                        buffer,
                        offset: 0,
                        range,
                    }),
                    BindingResource::Texture { view, sampler } => WriteInfo::Image(vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }),
                };
                DescriptorWrite { dst_binding, info }
            })
            .collect()
    }
}

/// Descriptor set layout wrapper
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
    kinds: Vec<BindingKind>,
}

impl DescriptorSetLayout {
    /// Create a layout for bindings of the given shapes
    ///
    /// `kinds` must list uniforms before textures, as [`binding_kinds`] does.
    pub fn new(device: &Device, kinds: &[BindingKind]) -> VulkanResult<Self> {
        let layout_bindings = layout_bindings(kinds);
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device: device.clone(),
            layout,
            kinds: kinds.to_vec(),
        })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Binding shapes this layout was built from
    pub fn kinds(&self) -> &[BindingKind] {
        &self.kinds
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Fixed-capacity descriptor pool whose sets can be freed individually
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool
    pub fn new(device: &Device, capacity: &DescriptorPoolConfig) -> VulkanResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: capacity.uniform_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: capacity.combined_image_samplers,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(capacity.max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    /// Allocate one set of `layout` and write `bindings` into it
    ///
    /// Fails with `InvalidOperation` when `bindings` does not have the shape
    /// the layout was built from.
    pub fn create_set(&self, layout: &DescriptorSetLayout, bindings: &BindingList) -> VulkanResult<vk::DescriptorSet> {
        check_shape(layout.kinds(), bindings)?;

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::Api)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "driver returned no descriptor set".to_string(),
            })?;

        let writes = bindings.writes();
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.dst_binding)
                    .dst_array_element(0);
                match &write.info {
                    WriteInfo::Buffer(info) => builder
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(info))
                        .build(),
                    WriteInfo::Image(info) => builder
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(info))
                        .build(),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(set)
    }

    /// Return sets to the pool
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        unsafe { self.device.free_descriptor_sets(self.pool, sets) }.map_err(VulkanError::Api)
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn sample_list() -> BindingList {
        BindingList::new()
            .uniform(vk::Buffer::from_raw(1), 128, vk::ShaderStageFlags::VERTEX)
            .texture(vk::ImageView::from_raw(10), vk::Sampler::from_raw(20))
            .uniform(vk::Buffer::from_raw(2), 64, vk::ShaderStageFlags::FRAGMENT)
            .texture(vk::ImageView::from_raw(11), vk::Sampler::from_raw(20))
            .texture(vk::ImageView::from_raw(12), vk::Sampler::from_raw(20))
    }

    #[test]
    fn test_uniforms_take_first_bindings() {
        let list = sample_list();
        let bindings = list.layout_bindings();
        assert_eq!(bindings.len(), 5);

        for (i, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, i as u32);
            let expected = if i < 2 {
                vk::DescriptorType::UNIFORM_BUFFER
            } else {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            };
            assert_eq!(binding.descriptor_type, expected);
        }
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[4].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_writes_match_layout_slots() {
        let list = sample_list();
        let bindings = list.layout_bindings();
        let writes = list.writes();
        assert_eq!(writes.len(), bindings.len());

        for (write, binding) in writes.iter().zip(&bindings) {
            assert_eq!(write.dst_binding, binding.binding);
            match write.info {
                WriteInfo::Buffer(_) => assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER),
                WriteInfo::Image(_) => {
                    assert_eq!(binding.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                }
            }
        }

        match writes[1].info {
            WriteInfo::Buffer(info) => {
                assert_eq!(info.buffer.as_raw(), 2);
                assert_eq!(info.range, 64);
            }
            WriteInfo::Image(_) => panic!("binding 1 should be the second uniform"),
        }
        match writes[2].info {
            WriteInfo::Image(info) => {
                assert_eq!(info.image_view.as_raw(), 10);
                assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
            WriteInfo::Buffer(_) => panic!("binding 2 should be the first texture"),
        }
    }

    #[test]
    fn test_counts_and_truncation() {
        let list = sample_list();
        assert_eq!(list.uniform_count(), 2);
        assert_eq!(list.texture_count(), 3);

        let truncated = list.truncate_textures(1);
        assert_eq!(truncated.texture_count(), 1);
        assert_eq!(truncated.uniform_count(), 2);
        match truncated.writes()[2].info {
            WriteInfo::Image(info) => assert_eq!(info.image_view.as_raw(), 10),
            WriteInfo::Buffer(_) => panic!("expected the first texture to survive"),
        }
    }

    #[test]
    fn test_shape_list_matches_resource_list() {
        let list = sample_list();
        let kinds = binding_kinds(&[vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT], 3);
        assert_eq!(list.kinds(), kinds);
        assert_eq!(layout_bindings(&kinds).len(), 5);
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let layout = binding_kinds(&[vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT], 3);
        assert!(check_shape(&layout, &sample_list()).is_ok());

        let missing_uniform = BindingList::new()
            .uniform(vk::Buffer::from_raw(1), 128, vk::ShaderStageFlags::VERTEX)
            .texture(vk::ImageView::from_raw(10), vk::Sampler::from_raw(20))
            .texture(vk::ImageView::from_raw(11), vk::Sampler::from_raw(20))
            .texture(vk::ImageView::from_raw(12), vk::Sampler::from_raw(20));
        assert!(matches!(
            check_shape(&layout, &missing_uniform),
            Err(VulkanError::InvalidOperation { .. })
        ));

        let wrong_stage = BindingList::new()
            .uniform(vk::Buffer::from_raw(1), 128, vk::ShaderStageFlags::VERTEX)
            .uniform(vk::Buffer::from_raw(2), 64, vk::ShaderStageFlags::VERTEX)
            .texture(vk::ImageView::from_raw(10), vk::Sampler::from_raw(20))
            .texture(vk::ImageView::from_raw(11), vk::Sampler::from_raw(20))
            .texture(vk::ImageView::from_raw(12), vk::Sampler::from_raw(20));
        assert!(check_shape(&layout, &wrong_stage).is_err());

        assert!(check_shape(&layout, &sample_list().truncate_textures(2)).is_err());
    }

    #[test]
    fn test_kinds_compare_shapes_not_resources() {
        let a = BindingList::new()
            .uniform(vk::Buffer::from_raw(1), 64, vk::ShaderStageFlags::VERTEX)
            .texture(vk::ImageView::from_raw(1), vk::Sampler::from_raw(1));
        let b = BindingList::new()
            .uniform(vk::Buffer::from_raw(7), 64, vk::ShaderStageFlags::VERTEX)
            .texture(vk::ImageView::from_raw(9), vk::Sampler::from_raw(3));
        let c = BindingList::new()
            .uniform(vk::Buffer::from_raw(7), 64, vk::ShaderStageFlags::FRAGMENT)
            .texture(vk::ImageView::from_raw(9), vk::Sampler::from_raw(3));
        assert_eq!(a.kinds(), b.kinds());
        assert_ne!(a.kinds(), c.kinds());
    }
}
