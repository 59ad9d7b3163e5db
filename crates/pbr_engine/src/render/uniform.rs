//! Uniform blocks and the payloads the demo shaders read
//!
//! A [`UniformBlock`] is allocated once with exactly `size_of::<T>()` bytes of
//! host-coherent memory and then only ever overwritten. Rewrites are not
//! double-buffered; the frame driver keeps a single frame in flight so the GPU
//! is never reading a block while it is updated.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

use crate::foundation::math::{Mat4, Vec3};
use crate::render::vulkan::{Buffer, HostMemory, VulkanContext, VulkanError, VulkanResult};

/// Maximum point lights in [`LightsUniform`]
pub const MAX_POINT_LIGHTS: usize = 32;

/// Maximum directional lights in [`LightsUniform`]
pub const MAX_DIR_LIGHTS: usize = 1;

/// Anything that can be bound as a uniform-buffer descriptor
pub trait UniformBinding {
    /// Buffer handle
    fn buffer(&self) -> vk::Buffer;
    /// Bytes bound
    fn range(&self) -> vk::DeviceSize;
    /// Shader stages that read the block
    fn stages(&self) -> vk::ShaderStageFlags;
}

/// Typed fixed-size block mirrored into GPU-visible memory
pub struct UniformBlock<T: Pod, S: HostMemory = Buffer> {
    memory: Option<S>,
    value: T,
    stages: vk::ShaderStageFlags,
}

impl<T: Pod> UniformBlock<T> {
    /// Allocate a host-coherent uniform buffer of `size_of::<T>()` bytes and write `initial`
    pub fn load(ctx: &VulkanContext, initial: T, stages: vk::ShaderStageFlags) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            ctx,
            size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        Self::with_memory(buffer, initial, stages)
    }
}

impl<T: Pod, S: HostMemory> UniformBlock<T, S> {
    /// Wrap existing memory of exactly `size_of::<T>()` bytes and write `initial`
    pub fn with_memory(memory: S, initial: T, stages: vk::ShaderStageFlags) -> VulkanResult<Self> {
        if memory.size() != size_of::<T>() as u64 {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "uniform block needs {} bytes, memory has {}",
                    size_of::<T>(),
                    memory.size()
                ),
            });
        }
        let mut block = Self {
            memory: Some(memory),
            value: initial,
            stages,
        };
        block.update(initial)?;
        Ok(block)
    }

    /// Overwrite the whole block; never reallocates
    pub fn update(&mut self, value: T) -> VulkanResult<()> {
        let memory = self.memory.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "update of a cleaned-up uniform block".to_string(),
        })?;
        memory.write_bytes(0, bytemuck::bytes_of(&value))?;
        self.value = value;
        Ok(())
    }

    /// Last value written
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Read the block back from its memory
    pub fn read_back(&self) -> VulkanResult<T> {
        let memory = self.memory.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "read of a cleaned-up uniform block".to_string(),
        })?;
        let mut value = T::zeroed();
        memory.read_bytes(0, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Block size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        size_of::<T>() as vk::DeviceSize
    }

    /// Whether the memory is still held
    pub fn is_loaded(&self) -> bool {
        self.memory.is_some()
    }

    /// Release the memory; no in-flight command buffer may still read it
    pub fn cleanup(&mut self) {
        self.memory = None;
    }
}

impl<T: Pod> UniformBinding for UniformBlock<T> {
    fn buffer(&self) -> vk::Buffer {
        self.memory.as_ref().map_or_else(vk::Buffer::null, Buffer::handle)
    }

    fn range(&self) -> vk::DeviceSize {
        self.size()
    }

    fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }
}

/// Camera matrices
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub projection: [[f32; 4]; 4],
}

impl ViewProjection {
    /// Pack two matrices
    pub fn new(view: &Mat4, projection: &Mat4) -> Self {
        Self {
            view: (*view).into(),
            projection: (*projection).into(),
        }
    }

    /// Same matrices with the view translation removed, for skyboxes
    pub fn rotation_only(view: &Mat4, projection: &Mat4) -> Self {
        let mut rotation = *view;
        rotation[(0, 3)] = 0.0;
        rotation[(1, 3)] = 0.0;
        rotation[(2, 3)] = 0.0;
        Self::new(&rotation, projection)
    }
}

/// Model matrix and flat colour for non-instanced meshes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelUniform {
    /// Object to world
    pub model: [[f32; 4]; 4],
    /// Flat colour, w is alpha
    pub color: [f32; 4],
}

impl ModelUniform {
    /// Pack a model matrix with an opaque white colour
    pub fn new(model: &Mat4) -> Self {
        Self::with_color(model, &Vec3::new(1.0, 1.0, 1.0))
    }

    /// Pack a model matrix with an opaque `color`
    pub fn with_color(model: &Mat4, color: &Vec3) -> Self {
        Self {
            model: (*model).into(),
            color: [color.x, color.y, color.z, 1.0],
        }
    }
}

/// Scene lights, std140 compatible
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightsUniform {
    /// Eye position, w unused
    pub camera_position: [f32; 4],
    /// Point-light positions, w unused
    pub point_positions: [[f32; 4]; MAX_POINT_LIGHTS],
    /// Point-light radiance, w unused
    pub point_colors: [[f32; 4]; MAX_POINT_LIGHTS],
    /// Point lights in use
    pub point_count: u32,
    _pad0: [u32; 3],
    /// Directional-light directions (pointing from the light), w unused
    pub dir_directions: [[f32; 4]; MAX_DIR_LIGHTS],
    /// Directional-light radiance, w unused
    pub dir_colors: [[f32; 4]; MAX_DIR_LIGHTS],
    /// Directional lights in use
    pub dir_count: u32,
    _pad1: [u32; 3],
}

impl Default for LightsUniform {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl LightsUniform {
    /// Record the eye position used for specular terms
    pub fn set_camera_position(&mut self, position: &Vec3) {
        self.camera_position = [position.x, position.y, position.z, 1.0];
    }

    /// Add a point light; returns its index
    pub fn add_point_light(&mut self, position: &Vec3, color: &Vec3) -> VulkanResult<usize> {
        let index = self.point_count as usize;
        if index >= MAX_POINT_LIGHTS {
            return Err(VulkanError::InvalidOperation {
                reason: format!("at most {MAX_POINT_LIGHTS} point lights are supported"),
            });
        }
        self.point_positions[index] = [position.x, position.y, position.z, 1.0];
        self.point_colors[index] = [color.x, color.y, color.z, 1.0];
        self.point_count += 1;
        Ok(index)
    }

    /// Add a directional light; returns its index
    pub fn add_dir_light(&mut self, direction: &Vec3, color: &Vec3) -> VulkanResult<usize> {
        let index = self.dir_count as usize;
        if index >= MAX_DIR_LIGHTS {
            return Err(VulkanError::InvalidOperation {
                reason: format!("at most {MAX_DIR_LIGHTS} directional lights are supported"),
            });
        }
        let direction = direction.normalize();
        self.dir_directions[index] = [direction.x, direction.y, direction.z, 0.0];
        self.dir_colors[index] = [color.x, color.y, color.z, 1.0];
        self.dir_count += 1;
        Ok(index)
    }
}

/// Roughness fed to the specular prefilter shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RoughnessUniform {
    /// Roughness of the mip being rendered
    pub roughness: f32,
    _pad: [f32; 3],
}

impl RoughnessUniform {
    /// Pack a roughness value
    pub fn new(roughness: f32) -> Self {
        Self {
            roughness,
            _pad: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    fn host_block<T: Pod>(initial: T) -> UniformBlock<T, Vec<u8>> {
        UniformBlock::with_memory(vec![0xAA; size_of::<T>()], initial, vk::ShaderStageFlags::VERTEX).unwrap()
    }

    #[test]
    fn test_load_writes_initial_value() {
        let block = host_block(ModelUniform::new(&Mat4::identity()));
        assert_eq!(block.read_back().unwrap(), ModelUniform::new(&Mat4::identity()));
        assert_eq!(block.size(), 80);
    }

    #[test]
    fn test_model_colour_follows_matrix() {
        let model = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let tinted = ModelUniform::with_color(&model, &Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(tinted.color, [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(tinted.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(ModelUniform::new(&model).color, [1.0; 4]);
        // std140: the vec4 follows the mat4 with no padding
        assert_eq!(bytemuck::offset_of!(ModelUniform::zeroed(), ModelUniform, color), 64);
    }

    #[test]
    fn test_update_then_read_back() {
        let mut block = host_block(RoughnessUniform::new(0.0));
        block.update(RoughnessUniform::new(0.75)).unwrap();
        assert_eq!(block.read_back().unwrap().roughness, 0.75);
        assert_eq!(block.value().roughness, 0.75);
    }

    #[test]
    fn test_repeated_update_is_idempotent() {
        let value = ViewProjection::new(&Mat4::new_scaling(3.0), &Mat4::identity());

        let mut once = host_block(ViewProjection::zeroed());
        once.update(value).unwrap();
        let mut twice = host_block(ViewProjection::zeroed());
        twice.update(value).unwrap();
        twice.update(value).unwrap();

        assert_eq!(once.memory, twice.memory);
        assert_eq!(twice.memory.as_ref().map(Vec::len), Some(size_of::<ViewProjection>()));
    }

    #[test]
    fn test_memory_size_must_match() {
        let result = UniformBlock::with_memory(vec![0u8; 8], ModelUniform::zeroed(), vk::ShaderStageFlags::VERTEX);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_update_after_cleanup_fails() {
        let mut block = host_block(RoughnessUniform::new(0.5));
        block.cleanup();
        assert!(!block.is_loaded());
        assert!(block.update(RoughnessUniform::new(1.0)).is_err());
    }

    #[test]
    fn test_lights_capacity() {
        assert_eq!(size_of::<LightsUniform>(), 16 + 32 * 16 * 2 + 16 + 16 * 2 + 16);

        let mut lights = LightsUniform::default();
        for i in 0..MAX_POINT_LIGHTS {
            assert_eq!(lights.add_point_light(&Vec3::new(i as f32, 0.0, 0.0), &Vec3::repeat(1.0)).unwrap(), i);
        }
        assert!(lights.add_point_light(&Vec3::zeros(), &Vec3::zeros()).is_err());
        assert_eq!(lights.point_count as usize, MAX_POINT_LIGHTS);

        assert!(lights.add_dir_light(&Vec3::new(0.0, -2.0, 0.0), &Vec3::repeat(1.0)).is_ok());
        assert!(lights.add_dir_light(&Vec3::y(), &Vec3::repeat(1.0)).is_err());
        assert_eq!(lights.dir_directions[0], [0.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rotation_only_drops_translation() {
        let view = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let packed = ViewProjection::rotation_only(&view, &Mat4::identity());
        assert_eq!(packed.view[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
