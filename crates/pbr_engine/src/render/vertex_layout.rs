//! Vertex formats and their Vulkan input descriptions
//!
//! Mesh vertices live at binding 0. Instanced draws add a per-instance
//! [`ModelInstance`] stream at binding 1 whose attributes start at location 4,
//! right after the mesh vertex attributes.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

use crate::foundation::math::Mat4;

/// Mesh vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Object-space tangent, filled in when geometry is built
    pub tangent: [f32; 3],
    /// Texture coordinate, V pointing down
    pub tex_coord: [f32; 2],
}

/// Screen-space glyph vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TextVertex {
    /// Position in normalized device coordinates
    pub position: [f32; 2],
    /// Glyph texture coordinate
    pub tex_coord: [f32; 2],
}

/// Per-instance model transform and material
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelInstance {
    /// Column-major model matrix
    pub model: [[f32; 4]; 4],
    /// Base colour
    pub albedo: [f32; 3],
    /// Perceptual roughness in 0..1
    pub roughness: f32,
    /// Metalness in 0..1
    pub metallic: f32,
}

impl ModelInstance {
    /// Instance at `model` with the given material
    pub fn new(model: &Mat4, albedo: [f32; 3], roughness: f32, metallic: f32) -> Self {
        Self {
            model: (*model).into(),
            albedo,
            roughness,
            metallic,
        }
    }
}

/// Binding and attribute descriptions of one vertex input configuration
#[derive(Debug, Clone, Default)]
pub struct VertexInput {
    /// Buffer bindings
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// Shader attributes
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInput {
    /// Whether a per-instance stream is part of the layout
    pub fn is_instanced(&self) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding.input_rate == vk::VertexInputRate::INSTANCE)
    }
}

fn attribute(binding: u32, location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding,
        location,
        format,
        offset: offset as u32,
    }
}

impl Vertex {
    /// Binding 0 with locations 0..3
    pub fn input() -> VertexInput {
        VertexInput {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: size_of::<Self>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                attribute(0, 0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
                attribute(0, 1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
                attribute(0, 2, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, tangent)),
                attribute(0, 3, vk::Format::R32G32_SFLOAT, offset_of!(Self, tex_coord)),
            ],
        }
    }

    /// Mesh vertices plus a [`ModelInstance`] stream at binding 1
    pub fn instanced_input() -> VertexInput {
        let mut input = Self::input();
        input.bindings.push(vk::VertexInputBindingDescription {
            binding: 1,
            stride: size_of::<ModelInstance>() as u32,
            input_rate: vk::VertexInputRate::INSTANCE,
        });

        let column = size_of::<[f32; 4]>();
        let model = offset_of!(ModelInstance, model);
        for i in 0..4 {
            input
                .attributes
                .push(attribute(1, 4 + i as u32, vk::Format::R32G32B32A32_SFLOAT, model + i * column));
        }
        input.attributes.extend([
            attribute(1, 8, vk::Format::R32G32B32_SFLOAT, offset_of!(ModelInstance, albedo)),
            attribute(1, 9, vk::Format::R32_SFLOAT, offset_of!(ModelInstance, roughness)),
            attribute(1, 10, vk::Format::R32_SFLOAT, offset_of!(ModelInstance, metallic)),
        ]);
        input
    }
}

impl TextVertex {
    /// Binding 0 with locations 0..1
    pub fn input() -> VertexInput {
        VertexInput {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: size_of::<Self>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                attribute(0, 0, vk::Format::R32G32_SFLOAT, offset_of!(Self, position)),
                attribute(0, 1, vk::Format::R32G32_SFLOAT, offset_of!(Self, tex_coord)),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_packed() {
        assert_eq!(size_of::<Vertex>(), 44);
        let input = Vertex::input();
        let offsets: Vec<u32> = input.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);
        assert!(!input.is_instanced());
    }

    #[test]
    fn test_instance_attributes_follow_vertex_locations() {
        let input = Vertex::instanced_input();
        assert!(input.is_instanced());
        assert_eq!(input.bindings[1].stride, 84);

        let instance: Vec<_> = input.attributes.iter().filter(|a| a.binding == 1).collect();
        assert_eq!(instance.len(), 7);
        let locations: Vec<u32> = instance.iter().map(|a| a.location).collect();
        assert_eq!(locations, (4..=10).collect::<Vec<_>>());
        assert_eq!(instance[3].offset, 48);
        assert_eq!(instance[4].offset, 64);
        assert_eq!(instance[6].offset, 80);
    }

    #[test]
    fn test_model_instance_stores_columns() {
        let model = Mat4::new_translation(&crate::foundation::math::Vec3::new(1.0, 2.0, 3.0));
        let instance = ModelInstance::new(&model, [1.0, 0.0, 0.0], 0.5, 0.25);
        assert_eq!(instance.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(instance.roughness, 0.5);
    }
}
