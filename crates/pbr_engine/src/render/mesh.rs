//! Meshes and texture sets
//!
//! [`Geometry`] turns raw triangle data into a deduplicated indexed mesh with
//! per-triangle tangents. [`Mesh`] owns the uploaded vertex, index and optional
//! instance buffers, a model transform and a [`TextureSet`]. Render passes only
//! borrow the raw handles, so meshes and textures must be cleaned up by their
//! owner after every pass using them has been cleaned up.

use ash::vk;
use std::collections::HashMap;
use std::path::Path;

use crate::assets::{HdrImageData, ImageData, ObjLoader};
use crate::foundation::math::{Mat4, Vec2, Vec3};
use crate::render::vertex_layout::{ModelInstance, Vertex};
use crate::render::vulkan::allocator::{mip_extent, mip_level_count};
use crate::render::vulkan::{Buffer, Image, ImageDescription, ImageView, Sampler, VulkanContext, VulkanError, VulkanResult};

/// Indexed triangle list ready for upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    /// Unique vertices
    pub vertices: Vec<Vertex>,
    /// Three indices per triangle
    pub indices: Vec<u32>,
}

type VertexKey = [u32; 8];

fn vertex_key(vertex: &Vertex) -> VertexKey {
    let [px, py, pz] = vertex.position;
    let [nx, ny, nz] = vertex.normal;
    let [u, v] = vertex.tex_coord;
    [px, py, pz, nx, ny, nz, u, v].map(f32::to_bits)
}

impl Geometry {
    /// Build from a flat corner list, three corners per triangle
    pub fn from_corners(corners: &[Vertex]) -> VulkanResult<Self> {
        let indices: Vec<u32> = (0..corners.len() as u32).collect();
        Self::build(corners, &indices)
    }

    /// Deduplicate the vertices referenced by `indices`, then compute tangents
    ///
    /// Vertices are equal when position, normal and texture coordinate are
    /// bitwise equal; the first occurrence keeps its slot.
    pub fn build(vertices: &[Vertex], indices: &[u32]) -> VulkanResult<Self> {
        if indices.len() % 3 != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("index count {} is not a multiple of 3", indices.len()),
            });
        }

        let mut unique: Vec<Vertex> = Vec::new();
        let mut lookup: HashMap<VertexKey, u32> = HashMap::new();
        let mut remapped = Vec::with_capacity(indices.len());

        for &index in indices {
            let vertex = vertices.get(index as usize).ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("index {} out of range for {} vertices", index, vertices.len()),
            })?;
            let slot = *lookup.entry(vertex_key(vertex)).or_insert_with(|| {
                unique.push(*vertex);
                unique.len() as u32 - 1
            });
            remapped.push(slot);
        }

        let mut geometry = Self {
            vertices: unique,
            indices: remapped,
        };
        geometry.compute_tangents();
        Ok(geometry)
    }

    /// Per-triangle tangents written onto all three corners; later triangles overwrite shared vertices
    fn compute_tangents(&mut self) {
        for triangle in self.indices.chunks_exact(3) {
            let tangent = triangle_tangent(
                &self.vertices[triangle[0] as usize],
                &self.vertices[triangle[1] as usize],
                &self.vertices[triangle[2] as usize],
            );
            for &index in triangle {
                self.vertices[index as usize].tangent = tangent.into();
            }
        }
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// `f * (duv2.y * e1 - duv1.y * e2)`, normalized
///
/// Falls back to the first edge direction when the UV mapping is degenerate.
pub fn triangle_tangent(v0: &Vertex, v1: &Vertex, v2: &Vertex) -> Vec3 {
    let p0 = Vec3::from(v0.position);
    let edge1 = Vec3::from(v1.position) - p0;
    let edge2 = Vec3::from(v2.position) - p0;

    let uv0 = Vec2::from(v0.tex_coord);
    let delta_uv1 = Vec2::from(v1.tex_coord) - uv0;
    let delta_uv2 = Vec2::from(v2.tex_coord) - uv0;

    let determinant = delta_uv1.x * delta_uv2.y - delta_uv2.x * delta_uv1.y;
    let tangent = if determinant.abs() > f32::EPSILON {
        let f = 1.0 / determinant;
        (edge1 * delta_uv2.y - edge2 * delta_uv1.y) * f
    } else {
        edge1
    };
    tangent.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::x)
}

/// Model matrix built by right-multiplying rotations, scales and translations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelTransform {
    matrix: Mat4,
}

impl Default for ModelTransform {
    fn default() -> Self {
        Self {
            matrix: Mat4::identity(),
        }
    }
}

impl ModelTransform {
    /// Reset to identity
    pub fn restore(&mut self) {
        self.matrix = Mat4::identity();
    }

    /// Rotate by `angle` radians about `axis`
    pub fn rotate(&mut self, angle: f32, axis: &Vec3) {
        let rotation = Mat4::from_axis_angle(&nalgebra::Unit::new_normalize(*axis), angle);
        self.matrix *= rotation;
    }

    /// Scale per axis
    pub fn scale(&mut self, factors: &Vec3) {
        self.matrix *= Mat4::new_nonuniform_scaling(factors);
    }

    /// Translate
    pub fn translate(&mut self, offset: &Vec3) {
        self.matrix *= Mat4::new_translation(offset);
    }

    /// Current model matrix
    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }
}

/// Image plus a view over all of its mips
pub struct Texture {
    image: Image,
    view: ImageView,
}

impl Texture {
    fn new(ctx: &VulkanContext, image: Image, view_type: vk::ImageViewType) -> VulkanResult<Self> {
        let view = ctx.create_image_view(
            image.handle(),
            image.format(),
            vk::ImageAspectFlags::COLOR,
            image.mip_levels(),
            view_type,
        )?;
        Ok(Self { image, view })
    }

    /// Backing image
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// View handle
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }
}

/// View and sampler handles of one texture, as bound into a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    /// Image view
    pub view: vk::ImageView,
    /// Sampler
    pub sampler: vk::Sampler,
}

/// Ordered textures sharing one lazily created sampler
pub struct TextureSet {
    textures: Vec<Texture>,
    sampler: Option<Sampler>,
    address_mode: vk::SamplerAddressMode,
}

impl Default for TextureSet {
    fn default() -> Self {
        Self::new(vk::SamplerAddressMode::REPEAT)
    }
}

impl TextureSet {
    /// Empty set whose sampler will use `address_mode`
    pub fn new(address_mode: vk::SamplerAddressMode) -> Self {
        Self {
            textures: Vec::new(),
            sampler: None,
            address_mode,
        }
    }

    fn push(&mut self, ctx: &VulkanContext, texture: Texture) -> VulkanResult<usize> {
        if self.sampler.is_none() {
            self.sampler = Some(Sampler::new(ctx, self.address_mode)?);
        }
        self.textures.push(texture);
        Ok(self.textures.len() - 1)
    }

    /// Decode an 8-bit image file and upload it with a full mip chain
    pub fn load_texture_2d<P: AsRef<Path>>(
        &mut self,
        ctx: &VulkanContext,
        path: P,
        format: vk::Format,
    ) -> VulkanResult<usize> {
        let data = ImageData::from_file(path)?;
        self.load_image_2d(ctx, &data, format)
    }

    /// Upload decoded RGBA8 pixels with a full mip chain
    pub fn load_image_2d(&mut self, ctx: &VulkanContext, data: &ImageData, format: vk::Format) -> VulkanResult<usize> {
        let mip_levels = mip_level_count(data.width, data.height);
        let image = ctx.create_image(
            &ImageDescription::new(
                data.width,
                data.height,
                format,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            )
            .with_mip_levels(mip_levels),
        )?;
        ctx.upload_layer(&image, &data.data, 0)?;
        ctx.generate_mipmaps(image.handle(), format, data.width, data.height, mip_levels, 0)?;

        let texture = Texture::new(ctx, image, vk::ImageViewType::TYPE_2D)?;
        self.push(ctx, texture)
    }

    /// Upload one grayscale bitmap as a single-mip R8 texture
    pub fn load_r8(&mut self, ctx: &VulkanContext, pixels: &[u8], width: u32, height: u32) -> VulkanResult<usize> {
        let image = ctx.create_image(&ImageDescription::new(
            width,
            height,
            vk::Format::R8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ))?;
        ctx.upload_layer(&image, pixels, 0)?;
        ctx.transition_image_layout(
            image.handle(),
            image.format(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            1,
            1,
        )?;

        let texture = Texture::new(ctx, image, vk::ImageViewType::TYPE_2D)?;
        self.push(ctx, texture)
    }

    /// Six square face files (+X, -X, +Y, -Y, +Z, -Z) as one mipmapped cubemap
    pub fn load_cubemap_from_files<P: AsRef<Path>>(
        &mut self,
        ctx: &VulkanContext,
        faces: &[P; 6],
        format: vk::Format,
    ) -> VulkanResult<usize> {
        let faces = faces
            .iter()
            .map(ImageData::from_file)
            .collect::<Result<Vec<_>, _>>()?;

        let size = faces[0].width;
        if let Some(face) = faces.iter().find(|face| face.width != size || face.height != size) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "cubemap faces must be square and equal: {}x{} vs {}x{}",
                    face.width, face.height, size, size
                ),
            });
        }

        let mip_levels = mip_level_count(size, size);
        let image = ctx.create_image(
            &ImageDescription::new(
                size,
                size,
                format,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            )
            .with_mip_levels(mip_levels)
            .cubemap(),
        )?;
        for (layer, face) in faces.iter().enumerate() {
            ctx.upload_layer(&image, &face.data, layer as u32)?;
        }
        for layer in 0..6 {
            ctx.generate_mipmaps(image.handle(), format, size, size, mip_levels, layer)?;
        }

        let texture = Texture::new(ctx, image, vk::ImageViewType::CUBE)?;
        self.push(ctx, texture)
    }

    /// Harvest six rendered faces into a new mipmapped cubemap
    ///
    /// Each face must be a `size`-square image of `format` in
    /// TRANSFER_SRC_OPTIMAL. Nothing is read back to the CPU.
    pub fn load_cubemap_from_images(
        &mut self,
        ctx: &VulkanContext,
        faces: &[vk::Image],
        size: u32,
        format: vk::Format,
    ) -> VulkanResult<usize> {
        let mip_levels = mip_level_count(size, size);
        let index = self.create_empty_cubemap(ctx, size, format, mip_levels)?;
        let image = self.textures[index].image.handle();

        self.write_cubemap_mip(ctx, index, faces, 0)?;
        for layer in 0..6 {
            ctx.generate_mipmaps(image, format, size, size, mip_levels, layer)?;
        }
        Ok(index)
    }

    /// Cubemap with every mip of every face in TRANSFER_DST_OPTIMAL, ready for [`Self::write_cubemap_mip`]
    pub fn create_empty_cubemap(
        &mut self,
        ctx: &VulkanContext,
        size: u32,
        format: vk::Format,
        mip_levels: u32,
    ) -> VulkanResult<usize> {
        let image = ctx.create_image(
            &ImageDescription::new(
                size,
                size,
                format,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            )
            .with_mip_levels(mip_levels)
            .cubemap(),
        )?;
        ctx.transition_image_layout(
            image.handle(),
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            mip_levels,
            6,
        )?;

        let texture = Texture::new(ctx, image, vk::ImageViewType::CUBE)?;
        self.push(ctx, texture)
    }

    /// Copy six rendered faces into mip `mip` of cubemap `index`
    pub fn write_cubemap_mip(&self, ctx: &VulkanContext, index: usize, faces: &[vk::Image], mip: u32) -> VulkanResult<()> {
        let texture = self.get(index)?;
        if faces.len() != 6 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("a cubemap needs 6 faces, got {}", faces.len()),
            });
        }
        let extent = texture.image.extent();
        let (width, height) = mip_extent(extent.width, extent.height, mip);
        for (layer, &face) in faces.iter().enumerate() {
            ctx.copy_image(face, texture.image.handle(), width, height, layer as u32, mip)?;
        }
        Ok(())
    }

    /// Move every mip of texture `index` from TRANSFER_DST_OPTIMAL to SHADER_READ_ONLY_OPTIMAL
    pub fn finish_writes(&self, ctx: &VulkanContext, index: usize) -> VulkanResult<()> {
        let image = &self.get(index)?.image;
        ctx.transition_image_layout(
            image.handle(),
            image.format(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            image.mip_levels(),
            image.layers(),
        )
    }

    /// Harvest one rendered image (TRANSFER_SRC_OPTIMAL) into a single-mip 2D texture
    pub fn load_texture_from_image(
        &mut self,
        ctx: &VulkanContext,
        source: vk::Image,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> VulkanResult<usize> {
        let image = ctx.create_image(&ImageDescription::new(
            width,
            height,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ))?;
        ctx.transition_image_layout(
            image.handle(),
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
            1,
        )?;
        ctx.copy_image(source, image.handle(), width, height, 0, 0)?;
        ctx.transition_image_layout(
            image.handle(),
            format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            1,
            1,
        )?;

        let texture = Texture::new(ctx, image, vk::ImageViewType::TYPE_2D)?;
        self.push(ctx, texture)
    }

    /// Decode a Radiance HDR file into an RGBA32F texture
    pub fn load_hdr<P: AsRef<Path>>(&mut self, ctx: &VulkanContext, path: P) -> VulkanResult<usize> {
        let data = HdrImageData::from_file(path)?;
        self.load_hdr_from_data(ctx, &data)
    }

    /// Upload RGBA32F texels as a single-mip texture
    ///
    /// Fails with `UnsupportedFormat` on devices that cannot linearly filter
    /// RGBA32F, since the shared sampler is linear.
    pub fn load_hdr_from_data(&mut self, ctx: &VulkanContext, data: &HdrImageData) -> VulkanResult<usize> {
        let format = vk::Format::R32G32B32A32_SFLOAT;
        ctx.require_linear_filter(format, "sampling an HDR environment")?;
        let image = ctx.create_image(&ImageDescription::new(
            data.width,
            data.height,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ))?;
        ctx.upload_layer(&image, data.as_bytes(), 0)?;
        ctx.transition_image_layout(
            image.handle(),
            format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            1,
            1,
        )?;

        let texture = Texture::new(ctx, image, vk::ImageViewType::TYPE_2D)?;
        self.push(ctx, texture)
    }

    /// Texture at `index`
    pub fn get(&self, index: usize) -> VulkanResult<&Texture> {
        self.textures
            .get(index)
            .ok_or(VulkanError::ResourceNotFound { id: index as u64 })
    }

    /// Binding for texture `index`
    pub fn binding(&self, index: usize) -> VulkanResult<TextureBinding> {
        let texture = self.get(index)?;
        let sampler = self.sampler.as_ref().map_or_else(vk::Sampler::null, Sampler::handle);
        Ok(TextureBinding {
            view: texture.view(),
            sampler,
        })
    }

    /// Bindings for every texture, in load order
    pub fn bindings(&self) -> Vec<TextureBinding> {
        (0..self.textures.len()).filter_map(|i| self.binding(i).ok()).collect()
    }

    /// Number of textures
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether no texture was loaded
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Destroy every texture and the sampler
    pub fn cleanup(&mut self) {
        self.textures.clear();
        self.sampler = None;
    }
}

impl Drop for TextureSet {
    fn drop(&mut self) {
        if !self.textures.is_empty() {
            log::warn!("[MESH] {} textures dropped without cleanup", self.textures.len());
        }
    }
}

/// Device buffers of an uploaded mesh, as borrowed by draw units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    /// Vertex buffer, binding 0
    pub vertex: vk::Buffer,
    /// 32-bit index buffer
    pub index: vk::Buffer,
    /// Indices drawn
    pub index_count: u32,
    /// Per-instance buffer at binding 1 and instance count
    pub instances: Option<(vk::Buffer, u32)>,
}

/// Uploaded mesh with transform and textures
pub struct Mesh {
    vertex_buffer: Option<Buffer>,
    index_buffer: Option<Buffer>,
    instance_buffer: Option<Buffer>,
    index_count: u32,
    instance_count: u32,
    transform: ModelTransform,
    textures: TextureSet,
}

impl Mesh {
    /// Load, deduplicate and upload an OBJ model
    pub fn from_obj<P: AsRef<Path>>(ctx: &VulkanContext, path: P) -> VulkanResult<Self> {
        let model = ObjLoader::load_obj(path)?;
        let geometry = Geometry::from_corners(&model.corners)?;
        Self::from_geometry(ctx, &geometry)
    }

    /// Upload geometry into device-local buffers
    pub fn from_geometry(ctx: &VulkanContext, geometry: &Geometry) -> VulkanResult<Self> {
        if geometry.indices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot upload empty geometry".to_string(),
            });
        }
        let vertex_buffer = Buffer::device_local(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&geometry.vertices),
        )?;
        let index_buffer = Buffer::device_local(
            ctx,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&geometry.indices),
        )?;

        log::debug!(
            "[MESH] Uploaded {} vertices, {} triangles",
            geometry.vertices.len(),
            geometry.triangle_count()
        );

        Ok(Self {
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            instance_buffer: None,
            index_count: geometry.indices.len() as u32,
            instance_count: 0,
            transform: ModelTransform::default(),
            textures: TextureSet::default(),
        })
    }

    /// Replace the per-instance stream
    pub fn load_instances(&mut self, ctx: &VulkanContext, instances: &[ModelInstance]) -> VulkanResult<()> {
        if instances.is_empty() {
            self.instance_buffer = None;
            self.instance_count = 0;
            return Ok(());
        }
        self.instance_buffer = Some(Buffer::device_local(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(instances),
        )?);
        self.instance_count = instances.len() as u32;
        Ok(())
    }

    /// Handles to draw with; `None` after cleanup
    pub fn buffers(&self) -> Option<MeshBuffers> {
        let vertex = self.vertex_buffer.as_ref()?.handle();
        let index = self.index_buffer.as_ref()?.handle();
        Some(MeshBuffers {
            vertex,
            index,
            index_count: self.index_count,
            instances: self
                .instance_buffer
                .as_ref()
                .map(|buffer| (buffer.handle(), self.instance_count)),
        })
    }

    /// Textures owned by the mesh
    pub fn textures(&self) -> &TextureSet {
        &self.textures
    }

    /// Mutable access for loading textures
    pub fn textures_mut(&mut self) -> &mut TextureSet {
        &mut self.textures
    }

    /// Reset the model matrix to identity
    pub fn restore_transformations(&mut self) {
        self.transform.restore();
    }

    /// Rotate by `angle` radians about `axis`
    pub fn rotate(&mut self, angle: f32, axis: &Vec3) {
        self.transform.rotate(angle, axis);
    }

    /// Scale per axis
    pub fn scale(&mut self, factors: &Vec3) {
        self.transform.scale(factors);
    }

    /// Translate
    pub fn translate(&mut self, offset: &Vec3) {
        self.transform.translate(offset);
    }

    /// Current model matrix
    pub fn model_matrix(&self) -> &Mat4 {
        self.transform.matrix()
    }

    /// Destroy buffers and textures; no pass may still draw the mesh
    pub fn cleanup(&mut self) {
        self.vertex_buffer = None;
        self.index_buffer = None;
        self.instance_buffer = None;
        self.textures.cleanup();
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        if self.vertex_buffer.is_some() {
            log::warn!("[MESH] Mesh with {} indices dropped without cleanup", self.index_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ObjLoader;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    const CUBE: &str = "\
v -0.5 -0.5 0.5
v 0.5 -0.5 0.5
v 0.5 0.5 0.5
v -0.5 0.5 0.5
v -0.5 -0.5 -0.5
v 0.5 -0.5 -0.5
v 0.5 0.5 -0.5
v -0.5 0.5 -0.5
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
vn 0 0 -1
vn 1 0 0
vn -1 0 0
vn 0 1 0
vn 0 -1 0
f 1/1/1 2/2/1 3/3/1 4/4/1
f 6/1/2 5/2/2 8/3/2 7/4/2
f 2/1/3 6/2/3 7/3/3 3/4/3
f 5/1/4 1/2/4 4/3/4 8/4/4
f 4/1/5 3/2/5 7/3/5 8/4/5
f 5/1/6 6/2/6 2/3/6 1/4/6
";

    fn vertex(position: [f32; 3], tex_coord: [f32; 2]) -> Vertex {
        Vertex {
            position,
            normal: [0.0, 0.0, 1.0],
            tangent: [0.0; 3],
            tex_coord,
        }
    }

    #[test]
    fn test_cube_dedup_keeps_one_vertex_per_face_corner() {
        let model = ObjLoader::parse(Cursor::new(CUBE), Path::new("cube.obj")).unwrap();
        assert_eq!(model.corners.len(), 36);

        let geometry = Geometry::from_corners(&model.corners).unwrap();
        assert_eq!(geometry.vertices.len(), 24);
        assert_eq!(geometry.indices.len(), 36);
        assert_eq!(geometry.triangle_count(), 12);
    }

    #[test]
    fn test_duplicates_map_to_first_occurrence() {
        let a = vertex([0.0, 0.0, 0.0], [0.0, 0.0]);
        let b = vertex([1.0, 0.0, 0.0], [1.0, 0.0]);
        let c = vertex([0.0, 1.0, 0.0], [0.0, 1.0]);
        let d = vertex([1.0, 1.0, 0.0], [1.0, 1.0]);
        let geometry = Geometry::from_corners(&[a, b, c, c, b, d]).unwrap();

        assert_eq!(geometry.vertices.len(), 4);
        assert_eq!(geometry.indices, vec![0, 1, 2, 2, 1, 3]);
    }

    #[test]
    fn test_tangent_ignored_for_equality() {
        let mut a = vertex([0.0, 0.0, 0.0], [0.0, 0.0]);
        let b = vertex([1.0, 0.0, 0.0], [1.0, 0.0]);
        let c = vertex([0.0, 1.0, 0.0], [0.0, 1.0]);
        let a_plain = a;
        a.tangent = [0.0, 1.0, 0.0];
        let geometry = Geometry::from_corners(&[a, b, c, a_plain, b, c]).unwrap();
        assert_eq!(geometry.vertices.len(), 3);
    }

    #[test]
    fn test_tangent_matches_closed_form() {
        let v0 = vertex([0.0, 0.0, 0.0], [0.0, 0.0]);
        let v1 = vertex([2.0, 0.0, 0.0], [0.5, 0.25]);
        let v2 = vertex([0.0, 3.0, 1.0], [0.1, 0.75]);

        let e1 = Vec3::new(2.0, 0.0, 0.0);
        let e2 = Vec3::new(0.0, 3.0, 1.0);
        let (du1, dv1) = (0.5_f32, 0.25_f32);
        let (du2, dv2) = (0.1_f32, 0.75_f32);
        let f = 1.0 / (du1 * dv2 - du2 * dv1);
        let expected = ((e1 * dv2 - e2 * dv1) * f).normalize();

        let geometry = Geometry::from_corners(&[v0, v1, v2]).unwrap();
        for v in &geometry.vertices {
            let tangent = Vec3::from(v.tangent);
            assert_relative_eq!(tangent, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_shared_vertex_takes_last_triangle_tangent() {
        let a = vertex([0.0, 0.0, 0.0], [0.0, 0.0]);
        let b = vertex([1.0, 0.0, 0.0], [1.0, 0.0]);
        let c = vertex([0.0, 1.0, 0.0], [0.0, 1.0]);
        // Second triangle has U running along +Y
        let d = vertex([-1.0, 0.0, 0.0], [0.0, 1.0]);
        let e = vertex([0.0, 1.0, 0.0], [1.0, 0.0]);

        let geometry = Geometry::from_corners(&[a, b, c, a, e, d]).unwrap();
        let last = triangle_tangent(&a, &e, &d);
        assert_relative_eq!(Vec3::from(geometry.vertices[0].tangent), last, epsilon = 1e-6);
        assert_relative_eq!(Vec3::from(geometry.vertices[1].tangent), Vec3::x(), epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_uvs_still_give_unit_tangent() {
        let v0 = vertex([0.0, 0.0, 0.0], [0.0, 0.0]);
        let v1 = vertex([0.0, 0.0, 4.0], [0.0, 0.0]);
        let v2 = vertex([0.0, 1.0, 0.0], [0.0, 0.0]);
        let tangent = triangle_tangent(&v0, &v1, &v2);
        assert_relative_eq!(tangent, Vec3::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_indexed_build_rejects_bad_indices() {
        let v = vertex([0.0; 3], [0.0; 2]);
        assert!(Geometry::build(&[v], &[0, 0]).is_err());
        assert!(Geometry::build(&[v], &[0, 0, 3]).is_err());
    }

    #[test]
    fn test_restore_then_scale_gives_diagonal() {
        let mut transform = ModelTransform::default();
        transform.translate(&Vec3::new(4.0, 5.0, 6.0));
        transform.rotate(0.7, &Vec3::y());
        transform.restore();
        transform.scale(&Vec3::repeat(2.0));

        let expected = Mat4::from_diagonal(&crate::foundation::math::Vec4::new(2.0, 2.0, 2.0, 1.0));
        assert_relative_eq!(*transform.matrix(), expected);
    }

    #[test]
    fn test_transforms_right_multiply() {
        let mut transform = ModelTransform::default();
        transform.translate(&Vec3::new(1.0, 0.0, 0.0));
        transform.scale(&Vec3::repeat(3.0));

        // Scale applies first to the point, translation last
        let moved = transform.matrix().transform_point(&crate::foundation::math::Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(moved.x, 4.0);
    }
}
