//! Image-based lighting precomputation
//!
//! Run once at startup, strictly in order:
//!
//! 1. capture the equirectangular HDR environment into a cubemap
//! 2. convolve it into a small irradiance cubemap
//! 3. prefilter it into one mip per roughness level
//! 4. integrate the split-sum BRDF into a 2D lookup table
//!
//! Every stage renders into a disposable offscreen [`RenderPass`], waits for
//! the graphics queue to drain, copies the rendered images into textures that
//! outlive the pass, then tears the pass down before the next stage starts.

use ash::vk;
use std::path::Path;

use crate::core::config::{AssetConfig, DescriptorPoolConfig, IblConfig};
use crate::foundation::math::{deg_to_rad, look_at, perspective_zero_to_one, Mat4, Vec3};
use crate::render::mesh::{Geometry, Mesh, MeshBuffers, TextureBinding, TextureSet};
use crate::render::render_pass::{DrawUnitDescription, MeshBinding, RenderPass};
use crate::render::uniform::{RoughnessUniform, UniformBinding, UniformBlock, ViewProjection};
use crate::render::vertex_layout::Vertex;
use crate::render::vulkan::allocator::mip_extent;
use crate::render::vulkan::{ShaderPair, VulkanContext, VulkanError, VulkanResult};

/// Format of every captured cubemap face
pub const CAPTURE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Format of the BRDF lookup table
pub const BRDF_LUT_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;

/// Look direction and up vector of each cube face, in layer order +X, -X, +Y, -Y, +Z, -Z
pub const CUBE_FACES: [([f32; 3], [f32; 3]); 6] = [
    ([1.0, 0.0, 0.0], [0.0, -1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, -1.0, 0.0]),
    ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, 0.0, 1.0], [0.0, -1.0, 0.0]),
    ([0.0, 0.0, -1.0], [0.0, -1.0, 0.0]),
];

/// 90 degree square projection shared by all faces
pub fn capture_projection() -> Mat4 {
    perspective_zero_to_one(deg_to_rad(90.0), 1.0, 0.1, 10.0)
}

/// View matrices from the origin through each cube face
pub fn face_views() -> [Mat4; 6] {
    CUBE_FACES.map(|(look, up)| look_at(&Vec3::zeros(), &Vec3::from(look), &Vec3::from(up)))
}

/// Roughness rendered into prefilter level `level` of `levels`
pub fn prefilter_roughness(level: u32, levels: u32) -> f32 {
    if levels <= 1 {
        0.0
    } else {
        level as f32 / (levels - 1) as f32
    }
}

/// Face size of prefilter level `level`
pub fn prefilter_face_size(base: u32, level: u32) -> u32 {
    mip_extent(base, base, level).0
}

/// Two triangles covering clip space, UV (0,0) at the top left
pub fn fullscreen_quad() -> VulkanResult<Geometry> {
    let corner = |x: f32, y: f32| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        tangent: [0.0; 3],
        tex_coord: [(x + 1.0) * 0.5, (y + 1.0) * 0.5],
    };
    let vertices = [corner(-1.0, -1.0), corner(1.0, -1.0), corner(-1.0, 1.0), corner(1.0, 1.0)];
    Geometry::build(&vertices, &[0, 2, 1, 1, 2, 3])
}

/// Textures produced by the precomputation
pub struct IblTextures {
    textures: TextureSet,
    environment: usize,
    irradiance: usize,
    prefiltered: usize,
    brdf_lut: usize,
    prefilter_levels: u32,
}

impl IblTextures {
    /// Captured environment cubemap with a full mip chain
    pub fn environment(&self) -> VulkanResult<TextureBinding> {
        self.textures.binding(self.environment)
    }

    /// Diffuse irradiance cubemap
    pub fn irradiance(&self) -> VulkanResult<TextureBinding> {
        self.textures.binding(self.irradiance)
    }

    /// Specular cubemap, one roughness level per mip
    pub fn prefiltered(&self) -> VulkanResult<TextureBinding> {
        self.textures.binding(self.prefiltered)
    }

    /// Split-sum BRDF lookup table
    pub fn brdf_lut(&self) -> VulkanResult<TextureBinding> {
        self.textures.binding(self.brdf_lut)
    }

    /// Mips in the prefiltered cubemap
    pub fn prefilter_levels(&self) -> u32 {
        self.prefilter_levels
    }

    /// Irradiance, prefiltered and BRDF LUT, in the order the PBR shader samples them
    pub fn pbr_bindings(&self) -> VulkanResult<[TextureBinding; 3]> {
        Ok([self.irradiance()?, self.prefiltered()?, self.brdf_lut()?])
    }

    /// Destroy all four textures
    pub fn cleanup(&mut self) {
        self.textures.cleanup();
    }
}

/// Stage inputs shared by every capture
struct CaptureContext<'a> {
    ctx: &'a VulkanContext,
    pool: &'a DescriptorPoolConfig,
    cube: MeshBuffers,
}

impl CaptureContext<'_> {
    /// Render `source` through `shaders` once per cube face and hand the six faces to `harvest`
    fn capture<F>(
        &self,
        size: u32,
        shaders: ShaderPair,
        source: TextureBinding,
        roughness: Option<&dyn UniformBinding>,
        harvest: F,
    ) -> VulkanResult<()>
    where
        F: FnOnce(&[vk::Image]) -> VulkanResult<()>,
    {
        let projection = capture_projection();
        let mut views = face_views()
            .iter()
            .map(|view| {
                UniformBlock::load(
                    self.ctx,
                    ViewProjection::new(view, &projection),
                    vk::ShaderStageFlags::VERTEX,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let mut pass = RenderPass::offscreen(self.ctx, CAPTURE_FORMAT, size, CUBE_FACES.len(), self.pool)?;

        let mut description = DrawUnitDescription::new(shaders)
            .uniform(vk::ShaderStageFlags::VERTEX)
            .textures(1)
            .double_sided()
            .targeting(0);
        if let Some(block) = roughness {
            description = description.uniform(block.stages());
        }
        let bindings: Vec<MeshBinding<'_>> = views
            .iter()
            .map(|view| {
                let binding = MeshBinding::new(self.cube).uniform(view);
                let binding = match roughness {
                    Some(block) => binding.uniform(block),
                    None => binding,
                };
                binding.texture(source)
            })
            .collect();

        let result = (|| {
            let first = pass.add_draw_unit(&bindings[..1], &description)?;
            for face in 1..bindings.len() {
                pass.share_draw_unit(first, &bindings[face..=face], Some(face))?;
            }
            pass.record_commands()?;
            pass.submit(None, None, None)?;
            self.ctx.queue_wait_idle()?;
            harvest(&pass.color_images()?)
        })();

        pass.cleanup();
        drop(bindings);
        views.iter_mut().for_each(UniformBlock::cleanup);
        result
    }
}

/// Run all four stages; `cube` is drawn around the origin for every capture
pub fn precompute_ibl(
    ctx: &VulkanContext,
    config: &IblConfig,
    assets: &AssetConfig,
    pool: &DescriptorPoolConfig,
    cube: &Mesh,
) -> VulkanResult<IblTextures> {
    let cube = cube.buffers().ok_or_else(|| VulkanError::InvalidOperation {
        reason: "capture cube was cleaned up".to_string(),
    })?;
    let capture = CaptureContext { ctx, pool, cube };
    let mut textures = TextureSet::new(vk::SamplerAddressMode::CLAMP_TO_EDGE);

    let environment = capture_environment(&capture, config, assets, &mut textures)?;
    log::info!(
        "[IBL] Captured environment {}x{} from {:?}",
        config.environment_size,
        config.environment_size,
        assets.environment_hdr
    );

    let source = textures.binding(environment)?;
    let size = config.irradiance_size;
    let mut irradiance = None;
    capture.capture(size, assets.shaders("cube", "irradiance"), source, None, |faces| {
        irradiance = Some(textures.load_cubemap_from_images(ctx, faces, size, CAPTURE_FORMAT)?);
        Ok(())
    })?;
    let irradiance = irradiance.ok_or_else(|| harvest_missing("irradiance"))?;
    log::info!("[IBL] Irradiance convolved at {}x{}", size, size);

    let prefiltered = prefilter(&capture, config, assets, source, &mut textures)?;
    log::info!(
        "[IBL] Prefiltered {} roughness levels from {}x{}",
        config.prefilter_mip_levels,
        config.prefilter_size,
        config.prefilter_size
    );

    let brdf_lut = integrate_brdf(ctx, pool, config.brdf_lut_size, &assets.shader_dir, &mut textures)?;
    log::info!("[IBL] BRDF lookup table integrated at {}x{}", config.brdf_lut_size, config.brdf_lut_size);

    Ok(IblTextures {
        textures,
        environment,
        irradiance,
        prefiltered,
        brdf_lut,
        prefilter_levels: config.prefilter_mip_levels,
    })
}

fn harvest_missing(stage: &str) -> VulkanError {
    VulkanError::InvalidOperation {
        reason: format!("{stage} stage produced no texture"),
    }
}

fn capture_environment(
    capture: &CaptureContext<'_>,
    config: &IblConfig,
    assets: &AssetConfig,
    textures: &mut TextureSet,
) -> VulkanResult<usize> {
    let mut hdr = TextureSet::new(vk::SamplerAddressMode::CLAMP_TO_EDGE);
    let result = hdr.load_hdr(capture.ctx, &assets.environment_hdr).and_then(|index| {
        let source = hdr.binding(index)?;
        let size = config.environment_size;
        let mut environment = None;
        capture.capture(size, assets.shaders("cube", "equirect"), source, None, |faces| {
            environment = Some(textures.load_cubemap_from_images(capture.ctx, faces, size, CAPTURE_FORMAT)?);
            Ok(())
        })?;
        environment.ok_or_else(|| harvest_missing("environment"))
    });
    hdr.cleanup();
    result
}

fn prefilter(
    capture: &CaptureContext<'_>,
    config: &IblConfig,
    assets: &AssetConfig,
    source: TextureBinding,
    textures: &mut TextureSet,
) -> VulkanResult<usize> {
    let levels = config.prefilter_mip_levels;
    let index = textures.create_empty_cubemap(capture.ctx, config.prefilter_size, CAPTURE_FORMAT, levels)?;

    for level in 0..levels {
        let roughness = prefilter_roughness(level, levels);
        let mut block = UniformBlock::load(
            capture.ctx,
            RoughnessUniform::new(roughness),
            vk::ShaderStageFlags::FRAGMENT,
        )?;
        let size = prefilter_face_size(config.prefilter_size, level);
        capture.capture(size, assets.shaders("cube", "prefilter"), source, Some(&block as &dyn UniformBinding), |faces| {
            textures.write_cubemap_mip(capture.ctx, index, faces, level)
        })?;
        block.cleanup();
        log::debug!("[IBL] Prefilter level {} at {}x{}, roughness {:.2}", level, size, size, roughness);
    }

    textures.finish_writes(capture.ctx, index)?;
    Ok(index)
}

fn integrate_brdf(
    ctx: &VulkanContext,
    pool: &DescriptorPoolConfig,
    size: u32,
    shader_dir: &Path,
    textures: &mut TextureSet,
) -> VulkanResult<usize> {
    let mut quad = Mesh::from_geometry(ctx, &fullscreen_quad()?)?;
    let mut pass = RenderPass::offscreen(ctx, BRDF_LUT_FORMAT, size, 1, pool)?;

    let result = (|| {
        let buffers = quad.buffers().ok_or_else(|| harvest_missing("BRDF"))?;
        let description = DrawUnitDescription::new(ShaderPair::named(shader_dir, "brdf")).double_sided();
        pass.add_draw_unit(&[MeshBinding::new(buffers)], &description)?;
        pass.record_commands()?;
        pass.submit(None, None, None)?;
        ctx.queue_wait_idle()?;

        let lut = pass.color_images()?;
        let image = lut.first().copied().ok_or_else(|| harvest_missing("BRDF"))?;
        textures.load_texture_from_image(ctx, image, size, size, BRDF_LUT_FORMAT)
    })();

    pass.cleanup();
    quad.cleanup();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_each_face_centres_its_direction() {
        let projection = capture_projection();
        for ((look, _), view) in CUBE_FACES.iter().zip(face_views()) {
            let clip = projection * view * Vec4::new(look[0], look[1], look[2], 1.0);
            assert!(clip.w > 0.0);
            assert_abs_diff_eq!(clip.x / clip.w, 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(clip.y / clip.w, 0.0, epsilon = 1e-6);
            let depth = clip.z / clip.w;
            assert!((0.0..=1.0).contains(&depth));
        }
    }

    #[test]
    fn test_faces_cover_every_axis_once() {
        let mut looks: Vec<[i32; 3]> = CUBE_FACES
            .iter()
            .map(|(look, _)| look.map(|c| c as i32))
            .collect();
        looks.sort_unstable();
        looks.dedup();
        assert_eq!(looks.len(), 6);
        for (look, up) in CUBE_FACES {
            assert_abs_diff_eq!(Vec3::from(look).dot(&Vec3::from(up)), 0.0);
        }
    }

    #[test]
    fn test_face_up_maps_to_clip_y() {
        let projection = capture_projection();
        for ((look, up), view) in CUBE_FACES.iter().zip(face_views()) {
            let point = Vec3::from(*look) + Vec3::from(*up) * 0.5;
            let clip = projection * view * Vec4::new(point.x, point.y, point.z, 1.0);
            assert_abs_diff_eq!(clip.x / clip.w, 0.0, epsilon = 1e-6);
            assert!(clip.y / clip.w > 0.0);
        }
    }

    #[test]
    fn test_prefilter_levels() {
        let roughness: Vec<f32> = (0..5).map(|level| prefilter_roughness(level, 5)).collect();
        assert_eq!(roughness, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(prefilter_roughness(0, 1), 0.0);

        let sizes: Vec<u32> = (0..5).map(|level| prefilter_face_size(128, level)).collect();
        assert_eq!(sizes, vec![128, 64, 32, 16, 8]);
        assert_eq!(prefilter_face_size(4, 7), 1);
    }

    #[test]
    fn test_fullscreen_quad_covers_clip_space() {
        let quad = fullscreen_quad().unwrap();
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.triangle_count(), 2);
        let min_x = quad.vertices.iter().map(|v| v.position[0]).fold(f32::MAX, f32::min);
        let max_y = quad.vertices.iter().map(|v| v.position[1]).fold(f32::MIN, f32::max);
        assert_eq!(min_x, -1.0);
        assert_eq!(max_y, 1.0);
    }
}
