//! Scene contents: the material sphere grid, light markers and skybox

use ash::vk;

use pbr_engine::core::config::DemoConfig;
use pbr_engine::foundation::math::{Mat4, Vec3};
use pbr_engine::render::precompute::{precompute_ibl, IblTextures};
use pbr_engine::render::vulkan::{VulkanContext, VulkanResult};
use pbr_engine::render::{
    LightsUniform, Mesh, ModelInstance, ModelTransform, ModelUniform, UniformBlock, ViewProjection,
};

/// Spheres per grid row and column
pub const GRID_SIZE: usize = 10;

/// Distance between neighbouring sphere centres
pub const GRID_SPACING: f32 = 2.5;

/// Lowest roughness in the grid; fully smooth spheres alias
pub const MIN_ROUGHNESS: f32 = 0.05;

/// Albedo shared by every grid sphere
pub const SPHERE_ALBEDO: [f32; 3] = [0.5, 0.0, 0.0];

/// Point lights in front of the grid corners
pub const LIGHT_POSITIONS: [[f32; 3]; 4] = [
    [-10.0, 10.0, 10.0],
    [10.0, 10.0, 10.0],
    [-10.0, -10.0, 10.0],
    [10.0, -10.0, 10.0],
];

/// Radiance of every point light
pub const LIGHT_COLOR: [f32; 3] = [300.0, 300.0, 300.0];

/// Display colour of a light marker: the radiance scaled so its brightest channel is 1
pub fn marker_color(radiance: &Vec3) -> Vec3 {
    let peak = radiance.max();
    if peak > 0.0 {
        radiance / peak
    } else {
        Vec3::zeros()
    }
}

/// Marker sphere scale
pub const MARKER_SCALE: f32 = 0.5;

/// Roughness of grid column `column`
pub fn grid_roughness(column: usize) -> f32 {
    (column as f32 / GRID_SIZE as f32).clamp(MIN_ROUGHNESS, 1.0)
}

/// Metalness of grid row `row`
pub fn grid_metallic(row: usize) -> f32 {
    row as f32 / GRID_SIZE as f32
}

/// Centre of sphere (`row`, `column`), the grid centred on the origin
pub fn grid_position(row: usize, column: usize) -> Vec3 {
    let offset = (GRID_SIZE as f32 - 1.0) * 0.5;
    Vec3::new(
        (column as f32 - offset) * GRID_SPACING,
        (row as f32 - offset) * GRID_SPACING,
        0.0,
    )
}

/// One instance per grid cell: roughness rises along a row, metalness up a column
pub fn sphere_grid() -> Vec<ModelInstance> {
    (0..GRID_SIZE)
        .flat_map(|row| (0..GRID_SIZE).map(move |column| (row, column)))
        .map(|(row, column)| {
            let model = Mat4::new_translation(&grid_position(row, column));
            ModelInstance::new(&model, SPHERE_ALBEDO, grid_roughness(column), grid_metallic(row))
        })
        .collect()
}

/// Model matrix of the marker for light `position`
pub fn marker_transform(position: &Vec3) -> ModelTransform {
    let mut transform = ModelTransform::default();
    transform.translate(position);
    transform.scale(&Vec3::repeat(MARKER_SCALE));
    transform
}

/// GPU resources drawn every frame
pub struct Scene {
    /// Sphere with the grid instances loaded; also drawn uninstanced as light markers
    pub sphere: Mesh,
    /// Unit cube for the skybox and the cubemap captures
    pub cube: Mesh,
    /// Precomputed lighting
    pub ibl: IblTextures,
    /// Camera matrices for the spheres and markers
    pub view_projection: UniformBlock<ViewProjection>,
    /// Camera rotation for the skybox
    pub skybox_view: UniformBlock<ViewProjection>,
    /// Point lights and eye position
    pub lights: UniformBlock<LightsUniform>,
    /// Model matrix and tint of each light marker
    pub markers: Vec<UniformBlock<ModelUniform>>,
}

impl Scene {
    /// Load meshes, run the lighting precomputation and create the uniform blocks
    pub fn load(ctx: &VulkanContext, config: &DemoConfig) -> VulkanResult<Self> {
        let mut sphere = Mesh::from_obj(ctx, &config.assets.sphere_model)?;
        sphere.load_instances(ctx, &sphere_grid())?;
        let cube = Mesh::from_obj(ctx, &config.assets.cube_model)?;

        let ibl = precompute_ibl(
            ctx,
            &config.ibl,
            &config.assets,
            &config.renderer.descriptor_pool,
            &cube,
        )?;

        let mut lights = LightsUniform::default();
        for position in LIGHT_POSITIONS {
            lights.add_point_light(&Vec3::from(position), &Vec3::from(LIGHT_COLOR))?;
        }
        let markers = LIGHT_POSITIONS
            .iter()
            .map(|position| {
                let transform = marker_transform(&Vec3::from(*position));
                let tint = marker_color(&Vec3::from(LIGHT_COLOR));
                UniformBlock::load(
                    ctx,
                    ModelUniform::with_color(transform.matrix(), &tint),
                    vk::ShaderStageFlags::VERTEX,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let identity = Mat4::identity();
        let camera = ViewProjection::new(&identity, &identity);
        log::info!(
            "[SCENE] {} spheres, {} lights",
            GRID_SIZE * GRID_SIZE,
            LIGHT_POSITIONS.len()
        );

        Ok(Self {
            sphere,
            cube,
            ibl,
            view_projection: UniformBlock::load(ctx, camera, vk::ShaderStageFlags::VERTEX)?,
            skybox_view: UniformBlock::load(ctx, camera, vk::ShaderStageFlags::VERTEX)?,
            lights: UniformBlock::load(ctx, lights, vk::ShaderStageFlags::FRAGMENT)?,
            markers,
        })
    }

    /// Release everything; no pass may still draw the scene
    pub fn cleanup(&mut self) {
        self.markers.iter_mut().for_each(UniformBlock::cleanup);
        self.lights.cleanup();
        self.skybox_view.cleanup();
        self.view_projection.cleanup();
        self.ibl.cleanup();
        self.cube.cleanup();
        self.sphere.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pbr_engine::foundation::math::Point3;

    #[test]
    fn test_grid_material_ranges() {
        let grid = sphere_grid();
        assert_eq!(grid.len(), GRID_SIZE * GRID_SIZE);
        assert_relative_eq!(grid[0].roughness, MIN_ROUGHNESS);
        assert_relative_eq!(grid[0].metallic, 0.0);
        assert_relative_eq!(grid[GRID_SIZE - 1].roughness, 0.9);
        assert_relative_eq!(grid[GRID_SIZE * (GRID_SIZE - 1)].metallic, 0.9);
    }

    #[test]
    fn test_material_follows_position() {
        for (index, instance) in sphere_grid().iter().enumerate() {
            let (row, column) = (index / GRID_SIZE, index % GRID_SIZE);
            let position = grid_position(row, column);
            assert_relative_eq!(instance.model[3][0], position.x);
            assert_relative_eq!(instance.model[3][1], position.y);
            assert_relative_eq!(instance.roughness, grid_roughness(column));
            assert_relative_eq!(instance.metallic, grid_metallic(row));
        }
    }

    #[test]
    fn test_grid_is_centred() {
        let first = grid_position(0, 0);
        let last = grid_position(GRID_SIZE - 1, GRID_SIZE - 1);
        assert_relative_eq!(first + last, Vec3::zeros());
        assert_relative_eq!(grid_position(0, 1).x - first.x, GRID_SPACING);
    }

    #[test]
    fn test_marker_takes_light_hue() {
        assert_relative_eq!(marker_color(&Vec3::from(LIGHT_COLOR)), Vec3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(marker_color(&Vec3::new(300.0, 150.0, 0.0)), Vec3::new(1.0, 0.5, 0.0));
        assert_relative_eq!(marker_color(&Vec3::zeros()), Vec3::zeros());
    }

    #[test]
    fn test_marker_transform_places_and_shrinks() {
        let position = Vec3::new(10.0, -10.0, 10.0);
        let matrix = *marker_transform(&position).matrix();
        let centre = matrix.transform_point(&Point3::origin());
        assert_relative_eq!(centre.coords, position);
        let edge = matrix.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!((edge.coords - position).norm(), MARKER_SCALE);
    }
}
