//! Frame driver
//!
//! Owns the window, the Vulkan context and everything drawn, and runs the
//! single-frame-in-flight loop: wait, update uniforms, rebuild text,
//! acquire, submit, present.

use ash::vk;

use pbr_engine::core::config::DemoConfig;
use pbr_engine::foundation::math::Vec2;
use pbr_engine::foundation::time::{FpsCounter, Timer};
use pbr_engine::render::vulkan::{
    FrameSync, Swapchain, SwapchainStatus, VulkanContext, VulkanResult, Window,
};
use pbr_engine::render::{
    Camera, CameraInput, DrawUnitDescription, MeshBinding, RenderPass, TextOverlay, ViewProjection,
};

use crate::scene::Scene;
use crate::DemoError;

/// Key help shown along the bottom edge
const HELP_TEXT: &str = "WASD move, mouse look, Esc quit";

/// Height of an overlay line as a fraction of the window height
const TEXT_SIZE: f32 = 0.03;

/// Demo state, fields in destruction order
pub struct PbrDemo {
    pass: RenderPass,
    text: TextOverlay,
    fps_text: usize,
    scene: Scene,
    camera: Camera,
    timer: Timer,
    fps: FpsCounter,
    sync: FrameSync,
    swapchain: Swapchain,
    context: VulkanContext,
    window: Window,
}

impl PbrDemo {
    /// Open the window, precompute lighting and build the swapchain pass
    pub fn new(config: DemoConfig) -> Result<Self, DemoError> {
        let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
        let context = VulkanContext::new(&mut window, &config.renderer)?;
        let swapchain = Swapchain::new(&context, window_extent(&window))?;

        let scene = Scene::load(&context, &config)?;

        let mut text = TextOverlay::new(&context, &config.text, swapchain.extent())?;
        let fps_text = text.add_text(&context, "FPS: -", Vec2::new(-0.98, -0.98), TEXT_SIZE)?;
        text.add_text(&context, HELP_TEXT, Vec2::new(-0.98, 0.92), TEXT_SIZE)?;

        let samples = context.sample_count(config.renderer.msaa_samples);
        let pass = build_pass(&context, &swapchain, samples, &config, &scene, &mut text)?;
        let sync = FrameSync::new(context.device().clone())?;

        log::info!(
            "[DEMO] Ready at {}x{} with {:?} MSAA",
            swapchain.extent().width,
            swapchain.extent().height,
            samples
        );

        Ok(Self {
            pass,
            text,
            fps_text,
            scene,
            camera: Camera::new(&config.camera),
            timer: Timer::new(),
            fps: FpsCounter::default(),
            sync,
            swapchain,
            context,
            window,
        })
    }

    /// Run until the window closes
    pub fn run(&mut self) -> VulkanResult<()> {
        while !self.window.should_close() {
            self.window.poll_events();
            if self.window.take_resized() {
                self.recreate_swapchain()?;
            }

            let (width, height) = self.window.get_framebuffer_size();
            if width == 0 || height == 0 {
                self.window.wait_events();
                continue;
            }

            self.draw_frame()?;
        }
        log::info!("[DEMO] {} frames in {:.1}s", self.timer.frame_count(), self.timer.total_seconds());
        Ok(())
    }

    fn camera_input(&self) -> CameraInput {
        CameraInput {
            cursor: self.window.cursor_position(),
            forward: self.window.is_key_pressed(glfw::Key::W),
            backward: self.window.is_key_pressed(glfw::Key::S),
            left: self.window.is_key_pressed(glfw::Key::A),
            right: self.window.is_key_pressed(glfw::Key::D),
        }
    }

    fn draw_frame(&mut self) -> VulkanResult<()> {
        let frame_time = self.timer.tick();
        let input = self.camera_input();
        self.camera.update(&input, frame_time.as_secs_f32());

        self.sync.in_flight.wait()?;
        self.update_uniforms()?;
        if let Some(frames) = self.fps.tick(frame_time) {
            self.text.change_text(self.fps_text, &format!("FPS: {frames}"))?;
        }
        self.pass.update_text(&self.context, &mut self.text)?;

        let image_available = self.sync.image_available.handle();
        let (index, acquired) = self.swapchain.acquire_next_image(image_available)?;
        if acquired == SwapchainStatus::NeedsRecreate {
            return self.recreate_swapchain();
        }

        self.sync.in_flight.reset()?;
        self.pass
            .submit(Some(index as usize), Some(image_available), Some(&self.sync.in_flight))?;
        let presented = self
            .swapchain
            .present(self.context.present_queue(), index, self.pass.render_complete(index as usize)?)?;

        if acquired == SwapchainStatus::Suboptimal || presented != SwapchainStatus::Optimal {
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn update_uniforms(&mut self) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let view = self.camera.view_matrix();
        let projection = self.camera.projection_matrix(aspect);

        self.scene
            .view_projection
            .update(ViewProjection::new(&view, &projection))?;
        self.scene
            .skybox_view
            .update(ViewProjection::rotation_only(&view, &projection))?;

        let mut lights = *self.scene.lights.value();
        lights.set_camera_position(&self.camera.position());
        self.scene.lights.update(lights)
    }

    /// Rebuild the swapchain and everything sized by it; skipped while minimised
    fn recreate_swapchain(&mut self) -> VulkanResult<()> {
        let extent = window_extent(&self.window);
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }

        self.context.wait_idle()?;
        let swapchain = self.swapchain.recreate(&self.context, extent)?;
        self.text.resize(&self.context, &mut self.pass, swapchain.extent())?;
        self.pass.resize(&self.context, &swapchain)?;
        self.swapchain = swapchain;

        log::info!(
            "[DEMO] Swapchain recreated at {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }

    /// Release GPU resources in dependency order; the swapchain and context follow on drop
    pub fn cleanup(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("[DEMO] Device did not go idle before cleanup: {}", e);
        }
        self.pass.cleanup();
        self.text.cleanup();
        self.scene.cleanup();
        log::info!("[DEMO] Cleaned up");
    }
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let (width, height) = window.get_framebuffer_size();
    vk::Extent2D { width, height }
}

/// Spheres, light markers, skybox then text, all drawn into every swapchain image
fn build_pass(
    ctx: &VulkanContext,
    swapchain: &Swapchain,
    samples: vk::SampleCountFlags,
    config: &DemoConfig,
    scene: &Scene,
    text: &mut TextOverlay,
) -> VulkanResult<RenderPass> {
    let assets = &config.assets;
    let mut pass = RenderPass::for_swapchain(ctx, swapchain, samples, &config.renderer.descriptor_pool)?;

    let spheres = MeshBinding::from_mesh(&scene.sphere)?
        .uniform(&scene.view_projection)
        .uniform(&scene.lights)
        .textures(scene.ibl.pbr_bindings()?);
    let pbr = DrawUnitDescription::new(assets.shaders("pbr", "pbr"))
        .uniform(vk::ShaderStageFlags::VERTEX)
        .uniform(vk::ShaderStageFlags::FRAGMENT)
        .textures(3);
    pass.add_instanced_draw_unit(&[spheres], &pbr)?;

    let mut markers = Vec::with_capacity(scene.markers.len());
    for model in &scene.markers {
        markers.push(
            MeshBinding::from_mesh(&scene.sphere)?
                .uniform(&scene.view_projection)
                .uniform(model),
        );
    }
    let light = DrawUnitDescription::new(assets.shaders("light", "light"))
        .uniform(vk::ShaderStageFlags::VERTEX)
        .uniform(vk::ShaderStageFlags::VERTEX);
    pass.add_draw_unit(&markers, &light)?;

    let skybox = MeshBinding::from_mesh(&scene.cube)?
        .uniform(&scene.skybox_view)
        .texture(scene.ibl.environment()?);
    let sky = DrawUnitDescription::new(assets.shaders("skybox", "skybox"))
        .uniform(vk::ShaderStageFlags::VERTEX)
        .textures(1)
        .double_sided();
    pass.add_draw_unit(&[skybox], &sky)?;

    text.attach(&mut pass, assets.shaders("text", "text"))?;
    pass.record_commands()?;

    log::debug!("[DEMO] Swapchain pass built with {} draw units", pass.draw_unit_count());
    Ok(pass)
}
