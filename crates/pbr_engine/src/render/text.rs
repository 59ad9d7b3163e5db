//! Text overlay
//!
//! Glyphs are rasterized once with `fontdue` into one R8 texture each. A
//! string is laid out into one screen-space quad per printable glyph; every
//! quad has its own small vertex buffer and shares a six-index buffer.
//!
//! [`TextRegistry`] holds strings and change tracking and never touches the
//! GPU. [`TextOverlay`] adds the glyph textures and quad buffers, and hands
//! draw units to a [`RenderPass`]. A changed string is rebuilt on the next
//! [`RenderPass::update_text`], after the caller has waited for the previous
//! frame, so its old buffers are never freed while the GPU reads them.

use ash::vk;
use fontdue::{Font, FontSettings};
use std::collections::HashMap;
use std::fs;
use std::ops::Range;

use crate::assets::AssetError;
use crate::core::config::TextConfig;
use crate::foundation::math::Vec2;
use crate::render::mesh::{MeshBuffers, TextureSet};
use crate::render::render_pass::{DrawUnitDescription, MeshBinding, RenderPass};
use crate::render::vertex_layout::TextVertex;
use crate::render::vulkan::{Buffer, ShaderPair, VulkanContext, VulkanError, VulkanResult};

/// First code point rasterized; space is laid out without a glyph
pub const FIRST_CODE_POINT: u32 = 33;
/// Last code point rasterized
pub const LAST_CODE_POINT: u32 = 499;
const NO_BREAK_SPACE: u32 = 160;

/// Index order shared by every glyph quad
pub const QUAD_INDICES: [u32; 6] = [0, 2, 1, 1, 2, 3];

/// Bitmap size of a rasterized glyph, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    /// Bitmap width
    pub width: f32,
    /// Bitmap height
    pub height: f32,
}

/// One laid-out glyph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    /// Character drawn
    pub character: char,
    /// Top-left, top-right, bottom-left, bottom-right
    pub vertices: [TextVertex; 4],
}

/// A string and where it is drawn
#[derive(Debug, Clone, PartialEq)]
pub struct TextEntry {
    /// Characters
    pub text: String,
    /// Pen origin in normalized device coordinates
    pub position: Vec2,
    /// Size factor relative to the window height
    pub max_size: f32,
}

/// Lay out `entry` as quads in normalized device coordinates
///
/// Spaces advance half the width of `a`. Other characters missing from
/// `glyphs` are skipped without advancing.
pub fn layout_text(
    entry: &TextEntry,
    glyphs: &HashMap<char, GlyphMetrics>,
    pixel_height: f32,
    extent: vk::Extent2D,
) -> Vec<GlyphQuad> {
    let a_width = glyphs.get(&'a').map_or(0.0, |a| a.width);
    let scale = (extent.height as f32 / pixel_height) * entry.max_size * 2.0;
    let screen = Vec2::new(extent.width as f32, extent.height as f32);
    let place = |corner: Vec2| -> [f32; 2] {
        let p = (corner * scale).component_div(&screen) + entry.position;
        [p.x, p.y]
    };

    let mut pen = 0.0;
    let mut quads = Vec::new();
    for character in entry.text.chars() {
        if character == ' ' {
            pen += a_width * 0.5;
            continue;
        }
        let Some(glyph) = glyphs.get(&character) else {
            continue;
        };
        let top = pixel_height - glyph.height;
        let left = pen;
        let right = pen + glyph.width;
        quads.push(GlyphQuad {
            character,
            vertices: [
                TextVertex {
                    position: place(Vec2::new(left, top)),
                    tex_coord: [0.0, 0.0],
                },
                TextVertex {
                    position: place(Vec2::new(right, top)),
                    tex_coord: [1.0, 0.0],
                },
                TextVertex {
                    position: place(Vec2::new(left, pixel_height)),
                    tex_coord: [0.0, 1.0],
                },
                TextVertex {
                    position: place(Vec2::new(right, pixel_height)),
                    tex_coord: [1.0, 1.0],
                },
            ],
        });
        pen += glyph.width + a_width * 0.1;
    }
    quads
}

/// Strings, glyph metrics and the pending change
#[derive(Debug, Clone)]
pub struct TextRegistry {
    glyphs: HashMap<char, GlyphMetrics>,
    pixel_height: f32,
    entries: Vec<TextEntry>,
    pending: Option<usize>,
}

impl TextRegistry {
    /// Registry over glyphs rasterized at `pixel_height`
    pub fn new(glyphs: HashMap<char, GlyphMetrics>, pixel_height: f32) -> Self {
        Self {
            glyphs,
            pixel_height,
            entries: Vec::new(),
            pending: None,
        }
    }

    /// Add a string; returns its id
    pub fn add_text(&mut self, text: &str, position: Vec2, max_size: f32) -> usize {
        self.entries.push(TextEntry {
            text: text.to_string(),
            position,
            max_size,
        });
        self.entries.len() - 1
    }

    /// Replace the characters of string `id`, keeping its position and size
    pub fn change_text(&mut self, id: usize, text: &str) -> VulkanResult<()> {
        let entry = self.entries.get_mut(id).ok_or(VulkanError::ResourceNotFound { id: id as u64 })?;
        entry.text = text.to_string();
        self.pending = Some(id);
        Ok(())
    }

    /// String `id`
    pub fn entry(&self, id: usize) -> VulkanResult<&TextEntry> {
        self.entries.get(id).ok_or(VulkanError::ResourceNotFound { id: id as u64 })
    }

    /// Number of strings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no string was added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Glyphs drawn for string `id`; spaces and unknown characters do not count
    pub fn nb_characters(&self, id: usize) -> VulkanResult<usize> {
        Ok(self
            .entry(id)?
            .text
            .chars()
            .filter(|c| *c != ' ' && self.glyphs.contains_key(c))
            .count())
    }

    /// Quads of string `id` for a target of `extent`
    pub fn layout(&self, id: usize, extent: vk::Extent2D) -> VulkanResult<Vec<GlyphQuad>> {
        Ok(layout_text(self.entry(id)?, &self.glyphs, self.pixel_height, extent))
    }

    /// String changed since the last [`Self::update_done`]
    pub fn need_update(&self) -> Option<usize> {
        self.pending
    }

    /// Clear the pending change
    pub fn update_done(&mut self) {
        self.pending = None;
    }
}

/// GPU work [`RenderPass::update_text`] has to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUpdate {
    /// String whose quads are laid out again
    pub rebuild: Option<usize>,
    /// Draw unit whose meshes are replaced by the rebuilt quads
    pub replace: Option<usize>,
    /// Strings added since the overlay was last attached
    pub attach: Range<usize>,
}

impl TextUpdate {
    /// Nothing to rebuild or attach
    pub fn is_empty(&self) -> bool {
        self.rebuild.is_none() && self.attach.is_empty()
    }
}

/// Plan an update from the pending string, the draw units of the strings
/// already attached, and the string count
///
/// Strings past `draw_units` only get attached once the overlay has a pass.
pub fn plan_text_update(pending: Option<usize>, draw_units: &[usize], strings: usize, attached: bool) -> TextUpdate {
    let attach = if attached {
        draw_units.len()..strings.max(draw_units.len())
    } else {
        0..0
    };
    TextUpdate {
        rebuild: pending,
        replace: pending.and_then(|id| draw_units.get(id).copied()),
        attach,
    }
}

struct GlyphBuffer {
    character: char,
    vertices: Buffer,
}

/// Glyph textures and per-string quad buffers
pub struct TextOverlay {
    registry: TextRegistry,
    textures: TextureSet,
    glyph_textures: HashMap<char, usize>,
    index_buffer: Option<Buffer>,
    strings: Vec<Vec<GlyphBuffer>>,
    draw_units: Vec<usize>,
    shaders: Option<ShaderPair>,
    extent: vk::Extent2D,
}

impl TextOverlay {
    /// Rasterize the font in `config` and upload one texture per glyph
    pub fn new(ctx: &VulkanContext, config: &TextConfig, extent: vk::Extent2D) -> VulkanResult<Self> {
        let bytes = fs::read(&config.font_path).map_err(|source| AssetError::Io {
            path: config.font_path.clone(),
            source,
        })?;
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| VulkanError::Font(format!("{}: {}", config.font_path.display(), e)))?;
        let pixel_height = config.pixel_height as f32;

        let mut textures = TextureSet::new(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let mut glyph_textures = HashMap::new();
        let mut glyphs = HashMap::new();

        for code_point in (FIRST_CODE_POINT..=LAST_CODE_POINT).filter(|&c| c != NO_BREAK_SPACE) {
            let Some(character) = char::from_u32(code_point) else {
                continue;
            };
            if font.lookup_glyph_index(character) == 0 {
                continue;
            }
            let (metrics, bitmap) = font.rasterize(character, pixel_height);
            if metrics.width == 0 || metrics.height == 0 || bitmap.is_empty() {
                continue;
            }
            let index = textures.load_r8(ctx, &bitmap, metrics.width as u32, metrics.height as u32)?;
            glyph_textures.insert(character, index);
            glyphs.insert(
                character,
                GlyphMetrics {
                    width: metrics.width as f32,
                    height: metrics.height as f32,
                },
            );
        }

        let index_buffer = Buffer::device_local(
            ctx,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&QUAD_INDICES),
        )?;

        log::info!(
            "[TEXT] Rasterized {} glyphs from {:?} at {}px",
            glyphs.len(),
            config.font_path,
            config.pixel_height
        );

        Ok(Self {
            registry: TextRegistry::new(glyphs, pixel_height),
            textures,
            glyph_textures,
            index_buffer: Some(index_buffer),
            strings: Vec::new(),
            draw_units: Vec::new(),
            shaders: None,
            extent,
        })
    }

    /// Add a string and build its quads; returns its id
    ///
    /// Strings added after [`Self::attach`] are drawn from the next
    /// [`RenderPass::update_text`].
    pub fn add_text(&mut self, ctx: &VulkanContext, text: &str, position: Vec2, max_size: f32) -> VulkanResult<usize> {
        let id = self.registry.add_text(text, position, max_size);
        self.strings.push(Vec::new());
        self.rebuild_text(ctx, id)?;
        Ok(id)
    }

    /// Replace the characters of string `id`; quads are rebuilt on the next update
    pub fn change_text(&mut self, id: usize, text: &str) -> VulkanResult<()> {
        self.registry.change_text(id, text)
    }

    /// Glyphs drawn for string `id`
    pub fn nb_characters(&self, id: usize) -> VulkanResult<usize> {
        self.registry.nb_characters(id)
    }

    /// String changed since the last [`Self::update_done`]
    pub fn need_update(&self) -> Option<usize> {
        self.registry.need_update()
    }

    /// Clear the pending change
    pub fn update_done(&mut self) {
        self.registry.update_done();
    }

    /// Strings and glyph metrics
    pub fn registry(&self) -> &TextRegistry {
        &self.registry
    }

    /// Draw unit of string `id` in the pass it was attached to
    pub fn draw_unit(&self, id: usize) -> Option<usize> {
        self.draw_units.get(id).copied()
    }

    /// What the next [`RenderPass::update_text`] has to do
    pub fn plan_update(&self) -> TextUpdate {
        plan_text_update(
            self.registry.need_update(),
            &self.draw_units,
            self.registry.len(),
            self.shaders.is_some(),
        )
    }

    /// Lay out string `id` again and replace its quad buffers
    pub fn rebuild_text(&mut self, ctx: &VulkanContext, id: usize) -> VulkanResult<()> {
        let quads = self.registry.layout(id, self.extent)?;
        let buffers = quads
            .iter()
            .map(|quad| -> VulkanResult<GlyphBuffer> {
                Ok(GlyphBuffer {
                    character: quad.character,
                    vertices: Buffer::device_local(
                        ctx,
                        vk::BufferUsageFlags::VERTEX_BUFFER,
                        bytemuck::cast_slice(&quad.vertices),
                    )?,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let slot = self.strings.get_mut(id).ok_or(VulkanError::ResourceNotFound { id: id as u64 })?;
        *slot = buffers;
        log::debug!("[TEXT] Text {} laid out as {} quads", id, quads.len());
        Ok(())
    }

    /// One binding per glyph quad of string `id`
    pub fn mesh_bindings(&self, id: usize) -> VulkanResult<Vec<MeshBinding<'static>>> {
        let index = self
            .index_buffer
            .as_ref()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "text overlay used after cleanup".to_string(),
            })?
            .handle();
        let glyphs = self.strings.get(id).ok_or(VulkanError::ResourceNotFound { id: id as u64 })?;

        glyphs
            .iter()
            .map(|glyph| -> VulkanResult<MeshBinding<'static>> {
                let texture = self
                    .glyph_textures
                    .get(&glyph.character)
                    .ok_or(VulkanError::ResourceNotFound {
                        id: u64::from(glyph.character),
                    })?;
                Ok(MeshBinding::new(MeshBuffers {
                    vertex: glyph.vertices.handle(),
                    index,
                    index_count: QUAD_INDICES.len() as u32,
                    instances: None,
                })
                .texture(self.textures.binding(*texture)?))
            })
            .collect()
    }

    /// Add one draw unit per string to `pass`, all sharing one alpha-blended pipeline
    pub fn attach(&mut self, pass: &mut RenderPass, shaders: ShaderPair) -> VulkanResult<()> {
        self.draw_units.clear();
        self.shaders = Some(shaders);
        self.attach_new(pass)?;
        Ok(())
    }

    /// Add draw units for strings that do not have one yet; returns how many
    ///
    /// Does nothing before [`Self::attach`].
    pub fn attach_new(&mut self, pass: &mut RenderPass) -> VulkanResult<usize> {
        let Some(shaders) = self.shaders.clone() else {
            return Ok(0);
        };
        let pending = plan_text_update(None, &self.draw_units, self.registry.len(), true).attach;
        let count = pending.len();
        for id in pending {
            let meshes = self.mesh_bindings(id)?;
            let unit = match self.draw_units.first() {
                None => pass.add_draw_unit(&meshes, &DrawUnitDescription::new(shaders.clone()).textures(1).text())?,
                Some(&first) => pass.share_draw_unit(first, &meshes, None)?,
            };
            self.draw_units.push(unit);
        }
        Ok(count)
    }

    /// Lay every string out again for a new target size and rebind it in `pass`
    ///
    /// The GPU must be idle.
    pub fn resize(&mut self, ctx: &VulkanContext, pass: &mut RenderPass, extent: vk::Extent2D) -> VulkanResult<()> {
        self.extent = extent;
        for id in 0..self.registry.len() {
            self.rebuild_text(ctx, id)?;
            if let Some(unit) = self.draw_unit(id) {
                pass.replace_draw_unit(unit, &self.mesh_bindings(id)?)?;
            }
        }
        Ok(())
    }

    /// Release quad buffers and glyph textures
    pub fn cleanup(&mut self) {
        self.strings.clear();
        self.index_buffer = None;
        self.textures.cleanup();
        self.draw_units.clear();
        self.shaders = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn glyphs() -> HashMap<char, GlyphMetrics> {
        [('a', 10.0, 12.0), ('b', 8.0, 20.0), ('1', 6.0, 16.0), ('2', 6.0, 16.0)]
            .into_iter()
            .map(|(c, width, height)| (c, GlyphMetrics { width, height }))
            .collect()
    }

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 400,
        }
    }

    #[test]
    fn test_shorter_text_updates_count_and_pending_id() {
        let mut registry = TextRegistry::new(glyphs(), 20.0);
        let _help = registry.add_text("ab ab", Vec2::zeros(), 0.05);
        let fps = registry.add_text("aaaa bbbb", Vec2::new(-0.9, -0.9), 0.05);
        assert_eq!(registry.nb_characters(fps).unwrap(), 8);
        assert_eq!(registry.need_update(), None);

        registry.change_text(fps, "a b").unwrap();
        assert_eq!(registry.nb_characters(fps).unwrap(), 2);
        assert_eq!(registry.need_update(), Some(fps));
        assert_eq!(registry.need_update(), Some(fps));

        registry.update_done();
        assert_eq!(registry.need_update(), None);
        assert_eq!(registry.entry(fps).unwrap().position, Vec2::new(-0.9, -0.9));
    }

    #[test]
    fn test_strings_added_after_attach_get_units_on_update() {
        let mut registry = TextRegistry::new(glyphs(), 20.0);
        registry.add_text("ab", Vec2::zeros(), 0.05);
        let draw_units = [4];
        assert!(plan_text_update(None, &draw_units, registry.len(), true).is_empty());

        let late = registry.add_text("12", Vec2::new(0.5, 0.5), 0.05);
        let update = plan_text_update(registry.need_update(), &draw_units, registry.len(), true);
        assert_eq!(update.attach, late..late + 1);
        assert_eq!(update.rebuild, None);

        // A change to the late string rebuilds it and leaves attaching to the new unit
        registry.change_text(late, "2").unwrap();
        let update = plan_text_update(registry.need_update(), &draw_units, registry.len(), true);
        assert_eq!(update.rebuild, Some(late));
        assert_eq!(update.replace, None);
        assert_eq!(update.attach, late..late + 1);

        registry.update_done();
        registry.change_text(0, "b").unwrap();
        let update = plan_text_update(registry.need_update(), &[4, 5], registry.len(), true);
        assert_eq!(update.replace, Some(4));
        assert!(update.attach.is_empty());
    }

    #[test]
    fn test_unattached_overlay_only_rebuilds() {
        let update = plan_text_update(Some(1), &[], 3, false);
        assert_eq!(update.rebuild, Some(1));
        assert_eq!(update.replace, None);
        assert!(update.attach.is_empty());
        assert!(!update.is_empty());
        assert!(plan_text_update(None, &[], 3, false).is_empty());
    }

    #[test]
    fn test_change_of_unknown_text_fails() {
        let mut registry = TextRegistry::new(glyphs(), 20.0);
        registry.add_text("a", Vec2::zeros(), 1.0);
        assert!(matches!(
            registry.change_text(1, "b"),
            Err(VulkanError::ResourceNotFound { id: 1 })
        ));
        assert_eq!(registry.need_update(), None);
    }

    #[test]
    fn test_layout_matches_character_count() {
        let mut registry = TextRegistry::new(glyphs(), 20.0);
        let id = registry.add_text("a1 ?b2", Vec2::zeros(), 0.1);
        let quads = registry.layout(id, extent()).unwrap();
        assert_eq!(quads.len(), registry.nb_characters(id).unwrap());
        assert_eq!(
            quads.iter().map(|q| q.character).collect::<String>(),
            "a1b2"
        );
    }

    #[test]
    fn test_quad_corners_and_advance() {
        let entry = TextEntry {
            text: "a b".to_string(),
            position: Vec2::new(-1.0, -1.0),
            max_size: 0.5,
        };
        let quads = layout_text(&entry, &glyphs(), 20.0, extent());
        assert_eq!(quads.len(), 2);

        // scale = (400 / 20) * 0.5 * 2 = 20
        let a = &quads[0].vertices;
        assert_relative_eq!(a[0].position[0], -1.0);
        assert_relative_eq!(a[0].position[1], -1.0 + 20.0 * 8.0 / 400.0);
        assert_relative_eq!(a[3].position[0], -1.0 + 20.0 * 10.0 / 800.0);
        assert_relative_eq!(a[3].position[1], -1.0 + 20.0 * 20.0 / 400.0);
        assert_eq!(a[1].tex_coord, [1.0, 0.0]);
        assert_eq!(a[2].tex_coord, [0.0, 1.0]);

        // pen after 'a' is 10 + 1, the space adds 5
        let b = &quads[1].vertices;
        assert_relative_eq!(b[0].position[0], -1.0 + 20.0 * 16.0 / 800.0);
        assert_relative_eq!(b[0].position[1], -1.0);
    }
}
