//! The backend a painter drives.
//!
//! [`PainterBackend`] resolves the configuration once against the device,
//! then owns everything a frame needs: the three atlases, the shader
//! registry and its programs, the draw stream and the per-frame uniform
//! block. A frame is `begin_frame(surface)`, any number of `draw` calls and
//! `end_frame()`.
//!
//! Atlas writes are made visible at the next `begin_frame`; stores may be
//! reallocated by the flush there, so nothing is flushed mid-frame.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::atlas::color_stop::ColorStopAtlas;
use crate::atlas::glyph::{GeometryBinding, GlyphAtlas};
use crate::atlas::image::ImageAtlas;
use crate::backing::BufferStore;
use crate::caps::{CapabilitySnapshot, REQUIRED_CLIP_DISTANCES};
use crate::config::{
    BatchingMode, ClippingType, ColorStopAtlasParams, DrawStreamParams, GlyphAtlasParams,
    ImageAtlasParams, RequestedConfig, ResolvedConfig, resolve,
};
use crate::device::{BlendState, BufferTarget, BufferUsage, Device, TextureKind};
use crate::error::{Error, Result};
use crate::shader::builder::AtlasLayout;
use crate::shader::registry::{BlendShader, ItemShader, ShaderId, ShaderRegistry};
use crate::shader::{ProgramKey, ProgramRegistrar, binding, samplers};
use crate::stream::{DrawState, DrawStream, FrameStats, Primitive};
use crate::surface::Surface;

/// Contents of the `GlpaintUniforms` block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PainterUniforms {
    /// Viewport width, height and their reciprocals.
    pub resolution: [f32; 4],
    /// Free for the item shaders.
    pub misc: [f32; 4],
}

/// Everything [`PainterBackend::new`] needs.
#[derive(Debug, Clone, Default)]
pub struct PainterParams {
    /// Requested configuration, resolved against the device.
    pub config: RequestedConfig,
    /// Glyph atlas sizes.
    pub glyphs: GlyphAtlasParams,
    /// Image atlas sizes.
    pub images: ImageAtlasParams,
    /// Color-stop atlas sizes.
    pub color_stops: ColorStopAtlasParams,
}

/// The painter backend.
pub struct PainterBackend<D: Device> {
    device: Rc<D>,
    caps: CapabilitySnapshot,
    config: ResolvedConfig,
    registry: ShaderRegistry,
    registrar: ProgramRegistrar<D>,
    glyphs: GlyphAtlas<D>,
    images: ImageAtlas<D>,
    color_stops: ColorStopAtlas<D>,
    stream: DrawStream<D>,
    uniforms: BufferStore<D>,
    misc: [f32; 4],
    image: Option<D::Texture>,
    in_frame: bool,
}

impl<D: Device> PainterBackend<D> {
    /// Probe the device, resolve `params.config` and create every resource.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedContext`] below the GL 3.3 / GLES 3.0 baseline,
    /// [`Error::ResourceExhausted`] if an atlas or pool cannot be allocated.
    pub fn new(device: &Rc<D>, params: &PainterParams) -> Result<Self> {
        let caps = CapabilitySnapshot::query(device.as_ref())?;
        let config = resolve(&caps, &params.config);
        tracing::info!(
            version = %caps.version(),
            renderer = caps.renderer(),
            degradations = config.degradations.len(),
            "creating painter backend"
        );

        let mut glyphs = GlyphAtlas::new(device, &caps, config.glyph_geometry_backing, &params.glyphs)?;
        let images = ImageAtlas::new(device, &params.images)?;
        let color_stops = ColorStopAtlas::new(device, &caps, &params.color_stops)?;
        let layout = AtlasLayout {
            glyph_geometry_alignment: glyphs.geometry().alignment(),
            glyph_geometry_log2_dims: glyphs.geometry().array_log2_dimensions(),
            image_color_tile_size: images.color_tile_size(),
            image_index_tile_size: images.index_tile_size(),
            image_slack: images.slack(),
            color_stop_width: color_stops.width(),
        };
        let registrar = ProgramRegistrar::new(device, &caps, &config, layout);
        let stream = DrawStream::new(device, DrawStreamParams::from(&config))?;
        let uniforms = BufferStore::new(
            device,
            BufferTarget::Uniform,
            std::mem::size_of::<PainterUniforms>(),
            BufferUsage::Stream,
            false,
        )?;

        Ok(Self {
            device: Rc::clone(device),
            caps,
            config,
            registry: ShaderRegistry::new(),
            registrar,
            glyphs,
            images,
            color_stops,
            stream,
            uniforms,
            misc: [0.0; 4],
            image: None,
            in_frame: false,
        })
    }

    /// The probed capabilities.
    #[must_use]
    pub fn caps(&self) -> &CapabilitySnapshot {
        &self.caps
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Registered shaders.
    #[must_use]
    pub fn registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    /// Register an item shader.
    pub fn register_item_shader(&mut self, shader: ItemShader) -> ShaderId {
        self.registry.register_item(shader)
    }

    /// Register a blend shader.
    pub fn register_blend_shader(&mut self, shader: BlendShader) -> ShaderId {
        self.registry.register_blend(shader)
    }

    /// Compile every program the registered shaders need up front.
    ///
    /// # Errors
    ///
    /// Compile and link failures.
    pub fn build_programs(&mut self) -> Result<()> {
        self.registrar.build_all(&self.registry)?;
        if !self.in_frame {
            self.registrar.collect_retired();
        }
        Ok(())
    }

    /// Number of compiled programs.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.registrar.program_count()
    }

    /// The glyph atlas.
    pub fn glyph_atlas(&mut self) -> &mut GlyphAtlas<D> {
        &mut self.glyphs
    }

    /// The image atlas.
    pub fn image_atlas(&mut self) -> &mut ImageAtlas<D> {
        &mut self.images
    }

    /// The color-stop atlas.
    pub fn color_stop_atlas(&mut self) -> &mut ColorStopAtlas<D> {
        &mut self.color_stops
    }

    /// The uniform buffer object.
    #[must_use]
    pub fn uniform_buffer(&self) -> D::Buffer {
        self.uniforms.handle()
    }

    /// Shader-defined uniforms uploaded with the next frame.
    pub fn set_misc_uniforms(&mut self, misc: [f32; 4]) {
        self.misc = misc;
    }

    /// Texture bound to the standalone image unit from the next frame on.
    pub fn set_bound_image(&mut self, texture: Option<D::Texture>) {
        self.image = texture;
    }

    /// Switch between batched and per-primitive submission.
    pub fn set_batching(&mut self, batching: BatchingMode) {
        self.stream.set_batching(batching);
    }

    /// Flush the atlases, bind `surface` and every shared resource, and open
    /// the draw stream.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if an atlas reallocation fails.
    pub fn begin_frame(&mut self, surface: &Surface<D>) -> Result<()> {
        debug_assert!(!self.in_frame, "begin_frame inside a frame");
        self.glyphs.flush()?;
        self.images.flush()?;
        self.color_stops.flush()?;

        let viewport = surface.viewport();
        // Viewports are far below f32's exact integer range.
        #[expect(clippy::cast_precision_loss)]
        let (w, h) = (viewport.width.max(1) as f32, viewport.height.max(1) as f32);
        let uniforms = PainterUniforms {
            resolution: [w, h, 1.0 / w, 1.0 / h],
            misc: self.misc,
        };
        self.uniforms.set_data(0, bytemuck::bytes_of(&uniforms))?;

        surface.bind();
        self.bind_resources();
        self.device.set_clip_distances(match self.config.clipping_type {
            ClippingType::ClipDistance => REQUIRED_CLIP_DISTANCES,
            ClippingType::SkipColorWrite | ClippingType::Discard => 0,
        });
        self.stream.begin_frame();
        self.in_frame = true;
        Ok(())
    }

    fn bind_resources(&mut self) {
        let device = &self.device;
        device.bind_texture(
            binding::IMAGE_COLOR_ATLAS,
            TextureKind::Array2D,
            Some(self.images.color_texture()),
        );
        device.bind_texture(
            binding::IMAGE_INDEX_ATLAS,
            TextureKind::Array2D,
            Some(self.images.index_texture()),
        );
        let texels = self.glyphs.texels();
        device.bind_texture(
            binding::GLYPH_TEXELS_UINT,
            TextureKind::Array2D,
            Some(texels.integer_view()),
        );
        device.bind_texture(
            binding::GLYPH_TEXELS_FLOAT,
            TextureKind::Array2D,
            texels.float_view(),
        );
        match self.glyphs.geometry().binding() {
            Some(GeometryBinding::Texture(texture, kind)) => {
                device.bind_texture(binding::GLYPH_GEOMETRY, kind, Some(texture));
            }
            Some(GeometryBinding::StorageBuffer(buffer)) => device.bind_buffer_base(
                BufferTarget::ShaderStorage,
                binding::GLYPH_GEOMETRY_STORAGE,
                Some(buffer),
            ),
            None => tracing::warn!("glyph geometry store has no binding"),
        }
        device.bind_texture(
            binding::COLOR_STOP_ATLAS,
            TextureKind::Array2D,
            Some(self.color_stops.texture()),
        );
        device.bind_texture(binding::IMAGE, TextureKind::Plain2D, self.image);
        device.bind_buffer_base(
            BufferTarget::Uniform,
            binding::UNIFORM_BLOCK,
            Some(self.uniforms.handle()),
        );
    }

    /// Queue one primitive drawn by `item` and blended by `blend`.
    ///
    /// The header's shader ids are filled in from `item` and `blend`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownShader`] or [`Error::NoBlendVariant`] for shaders the
    /// registry cannot serve, compile or link failures when the program is
    /// built on first use, and [`Error::PrimitiveTooLarge`].
    pub fn draw(&mut self, item: ShaderId, blend: ShaderId, primitive: &Primitive<'_>) -> Result<()> {
        debug_assert!(self.in_frame, "draw outside a frame");
        let uses_discard = self
            .registry
            .item(item)
            .ok_or(Error::UnknownShader {
                kind: "item",
                id: item.get(),
            })?
            .uses_discard;
        let blend_shader = self.registry.blend(blend).ok_or(Error::UnknownShader {
            kind: "blend",
            id: blend.get(),
        })?;
        let variant = self
            .registrar
            .blend_variant(blend_shader)
            .ok_or_else(|| Error::NoBlendVariant {
                name: blend_shader.name.clone(),
            })?;
        let (kind, blend_state) = (variant.kind, variant.state);

        let discard = self.registrar.discard_group(uses_discard);
        let program = self.registrar.program(
            &self.registry,
            ProgramKey {
                discard,
                blend: kind,
            },
        )?;
        let mut primitive = *primitive;
        primitive.header.item_shader = item.get();
        primitive.header.blend_shader = blend.get();
        self.stream.push(
            DrawState {
                program,
                blend: blend_state,
                discard,
                item_shader: item,
            },
            &primitive,
        )
    }

    /// Draw everything queued, advance the pool ring and unbind the frame's
    /// resources.
    ///
    /// # Errors
    ///
    /// Propagates draw-stream failures.
    pub fn end_frame(&mut self) -> Result<FrameStats> {
        debug_assert!(self.in_frame, "end_frame outside a frame");
        self.in_frame = false;
        let stats = self.stream.end_frame()?;
        // Programs retired by a registration mid-frame were drawn with above.
        self.registrar.collect_retired();
        self.release_bindings();
        Ok(stats)
    }

    fn release_bindings(&self) {
        let device = &self.device;
        for sampler in samplers(&self.config) {
            device.bind_texture(sampler.unit, sampler.kind, None);
        }
        device.bind_buffer_base(BufferTarget::Uniform, binding::UNIFORM_BLOCK, None);
        device.bind_buffer_base(BufferTarget::Uniform, binding::DATA_STORE_BLOCK, None);
        device.bind_buffer_base(BufferTarget::ShaderStorage, binding::DATA_STORE_STORAGE, None);
        device.bind_buffer_base(
            BufferTarget::ShaderStorage,
            binding::GLYPH_GEOMETRY_STORAGE,
            None,
        );
        device.use_program(None);
        device.set_blend_state(&BlendState::DISABLED);
        device.set_clip_distances(0);
    }
}
