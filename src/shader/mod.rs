//! Uber-shader programs.
//!
//! [`ProgramRegistrar`] owns the compiled program family: one program, or
//! a with-discard / without-discard pair, for every blend shader type in
//! use. Programs are built lazily and retired when the
//! [`ShaderRegistry`](registry::ShaderRegistry) gains a shader; retired
//! programs stay alive until [`ProgramRegistrar::collect_retired`], since
//! draws already recorded this frame still reference them.

pub mod builder;
pub mod registry;

use std::rc::Rc;

use ahash::AHashMap;

use crate::caps::{CapabilitySnapshot, Features};
use crate::config::{
    BlendShaderType, DataStoreBacking, FbfBlendingType, GlyphGeometryBacking, ResolvedConfig,
};
use crate::device::{Device, TextureKind};
use crate::error::Result;

use self::builder::{AtlasLayout, build_program};
use self::registry::{BlendShader, BlendVariant, ShaderRegistry};

/// Fixed binding points shared by the shaders and the painter.
pub mod binding {
    /// Texture unit of the image color atlas.
    pub const IMAGE_COLOR_ATLAS: u32 = 0;
    /// Texture unit of the image index atlas.
    pub const IMAGE_INDEX_ATLAS: u32 = 1;
    /// Texture unit of the glyph texels, integer view.
    pub const GLYPH_TEXELS_UINT: u32 = 2;
    /// Texture unit of the glyph texels, filtered view.
    pub const GLYPH_TEXELS_FLOAT: u32 = 3;
    /// Texture unit of a texture-backed glyph geometry store.
    pub const GLYPH_GEOMETRY: u32 = 4;
    /// Texture unit of the color-stop atlas.
    pub const COLOR_STOP_ATLAS: u32 = 5;
    /// Texture unit of a texture-buffer data store.
    pub const DATA_STORE: u32 = 6;
    /// Texture unit of a bound (non-bindless) standalone image.
    pub const IMAGE: u32 = 7;

    /// Uniform block binding of the per-frame uniforms.
    pub const UNIFORM_BLOCK: u32 = 0;
    /// Uniform block binding of a UBO data store.
    pub const DATA_STORE_BLOCK: u32 = 1;
    /// Storage block binding of an SSBO data store.
    pub const DATA_STORE_STORAGE: u32 = 0;
    /// Storage block binding of an SSBO glyph geometry store.
    pub const GLYPH_GEOMETRY_STORAGE: u32 = 1;
}

/// A sampler the programs declare and the painter binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerBinding {
    /// GLSL name.
    pub name: &'static str,
    /// Texture unit.
    pub unit: u32,
    /// GLSL sampler type.
    pub glsl_type: &'static str,
    /// Texture target bound to `unit`.
    pub kind: TextureKind,
}

const fn sampler(name: &'static str, unit: u32, glsl_type: &'static str, kind: TextureKind) -> SamplerBinding {
    SamplerBinding {
        name,
        unit,
        glsl_type,
        kind,
    }
}

/// Samplers present in every program.
const FIXED_SAMPLERS: [SamplerBinding; 6] = [
    sampler("glpaint_image_color_atlas", binding::IMAGE_COLOR_ATLAS, "sampler2DArray", TextureKind::Array2D),
    sampler("glpaint_image_index_atlas", binding::IMAGE_INDEX_ATLAS, "usampler2DArray", TextureKind::Array2D),
    sampler("glpaint_glyph_texels_uint", binding::GLYPH_TEXELS_UINT, "usampler2DArray", TextureKind::Array2D),
    sampler("glpaint_glyph_texels_float", binding::GLYPH_TEXELS_FLOAT, "sampler2DArray", TextureKind::Array2D),
    sampler("glpaint_color_stop_atlas", binding::COLOR_STOP_ATLAS, "sampler2DArray", TextureKind::Array2D),
    sampler("glpaint_image", binding::IMAGE, "sampler2D", TextureKind::Plain2D),
];

/// Name of the glyph geometry store, whatever backs it.
pub const GLYPH_GEOMETRY: &str = "glpaint_glyph_geometry";

/// Storage block holding an SSBO glyph geometry store.
pub const GLYPH_GEOMETRY_BLOCK: &str = "GlpaintGlyphGeometry";

/// Name of the texture-buffer data store sampler.
pub const DATA_STORE_SAMPLER: &str = "glpaint_data_store";

/// Every sampler a program built against `config` declares. Storage-buffer
/// backings are blocks, not samplers, and are left out.
#[must_use]
pub fn samplers(config: &ResolvedConfig) -> Vec<SamplerBinding> {
    let mut out = FIXED_SAMPLERS.to_vec();
    match config.glyph_geometry_backing {
        GlyphGeometryBacking::TextureBuffer => out.push(sampler(
            GLYPH_GEOMETRY,
            binding::GLYPH_GEOMETRY,
            "usamplerBuffer",
            TextureKind::Buffer,
        )),
        GlyphGeometryBacking::ArrayTexture => out.push(sampler(
            GLYPH_GEOMETRY,
            binding::GLYPH_GEOMETRY,
            "usampler2DArray",
            TextureKind::Array2D,
        )),
        GlyphGeometryBacking::StorageBuffer => {}
    }
    if config.data_store_backing == DataStoreBacking::Tbo {
        out.push(sampler(
            DATA_STORE_SAMPLER,
            binding::DATA_STORE,
            "usamplerBuffer",
            TextureKind::Buffer,
        ));
    }
    out
}

/// Uniform block holding the per-frame uniforms.
pub const UNIFORM_BLOCK: &str = "GlpaintUniforms";

/// Block holding the data store when it is a UBO or SSBO.
pub const DATA_STORE_BLOCK: &str = "GlpaintDataStore";

/// Vertex attribute names, by location. The first three are `uvec4`
/// attributes, the last the `uint` header offset.
pub const ATTRIBUTES: [&str; 4] = [
    "glpaint_attrib0",
    "glpaint_attrib1",
    "glpaint_attrib2",
    "glpaint_header",
];

/// Which item shaders a program contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardGroup {
    /// Every item shader.
    All,
    /// Only item shaders that may discard.
    WithDiscard,
    /// Only item shaders that never discard.
    WithoutDiscard,
}

impl DiscardGroup {
    /// Whether an item shader with `uses_discard` belongs to this group.
    #[must_use]
    pub fn includes(self, uses_discard: bool) -> bool {
        match self {
            DiscardGroup::All => true,
            DiscardGroup::WithDiscard => uses_discard,
            DiscardGroup::WithoutDiscard => !uses_discard,
        }
    }
}

/// Identifies one program of the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    /// Item shaders included.
    pub discard: DiscardGroup,
    /// Blend epilogue.
    pub blend: BlendShaderType,
}

/// Builds, caches and binds the uber-shader programs.
pub struct ProgramRegistrar<D: Device> {
    device: Rc<D>,
    config: ResolvedConfig,
    layout: AtlasLayout,
    dual_source: bool,
    programs: AHashMap<ProgramKey, D::Program>,
    retired: Vec<D::Program>,
    built_for: (usize, usize),
}

impl<D: Device> ProgramRegistrar<D> {
    /// A registrar with no programs built yet.
    pub fn new(device: &Rc<D>, caps: &CapabilitySnapshot, config: &ResolvedConfig, layout: AtlasLayout) -> Self {
        Self {
            device: Rc::clone(device),
            config: config.clone(),
            layout,
            dual_source: caps.has(Features::DUAL_SOURCE_BLEND),
            programs: AHashMap::default(),
            retired: Vec::new(),
            built_for: (0, 0),
        }
    }

    /// The configuration programs are built against.
    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Whether programs for `kind` can run on this context.
    #[must_use]
    pub fn supports(&self, kind: BlendShaderType) -> bool {
        match kind {
            BlendShaderType::SingleSource => true,
            BlendShaderType::DualSource => self.dual_source,
            BlendShaderType::FramebufferFetch => {
                self.config.fbf_blending_type == FbfBlendingType::FramebufferFetch
            }
        }
    }

    /// The discard groups the program family is split into.
    #[must_use]
    pub fn discard_groups(&self) -> &'static [DiscardGroup] {
        if self.config.separate_program_for_discard {
            &[DiscardGroup::WithDiscard, DiscardGroup::WithoutDiscard]
        } else {
            &[DiscardGroup::All]
        }
    }

    /// Discard group of an item shader.
    #[must_use]
    pub fn discard_group(&self, uses_discard: bool) -> DiscardGroup {
        match (self.config.separate_program_for_discard, uses_discard) {
            (false, _) => DiscardGroup::All,
            (true, true) => DiscardGroup::WithDiscard,
            (true, false) => DiscardGroup::WithoutDiscard,
        }
    }

    /// The variant of `blend` to draw with: the configured type if the mode
    /// has it, else the most capable supported type it has.
    #[must_use]
    pub fn blend_variant<'a>(&self, blend: &'a BlendShader) -> Option<&'a BlendVariant> {
        blend.variant(self.config.blend_shader_type).or_else(|| {
            BlendShaderType::ALL
                .iter()
                .rev()
                .filter(|kind| self.supports(**kind))
                .find_map(|kind| blend.variant(*kind))
        })
    }

    /// Number of programs currently compiled.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Number of retired programs awaiting deletion.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// The program for `key`, building it on first use. If `registry`
    /// changed since the last build, every current program is retired
    /// first.
    ///
    /// # Errors
    ///
    /// [`Error::ShaderCompile`](crate::Error::ShaderCompile) or
    /// [`Error::ProgramLink`](crate::Error::ProgramLink).
    pub fn program(&mut self, registry: &ShaderRegistry, key: ProgramKey) -> Result<D::Program> {
        if registry.version() != self.built_for {
            if !self.programs.is_empty() {
                tracing::debug!(
                    programs = self.programs.len(),
                    "shader registry changed; retiring programs"
                );
            }
            self.retired.extend(self.programs.drain().map(|(_, program)| program));
            self.built_for = registry.version();
        }
        if let Some(program) = self.programs.get(&key) {
            return Ok(*program);
        }

        debug_assert!(self.supports(key.blend), "{:?} programs are unsupported", key.blend);
        let source = build_program(&self.config, &self.layout, registry, key);
        let program = self.device.create_program(&source)?;
        if !self.config.front_matter.binding_layout {
            self.bind_resources(program);
        }
        let (items, blends) = registry.version();
        tracing::info!(?key, items, blends, "built uber-shader program");
        self.programs.insert(key, program);
        Ok(program)
    }

    /// Build every program of the family for the configured blend type.
    ///
    /// # Errors
    ///
    /// See [`program`](Self::program).
    pub fn build_all(&mut self, registry: &ShaderRegistry) -> Result<()> {
        let blend = self.config.blend_shader_type;
        for &discard in self.discard_groups() {
            self.program(registry, ProgramKey { discard, blend })?;
        }
        Ok(())
    }

    /// Point samplers and blocks at their binding points after link, for
    /// contexts without `layout(binding = N)`.
    fn bind_resources(&self, program: D::Program) {
        for sampler in samplers(&self.config) {
            self.device.set_sampler_unit(program, sampler.name, sampler.unit);
        }
        self.device
            .set_uniform_block_binding(program, UNIFORM_BLOCK, binding::UNIFORM_BLOCK);
        if self.config.data_store_backing == DataStoreBacking::Ubo {
            self.device
                .set_uniform_block_binding(program, DATA_STORE_BLOCK, binding::DATA_STORE_BLOCK);
        }
    }

    /// Delete the programs retired by registry changes. Call once nothing
    /// recorded against them is left to submit.
    pub fn collect_retired(&mut self) {
        for program in self.retired.drain(..) {
            self.device.delete_program(program);
        }
    }

    /// Delete every compiled program, retired ones included.
    pub fn release(&mut self) {
        self.collect_retired();
        for (_, program) in self.programs.drain() {
            self.device.delete_program(program);
        }
    }
}

impl<D: Device> Drop for ProgramRegistrar<D> {
    fn drop(&mut self) {
        self.release();
    }
}
