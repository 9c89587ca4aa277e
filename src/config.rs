//! Engine configuration: what the caller asks for, and what the context
//! can actually give.
//!
//! [`resolve`] is a total function from a [`CapabilitySnapshot`] and a
//! [`RequestedConfig`] to a [`ResolvedConfig`]. Decisions are taken in a
//! fixed order (interlock, framebuffer-fetch blending, blend shader type,
//! clipping, data-store backing, glyph geometry backing, GLSL front
//! matter); a later step may depend on an earlier one but never the other
//! way around. An unsupported request degrades down its fallback chain,
//! is logged at `warn` level, and is recorded as a [`Degradation`].

use std::fmt;

use crate::caps::{CapabilitySnapshot, Features, GlVersion};

/// Fragment-shader ordering mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterlockType {
    /// `GL_INTEL_fragment_shader_ordering`.
    IntelFragmentShaderOrdering,
    /// `GL_ARB_fragment_shader_interlock`.
    ArbFragmentShaderInterlock,
    /// `GL_NV_fragment_shader_interlock`.
    NvFragmentShaderInterlock,
    /// No ordering guarantee.
    NoInterlock,
}

/// How blend modes that fixed-function blending cannot express are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FbfBlendingType {
    /// Not available; such blend modes fall back to sequential blending.
    NotSupported,
    /// Read the destination with framebuffer fetch.
    FramebufferFetch,
    /// Read-modify-write the destination as an image inside an interlock.
    Interlock,
}

/// Fragment-shader epilogue used for ordinary blend modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendShaderType {
    /// One output, one fixed-function state per Porter-Duff mode.
    SingleSource,
    /// Two outputs feeding `SRC1` blend factors.
    DualSource,
    /// The shader blends against the fetched destination itself.
    FramebufferFetch,
}

impl BlendShaderType {
    /// All blend shader types, least capable first.
    pub const ALL: [BlendShaderType; 3] = [
        BlendShaderType::SingleSource,
        BlendShaderType::DualSource,
        BlendShaderType::FramebufferFetch,
    ];
}

/// How clip rectangles are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClippingType {
    /// Hardware `gl_ClipDistance`.
    ClipDistance,
    /// Clipped fragments keep the destination color (needs framebuffer fetch
    /// or interlock blending).
    SkipColorWrite,
    /// Clipped fragments are discarded.
    Discard,
}

/// Backing of the per-primitive shader-data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataStoreBacking {
    /// `usamplerBuffer` over a texture buffer.
    Tbo,
    /// Uniform block; blocks are clamped to the block-size limit.
    Ubo,
    /// Shader storage block.
    Ssbo,
}

/// Backing of the glyph geometry store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlyphGeometryBacking {
    /// Linear texel buffer.
    TextureBuffer,
    /// 2D array texture addressed by bit-unpacking the offset.
    ArrayTexture,
    /// Shader storage block; alignment is fixed at 4.
    StorageBuffer,
}

macro_rules! display_via_debug {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        })*
    };
}

display_via_debug!(
    InterlockType,
    FbfBlendingType,
    BlendShaderType,
    ClippingType,
    DataStoreBacking,
    GlyphGeometryBacking
);

/// A driver workaround triggered by a [`KnownIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workaround {
    /// Do not use hardware clip distances.
    DisableClipDistance,
}

/// One known driver problem, matched by case-insensitive substrings of
/// `GL_VENDOR` and (optionally) `GL_RENDERER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownIssue {
    /// Substring of the vendor string.
    pub vendor: String,
    /// Substring of the renderer string; `None` matches any renderer.
    pub renderer: Option<String>,
    /// What to do on a match.
    pub workaround: Workaround,
}

impl KnownIssue {
    fn matches(&self, vendor: &str, renderer: &str) -> bool {
        let contains = |hay: &str, needle: &str| hay.to_lowercase().contains(&needle.to_lowercase());
        contains(vendor, &self.vendor)
            && self
                .renderer
                .as_deref()
                .is_none_or(|r| contains(renderer, r))
    }
}

/// Table of driver workarounds consulted during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownIssues {
    entries: Vec<KnownIssue>,
}

impl Default for KnownIssues {
    /// The built-in table: hardware clip distances are unreliable on NVIDIA
    /// drivers.
    fn default() -> Self {
        Self {
            entries: vec![KnownIssue {
                vendor: "NVIDIA".to_owned(),
                renderer: None,
                workaround: Workaround::DisableClipDistance,
            }],
        }
    }
}

impl KnownIssues {
    /// A table with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an entry.
    #[must_use]
    pub fn with(mut self, issue: KnownIssue) -> Self {
        self.entries.push(issue);
        self
    }

    /// The entry requesting `workaround` for this context, if any.
    #[must_use]
    pub fn find(&self, caps: &CapabilitySnapshot, workaround: Workaround) -> Option<&KnownIssue> {
        self.entries
            .iter()
            .filter(|e| e.workaround == workaround)
            .find(|e| e.matches(caps.vendor(), caps.renderer()))
    }
}

/// Options the caller would like. Every field has a sensible default and
/// anything unsupported is degraded by [`resolve`].
#[derive(Debug, Clone)]
pub struct RequestedConfig {
    /// Number of draw-stream pool slots cycled through before reuse.
    pub number_pools: usize,
    /// Vertex attributes per pool slot.
    pub attributes_per_buffer: usize,
    /// Indices per pool slot.
    pub indices_per_buffer: usize,
    /// 16-byte shader-data blocks per pool slot.
    pub data_blocks_per_store_buffer: usize,
    /// Preferred shader-data backing.
    pub data_store_backing: DataStoreBacking,
    /// Preferred way of doing framebuffer-dependent blending.
    pub fbf_blending_type: FbfBlendingType,
    /// Preferred blend shader type.
    pub blend_shader_type: BlendShaderType,
    /// Preferred clipping strategy.
    pub clipping_type: ClippingType,
    /// Build separate programs for primitives that may discard.
    pub separate_program_for_discard: bool,
    /// Glyph geometry backing; `None` picks one with [`use_optimal_backing`].
    pub glyph_geometry_backing: Option<GlyphGeometryBacking>,
    /// Element count a texture buffer or storage block must be able to
    /// address for the optimal glyph geometry policy to pick it.
    pub optimal_geometry_threshold: u64,
    /// Start a new draw batch whenever the item shader changes.
    pub break_on_shader_change: bool,
    /// Use bindless handles for standalone images when available.
    pub use_bindless_textures: bool,
    /// Minimum GLSL version, e.g. `"450"` or `"310 es"`; never lowers the
    /// version derived from the context.
    pub glsl_version_override: Option<String>,
    /// Driver workarounds.
    pub known_issues: KnownIssues,
}

impl Default for RequestedConfig {
    fn default() -> Self {
        let attributes_per_buffer = 512 * 512;
        Self {
            number_pools: 3,
            attributes_per_buffer,
            indices_per_buffer: attributes_per_buffer * 6 / 4,
            data_blocks_per_store_buffer: 1024 * 64,
            data_store_backing: DataStoreBacking::Tbo,
            fbf_blending_type: FbfBlendingType::Interlock,
            blend_shader_type: BlendShaderType::DualSource,
            clipping_type: ClippingType::ClipDistance,
            separate_program_for_discard: true,
            glyph_geometry_backing: None,
            optimal_geometry_threshold: 1 << 26,
            break_on_shader_change: false,
            use_bindless_textures: true,
            glsl_version_override: None,
            known_issues: KnownIssues::default(),
        }
    }
}

impl RequestedConfig {
    /// Set [`number_pools`](Self::number_pools).
    #[must_use]
    pub fn with_number_pools(mut self, number_pools: usize) -> Self {
        self.number_pools = number_pools;
        self
    }

    /// Set the per-slot attribute and index capacities.
    #[must_use]
    pub fn with_buffer_sizes(mut self, attributes: usize, indices: usize) -> Self {
        self.attributes_per_buffer = attributes;
        self.indices_per_buffer = indices;
        self
    }

    /// Set [`data_blocks_per_store_buffer`](Self::data_blocks_per_store_buffer).
    #[must_use]
    pub fn with_data_blocks_per_store_buffer(mut self, blocks: usize) -> Self {
        self.data_blocks_per_store_buffer = blocks;
        self
    }

    /// Set [`data_store_backing`](Self::data_store_backing).
    #[must_use]
    pub fn with_data_store_backing(mut self, backing: DataStoreBacking) -> Self {
        self.data_store_backing = backing;
        self
    }

    /// Set [`fbf_blending_type`](Self::fbf_blending_type).
    #[must_use]
    pub fn with_fbf_blending_type(mut self, fbf: FbfBlendingType) -> Self {
        self.fbf_blending_type = fbf;
        self
    }

    /// Set [`blend_shader_type`](Self::blend_shader_type).
    #[must_use]
    pub fn with_blend_shader_type(mut self, blend: BlendShaderType) -> Self {
        self.blend_shader_type = blend;
        self
    }

    /// Set [`clipping_type`](Self::clipping_type).
    #[must_use]
    pub fn with_clipping_type(mut self, clipping: ClippingType) -> Self {
        self.clipping_type = clipping;
        self
    }

    /// Set [`separate_program_for_discard`](Self::separate_program_for_discard).
    #[must_use]
    pub fn with_separate_program_for_discard(mut self, separate: bool) -> Self {
        self.separate_program_for_discard = separate;
        self
    }

    /// Force a glyph geometry backing instead of the optimal policy.
    #[must_use]
    pub fn with_glyph_geometry_backing(mut self, backing: GlyphGeometryBacking) -> Self {
        self.glyph_geometry_backing = Some(backing);
        self
    }

    /// Set [`optimal_geometry_threshold`](Self::optimal_geometry_threshold).
    #[must_use]
    pub fn with_optimal_geometry_threshold(mut self, elements: u64) -> Self {
        self.optimal_geometry_threshold = elements;
        self
    }

    /// Set [`break_on_shader_change`](Self::break_on_shader_change).
    #[must_use]
    pub fn with_break_on_shader_change(mut self, enabled: bool) -> Self {
        self.break_on_shader_change = enabled;
        self
    }

    /// Set [`use_bindless_textures`](Self::use_bindless_textures).
    #[must_use]
    pub fn with_bindless_textures(mut self, enabled: bool) -> Self {
        self.use_bindless_textures = enabled;
        self
    }

    /// Set [`glsl_version_override`](Self::glsl_version_override).
    #[must_use]
    pub fn with_glsl_version_override(mut self, version: &str) -> Self {
        self.glsl_version_override = Some(version.to_owned());
        self
    }

    /// Replace the known-issues table.
    #[must_use]
    pub fn with_known_issues(mut self, known_issues: KnownIssues) -> Self {
        self.known_issues = known_issues;
        self
    }
}

/// Which resolution step a [`Degradation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ResolutionStep {
    FbfBlending,
    BlendShader,
    Clipping,
    SeparateDiscardProgram,
    DataStoreBacking,
    DataStoreSize,
    GlyphGeometryBacking,
    GlslVersion,
}

/// A requested option replaced by a supported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    /// Resolution step.
    pub step: ResolutionStep,
    /// What was asked for.
    pub requested: String,
    /// What was chosen.
    pub resolved: String,
}

/// A GLSL `#version` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlslVersion {
    /// Numeric version, e.g. `330`.
    pub number: u32,
    /// `true` for the `es` profile.
    pub es: bool,
}

impl GlslVersion {
    /// The GLSL version native to a context version.
    #[must_use]
    pub fn for_context(version: GlVersion) -> Self {
        Self {
            number: version.major * 100 + version.minor * 10,
            es: version.es,
        }
    }

    /// Parse `"450"`, `"450 core"` or `"310 es"`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let number = parts.next()?.parse().ok()?;
        let es = parts.next() == Some("es");
        Some(Self { number, es })
    }
}

impl fmt::Display for GlslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.es {
            write!(f, "{} es", self.number)
        } else {
            write!(f, "{}", self.number)
        }
    }
}

/// Behavior of an `#extension` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionBehavior {
    /// `: require`.
    Require,
    /// `: enable`.
    Enable,
}

/// Everything that precedes the shader body: the version pragma, the
/// extension pragmas, default precisions on ES, and whether binding points
/// can be set with layout qualifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlslFrontMatter {
    /// `#version` value.
    pub version: GlslVersion,
    /// `#extension` directives in emission order.
    pub extensions: Vec<(&'static str, ExtensionBehavior)>,
    /// `layout(binding = N)` is usable.
    pub binding_layout: bool,
    /// Types given a `precision highp` default. ES has none for most
    /// sampler types.
    pub precision_types: Vec<&'static str>,
}

impl GlslFrontMatter {
    /// Raise the version to at least `number`; never lowers it.
    pub fn require_version(&mut self, number: u32) {
        self.version.number = self.version.number.max(number);
    }

    /// Add an extension directive once; `Require` wins over `Enable`.
    pub fn add_extension(&mut self, name: &'static str, behavior: ExtensionBehavior) {
        match self.extensions.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                if behavior == ExtensionBehavior::Require {
                    *existing = ExtensionBehavior::Require;
                }
            }
            None => self.extensions.push((name, behavior)),
        }
    }

    /// Render as GLSL text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("#version {}\n", self.version);
        for (name, behavior) in &self.extensions {
            let behavior = match behavior {
                ExtensionBehavior::Require => "require",
                ExtensionBehavior::Enable => "enable",
            };
            out.push_str(&format!("#extension {name} : {behavior}\n"));
        }
        for ty in &self.precision_types {
            out.push_str(&format!("precision highp {ty};\n"));
        }
        out
    }
}

/// The configuration every other component is built from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Interlock flavor.
    pub interlock_type: InterlockType,
    /// Framebuffer-dependent blending mechanism.
    pub fbf_blending_type: FbfBlendingType,
    /// Blend shader type for ordinary blend modes.
    pub blend_shader_type: BlendShaderType,
    /// Clipping strategy.
    pub clipping_type: ClippingType,
    /// Whether discarding primitives get their own programs.
    pub separate_program_for_discard: bool,
    /// Shader-data backing.
    pub data_store_backing: DataStoreBacking,
    /// 16-byte blocks per pool slot's shader-data store.
    pub data_blocks_per_store_buffer: usize,
    /// Draw-stream pool count.
    pub number_pools: usize,
    /// Attributes per pool slot.
    pub attributes_per_buffer: usize,
    /// Indices per pool slot.
    pub indices_per_buffer: usize,
    /// Glyph geometry backing.
    pub glyph_geometry_backing: GlyphGeometryBacking,
    /// Start a new draw batch on item-shader change.
    pub break_on_shader_change: bool,
    /// Standalone images get bindless handles.
    pub use_bindless_textures: bool,
    /// Draw batches are issued with one multi-draw call.
    pub use_multi_draw: bool,
    /// Texture views can provide the filtered glyph view.
    pub use_texture_view: bool,
    /// GLSL front matter shared by every program.
    pub front_matter: GlslFrontMatter,
    /// Every fallback taken.
    pub degradations: Vec<Degradation>,
}

struct Resolver<'a> {
    caps: &'a CapabilitySnapshot,
    degradations: Vec<Degradation>,
}

impl Resolver<'_> {
    fn degrade<T: fmt::Display + PartialEq>(&mut self, step: ResolutionStep, requested: T, resolved: T) -> T {
        if requested != resolved {
            tracing::warn!(?step, %requested, %resolved, "requested option unsupported; degraded");
            self.degradations.push(Degradation {
                step,
                requested: requested.to_string(),
                resolved: resolved.to_string(),
            });
        }
        resolved
    }

    fn interlock(&self) -> InterlockType {
        let caps = self.caps;
        if !caps.has(Features::IMAGE_LOAD_STORE) {
            return InterlockType::NoInterlock;
        }
        if caps.has(Features::INTEL_FRAGMENT_SHADER_ORDERING) {
            InterlockType::IntelFragmentShaderOrdering
        } else if caps.has(Features::ARB_FRAGMENT_SHADER_INTERLOCK) {
            InterlockType::ArbFragmentShaderInterlock
        } else if caps.has(Features::NV_FRAGMENT_SHADER_INTERLOCK) {
            InterlockType::NvFragmentShaderInterlock
        } else {
            InterlockType::NoInterlock
        }
    }

    fn fbf(&mut self, requested: FbfBlendingType, interlock: InterlockType) -> FbfBlendingType {
        let supported = |fbf: FbfBlendingType| match fbf {
            FbfBlendingType::Interlock => interlock != InterlockType::NoInterlock,
            FbfBlendingType::FramebufferFetch => self.caps.has(Features::FRAMEBUFFER_FETCH),
            FbfBlendingType::NotSupported => true,
        };
        let chain = match requested {
            FbfBlendingType::Interlock => [FbfBlendingType::Interlock, FbfBlendingType::FramebufferFetch],
            FbfBlendingType::FramebufferFetch => {
                [FbfBlendingType::FramebufferFetch, FbfBlendingType::Interlock]
            }
            FbfBlendingType::NotSupported => return FbfBlendingType::NotSupported,
        };
        let resolved = chain
            .into_iter()
            .find(|f| supported(*f))
            .unwrap_or(FbfBlendingType::NotSupported);
        self.degrade(ResolutionStep::FbfBlending, requested, resolved)
    }

    fn blend_shader(&mut self, requested: BlendShaderType, fbf: FbfBlendingType) -> BlendShaderType {
        let caps = self.caps;
        let resolved = match requested {
            BlendShaderType::FramebufferFetch if fbf == FbfBlendingType::FramebufferFetch => {
                BlendShaderType::FramebufferFetch
            }
            BlendShaderType::FramebufferFetch | BlendShaderType::DualSource
                if caps.has(Features::DUAL_SOURCE_BLEND) =>
            {
                BlendShaderType::DualSource
            }
            _ => BlendShaderType::SingleSource,
        };
        self.degrade(ResolutionStep::BlendShader, requested, resolved)
    }

    fn clipping(
        &mut self,
        requested: ClippingType,
        fbf: FbfBlendingType,
        known_issues: &KnownIssues,
    ) -> ClippingType {
        let hw_clip = self.caps.has(Features::CLIP_DISTANCE)
            && match known_issues.find(self.caps, Workaround::DisableClipDistance) {
                Some(issue) => {
                    tracing::info!(vendor = %issue.vendor, "hardware clip distances disabled by known driver issue");
                    false
                }
                None => true,
            };
        let skip_color_write = fbf != FbfBlendingType::NotSupported;
        let resolved = match requested {
            ClippingType::ClipDistance if hw_clip => ClippingType::ClipDistance,
            ClippingType::ClipDistance | ClippingType::SkipColorWrite if skip_color_write => {
                ClippingType::SkipColorWrite
            }
            _ => ClippingType::Discard,
        };
        self.degrade(ResolutionStep::Clipping, requested, resolved)
    }

    fn data_store(&mut self, requested: DataStoreBacking, blocks: usize) -> (DataStoreBacking, usize) {
        let caps = self.caps;
        let limits = caps.limits();
        let tbo_ok = caps.has(Features::TEXTURE_BUFFER)
            && limits.max_texture_buffer_size as usize >= blocks;
        let ssbo_ok = caps.has(Features::SHADER_STORAGE_BUFFER)
            && limits.max_shader_storage_block_size as usize >= blocks * 16;
        let chain: &[DataStoreBacking] = match requested {
            DataStoreBacking::Tbo => &[DataStoreBacking::Tbo, DataStoreBacking::Ssbo],
            DataStoreBacking::Ssbo => &[DataStoreBacking::Ssbo, DataStoreBacking::Tbo],
            DataStoreBacking::Ubo => &[],
        };
        let backing = chain
            .iter()
            .copied()
            .find(|b| match b {
                DataStoreBacking::Tbo => tbo_ok,
                DataStoreBacking::Ssbo => ssbo_ok,
                DataStoreBacking::Ubo => true,
            })
            .unwrap_or(DataStoreBacking::Ubo);
        let backing = self.degrade(ResolutionStep::DataStoreBacking, requested, backing);

        let mut resolved_blocks = blocks;
        if backing == DataStoreBacking::Ubo {
            let max_blocks = (limits.max_uniform_block_size / 16) as usize;
            resolved_blocks = self.degrade(ResolutionStep::DataStoreSize, blocks, blocks.min(max_blocks));
        }
        (backing, resolved_blocks)
    }

    fn glyph_geometry(
        &mut self,
        requested: Option<GlyphGeometryBacking>,
        threshold: u64,
    ) -> GlyphGeometryBacking {
        let caps = self.caps;
        let limits = caps.limits();
        let tbo = caps.has(Features::TEXTURE_BUFFER);
        let ssbo = caps.has(Features::SHADER_STORAGE_BUFFER);
        match requested {
            None => use_optimal_backing(caps, threshold),
            Some(requested) => {
                let resolved = match requested {
                    GlyphGeometryBacking::TextureBuffer if tbo => GlyphGeometryBacking::TextureBuffer,
                    GlyphGeometryBacking::TextureBuffer | GlyphGeometryBacking::StorageBuffer if ssbo => {
                        GlyphGeometryBacking::StorageBuffer
                    }
                    GlyphGeometryBacking::StorageBuffer if tbo && limits.max_texture_buffer_size > 0 => {
                        GlyphGeometryBacking::TextureBuffer
                    }
                    _ => GlyphGeometryBacking::ArrayTexture,
                };
                self.degrade(ResolutionStep::GlyphGeometryBacking, requested, resolved)
            }
        }
    }
}

/// Pick the glyph geometry backing from device limits alone.
///
/// A texture buffer wins if it can address `threshold` elements, then a
/// storage block of `threshold` 16-byte elements; otherwise the store
/// falls back to a 2D array texture sized from the texture limits.
#[must_use]
pub fn use_optimal_backing(caps: &CapabilitySnapshot, threshold: u64) -> GlyphGeometryBacking {
    let limits = caps.limits();
    if caps.has(Features::TEXTURE_BUFFER) && u64::from(limits.max_texture_buffer_size) >= threshold {
        GlyphGeometryBacking::TextureBuffer
    } else if caps.has(Features::SHADER_STORAGE_BUFFER)
        && u64::from(limits.max_shader_storage_block_size) >= threshold
    {
        GlyphGeometryBacking::StorageBuffer
    } else {
        GlyphGeometryBacking::ArrayTexture
    }
}

fn front_matter(
    caps: &CapabilitySnapshot,
    config: &ResolvedConfig,
    requested: &RequestedConfig,
    resolver: &mut Resolver<'_>,
) -> GlslFrontMatter {
    let version = caps.version();
    let mut fm = GlslFrontMatter {
        version: GlslVersion::for_context(version),
        extensions: Vec::new(),
        binding_layout: caps.has(Features::BINDING_LAYOUT),
        precision_types: Vec::new(),
    };
    // Pragma for a feature that is not core at the context's version.
    let use_feature = |fm: &mut GlslFrontMatter, feature: Features, min_core: u32| {
        match caps.provider(feature) {
            Some(ext) => fm.add_extension(ext, ExtensionBehavior::Require),
            None => fm.require_version(min_core),
        }
    };

    let uses_ssbo = config.data_store_backing == DataStoreBacking::Ssbo
        || config.glyph_geometry_backing == GlyphGeometryBacking::StorageBuffer;
    let uses_tbo = config.data_store_backing == DataStoreBacking::Tbo
        || config.glyph_geometry_backing == GlyphGeometryBacking::TextureBuffer;
    if uses_ssbo {
        use_feature(&mut fm, Features::SHADER_STORAGE_BUFFER, if version.es { 310 } else { 430 });
    }
    if uses_tbo {
        use_feature(&mut fm, Features::TEXTURE_BUFFER, if version.es { 320 } else { 140 });
    }
    if version.es {
        fm.precision_types = vec!["float", "int", "sampler2D", "sampler2DArray", "usampler2DArray"];
        if uses_tbo {
            fm.precision_types.push("usamplerBuffer");
        }
    }
    if fm.binding_layout {
        use_feature(&mut fm, Features::BINDING_LAYOUT, if version.es { 310 } else { 420 });
    }
    if config.clipping_type == ClippingType::ClipDistance {
        use_feature(&mut fm, Features::CLIP_DISTANCE, 130);
    }
    if config.blend_shader_type == BlendShaderType::DualSource {
        use_feature(&mut fm, Features::DUAL_SOURCE_BLEND, 330);
    }
    if config.blend_shader_type == BlendShaderType::FramebufferFetch
        || config.fbf_blending_type == FbfBlendingType::FramebufferFetch
    {
        fm.add_extension("GL_EXT_shader_framebuffer_fetch", ExtensionBehavior::Require);
    }
    if config.fbf_blending_type == FbfBlendingType::Interlock {
        use_feature(&mut fm, Features::IMAGE_LOAD_STORE, if version.es { 310 } else { 420 });
        let ext = match config.interlock_type {
            InterlockType::IntelFragmentShaderOrdering => Some("GL_INTEL_fragment_shader_ordering"),
            InterlockType::ArbFragmentShaderInterlock => Some("GL_ARB_fragment_shader_interlock"),
            InterlockType::NvFragmentShaderInterlock => Some("GL_NV_fragment_shader_interlock"),
            InterlockType::NoInterlock => None,
        };
        if let Some(ext) = ext {
            fm.add_extension(ext, ExtensionBehavior::Require);
        }
    }
    if config.use_bindless_textures {
        if let Some(ext) = caps.provider(Features::BINDLESS_TEXTURE) {
            fm.add_extension(ext, ExtensionBehavior::Enable);
        }
    }

    if let Some(text) = &requested.glsl_version_override {
        match GlslVersion::parse(text) {
            Some(wanted) if wanted.es == fm.version.es => {
                let before = fm.version;
                fm.require_version(wanted.number);
                if fm.version != wanted {
                    resolver.degrade(ResolutionStep::GlslVersion, wanted, fm.version);
                }
                tracing::debug!(%before, %wanted, resolved = %fm.version, "GLSL version override");
            }
            _ => {
                tracing::warn!(override = %text, version = %fm.version, "ignoring GLSL version override for another profile");
            }
        }
    }
    fm
}

/// Resolve `requested` against `caps`.
///
/// Never fails: every option ends in a value the context supports.
#[must_use]
pub fn resolve(caps: &CapabilitySnapshot, requested: &RequestedConfig) -> ResolvedConfig {
    let mut resolver = Resolver {
        caps,
        degradations: Vec::new(),
    };

    let interlock_type = resolver.interlock();
    let fbf_blending_type = resolver.fbf(requested.fbf_blending_type, interlock_type);
    let blend_shader_type = resolver.blend_shader(requested.blend_shader_type, fbf_blending_type);
    let clipping_type = resolver.clipping(
        requested.clipping_type,
        fbf_blending_type,
        &requested.known_issues,
    );
    let separate_program_for_discard = if clipping_type == ClippingType::Discard {
        resolver.degrade(
            ResolutionStep::SeparateDiscardProgram,
            requested.separate_program_for_discard,
            false,
        )
    } else {
        requested.separate_program_for_discard
    };
    let (data_store_backing, data_blocks_per_store_buffer) = resolver.data_store(
        requested.data_store_backing,
        requested.data_blocks_per_store_buffer,
    );
    let glyph_geometry_backing = resolver.glyph_geometry(
        requested.glyph_geometry_backing,
        requested.optimal_geometry_threshold,
    );

    let mut config = ResolvedConfig {
        interlock_type,
        fbf_blending_type,
        blend_shader_type,
        clipping_type,
        separate_program_for_discard,
        data_store_backing,
        data_blocks_per_store_buffer,
        number_pools: requested.number_pools.max(1),
        attributes_per_buffer: requested.attributes_per_buffer,
        indices_per_buffer: requested.indices_per_buffer,
        glyph_geometry_backing,
        break_on_shader_change: requested.break_on_shader_change,
        use_bindless_textures: requested.use_bindless_textures
            && caps.has(Features::BINDLESS_TEXTURE),
        use_multi_draw: caps.has(Features::MULTI_DRAW),
        use_texture_view: caps.has(Features::TEXTURE_VIEW),
        front_matter: GlslFrontMatter {
            version: GlslVersion::for_context(caps.version()),
            extensions: Vec::new(),
            binding_layout: false,
            precision_types: Vec::new(),
        },
        degradations: Vec::new(),
    };
    config.front_matter = front_matter(caps, &config, requested, &mut resolver);
    config.degradations = resolver.degradations;

    tracing::info!(
        version = %caps.version(),
        interlock = %config.interlock_type,
        fbf = %config.fbf_blending_type,
        blend = %config.blend_shader_type,
        clipping = %config.clipping_type,
        data_store = %config.data_store_backing,
        data_blocks = config.data_blocks_per_store_buffer,
        glyph_geometry = %config.glyph_geometry_backing,
        glsl = %config.front_matter.version,
        degradations = config.degradations.len(),
        "resolved backend configuration"
    );
    config
}

/// Parameters of the glyph atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphAtlasParams {
    /// Width of each texel-store layer.
    pub texel_width: u32,
    /// Height of each texel-store layer.
    pub texel_height: u32,
    /// Initial number of texel-store layers.
    pub texel_layers: u32,
    /// Components per geometry element (1..=4).
    pub geometry_alignment: u32,
    /// Initial geometry capacity in elements.
    pub geometry_elements: u32,
    /// Buffer writes until [`flush`](crate::atlas::glyph::GlyphAtlas::flush).
    pub delayed: bool,
}

impl Default for GlyphAtlasParams {
    fn default() -> Self {
        Self {
            texel_width: 1024,
            texel_height: 1024,
            texel_layers: 4,
            geometry_alignment: 4,
            geometry_elements: 1 << 16,
            delayed: true,
        }
    }
}

/// Parameters of the image atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAtlasParams {
    /// log2 of the color tile size (including slack).
    pub log2_color_tile_size: u32,
    /// log2 of color tiles per row (and per column) of a layer.
    pub log2_color_tiles_per_row: u32,
    /// Initial color layers.
    pub color_layers: u32,
    /// log2 of the index tile size.
    pub log2_index_tile_size: u32,
    /// log2 of index tiles per row (and per column) of a layer.
    pub log2_index_tiles_per_row: u32,
    /// Initial index layers.
    pub index_layers: u32,
    /// Duplicated border texels on each side of a color tile.
    pub color_tile_slack: u32,
    /// Buffer writes until flush.
    pub delayed: bool,
}

impl Default for ImageAtlasParams {
    fn default() -> Self {
        Self {
            log2_color_tile_size: 5,
            log2_color_tiles_per_row: 6,
            color_layers: 1,
            log2_index_tile_size: 2,
            log2_index_tiles_per_row: 6,
            index_layers: 4,
            color_tile_slack: 1,
            delayed: true,
        }
    }
}

/// Parameters of the color-stop atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorStopAtlasParams {
    /// Texels per layer row.
    pub width: u32,
    /// Initial layer count.
    pub layers: u32,
    /// Replace `width` with the device's maximum texture size.
    pub use_max_width: bool,
    /// Buffer writes until flush.
    pub delayed: bool,
}

impl Default for ColorStopAtlasParams {
    fn default() -> Self {
        Self {
            width: 1024,
            layers: 16,
            use_max_width: false,
            delayed: true,
        }
    }
}

/// How recorded batches are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchingMode {
    /// Merge state-equal primitives and issue one multi-draw per batch.
    Batched,
    /// One draw call per primitive.
    PerPrimitive,
}

/// Parameters of the per-frame draw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawStreamParams {
    /// Pool slots.
    pub number_pools: usize,
    /// Attributes per slot.
    pub attributes_per_buffer: usize,
    /// Indices per slot.
    pub indices_per_buffer: usize,
    /// 16-byte data blocks per slot.
    pub data_blocks_per_store_buffer: usize,
    /// Shader-data backing.
    pub data_store_backing: DataStoreBacking,
    /// Use `glMultiDrawElements` when batching.
    pub use_multi_draw: bool,
    /// Break batches on item-shader change.
    pub break_on_shader_change: bool,
    /// Batching mode.
    pub batching: BatchingMode,
}

impl From<&ResolvedConfig> for DrawStreamParams {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            number_pools: config.number_pools,
            attributes_per_buffer: config.attributes_per_buffer,
            indices_per_buffer: config.indices_per_buffer,
            data_blocks_per_store_buffer: config.data_blocks_per_store_buffer,
            data_store_backing: config.data_store_backing,
            use_multi_draw: config.use_multi_draw,
            break_on_shader_change: config.break_on_shader_change,
            batching: BatchingMode::Batched,
        }
    }
}
