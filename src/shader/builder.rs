//! Assembles uber-shader source text.
//!
//! A program is the resolved front matter, a block of `#define`s naming
//! every backend choice, resource declarations for the resolved backings,
//! fetch helpers, the registered item and blend shaders renamed by id,
//! generated `switch` dispatchers over those ids, and a `main` per stage
//! that reads the primitive header and dispatches on its shader ids. The
//! shader bodies themselves are opaque text supplied by the caller.

use std::fmt::Write as _;

use crate::caps::REQUIRED_CLIP_DISTANCES;
use crate::config::{
    BlendShaderType, ClippingType, DataStoreBacking, FbfBlendingType, GlyphGeometryBacking,
    InterlockType, ResolvedConfig,
};
use crate::device::ProgramSource;
use crate::shader::registry::ShaderRegistry;
use crate::shader::{
    ATTRIBUTES, DATA_STORE_BLOCK, DATA_STORE_SAMPLER, DiscardGroup, GLYPH_GEOMETRY,
    GLYPH_GEOMETRY_BLOCK, ProgramKey, UNIFORM_BLOCK, binding, samplers,
};

/// Atlas geometry the shaders need as compile-time constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    /// Components per glyph geometry element.
    pub glyph_geometry_alignment: u32,
    /// `(log2_width, log2_height)` of an array-texture geometry store.
    pub glyph_geometry_log2_dims: Option<(u32, u32)>,
    /// Image color tile side, slack included.
    pub image_color_tile_size: u32,
    /// Image index tile side.
    pub image_index_tile_size: u32,
    /// Image color tile slack.
    pub image_slack: u32,
    /// Color-stop atlas width.
    pub color_stop_width: u32,
}

impl Default for AtlasLayout {
    fn default() -> Self {
        Self {
            glyph_geometry_alignment: 4,
            glyph_geometry_log2_dims: None,
            image_color_tile_size: 32,
            image_index_tile_size: 4,
            image_slack: 1,
            color_stop_width: 1024,
        }
    }
}

fn define(out: &mut String, name: &str) {
    let _ = writeln!(out, "#define GLPAINT_{name}");
}

fn define_value(out: &mut String, name: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "#define GLPAINT_{name} {value}");
}

/// `#define`s shared by both stages.
fn configuration_defines(config: &ResolvedConfig, layout: &AtlasLayout, key: ProgramKey) -> String {
    let mut out = String::new();
    define(
        &mut out,
        match config.data_store_backing {
            DataStoreBacking::Tbo => "DATA_STORE_TBO",
            DataStoreBacking::Ubo => "DATA_STORE_UBO",
            DataStoreBacking::Ssbo => "DATA_STORE_SSBO",
        },
    );
    define_value(&mut out, "DATA_STORE_BLOCKS", config.data_blocks_per_store_buffer);
    define(
        &mut out,
        match config.glyph_geometry_backing {
            GlyphGeometryBacking::TextureBuffer => "GLYPH_GEOMETRY_TEXTURE_BUFFER",
            GlyphGeometryBacking::ArrayTexture => "GLYPH_GEOMETRY_ARRAY_TEXTURE",
            GlyphGeometryBacking::StorageBuffer => "GLYPH_GEOMETRY_STORAGE_BUFFER",
        },
    );
    define_value(&mut out, "GLYPH_GEOMETRY_ALIGNMENT", layout.glyph_geometry_alignment);
    if let Some((log2_width, log2_height)) = layout.glyph_geometry_log2_dims {
        define_value(&mut out, "GLYPH_GEOMETRY_LOG2_WIDTH", log2_width);
        define_value(&mut out, "GLYPH_GEOMETRY_LOG2_HEIGHT", log2_height);
    }
    define(
        &mut out,
        match config.clipping_type {
            ClippingType::ClipDistance => "CLIP_DISTANCE",
            ClippingType::SkipColorWrite => "CLIP_SKIP_COLOR_WRITE",
            ClippingType::Discard => "CLIP_DISCARD",
        },
    );
    define(
        &mut out,
        match key.blend {
            BlendShaderType::SingleSource => "BLEND_SINGLE_SOURCE",
            BlendShaderType::DualSource => "BLEND_DUAL_SOURCE",
            BlendShaderType::FramebufferFetch => "BLEND_FRAMEBUFFER_FETCH",
        },
    );
    match config.fbf_blending_type {
        FbfBlendingType::NotSupported => {}
        FbfBlendingType::FramebufferFetch => define(&mut out, "FBF_FRAMEBUFFER_FETCH"),
        FbfBlendingType::Interlock => define(&mut out, "FBF_INTERLOCK"),
    }
    match config.interlock_type {
        InterlockType::IntelFragmentShaderOrdering => define(&mut out, "INTERLOCK_INTEL"),
        InterlockType::ArbFragmentShaderInterlock => define(&mut out, "INTERLOCK_ARB"),
        InterlockType::NvFragmentShaderInterlock => define(&mut out, "INTERLOCK_NV"),
        InterlockType::NoInterlock => {}
    }
    match key.discard {
        DiscardGroup::All => {}
        DiscardGroup::WithDiscard => define(&mut out, "WITH_DISCARD"),
        DiscardGroup::WithoutDiscard => define(&mut out, "WITHOUT_DISCARD"),
    }
    if config.use_bindless_textures {
        define(&mut out, "BINDLESS");
    }
    if !config.use_texture_view {
        define(&mut out, "GLYPH_TEXELS_UINT_ONLY");
    }
    define_value(&mut out, "IMAGE_COLOR_TILE_SIZE", layout.image_color_tile_size);
    define_value(&mut out, "IMAGE_INDEX_TILE_SIZE", layout.image_index_tile_size);
    define_value(&mut out, "IMAGE_SLACK", layout.image_slack);
    define_value(&mut out, "COLOR_STOP_WIDTH", layout.color_stop_width);
    out
}

/// Sampler and block declarations, with binding qualifiers when usable.
fn resource_declarations(config: &ResolvedConfig) -> String {
    let layout = config.front_matter.binding_layout;
    let mut out = String::new();
    for sampler in samplers(config) {
        let (ty, name) = (sampler.glsl_type, sampler.name);
        if layout {
            let _ = writeln!(out, "layout(binding = {}) uniform {ty} {name};", sampler.unit);
        } else {
            let _ = writeln!(out, "uniform {ty} {name};");
        }
    }
    let block = |out: &mut String, kind: &str, name: &str, binding: u32, body: &str| {
        if layout {
            let _ = writeln!(out, "layout(std140, binding = {binding}) {kind} {name} {{ {body} }};");
        } else {
            let _ = writeln!(out, "layout(std140) {kind} {name} {{ {body} }};");
        }
    };
    block(
        &mut out,
        "uniform",
        UNIFORM_BLOCK,
        binding::UNIFORM_BLOCK,
        "vec4 glpaint_resolution; vec4 glpaint_misc;",
    );
    match config.data_store_backing {
        DataStoreBacking::Ubo => block(
            &mut out,
            "uniform",
            DATA_STORE_BLOCK,
            binding::DATA_STORE_BLOCK,
            "uvec4 glpaint_data[GLPAINT_DATA_STORE_BLOCKS];",
        ),
        DataStoreBacking::Ssbo => block(
            &mut out,
            "readonly buffer",
            DATA_STORE_BLOCK,
            binding::DATA_STORE_STORAGE,
            "uvec4 glpaint_data[];",
        ),
        DataStoreBacking::Tbo => {}
    }
    if config.glyph_geometry_backing == GlyphGeometryBacking::StorageBuffer {
        block(
            &mut out,
            "readonly buffer",
            GLYPH_GEOMETRY_BLOCK,
            binding::GLYPH_GEOMETRY_STORAGE,
            &format!("uvec4 {GLYPH_GEOMETRY}[];"),
        );
    }
    out
}

/// Fetch helpers over the data store and the glyph geometry store, and the
/// clip plane evaluation. Shared by both stages.
fn fetch_functions(config: &ResolvedConfig, layout: &AtlasLayout) -> String {
    let mut out = String::from("uvec4 glpaint_fetch_data(uint offset)\n{\n");
    match config.data_store_backing {
        DataStoreBacking::Tbo => {
            let _ = writeln!(out, "    return texelFetch({DATA_STORE_SAMPLER}, int(offset));");
        }
        DataStoreBacking::Ubo | DataStoreBacking::Ssbo => {
            out.push_str("    return glpaint_data[offset];\n");
        }
    }
    out.push_str("}\n");

    out.push_str("uvec4 glpaint_fetch_glyph_geometry(uint offset)\n{\n");
    match config.glyph_geometry_backing {
        GlyphGeometryBacking::TextureBuffer => {
            let _ = writeln!(out, "    return texelFetch({GLYPH_GEOMETRY}, int(offset));");
        }
        GlyphGeometryBacking::ArrayTexture => {
            let (log2_width, log2_height) = layout.glyph_geometry_log2_dims.unwrap_or((0, 0));
            let _ = writeln!(
                out,
                "    uint x = offset & {}u;\n    uint y = (offset >> {log2_width}u) & {}u;\n    uint layer = offset >> {}u;",
                (1u32 << log2_width) - 1,
                (1u32 << log2_height) - 1,
                log2_width + log2_height,
            );
            let _ = writeln!(
                out,
                "    return texelFetch({GLYPH_GEOMETRY}, ivec3(int(x), int(y), int(layer)), 0);"
            );
        }
        GlyphGeometryBacking::StorageBuffer => {
            let _ = writeln!(out, "    return {GLYPH_GEOMETRY}[offset];");
        }
    }
    out.push_str("}\n");

    // Four planes `a x + b y + c >= 0` in normalized device coordinates,
    // stored as consecutive blocks at `clip`. Zero means unclipped.
    out.push_str(
        "float glpaint_clip_distance(uint clip, int plane, vec2 p)\n{\n    \
         if (clip == 0u) {\n        return 1.0;\n    }\n    \
         vec4 equation = uintBitsToFloat(glpaint_fetch_data(clip + uint(plane)));\n    \
         return dot(equation.xyz, vec3(p, 1.0));\n}\n",
    );
    out
}

/// Rename `glpaint_item_<stage>` in `source` to a per-id function.
fn renamed(source: &str, stage: &str, id: u32) -> String {
    format!(
        "#define glpaint_item_{stage} glpaint_item_{stage}_{id}\n{source}\n#undef glpaint_item_{stage}\n"
    )
}

fn item_dispatch(stage: &str, ids: &[u32]) -> String {
    let mut out = format!("vec4 glpaint_run_item_{stage}(uint shader, uint data)\n{{\n    switch (shader) {{\n");
    for id in ids {
        let _ = writeln!(out, "    case {id}u: return glpaint_item_{stage}_{id}(data);");
    }
    out.push_str("    default: break;\n    }\n    return vec4(0.0);\n}\n");
    out
}

fn vertex_main(config: &ResolvedConfig) -> String {
    let mut out = String::from(
        "void main()\n{\n    \
         uvec4 header0 = glpaint_fetch_data(glpaint_header);\n    \
         uvec4 header1 = glpaint_fetch_data(glpaint_header + 1u);\n    \
         glpaint_v_header0 = header0;\n    \
         glpaint_v_header1 = header1;\n    \
         gl_Position = glpaint_run_item_vert(header0.x, header0.z);\n    \
         glpaint_v_position = gl_Position.xy / gl_Position.w;\n",
    );
    if config.clipping_type == ClippingType::ClipDistance {
        let _ = writeln!(
            out,
            "    for (int i = 0; i < {REQUIRED_CLIP_DISTANCES}; ++i) {{\n        \
             gl_ClipDistance[i] = glpaint_clip_distance(header0.w, i, glpaint_v_position);\n    }}"
        );
    }
    out.push_str("}\n");
    out
}

fn fragment_main(config: &ResolvedConfig, key: ProgramKey) -> String {
    let mut out = String::new();
    if config.clipping_type != ClippingType::ClipDistance {
        let _ = writeln!(
            out,
            "bool glpaint_clipped(uint clip, vec2 p)\n{{\n    \
             for (int i = 0; i < {REQUIRED_CLIP_DISTANCES}; ++i) {{\n        \
             if (glpaint_clip_distance(clip, i, p) < 0.0) {{\n            return true;\n        }}\n    }}\n    \
             return false;\n}}"
        );
    }
    out.push_str("void main()\n{\n");
    match config.clipping_type {
        ClippingType::ClipDistance => {}
        // With framebuffer fetch the destination is already in the output.
        ClippingType::SkipColorWrite if key.blend == BlendShaderType::FramebufferFetch => {
            out.push_str(
                "    if (glpaint_clipped(glpaint_v_header0.w, glpaint_v_position)) {\n        return;\n    }\n",
            );
        }
        ClippingType::SkipColorWrite | ClippingType::Discard => {
            out.push_str(
                "    if (glpaint_clipped(glpaint_v_header0.w, glpaint_v_position)) {\n        discard;\n    }\n",
            );
        }
    }
    out.push_str(
        "    vec4 color = glpaint_run_item_frag(glpaint_v_header0.x, glpaint_v_header0.z);\n    \
         glpaint_run_blend(glpaint_v_header0.y, color);\n}\n",
    );
    out
}

/// Build the vertex and fragment source of one program.
///
/// Item shaders define `vec4 glpaint_item_vert(uint data)`, returning the
/// clip-space position, and `vec4 glpaint_item_frag(uint data)`, returning
/// the premultiplied color; `data` is the header's item-data offset. Blend
/// variants define `void glpaint_blend(vec4 color)`, which writes
/// `glpaint_color0` (and `glpaint_color1` for dual-source).
#[must_use]
pub fn build_program(
    config: &ResolvedConfig,
    layout: &AtlasLayout,
    registry: &ShaderRegistry,
    key: ProgramKey,
) -> ProgramSource {
    let front = config.front_matter.render();
    let defines = configuration_defines(config, layout, key);
    let resources = resource_declarations(config);
    let fetch = fetch_functions(config, layout);

    let items: Vec<_> = registry
        .items()
        .filter(|(_, item)| key.discard.includes(item.uses_discard))
        .collect();
    let ids: Vec<u32> = items.iter().map(|(id, _)| id.get()).collect();

    let mut vertex = format!("{front}#define GLPAINT_VERTEX_SHADER\n{defines}{resources}");
    for (location, name) in ATTRIBUTES.iter().enumerate() {
        let ty = if *name == ATTRIBUTES[3] { "uint" } else { "uvec4" };
        if config.front_matter.binding_layout {
            let _ = writeln!(vertex, "layout(location = {location}) in {ty} {name};");
        } else {
            let _ = writeln!(vertex, "in {ty} {name};");
        }
    }
    vertex.push_str("flat out uvec4 glpaint_v_header0;\nflat out uvec4 glpaint_v_header1;\nout vec2 glpaint_v_position;\n");
    vertex.push_str(&fetch);
    for (id, item) in &items {
        vertex.push_str(&renamed(&item.vertex, "vert", id.get()));
    }
    vertex.push_str(&item_dispatch("vert", &ids));
    vertex.push_str(&vertex_main(config));

    let mut fragment = format!("{front}#define GLPAINT_FRAGMENT_SHADER\n{defines}{resources}");
    fragment.push_str("flat in uvec4 glpaint_v_header0;\nflat in uvec4 glpaint_v_header1;\nin vec2 glpaint_v_position;\n");
    let dual_source_output = key.blend == BlendShaderType::DualSource;
    if dual_source_output {
        fragment.push_str("layout(location = 0, index = 0) out vec4 glpaint_color0;\n");
        fragment.push_str("layout(location = 0, index = 1) out vec4 glpaint_color1;\n");
    } else if key.blend == BlendShaderType::FramebufferFetch {
        fragment.push_str("inout vec4 glpaint_color0;\n");
    } else {
        fragment.push_str("out vec4 glpaint_color0;\n");
    }
    fragment.push_str(&fetch);
    for (id, item) in &items {
        fragment.push_str(&renamed(&item.fragment, "frag", id.get()));
    }
    fragment.push_str(&item_dispatch("frag", &ids));

    let mut blend_switch = String::from(
        "void glpaint_run_blend(uint shader, vec4 color)\n{\n    switch (shader) {\n",
    );
    for (id, blend) in registry.blends() {
        if let Some(variant) = blend.variant(key.blend) {
            let id = id.get();
            let _ = write!(
                fragment,
                "#define glpaint_blend glpaint_blend_{id}\n{}\n#undef glpaint_blend\n",
                variant.source
            );
            let _ = writeln!(blend_switch, "    case {id}u: glpaint_blend_{id}(color); break;");
        }
    }
    blend_switch.push_str("    default: break;\n    }\n}\n");
    fragment.push_str(&blend_switch);
    fragment.push_str(&fragment_main(config, key));

    ProgramSource {
        vertex,
        fragment,
        attributes: ATTRIBUTES
            .iter()
            .enumerate()
            .map(|(location, name)| (u32::try_from(location).unwrap_or(0), (*name).to_owned()))
            .collect(),
        dual_source_output,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ahash::{AHashMap, AHashSet};

    use super::*;
    use crate::caps::{CapabilitySnapshot, ContextInfo, GlVersion};
    use crate::config::{RequestedConfig, resolve};
    use crate::device::{BlendFactor, BlendState, EntryPoints, TextureKind};
    use crate::shader::registry::{BlendShader, BlendVariant, ItemShader};

    fn config(info: ContextInfo, requested: &RequestedConfig) -> ResolvedConfig {
        let caps = CapabilitySnapshot::from_info(info, EntryPoints::all()).unwrap();
        resolve(&caps, requested)
    }

    fn registry() -> ShaderRegistry {
        let mut registry = ShaderRegistry::new();
        for (name, uses_discard) in [("solid", false), ("glyph", true)] {
            registry.register_item(ItemShader {
                name: name.to_owned(),
                vertex: format!("vec4 glpaint_item_vert(uint data) {{ /* {name} */ return vec4(0.0); }}"),
                fragment: format!("vec4 glpaint_item_frag(uint data) {{ /* {name} */ return vec4(1.0); }}"),
                uses_discard,
            });
        }
        let over = BlendState::add(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
        registry.register_blend(BlendShader {
            name: "src-over".to_owned(),
            variants: vec![
                BlendVariant {
                    kind: BlendShaderType::SingleSource,
                    source: "void glpaint_blend(vec4 color) { glpaint_color0 = color; }".to_owned(),
                    state: over,
                },
                BlendVariant {
                    kind: BlendShaderType::DualSource,
                    source: "void glpaint_blend(vec4 color) { glpaint_color0 = color; glpaint_color1 = vec4(color.a); }"
                        .to_owned(),
                    state: over,
                },
                BlendVariant {
                    kind: BlendShaderType::FramebufferFetch,
                    source: "void glpaint_blend(vec4 color) { glpaint_color0 = color + glpaint_color0 * (1.0 - color.a); }"
                        .to_owned(),
                    state: BlendState::DISABLED,
                },
            ],
        });
        registry
    }

    /// What a stage declares, defines and calls, after applying the
    /// single-token `#define` renames the builder emits.
    #[derive(Default)]
    struct Outline {
        functions: Vec<String>,
        calls: AHashSet<String>,
        globals: Vec<String>,
        uniforms: AHashMap<String, String>,
    }

    fn tokenize(line: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if c.is_alphanumeric() || c == '_' {
                let mut word = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '.' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(word);
            } else if !c.is_whitespace() {
                tokens.push(c.to_string());
            }
        }
        tokens
    }

    fn is_identifier(token: &str) -> bool {
        token.starts_with(|c: char| c.is_alphabetic() || c == '_')
    }

    fn outline(source: &str) -> Outline {
        let mut renames: AHashMap<String, String> = AHashMap::new();
        let mut tokens = Vec::new();
        for line in source.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                ["#define", name, value] if is_identifier(value) => {
                    renames.insert((*name).to_owned(), (*value).to_owned());
                }
                ["#undef", name] => {
                    renames.remove(*name);
                }
                [first, ..] if first.starts_with('#') => {}
                _ => tokens.extend(
                    tokenize(line)
                        .into_iter()
                        .map(|t| renames.get(&t).cloned().unwrap_or(t)),
                ),
            }
        }

        let mut out = Outline::default();
        // `true` for a function body, `false` for a block body.
        let mut scopes: Vec<bool> = Vec::new();
        let mut parens = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            let prev = |back: usize| i.checked_sub(back).map(|j| tokens[j].as_str());
            let next = tokens.get(i + 1).map(String::as_str);
            match token.as_str() {
                "(" => parens += 1,
                ")" => parens -= 1,
                "{" => scopes.push(scopes.is_empty() && prev(1) == Some(")")),
                "}" => {
                    scopes.pop();
                }
                _ => {}
            }
            if !is_identifier(token) {
                continue;
            }
            let in_function = scopes.iter().any(|f| *f);
            if in_function {
                if next == Some("(") && token.starts_with("glpaint_") {
                    out.calls.insert(token.clone());
                }
                continue;
            }
            if scopes.is_empty() && parens == 0 && next == Some("(") && prev(1).is_some_and(is_identifier) {
                out.functions.push(token.clone());
            }
            if token.starts_with("glpaint_")
                && parens == 0
                && matches!(next, Some(";" | "["))
                && prev(1).is_some_and(is_identifier)
            {
                out.globals.push(token.clone());
                if scopes.is_empty() && prev(2) == Some("uniform") {
                    out.uniforms.insert(token.clone(), tokens[i - 1].clone());
                }
            }
        }
        out
    }

    fn assert_well_formed(stage: &str, source: &str, config: &ResolvedConfig) {
        let outline = outline(source);
        let defined: AHashSet<&String> = outline.functions.iter().collect();
        assert_eq!(defined.len(), outline.functions.len(), "{stage}: function defined twice\n{source}");
        assert!(defined.contains(&"main".to_owned()), "{stage}: no main");
        for call in &outline.calls {
            assert!(defined.contains(call), "{stage}: `{call}` is called but never defined\n{source}");
        }
        let declared: AHashSet<&String> = outline.globals.iter().collect();
        assert_eq!(declared.len(), outline.globals.len(), "{stage}: name declared twice\n{source}");

        let expected = samplers(config);
        let declared_samplers: Vec<_> = outline
            .uniforms
            .iter()
            .filter(|(_, ty)| ty.contains("sampler"))
            .collect();
        assert_eq!(declared_samplers.len(), expected.len(), "{stage}: sampler set");
        for sampler in expected {
            let ty = &outline.uniforms[sampler.name];
            assert_eq!(ty, sampler.glsl_type, "{stage}: {}", sampler.name);
            let kind = if ty.ends_with("Buffer") {
                TextureKind::Buffer
            } else if ty.ends_with("2DArray") {
                TextureKind::Array2D
            } else {
                TextureKind::Plain2D
            };
            assert_eq!(kind, sampler.kind, "{stage}: {} bound as {:?}", sampler.name, sampler.kind);
            if config.front_matter.version.es {
                assert!(source.contains(&format!("precision highp {ty};")), "{stage}: no precision for {ty}");
            }
        }
    }

    #[test]
    fn programs_are_well_formed_for_every_backing_and_version() {
        let contexts = [
            ContextInfo::new(GlVersion::gl(3, 3)),
            ContextInfo::new(GlVersion::gl(4, 5))
                .with_extension("GL_ARB_blend_func_extended")
                .with_limits(|l| {
                    l.max_texture_buffer_size = 1 << 27;
                    l.max_shader_storage_block_size = 1 << 27;
                    l.max_fragment_shader_storage_blocks = 8;
                    l.max_clip_distances = 8;
                }),
            ContextInfo::new(GlVersion::es(3, 0)),
            ContextInfo::new(GlVersion::es(3, 2))
                .with_extension("GL_EXT_shader_framebuffer_fetch")
                .with_limits(|l| {
                    l.max_texture_buffer_size = 1 << 27;
                    l.max_shader_storage_block_size = 1 << 27;
                    l.max_fragment_shader_storage_blocks = 8;
                }),
        ];
        let geometry = [
            GlyphGeometryBacking::TextureBuffer,
            GlyphGeometryBacking::ArrayTexture,
            GlyphGeometryBacking::StorageBuffer,
        ];
        let data = [DataStoreBacking::Tbo, DataStoreBacking::Ubo, DataStoreBacking::Ssbo];
        let layout = AtlasLayout {
            glyph_geometry_log2_dims: Some((10, 10)),
            ..AtlasLayout::default()
        };
        let registry = registry();

        let mut seen_geometry = AHashSet::new();
        let mut seen_data = AHashSet::new();
        for info in &contexts {
            for backing in geometry {
                for store in data {
                    let requested = RequestedConfig::default()
                        .with_glyph_geometry_backing(backing)
                        .with_data_store_backing(store)
                        .with_fbf_blending_type(FbfBlendingType::FramebufferFetch)
                        .with_clipping_type(ClippingType::SkipColorWrite);
                    for requested in [requested.clone(), requested.with_clipping_type(ClippingType::ClipDistance)] {
                        let config = config(info.clone(), &requested);
                        seen_geometry.insert(config.glyph_geometry_backing);
                        seen_data.insert(config.data_store_backing);
                        for blend in BlendShaderType::ALL {
                            let key = ProgramKey {
                                discard: DiscardGroup::All,
                                blend,
                            };
                            let program = build_program(&config, &layout, &registry, key);
                            assert_well_formed("vertex", &program.vertex, &config);
                            assert_well_formed("fragment", &program.fragment, &config);
                        }
                    }
                }
            }
        }
        assert_eq!(seen_geometry.len(), 3);
        assert_eq!(seen_data.len(), 3);
    }

    #[test]
    fn main_dispatches_on_the_header() {
        let config = config(ContextInfo::new(GlVersion::gl(3, 3)), &RequestedConfig::default());
        let key = ProgramKey {
            discard: DiscardGroup::All,
            blend: BlendShaderType::SingleSource,
        };
        let program = build_program(&config, &AtlasLayout::default(), &registry(), key);
        let vertex = outline(&program.vertex);
        assert!(vertex.calls.contains("glpaint_run_item_vert"));
        assert!(vertex.calls.contains("glpaint_fetch_data"));
        assert!(vertex.functions.contains(&"glpaint_item_vert_2".to_owned()));
        let fragment = outline(&program.fragment);
        assert!(fragment.calls.contains("glpaint_run_item_frag"));
        assert!(fragment.calls.contains("glpaint_run_blend"));
        assert!(fragment.calls.contains("glpaint_blend_1"));
    }

    #[test]
    fn storage_geometry_is_only_a_block() {
        let info = ContextInfo::new(GlVersion::gl(4, 5)).with_limits(|l| {
            l.max_shader_storage_block_size = 1 << 27;
            l.max_fragment_shader_storage_blocks = 8;
        });
        let config = config(
            info,
            &RequestedConfig::default().with_glyph_geometry_backing(GlyphGeometryBacking::StorageBuffer),
        );
        assert_eq!(config.glyph_geometry_backing, GlyphGeometryBacking::StorageBuffer);
        let key = ProgramKey {
            discard: DiscardGroup::All,
            blend: BlendShaderType::SingleSource,
        };
        let program = build_program(&config, &AtlasLayout::default(), &registry(), key);
        assert_eq!(program.fragment.matches("glpaint_glyph_geometry;").count(), 0);
        assert!(program
            .fragment
            .contains("readonly buffer GlpaintGlyphGeometry { uvec4 glpaint_glyph_geometry[]; };"));
    }

    #[test]
    fn front_matter_leads_and_ubo_block_is_declared() {
        let config = config(
            ContextInfo::new(GlVersion::gl(3, 3)),
            &RequestedConfig::default().with_data_store_backing(DataStoreBacking::Ubo),
        );
        let key = ProgramKey {
            discard: DiscardGroup::All,
            blend: config.blend_shader_type,
        };
        let program = build_program(&config, &AtlasLayout::default(), &registry(), key);
        assert!(program.vertex.starts_with("#version 330\n"));
        assert!(program.fragment.contains("#define GLPAINT_DATA_STORE_UBO"));
        assert!(program.fragment.contains("uniform GlpaintDataStore"));
        assert!(program.vertex.contains("case 1u: return glpaint_item_vert_1(data);"));
        assert!(program.vertex.contains("case 2u: return glpaint_item_vert_2(data);"));
        assert_eq!(program.attributes.len(), 4);
    }

    #[test]
    fn discard_groups_split_item_shaders() {
        let config = config(
            ContextInfo::new(GlVersion::gl(3, 3)),
            &RequestedConfig::default(),
        );
        let registry = registry();
        let with = build_program(
            &config,
            &AtlasLayout::default(),
            &registry,
            ProgramKey {
                discard: DiscardGroup::WithDiscard,
                blend: BlendShaderType::SingleSource,
            },
        );
        let without = build_program(
            &config,
            &AtlasLayout::default(),
            &registry,
            ProgramKey {
                discard: DiscardGroup::WithoutDiscard,
                blend: BlendShaderType::SingleSource,
            },
        );
        assert!(with.fragment.contains("/* glyph */"));
        assert!(!with.fragment.contains("/* solid */"));
        assert!(without.fragment.contains("/* solid */"));
        assert!(!without.fragment.contains("/* glyph */"));
    }

    #[test]
    fn array_geometry_dimensions_become_defines() {
        let config = config(
            ContextInfo::new(GlVersion::gl(3, 3)),
            &RequestedConfig::default(),
        );
        let layout = AtlasLayout {
            glyph_geometry_log2_dims: Some((10, 10)),
            ..AtlasLayout::default()
        };
        let key = ProgramKey {
            discard: DiscardGroup::All,
            blend: BlendShaderType::SingleSource,
        };
        let program = build_program(&config, &layout, &ShaderRegistry::new(), key);
        assert!(program.vertex.contains("#define GLPAINT_GLYPH_GEOMETRY_ARRAY_TEXTURE"));
        assert!(program.vertex.contains("#define GLPAINT_GLYPH_GEOMETRY_LOG2_WIDTH 10"));
        assert!(program.vertex.contains("uint layer = offset >> 20u;"));
    }

    #[test]
    fn dual_source_declares_second_output() {
        let info = ContextInfo::new(GlVersion::gl(4, 5)).with_extension("GL_ARB_blend_func_extended");
        let config = config(info, &RequestedConfig::default());
        let key = ProgramKey {
            discard: DiscardGroup::All,
            blend: BlendShaderType::DualSource,
        };
        let program = build_program(&config, &AtlasLayout::default(), &ShaderRegistry::new(), key);
        assert!(program.dual_source_output);
        assert!(program.fragment.contains("index = 1) out vec4 glpaint_color1"));
    }
}
