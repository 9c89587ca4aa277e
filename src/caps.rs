//! Capability prober: one immutable snapshot of what the context offers.
//!
//! A [`CapabilitySnapshot`] is computed once per context from a
//! [`ContextInfo`] (version, extension strings, limits) and the
//! [`EntryPoints`] the device implementation can actually drive. Every
//! configuration decision downstream is a pure function of the snapshot,
//! so tests build snapshots from synthetic [`ContextInfo`] values.

use ahash::AHashSet;
use bitflags::bitflags;

use crate::device::{Device, EntryPoints};
use crate::error::{Error, Result};

/// Minimum number of hardware clip distances the painter needs (one per
/// clip-rectangle edge).
pub const REQUIRED_CLIP_DISTANCES: u32 = 4;

/// A GL or GLES version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// `true` for OpenGL ES.
    pub es: bool,
}

impl GlVersion {
    /// Desktop OpenGL `major.minor`.
    #[must_use]
    pub const fn gl(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            es: false,
        }
    }

    /// OpenGL ES `major.minor`.
    #[must_use]
    pub const fn es(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            es: true,
        }
    }

    /// Whether this version is at least `major.minor` (profile is not compared).
    #[must_use]
    pub fn at_least(self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// Parse a `GL_VERSION` string.
    ///
    /// Accepts the desktop form (`"4.6.0 NVIDIA 535.54"`) and the ES form
    /// (`"OpenGL ES 3.2 Mesa 23.1"`).
    #[must_use]
    pub fn parse(version: &str) -> Option<Self> {
        let trimmed = version.trim();
        let (es, rest) = match trimmed.strip_prefix("OpenGL ES") {
            Some(rest) => {
                // Some drivers report "OpenGL ES-CM 1.1" or "OpenGL ES-CL".
                let rest = rest.trim_start_matches(|c: char| c != ' ' && !c.is_ascii_digit());
                (true, rest.trim_start())
            }
            None => (false, trimmed),
        };
        let numbers = rest.split_whitespace().next()?;
        let mut parts = numbers.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()
            .map(|m| m.chars().take_while(char::is_ascii_digit).collect::<String>())
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        Some(Self { major, minor, es })
    }

    /// Whether the engine-wide baseline (GL 3.3 / GLES 3.0) is met.
    #[must_use]
    pub fn meets_baseline(self) -> bool {
        if self.es {
            self.at_least(3, 0)
        } else {
            self.at_least(3, 3)
        }
    }
}

impl std::fmt::Display for GlVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.es {
            write!(f, "OpenGL ES {}.{}", self.major, self.minor)
        } else {
            write!(f, "OpenGL {}.{}", self.major, self.minor)
        }
    }
}

/// Implementation limits queried from the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// `GL_MAX_TEXTURE_SIZE`.
    pub max_texture_size: u32,
    /// `GL_MAX_ARRAY_TEXTURE_LAYERS`.
    pub max_array_texture_layers: u32,
    /// `GL_MAX_TEXTURE_BUFFER_SIZE`, in texels.
    pub max_texture_buffer_size: u32,
    /// `GL_MAX_UNIFORM_BLOCK_SIZE`, in bytes.
    pub max_uniform_block_size: u32,
    /// `GL_MAX_SHADER_STORAGE_BLOCK_SIZE`, in bytes.
    pub max_shader_storage_block_size: u32,
    /// `GL_MAX_FRAGMENT_SHADER_STORAGE_BLOCKS`.
    pub max_fragment_shader_storage_blocks: u32,
    /// `GL_MAX_CLIP_DISTANCES`.
    pub max_clip_distances: u32,
}

impl Default for Limits {
    /// The minimum values a GL 3.3 / GLES 3.0 implementation must report.
    fn default() -> Self {
        Self {
            max_texture_size: 2048,
            max_array_texture_layers: 256,
            max_texture_buffer_size: 65536,
            max_uniform_block_size: 16384,
            max_shader_storage_block_size: 0,
            max_fragment_shader_storage_blocks: 0,
            max_clip_distances: 0,
        }
    }
}

/// Raw facts about a context, before any feature derivation.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    /// Parsed `GL_VERSION`.
    pub version: GlVersion,
    /// `GL_VENDOR`.
    pub vendor: String,
    /// `GL_RENDERER`.
    pub renderer: String,
    /// Supported extension names.
    pub extensions: AHashSet<String>,
    /// Implementation limits.
    pub limits: Limits,
}

impl ContextInfo {
    /// Context info with no extensions and baseline limits.
    #[must_use]
    pub fn new(version: GlVersion) -> Self {
        Self {
            version,
            vendor: String::new(),
            renderer: String::new(),
            extensions: AHashSet::default(),
            limits: Limits::default(),
        }
    }

    /// Add an extension name.
    #[must_use]
    pub fn with_extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_owned());
        self
    }

    /// Replace the vendor and renderer strings.
    #[must_use]
    pub fn with_vendor(mut self, vendor: &str, renderer: &str) -> Self {
        self.vendor = vendor.to_owned();
        self.renderer = renderer.to_owned();
        self
    }

    /// Modify the limits via a closure.
    #[must_use]
    pub fn with_limits(mut self, f: impl FnOnce(&mut Limits)) -> Self {
        f(&mut self.limits);
        self
    }
}

bitflags! {
    /// Optional features derived from a [`ContextInfo`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u32 {
        /// Texture buffer objects (`samplerBuffer`).
        const TEXTURE_BUFFER = 1 << 0;
        /// Shader storage buffer objects usable from the fragment stage.
        const SHADER_STORAGE_BUFFER = 1 << 1;
        /// Dual-source blending (`SRC1_COLOR` factors).
        const DUAL_SOURCE_BLEND = 1 << 2;
        /// Coherent framebuffer fetch (`GL_EXT_shader_framebuffer_fetch`).
        const FRAMEBUFFER_FETCH = 1 << 3;
        /// `GL_INTEL_fragment_shader_ordering`.
        const INTEL_FRAGMENT_SHADER_ORDERING = 1 << 4;
        /// `GL_ARB_fragment_shader_interlock`.
        const ARB_FRAGMENT_SHADER_INTERLOCK = 1 << 5;
        /// `GL_NV_fragment_shader_interlock`.
        const NV_FRAGMENT_SHADER_INTERLOCK = 1 << 6;
        /// Image load/store, required by every interlock flavor.
        const IMAGE_LOAD_STORE = 1 << 7;
        /// `gl_ClipDistance` with at least [`REQUIRED_CLIP_DISTANCES`] planes.
        const CLIP_DISTANCE = 1 << 8;
        /// Bindless texture handles.
        const BINDLESS_TEXTURE = 1 << 9;
        /// `glCopyImageSubData`.
        const COPY_IMAGE = 1 << 10;
        /// `glTextureView`.
        const TEXTURE_VIEW = 1 << 11;
        /// `glMultiDrawElements`.
        const MULTI_DRAW = 1 << 12;
        /// `layout(binding = N)` qualifiers in GLSL.
        const BINDING_LAYOUT = 1 << 13;
    }
}

/// How one feature becomes available: core in a version, or via extensions.
struct Rule {
    feature: Features,
    gl_core: Option<(u32, u32)>,
    es_core: Option<(u32, u32)>,
    gl_extensions: &'static [&'static str],
    es_extensions: &'static [&'static str],
    entry_point: EntryPoints,
}

const RULES: &[Rule] = &[
    Rule {
        feature: Features::TEXTURE_BUFFER,
        gl_core: Some((3, 1)),
        es_core: Some((3, 2)),
        gl_extensions: &[],
        es_extensions: &["GL_OES_texture_buffer", "GL_EXT_texture_buffer"],
        entry_point: EntryPoints::TEXTURE_BUFFER,
    },
    Rule {
        feature: Features::SHADER_STORAGE_BUFFER,
        gl_core: Some((4, 3)),
        es_core: Some((3, 1)),
        gl_extensions: &["GL_ARB_shader_storage_buffer_object"],
        es_extensions: &[],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::DUAL_SOURCE_BLEND,
        gl_core: Some((3, 3)),
        es_core: None,
        gl_extensions: &["GL_ARB_blend_func_extended"],
        es_extensions: &["GL_EXT_blend_func_extended"],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::FRAMEBUFFER_FETCH,
        gl_core: None,
        es_core: None,
        gl_extensions: &["GL_EXT_shader_framebuffer_fetch"],
        es_extensions: &["GL_EXT_shader_framebuffer_fetch"],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::INTEL_FRAGMENT_SHADER_ORDERING,
        gl_core: None,
        es_core: None,
        gl_extensions: &["GL_INTEL_fragment_shader_ordering"],
        es_extensions: &["GL_INTEL_fragment_shader_ordering"],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::ARB_FRAGMENT_SHADER_INTERLOCK,
        gl_core: None,
        es_core: None,
        gl_extensions: &["GL_ARB_fragment_shader_interlock"],
        es_extensions: &[],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::NV_FRAGMENT_SHADER_INTERLOCK,
        gl_core: None,
        es_core: None,
        gl_extensions: &["GL_NV_fragment_shader_interlock"],
        es_extensions: &["GL_NV_fragment_shader_interlock"],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::IMAGE_LOAD_STORE,
        gl_core: Some((4, 2)),
        es_core: Some((3, 1)),
        gl_extensions: &["GL_ARB_shader_image_load_store"],
        es_extensions: &[],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::CLIP_DISTANCE,
        gl_core: Some((3, 0)),
        es_core: None,
        gl_extensions: &[],
        es_extensions: &["GL_EXT_clip_cull_distance", "GL_APPLE_clip_distance"],
        entry_point: EntryPoints::empty(),
    },
    Rule {
        feature: Features::BINDLESS_TEXTURE,
        gl_core: None,
        es_core: None,
        gl_extensions: &["GL_ARB_bindless_texture", "GL_NV_bindless_texture"],
        es_extensions: &["GL_NV_bindless_texture"],
        entry_point: EntryPoints::BINDLESS_TEXTURE,
    },
    Rule {
        feature: Features::COPY_IMAGE,
        gl_core: Some((4, 3)),
        es_core: Some((3, 2)),
        gl_extensions: &["GL_ARB_copy_image"],
        es_extensions: &["GL_EXT_copy_image", "GL_OES_copy_image"],
        entry_point: EntryPoints::COPY_IMAGE,
    },
    Rule {
        feature: Features::TEXTURE_VIEW,
        gl_core: Some((4, 3)),
        es_core: None,
        gl_extensions: &["GL_ARB_texture_view"],
        es_extensions: &["GL_OES_texture_view", "GL_EXT_texture_view"],
        entry_point: EntryPoints::TEXTURE_VIEW,
    },
    Rule {
        feature: Features::MULTI_DRAW,
        gl_core: Some((1, 4)),
        es_core: None,
        gl_extensions: &[],
        es_extensions: &["GL_EXT_multi_draw_arrays"],
        entry_point: EntryPoints::MULTI_DRAW,
    },
    Rule {
        feature: Features::BINDING_LAYOUT,
        gl_core: Some((4, 2)),
        es_core: Some((3, 1)),
        gl_extensions: &["GL_ARB_shading_language_420pack"],
        es_extensions: &[],
        entry_point: EntryPoints::empty(),
    },
];

/// Immutable record of what a context supports.
///
/// Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CapabilitySnapshot {
    info: ContextInfo,
    features: Features,
    /// Extension that supplies a feature when it is not core.
    providers: Vec<(Features, &'static str)>,
}

impl CapabilitySnapshot {
    /// Query the device once and derive the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedContext`] below GL 3.3 / GLES 3.0.
    pub fn query<D: Device>(device: &D) -> Result<Self> {
        Self::from_info(device.context_info(), device.entry_points())
    }

    /// Derive a snapshot from raw context facts.
    ///
    /// `entry_points` masks features whose functions the device cannot call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedContext`] below GL 3.3 / GLES 3.0. This
    /// is the only hard failure of capability resolution.
    pub fn from_info(info: ContextInfo, entry_points: EntryPoints) -> Result<Self> {
        if !info.version.meets_baseline() {
            return Err(Error::UnsupportedContext(info.version));
        }

        let mut features = Features::empty();
        let mut providers = Vec::new();
        for rule in RULES {
            if !entry_points.contains(rule.entry_point) {
                continue;
            }
            let (core, extensions) = if info.version.es {
                (rule.es_core, rule.es_extensions)
            } else {
                (rule.gl_core, rule.gl_extensions)
            };
            if core.is_some_and(|(major, minor)| info.version.at_least(major, minor)) {
                features |= rule.feature;
            } else if let Some(ext) = extensions.iter().find(|e| info.extensions.contains(**e)) {
                features |= rule.feature;
                providers.push((rule.feature, *ext));
            }
        }

        let limits = &info.limits;
        if limits.max_fragment_shader_storage_blocks == 0
            || limits.max_shader_storage_block_size == 0
        {
            features.remove(Features::SHADER_STORAGE_BUFFER);
        }
        if limits.max_clip_distances < REQUIRED_CLIP_DISTANCES {
            features.remove(Features::CLIP_DISTANCE);
        }
        if limits.max_texture_buffer_size == 0 {
            features.remove(Features::TEXTURE_BUFFER);
        }
        providers.retain(|(feature, _)| features.contains(*feature));

        Ok(Self {
            info,
            features,
            providers,
        })
    }

    /// Context version.
    #[must_use]
    pub fn version(&self) -> GlVersion {
        self.info.version
    }

    /// `GL_VENDOR` string.
    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.info.vendor
    }

    /// `GL_RENDERER` string.
    #[must_use]
    pub fn renderer(&self) -> &str {
        &self.info.renderer
    }

    /// Implementation limits.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.info.limits
    }

    /// Derived feature set.
    #[must_use]
    pub fn features(&self) -> Features {
        self.features
    }

    /// Whether every feature in `features` is available.
    #[must_use]
    pub fn has(&self, features: Features) -> bool {
        self.features.contains(features)
    }

    /// Whether the raw extension string is advertised.
    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.info.extensions.contains(name)
    }

    /// The extension supplying `feature`, or `None` when it is core (or absent).
    #[must_use]
    pub fn provider(&self, feature: Features) -> Option<&'static str> {
        self.providers
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, ext)| *ext)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_desktop_and_es_versions() {
        assert_eq!(
            GlVersion::parse("4.6.0 NVIDIA 535.54.03"),
            Some(GlVersion::gl(4, 6))
        );
        assert_eq!(
            GlVersion::parse("OpenGL ES 3.2 Mesa 23.1.4"),
            Some(GlVersion::es(3, 2))
        );
        assert_eq!(GlVersion::parse("3.3 (Core Profile) Mesa"), Some(GlVersion::gl(3, 3)));
        assert_eq!(GlVersion::parse("garbage"), None);
    }

    #[test]
    fn rejects_contexts_below_baseline() {
        let err = CapabilitySnapshot::from_info(
            ContextInfo::new(GlVersion::gl(3, 2)),
            EntryPoints::all(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedContext(_)));
        assert!(CapabilitySnapshot::from_info(
            ContextInfo::new(GlVersion::es(3, 0)),
            EntryPoints::all()
        )
        .is_ok());
    }

    #[test]
    fn core_features_need_no_provider() {
        let info = ContextInfo::new(GlVersion::gl(4, 5)).with_limits(|l| {
            l.max_shader_storage_block_size = 1 << 27;
            l.max_fragment_shader_storage_blocks = 8;
            l.max_clip_distances = 8;
        });
        let caps = CapabilitySnapshot::from_info(info, EntryPoints::all()).unwrap();
        assert!(caps.has(Features::SHADER_STORAGE_BUFFER | Features::TEXTURE_BUFFER));
        assert!(caps.has(Features::CLIP_DISTANCE | Features::COPY_IMAGE));
        assert_eq!(caps.provider(Features::SHADER_STORAGE_BUFFER), None);
    }

    #[test]
    fn es_features_come_from_extensions() {
        let info = ContextInfo::new(GlVersion::es(3, 1))
            .with_extension("GL_EXT_texture_buffer")
            .with_extension("GL_EXT_clip_cull_distance")
            .with_limits(|l| l.max_clip_distances = 8);
        let caps = CapabilitySnapshot::from_info(info, EntryPoints::all()).unwrap();
        assert!(caps.has(Features::TEXTURE_BUFFER));
        assert_eq!(
            caps.provider(Features::TEXTURE_BUFFER),
            Some("GL_EXT_texture_buffer")
        );
        assert_eq!(
            caps.provider(Features::CLIP_DISTANCE),
            Some("GL_EXT_clip_cull_distance")
        );
        // No fragment storage blocks reported: SSBO is unusable here.
        assert!(!caps.has(Features::SHADER_STORAGE_BUFFER));
    }

    #[test]
    fn missing_entry_points_mask_features() {
        let info = ContextInfo::new(GlVersion::gl(4, 6)).with_extension("GL_ARB_bindless_texture");
        let caps = CapabilitySnapshot::from_info(
            info,
            EntryPoints::all() - EntryPoints::TEXTURE_BUFFER - EntryPoints::BINDLESS_TEXTURE,
        )
        .unwrap();
        assert!(!caps.has(Features::TEXTURE_BUFFER));
        assert!(!caps.has(Features::BINDLESS_TEXTURE));
        assert!(caps.has(Features::DUAL_SOURCE_BLEND));
    }

    #[test]
    fn too_few_clip_planes_disable_clip_distance() {
        let info = ContextInfo::new(GlVersion::gl(3, 3)).with_limits(|l| l.max_clip_distances = 2);
        let caps = CapabilitySnapshot::from_info(info, EntryPoints::all()).unwrap();
        assert!(!caps.has(Features::CLIP_DISTANCE));
    }
}
