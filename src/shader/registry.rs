//! Append-only registry of item and blend shaders.
//!
//! Every shader gets a small integer id, starting at 1, that the uber-shader
//! switches on and the draw stream groups by. Ids are never reused and
//! shaders are never removed; the registry's version changes on every
//! registration so compiled programs know when they are stale.

use std::fmt;

use ahash::AHashMap;

use crate::config::BlendShaderType;
use crate::device::BlendState;

/// Id of a registered shader. Zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u32);

impl ShaderId {
    /// The raw id used in shader dispatch.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Vertex and fragment stages of an item shader.
///
/// The vertex source defines `vec4 glpaint_item_vert(uint data)` and the
/// fragment source `vec4 glpaint_item_frag(uint data)`; the builder renames
/// them per id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemShader {
    /// Unique name.
    pub name: String,
    /// Vertex-stage GLSL.
    pub vertex: String,
    /// Fragment-stage GLSL.
    pub fragment: String,
    /// Whether the fragment stage may `discard`.
    pub uses_discard: bool,
}

/// One implementation of a blend mode for one [`BlendShaderType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlendVariant {
    /// Blend shader type this variant is written for.
    pub kind: BlendShaderType,
    /// Fragment epilogue defining `void glpaint_blend(vec4 color)`.
    pub source: String,
    /// Fixed-function state to draw with.
    pub state: BlendState,
}

/// A blend mode with one variant per blend shader type it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlendShader {
    /// Unique name.
    pub name: String,
    /// Available implementations.
    pub variants: Vec<BlendVariant>,
}

impl BlendShader {
    /// The variant for `kind`, if the mode has one.
    #[must_use]
    pub fn variant(&self, kind: BlendShaderType) -> Option<&BlendVariant> {
        self.variants.iter().find(|v| v.kind == kind)
    }
}

/// The registry.
#[derive(Debug, Default)]
pub struct ShaderRegistry {
    items: Vec<ItemShader>,
    blends: Vec<BlendShader>,
    item_names: AHashMap<String, ShaderId>,
    blend_names: AHashMap<String, ShaderId>,
}

fn next_id(len: usize) -> ShaderId {
    ShaderId(u32::try_from(len + 1).unwrap_or(u32::MAX))
}

impl ShaderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item shader; a name already registered returns its
    /// existing id.
    pub fn register_item(&mut self, shader: ItemShader) -> ShaderId {
        if let Some(&id) = self.item_names.get(&shader.name) {
            return id;
        }
        let id = next_id(self.items.len());
        tracing::debug!(%id, name = %shader.name, "registered item shader");
        self.item_names.insert(shader.name.clone(), id);
        self.items.push(shader);
        id
    }

    /// Register a blend shader; a name already registered returns its
    /// existing id.
    pub fn register_blend(&mut self, shader: BlendShader) -> ShaderId {
        if let Some(&id) = self.blend_names.get(&shader.name) {
            return id;
        }
        debug_assert!(!shader.variants.is_empty(), "blend shader without variants");
        let id = next_id(self.blends.len());
        tracing::debug!(%id, name = %shader.name, "registered blend shader");
        self.blend_names.insert(shader.name.clone(), id);
        self.blends.push(shader);
        id
    }

    /// Look up an item shader.
    #[must_use]
    pub fn item(&self, id: ShaderId) -> Option<&ItemShader> {
        self.items.get((id.0 as usize).checked_sub(1)?)
    }

    /// Look up a blend shader.
    #[must_use]
    pub fn blend(&self, id: ShaderId) -> Option<&BlendShader> {
        self.blends.get((id.0 as usize).checked_sub(1)?)
    }

    /// Item shader by name.
    #[must_use]
    pub fn item_id(&self, name: &str) -> Option<ShaderId> {
        self.item_names.get(name).copied()
    }

    /// Blend shader by name.
    #[must_use]
    pub fn blend_id(&self, name: &str) -> Option<ShaderId> {
        self.blend_names.get(name).copied()
    }

    /// Item shaders in id order.
    pub fn items(&self) -> impl Iterator<Item = (ShaderId, &ItemShader)> {
        self.items.iter().enumerate().map(|(i, s)| (next_id(i), s))
    }

    /// Blend shaders in id order.
    pub fn blends(&self) -> impl Iterator<Item = (ShaderId, &BlendShader)> {
        self.blends.iter().enumerate().map(|(i, s)| (next_id(i), s))
    }

    /// Changes whenever a shader is registered.
    #[must_use]
    pub fn version(&self) -> (usize, usize) {
        (self.items.len(), self.blends.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::BlendFactor;

    fn item(name: &str) -> ItemShader {
        ItemShader {
            name: name.to_owned(),
            vertex: String::new(),
            fragment: String::new(),
            uses_discard: false,
        }
    }

    #[test]
    fn ids_are_monotonic_and_names_dedupe() {
        let mut registry = ShaderRegistry::new();
        let a = registry.register_item(item("fill"));
        let b = registry.register_item(item("glyph"));
        assert_eq!((a.get(), b.get()), (1, 2));
        assert_eq!(registry.register_item(item("fill")), a);
        assert_eq!(registry.version(), (2, 0));
        assert_eq!(registry.item(b).unwrap().name, "glyph");
        assert!(registry.item(ShaderId(0)).is_none());
    }

    #[test]
    fn blend_variants_are_looked_up_by_kind() {
        let mut registry = ShaderRegistry::new();
        let id = registry.register_blend(BlendShader {
            name: "src-over".to_owned(),
            variants: vec![BlendVariant {
                kind: BlendShaderType::SingleSource,
                source: String::new(),
                state: BlendState::add(BlendFactor::One, BlendFactor::OneMinusSrcAlpha),
            }],
        });
        let shader = registry.blend(id).unwrap();
        assert!(shader.variant(BlendShaderType::SingleSource).is_some());
        assert!(shader.variant(BlendShaderType::DualSource).is_none());
        assert_eq!(registry.blend_id("src-over"), Some(id));
    }
}
