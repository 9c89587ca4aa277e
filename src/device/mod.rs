//! The seam between the backend and the GL driver.
//!
//! Everything above this module talks to a [`Device`]; handles are the
//! device's associated types and never escape as raw integers. The glow
//! implementation lives in [`gl`](self::gl) (feature `glow`), and a
//! host-memory implementation for tests lives in `mock`.

use bitflags::bitflags;

use crate::caps::ContextInfo;
use crate::error::Result;

#[cfg(feature = "glow")]
pub mod gl;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

bitflags! {
    /// Optional driver entry points the device implementation can call.
    ///
    /// A feature advertised by the context but missing here is treated as
    /// unsupported by [`CapabilitySnapshot`](crate::caps::CapabilitySnapshot).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryPoints: u32 {
        /// `glTexBuffer`.
        const TEXTURE_BUFFER = 1 << 0;
        /// `glTextureView`.
        const TEXTURE_VIEW = 1 << 1;
        /// `glGetTextureHandleARB` and the residency calls.
        const BINDLESS_TEXTURE = 1 << 2;
        /// `glCopyImageSubData`.
        const COPY_IMAGE = 1 << 3;
        /// `glMultiDrawElements`.
        const MULTI_DRAW = 1 << 4;
    }
}

/// Buffer binding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Vertex attributes.
    Array,
    /// Indices.
    ElementArray,
    /// Uniform block storage.
    Uniform,
    /// Shader storage block.
    ShaderStorage,
    /// Storage behind a buffer texture.
    Texture,
}

/// Usage hint for buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Written once, read many times (atlas storage).
    Static,
    /// Rewritten every few frames (per-frame streams).
    Stream,
}

/// Texel formats used by the atlases, surfaces and buffer textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// One unsigned 8-bit integer channel.
    R8Ui,
    /// One normalized 8-bit channel.
    R8,
    /// Four normalized 8-bit channels.
    Rgba8,
    /// Four unsigned 8-bit integer channels.
    Rgba8Ui,
    /// One 32-bit unsigned integer channel.
    R32Ui,
    /// Two 32-bit unsigned integer channels.
    Rg32Ui,
    /// Three 32-bit unsigned integer channels.
    Rgb32Ui,
    /// Four 32-bit unsigned integer channels.
    Rgba32Ui,
}

impl TexelFormat {
    /// Size of one texel in bytes.
    #[must_use]
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TexelFormat::R8Ui | TexelFormat::R8 => 1,
            TexelFormat::Rgba8 | TexelFormat::Rgba8Ui | TexelFormat::R32Ui => 4,
            TexelFormat::Rg32Ui => 8,
            TexelFormat::Rgb32Ui => 12,
            TexelFormat::Rgba32Ui => 16,
        }
    }

    /// Whether samplers read this format as unnormalized integers.
    #[must_use]
    pub fn is_integer(self) -> bool {
        !matches!(self, TexelFormat::R8 | TexelFormat::Rgba8)
    }

    /// The 32-bit unsigned format with `components` channels (1..=4).
    #[must_use]
    pub fn uint_with_components(components: u32) -> Self {
        debug_assert!((1..=4).contains(&components));
        match components {
            1 => TexelFormat::R32Ui,
            2 => TexelFormat::Rg32Ui,
            3 => TexelFormat::Rgb32Ui,
            _ => TexelFormat::Rgba32Ui,
        }
    }
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// `GL_TEXTURE_2D`; `layers` is always 1.
    Plain2D,
    /// `GL_TEXTURE_2D_ARRAY`.
    Array2D,
    /// `GL_TEXTURE_BUFFER`.
    Buffer,
}

/// Sampling filter for a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Nearest texel.
    Nearest,
    /// Bilinear (trilinear when mipmapped).
    Linear,
}

/// Description of a texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// Dimensionality.
    pub kind: TextureKind,
    /// Texel format.
    pub format: TexelFormat,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Number of array layers.
    pub layers: u32,
    /// Number of mip levels (at least 1).
    pub levels: u32,
    /// Sampling filter.
    pub filter: Filter,
}

impl TextureDesc {
    /// Bytes occupied by mip level `level`.
    #[must_use]
    pub fn level_bytes(&self, level: u32) -> usize {
        let (w, h) = self.level_extent(level);
        w as usize * h as usize * self.layers as usize * self.format.bytes_per_texel()
    }

    /// Width and height of mip level `level`.
    #[must_use]
    pub fn level_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    /// Bytes occupied by all mip levels.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        (0..self.levels).map(|l| self.level_bytes(l)).sum()
    }
}

/// A box inside a texture at one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    /// Mip level.
    pub level: u32,
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// First layer.
    pub layer: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Number of layers.
    pub layers: u32,
}

impl TextureRegion {
    /// Bytes needed to fill the region in `format`.
    #[must_use]
    pub fn byte_len(&self, format: TexelFormat) -> usize {
        self.width as usize * self.height as usize * self.layers as usize * format.bytes_per_texel()
    }
}

/// Blend factors, including the dual-source ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

/// Blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Fixed-function blend state for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Whether fixed-function blending is enabled at all.
    pub enabled: bool,
    /// Equation for RGB.
    pub equation_rgb: BlendEquation,
    /// Equation for alpha.
    pub equation_alpha: BlendEquation,
    /// Source factor for RGB.
    pub src_rgb: BlendFactor,
    /// Destination factor for RGB.
    pub dst_rgb: BlendFactor,
    /// Source factor for alpha.
    pub src_alpha: BlendFactor,
    /// Destination factor for alpha.
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    /// Blending off; the shader writes the final color.
    pub const DISABLED: Self = Self {
        enabled: false,
        equation_rgb: BlendEquation::Add,
        equation_alpha: BlendEquation::Add,
        src_rgb: BlendFactor::One,
        dst_rgb: BlendFactor::Zero,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
    };

    /// Additive blending with the same factors for color and alpha.
    #[must_use]
    pub const fn add(src: BlendFactor, dst: BlendFactor) -> Self {
        Self {
            enabled: true,
            equation_rgb: BlendEquation::Add,
            equation_alpha: BlendEquation::Add,
            src_rgb: src,
            dst_rgb: dst,
            src_alpha: src,
            dst_alpha: dst,
        }
    }
}

/// Component type of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttribType {
    /// `uvec*` attribute fed by `GL_UNSIGNED_INT`.
    U32,
    /// `vec*` attribute fed by `GL_FLOAT`.
    F32,
}

/// One vertex attribute of a vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttrib {
    /// Attribute location.
    pub location: u32,
    /// Index into the buffer slice passed to [`Device::create_vertex_array`].
    pub buffer: usize,
    /// Number of components (1..=4).
    pub components: u32,
    /// Component type.
    pub ty: AttribType,
    /// Byte stride between consecutive vertices.
    pub stride: u32,
    /// Byte offset of the first component.
    pub offset: u32,
}

/// One indexed draw: `count` `u32` indices starting at `byte_offset` in the
/// bound element buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    /// Number of indices.
    pub count: u32,
    /// Byte offset into the element buffer.
    pub byte_offset: usize,
}

/// A rectangle in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    /// Left edge.
    pub x: i32,
    /// Bottom edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

/// Vertex and fragment source of one program, plus attribute names to bind
/// to fixed locations before linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    /// Vertex shader text.
    pub vertex: String,
    /// Fragment shader text.
    pub fragment: String,
    /// `(location, name)` pairs bound with `glBindAttribLocation`.
    pub attributes: Vec<(u32, String)>,
    /// Whether the fragment shader writes a second (`SRC1`) output.
    pub dual_source_output: bool,
}

/// Abstraction over the GL entry points the backend uses.
///
/// Methods take `&self`; implementations that must record state use
/// interior mutability. The device is only ever driven from the single
/// rendering thread.
pub trait Device {
    /// Buffer object handle.
    type Buffer: Copy + Eq + std::fmt::Debug;
    /// Texture object handle.
    type Texture: Copy + Eq + std::fmt::Debug;
    /// Linked program handle.
    type Program: Copy + Eq + std::fmt::Debug;
    /// Vertex array object handle.
    type VertexArray: Copy + Eq + std::fmt::Debug;
    /// Framebuffer object handle.
    type Framebuffer: Copy + Eq + std::fmt::Debug;

    /// Version, extensions and limits of the context.
    fn context_info(&self) -> ContextInfo;

    /// Optional entry points this implementation can call.
    fn entry_points(&self) -> EntryPoints;

    /// Allocate a zero-filled buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) when the
    /// device is out of memory.
    fn create_buffer(
        &self,
        target: BufferTarget,
        size: usize,
        usage: BufferUsage,
    ) -> Result<Self::Buffer>;

    /// Release a buffer.
    fn delete_buffer(&self, buffer: Self::Buffer);

    /// Immediate sub-upload into a buffer.
    fn buffer_sub_data(&self, buffer: Self::Buffer, target: BufferTarget, offset: usize, data: &[u8]);

    /// GPU-side copy between buffers.
    fn copy_buffer(
        &self,
        src: Self::Buffer,
        dst: Self::Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    );

    /// Map `[offset, offset + data.len())` for writing with explicit flush,
    /// copy `data`, flush exactly that range and unmap.
    fn write_mapped(&self, buffer: Self::Buffer, target: BufferTarget, offset: usize, data: &[u8]);

    /// Bind a whole buffer to an indexed binding point.
    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<Self::Buffer>);

    /// Bind a byte range of a buffer to an indexed binding point.
    fn bind_buffer_range(
        &self,
        target: BufferTarget,
        index: u32,
        buffer: Self::Buffer,
        offset: usize,
        size: usize,
    );

    /// Allocate a zero-filled texture.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) when the
    /// device is out of memory.
    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture>;

    /// Release a texture (or a view / buffer texture).
    fn delete_texture(&self, texture: Self::Texture);

    /// Upload texels into a region of `texture`.
    fn texture_sub_image(
        &self,
        texture: Self::Texture,
        desc: &TextureDesc,
        region: &TextureRegion,
        data: &[u8],
    );

    /// GPU-side copy of `region` (same coordinates) from `src` into `dst`;
    /// both textures share `desc.kind` and `desc.format`.
    fn copy_texture(
        &self,
        src: Self::Texture,
        dst: Self::Texture,
        desc: &TextureDesc,
        region: &TextureRegion,
    );

    /// Regenerate mip levels 1.. from level 0.
    fn generate_mipmaps(&self, texture: Self::Texture, desc: &TextureDesc);

    /// Alias `texture`'s storage under another format of the same size class.
    ///
    /// Returns `None` when texture views are unsupported.
    fn create_texture_view(
        &self,
        texture: Self::Texture,
        desc: &TextureDesc,
        format: TexelFormat,
    ) -> Option<Self::Texture> {
        let _ = (texture, desc, format);
        None
    }

    /// Expose `buffer` as a `samplerBuffer`/`usamplerBuffer` texture.
    ///
    /// Returns `None` when texture buffers are unsupported.
    fn create_buffer_texture(
        &self,
        buffer: Self::Buffer,
        format: TexelFormat,
    ) -> Option<Self::Texture> {
        let _ = (buffer, format);
        None
    }

    /// 64-bit bindless handle of `texture`, or `None` when unsupported.
    fn texture_handle(&self, texture: Self::Texture) -> Option<u64> {
        let _ = texture;
        None
    }

    /// Make a bindless handle usable by shaders.
    fn make_handle_resident(&self, handle: u64) {
        let _ = handle;
    }

    /// Revoke a bindless handle's residency.
    fn make_handle_non_resident(&self, handle: u64) {
        let _ = handle;
    }

    /// Bind `texture` to texture unit `unit`.
    fn bind_texture(&self, unit: u32, kind: TextureKind, texture: Option<Self::Texture>);

    /// Compile and link a program.
    ///
    /// # Errors
    ///
    /// [`Error::ShaderCompile`](crate::Error::ShaderCompile) or
    /// [`Error::ProgramLink`](crate::Error::ProgramLink) with the driver log.
    fn create_program(&self, source: &ProgramSource) -> Result<Self::Program>;

    /// Release a program.
    fn delete_program(&self, program: Self::Program);

    /// Make `program` current.
    fn use_program(&self, program: Option<Self::Program>);

    /// Point the sampler uniform `name` at texture unit `unit`.
    fn set_sampler_unit(&self, program: Self::Program, name: &str, unit: u32);

    /// Bind the uniform block `name` to binding point `binding`.
    fn set_uniform_block_binding(&self, program: Self::Program, name: &str, binding: u32);

    /// Create a vertex array reading attributes from `buffers` and indices
    /// from `index_buffer`.
    ///
    /// # Errors
    ///
    /// [`Error::Device`](crate::Error::Device) if the driver refuses.
    fn create_vertex_array(
        &self,
        attributes: &[VertexAttrib],
        buffers: &[Self::Buffer],
        index_buffer: Self::Buffer,
    ) -> Result<Self::VertexArray>;

    /// Release a vertex array.
    fn delete_vertex_array(&self, vertex_array: Self::VertexArray);

    /// Bind a vertex array.
    fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>);

    /// Apply fixed-function blend state.
    fn set_blend_state(&self, state: &BlendState);

    /// Enable or disable color writes.
    fn set_color_write(&self, enabled: bool);

    /// Enable the first `count` hardware clip distances, disable the rest.
    fn set_clip_distances(&self, count: u32);

    /// Draw `range` as triangles from the bound vertex array.
    fn draw_elements(&self, range: DrawRange);

    /// Draw several ranges with the same state.
    ///
    /// The default loops over [`draw_elements`](Self::draw_elements);
    /// implementations with `glMultiDrawElements` issue one call.
    fn multi_draw_elements(&self, ranges: &[DrawRange]) {
        for range in ranges {
            self.draw_elements(*range);
        }
    }

    /// Create a framebuffer with `color` (a [`TextureKind::Plain2D`]
    /// texture) as its only color attachment.
    ///
    /// # Errors
    ///
    /// [`Error::Device`](crate::Error::Device) if the driver refuses.
    fn create_framebuffer(&self, color: Self::Texture) -> Result<Self::Framebuffer>;

    /// Release a framebuffer.
    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer);

    /// Bind the draw framebuffer; `None` is the default framebuffer.
    fn bind_draw_framebuffer(&self, framebuffer: Option<Self::Framebuffer>);

    /// Set the viewport.
    fn set_viewport(&self, viewport: Viewport);

    /// Clear the bound draw framebuffer's color.
    fn clear_color(&self, color: [f32; 4]);

    /// Blit a rectangle between framebuffers (`None` is the default one).
    fn blit_framebuffer(
        &self,
        src: Option<Self::Framebuffer>,
        dst: Option<Self::Framebuffer>,
        src_rect: Viewport,
        dst_rect: Viewport,
        filter: Filter,
    );
}
