//! [`Device`] implementation on top of [`glow`].
//!
//! Every call assumes the context passed to [`GlowDevice::new`] is current
//! on the calling thread. Buffer uploads go through `GL_COPY_WRITE_BUFFER`
//! so that they never disturb the element binding of a bound vertex array.

use std::cell::Cell;
use std::sync::Arc;

use glow::{HasContext, PixelUnpackData};

use super::{
    AttribType, BlendEquation, BlendFactor, BlendState, BufferTarget, BufferUsage, Device,
    DrawRange, EntryPoints, Filter, ProgramSource, TexelFormat, TextureDesc, TextureKind,
    TextureRegion, VertexAttrib, Viewport,
};
use crate::caps::{ContextInfo, GlVersion, Limits};
use crate::error::{Error, Result, ShaderStage};

/// Convert a `u32` to `i32` for GL API calls.
fn gl_size(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Device(format!("dimension {value} exceeds the GL integer range")))
}

/// Convert a byte offset or length to `i32` for GL API calls.
fn gl_bytes(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Device(format!("byte range {value} exceeds the GL integer range")))
}

/// A [`TextureRegion`] as GL integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GlRegion {
    level: i32,
    x: i32,
    y: i32,
    layer: i32,
    width: i32,
    height: i32,
    layers: i32,
}

impl GlRegion {
    fn new(region: &TextureRegion) -> Result<Self> {
        // The far corner must be addressable too.
        gl_size(region.x.saturating_add(region.width))?;
        gl_size(region.y.saturating_add(region.height))?;
        gl_size(region.layer.saturating_add(region.layers))?;
        Ok(Self {
            level: gl_size(region.level)?,
            x: gl_size(region.x)?,
            y: gl_size(region.y)?,
            layer: gl_size(region.layer)?,
            width: gl_size(region.width)?,
            height: gl_size(region.height)?,
            layers: gl_size(region.layers)?,
        })
    }
}

/// Log a failure from a call that has no error channel of its own.
fn report(what: &'static str, result: Result<()>) {
    if let Err(err) = result {
        tracing::error!(what, %err, "GL call skipped");
    }
}

/// GL enum values are small; the cast to the `i32` parameters some entry
/// points take is lossless.
#[expect(clippy::cast_possible_wrap)]
const fn gl_enum(value: u32) -> i32 {
    value as i32
}

/// `(internal format, pixel format, pixel type)` for a texel format.
fn format_triple(format: TexelFormat) -> (u32, u32, u32) {
    match format {
        TexelFormat::R8Ui => (glow::R8UI, glow::RED_INTEGER, glow::UNSIGNED_BYTE),
        TexelFormat::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        TexelFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TexelFormat::Rgba8Ui => (glow::RGBA8UI, glow::RGBA_INTEGER, glow::UNSIGNED_BYTE),
        TexelFormat::R32Ui => (glow::R32UI, glow::RED_INTEGER, glow::UNSIGNED_INT),
        TexelFormat::Rg32Ui => (glow::RG32UI, glow::RG_INTEGER, glow::UNSIGNED_INT),
        TexelFormat::Rgb32Ui => (glow::RGB32UI, glow::RGB_INTEGER, glow::UNSIGNED_INT),
        TexelFormat::Rgba32Ui => (glow::RGBA32UI, glow::RGBA_INTEGER, glow::UNSIGNED_INT),
    }
}

fn texture_target(kind: TextureKind) -> u32 {
    match kind {
        TextureKind::Plain2D => glow::TEXTURE_2D,
        TextureKind::Array2D => glow::TEXTURE_2D_ARRAY,
        TextureKind::Buffer => glow::TEXTURE_BUFFER,
    }
}

fn buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
        BufferTarget::Uniform => glow::UNIFORM_BUFFER,
        BufferTarget::ShaderStorage => glow::SHADER_STORAGE_BUFFER,
        BufferTarget::Texture => glow::TEXTURE_BUFFER,
    }
}

fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::Src1Color => glow::SRC1_COLOR,
        BlendFactor::OneMinusSrc1Color => glow::ONE_MINUS_SRC1_COLOR,
        BlendFactor::Src1Alpha => glow::SRC1_ALPHA,
        BlendFactor::OneMinusSrc1Alpha => glow::ONE_MINUS_SRC1_ALPHA,
    }
}

fn blend_equation(equation: BlendEquation) -> u32 {
    match equation {
        BlendEquation::Add => glow::FUNC_ADD,
        BlendEquation::Subtract => glow::FUNC_SUBTRACT,
        BlendEquation::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
        BlendEquation::Min => glow::MIN,
        BlendEquation::Max => glow::MAX,
    }
}

fn filter_enum(filter: Filter) -> u32 {
    match filter {
        Filter::Nearest => glow::NEAREST,
        Filter::Linear => glow::LINEAR,
    }
}

/// A [`Device`] driving a shared [`glow::Context`].
///
/// ```no_run
/// # use std::sync::Arc;
/// # fn example(gl: Arc<glow::Context>) -> glpaint::Result<()> {
/// use glpaint::caps::CapabilitySnapshot;
/// use glpaint::device::gl::GlowDevice;
///
/// let device = unsafe { GlowDevice::new(gl) };
/// let caps = CapabilitySnapshot::query(&device)?;
/// println!("{} on {}", caps.version(), caps.renderer());
/// # Ok(())
/// # }
/// ```
pub struct GlowDevice {
    gl: Arc<glow::Context>,
    draw_framebuffer: Cell<Option<glow::Framebuffer>>,
    clip_distances: Cell<u32>,
}

impl GlowDevice {
    /// Wrap a context.
    ///
    /// # Safety
    ///
    /// The context must be current on the calling thread for the whole
    /// lifetime of the device and of every resource created through it.
    pub unsafe fn new(gl: Arc<glow::Context>) -> Self {
        Self {
            gl,
            draw_framebuffer: Cell::new(None),
            clip_distances: Cell::new(0),
        }
    }

    /// The wrapped context.
    #[must_use]
    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    /// Turn a pending `GL_OUT_OF_MEMORY` into [`Error::ResourceExhausted`].
    fn check_out_of_memory(&self, what: &'static str, bytes: usize) -> Result<()> {
        let error = unsafe { self.gl.get_error() };
        if error == glow::OUT_OF_MEMORY {
            tracing::error!(what, bytes, "GPU allocation failed");
            return Err(Error::ResourceExhausted { what, bytes });
        }
        Ok(())
    }

    fn limit(&self, available: bool, parameter: u32) -> u32 {
        if !available {
            return 0;
        }
        let value = unsafe { self.gl.get_parameter_i32(parameter) };
        u32::try_from(value).unwrap_or(0)
    }

    /// Define every mip level of `texture` as zeros and set its sampling
    /// state.
    unsafe fn allocate_levels(&self, texture: glow::Texture, desc: &TextureDesc) -> Result<()> {
        let gl = &self.gl;
        let target = texture_target(desc.kind);
        let (internal, format, ty) = format_triple(desc.format);
        let layers = gl_size(desc.layers)?;
        let max_level = gl_size(desc.levels.saturating_sub(1))?;
        unsafe {
            gl.bind_texture(target, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            for level in 0..desc.levels {
                let (w, h) = desc.level_extent(level);
                let (gl_level, w, h) = (gl_size(level)?, gl_size(w)?, gl_size(h)?);
                let zeros = vec![0u8; desc.level_bytes(level)];
                match desc.kind {
                    TextureKind::Array2D => gl.tex_image_3d(
                        target,
                        gl_level,
                        gl_enum(internal),
                        w,
                        h,
                        layers,
                        0,
                        format,
                        ty,
                        PixelUnpackData::Slice(Some(&zeros)),
                    ),
                    _ => gl.tex_image_2d(
                        target,
                        gl_level,
                        gl_enum(internal),
                        w,
                        h,
                        0,
                        format,
                        ty,
                        PixelUnpackData::Slice(Some(&zeros)),
                    ),
                }
            }
            let mag = filter_enum(desc.filter);
            let min = match (desc.filter, desc.levels > 1) {
                (Filter::Linear, true) => glow::LINEAR_MIPMAP_LINEAR,
                (Filter::Nearest, true) => glow::NEAREST_MIPMAP_NEAREST,
                (filter, false) => filter_enum(filter),
            };
            gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, gl_enum(min));
            gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, gl_enum(mag));
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, gl_enum(glow::CLAMP_TO_EDGE));
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, gl_enum(glow::CLAMP_TO_EDGE));
            gl.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, max_level);
            gl.bind_texture(target, None);
        }
        Ok(())
    }

    /// Attach one layer (or the whole 2D texture) of `texture` to the bound
    /// framebuffer under `target`.
    unsafe fn attach(&self, target: u32, kind: TextureKind, texture: glow::Texture, level: i32, layer: i32) {
        let gl = &self.gl;
        unsafe {
            match kind {
                TextureKind::Array2D => gl.framebuffer_texture_layer(
                    target,
                    glow::COLOR_ATTACHMENT0,
                    Some(texture),
                    level,
                    layer,
                ),
                _ => gl.framebuffer_texture_2d(
                    target,
                    glow::COLOR_ATTACHMENT0,
                    glow::TEXTURE_2D,
                    Some(texture),
                    level,
                ),
            }
        }
    }

    /// Copy `region` layer by layer with framebuffer blits, for contexts
    /// without `glCopyImageSubData`.
    unsafe fn copy_texture_by_blit(
        &self,
        src: glow::Texture,
        dst: glow::Texture,
        desc: &TextureDesc,
        region: GlRegion,
    ) {
        let gl = &self.gl;
        let Ok(read) = (unsafe { gl.create_framebuffer() }) else {
            tracing::error!("framebuffer creation failed during texture copy");
            return;
        };
        let Ok(draw) = (unsafe { gl.create_framebuffer() }) else {
            unsafe { gl.delete_framebuffer(read) };
            tracing::error!("framebuffer creation failed during texture copy");
            return;
        };
        let (x0, y0) = (region.x, region.y);
        let (x1, y1) = (region.x + region.width, region.y + region.height);
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(read));
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(draw));
            for layer in region.layer..region.layer + region.layers {
                self.attach(glow::READ_FRAMEBUFFER, desc.kind, src, region.level, layer);
                self.attach(glow::DRAW_FRAMEBUFFER, desc.kind, dst, region.level, layer);
                gl.blit_framebuffer(
                    x0,
                    y0,
                    x1,
                    y1,
                    x0,
                    y0,
                    x1,
                    y1,
                    glow::COLOR_BUFFER_BIT,
                    glow::NEAREST,
                );
            }
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, self.draw_framebuffer.get());
            gl.delete_framebuffer(read);
            gl.delete_framebuffer(draw);
        }
    }
}

impl Device for GlowDevice {
    type Buffer = glow::Buffer;
    type Texture = glow::Texture;
    type Program = glow::Program;
    type VertexArray = glow::VertexArray;
    type Framebuffer = glow::Framebuffer;

    fn context_info(&self) -> ContextInfo {
        let gl = &self.gl;
        let raw = gl.version();
        let version = GlVersion {
            major: raw.major,
            minor: raw.minor,
            es: raw.is_embedded,
        };
        let (vendor, renderer) = unsafe {
            (
                gl.get_parameter_string(glow::VENDOR),
                gl.get_parameter_string(glow::RENDERER),
            )
        };
        let mut info = ContextInfo::new(version).with_vendor(&vendor, &renderer);
        info.extensions = gl.supported_extensions().iter().cloned().collect();

        let has_ext = |name: &str| info.extensions.contains(name);
        let tbo = if version.es {
            version.at_least(3, 2) || has_ext("GL_EXT_texture_buffer") || has_ext("GL_OES_texture_buffer")
        } else {
            true
        };
        let ssbo = if version.es {
            version.at_least(3, 1)
        } else {
            version.at_least(4, 3) || has_ext("GL_ARB_shader_storage_buffer_object")
        };
        let clip = !version.es || has_ext("GL_EXT_clip_cull_distance") || has_ext("GL_APPLE_clip_distance");

        info.limits = Limits {
            max_texture_size: self.limit(true, glow::MAX_TEXTURE_SIZE),
            max_array_texture_layers: self.limit(true, glow::MAX_ARRAY_TEXTURE_LAYERS),
            max_texture_buffer_size: self.limit(tbo, glow::MAX_TEXTURE_BUFFER_SIZE),
            max_uniform_block_size: self.limit(true, glow::MAX_UNIFORM_BLOCK_SIZE),
            max_shader_storage_block_size: self.limit(ssbo, glow::MAX_SHADER_STORAGE_BLOCK_SIZE),
            max_fragment_shader_storage_blocks: self
                .limit(ssbo, glow::MAX_FRAGMENT_SHADER_STORAGE_BLOCKS),
            max_clip_distances: self.limit(clip, glow::MAX_CLIP_DISTANCES),
        };
        // Limits queried for features the driver lacks may raise INVALID_ENUM.
        for _ in 0..8 {
            if unsafe { gl.get_error() } == glow::NO_ERROR {
                break;
            }
        }
        info
    }

    fn entry_points(&self) -> EntryPoints {
        EntryPoints::COPY_IMAGE
    }

    fn create_buffer(
        &self,
        _target: BufferTarget,
        size: usize,
        usage: BufferUsage,
    ) -> Result<Self::Buffer> {
        let gl = &self.gl;
        let usage = match usage {
            BufferUsage::Static => glow::STATIC_DRAW,
            BufferUsage::Stream => glow::STREAM_DRAW,
        };
        gl_bytes(size)?;
        let buffer = unsafe { gl.create_buffer() }?;
        unsafe {
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::COPY_WRITE_BUFFER, &vec![0; size], usage);
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
        if let Err(err) = self.check_out_of_memory("buffer", size) {
            unsafe { gl.delete_buffer(buffer) };
            return Err(err);
        }
        Ok(buffer)
    }

    fn delete_buffer(&self, buffer: Self::Buffer) {
        unsafe { self.gl.delete_buffer(buffer) };
    }

    fn buffer_sub_data(&self, buffer: Self::Buffer, _target: BufferTarget, offset: usize, data: &[u8]) {
        let gl = &self.gl;
        let write = || -> Result<()> {
            let offset = gl_bytes(offset)?;
            unsafe {
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
                gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset, data);
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            }
            Ok(())
        };
        report("buffer upload", write());
    }

    fn copy_buffer(
        &self,
        src: Self::Buffer,
        dst: Self::Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) {
        let gl = &self.gl;
        let copy = || -> Result<()> {
            let (src_offset, dst_offset, size) = (gl_bytes(src_offset)?, gl_bytes(dst_offset)?, gl_bytes(size)?);
            unsafe {
                gl.bind_buffer(glow::COPY_READ_BUFFER, Some(src));
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(dst));
                gl.copy_buffer_sub_data(
                    glow::COPY_READ_BUFFER,
                    glow::COPY_WRITE_BUFFER,
                    src_offset,
                    dst_offset,
                    size,
                );
                gl.bind_buffer(glow::COPY_READ_BUFFER, None);
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            }
            Ok(())
        };
        report("buffer copy", copy());
    }

    fn write_mapped(&self, buffer: Self::Buffer, _target: BufferTarget, offset: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let gl = &self.gl;
        let write = || -> Result<()> {
            let (gl_offset, len) = (gl_bytes(offset)?, gl_bytes(data.len())?);
            unsafe {
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
                let ptr = gl.map_buffer_range(
                    glow::COPY_WRITE_BUFFER,
                    gl_offset,
                    len,
                    glow::MAP_WRITE_BIT | glow::MAP_FLUSH_EXPLICIT_BIT | glow::MAP_INVALIDATE_RANGE_BIT,
                );
                if ptr.is_null() {
                    tracing::error!(offset, len = data.len(), "glMapBufferRange returned null; falling back to glBufferSubData");
                    gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, gl_offset, data);
                } else {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
                    gl.flush_mapped_buffer_range(glow::COPY_WRITE_BUFFER, 0, len);
                    gl.unmap_buffer(glow::COPY_WRITE_BUFFER);
                }
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            }
            Ok(())
        };
        report("mapped buffer write", write());
    }

    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<Self::Buffer>) {
        unsafe { self.gl.bind_buffer_base(buffer_target(target), index, buffer) };
    }

    fn bind_buffer_range(
        &self,
        target: BufferTarget,
        index: u32,
        buffer: Self::Buffer,
        offset: usize,
        size: usize,
    ) {
        let bind = || -> Result<()> {
            let (offset, size) = (gl_bytes(offset)?, gl_bytes(size)?);
            unsafe {
                self.gl
                    .bind_buffer_range(buffer_target(target), index, Some(buffer), offset, size);
            }
            Ok(())
        };
        report("buffer range binding", bind());
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture> {
        let gl = &self.gl;
        let texture = unsafe { gl.create_texture() }?;
        let allocated = unsafe { self.allocate_levels(texture, desc) }
            .and_then(|()| self.check_out_of_memory("texture", desc.total_bytes()));
        if let Err(err) = allocated {
            unsafe { gl.delete_texture(texture) };
            return Err(err);
        }
        Ok(texture)
    }

    fn delete_texture(&self, texture: Self::Texture) {
        unsafe { self.gl.delete_texture(texture) };
    }

    fn texture_sub_image(
        &self,
        texture: Self::Texture,
        desc: &TextureDesc,
        region: &TextureRegion,
        data: &[u8],
    ) {
        let gl = &self.gl;
        let target = texture_target(desc.kind);
        let (_, format, ty) = format_triple(desc.format);
        let upload = |r: GlRegion| unsafe {
            gl.bind_texture(target, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            match desc.kind {
                TextureKind::Array2D => gl.tex_sub_image_3d(
                    target,
                    r.level,
                    r.x,
                    r.y,
                    r.layer,
                    r.width,
                    r.height,
                    r.layers,
                    format,
                    ty,
                    PixelUnpackData::Slice(Some(data)),
                ),
                _ => gl.tex_sub_image_2d(
                    target,
                    r.level,
                    r.x,
                    r.y,
                    r.width,
                    r.height,
                    format,
                    ty,
                    PixelUnpackData::Slice(Some(data)),
                ),
            }
            gl.bind_texture(target, None);
        };
        report("texture upload", GlRegion::new(region).map(upload));
    }

    fn copy_texture(
        &self,
        src: Self::Texture,
        dst: Self::Texture,
        desc: &TextureDesc,
        region: &TextureRegion,
    ) {
        let gl = &self.gl;
        let copy_image = {
            let v = gl.version();
            if v.is_embedded {
                (v.major, v.minor) >= (3, 2)
            } else {
                (v.major, v.minor) >= (4, 3)
            }
        };
        let region = match GlRegion::new(region) {
            Ok(region) => region,
            Err(err) => return report("texture copy", Err(err)),
        };
        if !copy_image {
            unsafe { self.copy_texture_by_blit(src, dst, desc, region) };
            return;
        }
        let target = texture_target(desc.kind);
        unsafe {
            gl.copy_image_sub_data(
                src,
                target,
                region.level,
                region.x,
                region.y,
                region.layer,
                dst,
                target,
                region.level,
                region.x,
                region.y,
                region.layer,
                region.width,
                region.height,
                region.layers,
            );
        }
    }

    fn generate_mipmaps(&self, texture: Self::Texture, desc: &TextureDesc) {
        let gl = &self.gl;
        let target = texture_target(desc.kind);
        unsafe {
            gl.bind_texture(target, Some(texture));
            gl.generate_mipmap(target);
            gl.bind_texture(target, None);
        }
    }

    fn bind_texture(&self, unit: u32, kind: TextureKind, texture: Option<Self::Texture>) {
        let gl = &self.gl;
        unsafe {
            gl.active_texture(glow::TEXTURE0 + unit);
            gl.bind_texture(texture_target(kind), texture);
        }
    }

    fn create_program(&self, source: &ProgramSource) -> Result<Self::Program> {
        unsafe { compile_program(&self.gl, source) }
    }

    fn delete_program(&self, program: Self::Program) {
        unsafe { self.gl.delete_program(program) };
    }

    fn use_program(&self, program: Option<Self::Program>) {
        unsafe { self.gl.use_program(program) };
    }

    fn set_sampler_unit(&self, program: Self::Program, name: &str, unit: u32) {
        let gl = &self.gl;
        let unit = match gl_size(unit) {
            Ok(unit) => unit,
            Err(err) => return report("sampler unit", Err(err)),
        };
        unsafe {
            let Some(location) = gl.get_uniform_location(program, name) else {
                tracing::debug!(name, "sampler not active in program");
                return;
            };
            gl.use_program(Some(program));
            gl.uniform_1_i32(Some(&location), unit);
        }
    }

    fn set_uniform_block_binding(&self, program: Self::Program, name: &str, binding: u32) {
        let gl = &self.gl;
        unsafe {
            match gl.get_uniform_block_index(program, name) {
                Some(index) => gl.uniform_block_binding(program, index, binding),
                None => tracing::debug!(name, "uniform block not active in program"),
            }
        }
    }

    fn create_vertex_array(
        &self,
        attributes: &[VertexAttrib],
        buffers: &[Self::Buffer],
        index_buffer: Self::Buffer,
    ) -> Result<Self::VertexArray> {
        let gl = &self.gl;
        let layout = attributes
            .iter()
            .map(|a| Ok((a, gl_size(a.components)?, gl_size(a.stride)?, gl_size(a.offset)?)))
            .collect::<Result<Vec<_>>>()?;
        unsafe {
            let vao = gl.create_vertex_array()?;
            gl.bind_vertex_array(Some(vao));
            for (attrib, components, stride, offset) in layout {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffers[attrib.buffer]));
                gl.enable_vertex_attrib_array(attrib.location);
                match attrib.ty {
                    AttribType::U32 => gl.vertex_attrib_pointer_i32(
                        attrib.location,
                        components,
                        glow::UNSIGNED_INT,
                        stride,
                        offset,
                    ),
                    AttribType::F32 => gl.vertex_attrib_pointer_f32(
                        attrib.location,
                        components,
                        glow::FLOAT,
                        false,
                        stride,
                        offset,
                    ),
                }
            }
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(index_buffer));
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            Ok(vao)
        }
    }

    fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        unsafe { self.gl.delete_vertex_array(vertex_array) };
    }

    fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>) {
        unsafe { self.gl.bind_vertex_array(vertex_array) };
    }

    fn set_blend_state(&self, state: &BlendState) {
        let gl = &self.gl;
        unsafe {
            if !state.enabled {
                gl.disable(glow::BLEND);
                return;
            }
            gl.enable(glow::BLEND);
            gl.blend_equation_separate(
                blend_equation(state.equation_rgb),
                blend_equation(state.equation_alpha),
            );
            gl.blend_func_separate(
                blend_factor(state.src_rgb),
                blend_factor(state.dst_rgb),
                blend_factor(state.src_alpha),
                blend_factor(state.dst_alpha),
            );
        }
    }

    fn set_color_write(&self, enabled: bool) {
        unsafe { self.gl.color_mask(enabled, enabled, enabled, enabled) };
    }

    fn set_clip_distances(&self, count: u32) {
        let gl = &self.gl;
        let previous = self.clip_distances.replace(count);
        unsafe {
            for i in count..previous {
                gl.disable(glow::CLIP_DISTANCE0 + i);
            }
            for i in previous..count {
                gl.enable(glow::CLIP_DISTANCE0 + i);
            }
        }
    }

    fn draw_elements(&self, range: DrawRange) {
        let draw = || -> Result<()> {
            let count = i32::try_from(range.count).unwrap_or(i32::MAX);
            let offset = gl_bytes(range.byte_offset)?;
            unsafe { self.gl.draw_elements(glow::TRIANGLES, count, glow::UNSIGNED_INT, offset) };
            Ok(())
        };
        report("draw", draw());
    }

    fn create_framebuffer(&self, color: Self::Texture) -> Result<Self::Framebuffer> {
        let gl = &self.gl;
        unsafe {
            let framebuffer = gl.create_framebuffer()?;
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::DRAW_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(color),
                0,
            );
            let status = gl.check_framebuffer_status(glow::DRAW_FRAMEBUFFER);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, self.draw_framebuffer.get());
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                return Err(Error::Device(format!(
                    "framebuffer incomplete (status {status:#x})"
                )));
            }
            Ok(framebuffer)
        }
    }

    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer) {
        if self.draw_framebuffer.get() == Some(framebuffer) {
            self.draw_framebuffer.set(None);
        }
        unsafe { self.gl.delete_framebuffer(framebuffer) };
    }

    fn bind_draw_framebuffer(&self, framebuffer: Option<Self::Framebuffer>) {
        self.draw_framebuffer.set(framebuffer);
        unsafe { self.gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, framebuffer) };
    }

    fn set_viewport(&self, viewport: Viewport) {
        unsafe {
            self.gl
                .viewport(viewport.x, viewport.y, viewport.width, viewport.height);
        }
    }

    fn clear_color(&self, color: [f32; 4]) {
        let gl = &self.gl;
        let [r, g, b, a] = color;
        unsafe {
            gl.clear_color(r, g, b, a);
            gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn blit_framebuffer(
        &self,
        src: Option<Self::Framebuffer>,
        dst: Option<Self::Framebuffer>,
        src_rect: Viewport,
        dst_rect: Viewport,
        filter: Filter,
    ) {
        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, src);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, dst);
            gl.blit_framebuffer(
                src_rect.x,
                src_rect.y,
                src_rect.x + src_rect.width,
                src_rect.y + src_rect.height,
                dst_rect.x,
                dst_rect.y,
                dst_rect.x + dst_rect.width,
                dst_rect.y + dst_rect.height,
                glow::COLOR_BUFFER_BIT,
                filter_enum(filter),
            );
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, self.draw_framebuffer.get());
        }
    }
}

/// Compile and link a program, binding attribute locations before linking.
///
/// The shader objects are detached and deleted after a successful link, so
/// only the program handle needs to be cleaned up by the caller.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_program(gl: &glow::Context, source: &ProgramSource) -> Result<glow::Program> {
    let program = unsafe { gl.create_program() }?;

    let vs = match unsafe { compile_shader(gl, ShaderStage::Vertex, &source.vertex) } {
        Ok(vs) => vs,
        Err(err) => {
            unsafe { gl.delete_program(program) };
            return Err(err);
        }
    };
    let fs = match unsafe { compile_shader(gl, ShaderStage::Fragment, &source.fragment) } {
        Ok(fs) => fs,
        Err(err) => {
            unsafe {
                gl.delete_shader(vs);
                gl.delete_program(program);
            }
            return Err(err);
        }
    };

    unsafe {
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        for (location, name) in &source.attributes {
            gl.bind_attrib_location(program, *location, name);
        }
        gl.link_program(program);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            tracing::error!(
                %log,
                vertex = %source.vertex,
                fragment = %source.fragment,
                "program link failed"
            );
            return Err(Error::ProgramLink { log });
        }

        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
    }

    Ok(program)
}

/// Compile a single shader stage.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_shader(gl: &glow::Context, stage: ShaderStage, source: &str) -> Result<glow::Shader> {
    let shader_type = match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
    };
    unsafe {
        let shader = gl.create_shader(shader_type)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            tracing::error!(%stage, %log, %source, "shader compilation failed");
            return Err(Error::ShaderCompile { stage, log });
        }

        Ok(shader)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversions_fail_past_the_gl_range() {
        assert_eq!(gl_size(4096).unwrap(), 4096);
        let max = u32::try_from(i32::MAX).unwrap();
        assert_eq!(gl_size(max).unwrap(), i32::MAX);
        assert!(matches!(gl_size(1 << 31), Err(Error::Device(_))));
        assert_eq!(gl_bytes(256).unwrap(), 256);
        assert!(matches!(gl_bytes(usize::MAX), Err(Error::Device(_))));
    }

    #[test]
    fn regions_must_end_inside_the_gl_range() {
        let region = TextureRegion {
            level: 1,
            x: 8,
            y: 16,
            layer: 2,
            width: 4,
            height: 2,
            layers: 1,
        };
        let converted = GlRegion::new(&region).unwrap();
        assert_eq!((converted.level, converted.x, converted.y), (1, 8, 16));
        assert_eq!((converted.layer, converted.width, converted.height, converted.layers), (2, 4, 2, 1));

        let far = TextureRegion {
            x: u32::try_from(i32::MAX).unwrap() - 1,
            ..region
        };
        assert!(GlRegion::new(&far).is_err());
    }
}
