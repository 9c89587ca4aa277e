//! Host-memory [`Device`] for tests and headless tooling.
//!
//! Buffers and textures live in `Vec<u8>`s, texture views and buffer
//! textures alias their source storage, and every draw is recorded with
//! the vertex bytes it would have fed to the rasterizer. State sits behind
//! a `parking_lot::Mutex` so the trait's `&self` methods can record.

use ahash::AHashMap;
use parking_lot::Mutex;

use super::{
    BlendState, BufferTarget, BufferUsage, Device, DrawRange, EntryPoints, Filter, ProgramSource,
    TexelFormat, TextureDesc, TextureKind, TextureRegion, VertexAttrib, Viewport,
};
use crate::caps::{ContextInfo, GlVersion};
use crate::error::{Error, Result};

macro_rules! mock_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u32);
    };
}

mock_id!(
    /// Mock buffer handle.
    MockBufferId
);
mock_id!(
    /// Mock texture handle.
    MockTextureId
);
mock_id!(
    /// Mock program handle.
    MockProgramId
);
mock_id!(
    /// Mock vertex array handle.
    MockVertexArrayId
);
mock_id!(
    /// Mock framebuffer handle.
    MockFramebufferId
);

/// One recorded draw range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDraw {
    /// Program current at draw time.
    pub program: Option<MockProgramId>,
    /// Whether that program was still alive when the draw was issued.
    pub program_live: bool,
    /// Blend state current at draw time.
    pub blend: BlendState,
    /// Color-write flag current at draw time.
    pub color_write: bool,
    /// Enabled clip distances.
    pub clip_distances: u32,
    /// Index values read from the element buffer.
    pub indices: Vec<u32>,
    /// Per index, the concatenated attribute bytes the vertex would fetch.
    pub vertices: Vec<Vec<u8>>,
}

enum TextureStorage {
    Owned(Vec<Vec<u8>>),
    View(MockTextureId),
    Buffer(MockBufferId),
}

struct MockTexture {
    desc: TextureDesc,
    storage: TextureStorage,
    handle: Option<u64>,
}

struct MockVertexArray {
    attributes: Vec<VertexAttrib>,
    buffers: Vec<MockBufferId>,
    index_buffer: MockBufferId,
}

#[derive(Default)]
struct Counters {
    buffer_creates: usize,
    buffer_deletes: usize,
    texture_creates: usize,
    texture_deletes: usize,
    buffer_uploads: usize,
    texture_uploads: usize,
    buffer_copies: usize,
    texture_copies: usize,
    mapped_writes: Vec<(MockBufferId, usize, usize)>,
    draw_calls: usize,
}

struct State {
    next_id: u32,
    next_handle: u64,
    buffers: AHashMap<MockBufferId, Vec<u8>>,
    textures: AHashMap<MockTextureId, MockTexture>,
    programs: AHashMap<MockProgramId, ProgramSource>,
    vertex_arrays: AHashMap<MockVertexArrayId, MockVertexArray>,
    framebuffers: AHashMap<MockFramebufferId, MockTextureId>,
    resident: Vec<u64>,
    bound_textures: AHashMap<u32, (MockTextureId, TextureKind)>,
    bound_vertex_array: Option<MockVertexArrayId>,
    bound_program: Option<MockProgramId>,
    bound_framebuffer: Option<MockFramebufferId>,
    blend: BlendState,
    color_write: bool,
    clip_distances: u32,
    viewport: Viewport,
    clear_color: Option<[f32; 4]>,
    sampler_units: Vec<(MockProgramId, String, u32)>,
    block_bindings: Vec<(MockProgramId, String, u32)>,
    indexed_bindings: AHashMap<(BufferTarget, u32), MockBufferId>,
    blits: usize,
    draws: Vec<MockDraw>,
    counters: Counters,
}

impl State {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Resolve views to the texture that owns the storage.
    fn storage_owner(&self, mut id: MockTextureId) -> MockTextureId {
        while let Some(MockTexture {
            storage: TextureStorage::View(src),
            ..
        }) = self.textures.get(&id)
        {
            id = *src;
        }
        id
    }

    fn level_mut(&mut self, id: MockTextureId, level: u32) -> Option<(&TextureDesc, &mut Vec<u8>)> {
        let owner = self.storage_owner(id);
        let texture = self.textures.get_mut(&owner)?;
        match &mut texture.storage {
            TextureStorage::Owned(levels) => levels
                .get_mut(level as usize)
                .map(|data| (&texture.desc, data)),
            _ => None,
        }
    }
}

/// Byte offset of texel `(x, y, layer)` in a level laid out layer-major.
fn texel_offset(width: u32, height: u32, bpp: usize, x: u32, y: u32, layer: u32) -> usize {
    ((layer as usize * height as usize + y as usize) * width as usize + x as usize) * bpp
}

/// A software [`Device`].
///
/// # Example
///
/// ```
/// # #[cfg(feature = "mock")]
/// # {
/// use glpaint::device::mock::MockDevice;
/// use glpaint::device::{BufferTarget, BufferUsage, Device};
///
/// let device = MockDevice::new();
/// let buffer = device.create_buffer(BufferTarget::Array, 16, BufferUsage::Static).unwrap();
/// device.buffer_sub_data(buffer, BufferTarget::Array, 4, &[1, 2, 3]);
/// assert_eq!(&device.buffer_contents(buffer)[..8], &[0, 0, 0, 0, 1, 2, 3, 0]);
/// # }
/// ```
pub struct MockDevice {
    info: ContextInfo,
    entry_points: EntryPoints,
    allocation_limit: Option<usize>,
    fail_link_marker: Option<String>,
    state: Mutex<State>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A GL 4.5 device exposing every entry point and generous limits.
    #[must_use]
    pub fn new() -> Self {
        let info = ContextInfo::new(GlVersion::gl(4, 5))
            .with_vendor("Mock Vendor", "Mock Renderer")
            .with_limits(|l| {
                l.max_texture_size = 16384;
                l.max_array_texture_layers = 2048;
                l.max_texture_buffer_size = 1 << 27;
                l.max_uniform_block_size = 65536;
                l.max_shader_storage_block_size = 1 << 27;
                l.max_fragment_shader_storage_blocks = 8;
                l.max_clip_distances = 8;
            });
        Self::with_info(info, EntryPoints::all())
    }

    /// A device reporting `info` and supporting `entry_points`.
    #[must_use]
    pub fn with_info(info: ContextInfo, entry_points: EntryPoints) -> Self {
        Self {
            info,
            entry_points,
            allocation_limit: None,
            fail_link_marker: None,
            state: Mutex::new(State {
                next_id: 0,
                next_handle: 0x1000,
                buffers: AHashMap::default(),
                textures: AHashMap::default(),
                programs: AHashMap::default(),
                vertex_arrays: AHashMap::default(),
                framebuffers: AHashMap::default(),
                resident: Vec::new(),
                bound_textures: AHashMap::default(),
                bound_vertex_array: None,
                bound_program: None,
                bound_framebuffer: None,
                blend: BlendState::DISABLED,
                color_write: true,
                clip_distances: 0,
                viewport: Viewport::default(),
                clear_color: None,
                sampler_units: Vec::new(),
                block_bindings: Vec::new(),
                indexed_bindings: AHashMap::default(),
                blits: 0,
                draws: Vec::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Fail any single allocation larger than `bytes`.
    #[must_use]
    pub fn with_allocation_limit(mut self, bytes: usize) -> Self {
        self.allocation_limit = Some(bytes);
        self
    }

    /// Fail linking of any program whose source contains `marker`.
    #[must_use]
    pub fn with_link_failure_on(mut self, marker: &str) -> Self {
        self.fail_link_marker = Some(marker.to_owned());
        self
    }

    /// Current bytes of a buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer was deleted.
    #[must_use]
    pub fn buffer_contents(&self, buffer: MockBufferId) -> Vec<u8> {
        self.state.lock().buffers[&buffer].clone()
    }

    /// Whether a buffer is still alive.
    #[must_use]
    pub fn buffer_exists(&self, buffer: MockBufferId) -> bool {
        self.state.lock().buffers.contains_key(&buffer)
    }

    /// Current bytes of one mip level of a texture (views resolve to their
    /// source; buffer textures return the buffer bytes).
    ///
    /// # Panics
    ///
    /// Panics if the texture was deleted.
    #[must_use]
    pub fn texture_contents(&self, texture: MockTextureId, level: u32) -> Vec<u8> {
        let state = self.state.lock();
        let owner = state.storage_owner(texture);
        match &state.textures[&owner].storage {
            TextureStorage::Owned(levels) => levels[level as usize].clone(),
            TextureStorage::Buffer(buffer) => state.buffers[buffer].clone(),
            TextureStorage::View(_) => unreachable!("views resolve to their owner"),
        }
    }

    /// Bytes of a single texel at level 0.
    #[must_use]
    pub fn texel(&self, texture: MockTextureId, x: u32, y: u32, layer: u32) -> Vec<u8> {
        let desc = self.texture_desc(texture);
        let bpp = desc.format.bytes_per_texel();
        let data = self.texture_contents(texture, 0);
        let at = texel_offset(desc.width, desc.height, bpp, x, y, layer);
        data[at..at + bpp].to_vec()
    }

    /// Description a texture was created with.
    ///
    /// # Panics
    ///
    /// Panics if the texture was deleted.
    #[must_use]
    pub fn texture_desc(&self, texture: MockTextureId) -> TextureDesc {
        self.state.lock().textures[&texture].desc
    }

    /// Whether a texture (or view) is still alive.
    #[must_use]
    pub fn texture_exists(&self, texture: MockTextureId) -> bool {
        self.state.lock().textures.contains_key(&texture)
    }

    /// Bindless handles currently resident.
    #[must_use]
    pub fn resident_handles(&self) -> Vec<u64> {
        self.state.lock().resident.clone()
    }

    /// All recorded draw ranges, in issue order.
    #[must_use]
    pub fn draws(&self) -> Vec<MockDraw> {
        self.state.lock().draws.clone()
    }

    /// Number of draw calls issued (a multi-draw counts once).
    #[must_use]
    pub fn draw_call_count(&self) -> usize {
        self.state.lock().counters.draw_calls
    }

    /// Forget recorded draws and draw-call counts.
    pub fn clear_draws(&self) {
        let mut state = self.state.lock();
        state.draws.clear();
        state.counters.draw_calls = 0;
    }

    /// `(buffers created, buffers deleted)`.
    #[must_use]
    pub fn buffer_lifetimes(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.counters.buffer_creates, state.counters.buffer_deletes)
    }

    /// `(textures created, textures deleted)`, views included.
    #[must_use]
    pub fn texture_lifetimes(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.counters.texture_creates, state.counters.texture_deletes)
    }

    /// Number of immediate buffer and texture uploads.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        let state = self.state.lock();
        state.counters.buffer_uploads + state.counters.texture_uploads
    }

    /// Number of GPU-side buffer and texture copies.
    #[must_use]
    pub fn copy_count(&self) -> usize {
        let state = self.state.lock();
        state.counters.buffer_copies + state.counters.texture_copies
    }

    /// `(buffer, offset, len)` of every mapped write.
    #[must_use]
    pub fn mapped_writes(&self) -> Vec<(MockBufferId, usize, usize)> {
        self.state.lock().counters.mapped_writes.clone()
    }

    /// Source of a linked program.
    ///
    /// # Panics
    ///
    /// Panics if the program was deleted.
    #[must_use]
    pub fn program_source(&self, program: MockProgramId) -> ProgramSource {
        self.state.lock().programs[&program].clone()
    }

    /// Number of live programs.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.state.lock().programs.len()
    }

    /// Texture bound to `unit`, if any.
    #[must_use]
    pub fn bound_texture(&self, unit: u32) -> Option<MockTextureId> {
        self.state.lock().bound_textures.get(&unit).map(|(texture, _)| *texture)
    }

    /// Target `unit` was last bound with, if anything is bound.
    #[must_use]
    pub fn bound_texture_kind(&self, unit: u32) -> Option<TextureKind> {
        self.state.lock().bound_textures.get(&unit).map(|(_, kind)| *kind)
    }

    /// Buffer bound at an indexed binding point, if any.
    #[must_use]
    pub fn indexed_binding(&self, target: BufferTarget, index: u32) -> Option<MockBufferId> {
        self.state.lock().indexed_bindings.get(&(target, index)).copied()
    }

    /// Current program.
    #[must_use]
    pub fn bound_program(&self) -> Option<MockProgramId> {
        self.state.lock().bound_program
    }

    /// Current vertex array.
    #[must_use]
    pub fn bound_vertex_array(&self) -> Option<MockVertexArrayId> {
        self.state.lock().bound_vertex_array
    }

    /// Current draw framebuffer.
    #[must_use]
    pub fn bound_framebuffer(&self) -> Option<MockFramebufferId> {
        self.state.lock().bound_framebuffer
    }

    /// Last viewport set.
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.state.lock().viewport
    }

    /// Last clear color, if a clear happened.
    #[must_use]
    pub fn last_clear_color(&self) -> Option<[f32; 4]> {
        self.state.lock().clear_color
    }

    /// Number of framebuffer blits.
    #[must_use]
    pub fn blit_count(&self) -> usize {
        self.state.lock().blits
    }

    /// Sampler-unit assignments made with `set_sampler_unit`.
    #[must_use]
    pub fn sampler_units(&self, program: MockProgramId) -> Vec<(String, u32)> {
        self.state
            .lock()
            .sampler_units
            .iter()
            .filter(|(p, _, _)| *p == program)
            .map(|(_, name, unit)| (name.clone(), *unit))
            .collect()
    }

    /// Uniform-block bindings made with `set_uniform_block_binding`.
    #[must_use]
    pub fn uniform_block_bindings(&self, program: MockProgramId) -> Vec<(String, u32)> {
        self.state
            .lock()
            .block_bindings
            .iter()
            .filter(|(p, _, _)| *p == program)
            .map(|(_, name, binding)| (name.clone(), *binding))
            .collect()
    }

    fn check_allocation(&self, what: &'static str, bytes: usize) -> Result<()> {
        match self.allocation_limit {
            Some(limit) if bytes > limit => Err(Error::ResourceExhausted { what, bytes }),
            _ => Ok(()),
        }
    }

    fn record_draw(state: &mut State, range: DrawRange) {
        let Some(vao) = state.bound_vertex_array.and_then(|v| state.vertex_arrays.get(&v)) else {
            return;
        };
        let index_bytes = &state.buffers[&vao.index_buffer];
        let first = range.byte_offset;
        let indices: Vec<u32> = index_bytes[first..first + range.count as usize * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let vertices = indices
            .iter()
            .map(|&index| {
                let mut bytes = Vec::new();
                for attrib in &vao.attributes {
                    let buffer = &state.buffers[&vao.buffers[attrib.buffer]];
                    let at = attrib.offset as usize + index as usize * attrib.stride as usize;
                    let len = attrib.components as usize * 4;
                    bytes.extend_from_slice(&buffer[at..at + len]);
                }
                bytes
            })
            .collect();
        let draw = MockDraw {
            program: state.bound_program,
            program_live: state
                .bound_program
                .is_some_and(|program| state.programs.contains_key(&program)),
            blend: state.blend,
            color_write: state.color_write,
            clip_distances: state.clip_distances,
            indices,
            vertices,
        };
        state.draws.push(draw);
    }
}

impl Device for MockDevice {
    type Buffer = MockBufferId;
    type Texture = MockTextureId;
    type Program = MockProgramId;
    type VertexArray = MockVertexArrayId;
    type Framebuffer = MockFramebufferId;

    fn context_info(&self) -> ContextInfo {
        self.info.clone()
    }

    fn entry_points(&self) -> EntryPoints {
        self.entry_points
    }

    fn create_buffer(
        &self,
        _target: BufferTarget,
        size: usize,
        _usage: BufferUsage,
    ) -> Result<Self::Buffer> {
        self.check_allocation("buffer", size)?;
        let mut state = self.state.lock();
        let id = MockBufferId(state.id());
        state.buffers.insert(id, vec![0; size]);
        state.counters.buffer_creates += 1;
        Ok(id)
    }

    fn delete_buffer(&self, buffer: Self::Buffer) {
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer).is_some() {
            state.counters.buffer_deletes += 1;
        }
    }

    fn buffer_sub_data(&self, buffer: Self::Buffer, _target: BufferTarget, offset: usize, data: &[u8]) {
        let mut state = self.state.lock();
        let storage = state.buffers.get_mut(&buffer).expect("write to a deleted buffer");
        storage[offset..offset + data.len()].copy_from_slice(data);
        state.counters.buffer_uploads += 1;
    }

    fn copy_buffer(
        &self,
        src: Self::Buffer,
        dst: Self::Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    ) {
        let mut state = self.state.lock();
        let bytes = state.buffers[&src][src_offset..src_offset + size].to_vec();
        let storage = state.buffers.get_mut(&dst).expect("copy into a deleted buffer");
        storage[dst_offset..dst_offset + size].copy_from_slice(&bytes);
        state.counters.buffer_copies += 1;
    }

    fn write_mapped(&self, buffer: Self::Buffer, _target: BufferTarget, offset: usize, data: &[u8]) {
        let mut state = self.state.lock();
        let storage = state.buffers.get_mut(&buffer).expect("map of a deleted buffer");
        storage[offset..offset + data.len()].copy_from_slice(data);
        state
            .counters
            .mapped_writes
            .push((buffer, offset, data.len()));
    }

    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<Self::Buffer>) {
        let mut state = self.state.lock();
        match buffer {
            Some(buffer) => {
                state.indexed_bindings.insert((target, index), buffer);
            }
            None => {
                state.indexed_bindings.remove(&(target, index));
            }
        }
    }

    fn bind_buffer_range(
        &self,
        target: BufferTarget,
        index: u32,
        buffer: Self::Buffer,
        _offset: usize,
        _size: usize,
    ) {
        self.bind_buffer_base(target, index, Some(buffer));
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture> {
        self.check_allocation("texture", desc.total_bytes())?;
        let levels = (0..desc.levels)
            .map(|level| vec![0; desc.level_bytes(level)])
            .collect();
        let mut state = self.state.lock();
        let id = MockTextureId(state.id());
        state.textures.insert(
            id,
            MockTexture {
                desc: *desc,
                storage: TextureStorage::Owned(levels),
                handle: None,
            },
        );
        state.counters.texture_creates += 1;
        Ok(id)
    }

    fn delete_texture(&self, texture: Self::Texture) {
        let mut state = self.state.lock();
        if state.textures.remove(&texture).is_some() {
            state.counters.texture_deletes += 1;
        }
    }

    fn texture_sub_image(
        &self,
        texture: Self::Texture,
        desc: &TextureDesc,
        region: &TextureRegion,
        data: &[u8],
    ) {
        debug_assert_eq!(data.len(), region.byte_len(desc.format));
        let mut state = self.state.lock();
        let (owner_desc, level) = state
            .level_mut(texture, region.level)
            .expect("upload to a deleted texture");
        let (lw, lh) = owner_desc.level_extent(region.level);
        let bpp = owner_desc.format.bytes_per_texel();
        let row = region.width as usize * bpp;
        let mut src = 0;
        for layer in region.layer..region.layer + region.layers {
            for y in region.y..region.y + region.height {
                let at = texel_offset(lw, lh, bpp, region.x, y, layer);
                level[at..at + row].copy_from_slice(&data[src..src + row]);
                src += row;
            }
        }
        state.counters.texture_uploads += 1;
    }

    fn copy_texture(
        &self,
        src: Self::Texture,
        dst: Self::Texture,
        desc: &TextureDesc,
        region: &TextureRegion,
    ) {
        let mut state = self.state.lock();
        let bpp = desc.format.bytes_per_texel();
        let row = region.width as usize * bpp;
        let src_owner = state.storage_owner(src);
        let (sw, sh, src_level) = {
            let texture = &state.textures[&src_owner];
            let TextureStorage::Owned(levels) = &texture.storage else {
                return;
            };
            let (w, h) = texture.desc.level_extent(region.level);
            (w, h, levels[region.level as usize].clone())
        };
        let (dst_desc, dst_level) = state
            .level_mut(dst, region.level)
            .expect("copy into a deleted texture");
        let (dw, dh) = dst_desc.level_extent(region.level);
        for layer in region.layer..region.layer + region.layers {
            for y in region.y..region.y + region.height {
                let from = texel_offset(sw, sh, bpp, region.x, y, layer);
                let to = texel_offset(dw, dh, bpp, region.x, y, layer);
                dst_level[to..to + row].copy_from_slice(&src_level[from..from + row]);
            }
        }
        state.counters.texture_copies += 1;
    }

    fn generate_mipmaps(&self, _texture: Self::Texture, _desc: &TextureDesc) {}

    fn create_texture_view(
        &self,
        texture: Self::Texture,
        desc: &TextureDesc,
        format: TexelFormat,
    ) -> Option<Self::Texture> {
        if !self.entry_points.contains(EntryPoints::TEXTURE_VIEW) {
            return None;
        }
        let mut state = self.state.lock();
        let id = MockTextureId(state.id());
        state.textures.insert(
            id,
            MockTexture {
                desc: TextureDesc { format, ..*desc },
                storage: TextureStorage::View(texture),
                handle: None,
            },
        );
        state.counters.texture_creates += 1;
        Some(id)
    }

    fn create_buffer_texture(
        &self,
        buffer: Self::Buffer,
        format: TexelFormat,
    ) -> Option<Self::Texture> {
        if !self.entry_points.contains(EntryPoints::TEXTURE_BUFFER) {
            return None;
        }
        let mut state = self.state.lock();
        let texels = state.buffers.get(&buffer)?.len() / format.bytes_per_texel();
        let id = MockTextureId(state.id());
        state.textures.insert(
            id,
            MockTexture {
                desc: TextureDesc {
                    kind: TextureKind::Buffer,
                    format,
                    width: u32::try_from(texels).unwrap_or(u32::MAX),
                    height: 1,
                    layers: 1,
                    levels: 1,
                    filter: Filter::Nearest,
                },
                storage: TextureStorage::Buffer(buffer),
                handle: None,
            },
        );
        state.counters.texture_creates += 1;
        Some(id)
    }

    fn texture_handle(&self, texture: Self::Texture) -> Option<u64> {
        if !self.entry_points.contains(EntryPoints::BINDLESS_TEXTURE) {
            return None;
        }
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = state.next_handle;
        let entry = state.textures.get_mut(&texture)?;
        Some(*entry.handle.get_or_insert(handle))
    }

    fn make_handle_resident(&self, handle: u64) {
        let mut state = self.state.lock();
        if !state.resident.contains(&handle) {
            state.resident.push(handle);
        }
    }

    fn make_handle_non_resident(&self, handle: u64) {
        self.state.lock().resident.retain(|h| *h != handle);
    }

    fn bind_texture(&self, unit: u32, kind: TextureKind, texture: Option<Self::Texture>) {
        let mut state = self.state.lock();
        match texture {
            Some(texture) => {
                state.bound_textures.insert(unit, (texture, kind));
            }
            None => {
                state.bound_textures.remove(&unit);
            }
        }
    }

    fn create_program(&self, source: &ProgramSource) -> Result<Self::Program> {
        if let Some(marker) = &self.fail_link_marker {
            if source.vertex.contains(marker.as_str()) || source.fragment.contains(marker.as_str()) {
                return Err(Error::ProgramLink {
                    log: format!("mock link failure on `{marker}`"),
                });
            }
        }
        let mut state = self.state.lock();
        let id = MockProgramId(state.id());
        state.programs.insert(id, source.clone());
        Ok(id)
    }

    fn delete_program(&self, program: Self::Program) {
        self.state.lock().programs.remove(&program);
    }

    fn use_program(&self, program: Option<Self::Program>) {
        self.state.lock().bound_program = program;
    }

    fn set_sampler_unit(&self, program: Self::Program, name: &str, unit: u32) {
        self.state
            .lock()
            .sampler_units
            .push((program, name.to_owned(), unit));
    }

    fn set_uniform_block_binding(&self, program: Self::Program, name: &str, binding: u32) {
        self.state
            .lock()
            .block_bindings
            .push((program, name.to_owned(), binding));
    }

    fn create_vertex_array(
        &self,
        attributes: &[VertexAttrib],
        buffers: &[Self::Buffer],
        index_buffer: Self::Buffer,
    ) -> Result<Self::VertexArray> {
        let mut state = self.state.lock();
        let id = MockVertexArrayId(state.id());
        state.vertex_arrays.insert(
            id,
            MockVertexArray {
                attributes: attributes.to_vec(),
                buffers: buffers.to_vec(),
                index_buffer,
            },
        );
        Ok(id)
    }

    fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        self.state.lock().vertex_arrays.remove(&vertex_array);
    }

    fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>) {
        self.state.lock().bound_vertex_array = vertex_array;
    }

    fn set_blend_state(&self, state: &BlendState) {
        self.state.lock().blend = *state;
    }

    fn set_color_write(&self, enabled: bool) {
        self.state.lock().color_write = enabled;
    }

    fn set_clip_distances(&self, count: u32) {
        self.state.lock().clip_distances = count;
    }

    fn draw_elements(&self, range: DrawRange) {
        let mut state = self.state.lock();
        state.counters.draw_calls += 1;
        Self::record_draw(&mut state, range);
    }

    fn multi_draw_elements(&self, ranges: &[DrawRange]) {
        if !self.entry_points.contains(EntryPoints::MULTI_DRAW) {
            for range in ranges {
                self.draw_elements(*range);
            }
            return;
        }
        let mut state = self.state.lock();
        state.counters.draw_calls += 1;
        for range in ranges {
            Self::record_draw(&mut state, *range);
        }
    }

    fn create_framebuffer(&self, color: Self::Texture) -> Result<Self::Framebuffer> {
        let mut state = self.state.lock();
        let id = MockFramebufferId(state.id());
        state.framebuffers.insert(id, color);
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn bind_draw_framebuffer(&self, framebuffer: Option<Self::Framebuffer>) {
        self.state.lock().bound_framebuffer = framebuffer;
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.state.lock().viewport = viewport;
    }

    fn clear_color(&self, color: [f32; 4]) {
        self.state.lock().clear_color = Some(color);
    }

    fn blit_framebuffer(
        &self,
        _src: Option<Self::Framebuffer>,
        _dst: Option<Self::Framebuffer>,
        _src_rect: Viewport,
        _dst_rect: Viewport,
        _filter: Filter,
    ) {
        self.state.lock().blits += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn array_desc(width: u32, height: u32, layers: u32) -> TextureDesc {
        TextureDesc {
            kind: TextureKind::Array2D,
            format: TexelFormat::R8Ui,
            width,
            height,
            layers,
            levels: 1,
            filter: Filter::Nearest,
        }
    }

    #[test]
    fn texture_upload_lands_at_region() {
        let device = MockDevice::new();
        let desc = array_desc(4, 4, 2);
        let texture = device.create_texture(&desc).unwrap();
        let region = TextureRegion {
            level: 0,
            x: 1,
            y: 2,
            layer: 1,
            width: 2,
            height: 1,
            layers: 1,
        };
        device.texture_sub_image(texture, &desc, &region, &[7, 9]);
        assert_eq!(device.texel(texture, 1, 2, 1), vec![7]);
        assert_eq!(device.texel(texture, 2, 2, 1), vec![9]);
        assert_eq!(device.texel(texture, 1, 2, 0), vec![0]);
    }

    #[test]
    fn views_alias_their_source() {
        let device = MockDevice::new();
        let desc = array_desc(2, 2, 1);
        let texture = device.create_texture(&desc).unwrap();
        let view = device
            .create_texture_view(texture, &desc, TexelFormat::R8)
            .unwrap();
        let region = TextureRegion {
            level: 0,
            x: 0,
            y: 0,
            layer: 0,
            width: 1,
            height: 1,
            layers: 1,
        };
        device.texture_sub_image(texture, &desc, &region, &[42]);
        assert_eq!(device.texel(view, 0, 0, 0), vec![42]);
    }

    #[test]
    fn allocation_limit_reports_exhaustion() {
        let device = MockDevice::new().with_allocation_limit(64);
        assert!(device
            .create_buffer(BufferTarget::Array, 64, BufferUsage::Static)
            .is_ok());
        let err = device
            .create_buffer(BufferTarget::Array, 65, BufferUsage::Static)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { bytes: 65, .. }));
    }

    #[test]
    fn views_unavailable_without_entry_point() {
        let device = MockDevice::with_info(
            ContextInfo::new(GlVersion::gl(3, 3)),
            EntryPoints::empty(),
        );
        let desc = array_desc(2, 2, 1);
        let texture = device.create_texture(&desc).unwrap();
        assert!(device
            .create_texture_view(texture, &desc, TexelFormat::R8)
            .is_none());
        assert!(device.texture_handle(texture).is_none());
    }
}
