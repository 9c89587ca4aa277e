//! Per-frame draw stream over a ring of buffer pools.
//!
//! Each pool slot is one set of attribute, header, index and shader-data
//! buffers plus the vertex array reading them. A frame writes primitives
//! into CPU staging for the current slot, then flushes exactly the written
//! prefix of each buffer, draws, and moves on to the next slot. A slot is
//! only written again after every other slot has been used, so the CPU
//! fills slot `k + 1` while the GPU may still read slot `k`.
//!
//! Consecutive primitives with the same [`DrawState`] share one batch. A
//! change of program, blend state or discard group (or item shader, when
//! configured) starts a new batch, and batches are drawn in submission
//! order.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::config::{BatchingMode, DataStoreBacking, DrawStreamParams};
use crate::device::{
    AttribType, BlendState, BufferTarget, BufferUsage, Device, DrawRange, TexelFormat, TextureKind,
    VertexAttrib,
};
use crate::error::{Error, Result};
use crate::shader::registry::ShaderId;
use crate::shader::{DiscardGroup, binding};

/// One vertex: three `uvec4` attributes whose meaning belongs to the item
/// shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct PainterAttribute {
    /// First attribute.
    pub attrib0: [u32; 4],
    /// Second attribute.
    pub attrib1: [u32; 4],
    /// Third attribute.
    pub attrib2: [u32; 4],
}

/// Per-primitive header, stored in the data store ahead of the item data.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct PainterHeader {
    /// Item shader id.
    pub item_shader: u32,
    /// Blend shader id.
    pub blend_shader: u32,
    /// Block offset of the item data; filled in by the stream.
    pub item_data: u32,
    /// Block offset of the clip equations.
    pub clip: u32,
    /// Block offset of the transformation.
    pub transformation: u32,
    /// Block offset of the brush.
    pub brush: u32,
    /// Depth value.
    pub z: u32,
    /// Item-specific flags.
    pub flags: u32,
}

/// Data-store blocks taken by a [`PainterHeader`].
pub const HEADER_BLOCKS: usize = std::mem::size_of::<PainterHeader>() / 16;

/// One primitive to stream.
#[derive(Debug, Clone, Copy)]
pub struct Primitive<'a> {
    /// Vertices.
    pub attributes: &'a [PainterAttribute],
    /// Triangle indices into `attributes`.
    pub indices: &'a [u32],
    /// Item data blocks.
    pub data: &'a [[u32; 4]],
    /// Header; `item_data` is overwritten.
    pub header: PainterHeader,
}

/// GPU state a batch is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawState<P> {
    /// Program to draw with.
    pub program: P,
    /// Fixed-function blend state.
    pub blend: BlendState,
    /// Discard group of the item shader.
    pub discard: DiscardGroup,
    /// Item shader, only compared when breaking on shader change.
    pub item_shader: ShaderId,
}

/// Lifecycle of a pool slot within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Not in use by the CPU.
    Free,
    /// Staging is open; nothing written yet.
    Mapped,
    /// Primitives are being recorded.
    Recording,
    /// Written ranges flushed; read-only from here.
    Unmapped,
    /// Draws issued; the GPU may still be reading.
    Drawing,
}

/// Counters for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Primitives pushed.
    pub primitives: usize,
    /// Batches recorded.
    pub batches: usize,
    /// Draw calls issued (a multi-draw counts once).
    pub draw_calls: usize,
    /// Bytes flushed to the pool buffers.
    pub bytes_uploaded: usize,
    /// Pool slots consumed.
    pub pools_used: usize,
}

struct PoolSlot<D: Device> {
    attributes: D::Buffer,
    headers: D::Buffer,
    indices: D::Buffer,
    data: D::Buffer,
    data_view: Option<D::Texture>,
    vertex_array: D::VertexArray,
    state: PoolState,
}

struct Batch<P> {
    state: DrawState<P>,
    ranges: Vec<DrawRange>,
}

#[derive(Default)]
struct Staging {
    attributes: Vec<PainterAttribute>,
    headers: Vec<u32>,
    indices: Vec<u32>,
    data: Vec<[u32; 4]>,
}

impl Staging {
    fn clear(&mut self) {
        self.attributes.clear();
        self.headers.clear();
        self.indices.clear();
        self.data.clear();
    }

    fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.data.is_empty()
    }
}

fn data_target(backing: DataStoreBacking) -> BufferTarget {
    match backing {
        DataStoreBacking::Tbo => BufferTarget::Texture,
        DataStoreBacking::Ubo => BufferTarget::Uniform,
        DataStoreBacking::Ssbo => BufferTarget::ShaderStorage,
    }
}

fn vertex_layout() -> [VertexAttrib; 4] {
    let stride = u32::try_from(std::mem::size_of::<PainterAttribute>()).unwrap_or(48);
    let attrib = |location: u32| VertexAttrib {
        location,
        buffer: 0,
        components: 4,
        ty: AttribType::U32,
        stride,
        offset: location * 16,
    };
    [
        attrib(0),
        attrib(1),
        attrib(2),
        VertexAttrib {
            location: 3,
            buffer: 1,
            components: 1,
            ty: AttribType::U32,
            stride: 4,
            offset: 0,
        },
    ]
}

/// The draw stream.
pub struct DrawStream<D: Device> {
    device: Rc<D>,
    params: DrawStreamParams,
    pools: Vec<PoolSlot<D>>,
    current: usize,
    staging: Staging,
    batches: Vec<Batch<D::Program>>,
    stats: FrameStats,
}

impl<D: Device> DrawStream<D> {
    /// Allocate `params.number_pools` slots.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a
    /// buffer cannot be allocated.
    pub fn new(device: &Rc<D>, params: DrawStreamParams) -> Result<Self> {
        let layout = vertex_layout();
        let target = data_target(params.data_store_backing);
        let mut pools = Vec::with_capacity(params.number_pools.max(1));
        for _ in 0..params.number_pools.max(1) {
            let attributes = device.create_buffer(
                BufferTarget::Array,
                params.attributes_per_buffer * std::mem::size_of::<PainterAttribute>(),
                BufferUsage::Stream,
            )?;
            let headers = device.create_buffer(
                BufferTarget::Array,
                params.attributes_per_buffer * 4,
                BufferUsage::Stream,
            )?;
            let indices = device.create_buffer(
                BufferTarget::ElementArray,
                params.indices_per_buffer * 4,
                BufferUsage::Stream,
            )?;
            let data = device.create_buffer(
                target,
                params.data_blocks_per_store_buffer * 16,
                BufferUsage::Stream,
            )?;
            let data_view = if params.data_store_backing == DataStoreBacking::Tbo {
                let view = device.create_buffer_texture(data, TexelFormat::Rgba32Ui);
                if view.is_none() {
                    tracing::warn!("texture-buffer data store without texture buffers");
                }
                view
            } else {
                None
            };
            let vertex_array = device.create_vertex_array(&layout, &[attributes, headers], indices)?;
            pools.push(PoolSlot {
                attributes,
                headers,
                indices,
                data,
                data_view,
                vertex_array,
                state: PoolState::Free,
            });
        }
        tracing::debug!(
            pools = pools.len(),
            attributes = params.attributes_per_buffer,
            indices = params.indices_per_buffer,
            data_blocks = params.data_blocks_per_store_buffer,
            "created draw stream"
        );
        Ok(Self {
            device: Rc::clone(device),
            params,
            pools,
            current: 0,
            staging: Staging::default(),
            batches: Vec::new(),
            stats: FrameStats::default(),
        })
    }

    /// Parameters the stream was built with.
    #[must_use]
    pub fn params(&self) -> &DrawStreamParams {
        &self.params
    }

    /// Switch between batched and per-primitive submission.
    pub fn set_batching(&mut self, batching: BatchingMode) {
        self.params.batching = batching;
    }

    /// Index of the slot being written.
    #[must_use]
    pub fn current_pool(&self) -> usize {
        self.current
    }

    /// State of every slot.
    #[must_use]
    pub fn pool_states(&self) -> Vec<PoolState> {
        self.pools.iter().map(|p| p.state).collect()
    }

    /// Open the current slot for writing.
    pub fn begin_frame(&mut self) {
        self.stats = FrameStats::default();
        self.map_current();
    }

    fn map_current(&mut self) {
        let slot = &mut self.pools[self.current];
        debug_assert!(
            matches!(slot.state, PoolState::Free | PoolState::Drawing),
            "pool {} mapped while {:?}",
            self.current,
            slot.state
        );
        slot.state = PoolState::Mapped;
        self.staging.clear();
        self.batches.clear();
    }

    fn fits(&self, attributes: usize, indices: usize, blocks: usize) -> bool {
        self.staging.attributes.len() + attributes <= self.params.attributes_per_buffer
            && self.staging.indices.len() + indices <= self.params.indices_per_buffer
            && self.staging.data.len() + blocks <= self.params.data_blocks_per_store_buffer
    }

    fn breaks(&self, previous: &DrawState<D::Program>, next: &DrawState<D::Program>) -> bool {
        previous.program != next.program
            || previous.blend != next.blend
            || previous.discard != next.discard
            || (self.params.break_on_shader_change && previous.item_shader != next.item_shader)
    }

    /// Append one primitive drawn with `state`.
    ///
    /// When the current slot is full it is drawn and the stream moves to the
    /// next slot.
    ///
    /// # Errors
    ///
    /// [`Error::PrimitiveTooLarge`] if the primitive does not fit an empty
    /// slot.
    pub fn push(&mut self, state: DrawState<D::Program>, primitive: &Primitive<'_>) -> Result<()> {
        let blocks = HEADER_BLOCKS + primitive.data.len();
        let (attributes, indices) = (primitive.attributes.len(), primitive.indices.len());
        if attributes > self.params.attributes_per_buffer
            || indices > self.params.indices_per_buffer
            || blocks > self.params.data_blocks_per_store_buffer
        {
            return Err(Error::PrimitiveTooLarge {
                attributes,
                indices,
                data_blocks: blocks,
            });
        }
        debug_assert!(
            primitive.indices.iter().all(|&i| (i as usize) < attributes),
            "index past the primitive's attributes"
        );
        if !self.fits(attributes, indices, blocks) {
            tracing::debug!(pool = self.current, "pool slot full; moving to the next");
            self.submit()?;
            self.advance();
            self.map_current();
        }

        let slot = &mut self.pools[self.current];
        slot.state = PoolState::Recording;

        let staging = &mut self.staging;
        let header_offset = u32::try_from(staging.data.len()).unwrap_or(u32::MAX);
        let header = PainterHeader {
            item_data: header_offset + HEADER_BLOCKS as u32,
            ..primitive.header
        };
        let header_blocks: [[u32; 4]; HEADER_BLOCKS] = bytemuck::cast(header);
        staging.data.extend_from_slice(&header_blocks);
        staging.data.extend_from_slice(primitive.data);

        let base = u32::try_from(staging.attributes.len()).unwrap_or(u32::MAX);
        staging.attributes.extend_from_slice(primitive.attributes);
        staging
            .headers
            .extend(std::iter::repeat_n(header_offset, attributes));

        let range = DrawRange {
            count: u32::try_from(indices).unwrap_or(u32::MAX),
            byte_offset: staging.indices.len() * 4,
        };
        staging.indices.extend(primitive.indices.iter().map(|i| i + base));

        let merge = self.params.batching == BatchingMode::Batched
            && self
                .batches
                .last()
                .is_some_and(|last| !self.breaks(&last.state, &state));
        match self.batches.last_mut() {
            Some(last) if merge => last.ranges.push(range),
            _ => {
                self.batches.push(Batch {
                    state,
                    ranges: vec![range],
                });
                self.stats.batches += 1;
            }
        }
        self.stats.primitives += 1;
        Ok(())
    }

    /// Flush the written ranges of the current slot and draw its batches.
    fn submit(&mut self) -> Result<()> {
        let slot = &mut self.pools[self.current];
        if slot.state != PoolState::Recording {
            return Ok(());
        }

        let device = &self.device;
        let mut uploaded = 0;
        let mut flush = |buffer: D::Buffer, target: BufferTarget, bytes: &[u8]| {
            if !bytes.is_empty() {
                device.write_mapped(buffer, target, 0, bytes);
                uploaded += bytes.len();
            }
        };
        flush(
            slot.attributes,
            BufferTarget::Array,
            bytemuck::cast_slice(&self.staging.attributes),
        );
        flush(
            slot.headers,
            BufferTarget::Array,
            bytemuck::cast_slice(&self.staging.headers),
        );
        flush(
            slot.indices,
            BufferTarget::ElementArray,
            bytemuck::cast_slice(&self.staging.indices),
        );
        flush(
            slot.data,
            data_target(self.params.data_store_backing),
            bytemuck::cast_slice(&self.staging.data),
        );
        slot.state = PoolState::Unmapped;
        self.stats.bytes_uploaded += uploaded;

        device.bind_vertex_array(Some(slot.vertex_array));
        match self.params.data_store_backing {
            DataStoreBacking::Tbo => {
                device.bind_texture(binding::DATA_STORE, TextureKind::Buffer, slot.data_view);
            }
            DataStoreBacking::Ubo => device.bind_buffer_range(
                BufferTarget::Uniform,
                binding::DATA_STORE_BLOCK,
                slot.data,
                0,
                self.params.data_blocks_per_store_buffer * 16,
            ),
            DataStoreBacking::Ssbo => device.bind_buffer_base(
                BufferTarget::ShaderStorage,
                binding::DATA_STORE_STORAGE,
                Some(slot.data),
            ),
        }

        let mut draw_calls = 0;
        for batch in &self.batches {
            device.use_program(Some(batch.state.program));
            device.set_blend_state(&batch.state.blend);
            if self.params.batching == BatchingMode::PerPrimitive {
                for range in &batch.ranges {
                    device.draw_elements(*range);
                    draw_calls += 1;
                }
            } else if self.params.use_multi_draw && batch.ranges.len() > 1 {
                device.multi_draw_elements(&batch.ranges);
                draw_calls += 1;
            } else {
                for range in coalesce(&batch.ranges) {
                    device.draw_elements(range);
                    draw_calls += 1;
                }
            }
        }
        slot.state = PoolState::Drawing;
        self.stats.draw_calls += draw_calls;
        self.staging.clear();
        self.batches.clear();
        Ok(())
    }

    fn advance(&mut self) {
        if self.pools[self.current].state == PoolState::Mapped {
            self.pools[self.current].state = PoolState::Free;
        }
        self.current = (self.current + 1) % self.pools.len();
        self.stats.pools_used += 1;
    }

    /// Draw whatever is recorded, advance to the next slot and return the
    /// frame's counters.
    ///
    /// # Errors
    ///
    /// Propagates failures from drawing the last slot.
    pub fn end_frame(&mut self) -> Result<FrameStats> {
        if !self.staging.is_empty() {
            self.submit()?;
        }
        self.advance();
        self.device.bind_vertex_array(None);
        let stats = std::mem::take(&mut self.stats);
        tracing::debug!(
            primitives = stats.primitives,
            batches = stats.batches,
            draw_calls = stats.draw_calls,
            bytes = stats.bytes_uploaded,
            pools = stats.pools_used,
            "frame streamed"
        );
        Ok(stats)
    }
}

/// Merge index ranges that follow each other in the index buffer.
fn coalesce(ranges: &[DrawRange]) -> Vec<DrawRange> {
    let mut out: Vec<DrawRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(last) if last.byte_offset + last.count as usize * 4 == range.byte_offset => {
                last.count += range.count;
            }
            _ => out.push(*range),
        }
    }
    out
}

impl<D: Device> Drop for DrawStream<D> {
    fn drop(&mut self) {
        for slot in self.pools.drain(..) {
            self.device.delete_vertex_array(slot.vertex_array);
            if let Some(view) = slot.data_view {
                self.device.delete_texture(view);
            }
            for buffer in [slot.attributes, slot.headers, slot.indices, slot.data] {
                self.device.delete_buffer(buffer);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::caps::{ContextInfo, GlVersion};
    use crate::device::mock::{MockDevice, MockProgramId};
    use crate::device::{BlendFactor, EntryPoints, ProgramSource};

    fn params(batching: BatchingMode) -> DrawStreamParams {
        DrawStreamParams {
            number_pools: 3,
            attributes_per_buffer: 64,
            indices_per_buffer: 96,
            data_blocks_per_store_buffer: 64,
            data_store_backing: DataStoreBacking::Tbo,
            use_multi_draw: true,
            break_on_shader_change: false,
            batching,
        }
    }

    fn programs(device: &MockDevice) -> [MockProgramId; 2] {
        let source = |name: &str| ProgramSource {
            vertex: name.to_owned(),
            fragment: name.to_owned(),
            attributes: Vec::new(),
            dual_source_output: false,
        };
        [
            device.create_program(&source("a")).unwrap(),
            device.create_program(&source("b")).unwrap(),
        ]
    }

    fn quad(tag: u32) -> ([PainterAttribute; 4], [u32; 6]) {
        let attributes = std::array::from_fn(|i| PainterAttribute {
            attrib0: [tag, i as u32, 0, 0],
            ..PainterAttribute::default()
        });
        (attributes, [0, 1, 2, 0, 2, 3])
    }

    fn state(program: MockProgramId, blend: BlendState, shader: u32) -> DrawState<MockProgramId> {
        let mut registry = crate::shader::registry::ShaderRegistry::new();
        let mut id = None;
        for n in 0..=shader {
            id = Some(registry.register_item(crate::shader::registry::ItemShader {
                name: n.to_string(),
                vertex: String::new(),
                fragment: String::new(),
                uses_discard: false,
            }));
        }
        DrawState {
            program,
            blend,
            discard: DiscardGroup::All,
            item_shader: id.unwrap(),
        }
    }

    const OVER: BlendState = BlendState::add(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
    const ADD: BlendState = BlendState::add(BlendFactor::One, BlendFactor::One);

    /// Flattened `(program, blend, vertex bytes)` per drawn index.
    fn drawn(device: &MockDevice) -> Vec<(Option<MockProgramId>, BlendState, Vec<u8>)> {
        device
            .draws()
            .into_iter()
            .flat_map(|d| {
                let (program, blend) = (d.program, d.blend);
                d.vertices.into_iter().map(move |v| (program, blend, v))
            })
            .collect()
    }

    fn run(device: &Rc<MockDevice>, batching: BatchingMode, script: &[(usize, BlendState)]) -> FrameStats {
        run_with(device, params(batching), script)
    }

    fn run_with(
        device: &Rc<MockDevice>,
        params: DrawStreamParams,
        script: &[(usize, BlendState)],
    ) -> FrameStats {
        let programs = programs(device);
        let mut stream = DrawStream::new(device, params).unwrap();
        stream.begin_frame();
        for (n, (program, blend)) in script.iter().enumerate() {
            let (attributes, indices) = quad(n as u32);
            let data = [[n as u32; 4]];
            stream
                .push(
                    state(programs[*program], *blend, 0),
                    &Primitive {
                        attributes: &attributes,
                        indices: &indices,
                        data: &data,
                        header: PainterHeader::default(),
                    },
                )
                .unwrap();
        }
        stream.end_frame().unwrap()
    }

    #[test]
    fn batched_and_per_primitive_draw_the_same_vertices() {
        let script: Vec<(usize, BlendState)> = (0..40)
            .map(|n| ((n / 3) % 2, if n % 7 < 4 { OVER } else { ADD }))
            .collect();
        let batched_device = Rc::new(MockDevice::new());
        let single_device = Rc::new(MockDevice::new());
        let batched = run(&batched_device, BatchingMode::Batched, &script);
        let single = run(&single_device, BatchingMode::PerPrimitive, &script);

        assert_eq!(drawn(&batched_device), drawn(&single_device));
        assert_eq!(single.draw_calls, 40);
        assert!(batched.draw_calls < single.draw_calls);
        assert_eq!(batched.primitives, single.primitives);
    }

    #[test]
    fn state_changes_break_batches_in_order() {
        let device = Rc::new(MockDevice::new());
        let stats = run(
            &device,
            BatchingMode::Batched,
            &[(0, OVER), (0, OVER), (0, ADD), (0, OVER), (1, OVER)],
        );
        assert_eq!(stats.batches, 4);
        assert_eq!(stats.draw_calls, 4);
        let blends: Vec<_> = device.draws().iter().map(|d| d.blend).collect();
        assert_eq!(blends, vec![OVER, OVER, ADD, OVER, OVER]);
    }

    #[test]
    fn shader_change_breaks_only_when_asked() {
        let device = Rc::new(MockDevice::new());
        let [a, _] = programs(&device);
        let (attributes, indices) = quad(0);
        let primitive = Primitive {
            attributes: &attributes,
            indices: &indices,
            data: &[],
            header: PainterHeader::default(),
        };
        for (flag, expected) in [(false, 1), (true, 2)] {
            let mut stream = DrawStream::new(
                &device,
                DrawStreamParams {
                    break_on_shader_change: flag,
                    ..params(BatchingMode::Batched)
                },
            )
            .unwrap();
            stream.begin_frame();
            stream.push(state(a, OVER, 0), &primitive).unwrap();
            stream.push(state(a, OVER, 1), &primitive).unwrap();
            assert_eq!(stream.end_frame().unwrap().batches, expected);
        }
    }

    #[test]
    fn full_slots_roll_over_and_slots_cycle() {
        let device = Rc::new(MockDevice::new());
        let [a, _] = programs(&device);
        let mut stream = DrawStream::new(
            &device,
            DrawStreamParams {
                attributes_per_buffer: 8,
                indices_per_buffer: 12,
                ..params(BatchingMode::Batched)
            },
        )
        .unwrap();
        let (attributes, indices) = quad(1);
        let primitive = Primitive {
            attributes: &attributes,
            indices: &indices,
            data: &[],
            header: PainterHeader::default(),
        };

        stream.begin_frame();
        for _ in 0..3 {
            stream.push(state(a, OVER, 0), &primitive).unwrap();
        }
        // Two quads fill slot 0; the third went to slot 1.
        assert_eq!(stream.current_pool(), 1);
        assert_eq!(stream.pool_states()[0], PoolState::Drawing);
        assert_eq!(stream.pool_states()[1], PoolState::Recording);
        let stats = stream.end_frame().unwrap();
        assert_eq!(stats.pools_used, 2);
        assert_eq!(stream.current_pool(), 2);

        stream.begin_frame();
        stream.end_frame().unwrap();
        assert_eq!(stream.current_pool(), 0);
        assert_eq!(stream.pool_states()[2], PoolState::Free);
    }

    #[test]
    fn only_written_ranges_are_flushed() {
        let device = Rc::new(MockDevice::new());
        let stats = run(&device, BatchingMode::Batched, &[(0, OVER)]);
        let writes = device.mapped_writes();
        assert!(writes.iter().all(|(_, offset, _)| *offset == 0));
        let lengths: Vec<usize> = writes.iter().map(|(_, _, len)| *len).collect();
        // 4 attributes, 4 headers, 6 indices, header plus one data block.
        assert_eq!(lengths, vec![4 * 48, 4 * 4, 6 * 4, (HEADER_BLOCKS + 1) * 16]);
        assert_eq!(stats.bytes_uploaded, lengths.iter().sum::<usize>());
    }

    #[test]
    fn oversized_primitive_is_an_error() {
        let device = Rc::new(MockDevice::new());
        let [a, _] = programs(&device);
        let mut stream = DrawStream::new(&device, params(BatchingMode::Batched)).unwrap();
        stream.begin_frame();
        let attributes = vec![PainterAttribute::default(); 65];
        let err = stream
            .push(
                state(a, OVER, 0),
                &Primitive {
                    attributes: &attributes,
                    indices: &[0, 1, 2],
                    data: &[],
                    header: PainterHeader::default(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::PrimitiveTooLarge { attributes: 65, .. }));
    }

    #[test]
    fn multi_draw_issues_one_call_per_batch() {
        let info = ContextInfo::new(GlVersion::gl(4, 5));
        let with = Rc::new(MockDevice::with_info(info.clone(), EntryPoints::all()));
        let without = Rc::new(MockDevice::with_info(
            info,
            EntryPoints::all() - EntryPoints::MULTI_DRAW,
        ));
        let script = [(0, OVER); 5];
        assert_eq!(run(&with, BatchingMode::Batched, &script).draw_calls, 1);
        assert_eq!(with.draw_call_count(), 1);
        assert_eq!(with.draws().len(), 5);

        // Without multi-draw the contiguous ranges are coalesced instead.
        let coalesced = DrawStreamParams {
            use_multi_draw: false,
            ..params(BatchingMode::Batched)
        };
        assert_eq!(run_with(&without, coalesced, &script).draw_calls, 1);
        assert_eq!(without.draw_call_count(), 1);
        assert_eq!(without.draws().len(), 1);
        assert_eq!(drawn(&with), drawn(&without));
    }

    #[test]
    fn ubo_data_store_is_bound_as_a_range() {
        let device = Rc::new(MockDevice::new());
        let [a, _] = programs(&device);
        let mut stream = DrawStream::new(
            &device,
            DrawStreamParams {
                data_store_backing: DataStoreBacking::Ubo,
                ..params(BatchingMode::Batched)
            },
        )
        .unwrap();
        let (attributes, indices) = quad(0);
        stream.begin_frame();
        stream
            .push(
                state(a, OVER, 0),
                &Primitive {
                    attributes: &attributes,
                    indices: &indices,
                    data: &[],
                    header: PainterHeader::default(),
                },
            )
            .unwrap();
        stream.end_frame().unwrap();
        assert!(device
            .indexed_binding(BufferTarget::Uniform, binding::DATA_STORE_BLOCK)
            .is_some());
    }

    #[test]
    fn dropping_the_stream_releases_pools() {
        let device = Rc::new(MockDevice::new());
        drop(DrawStream::new(&device, params(BatchingMode::Batched)).unwrap());
        let (created, deleted) = device.buffer_lifetimes();
        assert_eq!((created, deleted), (12, 12));
    }
}
