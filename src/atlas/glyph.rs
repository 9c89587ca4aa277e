//! Glyph atlas: an 8-bit texel store plus a geometry store.
//!
//! The texel store is a 2D array texture of `R8UI` texels holding glyph
//! coverage, distance-field or curve data, shelf-packed per layer with a
//! one-texel zero border. The geometry store is a flat array of elements
//! of 1 to 4 32-bit components, addressed by a linear offset, behind one
//! of three backings chosen by [`resolve`](crate::config::resolve).

use std::rc::Rc;

use crate::atlas::ShelfPacker;
use crate::backing::{BufferStore, TextureStore};
use crate::caps::CapabilitySnapshot;
use crate::config::{GlyphAtlasParams, GlyphGeometryBacking};
use crate::device::{
    BufferTarget, BufferUsage, Device, Filter, TexelFormat, TextureDesc, TextureKind,
    TextureRegion,
};
use crate::error::{Error, Result};

/// Where a glyph's texels live in the texel store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelLocation {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Layer.
    pub layer: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

/// The texel half of the glyph atlas.
pub struct GlyphTexelStore<D: Device> {
    store: TextureStore<D>,
    packers: Vec<ShelfPacker>,
    max_layers: u32,
}

impl<D: Device> GlyphTexelStore<D> {
    /// Allocate `layers` layers of `width` x `height` texels, growing to at
    /// most `max_layers`.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the texture cannot be allocated.
    pub fn new(
        device: &Rc<D>,
        width: u32,
        height: u32,
        layers: u32,
        max_layers: u32,
        delayed: bool,
    ) -> Result<Self> {
        let max_layers = max_layers.max(1);
        let layers = layers.clamp(1, max_layers);
        let desc = TextureDesc {
            kind: TextureKind::Array2D,
            format: TexelFormat::R8Ui,
            width,
            height,
            layers,
            levels: 1,
            filter: Filter::Nearest,
        };
        Ok(Self {
            store: TextureStore::new(device, desc, delayed)?,
            packers: (0..layers).map(|_| ShelfPacker::new(width, height, 1)).collect(),
            max_layers,
        })
    }

    /// Number of layers, including ones added since the last flush.
    #[must_use]
    pub fn layers(&self) -> u32 {
        self.store.desc().layers
    }

    /// Reserve a `width` x `height` tile, adding a layer if none has room.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the tile is larger than a whole layer,
    /// or if every layer is full and the store is at its layer limit.
    pub fn allocate(&mut self, width: u32, height: u32) -> Result<TexelLocation> {
        let tile_bytes = width as usize * height as usize;
        let empty = ShelfPacker::new(self.store.desc().width, self.store.desc().height, 1);
        if !empty.fits_empty(width, height) {
            tracing::warn!(width, height, "glyph larger than a texel-store layer");
            return Err(Error::ResourceExhausted {
                what: "glyph texel tile",
                bytes: tile_bytes,
            });
        }
        let found = self
            .packers
            .iter_mut()
            .enumerate()
            .find_map(|(layer, packer)| packer.allocate(width, height).map(|c| (layer, c)));
        let (layer, (x, y)) = match found {
            Some(found) => found,
            None => {
                let layers = self.layers();
                if layers >= self.max_layers {
                    tracing::warn!(layers, "glyph texel store is at its layer limit");
                    return Err(Error::ResourceExhausted {
                        what: "glyph texel layer",
                        bytes: tile_bytes,
                    });
                }
                self.add_layers(1);
                let layer = self.packers.len() - 1;
                let corner = self.packers[layer].allocate(width, height).ok_or(Error::ResourceExhausted {
                    what: "glyph texel tile",
                    bytes: tile_bytes,
                })?;
                (layer, corner)
            }
        };
        Ok(TexelLocation {
            x,
            y,
            layer: u32::try_from(layer).unwrap_or(u32::MAX),
            width,
            height,
        })
    }

    /// Write a tile's texels (row-major, `width * height` bytes).
    ///
    /// # Errors
    ///
    /// See [`TextureStore::set_data`].
    pub fn upload(&mut self, location: &TexelLocation, texels: &[u8]) -> Result<()> {
        let region = TextureRegion {
            level: 0,
            x: location.x,
            y: location.y,
            layer: location.layer,
            width: location.width,
            height: location.height,
            layers: 1,
        };
        self.store.set_data(&region, texels)
    }

    /// Grow by `count` zero-filled layers, stopping at the layer limit.
    pub fn add_layers(&mut self, count: u32) {
        let desc = *self.store.desc();
        let count = count.min(self.max_layers.saturating_sub(desc.layers));
        self.store.add_layers(count);
        self.packers
            .extend((0..count).map(|_| ShelfPacker::new(desc.width, desc.height, 1)));
        tracing::debug!(layers = self.store.desc().layers, "glyph texel store grew");
    }

    /// The store sampled as unsigned integers (`usampler2DArray`).
    #[must_use]
    pub fn integer_view(&self) -> D::Texture {
        self.store.handle()
    }

    /// The store sampled as normalized floats (`sampler2DArray`), when
    /// texture views are available. Shaders fall back to integer sampling
    /// otherwise.
    pub fn float_view(&mut self) -> Option<D::Texture> {
        self.store.view(TexelFormat::R8)
    }

    /// Apply pending growth and writes.
    ///
    /// # Errors
    ///
    /// See [`TextureStore::flush`].
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

/// `(x, y, layer)` of a linear offset in a 2D array texture whose width and
/// height are `1 << log2_width` and `1 << log2_height`.
#[must_use]
pub const fn unpack_offset(offset: u32, log2_width: u32, log2_height: u32) -> (u32, u32, u32) {
    let x = offset & ((1 << log2_width) - 1);
    let y = (offset >> log2_width) & ((1 << log2_height) - 1);
    let layer = offset >> (log2_width + log2_height);
    (x, y, layer)
}

/// Dimensions of an array texture able to hold `required` elements:
/// widest first, then as many layers as the device allows, then taller
/// rows. Returns `(log2_width, log2_height, layers)`.
#[must_use]
pub fn array_dimensions(required: u32, max_texture_size: u32, max_layers: u32) -> (u32, u32, u32) {
    let required = required.max(1);
    let log2_max = max_texture_size.max(1).ilog2();
    let log2_width = required.next_power_of_two().ilog2().min(log2_max);
    let rows = required.div_ceil(1 << log2_width);
    if rows <= max_layers {
        return (log2_width, 0, rows);
    }
    let rows_per_layer = rows.div_ceil(max_layers.max(1));
    let log2_height = rows_per_layer.next_power_of_two().ilog2().min(log2_max);
    let layers = rows.div_ceil(1 << log2_height);
    (log2_width, log2_height, layers)
}

enum GeometryBacking<D: Device> {
    TextureBuffer(BufferStore<D>),
    StorageBuffer(BufferStore<D>),
    ArrayTexture {
        store: TextureStore<D>,
        log2_width: u32,
        log2_height: u32,
        max_layers: u32,
    },
}

/// How shaders reach the geometry store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryBinding<T, B> {
    /// Bind as a texture (texture buffer or 2D array).
    Texture(T, TextureKind),
    /// Bind as a shader storage block.
    StorageBuffer(B),
}

/// The geometry half of the glyph atlas.
pub struct GlyphGeometryStore<D: Device> {
    backing: GeometryBacking<D>,
    alignment: u32,
    capacity: u32,
    next: u32,
}

impl<D: Device> GlyphGeometryStore<D> {
    /// Create a store of `capacity` elements of `alignment` components.
    ///
    /// A storage-buffer backing always uses an alignment of 4. An array
    /// texture backing is sized from the device's texture limits.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if the
    /// backing cannot be allocated.
    pub fn new(
        device: &Rc<D>,
        caps: &CapabilitySnapshot,
        backing: GlyphGeometryBacking,
        alignment: u32,
        capacity: u32,
        delayed: bool,
    ) -> Result<Self> {
        debug_assert!((1..=4).contains(&alignment), "alignment {alignment} outside 1..=4");
        let capacity = capacity.max(1);
        match backing {
            GlyphGeometryBacking::TextureBuffer | GlyphGeometryBacking::StorageBuffer => {
                let alignment = if backing == GlyphGeometryBacking::StorageBuffer {
                    4
                } else {
                    alignment
                };
                let target = if backing == GlyphGeometryBacking::StorageBuffer {
                    BufferTarget::ShaderStorage
                } else {
                    BufferTarget::Texture
                };
                let bytes = capacity as usize * alignment as usize * 4;
                let store = BufferStore::new(device, target, bytes, BufferUsage::Static, delayed)?;
                let backing = if target == BufferTarget::ShaderStorage {
                    GeometryBacking::StorageBuffer(store)
                } else {
                    GeometryBacking::TextureBuffer(store)
                };
                Ok(Self {
                    backing,
                    alignment,
                    capacity,
                    next: 0,
                })
            }
            GlyphGeometryBacking::ArrayTexture => {
                let limits = caps.limits();
                let (log2_width, log2_height, layers) = array_dimensions(
                    capacity,
                    limits.max_texture_size,
                    limits.max_array_texture_layers,
                );
                Self::with_array_dimensions(
                    device,
                    alignment,
                    (log2_width, log2_height),
                    layers,
                    limits.max_array_texture_layers,
                    delayed,
                )
            }
        }
    }

    /// Create an array-texture-backed store with explicit dimensions that
    /// grows to at most `max_layers` layers.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the texture cannot be allocated.
    pub fn with_array_dimensions(
        device: &Rc<D>,
        alignment: u32,
        (log2_width, log2_height): (u32, u32),
        layers: u32,
        max_layers: u32,
        delayed: bool,
    ) -> Result<Self> {
        debug_assert!((1..=4).contains(&alignment), "alignment {alignment} outside 1..=4");
        let max_layers = max_layers.max(1);
        let layers = layers.clamp(1, max_layers);
        let desc = TextureDesc {
            kind: TextureKind::Array2D,
            format: TexelFormat::uint_with_components(alignment),
            width: 1 << log2_width,
            height: 1 << log2_height,
            layers,
            levels: 1,
            filter: Filter::Nearest,
        };
        Ok(Self {
            backing: GeometryBacking::ArrayTexture {
                store: TextureStore::new(device, desc, delayed)?,
                log2_width,
                log2_height,
                max_layers,
            },
            alignment,
            capacity: layers.saturating_mul(1 << (log2_width + log2_height)),
            next: 0,
        })
    }

    /// Components per element.
    #[must_use]
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Elements the store can hold before it grows.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Elements handed out so far.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.next
    }

    /// Which backing is in use.
    #[must_use]
    pub fn backing(&self) -> GlyphGeometryBacking {
        match self.backing {
            GeometryBacking::TextureBuffer(_) => GlyphGeometryBacking::TextureBuffer,
            GeometryBacking::StorageBuffer(_) => GlyphGeometryBacking::StorageBuffer,
            GeometryBacking::ArrayTexture { .. } => GlyphGeometryBacking::ArrayTexture,
        }
    }

    /// `(log2_width, log2_height)` for an array-texture backing.
    #[must_use]
    pub fn array_log2_dimensions(&self) -> Option<(u32, u32)> {
        match self.backing {
            GeometryBacking::ArrayTexture {
                log2_width,
                log2_height,
                ..
            } => Some((log2_width, log2_height)),
            _ => None,
        }
    }

    /// Reserve `count` consecutive elements, growing the store if needed,
    /// and return the offset of the first.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the element count overflows the
    /// 32-bit offset space or the store cannot grow far enough. Nothing is
    /// reserved in that case.
    pub fn allocate(&mut self, count: u32) -> Result<u32> {
        let offset = self.next;
        let end = offset.checked_add(count).ok_or_else(|| {
            Self::exhausted(self.alignment, self.capacity, u64::from(offset) + u64::from(count))
        })?;
        if end > self.capacity {
            self.grow(end)?;
        }
        self.next = end;
        Ok(offset)
    }

    fn exhausted(alignment: u32, capacity: u32, elements: u64) -> Error {
        let bytes = elements.saturating_mul(u64::from(alignment) * 4);
        tracing::warn!(elements, capacity, "glyph geometry store exhausted");
        Error::ResourceExhausted {
            what: "glyph geometry",
            bytes: usize::try_from(bytes).unwrap_or(usize::MAX),
        }
    }

    fn grow(&mut self, required: u32) -> Result<()> {
        let capacity = match &mut self.backing {
            GeometryBacking::TextureBuffer(store) | GeometryBacking::StorageBuffer(store) => {
                let capacity = required
                    .checked_next_power_of_two()
                    .map(|c| c.max(self.capacity.saturating_mul(2)))
                    .ok_or_else(|| Self::exhausted(self.alignment, self.capacity, u64::from(required)))?;
                store.resize(capacity as usize * self.alignment as usize * 4);
                capacity
            }
            GeometryBacking::ArrayTexture {
                store,
                log2_width,
                log2_height,
                max_layers,
            } => {
                let per_layer = 1u32 << (*log2_width + *log2_height);
                let layers = required.div_ceil(per_layer);
                let current = store.desc().layers;
                let capacity = layers.max(current).checked_mul(per_layer);
                let Some(capacity) = capacity.filter(|_| layers <= *max_layers) else {
                    return Err(Self::exhausted(self.alignment, self.capacity, u64::from(required)));
                };
                store.add_layers(layers.saturating_sub(current));
                capacity
            }
        };
        self.capacity = capacity;
        tracing::debug!(capacity, "glyph geometry store grew");
        Ok(())
    }

    /// Write `values` (a whole number of elements) starting at element
    /// `offset`.
    ///
    /// # Errors
    ///
    /// See [`BufferStore::set_data`] and [`TextureStore::set_data`].
    pub fn set_values(&mut self, offset: u32, values: &[f32]) -> Result<()> {
        let alignment = self.alignment as usize;
        debug_assert_eq!(values.len() % alignment, 0, "values are not whole elements");
        let count = u32::try_from(values.len() / alignment).unwrap_or(u32::MAX);
        debug_assert!(offset + count <= self.next, "write past allocated geometry");
        let bytes: &[u8] = bytemuck::cast_slice(values);
        match &mut self.backing {
            GeometryBacking::TextureBuffer(store) | GeometryBacking::StorageBuffer(store) => {
                store.set_data(offset as usize * alignment * 4, bytes)
            }
            GeometryBacking::ArrayTexture {
                store,
                log2_width,
                log2_height,
                ..
            } => {
                let width = 1u32 << *log2_width;
                let mut element = offset;
                let mut consumed = 0usize;
                while element < offset + count {
                    let (x, y, layer) = unpack_offset(element, *log2_width, *log2_height);
                    let run = (width - x).min(offset + count - element);
                    let len = run as usize * alignment * 4;
                    let region = TextureRegion {
                        level: 0,
                        x,
                        y,
                        layer,
                        width: run,
                        height: 1,
                        layers: 1,
                    };
                    store.set_data(&region, &bytes[consumed..consumed + len])?;
                    consumed += len;
                    element += run;
                }
                Ok(())
            }
        }
    }

    /// Binding for the current backing, after a flush.
    pub fn binding(&mut self) -> Option<GeometryBinding<D::Texture, D::Buffer>> {
        let format = TexelFormat::uint_with_components(self.alignment);
        match &mut self.backing {
            GeometryBacking::TextureBuffer(store) => store
                .texture_view(format)
                .map(|t| GeometryBinding::Texture(t, TextureKind::Buffer)),
            GeometryBacking::StorageBuffer(store) => Some(GeometryBinding::StorageBuffer(store.handle())),
            GeometryBacking::ArrayTexture { store, .. } => {
                Some(GeometryBinding::Texture(store.handle(), TextureKind::Array2D))
            }
        }
    }

    /// Apply pending growth and writes.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a
    /// reallocation fails.
    pub fn flush(&mut self) -> Result<()> {
        match &mut self.backing {
            GeometryBacking::TextureBuffer(store) | GeometryBacking::StorageBuffer(store) => store.flush(),
            GeometryBacking::ArrayTexture { store, .. } => store.flush(),
        }
    }
}

/// One generated glyph, ready for upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphRecord {
    /// Texel tile width (0 for glyphs without texels).
    pub width: u32,
    /// Texel tile height.
    pub height: u32,
    /// `width * height` texels, row-major.
    pub texels: Vec<u8>,
    /// Geometry values, a whole number of elements.
    pub geometry: Vec<f32>,
}

/// Where an uploaded glyph ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphLocation {
    /// Texel tile, if the glyph has texels.
    pub texels: Option<TexelLocation>,
    /// First geometry element.
    pub geometry_offset: u32,
    /// Number of geometry elements.
    pub geometry_len: u32,
}

/// Texel store and geometry store together.
pub struct GlyphAtlas<D: Device> {
    texels: GlyphTexelStore<D>,
    geometry: GlyphGeometryStore<D>,
}

impl<D: Device> GlyphAtlas<D> {
    /// Build both stores.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if
    /// either store cannot be allocated.
    pub fn new(
        device: &Rc<D>,
        caps: &CapabilitySnapshot,
        backing: GlyphGeometryBacking,
        params: &GlyphAtlasParams,
    ) -> Result<Self> {
        let texels = GlyphTexelStore::new(
            device,
            params.texel_width,
            params.texel_height,
            params.texel_layers,
            caps.limits().max_array_texture_layers,
            params.delayed,
        )?;
        let geometry = GlyphGeometryStore::new(
            device,
            caps,
            backing,
            params.geometry_alignment,
            params.geometry_elements,
            params.delayed,
        )?;
        tracing::debug!(
            backing = %backing,
            alignment = geometry.alignment(),
            "created glyph atlas"
        );
        Ok(Self { texels, geometry })
    }

    /// The texel store.
    pub fn texels(&mut self) -> &mut GlyphTexelStore<D> {
        &mut self.texels
    }

    /// The geometry store.
    pub fn geometry(&mut self) -> &mut GlyphGeometryStore<D> {
        &mut self.geometry
    }

    /// Place and write one glyph.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if the glyph does not fit the texel or
    /// geometry store. Otherwise propagates store write failures.
    pub fn upload(&mut self, record: &GlyphRecord) -> Result<GlyphLocation> {
        let texels = if record.width > 0 && record.height > 0 {
            debug_assert_eq!(record.texels.len(), (record.width * record.height) as usize);
            let location = self.texels.allocate(record.width, record.height)?;
            self.texels.upload(&location, &record.texels)?;
            Some(location)
        } else {
            None
        };

        let alignment = self.geometry.alignment() as usize;
        let mut geometry = std::borrow::Cow::Borrowed(record.geometry.as_slice());
        if geometry.len() % alignment != 0 {
            // A storage-buffer backing may widen the element; pad the tail.
            let padded = geometry.len().div_ceil(alignment) * alignment;
            geometry.to_mut().resize(padded, 0.0);
        }
        let geometry_len = u32::try_from(geometry.len() / alignment).unwrap_or(u32::MAX);
        let geometry_offset = self.geometry.allocate(geometry_len)?;
        if geometry_len > 0 {
            self.geometry.set_values(geometry_offset, &geometry)?;
        }

        Ok(GlyphLocation {
            texels,
            geometry_offset,
            geometry_len,
        })
    }

    /// Place and write many glyphs, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing upload.
    pub fn upload_all(&mut self, records: &[GlyphRecord]) -> Result<Vec<GlyphLocation>> {
        records.iter().map(|r| self.upload(r)).collect()
    }

    /// Apply pending writes to both stores.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a
    /// reallocation fails.
    pub fn flush(&mut self) -> Result<()> {
        self.texels.flush()?;
        self.geometry.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::device::EntryPoints;

    fn caps(device: &MockDevice) -> CapabilitySnapshot {
        CapabilitySnapshot::query(device).unwrap()
    }

    #[test]
    fn unpacks_offset_past_first_layer() {
        assert_eq!(unpack_offset(1_048_577, 10, 10), (1, 0, 1));
        assert_eq!(unpack_offset(1023, 10, 10), (1023, 0, 0));
        assert_eq!(unpack_offset(1024, 10, 10), (0, 1, 0));
    }

    #[test]
    fn array_backed_write_lands_at_unpacked_texel() {
        let device = Rc::new(MockDevice::new());
        let mut store = GlyphGeometryStore::with_array_dimensions(&device, 4, (10, 10), 1, 2048, true).unwrap();
        let offset = store.allocate(1_048_578).unwrap();
        assert_eq!(offset, 0);
        store.set_values(1_048_577, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        store.flush().unwrap();

        let Some(GeometryBinding::Texture(texture, TextureKind::Array2D)) = store.binding() else {
            panic!("array backing binds a 2D array texture");
        };
        assert_eq!(device.texture_desc(texture).layers, 2);
        let texel = device.texel(texture, 1, 0, 1);
        let expected: &[u8] = bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]);
        assert_eq!(texel, expected);
    }

    #[test]
    fn array_writes_wrap_rows() {
        let device = Rc::new(MockDevice::new());
        let mut store = GlyphGeometryStore::with_array_dimensions(&device, 1, (2, 1), 1, 2048, false).unwrap();
        store.allocate(3).unwrap();
        store.set_values(1, &[5.0, 6.0]).unwrap();
        let Some(GeometryBinding::Texture(texture, _)) = store.binding() else {
            panic!("array backing binds a texture");
        };
        assert_eq!(device.texel(texture, 1, 0, 0), 5.0f32.to_le_bytes().to_vec());
        assert_eq!(device.texel(texture, 0, 1, 0), 6.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn array_dimensions_prefer_width_then_layers() {
        assert_eq!(array_dimensions(1000, 2048, 256), (10, 0, 1));
        assert_eq!(array_dimensions(8192, 2048, 256), (11, 0, 4));
        let (log2_w, log2_h, layers) = array_dimensions(1 << 22, 2048, 256);
        assert_eq!((log2_w, log2_h), (11, 3));
        assert!(layers <= 256);
        assert!(layers << (log2_w + log2_h) >= 1 << 22);
    }

    #[test]
    fn storage_buffer_forces_alignment_four() {
        let device = Rc::new(MockDevice::new());
        let caps = caps(&device);
        let store = GlyphGeometryStore::new(
            &device,
            &caps,
            GlyphGeometryBacking::StorageBuffer,
            2,
            16,
            true,
        )
        .unwrap();
        assert_eq!(store.alignment(), 4);
    }

    #[test]
    fn buffer_backing_grows_and_keeps_offsets() {
        let device = Rc::new(MockDevice::new());
        let caps = caps(&device);
        let mut store = GlyphGeometryStore::new(
            &device,
            &caps,
            GlyphGeometryBacking::TextureBuffer,
            2,
            2,
            true,
        )
        .unwrap();
        let a = store.allocate(2).unwrap();
        store.set_values(a, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = store.allocate(5).unwrap();
        store.set_values(b, &[9.0; 10]).unwrap();
        store.flush().unwrap();
        assert_eq!((a, b), (0, 2));
        assert!(store.capacity() >= 7);

        let Some(GeometryBinding::Texture(view, TextureKind::Buffer)) = store.binding() else {
            panic!("texture buffer backing binds a buffer texture");
        };
        let bytes = device.texture_contents(view, 0);
        let values: &[f32] = bytemuck::cast_slice(&bytes[..14 * 4]);
        assert_eq!(&values[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&values[4..14], &[9.0; 10]);
    }

    #[test]
    fn texel_allocations_are_stable_across_growth() {
        let device = Rc::new(MockDevice::new());
        let mut store = GlyphTexelStore::new(&device, 16, 16, 1, 2048, true).unwrap();
        let first = store.allocate(12, 12).unwrap();
        let second = store.allocate(12, 12).unwrap();
        assert_eq!(first.layer, 0);
        assert_eq!(second.layer, 1);
        assert_eq!(store.layers(), 2);

        store.upload(&first, &[3; 144]).unwrap();
        store.upload(&second, &[4; 144]).unwrap();
        store.flush().unwrap();
        store.add_layers(2);
        store.flush().unwrap();

        let texture = store.integer_view();
        assert_eq!(device.texel(texture, first.x, first.y, 0), vec![3]);
        assert_eq!(device.texel(texture, second.x, second.y, 1), vec![4]);
        // Border around the tile stays zero.
        assert_eq!(device.texel(texture, 0, 0, 0), vec![0]);
        assert_eq!(device.texel(texture, first.x + 12, first.y, 0), vec![0]);
    }

    #[test]
    fn texel_store_rejects_oversized_glyphs_and_stops_at_layer_limit() {
        let device = Rc::new(MockDevice::new());
        let mut store = GlyphTexelStore::new(&device, 16, 16, 1, 1, true).unwrap();
        assert!(matches!(
            store.allocate(20, 4),
            Err(Error::ResourceExhausted { what: "glyph texel tile", .. })
        ));
        store.allocate(12, 12).unwrap();
        assert!(matches!(
            store.allocate(12, 12),
            Err(Error::ResourceExhausted { what: "glyph texel layer", .. })
        ));
        assert_eq!(store.layers(), 1);
        store.add_layers(3);
        assert_eq!(store.layers(), 1);
    }

    #[test]
    fn array_geometry_stops_at_layer_limit() {
        let device = Rc::new(MockDevice::new());
        let mut store = GlyphGeometryStore::with_array_dimensions(&device, 1, (2, 1), 1, 2, true).unwrap();
        assert_eq!(store.allocate(8).unwrap(), 0);
        assert_eq!(store.allocate(8).unwrap(), 8);
        assert!(matches!(store.allocate(1), Err(Error::ResourceExhausted { .. })));
        assert_eq!(store.allocated(), 16);
        assert_eq!(store.capacity(), 16);
    }

    #[test]
    fn geometry_offsets_never_wrap() {
        let device = Rc::new(MockDevice::new());
        let caps = caps(&device);
        let mut store = GlyphGeometryStore::new(
            &device,
            &caps,
            GlyphGeometryBacking::TextureBuffer,
            1,
            4,
            true,
        )
        .unwrap();
        store.allocate(3).unwrap();
        assert!(matches!(store.allocate(u32::MAX), Err(Error::ResourceExhausted { .. })));
        assert!(matches!(store.allocate(u32::MAX - 3), Err(Error::ResourceExhausted { .. })));
        assert_eq!(store.allocated(), 3);
        assert_eq!(store.allocate(1).unwrap(), 3);
    }

    #[test]
    fn atlas_reports_glyphs_that_cannot_fit() {
        let device = Rc::new(MockDevice::new());
        let caps = caps(&device);
        let params = GlyphAtlasParams {
            texel_width: 8,
            texel_height: 8,
            texel_layers: 1,
            geometry_alignment: 4,
            geometry_elements: 4,
            delayed: true,
        };
        let mut atlas =
            GlyphAtlas::new(&device, &caps, GlyphGeometryBacking::StorageBuffer, &params).unwrap();
        let oversized = GlyphRecord {
            width: 9,
            height: 2,
            texels: vec![1; 18],
            geometry: vec![0.5; 4],
        };
        assert!(matches!(atlas.upload(&oversized), Err(Error::ResourceExhausted { .. })));
        assert_eq!(atlas.geometry().allocated(), 0);
    }

    #[test]
    fn float_view_needs_texture_views() {
        let info = crate::caps::ContextInfo::new(crate::caps::GlVersion::gl(3, 3));
        let device = Rc::new(MockDevice::with_info(info, EntryPoints::empty()));
        let mut store = GlyphTexelStore::new(&device, 8, 8, 1, 2048, false).unwrap();
        assert!(store.float_view().is_none());
    }

    #[test]
    fn atlas_uploads_records_in_order() {
        let device = Rc::new(MockDevice::new());
        let caps = caps(&device);
        let params = GlyphAtlasParams {
            texel_width: 32,
            texel_height: 32,
            texel_layers: 1,
            geometry_alignment: 4,
            geometry_elements: 4,
            delayed: true,
        };
        let mut atlas =
            GlyphAtlas::new(&device, &caps, GlyphGeometryBacking::StorageBuffer, &params).unwrap();
        let records = vec![
            GlyphRecord {
                width: 2,
                height: 2,
                texels: vec![1, 2, 3, 4],
                geometry: vec![0.5; 4],
            },
            GlyphRecord {
                geometry: vec![0.25; 6],
                ..GlyphRecord::default()
            },
        ];
        let locations = atlas.upload_all(&records).unwrap();
        atlas.flush().unwrap();
        assert!(locations[0].texels.is_some());
        assert_eq!(locations[0].geometry_offset, 0);
        assert!(locations[1].texels.is_none());
        assert_eq!(locations[1].geometry_offset, 1);
        assert_eq!(locations[1].geometry_len, 2);
    }
}
