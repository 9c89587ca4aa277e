//! Growable GPU buffers and textures with optionally delayed writes.
//!
//! A store has a *logical* size, changed by `resize`, and an *allocated*
//! size, which only catches up in `flush`. Several resizes in one frame
//! therefore cost a single reallocation. On reallocation the overlapping
//! prefix is copied GPU-side; the rest of the new resource is zero.
//!
//! When a store is delayed, `set_data` copies the payload into a queue and
//! `flush` replays the queue in order. Immediate stores upload at once,
//! reallocating first if a resize is pending. Either way the resource may
//! only be read by a draw after `flush`.

use std::rc::Rc;

use crate::device::{BufferTarget, BufferUsage, Device, TexelFormat, TextureDesc, TextureRegion};
use crate::error::Result;

/// Writes recorded by a delayed store, in submission order.
#[derive(Debug)]
struct PendingWrites<R> {
    writes: Vec<(R, Vec<u8>)>,
}

impl<R> PendingWrites<R> {
    fn new() -> Self {
        Self { writes: Vec::new() }
    }

    fn push(&mut self, location: R, data: &[u8]) {
        self.writes.push((location, data.to_vec()));
    }

    fn take(&mut self) -> Vec<(R, Vec<u8>)> {
        std::mem::take(&mut self.writes)
    }

    fn len(&self) -> usize {
        self.writes.len()
    }
}

/// A resizable buffer object.
pub struct BufferStore<D: Device> {
    device: Rc<D>,
    target: BufferTarget,
    usage: BufferUsage,
    buffer: D::Buffer,
    allocated: usize,
    size: usize,
    delayed: bool,
    pending: PendingWrites<usize>,
    texture_view: Option<(TexelFormat, D::Texture)>,
}

impl<D: Device> BufferStore<D> {
    /// Allocate a zero-filled store of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if the
    /// device cannot allocate it.
    pub fn new(
        device: &Rc<D>,
        target: BufferTarget,
        size: usize,
        usage: BufferUsage,
        delayed: bool,
    ) -> Result<Self> {
        let buffer = device.create_buffer(target, size, usage)?;
        Ok(Self {
            device: Rc::clone(device),
            target,
            usage,
            buffer,
            allocated: size,
            size,
            delayed,
            pending: PendingWrites::new(),
            texture_view: None,
        })
    }

    /// Logical size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether writes wait for [`flush`](Self::flush).
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.delayed
    }

    /// Whether writes or a resize are waiting for [`flush`](Self::flush).
    #[must_use]
    pub fn needs_flush(&self) -> bool {
        self.pending.len() > 0 || self.size != self.allocated
    }

    /// The current buffer object. Only valid for reading after
    /// [`flush`](Self::flush); replaced on reallocation.
    #[must_use]
    pub fn handle(&self) -> D::Buffer {
        self.buffer
    }

    /// Binding target the store was created for.
    #[must_use]
    pub fn target(&self) -> BufferTarget {
        self.target
    }

    /// Write `data` at byte `offset`.
    ///
    /// # Errors
    ///
    /// An immediate store with a pending resize reallocates first and may
    /// fail with [`Error::ResourceExhausted`](crate::Error::ResourceExhausted).
    pub fn set_data(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        debug_assert!(
            offset + data.len() <= self.size,
            "write [{offset}, {}) outside buffer of {} bytes",
            offset + data.len(),
            self.size
        );
        if self.delayed {
            self.pending.push(offset, data);
            return Ok(());
        }
        self.reallocate_if_needed()?;
        self.device
            .buffer_sub_data(self.buffer, self.target, offset, data);
        Ok(())
    }

    /// Change the logical size; the reallocation waits for the next flush.
    pub fn resize(&mut self, new_size: usize) {
        self.size = new_size;
    }

    /// Apply a pending resize and all queued writes.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if the
    /// reallocation fails; the old resource and queue are left intact.
    pub fn flush(&mut self) -> Result<()> {
        self.reallocate_if_needed()?;
        for (offset, data) in self.pending.take() {
            // Writes past a later shrink are dropped.
            let end = (offset + data.len()).min(self.size);
            if offset < end {
                self.device
                    .buffer_sub_data(self.buffer, self.target, offset, &data[..end - offset]);
            }
        }
        Ok(())
    }

    /// The buffer exposed as a texture buffer of `format`, created on
    /// demand and recreated after every reallocation. `None` when the
    /// device has no texture buffers.
    pub fn texture_view(&mut self, format: TexelFormat) -> Option<D::Texture> {
        match self.texture_view {
            Some((cached, texture)) if cached == format => return Some(texture),
            Some((_, texture)) => self.device.delete_texture(texture),
            None => {}
        }
        self.texture_view = self
            .device
            .create_buffer_texture(self.buffer, format)
            .map(|texture| (format, texture));
        self.texture_view.map(|(_, texture)| texture)
    }

    fn reallocate_if_needed(&mut self) -> Result<()> {
        if self.size == self.allocated {
            return Ok(());
        }
        let replacement = self
            .device
            .create_buffer(self.target, self.size, self.usage)?;
        let preserved = self.allocated.min(self.size);
        if preserved > 0 {
            self.device
                .copy_buffer(self.buffer, replacement, 0, 0, preserved);
        }
        tracing::debug!(
            from = self.allocated,
            to = self.size,
            preserved,
            target = ?self.target,
            "reallocated buffer store"
        );
        self.device.delete_buffer(self.buffer);
        if let Some((_, texture)) = self.texture_view.take() {
            self.device.delete_texture(texture);
        }
        self.buffer = replacement;
        self.allocated = self.size;
        Ok(())
    }
}

impl<D: Device> Drop for BufferStore<D> {
    fn drop(&mut self) {
        if let Some((_, texture)) = self.texture_view.take() {
            self.device.delete_texture(texture);
        }
        self.device.delete_buffer(self.buffer);
    }
}

/// A resizable texture (2D or 2D array, any number of mip levels).
pub struct TextureStore<D: Device> {
    device: Rc<D>,
    allocated: TextureDesc,
    logical: TextureDesc,
    texture: D::Texture,
    delayed: bool,
    pending: PendingWrites<TextureRegion>,
    views: Vec<(TexelFormat, D::Texture)>,
}

impl<D: Device> TextureStore<D> {
    /// Allocate a zero-filled texture.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if the
    /// device cannot allocate it.
    pub fn new(device: &Rc<D>, desc: TextureDesc, delayed: bool) -> Result<Self> {
        let texture = device.create_texture(&desc)?;
        Ok(Self {
            device: Rc::clone(device),
            allocated: desc,
            logical: desc,
            texture,
            delayed,
            pending: PendingWrites::new(),
            views: Vec::new(),
        })
    }

    /// Logical description (dimensions after pending resizes).
    #[must_use]
    pub fn desc(&self) -> &TextureDesc {
        &self.logical
    }

    /// Whether writes wait for [`flush`](Self::flush).
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.delayed
    }

    /// The current texture object; replaced on reallocation.
    #[must_use]
    pub fn handle(&self) -> D::Texture {
        self.texture
    }

    /// Write texels into `region`.
    ///
    /// # Errors
    ///
    /// An immediate store with a pending resize reallocates first and may
    /// fail with [`Error::ResourceExhausted`](crate::Error::ResourceExhausted).
    pub fn set_data(&mut self, region: &TextureRegion, data: &[u8]) -> Result<()> {
        debug_assert!(self.contains(region), "{region:?} outside {:?}", self.logical);
        debug_assert_eq!(data.len(), region.byte_len(self.logical.format));
        if self.delayed {
            self.pending.push(*region, data);
            return Ok(());
        }
        self.reallocate_if_needed()?;
        self.device
            .texture_sub_image(self.texture, &self.allocated, region, data);
        Ok(())
    }

    /// Change the logical dimensions; the reallocation waits for the next
    /// flush.
    pub fn resize(&mut self, width: u32, height: u32, layers: u32) {
        self.logical.width = width;
        self.logical.height = height;
        self.logical.layers = layers;
    }

    /// Grow by `count` layers.
    pub fn add_layers(&mut self, count: u32) {
        self.logical.layers += count;
    }

    /// Apply a pending resize and all queued writes.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if the
    /// reallocation fails.
    pub fn flush(&mut self) -> Result<()> {
        self.reallocate_if_needed()?;
        for (region, data) in self.pending.take() {
            if self.contains(&region) {
                self.device
                    .texture_sub_image(self.texture, &self.allocated, &region, &data);
            }
        }
        Ok(())
    }

    /// Regenerate mip levels from level 0 (after a flush).
    pub fn generate_mipmaps(&self) {
        if self.allocated.levels > 1 {
            self.device.generate_mipmaps(self.texture, &self.allocated);
        }
    }

    /// The storage aliased as `format`, created on demand and recreated
    /// after every reallocation. `None` when texture views are unsupported.
    pub fn view(&mut self, format: TexelFormat) -> Option<D::Texture> {
        if let Some((_, texture)) = self.views.iter().find(|(f, _)| *f == format) {
            return Some(*texture);
        }
        let texture = self
            .device
            .create_texture_view(self.texture, &self.allocated, format)?;
        self.views.push((format, texture));
        Some(texture)
    }

    fn contains(&self, region: &TextureRegion) -> bool {
        let (w, h) = self.logical.level_extent(region.level);
        region.level < self.logical.levels
            && region.x + region.width <= w
            && region.y + region.height <= h
            && region.layer + region.layers <= self.logical.layers
    }

    fn reallocate_if_needed(&mut self) -> Result<()> {
        if self.logical == self.allocated {
            return Ok(());
        }
        let replacement = self.device.create_texture(&self.logical)?;
        let layers = self.allocated.layers.min(self.logical.layers);
        for level in 0..self.allocated.levels.min(self.logical.levels) {
            let (old_w, old_h) = self.allocated.level_extent(level);
            let (new_w, new_h) = self.logical.level_extent(level);
            let region = TextureRegion {
                level,
                x: 0,
                y: 0,
                layer: 0,
                width: old_w.min(new_w),
                height: old_h.min(new_h),
                layers,
            };
            if layers > 0 {
                self.device
                    .copy_texture(self.texture, replacement, &self.allocated, &region);
            }
        }
        tracing::debug!(
            from = ?(self.allocated.width, self.allocated.height, self.allocated.layers),
            to = ?(self.logical.width, self.logical.height, self.logical.layers),
            format = ?self.logical.format,
            "reallocated texture store"
        );
        self.device.delete_texture(self.texture);
        for (_, view) in self.views.drain(..) {
            self.device.delete_texture(view);
        }
        self.texture = replacement;
        self.allocated = self.logical;
        Ok(())
    }
}

impl<D: Device> Drop for TextureStore<D> {
    fn drop(&mut self) {
        for (_, view) in self.views.drain(..) {
            self.device.delete_texture(view);
        }
        self.device.delete_texture(self.texture);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::device::{Filter, TextureKind};
    use crate::error::Error;

    /// Deterministic xorshift so write sequences are reproducible.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    fn random_writes(seed: u64, size: usize) -> Vec<(usize, Vec<u8>)> {
        let mut rng = Rng(seed);
        (0..64)
            .map(|_| {
                let offset = rng.below(size);
                let len = 1 + rng.below((size - offset).min(32));
                let data = (0..len).map(|_| rng.next() as u8).collect();
                (offset, data)
            })
            .collect()
    }

    #[test]
    fn delayed_and_immediate_buffers_agree() {
        let device = Rc::new(MockDevice::new());
        let writes = random_writes(0x9e37_79b9, 256);
        let mut contents = Vec::new();
        for delayed in [false, true] {
            let mut store =
                BufferStore::new(&device, BufferTarget::Array, 256, BufferUsage::Static, delayed)
                    .unwrap();
            for (offset, data) in &writes {
                store.set_data(*offset, data).unwrap();
            }
            store.flush().unwrap();
            contents.push(device.buffer_contents(store.handle()));
        }
        assert_eq!(contents[0], contents[1]);

        let mut expected = vec![0u8; 256];
        for (offset, data) in &writes {
            expected[*offset..*offset + data.len()].copy_from_slice(data);
        }
        assert_eq!(contents[0], expected);
    }

    #[test]
    fn delayed_writes_are_invisible_until_flush() {
        let device = Rc::new(MockDevice::new());
        let mut store =
            BufferStore::new(&device, BufferTarget::Uniform, 16, BufferUsage::Static, true).unwrap();
        store.set_data(0, &[1, 2, 3, 4]).unwrap();
        assert!(store.needs_flush());
        assert_eq!(device.buffer_contents(store.handle()), vec![0; 16]);
        store.flush().unwrap();
        assert!(!store.needs_flush());
        assert_eq!(&device.buffer_contents(store.handle())[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn resize_preserves_prefix_and_zero_fills() {
        let device = Rc::new(MockDevice::new());
        let mut store =
            BufferStore::new(&device, BufferTarget::Array, 8, BufferUsage::Static, true).unwrap();
        store.set_data(0, &[9; 8]).unwrap();
        store.flush().unwrap();

        store.resize(12);
        store.resize(16);
        store.flush().unwrap();
        let grown = device.buffer_contents(store.handle());
        assert_eq!(&grown[..8], &[9; 8]);
        assert_eq!(&grown[8..], &[0; 8]);
        // Two resizes in one frame, one reallocation.
        assert_eq!(device.buffer_lifetimes(), (2, 1));

        store.resize(4);
        store.flush().unwrap();
        assert_eq!(device.buffer_contents(store.handle()), vec![9; 4]);
    }

    #[test]
    fn immediate_write_after_resize_reallocates_first() {
        let device = Rc::new(MockDevice::new());
        let mut store =
            BufferStore::new(&device, BufferTarget::Array, 4, BufferUsage::Static, false).unwrap();
        store.set_data(0, &[1, 1, 1, 1]).unwrap();
        store.resize(8);
        store.set_data(4, &[2, 2, 2, 2]).unwrap();
        assert_eq!(
            device.buffer_contents(store.handle()),
            vec![1, 1, 1, 1, 2, 2, 2, 2]
        );
    }

    #[test]
    fn failed_reallocation_reports_exhaustion() {
        let device = Rc::new(MockDevice::new().with_allocation_limit(1024));
        let mut store =
            BufferStore::new(&device, BufferTarget::Array, 512, BufferUsage::Static, true).unwrap();
        store.set_data(0, &[5; 4]).unwrap();
        store.resize(4096);
        let err = store.flush().unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { bytes: 4096, .. }));
    }

    #[test]
    fn texture_view_is_recreated_after_reallocation() {
        let device = Rc::new(MockDevice::new());
        let mut store =
            BufferStore::new(&device, BufferTarget::Texture, 64, BufferUsage::Static, true).unwrap();
        let first = store.texture_view(TexelFormat::Rgba32Ui).unwrap();
        assert_eq!(store.texture_view(TexelFormat::Rgba32Ui), Some(first));
        store.resize(128);
        store.flush().unwrap();
        assert!(!device.texture_exists(first));
        let second = store.texture_view(TexelFormat::Rgba32Ui).unwrap();
        assert_ne!(first, second);
    }

    fn array_desc(layers: u32) -> TextureDesc {
        TextureDesc {
            kind: TextureKind::Array2D,
            format: TexelFormat::R8Ui,
            width: 4,
            height: 4,
            layers,
            levels: 1,
            filter: Filter::Nearest,
        }
    }

    #[test]
    fn texture_add_layers_keeps_existing_texels() {
        let device = Rc::new(MockDevice::new());
        let mut store = TextureStore::new(&device, array_desc(1), true).unwrap();
        let region = TextureRegion {
            level: 0,
            x: 1,
            y: 1,
            layer: 0,
            width: 2,
            height: 2,
            layers: 1,
        };
        store.set_data(&region, &[1, 2, 3, 4]).unwrap();
        store.add_layers(2);
        store
            .set_data(
                &TextureRegion {
                    layer: 2,
                    ..region
                },
                &[7, 7, 7, 7],
            )
            .unwrap();
        store.flush().unwrap();

        let texture = store.handle();
        assert_eq!(device.texture_desc(texture).layers, 3);
        assert_eq!(device.texel(texture, 1, 1, 0), vec![1]);
        assert_eq!(device.texel(texture, 2, 2, 0), vec![4]);
        assert_eq!(device.texel(texture, 1, 1, 1), vec![0]);
        assert_eq!(device.texel(texture, 2, 2, 2), vec![7]);
    }

    #[test]
    fn texture_views_follow_reallocation() {
        let device = Rc::new(MockDevice::new());
        let mut store = TextureStore::new(&device, array_desc(1), false).unwrap();
        let view = store.view(TexelFormat::R8).unwrap();
        store.add_layers(1);
        store.flush().unwrap();
        assert!(!device.texture_exists(view));
        assert!(store.view(TexelFormat::R8).is_some());
    }

    #[test]
    fn dropping_a_store_releases_its_objects() {
        let device = Rc::new(MockDevice::new());
        {
            let mut store = TextureStore::new(&device, array_desc(1), false).unwrap();
            store.view(TexelFormat::R8).unwrap();
        }
        let (created, deleted) = device.texture_lifetimes();
        assert_eq!(created, deleted);
    }
}
