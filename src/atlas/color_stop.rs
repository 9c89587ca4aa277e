//! Color-stop atlas: discretized gradient ramps in a 2D array texture.
//!
//! Every layer is one row of `width` RGBA8 texels. A ramp occupies a
//! contiguous interval of one row and is looked up at draw time as
//! `(layer, start, width)`. The atlas grows by layers; its width is fixed.

use std::rc::Rc;

use crate::backing::TextureStore;
use crate::caps::CapabilitySnapshot;
use crate::config::ColorStopAtlasParams;
use crate::device::{Device, Filter, TexelFormat, TextureDesc, TextureKind, TextureRegion};
use crate::error::Result;

/// A color at a place along a gradient, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    /// Position along the ramp.
    pub place: f32,
    /// Non-premultiplied RGBA.
    pub color: [u8; 4],
}

impl ColorStop {
    /// A stop at `place`.
    #[must_use]
    pub const fn new(place: f32, color: [u8; 4]) -> Self {
        Self { place, color }
    }
}

/// An ordered list of color stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorStopSequence {
    stops: Vec<ColorStop>,
}

impl ColorStopSequence {
    /// Build a sequence, sorting the stops by place.
    #[must_use]
    pub fn new(mut stops: Vec<ColorStop>) -> Self {
        stops.sort_by(|a, b| a.place.total_cmp(&b.place));
        Self { stops }
    }

    /// The stops, sorted by place.
    #[must_use]
    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Color at `t`, interpolated linearly between the bracketing stops
    /// and clamped to the end stops outside them.
    #[must_use]
    pub fn sample(&self, t: f32) -> [u8; 4] {
        let (Some(first), Some(last)) = (self.stops.first(), self.stops.last()) else {
            return [0; 4];
        };
        if t <= first.place {
            return first.color;
        }
        if t >= last.place {
            return last.color;
        }
        let after = self.stops.partition_point(|s| s.place <= t);
        let (a, b) = (&self.stops[after - 1], &self.stops[after]);
        let span = b.place - a.place;
        let f = if span > 0.0 { (t - a.place) / span } else { 0.0 };
        std::array::from_fn(|c| {
            let (from, to) = (f32::from(a.color[c]), f32::from(b.color[c]));
            (from + (to - from) * f).round().clamp(0.0, 255.0) as u8
        })
    }

    /// `texels` RGBA8 texels sampled evenly from place 0 to place 1.
    #[must_use]
    pub fn discretize(&self, texels: u32) -> Vec<u8> {
        let last = texels.saturating_sub(1).max(1) as f32;
        (0..texels)
            .flat_map(|i| self.sample(i as f32 / last))
            .collect()
    }
}

/// A ramp's place in the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorStopLocation {
    /// Layer (row) of the ramp.
    pub layer: u32,
    /// First texel.
    pub start: u32,
    /// Number of texels.
    pub width: u32,
}

/// Free intervals of one row, sorted and non-adjacent.
#[derive(Debug, Clone)]
struct FreeIntervals {
    free: Vec<(u32, u32)>,
}

impl FreeIntervals {
    fn new(width: u32) -> Self {
        Self {
            free: vec![(0, width)],
        }
    }

    fn allocate(&mut self, width: u32) -> Option<u32> {
        let slot = self.free.iter().position(|&(_, len)| len >= width)?;
        let (start, len) = self.free[slot];
        if len == width {
            self.free.remove(slot);
        } else {
            self.free[slot] = (start + width, len - width);
        }
        Some(start)
    }

    fn release(&mut self, start: u32, width: u32) {
        let at = self.free.partition_point(|&(s, _)| s < start);
        self.free.insert(at, (start, width));
        // Merge with the right neighbour, then the left.
        if at + 1 < self.free.len() && start + width == self.free[at + 1].0 {
            self.free[at].1 += self.free[at + 1].1;
            self.free.remove(at + 1);
        }
        if at > 0 && self.free[at - 1].0 + self.free[at - 1].1 == start {
            self.free[at - 1].1 += self.free[at].1;
            self.free.remove(at);
        }
    }
}

/// The color-stop atlas.
pub struct ColorStopAtlas<D: Device> {
    store: TextureStore<D>,
    rows: Vec<FreeIntervals>,
}

impl<D: Device> ColorStopAtlas<D> {
    /// Allocate the atlas.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if the
    /// texture cannot be allocated.
    pub fn new(device: &Rc<D>, caps: &CapabilitySnapshot, params: &ColorStopAtlasParams) -> Result<Self> {
        let width = if params.use_max_width {
            caps.limits().max_texture_size
        } else {
            params.width
        };
        let layers = params.layers.max(1);
        let desc = TextureDesc {
            kind: TextureKind::Array2D,
            format: TexelFormat::Rgba8,
            width,
            height: 1,
            layers,
            levels: 1,
            filter: Filter::Linear,
        };
        tracing::debug!(width, layers, "created color-stop atlas");
        Ok(Self {
            store: TextureStore::new(device, desc, params.delayed)?,
            rows: (0..layers).map(|_| FreeIntervals::new(width)).collect(),
        })
    }

    /// Texels per layer.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.store.desc().width
    }

    /// Number of layers.
    #[must_use]
    pub fn layers(&self) -> u32 {
        self.store.desc().layers
    }

    /// The atlas texture (`sampler2DArray`).
    #[must_use]
    pub fn texture(&self) -> D::Texture {
        self.store.handle()
    }

    /// Discretize `sequence` into `discretization` texels and place it.
    ///
    /// A discretization wider than the atlas is clamped to the atlas width.
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub fn add_sequence(
        &mut self,
        sequence: &ColorStopSequence,
        discretization: u32,
    ) -> Result<ColorStopLocation> {
        let width = if discretization > self.width() {
            tracing::warn!(
                discretization,
                width = self.width(),
                "color-stop discretization clamped to atlas width"
            );
            self.width()
        } else {
            discretization.max(1)
        };

        let found = self
            .rows
            .iter_mut()
            .enumerate()
            .find_map(|(layer, row)| row.allocate(width).map(|start| (layer, start)));
        let (layer, start) = match found {
            Some(found) => found,
            None => {
                self.add_layers(1);
                let layer = self.rows.len() - 1;
                let start = self.rows[layer].allocate(width).unwrap_or(0);
                (layer, start)
            }
        };
        let location = ColorStopLocation {
            layer: u32::try_from(layer).unwrap_or(u32::MAX),
            start,
            width,
        };
        let region = TextureRegion {
            level: 0,
            x: start,
            y: 0,
            layer: location.layer,
            width,
            height: 1,
            layers: 1,
        };
        self.store.set_data(&region, &sequence.discretize(width))?;
        Ok(location)
    }

    /// Return a ramp's texels to its layer.
    pub fn release(&mut self, location: ColorStopLocation) {
        self.rows[location.layer as usize].release(location.start, location.width);
    }

    /// Grow by `count` layers.
    pub fn add_layers(&mut self, count: u32) {
        let width = self.width();
        self.store.add_layers(count);
        self.rows.extend((0..count).map(|_| FreeIntervals::new(width)));
        tracing::debug!(layers = self.layers(), "color-stop atlas grew");
    }

    /// Apply pending growth and writes.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a
    /// reallocation fails.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn params(width: u32, layers: u32) -> ColorStopAtlasParams {
        ColorStopAtlasParams {
            width,
            layers,
            use_max_width: false,
            delayed: true,
        }
    }

    #[test]
    fn sample_interpolates_and_clamps() {
        let seq = ColorStopSequence::new(vec![ColorStop::new(0.75, BLUE), ColorStop::new(0.25, RED)]);
        assert_eq!(seq.stops()[0].color, RED);
        assert_eq!(seq.sample(0.0), RED);
        assert_eq!(seq.sample(1.0), BLUE);
        assert_eq!(seq.sample(0.5), [128, 0, 128, 255]);
        assert_eq!(ColorStopSequence::default().sample(0.5), [0; 4]);
    }

    #[test]
    fn discretize_hits_both_ends() {
        let seq = ColorStopSequence::new(vec![ColorStop::new(0.0, RED), ColorStop::new(1.0, BLUE)]);
        let texels = seq.discretize(5);
        assert_eq!(texels.len(), 20);
        assert_eq!(&texels[..4], &RED);
        assert_eq!(&texels[16..], &BLUE);
        assert_eq!(seq.discretize(1), RED.to_vec());
    }

    #[test]
    fn ramps_pack_into_rows_and_grow_by_layers() {
        let device = Rc::new(MockDevice::new());
        let caps = CapabilitySnapshot::query(&*device).unwrap();
        let mut atlas = ColorStopAtlas::new(&device, &caps, &params(8, 1)).unwrap();
        let seq = ColorStopSequence::new(vec![ColorStop::new(0.0, RED), ColorStop::new(1.0, BLUE)]);

        let a = atlas.add_sequence(&seq, 4).unwrap();
        let b = atlas.add_sequence(&seq, 4).unwrap();
        let c = atlas.add_sequence(&seq, 2).unwrap();
        atlas.flush().unwrap();
        assert_eq!((a.layer, a.start), (0, 0));
        assert_eq!((b.layer, b.start), (0, 4));
        assert_eq!((c.layer, c.start), (1, 0));
        assert_eq!(atlas.layers(), 2);

        let texture = atlas.texture();
        assert_eq!(device.texel(texture, 4, 0, 0), RED.to_vec());
        assert_eq!(device.texel(texture, 7, 0, 0), BLUE.to_vec());
        assert_eq!(device.texel(texture, 1, 0, 1), BLUE.to_vec());
    }

    #[test]
    fn released_intervals_merge_and_are_reused() {
        let device = Rc::new(MockDevice::new());
        let caps = CapabilitySnapshot::query(&*device).unwrap();
        let mut atlas = ColorStopAtlas::new(&device, &caps, &params(8, 1)).unwrap();
        let seq = ColorStopSequence::new(vec![ColorStop::new(0.0, RED)]);
        let a = atlas.add_sequence(&seq, 3).unwrap();
        let b = atlas.add_sequence(&seq, 3).unwrap();
        let _c = atlas.add_sequence(&seq, 2).unwrap();
        atlas.release(a);
        atlas.release(b);
        let wide = atlas.add_sequence(&seq, 6).unwrap();
        assert_eq!((wide.layer, wide.start), (0, 0));
        assert_eq!(atlas.layers(), 1);
    }

    #[test]
    fn oversized_discretization_is_clamped() {
        let device = Rc::new(MockDevice::new());
        let caps = CapabilitySnapshot::query(&*device).unwrap();
        let mut atlas = ColorStopAtlas::new(&device, &caps, &params(16, 1)).unwrap();
        let seq = ColorStopSequence::new(vec![ColorStop::new(0.0, RED)]);
        assert_eq!(atlas.add_sequence(&seq, 64).unwrap().width, 16);
    }

    #[test]
    fn max_width_comes_from_the_device() {
        let device = Rc::new(MockDevice::new());
        let caps = CapabilitySnapshot::query(&*device).unwrap();
        let atlas = ColorStopAtlas::new(
            &device,
            &caps,
            &ColorStopAtlasParams {
                use_max_width: true,
                layers: 1,
                ..ColorStopAtlasParams::default()
            },
        )
        .unwrap();
        assert_eq!(atlas.width(), 16384);
    }
}
