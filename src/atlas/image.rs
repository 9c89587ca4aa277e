//! Image atlas: color tiles addressed through index tiles.
//!
//! An image is cut into square color tiles. Each tile carries `slack`
//! texels of its neighbours' pixels on every side so bilinear filtering
//! never reads across a tile seam, and gets its own CPU-built mip chain.
//! Index tiles then map tile coordinates to color tiles, level by level,
//! until a single root tile remains. The number of index levels is the
//! number of lookups a shader performs to reach a color texel.
//!
//! An index texel is `RGBA8UI`: `(tile_x, tile_y, layer & 0xff, layer >> 8)`.

use std::rc::Rc;

use image::{Rgba, RgbaImage};

use crate::backing::TextureStore;
use crate::config::ImageAtlasParams;
use crate::device::{Device, Filter, TexelFormat, TextureDesc, TextureKind, TextureRegion};
use crate::error::{Error, Result};

/// Tile coordinates inside a store (in tiles, not texels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileLocation {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Layer.
    pub layer: u32,
}

impl TileLocation {
    /// The index texel pointing at this tile.
    #[must_use]
    pub fn encode(self) -> [u8; 4] {
        debug_assert!(self.x < 256 && self.y < 256 && self.layer < 1 << 16);
        [
            self.x as u8,
            self.y as u8,
            (self.layer & 0xff) as u8,
            (self.layer >> 8) as u8,
        ]
    }

    /// Inverse of [`encode`](Self::encode).
    #[must_use]
    pub fn decode(texel: [u8; 4]) -> Self {
        Self {
            x: u32::from(texel[0]),
            y: u32::from(texel[1]),
            layer: u32::from(texel[2]) | u32::from(texel[3]) << 8,
        }
    }
}

/// Hands out tiles of one store, reusing released ones first.
#[derive(Debug)]
struct TileAllocator {
    tiles_per_row: u32,
    layers: u32,
    next: u32,
    free: Vec<TileLocation>,
}

impl TileAllocator {
    fn new(tiles_per_row: u32, layers: u32) -> Self {
        Self {
            tiles_per_row,
            layers,
            next: 0,
            free: Vec::new(),
        }
    }

    fn allocate(&mut self) -> TileLocation {
        if let Some(tile) = self.free.pop() {
            return tile;
        }
        let per_layer = self.tiles_per_row * self.tiles_per_row;
        let id = self.next;
        self.next += 1;
        if self.next > per_layer * self.layers {
            self.layers += 1;
        }
        TileLocation {
            x: id % self.tiles_per_row,
            y: (id / self.tiles_per_row) % self.tiles_per_row,
            layer: id / per_layer,
        }
    }

    fn release(&mut self, tile: TileLocation) {
        debug_assert!(!self.free.contains(&tile), "{tile:?} released twice");
        self.free.push(tile);
    }
}

/// An image resident in the atlas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Index levels between the root and the color tiles. Zero means the
    /// root is itself the only color tile.
    pub number_index_lookups: u32,
    /// Root tile: in the index store, or in the color store when
    /// `number_index_lookups` is zero.
    pub root: TileLocation,
    color_tiles: Vec<TileLocation>,
    index_tiles: Vec<TileLocation>,
}

impl AtlasImage {
    /// Color tiles used by the image, row-major over the image.
    #[must_use]
    pub fn color_tiles(&self) -> &[TileLocation] {
        &self.color_tiles
    }
}

/// Color store and index store together.
pub struct ImageAtlas<D: Device> {
    color: TextureStore<D>,
    index: TextureStore<D>,
    color_tiles: TileAllocator,
    index_tiles: TileAllocator,
    color_tile_size: u32,
    index_tile_size: u32,
    slack: u32,
}

impl<D: Device> ImageAtlas<D> {
    /// Allocate both stores.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a
    /// store cannot be allocated.
    pub fn new(device: &Rc<D>, params: &ImageAtlasParams) -> Result<Self> {
        debug_assert!(params.log2_color_tiles_per_row <= 8);
        debug_assert!(params.log2_index_tiles_per_row <= 8);
        let color_tile_size = 1 << params.log2_color_tile_size;
        let index_tile_size = 1 << params.log2_index_tile_size;
        debug_assert!(
            2 * params.color_tile_slack < color_tile_size,
            "slack leaves no room in a color tile"
        );
        let color_tiles_per_row = 1 << params.log2_color_tiles_per_row;
        let index_tiles_per_row = 1 << params.log2_index_tiles_per_row;

        let color_side = color_tile_size * color_tiles_per_row;
        let color = TextureStore::new(
            device,
            TextureDesc {
                kind: TextureKind::Array2D,
                format: TexelFormat::Rgba8,
                width: color_side,
                height: color_side,
                layers: params.color_layers.max(1),
                levels: params.log2_color_tile_size + 1,
                filter: Filter::Linear,
            },
            params.delayed,
        )?;
        let index_side = index_tile_size * index_tiles_per_row;
        let index = TextureStore::new(
            device,
            TextureDesc {
                kind: TextureKind::Array2D,
                format: TexelFormat::Rgba8Ui,
                width: index_side,
                height: index_side,
                layers: params.index_layers.max(1),
                levels: 1,
                filter: Filter::Nearest,
            },
            params.delayed,
        )?;

        Ok(Self {
            color,
            index,
            color_tiles: TileAllocator::new(color_tiles_per_row, params.color_layers.max(1)),
            index_tiles: TileAllocator::new(index_tiles_per_row, params.index_layers.max(1)),
            color_tile_size,
            index_tile_size,
            slack: params.color_tile_slack,
        })
    }

    /// Color tile side in texels, slack included.
    #[must_use]
    pub fn color_tile_size(&self) -> u32 {
        self.color_tile_size
    }

    /// Pixels of the source image covered by one color tile.
    #[must_use]
    pub fn color_tile_interior(&self) -> u32 {
        self.color_tile_size - 2 * self.slack
    }

    /// Index tile side in texels.
    #[must_use]
    pub fn index_tile_size(&self) -> u32 {
        self.index_tile_size
    }

    /// Slack texels on each side of a color tile.
    #[must_use]
    pub fn slack(&self) -> u32 {
        self.slack
    }

    /// The color store (`sampler2DArray`, mipmapped).
    #[must_use]
    pub fn color_texture(&self) -> D::Texture {
        self.color.handle()
    }

    /// The index store (`usampler2DArray`).
    #[must_use]
    pub fn index_texture(&self) -> D::Texture {
        self.index.handle()
    }

    /// Tile `pixels` (tightly packed RGBA8, row-major) into the atlas.
    ///
    /// A failed write hands every tile claimed so far back to the free lists.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImage`] for an empty image or a pixel slice of the
    /// wrong length. Otherwise propagates store write failures.
    pub fn create_image(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<AtlasImage> {
        check_image(width, height, pixels)?;
        let mut color_tiles = Vec::new();
        let mut index_tiles = Vec::new();
        match self.fill_tiles(width, height, pixels, &mut color_tiles, &mut index_tiles) {
            Ok((root, lookups)) => {
                tracing::debug!(
                    width,
                    height,
                    color_tiles = color_tiles.len(),
                    index_tiles = index_tiles.len(),
                    lookups,
                    "created atlas image"
                );
                Ok(AtlasImage {
                    width,
                    height,
                    number_index_lookups: lookups,
                    root,
                    color_tiles,
                    index_tiles,
                })
            }
            Err(err) => {
                tracing::warn!(width, height, %err, "atlas image creation failed");
                for tile in color_tiles {
                    self.color_tiles.release(tile);
                }
                for tile in index_tiles {
                    self.index_tiles.release(tile);
                }
                Err(err)
            }
        }
    }

    /// Write the color tiles and the index levels above them, recording each
    /// tile as soon as it is claimed. Returns the root and the lookup count.
    fn fill_tiles(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        color_tiles: &mut Vec<TileLocation>,
        index_tiles: &mut Vec<TileLocation>,
    ) -> Result<(TileLocation, u32)> {
        let interior = self.color_tile_interior();
        let mut columns = width.div_ceil(interior);
        let mut rows = height.div_ceil(interior);

        color_tiles.reserve((columns * rows) as usize);
        for ty in 0..rows {
            for tx in 0..columns {
                let tile = self.allocate_color_tile();
                color_tiles.push(tile);
                let source = self.extract_tile(width, height, pixels, tx * interior, ty * interior);
                self.upload_color_tile(tile, &source)?;
            }
        }

        let mut grid = color_tiles.clone();
        let mut lookups = 0;
        while columns > 1 || rows > 1 {
            let size = self.index_tile_size;
            let next_columns = columns.div_ceil(size);
            let next_rows = rows.div_ceil(size);
            let mut next = Vec::with_capacity((next_columns * next_rows) as usize);
            for iy in 0..next_rows {
                for ix in 0..next_columns {
                    let mut texels = vec![0u8; (size * size * 4) as usize];
                    for j in 0..size {
                        for i in 0..size {
                            let (gx, gy) = (ix * size + i, iy * size + j);
                            if gx < columns && gy < rows {
                                let at = ((j * size + i) * 4) as usize;
                                let target = grid[(gy * columns + gx) as usize];
                                texels[at..at + 4].copy_from_slice(&target.encode());
                            }
                        }
                    }
                    let tile = self.allocate_index_tile();
                    index_tiles.push(tile);
                    let region = self.index_region(tile);
                    self.index.set_data(&region, &texels)?;
                    next.push(tile);
                }
            }
            grid = next;
            columns = next_columns;
            rows = next_rows;
            lookups += 1;
        }
        Ok((grid[0], lookups))
    }

    /// Tile an [`RgbaImage`] into the atlas.
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub fn create_from_rgba(&mut self, image: &RgbaImage) -> Result<AtlasImage> {
        self.create_image(image.width(), image.height(), image.as_raw())
    }

    /// Return an image's tiles for reuse. Tiles of other images never move.
    pub fn release_image(&mut self, image: AtlasImage) {
        for tile in image.color_tiles {
            self.color_tiles.release(tile);
        }
        for tile in image.index_tiles {
            self.index_tiles.release(tile);
        }
    }

    /// Apply pending growth and writes to both stores.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if a
    /// reallocation fails.
    pub fn flush(&mut self) -> Result<()> {
        self.color.flush()?;
        self.index.flush()
    }

    fn allocate_color_tile(&mut self) -> TileLocation {
        let tile = self.color_tiles.allocate();
        let layers = self.color.desc().layers;
        if self.color_tiles.layers > layers {
            self.color.add_layers(self.color_tiles.layers - layers);
            tracing::debug!(layers = self.color_tiles.layers, "image color store grew");
        }
        tile
    }

    fn allocate_index_tile(&mut self) -> TileLocation {
        let tile = self.index_tiles.allocate();
        let layers = self.index.desc().layers;
        if self.index_tiles.layers > layers {
            self.index.add_layers(self.index_tiles.layers - layers);
            tracing::debug!(layers = self.index_tiles.layers, "image index store grew");
        }
        tile
    }

    fn index_region(&self, tile: TileLocation) -> TextureRegion {
        TextureRegion {
            level: 0,
            x: tile.x * self.index_tile_size,
            y: tile.y * self.index_tile_size,
            layer: tile.layer,
            width: self.index_tile_size,
            height: self.index_tile_size,
            layers: 1,
        }
    }

    /// The tile whose interior starts at `(x0, y0)`, with the slack ring
    /// taken from neighbouring pixels and clamped at the image edge.
    fn extract_tile(&self, width: u32, height: u32, pixels: &[u8], x0: u32, y0: u32) -> RgbaImage {
        let slack = i64::from(self.slack);
        RgbaImage::from_fn(self.color_tile_size, self.color_tile_size, |i, j| {
            let sx = (i64::from(x0) + i64::from(i) - slack).clamp(0, i64::from(width) - 1);
            let sy = (i64::from(y0) + i64::from(j) - slack).clamp(0, i64::from(height) - 1);
            let at = ((sy * i64::from(width) + sx) * 4) as usize;
            Rgba([pixels[at], pixels[at + 1], pixels[at + 2], pixels[at + 3]])
        })
    }

    fn upload_color_tile(&mut self, tile: TileLocation, source: &RgbaImage) -> Result<()> {
        let levels = self.color.desc().levels;
        let mut level_image = source.clone();
        for level in 0..levels {
            if level > 0 {
                level_image = box_downsample(&level_image);
            }
            let size = self.color_tile_size >> level;
            let region = TextureRegion {
                level,
                x: tile.x * size,
                y: tile.y * size,
                layer: tile.layer,
                width: size,
                height: size,
                layers: 1,
            };
            self.color.set_data(&region, level_image.as_raw())?;
        }
        Ok(())
    }
}

fn check_image(width: u32, height: u32, pixels: &[u8]) -> Result<()> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || pixels.len() != expected {
        return Err(Error::InvalidImage {
            width,
            height,
            bytes: pixels.len(),
        });
    }
    Ok(())
}

/// Halve an image with a 2x2 box filter.
fn box_downsample(image: &RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    RgbaImage::from_fn((width / 2).max(1), (height / 2).max(1), |x, y| {
        let mut sum = [0u32; 4];
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let px = image.get_pixel((2 * x + dx).min(width - 1), (2 * y + dy).min(height - 1));
            for (acc, channel) in sum.iter_mut().zip(px.0) {
                *acc += u32::from(channel);
            }
        }
        Rgba(sum.map(|c| ((c + 2) / 4) as u8))
    })
}

/// An image in its own texture, outside the atlas.
///
/// With bindless texturing the texture's 64-bit handle is made resident on
/// creation and non-resident before the texture is deleted; shaders must
/// not see the handle after drop.
pub struct StandaloneImage<D: Device> {
    device: Rc<D>,
    texture: D::Texture,
    width: u32,
    height: u32,
    handle: Option<u64>,
}

impl<D: Device> StandaloneImage<D> {
    /// Upload `pixels` (tightly packed RGBA8) into a mipmapped texture,
    /// requesting a bindless handle when `bindless` is set.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImage`] for an empty image or mismatched pixel data,
    /// [`Error::ResourceExhausted`] if the texture cannot be allocated.
    pub fn new(device: &Rc<D>, width: u32, height: u32, pixels: &[u8], bindless: bool) -> Result<Self> {
        check_image(width, height, pixels)?;
        let desc = TextureDesc {
            kind: TextureKind::Plain2D,
            format: TexelFormat::Rgba8,
            width,
            height,
            layers: 1,
            levels: width.max(height).max(1).ilog2() + 1,
            filter: Filter::Linear,
        };
        let texture = device.create_texture(&desc)?;
        let region = TextureRegion {
            level: 0,
            x: 0,
            y: 0,
            layer: 0,
            width,
            height,
            layers: 1,
        };
        device.texture_sub_image(texture, &desc, &region, pixels);
        device.generate_mipmaps(texture, &desc);

        let handle = if bindless {
            let handle = device.texture_handle(texture);
            match handle {
                Some(handle) => device.make_handle_resident(handle),
                None => tracing::warn!("bindless handle requested but unavailable"),
            }
            handle
        } else {
            None
        };

        Ok(Self {
            device: Rc::clone(device),
            texture,
            width,
            height,
            handle,
        })
    }

    /// Upload an [`RgbaImage`].
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_rgba(device: &Rc<D>, image: &RgbaImage, bindless: bool) -> Result<Self> {
        Self::new(device, image.width(), image.height(), image.as_raw(), bindless)
    }

    /// Texture to bind when the image is not bindless.
    #[must_use]
    pub fn texture(&self) -> D::Texture {
        self.texture
    }

    /// The resident bindless handle, if any.
    #[must_use]
    pub fn bindless_handle(&self) -> Option<u64> {
        self.handle
    }

    /// Size in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl<D: Device> Drop for StandaloneImage<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.make_handle_non_resident(handle);
        }
        self.device.delete_texture(self.texture);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::caps::{ContextInfo, GlVersion};
    use crate::device::EntryPoints;
    use crate::device::mock::MockDevice;

    /// 4x4 color tiles with one slack texel (2x2 interior), 2x2 tiles per
    /// layer, 2x2 index tiles.
    fn small_params() -> ImageAtlasParams {
        ImageAtlasParams {
            log2_color_tile_size: 2,
            log2_color_tiles_per_row: 1,
            color_layers: 1,
            log2_index_tile_size: 1,
            log2_index_tiles_per_row: 2,
            index_layers: 1,
            color_tile_slack: 1,
            delayed: true,
        }
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]))
    }

    fn color_texel(device: &MockDevice, atlas: &ImageAtlas<MockDevice>, tile: TileLocation, i: u32, j: u32) -> Vec<u8> {
        let size = atlas.color_tile_size();
        device.texel(atlas.color_texture(), tile.x * size + i, tile.y * size + j, tile.layer)
    }

    #[test]
    fn single_tile_image_needs_no_lookup() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        let image = atlas.create_from_rgba(&gradient(2, 2)).unwrap();
        assert_eq!(image.number_index_lookups, 0);
        assert_eq!(image.color_tiles(), &[image.root]);
    }

    #[test]
    fn slack_repeats_neighbouring_pixels() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        let image = atlas.create_from_rgba(&gradient(4, 2)).unwrap();
        atlas.flush().unwrap();
        let second = image.color_tiles()[1];
        // Left slack column of the second tile is pixel column 1.
        assert_eq!(color_texel(&device, &atlas, second, 0, 1), vec![1, 0, 7, 255]);
        // Interior starts at pixel column 2.
        assert_eq!(color_texel(&device, &atlas, second, 1, 1), vec![2, 0, 7, 255]);
        // Right slack clamps at the image edge.
        assert_eq!(color_texel(&device, &atlas, second, 3, 1), vec![3, 0, 7, 255]);
    }

    #[test]
    fn index_levels_lead_back_to_every_color_tile() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        // 5x1 color tiles -> 3x1 -> 2x1 -> 1x1 index tiles.
        let image = atlas.create_from_rgba(&gradient(10, 2)).unwrap();
        atlas.flush().unwrap();
        assert_eq!(image.number_index_lookups, 3);

        let index_size = atlas.index_tile_size();
        for column in 0..5u32 {
            let mut tile = image.root;
            for level in (0..image.number_index_lookups).rev() {
                let span = index_size.pow(level);
                let local = (column / span) % index_size;
                let texel = device.texel(
                    atlas.index_texture(),
                    tile.x * index_size + local,
                    tile.y * index_size,
                    tile.layer,
                );
                tile = TileLocation::decode(texel.try_into().unwrap());
            }
            assert_eq!(tile, image.color_tiles()[column as usize]);
        }
    }

    #[test]
    fn released_tiles_are_reused_and_live_tiles_stay() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        let keep = atlas.create_from_rgba(&gradient(2, 2)).unwrap();
        let drop_me = atlas.create_from_rgba(&gradient(2, 2)).unwrap();
        let freed = drop_me.root;
        atlas.release_image(drop_me);
        let again = atlas.create_from_rgba(&gradient(2, 2)).unwrap();
        assert_eq!(again.root, freed);
        assert_ne!(again.root, keep.root);
    }

    #[test]
    fn empty_or_short_images_are_rejected() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        assert!(matches!(
            atlas.create_image(0, 4, &[]),
            Err(Error::InvalidImage { width: 0, height: 4, bytes: 0 })
        ));
        assert!(matches!(
            atlas.create_image(2, 2, &[0; 12]),
            Err(Error::InvalidImage { bytes: 12, .. })
        ));
        assert!(matches!(
            StandaloneImage::new(&device, 3, 0, &[], false),
            Err(Error::InvalidImage { .. })
        ));
        assert!(atlas.color_tiles.free.is_empty());
        assert_eq!(atlas.color_tiles.next, 0);
    }

    #[test]
    fn failed_image_returns_its_tiles() {
        // One 8x8 layer with three mips fits; growing to a second layer does not.
        let device = Rc::new(MockDevice::new().with_allocation_limit(336));
        let params = ImageAtlasParams {
            delayed: false,
            ..small_params()
        };
        let mut atlas = ImageAtlas::new(&device, &params).unwrap();
        // 3x2 color tiles: the fifth needs a second layer.
        let err = atlas.create_from_rgba(&gradient(6, 4)).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));
        assert_eq!(atlas.color_tiles.free.len(), 5);
        assert!(atlas.index_tiles.free.is_empty());

        atlas.color_tiles.allocate();
        assert_eq!(atlas.color_tiles.free.len(), 4);
        assert_eq!(atlas.color_tiles.next, 5);
    }

    #[test]
    fn color_store_grows_by_layers_keeping_content() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        let first = atlas.create_from_rgba(&gradient(2, 2)).unwrap();
        atlas.flush().unwrap();
        let before = color_texel(&device, &atlas, first.root, 1, 1);
        for _ in 0..4 {
            atlas.create_from_rgba(&gradient(2, 2)).unwrap();
        }
        atlas.flush().unwrap();
        assert_eq!(device.texture_desc(atlas.color_texture()).layers, 2);
        assert_eq!(color_texel(&device, &atlas, first.root, 1, 1), before);
    }

    #[test]
    fn tiles_carry_their_own_mips() {
        let device = Rc::new(MockDevice::new());
        let mut atlas = ImageAtlas::new(&device, &small_params()).unwrap();
        let flat = RgbaImage::from_pixel(2, 2, Rgba([40, 80, 120, 255]));
        let image = atlas.create_from_rgba(&flat).unwrap();
        atlas.flush().unwrap();

        let level1 = device.texture_contents(atlas.color_texture(), 1);
        let desc = device.texture_desc(atlas.color_texture());
        let (w, _) = desc.level_extent(1);
        let (x, y) = (image.root.x * 2, image.root.y * 2);
        let at = ((y * w + x) * 4) as usize;
        assert_eq!(&level1[at..at + 4], &[40, 80, 120, 255]);
    }

    #[test]
    fn box_filter_averages_quads() {
        let image = RgbaImage::from_fn(2, 2, |x, y| Rgba([(x * 100 + y * 20) as u8, 0, 0, 255]));
        let half = box_downsample(&image);
        assert_eq!(half.dimensions(), (1, 1));
        assert_eq!(half.get_pixel(0, 0).0, [60, 0, 0, 255]);
    }

    #[test]
    fn bindless_handle_residency_follows_lifetime() {
        let device = Rc::new(MockDevice::new());
        let image = StandaloneImage::from_rgba(&device, &gradient(8, 8), true).unwrap();
        let handle = image.bindless_handle().unwrap();
        assert_eq!(device.resident_handles(), vec![handle]);
        drop(image);
        assert!(device.resident_handles().is_empty());
        let (created, deleted) = device.texture_lifetimes();
        assert_eq!(created, deleted);
    }

    #[test]
    fn bindless_falls_back_to_bound_texture() {
        let info = ContextInfo::new(GlVersion::gl(3, 3));
        let device = Rc::new(MockDevice::with_info(info, EntryPoints::empty()));
        let image = StandaloneImage::from_rgba(&device, &gradient(4, 4), true).unwrap();
        assert!(image.bindless_handle().is_none());
        assert!(device.texture_exists(image.texture()));
    }
}
