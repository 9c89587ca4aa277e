//! GPU-resident, append-only caches.
//!
//! Every atlas grows by adding layers and never moves what it has handed
//! out. Atlases are driven from the rendering thread only and are not
//! `Sync`; sharing one across threads is not supported.

pub mod color_stop;
pub mod glyph;
pub mod image;

/// A shelf of the packer: a horizontal strip filled left to right.
#[derive(Debug, Clone, Copy)]
struct Shelf {
    y: u32,
    height: u32,
    x: u32,
}

/// Shelf packer for one atlas layer.
///
/// Allocations keep `padding` free texels to their right and below, and the
/// packable area starts at `(padding, padding)`, so every rectangle is
/// surrounded by untouched (zero) texels.
#[derive(Debug, Clone)]
pub(crate) struct ShelfPacker {
    width: u32,
    height: u32,
    padding: u32,
    shelves: Vec<Shelf>,
}

impl ShelfPacker {
    pub(crate) fn new(width: u32, height: u32, padding: u32) -> Self {
        Self {
            width,
            height,
            padding,
            shelves: Vec::new(),
        }
    }

    /// Whether a `width` x `height` rectangle could ever fit in an empty layer.
    pub(crate) fn fits_empty(&self, width: u32, height: u32) -> bool {
        width + 2 * self.padding <= self.width && height + 2 * self.padding <= self.height
    }

    /// Place a rectangle, returning its top-left corner.
    pub(crate) fn allocate(&mut self, width: u32, height: u32) -> Option<(u32, u32)> {
        let padded_width = width + self.padding;
        let padded_height = height + self.padding;

        // Lowest shelf that is tall enough and has room left.
        let best = self
            .shelves
            .iter_mut()
            .filter(|s| s.height >= padded_height && s.x + padded_width <= self.width)
            .min_by_key(|s| s.y);
        if let Some(shelf) = best {
            let corner = (shelf.x, shelf.y);
            shelf.x += padded_width;
            return Some(corner);
        }

        let y = self
            .shelves
            .last()
            .map_or(self.padding, |s| s.y + s.height);
        if y + padded_height > self.height || self.padding + padded_width > self.width {
            return None;
        }
        self.shelves.push(Shelf {
            y,
            height: padded_height,
            x: self.padding + padded_width,
        });
        Some((self.padding, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shelves_keep_a_padding_gap() {
        let mut packer = ShelfPacker::new(16, 16, 1);
        assert_eq!(packer.allocate(4, 4), Some((1, 1)));
        assert_eq!(packer.allocate(4, 3), Some((6, 1)));
        assert_eq!(packer.allocate(8, 4), Some((1, 6)));
    }

    #[test]
    fn full_layer_rejects() {
        let mut packer = ShelfPacker::new(8, 8, 1);
        assert!(packer.allocate(6, 6).is_some());
        assert_eq!(packer.allocate(1, 1), None);
        assert!(!packer.fits_empty(7, 1));
    }
}
