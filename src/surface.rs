//! Render targets.

use std::rc::Rc;

use crate::device::{Device, Filter, TexelFormat, TextureDesc, TextureKind, Viewport};
use crate::error::Result;

/// Dimensions handed to GL as `GLint`.
fn gl_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

enum Target<D: Device> {
    Default,
    Offscreen {
        texture: D::Texture,
        framebuffer: D::Framebuffer,
    },
}

/// Something to paint into: the default framebuffer or an off-screen color
/// texture behind its own framebuffer.
///
/// The viewport defaults to the whole surface. When a clear color is set,
/// the surface is cleared every time a frame begins on it.
pub struct Surface<D: Device> {
    device: Rc<D>,
    target: Target<D>,
    width: u32,
    height: u32,
    viewport: Viewport,
    clear_color: Option<[f32; 4]>,
}

fn full_viewport(width: u32, height: u32) -> Viewport {
    Viewport {
        x: 0,
        y: 0,
        width: gl_size(width),
        height: gl_size(height),
    }
}

impl<D: Device> Surface<D> {
    /// The window's default framebuffer, which is `width` x `height`.
    #[must_use]
    pub fn on_screen(device: &Rc<D>, width: u32, height: u32) -> Self {
        Self {
            device: Rc::clone(device),
            target: Target::Default,
            width,
            height,
            viewport: full_viewport(width, height),
            clear_color: None,
        }
    }

    /// An RGBA8 color texture with its own framebuffer.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) or
    /// [`Error::Device`](crate::Error::Device) if the texture or framebuffer
    /// cannot be created.
    pub fn off_screen(device: &Rc<D>, width: u32, height: u32) -> Result<Self> {
        let target = Self::create_target(device, width, height)?;
        Ok(Self {
            device: Rc::clone(device),
            target,
            width,
            height,
            viewport: full_viewport(width, height),
            clear_color: None,
        })
    }

    fn create_target(device: &D, width: u32, height: u32) -> Result<Target<D>> {
        let texture = device.create_texture(&TextureDesc {
            kind: TextureKind::Plain2D,
            format: TexelFormat::Rgba8,
            width: width.max(1),
            height: height.max(1),
            layers: 1,
            levels: 1,
            filter: Filter::Linear,
        })?;
        match device.create_framebuffer(texture) {
            Ok(framebuffer) => Ok(Target::Offscreen {
                texture,
                framebuffer,
            }),
            Err(err) => {
                device.delete_texture(texture);
                Err(err)
            }
        }
    }

    fn release_target(&mut self) {
        if let Target::Offscreen {
            texture,
            framebuffer,
        } = std::mem::replace(&mut self.target, Target::Default)
        {
            self.device.delete_framebuffer(framebuffer);
            self.device.delete_texture(texture);
        }
    }

    /// Width and height in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether this surface renders into its own texture.
    #[must_use]
    pub fn is_off_screen(&self) -> bool {
        matches!(self.target, Target::Offscreen { .. })
    }

    /// Color texture of an off-screen surface.
    #[must_use]
    pub fn texture(&self) -> Option<D::Texture> {
        match self.target {
            Target::Offscreen { texture, .. } => Some(texture),
            Target::Default => None,
        }
    }

    /// Framebuffer to bind; `None` is the default framebuffer.
    #[must_use]
    pub fn framebuffer(&self) -> Option<D::Framebuffer> {
        match self.target {
            Target::Offscreen { framebuffer, .. } => Some(framebuffer),
            Target::Default => None,
        }
    }

    /// Region painted into.
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Restrict painting to `viewport`.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Color the surface is cleared to when a frame begins.
    #[must_use]
    pub fn clear_color(&self) -> Option<[f32; 4]> {
        self.clear_color
    }

    /// Set or unset the clear color.
    pub fn set_clear_color(&mut self, color: Option<[f32; 4]>) {
        self.clear_color = color;
    }

    /// Change the surface size. Off-screen contents are discarded and the
    /// viewport is reset to the whole surface.
    ///
    /// # Errors
    ///
    /// As for [`off_screen`](Self::off_screen).
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        if self.is_off_screen() {
            let target = Self::create_target(&self.device, width, height)?;
            self.release_target();
            self.target = target;
        }
        tracing::debug!(width, height, off_screen = self.is_off_screen(), "resized surface");
        self.width = width;
        self.height = height;
        self.viewport = full_viewport(width, height);
        Ok(())
    }

    /// Bind as the draw target, apply the viewport and clear if asked.
    pub(crate) fn bind(&self) {
        self.device.bind_draw_framebuffer(self.framebuffer());
        self.device.set_viewport(self.viewport);
        if let Some(color) = self.clear_color {
            self.device.clear_color(color);
        }
    }

    /// Copy this surface's viewport into `dst`'s viewport, scaling with
    /// `filter` when the sizes differ.
    pub fn blit(&self, dst: &Surface<D>, filter: Filter) {
        self.device.blit_framebuffer(
            self.framebuffer(),
            dst.framebuffer(),
            self.viewport,
            dst.viewport,
            filter,
        );
    }
}

impl<D: Device> Drop for Surface<D> {
    fn drop(&mut self) {
        self.release_target();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;

    #[test]
    fn off_screen_surface_owns_a_texture_and_framebuffer() {
        let device = Rc::new(MockDevice::new());
        let surface = Surface::off_screen(&device, 64, 32).unwrap();
        let texture = surface.texture().unwrap();
        assert_eq!(device.texture_desc(texture).width, 64);
        assert_eq!(surface.viewport().height, 32);
        drop(surface);
        assert!(!device.texture_exists(texture));
    }

    #[test]
    fn bind_applies_viewport_and_clear() {
        let device = Rc::new(MockDevice::new());
        let mut surface = Surface::off_screen(&device, 64, 64).unwrap();
        let viewport = Viewport {
            x: 8,
            y: 8,
            width: 16,
            height: 16,
        };
        surface.set_viewport(viewport);
        surface.bind();
        assert_eq!(device.bound_framebuffer(), surface.framebuffer());
        assert_eq!(device.viewport(), viewport);
        assert_eq!(device.last_clear_color(), None);

        surface.set_clear_color(Some([0.0, 0.0, 0.0, 1.0]));
        surface.bind();
        assert_eq!(device.last_clear_color(), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn resize_replaces_the_texture_and_resets_viewport() {
        let device = Rc::new(MockDevice::new());
        let mut surface = Surface::off_screen(&device, 16, 16).unwrap();
        let old = surface.texture().unwrap();
        surface.set_viewport(Viewport::default());
        surface.resize(40, 20).unwrap();
        let new = surface.texture().unwrap();
        assert!(!device.texture_exists(old));
        assert_eq!(device.texture_desc(new).height, 20);
        assert_eq!(surface.viewport(), full_viewport(40, 20));
    }

    #[test]
    fn on_screen_surface_targets_the_default_framebuffer() {
        let device = Rc::new(MockDevice::new());
        let screen = Surface::on_screen(&device, 800, 600);
        let canvas = Surface::off_screen(&device, 400, 300).unwrap();
        assert!(screen.framebuffer().is_none());
        assert!(screen.texture().is_none());
        canvas.blit(&screen, Filter::Linear);
        assert_eq!(device.blit_count(), 1);
        assert_eq!(device.bound_framebuffer(), None);
    }
}
