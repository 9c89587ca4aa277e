//! An atlas-backed OpenGL / OpenGL ES backend for a 2D vector-graphics
//! painter, driven through [glow].
//!
//! The backend probes the context once ([`caps::CapabilitySnapshot`]),
//! resolves the requested options into a configuration the context can run
//! ([`config::resolve`]), and then keeps everything a painter draws from in
//! a handful of GPU resources:
//!
//! - **Atlases**: glyph texels and geometry, tiled images with an index
//!   hierarchy, and discretized color-stop ramps ([`atlas`]).
//! - **Uber-shaders**: every registered item and blend shader compiled into
//!   one program per blend shader type and discard group ([`shader`]).
//! - **Draw stream**: a ring of buffer pools that each frame's primitives
//!   are written into and drawn from in batches ([`stream`]).
//!
//! [`painter::PainterBackend`] ties these together behind a
//! `begin_frame` / `draw` / `end_frame` cycle over a [`surface::Surface`].
//!
//! # Devices
//!
//! All GPU traffic goes through the [`device::Device`] trait. With the
//! `glow` feature (default), [`device::gl::GlowDevice`] wraps a
//! `glow::Context`; creating it is `unsafe` because the context must stay
//! current for the device's lifetime. The `mock` feature provides a
//! host-memory device for tests and headless tooling.
//!
//! # Threads
//!
//! Rendering is single-threaded: atlases, programs and the draw stream live
//! on the thread that owns the context. Glyph generation fans out over
//! worker threads with [`glyph_gen::generate_glyphs`] before the results
//! are uploaded on the rendering thread.
//!
//! [glow]: https://docs.rs/glow

pub mod atlas;
pub mod backing;
pub mod caps;
pub mod config;
pub mod device;
pub mod error;
pub mod glyph_gen;
pub mod painter;
pub mod shader;
pub mod stream;
pub mod surface;

pub use error::{Error, Result};
pub use painter::{PainterBackend, PainterParams};
pub use surface::Surface;
