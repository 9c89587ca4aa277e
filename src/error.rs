//! Error type shared by every part of the backend.
//!
//! Capability degradations never show up here; they are absorbed by
//! [`resolve`](crate::config::resolve) and reported as
//! [`Degradation`](crate::config::Degradation) records instead.

use crate::caps::GlVersion;

/// Shader stage, used to label compile failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Fragment shader.
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Errors surfaced by the backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The context is older than the engine-wide baseline (GL 3.3 / GLES 3.0).
    #[error("unsupported context {0}: OpenGL 3.3 or OpenGL ES 3.0 is required")]
    UnsupportedContext(GlVersion),

    /// The device could not allocate a buffer or texture.
    #[error("GPU resource exhausted while allocating {what} ({bytes} bytes)")]
    ResourceExhausted {
        /// What was being allocated.
        what: &'static str,
        /// Requested size in bytes.
        bytes: usize,
    },

    /// A shader stage failed to compile.
    #[error("{stage} shader compilation failed: {log}")]
    ShaderCompile {
        /// The failing stage.
        stage: ShaderStage,
        /// Compiler info log.
        log: String,
    },

    /// A program failed to link.
    #[error("program link failed: {log}")]
    ProgramLink {
        /// Linker info log.
        log: String,
    },

    /// A single primitive does not fit into an empty draw-stream pool slot.
    #[error(
        "primitive needs {attributes} attributes, {indices} indices and {data_blocks} data blocks, \
         which exceeds the capacity of a draw-stream pool slot"
    )]
    PrimitiveTooLarge {
        /// Attribute count of the primitive.
        attributes: usize,
        /// Index count of the primitive.
        indices: usize,
        /// Shader-data block count of the primitive (header included).
        data_blocks: usize,
    },

    /// A draw named a shader id the registry never handed out.
    #[error("unknown {kind} shader id {id}")]
    UnknownShader {
        /// `"item"` or `"blend"`.
        kind: &'static str,
        /// The raw id.
        id: u32,
    },

    /// A blend shader has no variant this context can run.
    #[error("blend shader `{name}` has no variant supported by this context")]
    NoBlendVariant {
        /// Name of the blend shader.
        name: String,
    },

    /// Image dimensions are zero or disagree with the pixel data.
    #[error("invalid {width}x{height} RGBA8 image with {bytes} bytes of pixel data")]
    InvalidImage {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Length of the pixel data.
        bytes: usize,
    },

    /// Opaque driver error.
    #[error("device error: {0}")]
    Device(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Device(value)
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
