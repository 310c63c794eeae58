//! Core render-device abstraction
//!
//! The renderer drives the GPU through a binding-state interface: one render
//! target accepts draws at a time, a single program is active, uniforms are
//! set by name, and fixed-function state stays in effect until changed.

use crate::backend::types::*;
use crate::resources::Mesh;
use image::Rgba32FImage;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create render target: {0}")]
    RenderTargetCreationFailed(String),
    #[error("Failed to create program: {0}")]
    ProgramCreationFailed(String),
    #[error("Render target {0:?} not found")]
    UnknownRenderTarget(RenderTargetHandle),
    #[error("Texture {0:?} not found")]
    UnknownTexture(TextureHandle),
    #[error("A render target is already bound")]
    TargetAlreadyBound,
    #[error("Render target sizes do not match: {0}")]
    SizeMismatch(String),
    #[error("Read-back failed: {0}")]
    ReadbackFailed(String),
    #[error("GPU validation error: {0}")]
    Validation(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture (2D or cube)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to an offscreen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub(crate) u64);

/// Handle to a registered shading program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// What is currently accepting draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetBinding {
    Target(RenderTargetHandle),
    /// One face (and mip level) of a cube texture, with depth from `depth`
    CubeFace {
        cubemap: TextureHandle,
        face: u32,
        depth: RenderTargetHandle,
    },
}

/// Render-device interface implemented by every backend
pub trait RenderDevice {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Size of the presentation surface in pixels
    fn viewport(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    /// Render target that stands for the presentation surface
    fn screen_target(&self) -> RenderTargetHandle;

    // Programs

    fn register_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Look up a program by name; `None` when it was never registered
    fn find_program(&self, name: &str) -> Option<ProgramHandle>;

    // Textures and targets

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Replace mip 0 of a 2D texture with tightly packed pixel data
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Rebuild mips 1.. of every layer from mip 0
    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()>;

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle>;

    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    fn color_texture(&self, target: RenderTargetHandle, index: usize) -> Option<TextureHandle>;

    fn depth_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle>;

    // Binding state

    /// Make `binding` the target accepting draws. Fails if another target is bound.
    fn bind(&mut self, binding: TargetBinding) -> BackendResult<()>;

    fn unbind(&mut self);

    fn bound(&self) -> Option<TargetBinding>;

    /// Clear the bound target. `color == None` leaves color buffers untouched.
    fn clear(&mut self, color: Option<[f32; 4]>, depth: bool);

    /// Copy the depth buffer of `source` into the bound target
    fn copy_depth_from(&mut self, source: RenderTargetHandle) -> BackendResult<()>;

    fn set_raster_state(&mut self, state: RasterState);

    fn raster_state(&self) -> RasterState;

    fn use_program(&mut self, program: ProgramHandle);

    fn set_uniform(&mut self, name: &str, value: UniformValue);

    fn set_texture(&mut self, name: &str, texture: TextureHandle);

    fn draw_mesh(&mut self, mesh: &Mesh);

    /// Draw a quad covering the whole target with the active program
    fn draw_fullscreen(&mut self);

    /// Copy `texture` over the whole bound target with the built-in copy program
    fn blit(&mut self, texture: TextureHandle);

    // Synchronisation

    /// Submit recorded work
    fn flush(&mut self);

    fn read_color(&mut self, target: RenderTargetHandle, index: usize)
        -> BackendResult<Rgba32FImage>;

    /// Pop the first GPU error raised since the last check
    fn take_error(&mut self) -> Option<BackendError>;
}

impl<'a> dyn RenderDevice + 'a {
    /// `set_uniform` with conversion
    pub fn upload(&mut self, name: &str, value: impl Into<UniformValue>) {
        self.set_uniform(name, value.into());
    }

    /// Reset fixed-function state to the known-good default
    pub fn restore_state(&mut self) {
        self.set_raster_state(RasterState::default());
    }
}
