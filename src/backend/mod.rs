//! Render-device abstraction layer
//!
//! Provides the `RenderDevice` trait with a recording dummy implementation
//! and a wgpu implementation.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::{DeviceCommand, DummyBackend};
pub use traits::*;
pub use types::*;
