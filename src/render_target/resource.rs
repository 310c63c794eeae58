//! Offscreen target descriptions

use crate::backend::types::*;

/// What an offscreen target is used for. One live target per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetPurpose {
    /// HDR color the geometry and lighting passes accumulate into
    Scene,
    /// Albedo, normal, occlusion/metallic/roughness, emissive + depth
    GBuffers,
    Ssao,
    /// Screen-space irradiance evaluated from the probe volume
    Irradiance,
    Reflections,
    BloomBright,
    BloomBlur,
    Bloom,
    Fog,
    Tonemap,
    Antialias,
    /// Small float target the irradiance probes are captured into
    ProbeCapture,
    /// Depth used while rendering into cubemap faces, keyed by face size
    CubeDepth(u32),
    /// Depth-only shadow map of the n-th shadow-casting light
    Shadow(usize),
}

/// Describes texture dimensions that can be relative to screen size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to screen size (1.0 = full screen)
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    pub fn square(size: u32) -> Self {
        TextureSize::Absolute {
            width: size,
            height: size,
        }
    }

    /// Resolve against the viewport; never returns a zero dimension
    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        let (w, h) = match self {
            TextureSize::Absolute { width, height } => (*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => (
                ((screen_width as f32) * width_scale) as u32,
                ((screen_height as f32) * height_scale) as u32,
            ),
        };
        (w.max(1), h.max(1))
    }
}

/// Requested layout of a target, size still symbolic
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    pub size: TextureSize,
    pub color_formats: Vec<TextureFormat>,
    pub depth: bool,
}

impl TargetSpec {
    /// Viewport-sized target with the given color buffers and no depth
    pub fn screen(color_formats: &[TextureFormat]) -> Self {
        Self {
            size: TextureSize::default(),
            color_formats: color_formats.to_vec(),
            depth: false,
        }
    }

    pub fn with_depth(mut self) -> Self {
        self.depth = true;
        self
    }

    pub fn with_size(mut self, size: TextureSize) -> Self {
        self.size = size;
        self
    }

    pub fn depth_only(size: u32) -> Self {
        Self {
            size: TextureSize::square(size),
            color_formats: Vec::new(),
            depth: true,
        }
    }

    pub fn resolve(&self, viewport: (u32, u32)) -> ResolvedSpec {
        let (width, height) = self.size.resolve(viewport.0, viewport.1);
        ResolvedSpec {
            width,
            height,
            color_formats: self.color_formats.clone(),
            depth: self.depth,
        }
    }
}

/// A target layout with concrete pixel dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpec {
    pub width: u32,
    pub height: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth: bool,
}

impl ResolvedSpec {
    pub fn descriptor(&self, label: &str) -> RenderTargetDescriptor {
        RenderTargetDescriptor {
            label: Some(label.to_string()),
            width: self.width,
            height: self.height,
            color_formats: self.color_formats.clone(),
            depth: self.depth,
        }
    }
}

/// Outcome of comparing an allocated target with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensure {
    Keep,
    Recreate,
}

/// Decide whether `current` can serve `requested`.
///
/// Pure: equal layouts always keep, anything else (including no target yet)
/// recreates.
pub fn ensure_size(current: Option<&ResolvedSpec>, requested: &ResolvedSpec) -> Ensure {
    match current {
        Some(current) if current == requested => Ensure::Keep,
        _ => Ensure::Recreate,
    }
}
