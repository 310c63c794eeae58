//! Common types shared by the render-device backends

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Texture formats used by render targets and sampled textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth32Float => 4,
        }
    }

    /// Whether the format can be sampled with linear filtering without extra device features
    pub fn is_filterable(&self) -> bool {
        matches!(self, TextureFormat::Rgba8Unorm | TextureFormat::Rgba16Float)
    }
}

/// Shape of a texture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    /// Six-layer cube texture
    Cube,
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
}

impl TextureDescriptor {
    pub fn new_2d(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            mip_levels: 1,
            format,
            kind: TextureKind::D2,
        }
    }

    /// Cube texture with a full mip chain
    pub fn new_cube(label: &str, size: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width: size,
            height: size,
            mip_levels: mip_count(size),
            format,
            kind: TextureKind::Cube,
        }
    }

    pub fn layer_count(&self) -> u32 {
        match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Number of mip levels in a full chain for a square texture of `size`
pub fn mip_count(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

/// Offscreen render target descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Ordered color buffers, may be empty for depth-only targets
    pub color_formats: Vec<TextureFormat>,
    pub depth: bool,
}

/// Depth/stencil comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
}

/// Color blend equation, always additive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl BlendState {
    /// SRC_ALPHA / ONE_MINUS_SRC_ALPHA
    pub fn alpha_blending() -> Self {
        Self {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
        }
    }

    /// ONE / ONE
    pub fn additive() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
        }
    }

    /// SRC_ALPHA / ONE
    pub fn alpha_additive() -> Self {
        Self {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::One,
        }
    }
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Front face winding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

/// Fixed-function state applied to every draw until changed.
///
/// `RasterState::default()` is the known-good state the renderer returns to
/// after every stage: blending off, depth test on with `Less`, back-face
/// culling, color writes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub blend: Option<BlendState>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub color_write: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            blend: None,
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::Less,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Ccw,
            color_write: true,
        }
    }
}

impl RasterState {
    /// State for fullscreen passes: no depth, no culling
    pub fn fullscreen() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            cull_mode: CullMode::None,
            ..Default::default()
        }
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }
}

/// A value bound to a named program uniform
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
    IntArray(Vec<i32>),
    Vec3Array(Vec<Vec3>),
    Vec4Array(Vec<Vec4>),
}

impl UniformValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            UniformValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            UniformValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            UniformValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Int(v as i32)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(v: Vec<f32>) -> Self {
        UniformValue::FloatArray(v)
    }
}

impl From<Vec<i32>> for UniformValue {
    fn from(v: Vec<i32>) -> Self {
        UniformValue::IntArray(v)
    }
}

impl From<Vec<Vec3>> for UniformValue {
    fn from(v: Vec<Vec3>) -> Self {
        UniformValue::Vec3Array(v)
    }
}

/// Layout slot kind of a uniform declared by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    /// Array of 16-byte slots; scalars land in `.x`, vec3 in `.xyz`
    Array(u32),
}

impl UniformKind {
    /// (alignment, size) following WGSL uniform address space rules
    pub fn align_size(&self) -> (u32, u32) {
        match self {
            UniformKind::Float | UniformKind::Int => (4, 4),
            UniformKind::Vec2 => (8, 8),
            UniformKind::Vec3 => (16, 12),
            UniformKind::Vec4 => (16, 16),
            UniformKind::Mat4 => (16, 64),
            UniformKind::Array(n) => (16, 16 * (*n).max(1)),
        }
    }
}

/// How a program samples a named texture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureSlotKind {
    /// Filterable 2D color texture
    Filtered,
    /// Non-filterable 2D color texture (32-bit float)
    Unfiltered,
    /// Depth texture
    Depth,
    /// Filterable cube texture
    Cube,
}

/// Declares a shading program to the device.
///
/// The uniform list is ordered: backends that pack uniforms into a block
/// lay fields out in exactly this order.
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub name: String,
    pub source: String,
    pub uniforms: Vec<(String, UniformKind)>,
    pub textures: Vec<(String, TextureSlotKind)>,
}

impl ProgramDescriptor {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            uniforms: Vec::new(),
            textures: Vec::new(),
        }
    }

    pub fn uniform(mut self, name: &str, kind: UniformKind) -> Self {
        self.uniforms.push((name.to_string(), kind));
        self
    }

    pub fn texture(mut self, name: &str, kind: TextureSlotKind) -> Self {
        self.textures.push((name.to_string(), kind));
        self
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

/// Vertex attribute description
#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn attributes() -> [VertexAttribute; 4] {
        [
            VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                format: VertexFormat::Float32x3,
                offset: 12,
            },
            VertexAttribute {
                location: 2,
                format: VertexFormat::Float32x2,
                offset: 24,
            },
            VertexAttribute {
                location: 3,
                format: VertexFormat::Float32x4,
                offset: 32,
            },
        ]
    }
}
