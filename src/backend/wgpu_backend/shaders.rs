//! Built-in WGSL programs used by the wgpu backend itself

/// Full-target copy. Reads with `textureLoad` so any color format works.
pub const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let dims = vec2<f32>(textureDimensions(source));
    let coord = vec2<i32>(clamp(in.uv * dims, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
    return textureLoad(source, coord, 0);
}
"#;

/// 2x2 box downsample from the previous mip level
pub const MIPMAP_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let dims = vec2<i32>(textureDimensions(source)) - vec2<i32>(1);
    let base = vec2<i32>(position.xy) * 2;
    let a = textureLoad(source, min(base, dims), 0);
    let b = textureLoad(source, min(base + vec2<i32>(1, 0), dims), 0);
    let c = textureLoad(source, min(base + vec2<i32>(0, 1), dims), 0);
    let d = textureLoad(source, min(base + vec2<i32>(1, 1), dims), 0);
    return (a + b + c + d) * 0.25;
}
"#;
