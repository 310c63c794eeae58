//! Built-in WGSL programs for the pipeline stages
//!
//! Each program declares its uniforms and texture slots once; the WGSL
//! `Uniforms` struct and the texture bindings are generated from that
//! declaration so the shader and the packed uniform block cannot drift
//! apart. Bindings follow the backend convention: group 0 binding 0 is the
//! uniform block, group 1 holds (texture, sampler) pairs at bindings 2i and
//! 2i + 1 in declaration order.

use std::fmt::Write as _;

use crate::backend::*;
use crate::pipeline::ProgramKind;

use TextureSlotKind::{Cube, Depth, Filtered, Unfiltered};
use UniformKind::{Array, Float, Int, Mat4, Vec2, Vec3, Vec4};

/// Lights the single-pass program can shade in one draw
pub const SINGLE_PASS_LIGHTS: u32 = 8;
/// SSAO kernel slots
pub const SSAO_KERNEL_SLOTS: u32 = 64;

type Uniforms = &'static [(&'static str, UniformKind)];
type Textures = &'static [(&'static str, TextureSlotKind)];

/// Declaration of one built-in program
pub struct BuiltinProgram {
    pub kind: ProgramKind,
    uniforms: Vec<Uniforms>,
    textures: Textures,
    snippets: Vec<&'static str>,
}

impl BuiltinProgram {
    pub fn descriptor(&self) -> ProgramDescriptor {
        let mut desc = ProgramDescriptor::new(self.kind.name(), &self.source());
        for (name, kind) in self.uniforms.iter().flat_map(|u| u.iter()) {
            desc = desc.uniform(name, *kind);
        }
        for (name, kind) in self.textures {
            desc = desc.texture(name, *kind);
        }
        desc
    }

    fn source(&self) -> String {
        let mut source = String::new();
        let fields: Vec<_> = self.uniforms.iter().flat_map(|u| u.iter()).collect();
        if !fields.is_empty() {
            source.push_str("struct Uniforms {\n");
            for (name, kind) in &fields {
                let _ = writeln!(source, "    {}: {},", name, wgsl_type(*kind));
            }
            source.push_str("}\n@group(0) @binding(0) var<uniform> u: Uniforms;\n");
        }
        for (i, (name, kind)) in self.textures.iter().enumerate() {
            let _ = writeln!(
                source,
                "@group(1) @binding({}) var {}: {};\n@group(1) @binding({}) var {}_sampler: sampler;",
                i * 2,
                name,
                wgsl_texture_type(*kind),
                i * 2 + 1,
                name
            );
        }
        source.push_str(COMMON);
        for snippet in &self.snippets {
            source.push_str(snippet);
        }
        source
    }
}

fn wgsl_type(kind: UniformKind) -> String {
    match kind {
        Float => "f32".into(),
        Int => "i32".into(),
        Vec2 => "vec2<f32>".into(),
        Vec3 => "vec3<f32>".into(),
        Vec4 => "vec4<f32>".into(),
        Mat4 => "mat4x4<f32>".into(),
        Array(n) => format!("array<vec4<f32>, {}>", n.max(1)),
    }
}

fn wgsl_texture_type(kind: TextureSlotKind) -> &'static str {
    match kind {
        Filtered | Unfiltered => "texture_2d<f32>",
        Depth => "texture_depth_2d",
        Cube => "texture_cube<f32>",
    }
}

const COMMON: &str = r#"
const PI: f32 = 3.14159265;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct ScreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

struct SurfaceOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

fn screen_vertex(in: VertexInput) -> ScreenOutput {
    var out: ScreenOutput;
    out.position = vec4<f32>(in.position.xy, 0.0, 1.0);
    out.uv = in.uv;
    return out;
}

fn world_from_depth(uv: vec2<f32>, depth: f32, inverse_viewprojection: mat4x4<f32>) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = inverse_viewprojection * ndc;
    return world.xyz / world.w;
}

fn load_depth(texture: texture_depth_2d, uv: vec2<f32>) -> f32 {
    let dims = vec2<f32>(textureDimensions(texture));
    let coord = vec2<i32>(clamp(uv * dims, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
    return textureLoad(texture, coord, 0);
}

fn luma(color: vec3<f32>) -> f32 {
    return dot(color, vec3<f32>(0.299, 0.587, 0.114));
}
"#;

const SURFACE_VERTEX: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> SurfaceOutput {
    var out: SurfaceOutput;
    let world = u.u_model * vec4<f32>(in.position, 1.0);
    out.position = u.u_viewprojection * world;
    out.world = world.xyz;
    out.normal = (u.u_model * vec4<f32>(in.normal, 0.0)).xyz;
    out.uv = in.uv;
    return out;
}
"#;

const SCREEN_VERTEX: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> ScreenOutput {
    return screen_vertex(in);
}
"#;

/// Base color and emission with the optional textures, alpha-tested.
/// Both textures are sampled before the discard.
const MATERIAL: &str = r#"
struct MaterialSample {
    color: vec4<f32>,
    emissive: vec3<f32>,
}

fn sample_material(uv: vec2<f32>) -> MaterialSample {
    let albedo = textureSample(u_albedo_texture, u_albedo_texture_sampler, uv);
    let glow = textureSample(u_emissive_texture, u_emissive_texture_sampler, uv).rgb;
    var m: MaterialSample;
    m.color = select(u.u_color, u.u_color * albedo, (u.u_texture_mask & 1) != 0);
    m.emissive = select(u.u_emissive_factor, u.u_emissive_factor * glow, (u.u_texture_mask & 8) != 0);
    if (m.color.a < u.u_alpha_cutoff) {
        discard;
    }
    return m;
}
"#;

/// Mirror term from the probe cubemap assigned to the call
const ENVIRONMENT: &str = r#"
fn environment(world: vec3<f32>, normal: vec3<f32>, albedo: vec3<f32>) -> vec3<f32> {
    if (u.u_has_environment == 0) {
        return vec3<f32>(0.0);
    }
    let dir = reflect(normalize(world - u.u_camera_position), normalize(normal));
    let env = textureSampleLevel(u_environment, u_environment_sampler, dir, 0.0).rgb;
    let f0 = mix(vec3<f32>(0.04), albedo, u.u_metallic);
    return env * f0 * (1.0 - u.u_roughness);
}
"#;

/// Blinn-Phong or a GGX approximation, one light
const SHADING: &str = r#"
struct LightParams {
    color: vec3<f32>,
    position: vec3<f32>,
    direction: vec3<f32>,
    kind: i32,
    max_distance: f32,
    cos_cutoff: f32,
    spot_exponent: f32,
    intensity: f32,
}

fn shade(light: LightParams, world: vec3<f32>, normal: vec3<f32>, eye: vec3<f32>, albedo: vec3<f32>, metallic: f32, roughness: f32, mode: i32) -> vec3<f32> {
    var l: vec3<f32>;
    var attenuation = 1.0;
    if (light.kind == 2) {
        l = -normalize(light.direction);
    } else {
        let to_light = light.position - world;
        let dist = length(to_light);
        l = to_light / max(dist, 0.0001);
        let falloff = clamp(1.0 - dist / max(light.max_distance, 0.0001), 0.0, 1.0);
        attenuation = falloff * falloff;
        if (light.kind == 1) {
            let cos_angle = dot(-l, normalize(light.direction));
            attenuation *= select(0.0, pow(max(cos_angle, 0.0), light.spot_exponent), cos_angle >= light.cos_cutoff);
        }
    }
    let n = normalize(normal);
    let v = normalize(eye - world);
    let h = normalize(l + v);
    let n_dot_l = max(dot(n, l), 0.0);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);
    var diffuse = albedo;
    var specular = f0 * pow(max(dot(n, h), 0.0), 32.0);
    if (mode == 1) {
        let a = max(roughness, 0.05);
        let a2 = a * a * a * a;
        let n_dot_h = max(dot(n, h), 0.0);
        let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
        let fresnel = f0 + (vec3<f32>(1.0) - f0) * pow(1.0 - max(dot(h, v), 0.0), 5.0);
        specular = fresnel * a2 / (4.0 * PI * denom * denom);
        diffuse = albedo * (1.0 - metallic) / PI;
    }
    return (diffuse + specular) * light.color * light.intensity * n_dot_l * attenuation;
}
"#;

/// Per-light scalar uniforms plus the shadow lookup
const SINGLE_LIGHT: &str = r#"
fn current_light() -> LightParams {
    return LightParams(
        u.u_light_color,
        u.u_light_pos,
        u.u_light_direction,
        u.u_light_type,
        u.u_light_maxdist,
        u.u_cos_cutoff,
        u.u_spot_exp,
        u.u_light_intensity,
    );
}

fn shadow_factor(world: vec3<f32>) -> f32 {
    if (u.u_has_shadow == 0) {
        return 1.0;
    }
    let clip = u.u_shadow_viewproj * vec4<f32>(world, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0) {
        return 1.0;
    }
    let stored = load_depth(u_shadowmap, uv);
    return select(1.0, 0.0, ndc.z - u.u_shadow_bias > stored);
}
"#;

const TEXTURE_FS: &str = r#"
@fragment
fn fs_main(in: SurfaceOutput) -> @location(0) vec4<f32> {
    return sample_material(in.uv).color;
}
"#;

const FLAT_FS: &str = r#"
@fragment
fn fs_main(in: SurfaceOutput) {
}
"#;

const MULTI_PASS_FS: &str = r#"
@fragment
fn fs_main(in: SurfaceOutput) -> @location(0) vec4<f32> {
    let m = sample_material(in.uv);
    let color = m.color;
    var result = shade(current_light(), in.world, in.normal, u.u_camera_position, color.rgb, u.u_metallic, u.u_roughness, u.u_ilum_mode) * shadow_factor(in.world);
    if (u.u_iteration == 0) {
        result += color.rgb * u.u_light_ambient + m.emissive + environment(in.world, in.normal, color.rgb);
    }
    return vec4<f32>(result, color.a);
}
"#;

const SINGLE_PASS_FS: &str = r#"
@fragment
fn fs_main(in: SurfaceOutput) -> @location(0) vec4<f32> {
    let m = sample_material(in.uv);
    let color = m.color;
    var result = color.rgb * u.u_light_ambient + m.emissive + environment(in.world, in.normal, color.rgb);
    for (var i = 0; i < u.u_num_lights; i++) {
        let light = LightParams(
            u.u_light_color[i].xyz,
            u.u_light_pos[i].xyz,
            u.u_light_direction[i].xyz,
            bitcast<i32>(u.u_light_type[i].x),
            u.u_light_maxdist[i].x,
            u.u_cos_cutoff[i].x,
            u.u_spot_exp[i].x,
            u.u_light_intensity[i].x,
        );
        result += shade(light, in.world, in.normal, u.u_camera_position, color.rgb, u.u_metallic, u.u_roughness, u.u_ilum_mode);
    }
    return vec4<f32>(result, color.a);
}
"#;

const GBUFFERS_FS: &str = r#"
struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) omr: vec4<f32>,
    @location(3) emissive: vec4<f32>,
}

@fragment
fn fs_main(in: SurfaceOutput) -> GBufferOutput {
    let m = sample_material(in.uv);
    var out: GBufferOutput;
    out.albedo = vec4<f32>(m.color.rgb, 1.0);
    out.normal = vec4<f32>(normalize(in.normal), 1.0);
    out.omr = vec4<f32>(1.0, u.u_metallic, u.u_roughness, 1.0);
    out.emissive = vec4<f32>(m.emissive, 1.0);
    return out;
}
"#;

const DEFERRED_AMBIENT_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let albedo = textureSample(u_albedo, u_albedo_sampler, in.uv).rgb;
    let emissive = textureSample(u_emissive, u_emissive_sampler, in.uv).rgb;
    let ssao = textureSample(u_ssao, u_ssao_sampler, in.uv).r;
    let irradiance = textureSample(u_irradiance, u_irradiance_sampler, in.uv).rgb;
    var occlusion = textureSample(u_omr, u_omr_sampler, in.uv).r;
    // nothing was drawn here: keep the background
    if (load_depth(u_depth_texture, in.uv) >= 1.0) {
        discard;
    }
    if (u.u_apply_ssao != 0) {
        occlusion *= ssao;
    }
    var ambient = u.u_light_ambient;
    if (u.u_apply_irradiance != 0) {
        ambient += irradiance / PI;
    }
    return vec4<f32>(albedo * ambient * occlusion + emissive, 1.0);
}
"#;

const DEFERRED_GEOMETRY_VS: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> ScreenOutput {
    var out: ScreenOutput;
    out.position = u.u_viewprojection * u.u_model * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}
"#;

/// Shared by the fullscreen and the light-volume variants; the screen
/// position comes from the fragment coordinate, not the vertex uv
const DEFERRED_LIGHT_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let uv = in.position.xy * u.u_iRes;
    let albedo = textureSample(u_albedo, u_albedo_sampler, uv).rgb;
    let normal = textureSample(u_normal_texture, u_normal_texture_sampler, uv).xyz;
    let omr = textureSample(u_omr, u_omr_sampler, uv);
    let ssao = textureSample(u_ssao, u_ssao_sampler, uv).r;
    let depth = load_depth(u_depth_texture, uv);
    if (depth >= 1.0) {
        discard;
    }
    let world = world_from_depth(uv, depth, u.u_inverse_viewprojection);
    var result = shade(current_light(), world, normal, u.u_camera_position, albedo, omr.g, omr.b, u.u_ilum_mode) * shadow_factor(world);
    if (u.u_apply_ssao != 0) {
        result *= ssao;
    }
    return vec4<f32>(result, 1.0);
}
"#;

const SSAO_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let n = normalize(textureSample(u_normal_texture, u_normal_texture_sampler, in.uv).xyz);
    let depth = load_depth(u_depth_texture, in.uv);
    if (depth >= 1.0) {
        return vec4<f32>(1.0);
    }
    let world = world_from_depth(in.uv, depth, u.u_inverse_viewprojection);
    let helper = select(vec3<f32>(0.0, 1.0, 0.0), vec3<f32>(1.0, 0.0, 0.0), abs(n.y) > 0.99);
    let t = normalize(cross(helper, n));
    let b = cross(n, t);
    let basis = mat3x3<f32>(t, b, n);

    var occluded = 0.0;
    let count = min(u.u_num_points, 64);
    for (var i = 0; i < count; i++) {
        let sample_world = world + basis * u.u_points[i].xyz * u.u_radius;
        let clip = u.u_viewprojection * vec4<f32>(sample_world, 1.0);
        let ndc = clip.xyz / clip.w;
        let sample_uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let scene_depth = load_depth(u_depth_texture, sample_uv);
        let difference = ndc.z - scene_depth;
        if (difference > u.u_bias && difference < u.u_max_distance) {
            occluded += 1.0;
        }
    }
    let ao = 1.0 - occluded / f32(max(count, 1));
    return vec4<f32>(ao, ao, ao, 1.0);
}
"#;

const IRRADIANCE_FS: &str = r#"
fn probe_irradiance(index: i32, n: vec3<f32>) -> vec3<f32> {
    var c: array<vec3<f32>, 9>;
    for (var i = 0; i < 9; i++) {
        c[i] = textureLoad(u_probes_texture, vec2<i32>(i, index), 0).rgb;
    }
    // cosine-lobe convolved band weights
    let a0 = PI;
    let a1 = 2.0 * PI / 3.0;
    let a2 = PI / 4.0;
    return c[0] * 0.282095 * a0
        + c[1] * 0.488603 * n.y * a1
        + c[2] * 0.488603 * n.z * a1
        + c[3] * 0.488603 * n.x * a1
        + c[4] * 1.092548 * n.x * n.y * a2
        + c[5] * 1.092548 * n.y * n.z * a2
        + c[6] * 0.315392 * (3.0 * n.z * n.z - 1.0) * a2
        + c[7] * 1.092548 * n.x * n.z * a2
        + c[8] * 0.546274 * (n.x * n.x - n.y * n.y) * a2;
}

fn probe_index(cell: vec3<i32>) -> i32 {
    let dims = vec3<i32>(u.u_irr_dims);
    let c = clamp(cell, vec3<i32>(0), dims - vec3<i32>(1));
    return c.x + c.y * dims.x + c.z * dims.x * dims.y;
}

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let n = normalize(textureSample(u_normal_texture, u_normal_texture_sampler, in.uv).xyz);
    let depth = load_depth(u_depth_texture, in.uv);
    if (depth >= 1.0 || u.u_num_probes == 0) {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
    let world = world_from_depth(in.uv, depth, u.u_inverse_viewprojection);
    let delta = select(u.u_irr_delta, vec3<f32>(1.0), u.u_irr_delta == vec3<f32>(0.0));
    let local = clamp((world - u.u_irr_start) / delta, vec3<f32>(0.0), u.u_irr_dims - vec3<f32>(1.0));

    if (u.u_trilinear == 0) {
        return vec4<f32>(max(probe_irradiance(probe_index(vec3<i32>(round(local))), n), vec3<f32>(0.0)), 1.0);
    }
    let base = vec3<i32>(floor(local));
    let f = fract(local);
    var result = vec3<f32>(0.0);
    for (var i = 0; i < 8; i++) {
        let offset = vec3<i32>(i & 1, (i >> 1u) & 1, (i >> 2u) & 1);
        let w = mix(1.0 - f, f, vec3<f32>(offset));
        result += probe_irradiance(probe_index(base + offset), n) * w.x * w.y * w.z;
    }
    return vec4<f32>(max(result, vec3<f32>(0.0)), 1.0);
}
"#;

const REFLECTIONS_FS: &str = r#"
fn environment(i: i32, dir: vec3<f32>, level: f32) -> vec3<f32> {
    switch i {
        case 0: { return textureSampleLevel(u_environment0, u_environment0_sampler, dir, level).rgb; }
        case 1: { return textureSampleLevel(u_environment1, u_environment1_sampler, dir, level).rgb; }
        case 2: { return textureSampleLevel(u_environment2, u_environment2_sampler, dir, level).rgb; }
        default: { return textureSampleLevel(u_environment3, u_environment3_sampler, dir, level).rgb; }
    }
}

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let n = normalize(textureSample(u_normal_texture, u_normal_texture_sampler, in.uv).xyz);
    let omr = textureSample(u_omr, u_omr_sampler, in.uv);
    let depth = load_depth(u_depth_texture, in.uv);
    if (depth >= 1.0) {
        discard;
    }
    let world = world_from_depth(in.uv, depth, u.u_inverse_viewprojection);
    let dir = reflect(normalize(world - u.u_camera_position), n);
    let level = omr.b * f32(textureNumLevels(u_environment0) - 1u);

    var total = vec3<f32>(0.0);
    var weights = 0.0;
    for (var i = 0; i < min(u.u_num_probes, 4); i++) {
        let w = 1.0 / max(distance(world, u.u_probe_pos[i].xyz), 0.001);
        total += environment(i, dir, level) * w;
        weights += w;
    }
    let strength = mix(0.04, 1.0, omr.g) * (1.0 - omr.b);
    return vec4<f32>(total / max(weights, 0.0001) * strength, 1.0);
}
"#;

const FOG_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let depth = load_depth(u_depth_texture, in.uv);
    let end = world_from_depth(in.uv, depth, u.u_inverse_viewprojection);
    let ray = end - u.u_camera_position;
    let length_ = min(length(ray), u.u_max_distance);
    let dir = normalize(ray);
    let steps = max(u.u_samples, 1);
    let step_size = length_ / f32(steps);
    let light = current_light();

    var accumulated = vec3<f32>(0.0);
    for (var i = 0; i < steps; i++) {
        let p = u.u_camera_position + dir * (f32(i) + 0.5) * step_size;
        var attenuation = 1.0;
        if (light.kind != 2) {
            let falloff = clamp(1.0 - distance(p, light.position) / max(light.max_distance, 0.0001), 0.0, 1.0);
            attenuation = falloff * falloff;
        }
        accumulated += light.color * light.intensity * attenuation * shadow_factor(p) * step_size;
    }
    let alpha = 1.0 - exp(-u.u_density * length_);
    return vec4<f32>(accumulated * u.u_density, alpha);
}
"#;

const BLOOM_EXTRACT_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let color = textureSample(u_texture, u_texture_sampler, in.uv).rgb;
    return vec4<f32>(select(vec3<f32>(0.0), color, luma(color) > u.u_threshold), 1.0);
}
"#;

const BLOOM_BLUR_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let weights = array<f32, 5>(0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);
    let step = u.u_direction * u.u_iRes;
    var result = textureSample(u_texture, u_texture_sampler, in.uv).rgb * weights[0];
    for (var i = 1; i < 5; i++) {
        let offset = step * f32(i);
        result += textureSample(u_texture, u_texture_sampler, in.uv + offset).rgb * weights[i];
        result += textureSample(u_texture, u_texture_sampler, in.uv - offset).rgb * weights[i];
    }
    return vec4<f32>(result, 1.0);
}
"#;

const BLOOM_COMPOSITE_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let color = textureSample(u_texture, u_texture_sampler, in.uv);
    let bloom = textureSample(u_bloom, u_bloom_sampler, in.uv).rgb;
    return vec4<f32>(color.rgb + bloom * u.u_intensity, color.a);
}
"#;

const TONEMAPPER_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let color = textureSample(u_texture, u_texture_sampler, in.uv);
    if (u.u_apply == 0) {
        return color;
    }
    let lum = max(luma(color.rgb), 0.0001);
    let scaled = lum * u.u_scale / u.u_average_lum;
    let mapped = scaled * (1.0 + scaled / u.u_lumwhite2) / (1.0 + scaled);
    let rgb = color.rgb * (mapped / lum);
    return vec4<f32>(pow(max(rgb, vec3<f32>(0.0)), vec3<f32>(1.0 / u.u_gamma)), color.a);
}
"#;

const FXAA_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let center = textureSampleLevel(u_texture, u_texture_sampler, in.uv, 0.0);
    let n = luma(textureSampleLevel(u_texture, u_texture_sampler, in.uv + vec2<f32>(0.0, -u.u_iRes.y), 0.0).rgb);
    let s = luma(textureSampleLevel(u_texture, u_texture_sampler, in.uv + vec2<f32>(0.0, u.u_iRes.y), 0.0).rgb);
    let e = luma(textureSampleLevel(u_texture, u_texture_sampler, in.uv + vec2<f32>(u.u_iRes.x, 0.0), 0.0).rgb);
    let w = luma(textureSampleLevel(u_texture, u_texture_sampler, in.uv + vec2<f32>(-u.u_iRes.x, 0.0), 0.0).rgb);
    let m = luma(center.rgb);
    let lo = min(m, min(min(n, s), min(e, w)));
    let hi = max(m, max(max(n, s), max(e, w)));
    let contrast = hi - lo;
    if (contrast < max(u.u_edge_threshold_min, hi * u.u_edge_threshold)) {
        return center;
    }
    let horizontal = abs(n + s - 2.0 * m) >= abs(e + w - 2.0 * m);
    let step = select(vec2<f32>(u.u_iRes.x, 0.0), vec2<f32>(0.0, u.u_iRes.y), horizontal);
    let a = textureSampleLevel(u_texture, u_texture_sampler, in.uv + step * 0.5, 0.0);
    let b = textureSampleLevel(u_texture, u_texture_sampler, in.uv - step * 0.5, 0.0);
    return mix(center, (a + b) * 0.5, 0.5);
}
"#;

const SKYBOX: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> SurfaceOutput {
    var out: SurfaceOutput;
    let world = u.u_model * vec4<f32>(in.position, 1.0);
    out.position = u.u_viewprojection * world;
    out.world = world.xyz;
    out.normal = in.position;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: SurfaceOutput) -> @location(0) vec4<f32> {
    let dir = normalize(in.world - u.u_camera_position);
    return vec4<f32>(textureSample(u_skybox, u_skybox_sampler, dir).rgb, 1.0);
}
"#;

const PROBE_FS: &str = r#"
@fragment
fn fs_main(in: SurfaceOutput) -> @location(0) vec4<f32> {
    let n = normalize(in.normal);
    let c = u.u_coeffs;
    let irradiance = c[0].xyz * 0.282095 * PI
        + (c[1].xyz * n.y + c[2].xyz * n.z + c[3].xyz * n.x) * 0.488603 * (2.0 * PI / 3.0)
        + (c[4].xyz * 1.092548 * n.x * n.y
            + c[5].xyz * 1.092548 * n.y * n.z
            + c[6].xyz * 0.315392 * (3.0 * n.z * n.z - 1.0)
            + c[7].xyz * 1.092548 * n.x * n.z
            + c[8].xyz * 0.546274 * (n.x * n.x - n.y * n.y)) * (PI / 4.0);
    return vec4<f32>(max(irradiance / PI, vec3<f32>(0.0)), 1.0);
}
"#;

const REFLECTION_PROBE_FS: &str = r#"
@fragment
fn fs_main(in: SurfaceOutput) -> @location(0) vec4<f32> {
    let dir = reflect(normalize(in.world - u.u_camera_position), normalize(in.normal));
    return vec4<f32>(textureSampleLevel(u_environment, u_environment_sampler, dir, 0.0).rgb, 1.0);
}
"#;

const VIEWPORT_RECT_VS: &str = r#"
@vertex
fn vs_main(in: VertexInput) -> ScreenOutput {
    var out: ScreenOutput;
    let r = u.u_viewport_rect;
    let p = vec2<f32>(r.x + in.uv.x * r.z, r.y + in.uv.y * r.w);
    out.position = vec4<f32>(p.x * 2.0 - 1.0, 1.0 - p.y * 2.0, 0.0, 1.0);
    out.uv = in.uv;
    return out;
}
"#;

const QUAD_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(textureSample(u_texture, u_texture_sampler, in.uv).rgb, 1.0);
}
"#;

const DEPTH_FS: &str = r#"
@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let depth = load_depth(u_texture, in.uv);
    let near = u.u_camera_nearfar.x;
    let far = u.u_camera_nearfar.y;
    var value = depth;
    if (u.u_linearize != 0) {
        value = (near * far / (far - depth * (far - near)) - near) / (far - near);
    }
    return vec4<f32>(value, value, value, 1.0);
}
"#;

const CAMERA: Uniforms = &[("u_viewprojection", Mat4), ("u_model", Mat4)];
const EYE: Uniforms = &[("u_camera_position", Vec3)];
const MATERIAL_UNIFORMS: Uniforms = &[
    ("u_color", Vec4),
    ("u_metallic", Float),
    ("u_roughness", Float),
    ("u_emissive_factor", Vec3),
    ("u_alpha_cutoff", Float),
    ("u_texture_mask", Int),
];
const LIGHT_UNIFORMS: Uniforms = &[
    ("u_light_color", Vec3),
    ("u_light_type", Int),
    ("u_light_pos", Vec3),
    ("u_light_maxdist", Float),
    ("u_light_direction", Vec3),
    ("u_cos_cutoff", Float),
    ("u_spot_exp", Float),
    ("u_light_intensity", Float),
    ("u_has_shadow", Int),
    ("u_shadow_bias", Float),
    ("u_shadow_viewproj", Mat4),
];
const LIGHT_ARRAYS: Uniforms = &[
    ("u_num_lights", Int),
    ("u_light_color", Array(SINGLE_PASS_LIGHTS)),
    ("u_light_pos", Array(SINGLE_PASS_LIGHTS)),
    ("u_light_direction", Array(SINGLE_PASS_LIGHTS)),
    ("u_light_type", Array(SINGLE_PASS_LIGHTS)),
    ("u_light_maxdist", Array(SINGLE_PASS_LIGHTS)),
    ("u_cos_cutoff", Array(SINGLE_PASS_LIGHTS)),
    ("u_spot_exp", Array(SINGLE_PASS_LIGHTS)),
    ("u_light_intensity", Array(SINGLE_PASS_LIGHTS)),
];
const SCREEN: Uniforms = &[("u_inverse_viewprojection", Mat4), ("u_iRes", Vec2)];
const VIEWPROJECTION: Uniforms = &[("u_viewprojection", Mat4)];
const AMBIENT: Uniforms = &[
    ("u_light_ambient", Vec3),
    ("u_apply_ssao", Int),
    ("u_apply_irradiance", Int),
];
const SSAO_KERNEL: Uniforms = &[
    ("u_points", Array(SSAO_KERNEL_SLOTS)),
    ("u_num_points", Int),
    ("u_bias", Float),
    ("u_radius", Float),
    ("u_max_distance", Float),
];
const VIEWPORT_RECT: Uniforms = &[("u_viewport_rect", Vec4)];
const DEPTH_VIEW: Uniforms = &[("u_camera_nearfar", Vec2), ("u_linearize", Int)];
const SINGLE_TEXTURE: Textures = &[("u_texture", Filtered)];

/// Every program the pipeline ships with
pub fn builtin_programs() -> Vec<BuiltinProgram> {
    vec![
        BuiltinProgram {
            kind: ProgramKind::Texture,
            uniforms: vec![CAMERA, MATERIAL_UNIFORMS],
            textures: &[("u_albedo_texture", Filtered), ("u_emissive_texture", Filtered)],
            snippets: vec![MATERIAL, SURFACE_VERTEX, TEXTURE_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::Flat,
            uniforms: vec![CAMERA],
            textures: &[],
            snippets: vec![SURFACE_VERTEX, FLAT_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::MultiPass,
            uniforms: vec![
                CAMERA,
                EYE,
                MATERIAL_UNIFORMS,
                LIGHT_UNIFORMS,
                &[
                    ("u_light_ambient", Vec3),
                    ("u_ilum_mode", Int),
                    ("u_iteration", Int),
                    ("u_has_environment", Int),
                ],
            ],
            textures: &[
                ("u_albedo_texture", Filtered),
                ("u_emissive_texture", Filtered),
                ("u_shadowmap", Depth),
                ("u_environment", Cube),
            ],
            snippets: vec![
                MATERIAL,
                ENVIRONMENT,
                SHADING,
                SINGLE_LIGHT,
                SURFACE_VERTEX,
                MULTI_PASS_FS,
            ],
        },
        BuiltinProgram {
            kind: ProgramKind::SinglePass,
            uniforms: vec![
                CAMERA,
                EYE,
                MATERIAL_UNIFORMS,
                &[
                    ("u_light_ambient", Vec3),
                    ("u_ilum_mode", Int),
                    ("u_has_environment", Int),
                ],
                LIGHT_ARRAYS,
            ],
            textures: &[
                ("u_albedo_texture", Filtered),
                ("u_emissive_texture", Filtered),
                ("u_environment", Cube),
            ],
            snippets: vec![MATERIAL, ENVIRONMENT, SHADING, SURFACE_VERTEX, SINGLE_PASS_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::GBuffers,
            uniforms: vec![CAMERA, MATERIAL_UNIFORMS],
            textures: &[("u_albedo_texture", Filtered), ("u_emissive_texture", Filtered)],
            snippets: vec![MATERIAL, SURFACE_VERTEX, GBUFFERS_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::DeferredAmbient,
            uniforms: vec![AMBIENT],
            textures: &[
                ("u_albedo", Filtered),
                ("u_omr", Filtered),
                ("u_emissive", Filtered),
                ("u_depth_texture", Depth),
                ("u_ssao", Filtered),
                ("u_irradiance", Filtered),
            ],
            snippets: vec![SCREEN_VERTEX, DEFERRED_AMBIENT_FS],
        },
        deferred_light(ProgramKind::DeferredMultiPass, SCREEN_VERTEX),
        deferred_light(ProgramKind::DeferredGeometry, DEFERRED_GEOMETRY_VS),
        BuiltinProgram {
            kind: ProgramKind::Ssao,
            uniforms: vec![VIEWPROJECTION, SCREEN, SSAO_KERNEL],
            textures: &[("u_depth_texture", Depth), ("u_normal_texture", Filtered)],
            snippets: vec![SCREEN_VERTEX, SSAO_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::Irradiance,
            uniforms: vec![
                SCREEN,
                &[
                    ("u_irr_start", Vec3),
                    ("u_num_probes", Int),
                    ("u_irr_end", Vec3),
                    ("u_trilinear", Int),
                    ("u_irr_delta", Vec3),
                    ("u_irr_dims", Vec3),
                ],
            ],
            textures: &[
                ("u_depth_texture", Depth),
                ("u_normal_texture", Filtered),
                ("u_probes_texture", Unfiltered),
            ],
            snippets: vec![SCREEN_VERTEX, IRRADIANCE_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::Reflections,
            uniforms: vec![
                SCREEN,
                EYE,
                &[("u_num_probes", Int), ("u_probe_pos", Array(4))],
            ],
            textures: &[
                ("u_normal_texture", Filtered),
                ("u_omr", Filtered),
                ("u_depth_texture", Depth),
                ("u_environment0", Cube),
                ("u_environment1", Cube),
                ("u_environment2", Cube),
                ("u_environment3", Cube),
            ],
            snippets: vec![SCREEN_VERTEX, REFLECTIONS_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::Fog,
            uniforms: vec![
                SCREEN,
                EYE,
                LIGHT_UNIFORMS,
                &[("u_density", Float), ("u_samples", Int), ("u_max_distance", Float)],
            ],
            textures: &[("u_depth_texture", Depth), ("u_shadowmap", Depth)],
            snippets: vec![SHADING, SINGLE_LIGHT, SCREEN_VERTEX, FOG_FS],
        },
        screen_program(
            ProgramKind::BloomExtract,
            &[("u_threshold", Float)],
            SINGLE_TEXTURE,
            BLOOM_EXTRACT_FS,
        ),
        screen_program(
            ProgramKind::BloomBlur,
            &[("u_direction", Vec2), ("u_iRes", Vec2)],
            SINGLE_TEXTURE,
            BLOOM_BLUR_FS,
        ),
        screen_program(
            ProgramKind::BloomComposite,
            &[("u_intensity", Float)],
            &[("u_texture", Filtered), ("u_bloom", Filtered)],
            BLOOM_COMPOSITE_FS,
        ),
        screen_program(
            ProgramKind::Tonemapper,
            &[
                ("u_average_lum", Float),
                ("u_lumwhite2", Float),
                ("u_scale", Float),
                ("u_gamma", Float),
                ("u_apply", Int),
            ],
            SINGLE_TEXTURE,
            TONEMAPPER_FS,
        ),
        screen_program(
            ProgramKind::Fxaa,
            &[
                ("u_iRes", Vec2),
                ("u_edge_threshold", Float),
                ("u_edge_threshold_min", Float),
            ],
            SINGLE_TEXTURE,
            FXAA_FS,
        ),
        BuiltinProgram {
            kind: ProgramKind::Skybox,
            uniforms: vec![CAMERA, EYE],
            textures: &[("u_skybox", Cube)],
            snippets: vec![SKYBOX],
        },
        BuiltinProgram {
            kind: ProgramKind::Probe,
            uniforms: vec![CAMERA, &[("u_coeffs", Array(9))]],
            textures: &[],
            snippets: vec![SURFACE_VERTEX, PROBE_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::ReflectionProbe,
            uniforms: vec![CAMERA, EYE],
            textures: &[("u_environment", Cube)],
            snippets: vec![SURFACE_VERTEX, REFLECTION_PROBE_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::Depth,
            uniforms: vec![VIEWPORT_RECT, DEPTH_VIEW],
            textures: &[("u_texture", Depth)],
            snippets: vec![VIEWPORT_RECT_VS, DEPTH_FS],
        },
        BuiltinProgram {
            kind: ProgramKind::Quad,
            uniforms: vec![VIEWPORT_RECT],
            textures: SINGLE_TEXTURE,
            snippets: vec![VIEWPORT_RECT_VS, QUAD_FS],
        },
    ]
}

fn deferred_light(kind: ProgramKind, vertex: &'static str) -> BuiltinProgram {
    BuiltinProgram {
        kind,
        uniforms: vec![
            CAMERA,
            SCREEN,
            EYE,
            LIGHT_UNIFORMS,
            &[("u_ilum_mode", Int), ("u_apply_ssao", Int)],
        ],
        textures: &[
            ("u_albedo", Filtered),
            ("u_normal_texture", Filtered),
            ("u_omr", Filtered),
            ("u_depth_texture", Depth),
            ("u_ssao", Filtered),
            ("u_shadowmap", Depth),
        ],
        snippets: vec![SHADING, SINGLE_LIGHT, vertex, DEFERRED_LIGHT_FS],
    }
}

fn screen_program(
    kind: ProgramKind,
    uniforms: Uniforms,
    textures: Textures,
    fragment: &'static str,
) -> BuiltinProgram {
    BuiltinProgram {
        kind,
        uniforms: vec![uniforms],
        textures,
        snippets: vec![SCREEN_VERTEX, fragment],
    }
}

/// Register every built-in program with `device`. Returns how many were
/// registered; programs the device rejects are logged and left out.
pub fn register_builtin_programs(device: &mut dyn RenderDevice) -> usize {
    let mut registered = 0;
    for program in builtin_programs() {
        match device.register_program(&program.descriptor()) {
            Ok(_) => registered += 1,
            Err(e) => log::warn!("Program '{}' not registered: {}", program.kind.name(), e),
        }
    }
    log::info!("Registered {} built-in programs on {}", registered, device.name());
    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_program_kind_is_built_in() {
        let kinds: HashSet<ProgramKind> = builtin_programs().iter().map(|p| p.kind).collect();
        assert_eq!(kinds.len(), ProgramKind::ALL.len());
    }

    #[test]
    fn test_uniform_struct_matches_declaration_order() {
        let programs = builtin_programs();
        let tonemapper = programs
            .iter()
            .find(|p| p.kind == ProgramKind::Tonemapper)
            .expect("tonemapper");
        let source = tonemapper.source();
        let average = source.find("u_average_lum: f32").expect("declared");
        let gamma = source.find("u_gamma: f32").expect("declared");
        assert!(average < gamma);
        assert!(source.contains("@group(1) @binding(1) var u_texture_sampler: sampler;"));

        let desc = tonemapper.descriptor();
        assert_eq!(desc.uniforms[0], ("u_average_lum".to_string(), Float));
        assert_eq!(desc.textures, vec![("u_texture".to_string(), Filtered)]);
    }

    #[test]
    fn test_register_with_dummy_device() {
        let mut device = DummyBackend::new(8, 8);
        assert_eq!(register_builtin_programs(&mut device), ProgramKind::ALL.len());
        for name in ProgramKind::all_names() {
            assert!(device.find_program(name).is_some(), "{name}");
        }
    }
}
