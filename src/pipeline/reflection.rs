//! Reflection probes
//!
//! Each probe owns a cubemap with a full mip chain, allocated once at its
//! first capture and never resized. Capture renders skybox and opaque
//! geometry straight into each face, then rebuilds the mips so lookups can
//! pick a level from surface roughness.

use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::pipeline::collector::collect;
use crate::pipeline::forward_pass::{render_calls, render_skybox, SceneLighting};
use crate::pipeline::{FrameContext, ProgramKind};
use crate::render_target::{TargetPurpose, TargetSpec};
use crate::resources::primitives;
use crate::scene::{Camera, Scene, CUBE_FACES};

const CAPTURE_NEAR: f32 = 0.1;
const CAPTURE_FAR: f32 = 1000.0;

#[derive(Debug, Clone)]
pub struct ReflectionProbe {
    pub position: Vec3,
    /// Face size in pixels
    pub resolution: u32,
    pub cubemap: Option<TextureHandle>,
    /// Drawn as a mirrored sphere by the debug view
    pub visible: bool,
    pub captured: bool,
}

impl ReflectionProbe {
    pub const DEFAULT_RESOLUTION: u32 = 256;

    pub fn new(position: Vec3, resolution: u32) -> Self {
        Self {
            position,
            resolution: resolution.max(1),
            cubemap: None,
            visible: true,
            captured: false,
        }
    }

    /// The probe's cubemap, created on first use
    pub fn ensure_cubemap(&mut self, device: &mut dyn RenderDevice) -> BackendResult<TextureHandle> {
        if let Some(cubemap) = self.cubemap {
            return Ok(cubemap);
        }
        let desc = TextureDescriptor::new_cube(
            "reflection probe",
            self.resolution,
            TextureFormat::Rgba16Float,
        );
        let cubemap = device.create_texture(&desc)?;
        self.cubemap = Some(cubemap);
        Ok(cubemap)
    }
}

/// Render the six faces around `position` into `cubemap` and rebuild its mips
pub fn capture_cubemap(
    ctx: &mut FrameContext,
    scene: &Scene,
    position: Vec3,
    cubemap: TextureHandle,
    resolution: u32,
) -> BackendResult<()> {
    let depth = ctx.targets.ensure(
        &mut *ctx.device,
        TargetPurpose::CubeDepth(resolution),
        &TargetSpec::depth_only(resolution),
    )?;

    let mut calls = collect(scene, None, false);
    // a probe must not sample the cubemap it is writing
    for call in calls.opaque.iter_mut() {
        call.reflection = None;
    }
    let lighting = SceneLighting::from_scene(scene, ctx.settings.lighting);
    let technique = ctx.settings.technique;
    let background = scene.background_color.extend(1.0).to_array();

    for face in 0..CUBE_FACES.len() {
        let camera = Camera::cube_face(position, face, CAPTURE_NEAR, CAPTURE_FAR);
        ctx.device.bind(TargetBinding::CubeFace {
            cubemap,
            face: face as u32,
            depth,
        })?;
        ctx.device.clear(Some(background), true);
        render_skybox(ctx, scene, &camera);
        render_calls(ctx, &calls.opaque, &camera, technique, &lighting);
        ctx.finish_stage("reflection capture");
    }
    ctx.device.generate_mipmaps(cubemap)
}

/// Captures reflection probes: once each, or every frame when realtime
#[derive(Debug, Default)]
pub struct ReflectionCapture;

impl ReflectionCapture {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Reflection Capture"
    }

    /// Capture every probe that needs it; returns how many were captured
    pub fn update(&self, ctx: &mut FrameContext, scene: &mut Scene) -> BackendResult<usize> {
        let realtime = ctx.settings.reflections.realtime;
        let mut pending = Vec::new();
        for (index, probe) in scene.reflection_probes_mut().enumerate() {
            if probe.captured && !realtime {
                continue;
            }
            let cubemap = probe.ensure_cubemap(&mut *ctx.device)?;
            pending.push((index, probe.position, cubemap, probe.resolution));
        }

        for &(_, position, cubemap, resolution) in &pending {
            capture_cubemap(ctx, scene, position, cubemap, resolution)?;
            ctx.stats.reflection_captures += 1;
        }

        for (index, probe) in scene.reflection_probes_mut().enumerate() {
            if pending.iter().any(|(i, ..)| *i == index) {
                probe.captured = true;
            }
        }
        Ok(pending.len())
    }
}

/// Up to `count` captured probes nearest to `point`, nearest first
pub fn nearest_probes(scene: &Scene, point: Vec3, count: usize) -> Vec<(Vec3, TextureHandle)> {
    let mut probes: Vec<(Vec3, TextureHandle)> = scene
        .reflection_probes()
        .filter(|p| p.captured)
        .filter_map(|p| Some((p.position, p.cubemap?)))
        .collect();
    // stable, so equally distant probes keep scene order
    probes.sort_by(|a, b| {
        a.0.distance_squared(point)
            .total_cmp(&b.0.distance_squared(point))
    });
    probes.truncate(count);
    probes
}

/// Debug view: a mirrored sphere at each visible probe
pub fn render_probe_spheres(ctx: &mut FrameContext, scene: &Scene, camera: &Camera) {
    let size = ctx.settings.reflections.probe_size;
    let probes: Vec<(Vec3, TextureHandle)> = scene
        .reflection_probes()
        .filter(|p| p.visible)
        .filter_map(|p| Some((p.position, p.cubemap?)))
        .collect();
    if probes.is_empty() || !ctx.use_program(ProgramKind::ReflectionProbe, "reflection probes") {
        return;
    }
    ctx.upload_camera(camera);
    for (position, cubemap) in probes {
        ctx.device.upload(
            "u_model",
            Mat4::from_translation(position) * Mat4::from_scale(Vec3::splat(size)),
        );
        ctx.device.set_texture("u_environment", cubemap);
        ctx.draw_mesh(&primitives().sphere);
    }
    ctx.device.restore_state();
}
