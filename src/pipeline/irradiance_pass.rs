//! Irradiance bake and screen-space evaluation
//!
//! The bake renders the scene from every probe through six 90 degree
//! faces, reads each face back as floats and projects it onto SH. It can
//! run incrementally, a few probes per frame, and is cached on disk.

use std::path::{Path, PathBuf};

use glam::{Mat4, Vec3};
use image::Rgba32FImage;

use crate::backend::*;
use crate::pipeline::collector::collect;
use crate::pipeline::forward_pass::{render_calls, render_skybox, SceneLighting};
use crate::pipeline::gbuffer_pass::GBufferTextures;
use crate::pipeline::irradiance::{IrradianceError, IrradianceVolume};
use crate::pipeline::sh::{project_cubemap, ShCoefficients};
use crate::pipeline::{FrameContext, ProgramKind};
use crate::render_target::{TargetPurpose, TargetSpec, TextureSize};
use crate::resources::primitives;
use crate::scene::{Camera, Scene, CUBE_FACES};

pub const CAPTURE_NEAR: f32 = 0.1;
pub const CAPTURE_FAR: f32 = 1000.0;

/// Where the coefficients of a finished volume came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeOutcome {
    /// Nothing to do: no volume, or already baked
    Idle,
    /// Probes still pending after this step
    InProgress { baked: usize, total: usize },
    Baked,
    Loaded,
}

/// Render the six faces around `position` and read them back
pub fn capture_faces(
    ctx: &mut FrameContext,
    scene: &Scene,
    position: Vec3,
) -> BackendResult<Vec<Rgba32FImage>> {
    let spec = TargetSpec::screen(&[TextureFormat::Rgba16Float])
        .with_depth()
        .with_size(TextureSize::square(ctx.settings.irradiance.capture_size));
    let target = ctx
        .targets
        .ensure(&mut *ctx.device, TargetPurpose::ProbeCapture, &spec)?;

    let calls = collect(scene, None, false);
    let lighting = SceneLighting::from_scene(scene, ctx.settings.lighting).useful_only();
    let background = scene.background_color.extend(1.0).to_array();
    let technique = ctx.settings.technique;

    let mut faces = Vec::with_capacity(CUBE_FACES.len());
    for face in 0..CUBE_FACES.len() {
        let camera = Camera::cube_face(position, face, CAPTURE_NEAR, CAPTURE_FAR);
        ctx.device.bind(TargetBinding::Target(target))?;
        ctx.device.clear(Some(background), true);
        render_skybox(ctx, scene, &camera);
        render_calls(ctx, &calls.opaque, &camera, technique, &lighting);
        render_calls(ctx, &calls.blended, &camera, technique, &lighting);
        ctx.finish_stage("irradiance capture");
        faces.push(ctx.device.read_color(target, 0)?);
    }
    Ok(faces)
}

pub fn capture_probe(
    ctx: &mut FrameContext,
    scene: &Scene,
    position: Vec3,
) -> BackendResult<ShCoefficients> {
    let faces = capture_faces(ctx, scene, position)?;
    Ok(project_cubemap(&faces))
}

/// Drives the bake of the scene's irradiance volume across frames
#[derive(Debug, Default)]
pub struct IrradianceBaker {
    cache_path: Option<PathBuf>,
    cache_checked: bool,
}

impl IrradianceBaker {
    pub fn new(cache_path: Option<PathBuf>) -> Self {
        Self {
            cache_path,
            cache_checked: false,
        }
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Forget the current bake so the next update re-captures every probe
    pub fn invalidate(&mut self, scene: &mut Scene) {
        if let Some(volume) = scene.irradiance_mut() {
            volume.baked = 0;
        }
        self.cache_checked = true;
    }

    /// Bake up to `max_probes` pending probes. Uploads the lookup texture
    /// once the last probe is done.
    pub fn bake_step(
        &self,
        ctx: &mut FrameContext,
        scene: &mut Scene,
        max_probes: usize,
    ) -> BackendResult<BakeOutcome> {
        let pending: Vec<(usize, Vec3)> = match scene.irradiance() {
            Some(volume) if !volume.is_baked() => volume
                .probes
                .iter()
                .enumerate()
                .skip(volume.baked)
                .take(max_probes.max(1))
                .map(|(i, p)| (i, p.position))
                .collect(),
            _ => return Ok(BakeOutcome::Idle),
        };

        let mut baked = Vec::with_capacity(pending.len());
        for (index, position) in pending {
            baked.push((index, capture_probe(ctx, scene, position)?));
            ctx.stats.probes_baked += 1;
        }

        let Some(volume) = scene.irradiance_mut() else {
            return Ok(BakeOutcome::Idle);
        };
        for (index, sh) in baked {
            volume.probes[index].sh = sh;
            volume.baked = index + 1;
        }
        if !volume.is_baked() {
            return Ok(BakeOutcome::InProgress {
                baked: volume.baked,
                total: volume.probes.len(),
            });
        }
        volume.upload_lookup(&mut *ctx.device)?;
        log::info!("Irradiance bake finished: {} probes", volume.probes.len());
        Ok(BakeOutcome::Baked)
    }

    /// Capture every remaining probe now
    pub fn bake(&self, ctx: &mut FrameContext, scene: &mut Scene) -> BackendResult<BakeOutcome> {
        self.bake_step(ctx, scene, usize::MAX)
    }

    /// Replace the volume's coefficients with a compatible cached bake
    fn try_load(&self, ctx: &mut FrameContext, scene: &mut Scene) -> BackendResult<bool> {
        let Some(path) = self.cache_path.as_deref() else {
            return Ok(false);
        };
        let Some(volume) = scene.irradiance_mut() else {
            return Ok(false);
        };
        let loaded = match IrradianceVolume::load(path) {
            Ok(loaded) => loaded,
            Err(IrradianceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No irradiance cache at {}, baking", path.display());
                return Ok(false);
            }
            Err(e) => {
                log::warn!("Ignoring irradiance cache {}: {}", path.display(), e);
                return Ok(false);
            }
        };
        if !volume.same_layout(&loaded) {
            log::warn!(
                "Irradiance cache {} describes a different grid, baking",
                path.display()
            );
            return Ok(false);
        }
        volume.probes = loaded.probes;
        volume.baked = volume.probes.len();
        volume.upload_lookup(&mut *ctx.device)?;
        Ok(true)
    }

    /// Per-frame entry point: load from the cache once, otherwise continue
    /// the bake and save it when complete
    pub fn update(&mut self, ctx: &mut FrameContext, scene: &mut Scene) -> BackendResult<BakeOutcome> {
        let Some(volume) = scene.irradiance_mut() else {
            return Ok(BakeOutcome::Idle);
        };
        if volume.is_baked() {
            if volume.lookup.is_none() {
                volume.upload_lookup(&mut *ctx.device)?;
            }
            return Ok(BakeOutcome::Idle);
        }

        if !self.cache_checked {
            self.cache_checked = true;
            if self.try_load(ctx, scene)? {
                return Ok(BakeOutcome::Loaded);
            }
        }

        let per_frame = match ctx.settings.irradiance.probes_per_frame {
            0 => usize::MAX,
            n => n,
        };
        let outcome = self.bake_step(ctx, scene, per_frame)?;
        if outcome == BakeOutcome::Baked {
            if let (Some(path), Some(volume)) = (self.cache_path.as_deref(), scene.irradiance()) {
                if let Err(e) = volume.save(path) {
                    log::warn!("Could not write irradiance cache: {}", e);
                }
            }
        }
        Ok(outcome)
    }
}

/// Screen-space irradiance from the probe volume, sampled per pixel using
/// gbuffer depth and normals
pub fn render_irradiance(
    ctx: &mut FrameContext,
    camera: &Camera,
    gbuffers: &GBufferTextures,
    volume: &IrradianceVolume,
) -> BackendResult<Option<TextureHandle>> {
    if !volume.active || volume.lookup.is_none() {
        return Ok(None);
    }
    if !ctx.has_program(ProgramKind::Irradiance) {
        ctx.use_program(ProgramKind::Irradiance, "irradiance");
        return Ok(None);
    }
    ctx.bind_target(
        TargetPurpose::Irradiance,
        &TargetSpec::screen(&[TextureFormat::Rgba16Float]),
    )?;
    ctx.device.clear(Some([0.0, 0.0, 0.0, 1.0]), false);
    ctx.use_program(ProgramKind::Irradiance, "irradiance");
    ctx.device.set_raster_state(RasterState::fullscreen());
    gbuffers.bind(&mut *ctx.device);
    ctx.upload_camera(camera);
    volume.upload_uniforms(&mut *ctx.device);
    let inverse_resolution = ctx.inverse_resolution();
    ctx.device.upload("u_iRes", inverse_resolution);
    ctx.device
        .upload("u_trilinear", ctx.settings.irradiance.trilinear);
    ctx.draw_fullscreen();
    ctx.finish_stage("irradiance");
    Ok(ctx.color(TargetPurpose::Irradiance, 0))
}

/// Debug view: a small sphere per probe shaded by its coefficients
pub fn render_probe_spheres(ctx: &mut FrameContext, camera: &Camera, volume: &IrradianceVolume) {
    if !ctx.use_program(ProgramKind::Probe, "irradiance probes") {
        return;
    }
    let size = ctx.settings.irradiance.probe_size;
    ctx.upload_camera(camera);
    for probe in &volume.probes {
        ctx.device.upload(
            "u_model",
            Mat4::from_translation(probe.position) * Mat4::from_scale(Vec3::splat(size)),
        );
        ctx.device.upload("u_coeffs", probe.sh.coeffs.to_vec());
        ctx.draw_mesh(&primitives().sphere);
    }
    ctx.device.restore_state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FrameStats, PipelineSettings};
    use crate::render_target::RenderTargetPool;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Entity, Light, Node, Prefab};
    use approx::assert_relative_eq;
    use glam::{UVec3, Vec4};
    use std::sync::Arc;

    fn scene(dims: UVec3) -> Scene {
        let mut scene = Scene::new();
        let root = Node::new("box").with_mesh(Arc::new(Mesh::cube()), Arc::new(Material::default()));
        scene.add_entity(Entity::prefab("box", Prefab::new(root))).expect("fits");
        scene
            .add_entity(Entity::light(Light::point("bulb", Vec3::Y, Vec3::ONE)))
            .expect("fits");
        scene
            .add_entity(Entity::irradiance(
                "irr",
                IrradianceVolume::new(Vec3::splat(-1.0), Vec3::splat(1.0), dims),
            ))
            .expect("fits");
        scene
    }

    fn device() -> DummyBackend {
        let mut device = DummyBackend::new(32, 32).with_programs(["multi_pass"]);
        device.set_readback_color(Vec4::new(1.0, 1.0, 1.0, 1.0));
        device
    }

    #[test]
    fn test_capture_renders_six_faces_at_capture_size() {
        let scene = scene(UVec3::ONE);
        let mut device = device();
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let faces = capture_faces(&mut ctx, &scene, Vec3::ZERO).expect("capture");

        assert_eq!(faces.len(), 6);
        assert_eq!(faces[0].dimensions(), (64, 64));
        assert_eq!(targets.size(TargetPurpose::ProbeCapture), Some((64, 64)));
        assert_eq!(stats.draws, 6);
        assert_eq!(device.bind_violations(), 0);
        assert_eq!(device.bound(), None);
    }

    #[test]
    fn test_incremental_bake() {
        let mut scene = scene(UVec3::new(2, 2, 1));
        let mut device = device();
        let mut targets = RenderTargetPool::new();
        let mut settings = PipelineSettings::default();
        settings.irradiance.capture_size = 4;
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let baker = IrradianceBaker::new(None);

        assert_eq!(
            baker.bake_step(&mut ctx, &mut scene, 3).expect("step"),
            BakeOutcome::InProgress { baked: 3, total: 4 }
        );
        assert!(scene.irradiance().and_then(|v| v.lookup).is_none());
        assert_eq!(baker.bake_step(&mut ctx, &mut scene, 3).expect("step"), BakeOutcome::Baked);
        assert_eq!(baker.bake_step(&mut ctx, &mut scene, 3).expect("step"), BakeOutcome::Idle);
        assert_eq!(stats.probes_baked, 4);

        let volume = scene.irradiance().expect("volume");
        assert!(volume.lookup.is_some());
        // white environment everywhere
        let e = volume.probes[3].sh.irradiance(Vec3::Z);
        assert_relative_eq!(e.x, std::f32::consts::PI, epsilon = 1e-3);
    }

    #[test]
    fn test_update_bakes_then_loads_from_cache() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = dir.path().join("irradiance.bin");
        let mut settings = PipelineSettings::default();
        settings.irradiance.capture_size = 4;

        let mut scene_a = scene(UVec3::new(2, 1, 1));
        let mut device = device();
        let mut targets = RenderTargetPool::new();
        let mut stats = FrameStats::default();
        {
            let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
            let mut baker = IrradianceBaker::new(Some(cache.clone()));
            assert_eq!(baker.update(&mut ctx, &mut scene_a).expect("update"), BakeOutcome::Baked);
        }
        assert!(cache.exists());

        let mut scene_b = scene(UVec3::new(2, 1, 1));
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let mut baker = IrradianceBaker::new(Some(cache));
        assert_eq!(baker.update(&mut ctx, &mut scene_b).expect("update"), BakeOutcome::Loaded);
        assert_eq!(stats.probes_baked, 0);
        let (a, b) = (scene_a.irradiance().expect("a"), scene_b.irradiance().expect("b"));
        assert_eq!(a.probes, b.probes);
    }

    #[test]
    fn test_corrupt_cache_falls_back_to_bake() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = dir.path().join("irradiance.bin");
        std::fs::write(&cache, b"garbage").expect("write");
        let mut settings = PipelineSettings::default();
        settings.irradiance.capture_size = 4;

        let mut scene = scene(UVec3::new(2, 1, 1));
        let mut device = device();
        let mut targets = RenderTargetPool::new();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);
        let mut baker = IrradianceBaker::new(Some(cache.clone()));
        assert_eq!(baker.update(&mut ctx, &mut scene).expect("update"), BakeOutcome::Baked);
        assert_eq!(stats.probes_baked, 2);
        assert!(IrradianceVolume::load(&cache).is_ok());
    }

    #[test]
    fn test_screen_pass_needs_a_baked_active_volume() {
        let gbuffers = GBufferTextures {
            albedo: TextureHandle(1),
            normal: TextureHandle(2),
            omr: TextureHandle(3),
            emissive: TextureHandle(4),
            depth: TextureHandle(5),
        };
        let mut volume = IrradianceVolume::new(Vec3::ZERO, Vec3::ONE, UVec3::ONE);
        let mut device = DummyBackend::new(16, 16).with_programs(["irradiance"]);
        let mut targets = RenderTargetPool::new();
        let settings = PipelineSettings::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&mut device, &mut targets, &settings, &mut stats);

        let camera = Camera::default();
        assert_eq!(render_irradiance(&mut ctx, &camera, &gbuffers, &volume), Ok(None));
        volume.upload_lookup(&mut *ctx.device).expect("lookup");
        assert!(render_irradiance(&mut ctx, &camera, &gbuffers, &volume)
            .expect("irradiance")
            .is_some());
        volume.active = false;
        assert_eq!(render_irradiance(&mut ctx, &camera, &gbuffers, &volume), Ok(None));
    }
}
