//! Per-frame pipeline orchestration
//!
//! The renderer owns every stage and the offscreen target pool and runs
//! them in dependency order: shadows, probe captures, then either the
//! forward or the deferred path into the scene target, then the post
//! chain, then the copy to the screen.

use std::path::PathBuf;

use glam::Vec4;

use crate::backend::*;
use crate::pipeline::collector::{collect, RenderCalls};
use crate::pipeline::forward_pass::{render_calls, render_skybox, SceneLighting};
use crate::pipeline::gbuffer_pass::{show_gbuffers, GBufferPass, GBufferTextures};
use crate::pipeline::irradiance_pass::{render_irradiance, BakeOutcome, IrradianceBaker};
use crate::pipeline::lighting_pass::{LightingInputs, LightingPass};
use crate::pipeline::postprocess::{PostChain, PostInputs, PostStageKind};
use crate::pipeline::reflection::ReflectionCapture;
use crate::pipeline::shadow_pass::{show_shadow_map, ShadowPass};
use crate::pipeline::ssao_pass::SsaoPass;
use crate::pipeline::{
    irradiance_pass, reflection, FrameContext, FrameStats, PipelineSettings, PipelineTopology,
    ProgramKind,
};
use crate::render_target::{RenderTargetPool, TargetPurpose, TargetSpec};
use crate::scene::{Camera, Light, Scene};

/// Format of the HDR target both paths shade into
pub const SCENE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

fn scene_spec() -> TargetSpec {
    TargetSpec::screen(&[SCENE_FORMAT]).with_depth()
}

fn background(scene: &Scene) -> [f32; 4] {
    let c = scene.background_color;
    [c.x, c.y, c.z, 1.0]
}

/// Output of the geometry and lighting part of a frame
struct ShadedFrame {
    color: TextureHandle,
    depth: Option<TextureHandle>,
    gbuffers: Option<GBufferTextures>,
    ssao: Option<TextureHandle>,
}

/// Forward/deferred scene renderer
pub struct Renderer {
    settings: PipelineSettings,
    targets: RenderTargetPool,
    stats: FrameStats,
    shadow_pass: ShadowPass,
    gbuffer_pass: GBufferPass,
    ssao_pass: SsaoPass,
    lighting_pass: LightingPass,
    baker: IrradianceBaker,
    reflections: ReflectionCapture,
    post: PostChain,
    frame: u64,
}

impl Renderer {
    pub fn new(settings: PipelineSettings) -> Self {
        let samples = settings.ssao.samples as usize;
        Self {
            settings,
            targets: RenderTargetPool::new(),
            stats: FrameStats::default(),
            shadow_pass: ShadowPass::new(),
            gbuffer_pass: GBufferPass::new(),
            ssao_pass: SsaoPass::new(samples),
            lighting_pass: LightingPass::new(),
            baker: IrradianceBaker::new(None),
            reflections: ReflectionCapture::new(),
            post: PostChain::new(),
            frame: 0,
        }
    }

    /// Persist the irradiance bake at `path` and load it from there when present
    pub fn with_irradiance_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.baker = IrradianceBaker::new(Some(path.into()));
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Mode state for the menu layer to edit between frames
    pub fn settings_mut(&mut self) -> &mut PipelineSettings {
        &mut self.settings
    }

    /// Counters of the last rendered frame
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn targets(&self) -> &RenderTargetPool {
        &self.targets
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Post stages applied during the last frame, in order
    pub fn applied_post_stages(&self) -> &[PostStageKind] {
        self.post.applied()
    }

    /// Drop the irradiance bake so the next frames bake it again
    pub fn invalidate_irradiance(&mut self, scene: &mut Scene) {
        self.baker.invalidate(scene);
    }

    /// Free every offscreen target
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.targets.release_all(device);
    }

    /// Render one frame of `scene` into the device's screen target
    pub fn render_scene(
        &mut self,
        device: &mut dyn RenderDevice,
        scene: &mut Scene,
    ) -> BackendResult<FrameStats> {
        self.stats = FrameStats::default();
        self.frame += 1;
        let (width, height) = device.viewport();
        scene.camera.set_aspect(width as f32, height as f32);
        scene.refresh_light_visibility();

        let mut ctx = FrameContext::new(device, &mut self.targets, &self.settings, &mut self.stats);

        self.shadow_pass.execute(&mut ctx, scene)?;
        if ctx.settings.irradiance.enabled {
            match self.baker.update(&mut ctx, scene)? {
                BakeOutcome::InProgress { baked, total } => {
                    log::debug!("Irradiance bake: {}/{} probes", baked, total)
                }
                BakeOutcome::Baked => log::info!("Irradiance bake finished"),
                BakeOutcome::Loaded | BakeOutcome::Idle => {}
            }
        }
        if ctx.settings.reflections.enabled {
            self.reflections.update(&mut ctx, scene)?;
        }

        let scene: &Scene = scene;
        let camera = scene.camera.clone();
        let calls = collect(scene, Some(&camera), false);
        ctx.stats.opaque_calls = calls.opaque.len();
        ctx.stats.blended_calls = calls.blended.len();
        ctx.stats.culled_calls = calls.culled;
        log::trace!(
            "Frame {}: {} opaque, {} blended, {} culled",
            self.frame,
            calls.opaque.len(),
            calls.blended.len(),
            calls.culled
        );

        let shaded = match ctx.settings.topology {
            PipelineTopology::Forward => render_forward(&mut ctx, scene, &camera, &calls)?,
            PipelineTopology::Deferred => render_deferred(
                &mut ctx,
                scene,
                &camera,
                &calls,
                &self.gbuffer_pass,
                &mut self.ssao_pass,
                &self.lighting_pass,
            )?,
        };

        let inputs = PostInputs {
            scene,
            camera: &camera,
            gbuffers: shaded.gbuffers,
            depth: shaded.depth,
        };
        let output = self.post.run(&mut ctx, &inputs, shaded.color)?;
        present(&mut ctx, scene, &camera, output, &shaded)?;

        drop(ctx);
        Ok(self.stats.clone())
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

/// Background, skybox, then opaque and blended calls shaded directly
fn render_forward(
    ctx: &mut FrameContext,
    scene: &Scene,
    camera: &Camera,
    calls: &RenderCalls,
) -> BackendResult<ShadedFrame> {
    ctx.bind_target(TargetPurpose::Scene, &scene_spec())?;
    ctx.device.clear(Some(background(scene)), true);
    render_skybox(ctx, scene, camera);

    let technique = ctx.settings.technique;
    let lighting = SceneLighting::from_scene(scene, ctx.settings.lighting);
    render_calls(ctx, &calls.opaque, camera, technique, &lighting);
    render_calls(ctx, &calls.blended, camera, technique, &lighting);
    render_probe_debug(ctx, scene, camera);
    ctx.finish_stage("forward");

    Ok(ShadedFrame {
        color: scene_color(ctx)?,
        depth: ctx.depth(TargetPurpose::Scene),
        gbuffers: None,
        ssao: None,
    })
}

/// Gbuffers, screen-space inputs, light accumulation, then blended calls
fn render_deferred(
    ctx: &mut FrameContext,
    scene: &Scene,
    camera: &Camera,
    calls: &RenderCalls,
    gbuffer_pass: &GBufferPass,
    ssao_pass: &mut SsaoPass,
    lighting_pass: &LightingPass,
) -> BackendResult<ShadedFrame> {
    let Some(gbuffers) = gbuffer_pass.execute(ctx, scene, camera, &calls.opaque)? else {
        return Err(BackendError::RenderTargetCreationFailed(
            "gbuffer target has no textures".into(),
        ));
    };

    let ssao = if ctx.settings.ssao.enabled {
        ssao_pass.execute(ctx, camera, &gbuffers)?
    } else {
        None
    };
    let irradiance = match scene.irradiance() {
        Some(volume) if ctx.settings.irradiance.enabled => {
            render_irradiance(ctx, camera, &gbuffers, volume)?
        }
        _ => None,
    };

    ctx.bind_target(TargetPurpose::Scene, &scene_spec())?;
    if let Some(source) = ctx.targets.get(TargetPurpose::GBuffers) {
        ctx.device.copy_depth_from(source)?;
    }
    ctx.device.clear(Some(background(scene)), false);

    let lights: Vec<&Light> = scene.lights().collect();
    lighting_pass.execute(
        ctx,
        camera,
        &gbuffers,
        &lights,
        scene.ambient_light,
        LightingInputs { ssao, irradiance },
    );
    ctx.check_errors(lighting_pass.name());

    let technique = ctx.settings.technique;
    let lighting = SceneLighting::from_scene(scene, ctx.settings.lighting);
    render_calls(ctx, &calls.blended, camera, technique, &lighting);
    render_probe_debug(ctx, scene, camera);
    ctx.finish_stage("deferred");

    Ok(ShadedFrame {
        color: scene_color(ctx)?,
        depth: Some(gbuffers.depth),
        gbuffers: Some(gbuffers),
        ssao,
    })
}

fn scene_color(ctx: &FrameContext) -> BackendResult<TextureHandle> {
    ctx.color(TargetPurpose::Scene, 0).ok_or_else(|| {
        BackendError::RenderTargetCreationFailed("scene target has no color buffer".into())
    })
}

/// Probe spheres drawn into the bound scene target, depth tested
fn render_probe_debug(ctx: &mut FrameContext, scene: &Scene, camera: &Camera) {
    if ctx.settings.irradiance.show_probes {
        if let Some(volume) = scene.irradiance() {
            irradiance_pass::render_probe_spheres(ctx, camera, volume);
        }
    }
    if ctx.settings.reflections.show_probes {
        reflection::render_probe_spheres(ctx, scene, camera);
    }
}

/// Copy the chain output to the screen and draw the 2D debug views on top
fn present(
    ctx: &mut FrameContext,
    scene: &Scene,
    camera: &Camera,
    output: TextureHandle,
    shaded: &ShadedFrame,
) -> BackendResult<()> {
    let screen = ctx.device.screen_target();
    ctx.device.bind(TargetBinding::Target(screen))?;
    ctx.device.blit(output);

    if ctx.settings.show_gbuffers {
        if let Some(gbuffers) = shaded.gbuffers.as_ref() {
            show_gbuffers(ctx, gbuffers, camera);
        }
    }
    if ctx.settings.ssao.show {
        if let Some(ssao) = shaded.ssao {
            show_texture(ctx, ssao, Vec4::new(0.0, 0.0, 1.0, 1.0), "show ssao");
        }
    }
    for light in scene.lights().filter(|l| l.show_shadowmap) {
        show_shadow_map(ctx, light);
    }

    ctx.finish_stage("present");
    ctx.device.flush();
    Ok(())
}

/// Draw `texture` into `rect` (x, y, width, height as viewport fractions)
fn show_texture(ctx: &mut FrameContext, texture: TextureHandle, rect: Vec4, stage: &'static str) {
    if !ctx.use_program(ProgramKind::Quad, stage) {
        return;
    }
    ctx.device.set_raster_state(RasterState::fullscreen());
    ctx.device.upload("u_viewport_rect", rect);
    ctx.device.set_texture("u_texture", texture);
    ctx.draw_fullscreen();
    ctx.device.restore_state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AlphaMode, Material, Mesh};
    use crate::scene::{Entity, Node, Prefab};
    use glam::Vec3;
    use std::sync::Arc;

    fn scene() -> Scene {
        let mut scene = Scene::new();
        scene.camera = Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let cube = Arc::new(Mesh::cube());
        let glass = Material::default().with_alpha_mode(AlphaMode::Blend);
        let root = Node::new("root")
            .with_child(Node::new("solid").with_mesh(cube.clone(), Arc::new(Material::default())))
            .with_child(Node::new("glass").with_mesh(cube, Arc::new(glass)));
        scene
            .add_entity(Entity::prefab("boxes", Prefab::new(root)))
            .expect("fits");
        scene
            .add_entity(Entity::light(Light::directional(
                "sun",
                Vec3::new(0.0, 10.0, 0.0),
                Vec3::ZERO,
                Vec3::ONE,
            )))
            .expect("fits");
        scene
    }

    fn device() -> DummyBackend {
        DummyBackend::new(64, 32).with_programs(ProgramKind::all_names())
    }

    #[test]
    fn test_forward_frame_counts_calls() {
        let mut scene = scene();
        let mut device = device();
        let mut renderer = Renderer::new(PipelineSettings::forward());
        let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");

        assert_eq!(stats.opaque_calls, 1);
        assert_eq!(stats.blended_calls, 1);
        assert_eq!(stats.shadow_maps, 1);
        assert!(stats.skipped_stages.is_empty());
        assert_eq!(device.bind_violations(), 0);
        assert_eq!(device.bound(), None);
        assert!(renderer.targets().get(TargetPurpose::GBuffers).is_none());
    }

    #[test]
    fn test_deferred_frame_copies_gbuffer_depth() {
        let mut scene = scene();
        let mut device = device();
        let mut renderer = Renderer::new(PipelineSettings::deferred());
        renderer.render_scene(&mut device, &mut scene).expect("frame");

        let gbuffers = renderer
            .targets()
            .get(TargetPurpose::GBuffers)
            .expect("gbuffer target");
        assert!(device
            .commands()
            .contains(&DeviceCommand::CopyDepth { from: gbuffers }));
        let used = device.programs_used();
        assert!(used.contains(&"g_buffers"));
        assert!(used.contains(&"deferred_ambient"));
        assert!(used.contains(&"deferred_multi_pass"));
        assert_eq!(device.raster_state(), RasterState::default());
    }

    #[test]
    fn test_post_order_follows_topology() {
        let mut scene = scene();
        let mut device = device();
        let mut renderer = Renderer::new(PipelineSettings::deferred());
        renderer.settings_mut().bloom.enabled = true;
        renderer.settings_mut().fog.enabled = true;
        renderer.settings_mut().antialias.enabled = true;
        renderer.render_scene(&mut device, &mut scene).expect("frame");
        assert_eq!(
            renderer.applied_post_stages(),
            &[
                PostStageKind::Bloom,
                PostStageKind::Tonemap,
                PostStageKind::Fog,
                PostStageKind::Antialias
            ]
        );

        renderer.settings_mut().topology = PipelineTopology::Forward;
        renderer.render_scene(&mut device, &mut scene).expect("frame");
        assert_eq!(
            renderer.applied_post_stages(),
            &[
                PostStageKind::Bloom,
                PostStageKind::Fog,
                PostStageKind::Tonemap,
                PostStageKind::Antialias
            ]
        );
    }

    #[test]
    fn test_final_image_reaches_screen() {
        let mut scene = scene();
        let mut device = device();
        let mut renderer = Renderer::default();
        renderer.render_scene(&mut device, &mut scene).expect("frame");

        let screen = device.screen_target();
        let commands = device.commands();
        let bind = commands
            .iter()
            .rposition(|c| *c == DeviceCommand::Bind(TargetBinding::Target(screen)))
            .expect("screen bound");
        assert!(matches!(commands[bind + 1], DeviceCommand::Blit { .. }));
    }

    #[test]
    fn test_empty_scene_renders() {
        let mut scene = Scene::new();
        let mut device = device();
        let mut renderer = Renderer::default();
        renderer.settings_mut().ssao.enabled = true;
        let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");
        assert_eq!(stats.opaque_calls + stats.blended_calls, 0);
        assert_eq!(stats.gpu_errors, 0);
    }
}
