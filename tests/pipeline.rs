//! Whole-frame behavior of the renderer against the recording device

use std::sync::Arc;

use glam::{UVec3, Vec3, Vec4};
use rstest::rstest;

use scene_renderer::backend::{BackendError, DummyBackend, RasterState, RenderDevice, UniformValue};
use scene_renderer::pipeline::{
    IrradianceVolume, PipelineSettings, PipelineTopology, PostStageKind, ProgramKind, Renderer,
};
use scene_renderer::render_target::TargetPurpose;
use scene_renderer::resources::{Material, Mesh};
use scene_renderer::scene::{Entity, EntityId, Light, LightType, Node, Prefab, Scene};

fn device() -> DummyBackend {
    DummyBackend::new(64, 48).with_programs(ProgramKind::all_names())
}

fn cube(name: &str, material: Material, position: Vec3) -> Entity {
    let node = Node::new(name)
        .with_mesh(Arc::new(Mesh::cube()), Arc::new(material))
        .with_translation(position);
    Entity::prefab(name, Prefab::new(node))
}

/// One opaque cube at the origin lit from above
fn lit_cube_with(light_type: LightType) -> (Scene, EntityId) {
    let mut scene = Scene::new();
    scene
        .add_entity(cube("box", Material::plastic(Vec3::ONE), Vec3::ZERO))
        .expect("box");
    let position = Vec3::new(0.0, 3.0, 0.0);
    let light = match light_type {
        LightType::Point => Light::point("lamp", position, Vec3::ONE),
        LightType::Spot => Light::spot("lamp", position, Vec3::ZERO, Vec3::ONE),
        LightType::Directional => Light::directional("lamp", position, Vec3::ZERO, Vec3::ONE),
    };
    let light = scene.add_entity(Entity::light(light)).expect("lamp");
    (scene, light)
}

fn lit_cube() -> (Scene, EntityId) {
    lit_cube_with(LightType::Point)
}

fn last_float(device: &DummyBackend, name: &str) -> Option<f32> {
    device
        .uniform_values(name)
        .last()
        .and_then(|v| v.as_float())
}

#[rstest]
#[case(LightType::Point, 0)]
#[case(LightType::Directional, 1)]
fn test_forward_frame_shades_with_visible_light(
    #[case] light_type: LightType,
    #[case] shadow_maps: usize,
) {
    let (mut scene, light) = lit_cube_with(light_type);
    let mut device = device();
    let mut renderer = Renderer::new(PipelineSettings::forward());

    let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(stats.shadow_maps, shadow_maps);
    assert_eq!(stats.opaque_calls, 1);
    assert_eq!(stats.blended_calls, 0);
    assert!(stats.skipped_stages.is_empty());
    let intensity = last_float(&device, "u_light_intensity").expect("intensity uploaded");
    assert!(intensity > 0.0);
    assert!(device
        .uniform_values("u_light_color")
        .iter()
        .any(|v| v.as_vec3() == Some(Vec3::ONE)));

    scene
        .entity_mut(light)
        .and_then(|e| e.as_light_mut())
        .expect("light")
        .set_visible(false);
    device.clear_commands();
    renderer.render_scene(&mut device, &mut scene).expect("frame");

    let stats = renderer.stats();
    assert_eq!(stats.shadow_maps, 0);
    let colors = device.uniform_values("u_light_color");
    assert!(!colors.is_empty());
    assert!(colors.iter().all(|v| v.as_vec3() == Some(Vec3::ZERO)));
    assert_eq!(last_float(&device, "u_light_intensity"), Some(intensity));
}

#[test]
fn test_hidden_light_color_is_restored() {
    let (mut scene, light) = lit_cube();
    let mut device = device();
    let mut renderer = Renderer::new(PipelineSettings::forward());

    for visible in [false, false, true] {
        scene
            .entity_mut(light)
            .and_then(|e| e.as_light_mut())
            .expect("light")
            .set_visible(visible);
        renderer.render_scene(&mut device, &mut scene).expect("frame");
    }
    let restored = scene.lights().next().expect("light").color();
    assert_eq!(restored, Vec3::ONE);
}

#[test]
fn test_deferred_frame_runs_every_stage() {
    let (mut scene, _) = lit_cube();
    scene
        .add_entity(cube("glass", Material::glass(), Vec3::new(0.0, 0.0, 2.0)))
        .expect("glass");
    let mut settings = PipelineSettings::deferred();
    settings.ssao.enabled = true;
    settings.bloom.enabled = true;
    settings.antialias.enabled = true;
    let mut device = device();
    let mut renderer = Renderer::new(settings);

    let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(stats.opaque_calls, 1);
    assert_eq!(stats.blended_calls, 1);
    assert!(stats.skipped_stages.is_empty(), "{:?}", stats.skipped_stages);
    assert_eq!(stats.gpu_errors, 0);

    let used = device.programs_used();
    for program in [
        ProgramKind::GBuffers,
        ProgramKind::Ssao,
        ProgramKind::DeferredAmbient,
        ProgramKind::Tonemapper,
        ProgramKind::Fxaa,
    ] {
        assert!(used.contains(&program.name()), "{} not used", program.name());
    }
    assert_eq!(
        renderer.applied_post_stages(),
        &[
            PostStageKind::Bloom,
            PostStageKind::Tonemap,
            PostStageKind::Antialias
        ]
    );
}

#[rstest]
#[case(PipelineTopology::Forward)]
#[case(PipelineTopology::Deferred)]
fn test_missing_programs_skip_stages(#[case] topology: PipelineTopology) {
    let (mut scene, _) = lit_cube();
    let mut settings = PipelineSettings {
        topology,
        ..Default::default()
    };
    settings.bloom.enabled = true;
    let mut device = DummyBackend::new(64, 48);
    let mut renderer = Renderer::new(settings);

    let stats = renderer
        .render_scene(&mut device, &mut scene)
        .expect("frame still completes");
    assert!(!stats.skipped_stages.is_empty());
    assert!(renderer.applied_post_stages().is_empty());
    assert_eq!(device.bound(), None);
}

#[rstest]
#[case(PipelineTopology::Forward)]
#[case(PipelineTopology::Deferred)]
fn test_frame_leaves_device_clean(#[case] topology: PipelineTopology) {
    let (mut scene, _) = lit_cube();
    scene
        .add_entity(Entity::light(Light::directional(
            "sun",
            Vec3::new(5.0, 10.0, 5.0),
            Vec3::ZERO,
            Vec3::ONE,
        )))
        .expect("sun");
    let mut settings = PipelineSettings {
        topology,
        ..Default::default()
    };
    settings.fog.enabled = true;
    settings.bloom.enabled = true;
    let mut device = device();
    let mut renderer = Renderer::new(settings);

    let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(stats.shadow_maps, 1);
    assert_eq!(device.bound(), None);
    assert_eq!(device.raster_state(), RasterState::default());
    assert_eq!(device.bind_violations(), 0);
}

#[test]
fn test_targets_reused_until_resize() {
    let (mut scene, _) = lit_cube();
    let mut device = device();
    let mut renderer = Renderer::new(PipelineSettings::deferred());

    for _ in 0..3 {
        renderer.render_scene(&mut device, &mut scene).expect("frame");
    }
    assert_eq!(renderer.targets().recreate_count(TargetPurpose::Scene), 1);
    assert_eq!(renderer.targets().recreate_count(TargetPurpose::GBuffers), 1);
    assert_eq!(renderer.frame_count(), 3);

    device.resize(128, 96);
    renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(renderer.targets().recreate_count(TargetPurpose::Scene), 2);
    assert_eq!(renderer.targets().size(TargetPurpose::Scene), Some((128, 96)));

    renderer.release(&mut device);
    assert!(renderer.targets().is_empty());
}

#[test]
fn test_gpu_errors_are_counted_not_fatal() {
    let (mut scene, _) = lit_cube();
    let mut device = device();
    device.inject_error(BackendError::Validation("bad binding".into()));
    device.inject_error(BackendError::OutOfMemory);
    let mut renderer = Renderer::new(PipelineSettings::forward());

    let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(stats.gpu_errors, 2);

    let stats = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(stats.gpu_errors, 0);
}

fn irradiance_scene() -> Scene {
    let (mut scene, _) = lit_cube();
    scene
        .add_entity(Entity::irradiance(
            "probes",
            IrradianceVolume::new(Vec3::splat(-2.0), Vec3::splat(2.0), UVec3::new(2, 1, 1)),
        ))
        .expect("volume");
    scene
}

#[test]
fn test_irradiance_bake_is_cached_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = dir.path().join("irradiance.bin");
    let mut settings = PipelineSettings::deferred();
    settings.irradiance.enabled = true;

    let mut bake_device = device();
    bake_device.set_readback_color(Vec4::new(0.5, 0.25, 1.0, 1.0));
    let mut scene = irradiance_scene();
    let mut renderer = Renderer::new(settings.clone()).with_irradiance_cache(&cache);
    let stats = renderer
        .render_scene(&mut bake_device, &mut scene)
        .expect("bake frame");
    assert_eq!(stats.probes_baked, 2);
    assert!(cache.exists());
    let baked = scene.irradiance().expect("volume").probes.clone();
    assert!(baked.iter().all(|p| p.sh.coeffs[0].length() > 0.0));

    let mut device = device();
    let mut reloaded = irradiance_scene();
    let mut renderer = Renderer::new(settings).with_irradiance_cache(&cache);
    let stats = renderer.render_scene(&mut device, &mut reloaded).expect("load frame");
    assert_eq!(stats.probes_baked, 0);
    let volume = reloaded.irradiance().expect("volume");
    assert!(volume.is_baked());
    assert_eq!(volume.probes, baked);
    assert!(device
        .programs_used()
        .contains(&ProgramKind::Irradiance.name()));
}

#[test]
fn test_incremental_bake_spreads_over_frames() {
    let mut settings = PipelineSettings::deferred();
    settings.irradiance.enabled = true;
    settings.irradiance.probes_per_frame = 1;
    let mut device = device();
    let mut scene = irradiance_scene();
    let mut renderer = Renderer::new(settings);

    let first = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(first.probes_baked, 1);
    assert!(!scene.irradiance().expect("volume").is_baked());
    let second = renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(second.probes_baked, 1);
    assert!(scene.irradiance().expect("volume").is_baked());

    renderer.invalidate_irradiance(&mut scene);
    assert!(!scene.irradiance().expect("volume").is_baked());
}

#[test]
fn test_single_pass_uploads_light_arrays() {
    let (mut scene, _) = lit_cube();
    let mut settings = PipelineSettings::forward();
    settings.technique = scene_renderer::pipeline::RenderTechnique::SinglePass;
    let mut device = device();
    let mut renderer = Renderer::new(settings);

    renderer.render_scene(&mut device, &mut scene).expect("frame");
    assert_eq!(device.uniform_values("u_num_lights"), vec![&UniformValue::Int(1)]);
}
