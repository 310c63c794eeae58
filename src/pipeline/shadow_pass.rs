//! Shadow map generation
//!
//! Every visible spot and directional light re-renders the scene from its
//! own camera into a depth-only target once per frame.

use crate::backend::*;
use crate::pipeline::collector::{collect, RenderCall};
use crate::pipeline::forward_pass::material_state;
use crate::pipeline::{FrameContext, ProgramKind};
use crate::render_target::{TargetPurpose, TargetSpec};
use crate::resources::AlphaMode;
use crate::scene::{Camera, Light, Scene};

/// Depth texture of `light`'s shadow map, once it has been rendered
pub fn shadow_map(device: &dyn RenderDevice, light: &Light) -> Option<TextureHandle> {
    let target = light.shadow.as_ref()?.target?;
    device.depth_texture(target)
}

fn casts_this_frame(light: &Light) -> bool {
    light.light_type.casts_shadows() && light.visible && light.shadow.is_some()
}

/// Raster state while capturing depth: color writes off
fn depth_only_state() -> RasterState {
    RasterState {
        color_write: false,
        ..Default::default()
    }
}

#[derive(Debug, Default)]
pub struct ShadowPass;

impl ShadowPass {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Shadow Pass"
    }

    /// Render all shadow maps. Does nothing when shadows are disabled.
    pub fn execute(&self, ctx: &mut FrameContext, scene: &mut Scene) -> BackendResult<()> {
        if !ctx.settings.cast_shadows {
            return Ok(());
        }

        for (slot, light) in scene.lights_mut().enumerate() {
            if !casts_this_frame(light) {
                continue;
            }
            light.orient_shadow_camera();
            if let Some(shadow) = light.shadow.as_mut() {
                let spec = TargetSpec::depth_only(shadow.resolution);
                shadow.target =
                    Some(ctx.targets.ensure(&mut *ctx.device, TargetPurpose::Shadow(slot), &spec)?);
            }
        }

        let scene: &Scene = scene;
        for light in scene.lights().filter(|l| casts_this_frame(l)) {
            let Some(shadow) = light.shadow.as_ref() else {
                continue;
            };
            let Some(target) = shadow.target else {
                continue;
            };
            let calls = collect(scene, Some(&shadow.camera), true);

            ctx.device.bind(TargetBinding::Target(target))?;
            ctx.device.set_raster_state(depth_only_state());
            ctx.device.clear(None, true);
            for call in &calls.opaque {
                render_shadow_call(ctx, call, &shadow.camera);
            }
            ctx.finish_stage(self.name());
            ctx.stats.shadow_maps += 1;
        }
        Ok(())
    }
}

/// Blended calls cast no shadow; masked calls alpha-test with the texture program
pub fn render_shadow_call(ctx: &mut FrameContext, call: &RenderCall, camera: &Camera) {
    let program = match call.material.alpha_mode {
        AlphaMode::Blend => return,
        AlphaMode::Mask => ProgramKind::Texture,
        AlphaMode::Opaque => ProgramKind::Flat,
    };
    if !ctx.use_program(program, "shadow") {
        return;
    }
    ctx.device
        .set_raster_state(material_state(call, depth_only_state()));
    ctx.upload_camera(camera);
    ctx.device.upload("u_model", call.model);
    call.material.upload(&mut *ctx.device);
    ctx.draw_mesh(&call.mesh);
    ctx.device.set_raster_state(depth_only_state());
}

/// Debug view: draw a light's shadow map into a corner of the bound target
pub fn show_shadow_map(ctx: &mut FrameContext, light: &Light) {
    let Some(map) = shadow_map(&*ctx.device, light) else {
        return;
    };
    if !ctx.use_program(ProgramKind::Depth, "show shadowmap") {
        return;
    }
    let Some(camera) = light.shadow_camera() else {
        return;
    };
    ctx.device.set_raster_state(RasterState::fullscreen());
    ctx.device.upload(
        "u_camera_nearfar",
        glam::Vec2::new(camera.projection.near(), camera.projection.far()),
    );
    // perspective depth needs linearizing, orthographic depth is already linear
    ctx.device.upload("u_linearize", light.light_type == crate::scene::LightType::Spot);
    ctx.device.upload("u_viewport_rect", glam::Vec4::new(0.0, 0.0, 0.25, 0.25));
    ctx.device.set_texture("u_texture", map);
    ctx.draw_fullscreen();
    ctx.device.restore_state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FrameStats, PipelineSettings};
    use crate::render_target::RenderTargetPool;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Entity, Node, Prefab};
    use glam::Vec3;
    use std::sync::Arc;

    fn scene() -> Scene {
        let root = Node::new("root")
            .with_child(Node::new("floor").with_mesh(
                Arc::new(Mesh::plane(50.0, 50.0, 1)),
                Arc::new(Material::default()),
            ))
            .with_child(
                Node::new("glass")
                    .with_mesh(Arc::new(Mesh::cube()), Arc::new(Material::glass()))
                    .with_translation(Vec3::new(0.0, 1.0, 0.0)),
            );
        let mut scene = Scene::new();
        scene.add_entity(Entity::prefab("p", Prefab::new(root))).expect("fits");
        scene
            .add_entity(Entity::light(Light::directional(
                "sun",
                Vec3::new(0.0, 50.0, 10.0),
                Vec3::ZERO,
                Vec3::ONE,
            )))
            .expect("fits");
        scene
            .add_entity(Entity::light(Light::point("bulb", Vec3::Y, Vec3::ONE)))
            .expect("fits");
        scene
    }

    fn run(device: &mut DummyBackend, scene: &mut Scene, settings: &PipelineSettings) -> FrameStats {
        let mut targets = RenderTargetPool::new();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(device, &mut targets, settings, &mut stats);
        ShadowPass::new().execute(&mut ctx, scene).expect("shadow pass");
        stats
    }

    #[test]
    fn test_only_shadow_casters_render() {
        let mut device = DummyBackend::new(64, 64).with_programs(["flat", "texture"]);
        let mut scene = scene();
        let stats = run(&mut device, &mut scene, &PipelineSettings::default());

        assert_eq!(stats.shadow_maps, 1);
        // the glass cube casts nothing
        assert_eq!(device.programs_used(), vec!["flat"]);
        assert!(device
            .commands()
            .contains(&DeviceCommand::Clear { color: None, depth: true }));
        assert!(scene.lights().next().and_then(|l| l.shadow.as_ref()?.target).is_some());
        assert_eq!(device.raster_state(), RasterState::default());
        assert_eq!(device.bound(), None);
    }

    #[test]
    fn test_hidden_lights_and_disabled_shadows() {
        let mut device = DummyBackend::new(64, 64).with_programs(["flat"]);
        let mut scene = scene();
        for light in scene.lights_mut() {
            light.set_visible(false);
        }
        assert_eq!(run(&mut device, &mut scene, &PipelineSettings::default()).shadow_maps, 0);

        let mut settings = PipelineSettings::default();
        settings.cast_shadows = false;
        let mut scene = self::scene();
        assert_eq!(run(&mut device, &mut scene, &settings).shadow_maps, 0);
        assert_eq!(device.draw_count(), 0);
    }

    #[test]
    fn test_shadow_draws_do_not_write_color() {
        let mut device = DummyBackend::new(64, 64).with_programs(["flat"]);
        let mut scene = scene();
        run(&mut device, &mut scene, &PipelineSettings::default());
        let mut last_state = RasterState::default();
        for command in device.commands() {
            match command {
                DeviceCommand::SetState(s) => last_state = *s,
                DeviceCommand::DrawMesh { .. } => assert!(!last_state.color_write),
                _ => {}
            }
        }
    }
}
