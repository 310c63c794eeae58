//! Render a scene offscreen and write the final image as a PNG.
//!
//! Without `--scene` a built-in demo scene is rendered: a floor, a few
//! cubes and spheres, a sun and a point light. Scene files reference
//! prefabs by name; `cube`, `sphere`, `plane` and `quad` are available.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use glam::{Mat4, Vec3, Vec4};

use scene_renderer::pipeline::{PipelineSettings, PipelineTopology, Renderer};
use scene_renderer::resources::{Material, Mesh};
use scene_renderer::scene::{Entity, Light, Node, Prefab, Scene};
use scene_renderer::{create_device, BackendType, RendererConfig};

/// Pipeline topology selection for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum CliTopology {
    Forward,
    #[default]
    Deferred,
}

impl From<CliTopology> for PipelineTopology {
    fn from(cli: CliTopology) -> Self {
        match cli {
            CliTopology::Forward => PipelineTopology::Forward,
            CliTopology::Deferred => PipelineTopology::Deferred,
        }
    }
}

/// Device selection for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum CliBackend {
    /// GPU via wgpu
    #[default]
    Wgpu,
    /// Command recorder, writes a blank image
    Dummy,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Wgpu => BackendType::Wgpu,
            CliBackend::Dummy => BackendType::Dummy,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "render_headless")]
#[command(about = "Render a scene offscreen to a PNG")]
struct Args {
    /// Output image width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output image height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Frames rendered before the read-back
    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Where the PNG is written
    #[arg(short, long, default_value = "frame.png")]
    output: PathBuf,

    /// Forward or deferred topology, overrides the settings file
    #[arg(long, value_enum)]
    topology: Option<CliTopology>,

    #[arg(long, value_enum, default_value_t = CliBackend::default())]
    backend: CliBackend,

    /// Pipeline settings as JSON
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Scene description as JSON
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Save and load baked irradiance here
    #[arg(long)]
    irradiance_cache: Option<PathBuf>,
}

fn prefab_library() -> HashMap<String, Node> {
    let white = Arc::new(Material::plastic(Vec3::splat(0.8)));
    [
        ("cube", Mesh::cube()),
        ("sphere", Mesh::sphere(24, 16)),
        ("plane", Mesh::plane(1.0, 1.0, 1)),
        ("quad", Mesh::quad()),
    ]
    .into_iter()
    .map(|(name, mesh)| {
        let node = Node::new(name).with_mesh(Arc::new(mesh), white.clone());
        (name.to_string(), node)
    })
    .collect()
}

fn mesh_prefab(name: &str, mesh: Arc<Mesh>, material: Material, transform: Mat4) -> Entity {
    let node = Node::new(name).with_mesh(mesh, Arc::new(material));
    Entity::prefab(name, Prefab::new(node).with_transform(transform))
}

fn demo_scene(config: &RendererConfig) -> Result<Scene, Box<dyn std::error::Error>> {
    let mut scene = config.new_scene();
    scene.background_color = Vec3::new(0.05, 0.07, 0.1);
    scene.ambient_light = Vec3::splat(0.05);
    scene.camera.position = Vec3::new(6.0, 5.0, 9.0);
    scene.camera.target = Vec3::new(0.0, 0.5, 0.0);

    let cube = Arc::new(Mesh::cube());
    let sphere = Arc::new(Mesh::sphere(24, 16));
    scene.add_entity(mesh_prefab(
        "floor",
        Arc::new(Mesh::plane(20.0, 20.0, 1)),
        Material::plastic(Vec3::splat(0.6)),
        Mat4::IDENTITY,
    ))?;
    let colors = [
        Vec3::new(0.9, 0.2, 0.2),
        Vec3::new(0.2, 0.8, 0.3),
        Vec3::new(0.2, 0.4, 0.9),
    ];
    for (i, color) in colors.into_iter().enumerate() {
        let x = (i as f32 - 1.0) * 2.5;
        scene.add_entity(mesh_prefab(
            &format!("cube{i}"),
            cube.clone(),
            Material::plastic(color),
            Mat4::from_translation(Vec3::new(x, 0.5, 0.0)),
        ))?;
        scene.add_entity(mesh_prefab(
            &format!("sphere{i}"),
            sphere.clone(),
            Material::metal(color, 0.2 + 0.3 * i as f32),
            Mat4::from_translation(Vec3::new(x, 0.5, 2.5)) * Mat4::from_scale(Vec3::splat(0.5)),
        ))?;
    }
    scene.add_entity(mesh_prefab(
        "glass",
        cube,
        Material::glass().with_base_color(Vec4::new(0.6, 0.8, 1.0, 0.35)),
        Mat4::from_translation(Vec3::new(0.0, 1.0, -2.5)),
    ))?;

    let mut sun = Light::directional(
        "sun",
        Vec3::new(10.0, 20.0, 10.0),
        Vec3::ZERO,
        Vec3::new(1.0, 0.95, 0.85),
    );
    sun.area_size = 15.0;
    scene.add_entity(Entity::light(sun))?;
    let mut lamp = Light::point("lamp", Vec3::new(-2.0, 2.5, 2.0), Vec3::new(1.0, 0.6, 0.3));
    lamp.max_distance = 8.0;
    lamp.intensity = 2.0;
    scene.add_entity(Entity::light(lamp))?;
    Ok(scene)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => PipelineSettings::from_json(&std::fs::read_to_string(path)?)?,
        None => PipelineSettings::default(),
    };
    if let Some(topology) = args.topology {
        settings.topology = topology.into();
    }

    let config = RendererConfig {
        width: args.width,
        height: args.height,
        backend: args.backend.into(),
        settings,
        irradiance_cache: args.irradiance_cache.clone(),
        ..Default::default()
    };
    let mut scene = match &args.scene {
        Some(path) => Scene::from_json(&std::fs::read_to_string(path)?, &prefab_library())?,
        None => demo_scene(&config)?,
    };
    config.prepare_scene(&mut scene);
    let mut device = create_device(&config)?;
    let mut renderer: Renderer = config.build_renderer();

    log::info!(
        "Rendering {} frame(s) at {}x{} ({:?})",
        args.frames,
        args.width,
        args.height,
        renderer.settings().topology
    );
    for _ in 0..args.frames.max(1) {
        let stats = renderer.render_scene(device.as_mut(), &mut scene)?;
        log::info!(
            "Frame {}: {} opaque, {} blended, {} culled, {} draws",
            renderer.frame_count(),
            stats.opaque_calls,
            stats.blended_calls,
            stats.culled_calls,
            stats.draws
        );
        if !stats.skipped_stages.is_empty() {
            log::warn!("Skipped stages: {}", stats.skipped_stages.join(", "));
        }
    }

    let screen = device.screen_target();
    let pixels = device.read_color(screen, 0)?;
    image::DynamicImage::ImageRgba32F(pixels)
        .to_rgba8()
        .save(&args.output)?;
    log::info!("Wrote {}", args.output.display());

    renderer.release(device.as_mut());
    Ok(())
}
