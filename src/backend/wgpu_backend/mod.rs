//! wgpu backend implementation
//!
//! Runs headless: the "screen" is an offscreen target that callers read
//! back. Every clear and draw is recorded as its own render pass on a
//! shared command encoder, which is submitted on `flush` or before a
//! read-back.

mod shaders;
mod uniforms;

pub use uniforms::UniformBlock;

use std::collections::HashMap;
use std::sync::{mpsc, Arc};

use image::Rgba32FImage;
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct GpuTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct GpuTarget {
    desc: RenderTargetDescriptor,
    colors: Vec<TextureHandle>,
    depth: Option<TextureHandle>,
}

struct GpuProgram {
    name: String,
    module: wgpu::ShaderModule,
    block: UniformBlock,
    textures: Vec<(String, TextureSlotKind)>,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramHandle,
    colors: Vec<wgpu::TextureFormat>,
    depth: bool,
    state: RasterState,
}

/// Attachments of whatever is currently bound
struct Attachments {
    colors: Vec<(wgpu::TextureView, wgpu::TextureFormat)>,
    depth: Option<wgpu::TextureView>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    screen: RenderTargetHandle,

    textures: HashMap<TextureHandle, GpuTexture>,
    targets: HashMap<RenderTargetHandle, GpuTarget>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    program_names: HashMap<String, ProgramHandle>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    meshes: HashMap<u64, GpuMesh>,
    quad: Mesh,

    copy_layout: wgpu::BindGroupLayout,
    blit_pipelines: HashMap<(wgpu::TextureFormat, bool), wgpu::RenderPipeline>,
    mip_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    filtering_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    fallback_2d: TextureHandle,
    fallback_cube: TextureHandle,
    fallback_depth: TextureHandle,

    bound: Option<TargetBinding>,
    state: RasterState,
    program: Option<ProgramHandle>,
    bound_textures: HashMap<String, TextureHandle>,
    encoder: Option<wgpu::CommandEncoder>,
    errors: Arc<Mutex<Vec<String>>>,
    next_id: u64,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
        }
    }

    fn convert_blend(blend: BlendState) -> wgpu::BlendState {
        let component = wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(blend.src_factor),
            dst_factor: Self::convert_blend_factor(blend.dst_factor),
            operation: wgpu::BlendOperation::Add,
        };
        wgpu::BlendState {
            color: component,
            alpha: component,
        }
    }

    fn slot_layout_entries(
        textures: &[(String, TextureSlotKind)],
    ) -> Vec<wgpu::BindGroupLayoutEntry> {
        let mut entries = Vec::with_capacity(textures.len() * 2);
        for (i, (_, kind)) in textures.iter().enumerate() {
            let (sample_type, view_dimension, filtering) = match kind {
                TextureSlotKind::Filtered => (
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                    true,
                ),
                TextureSlotKind::Unfiltered => (
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D2,
                    false,
                ),
                TextureSlotKind::Depth => (
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2,
                    false,
                ),
                TextureSlotKind::Cube => (
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::Cube,
                    true,
                ),
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: (i * 2) as u32,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: (i * 2 + 1) as u32,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Sampler(if filtering {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                count: None,
            });
        }
        entries
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl WgpuBackend {
    /// Create a headless device with a `width` x `height` screen target
    pub fn new(width: u32, height: u32) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            sink.lock().push(error.to_string());
        }));

        let copy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("copy layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        let sampler = |filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: None,
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: filter,
                lod_min_clamp: 0.0,
                lod_max_clamp: 32.0,
                compare: None,
                anisotropy_clamp: 1,
                border_color: None,
            })
        };
        let filtering_sampler = sampler(wgpu::FilterMode::Linear);
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest);

        let mut backend = Self {
            instance,
            adapter,
            device,
            queue,
            width: width.max(1),
            height: height.max(1),
            screen: RenderTargetHandle(0),
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            program_names: HashMap::new(),
            pipelines: HashMap::new(),
            meshes: HashMap::new(),
            quad: Mesh::quad(),
            copy_layout,
            blit_pipelines: HashMap::new(),
            mip_pipelines: HashMap::new(),
            filtering_sampler,
            nearest_sampler,
            fallback_2d: TextureHandle(0),
            fallback_cube: TextureHandle(0),
            fallback_depth: TextureHandle(0),
            bound: None,
            state: RasterState::default(),
            program: None,
            bound_textures: HashMap::new(),
            encoder: None,
            errors,
            next_id: 1,
        };

        backend.fallback_2d = backend.create_white_texture(TextureKind::D2)?;
        backend.fallback_cube = backend.create_white_texture(TextureKind::Cube)?;
        backend.fallback_depth = backend.create_texture(&TextureDescriptor::new_2d(
            "fallback depth",
            1,
            1,
            TextureFormat::Depth32Float,
        ))?;
        backend.screen = backend.create_render_target(&Self::screen_desc(width, height))?;

        Ok(backend)
    }

    fn screen_desc(width: u32, height: u32) -> RenderTargetDescriptor {
        RenderTargetDescriptor {
            label: Some("screen".into()),
            width: width.max(1),
            height: height.max(1),
            color_formats: vec![TextureFormat::Rgba8Unorm],
            depth: true,
        }
    }

    fn create_white_texture(&mut self, kind: TextureKind) -> BackendResult<TextureHandle> {
        let desc = TextureDescriptor {
            label: Some("fallback white".into()),
            width: 1,
            height: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            kind,
        };
        let handle = self.create_texture(&desc)?;
        if let Some(gpu) = self.textures.get(&handle) {
            for layer in 0..desc.layer_count() {
                self.queue.write_texture(
                    wgpu::ImageCopyTexture {
                        texture: &gpu.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                        aspect: wgpu::TextureAspect::All,
                    },
                    &[255, 255, 255, 255],
                    wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(4),
                        rows_per_image: Some(1),
                    },
                    wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }
        Ok(handle)
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Renderer Encoder"),
                })
        })
    }

    fn layer_view(&self, texture: TextureHandle, mip: u32, layer: u32) -> Option<wgpu::TextureView> {
        let gpu = self.textures.get(&texture)?;
        Some(gpu.texture.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            format: None,
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: layer,
            array_layer_count: Some(1),
        }))
    }

    fn sampled_view(&self, texture: TextureHandle, kind: TextureSlotKind) -> Option<wgpu::TextureView> {
        let gpu = self.textures.get(&texture)?;
        let dimension = match kind {
            TextureSlotKind::Cube => wgpu::TextureViewDimension::Cube,
            _ => wgpu::TextureViewDimension::D2,
        };
        Some(gpu.texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(dimension),
            ..Default::default()
        }))
    }

    fn attachments(&self) -> Option<Attachments> {
        match self.bound? {
            TargetBinding::Target(handle) => {
                let target = self.targets.get(&handle)?;
                let colors = target
                    .colors
                    .iter()
                    .filter_map(|c| {
                        let gpu = self.textures.get(c)?;
                        Some((
                            self.layer_view(*c, 0, 0)?,
                            Self::convert_texture_format(gpu.desc.format),
                        ))
                    })
                    .collect();
                let depth = target.depth.and_then(|d| self.layer_view(d, 0, 0));
                Some(Attachments { colors, depth })
            }
            TargetBinding::CubeFace { cubemap, face, depth } => {
                let format = Self::convert_texture_format(self.textures.get(&cubemap)?.desc.format);
                let color = self.layer_view(cubemap, 0, face)?;
                let depth = self
                    .targets
                    .get(&depth)?
                    .depth
                    .and_then(|d| self.layer_view(d, 0, 0));
                Some(Attachments {
                    colors: vec![(color, format)],
                    depth,
                })
            }
        }
    }

    fn ensure_mesh(&mut self, mesh: &Mesh) -> bool {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return false;
        }
        if !self.meshes.contains_key(&mesh.id) {
            let vertices = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(mesh.name.as_str()),
                    contents: mesh.vertex_bytes(),
                    usage: wgpu::BufferUsages::VERTEX,
                });
            let indices = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(mesh.name.as_str()),
                    contents: mesh.index_bytes(),
                    usage: wgpu::BufferUsages::INDEX,
                });
            self.meshes.insert(
                mesh.id,
                GpuMesh {
                    vertices,
                    indices,
                    index_count: mesh.indices.len() as u32,
                },
            );
        }
        true
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> bool {
        if self.pipelines.contains_key(key) {
            return true;
        }
        let Some(program) = self.programs.get(&key.program) else {
            return false;
        };

        let attributes: Vec<wgpu::VertexAttribute> = Vertex::attributes()
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: match a.format {
                    VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
                    VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                    VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
                },
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: Vertex::STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let write_mask = if key.state.color_write {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        };
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                // 32-bit float targets are not blendable without an extra feature
                let blend = if *format == wgpu::TextureFormat::Rgba32Float {
                    None
                } else {
                    key.state.blend.map(Self::convert_blend)
                };
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend,
                    write_mask,
                })
            })
            .collect();

        let depth_stencil = key.depth.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: key.state.depth_test && key.state.depth_write,
            depth_compare: if key.state.depth_test {
                Self::convert_compare_function(key.state.depth_compare)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: match key.state.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match key.state.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.name.as_str()),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: "vs_main",
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: "fs_main",
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        self.pipelines.insert(key.clone(), pipeline);
        true
    }

    fn copy_pipeline(
        &self,
        label: &str,
        source: &str,
        format: wgpu::TextureFormat,
        depth: bool,
    ) -> wgpu::RenderPipeline {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&self.copy_layout],
                push_constant_ranges: &[],
            });
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: depth.then(|| wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
    }

    /// Run a fullscreen-triangle copy pass from `source` into `target`
    fn copy_pass(
        &mut self,
        pipeline_key: (wgpu::TextureFormat, bool),
        mip_pass: bool,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
    ) {
        let pipeline = if mip_pass {
            if !self.mip_pipelines.contains_key(&pipeline_key.0) {
                let p = self.copy_pipeline("mipmap", shaders::MIPMAP_SHADER, pipeline_key.0, false);
                self.mip_pipelines.insert(pipeline_key.0, p);
            }
            self.mip_pipelines.get(&pipeline_key.0)
        } else {
            if !self.blit_pipelines.contains_key(&pipeline_key) {
                let p = self.copy_pipeline("blit", shaders::BLIT_SHADER, pipeline_key.0, pipeline_key.1);
                self.blit_pipelines.insert(pipeline_key, p);
            }
            self.blit_pipelines.get(&pipeline_key)
        };
        let Some(pipeline) = pipeline else {
            return;
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.copy_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(source),
            }],
        });

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None })
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("copy"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.encoder = Some(encoder);
    }

    /// Record one draw of an uploaded mesh with the active program and state
    fn record_draw(&mut self, mesh_id: u64) {
        let Some(program_handle) = self.program else {
            log::warn!("WgpuBackend: draw without an active program");
            return;
        };
        let Some(attachments) = self.attachments() else {
            log::warn!("WgpuBackend: draw without a bound target");
            return;
        };

        let key = PipelineKey {
            program: program_handle,
            colors: attachments.colors.iter().map(|(_, f)| *f).collect(),
            depth: attachments.depth.is_some(),
            state: self.state,
        };
        if !self.ensure_pipeline(&key) {
            return;
        }

        let (Some(program), Some(pipeline), Some(mesh)) = (
            self.programs.get(&program_handle),
            self.pipelines.get(&key),
            self.meshes.get(&mesh_id),
        ) else {
            return;
        };

        let uniform_buffer = (!program.block.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("uniforms"),
                    contents: program.block.bytes(),
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });
        let uniform_entries: Vec<wgpu::BindGroupEntry> = uniform_buffer
            .iter()
            .map(|buffer| wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &program.uniform_layout,
            entries: &uniform_entries,
        });

        let views: Vec<wgpu::TextureView> = program
            .textures
            .iter()
            .filter_map(|(name, kind)| {
                let fallback = match kind {
                    TextureSlotKind::Cube => self.fallback_cube,
                    TextureSlotKind::Depth => self.fallback_depth,
                    _ => self.fallback_2d,
                };
                let texture = self.bound_textures.get(name).copied().unwrap_or(fallback);
                self.sampled_view(texture, *kind)
                    .or_else(|| self.sampled_view(fallback, *kind))
            })
            .collect();
        if views.len() != program.textures.len() {
            return;
        }
        let mut texture_entries = Vec::with_capacity(views.len() * 2);
        for (i, ((_, kind), view)) in program.textures.iter().zip(views.iter()).enumerate() {
            let sampler = match kind {
                TextureSlotKind::Filtered | TextureSlotKind::Cube => &self.filtering_sampler,
                _ => &self.nearest_sampler,
            };
            texture_entries.push(wgpu::BindGroupEntry {
                binding: (i * 2) as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: (i * 2 + 1) as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &program.texture_layout,
            entries: &texture_entries,
        });

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None })
        });
        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = attachments
                .colors
                .iter()
                .map(|(view, _)| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(program.name.as_str()),
                color_attachments: &color_attachments,
                depth_stencil_attachment: attachments.depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertices.slice(..));
            pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
        self.encoder = Some(encoder);
    }
}

/// Convert IEEE 754 half-precision bits to `f32`
fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let mantissa = (bits & 0x3ff) as f32;
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        31 if mantissa == 0.0 => sign * f32::INFINITY,
        31 => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

impl RenderDevice for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return;
        }
        // Clamp to device limits while maintaining aspect ratio
        let max_size = self.device.limits().max_texture_dimension_2d;
        let (width, height) = if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width, height)
        };
        self.width = width;
        self.height = height;

        let old = self.screen;
        self.destroy_render_target(old);
        match self.create_render_target(&Self::screen_desc(width, height)) {
            Ok(screen) => self.screen = screen,
            Err(e) => log::warn!("WgpuBackend: failed to resize screen target: {e}"),
        }
    }

    fn screen_target(&self) -> RenderTargetHandle {
        self.screen
    }

    fn register_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        if let Some(handle) = self.program_names.get(&desc.name) {
            return Ok(*handle);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.name.as_str()),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });

        let block = UniformBlock::new(&desc.uniforms);
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = if block.is_empty() {
            Vec::new()
        } else {
            vec![wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }]
        };
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.name.as_str()),
                entries: &uniform_entries,
            });
        let texture_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.name.as_str()),
                entries: &Self::slot_layout_entries(&desc.textures),
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.name.as_str()),
                bind_group_layouts: &[&uniform_layout, &texture_layout],
                push_constant_ranges: &[],
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramCreationFailed(format!(
                "{}: {error}",
                desc.name
            )));
        }

        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(
            handle,
            GpuProgram {
                name: desc.name.clone(),
                module,
                block,
                textures: desc.textures.clone(),
                uniform_layout,
                texture_layout,
                pipeline_layout,
            },
        );
        self.program_names.insert(desc.name.clone(), handle);
        log::debug!("WgpuBackend: registered program {}", desc.name);
        Ok(handle)
    }

    fn find_program(&self, name: &str) -> Option<ProgramHandle> {
        self.program_names.get(name).copied()
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed("zero-sized texture".into()));
        }
        let usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::RENDER_ATTACHMENT;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layer_count(),
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage,
            view_formats: &[],
        });

        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let gpu = self
            .textures
            .get(&texture)
            .ok_or(BackendError::UnknownTexture(texture))?;
        let bytes_per_row = gpu.desc.width * gpu.desc.format.bytes_per_pixel();
        if data.len() != (bytes_per_row * gpu.desc.height) as usize {
            return Err(BackendError::SizeMismatch(format!(
                "expected {} bytes, got {}",
                bytes_per_row * gpu.desc.height,
                data.len()
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(gpu.desc.height),
            },
            wgpu::Extent3d {
                width: gpu.desc.width,
                height: gpu.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(gpu) = self.textures.remove(&texture) {
            gpu.texture.destroy();
        }
        self.bound_textures.retain(|_, t| *t != texture);
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let (format, mips, layers) = {
            let gpu = self
                .textures
                .get(&texture)
                .ok_or(BackendError::UnknownTexture(texture))?;
            (
                Self::convert_texture_format(gpu.desc.format),
                gpu.desc.mip_levels,
                gpu.desc.layer_count(),
            )
        };
        for layer in 0..layers {
            for mip in 1..mips {
                let (Some(source), Some(target)) = (
                    self.layer_view(texture, mip - 1, layer),
                    self.layer_view(texture, mip, layer),
                ) else {
                    continue;
                };
                self.copy_pass((format, false), true, &source, &target, None);
            }
        }
        Ok(())
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::RenderTargetCreationFailed(
                "zero-sized render target".into(),
            ));
        }
        let label = desc.label.clone().unwrap_or_default();
        let mut colors = Vec::with_capacity(desc.color_formats.len());
        for (i, format) in desc.color_formats.iter().enumerate() {
            colors.push(self.create_texture(&TextureDescriptor::new_2d(
                &format!("{label}.color{i}"),
                desc.width,
                desc.height,
                *format,
            ))?);
        }
        let depth = if desc.depth {
            Some(self.create_texture(&TextureDescriptor::new_2d(
                &format!("{label}.depth"),
                desc.width,
                desc.height,
                TextureFormat::Depth32Float,
            ))?)
        } else {
            None
        };
        let handle = RenderTargetHandle(self.allocate_id());
        self.targets.insert(
            handle,
            GpuTarget {
                desc: desc.clone(),
                colors,
                depth,
            },
        );
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        if let Some(t) = self.targets.remove(&target) {
            for color in t.colors {
                self.destroy_texture(color);
            }
            if let Some(depth) = t.depth {
                self.destroy_texture(depth);
            }
        }
    }

    fn color_texture(&self, target: RenderTargetHandle, index: usize) -> Option<TextureHandle> {
        self.targets.get(&target)?.colors.get(index).copied()
    }

    fn depth_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle> {
        self.targets.get(&target)?.depth
    }

    fn bind(&mut self, binding: TargetBinding) -> BackendResult<()> {
        if self.bound.is_some() {
            return Err(BackendError::TargetAlreadyBound);
        }
        match binding {
            TargetBinding::Target(target) if !self.targets.contains_key(&target) => {
                return Err(BackendError::UnknownRenderTarget(target));
            }
            TargetBinding::CubeFace { cubemap, .. } if !self.textures.contains_key(&cubemap) => {
                return Err(BackendError::UnknownTexture(cubemap));
            }
            _ => {}
        }
        self.bound = Some(binding);
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = None;
    }

    fn bound(&self) -> Option<TargetBinding> {
        self.bound
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: bool) {
        let Some(attachments) = self.attachments() else {
            return;
        };
        let mut encoder = self.take_encoder();
        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = attachments
                .colors
                .iter()
                .map(|(view, _)| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: match color {
                                Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: c[0] as f64,
                                    g: c[1] as f64,
                                    b: c[2] as f64,
                                    a: c[3] as f64,
                                }),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: attachments.depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: if depth {
                                wgpu::LoadOp::Clear(1.0)
                            } else {
                                wgpu::LoadOp::Load
                            },
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.encoder = Some(encoder);
    }

    fn copy_depth_from(&mut self, source: RenderTargetHandle) -> BackendResult<()> {
        let Some(TargetBinding::Target(bound)) = self.bound else {
            return Ok(());
        };
        let src = self
            .targets
            .get(&source)
            .ok_or(BackendError::UnknownRenderTarget(source))?;
        let dst = self
            .targets
            .get(&bound)
            .ok_or(BackendError::UnknownRenderTarget(bound))?;
        if (src.desc.width, src.desc.height) != (dst.desc.width, dst.desc.height) {
            return Err(BackendError::SizeMismatch("depth copy".into()));
        }
        let (Some(src_depth), Some(dst_depth)) = (src.depth, dst.depth) else {
            return Ok(());
        };
        let extent = wgpu::Extent3d {
            width: src.desc.width,
            height: src.desc.height,
            depth_or_array_layers: 1,
        };
        let mut encoder = self.take_encoder();
        if let (Some(s), Some(d)) = (self.textures.get(&src_depth), self.textures.get(&dst_depth)) {
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &s.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &d.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                extent,
            );
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.state = state;
    }

    fn raster_state(&self) -> RasterState {
        self.state
    }

    fn use_program(&mut self, program: ProgramHandle) {
        if self.programs.contains_key(&program) {
            self.program = Some(program);
            self.bound_textures.clear();
        }
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(program) = self.program.and_then(|p| self.programs.get_mut(&p)) else {
            return;
        };
        if !program.block.set(name, &value) {
            log::trace!("WgpuBackend: {} ignores uniform {name}", program.name);
        }
    }

    fn set_texture(&mut self, name: &str, texture: TextureHandle) {
        self.bound_textures.insert(name.to_string(), texture);
    }

    fn draw_mesh(&mut self, mesh: &Mesh) {
        if self.ensure_mesh(mesh) {
            self.record_draw(mesh.id);
        }
    }

    fn draw_fullscreen(&mut self) {
        let quad = self.quad.clone();
        if self.ensure_mesh(&quad) {
            self.record_draw(quad.id);
        }
    }

    fn blit(&mut self, texture: TextureHandle) {
        let Some(attachments) = self.attachments() else {
            return;
        };
        let [(target, format)] = attachments.colors.as_slice() else {
            log::warn!("WgpuBackend: blit needs a single-color target");
            return;
        };
        let Some(source) = self.layer_view(texture, 0, 0) else {
            return;
        };
        self.copy_pass(
            (*format, attachments.depth.is_some()),
            false,
            &source,
            target,
            attachments.depth.as_ref(),
        );
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn read_color(
        &mut self,
        target: RenderTargetHandle,
        index: usize,
    ) -> BackendResult<Rgba32FImage> {
        let texture = self
            .color_texture(target, index)
            .ok_or_else(|| BackendError::ReadbackFailed(format!("no color buffer {index}")))?;
        let (width, height, format) = {
            let gpu = self
                .textures
                .get(&texture)
                .ok_or(BackendError::UnknownTexture(texture))?;
            (gpu.desc.width, gpu.desc.height, gpu.desc.format)
        };
        if format.is_depth() {
            return Err(BackendError::ReadbackFailed(
                "depth buffers cannot be read as color".into(),
            ));
        }
        let bpp = format.bytes_per_pixel();
        let unpadded = width * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.take_encoder();
        if let Some(gpu) = self.textures.get(&texture) {
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &gpu.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &buffer,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let data = slice.get_mapped_range();
            for row in 0..height as usize {
                let start = row * padded as usize;
                let bytes = &data[start..start + unpadded as usize];
                match format {
                    TextureFormat::Rgba8Unorm => {
                        pixels.extend(bytes.iter().map(|b| *b as f32 / 255.0));
                    }
                    TextureFormat::Rgba16Float => {
                        pixels.extend(
                            bytes
                                .chunks_exact(2)
                                .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]]))),
                        );
                    }
                    TextureFormat::Rgba32Float | TextureFormat::Depth32Float => {
                        pixels.extend(
                            bytes
                                .chunks_exact(4)
                                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                        );
                    }
                }
            }
        }
        buffer.unmap();

        Rgba32FImage::from_raw(width, height, pixels)
            .ok_or_else(|| BackendError::ReadbackFailed("pixel count mismatch".into()))
    }

    fn take_error(&mut self) -> Option<BackendError> {
        let mut errors = self.errors.lock();
        if errors.is_empty() {
            None
        } else {
            Some(BackendError::Validation(errors.remove(0)))
        }
    }
}
