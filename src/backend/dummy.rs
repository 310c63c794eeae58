//! Dummy render device for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It records every
//! command it receives, tracks binding state the way a real device would,
//! and answers read-backs with a configurable constant color, so the
//! renderer can be exercised without GPU hardware.

use std::collections::HashMap;

use glam::Vec4;
use image::{Rgba, Rgba32FImage};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;

/// A command observed by the dummy device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Bind(TargetBinding),
    Unbind,
    Clear { color: Option<[f32; 4]>, depth: bool },
    CopyDepth { from: RenderTargetHandle },
    SetState(RasterState),
    UseProgram(String),
    Uniform { name: String, value: UniformValue },
    Texture { name: String, texture: TextureHandle },
    DrawMesh { mesh: String, vertices: usize },
    DrawFullscreen,
    Blit { texture: TextureHandle },
    GenerateMipmaps { texture: TextureHandle },
}

#[derive(Debug, Clone)]
struct DummyTarget {
    desc: RenderTargetDescriptor,
    colors: Vec<TextureHandle>,
    depth: Option<TextureHandle>,
}

/// Dummy render device.
#[derive(Debug)]
pub struct DummyBackend {
    width: u32,
    height: u32,
    screen: RenderTargetHandle,
    programs: HashMap<String, ProgramHandle>,
    program_names: HashMap<ProgramHandle, String>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    targets: HashMap<RenderTargetHandle, DummyTarget>,
    bound: Option<TargetBinding>,
    state: RasterState,
    program: Option<ProgramHandle>,
    commands: Vec<DeviceCommand>,
    readback_color: Vec4,
    pending_errors: Vec<BackendError>,
    bind_violations: usize,
    next_id: u64,
}

impl DummyBackend {
    /// Create a new dummy device with a `width` x `height` screen.
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self {
            width,
            height,
            screen: RenderTargetHandle(0),
            programs: HashMap::new(),
            program_names: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            bound: None,
            state: RasterState::default(),
            program: None,
            commands: Vec::new(),
            readback_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            pending_errors: Vec::new(),
            bind_violations: 0,
            next_id: 1,
        };
        backend.screen = backend.insert_target(RenderTargetDescriptor {
            label: Some("screen".into()),
            width,
            height,
            color_formats: vec![TextureFormat::Rgba8Unorm],
            depth: true,
        });
        backend
    }

    /// Register an empty program for every name in `names`.
    pub fn with_programs<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            let handle = ProgramHandle(self.allocate_id());
            self.programs.insert(name.to_string(), handle);
            self.program_names.insert(handle, name.to_string());
        }
        self
    }

    /// Color returned for every texel of every read-back
    pub fn set_readback_color(&mut self, color: Vec4) {
        self.readback_color = color;
    }

    /// Queue an error for the next `take_error` call
    pub fn inject_error(&mut self, error: BackendError) {
        self.pending_errors.push(error);
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of binds attempted while another target was still bound
    pub fn bind_violations(&self) -> usize {
        self.bind_violations
    }

    /// Every value uploaded to uniform `name`, in order
    pub fn uniform_values(&self, name: &str) -> Vec<&UniformValue> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Uniform { name: n, value } if n == name => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Number of draws (mesh or fullscreen) recorded
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::DrawMesh { .. } | DeviceCommand::DrawFullscreen))
            .count()
    }

    /// Names of programs activated, in order
    pub fn programs_used(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::UseProgram(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn live_target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn target_size(&self, target: RenderTargetHandle) -> Option<(u32, u32)> {
        self.targets.get(&target).map(|t| (t.desc.width, t.desc.height))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_texture(&mut self, desc: TextureDescriptor) -> TextureHandle {
        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(handle, desc);
        handle
    }

    fn insert_target(&mut self, desc: RenderTargetDescriptor) -> RenderTargetHandle {
        let label = desc.label.clone().unwrap_or_default();
        let colors = desc
            .color_formats
            .iter()
            .enumerate()
            .map(|(i, format)| {
                self.insert_texture(TextureDescriptor::new_2d(
                    &format!("{label}.color{i}"),
                    desc.width,
                    desc.height,
                    *format,
                ))
            })
            .collect();
        let depth = desc.depth.then(|| {
            self.insert_texture(TextureDescriptor::new_2d(
                &format!("{label}.depth"),
                desc.width,
                desc.height,
                TextureFormat::Depth32Float,
            ))
        });
        let handle = RenderTargetHandle(self.allocate_id());
        self.targets.insert(handle, DummyTarget { desc, colors, depth });
        handle
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl RenderDevice for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        if let Some(screen) = self.targets.get_mut(&self.screen) {
            screen.desc.width = self.width;
            screen.desc.height = self.height;
        }
    }

    fn screen_target(&self) -> RenderTargetHandle {
        self.screen
    }

    fn register_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        log::trace!("DummyBackend: registering program {}", desc.name);
        if let Some(handle) = self.programs.get(&desc.name) {
            return Ok(*handle);
        }
        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(desc.name.clone(), handle);
        self.program_names.insert(handle, desc.name.clone());
        Ok(handle)
    }

    fn find_program(&self, name: &str) -> Option<ProgramHandle> {
        self.programs.get(name).copied()
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(
                "zero-sized texture".into(),
            ));
        }
        Ok(self.insert_texture(desc.clone()))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let desc = self
            .textures
            .get(&texture)
            .ok_or(BackendError::UnknownTexture(texture))?;
        let expected = (desc.width * desc.height * desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(BackendError::SizeMismatch(format!(
                "expected {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::UnknownTexture(texture));
        }
        self.commands.push(DeviceCommand::GenerateMipmaps { texture });
        Ok(())
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        log::trace!(
            "DummyBackend: creating render target {:?} ({}x{}, {} colors, depth: {})",
            desc.label,
            desc.width,
            desc.height,
            desc.color_formats.len(),
            desc.depth
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::RenderTargetCreationFailed(
                "zero-sized render target".into(),
            ));
        }
        Ok(self.insert_target(desc.clone()))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        if let Some(t) = self.targets.remove(&target) {
            for color in t.colors {
                self.textures.remove(&color);
            }
            if let Some(depth) = t.depth {
                self.textures.remove(&depth);
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
            self.bind_violations += 1;
            log::warn!("DummyBackend: bind {:?} while {:?} is bound", binding, self.bound);
            return Err(BackendError::TargetAlreadyBound);
        }
        match binding {
            TargetBinding::Target(target) => {
                if !self.targets.contains_key(&target) {
                    return Err(BackendError::UnknownRenderTarget(target));
                }
            }
            TargetBinding::CubeFace { cubemap, depth, .. } => {
                if !self.textures.contains_key(&cubemap) {
                    return Err(BackendError::UnknownTexture(cubemap));
                }
                if !self.targets.contains_key(&depth) {
                    return Err(BackendError::UnknownRenderTarget(depth));
                }
            }
        }
        self.bound = Some(binding);
        self.commands.push(DeviceCommand::Bind(binding));
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = None;
        self.commands.push(DeviceCommand::Unbind);
    }

    fn bound(&self) -> Option<TargetBinding> {
        self.bound
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: bool) {
        self.commands.push(DeviceCommand::Clear { color, depth });
    }

    fn copy_depth_from(&mut self, source: RenderTargetHandle) -> BackendResult<()> {
        let src = self
            .targets
            .get(&source)
            .ok_or(BackendError::UnknownRenderTarget(source))?;
        if let Some(TargetBinding::Target(dst)) = self.bound {
            let dst = self
                .targets
                .get(&dst)
                .ok_or(BackendError::UnknownRenderTarget(dst))?;
            if (src.desc.width, src.desc.height) != (dst.desc.width, dst.desc.height) {
                return Err(BackendError::SizeMismatch("depth copy".into()));
            }
        }
        self.commands.push(DeviceCommand::CopyDepth { from: source });
        Ok(())
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.state = state;
        self.commands.push(DeviceCommand::SetState(state));
    }

    fn raster_state(&self) -> RasterState {
        self.state
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.program = Some(program);
        let name = self
            .program_names
            .get(&program)
            .cloned()
            .unwrap_or_default();
        self.commands.push(DeviceCommand::UseProgram(name));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.commands.push(DeviceCommand::Uniform {
            name: name.to_string(),
            value,
        });
    }

    fn set_texture(&mut self, name: &str, texture: TextureHandle) {
        self.commands.push(DeviceCommand::Texture {
            name: name.to_string(),
            texture,
        });
    }

    fn draw_mesh(&mut self, mesh: &Mesh) {
        self.commands.push(DeviceCommand::DrawMesh {
            mesh: mesh.name.clone(),
            vertices: mesh.vertex_count(),
        });
    }

    fn draw_fullscreen(&mut self) {
        self.commands.push(DeviceCommand::DrawFullscreen);
    }

    fn blit(&mut self, texture: TextureHandle) {
        self.commands.push(DeviceCommand::Blit { texture });
    }

    fn flush(&mut self) {}

    fn read_color(
        &mut self,
        target: RenderTargetHandle,
        index: usize,
    ) -> BackendResult<Rgba32FImage> {
        let t = self
            .targets
            .get(&target)
            .ok_or(BackendError::UnknownRenderTarget(target))?;
        if index >= t.colors.len() {
            return Err(BackendError::ReadbackFailed(format!(
                "target has no color buffer {index}"
            )));
        }
        let c = self.readback_color;
        Ok(Rgba32FImage::from_pixel(
            t.desc.width,
            t.desc.height,
            Rgba([c.x, c.y, c.z, c.w]),
        ))
    }

    fn take_error(&mut self) -> Option<BackendError> {
        if self.pending_errors.is_empty() {
            None
        } else {
            Some(self.pending_errors.remove(0))
        }
    }
}
