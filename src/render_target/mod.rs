//! Offscreen render-target pool
//!
//! Every transient target the frame needs is requested through
//! [`RenderTargetPool::ensure`] by purpose. The pool reallocates only when
//! the resolved layout changes, so stages must re-fetch handles each frame
//! instead of caching color textures across a resize.

mod resource;

pub use resource::*;

use std::collections::HashMap;

use crate::backend::{BackendResult, RenderDevice, RenderTargetHandle, TextureHandle};

#[derive(Debug, Clone)]
struct PoolEntry {
    handle: RenderTargetHandle,
    spec: ResolvedSpec,
    recreate_count: u32,
}

#[derive(Debug, Default)]
pub struct RenderTargetPool {
    entries: HashMap<TargetPurpose, PoolEntry>,
}

impl RenderTargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the target for `purpose`, (re)allocating it if its layout changed
    pub fn ensure(
        &mut self,
        device: &mut dyn RenderDevice,
        purpose: TargetPurpose,
        spec: &TargetSpec,
    ) -> BackendResult<RenderTargetHandle> {
        let requested = spec.resolve(device.viewport());
        let current = self.entries.get(&purpose);
        if ensure_size(current.map(|e| &e.spec), &requested) == Ensure::Keep {
            if let Some(entry) = current {
                return Ok(entry.handle);
            }
        }

        let recreate_count = current.map_or(0, |e| e.recreate_count) + 1;
        if let Some(old) = self.entries.remove(&purpose) {
            log::debug!(
                "Resizing {:?} target {}x{} -> {}x{}",
                purpose,
                old.spec.width,
                old.spec.height,
                requested.width,
                requested.height
            );
            device.destroy_render_target(old.handle);
        }
        let handle = device.create_render_target(&requested.descriptor(&format!("{purpose:?}")))?;
        self.entries.insert(
            purpose,
            PoolEntry {
                handle,
                spec: requested,
                recreate_count,
            },
        );
        Ok(handle)
    }

    pub fn get(&self, purpose: TargetPurpose) -> Option<RenderTargetHandle> {
        self.entries.get(&purpose).map(|e| e.handle)
    }

    /// Color buffer `index` of the target for `purpose`, if allocated
    pub fn color(
        &self,
        device: &dyn RenderDevice,
        purpose: TargetPurpose,
        index: usize,
    ) -> Option<TextureHandle> {
        device.color_texture(self.get(purpose)?, index)
    }

    pub fn depth(&self, device: &dyn RenderDevice, purpose: TargetPurpose) -> Option<TextureHandle> {
        device.depth_texture(self.get(purpose)?)
    }

    pub fn size(&self, purpose: TargetPurpose) -> Option<(u32, u32)> {
        self.entries
            .get(&purpose)
            .map(|e| (e.spec.width, e.spec.height))
    }

    /// Number of allocations made for `purpose` so far
    pub fn recreate_count(&self, purpose: TargetPurpose) -> u32 {
        self.entries.get(&purpose).map_or(0, |e| e.recreate_count)
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice, purpose: TargetPurpose) {
        if let Some(entry) = self.entries.remove(&purpose) {
            device.destroy_render_target(entry.handle);
        }
    }

    pub fn release_all(&mut self, device: &mut dyn RenderDevice) {
        for (_, entry) in self.entries.drain() {
            device.destroy_render_target(entry.handle);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, TextureFormat};

    #[test]
    fn test_same_size_reuses_target() {
        let mut device = DummyBackend::new(320, 240);
        let mut pool = RenderTargetPool::new();
        let spec = TargetSpec::screen(&[TextureFormat::Rgba16Float]).with_depth();

        let a = pool.ensure(&mut device, TargetPurpose::Scene, &spec).expect("alloc");
        let b = pool.ensure(&mut device, TargetPurpose::Scene, &spec).expect("reuse");
        assert_eq!(a, b);
        assert_eq!(pool.recreate_count(TargetPurpose::Scene), 1);
    }

    #[test]
    fn test_resize_recreates_and_frees_old() {
        let mut device = DummyBackend::new(320, 240);
        let mut pool = RenderTargetPool::new();
        let spec = TargetSpec::screen(&[TextureFormat::Rgba8Unorm]);

        let a = pool.ensure(&mut device, TargetPurpose::Ssao, &spec).expect("alloc");
        let before = device.live_target_count();
        device.resize(640, 480);
        let b = pool.ensure(&mut device, TargetPurpose::Ssao, &spec).expect("realloc");

        assert_ne!(a, b);
        assert_eq!(device.live_target_count(), before);
        assert_eq!(device.target_size(b), Some((640, 480)));
        assert_eq!(pool.recreate_count(TargetPurpose::Ssao), 2);
    }

    #[test]
    fn test_absolute_targets_ignore_viewport() {
        let mut device = DummyBackend::new(320, 240);
        let mut pool = RenderTargetPool::new();
        let spec = TargetSpec::depth_only(512);
        pool.ensure(&mut device, TargetPurpose::Shadow(0), &spec).expect("alloc");
        device.resize(100, 100);
        pool.ensure(&mut device, TargetPurpose::Shadow(0), &spec).expect("reuse");
        assert_eq!(pool.recreate_count(TargetPurpose::Shadow(0)), 1);
        assert_eq!(pool.size(TargetPurpose::Shadow(0)), Some((512, 512)));
    }

    #[test]
    fn test_release_all() {
        let mut device = DummyBackend::new(32, 32);
        let mut pool = RenderTargetPool::new();
        let baseline = device.live_target_count();
        pool.ensure(&mut device, TargetPurpose::Fog, &TargetSpec::screen(&[TextureFormat::Rgba8Unorm]))
            .expect("alloc");
        pool.release_all(&mut device);
        assert!(pool.is_empty());
        assert_eq!(device.live_target_count(), baseline);
    }
}
