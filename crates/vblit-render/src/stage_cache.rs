use std::collections::HashMap;

use tracing::{debug, warn};
use vblit_core::{GpuInternalFormat, VblitResult};

use crate::device::{GpuDevice, TextureId};

#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
struct StageKey {
    width: u32,
    height: u32,
    format: GpuInternalFormat,
}

/// An intermediate render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTexture {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
    pub format: GpuInternalFormat,
}

/// Stage textures keyed by exact size and internal format.
///
/// Entries live until [`StageTextureCache::clear`]; the cache never shrinks
/// on its own.
#[derive(Debug, Default)]
pub struct StageTextureCache {
    entries: HashMap<StageKey, TextureId>,
}

impl StageTextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stage texture for this triple, allocating it on a miss.
    pub fn acquire(
        &mut self,
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
        format: GpuInternalFormat,
    ) -> VblitResult<StageTexture> {
        let key = StageKey {
            width,
            height,
            format,
        };

        if let Some(texture) = self.entries.get(&key) {
            return Ok(StageTexture {
                texture: *texture,
                width,
                height,
                format,
            });
        }

        let texture = device.create_texture()?;
        if let Err(err) = device.allocate_storage(texture, format, width, height) {
            if let Err(cleanup) = device.delete_texture(texture) {
                warn!("Failed to delete stage texture: {}", cleanup);
            }
            return Err(err);
        }

        debug!(width, height, ?format, "Allocated stage texture");
        self.entries.insert(key, texture);
        Ok(StageTexture {
            texture,
            width,
            height,
            format,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<StageTexture> {
        let mut entries: Vec<StageTexture> = self
            .entries
            .iter()
            .map(|(key, texture)| StageTexture {
                texture: *texture,
                width: key.width,
                height: key.height,
                format: key.format,
            })
            .collect();
        entries.sort_by_key(|e| e.texture);
        entries
    }

    /// Delete every stage texture. Errors are logged.
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for (_, texture) in self.entries.drain() {
            if let Err(err) = device.delete_texture(texture) {
                warn!("Failed to delete stage texture: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ContextKind;
    use crate::driver::GpuDriver;
    use crate::soft::SoftDriver;
    use vblit_core::EngineConfig;

    fn device() -> (SoftDriver, Box<dyn GpuDevice>) {
        let driver = SoftDriver::new();
        let mut device = driver.open(&EngineConfig::default()).unwrap();
        device.make_current(ContextKind::Primary).unwrap();
        (driver, device)
    }

    #[test]
    fn test_hit_reuses_texture() {
        let (driver, mut device) = device();
        let mut cache = StageTextureCache::new();
        let a = cache.acquire(&mut *device, 64, 32, GpuInternalFormat::Rgba8).unwrap();
        let b = cache.acquire(&mut *device, 64, 32, GpuInternalFormat::Rgba8).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(driver.device().stats().storage_allocations, 1);
    }

    #[test]
    fn test_lookup_is_exact() {
        let (_driver, mut device) = device();
        let mut cache = StageTextureCache::new();
        cache.acquire(&mut *device, 64, 32, GpuInternalFormat::Rgba8).unwrap();
        cache.acquire(&mut *device, 64, 33, GpuInternalFormat::Rgba8).unwrap();
        cache.acquire(&mut *device, 64, 32, GpuInternalFormat::Rgba16F).unwrap();
        assert_eq!(cache.len(), 3);
        let entries = cache.entries();
        assert!(entries.windows(2).all(|w| w[0].texture < w[1].texture));
    }

    #[test]
    fn test_failed_allocation_is_not_cached() {
        let (driver, mut device) = device();
        let mut cache = StageTextureCache::new();
        assert!(cache.acquire(&mut *device, 0, 32, GpuInternalFormat::Rgba8).is_err());
        assert!(cache.is_empty());
        assert_eq!(driver.device().live_textures(), 0);
    }

    #[test]
    fn test_clear_deletes_textures() {
        let (driver, mut device) = device();
        let mut cache = StageTextureCache::new();
        cache.acquire(&mut *device, 8, 8, GpuInternalFormat::Rgba32F).unwrap();
        cache.clear(&mut *device);
        assert!(cache.is_empty());
        assert_eq!(driver.device().live_textures(), 0);
    }
}
