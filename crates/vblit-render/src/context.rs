//! The shared GPU connection.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};
use vblit_core::{EngineConfig, VblitError, VblitResult};

use crate::device::{ContextKind, GpuDevice, YUV_TARGET_EXTENSION};
use crate::driver::GpuDriver;
use crate::probe::{resolve_alignment, PlatformProbe};

/// Platform facts resolved once when the context opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Row alignment in bytes required for direct rendering.
    pub alignment: u32,
    /// Whether YUV images can be render targets.
    pub yuv_target: bool,
}

/// A device connection shared by every engine built on it.
///
/// Engines hold it through an `Arc`; the device closes when the last
/// holder drops.
pub struct GraphicsContext {
    device: Mutex<Box<dyn GpuDevice>>,
    capabilities: Capabilities,
    config: EngineConfig,
    driver_name: String,
}

impl GraphicsContext {
    pub fn new(
        driver: &dyn GpuDriver,
        probe: &dyn PlatformProbe,
        config: EngineConfig,
    ) -> VblitResult<Arc<Self>> {
        let device = driver.open(&config)?;

        let alignment = resolve_alignment(probe, &config.platform);
        let advertised = device.has_extension(YUV_TARGET_EXTENSION);
        let yuv_target = config.platform.yuv_target.resolve(advertised);
        let capabilities = Capabilities {
            alignment,
            yuv_target,
        };

        info!(
            "Opened {} graphics context on {}: alignment {}, YUV target {}",
            driver.name(),
            device.name(),
            alignment,
            yuv_target
        );

        Ok(Arc::new(Self {
            device: Mutex::new(device),
            capabilities,
            config,
            driver_name: driver.name().to_string(),
        }))
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Lock the device and bind one of its contexts to this thread.
    pub fn make_current(&self, kind: ContextKind) -> VblitResult<CurrentContext<'_>> {
        let mut device = self
            .device
            .lock()
            .map_err(|_| VblitError::Context("device mutex poisoned".into()))?;
        device.make_current(kind)?;
        Ok(CurrentContext {
            device,
            released: false,
        })
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        let device = match self.device.get_mut() {
            Ok(device) => device,
            Err(poisoned) => poisoned.into_inner(),
        };
        device.close();
        info!("Closed {} graphics context", self.driver_name);
    }
}

/// A locked device with a bound context. The context is released when this
/// guard goes away.
pub struct CurrentContext<'a> {
    device: MutexGuard<'a, Box<dyn GpuDevice>>,
    released: bool,
}

impl CurrentContext<'_> {
    /// Release the context, reporting failure.
    pub fn release(mut self) -> VblitResult<()> {
        self.released = true;
        self.device.release_current()
    }
}

impl Deref for CurrentContext<'_> {
    type Target = dyn GpuDevice;

    fn deref(&self) -> &Self::Target {
        &**self.device
    }
}

impl DerefMut for CurrentContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.device
    }
}

impl Drop for CurrentContext<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.device.release_current() {
                warn!("Failed to release GPU context: {}", err);
            }
        }
    }
}
