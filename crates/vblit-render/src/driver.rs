use vblit_core::{EngineConfig, VblitResult};

use crate::device::GpuDevice;

/// Capability provider for one platform's graphics stack.
///
/// Opening a driver connects to the display, creates the primary and
/// auxiliary contexts and resolves every entry point the engine needs. A
/// missing entry point fails here, never later.
pub trait GpuDriver: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, config: &EngineConfig) -> VblitResult<Box<dyn GpuDevice>>;
}
