//! # vblit-render
//!
//! The vblit composition engine. Imports caller surfaces without copying,
//! draws compositions with the GLES pipeline and hands back fences.
//! Devices are reached through [`GpuDriver`]; the `soft` driver runs the
//! same program catalog on the CPU, the `gles` feature adds the EGL/GLES
//! driver.

pub mod context;
pub mod device;
pub mod driver;
pub mod engine;
pub mod importer;
pub mod probe;
pub mod renderability;
pub mod shaders;
pub mod soft;
pub mod stage_cache;

#[cfg(feature = "gles")]
pub mod gles;

pub use context::{Capabilities, CurrentContext, GraphicsContext};
pub use device::{ContextKind, GpuDevice, TextureId, TextureTarget};
pub use driver::GpuDriver;
pub use engine::Engine;
pub use importer::ImportLayout;
pub use probe::{AdrenoProbe, FixedProbe, PlatformProbe};
pub use renderability::RenderPath;
pub use shaders::ShaderKind;
pub use soft::{SoftDevice, SoftDriver, SoftMemory};
pub use stage_cache::StageTexture;

#[cfg(feature = "gles")]
pub use gles::EglDriver;
