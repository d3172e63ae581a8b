//! # vblit-core
//!
//! Core types for the vblit GPU compositor.
//! This crate holds everything that does not talk to a GPU: the color format
//! model, surface and composition descriptions, fences, configuration and
//! the error type shared by all vblit crates.

pub mod color;
pub mod composition;
pub mod config;
pub mod error;
pub mod fence;
pub mod format;
pub mod surface;

pub use config::*;

pub use color::Color;
pub use composition::{Composition, FlipMask, Normalize, Object, Region};
pub use error::{ShaderStage, VblitError, VblitResult};
pub use fence::{Fence, WaitStatus};
pub use format::{ColorFormat, ColorSpace, FormatDescriptor, GpuInternalFormat, PixelType};
pub use surface::{Plane, Surface, SurfaceFlags, SurfaceId};
