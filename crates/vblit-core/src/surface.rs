use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VblitError, VblitResult};
use crate::format;

/// Prefix of the upper 32 bits of every surface id.
pub const SURFACE_ID_PREFIX: u64 = 0x0000_1B2C_0000_0000;

/// Maximum number of memory planes a surface may describe.
pub const MAX_PLANES: usize = 3;

bitflags! {
    /// How a registered surface will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SurfaceFlags: u32 {
        const INPUT = 1 << 0;
        const OUTPUT = 1 << 1;
    }
}

/// Handle of a registered surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    /// Id derived from the primary buffer handle.
    pub fn from_fd(fd: i32) -> Self {
        SurfaceId(SURFACE_ID_PREFIX | (fd as u32 as u64))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// One memory plane of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plane {
    pub fd: i32,
    pub offset: u32,
    pub stride: u32,
}

impl Plane {
    pub fn new(fd: i32, offset: u32, stride: u32) -> Self {
        Self { fd, offset, stride }
    }
}

/// Caller-owned description of an image buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub format: u32,
    pub width: u32,
    pub height: u32,
    /// Total size of the buffer in bytes.
    pub size: u64,
    pub planes: Vec<Plane>,
}

impl Surface {
    /// A single plane surface.
    pub fn new(fd: i32, format: u32, width: u32, height: u32, stride: u32, size: u64) -> Self {
        Self {
            format,
            width,
            height,
            size,
            planes: vec![Plane::new(fd, 0, stride)],
        }
    }

    /// Add another memory plane sharing the primary buffer handle.
    pub fn with_plane(mut self, offset: u32, stride: u32) -> Self {
        let fd = self.fd();
        self.planes.push(Plane::new(fd, offset, stride));
        self
    }

    /// Handle of the primary plane.
    pub fn fd(&self) -> i32 {
        self.planes.first().map(|p| p.fd).unwrap_or(-1)
    }

    pub fn id(&self) -> SurfaceId {
        SurfaceId::from_fd(self.fd())
    }

    pub fn stride(&self) -> u32 {
        self.planes.first().map(|p| p.stride).unwrap_or(0)
    }

    pub fn offset(&self) -> u32 {
        self.planes.first().map(|p| p.offset).unwrap_or(0)
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Check the descriptor before it reaches the driver.
    pub fn validate(&self) -> VblitResult<()> {
        format::describe(self.format)?;

        if self.planes.is_empty() || self.planes.len() > MAX_PLANES {
            return Err(VblitError::InvalidArgument(format!(
                "surface must have 1 to {MAX_PLANES} planes, got {}",
                self.planes.len()
            )));
        }
        if self.fd() < 0 {
            return Err(VblitError::InvalidArgument(format!(
                "invalid buffer handle {}",
                self.fd()
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(VblitError::InvalidArgument(format!(
                "empty surface {}x{}",
                self.width, self.height
            )));
        }
        if self.planes.iter().any(|p| p.stride == 0) {
            return Err(VblitError::InvalidArgument("plane stride is zero".into()));
        }
        if u64::from(self.offset()) >= self.size {
            return Err(VblitError::InvalidArgument(format!(
                "plane offset {} outside of a {} byte buffer",
                self.offset(),
                self.size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColorFormat;

    #[test]
    fn test_id_is_derived_from_fd() {
        let s = Surface::new(7, ColorFormat::Rgba8888.code(), 64, 64, 256, 64 * 256);
        assert_eq!(s.id(), SurfaceId(0x0000_1B2C_0000_0007));
        assert_eq!(s.id(), SurfaceId::from_fd(7));
        assert_eq!(s.id().to_string(), "0x00001b2c00000007");
    }

    #[test]
    fn test_extra_planes_share_fd() {
        let s = Surface::new(3, ColorFormat::Nv12.code(), 64, 32, 64, 64 * 48).with_plane(2048, 64);
        assert_eq!(s.num_planes(), 2);
        assert_eq!(s.planes[1], Plane::new(3, 2048, 64));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut s = Surface::new(3, ColorFormat::Rgba8888.code(), 0, 4, 16, 64);
        assert!(matches!(s.validate(), Err(VblitError::InvalidArgument(_))));
        s.width = 4;
        s.format = 0xF0;
        assert!(matches!(s.validate(), Err(VblitError::UnsupportedFormat(0xF0))));
        s.format = ColorFormat::Rgba8888.code();
        s.planes.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_flags() {
        let both = SurfaceFlags::INPUT | SurfaceFlags::OUTPUT;
        assert!(both.contains(SurfaceFlags::OUTPUT));
        assert_eq!(both.bits(), 0b11);
    }
}
