#![allow(dead_code)]

use tracing_subscriber::EnvFilter;
use vblit_core::format::ColorFormat;
use vblit_core::{EngineConfig, Surface, SurfaceFlags, SurfaceId};
use vblit_render::{Engine, FixedProbe, GraphicsContext, SoftDevice, SoftDriver, SoftMemory};

pub const ALIGNMENT: u32 = 128;

/// An engine on the soft device, with handles to inspect what it did.
pub struct Harness {
    pub engine: Engine,
    pub device: SoftDevice,
    pub memory: SoftMemory,
}

pub fn create_harness() -> Harness {
    create_harness_with(SoftDriver::new(), EngineConfig::default())
}

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn create_harness_with(driver: SoftDriver, config: EngineConfig) -> Harness {
    init_tracing();
    let context = GraphicsContext::new(&driver, &FixedProbe::new(ALIGNMENT), config)
        .expect("Failed to open soft context");
    let engine = Engine::new(context).expect("Failed to create engine");
    Harness {
        engine,
        device: driver.device(),
        memory: driver.memory(),
    }
}

/// A `width`x`height` surface filled with one pixel value.
pub fn solid_surface(memory: &SoftMemory, format: ColorFormat, width: u32, height: u32, stride: u32, pixel: &[u8]) -> Surface {
    let mut bytes = vec![0u8; stride as usize * height as usize];
    for row in bytes.chunks_mut(stride as usize) {
        for texel in row[..width as usize * pixel.len()].chunks_mut(pixel.len()) {
            texel.copy_from_slice(pixel);
        }
    }
    let fd = memory.allocate_with(&bytes);
    Surface::new(fd, format.code(), width, height, stride, bytes.len() as u64)
}

/// A 2x2 RGBA surface with one color per quadrant: `[top left, top right,
/// bottom left, bottom right]`.
pub fn quadrant_surface(memory: &SoftMemory, colors: [[u8; 4]; 4]) -> Surface {
    let bytes: Vec<u8> = colors.concat();
    let fd = memory.allocate_with(&bytes);
    Surface::new(fd, ColorFormat::Rgba8888.code(), 2, 2, 8, bytes.len() as u64)
}

/// A zeroed single plane surface.
pub fn blank_surface(memory: &SoftMemory, format: ColorFormat, width: u32, height: u32, stride: u32) -> Surface {
    let size = stride as u64 * height as u64;
    let fd = memory.allocate(size as usize);
    Surface::new(fd, format.code(), width, height, stride, size)
}

/// A zeroed single plane surface of a full format code, mode bits included.
pub fn blank_surface_with_code(memory: &SoftMemory, code: u32, width: u32, height: u32, stride: u32) -> Surface {
    let size = stride as u64 * height as u64;
    let fd = memory.allocate(size as usize);
    Surface::new(fd, code, width, height, stride, size)
}

/// A zeroed NV12 surface with dense planes.
pub fn blank_nv12(memory: &SoftMemory, width: u32, height: u32) -> Surface {
    let luma = width * height;
    let size = luma + luma / 2;
    let fd = memory.allocate(size as usize);
    Surface::new(fd, ColorFormat::Nv12.code(), width, height, width, size as u64).with_plane(luma, width)
}

pub fn register(harness: &Harness, surface: &Surface, flags: SurfaceFlags) -> SurfaceId {
    harness
        .engine
        .register_surface(surface, flags)
        .expect("Failed to register surface")
}

/// Bytes of pixel `(x, y)` of a single plane surface.
pub fn pixel(memory: &SoftMemory, surface: &Surface, x: u32, y: u32, bytes_per_pixel: usize) -> Vec<u8> {
    let bytes = memory.read(surface.fd()).expect("Surface memory was freed");
    let start = (surface.offset() + y * surface.stride()) as usize + x as usize * bytes_per_pixel;
    bytes[start..start + bytes_per_pixel].to_vec()
}

pub fn assert_near(actual: u8, expected: u8, what: &str) {
    assert!(
        actual.abs_diff(expected) <= 1,
        "{} is {}, expected {} +/- 1",
        what,
        actual,
        expected
    );
}
