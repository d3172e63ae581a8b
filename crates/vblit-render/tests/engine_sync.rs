mod common;

use common::*;
use vblit_core::format::{fourcc, ColorFormat};
use vblit_core::{
    Color, Composition, EngineConfig, Fence, Object, Region, ShaderStage, SurfaceFlags, SurfaceId,
    VblitError, YuvTargetMode,
};
use vblit_render::device::gl_error;
use vblit_render::{Engine, FixedProbe, GraphicsContext, ImportLayout, SoftDriver};

const RED: [u8; 4] = [255, 0, 0, 255];

fn create_scene(h: &Harness) -> (SurfaceId, SurfaceId) {
    let src = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let dst = blank_surface(&h.memory, ColorFormat::Rgba8888, 32, 8, 128);
    (
        register(h, &src, SurfaceFlags::INPUT),
        register(h, &dst, SurfaceFlags::OUTPUT),
    )
}

fn simple_composition(src: SurfaceId, dst: SurfaceId) -> Composition {
    Composition::new(dst)
        .with_background(Color::BLACK)
        .with_object(Object::new(src, Region::sized(8, 8)))
}

#[test]
fn test_synchronous_compose_returns_null_fence() {
    let h = create_harness();
    let (src, dst) = create_scene(&h);
    let fence = h.engine.compose(&[simple_composition(src, dst)], true).unwrap();
    assert_eq!(fence, Fence::NULL);
    assert_eq!(h.device.stats().fences_created, 0);
    h.engine.finish(fence).expect("Finishing the null fence failed");
}

#[test]
fn test_asynchronous_compose_returns_fence() {
    let h = create_harness();
    let (src, dst) = create_scene(&h);
    let fence = h.engine.compose(&[simple_composition(src, dst)], false).unwrap();
    assert!(!fence.is_null());
    assert_eq!(h.device.live_fences(), 1);

    h.engine.finish(fence).unwrap();
    assert_eq!(h.device.live_fences(), 0);
    assert_eq!(h.device.stats().finishes, 0);
}

#[test]
fn test_finish_times_out_on_held_fence() {
    let mut config = EngineConfig::default();
    config.sync.fence_timeout_ms = Some(5);
    let h = create_harness_with(SoftDriver::new(), config);
    let (src, dst) = create_scene(&h);

    let fence = h.engine.compose(&[simple_composition(src, dst)], false).unwrap();
    h.device.hold_fences(true);
    let err = h.engine.finish(fence).unwrap_err();
    assert!(matches!(err, VblitError::FenceWaitFailed(_)), "got {err:?}");
    assert_eq!(h.device.live_fences(), 1, "timed out fence stays alive");

    h.device.hold_fences(false);
    h.engine.finish(fence).unwrap();
    assert_eq!(h.device.live_fences(), 0);
}

#[test]
fn test_failed_wait_is_reported() {
    let h = create_harness();
    let (src, dst) = create_scene(&h);
    let fence = h.engine.compose(&[simple_composition(src, dst)], false).unwrap();
    h.device.fail_next_wait();
    assert!(matches!(h.engine.finish(fence), Err(VblitError::FenceWaitFailed(_))));
}

#[test]
fn test_draw_failure_aborts_batch() {
    let h = create_harness();
    let (src, dst_id) = create_scene(&h);
    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_object(Object::new(src, Region::new(0, 0, 8, 8)))
        .with_object(Object::new(src, Region::new(8, 0, 8, 8)))
        .with_object(Object::new(src, Region::new(16, 0, 8, 8)));

    h.device.inject_draw_failure(1);
    let err = h.engine.compose(&[composition.clone()], false).unwrap_err();
    assert!(
        matches!(err, VblitError::GpuCallFailed { code: gl_error::OUT_OF_MEMORY, .. }),
        "got {err:?}"
    );

    let stats = h.device.stats();
    assert_eq!(stats.draws.len(), 1, "objects after the failing one are not drawn");
    assert_eq!(stats.fences_created, 0);

    // The engine stays usable.
    let fence = h.engine.compose(&[composition], false).unwrap();
    assert!(!fence.is_null());
    h.engine.finish(fence).unwrap();
}

#[test]
fn test_compose_rejects_unknown_surfaces() {
    let h = create_harness();
    let (src, dst) = create_scene(&h);
    let missing = SurfaceId::from_fd(4242);

    let err = h.engine.compose(&[Composition::new(missing)], true).unwrap_err();
    assert!(matches!(err, VblitError::SurfaceNotFound(id) if id == missing.0));

    let composition = Composition::new(dst).with_object(Object::new(missing, Region::sized(8, 8)));
    let err = h.engine.compose(&[composition], true).unwrap_err();
    assert!(matches!(err, VblitError::SurfaceNotFound(_)));

    // An input-only surface is not a destination.
    let err = h.engine.compose(&[simple_composition(src, src)], true).unwrap_err();
    assert!(matches!(err, VblitError::InvalidArgument(_)));
    assert!(h.device.stats().draws.is_empty());
}

#[test]
fn test_in_place_compose_needs_a_readable_destination() {
    // The reshaped view imports, the native RGB888 layout does not.
    let h = create_harness_with(SoftDriver::new().without_fourcc(fourcc::BGR888), EngineConfig::default());
    let src = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let dst = blank_surface(&h.memory, ColorFormat::Rgb888, 10, 10, 30);
    let src_id = register(&h, &src, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);
    assert_eq!(h.engine.import_layout(dst_id).unwrap(), ImportLayout::Reshaped);

    let in_place = Composition::new(dst_id).with_object(Object::new(src_id, Region::sized(10, 10)));
    assert!(matches!(
        h.engine.compose(&[in_place.clone()], true),
        Err(VblitError::InvalidArgument(_))
    ));
    assert!(h.device.stats().draws.is_empty());

    let cleared = in_place.with_background(Color::BLACK);
    h.engine.compose(&[cleared], true).expect("Compose with a background failed");
    assert_eq!(pixel(&h.memory, &dst, 5, 5, 3), vec![255, 0, 0]);
    assert_eq!(pixel(&h.memory, &dst, 9, 9, 3), vec![255, 0, 0]);
}

#[test]
fn test_forced_yuv_target_without_extension_fails() {
    let driver = SoftDriver::new();
    let mut config = EngineConfig::default();
    config.platform.yuv_target = YuvTargetMode::Enabled;

    let context = GraphicsContext::new(&driver, &FixedProbe::new(ALIGNMENT), config).unwrap();
    assert!(context.capabilities().yuv_target);
    let err = Engine::new(context).err().expect("Engine creation should fail");
    assert!(
        matches!(err, VblitError::ShaderCompileFailed { stage: ShaderStage::Fragment, .. }),
        "got {err:?}"
    );

    let device = driver.device();
    assert!(device.is_closed());
    assert_eq!(device.live_programs(), 0);
}

#[test]
fn test_context_closes_with_last_engine() {
    let driver = SoftDriver::new();
    let context = GraphicsContext::new(&driver, &FixedProbe::new(ALIGNMENT), EngineConfig::default()).unwrap();
    let first = Engine::new(context.clone()).unwrap();
    drop(context);
    let device = driver.device();

    let memory = driver.memory();
    let src = solid_surface(&memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    first.register_surface(&src, SurfaceFlags::INPUT).unwrap();
    assert_eq!(device.live_images(), 1);

    drop(first);
    assert!(device.is_closed());
    assert_eq!(device.live_images(), 0);
    assert_eq!(device.live_textures(), 0);
}
