mod common;

use common::*;
use vblit_core::format::ColorFormat;
use vblit_core::{
    Color, Composition, EngineConfig, Fence, FlipMask, GpuInternalFormat, Normalize, Object, Region,
    PixelType, SurfaceFlags, SurfaceId,
};
use vblit_render::{ImportLayout, RenderPath, ShaderKind, SoftDriver};

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const QUADRANTS: [[u8; 4]; 4] = [RED, GREEN, BLUE, WHITE];

#[test]
fn test_compose_rgba_occlusion() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 64, 64, 256, &RED);
    let green = solid_surface(&h.memory, ColorFormat::Rgba8888, 32, 32, 128, &GREEN);
    let dst = blank_surface(&h.memory, ColorFormat::Rgba8888, 128, 128, 512);

    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let green_id = register(&h, &green, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLUE)
        .with_object(Object::new(red_id, Region::new(32, 32, 64, 64)))
        .with_object(Object::new(green_id, Region::new(48, 48, 32, 32)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::DirectRgb
    );

    let fence = h.engine.compose(&[composition], true).expect("Compose failed");
    assert!(fence.is_null());

    assert_eq!(pixel(&h.memory, &dst, 0, 0, 4), vec![0, 0, 255, 255], "background");
    assert_eq!(pixel(&h.memory, &dst, 127, 127, 4), vec![0, 0, 255, 255], "background");
    assert_eq!(pixel(&h.memory, &dst, 40, 40, 4), RED.to_vec(), "first object");
    assert_eq!(pixel(&h.memory, &dst, 95, 95, 4), RED.to_vec(), "first object");
    assert_eq!(pixel(&h.memory, &dst, 60, 60, 4), GREEN.to_vec(), "second object on top");
    assert_eq!(pixel(&h.memory, &dst, 96, 96, 4), vec![0, 0, 255, 255], "outside both");

    let stats = h.device.stats();
    assert_eq!(stats.draws, vec![ShaderKind::Rgb, ShaderKind::Rgb]);
    assert_eq!(stats.dispatches, 0);
    assert_eq!(stats.finishes, 1);
    assert!(h.engine.stage_textures().is_empty());
}

#[test]
fn test_compose_global_alpha_blends_over_background() {
    let h = create_harness();
    let green = solid_surface(&h.memory, ColorFormat::Rgba8888, 16, 16, 128, &GREEN);
    let dst = blank_surface(&h.memory, ColorFormat::Rgba8888, 16, 16, 128);
    let green_id = register(&h, &green, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::RED)
        .with_object(Object::new(green_id, Region::sized(16, 16)).with_alpha(128));
    h.engine.compose(&[composition], true).unwrap();

    let out = pixel(&h.memory, &dst, 8, 8, 4);
    assert_near(out[0], 127, "red");
    assert_near(out[1], 128, "green");
    assert_eq!(out[2], 0, "blue");
    assert_near(out[3], 191, "alpha");
}

#[test]
fn test_compose_swapped_destination_stores_bgra() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let dst = blank_surface(&h.memory, ColorFormat::Bgra8888, 8, 8, 128);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::GREEN)
        .with_object(Object::new(red_id, Region::new(0, 0, 4, 8)));
    h.engine.compose(&[composition], true).unwrap();

    assert_eq!(pixel(&h.memory, &dst, 1, 1, 4), vec![0, 0, 255, 255]);
    assert_eq!(pixel(&h.memory, &dst, 6, 1, 4), vec![0, 255, 0, 255]);
}

#[test]
fn test_compose_unaligned_rgb888_repacks_through_stage() {
    let h = create_harness();
    let color = [10u8, 200, 30, 255];
    let src = solid_surface(&h.memory, ColorFormat::Rgba8888, 100, 50, 512, &color);
    // 300 byte rows are not a multiple of the platform alignment.
    let dst = blank_surface(&h.memory, ColorFormat::Rgb888, 100, 50, 300);
    let src_id = register(&h, &src, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);
    assert_eq!(h.engine.import_layout(dst_id).unwrap(), ImportLayout::Reshaped);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_object(Object::new(src_id, Region::sized(100, 50)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::Staged {
            width: 100,
            height: 50,
            format: GpuInternalFormat::Rgba8,
        }
    );
    h.engine.compose(&[composition], true).unwrap();

    let stages = h.engine.stage_textures();
    assert_eq!(stages.len(), 1);
    let texels = h
        .device
        .storage_texels(stages[0].texture)
        .expect("Stage texture has no storage");

    // Reference repack: dense RGB triplets of the stage pixels.
    let expected: Vec<u8> = texels
        .chunks(4)
        .flat_map(|p| p[..3].iter().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect();
    let written = h.memory.read(dst.fd()).unwrap();
    assert_eq!(written.len(), expected.len());
    assert_eq!(written, expected);
    assert_eq!(&written[..3], &color[..3]);
    assert_eq!(&written[written.len() - 3..], &color[..3]);

    let stats = h.device.stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.draws, vec![ShaderKind::Rgb]);
}

#[test]
fn test_compose_in_place_keeps_destination_contents() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let dst = solid_surface(&h.memory, ColorFormat::Rgb888, 100, 20, 300, &[0, 0, 255]);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id).with_object(Object::new(red_id, Region::sized(50, 20)));
    h.engine.compose(&[composition], true).unwrap();

    assert_eq!(pixel(&h.memory, &dst, 10, 10, 3), vec![255, 0, 0]);
    assert_eq!(pixel(&h.memory, &dst, 90, 10, 3), vec![0, 0, 255]);
    assert_eq!(h.device.stats().draws, vec![ShaderKind::Rgb, ShaderKind::Rgb]);
}

#[test]
fn test_compose_nv12_without_yuv_target_uses_plane_passes() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 32, 32, 128, &RED);
    let dst = blank_nv12(&h.memory, 64, 32);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);
    assert_eq!(h.engine.import_layout(dst_id).unwrap(), ImportLayout::Split);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_object(Object::new(red_id, Region::new(0, 0, 32, 32)))
        .with_object(Object::new(red_id, Region::new(32, 0, 32, 32)).with_alpha(128));
    assert!(h.engine.decide_renderability(&composition).unwrap().is_staged());
    h.engine.compose(&[composition], true).unwrap();

    let stats = h.device.stats();
    assert_eq!(
        stats.draws,
        vec![ShaderKind::Rgb, ShaderKind::Rgb, ShaderKind::Luma, ShaderKind::Chroma]
    );
    assert!(!stats.draws.contains(&ShaderKind::Yuv));

    let bytes = h.memory.read(dst.fd()).unwrap();
    let luma = |x: usize, y: usize| bytes[y * 64 + x];
    let chroma = |cx: usize, cy: usize| {
        let at = 64 * 32 + cy * 64 + cx * 2;
        (bytes[at], bytes[at + 1])
    };

    assert_near(luma(5, 5), 76, "opaque luma");
    assert_near(luma(40, 5), 38, "blended luma");
    let (u, v) = chroma(2, 2);
    assert_near(u, 84, "opaque u");
    assert_near(v, 255, "opaque v");
    let (u, v) = chroma(20, 2);
    assert_near(u, 106, "blended u");
    assert_near(v, 192, "blended v");
}

#[test]
fn test_compose_nv12_with_yuv_target_draws_directly() {
    let h = create_harness_with(SoftDriver::new().with_yuv_target(), EngineConfig::default());
    let red = solid_surface(&h.memory, ColorFormat::Rgb888, 16, 16, 48, &[255, 0, 0]);
    let dst = blank_nv12(&h.memory, 16, 16);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);
    assert_eq!(h.engine.import_layout(dst_id).unwrap(), ImportLayout::Native);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_object(Object::new(red_id, Region::sized(16, 16)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::DirectYuv
    );
    h.engine.compose(&[composition], true).unwrap();

    assert_eq!(h.device.stats().draws, vec![ShaderKind::Yuv]);
    assert!(h.engine.stage_textures().is_empty());
    let bytes = h.memory.read(dst.fd()).unwrap();
    assert_near(bytes[3 * 16 + 3], 76, "luma");
    assert_near(bytes[256], 84, "u");
    assert_near(bytes[257], 255, "v");
}

#[test]
fn test_stage_cache_is_keyed_by_size() {
    let h = create_harness();
    let src = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let a = blank_surface(&h.memory, ColorFormat::Rgb888, 10, 10, 30);
    let b = blank_surface(&h.memory, ColorFormat::Rgb888, 10, 10, 30);
    let c = blank_surface(&h.memory, ColorFormat::Rgb888, 20, 10, 60);
    let src_id = register(&h, &src, SurfaceFlags::INPUT);

    let compose_into = |dst_id| {
        let composition = Composition::new(dst_id)
            .with_background(Color::BLACK)
            .with_object(Object::new(src_id, Region::sized(10, 10)));
        h.engine.compose(&[composition], true).unwrap();
    };

    compose_into(register(&h, &a, SurfaceFlags::OUTPUT));
    compose_into(register(&h, &b, SurfaceFlags::OUTPUT));
    assert_eq!(h.engine.stage_textures().len(), 1);
    assert_eq!(h.device.stats().storage_allocations, 1);

    compose_into(register(&h, &c, SurfaceFlags::OUTPUT));
    let stages = h.engine.stage_textures();
    assert_eq!(stages.len(), 2);
    assert!(stages.iter().any(|s| s.width == 20 && s.height == 10));
}

#[test]
fn test_compose_batch_in_order() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let green = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &GREEN);
    let dst = blank_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let green_id = register(&h, &green, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let batch = [
        Composition::new(dst_id)
            .with_background(Color::BLACK)
            .with_object(Object::new(red_id, Region::sized(8, 8))),
        Composition::new(dst_id).with_object(Object::new(green_id, Region::sized(4, 8))),
    ];
    h.engine.compose(&batch, true).unwrap();

    assert_eq!(pixel(&h.memory, &dst, 1, 1, 4), GREEN.to_vec());
    assert_eq!(pixel(&h.memory, &dst, 6, 1, 4), RED.to_vec());
    assert_eq!(h.device.stats().finishes, 1);
}

#[test]
fn test_empty_batch_is_a_no_op() {
    let h = create_harness();
    assert_eq!(h.engine.compose(&[], true).unwrap(), Fence::NULL);
    assert!(h.device.stats().draws.is_empty());
}

/// Compose one object showing the 2x2 quadrant source over a 128x128
/// RGBA destination and return the colors at the quadrant centres.
fn compose_quadrants(object: impl FnOnce(SurfaceId) -> Object) -> [Vec<u8>; 4] {
    let h = create_harness();
    let src = quadrant_surface(&h.memory, QUADRANTS);
    let dst = blank_surface(&h.memory, ColorFormat::Rgba8888, 128, 128, 512);
    let src_id = register(&h, &src, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_object(object(src_id));
    h.engine.compose(&[composition], true).expect("Compose failed");

    [(32, 32), (96, 32), (32, 96), (96, 96)].map(|(x, y)| pixel(&h.memory, &dst, x, y, 4))
}

fn quadrants(colors: [[u8; 4]; 4]) -> [Vec<u8>; 4] {
    colors.map(|c| c.to_vec())
}

#[test]
fn test_compose_scales_source_quadrants() {
    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)));
    assert_eq!(out, quadrants(QUADRANTS));
}

#[test]
fn test_compose_flips() {
    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)).with_mask(FlipMask::HFLIP));
    assert_eq!(out, quadrants([GREEN, RED, WHITE, BLUE]), "horizontal flip");

    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)).with_mask(FlipMask::VFLIP));
    assert_eq!(out, quadrants([BLUE, WHITE, RED, GREEN]), "vertical flip");

    let out = compose_quadrants(|id| {
        Object::new(id, Region::sized(128, 128)).with_mask(FlipMask::HFLIP | FlipMask::VFLIP)
    });
    assert_eq!(out, quadrants([WHITE, BLUE, GREEN, RED]), "both flips");
}

#[test]
fn test_compose_rotates_clockwise() {
    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)).with_rotation(90.0));
    assert_eq!(out, quadrants([BLUE, RED, WHITE, GREEN]), "quarter turn");

    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)).with_rotation(180.0));
    assert_eq!(out, quadrants([WHITE, BLUE, GREEN, RED]), "half turn");

    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)).with_rotation(270.0));
    assert_eq!(out, quadrants([GREEN, WHITE, RED, BLUE]), "three quarter turn");
}

#[test]
fn test_compose_crops_source() {
    // Bottom row only, stretched over the whole destination.
    let out = compose_quadrants(|id| Object::new(id, Region::sized(128, 128)).with_source(Region::new(0, 1, 2, 1)));
    assert_eq!(out, quadrants([BLUE, WHITE, BLUE, WHITE]));

    // One source pixel into the top left quadrant only.
    let out = compose_quadrants(|id| Object::new(id, Region::sized(64, 64)).with_source(Region::new(1, 0, 1, 1)));
    let black = [0, 0, 0, 255];
    assert_eq!(out, quadrants([GREEN, black, black, black]));
}

#[test]
fn test_compose_applies_normalization() {
    let h = create_harness();
    let src = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &[200, 100, 50, 255]);
    let dst = blank_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128);
    let src_id = register(&h, &src, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_normalization(vec![
            Normalize::new(0.5, 0.0),
            Normalize::new(1.0, 0.0),
            Normalize::new(1.0, 50.0),
        ])
        .with_object(Object::new(src_id, Region::sized(8, 8)));
    h.engine.compose(&[composition], true).unwrap();

    let out = pixel(&h.memory, &dst, 4, 4, 4);
    assert_near(out[0], 100, "scaled red");
    assert_eq!(out[1], 100, "green");
    assert_eq!(out[2], 0, "offset blue");
    assert_eq!(out[3], 255, "alpha");
}

fn halves(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(2)
        .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect()
}

#[test]
fn test_compose_float16_destination_keeps_range() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let code = ColorFormat::Rgba8888.code() | PixelType::Float16.bits();
    let dst = blank_surface_with_code(&h.memory, code, 16, 4, 128);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_normalization(vec![Normalize::new(2.0, 0.0), Normalize::new(1.0, 255.0)])
        .with_object(Object::new(red_id, Region::sized(8, 4)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::DirectRgb
    );
    h.engine.compose(&[composition], true).unwrap();

    assert_eq!(halves(&pixel(&h.memory, &dst, 3, 2, 8)), vec![2.0, -1.0, 0.0, 1.0]);
    assert_eq!(halves(&pixel(&h.memory, &dst, 12, 2, 8)), vec![0.0, 0.0, 0.0, 1.0]);
    assert_eq!(h.device.stats().dispatches, 0);
}

#[test]
fn test_compose_float16_rgb_repacks_halves() {
    let h = create_harness();
    let red = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &RED);
    let code = ColorFormat::Rgb888.code() | PixelType::Float16.bits();
    // 3-channel float layouts are never render targets.
    let dst = blank_surface_with_code(&h.memory, code, 16, 2, 96);
    let red_id = register(&h, &red, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);
    assert_eq!(h.engine.import_layout(dst_id).unwrap(), ImportLayout::Reshaped);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_normalization(vec![Normalize::new(2.0, 0.0)])
        .with_object(Object::new(red_id, Region::sized(16, 2)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::Staged {
            width: 16,
            height: 2,
            format: GpuInternalFormat::Rgba16F,
        }
    );
    h.engine.compose(&[composition], true).unwrap();

    let values = halves(&h.memory.read(dst.fd()).unwrap());
    assert_eq!(values.len(), 16 * 2 * 3);
    for rgb in values.chunks(3) {
        assert_eq!(rgb, [2.0, 0.0, 0.0]);
    }
    assert_eq!(h.device.stats().dispatches, 1);
}

#[test]
fn test_compose_float32_rgb_repacks_floats() {
    let h = create_harness();
    let green = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &GREEN);
    let code = ColorFormat::Rgb888.code() | PixelType::Float32.bits();
    let dst = blank_surface_with_code(&h.memory, code, 4, 2, 48);
    let green_id = register(&h, &green, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);

    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_normalization(vec![
            Normalize::new(1.0, 0.0),
            Normalize::new(0.25, 0.0),
            Normalize::new(1.0, 255.0),
        ])
        .with_object(Object::new(green_id, Region::sized(4, 2)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::Staged {
            width: 4,
            height: 2,
            format: GpuInternalFormat::Rgba32F,
        }
    );
    h.engine.compose(&[composition], true).unwrap();

    let bytes = h.memory.read(dst.fd()).unwrap();
    let values: Vec<f32> = bytes
        .chunks(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(values.len(), 4 * 2 * 3);
    for rgb in values.chunks(3) {
        assert_eq!(rgb, [0.0, 0.25, -1.0]);
    }
}

#[test]
fn test_compose_signed_rgb_maps_offset_range() {
    let h = create_harness();
    let src = solid_surface(&h.memory, ColorFormat::Rgba8888, 8, 8, 128, &[255, 128, 0, 255]);
    let code = ColorFormat::Rgb888.code() | PixelType::Signed.bits();
    let dst = blank_surface_with_code(&h.memory, code, 10, 2, 30);
    let src_id = register(&h, &src, SurfaceFlags::INPUT);
    let dst_id = register(&h, &dst, SurfaceFlags::OUTPUT);
    assert_eq!(h.engine.import_layout(dst_id).unwrap(), ImportLayout::Reshaped);

    // Signed outputs double the scale: 128 becomes zero, alpha stays 1.
    let composition = Composition::new(dst_id)
        .with_background(Color::BLACK)
        .with_normalization(vec![
            Normalize::new(1.0, 128.0),
            Normalize::new(1.0, 128.0),
            Normalize::new(1.0, 128.0),
            Normalize::new(0.5, 0.0),
        ])
        .with_object(Object::new(src_id, Region::sized(10, 2)));
    assert_eq!(
        h.engine.decide_renderability(&composition).unwrap(),
        RenderPath::Staged {
            width: 10,
            height: 2,
            format: GpuInternalFormat::Rgba8Snorm,
        }
    );
    h.engine.compose(&[composition], true).unwrap();

    let bytes = h.memory.read(dst.fd()).unwrap();
    assert_eq!(bytes.len(), 10 * 2 * 3);
    for rgb in bytes.chunks(3) {
        let signed: Vec<i8> = rgb.iter().map(|b| *b as i8).collect();
        assert_eq!(signed, vec![127, 0, -127]);
    }
    assert_eq!(h.device.stats().dispatches, 1);
}
