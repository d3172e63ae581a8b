//! Properties of the format translator over the whole code space.

use proptest::prelude::*;
use vblit_core::format::{self, ColorFormat, ColorSpace, PixelType, UBWC_BIT};

fn arb_valid_code() -> impl Strategy<Value = u32> {
    (0..ColorFormat::ALL.len(), 0..4u32, 0..4u32, any::<bool>()).prop_filter_map(
        "format cannot carry that pixel type",
        |(idx, space, pixel, ubwc)| {
            let base = ColorFormat::ALL[idx];
            let mut code = base.code() | (space << 9) | (pixel << 11);
            if ubwc {
                code |= UBWC_BIT;
            }
            format::describe(code).ok().map(|_| code)
        },
    )
}

proptest! {
    #[test]
    fn valid_codes_are_either_rgb_or_yuv(code in arb_valid_code()) {
        prop_assert!(format::is_rgb(code) ^ format::is_yuv(code));
    }

    #[test]
    fn any_code_is_never_both(code in any::<u32>()) {
        prop_assert!(!(format::is_rgb(code) && format::is_yuv(code)));
        if format::describe(code).is_err() {
            prop_assert!(!format::is_rgb(code));
            prop_assert!(!format::is_yuv(code));
            prop_assert!(format::to_native(code).is_err());
        }
    }

    #[test]
    fn translation_is_deterministic(code in any::<u32>()) {
        prop_assert_eq!(format::to_native(code).ok(), format::to_native(code).ok());
        prop_assert_eq!(
            format::to_gpu_internal_format(code),
            format::to_gpu_internal_format(code)
        );
    }

    #[test]
    fn mode_bits_do_not_change_the_family(code in arb_valid_code()) {
        let base = code & format::FORMAT_MASK;
        prop_assert_eq!(format::is_yuv(code), format::is_yuv(base));
    }
}

#[test]
fn every_rgb_format_accepts_signed_pixels() {
    for base in ColorFormat::ALL.iter().filter(|f| !f.is_yuv()) {
        let code = base.code() | PixelType::Signed.bits();
        assert!(format::is_signed(code), "{base:?}");
        assert_eq!(format::bytes_per_channel(code), 1);
    }
}

#[test]
fn colorspace_bits_survive_on_every_yuv_format() {
    for base in ColorFormat::ALL.iter().filter(|f| f.is_yuv()) {
        let code = base.code() | ColorSpace::Bt709.bits();
        assert_eq!(format::color_space(code), ColorSpace::Bt709);
        assert!(format::to_native(code).is_ok());
    }
}
