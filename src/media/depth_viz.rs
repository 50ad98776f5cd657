// SPDX-License-Identifier: GPL-3.0-only

//! Depth visualization helpers
//!
//! Depth in millimeters is scaled to 8 bits (255 over the display range,
//! saturating) and colored with the JET colormap: dark blue for near,
//! dark red at and beyond the range.

use crate::constants::depth_display::RANGE_MM;

/// Scale a depth value to 0..=255, rounding and saturating
#[inline]
pub fn depth_to_u8(depth_mm: u16, range_mm: f32) -> u8 {
    ((depth_mm as f32) * 255.0 / range_mm).round().clamp(0.0, 255.0) as u8
}

/// JET colormap lookup for an 8-bit value, as RGB
#[inline]
pub fn jet(value: u8) -> [u8; 3] {
    let t = value as f32 / 255.0;
    let channel = |center: f32| ((1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Convert depth values (mm) to packed RGB using the default display range
pub fn depth_to_rgb(depth_mm: &[u16]) -> Vec<u8> {
    depth_to_rgb_with_range(depth_mm, RANGE_MM)
}

/// Convert depth values (mm) to packed RGB, `range_mm` mapping to 255
pub fn depth_to_rgb_with_range(depth_mm: &[u16], range_mm: f32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(depth_mm.len() * 3);
    for &depth in depth_mm {
        rgb.extend_from_slice(&jet(depth_to_u8(depth, range_mm)));
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_scaling() {
        assert_eq!(depth_to_u8(0, RANGE_MM), 0);
        assert_eq!(depth_to_u8(10_000, RANGE_MM), 255);
        assert_eq!(depth_to_u8(5_000, RANGE_MM), 128);
        // Beyond range saturates
        assert_eq!(depth_to_u8(u16::MAX, RANGE_MM), 255);
    }

    #[test]
    fn test_jet_endpoints() {
        // Near is dark blue, far is dark red
        assert_eq!(jet(0), [0, 0, 128]);
        assert_eq!(jet(255), [128, 0, 0]);
        // Middle is green dominant
        let mid = jet(128);
        assert!(mid[1] > 240);
    }

    #[test]
    fn test_depth_to_rgb_len() {
        let rgb = depth_to_rgb(&[0, 2_500, 5_000, 10_000]);
        assert_eq!(rgb.len(), 12);
        assert_eq!(&rgb[..3], &[0, 0, 128]);
        assert_eq!(&rgb[9..], &[128, 0, 0]);
    }
}
