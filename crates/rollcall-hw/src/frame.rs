//! Frame type and pixel-format conversion to RGB.

use image::RgbImage;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength { format: &'static str, expected: usize, actual: usize },
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength { format, expected, actual: buf.len() });
    }
    Ok(())
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// BT.601 full-range YCbCr to RGB.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    [
        clamp_u8(y + 1.402 * cr),
        clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp_u8(y + 1.772 * cb),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("YUYV", yuyv, pixels * 2)?;

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height)))
}

/// Wrap a packed RGB24 buffer.
pub fn rgb24_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let len = (width * height * 3) as usize;
    check_len("RGB3", buf, len)?;
    Ok(RgbImage::from_raw(width, height, buf[..len].to_vec()).unwrap_or_else(|| RgbImage::new(width, height)))
}

/// Replicate an 8-bit grayscale buffer into three channels.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("GREY", gray, pixels)?;
    let rgb = gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect();
    Ok(RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height)))
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return true;
    }
    let dark = image
        .pixels()
        .filter(|p| {
            let [r, g, b] = p.0;
            0.299 * r as f32 + 0.587 * g as f32 + 0.114 * (b as f32) < 32.0
        })
        .count();
    (dark as f32 / total as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([100, 100, 100]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([200, 200, 200]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let rgb = yuyv_to_rgb(&[76, 85, 76, 255], 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 240 && g < 10 && b < 10, "got {:?}", (r, g, b));
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 9], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([9, 9, 9]));
        assert!(grey_to_rgb(&[7], 2, 1).is_err());
    }

    #[test]
    fn test_rgb24_passthrough() {
        let rgb = rgb24_to_rgb(&[1, 2, 3, 4, 5, 6, 99], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([4, 5, 6]));
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&RgbImage::new(10, 10), DARK_FRAME_RATIO));
        assert!(!is_dark_frame(&RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])), DARK_FRAME_RATIO));
        assert!(is_dark_frame(&RgbImage::new(0, 0), DARK_FRAME_RATIO));
    }

    #[test]
    fn test_dark_frame_borderline() {
        // 94% dark, 6% bright → not dark
        let mut image = RgbImage::new(100, 1);
        for x in 94..100 {
            image.put_pixel(x, 0, Rgb([200, 200, 200]));
        }
        assert!(!is_dark_frame(&image, DARK_FRAME_RATIO));
    }
}
