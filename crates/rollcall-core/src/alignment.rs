//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout
//! and warps the face into a 112×112 RGB crop.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform taking `src` onto `dst`.
///
/// Returns `[a, b, tx, ty]` for the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 4] {
    // Closed form: centre both point sets, then a/b come from the
    // cross-covariance over the source variance.
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (smx, smy) = mean(src);
    let (dmx, dmy) = mean(dst);

    let mut var = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (sx, sy, dx, dy) = (sx - smx, sy - smy, dx - dmx, dy - dmy);
        var += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }

    if var < 1e-12 {
        return [1.0, 0.0, dmx - smx, dmy - smy];
    }
    let a = dot / var;
    let b = cross / var;
    let tx = dmx - (a * smx - b * smy);
    let ty = dmy - (b * smx + a * smy);
    [a, b, tx, ty]
}

/// Align a detected face to a canonical 112×112 crop.
///
/// Pixels that fall outside the source frame come out black.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let [a, b, tx, ty] = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);

    match Projection::from_matrix([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0]) {
        Some(projection) => warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned),
        None => tracing::debug!("degenerate landmark layout, aligned crop left black"),
    }
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let [a, b, tx, ty] = estimate_similarity(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((a - 1.0).abs() < 1e-4, "a = {a}");
        assert!(b.abs() < 1e-4, "b = {b}");
        assert!(tx.abs() < 1e-3, "tx = {tx}");
        assert!(ty.abs() < 1e-3, "ty = {ty}");
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let [a, b, _, _] = estimate_similarity(&src, &REFERENCE_LANDMARKS_112);
        assert!((a - 0.5).abs() < 1e-3, "a = {a}, expected 0.5");
        assert!(b.abs() < 1e-3);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        let centre = aligned.get_pixel(56, 56);
        assert!(centre.0.iter().all(|&c| (127..=128).contains(&c)), "centre = {centre:?}");
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut frame = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        // Bright 5x5 patch on the left eye, red channel only
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&frame, &src);
        let (rx, ry) = (REFERENCE_LANDMARKS_112[0].0.round() as u32, REFERENCE_LANDMARKS_112[0].1.round() as u32);
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "expected red patch near ({rx}, {ry}), max={brightest}");
    }
}
