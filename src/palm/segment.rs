//! Hand segmentation and palm cropping.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::point::Point;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Inverted Otsu binarization: dark pixels (the hand against a bright
/// background) become foreground.
pub fn binarize_inverted(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level {
            Luma([BACKGROUND])
        } else {
            Luma([FOREGROUND])
        }
    })
}

/// Enclosed area of a closed polygon (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut twice_area = 0.0f64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
    }
    twice_area.abs() / 2.0
}

/// Copy of `mask` inside a one pixel background frame
fn pad_with_background(mask: &GrayImage) -> GrayImage {
    let mut padded = GrayImage::from_pixel(mask.width() + 2, mask.height() + 2, Luma([BACKGROUND]));
    imageops::replace(&mut padded, mask, 1, 1);
    padded
}

/// Largest outer border that is not nested inside another contour.
///
/// Regions touching the image edge are traced as if the image continued
/// with background, so a hand entering from any side is found.
pub fn largest_external_contour(mask: &GrayImage) -> Option<Contour<i32>> {
    find_contours::<i32>(&pad_with_background(mask))
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .max_by(|a, b| {
            polygon_area(&a.points)
                .partial_cmp(&polygon_area(&b.points))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|mut contour| {
            for p in contour.points.iter_mut() {
                *p = Point::new(p.x - 1, p.y - 1);
            }
            contour
        })
}

/// Foreground pixel furthest from any background pixel.
///
/// Pixels outside the image count as background. Ties resolve to the first
/// pixel in row-major order. Returns `None` for an empty mask.
pub fn palm_center(mask: &GrayImage) -> Option<(u32, u32)> {
    let (width, height) = mask.dimensions();

    // The transform measures distance to the nearest non-zero pixel, so feed
    // it the background, padded by a one pixel frame.
    let mut background = GrayImage::from_pixel(width + 2, height + 2, Luma([FOREGROUND]));
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] != BACKGROUND {
            background.put_pixel(x + 1, y + 1, Luma([BACKGROUND]));
        }
    }

    let distances = euclidean_squared_distance_transform(&background);

    let mut best: Option<((u32, u32), f64)> = None;
    for y in 0..height {
        for x in 0..width {
            if mask.get_pixel(x, y)[0] == BACKGROUND {
                continue;
            }
            let d = distances.get_pixel(x + 1, y + 1)[0];
            if best.map_or(true, |(_, max)| d > max) {
                best = Some(((x, y), d));
            }
        }
    }

    best.map(|(point, _)| point)
}

/// Square crop of `size` whose centre is at `center` where possible.
///
/// The window is shifted inward at the top/left edges. When it would
/// still run past the right or bottom edge, the whole image is resized to
/// `size × size` instead.
pub fn crop_around(gray: &GrayImage, center: (u32, u32), size: u32) -> GrayImage {
    let half = size / 2;
    let x0 = center.0.saturating_sub(half);
    let y0 = center.1.saturating_sub(half);

    if x0 + size > gray.width() || y0 + size > gray.height() {
        tracing::warn!(
            width = gray.width(),
            height = gray.height(),
            ?center,
            "Could not create a full-sized palm crop, resizing the whole image"
        );
        return imageops::resize(gray, size, size, FilterType::Triangle);
    }

    imageops::crop_imm(gray, x0, y0, size, size).to_image()
}

/// Isolate the palm region of a grayscale hand image.
///
/// Returns `None` when segmentation finds no contour at all.
pub fn find_and_crop_palm(gray: &GrayImage, crop_size: u32) -> Option<GrayImage> {
    let mask = binarize_inverted(gray);

    let hand = largest_external_contour(&mask)?;
    tracing::debug!(
        area = polygon_area(&hand.points),
        points = hand.points.len(),
        "Hand contour selected"
    );

    let center = palm_center(&mask)?;
    tracing::debug!(?center, "Palm centre located");

    Some(crop_around(gray, center, crop_size))
}
