//! Mean structural similarity between two equally sized grayscale images.

use image::GrayImage;

const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// Summed-area table with a zero row and column in front
struct Integral {
    width: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn new(width: u32, height: u32, value: impl Fn(u32, u32) -> f64) -> Self {
        let w = width as usize + 1;
        let h = height as usize + 1;
        let mut sums = vec![0.0; w * h];
        for y in 0..height as usize {
            let mut row = 0.0;
            for x in 0..width as usize {
                row += value(x as u32, y as u32);
                sums[(y + 1) * w + x + 1] = sums[y * w + x + 1] + row;
            }
        }
        Self { width: w, sums }
    }

    /// Sum over the `size × size` window with top-left corner (x, y)
    fn window(&self, x: usize, y: usize, size: usize) -> f64 {
        let w = self.width;
        self.sums[(y + size) * w + x + size] - self.sums[y * w + x + size] - self.sums[(y + size) * w + x]
            + self.sums[y * w + x]
    }
}

/// Mean SSIM over every `win_size × win_size` window that lies fully
/// inside the images, using a uniform window and sample covariance.
///
/// Returns `None` when the images differ in size or are smaller than the
/// window.
pub fn mean_ssim(a: &GrayImage, b: &GrayImage, win_size: u32, data_range: f64) -> Option<f64> {
    if a.dimensions() != b.dimensions() || win_size < 2 {
        return None;
    }
    let (width, height) = a.dimensions();
    if width < win_size || height < win_size {
        return None;
    }

    let pa = |x: u32, y: u32| a.get_pixel(x, y)[0] as f64;
    let pb = |x: u32, y: u32| b.get_pixel(x, y)[0] as f64;

    let sum_a = Integral::new(width, height, pa);
    let sum_b = Integral::new(width, height, pb);
    let sum_aa = Integral::new(width, height, |x, y| pa(x, y) * pa(x, y));
    let sum_bb = Integral::new(width, height, |x, y| pb(x, y) * pb(x, y));
    let sum_ab = Integral::new(width, height, |x, y| pa(x, y) * pb(x, y));

    let size = win_size as usize;
    let n = (size * size) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * data_range).powi(2);
    let c2 = (K2 * data_range).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..=(height - win_size) as usize {
        for x in 0..=(width - win_size) as usize {
            let ux = sum_a.window(x, y, size) / n;
            let uy = sum_b.window(x, y, size) / n;
            let uxx = sum_aa.window(x, y, size) / n;
            let uyy = sum_bb.window(x, y, size) / n;
            let uxy = sum_ab.window(x, y, size) / n;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    Some(total / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn test_identical_images_score_one() {
        let img = gradient(64, 48);
        let s = mean_ssim(&img, &img, 7, 255.0).unwrap();
        assert!((s - 1.0).abs() < 1e-9, "ssim = {s}");
    }

    #[test]
    fn test_blank_images_score_one() {
        let img = GrayImage::from_pixel(32, 32, Luma([0]));
        let s = mean_ssim(&img, &img, 7, 255.0).unwrap();
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_image_scores_low() {
        let img = gradient(64, 64);
        let inverted = GrayImage::from_fn(64, 64, |x, y| Luma([255 - img.get_pixel(x, y)[0]]));
        let s = mean_ssim(&img, &inverted, 7, 255.0).unwrap();
        assert!(s < 0.0, "ssim = {s}");
    }

    #[test]
    fn test_size_mismatch() {
        assert!(mean_ssim(&gradient(10, 10), &gradient(12, 10), 7, 255.0).is_none());
        assert!(mean_ssim(&gradient(5, 5), &gradient(5, 5), 7, 255.0).is_none());
    }
}
