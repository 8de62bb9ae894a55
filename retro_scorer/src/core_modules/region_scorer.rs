// THEORY:
// The `RegionScorer` turns the pixels of a selected sign into a single number:
// the mean grayscale intensity of the sign, with the surrounding background
// masked out. It is the only place in the system that decides what "bright"
// means, so it is kept as a pure function of the pixel data.
//
// Algorithm:
// 1.  **Grayscale**: The colour region is reduced to luma.
// 2.  **Low-pass**: A wide, tall Gaussian blur removes texture (sign legend,
//     sensor noise) and leaves the brightness plateau of the sign face.
// 3.  **Otsu**: The blurred histogram picks its own threshold, so the mask
//     adapts to day, dusk and headlight footage without a fixed constant.
// 4.  **Masked mean**: The mean is taken over the *unblurred* grayscale under
//     the foreground mask and truncated to an integer. An empty mask scores 0.
//
// The outline image (mask boundary painted yellow over the region) is operator
// feedback only. It never feeds back into the score.

use crate::config::ScorerConfig;
use image::{GrayImage, Luma, Rgb, RgbImage, imageops};
use imageproc::{contrast, edges, filter};

const FOREGROUND: u8 = u8::MAX;
const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// A relative retroreflectivity score in [0, 255].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Score(pub u8);

impl Score {
    pub fn value(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    #[error("cannot score an empty region ({width} x {height})")]
    EmptyRegion { width: u32, height: u32 },
}

/// The full result of scoring one region.
#[derive(Debug, Clone)]
pub struct RegionScore {
    pub score: Score,
    /// The Otsu level chosen on the blurred region.
    pub threshold: u8,
    /// Number of pixels in the foreground mask.
    pub foreground_pixels: usize,
    /// The region with the mask boundary painted in yellow.
    pub outline: RgbImage,
}

/// Scores region images. Built once from configuration and reused for every
/// region of a selection.
#[derive(Debug, Clone)]
pub struct RegionScorer {
    horizontal_kernel: Vec<f32>,
    vertical_kernel: Vec<f32>,
    edge_low_threshold: f32,
    edge_high_threshold: f32,
}

impl RegionScorer {
    pub fn new(config: &ScorerConfig) -> Self {
        Self {
            horizontal_kernel: gaussian_kernel(config.blur_kernel_width),
            vertical_kernel: gaussian_kernel(config.blur_kernel_height),
            edge_low_threshold: config.edge_low_threshold,
            edge_high_threshold: config.edge_high_threshold,
        }
    }

    /// Scores a region image.
    pub fn score(&self, region: &RgbImage) -> Result<Score, ScoreError> {
        ensure_not_empty(region)?;
        let gray = imageops::grayscale(region);
        let (mask, _) = self.foreground_mask(&gray);
        Ok(masked_mean(&gray, &mask))
    }

    /// Scores a region image and also renders the outline for display.
    pub fn score_with_outline(&self, region: &RgbImage) -> Result<RegionScore, ScoreError> {
        ensure_not_empty(region)?;
        let gray = imageops::grayscale(region);
        let (mask, threshold) = self.foreground_mask(&gray);
        let foreground_pixels = mask.pixels().filter(|p| p.0[0] == FOREGROUND).count();

        Ok(RegionScore {
            score: masked_mean(&gray, &mask),
            threshold,
            foreground_pixels,
            outline: self.outline(region, &mask),
        })
    }

    /// Blurs `gray` and segments it with Otsu's method. Returns the binary mask
    /// (foreground = 255) and the level used.
    pub fn foreground_mask(&self, gray: &GrayImage) -> (GrayImage, u8) {
        let blurred = self.blur(gray);
        let level = contrast::otsu_level(&blurred);
        let mask = GrayImage::from_fn(blurred.width(), blurred.height(), |x, y| {
            if blurred.get_pixel(x, y).0[0] > level {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });
        (mask, level)
    }

    /// Gaussian low-pass with mirrored borders (`gfedcb|abcdefgh|gfedcba`). Sign
    /// patches are often shorter than the vertical kernel, so the border rule
    /// decides most of the blur.
    fn blur(&self, gray: &GrayImage) -> GrayImage {
        let pad_x = (self.horizontal_kernel.len() / 2) as u32;
        let pad_y = (self.vertical_kernel.len() / 2) as u32;
        let padded = pad_reflect_101(gray, pad_x, pad_y);
        let blurred: GrayImage =
            filter::separable_filter(&padded, &self.horizontal_kernel, &self.vertical_kernel);
        imageops::crop_imm(&blurred, pad_x, pad_y, gray.width(), gray.height()).to_image()
    }

    fn outline(&self, region: &RgbImage, mask: &GrayImage) -> RgbImage {
        let boundary = edges::canny(mask, self.edge_low_threshold, self.edge_high_threshold);
        let mut marked = region.clone();
        for (x, y, edge) in boundary.enumerate_pixels() {
            if edge.0[0] != 0 {
                marked.put_pixel(x, y, OUTLINE_COLOR);
            }
        }
        marked
    }
}

fn ensure_not_empty(region: &RgbImage) -> Result<(), ScoreError> {
    let (width, height) = region.dimensions();
    if width == 0 || height == 0 {
        return Err(ScoreError::EmptyRegion { width, height });
    }
    Ok(())
}

/// Normalised 1D Gaussian of `size` taps. Sigma follows the usual rule for a
/// kernel given only by its size: `0.3 * ((size - 1) / 2 - 1) + 0.8`.
fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1);
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size as f32 - 1.0) * 0.5;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Surrounds `image` with `pad_x` columns and `pad_y` rows mirrored about the
/// edge pixel, which is not repeated. Pads wider than the image keep bouncing
/// between its edges.
fn pad_reflect_101(image: &GrayImage, pad_x: u32, pad_y: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width + 2 * pad_x, height + 2 * pad_y, |x, y| {
        let source_x = reflect_101(x as i64 - pad_x as i64, width);
        let source_y = reflect_101(y as i64 - pad_y as i64, height);
        *image.get_pixel(source_x, source_y)
    })
}

/// Maps any index onto `0..len` by reflecting about the end pixels.
fn reflect_101(index: i64, len: u32) -> u32 {
    if len <= 1 {
        return 0;
    }
    let period = 2 * (len as i64 - 1);
    let folded = index.rem_euclid(period);
    if folded < len as i64 {
        folded as u32
    } else {
        (period - folded) as u32
    }
}

/// Mean of `gray` under `mask`, truncated. Empty masks score 0.
fn masked_mean(gray: &GrayImage, mask: &GrayImage) -> Score {
    let (sum, count) = gray
        .pixels()
        .zip(mask.pixels())
        .filter(|(_, m)| m.0[0] == FOREGROUND)
        .fold((0u64, 0u64), |(sum, count), (g, _)| (sum + g.0[0] as u64, count + 1));

    if count == 0 {
        return Score(0);
    }
    Score((sum / count) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region::region::Region;

    fn default_scorer() -> RegionScorer {
        RegionScorer::new(&ScorerConfig::default())
    }

    /// 100x100 dark frame with a 20x20 white square at (40, 40).
    fn sign_frame() -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if (40..60).contains(&x) && (40..60).contains(&y) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn exact_sign_region_scores_near_white() {
        let patch = Region::new(40, 40, 20, 20).crop(&sign_frame());
        let score = default_scorer().score(&patch).unwrap();
        assert!(score.value() >= 250, "score was {score}");
    }

    #[test]
    fn background_region_scores_near_black() {
        let patch = Region::new(0, 0, 20, 20).crop(&sign_frame());
        let score = default_scorer().score(&patch).unwrap();
        assert!(score.value() <= 5, "score was {score}");
    }

    #[test]
    fn otsu_mask_isolates_the_sign_from_its_surroundings() {
        let config = ScorerConfig {
            blur_kernel_width: 3,
            blur_kernel_height: 3,
            ..ScorerConfig::default()
        };
        let scorer = RegionScorer::new(&config);
        let patch = Region::new(30, 30, 40, 40).crop(&sign_frame());

        let result = scorer.score_with_outline(&patch).unwrap();
        // Plain mean over the region would be 255 * 400 / 1600 = 63.
        assert!(result.score.value() > 200, "score was {}", result.score);
        assert!(result.foreground_pixels > 0 && result.foreground_pixels < 1600);
    }

    #[test]
    fn empty_region_is_rejected_before_scoring() {
        let scorer = default_scorer();
        assert_eq!(
            scorer.score(&RgbImage::new(0, 12)),
            Err(ScoreError::EmptyRegion { width: 0, height: 12 })
        );
        assert!(scorer.score_with_outline(&RgbImage::new(7, 0)).is_err());
    }

    #[test]
    fn scoring_is_a_pure_function_of_the_pixels() {
        let gradient = RgbImage::from_fn(37, 23, |x, y| {
            let v = ((x * 7 + y * 3) % 256) as u8;
            Rgb([v, v / 2, 255 - v])
        });
        let scorer = default_scorer();
        let first = scorer.score(&gradient).unwrap();
        let second = scorer.score(&gradient).unwrap();
        assert_eq!(first, second);
        assert_eq!(scorer.score_with_outline(&gradient).unwrap().score, first);
    }

    #[test]
    fn scores_never_exceed_the_brightest_pixel() {
        let scorer = default_scorer();
        for (w, h) in [(1, 1), (2, 9), (30, 5), (64, 64)] {
            let image = RgbImage::from_fn(w, h, |x, y| {
                let v = ((x * 31 + y * 17) % 256) as u8;
                Rgb([v, 255 - v, v])
            });
            let brightest = imageops::grayscale(&image)
                .pixels()
                .map(|p| p.0[0])
                .max()
                .unwrap_or(0);
            let score = scorer.score(&image).unwrap();
            assert!(score.value() <= brightest, "{w}x{h} scored {score}");
        }
    }

    #[test]
    fn outline_marks_the_mask_boundary_in_yellow() {
        let config = ScorerConfig {
            blur_kernel_width: 3,
            blur_kernel_height: 3,
            ..ScorerConfig::default()
        };
        let patch = Region::new(30, 30, 40, 40).crop(&sign_frame());
        let result = RegionScorer::new(&config).score_with_outline(&patch).unwrap();

        assert!(result.outline.pixels().any(|p| *p == OUTLINE_COLOR));
        assert_eq!(result.outline.dimensions(), patch.dimensions());
    }

    #[test]
    fn uniform_regions_use_a_zero_level() {
        assert_eq!(contrast::otsu_level(&GrayImage::from_pixel(5, 5, Luma([180]))), 0);
        let bright = GrayImage::from_pixel(5, 5, Luma([180]));
        let (mask, level) = default_scorer().foreground_mask(&bright);
        assert_eq!(level, 0);
        assert_eq!(masked_mean(&bright, &mask), Score(180));
        let dark = GrayImage::from_pixel(5, 5, Luma([0]));
        let (mask, level) = default_scorer().foreground_mask(&dark);
        assert_eq!(level, 0);
        assert_eq!(masked_mean(&dark, &mask), Score(0));
    }

    #[test]
    fn reflection_skips_the_edge_pixel() {
        let indices: Vec<u32> = (-4..8).map(|i| reflect_101(i, 4)).collect();
        assert_eq!(indices, vec![2, 3, 2, 1, 0, 1, 2, 3, 2, 1, 0, 1]);
        assert_eq!(reflect_101(-7, 1), 0);
    }

    #[test]
    fn padding_mirrors_a_short_patch() {
        // One bright row over two dark ones, padded far beyond its height.
        let patch = GrayImage::from_fn(2, 3, |_, y| Luma([if y == 0 { 200 } else { 0 }]));
        let padded = pad_reflect_101(&patch, 1, 5);

        assert_eq!(padded.dimensions(), (4, 13));
        let column: Vec<u8> = (0..13).map(|y| padded.get_pixel(0, y).0[0]).collect();
        assert_eq!(column, vec![0, 0, 200, 0, 0, 0, 200, 0, 0, 0, 200, 0, 0]);
    }

    #[test]
    fn blur_of_a_short_patch_does_not_smear_its_top_row() {
        // With repeated edges the tall kernel would see mostly the bright top
        // row; mirrored edges keep the bright share near one row in four.
        let patch = GrayImage::from_fn(9, 3, |_, y| Luma([if y == 0 { 200 } else { 0 }]));
        let blurred = default_scorer().blur(&patch);

        assert_eq!(blurred.dimensions(), patch.dimensions());
        let top = blurred.get_pixel(4, 0).0[0];
        assert!((40..=70).contains(&top), "top row blurred to {top}");
    }

    #[test]
    fn gaussian_kernel_is_normalised_and_symmetric() {
        for size in [1, 3, 25, 75] {
            let kernel = gaussian_kernel(size);
            assert_eq!(kernel.len(), size as usize);
            let total: f32 = kernel.iter().sum();
            assert!((total - 1.0).abs() < 1e-4);
            assert!((kernel[0] - kernel[kernel.len() - 1]).abs() < 1e-6);
        }
    }
}
