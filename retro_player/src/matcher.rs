use crate::capture::gray_to_mat;
use image::GrayImage;
use opencv::{
    core::{self, Mat, Point},
    imgproc,
};
use retro_scorer::core_modules::tracker::{self, Extremes};
use retro_scorer::{MatchLocation, MatchMethod, TemplateMatcher, TrackError};

/// Template matching through OpenCV's `matchTemplate` and `minMaxLoc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvMatcher;

impl OpenCvMatcher {
    fn response(frame: &GrayImage, patch: &GrayImage, method: MatchMethod) -> opencv::Result<Mat> {
        let frame = gray_to_mat(frame)?;
        let patch = gray_to_mat(patch)?;
        let mut response = Mat::default();
        imgproc::match_template(
            &frame,
            &patch,
            &mut response,
            cv_method(method),
            &core::no_array(),
        )?;
        Ok(response)
    }

    fn extremes(response: &Mat) -> opencv::Result<Extremes<f32>> {
        let (mut min_value, mut max_value) = (0.0, 0.0);
        let (mut min_location, mut max_location) = (Point::default(), Point::default());
        core::min_max_loc(
            response,
            Some(&mut min_value),
            Some(&mut max_value),
            Some(&mut min_location),
            Some(&mut max_location),
            &core::no_array(),
        )?;
        Ok(Extremes {
            max_value: max_value as f32,
            min_value: min_value as f32,
            max_value_location: (max_location.x as u32, max_location.y as u32),
            min_value_location: (min_location.x as u32, min_location.y as u32),
        })
    }
}

impl TemplateMatcher for OpenCvMatcher {
    fn locate(
        &self,
        frame: &GrayImage,
        patch: &GrayImage,
        method: MatchMethod,
    ) -> Result<MatchLocation, TrackError> {
        tracker::check_fit(frame, patch)?;
        let extremes = Self::response(frame, patch, method)
            .and_then(|response| Self::extremes(&response))
            .map_err(|e| TrackError::Backend(e.to_string()))?;
        tracker::best_match(&extremes, patch, method)
    }
}

fn cv_method(method: MatchMethod) -> i32 {
    match method {
        MatchMethod::SumOfSquaredErrors => imgproc::TM_SQDIFF,
        MatchMethod::SumOfSquaredErrorsNormalized => imgproc::TM_SQDIFF_NORMED,
        MatchMethod::CrossCorrelation => imgproc::TM_CCORR,
        MatchMethod::CrossCorrelationNormalized => imgproc::TM_CCORR_NORMED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, imageops};
    use retro_scorer::Region;

    /// Deterministic texture with no repeating windows.
    fn texture(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let mut h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
            h ^= h >> 13;
            h = h.wrapping_mul(0x5bd1_e995);
            h ^= h >> 15;
            Luma([(h % 251) as u8])
        })
    }

    #[test]
    fn agrees_with_the_builtin_matcher() {
        let frame = texture(96, 64);
        for (left, top) in [(0, 0), (31, 22), (80, 50)] {
            let patch = imageops::crop_imm(&frame, left, top, 16, 14).to_image();
            for method in [
                MatchMethod::CrossCorrelationNormalized,
                MatchMethod::SumOfSquaredErrors,
                MatchMethod::SumOfSquaredErrorsNormalized,
            ] {
                let expected = tracker::locate(&frame, &patch, method).unwrap();
                let found = OpenCvMatcher.locate(&frame, &patch, method).unwrap();
                assert_eq!(found.region, expected.region, "{method:?} at ({left}, {top})");
                assert_eq!(found.region, Region::new(left, top, 16, 14));
            }
        }
    }

    #[test]
    fn rejects_patches_that_do_not_fit() {
        let frame = texture(10, 10);
        assert!(matches!(
            OpenCvMatcher.locate(&frame, &texture(11, 3), MatchMethod::default()),
            Err(TrackError::PatchTooLarge { .. })
        ));
        assert!(matches!(
            OpenCvMatcher.locate(&frame, &GrayImage::new(0, 0), MatchMethod::default()),
            Err(TrackError::EmptyPatch)
        ));
    }
}
