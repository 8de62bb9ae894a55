// THEORY:
// The `ForwardTracker` follows a selected sign through the frames after the
// selection. A retroreflective sign flares as the vehicle approaches and the
// illumination angle changes, so the brightest moment is usually a little after
// the frame the operator paused on.
//
// Key architectural principles:
// 1.  **Fixed Template**: The selected patch is matched independently against
//     every future frame. There is no re-templating. A sharp change in
//     appearance (motion blur, occlusion) can make a match drift or fail; that
//     is an accepted limitation of the method.
// 2.  **Fixed Metric**: The similarity metric is chosen at construction. For
//     correlation metrics the best location is the maximum of the response; for
//     squared-difference metrics it is the minimum.
// 3.  **Score Every Match**: Each matched sub-region is cut from the colour frame
//     and handed to the `RegionScorer`.
// 4.  **Failures Are Absent, Not Zero**: A frame that cannot be read, or whose
//     response map is flat so that no location stands out, produces no score.
//     It is logged and recorded in the report so callers can tell a full
//     result from a partial one.
// 5.  **Pluggable Matcher**: The search itself sits behind `TemplateMatcher`.
//     `ImageprocMatcher` is a pure-Rust brute-force search that needs no native
//     library. Callers with a faster vision backend supply their own matcher.

use crate::config::TrackerConfig;
use crate::core_modules::frame_source::{FrameSource, SourceError};
use crate::core_modules::region::region::Region;
use crate::core_modules::region_scorer::{RegionScorer, Score, ScoreError};
use image::{GrayImage, RgbImage, imageops};
use imageproc::template_matching::{self, MatchTemplateMethod};

pub use imageproc::template_matching::Extremes;
use serde::Deserialize;
use tracing::{debug, warn};

/// Similarity metric used for template matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    SumOfSquaredErrors,
    SumOfSquaredErrorsNormalized,
    CrossCorrelation,
    #[default]
    CrossCorrelationNormalized,
}

impl MatchMethod {
    /// Whether the best match is the smallest response value.
    pub fn prefers_minimum(self) -> bool {
        matches!(
            self,
            MatchMethod::SumOfSquaredErrors | MatchMethod::SumOfSquaredErrorsNormalized
        )
    }

    fn as_template_method(self) -> MatchTemplateMethod {
        match self {
            MatchMethod::SumOfSquaredErrors => MatchTemplateMethod::SumOfSquaredErrors,
            MatchMethod::SumOfSquaredErrorsNormalized => {
                MatchTemplateMethod::SumOfSquaredErrorsNormalized
            }
            MatchMethod::CrossCorrelation => MatchTemplateMethod::CrossCorrelation,
            MatchMethod::CrossCorrelationNormalized => {
                MatchTemplateMethod::CrossCorrelationNormalized
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("template patch is empty")]
    EmptyPatch,
    #[error("patch {patch_width} x {patch_height} does not fit in frame {frame_width} x {frame_height}")]
    PatchTooLarge {
        patch_width: u32,
        patch_height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("no location stands out in the response (every window scored {0})")]
    NoDistinctMatch(f32),
    #[error("template matching backend failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Score(#[from] ScoreError),
}

/// Where a patch was found in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchLocation {
    /// The matched sub-region, the same size as the patch.
    pub region: Region,
    /// The raw response of the metric at that location.
    pub similarity: f32,
}

/// One successfully tracked frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFrame {
    pub frame_index: u64,
    pub location: MatchLocation,
    pub score: Score,
}

/// The outcome of tracking a patch through the following frames.
#[derive(Debug, Clone, Default)]
pub struct TrackingReport {
    /// Frames that were read, matched and scored, in order.
    pub frames: Vec<TrackedFrame>,
    /// Frames that could not be read or matched. They contribute no score.
    pub failed_frames: Vec<u64>,
}

impl TrackingReport {
    /// The highest score among tracked frames, if any frame was tracked.
    pub fn max_score(&self) -> Option<Score> {
        self.frames.iter().map(|f| f.score).max()
    }

    /// Number of frames the tracker attempted.
    pub fn attempted(&self) -> usize {
        self.frames.len() + self.failed_frames.len()
    }

    /// True when at least one attempted frame produced no score.
    pub fn is_partial(&self) -> bool {
        !self.failed_frames.is_empty()
    }
}

/// Finds where a template patch sits in a frame.
pub trait TemplateMatcher {
    /// Locates `patch` in `frame`. The search covers every position where the
    /// patch fits entirely inside the frame.
    fn locate(
        &self,
        frame: &GrayImage,
        patch: &GrayImage,
        method: MatchMethod,
    ) -> Result<MatchLocation, TrackError>;
}

/// Brute-force matcher over `imageproc::template_matching`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocMatcher;

impl TemplateMatcher for ImageprocMatcher {
    fn locate(
        &self,
        frame: &GrayImage,
        patch: &GrayImage,
        method: MatchMethod,
    ) -> Result<MatchLocation, TrackError> {
        check_fit(frame, patch)?;
        // (frame_width - patch_width + 1) x (frame_height - patch_height + 1)
        let response =
            template_matching::match_template(frame, patch, method.as_template_method());
        best_match(&template_matching::find_extremes(&response), patch, method)
    }
}

/// Locates `patch` in `frame` with the built-in matcher.
pub fn locate(
    frame: &GrayImage,
    patch: &GrayImage,
    method: MatchMethod,
) -> Result<MatchLocation, TrackError> {
    ImageprocMatcher.locate(frame, patch, method)
}

/// Rejects patches that are empty or do not fit inside the frame.
pub fn check_fit(frame: &GrayImage, patch: &GrayImage) -> Result<(), TrackError> {
    let (patch_width, patch_height) = patch.dimensions();
    let (frame_width, frame_height) = frame.dimensions();
    if patch_width == 0 || patch_height == 0 {
        return Err(TrackError::EmptyPatch);
    }
    if patch_width > frame_width || patch_height > frame_height {
        return Err(TrackError::PatchTooLarge {
            patch_width,
            patch_height,
            frame_width,
            frame_height,
        });
    }
    Ok(())
}

/// Turns the extremes of a response map into a match: the minimum for
/// squared-difference metrics, the maximum otherwise. A flat or non-finite
/// response has no best location.
pub fn best_match(
    extremes: &Extremes<f32>,
    patch: &GrayImage,
    method: MatchMethod,
) -> Result<MatchLocation, TrackError> {
    let (min, max) = (extremes.min_value, extremes.max_value);
    if !min.is_finite() || !max.is_finite() || min == max {
        return Err(TrackError::NoDistinctMatch(max));
    }
    let ((x, y), similarity) = if method.prefers_minimum() {
        (extremes.min_value_location, min)
    } else {
        (extremes.max_value_location, max)
    };
    Ok(MatchLocation {
        region: Region::new(x, y, patch.width(), patch.height()),
        similarity,
    })
}

/// Follows a patch through the frames after a selection.
pub struct ForwardTracker {
    method: MatchMethod,
    frames: u64,
    matcher: Box<dyn TemplateMatcher + Send + Sync>,
}

impl ForwardTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self::with_matcher(config, ImageprocMatcher)
    }

    pub fn with_matcher(
        config: &TrackerConfig,
        matcher: impl TemplateMatcher + Send + Sync + 'static,
    ) -> Self {
        Self {
            method: config.method,
            frames: config.frames as u64,
            matcher: Box::new(matcher),
        }
    }

    pub fn method(&self) -> MatchMethod {
        self.method
    }

    /// Matches `patch` against frames `start_frame .. start_frame + N` and scores
    /// every match. Frames that fail are logged and recorded, never scored.
    pub fn track<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        patch: &RgbImage,
        start_frame: u64,
        scorer: &RegionScorer,
    ) -> Result<TrackingReport, TrackError> {
        if patch.width() == 0 || patch.height() == 0 {
            return Err(TrackError::EmptyPatch);
        }
        let gray_patch = imageops::grayscale(patch);
        let mut report = TrackingReport::default();

        for frame_index in start_frame..start_frame + self.frames {
            match self.track_frame(source, &gray_patch, frame_index, scorer) {
                Ok(tracked) => {
                    debug!(
                        frame = frame_index,
                        region = %tracked.location.region,
                        similarity = tracked.location.similarity,
                        score = tracked.score.value(),
                        "tracked frame"
                    );
                    report.frames.push(tracked);
                }
                Err(error) => {
                    warn!(frame = frame_index, source = source.name(), %error, "failed to track frame");
                    report.failed_frames.push(frame_index);
                }
            }
        }

        Ok(report)
    }

    fn track_frame<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        gray_patch: &GrayImage,
        frame_index: u64,
        scorer: &RegionScorer,
    ) -> Result<TrackedFrame, TrackError> {
        let frame = source.read_frame(frame_index)?;
        let gray_frame = imageops::grayscale(&frame);
        let location = self.matcher.locate(&gray_frame, gray_patch, self.method)?;
        let score = scorer.score(&location.region.crop(&frame))?;
        Ok(TrackedFrame {
            frame_index,
            location,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScorerConfig, TrackerConfig};
    use crate::core_modules::frame_source::MemoryFrameSource;
    use image::{Luma, Rgb};

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

    fn sign_frame(left: u32, top: u32) -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if (left..left + 20).contains(&x) && (top..top + 20).contains(&y) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn finds_an_exact_copy_at_its_offset() {
        let frame = texture(80, 60);
        let expected = Region::new(23, 17, 12, 9);
        let patch = imageops::crop_imm(&frame, 23, 17, 12, 9).to_image();

        for method in [
            MatchMethod::CrossCorrelationNormalized,
            MatchMethod::SumOfSquaredErrors,
            MatchMethod::SumOfSquaredErrorsNormalized,
        ] {
            let found = locate(&frame, &patch, method).unwrap();
            assert_eq!(found.region, expected, "{method:?}");
        }
    }

    #[test]
    fn squared_difference_prefers_the_minimum() {
        assert!(MatchMethod::SumOfSquaredErrors.prefers_minimum());
        assert!(MatchMethod::SumOfSquaredErrorsNormalized.prefers_minimum());
        assert!(!MatchMethod::CrossCorrelation.prefers_minimum());
        assert!(!MatchMethod::CrossCorrelationNormalized.prefers_minimum());

        let frame = texture(40, 40);
        let patch = imageops::crop_imm(&frame, 5, 30, 6, 6).to_image();
        let found = locate(&frame, &patch, MatchMethod::SumOfSquaredErrors).unwrap();
        assert_eq!(found.region, Region::new(5, 30, 6, 6));
        assert!(found.similarity.abs() < 1e-3);
    }

    #[test]
    fn patch_larger_than_frame_is_rejected() {
        let frame = texture(10, 10);
        let patch = texture(12, 4);
        assert!(matches!(
            locate(&frame, &patch, MatchMethod::default()),
            Err(TrackError::PatchTooLarge { patch_width: 12, .. })
        ));
        assert!(matches!(
            locate(&frame, &GrayImage::new(0, 3), MatchMethod::default()),
            Err(TrackError::EmptyPatch)
        ));
    }

    #[test]
    fn stationary_sign_keeps_its_score() {
        let scorer = RegionScorer::new(&ScorerConfig::default());
        let tracker = ForwardTracker::new(&TrackerConfig::default());
        let mut source = MemoryFrameSource::from_fn(31, 30.0, |_| sign_frame(40, 40));

        let patch = Region::new(40, 40, 20, 20).crop(&sign_frame(40, 40));
        let instant = scorer.score(&patch).unwrap();
        let report = tracker.track(&mut source, &patch, 1, &scorer).unwrap();

        assert_eq!(report.frames.len(), 30);
        assert!(!report.is_partial());
        assert_eq!(report.max_score(), Some(instant));
        assert!(
            report
                .frames
                .iter()
                .all(|f| f.location.region == Region::new(40, 40, 20, 20))
        );
    }

    #[test]
    fn moving_sign_is_followed() {
        let scorer = RegionScorer::new(&ScorerConfig::default());
        let config = TrackerConfig {
            frames: 5,
            ..TrackerConfig::default()
        };
        let tracker = ForwardTracker::new(&config);
        let mut source =
            MemoryFrameSource::from_fn(6, 30.0, |i| sign_frame(20 + 5 * i as u32, 30 + 2 * i as u32));

        let patch = Region::new(20, 30, 20, 20).crop(&sign_frame(20, 30));
        let report = tracker.track(&mut source, &patch, 1, &scorer).unwrap();

        let lefts: Vec<u32> = report.frames.iter().map(|f| f.location.region.left).collect();
        assert_eq!(lefts, vec![25, 30, 35, 40, 45]);
    }

    #[test]
    fn unreadable_frames_are_absent_not_zero() {
        let scorer = RegionScorer::new(&ScorerConfig::default());
        let tracker = ForwardTracker::new(&TrackerConfig::default());
        // Only 10 frames exist; tracking from frame 1 wants 30.
        let mut source = MemoryFrameSource::from_fn(10, 30.0, |_| sign_frame(40, 40));

        let patch = Region::new(40, 40, 20, 20).crop(&sign_frame(40, 40));
        let report = tracker.track(&mut source, &patch, 1, &scorer).unwrap();

        assert_eq!(report.frames.len(), 9);
        assert_eq!(report.failed_frames, (10..31).collect::<Vec<u64>>());
        assert_eq!(report.attempted(), 30);
        assert!(report.is_partial());
        assert_eq!(report.max_score(), Some(scorer.score(&patch).unwrap()));
    }

    #[test]
    fn flat_response_is_not_a_match() {
        let scorer = RegionScorer::new(&ScorerConfig::default());
        let config = TrackerConfig {
            frames: 3,
            ..TrackerConfig::default()
        };
        let tracker = ForwardTracker::new(&config);
        // A black patch correlates to zero everywhere, so the bright block in
        // the corner must not be picked up as its location.
        let mut source = MemoryFrameSource::from_fn(4, 30.0, |_| sign_frame(0, 0));
        let patch = RgbImage::new(20, 20);

        let report = tracker.track(&mut source, &patch, 1, &scorer).unwrap();
        assert!(report.frames.is_empty());
        assert_eq!(report.failed_frames, vec![1, 2, 3]);
        assert_eq!(report.max_score(), None);

        let frame = imageops::grayscale(&sign_frame(0, 0));
        assert!(matches!(
            locate(&frame, &GrayImage::new(20, 20), MatchMethod::CrossCorrelationNormalized),
            Err(TrackError::NoDistinctMatch(_))
        ));
    }

    #[test]
    fn extremes_pick_the_side_the_metric_prefers() {
        let patch = GrayImage::new(4, 3);
        let extremes = Extremes {
            max_value: 0.9,
            min_value: 0.1,
            max_value_location: (7, 2),
            min_value_location: (1, 5),
        };
        let best = best_match(&extremes, &patch, MatchMethod::CrossCorrelationNormalized).unwrap();
        assert_eq!(best.region, Region::new(7, 2, 4, 3));
        let best = best_match(&extremes, &patch, MatchMethod::SumOfSquaredErrors).unwrap();
        assert_eq!(best.region, Region::new(1, 5, 4, 3));
        assert_eq!(best.similarity, 0.1);

        let nan = Extremes {
            max_value: f32::NAN,
            ..extremes
        };
        assert!(best_match(&nan, &patch, MatchMethod::CrossCorrelation).is_err());
    }

    #[test]
    fn tracker_uses_the_supplied_matcher() {
        struct Fixed;
        impl TemplateMatcher for Fixed {
            fn locate(
                &self,
                _frame: &GrayImage,
                patch: &GrayImage,
                _method: MatchMethod,
            ) -> Result<MatchLocation, TrackError> {
                Ok(MatchLocation {
                    region: Region::new(0, 0, patch.width(), patch.height()),
                    similarity: 1.0,
                })
            }
        }

        let scorer = RegionScorer::new(&ScorerConfig::default());
        let config = TrackerConfig {
            frames: 2,
            ..TrackerConfig::default()
        };
        let tracker = ForwardTracker::with_matcher(&config, Fixed);
        let mut source = MemoryFrameSource::from_fn(3, 30.0, |_| sign_frame(40, 40));
        let patch = Region::new(40, 40, 20, 20).crop(&sign_frame(40, 40));

        let report = tracker.track(&mut source, &patch, 1, &scorer).unwrap();
        assert!(report.frames.iter().all(|f| f.location.region.left == 0));
        assert_eq!(report.max_score(), Some(Score(0)));
    }

    #[test]
    fn nothing_tracked_has_no_max() {
        let scorer = RegionScorer::new(&ScorerConfig::default());
        let tracker = ForwardTracker::new(&TrackerConfig::default());
        let mut source = MemoryFrameSource::new(Vec::new(), 30.0);

        let report = tracker
            .track(&mut source, &RgbImage::new(4, 4), 0, &scorer)
            .unwrap();
        assert_eq!(report.max_score(), None);
        assert_eq!(report.failed_frames.len(), 30);
    }
}
