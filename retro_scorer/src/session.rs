// THEORY:
// The `session` module is the top-level API of the scorer. A `ScoringSession`
// owns the frame source used for look-ahead reads together with a configured
// `RegionScorer` and `ForwardTracker`. The player keeps its own playback source
// and hands the session a frame index and a region whenever the operator
// finishes a selection. Nothing is global: two sessions over two videos do not
// interact, and a session over in-memory frames behaves exactly like one over a
// capture device.

use crate::config::RetroConfig;
use crate::core_modules::frame_source::{FrameSource, SourceError};
use crate::core_modules::region::region::Region;
use crate::core_modules::region_scorer::{RegionScore, RegionScorer, Score, ScoreError};
use crate::core_modules::tracker::{
    ForwardTracker, ImageprocMatcher, TemplateMatcher, TrackError, TrackingReport,
};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid selection {0}: region has no area")]
    EmptySelection(Region),
    #[error("failed to read the selected frame: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Track(#[from] TrackError),
}

/// Everything learned from one selection.
#[derive(Debug, Clone)]
pub struct SelectionReport {
    /// Frame the selection was made on.
    pub frame_index: u64,
    /// The selection after clamping to the frame, in source coordinates.
    pub region: Region,
    /// Score and outline of the selected patch itself.
    pub instant: RegionScore,
    /// Results for the frames after the selection.
    pub tracking: TrackingReport,
}

impl SelectionReport {
    pub fn instant_score(&self) -> Score {
        self.instant.score
    }

    /// The brightest score seen, counting the selected frame itself.
    pub fn max_score(&self) -> Score {
        self.tracking
            .max_score()
            .map_or(self.instant.score, |tracked| tracked.max(self.instant.score))
    }
}

/// Scores operator selections against one video.
pub struct ScoringSession<S: FrameSource> {
    source: S,
    scorer: RegionScorer,
    tracker: ForwardTracker,
}

impl<S: FrameSource> ScoringSession<S> {
    pub fn new(source: S, config: &RetroConfig) -> Self {
        Self::with_matcher(source, config, ImageprocMatcher)
    }

    /// Like [`ScoringSession::new`], with the tracker searching through
    /// `matcher` instead of the built-in one.
    pub fn with_matcher(
        source: S,
        config: &RetroConfig,
        matcher: impl TemplateMatcher + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            scorer: RegionScorer::new(&config.scorer),
            tracker: ForwardTracker::with_matcher(&config.tracker, matcher),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn scorer(&self) -> &RegionScorer {
        &self.scorer
    }

    /// Scores `region` (source coordinates) on frame `frame_index`, then tracks
    /// it through the frames that follow.
    pub fn score_selection(
        &mut self,
        frame_index: u64,
        region: Region,
    ) -> Result<SelectionReport, SessionError> {
        if region.is_empty() {
            warn!(%region, "rejecting selection without area");
            return Err(SessionError::EmptySelection(region));
        }

        let frame = self.source.read_frame(frame_index)?;
        let bounded = region.clamp_to(frame.width(), frame.height());
        if bounded.is_empty() {
            warn!(%region, width = frame.width(), height = frame.height(), "selection lies outside the frame");
            return Err(SessionError::EmptySelection(region));
        }

        let patch = bounded.crop(&frame);
        let instant = self.scorer.score_with_outline(&patch)?;
        let tracking = self
            .tracker
            .track(&mut self.source, &patch, frame_index + 1, &self.scorer)?;

        if tracking.is_partial() {
            warn!(
                tracked = tracking.frames.len(),
                failed = tracking.failed_frames.len(),
                "max score covers only part of the tracking window"
            );
        }

        let report = SelectionReport {
            frame_index,
            region: bounded,
            instant,
            tracking,
        };
        info!(
            frame = frame_index,
            region = %bounded,
            method = ?self.tracker.method(),
            instant = report.instant_score().value(),
            max = report.max_score().value(),
            "scored selection"
        );
        Ok(report)
    }
}
