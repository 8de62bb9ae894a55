// THEORY:
// This file is the main entry point for the `retro_scorer` library crate.
// It exposes the session API used by the interactive player (and by anything
// else that wants a retroreflectivity score for a region of a video frame),
// along with the configuration it is built from.
//
// The crate is split the same way the work is:
// - `core_modules` holds the building blocks: the `Region` selected by the
//   operator, the `FrameSource` seam over a decoded video, the `RegionScorer`
//   that produces a score from pixels, and the `ForwardTracker` that follows a
//   patch through the next frames.
// - `session` ties them together behind `ScoringSession::score_selection`.
// - `config` carries every tunable, loadable from an optional TOML file.
//
// Video decoding, windows and input events are not part of this crate.

pub mod config;
pub mod core_modules;
pub mod session;

pub use config::RetroConfig;
pub use core_modules::frame_source::{FrameSource, MemoryFrameSource, SourceError};
pub use core_modules::region::region::Region;
pub use core_modules::region_scorer::{RegionScore, RegionScorer, Score};
pub use core_modules::tracker::{
    ForwardTracker, ImageprocMatcher, MatchLocation, MatchMethod, TemplateMatcher, TrackError,
    TrackingReport,
};
pub use session::{ScoringSession, SelectionReport, SessionError};
