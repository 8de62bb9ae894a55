// THEORY:
// Decoding and seeking belong to a video library, not to this crate. The
// scorer and tracker only need a frame count, a frame rate and random access
// by frame index. `FrameSource` is that seam. The
// interactive player implements it over an OpenCV capture; tests and headless
// callers use `MemoryFrameSource`, which serves frames from a vector.
//
// Frames are always handed out as owned `RgbImage`s. A reader owns the frame it
// read and nothing else holds on to it.

use image::RgbImage;

/// Errors a frame source can report for a single read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("frame {index} is past the end of the stream ({frame_count} frames)")]
    EndOfStream { index: u64, frame_count: u64 },
    #[error("frame {index} could not be decoded: {reason}")]
    Decode { index: u64, reason: String },
}

/// Random-access, frame-indexed reads over a decoded video stream.
pub trait FrameSource {
    /// Total number of frames the stream reports.
    fn frame_count(&self) -> u64;

    /// Frames per second the stream reports.
    fn fps(&self) -> f64;

    /// Seeks to `index` and decodes that frame.
    fn read_frame(&mut self, index: u64) -> Result<RgbImage, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// A frame source backed by frames already held in memory.
pub struct MemoryFrameSource {
    frames: Vec<RgbImage>,
    fps: f64,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self { frames, fps }
    }

    /// Builds `count` frames by calling `make_frame` with each frame index.
    pub fn from_fn(count: u64, fps: f64, make_frame: impl FnMut(u64) -> RgbImage) -> Self {
        Self::new((0..count).map(make_frame).collect(), fps)
    }
}

impl FrameSource for MemoryFrameSource {
    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self, index: u64) -> Result<RgbImage, SourceError> {
        let frame_count = self.frame_count();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.frames.get(i))
            .cloned()
            .ok_or(SourceError::EndOfStream { index, frame_count })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
