use crate::capture::{self, CaptureSource};
use crate::matcher::OpenCvMatcher;
use crate::selection::DragState;
use anyhow::Context;
use image::RgbImage;
use opencv::{
    core::{Mat, Point, Rect, Scalar, Size},
    highgui, imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use retro_scorer::config::PlayerConfig;
use retro_scorer::{FrameSource, Region, RetroConfig, ScoringSession, SelectionReport};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const VIDEO_WINDOW: &str = "Video";
const TARGET_WINDOW: &str = "Target";
const PROGRESS_TRACKBAR: &str = "Played(%)";
const PROGRESS_MAX: i32 = 100;
const KEY_WAIT_MS: i32 = 10;

const KEY_ESC: i32 = 27;
// Arrow key codes differ per highgui backend (Win32, GTK, Cocoa).
const KEYS_LEFT: [i32; 3] = [2_424_832, 65_361, 63_234];
const KEYS_RIGHT: [i32; 3] = [2_555_904, 65_363, 63_235];

/// The interactive scrubber: plays a video, lets the operator pause and drag a
/// box around a sign, and prints the sign's scores.
pub struct Player {
    /// Capture used for playback. The session owns a second one for look-ahead
    /// reads, so scoring never moves the playback position.
    playback: VideoCapture,
    session: ScoringSession<CaptureSource>,
    config: PlayerConfig,
    drag: Arc<Mutex<DragState>>,
    target_shown: bool,
    frame_count: f64,
    fps: f64,
}

impl Player {
    pub fn open(path: &Path, config: &RetroConfig) -> anyhow::Result<Self> {
        let playback = capture::open_capture(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let look_ahead = CaptureSource::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let frame_count = look_ahead.frame_count() as f64;
        let fps = look_ahead.fps();

        print_video_info(&look_ahead);

        Ok(Self {
            playback,
            session: ScoringSession::with_matcher(look_ahead, config, OpenCvMatcher),
            config: config.player.clone(),
            drag: Arc::new(Mutex::new(DragState::default())),
            target_shown: false,
            frame_count,
            fps,
        })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        highgui::named_window(VIDEO_WINDOW, highgui::WINDOW_AUTOSIZE)?;
        highgui::create_trackbar(PROGRESS_TRACKBAR, VIDEO_WINDOW, None, PROGRESS_MAX, None)?;
        let drag = Arc::clone(&self.drag);
        highgui::set_mouse_callback(
            VIDEO_WINDOW,
            Some(Box::new(move |event, x, y, _flags| {
                drag.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .handle_event(event, x, y);
            })),
        )?;

        let mut paused = false;
        let mut frame = Mat::default();
        let mut frame_index: Option<u64> = None;
        let mut shown_progress = 0;

        loop {
            let position = self.position()?;
            if position >= self.frame_count - 1.0 {
                println!("Reached the end of video file");
                highgui::wait_key(0)?;
                break;
            }

            // --- 1. Advance playback ---
            if !paused || frame_index.is_none() {
                if !self.playback.read(&mut frame)? || frame.empty() {
                    warn!(frame = position, total = self.frame_count, "reached an empty frame");
                    self.seek_to(position + 1.0)?;
                    continue;
                }
                frame_index = Some(position as u64);
                self.drag_state().reset();
            }

            // --- 2. Render ---
            let scale = self.display_scale(&frame)?;
            let mut display = scaled(&frame, scale)?;
            draw_elapsed_time(&mut display, position / self.fps)?;

            // --- 3. Selection (only while paused) ---
            if let (true, Some(index)) = (paused, frame_index) {
                let size = display.size()?;
                let (width, height) = (size.width as u32, size.height as u32);
                let drag = *self.drag_state();
                if drag.is_active() {
                    draw_region(&mut display, drag.region_within(width, height))?;
                }
                let completed = self.drag_state().take_completed();
                if let Some(region) = completed {
                    self.handle_selection(index, region.clamp_to(width, height), scale)?;
                }
            }

            highgui::imshow(VIDEO_WINDOW, &display)?;
            if self.sync_progress(&mut shown_progress)? {
                frame_index = None;
            }

            // --- 4. Keys ---
            let key = highgui::wait_key_ex(KEY_WAIT_MS)?;
            match key {
                KEY_ESC => break,
                k if k == 'p' as i32 || k == 'P' as i32 => {
                    paused = !paused;
                    debug!(paused, "toggled playback");
                }
                k if KEYS_LEFT.contains(&k) => {
                    self.seek_by(-self.step_frames())?;
                    frame_index = None;
                }
                k if KEYS_RIGHT.contains(&k) => {
                    self.seek_by(self.step_frames())?;
                    frame_index = None;
                }
                _ => {}
            }
        }

        highgui::destroy_all_windows()?;
        Ok(())
    }

    fn handle_selection(
        &mut self,
        frame_index: u64,
        display_region: Region,
        scale: f64,
    ) -> anyhow::Result<()> {
        if display_region.is_empty() {
            println!("Invalid crop: {display_region}");
            warn!(region = %display_region, "ignoring selection without area");
            return Ok(());
        }

        let region = display_region.to_source(scale);
        info!(frame = frame_index, display = %display_region, source = %region, "selection made");
        match self.session.score_selection(frame_index, region) {
            Ok(report) => {
                print_report(&report);
                self.show_target(&report.instant.outline)?;
            }
            Err(error) => {
                println!("Failed to score the selection: {error}");
                warn!(%error, "selection could not be scored");
            }
        }
        Ok(())
    }

    /// Replaces the Target window so it resizes to the new outline.
    fn show_target(&mut self, outline: &RgbImage) -> anyhow::Result<()> {
        if self.target_shown {
            // The operator may already have closed it.
            if let Err(error) = highgui::destroy_window(TARGET_WINDOW) {
                debug!(%error, "previous target window was already gone");
            }
        }
        highgui::imshow(TARGET_WINDOW, &capture::rgb_to_mat(outline)?)?;
        self.target_shown = true;
        Ok(())
    }

    fn drag_state(&self) -> MutexGuard<'_, DragState> {
        self.drag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn position(&self) -> opencv::Result<f64> {
        self.playback.get(videoio::CAP_PROP_POS_FRAMES)
    }

    fn step_frames(&self) -> f64 {
        self.config.seek_step_secs as f64 * self.fps
    }

    fn seek_by(&mut self, frames: f64) -> opencv::Result<()> {
        let target = self.position()? + frames;
        self.seek_to(target)
    }

    fn seek_to(&mut self, frame: f64) -> opencv::Result<()> {
        let target = frame.clamp(0.0, (self.frame_count - 1.0).max(0.0));
        debug!(target, "seeking playback");
        self.playback.set(videoio::CAP_PROP_POS_FRAMES, target)?;
        Ok(())
    }

    /// Keeps the progress trackbar in step with playback and seeks when the
    /// operator moved it since the last frame. Returns whether it seeked.
    fn sync_progress(&mut self, shown: &mut i32) -> opencv::Result<bool> {
        let requested = highgui::get_trackbar_pos(PROGRESS_TRACKBAR, VIDEO_WINDOW)?;
        let moved = requested != *shown;
        if moved {
            self.seek_to(requested as f64 / PROGRESS_MAX as f64 * self.frame_count)?;
        }
        let progress = (PROGRESS_MAX as f64 * self.position()? / self.frame_count.max(1.0)) as i32;
        if progress != requested {
            highgui::set_trackbar_pos(PROGRESS_TRACKBAR, VIDEO_WINDOW, progress)?;
        }
        *shown = progress;
        Ok(moved)
    }

    fn display_scale(&self, frame: &Mat) -> opencv::Result<f64> {
        let size = frame.size()?;
        let oversized = size.height as u32 > self.config.max_display_height
            || size.width as u32 > self.config.max_display_width;
        Ok(if oversized { self.config.display_scale } else { 1.0 })
    }
}

fn scaled(frame: &Mat, scale: f64) -> opencv::Result<Mat> {
    if scale == 1.0 {
        return frame.try_clone();
    }
    let mut display = Mat::default();
    imgproc::resize(frame, &mut display, Size::default(), scale, scale, imgproc::INTER_LINEAR)?;
    Ok(display)
}

fn draw_region(display: &mut Mat, region: Region) -> opencv::Result<()> {
    let rect = Rect::new(
        region.left as i32,
        region.top as i32,
        region.width as i32,
        region.height as i32,
    );
    imgproc::rectangle(display, rect, Scalar::new(0.0, 255.0, 0.0, 0.0), 1, imgproc::LINE_8, 0)
}

/// Writes the playback time as `m:ss` in the top-left corner.
fn draw_elapsed_time(display: &mut Mat, seconds: f64) -> opencv::Result<()> {
    let seconds = seconds.max(0.0) as u64;
    let text = format!("{}:{:02}", seconds / 60, seconds % 60);
    let font_scale = 0.5;
    let thickness = 1;
    let mut baseline = 0;
    let text_size = imgproc::get_text_size(
        &text,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        thickness,
        &mut baseline,
    )?;
    imgproc::put_text(
        display,
        &text,
        Point::new(0, text_size.height),
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        Scalar::all(255.0),
        thickness,
        imgproc::LINE_8,
        false,
    )
}

fn print_video_info(source: &CaptureSource) {
    let fps = source.fps();
    let length_secs = if fps > 0.0 {
        (source.frame_count() as f64 / fps) as u64
    } else {
        0
    };
    println!(
        "Video length : {}:{:02}:{:02}",
        length_secs / 3600,
        (length_secs / 60) % 60,
        length_secs % 60
    );
    println!("Original resolution: {} x {}", source.width(), source.height());
    println!("Frame rate: {fps}");
    println!();
}

/// Console output for one selection.
pub fn print_report(report: &SelectionReport) {
    println!("Instant Retro-score: {}", report.instant_score());
    println!("Max Retro-score: {}", report.max_score());
    if report.tracking.is_partial() {
        println!(
            "(max covers {} of {} following frames; {} could not be read)",
            report.tracking.frames.len(),
            report.tracking.attempted(),
            report.tracking.failed_frames.len()
        );
    }
    println!();
}

pub fn print_help() {
    println!("Traffic Sign Retroreflectivity Scorer [Version {}]", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Hot keys:");
    println!("\tESC                     - quit the program");
    println!("\tP                       - pause the player");
    println!("\tleft/right arrow        - move backward/forward");
    println!("\tdrag a box when pausing - select region of interest");
    println!();
}
