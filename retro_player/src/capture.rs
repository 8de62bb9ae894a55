use image::{GrayImage, RgbImage};
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use retro_scorer::{FrameSource, SourceError};
use std::path::Path;

/// An OpenCV capture opened on a video file, served by frame index.
pub struct CaptureSource {
    capture: VideoCapture,
    name: String,
    frame_count: u64,
    fps: f64,
    width: u32,
    height: u32,
}

impl CaptureSource {
    pub fn open(path: &Path) -> opencv::Result<Self> {
        let name = path.display().to_string();
        let capture = open_capture(path)?;
        let frame_count = capture.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;

        Ok(Self {
            capture,
            name,
            frame_count,
            fps,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl FrameSource for CaptureSource {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self, index: u64) -> Result<RgbImage, SourceError> {
        if index >= self.frame_count {
            return Err(SourceError::EndOfStream {
                index,
                frame_count: self.frame_count,
            });
        }
        let decode_error = |reason: String| SourceError::Decode { index, reason };

        self.capture
            .set(videoio::CAP_PROP_POS_FRAMES, index as f64)
            .map_err(|e| decode_error(e.to_string()))?;
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(|e| decode_error(e.to_string()))?;
        if !grabbed || frame.empty() {
            return Err(decode_error("decoder returned no frame".into()));
        }
        mat_to_rgb(&frame).map_err(|e| decode_error(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens `path` with any available backend. A file that opens but reports no
/// stream is an error.
pub fn open_capture(path: &Path) -> opencv::Result<VideoCapture> {
    let name = path.display().to_string();
    let capture = VideoCapture::from_file(&name, videoio::CAP_ANY)?;
    if !capture.is_opened()? {
        return Err(opencv::Error::new(
            core::StsError,
            format!("failed to open video file {name}"),
        ));
    }
    Ok(capture)
}

/// Converts an OpenCV BGR frame into an owned RGB image.
pub fn mat_to_rgb(frame: &Mat) -> opencv::Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let size = rgb.size()?;
    let data = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(size.width as u32, size.height as u32, data).ok_or_else(|| {
        opencv::Error::new(
            core::StsError,
            format!("frame buffer does not match {} x {}", size.width, size.height),
        )
    })
}

/// Converts an RGB image into an OpenCV BGR matrix for display.
pub fn rgb_to_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let mut rgb = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());
    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

/// Copies a grayscale image into a single-channel OpenCV matrix.
pub fn gray_to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    let mut gray = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;
    gray.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(gray)
}
