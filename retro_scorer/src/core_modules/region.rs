// THEORY:
// A `Region` is the rectangle the operator drags around a sign. It is a "dumb"
// data container. It can normalise itself from a drag gesture, move between
// display and source resolution, stay inside a frame, and cut its pixels out
// of one.
// It has no lifetime beyond the computation that uses it.
//
// Coordinates are half-open: a region covers columns `left..left + width` and
// rows `top..top + height`. Two drag corners therefore produce a width equal to
// the horizontal distance between them, so a click without a drag is empty.

pub mod region {
    use image::{RgbImage, imageops};

    /// A point reported by a pointer gesture. Signed, because a drag may leave
    /// the window.
    pub type Corner = (i32, i32);

    /// An axis-aligned rectangle in pixel coordinates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Region {
        /// Column of the left edge.
        pub left: u32,
        /// Row of the top edge.
        pub top: u32,
        /// Width in pixels.
        pub width: u32,
        /// Height in pixels.
        pub height: u32,
    }

    impl Region {
        pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
            Self {
                left,
                top,
                width,
                height,
            }
        }

        /// Builds a region from two opposite corners given in any drag direction.
        /// Negative coordinates are pinned to zero.
        pub fn from_corners(a: Corner, b: Corner) -> Self {
            let x0 = a.0.min(b.0).max(0) as u32;
            let y0 = a.1.min(b.1).max(0) as u32;
            let x1 = a.0.max(b.0).max(0) as u32;
            let y1 = a.1.max(b.1).max(0) as u32;
            Self::new(x0, y0, x1 - x0, y1 - y0)
        }

        /// Exclusive right edge.
        pub fn right(&self) -> u32 {
            self.left.saturating_add(self.width)
        }

        /// Exclusive bottom edge.
        pub fn bottom(&self) -> u32 {
            self.top.saturating_add(self.height)
        }

        pub fn area(&self) -> u64 {
            self.width as u64 * self.height as u64
        }

        /// A region with no pixels cannot be scored or matched.
        pub fn is_empty(&self) -> bool {
            self.width == 0 || self.height == 0
        }

        /// Maps a region drawn on a frame shown at `display_scale` back to the
        /// source resolution. Each corner is divided by the scale and rounded to
        /// the nearest pixel.
        pub fn to_source(&self, display_scale: f64) -> Self {
            let scale_corner = |v: u32| (v as f64 / display_scale).round().max(0.0) as u32;
            let left = scale_corner(self.left);
            let top = scale_corner(self.top);
            let right = scale_corner(self.right());
            let bottom = scale_corner(self.bottom());
            Self::new(left, top, right - left, bottom - top)
        }

        /// Inverse of [`Region::to_source`], used to draw source regions on a
        /// downscaled display.
        pub fn to_display(&self, display_scale: f64) -> Self {
            self.to_source(1.0 / display_scale)
        }

        /// Intersects the region with a `frame_width` x `frame_height` frame.
        /// A region lying entirely outside the frame becomes empty.
        pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Self {
            let left = self.left.min(frame_width);
            let top = self.top.min(frame_height);
            let right = self.right().min(frame_width);
            let bottom = self.bottom().min(frame_height);
            Self::new(left, top, right - left, bottom - top)
        }

        /// Copies the pixels under this region out of `frame`. The region is
        /// clamped to the frame first.
        pub fn crop(&self, frame: &RgbImage) -> RgbImage {
            let bounded = self.clamp_to(frame.width(), frame.height());
            imageops::crop_imm(frame, bounded.left, bounded.top, bounded.width, bounded.height)
                .to_image()
        }
    }

    impl std::fmt::Display for Region {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "[{} x {} from ({}, {})]",
                self.width, self.height, self.left, self.top
            )
        }
    }
}
