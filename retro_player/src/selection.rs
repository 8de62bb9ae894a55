use opencv::highgui;
use retro_scorer::Region;
use retro_scorer::core_modules::region::region::Corner;

/// State of the operator's drag gesture, in display coordinates.
///
/// Written by the window's mouse callback, read by the player loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DragState {
    pub dragging: bool,
    /// Set when the button is released; cleared once the player consumes it.
    pub completed: bool,
    pub start: Corner,
    pub end: Corner,
}

impl DragState {
    pub fn handle_event(&mut self, event: i32, x: i32, y: i32) {
        match event {
            highgui::EVENT_LBUTTONDOWN => {
                self.dragging = true;
                self.completed = false;
                self.start = (x, y);
                self.end = (x, y);
            }
            highgui::EVENT_MOUSEMOVE if self.dragging => {
                self.end = (x, y);
            }
            highgui::EVENT_LBUTTONUP if self.dragging => {
                self.dragging = false;
                self.completed = true;
                self.end = (x, y);
            }
            _ => {}
        }
    }

    /// Forgets any selection, e.g. when playback moves to a new frame.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True while there is a box worth drawing.
    pub fn is_active(&self) -> bool {
        self.dragging || self.completed
    }

    /// Takes a finished selection, leaving the state ready for the next drag.
    pub fn take_completed(&mut self) -> Option<Region> {
        if !self.completed {
            return None;
        }
        self.completed = false;
        Some(self.region())
    }

    /// The selected box, kept inside a `width` x `height` display.
    pub fn region_within(&self, width: u32, height: u32) -> Region {
        self.region().clamp_to(width, height)
    }

    fn region(&self) -> Region {
        Region::from_corners(self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_produces_a_completed_region() {
        let mut drag = DragState::default();
        drag.handle_event(highgui::EVENT_LBUTTONDOWN, 50, 40);
        drag.handle_event(highgui::EVENT_MOUSEMOVE, 60, 45);
        assert!(drag.is_active());
        assert_eq!(drag.take_completed(), None);

        drag.handle_event(highgui::EVENT_LBUTTONUP, 20, 10);
        assert_eq!(drag.take_completed(), Some(Region::new(20, 10, 30, 30)));
        assert_eq!(drag.take_completed(), None);
    }

    #[test]
    fn moves_without_a_pressed_button_are_ignored() {
        let mut drag = DragState::default();
        drag.handle_event(highgui::EVENT_MOUSEMOVE, 60, 45);
        drag.handle_event(highgui::EVENT_LBUTTONUP, 60, 45);
        assert!(!drag.is_active());
        assert_eq!(drag, DragState::default());
    }

    #[test]
    fn region_is_kept_inside_the_display() {
        let mut drag = DragState::default();
        drag.handle_event(highgui::EVENT_LBUTTONDOWN, -10, 5);
        drag.handle_event(highgui::EVENT_LBUTTONUP, 700, 50);
        assert_eq!(drag.region_within(640, 360), Region::new(0, 5, 640, 45));
    }

    #[test]
    fn reset_forgets_the_selection() {
        let mut drag = DragState::default();
        drag.handle_event(highgui::EVENT_LBUTTONDOWN, 1, 1);
        drag.handle_event(highgui::EVENT_LBUTTONUP, 9, 9);
        drag.reset();
        assert_eq!(drag.take_completed(), None);
    }
}
