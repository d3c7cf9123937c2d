//! View and screen dimensions.
//!
//! Everything the engine draws lives in view units: the view is a fixed number
//! of units wide (100 by default) and as tall as the window's aspect ratio
//! allows, with the origin in the bottom-left corner.

use cgmath::Matrix3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub screen_width: u32,
    pub screen_height: u32,
    pub view_width: f32,
    pub view_height: f32,
}

impl Viewport {
    pub fn new(screen_width: u32, screen_height: u32, view_width: f32) -> Self {
        let mut viewport = Self {
            screen_width: 0,
            screen_height: 0,
            view_width,
            view_height: view_width,
        };
        viewport.resize(screen_width, screen_height);
        viewport
    }

    /// Keeps the view width and derives the height from the new aspect ratio.
    /// A degenerate (zero-sized) screen leaves the view height unchanged.
    pub fn resize(&mut self, screen_width: u32, screen_height: u32) {
        self.screen_width = screen_width;
        self.screen_height = screen_height;
        if screen_width > 0 && screen_height > 0 {
            self.view_height = self.view_width * screen_height as f32 / screen_width as f32;
        }
    }

    /// Maps window pixel coordinates (origin top-left, y down) to view units
    /// (origin bottom-left, y up).
    pub fn screen_to_view(&self, x: f32, y: f32) -> (f32, f32) {
        let sw = self.screen_width.max(1) as f32;
        let sh = self.screen_height.max(1) as f32;
        let view_x = x / sw * self.view_width;
        let view_y = self.view_height - y / sh * self.view_height;
        (view_x, view_y)
    }

    /// Orthographic projection from view units to clip space.
    pub fn projection(&self) -> Matrix3<f32> {
        #[rustfmt::skip]
        let projection = Matrix3::new(
            2.0 / self.view_width, 0.0, 0.0,
            0.0, 2.0 / self.view_height, 0.0,
            -1.0, -1.0, 1.0,
        );
        projection
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(800, 600, 100.0)
    }
}
