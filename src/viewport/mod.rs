//! Zoom and pan state for the image viewer.
//!
//! The mapping from display to image coordinates is
//! `image = (display - origin) / zoom + pan`, so `pan` is the image point
//! shown at the viewport's top-left corner. All handlers are synchronous
//! state transitions; invalid numeric input is rejected without touching
//! the state.

mod geometry;

pub use geometry::{Point, Rect, Size, ViewRect};

use tracing::debug;

use crate::error::ViewportError;
use crate::{Overscroll, ViewportConfig};

/// Display pixels of image kept on screen when panning with partial overscroll
const MIN_VISIBLE_PX: f64 = 32.0;

/// Relative rounding slack when checking a pan against its limits
const PAN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Whole image fitted and centred; follows resizes
    Fit,
    /// User-chosen zoom and pan
    Manual,
}

/// Everything the render path needs to compose a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub zoom: f64,
    pub pan: Point,
    pub viewport: Size,
    pub origin: Point,
    pub image: Option<Size>,
    pub mode: ViewMode,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    anchor: Point,
    pan: Point,
}

pub struct ViewportEngine {
    config: ViewportConfig,
    state: ViewportState,
    drag: Option<Drag>,
}

fn check_point(p: Point) -> Result<Point, ViewportError> {
    if p.is_finite() {
        Ok(p)
    } else {
        Err(ViewportError::InvalidInput("point must be finite"))
    }
}

impl ViewportEngine {
    pub fn new(config: ViewportConfig, width: f64, height: f64) -> Result<Self, ViewportError> {
        if config.validate().is_err() {
            return Err(ViewportError::InvalidInput("zoom limits"));
        }
        let viewport = Size::checked(width, height)?;
        let mut engine = Self {
            config,
            state: ViewportState {
                zoom: 1.0,
                pan: Point::default(),
                viewport,
                origin: Point::default(),
                image: None,
                mode: ViewMode::Fit,
            },
            drag: None,
        };
        engine.fit();
        Ok(engine)
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn zoom(&self) -> f64 {
        self.state.zoom
    }

    pub fn pan(&self) -> Point {
        self.state.pan
    }

    pub fn mode(&self) -> ViewMode {
        self.state.mode
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Display point to image point
    pub fn map_to_image(&self, display: Point) -> Point {
        (display - self.state.origin) / self.state.zoom + self.state.pan
    }

    /// Image point to display point
    pub fn map_to_display(&self, image: Point) -> Point {
        (image - self.state.pan) * self.state.zoom + self.state.origin
    }

    /// Place the viewport's top-left corner in display coordinates
    pub fn set_origin(&mut self, origin: Point) -> Result<(), ViewportError> {
        self.state.origin = check_point(origin)?;
        Ok(())
    }

    /// Zoom by `zoom_step ^ delta` keeping the image point under `pivot` fixed
    pub fn on_wheel(&mut self, delta: f64, pivot: Point) -> Result<(), ViewportError> {
        if !delta.is_finite() {
            return Err(ViewportError::InvalidInput("wheel delta must be finite"));
        }
        let pivot = check_point(pivot)?;
        let zoom = self.clamp_zoom(self.state.zoom * self.config.zoom_step.powf(delta));
        if zoom == self.state.zoom {
            return Ok(());
        }

        let anchor = self.map_to_image(pivot);
        let pan = anchor - (pivot - self.state.origin) / zoom;

        // A step the pan limits would have to correct is dropped whole
        if let Some(image) = self.state.image {
            let allowed = match self.config.overscroll {
                Overscroll::Partial => self.overlaps(pan, zoom, image),
                Overscroll::Contain => {
                    let slack = PAN_EPSILON * (1.0 + image.width.max(image.height));
                    self.clamped(pan, zoom, image).distance(pan) <= slack
                }
            };
            if !allowed {
                debug!(zoom, overscroll = ?self.config.overscroll, "Zoom step outside pan limits, ignoring");
                return Ok(());
            }
        }

        self.state.zoom = zoom;
        self.state.pan = pan;
        self.state.mode = ViewMode::Manual;
        Ok(())
    }

    pub fn on_drag_start(&mut self, point: Point) -> Result<(), ViewportError> {
        let anchor = check_point(point)?;
        self.drag = Some(Drag {
            anchor,
            pan: self.state.pan,
        });
        Ok(())
    }

    pub fn on_drag_move(&mut self, point: Point) -> Result<(), ViewportError> {
        let point = check_point(point)?;
        let Some(drag) = self.drag else {
            return Ok(());
        };
        let mut pan = drag.pan - (point - drag.anchor) / self.state.zoom;
        if let Some(image) = self.state.image {
            pan = self.clamped(pan, self.state.zoom, image);
        }
        if pan != self.state.pan {
            self.state.pan = pan;
            self.state.mode = ViewMode::Manual;
        }
        Ok(())
    }

    pub fn on_drag_end(&mut self, point: Point) -> Result<(), ViewportError> {
        self.on_drag_move(point)?;
        self.drag = None;
        Ok(())
    }

    /// Reset to fit-to-viewport
    pub fn on_double_click(&mut self) {
        self.drag = None;
        self.fit();
    }

    pub fn on_viewport_resize(&mut self, width: f64, height: f64) -> Result<(), ViewportError> {
        self.state.viewport = Size::checked(width, height)?;
        self.relayout();
        Ok(())
    }

    /// Track the size of the frame being shown
    pub fn set_image_size(&mut self, width: f64, height: f64) -> Result<(), ViewportError> {
        let image = Size::checked(width, height)?;
        if self.state.image == Some(image) {
            return Ok(());
        }
        self.state.image = Some(image);
        self.relayout();
        Ok(())
    }

    /// Portion of the image to draw and where, or `None` if nothing is visible
    pub fn visible_rect(&self) -> Option<ViewRect> {
        let image = self.state.image?;
        let z = self.state.zoom;
        let pan = self.state.pan;
        let (ex, ey) = (self.state.viewport.width / z, self.state.viewport.height / z);

        let (x0, x1) = (pan.x.max(0.0), (pan.x + ex).min(image.width));
        let (y0, y1) = (pan.y.max(0.0), (pan.y + ey).min(image.height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let source = Rect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        };
        let top_left = self.map_to_display(Point::new(x0, y0));
        let target = Rect {
            x: top_left.x,
            y: top_left.y,
            width: source.width * z,
            height: source.height * z,
        };
        Some(ViewRect { source, target })
    }

    fn relayout(&mut self) {
        match (self.state.mode, self.state.image) {
            (ViewMode::Fit, _) => self.fit(),
            (ViewMode::Manual, Some(image)) => {
                self.state.pan = self.clamped(self.state.pan, self.state.zoom, image);
            }
            (ViewMode::Manual, None) => {}
        }
    }

    fn fit(&mut self) {
        self.state.mode = ViewMode::Fit;
        let viewport = self.state.viewport;
        match self.state.image {
            Some(image) => {
                let zoom = self.clamp_zoom((viewport.width / image.width).min(viewport.height / image.height));
                self.state.zoom = zoom;
                self.state.pan = Point::new(
                    (image.width - viewport.width / zoom) / 2.0,
                    (image.height - viewport.height / zoom) / 2.0,
                );
            }
            None => {
                self.state.zoom = self.clamp_zoom(1.0);
                self.state.pan = Point::default();
            }
        }
    }

    fn clamp_zoom(&self, zoom: f64) -> f64 {
        zoom.clamp(self.config.min_zoom, self.config.max_zoom)
    }

    /// Whether any part of the image is inside the viewport
    fn overlaps(&self, pan: Point, zoom: f64, image: Size) -> bool {
        let (ex, ey) = (self.state.viewport.width / zoom, self.state.viewport.height / zoom);
        pan.x < image.width && pan.x + ex > 0.0 && pan.y < image.height && pan.y + ey > 0.0
    }

    fn clamped(&self, pan: Point, zoom: f64, image: Size) -> Point {
        let axis = |pan: f64, extent: f64, len: f64| match self.config.overscroll {
            Overscroll::Contain if extent >= len => (len - extent) / 2.0,
            Overscroll::Contain => pan.clamp(0.0, len - extent),
            Overscroll::Partial => {
                let margin = (MIN_VISIBLE_PX / zoom).min(len).min(extent);
                pan.clamp(margin - extent, len - margin)
            }
        };
        Point::new(
            axis(pan.x, self.state.viewport.width / zoom, image.width),
            axis(pan.y, self.state.viewport.height / zoom, image.height),
        )
    }
}
