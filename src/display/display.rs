//! SDL2 window showing the latest published frame through the viewport engine.
//!
//! The render loop never waits on acquisition: each tick it loads the
//! current frame handle, re-uploads the texture only when the generation
//! changed, and copies the visible part of the image with the current zoom
//! and pan.

use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Keycode;
use sdl2::mouse::MouseButton;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect as SdlRect;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{debug, error, info, warn};

use crate::control::{AcquisitionControl, AcquisitionEvent};
use crate::error::ViewportError;
use crate::viewport::{Point, ViewRect, ViewportEngine};
use crate::{DisplayConfig, ViewportConfig};

const WINDOW_TITLE: &str = "camview";
const TITLE_REFRESH: Duration = Duration::from_secs(1);
const BACKGROUND: Color = Color::RGB(24, 24, 24);

struct FrameTexture<'a> {
    texture: Texture<'a>,
    width: u32,
    height: u32,
}

enum Flow {
    Continue,
    Quit,
}

/// SDL2 viewer window
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    viewport: ViewportEngine,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, display: &DisplayConfig, viewport: ViewportConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(WINDOW_TITLE, display.width, display.height)
            .position_centered()
            .resizable()
            .build()?;
        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        let viewport = ViewportEngine::new(viewport, display.width as f64, display.height as f64)?;

        Ok(Self {
            canvas,
            texture_creator,
            viewport,
        })
    }

    /// Run the event loop until the window closes or Esc is pressed
    pub fn run(&mut self, sdl_context: &sdl2::Sdl, control: &mut AcquisitionControl, camera_id: &str) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let frames = control.frames();
        let events = control.subscribe();

        let Self {
            canvas,
            texture_creator,
            viewport,
        } = self;
        let mut texture: Option<FrameTexture<'_>> = None;
        let mut shown_generation = None;
        let mut last_title: Option<Instant> = None;

        'running: loop {
            let pending: Vec<Event> = event_pump.poll_iter().collect();
            for event in pending {
                let mouse = event_pump.mouse_state();
                let pointer = Point::new(mouse.x() as f64, mouse.y() as f64);
                if let Flow::Quit = handle_event(event, pointer, viewport, control, camera_id) {
                    info!("Quit requested");
                    break 'running;
                }
            }

            for event in events.try_iter() {
                match event {
                    AcquisitionEvent::StateChanged { from, to } => info!(%from, %to, "Acquisition state"),
                    AcquisitionEvent::Failed(message) => error!("Acquisition failed: {message}"),
                }
            }

            let frame = frames.current_frame();
            if let Some(frame) = &frame {
                if shown_generation != Some(frame.generation()) {
                    let (width, height) = (frame.width(), frame.height());
                    if !texture.as_ref().is_some_and(|t| t.width == width && t.height == height) {
                        debug!(width, height, "Creating frame texture");
                        let created = texture_creator
                            .create_texture_streaming(PixelFormatEnum::RGBA32, width, height)
                            .map_err(|e| eyre!(e))?;
                        texture = Some(FrameTexture {
                            texture: created,
                            width,
                            height,
                        });
                    }
                    if let Some(target) = texture.as_mut() {
                        target.texture.update(None, frame.pixels(), frame.pitch())?;
                    }
                    log_rejected(viewport.set_image_size(width as f64, height as f64));
                    metrics::histogram!("camview_display_latency_us")
                        .record(frame.captured_at().elapsed().as_micros() as f64);
                    shown_generation = Some(frame.generation());
                }
            }

            canvas.set_draw_color(BACKGROUND);
            canvas.clear();
            if let (Some(_), Some(texture)) = (&frame, &texture) {
                if let Some((src, dst)) = viewport.visible_rect().and_then(|view| pixel_rects(viewport, view)) {
                    canvas.copy(&texture.texture, src, dst).map_err(|e| eyre!(e))?;
                }
            }
            canvas.present();

            if last_title.map_or(true, |at| at.elapsed() >= TITLE_REFRESH) {
                let title = format!("{WINDOW_TITLE} [{}] {}", control.status(), control.statistics());
                canvas.window_mut().set_title(&title)?;
                last_title = Some(Instant::now());
            }
        }

        Ok(())
    }
}

fn handle_event(
    event: Event,
    pointer: Point,
    viewport: &mut ViewportEngine,
    control: &mut AcquisitionControl,
    camera_id: &str,
) -> Flow {
    match event {
        Event::Quit { .. }
        | Event::KeyDown {
            keycode: Some(Keycode::Escape),
            ..
        } => return Flow::Quit,
        Event::KeyDown {
            keycode: Some(key),
            repeat: false,
            ..
        } => match key {
            Keycode::S => {
                if let Err(e) = control.start(camera_id) {
                    warn!("Start failed: {e}");
                }
            }
            Keycode::X => control.stop(),
            Keycode::R => control.reset(),
            _ => {}
        },
        Event::MouseWheel { y, .. } => log_rejected(viewport.on_wheel(y as f64, pointer)),
        Event::MouseButtonDown {
            mouse_btn: MouseButton::Left,
            clicks,
            x,
            y,
            ..
        } => {
            if clicks >= 2 {
                viewport.on_double_click();
            } else {
                log_rejected(viewport.on_drag_start(Point::new(x as f64, y as f64)));
            }
        }
        Event::MouseMotion { x, y, .. } if viewport.is_dragging() => {
            log_rejected(viewport.on_drag_move(Point::new(x as f64, y as f64)));
        }
        Event::MouseButtonUp {
            mouse_btn: MouseButton::Left,
            x,
            y,
            ..
        } if viewport.is_dragging() => log_rejected(viewport.on_drag_end(Point::new(x as f64, y as f64))),
        Event::Window {
            win_event: WindowEvent::Resized(w, h) | WindowEvent::SizeChanged(w, h),
            ..
        } => log_rejected(viewport.on_viewport_resize(w as f64, h as f64)),
        _ => {}
    }
    Flow::Continue
}

fn log_rejected(result: Result<(), ViewportError>) {
    if let Err(e) = result {
        debug!("{e}");
    }
}

/// Snap the visible region to whole source pixels and map it back to the
/// window, so partially visible pixels are drawn at their true position
fn pixel_rects(viewport: &ViewportEngine, view: ViewRect) -> Option<(SdlRect, SdlRect)> {
    let image = viewport.state().image?;
    let x0 = view.source.x.floor().max(0.0);
    let y0 = view.source.y.floor().max(0.0);
    let x1 = view.source.right().ceil().min(image.width);
    let y1 = view.source.bottom().ceil().min(image.height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let top_left = viewport.map_to_display(Point::new(x0, y0));
    let bottom_right = viewport.map_to_display(Point::new(x1, y1));
    let dst_w = (bottom_right.x - top_left.x).round();
    let dst_h = (bottom_right.y - top_left.y).round();
    if dst_w < 1.0 || dst_h < 1.0 {
        return None;
    }

    let src = SdlRect::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32);
    let dst = SdlRect::new(
        top_left.x.round() as i32,
        top_left.y.round() as i32,
        dst_w as u32,
        dst_h as u32,
    );
    Some((src, dst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_image_covers_its_letterbox() {
        let mut engine = ViewportEngine::new(ViewportConfig::default(), 800.0, 600.0).unwrap();
        engine.set_image_size(1600.0, 1200.0).unwrap();
        let (src, dst) = pixel_rects(&engine, engine.visible_rect().unwrap()).unwrap();
        assert_eq!(src, SdlRect::new(0, 0, 1600, 1200));
        assert_eq!(dst, SdlRect::new(0, 0, 800, 600));
    }

    #[test]
    fn partial_pixels_are_snapped_outward() {
        let mut engine = ViewportEngine::new(ViewportConfig::default(), 100.0, 100.0).unwrap();
        engine.set_image_size(10.0, 10.0).unwrap();
        // Zoom 10 centred on the image, then shift by a fraction of a pixel
        engine.on_drag_start(Point::new(0.0, 0.0)).unwrap();
        engine.on_drag_end(Point::new(-5.0, 0.0)).unwrap();

        let view = engine.visible_rect().unwrap();
        let (src, dst) = pixel_rects(&engine, view).unwrap();
        assert_eq!(src.x(), 0);
        assert_eq!(src.width(), 10);
        assert_eq!(dst.x(), -5);
        assert_eq!(dst.width(), 100);
    }
}
