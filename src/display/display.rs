//! SDL2 Window Display Module
//! Presents annotated frames in an SDL2 window, letterboxed to keep the
//! frame's aspect ratio. Must be created and driven on the UI thread.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;

use tracing::info;

use super::layout::{centered, fit_keep_ratio};
use super::DisplaySink;
use crate::inference::DetectionResult;

/// SDL2 window sink with vsync'd presentation.
pub struct Sdl2Sink {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    _sdl: sdl2::Sdl,
}

impl Sdl2Sink {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let sdl = sdl2::init().map_err(|e| eyre!(e))?;
        let video_subsystem = sdl.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Lookout", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl.event_pump().map_err(|e| eyre!(e))?;

        info!("SDL2 window opened ({}x{})", width, height);
        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            _sdl: sdl,
        })
    }
}

impl DisplaySink for Sdl2Sink {
    fn show(&mut self, result: &DetectionResult) -> Result<()> {
        let (width, height) = result.image.dimensions();

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;
        texture
            .update(None, result.image.as_raw(), (width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        let screen = self.canvas.output_size().map_err(|e| eyre!(e))?;
        let fitted = fit_keep_ratio((width, height), screen);
        let (x, y) = centered(fitted, screen);

        self.canvas.set_draw_color(Color::BLACK);
        self.canvas.clear();
        self.canvas
            .copy(&texture, None, Some(Rect::new(x, y, fitted.0, fitted.1)))
            .map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    fn pump(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => {
                    info!("Quit event received");
                    return false;
                }
                _ => {}
            }
        }
        true
    }
}
