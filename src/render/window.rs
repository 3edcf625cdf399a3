use anyhow::Result;
use minifb::{Key, Window, WindowOptions};

use super::Canvas;

/// minifb window presenting canvases side by side
pub struct ViewerWindow {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl ViewerWindow {
    /// Open a fixed-size window
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;

        Ok(Self {
            window,
            buffer: vec![0u32; width * height],
            width,
            height,
        })
    }

    /// Open and ESC not held
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// Key went down since the last update, without repeat
    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.window.is_key_pressed(key, minifb::KeyRepeat::No)
    }

    /// Copy a canvas into the window buffer at (x, y), cropped to the window
    pub fn blit(&mut self, canvas: &Canvas, x: usize, y: usize) {
        let src = canvas.buffer();
        for row in 0..canvas.height() {
            let ty = y + row;
            if ty >= self.height {
                break;
            }
            for col in 0..canvas.width() {
                let tx = x + col;
                if tx >= self.width {
                    break;
                }
                self.buffer[ty * self.width + tx] = src[row * canvas.width() + col];
            }
        }
    }

    /// Present the buffer and poll input
    pub fn update(&mut self) -> Result<()> {
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)?;
        Ok(())
    }
}
