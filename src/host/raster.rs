use crate::{board::RasterDevice, pipeline::Rgb};
use log::warn;
use std::io::{self, Write};

const CURSOR_HOME: &str = "\x1b[H";
const RESET: &str = "\x1b[0m";
const CLEAR_LINE: &str = "\x1b[K";
/// Upper half block, foreground is the top pixel, background the bottom one.
const HALF_BLOCK: char = '\u{2580}';

/// LED matrix drawn into an ANSI truecolor terminal, two pixel rows per line.
pub struct TerminalRaster<W = io::Stdout> {
    width: u32,
    height: u32,
    pixels: Vec<Rgb>,
    brightness: f32,
    status: Option<(String, Rgb)>,
    out: W,
}

impl TerminalRaster {
    pub fn stdout(width: u32, height: u32) -> Self {
        Self::new(width, height, io::stdout())
    }
}

impl<W: Write> TerminalRaster<W> {
    pub fn new(width: u32, height: u32, out: W) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; width as usize * height as usize],
            brightness: 1.0,
            status: None,
            out,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        (x < self.width && y < self.height)
            .then(|| self.pixels[y as usize * self.width as usize + x as usize])
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    fn dimmed(&self, color: Rgb) -> Rgb {
        let scale = |channel: u8| (f32::from(channel) * self.brightness).round() as u8;
        Rgb::new(scale(color.r), scale(color.g), scale(color.b))
    }

    fn frame(&self) -> String {
        let mut frame = String::from(CURSOR_HOME);

        for y in (0..self.height).step_by(2) {
            for x in 0..self.width {
                let top = self.dimmed(self.pixel(x, y).unwrap_or_default());
                let bottom = self.dimmed(self.pixel(x, y + 1).unwrap_or_default());
                frame.push_str(&format!(
                    "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m{HALF_BLOCK}",
                    top.r, top.g, top.b, bottom.r, bottom.g, bottom.b
                ));
            }
            frame.push_str(RESET);
            frame.push('\n');
        }

        if let Some((text, color)) = &self.status {
            let color = self.dimmed(*color);
            frame.push_str(&format!(
                "\x1b[38;2;{};{};{}m{text}{RESET}",
                color.r, color.g, color.b
            ));
        }
        frame.push_str(CLEAR_LINE);
        frame.push('\n');

        frame
    }
}

impl<W: Write> RasterDevice for TerminalRaster<W> {
    fn set_pixel(&mut self, x: u32, y: u32, r: u8, g: u8, b: u8) {
        if x < self.width && y < self.height {
            self.pixels[y as usize * self.width as usize + x as usize] = Rgb::new(r, g, b);
        }
    }

    fn present(&mut self) {
        let frame = self.frame();
        if let Err(e) = self
            .out
            .write_all(frame.as_bytes())
            .and_then(|_| self.out.flush())
        {
            warn!("failed to draw to terminal: {e}");
        }
    }

    fn set_brightness(&mut self, scalar: f32) {
        self.brightness = scalar.clamp(0.0, 1.0);
    }

    fn clear(&mut self) {
        self.pixels.fill(Rgb::BLACK);
        self.status = None;
    }

    // No glyphs on the host, the text goes on the line below the image.
    fn draw_text(&mut self, text: &str, _x: i32, _y: i32, color: Rgb) {
        self.status = Some((text.to_string(), color));
    }
}
