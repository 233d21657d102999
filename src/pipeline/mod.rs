//! Turns fetched frames into pixels on the raster.
//!
//! The pipeline owns the raster device and the framebuffer mirroring what was
//! last written to it. Brightness is kept as a device level scalar and never
//! baked into pixel values.

mod pixel;
mod status;

pub use pixel::{PixelFormat, Rgb, rgb565_to_rgb};
pub use status::{Status, StatusKind};

use crate::{
    board::{Capabilities, Decoder, RasterDevice},
    device_config::FrameProfile,
    transport::Frame,
};
use log::{debug, warn};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};

/// Horizontal start of status text.
const STATUS_TEXT_X: i32 = 2;
/// Half the glyph height, used to center status text vertically.
const STATUS_TEXT_HALF_HEIGHT: i32 = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderError {
    /// Decode profile selected on a board without an image codec.
    DecoderUnavailable,
    /// Codec failed, panicked or produced nothing.
    DecodeFailed,
    /// Pixel buffer shorter than its dimensions require, sizes in bytes.
    Truncated { expected: usize, actual: usize },
}

impl RenderError {
    pub fn short_label(&self) -> &'static str {
        match self {
            RenderError::DecoderUnavailable => "No decoder",
            RenderError::DecodeFailed => "Decode Err",
            RenderError::Truncated { .. } => "Short frame",
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::DecoderUnavailable => write!(f, "no image decoder available"),
            RenderError::DecodeFailed => write!(f, "frame could not be decoded"),
            RenderError::Truncated { expected, actual } => {
                write!(f, "pixel buffer truncated: expected {expected} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for RenderError {}

/// Server provided facts about a frame's layout.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FormatHint {
    pub reported_size: Option<(u32, u32)>,
    pub pixel_format: Option<String>,
}

impl From<&Frame> for FormatHint {
    fn from(frame: &Frame) -> Self {
        Self {
            reported_size: frame.reported_size,
            pixel_format: frame.pixel_format.clone(),
        }
    }
}

/// Last picture written to the raster, row-major.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Rgb>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Rgb> {
        self.index(x, y).map(|index| self.pixels[index])
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    fn set(&mut self, x: u32, y: u32, color: Rgb) {
        if let Some(index) = self.index(x, y) {
            self.pixels[index] = color;
        }
    }

    fn fill(&mut self, color: Rgb) {
        self.pixels.fill(color);
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }
}

pub struct FramePipeline<R> {
    raster: R,
    decoder: Option<Box<dyn Decoder>>,
    profile: FrameProfile,
    framebuffer: FrameBuffer,
    brightness: Option<u8>,
}

impl<R: RasterDevice> FramePipeline<R> {
    pub fn new(
        raster: R,
        profile: FrameProfile,
        decoder: Option<Box<dyn Decoder>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            raster,
            decoder,
            profile,
            framebuffer: FrameBuffer::new(width, height),
            brightness: None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            decoder: self.decoder.is_some(),
        }
    }

    /// Fails if the selected profile needs something the board lacks.
    pub fn ensure_capable(&self) -> Result<(), RenderError> {
        match self.profile {
            FrameProfile::Decode if !self.capabilities().decoder => {
                Err(RenderError::DecoderUnavailable)
            }
            _ => Ok(()),
        }
    }

    pub fn profile(&self) -> FrameProfile {
        self.profile
    }

    /// Applied brightness in percent, `None` before the first call.
    pub fn brightness(&self) -> Option<u8> {
        self.brightness
    }

    /// Set the device brightness, clamped to 100 percent.
    ///
    /// The raster is only touched when the value actually changes.
    pub fn set_brightness(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.brightness == Some(percent) {
            return;
        }

        debug!("brightness {percent}%");
        self.raster.set_brightness(f32::from(percent) / 100.0);
        self.brightness = Some(percent);
    }

    pub fn apply_brightness_hint(&mut self, hint: Option<u8>) {
        if let Some(percent) = hint {
            self.set_brightness(percent);
        }
    }

    /// Render one frame
    ///
    /// # Arguments
    /// * `raw` - Frame body as received from the server
    /// * `hint` - Layout facts reported alongside the body
    ///
    /// # Returns
    /// `Ok` if every pixel of the raster was written. A truncated buffer is
    /// still rendered and presented as far as it goes before the error is
    /// returned.
    pub fn render(&mut self, raw: &[u8], hint: &FormatHint) -> Result<(), RenderError> {
        let configured = (self.framebuffer.width, self.framebuffer.height);

        match self.profile {
            FrameProfile::Decode => {
                let decoder = self
                    .decoder
                    .as_deref()
                    .ok_or(RenderError::DecoderUnavailable)?;
                let pixels = decode_guarded(decoder, raw, configured.0, configured.1)?;
                self.blit(&pixels, PixelFormat::Rgb565Le, configured)
            }
            FrameProfile::Bridge => {
                let format = match hint.pixel_format.as_deref() {
                    None => PixelFormat::Rgb888,
                    Some(name) => PixelFormat::from_header(name).unwrap_or_else(|| {
                        warn!("unknown pixel format {name}, assuming RGB888");
                        PixelFormat::Rgb888
                    }),
                };
                self.blit(raw, format, hint.reported_size.unwrap_or(configured))
            }
        }
    }

    /// Replace the raster content with a one-line message.
    pub fn show_status(&mut self, status: &Status) {
        debug!("status: {}", status.text);

        let y = self.framebuffer.height as i32 / 2 - STATUS_TEXT_HALF_HEIGHT;

        self.raster.clear();
        self.framebuffer.fill(Rgb::BLACK);
        self.raster
            .draw_text(&status.text, STATUS_TEXT_X, y, status.kind.color());
        self.raster.present();
    }

    pub fn framebuffer(&self) -> &FrameBuffer {
        &self.framebuffer
    }

    pub fn raster(&self) -> &R {
        &self.raster
    }

    pub fn raster_mut(&mut self) -> &mut R {
        &mut self.raster
    }

    fn blit(
        &mut self,
        buffer: &[u8],
        format: PixelFormat,
        (source_width, source_height): (u32, u32),
    ) -> Result<(), RenderError> {
        let (width, height) = (self.framebuffer.width, self.framebuffer.height);

        if (source_width, source_height) != (width, height) {
            warn!(
                "frame is {source_width}x{source_height}, raster is {width}x{height}, rendering overlap"
            );
        }

        // saturates for sizes no buffer can hold
        let expected = (source_width as usize)
            .saturating_mul(source_height as usize)
            .saturating_mul(format.bytes_per_pixel());

        'rows: for y in 0..source_height.min(height) {
            for x in 0..source_width.min(width) {
                let index = (y as usize)
                    .saturating_mul(source_width as usize)
                    .saturating_add(x as usize);
                let Some(color) = format.pixel_at(buffer, index) else {
                    break 'rows;
                };
                self.raster.set_pixel(x, y, color.r, color.g, color.b);
                self.framebuffer.set(x, y, color);
            }
        }

        self.raster.present();

        if buffer.len() < expected {
            warn!("pixel buffer has {} of {expected} bytes", buffer.len());
            return Err(RenderError::Truncated {
                expected,
                actual: buffer.len(),
            });
        }

        Ok(())
    }
}

fn decode_guarded(
    decoder: &dyn Decoder,
    raw: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, RenderError> {
    match panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(raw, width, height))) {
        Ok(Ok(pixels)) if !pixels.is_empty() => Ok(pixels),
        Ok(Ok(_)) => {
            warn!("decoder returned no pixels");
            Err(RenderError::DecodeFailed)
        }
        Ok(Err(e)) => {
            warn!("decode failed: {e:#}");
            Err(RenderError::DecodeFailed)
        }
        Err(_) => {
            warn!("decoder panicked");
            Err(RenderError::DecodeFailed)
        }
    }
}
