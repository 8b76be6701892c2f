//! Simulated addressable light strip.
//!
//! Colour and brightness are staged; `flush` renders every pixel as
//! `channel * brightness / 255` and keeps the last rendered frame.

use parking_lot::Mutex;
use tracing::debug;

use smartlight_core::{HalError, LightingDriver, Rgb};

#[derive(Debug, Clone)]
struct Staged {
    color: Rgb,
    brightness: u8,
}

pub struct SimLightStrip {
    len: usize,
    staged: Mutex<Staged>,
    frame: Mutex<Vec<Rgb>>,
}

impl SimLightStrip {
    pub fn new(len: u16) -> Self {
        let len = usize::from(len);
        Self {
            len,
            staged: Mutex::new(Staged {
                color: Rgb::default(),
                brightness: u8::MAX,
            }),
            frame: Mutex::new(vec![Rgb::default(); len]),
        }
    }

    /// Last flushed pixels.
    pub fn frame(&self) -> Vec<Rgb> {
        self.frame.lock().clone()
    }
}

fn scale(channel: u8, brightness: u8) -> u8 {
    let scaled = u16::from(channel) * u16::from(brightness) / 255;
    u8::try_from(scaled).unwrap_or(u8::MAX)
}

impl LightingDriver for SimLightStrip {
    fn set_color(&self, color: Rgb) -> Result<(), HalError> {
        self.staged.lock().color = color;
        Ok(())
    }

    fn set_brightness(&self, level: u8) -> Result<(), HalError> {
        self.staged.lock().brightness = level;
        Ok(())
    }

    fn clear(&self) -> Result<(), HalError> {
        self.staged.lock().color = Rgb::default();
        Ok(())
    }

    fn flush(&self) -> Result<(), HalError> {
        let Staged { color, brightness } = self.staged.lock().clone();
        let pixel = Rgb {
            r: scale(color.r, brightness),
            g: scale(color.g, brightness),
            b: scale(color.b, brightness),
        };
        *self.frame.lock() = vec![pixel; self.len];
        debug!(r = pixel.r, g = pixel.g, b = pixel.b, pixels = self.len, "light strip flushed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn changes_are_invisible_until_flush() {
        let strip = SimLightStrip::new(7);
        strip.set_color(Rgb { r: 255, g: 0, b: 0 }).unwrap();
        assert_eq!(strip.frame(), vec![Rgb::default(); 7]);

        strip.flush().unwrap();
        assert_eq!(strip.frame(), vec![Rgb { r: 255, g: 0, b: 0 }; 7]);
    }

    #[test]
    fn brightness_scales_channels() {
        let strip = SimLightStrip::new(3);
        strip.set_color(Rgb { r: 200, g: 100, b: 255 }).unwrap();
        strip.set_brightness(128).unwrap();
        strip.flush().unwrap();
        assert_eq!(strip.frame()[0], Rgb { r: 100, g: 50, b: 128 });
    }

    #[test]
    fn clear_keeps_brightness() {
        let strip = SimLightStrip::new(2);
        strip.set_brightness(10).unwrap();
        strip.set_color(Rgb { r: 9, g: 9, b: 9 }).unwrap();
        strip.clear().unwrap();
        strip.flush().unwrap();
        assert_eq!(strip.frame(), vec![Rgb::default(); 2]);
    }

    #[test]
    fn scale_bounds() {
        assert_eq!(scale(255, 255), 255);
        assert_eq!(scale(255, 0), 0);
        assert_eq!(scale(0, 255), 0);
    }
}
