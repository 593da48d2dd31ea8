//! SSD1306 128x32 OLED over I2C.
//!
//! Drawing goes through the `ssd1306` driver. Hardware scrolling has no
//! driver API, so those commands go straight onto the bus through a second
//! handle on the same I2C peripheral.

use co2mon::board;
use co2mon::display::{DisplaySink, Screen, TextSize};
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_5X8},
        MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use embedded_hal::i2c::I2c;
use ssd1306::{mode::BufferedGraphicsMode, prelude::*, Ssd1306};

type Panel<I> = Ssd1306<I2CInterface<I>, DisplaySize128x32, BufferedGraphicsMode<DisplaySize128x32>>;

const SMALL_ROW_H: i32 = 8;
const LARGE_ROW_H: i32 = 20;

// Row width in `co2mon::display` assumes this font
const _: () = assert!(FONT_5X8.character_size.width == board::DISPLAY_SMALL_GLYPH_WIDTH);

/// Control byte announcing a command stream
const CMD_STREAM: u8 = 0x00;

/// Continuous left scroll over pages 0..=7, one step per 2 frames
const SCROLL_LEFT_ALL: [u8; 8] = [CMD_STREAM, 0x27, 0x00, 0x00, 0x00, 0x07, 0x00, 0xFF];
const SCROLL_ON: [u8; 2] = [CMD_STREAM, 0x2F];
const SCROLL_OFF: [u8; 2] = [CMD_STREAM, 0x2E];

pub struct OledDisplay<I> {
    panel: Panel<I>,
    /// Raw command channel to the same panel
    control: I,
    scrolling: bool,
}

impl<I: I2c> OledDisplay<I> {
    /// `draw` and `control` are two handles on the panel's I2C bus.
    pub fn new(draw: I, control: I) -> anyhow::Result<Self> {
        let interface = I2CInterface::new(draw, board::DISPLAY_I2C_ADDR, 0x40);
        let mut panel = Ssd1306::new(interface, DisplaySize128x32, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        panel
            .init()
            .map_err(|e| anyhow::anyhow!("display init failed: {:?}", e))?;
        panel.clear_buffer();
        let _ = panel.flush();
        log::info!(
            "Display ready ({}x{} at 0x{:02X})",
            board::DISPLAY_WIDTH,
            board::DISPLAY_HEIGHT,
            board::DISPLAY_I2C_ADDR
        );
        Ok(Self {
            panel,
            control,
            scrolling: false,
        })
    }

    fn command(&mut self, bytes: &[u8]) -> Result<(), I::Error> {
        self.control.write(board::DISPLAY_I2C_ADDR, bytes)
    }
}

impl<I: I2c> DisplaySink for OledDisplay<I> {
    fn show(&mut self, screen: &Screen) {
        self.panel.clear_buffer();

        let lines = screen.lines();
        let large = lines.iter().any(|l| l.size == TextSize::Large);
        // Center the single large line vertically
        let mut y = if large {
            (board::DISPLAY_HEIGHT as i32 - LARGE_ROW_H) / 2
        } else {
            0
        };

        for line in lines.iter() {
            let (style, height) = match line.size {
                TextSize::Small => (MonoTextStyle::new(&FONT_5X8, BinaryColor::On), SMALL_ROW_H),
                TextSize::Large => (MonoTextStyle::new(&FONT_10X20, BinaryColor::On), LARGE_ROW_H),
            };
            let _ = Text::with_baseline(line.text.as_str(), Point::new(0, y), style, Baseline::Top)
                .draw(&mut self.panel);
            y += height;
        }

        if let Err(e) = self.panel.flush() {
            log::warn!("Display flush failed: {:?}", e);
        }
    }

    fn set_dimmed(&mut self, dimmed: bool) {
        let level = if dimmed {
            Brightness::DIMMEST
        } else {
            Brightness::NORMAL
        };
        if let Err(e) = self.panel.set_brightness(level) {
            log::warn!("Display brightness change failed: {:?}", e);
        }
    }

    fn set_scrolling(&mut self, scrolling: bool) {
        if scrolling == self.scrolling {
            return;
        }
        let result = if scrolling {
            // Setup is only accepted while scrolling is off
            self.command(&SCROLL_OFF)
                .and_then(|_| self.command(&SCROLL_LEFT_ALL))
                .and_then(|_| self.command(&SCROLL_ON))
        } else {
            self.command(&SCROLL_OFF)
        };
        match result {
            Ok(()) => self.scrolling = scrolling,
            Err(e) => log::warn!("Display scroll change failed: {:?}", e),
        }
    }
}
