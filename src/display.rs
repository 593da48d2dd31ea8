//! Display content for the 128x32 OLED.
//!
//! The library decides *what* is on screen; the firmware's `DisplaySink`
//! implementation decides how the lines become pixels.

use core::fmt::Write;
use core::net::Ipv4Addr;

use heapless::{String, Vec};

use crate::board;
use crate::sensor::Reading;

/// Characters per small-font row
pub const LINE_CHARS: usize = (board::DISPLAY_WIDTH / board::DISPLAY_SMALL_GLYPH_WIDTH) as usize;

/// Room left for progress dots after "Connecting"
const MAX_DOTS: usize = LINE_CHARS - "Connecting".len();

pub type LineText = String<32>;

/// Something the device can show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screen {
    /// Association in progress; one dot per failed status poll
    Connecting { attempts: u32 },
    /// Associated, with the address the device answers on
    Connected { address: Option<Ipv4Addr> },
    /// Association gave up, continuing without network
    Offline,
    /// Steady-state reading
    Concentration(Reading),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSize {
    Small,
    Large,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: LineText,
    pub size: TextSize,
}

impl Line {
    fn small(args: core::fmt::Arguments<'_>) -> Self {
        let mut text = LineText::new();
        let _ = text.write_fmt(args);
        Self {
            text,
            size: TextSize::Small,
        }
    }

    fn large(args: core::fmt::Arguments<'_>) -> Self {
        let mut line = Self::small(args);
        line.size = TextSize::Large;
        line
    }
}

impl Screen {
    /// Text lines top to bottom.
    pub fn lines(&self) -> Vec<Line, 4> {
        let mut lines = Vec::new();
        match self {
            Screen::Connecting { attempts } => {
                let mut line = Line::small(format_args!("Connecting"));
                for _ in 0..(*attempts as usize).min(MAX_DOTS) {
                    let _ = line.text.push('.');
                }
                let _ = lines.push(line);
            }
            Screen::Connected { address } => {
                let _ = lines.push(Line::small(format_args!("Connected")));
                let _ = lines.push(Line::small(format_args!("IP address:")));
                match address {
                    Some(ip) => {
                        let _ = lines.push(Line::small(format_args!("{}", ip)));
                    }
                    None => {
                        let _ = lines.push(Line::small(format_args!("-")));
                    }
                }
                let _ = lines.push(Line::small(format_args!("Starting up...")));
            }
            Screen::Offline => {
                let _ = lines.push(Line::small(format_args!("Could not connect")));
                let _ = lines.push(Line::small(format_args!("Continuing offline")));
                let _ = lines.push(Line::small(format_args!("Starting up...")));
            }
            Screen::Concentration(reading) => {
                // The sentinel is shown as-is so a failed poll reads "-1 ppm"
                let _ = lines.push(Line::large(format_args!("{} ppm", reading.ppm)));
            }
        }
        lines
    }
}

/// Output device for [`Screen`]s.
pub trait DisplaySink {
    /// Replace the whole screen.
    fn show(&mut self, screen: &Screen);

    /// Lower (true) or restore (false) panel brightness.
    fn set_dimmed(&mut self, dimmed: bool);

    /// Start or stop scrolling the current screen sideways. Boot keeps the
    /// status banner moving while the sensor warms up.
    fn set_scrolling(&mut self, scrolling: bool);
}
