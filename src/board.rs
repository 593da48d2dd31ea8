/// Hardware description for supported boards.
///
/// Each board module defines pin assignments for the CO2 sensor UART and the
/// OLED I2C bus, selected at compile time via feature flags.

#[cfg(feature = "board-devkit")]
mod hw {
    pub const SENSOR_TX_PIN: u8 = 17; // to MH-Z19 RX
    pub const SENSOR_RX_PIN: u8 = 16; // from MH-Z19 TX
    pub const I2C_SDA_PIN: u8 = 21;
    pub const I2C_SCL_PIN: u8 = 22;
    pub const BOARD_NAME: &str = "esp32_devkitc";
}

#[cfg(feature = "board-xiao-c3")]
mod hw {
    pub const SENSOR_TX_PIN: u8 = 21; // D6
    pub const SENSOR_RX_PIN: u8 = 20; // D7
    pub const I2C_SDA_PIN: u8 = 6; // D4
    pub const I2C_SCL_PIN: u8 = 7; // D5
    pub const BOARD_NAME: &str = "xiao_esp32c3";
}

#[cfg(not(any(feature = "board-devkit", feature = "board-xiao-c3")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// MH-Z19 UART baud rate (8N1)
pub const SENSOR_BAUD: u32 = 9600;

/// SSD1306 I2C address
pub const DISPLAY_I2C_ADDR: u8 = 0x3C;

/// I2C bus frequency for the display
pub const DISPLAY_I2C_FREQ_KHZ: u32 = 400;

/// OLED panel geometry
pub const DISPLAY_WIDTH: u32 = 128;
pub const DISPLAY_HEIGHT: u32 = 32;

/// Glyph width of the small status font (5x8)
pub const DISPLAY_SMALL_GLYPH_WIDTH: u32 = 5;

/// HTTP listener port
pub const HTTP_PORT: u16 = 80;
