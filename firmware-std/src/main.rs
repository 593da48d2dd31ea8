//! CO2 monitor: ESP-IDF std firmware
//!
//! Wires the MH-Z19 UART, the SSD1306 OLED, station-mode Wi-Fi and a
//! non-blocking HTTP listener into the portable scheduler, then hands the
//! main thread to it for good.
//!
//! Wi-Fi credentials come from the `WIFI_SSID` and `WIFI_PASSWORD`
//! environment variables at build time.

mod display;
mod server;
mod uart;
mod wifi;

use std::cell::RefCell;
use std::time::Instant;

use co2mon::board;
use co2mon::config::Config;
use co2mon::protocol::VERSION;
use co2mon::scheduler::{Clock, Scheduler};

use embedded_hal_bus::i2c::RefCellDevice;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};

use display::OledDisplay;
use server::HttpServer;
use uart::UartLink;
use wifi::WifiNetwork;

#[cfg(not(any(feature = "devkit", feature = "xiao-c3")))]
compile_error!("select a board feature: `devkit` or `xiao-c3`");
#[cfg(all(feature = "devkit", feature = "xiao-c3"))]
compile_error!("`devkit` and `xiao-c3` are mutually exclusive");

const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};

/// Milliseconds since boot.
struct BootClock(Instant);

impl Clock for BootClock {
    fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();
    let clock = BootClock(Instant::now());

    log::info!("Bringing up {} peripherals (firmware v{})", board::BOARD_NAME, VERSION);

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let pins = peripherals.pins;

    #[cfg(feature = "devkit")]
    let (sensor_tx, sensor_rx, sda, scl) = (pins.gpio17, pins.gpio16, pins.gpio21, pins.gpio22);
    #[cfg(feature = "xiao-c3")]
    let (sensor_tx, sensor_rx, sda, scl) = (pins.gpio21, pins.gpio20, pins.gpio6, pins.gpio7);

    log::info!(
        "Sensor UART tx={} rx={}, OLED sda={} scl={}",
        board::SENSOR_TX_PIN,
        board::SENSOR_RX_PIN,
        board::I2C_SDA_PIN,
        board::I2C_SCL_PIN
    );

    // ── Sensor ───────────────────────────────────────────────────────

    let uart_config = uart::config::Config::default().baudrate(Hertz(board::SENSOR_BAUD));
    let sensor_uart = UartDriver::new(
        peripherals.uart1,
        sensor_tx,
        sensor_rx,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    let link = UartLink::new(sensor_uart);

    // ── Display ──────────────────────────────────────────────────────

    let i2c_config = I2cConfig::new().baudrate(board::DISPLAY_I2C_FREQ_KHZ.kHz().into());
    let i2c = RefCell::new(I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)?);
    let display = OledDisplay::new(RefCellDevice::new(&i2c), RefCellDevice::new(&i2c))?;

    // ── Wi-Fi + HTTP ─────────────────────────────────────────────────

    if WIFI_SSID.is_empty() {
        log::warn!("WIFI_SSID was not set at build time; association will fail");
    }
    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    let network = WifiNetwork::new(wifi, WIFI_SSID, WIFI_PASSWORD)?;
    let mut server = HttpServer::bind(board::HTTP_PORT)?;

    // ── Scheduler ────────────────────────────────────────────────────

    let mut device = Scheduler::new(Config::default(), link, network, display, clock, FreeRtos);
    let boot = device.boot();
    log::info!(
        "Boot finished: {} after {} warm-up polls, first reading {} ppm",
        boot.link.as_str(),
        boot.warmup_polls,
        boot.first_reading.ppm
    );

    device.run(&mut server)
}
