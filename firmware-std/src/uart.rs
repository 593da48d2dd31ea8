//! MH-Z19 serial link on an ESP-IDF UART.

use co2mon::sensor::SensorLink;
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::uart::UartDriver;
use esp_idf_svc::sys::EspError;

pub struct UartLink<'d> {
    uart: UartDriver<'d>,
}

impl<'d> UartLink<'d> {
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self { uart }
    }
}

impl SensorLink for UartLink<'_> {
    type Error = EspError;

    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.uart.write(rest)?;
            rest = &rest[n..];
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.uart
            .read(buf, TickType::new_millis(timeout_ms as u64).ticks())
    }
}
