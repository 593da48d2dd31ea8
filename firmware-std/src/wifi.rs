//! Station-mode Wi-Fi behind the [`Network`] trait.
//!
//! `connect` only kicks off association; the connectivity monitor polls
//! `is_connected` until the interface is up or it gives up.

use std::net::Ipv4Addr;

use co2mon::connectivity::Network;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

pub struct WifiNetwork {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl WifiNetwork {
    pub fn new(
        mut wifi: BlockingWifi<EspWifi<'static>>,
        ssid: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        let config = ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| anyhow::anyhow!("SSID too long: {}", ssid))?,
            password: password
                .try_into()
                .map_err(|_| anyhow::anyhow!("Wi-Fi password too long"))?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        wifi.set_configuration(&Configuration::Client(config))?;
        wifi.start()?;
        log::info!("Wi-Fi started, SSID {:?}", ssid);
        Ok(Self { wifi })
    }
}

impl Network for WifiNetwork {
    type Error = EspError;

    fn connect(&mut self) -> Result<(), Self::Error> {
        self.wifi.wifi_mut().connect()
    }

    fn is_connected(&mut self) -> Result<bool, Self::Error> {
        self.wifi.wifi().is_up()
    }

    fn address(&mut self) -> Option<Ipv4Addr> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }
}
