/// JSON telemetry written to the serial console.
///
/// All messages are newline-delimited JSON (NDJSON), one per line, so a host
/// tailing the console can log readings without talking to the HTTP endpoint.
/// Uses `heapless` types for no_std/no-alloc operation.
use core::fmt::Write;
use core::net::Ipv4Addr;

use heapless::{String, Vec};
use serde::Serialize;

/// Dotted-quad IPv4 text ("255.255.255.255")
pub type AddressString = String<16>;

/// Messages sent from the device to the console
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Sensor reading taken by the display refresh
    #[serde(rename = "reading")]
    Reading {
        /// Concentration, or -1 when the poll failed
        ppm: i32,
        valid: bool,
        /// Uptime in milliseconds when sampled
        ts: u32,
    },
    /// Periodic device status report
    #[serde(rename = "status")]
    Status {
        /// "connecting", "online" or "offline"
        state: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<&'a str>,
        /// Uptime in seconds
        uptime: u32,
        dimmed: bool,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 192;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

/// Serialize a DeviceMessage as one NDJSON line.
/// Returns None if the message does not fit.
pub fn encode_message(msg: &DeviceMessage) -> Option<MsgBuffer> {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok()?;
    let len = serde_json_core::to_slice(msg, &mut buf).ok()?;
    if len >= MAX_MSG_LEN {
        return None;
    }
    buf[len] = b'\n';
    buf.truncate(len + 1);
    Some(buf)
}

/// Format an address for the status message and the display.
pub fn format_address(ip: Ipv4Addr) -> AddressString {
    let mut s = AddressString::new();
    let _ = write!(s, "{}", ip);
    s
}
