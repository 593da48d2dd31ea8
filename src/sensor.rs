//! MH-Z19 NDIR CO2 sensor wire protocol.
//!
//! The sensor speaks fixed 9-byte frames over a 9600 baud UART. The host sends
//! the "read gas concentration" command and the sensor answers with
//!
//! ```text
//! FF 86 <ppm hi> <ppm lo> <4 reserved> <checksum>
//! ```
//!
//! where the checksum is the two's complement of the sum of bytes 1..=7.
//! The UART can drift out of frame alignment, so each poll discards stray
//! bytes until the `0xFF` start marker before reading a full frame.

use core::fmt;

/// Length of every request and response frame
pub const FRAME_LEN: usize = 9;

/// Frame start marker
pub const START_BYTE: u8 = 0xFF;

/// Command byte for "read CO2 concentration", echoed at offset 1 of the response
pub const CMD_READ_CO2: u8 = 0x86;

/// "Read CO2 concentration" request
pub const REQUEST_FRAME: [u8; FRAME_LEN] = [0xFF, 0x01, 0x86, 0x00, 0x00, 0x00, 0x00, 0x00, 0x79];

/// Default read window for a full response frame
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Default cap on bytes discarded while hunting for the start marker
pub const DEFAULT_MAX_RESYNC_BYTES: usize = 64;

pub type Frame = [u8; FRAME_LEN];

/// Byte-oriented serial link to the sensor.
pub trait SensorLink {
    type Error: fmt::Debug;

    /// Write the whole buffer to the link.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms` for data.
    /// Returns the number of bytes read; 0 means the link stayed quiet.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}

/// Why a poll produced no concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// Byte 1 of the response was not the echoed command
    InvalidHeader(u8),
    /// Computed checksum differs from byte 8
    ChecksumMismatch { expected: u8, received: u8 },
    /// Fewer than 9 frame bytes arrived (or no start marker was found)
    LinkTimeout { received: usize },
    /// The link driver reported an I/O failure
    Link,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::InvalidHeader(byte) => write!(f, "invalid response header 0x{:02X}", byte),
            ReadError::ChecksumMismatch { expected, received } => write!(
                f,
                "checksum mismatch (expected 0x{:02X}, got 0x{:02X})",
                expected, received
            ),
            ReadError::LinkTimeout { received } => {
                write!(f, "link timeout after {} of {} bytes", received, FRAME_LEN)
            }
            ReadError::Link => f.write_str("serial link error"),
        }
    }
}

/// One concentration sample.
///
/// `valid == true` implies the frame passed header and checksum validation
/// and `ppm` is the decoded 16-bit value. Invalid readings carry the `-1`
/// sentinel that the display and HTTP endpoint show verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub ppm: i32,
    pub valid: bool,
}

impl Reading {
    pub const UNAVAILABLE: Reading = Reading { ppm: -1, valid: false };

    pub const fn from_ppm(ppm: u16) -> Self {
        Self {
            ppm: ppm as i32,
            valid: true,
        }
    }
}

impl From<Result<u16, ReadError>> for Reading {
    fn from(result: Result<u16, ReadError>) -> Self {
        match result {
            Ok(ppm) => Reading::from_ppm(ppm),
            Err(_) => Reading::UNAVAILABLE,
        }
    }
}

/// The fixed request frame.
pub const fn build_request() -> Frame {
    REQUEST_FRAME
}

/// Checksum over bytes 1..=7: `255 - sum + 1` (mod 256).
pub fn checksum(frame: &Frame) -> u8 {
    let sum = frame[1..8].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0xFFu8.wrapping_sub(sum).wrapping_add(1)
}

/// Validate a response frame and decode the concentration.
pub fn decode_response(frame: &Frame) -> Result<u16, ReadError> {
    if frame[1] != CMD_READ_CO2 {
        return Err(ReadError::InvalidHeader(frame[1]));
    }

    let expected = checksum(frame);
    if frame[8] != expected {
        return Err(ReadError::ChecksumMismatch {
            expected,
            received: frame[8],
        });
    }

    Ok(u16::from_be_bytes([frame[2], frame[3]]))
}

/// Sensor driver: owns the link and runs one request/response exchange per poll.
pub struct Sensor<L> {
    link: L,
    timeout_ms: u32,
    max_resync_bytes: usize,
}

impl<L: SensorLink> Sensor<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_resync_bytes(mut self, max: usize) -> Self {
        self.max_resync_bytes = max;
        self
    }

    /// Poll the sensor, folding every failure into [`Reading::UNAVAILABLE`].
    pub fn poll(&mut self) -> Reading {
        match self.read_ppm() {
            Ok(ppm) => Reading::from_ppm(ppm),
            Err(e) => {
                log::warn!("CO2 sensor read failed: {}", e);
                Reading::UNAVAILABLE
            }
        }
    }

    /// Send the read command and decode the response.
    pub fn read_ppm(&mut self) -> Result<u16, ReadError> {
        self.link.write_all(&REQUEST_FRAME).map_err(|e| {
            log::debug!("sensor write failed: {:?}", e);
            ReadError::Link
        })?;

        let frame = self.read_frame()?;
        decode_response(&frame)
    }

    /// Resynchronize on the start marker, then read the rest of the frame.
    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        let mut frame = [0u8; FRAME_LEN];

        let mut discarded = 0usize;
        loop {
            let mut byte = [0u8; 1];
            if self.read_some(&mut byte)? == 0 {
                return Err(ReadError::LinkTimeout { received: 0 });
            }
            if byte[0] == START_BYTE {
                frame[0] = START_BYTE;
                break;
            }
            discarded += 1;
            if discarded >= self.max_resync_bytes {
                log::warn!("no frame start after {} bytes", discarded);
                return Err(ReadError::LinkTimeout { received: 0 });
            }
        }
        if discarded > 0 {
            log::debug!("resync discarded {} bytes", discarded);
        }

        let mut filled = 1;
        while filled < FRAME_LEN {
            let n = self.read_some(&mut frame[filled..])?;
            if n == 0 {
                return Err(ReadError::LinkTimeout { received: filled });
            }
            filled += n;
        }

        Ok(frame)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        self.link.read(buf, self.timeout_ms).map_err(|e| {
            log::debug!("sensor read failed: {:?}", e);
            ReadError::Link
        })
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn release(self) -> L {
        self.link
    }
}
