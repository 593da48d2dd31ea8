//! Host-side fakes for the hardware traits, shared by the module tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::comm::{route, Endpoints, RequestServer, Response};
use crate::connectivity::Network;
use crate::display::{DisplaySink, Screen};
use crate::scheduler::Clock;
use crate::sensor::{checksum, Frame, SensorLink, START_BYTE};

/// A valid response frame for `ppm`.
pub fn response(ppm: u16) -> Frame {
    let [hi, lo] = ppm.to_be_bytes();
    let mut frame = [START_BYTE, 0x86, hi, lo, 0x00, 0x00, 0x00, 0x00, 0x00];
    frame[8] = checksum(&frame);
    frame
}

// ── Serial link ────────────────────────────────────────────────────────

/// Serial link fed from a byte queue. Each write can queue the next reply.
pub struct ScriptedLink {
    pub rx: VecDeque<u8>,
    pub written: Vec<u8>,
    /// Replies queued one per write, in order
    pub replies: VecDeque<Vec<u8>>,
    /// Reply used once `replies` runs out
    pub default_reply: Option<Vec<u8>>,
    /// Largest chunk returned by one read
    pub chunk: usize,
    pub fail_writes: bool,
}

impl ScriptedLink {
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.iter().copied().collect(),
            written: Vec::new(),
            replies: VecDeque::new(),
            default_reply: None,
            chunk: usize::MAX,
            fail_writes: false,
        }
    }

    pub fn replying(ppm: u16) -> Self {
        let mut link = Self::with_bytes(&[]);
        link.default_reply = Some(response(ppm).to_vec());
        link
    }

    pub fn then(mut self, reply: &[u8]) -> Self {
        self.replies.push_back(reply.to_vec());
        self
    }

    /// Number of request frames written so far
    pub fn polls(&self) -> usize {
        self.written.len() / crate::sensor::FRAME_LEN
    }
}

impl SensorLink for ScriptedLink {
    type Error = &'static str;

    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err("write failed");
        }
        self.written.extend_from_slice(data);
        if let Some(reply) = self.replies.pop_front().or_else(|| self.default_reply.clone()) {
            self.rx.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.chunk).min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }
}

// ── Time ───────────────────────────────────────────────────────────────

/// Monotonic clock that only moves when a test (or its delay) moves it.
#[derive(Clone)]
pub struct ManualClock {
    nanos: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            nanos: Rc::new(Cell::new(0)),
        }
    }

    pub fn now(&self) -> u64 {
        self.nanos.get() / 1_000_000
    }

    pub fn advance(&self, ms: u64) {
        self.nanos.set(self.nanos.get() + ms * 1_000_000);
    }

    /// A delay that advances this clock instead of sleeping.
    pub fn delay(&self) -> ManualDelay {
        ManualDelay {
            nanos: self.nanos.clone(),
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now()
    }
}

pub struct ManualDelay {
    nanos: Rc<Cell<u64>>,
}

impl DelayNs for ManualDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.nanos.set(self.nanos.get() + ns as u64);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.nanos.set(self.nanos.get() + ms as u64 * 1_000_000);
    }
}

// ── Network ────────────────────────────────────────────────────────────

pub struct FakeNetwork {
    /// Status polls left before the link reports up; None stays down forever
    pub down_polls: Option<u32>,
    pub connect_calls: usize,
    pub status_fails: bool,
    pub ip: Ipv4Addr,
}

impl FakeNetwork {
    pub fn up_after(polls: u32) -> Self {
        Self {
            down_polls: Some(polls),
            connect_calls: 0,
            status_fails: false,
            ip: Ipv4Addr::new(192, 168, 1, 20),
        }
    }

    pub fn never_up() -> Self {
        Self {
            down_polls: None,
            ..Self::up_after(0)
        }
    }
}

impl Network for FakeNetwork {
    type Error = &'static str;

    fn connect(&mut self) -> Result<(), Self::Error> {
        self.connect_calls += 1;
        Ok(())
    }

    fn is_connected(&mut self) -> Result<bool, Self::Error> {
        if self.status_fails {
            return Err("status unavailable");
        }
        match self.down_polls {
            None => Ok(false),
            Some(0) => Ok(true),
            Some(n) => {
                self.down_polls = Some(n - 1);
                Ok(false)
            }
        }
    }

    fn address(&mut self) -> Option<Ipv4Addr> {
        (self.down_polls == Some(0)).then_some(self.ip)
    }
}

// ── Display ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingDisplay {
    pub screens: Vec<Screen>,
    pub dimmed: Vec<bool>,
    /// Scroll changes, with the number of screens shown at the time
    pub scrolling: Vec<(bool, usize)>,
}

impl RecordingDisplay {
    pub fn last(&self) -> Option<&Screen> {
        self.screens.last()
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&mut self, screen: &Screen) {
        self.screens.push(*screen);
    }

    fn set_dimmed(&mut self, dimmed: bool) {
        self.dimmed.push(dimmed);
    }

    fn set_scrolling(&mut self, scrolling: bool) {
        self.scrolling.push((scrolling, self.screens.len()));
    }
}

// ── Request server ─────────────────────────────────────────────────────

/// Request server with a queue of raw request heads.
#[derive(Default)]
pub struct QueuedServer {
    pub pending: VecDeque<Vec<u8>>,
    pub responses: Vec<Response>,
    pub service_calls: usize,
}

impl QueuedServer {
    pub fn get(&mut self, target: &str) {
        let head = std::format!("GET {} HTTP/1.1\r\nHost: co2\r\n\r\n", target);
        self.pending.push_back(head.into_bytes());
    }
}

impl RequestServer for QueuedServer {
    fn service(&mut self, endpoints: &mut dyn Endpoints) {
        self.service_calls += 1;
        while let Some(head) = self.pending.pop_front() {
            self.responses.push(route(&head, endpoints));
        }
    }
}
