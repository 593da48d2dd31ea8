//! HTTP request routing for the two device endpoints.
//!
//! The firmware owns the socket; this module turns a raw request head into a
//! [`Response`] by calling back into the device through [`Endpoints`].
//!
//! | Path      | Parameters        | Body                          |
//! |-----------|-------------------|-------------------------------|
//! | `/co2`    | none              | ppm as decimal text, or `-1`  |
//! | `/screen` | `state` (integer) | HTML echo of `state`, or prompt |

use core::fmt::Write;

use heapless::{String, Vec};

use crate::scheduler::Clock;
use crate::sensor::Reading;

/// Maximum size of a response body
pub const MAX_BODY_LEN: usize = 256;

/// Longest request target we route; longer ones get 414
pub const MAX_TARGET_LEN: usize = 128;

/// Longest decoded query parameter value. Decoding never grows a value, so
/// any parameter of a routable target fits.
pub const MAX_PARAM_LEN: usize = MAX_TARGET_LEN;

/// Largest request head buffered; anything beyond is ignored
pub const MAX_HEAD_LEN: usize = 512;

pub type Body = String<MAX_BODY_LEN>;
pub type RequestHead = Vec<u8, MAX_HEAD_LEN>;
pub type ParamValue = String<MAX_PARAM_LEN>;

/// Device operations reachable over HTTP.
pub trait Endpoints {
    /// Poll the sensor once.
    fn concentration(&mut self) -> Reading;

    /// Dim or restore the display.
    fn set_dimmed(&mut self, dimmed: bool);
}

/// Network side of the request path.
pub trait RequestServer {
    /// Handle whatever requests are already waiting, then return.
    /// Must not block waiting for new clients.
    fn service(&mut self, endpoints: &mut dyn Endpoints);
}

/// Inbound side of one client connection.
pub trait ClientStream {
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    /// Returns 0 once the peer has closed its side.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadError<E> {
    /// The whole head did not arrive within the budget
    TimedOut,
    Stream(E),
}

/// Collect a request head: up to the blank line, EOF, or [`MAX_HEAD_LEN`]
/// bytes. The budget covers the whole head, not each read, so a client
/// trickling bytes cannot hold the caller for longer than `budget_ms`.
pub fn read_head<S: ClientStream>(
    stream: &mut S,
    clock: &impl Clock,
    budget_ms: u32,
) -> Result<RequestHead, HeadError<S::Error>> {
    let deadline = clock.now_ms() + budget_ms as u64;
    let mut head = RequestHead::new();
    let mut chunk = [0u8; 128];

    loop {
        let remaining = deadline.saturating_sub(clock.now_ms());
        if remaining == 0 {
            return Err(HeadError::TimedOut);
        }

        let n = stream
            .read(&mut chunk, remaining as u32)
            .map_err(HeadError::Stream)?;
        if n == 0 {
            break;
        }
        let room = MAX_HEAD_LEN - head.len();
        let _ = head.extend_from_slice(&chunk[..n.min(room)]);
        if head.is_full() || head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(head)
}

// ── Request parsing ────────────────────────────────────────────────────

/// Parsed HTTP request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
}

impl<'a> Request<'a> {
    /// Parse the request line from the start of a raw request head.
    /// Only the first line is inspected; headers are ignored.
    pub fn parse(head: &'a [u8]) -> Option<Self> {
        let end = head.iter().position(|&b| b == b'\r' || b == b'\n').unwrap_or(head.len());
        let line = core::str::from_utf8(&head[..end]).ok()?;

        let mut parts = line.split(' ').filter(|p| !p.is_empty());
        let method = parts.next()?;
        let target = parts.next()?;
        let version = parts.next()?;
        if !version.starts_with("HTTP/1.") || parts.next().is_some() {
            return None;
        }

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        Some(Self { method, path, query })
    }

    /// Decoded value of query parameter `name`, if present.
    pub fn param(&self, name: &str) -> Option<ParamValue> {
        self.query
            .split('&')
            .filter_map(|pair| match pair.split_once('=') {
                Some((k, v)) => Some((k, v)),
                None if !pair.is_empty() => Some((pair, "")),
                None => None,
            })
            .find(|(k, _)| *k == name)
            .map(|(_, v)| percent_decode(v))
    }
}

/// Decode `+` and `%XX` escapes. Malformed escapes are kept literally and
/// non-UTF-8 results are dropped byte-wise.
pub fn percent_decode(raw: &str) -> ParamValue {
    let mut bytes = heapless::Vec::<u8, MAX_PARAM_LEN>::new();
    let src = raw.as_bytes();
    let mut i = 0;
    while i < src.len() {
        let b = match src[i] {
            b'+' => b' ',
            b'%' => match (
                src.get(i + 1).copied().and_then(hex),
                src.get(i + 2).copied().and_then(hex),
            ) {
                (Some(hi), Some(lo)) => {
                    i += 2;
                    hi << 4 | lo
                }
                _ => b'%',
            },
            other => other,
        };
        if bytes.push(b).is_err() {
            break;
        }
        i += 1;
    }

    let mut out = ParamValue::new();
    match core::str::from_utf8(&bytes) {
        Ok(s) => {
            let _ = out.push_str(s);
        }
        Err(_) => {
            for &b in bytes.iter().filter(|b| b.is_ascii()) {
                let _ = out.push(b as char);
            }
        }
    }
    out
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Integer value of loosely formatted text, C `atol` style: leading
/// whitespace, optional sign, then as many digits as follow. Anything
/// unparseable is 0; out-of-range values clamp to `i32::MIN`/`i32::MAX`.
pub fn parse_int_lenient(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    if negative {
        value = -value;
    }
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

// ── Responses ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Body,
}

impl Response {
    fn new(status: u16, content_type: &'static str) -> Self {
        Self {
            status,
            content_type,
            body: Body::new(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            414 => "URI Too Long",
            _ => "Error",
        }
    }

    /// Status line and headers, terminated by the blank line.
    pub fn head(&self) -> String<160> {
        let mut head = String::new();
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        );
        head
    }

    pub fn bad_request() -> Self {
        let mut r = Self::new(400, "text/plain");
        let _ = r.body.push_str("Bad request");
        r
    }

    pub fn too_long() -> Self {
        let mut r = Self::new(414, "text/plain");
        let _ = r.body.push_str("URI too long");
        r
    }
}

// ── Handlers ───────────────────────────────────────────────────────────

/// `/co2`: one sensor poll, body is the ppm value (or the -1 sentinel).
pub fn handle_co2(endpoints: &mut dyn Endpoints) -> Response {
    let reading = endpoints.concentration();
    log::info!("Requested CO2 concentration: {} ppm", reading.ppm);

    let mut r = Response::new(200, "text/html");
    let _ = write!(r.body, "{}", reading.ppm);
    r
}

/// `/screen?state=N`: dim the display for 0, restore it otherwise.
pub fn handle_screen(state: Option<&str>, endpoints: &mut dyn Endpoints) -> Response {
    let mut r = Response::new(200, "text/html");
    let _ = r
        .body
        .push_str("<html><head><title>Screens toggle</title></head><body>");

    match state.filter(|s| !s.is_empty()) {
        None => {
            let _ = r.body.push_str("Please provide a state</br>");
        }
        Some(state) => {
            let _ = write!(r.body, "state = {}</br>", state);
            let dimmed = parse_int_lenient(state) == 0;
            log::info!("Display {} by request", if dimmed { "dimmed" } else { "restored" });
            endpoints.set_dimmed(dimmed);
        }
    }

    let _ = r.body.push_str("</body></html>");
    r
}

/// Dispatch one request head to its handler.
pub fn route(head: &[u8], endpoints: &mut dyn Endpoints) -> Response {
    let Some(request) = Request::parse(head) else {
        return Response::bad_request();
    };
    log::debug!("{} {}?{}", request.method, request.path, request.query);

    if request.path.len() + request.query.len() > MAX_TARGET_LEN {
        return Response::too_long();
    }

    match request.path {
        "/co2" => handle_co2(endpoints),
        "/screen" => {
            let state = request.param("state");
            handle_screen(state.as_deref(), endpoints)
        }
        other => {
            let mut r = Response::new(404, "text/plain");
            let _ = write!(r.body, "Not found: {}", other);
            r
        }
    }
}
