//! Minimal HTTP/1.1 front end for the `/co2` and `/screen` endpoints.
//!
//! The listener is non-blocking so [`RequestServer::service`] returns at once
//! when nobody is waiting. An accepted client is handled to completion with
//! blocking I/O; collecting its request head is bounded by [`CLIENT_TIMEOUT_MS`]
//! in total, however slowly the bytes trickle in.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use co2mon::comm::{read_head, route, ClientStream, Endpoints, HeadError, RequestServer};
use co2mon::scheduler::Clock;

const CLIENT_TIMEOUT_MS: u32 = 2000;

pub struct HttpServer {
    listener: TcpListener,
}

impl HttpServer {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        log::info!("HTTP server listening on port {}", port);
        Ok(Self { listener })
    }

    fn respond(&self, stream: TcpStream, endpoints: &mut dyn Endpoints) -> io::Result<()> {
        let accepted = AcceptClock(Instant::now());
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(Duration::from_millis(CLIENT_TIMEOUT_MS as u64)))?;

        let mut client = Client(stream);
        let head = read_head(&mut client, &accepted, CLIENT_TIMEOUT_MS).map_err(|e| match e {
            HeadError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, "request head too slow"),
            HeadError::Stream(e) => e,
        })?;
        let response = route(&head, endpoints);
        log::debug!("-> {} ({} bytes)", response.status, response.body.len());

        let Client(mut stream) = client;
        stream.write_all(response.head().as_bytes())?;
        stream.write_all(response.body.as_bytes())?;
        stream.flush()
    }
}

impl RequestServer for HttpServer {
    fn service(&mut self, endpoints: &mut dyn Endpoints) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("HTTP client {}", peer);
                if let Err(e) = self.respond(stream, endpoints) {
                    log::warn!("HTTP client {} failed: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("HTTP accept failed: {}", e),
        }
    }
}

/// Milliseconds since the client was accepted.
struct AcceptClock(Instant);

impl Clock for AcceptClock {
    fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

struct Client(TcpStream);

impl ClientStream for Client {
    type Error = io::Error;

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.0
            .set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1) as u64)))?;
        self.0.read(buf)
    }
}
