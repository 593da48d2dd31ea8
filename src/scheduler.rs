//! Cooperative scheduler: the device's only thread of control.
//!
//! Three run-to-completion tasks share one execution context, each with its
//! own deadline against a monotonic clock:
//!
//! - **tick** (500 ms): connectivity check, then request servicing while online
//! - **refresh** (10 s): one sensor poll pushed to the display and telemetry
//! - **status** (30 s): status telemetry line
//!
//! [`Scheduler::run`] polls whatever is due and then sleeps until the earliest
//! deadline. Sensor reads, association waits and that sleep all block; nothing
//! else runs while they do.

use core::net::Ipv4Addr;

use embedded_hal::delay::DelayNs;

use crate::board;
use crate::comm::{Endpoints, RequestServer};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, LinkState, Network};
use crate::display::{DisplaySink, Screen};
use crate::protocol::{encode_message, format_address, DeviceMessage, VERSION};
use crate::sensor::{Reading, Sensor, SensorLink};

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// A periodic deadline: due once `period` has elapsed since the last restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    period_ms: u64,
    last_ms: u64,
}

impl Interval {
    pub const fn new(period_ms: u32, now_ms: u64) -> Self {
        Self {
            period_ms: period_ms as u64,
            last_ms: now_ms,
        }
    }

    pub fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ms)
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.elapsed(now_ms) >= self.period_ms
    }

    /// Time left until due; 0 when already due.
    pub fn remaining(&self, now_ms: u64) -> u64 {
        self.period_ms.saturating_sub(self.elapsed(now_ms))
    }

    pub fn restart(&mut self, now_ms: u64) {
        self.last_ms = now_ms;
    }

    pub fn last(&self) -> u64 {
        self.last_ms
    }
}

/// Everything the device remembers between ticks.
pub struct DeviceState {
    pub connectivity: ConnectivityMonitor,
    pub tick: Interval,
    /// Last display refresh
    pub refresh: Interval,
    pub status: Interval,
    pub address: Option<Ipv4Addr>,
    pub dimmed: bool,
}

impl DeviceState {
    fn new(config: &Config, now_ms: u64) -> Self {
        Self {
            connectivity: ConnectivityMonitor::new(config),
            tick: Interval::new(config.tick_period_ms, now_ms),
            refresh: Interval::new(config.refresh_interval_ms, now_ms),
            status: Interval::new(config.status_interval_ms, now_ms),
            address: None,
            dimmed: false,
        }
    }

    fn restart_timers(&mut self, now_ms: u64) {
        self.tick.restart(now_ms);
        self.refresh.restart(now_ms);
        self.status.restart(now_ms);
    }
}

/// What [`Scheduler::boot`] ended up with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootReport {
    pub link: LinkState,
    pub address: Option<Ipv4Addr>,
    pub warmup_polls: u32,
    pub first_reading: Reading,
}

/// Which tasks ran during one [`Scheduler::poll`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub ticked: bool,
    pub reconnect_checked: bool,
    pub serviced: bool,
    pub refreshed: bool,
    pub status_sent: bool,
}

pub struct Scheduler<L, N, D, C, W> {
    config: Config,
    sensor: Sensor<L>,
    network: N,
    display: D,
    clock: C,
    delay: W,
    state: DeviceState,
}

impl<L, N, D, C, W> Scheduler<L, N, D, C, W>
where
    L: SensorLink,
    N: Network,
    D: DisplaySink,
    C: Clock,
    W: DelayNs,
{
    pub fn new(config: Config, link: L, network: N, display: D, clock: C, delay: W) -> Self {
        let sensor = Sensor::new(link)
            .with_timeout_ms(config.sensor_timeout_ms)
            .with_max_resync_bytes(config.max_resync_bytes);
        let state = DeviceState::new(&config, clock.now_ms());
        Self {
            config,
            sensor,
            network,
            display,
            clock,
            delay,
            state,
        }
    }

    /// Associate, warm the sensor up and paint the first reading.
    pub fn boot(&mut self) -> BootReport {
        log::info!("co2mon v{} starting on {}", VERSION, board::BOARD_NAME);

        self.display.show(&Screen::Connecting { attempts: 0 });
        let display = &mut self.display;
        let link = self.state.connectivity.associate(&mut self.network, &mut self.delay, |attempts| {
            display.show(&Screen::Connecting { attempts })
        });

        if link == LinkState::Online {
            self.state.address = self.network.address();
            match self.state.address {
                Some(ip) => log::info!("Connected, address {}", ip),
                None => log::info!("Connected, no address yet"),
            }
            self.display.show(&Screen::Connected {
                address: self.state.address,
            });
        } else {
            log::warn!("Could not connect, continuing offline");
            self.state.address = None;
            self.display.show(&Screen::Offline);
        }

        self.display.set_scrolling(true);
        if self.config.warmup_settle_ms > 0 {
            log::info!("Letting the sensor settle for {} ms", self.config.warmup_settle_ms);
            self.delay.delay_ms(self.config.warmup_settle_ms);
        }
        let (first_reading, warmup_polls) = self.warm_up();

        self.display.set_scrolling(false);
        self.display.show(&Screen::Concentration(first_reading));
        self.emit_reading(first_reading);
        self.state.restart_timers(self.clock.now_ms());

        BootReport {
            link,
            address: self.state.address,
            warmup_polls,
            first_reading,
        }
    }

    /// Poll until the sensor reports something other than an error or its
    /// warm-up placeholder, giving up after the configured number of polls.
    fn warm_up(&mut self) -> (Reading, u32) {
        let attempts = self.config.warmup_attempts.max(1);
        let mut reading = Reading::UNAVAILABLE;

        for attempt in 1..=attempts {
            reading = self.sensor.poll();
            let placeholder = self
                .config
                .warmup_reject_ppm
                .is_some_and(|reject| reading.ppm == reject as i32);
            if reading.valid && !placeholder {
                log::info!("Sensor ready after {} polls: {} ppm", attempt, reading.ppm);
                return (reading, attempt);
            }
            log::debug!("Warm-up poll {}: {} ppm", attempt, reading.ppm);
            if attempt < attempts {
                self.delay.delay_ms(self.config.warmup_retry_ms);
            }
        }

        log::warn!("Sensor still warming up after {} polls", attempts);
        (reading, attempts)
    }

    /// Run every task whose deadline has passed, once.
    pub fn poll(&mut self, server: &mut impl RequestServer) -> PollReport {
        let mut report = PollReport::default();

        let now = self.clock.now_ms();
        if self.state.tick.is_due(now) {
            self.state.tick.restart(now);
            report.ticked = true;

            if self.state.connectivity.on_tick() {
                report.reconnect_checked = true;
                self.check_connectivity();
            }
            if self.state.connectivity.is_online() {
                server.service(self);
                report.serviced = true;
            }
        }

        if self.state.refresh.is_due(self.clock.now_ms()) {
            self.refresh_display();
            report.refreshed = true;
        }

        let now = self.clock.now_ms();
        if self.state.status.is_due(now) {
            self.state.status.restart(now);
            self.emit_status();
            report.status_sent = true;
        }

        report
    }

    /// Main loop. Never returns.
    pub fn run(&mut self, server: &mut impl RequestServer) -> ! {
        loop {
            self.poll(server);
            let wait = self.next_wakeup_ms();
            if wait > 0 {
                self.delay.delay_ms(wait);
            }
        }
    }

    /// Time until the earliest task deadline, never more than one tick.
    pub fn next_wakeup_ms(&self) -> u32 {
        let now = self.clock.now_ms();
        let earliest = [self.state.tick, self.state.refresh, self.state.status]
            .iter()
            .map(|i| i.remaining(now))
            .min()
            .unwrap_or(0);
        earliest.min(self.config.tick_period_ms as u64) as u32
    }

    fn check_connectivity(&mut self) {
        let link = self
            .state
            .connectivity
            .reassociate(&mut self.network, &mut self.delay);
        self.state.address = match link {
            LinkState::Online => self.network.address(),
            _ => None,
        };
    }

    fn refresh_display(&mut self) -> Reading {
        let reading = self.sensor.poll();
        self.display.show(&Screen::Concentration(reading));
        self.emit_reading(reading);
        self.state.refresh.restart(self.clock.now_ms());
        reading
    }

    fn emit_reading(&self, reading: Reading) {
        emit(&DeviceMessage::Reading {
            ppm: reading.ppm,
            valid: reading.valid,
            ts: (self.clock.now_ms() & 0xFFFF_FFFF) as u32,
        });
    }

    fn emit_status(&self) {
        let address = self.state.address.map(format_address);
        emit(&DeviceMessage::Status {
            state: self.state.connectivity.state().as_str(),
            address: address.as_deref(),
            uptime: (self.clock.now_ms() / 1000) as u32,
            dimmed: self.state.dimmed,
            board: board::BOARD_NAME,
            version: VERSION,
        });
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn sensor_link_mut(&mut self) -> &mut L {
        self.sensor.link_mut()
    }
}

impl<L, N, D, C, W> Endpoints for Scheduler<L, N, D, C, W>
where
    L: SensorLink,
    N: Network,
    D: DisplaySink,
    C: Clock,
    W: DelayNs,
{
    fn concentration(&mut self) -> Reading {
        self.sensor.poll()
    }

    fn set_dimmed(&mut self, dimmed: bool) {
        self.state.dimmed = dimmed;
        self.display.set_dimmed(dimmed);
    }
}

/// Write one telemetry line to the console.
fn emit(msg: &DeviceMessage) {
    if let Some(buf) = encode_message(msg) {
        if let Ok(s) = core::str::from_utf8(&buf) {
            log::info!("{}", s.trim_end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        response, FakeNetwork, ManualClock, ManualDelay, QueuedServer, RecordingDisplay,
        ScriptedLink,
    };

    type TestScheduler = Scheduler<ScriptedLink, FakeNetwork, RecordingDisplay, ManualClock, ManualDelay>;

    fn scheduler(config: Config, link: ScriptedLink, net: FakeNetwork) -> (TestScheduler, ManualClock) {
        let clock = ManualClock::new();
        let sched = Scheduler::new(
            config,
            link,
            net,
            RecordingDisplay::default(),
            clock.clone(),
            clock.delay(),
        );
        (sched, clock)
    }

    fn booted(net: FakeNetwork) -> (TestScheduler, ManualClock) {
        let (mut sched, clock) = scheduler(Config::new(), ScriptedLink::replying(600), net);
        sched.boot();
        (sched, clock)
    }

    /// Advance the clock one tick at a time for `ms`, polling after each step.
    fn run_for(
        sched: &mut TestScheduler,
        clock: &ManualClock,
        server: &mut QueuedServer,
        ms: u64,
    ) -> std::vec::Vec<PollReport> {
        let step = sched.config().tick_period_ms as u64;
        (0..ms / step)
            .map(|_| {
                clock.advance(step);
                sched.poll(server)
            })
            .collect()
    }

    // ── Interval ────────────────────────────────────────────────────

    #[test]
    fn interval_due_at_period() {
        let mut i = Interval::new(10_000, 1_000);
        assert!(!i.is_due(10_999));
        assert_eq!(i.remaining(10_999), 1);
        assert!(i.is_due(11_000));
        assert_eq!(i.remaining(12_000), 0);
        i.restart(12_000);
        assert!(!i.is_due(21_999));
        assert_eq!(i.last(), 12_000);
    }

    #[test]
    fn interval_tolerates_clock_before_start() {
        let i = Interval::new(500, 1_000);
        assert_eq!(i.elapsed(0), 0);
        assert!(!i.is_due(0));
    }

    // ── Boot ────────────────────────────────────────────────────────

    #[test]
    fn boot_online_paints_progress_then_reading() {
        let (mut sched, clock) = scheduler(Config::new(), ScriptedLink::replying(600), FakeNetwork::up_after(2));

        let report = sched.boot();

        assert_eq!(report.link, LinkState::Online);
        assert_eq!(report.address, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(report.first_reading, Reading::from_ppm(600));
        assert_eq!(report.warmup_polls, 1);
        assert_eq!(
            sched.display().screens,
            [
                Screen::Connecting { attempts: 0 },
                Screen::Connecting { attempts: 1 },
                Screen::Connecting { attempts: 2 },
                Screen::Connected {
                    address: Some(Ipv4Addr::new(192, 168, 1, 20))
                },
                Screen::Concentration(Reading::from_ppm(600)),
            ]
        );
        // Two association polls plus the settle pause
        assert_eq!(clock.now(), 1_000 + 30_000);
        assert_eq!(sched.state().refresh.last(), clock.now());
    }

    #[test]
    fn boot_banner_scrolls_only_during_warm_up() {
        let (mut sched, _clock) = scheduler(Config::new(), ScriptedLink::replying(600), FakeNetwork::up_after(0));
        sched.boot();

        // Connecting, Connected, then the first reading
        assert_eq!(sched.display().screens.len(), 3);
        // Scrolling starts after the banner is up and stops before the reading
        assert_eq!(sched.display().scrolling, [(true, 2), (false, 2)]);

        let mut server = QueuedServer::default();
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        run_for(&mut sched, &clock, &mut server, 20_000);
        assert_eq!(sched.display().scrolling.len(), 2);
    }

    #[test]
    fn boot_offline_continues_degraded() {
        let (mut sched, clock) = scheduler(Config::new(), ScriptedLink::replying(600), FakeNetwork::never_up());

        let report = sched.boot();

        assert_eq!(report.link, LinkState::Offline);
        assert_eq!(report.address, None);
        assert!(sched.display().screens.contains(&Screen::Offline));
        assert_eq!(sched.display().last(), Some(&Screen::Concentration(Reading::from_ppm(600))));
        // Full association window plus settle
        assert_eq!(clock.now(), 30_000 + 30_000);
    }

    #[test]
    fn warm_up_skips_errors_and_placeholder() {
        let mut bad_header = response(600);
        bad_header[1] = 0x00;
        let link = ScriptedLink::replying(720)
            .then(&bad_header)
            .then(&response(500))
            .then(&[]);
        let (mut sched, _clock) = scheduler(Config::new(), link, FakeNetwork::up_after(0));

        let report = sched.boot();

        assert_eq!(report.warmup_polls, 4);
        assert_eq!(report.first_reading, Reading::from_ppm(720));
    }

    #[test]
    fn warm_up_is_bounded() {
        let config = Config {
            warmup_attempts: 5,
            ..Config::new()
        };
        let (mut sched, clock) = scheduler(config, ScriptedLink::replying(500), FakeNetwork::up_after(0));

        let report = sched.boot();

        assert_eq!(report.warmup_polls, 5);
        assert_eq!(sched.sensor_link_mut().polls(), 5);
        // The last reading is painted anyway
        assert_eq!(report.first_reading, Reading::from_ppm(500));
        // Settle + 4 pauses between 5 polls
        assert_eq!(clock.now(), 30_000 + 4 * 1_000);
    }

    #[test]
    fn warm_up_placeholder_is_configurable() {
        let config = Config {
            warmup_reject_ppm: None,
            warmup_settle_ms: 0,
            ..Config::new()
        };
        let (mut sched, clock) = scheduler(config, ScriptedLink::replying(500), FakeNetwork::up_after(0));

        let report = sched.boot();

        assert_eq!(report.warmup_polls, 1);
        assert_eq!(report.first_reading, Reading::from_ppm(500));
        assert_eq!(clock.now(), 0);
    }

    // ── Display refresh ─────────────────────────────────────────────

    #[test]
    fn refresh_waits_for_full_interval() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();
        let polls_after_boot = sched.sensor_link_mut().polls();

        let reports = run_for(&mut sched, &clock, &mut server, 9_500);
        assert!(reports.iter().all(|r| r.ticked && !r.refreshed));
        assert_eq!(sched.sensor_link_mut().polls(), polls_after_boot);

        clock.advance(500);
        assert!(sched.poll(&mut server).refreshed);
        assert_eq!(sched.sensor_link_mut().polls(), polls_after_boot + 1);
    }

    #[test]
    fn refresh_does_not_fire_every_tick() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();

        let reports = run_for(&mut sched, &clock, &mut server, 60_000);

        assert_eq!(reports.len(), 120);
        assert_eq!(reports.iter().filter(|r| r.refreshed).count(), 6);
    }

    #[test]
    fn refresh_paints_sentinel_on_failure() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        sched.sensor_link_mut().default_reply = None;
        let mut server = QueuedServer::default();

        run_for(&mut sched, &clock, &mut server, 10_000);

        assert_eq!(
            sched.display().last(),
            Some(&Screen::Concentration(Reading::UNAVAILABLE))
        );
    }

    #[test]
    fn refresh_runs_while_offline() {
        let (mut sched, clock) = booted(FakeNetwork::never_up());
        let mut server = QueuedServer::default();

        let reports = run_for(&mut sched, &clock, &mut server, 20_000);

        assert_eq!(reports.iter().filter(|r| r.refreshed).count(), 2);
    }

    // ── Request servicing ───────────────────────────────────────────

    #[test]
    fn online_tick_services_requests() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();
        server.get("/co2");
        server.get("/screen?state=0");

        clock.advance(500);
        let report = sched.poll(&mut server);

        assert!(report.serviced);
        assert_eq!(server.responses[0].body.as_str(), "600");
        assert!(server.responses[1].body.contains("state = 0"));
        assert!(sched.state().dimmed);
        assert_eq!(sched.display().dimmed, [true]);
    }

    #[test]
    fn no_servicing_between_ticks() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();

        clock.advance(499);
        assert!(!sched.poll(&mut server).ticked);
        assert_eq!(server.service_calls, 0);

        clock.advance(1);
        assert!(sched.poll(&mut server).serviced);
        assert_eq!(server.service_calls, 1);
    }

    #[test]
    fn offline_device_never_services_requests() {
        let (mut sched, clock) = booted(FakeNetwork::never_up());
        let mut server = QueuedServer::default();
        server.get("/co2");

        let reports = run_for(&mut sched, &clock, &mut server, 60_000);

        assert!(reports.iter().all(|r| r.ticked && !r.serviced));
        assert_eq!(server.service_calls, 0);
        assert_eq!(server.pending.len(), 1);
    }

    // ── Connectivity ────────────────────────────────────────────────

    #[test]
    fn reconnect_check_runs_on_7200th_tick() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();

        let reports = run_for(&mut sched, &clock, &mut server, 7199 * 500);
        assert!(reports.iter().all(|r| !r.reconnect_checked));
        assert_eq!(sched.state().connectivity.tick_counter(), 7199);

        // Link drops just before the check
        sched.network_mut().down_polls = Some(2);
        clock.advance(500);
        let report = sched.poll(&mut server);

        assert!(report.reconnect_checked);
        assert!(report.serviced);
        assert_eq!(sched.network_mut().connect_calls, 2);
        assert_eq!(sched.state().connectivity.tick_counter(), 0);
        assert_eq!(sched.state().connectivity.state(), LinkState::Online);
    }

    #[test]
    fn failed_reconnect_stops_servicing() {
        let config = Config {
            reconnect_check_ticks: 4,
            retry_when_offline: false,
            ..Config::new()
        };
        let (mut sched, clock) = scheduler(config, ScriptedLink::replying(600), FakeNetwork::up_after(0));
        sched.boot();
        let mut server = QueuedServer::default();

        run_for(&mut sched, &clock, &mut server, 3 * 500);
        sched.network_mut().down_polls = None;
        clock.advance(500);
        let report = sched.poll(&mut server);

        assert!(report.reconnect_checked);
        assert!(!report.serviced);
        assert_eq!(sched.state().connectivity.state(), LinkState::Offline);
        assert_eq!(sched.state().address, None);
    }

    #[test]
    fn offline_device_recovers_when_retry_enabled() {
        let config = Config {
            reconnect_check_ticks: 10,
            ..Config::new()
        };
        let (mut sched, clock) = scheduler(config, ScriptedLink::replying(600), FakeNetwork::never_up());
        sched.boot();
        let mut server = QueuedServer::default();

        sched.network_mut().down_polls = Some(0);
        let reports = run_for(&mut sched, &clock, &mut server, 10 * 500);

        assert!(reports[9].reconnect_checked);
        assert!(reports[9].serviced);
        assert_eq!(sched.state().connectivity.state(), LinkState::Online);
        assert_eq!(sched.state().address, Some(Ipv4Addr::new(192, 168, 1, 20)));
    }

    // ── Status and pacing ───────────────────────────────────────────

    #[test]
    fn status_every_thirty_seconds() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();

        let reports = run_for(&mut sched, &clock, &mut server, 90_000);

        assert_eq!(reports.iter().filter(|r| r.status_sent).count(), 3);
    }

    #[test]
    fn wakeup_never_exceeds_one_tick() {
        let (mut sched, clock) = booted(FakeNetwork::up_after(0));
        let mut server = QueuedServer::default();

        assert_eq!(sched.next_wakeup_ms(), 500);
        clock.advance(200);
        assert_eq!(sched.next_wakeup_ms(), 300);
        clock.advance(300);
        assert_eq!(sched.next_wakeup_ms(), 0);
        sched.poll(&mut server);
        assert_eq!(sched.next_wakeup_ms(), 500);
    }

    #[test]
    fn endpoints_poll_sensor_on_demand() {
        let (mut sched, _clock) = booted(FakeNetwork::up_after(0));
        let before = sched.sensor_link_mut().polls();

        assert_eq!(sched.concentration(), Reading::from_ppm(600));
        assert_eq!(sched.sensor_link_mut().polls(), before + 1);
    }
}
