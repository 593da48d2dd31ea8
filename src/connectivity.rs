//! Network association and the periodic link health check.
//!
//! The monitor only holds state and policy. The blocking parts (polling the
//! association status with a pause in between) borrow the network and a delay
//! from the scheduler for the duration of the call.

use core::net::Ipv4Addr;

use embedded_hal::delay::DelayNs;

use crate::config::Config;

/// Station-mode network interface.
pub trait Network {
    type Error: core::fmt::Debug;

    /// Start (or restart) association with the configured access point.
    /// Must not wait for the association to complete.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Whether the interface is associated and has an address.
    fn is_connected(&mut self) -> Result<bool, Self::Error>;

    /// Current IPv4 address, if one is assigned.
    fn address(&mut self) -> Option<Ipv4Addr>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Online,
    Offline,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Connecting => "connecting",
            LinkState::Online => "online",
            LinkState::Offline => "offline",
        }
    }
}

pub struct ConnectivityMonitor {
    state: LinkState,
    tick_counter: u32,
    check_ticks: u32,
    attempts: u32,
    poll_ms: u32,
    retry_when_offline: bool,
}

impl ConnectivityMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            state: LinkState::Connecting,
            tick_counter: 0,
            check_ticks: config.reconnect_check_ticks.max(1),
            attempts: config.association_attempts,
            poll_ms: config.association_poll_ms,
            retry_when_offline: config.retry_when_offline,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == LinkState::Online
    }

    pub fn tick_counter(&self) -> u32 {
        self.tick_counter
    }

    /// Boot-time association. Calls `on_attempt` with the attempt number after
    /// every poll that found the interface not yet associated.
    pub fn associate<N: Network, D: DelayNs>(
        &mut self,
        net: &mut N,
        delay: &mut D,
        mut on_attempt: impl FnMut(u32),
    ) -> LinkState {
        self.state = LinkState::Connecting;
        if let Err(e) = net.connect() {
            log::warn!("Association request failed: {:?}", e);
        }

        let associated = self.wait_for_association(net, delay, &mut on_attempt);
        self.settle(associated)
    }

    /// Count one scheduler tick. Returns true when a reconnect check is due,
    /// at which point the counter is back at zero.
    pub fn on_tick(&mut self) -> bool {
        let monitored = match self.state {
            LinkState::Online => true,
            LinkState::Offline => self.retry_when_offline,
            LinkState::Connecting => false,
        };
        if !monitored {
            return false;
        }

        self.tick_counter += 1;
        if self.tick_counter >= self.check_ticks {
            self.tick_counter = 0;
            true
        } else {
            false
        }
    }

    /// Hourly health check: re-issue association only if the link dropped,
    /// then wait up to the association window for it to come back.
    pub fn reassociate<N: Network, D: DelayNs>(&mut self, net: &mut N, delay: &mut D) -> LinkState {
        if connected(net) {
            self.tick_counter = 0;
            return self.settle(true);
        }

        log::info!("Network link down, reassociating");
        if let Err(e) = net.connect() {
            log::warn!("Association request failed: {:?}", e);
        }

        let associated = self.wait_for_association(net, delay, &mut |_: u32| {});
        self.tick_counter = 0;
        self.settle(associated)
    }

    fn wait_for_association<N: Network, D: DelayNs>(
        &mut self,
        net: &mut N,
        delay: &mut D,
        on_attempt: &mut dyn FnMut(u32),
    ) -> bool {
        for attempt in 0..self.attempts {
            if connected(net) {
                return true;
            }
            on_attempt(attempt + 1);
            delay.delay_ms(self.poll_ms);
        }
        connected(net)
    }

    fn settle(&mut self, associated: bool) -> LinkState {
        let next = if associated {
            LinkState::Online
        } else {
            LinkState::Offline
        };
        if next != self.state {
            log::info!("Connectivity: {} -> {}", self.state.as_str(), next.as_str());
        }
        self.state = next;
        next
    }
}

fn connected<N: Network>(net: &mut N) -> bool {
    match net.is_connected() {
        Ok(up) => up,
        Err(e) => {
            log::warn!("Association status unavailable: {:?}", e);
            false
        }
    }
}
