//! Simulated board for host tests: one timeline shared by the clock, the
//! delay, the modem and the uplink, so tests can assert on ordering and time.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embedded_hal_async::delay::DelayNs;

use crate::clock::Clock;
use crate::drivers::modem::{ModemChannel, ModemCommand, ModemFault};
use crate::state::{Position, PositionReport};
use crate::uplink::{Uplink, UplinkError};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(ModemCommand),
    Wait(u32),
    Report(PositionReport),
}

#[derive(Clone, Default)]
pub struct Timeline {
    now: Rc<Cell<u64>>,
    events: Rc<RefCell<Vec<(u64, Event)>>>,
    failing_command: Rc<Cell<Option<ModemCommand>>>,
    uplink_down: Rc<Cell<bool>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push((self.now(), event));
    }

    pub fn events(&self) -> Vec<(u64, Event)> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn commands(&self) -> Vec<(u64, ModemCommand)> {
        self.events()
            .into_iter()
            .filter_map(|(t, e)| match e {
                Event::Command(c) => Some((t, c)),
                _ => None,
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<PositionReport> {
        self.events()
            .into_iter()
            .filter_map(|(_, e)| match e {
                Event::Report(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn fail_command(&self, cmd: Option<ModemCommand>) {
        self.failing_command.set(cmd);
    }

    pub fn set_uplink_down(&self, down: bool) {
        self.uplink_down.set(down);
    }

    pub fn clock(&self) -> SimClock {
        SimClock(self.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.clone())
    }

    pub fn modem(&self) -> SimModem {
        SimModem(self.clone())
    }

    pub fn uplink(&self) -> SimUplink {
        SimUplink(self.clone())
    }
}

pub struct SimClock(Timeline);

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.now()
    }
}

pub struct SimDelay(Timeline);

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.delay_ms(ns / 1_000_000).await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.delay_ms(us / 1_000).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.0.push(Event::Wait(ms));
        self.0.advance(ms as u64);
    }
}

pub struct SimModem(Timeline);

impl ModemChannel for SimModem {
    async fn send(&mut self, cmd: ModemCommand) -> Result<(), ModemFault> {
        self.0.push(Event::Command(cmd));
        if self.0.failing_command.get() == Some(cmd) {
            return Err(ModemFault::Write);
        }
        Ok(())
    }
}

pub struct SimUplink(Timeline);

impl Uplink for SimUplink {
    async fn report(&mut self, _endpoint: &str, report: &PositionReport) -> Result<(), UplinkError> {
        self.0.push(Event::Report(*report));
        if self.0.uplink_down.get() {
            return Err(UplinkError::Unavailable);
        }
        Ok(())
    }
}

fn nmea_coord(value: f64, deg_width: usize) -> String {
    let abs = value.abs();
    let deg = abs.floor();
    let min = (abs - deg) * 60.0;
    std::format!("{:0dw$}{:09.6}", deg as u32, min, dw = deg_width)
}

fn with_checksum(body: &str) -> String {
    let cs = body.bytes().fold(0u8, |acc, b| acc ^ b);
    std::format!("${}*{:02X}\r\n", body, cs)
}

/// A GGA sentence with a GPS fix at `p`.
pub fn gga(p: Position, sats: u8) -> String {
    let body = std::format!(
        "GPGGA,120000.00,{},{},{},{},1,{:02},0.9,100.0,M,46.9,M,,",
        nmea_coord(p.lat, 2),
        if p.lat < 0.0 { "S" } else { "N" },
        nmea_coord(p.lon, 3),
        if p.lon < 0.0 { "W" } else { "E" },
        sats,
    );
    with_checksum(&body)
}

#[test]
fn generated_sentences_decode() {
    let mut d = crate::drivers::gps::FixDecoder::new();
    let p = Position::new(-10.0001, 120.000_018);
    assert_eq!(d.push_data(gga(p, 7).as_bytes()), 1);
    let fix = d.fix();
    assert_eq!(fix.sats, 7);
    assert!((fix.position.lat - p.lat).abs() < 1e-8);
    assert!((fix.position.lon - p.lon).abs() < 1e-8);
}
