use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;

use crate::clock::Clock;
use crate::config::{Config, SharedConfig};
use crate::drivers::filter::{MovingAverage, POSITION_WINDOW};
use crate::drivers::gps::{DecoderStats, FixDecoder};
use crate::drivers::modem::ModemChannel;
use crate::geo;
use crate::power::PowerSequencer;
use crate::state::{Fix, ModemPowerState, Position, PositionReport, TrackerStats};
use crate::uplink::Uplink;

/// Pull-style access to receiver bytes that have already arrived.
pub trait ByteSource {
    /// Next pending byte, `None` once drained.
    fn read_byte(&mut self) -> Option<u8>;
}

/// A burst of bytes read from the receiver UART.
pub struct BurstSource<'a> {
    bytes: &'a [u8],
}

impl<'a> BurstSource<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl ByteSource for BurstSource<'_> {
    fn read_byte(&mut self) -> Option<u8> {
        let (&first, rest) = self.bytes.split_first()?;
        self.bytes = rest;
        Some(first)
    }
}

/// The tracker's control loop.
///
/// Each [`tick`](ControlLoop::tick) drains the pending receiver bytes, runs
/// every completed fix through satellite gating, smoothing and the movement
/// test, sleeps the modem once per evaluated fix, and finally issues the
/// periodic connectivity check when due.
///
/// The last reported position starts at [`Position::ORIGIN`] and is kept in
/// RAM only, so the first usable fix after every boot is reported.
pub struct ControlLoop<'a, M, Mo, D, C, U>
where
    M: RawMutex,
{
    shared: &'a SharedConfig<M>,
    config: Config,
    revision: u32,
    decoder: FixDecoder,
    lat_filter: MovingAverage<POSITION_WINDOW>,
    lon_filter: MovingAverage<POSITION_WINDOW>,
    last_known: Position,
    power: PowerSequencer<Mo, D, C>,
    uplink: U,
    report_seq: u32,
    stats: TrackerStats,
}

impl<'a, M, Mo, D, C, U> ControlLoop<'a, M, Mo, D, C, U>
where
    M: RawMutex,
    Mo: ModemChannel,
    D: DelayNs,
    C: Clock,
    U: Uplink,
{
    pub fn new(shared: &'a SharedConfig<M>, modem: Mo, delay: D, clock: C, uplink: U) -> Self {
        let (revision, config) = shared.snapshot();
        Self {
            shared,
            config,
            revision,
            decoder: FixDecoder::new(),
            lat_filter: MovingAverage::new(),
            lon_filter: MovingAverage::new(),
            last_known: Position::ORIGIN,
            power: PowerSequencer::new(modem, delay, clock),
            uplink,
            report_seq: 0,
            stats: TrackerStats::default(),
        }
    }

    /// Powers the GNSS receiver and runs the first registration query.
    pub async fn start(&mut self) {
        log_info!("tracker starting");
        self.power.power_up().await;
        self.sync_stats();
    }

    pub async fn tick<B: ByteSource>(&mut self, source: &mut B) {
        self.refresh_config();

        while let Some(b) = source.read_byte() {
            if self.decoder.push_byte(b) {
                let fix = *self.decoder.fix();
                self.process_fix(fix).await;
            }
        }

        self.power.poll_connectivity(self.config.check_interval_ms).await;
        self.sync_stats();
    }

    /// Position last handed to the uplink.
    pub fn last_known(&self) -> Position {
        self.last_known
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn decoder_stats(&self) -> &DecoderStats {
        self.decoder.stats()
    }

    pub fn power_state(&self) -> ModemPowerState {
        self.power.state()
    }

    /// Configuration in force for the current tick.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn refresh_config(&mut self) {
        if self.shared.revision() == self.revision {
            return;
        }
        let (revision, config) = self.shared.snapshot();
        self.revision = revision;
        self.config = config;
        log_info!("config revision {} applied", revision);
    }

    async fn process_fix(&mut self, fix: Fix) {
        if fix.sats < self.config.min_satellites {
            self.stats.fixes_rejected = self.stats.fixes_rejected.wrapping_add(1);
            log_warn!(
                "not enough satellites ({} < {}), waiting for better signal",
                fix.sats,
                self.config.min_satellites
            );
            return;
        }

        self.lat_filter.add(fix.position.lat);
        self.lon_filter.add(fix.position.lon);
        let filtered = Position::new(self.lat_filter.average(), self.lon_filter.average());

        let movement = geo::evaluate(filtered, self.last_known, self.config.movement_threshold_m);
        if movement.exceeds {
            self.report(filtered, &fix, movement.distance_m).await;
            self.last_known = filtered;
        } else {
            log_trace!("moved {} m, below threshold", movement.distance_m);
        }

        self.stats.fixes_processed = self.stats.fixes_processed.wrapping_add(1);
        self.power
            .sleep_cycle(self.config.sleep_time_ms, self.config.check_interval_ms)
            .await;
    }

    async fn report(&mut self, position: Position, fix: &Fix, moved_m: f64) {
        self.report_seq = self.report_seq.wrapping_add(1);
        let report = PositionReport {
            seq: self.report_seq,
            position,
            sats: fix.sats,
            hdop: fix.hdop,
            alt_m: fix.alt_m,
            moved_m,
        };

        match self.uplink.report(self.config.server_url.as_str(), &report).await {
            Ok(()) => {
                self.stats.reports_sent = self.stats.reports_sent.wrapping_add(1);
                log_info!(
                    "report #{} lat={} lon={} moved={} m",
                    report.seq,
                    position.lat,
                    position.lon,
                    moved_m
                );
            }
            Err(e) => {
                self.stats.uplink_failures = self.stats.uplink_failures.wrapping_add(1);
                log_warn!("report #{} not delivered: {:?}", report.seq, e);
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.modem_faults = self.power.faults();
        self.stats.connectivity_checks = self.power.checks();
    }
}
