//! Value types passed between the decoder, the control loop and the collaborators.
//!
//! All types are `Copy` so they can cross embassy channels without allocation.

// ── Data types ────────────────────────────────────────────────────────────────

/// Geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    /// Last-known position at boot. The first usable fix is measured against
    /// this point and is therefore always reported once after a restart.
    pub const ORIGIN: Position = Position { lat: 0.0, lon: 0.0 };

    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A single decoded location update. Lives for one decode-and-process step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fix {
    pub position: Position,
    pub sats: u8,
    pub hdop: f32,
    pub alt_m: f32,
    pub valid: bool,
}

/// Payload handed to the uplink collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionReport {
    pub seq: u32,
    /// Filtered position.
    pub position: Position,
    pub sats: u8,
    pub hdop: f32,
    pub alt_m: f32,
    /// Distance from the previously reported position, metres.
    pub moved_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemPowerState {
    #[default]
    Awake,
    Asleep,
}

/// Running counters kept by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackerStats {
    pub fixes_processed: u32,
    pub fixes_rejected: u32,
    pub reports_sent: u32,
    pub uplink_failures: u32,
    pub modem_faults: u32,
    pub connectivity_checks: u32,
}
