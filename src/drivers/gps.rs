use core::str::FromStr;

use crate::state::{Fix, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NmeaFrame {
    #[default]
    None,
    Gga,
    Rmc,
}

/// Decoder counters, useful when bringing up a new receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderStats {
    pub sentences_rx: u16,    // checksummed sentences accepted
    pub checksum_errors: u16, // checksum mismatches / missing checksum
    pub frame_errors: u16,    // overflows and non-ASCII garbage
    pub gga_count: u16,
    pub rmc_count: u16,
    pub unknown_count: u16, // valid sentences we don't decode
    pub last_frame: NmeaFrame,
}

/// Longest sentence we accept. NMEA 0183 caps a line at 82 characters; the
/// extra room tolerates vendor extensions.
pub const SENTENCE_MAX: usize = 128;

/// Incremental NMEA decoder. Feed it one byte at a time with [`push_byte`],
/// which returns `true` when the byte completed a location update.
///
/// Malformed input is dropped silently; decoding resumes at the next `$`.
///
/// [`push_byte`]: FixDecoder::push_byte
pub struct FixDecoder {
    buffer: heapless::String<SENTENCE_MAX>,
    fix: Fix,
    stats: DecoderStats,
}

impl Default for FixDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FixDecoder {
    pub fn new() -> Self {
        Self {
            buffer: heapless::String::new(),
            fix: Fix::default(),
            stats: DecoderStats::default(),
        }
    }

    /// Latest decoded fix. Satellite count, HDOP and altitude come from the
    /// most recent GGA even when the update was triggered by an RMC.
    pub fn fix(&self) -> &Fix {
        &self.fix
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    pub fn push_byte(&mut self, b: u8) -> bool {
        if b == b'$' {
            self.buffer.clear();
        } else if self.buffer.is_empty() {
            // between sentences, or still discarding a broken one
            return false;
        }

        if !b.is_ascii() || self.buffer.push(b as char).is_err() {
            self.stats.frame_errors = self.stats.frame_errors.wrapping_add(1);
            self.buffer.clear();
            return false;
        }

        if b == b'\n' {
            let updated = self.parse_sentence();
            self.buffer.clear();
            return updated;
        }
        false
    }

    /// Feeds a burst of bytes, returning how many location updates it held.
    pub fn push_data(&mut self, data: &[u8]) -> usize {
        data.iter().filter(|&&b| self.push_byte(b)).count()
    }

    fn parse_sentence(&mut self) -> bool {
        // Copy the buffer to avoid borrow conflict (self.buffer vs &mut self)
        let mut local: heapless::String<SENTENCE_MAX> = heapless::String::new();
        let _ = local.push_str(self.buffer.as_str().trim());
        let s = local.as_str();

        if s.len() < 6 {
            self.stats.frame_errors = self.stats.frame_errors.wrapping_add(1);
            return false;
        }

        if !verify_checksum(s) {
            self.stats.checksum_errors = self.stats.checksum_errors.wrapping_add(1);
            return false;
        }

        let frame = match &s[3..6] {
            "GGA" => NmeaFrame::Gga,
            "RMC" => NmeaFrame::Rmc,
            _ => NmeaFrame::None,
        };

        self.stats.sentences_rx = self.stats.sentences_rx.wrapping_add(1);
        self.stats.last_frame = frame;

        match frame {
            NmeaFrame::Gga => self.parse_gga(s),
            NmeaFrame::Rmc => self.parse_rmc(s),
            NmeaFrame::None => {
                self.stats.unknown_count = self.stats.unknown_count.wrapping_add(1);
                false
            }
        }
    }

    // ────── GGA ──────
    fn parse_gga(&mut self, s: &str) -> bool {
        self.stats.gga_count = self.stats.gga_count.wrapping_add(1);
        // $xxGGA,time,lat,NS,lon,EW,qual,sats,hdop,alt,M,geoid,M,…*CS
        let mut parts = s.split(',');
        parts.next(); // ID
        parts.next(); // time

        let lat_raw = parts.next().unwrap_or("");
        let ns = parts.next().unwrap_or("");
        let lon_raw = parts.next().unwrap_or("");
        let ew = parts.next().unwrap_or("");
        let qual_str = parts.next().unwrap_or("");
        let sats_str = parts.next().unwrap_or("");
        let hdop_str = parts.next().unwrap_or("");
        let alt_str = parts.next().unwrap_or("");

        if let Ok(n) = u8::from_str(sats_str) {
            self.fix.sats = n;
        }
        if let Ok(h) = f32::from_str(hdop_str) {
            self.fix.hdop = h;
        }
        if let Ok(a) = f32::from_str(alt_str) {
            self.fix.alt_m = a;
        }

        let quality = u8::from_str(qual_str).unwrap_or(0);
        if quality == 0 {
            self.fix.valid = false;
            return false;
        }

        self.commit_position(lat_raw, ns, lon_raw, ew)
    }

    // ────── RMC ──────
    fn parse_rmc(&mut self, s: &str) -> bool {
        self.stats.rmc_count = self.stats.rmc_count.wrapping_add(1);
        // $xxRMC,time,status,lat,NS,lon,EW,speed,course,date,…*CS
        let mut parts = s.split(',');
        parts.next(); // ID
        parts.next(); // time

        // A=active, V=void
        let status = parts.next().unwrap_or("");
        let lat_raw = parts.next().unwrap_or("");
        let ns = parts.next().unwrap_or("");
        let lon_raw = parts.next().unwrap_or("");
        let ew = parts.next().unwrap_or("");

        if status != "A" {
            self.fix.valid = false;
            return false;
        }

        self.commit_position(lat_raw, ns, lon_raw, ew)
    }

    fn commit_position(&mut self, lat_raw: &str, ns: &str, lon_raw: &str, ew: &str) -> bool {
        let (Some(lat), Some(lon)) = (
            coord_to_degrees(lat_raw, ns == "S"),
            coord_to_degrees(lon_raw, ew == "W"),
        ) else {
            self.fix.valid = false;
            return false;
        };

        self.fix.position = Position::new(lat, lon);
        self.fix.valid = true;
        true
    }
}

/// `ddmm.mmmm` / `dddmm.mmmm` to signed decimal degrees.
fn coord_to_degrees(raw: &str, negative: bool) -> Option<f64> {
    let value = f64::from_str(raw).ok()?;
    let deg = libm::floor(value / 100.0);
    let min = value - deg * 100.0;
    let degrees = deg + min / 60.0;
    Some(if negative { -degrees } else { degrees })
}

fn verify_checksum(s: &str) -> bool {
    if let Some((content, check_str)) = s.split_once('*') {
        let content = content.strip_prefix('$').unwrap_or(content);
        let calc = content.bytes().fold(0u8, |acc, b| acc ^ b);
        // Only take first 2 hex chars (ignore trailing garbage)
        let hex = if check_str.len() >= 2 { &check_str[..2] } else { check_str };
        if let Ok(val) = u8::from_str_radix(hex, 16) {
            return calc == val;
        }
    }
    false
}
