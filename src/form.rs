//! `application/x-www-form-urlencoded` shape of the configuration-update
//! surface. Field names follow the settings form served by the device.

use core::fmt::Write;
use core::str::FromStr;

use crate::config::{Config, ConfigError, SERVER_URL_MAX};

pub const FIELD_SERVER_URL: &str = "serverUrl";
pub const FIELD_TX_PIN: &str = "sim7000gTxPin";
pub const FIELD_RX_PIN: &str = "sim7000gRxPin";
pub const FIELD_BAUD_RATE: &str = "baudRate";
pub const FIELD_SLEEP_MS: &str = "sleepTimeMs";
pub const FIELD_THRESHOLD: &str = "movementThreshold";
pub const FIELD_MIN_SATS: &str = "minSatellites";
pub const FIELD_CHECK_MS: &str = "checkIntervalMs";

/// `&name=` plus the widest value text.
const fn field_len(name: &str, value_max: usize) -> usize {
    name.len() + 2 + value_max
}

/// Widest `{:?}` rendering of a finite f64, e.g. `-2.2250738585072014e-308`.
const F64_TEXT_MAX: usize = 24;

/// Longest encoded form we render: every field at its widest plus a fully
/// escaped URL.
pub const FORM_MAX: usize = FIELD_SERVER_URL.len() + 1 + 3 * SERVER_URL_MAX
    + field_len(FIELD_TX_PIN, 3)
    + field_len(FIELD_RX_PIN, 3)
    + field_len(FIELD_BAUD_RATE, 10)
    + field_len(FIELD_SLEEP_MS, 10)
    + field_len(FIELD_THRESHOLD, F64_TEXT_MAX)
    + field_len(FIELD_MIN_SATS, 3)
    + field_len(FIELD_CHECK_MS, 10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormError {
    UnknownField,
    BadNumber,
    BadEscape,
    /// Rendered form did not fit `FORM_MAX`.
    TooLong,
    Config(ConfigError),
}

impl From<ConfigError> for FormError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Builds the replacement record: the current configuration with every
/// submitted field overwritten. Fields not submitted keep their value.
pub fn apply_form(current: &Config, form: &str) -> Result<Config, FormError> {
    let mut next = current.clone();

    for pair in form.trim().split('&').filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let mut value: heapless::String<SERVER_URL_MAX> = heapless::String::new();
        percent_decode(raw, &mut value)?;
        let value = value.as_str();

        match key {
            FIELD_SERVER_URL => next = next.with_server_url(value)?,
            FIELD_TX_PIN => next.modem_tx_pin = number(value)?,
            FIELD_RX_PIN => next.modem_rx_pin = number(value)?,
            FIELD_BAUD_RATE => next.baud_rate = number(value)?,
            FIELD_SLEEP_MS => next.sleep_time_ms = number(value)?,
            FIELD_THRESHOLD => next.movement_threshold_m = number(value)?,
            FIELD_MIN_SATS => next.min_satellites = number(value)?,
            FIELD_CHECK_MS => next.check_interval_ms = number(value)?,
            _ => return Err(FormError::UnknownField),
        }
    }

    next.validate()?;
    Ok(next)
}

/// Renders every field, in the same encoding `apply_form` accepts.
/// The threshold uses `{:?}` so very large or small values stay short.
pub fn encode_form(config: &Config) -> Result<heapless::String<FORM_MAX>, FormError> {
    let mut out = heapless::String::new();
    out.push_str(FIELD_SERVER_URL).map_err(|_| FormError::TooLong)?;
    out.push('=').map_err(|_| FormError::TooLong)?;
    percent_encode(config.server_url.as_str(), &mut out)?;
    write!(
        out,
        "&{}={}&{}={}&{}={}&{}={}&{}={:?}&{}={}&{}={}",
        FIELD_TX_PIN,
        config.modem_tx_pin,
        FIELD_RX_PIN,
        config.modem_rx_pin,
        FIELD_BAUD_RATE,
        config.baud_rate,
        FIELD_SLEEP_MS,
        config.sleep_time_ms,
        FIELD_THRESHOLD,
        config.movement_threshold_m,
        FIELD_MIN_SATS,
        config.min_satellites,
        FIELD_CHECK_MS,
        config.check_interval_ms,
    )
    .map_err(|_| FormError::TooLong)?;
    Ok(out)
}

fn number<T: FromStr>(value: &str) -> Result<T, FormError> {
    T::from_str(value.trim()).map_err(|_| FormError::BadNumber)
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn percent_decode<const N: usize>(raw: &str, out: &mut heapless::String<N>) -> Result<(), FormError> {
    let mut bytes: heapless::Vec<u8, N> = heapless::Vec::new();
    let mut it = raw.bytes();
    while let Some(b) = it.next() {
        let decoded = match b {
            b'+' => b' ',
            b'%' => {
                let hi = it.next().and_then(hex_val).ok_or(FormError::BadEscape)?;
                let lo = it.next().and_then(hex_val).ok_or(FormError::BadEscape)?;
                hi << 4 | lo
            }
            _ => b,
        };
        bytes
            .push(decoded)
            .map_err(|_| FormError::Config(ConfigError::UrlTooLong))?;
    }
    let s = core::str::from_utf8(&bytes).map_err(|_| FormError::BadEscape)?;
    out.push_str(s)
        .map_err(|_| FormError::Config(ConfigError::UrlTooLong))
}

fn percent_encode<const N: usize>(value: &str, out: &mut heapless::String<N>) -> Result<(), FormError> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char).map_err(|_| FormError::TooLong)?;
        } else {
            for c in [b'%', HEX[(b >> 4) as usize], HEX[(b & 0x0F) as usize]] {
                out.push(c as char).map_err(|_| FormError::TooLong)?;
            }
        }
    }
    Ok(())
}
