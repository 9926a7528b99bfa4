use core::cell::RefCell;

use crc::{Crc, CRC_32_ISO_HDLC};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

pub const SERVER_URL_MAX: usize = 128;

/// Modem UART rates accepted by `Config::validate`.
pub const BAUD_RATE_MIN: u32 = 1_200;
pub const BAUD_RATE_MAX: u32 = 3_686_400;

/// Tunable parameters. Loaded once at boot, replaced only as a whole record.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Report endpoint, opaque to the control loop.
    pub server_url: heapless::String<SERVER_URL_MAX>,
    /// Modem UART pins. Kept for the settings form; the STM32 board routes
    /// the modem to fixed pins and does not remap from these.
    pub modem_tx_pin: u8,
    pub modem_rx_pin: u8,
    pub baud_rate: u32,
    pub sleep_time_ms: u32,
    pub movement_threshold_m: f64,
    pub min_satellites: u8,
    pub check_interval_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: heapless::String::new(),
            modem_tx_pin: 27,
            modem_rx_pin: 26,
            baud_rate: 115_200,
            sleep_time_ms: 10_000,
            movement_threshold_m: 10.0,
            min_satellites: 4,
            check_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Threshold must be finite and strictly positive.
    InvalidThreshold,
    /// Connectivity interval must be strictly positive.
    InvalidInterval,
    /// Modem baud rate outside `BAUD_RATE_MIN..=BAUD_RATE_MAX`.
    InvalidBaudRate,
    UrlTooLong,
    BadMagic,
    UnsupportedVersion(u8),
    BadChecksum,
    BadUtf8,
}

// ── Persisted record ─────────────────────────────────────────────────────────
//
//   0  magic        u32   "GTCF"
//   4  version      u8
//   5  sequence     u32
//   9  url length   u8
//  10  url bytes    [u8; 128]
// 138  tx pin       u8
// 139  rx pin       u8
// 140  baud rate    u32
// 144  sleep ms     u32
// 148  threshold m  f64
// 156  min sats     u8
// 157  interval ms  u32
// 161  crc32        u32   over bytes 0..161
//
// All multi-byte fields little-endian.

pub const RECORD_MAGIC: u32 = u32::from_le_bytes(*b"GTCF");
pub const RECORD_VERSION: u8 = 1;
pub const RECORD_LEN: usize = 165;
const CRC_OFFSET: usize = RECORD_LEN - 4;

const RECORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

struct RecordWriter<'a> {
    buf: &'a mut [u8; RECORD_LEN],
    pos: usize,
}

impl RecordWriter<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

struct RecordReader<'a> {
    buf: &'a [u8; RECORD_LEN],
    pos: usize,
}

impl RecordReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }
}

impl Config {
    pub fn with_server_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.server_url.clear();
        self.server_url
            .push_str(url)
            .map_err(|_| ConfigError::UrlTooLong)?;
        Ok(self)
    }

    /// Checks the invariants the control loop relies on to make progress.
    /// Unsigned fields are non-negative by construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.movement_threshold_m.is_finite() || self.movement_threshold_m <= 0.0 {
            return Err(ConfigError::InvalidThreshold);
        }
        if self.check_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if !(BAUD_RATE_MIN..=BAUD_RATE_MAX).contains(&self.baud_rate) {
            return Err(ConfigError::InvalidBaudRate);
        }
        Ok(())
    }

    pub fn encode(&self, seq: u32) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        let mut w = RecordWriter { buf: &mut buf, pos: 0 };

        w.put(&RECORD_MAGIC.to_le_bytes());
        w.put(&[RECORD_VERSION]);
        w.put(&seq.to_le_bytes());

        let url = self.server_url.as_bytes();
        let mut url_field = [0u8; SERVER_URL_MAX];
        url_field[..url.len()].copy_from_slice(url);
        w.put(&[url.len() as u8]);
        w.put(&url_field);

        w.put(&[self.modem_tx_pin, self.modem_rx_pin]);
        w.put(&self.baud_rate.to_le_bytes());
        w.put(&self.sleep_time_ms.to_le_bytes());
        w.put(&self.movement_threshold_m.to_le_bytes());
        w.put(&[self.min_satellites]);
        w.put(&self.check_interval_ms.to_le_bytes());

        let crc = RECORD_CRC.checksum(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Returns the record's sequence number with the decoded config.
    pub fn decode(buf: &[u8; RECORD_LEN]) -> Result<(u32, Config), ConfigError> {
        let mut r = RecordReader { buf, pos: 0 };

        if r.u32() != RECORD_MAGIC {
            return Err(ConfigError::BadMagic);
        }
        let version = r.u8();
        if version != RECORD_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }
        let stored_crc = u32::from_le_bytes([
            buf[CRC_OFFSET],
            buf[CRC_OFFSET + 1],
            buf[CRC_OFFSET + 2],
            buf[CRC_OFFSET + 3],
        ]);
        if RECORD_CRC.checksum(&buf[..CRC_OFFSET]) != stored_crc {
            return Err(ConfigError::BadChecksum);
        }

        let seq = r.u32();
        let url_len = r.u8() as usize;
        let url_field = r.take::<SERVER_URL_MAX>();
        if url_len > SERVER_URL_MAX {
            return Err(ConfigError::UrlTooLong);
        }
        let url = core::str::from_utf8(&url_field[..url_len]).map_err(|_| ConfigError::BadUtf8)?;

        let config = Config {
            server_url: heapless::String::new(),
            modem_tx_pin: r.u8(),
            modem_rx_pin: r.u8(),
            baud_rate: r.u32(),
            sleep_time_ms: r.u32(),
            movement_threshold_m: f64::from_le_bytes(r.take()),
            min_satellites: r.u8(),
            check_interval_ms: r.u32(),
        }
        .with_server_url(url)?;

        Ok((seq, config))
    }
}

// ── Live configuration ───────────────────────────────────────────────────────

/// The running configuration, shared between the control loop and whatever
/// accepts updates. Replacement is whole-record under the mutex; readers take
/// a snapshot and never see a half-written value.
pub struct SharedConfig<M: RawMutex> {
    inner: Mutex<M, RefCell<(u32, Config)>>,
}

impl<M: RawMutex> SharedConfig<M> {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Mutex::new(RefCell::new((0, config))),
        }
    }

    /// Bumped on every successful replace.
    pub fn revision(&self) -> u32 {
        self.inner.lock(|c| c.borrow().0)
    }

    pub fn snapshot(&self) -> (u32, Config) {
        self.inner.lock(|c| c.borrow().clone())
    }

    pub fn replace(&self, config: Config) -> Result<u32, ConfigError> {
        config.validate()?;
        Ok(self.inner.lock(|c| {
            let mut c = c.borrow_mut();
            c.0 = c.0.wrapping_add(1);
            c.1 = config;
            c.0
        }))
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// Whole-record configuration storage.
pub trait ConfigStore {
    type Error;

    async fn load(&mut self) -> Result<Config, Self::Error>;
    async fn save(&mut self, config: &Config) -> Result<(), Self::Error>;
}

/// Minimal NOR flash access for the config area.
pub trait ConfigFlash {
    type Error;

    /// Erase granularity; each slot occupies one sector.
    const SECTOR_SIZE: u32;

    async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    async fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error>;
    /// `data` never crosses a 256 byte page.
    async fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError<E> {
    Flash(E),
    /// Neither slot holds a readable record (blank or corrupted flash).
    NoValidRecord,
    Invalid(ConfigError),
}

impl<E> From<ConfigError> for StoreError<E> {
    fn from(value: ConfigError) -> Self {
        Self::Invalid(value)
    }
}

/// Two-slot store: each save goes to the slot not holding the newest record,
/// so an interrupted write leaves the previous configuration loadable.
pub struct SlotStore<F: ConfigFlash> {
    flash: F,
    base: u32,
    next_slot: u32,
    next_seq: u32,
}

impl<F: ConfigFlash> SlotStore<F> {
    pub fn new(flash: F, base: u32) -> Self {
        Self {
            flash,
            base,
            next_slot: 0,
            next_seq: 1,
        }
    }

    fn slot_address(&self, slot: u32) -> u32 {
        self.base + slot * F::SECTOR_SIZE
    }

    async fn read_slot(&mut self, slot: u32) -> Result<Option<(u32, Config)>, F::Error> {
        let mut buf = [0u8; RECORD_LEN];
        self.flash.read(self.slot_address(slot), &mut buf).await?;
        Ok(Config::decode(&buf).ok())
    }
}

impl<F: ConfigFlash> ConfigStore for SlotStore<F> {
    type Error = StoreError<F::Error>;

    /// Newest record that passes `Config::validate`. A newer record that
    /// decodes but fails validation falls back to the older slot.
    async fn load(&mut self) -> Result<Config, Self::Error> {
        let a = self.read_slot(0).await.map_err(StoreError::Flash)?;
        let b = self.read_slot(1).await.map_err(StoreError::Flash)?;

        let newest_first = match (&a, &b) {
            (Some((sa, _)), Some((sb, _))) => sa >= sb,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Err(StoreError::NoValidRecord),
        };
        let candidates = if newest_first { [(0, a), (1, b)] } else { [(1, b), (0, a)] };
        let newest_slot = candidates[0].0;
        let top_seq = candidates
            .iter()
            .filter_map(|(_, record)| record.as_ref().map(|(seq, _)| *seq))
            .max()
            .unwrap_or(0);

        // saves go to the slot not holding the record in use
        self.next_seq = top_seq.wrapping_add(1);
        self.next_slot = 1 - newest_slot;

        let mut rejected = None;
        for (slot, record) in candidates {
            let Some((_, config)) = record else { continue };
            match config.validate() {
                Ok(()) => {
                    self.next_slot = 1 - slot;
                    return Ok(config);
                }
                Err(e) => {
                    log_warn!("config slot {} rejected: {:?}", slot, e);
                    rejected.get_or_insert(e);
                }
            }
        }
        Err(rejected.map_or(StoreError::NoValidRecord, StoreError::Invalid))
    }

    async fn save(&mut self, config: &Config) -> Result<(), Self::Error> {
        config.validate()?;
        let record = config.encode(self.next_seq);
        let address = self.slot_address(self.next_slot);

        self.flash.erase_sector(address).await.map_err(StoreError::Flash)?;
        self.flash.program(address, &record).await.map_err(StoreError::Flash)?;

        self.next_slot = 1 - self.next_slot;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(())
    }
}

/// Startup load. Storage problems never stop the tracker; it runs on defaults.
pub async fn load_or_default<S: ConfigStore>(store: &mut S) -> Config {
    match store.load().await {
        Ok(config) => {
            log_info!("config loaded");
            config
        }
        Err(_) => {
            log_warn!("no stored config, using defaults");
            Config::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateError<E> {
    Invalid(ConfigError),
    Store(E),
}

/// Validates, persists, then swaps in a replacement configuration.
/// A failed save leaves the running configuration untouched.
pub async fn update_config<S: ConfigStore, M: RawMutex>(
    store: &mut S,
    shared: &SharedConfig<M>,
    config: Config,
) -> Result<u32, UpdateError<S::Error>> {
    config.validate().map_err(UpdateError::Invalid)?;
    store.save(&config).await.map_err(UpdateError::Store)?;
    shared.replace(config).map_err(UpdateError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    /// RAM-backed NOR flash: erase sets 0xFF, program can only clear bits.
    struct RamFlash {
        mem: Vec<u8>,
        fail_program: bool,
    }

    impl RamFlash {
        fn new(size: usize) -> Self {
            Self {
                mem: vec![0xFF; size],
                fail_program: false,
            }
        }
    }

    #[derive(Debug, PartialEq)]
    struct FlashFault;

    impl ConfigFlash for RamFlash {
        type Error = FlashFault;
        const SECTOR_SIZE: u32 = 4096;

        async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashFault> {
            let a = address as usize;
            buf.copy_from_slice(&self.mem[a..a + buf.len()]);
            Ok(())
        }

        async fn erase_sector(&mut self, address: u32) -> Result<(), FlashFault> {
            let a = address as usize;
            self.mem[a..a + Self::SECTOR_SIZE as usize].fill(0xFF);
            Ok(())
        }

        async fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashFault> {
            if self.fail_program {
                return Err(FlashFault);
            }
            let a = address as usize;
            for (dst, src) in self.mem[a..a + data.len()].iter_mut().zip(data) {
                *dst &= *src;
            }
            Ok(())
        }
    }

    fn sample() -> Config {
        Config {
            sleep_time_ms: 2_500,
            movement_threshold_m: 12.5,
            min_satellites: 6,
            check_interval_ms: 30_000,
            ..Config::default()
        }
        .with_server_url("http://collector.local/track")
        .unwrap()
    }

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_non_progressing_values() {
        let mut c = Config::default();
        c.movement_threshold_m = 0.0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidThreshold));
        c.movement_threshold_m = f64::NAN;
        assert_eq!(c.validate(), Err(ConfigError::InvalidThreshold));
        c.movement_threshold_m = -1.0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidThreshold));

        let mut c = Config::default();
        c.check_interval_ms = 0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidInterval));
    }

    #[test]
    fn validate_rejects_unusable_baud_rates() {
        let mut c = Config::default();
        c.baud_rate = 0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidBaudRate));
        c.baud_rate = BAUD_RATE_MAX + 1;
        assert_eq!(c.validate(), Err(ConfigError::InvalidBaudRate));
        c.baud_rate = BAUD_RATE_MIN;
        assert_eq!(c.validate(), Ok(()));
        c.baud_rate = 9_600;
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn url_capacity_is_enforced() {
        let long = "x".repeat(SERVER_URL_MAX + 1);
        assert_eq!(
            Config::default().with_server_url(&long),
            Err(ConfigError::UrlTooLong)
        );
    }

    #[test]
    fn record_decodes_to_same_config() {
        let c = sample();
        let (seq, decoded) = Config::decode(&c.encode(42)).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(decoded, c);
    }

    #[test]
    fn corrupted_and_blank_records_are_rejected() {
        let mut record = sample().encode(1);
        record[150] ^= 0x01;
        assert_eq!(Config::decode(&record), Err(ConfigError::BadChecksum));

        assert_eq!(
            Config::decode(&[0xFF; RECORD_LEN]),
            Err(ConfigError::BadMagic)
        );

        let mut record = sample().encode(1);
        record[4] = 9;
        assert_eq!(
            Config::decode(&record),
            Err(ConfigError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn blank_flash_loads_defaults() {
        let mut store = SlotStore::new(RamFlash::new(8192), 0);
        assert!(matches!(
            block_on(store.load()),
            Err(StoreError::NoValidRecord)
        ));
        assert_eq!(block_on(load_or_default(&mut store)), Config::default());
    }

    #[test]
    fn saves_alternate_slots_and_newest_wins() {
        let mut store = SlotStore::new(RamFlash::new(8192), 0);
        let first = sample();
        let mut second = sample();
        second.min_satellites = 9;

        block_on(store.save(&first)).unwrap();
        block_on(store.save(&second)).unwrap();

        // both slots now hold records
        assert!(Config::decode(store.flash.mem[..RECORD_LEN].try_into().unwrap()).is_ok());
        assert!(Config::decode(store.flash.mem[4096..4096 + RECORD_LEN].try_into().unwrap()).is_ok());

        let mut reopened = SlotStore::new(store.flash, 0);
        assert_eq!(block_on(reopened.load()).unwrap(), second);

        // next save overwrites the older slot (slot 0)
        let mut third = sample();
        third.sleep_time_ms = 1;
        block_on(reopened.save(&third)).unwrap();
        let (seq, _) = Config::decode(reopened.flash.mem[..RECORD_LEN].try_into().unwrap()).unwrap();
        assert_eq!(seq, 3);
        assert_eq!(block_on(reopened.load()).unwrap(), third);
    }

    #[test]
    fn torn_write_keeps_previous_record() {
        let mut store = SlotStore::new(RamFlash::new(8192), 0);
        block_on(store.save(&sample())).unwrap();

        let mut next = sample();
        next.min_satellites = 1;
        store.flash.fail_program = true;
        assert!(matches!(
            block_on(store.save(&next)),
            Err(StoreError::Flash(FlashFault))
        ));

        store.flash.fail_program = false;
        let mut reopened = SlotStore::new(store.flash, 0);
        assert_eq!(block_on(reopened.load()).unwrap(), sample());
    }

    #[test]
    fn invalid_newest_record_falls_back_to_older_slot() {
        let mut flash = RamFlash::new(8192);
        let mut broken = sample();
        broken.baud_rate = 0;
        // encode does not validate, so an out-of-range record can reach flash
        block_on(flash.program(0, &sample().encode(1))).unwrap();
        block_on(flash.program(4096, &broken.encode(2))).unwrap();

        let mut store = SlotStore::new(flash, 0);
        assert_eq!(block_on(store.load()).unwrap(), sample());

        // the next save replaces the broken record, not the one in use
        let mut next = sample();
        next.min_satellites = 8;
        block_on(store.save(&next)).unwrap();
        let (seq, stored) = Config::decode(store.flash.mem[4096..4096 + RECORD_LEN].try_into().unwrap()).unwrap();
        assert_eq!((seq, stored), (3, next.clone()));
        assert!(Config::decode(store.flash.mem[..RECORD_LEN].try_into().unwrap()).is_ok());

        let mut reopened = SlotStore::new(store.flash, 0);
        assert_eq!(block_on(reopened.load()).unwrap(), next);
    }

    #[test]
    fn only_invalid_records_report_the_violation() {
        let mut flash = RamFlash::new(8192);
        let mut broken = sample();
        broken.check_interval_ms = 0;
        block_on(flash.program(0, &broken.encode(5))).unwrap();

        let mut store = SlotStore::new(flash, 0);
        assert!(matches!(
            block_on(store.load()),
            Err(StoreError::Invalid(ConfigError::InvalidInterval))
        ));
        assert_eq!(block_on(load_or_default(&mut store)), Config::default());
    }

    #[test]
    fn shared_config_replaces_whole_record() {
        let shared = SharedConfig::<NoopRawMutex>::new(Config::default());
        assert_eq!(shared.revision(), 0);

        assert_eq!(shared.replace(sample()), Ok(1));
        let (rev, snap) = shared.snapshot();
        assert_eq!(rev, 1);
        assert_eq!(snap, sample());

        let mut bad = sample();
        bad.check_interval_ms = 0;
        assert_eq!(shared.replace(bad), Err(ConfigError::InvalidInterval));
        assert_eq!(shared.snapshot(), (1, sample()));
    }

    #[test]
    fn failed_save_rejects_update() {
        let shared = SharedConfig::<NoopRawMutex>::new(Config::default());
        let mut flash = RamFlash::new(8192);
        flash.fail_program = true;
        let mut store = SlotStore::new(flash, 0);

        let result = block_on(update_config(&mut store, &shared, sample()));
        assert!(matches!(result, Err(UpdateError::Store(StoreError::Flash(FlashFault)))));
        assert_eq!(shared.snapshot(), (0, Config::default()));

        store.flash.fail_program = false;
        assert_eq!(block_on(update_config(&mut store, &shared, sample())), Ok(1));
        assert_eq!(block_on(store.load()).unwrap(), sample());
    }
}
