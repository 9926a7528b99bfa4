use embedded_hal_async::delay::DelayNs;

use crate::clock::Clock;
use crate::drivers::modem::{ModemChannel, ModemCommand, ModemFault, SETTLE_MS};
use crate::state::ModemPowerState;

/// Drives the modem between AWAKE and ASLEEP and owns the connectivity-check
/// cadence.
///
/// ```text
///  AWAKE ──CSCLK=1 + settle──▶ ASLEEP ──sleep_ms──▶ ──CSCLK=0 + settle──▶ AWAKE
///                                 │
///                     registration query when due
/// ```
///
/// Commands are fire-and-forget: a send that fails is counted and logged,
/// the state stays where it was, and the sequence carries on.
pub struct PowerSequencer<Mo, D, C> {
    modem: Mo,
    delay: D,
    clock: C,
    state: ModemPowerState,
    last_check_ms: u64,
    faults: u32,
    checks: u32,
}

impl<Mo, D, C> PowerSequencer<Mo, D, C>
where
    Mo: ModemChannel,
    D: DelayNs,
    C: Clock,
{
    pub fn new(modem: Mo, delay: D, clock: C) -> Self {
        let last_check_ms = clock.now_ms();
        Self {
            modem,
            delay,
            clock,
            state: ModemPowerState::Awake,
            last_check_ms,
            faults: 0,
            checks: 0,
        }
    }

    pub fn state(&self) -> ModemPowerState {
        self.state
    }

    pub fn faults(&self) -> u32 {
        self.faults
    }

    pub fn checks(&self) -> u32 {
        self.checks
    }

    /// Boot sequence: GNSS power on, then a first registration query which
    /// starts the connectivity-check cadence.
    pub async fn power_up(&mut self) {
        let _ = self.command(ModemCommand::GnssPowerOn).await;
        self.connectivity_check().await;
    }

    /// One sleep/resume cycle between two fix evaluations. A connectivity
    /// check falling due inside the window is issued on time, between the
    /// sleep and wake commands.
    pub async fn sleep_cycle(&mut self, sleep_ms: u32, check_interval_ms: u32) {
        if self.command(ModemCommand::SleepClockEnable).await.is_ok() {
            self.state = ModemPowerState::Asleep;
        }

        let deadline = self.clock.now_ms() + sleep_ms as u64;
        loop {
            let now = self.clock.now_ms();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let until_check = self.check_due_in(now, check_interval_ms);
            if until_check >= remaining {
                self.wait(remaining).await;
                break;
            }
            self.wait(until_check).await;
            self.connectivity_check().await;
        }

        if self.command(ModemCommand::SleepClockDisable).await.is_ok() {
            self.state = ModemPowerState::Awake;
        }
    }

    /// Issues a registration query if `check_interval_ms` has elapsed since
    /// the last one. Returns whether a query went out.
    pub async fn poll_connectivity(&mut self, check_interval_ms: u32) -> bool {
        let now = self.clock.now_ms();
        if self.check_due_in(now, check_interval_ms) > 0 {
            return false;
        }
        self.connectivity_check().await;
        true
    }

    fn check_due_in(&self, now: u64, check_interval_ms: u32) -> u64 {
        let elapsed = now.saturating_sub(self.last_check_ms);
        (check_interval_ms as u64).saturating_sub(elapsed)
    }

    async fn connectivity_check(&mut self) {
        self.last_check_ms = self.clock.now_ms();
        self.checks = self.checks.wrapping_add(1);
        log_debug!("registration query ({:?})", self.state);
        let _ = self.command(ModemCommand::RegistrationQuery).await;
    }

    async fn command(&mut self, cmd: ModemCommand) -> Result<(), ModemFault> {
        let result = self.modem.send(cmd).await;
        if let Err(fault) = result {
            self.faults = self.faults.wrapping_add(1);
            log_error!("modem command {:?} failed: {:?}", cmd, fault);
        }
        self.delay.delay_ms(SETTLE_MS).await;
        result
    }

    async fn wait(&mut self, ms: u64) {
        let mut left = ms;
        while left > 0 {
            let chunk = left.min(u32::MAX as u64) as u32;
            self.delay.delay_ms(chunk).await;
            left -= chunk as u64;
        }
    }
}
