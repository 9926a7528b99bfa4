use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::peripherals::{DMA1_CH1, DMA1_CH3, DMA1_CH4, UART4, USART3};
use embassy_stm32::usart::{Uart, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Delay, Duration, Instant, Timer};

use geotrack::clock::Clock;
use geotrack::config::SharedConfig;
use geotrack::control::{BurstSource, ControlLoop};
use geotrack::drivers::modem::AtModem;
use geotrack::state::PositionReport;
use geotrack::uplink::{Uplink, UplinkError};

pub type ReportSender = Sender<'static, CriticalSectionRawMutex, PositionReport, 4>;

pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

/// Hands reports to the console task, which prints them over USB. Reports
/// are dropped, not queued, when the console is behind.
pub struct ConsoleUplink {
    tx: ReportSender,
}

impl Uplink for ConsoleUplink {
    async fn report(&mut self, _endpoint: &str, report: &PositionReport) -> Result<(), UplinkError> {
        self.tx.try_send(*report).map_err(|_| UplinkError::Unavailable)
    }
}

/// Tracker task, owns the control loop. Reads NMEA bursts from USART3 and
/// drives the modem on UART4.
#[task]
pub async fn tracker_task(
    mut gps_uart: Uart<'static, USART3, DMA1_CH3, DMA1_CH1>,
    modem_tx: UartTx<'static, UART4, DMA1_CH4>,
    config: &'static SharedConfig<CriticalSectionRawMutex>,
    report_tx: ReportSender,
) {
    let mut tracker = ControlLoop::new(
        config,
        AtModem::new(modem_tx),
        Delay,
        EmbassyClock,
        ConsoleUplink { tx: report_tx },
    );
    tracker.start().await;

    let mut buf = [0u8; 512];
    loop {
        // 1 Hz receiver: a sentence burst, then an idle line
        let n = match select(
            gps_uart.read_until_idle(&mut buf),
            Timer::after(Duration::from_millis(1100)),
        )
        .await
        {
            Either::First(Ok(n)) => n,
            Either::First(Err(_)) | Either::Second(_) => 0,
        };

        tracker.tick(&mut BurstSource::new(&buf[..n])).await;
    }
}
