#![no_std]
#![no_main]

mod board;
mod tasks;
mod usb;

use embassy_executor::Spawner;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{Uart, UartTx};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use geotrack::config::{load_or_default, Config, SharedConfig, SlotStore};
use geotrack::drivers::flash::W25qxx;
use geotrack::state::PositionReport;

use crate::board::{uart_config, Board, CONFIG_FLASH_BASE, GPS_BAUD};

// ── Shared state ──────────────────────────────────────────────────────────────
//  Reports wait here for the USB console; the tracker drops them when full.
static REPORT_CHAN: Channel<CriticalSectionRawMutex, PositionReport, 4> = Channel::new();
static CONFIG: StaticCell<SharedConfig<CriticalSectionRawMutex>> = StaticCell::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    USART3 => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;

    // 2. USB CDC settings console
    let (usb_dev, usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // 3. SPI3 @ 20 MHz, W25Q config flash (SCK=PC10, MOSI=PC12, MISO=PC11, CS=PA15)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(20_000_000);
    let spi = Spi::new(p.SPI3, p.PC10, p.PC12, p.PC11, NoDma, NoDma, spi_config);
    let cs_flash = Output::new(p.PA15.degrade(), Level::High, Speed::VeryHigh);
    let mut flash = W25qxx::new(spi, cs_flash);
    match flash.read_id() {
        Ok(id) => defmt::info!("flash id {:x}", id),
        Err(_) => defmt::warn!("flash not responding"),
    }

    // 4. Configuration: stored record, or defaults on blank/corrupt flash
    let mut store = SlotStore::new(flash, CONFIG_FLASH_BASE);
    let config = load_or_default(&mut store).await;
    defmt::info!(
        "modem pins tx={} rx={} baud={}",
        config.modem_tx_pin,
        config.modem_rx_pin,
        config.baud_rate
    );
    let modem_baud = config.baud_rate;
    let shared: &'static SharedConfig<CriticalSectionRawMutex> = CONFIG.init(SharedConfig::new(config));

    // 5. GPS USART3 (TX=PB10, RX=PB11)
    let gps_uart = Uart::new(
        p.USART3, p.PB11, p.PB10,
        Irqs,
        p.DMA1_CH3, p.DMA1_CH1,
        uart_config(GPS_BAUD),
    ).unwrap();

    // 6. Modem UART4 TX only (TX=PA0); responses are not read. Opened at the
    //    default rate, then switched; a rate the peripheral rejects keeps the
    //    default so the console stays up to correct it.
    let mut modem_tx = UartTx::new(p.UART4, p.PA0, p.DMA1_CH4, uart_config(Config::default().baud_rate)).unwrap();
    if modem_tx.set_config(&uart_config(modem_baud)).is_err() {
        defmt::warn!("modem baud {} unsupported, using default", modem_baud);
        let _ = modem_tx.set_config(&uart_config(Config::default().baud_rate));
    }

    // 7. Heartbeat LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    // Give the modem time to boot before the first AT command
    Timer::after(Duration::from_millis(500)).await;

    // 8. Spawn tasks
    spawner.spawn(tasks::tracker_task::tracker_task(
        gps_uart,
        modem_tx,
        shared,
        REPORT_CHAN.sender(),
    )).unwrap();

    spawner.spawn(tasks::console_task::console_task(
        usb_serial,
        store,
        shared,
        REPORT_CHAN.receiver(),
    )).unwrap();

    // 9. Main task: LED heartbeat @ 1 Hz
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
