use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::Config as UsartConfig;
use embassy_stm32::Config;

/// NMEA output rate of the GNSS receiver UART.
pub const GPS_BAUD: u32 = 9_600;

/// Start of the two config slots in SPI flash.
pub const CONFIG_FLASH_BASE: u32 = 0;

pub struct Board {
    pub p: embassy_stm32::Peripherals,
}

impl Board {
    /// 168 MHz core from the 8 MHz crystal, 48 MHz for USB.
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2),
            divq: Some(PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        Self {
            p: embassy_stm32::init(config),
        }
    }
}

pub fn uart_config(baudrate: u32) -> UsartConfig {
    let mut config = UsartConfig::default();
    config.baudrate = baudrate;
    config
}
