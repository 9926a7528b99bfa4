use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

use crate::config::ConfigFlash;

const CMD_JEDEC_ID: u8 = 0x9F;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_READ_STATUS1: u8 = 0x05;
const CMD_READ_DATA: u8 = 0x03;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_SECTOR_ERASE_4K: u8 = 0x20;

const STATUS_BUSY: u8 = 0x01;

pub const PAGE_SIZE: usize = 256;

/// Winbond W25Qxx SPI NOR flash, used as the configuration store.
pub struct W25qxx<'d, T: Instance, Tx, Rx> {
    spi: Spi<'d, T, Tx, Rx>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance, Tx, Rx> W25qxx<'d, T, Tx, Rx> {
    pub fn new(spi: Spi<'d, T, Tx, Rx>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    pub fn read_id(&mut self) -> Result<[u8; 3], Error> {
        let mut id = [0u8; 3];
        self.select(|spi| {
            spi.blocking_write(&[CMD_JEDEC_ID])?;
            spi.blocking_read(&mut id)
        })?;
        Ok(id)
    }

    /// Runs `f` with CS asserted; CS is released even when the transfer fails.
    fn select<R>(
        &mut self,
        f: impl FnOnce(&mut Spi<'d, T, Tx, Rx>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.cs.set_low();
        let result = f(&mut self.spi);
        self.cs.set_high();
        result
    }

    fn write_enable(&mut self) -> Result<(), Error> {
        self.select(|spi| spi.blocking_write(&[CMD_WRITE_ENABLE]))
    }

    fn status(&mut self) -> Result<u8, Error> {
        let mut status = [0u8; 1];
        self.select(|spi| {
            spi.blocking_write(&[CMD_READ_STATUS1])?;
            spi.blocking_read(&mut status)
        })?;
        Ok(status[0])
    }

    async fn wait_ready(&mut self) -> Result<(), Error> {
        while self.status()? & STATUS_BUSY != 0 {
            Timer::after(Duration::from_millis(1)).await;
        }
        Ok(())
    }
}

fn header(cmd: u8, address: u32) -> [u8; 4] {
    [cmd, (address >> 16) as u8, (address >> 8) as u8, address as u8]
}

impl<'d, T: Instance, Tx, Rx> ConfigFlash for W25qxx<'d, T, Tx, Rx> {
    type Error = Error;
    const SECTOR_SIZE: u32 = 4096;

    async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.wait_ready().await?;
        self.select(|spi| {
            spi.blocking_write(&header(CMD_READ_DATA, address))?;
            spi.blocking_read(buf)
        })
    }

    async fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        self.wait_ready().await?;
        self.write_enable()?;
        self.select(|spi| spi.blocking_write(&header(CMD_SECTOR_ERASE_4K, address)))?;
        self.wait_ready().await
    }

    async fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        debug_assert!(data.len() <= PAGE_SIZE);
        self.wait_ready().await?;
        self.write_enable()?;
        self.select(|spi| {
            spi.blocking_write(&header(CMD_PAGE_PROGRAM, address))?;
            spi.blocking_write(data)
        })?;
        self.wait_ready().await
    }
}
