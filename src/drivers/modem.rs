use embedded_io_async::Write;

/// Settle time after each modem command, ms.
pub const SETTLE_MS: u32 = 100;

/// The only lines the tracker ever sends to the cellular modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemCommand {
    GnssPowerOn,
    RegistrationQuery,
    SleepClockEnable,
    SleepClockDisable,
}

impl ModemCommand {
    pub const fn at(self) -> &'static str {
        match self {
            ModemCommand::GnssPowerOn => "AT+CGNSPWR=1",
            ModemCommand::RegistrationQuery => "AT+CREG?",
            ModemCommand::SleepClockEnable => "AT+CSCLK=1",
            ModemCommand::SleepClockDisable => "AT+CSCLK=0",
        }
    }
}

/// A command could not be handed to the modem. Acknowledgements are not
/// read back, so a successful send only means the line left the UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemFault {
    Write,
    Flush,
}

/// Fire-and-forget command channel. The caller owns the settle delay.
pub trait ModemChannel {
    async fn send(&mut self, cmd: ModemCommand) -> Result<(), ModemFault>;
}

/// AT modem on any async byte sink (UART TX on the board).
pub struct AtModem<W: Write> {
    tx: W,
}

impl<W: Write> AtModem<W> {
    pub fn new(tx: W) -> Self {
        Self { tx }
    }

    pub fn release(self) -> W {
        self.tx
    }
}

impl<W: Write> ModemChannel for AtModem<W> {
    async fn send(&mut self, cmd: ModemCommand) -> Result<(), ModemFault> {
        self.tx
            .write_all(cmd.at().as_bytes())
            .await
            .map_err(|_| ModemFault::Write)?;
        self.tx.write_all(b"\r\n").await.map_err(|_| ModemFault::Write)?;
        self.tx.flush().await.map_err(|_| ModemFault::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_io_async::{ErrorKind, ErrorType};

    #[derive(Default)]
    struct Sink {
        bytes: Vec<u8>,
        fail: bool,
    }

    impl ErrorType for Sink {
        type Error = ErrorKind;
    }

    impl Write for Sink {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
            if self.fail {
                return Err(ErrorKind::BrokenPipe);
            }
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn writes_crlf_terminated_lines() {
        let mut modem = AtModem::new(Sink::default());
        block_on(modem.send(ModemCommand::SleepClockEnable)).unwrap();
        block_on(modem.send(ModemCommand::RegistrationQuery)).unwrap();
        let sink = modem.release();
        assert_eq!(sink.bytes, b"AT+CSCLK=1\r\nAT+CREG?\r\n");
    }

    #[test]
    fn write_errors_surface_as_faults() {
        let mut modem = AtModem::new(Sink {
            fail: true,
            ..Default::default()
        });
        assert_eq!(
            block_on(modem.send(ModemCommand::GnssPowerOn)),
            Err(ModemFault::Write)
        );
    }

    #[test]
    fn command_lines() {
        assert_eq!(ModemCommand::GnssPowerOn.at(), "AT+CGNSPWR=1");
        assert_eq!(ModemCommand::SleepClockDisable.at(), "AT+CSCLK=0");
    }
}
