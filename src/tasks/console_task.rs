use core::fmt::Write;

use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::dma::NoDma;
use embassy_stm32::peripherals::SPI3;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;

use geotrack::config::{update_config, SharedConfig, SlotStore};
use geotrack::drivers::flash::W25qxx;
use geotrack::form::{apply_form, encode_form, FORM_MAX};
use geotrack::state::PositionReport;

use crate::usb::{self, UsbSerial};

pub type ConfigStorage = SlotStore<W25qxx<'static, SPI3, NoDma, NoDma>>;
pub type ReportReceiver = Receiver<'static, CriticalSectionRawMutex, PositionReport, 4>;

type Line = heapless::String<{ FORM_MAX + 8 }>;

/// Console task: the settings surface and report sink on USB CDC.
///
/// Commands, one per line:
///   `get`          current settings as a form-encoded line
///   `set <form>`   replace settings; fields left out keep their value
#[task]
pub async fn console_task(
    mut serial: UsbSerial<'static>,
    mut store: ConfigStorage,
    config: &'static SharedConfig<CriticalSectionRawMutex>,
    report_rx: ReportReceiver,
) {
    let mut line = Line::new();
    let mut packet = [0u8; usb::MAX_PACKET];

    loop {
        serial.wait_connection().await;
        line.clear();

        loop {
            match select(serial.read_packet(&mut packet), report_rx.receive()).await {
                Either::First(Ok(n)) => {
                    for &b in &packet[..n] {
                        match b {
                            b'\r' => {}
                            b'\n' => {
                                let reply = handle_command(line.as_str(), &mut store, config).await;
                                line.clear();
                                let _ = usb::write_all(&mut serial, reply.as_bytes()).await;
                            }
                            _ => {
                                if line.push(b as char).is_err() {
                                    line.clear();
                                    let _ = usb::write_all(&mut serial, b"err line too long\r\n").await;
                                }
                            }
                        }
                    }
                }
                Either::First(Err(_)) => break, // disconnected
                Either::Second(report) => {
                    let mut m = heapless::String::<128>::new();
                    let _ = write!(
                        m,
                        "[RPT] #{} lat={:.6} lon={:.6} s={} alt={:.0}m moved={:.1}m\r\n",
                        report.seq,
                        report.position.lat,
                        report.position.lon,
                        report.sats,
                        report.alt_m,
                        report.moved_m
                    );
                    let _ = usb::write_all(&mut serial, m.as_bytes()).await;
                }
            }
        }
    }
}

async fn handle_command(
    line: &str,
    store: &mut ConfigStorage,
    config: &'static SharedConfig<CriticalSectionRawMutex>,
) -> Line {
    let mut reply = Line::new();
    let line = line.trim();

    if line == "get" {
        let (_, current) = config.snapshot();
        match encode_form(&current) {
            Ok(form) => {
                let _ = reply.push_str(form.as_str());
                let _ = reply.push_str("\r\n");
            }
            Err(e) => {
                let _ = write!(reply, "err {:?}\r\n", e);
            }
        }
    } else if let Some(form) = line.strip_prefix("set ") {
        let (_, current) = config.snapshot();
        match apply_form(&current, form) {
            Ok(next) => match update_config(store, config, next).await {
                Ok(revision) => {
                    defmt::info!("config updated, revision {}", revision);
                    let _ = write!(reply, "ok {}\r\n", revision);
                }
                Err(e) => {
                    defmt::warn!("config update rejected");
                    let _ = write!(reply, "err {:?}\r\n", e);
                }
            },
            Err(e) => {
                let _ = write!(reply, "err {:?}\r\n", e);
            }
        }
    } else if !line.is_empty() {
        let _ = reply.push_str("err unknown command\r\n");
    }
    reply
}
