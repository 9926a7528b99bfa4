use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

bind_interrupts!(pub struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSerial<'a> = CdcAcmClass<'a, UsbDriver>;

/// Full-speed CDC packet size.
pub const MAX_PACKET: usize = 64;

struct UsbBuffers {
    config_desc: [u8; 256],
    bos_desc: [u8; 256],
    control_buf: [u8; 64],
    ep_out_buffer: [u8; 256],
}

static BUFFERS: StaticCell<UsbBuffers> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

/// Builds the USB device with a single CDC-ACM port for the settings console.
/// Must be called once.
pub fn init(
    usb_periph: peripherals::USB_OTG_FS,
    pa12: peripherals::PA12,
    pa11: peripherals::PA11,
) -> (UsbDevice<'static, UsbDriver>, UsbSerial<'static>) {
    let bufs = BUFFERS.init(UsbBuffers {
        config_desc: [0; 256],
        bos_desc: [0; 256],
        control_buf: [0; 64],
        ep_out_buffer: [0; 256],
    });

    let mut usb_config = usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(usb_periph, Irqs, pa12, pa11, &mut bufs.ep_out_buffer, usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("geotrack");
    config.product = Some("GPS tracker console");
    config.serial_number = Some("00000001");

    let mut builder = Builder::new(
        driver,
        config,
        &mut bufs.config_desc,
        &mut bufs.bos_desc,
        &mut [], // msos_descs
        &mut bufs.control_buf,
    );

    let state = CDC_STATE.init(State::new());
    let class = CdcAcmClass::new(&mut builder, state, MAX_PACKET as u16);
    let usb = builder.build();

    (usb, class)
}

/// Writes `data` split into CDC packets, closing with a short packet when
/// the payload is an exact multiple of the packet size.
pub async fn write_all(serial: &mut UsbSerial<'static>, data: &[u8]) -> Result<(), EndpointError> {
    for chunk in data.chunks(MAX_PACKET) {
        serial.write_packet(chunk).await?;
    }
    if data.len() % MAX_PACKET == 0 {
        serial.write_packet(&[]).await?;
    }
    Ok(())
}
