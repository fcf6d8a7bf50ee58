//! serprog SPI flash programmer firmware for Raspberry Pi Pico
//!
//! Exposes a USB CDC-ACM serial port speaking the serprog protocol, so
//! flashprog (`-p serprog:dev=/dev/ttyACM0`) and rflasher can drive SPI
//! flash chips through the Pico.
//!
//! ## Pin Assignments
//!
//! | Pin   | Function      |
//! |-------|---------------|
//! | GP2   | SCK           |
//! | GP3   | MOSI          |
//! | GP4   | MISO          |
//! | GP5   | CS0           |
//! | GP6   | CS1           |
//! | GP7   | CS2           |
//! | GP8   | CS3           |
//! | GP25  | Activity LED  |

#![no_std]
#![no_main]

mod board;
mod config;
mod usb_serial;

use defmt::{info, warn, Display2Format};
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Flex, Level, Output};
use embassy_rp::peripherals::USB;
use embassy_rp::spi::{self, Spi};
use embassy_rp::usb::{Driver, InterruptHandler as UsbInterruptHandler};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::{Builder, UsbDevice};
use picoprog_core::bus::SpiBus;
use picoprog_core::config::DEFAULT_SPI_CLOCK_HZ;
use picoprog_core::cs::ChipSelects;
use picoprog_core::Dispatcher;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::board::{CsLine, CycleDelay, PicoSpi};
use crate::config::*;
use crate::usb_serial::{UsbSerial, USB_MAX_PACKET_SIZE};

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => UsbInterruptHandler<USB>;
});

type AppDriver = Driver<'static, USB>;
type AppDispatcher = Dispatcher<UsbSerial, PicoSpi, CsLine, CycleDelay>;

fn usb_config() -> embassy_usb::Config<'static> {
    let mut config = embassy_usb::Config::new(USB_VID, USB_PID);
    config.manufacturer = Some(USB_MANUFACTURER);
    config.product = Some(USB_PRODUCT);
    config.serial_number = Some(USB_SERIAL);
    config.max_power = 100;
    config.max_packet_size_0 = 64;

    // Required for composite devices with IADs (Interface Association Descriptors)
    config.device_class = 0xEF; // Miscellaneous
    config.device_sub_class = 0x02; // Common Class
    config.device_protocol = 0x01; // IAD

    config
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("pico-serprog starting...");

    let p = embassy_rp::init(Default::default());

    // ---- SPI bus ----
    let mut spi_config = spi::Config::default();
    spi_config.frequency = DEFAULT_SPI_CLOCK_HZ;
    spi_config.phase = spi::Phase::CaptureOnFirstTransition;
    spi_config.polarity = spi::Polarity::IdleLow;

    let spi = Spi::new_blocking(p.SPI0, p.PIN_2, p.PIN_3, p.PIN_4, spi_config);
    let bus = SpiBus::new(PicoSpi::new(spi));

    // ---- Chip selects (floating until the bus is enabled) ----
    let cs = ChipSelects::new(
        [
            CsLine::new(Flex::new(p.PIN_5)),
            CsLine::new(Flex::new(p.PIN_6)),
            CsLine::new(Flex::new(p.PIN_7)),
            CsLine::new(Flex::new(p.PIN_8)),
        ],
        CycleDelay,
    );

    let led = Output::new(p.PIN_25, Level::Low);

    info!(
        "SPI0 on GP{}/GP{}/GP{}, CS on GP{}, LED on GP{}",
        SPI_SCK_PIN, SPI_MOSI_PIN, SPI_MISO_PIN, CS_PINS, LED_PIN
    );

    // ---- USB CDC-ACM ----
    let driver = Driver::new(p.USB, Irqs);

    static CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
    static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        usb_config(),
        CONFIG_DESC.init([0; 256]),
        BOS_DESC.init([0; 256]),
        MSOS_DESC.init([0; 256]),
        CONTROL_BUF.init([0; 64]),
    );

    let class = CdcAcmClass::new(
        &mut builder,
        CDC_STATE.init(State::new()),
        USB_MAX_PACKET_SIZE as u16,
    );
    let usb = builder.build();

    // ---- Dispatcher ----
    static DISPATCHER: StaticCell<AppDispatcher> = StaticCell::new();
    let dispatcher = DISPATCHER.init(Dispatcher::new(UsbSerial::new(class), bus, cs));
    dispatcher.enable_bus();
    info!(
        "Bus enabled at {} Hz",
        dispatcher.bus().clock_rate_hz()
    );

    spawner.must_spawn(usb_task(usb));
    spawner.must_spawn(serprog_task(dispatcher, led));

    info!("pico-serprog ready, VID:PID = {:04x}:{:04x}", USB_VID, USB_PID);
}

/// USB device task
#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, AppDriver>) {
    usb.run().await;
}

/// serprog command loop, restarted whenever the USB link comes back
#[embassy_executor::task]
async fn serprog_task(dispatcher: &'static mut AppDispatcher, mut led: Output<'static>) {
    loop {
        dispatcher.link_mut().wait_connection().await;
        info!("USB configured");

        let err = loop {
            let opcode = match dispatcher.next_opcode().await {
                Ok(opcode) => opcode,
                Err(e) => break e,
            };
            led.set_high();
            let result = dispatcher.execute(opcode).await;
            led.set_low();
            if let Err(e) = result {
                break e;
            }
            if let Err(e) = dispatcher.flush().await {
                break e;
            }
        };

        warn!(
            "Session ended ({}), waiting for reconnect...",
            Display2Format(&err)
        );
    }
}
