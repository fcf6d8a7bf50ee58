//! Serprog command dispatcher
//!
//! The dispatcher owns the whole device state: the host link, the SPI bus
//! and the chip-select lines. It sits in a single state, waiting for an
//! opcode. Every command consumes its payload straight off the link and
//! answers with exactly one status byte (ACK, optionally followed by data, or
//! a lone NAK), after which the link is flushed.
//!
//! Bulk O_SPIOP payloads are streamed through a fixed scratch buffer of
//! [`SPI_CHUNK_SIZE`] bytes; nothing is buffered in full.

use core::convert::Infallible;

use crate::bus::{SpiBus, SpiController};
use crate::config::{NUM_CS, SPI_CHUNK_SIZE};
use crate::cs::{ChipSelectPin, ChipSelects};
use crate::descriptor::{Descriptor, DEFAULT_DESCRIPTOR};
use crate::error::Result;
use crate::protocol::*;
use crate::transport::Transport;
use embedded_hal::delay::DelayNs;
use maybe_async::maybe_async;

/// Serprog device state and command loop
pub struct Dispatcher<T, S, P, D, const N: usize = NUM_CS> {
    link: T,
    bus: SpiBus<S>,
    cs: ChipSelects<P, D, N>,
    descriptor: Descriptor,
    scratch: [u8; SPI_CHUNK_SIZE],
}

impl<T, S, P, D, const N: usize> Dispatcher<T, S, P, D, N>
where
    T: Transport,
    S: SpiController,
    P: ChipSelectPin,
    D: DelayNs,
{
    /// Create a dispatcher advertising the default descriptor.
    ///
    /// The bus is left as configured; call [`enable_bus`](Self::enable_bus)
    /// to drive it before the first command, as the host expects.
    pub fn new(link: T, bus: SpiBus<S>, cs: ChipSelects<P, D, N>) -> Self {
        Self {
            link,
            bus,
            cs,
            descriptor: DEFAULT_DESCRIPTOR,
            scratch: [0; SPI_CHUNK_SIZE],
        }
    }

    /// Advertise a different identity or command set.
    ///
    /// Opcodes missing from the descriptor's command map are answered with
    /// NAK even if this dispatcher knows them.
    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Descriptor reported by the query commands
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// SPI bus driver
    pub fn bus(&self) -> &SpiBus<S> {
        &self.bus
    }

    /// SPI bus driver (mutable)
    pub fn bus_mut(&mut self) -> &mut SpiBus<S> {
        &mut self.bus
    }

    /// Chip-select lines
    pub fn chip_selects(&self) -> &ChipSelects<P, D, N> {
        &self.cs
    }

    /// Host link
    pub fn link(&self) -> &T {
        &self.link
    }

    /// Host link (mutable)
    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    /// Take the dispatcher apart
    pub fn into_parts(self) -> (T, SpiBus<S>, ChipSelects<P, D, N>) {
        (self.link, self.bus, self.cs)
    }

    /// Drive the SPI lines and the active chip select
    pub fn enable_bus(&mut self) {
        self.cs.engage();
        self.bus.enable();
    }

    /// Float the SPI lines and every chip select
    pub fn disable_bus(&mut self) {
        self.cs.release();
        self.bus.disable();
    }
}

#[maybe_async]
impl<T, S, P, D, const N: usize> Dispatcher<T, S, P, D, N>
where
    T: Transport,
    S: SpiController,
    P: ChipSelectPin,
    D: DelayNs,
{
    /// Serve commands until the session ends.
    ///
    /// Rejected commands are answered with NAK and do not end the session;
    /// only a link or bus failure does.
    pub async fn run(&mut self) -> Result<Infallible> {
        loop {
            self.process().await?;
        }
    }

    /// Read, execute and answer one command; returns its opcode
    pub async fn process(&mut self) -> Result<u8> {
        let opcode = self.next_opcode().await?;
        self.execute(opcode).await?;
        self.flush().await?;
        Ok(opcode)
    }

    /// Wait for the next opcode byte
    pub async fn next_opcode(&mut self) -> Result<u8> {
        self.link.read_byte().await
    }

    /// Push the response of the last command to the host
    pub async fn flush(&mut self) -> Result<()> {
        self.link.flush().await
    }

    /// Consume the payload of `opcode` and write its response (unflushed).
    ///
    /// Returns an error only when the session cannot continue.
    pub async fn execute(&mut self, opcode: u8) -> Result<()> {
        if !self.descriptor.cmdmap.is_supported(opcode) {
            log::debug!("Unsupported command 0x{:02X}", opcode);
            return self.nak().await;
        }

        let result = match opcode {
            S_CMD_NOP => self.ack().await,
            S_CMD_Q_IFACE => self.query_iface().await,
            S_CMD_Q_CMDMAP => self.query_cmdmap().await,
            S_CMD_Q_PGMNAME => self.query_name().await,
            S_CMD_Q_SERBUF => self.query_serbuf().await,
            S_CMD_Q_BUSTYPE => self.query_bustype().await,
            S_CMD_SYNCNOP => self.sync_nop().await,
            S_CMD_S_BUSTYPE => self.set_bustype().await,
            S_CMD_O_SPIOP => self.spi_op().await,
            S_CMD_S_SPI_FREQ => self.set_spi_freq().await,
            S_CMD_S_PIN_STATE => self.set_pin_state().await,
            S_CMD_S_SPI_CS => self.set_spi_cs().await,
            _ => {
                log::debug!("Unsupported command 0x{:02X}", opcode);
                self.nak().await
            }
        };

        match result {
            Err(e) if !e.is_fatal() => {
                log::debug!(
                    "{} rejected: {}",
                    command_name(opcode).unwrap_or("command"),
                    e
                );
                self.nak().await
            }
            other => other,
        }
    }

    async fn ack(&mut self) -> Result<()> {
        self.link.write_byte(S_ACK).await
    }

    async fn nak(&mut self) -> Result<()> {
        self.link.write_byte(S_NAK).await
    }

    async fn query_iface(&mut self) -> Result<()> {
        self.ack().await?;
        let version = self.descriptor.interface_version.to_le_bytes();
        self.link.write_exact(&version).await
    }

    async fn query_cmdmap(&mut self) -> Result<()> {
        self.ack().await?;
        let map = self.descriptor.cmdmap.to_bytes();
        self.link.write_exact(&map).await
    }

    async fn query_name(&mut self) -> Result<()> {
        self.ack().await?;
        let name = self.descriptor.name;
        self.link.write_exact(&name).await
    }

    async fn query_serbuf(&mut self) -> Result<()> {
        self.ack().await?;
        let size = self.descriptor.serial_buffer_size.to_le_bytes();
        self.link.write_exact(&size).await
    }

    async fn query_bustype(&mut self) -> Result<()> {
        self.ack().await?;
        let bus_types = self.descriptor.bus_types.bits();
        self.link.write_byte(bus_types).await
    }

    async fn sync_nop(&mut self) -> Result<()> {
        self.nak().await?;
        self.ack().await
    }

    async fn set_bustype(&mut self) -> Result<()> {
        let requested = BusTypes::from_bits_retain(self.link.read_byte().await?);
        if requested.contains(BusTypes::SPI) {
            self.ack().await
        } else {
            log::debug!("S_BUSTYPE without SPI: 0x{:02X}", requested.bits());
            self.nak().await
        }
    }

    async fn set_spi_freq(&mut self) -> Result<()> {
        let requested = self.link.read_u32_le().await?;
        let actual = self.bus.set_clock(requested)?;
        self.ack().await?;
        self.link.write_exact(&actual.to_le_bytes()).await
    }

    async fn set_pin_state(&mut self) -> Result<()> {
        if self.link.read_byte().await? != 0 {
            self.enable_bus();
        } else {
            self.disable_bus();
        }
        self.ack().await
    }

    async fn set_spi_cs(&mut self) -> Result<()> {
        let index = self.link.read_byte().await?;
        let bus_enabled = self.bus.is_enabled();
        self.cs.set_active(index, bus_enabled)?;
        self.ack().await
    }

    async fn spi_op(&mut self) -> Result<()> {
        let write_len = self.link.read_u24_le().await? as usize;
        let read_len = self.link.read_u24_le().await? as usize;
        log::trace!(
            "O_SPIOP on CS{}: write {} bytes, read {} bytes",
            self.cs.active(),
            write_len,
            read_len
        );

        self.cs.select();
        let result = self.spi_op_phases(write_len, read_len).await;
        self.cs.deselect();
        result
    }

    async fn spi_op_phases(&mut self, write_len: usize, read_len: usize) -> Result<()> {
        let mut remaining = write_len;
        while remaining > 0 {
            let chunk = &mut self.scratch[..remaining.min(SPI_CHUNK_SIZE)];
            self.link.read_exact(chunk).await?;
            self.bus.write(chunk)?;
            remaining -= chunk.len();
        }

        self.ack().await?;

        let mut remaining = read_len;
        while remaining > 0 {
            let chunk = &mut self.scratch[..remaining.min(SPI_CHUNK_SIZE)];
            self.bus.read(chunk)?;
            self.link.write_exact(chunk).await?;
            remaining -= chunk.len();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::pl022;
    use crate::config::RP2040_CLK_PERI_HZ;
    use crate::cs::PinMode;
    use crate::descriptor::SUPPORTED_COMMANDS;
    use crate::error::Error;
    use crate::mock::{mock_chip_selects, Event, EventLog, MockDelay, MockLink, MockPin, MockSpi};
    use std::vec::Vec;

    type TestDispatcher = Dispatcher<MockLink, MockSpi, MockPin, MockDelay>;

    fn dispatcher(input: &[u8], log: &EventLog) -> TestDispatcher {
        let mut d = Dispatcher::new(
            MockLink::new(input),
            SpiBus::new(MockSpi::new(log)),
            mock_chip_selects(log),
        );
        d.enable_bus();
        log.take();
        d
    }

    /// Serve commands until the scripted input runs out
    #[maybe_async]
    async fn run_script(d: &mut TestDispatcher) {
        let err = d.run().await.unwrap_err();
        assert_eq!(err, Error::Disconnected);
    }

    fn spiop(write: &[u8], read_len: usize) -> Vec<u8> {
        let mut frame = std::vec![S_CMD_O_SPIOP];
        frame.extend_from_slice(&(write.len() as u32).to_le_bytes()[..3]);
        frame.extend_from_slice(&(read_len as u32).to_le_bytes()[..3]);
        frame.extend_from_slice(write);
        frame
    }

    /// A well-formed instance of each supported command
    fn well_formed(opcode: u8) -> Vec<u8> {
        match opcode {
            S_CMD_S_BUSTYPE => std::vec![opcode, BusTypes::SPI.bits()],
            S_CMD_O_SPIOP => spiop(&[0x9F], 3),
            S_CMD_S_SPI_FREQ => {
                let mut frame = std::vec![opcode];
                frame.extend_from_slice(&8_000_000u32.to_le_bytes());
                frame
            }
            S_CMD_S_PIN_STATE => std::vec![opcode, 1],
            S_CMD_S_SPI_CS => std::vec![opcode, 1],
            _ => std::vec![opcode],
        }
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn queries_report_the_descriptor() {
        let log = EventLog::new();
        let mut d = dispatcher(
            &[
                S_CMD_NOP,
                S_CMD_Q_IFACE,
                S_CMD_Q_SERBUF,
                S_CMD_Q_BUSTYPE,
                S_CMD_Q_PGMNAME,
                S_CMD_Q_CMDMAP,
            ],
            &log,
        );
        run_script(&mut d).await;

        let mut expected = std::vec![S_ACK, S_ACK, 0x01, 0x00, S_ACK, 0xFF, 0xFF, S_ACK, 0x08];
        expected.push(S_ACK);
        expected.extend_from_slice(b"pico-serprog\0\0\0\0");
        expected.push(S_ACK);
        expected.extend_from_slice(&DEFAULT_DESCRIPTOR.cmdmap.to_bytes());
        assert_eq!(d.link().flushed(), expected.as_slice());
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn every_response_is_flushed_per_command() {
        let log = EventLog::new();
        let mut d = dispatcher(&[S_CMD_NOP, S_CMD_SYNCNOP], &log);
        let opcode = d.process().await;
        assert_eq!(opcode, Ok(S_CMD_NOP));
        assert_eq!(d.link().flushed(), &[S_ACK]);
        assert!(d.link().pending().is_empty());
        let opcode = d.process().await;
        assert_eq!(opcode, Ok(S_CMD_SYNCNOP));
        assert_eq!(d.link().flushed(), &[S_ACK, S_NAK, S_ACK]);
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn supported_commands_are_acknowledged() {
        for &opcode in SUPPORTED_COMMANDS {
            assert!(DEFAULT_DESCRIPTOR.cmdmap.is_supported(opcode));
            let log = EventLog::new();
            let mut d = dispatcher(&well_formed(opcode), &log);
            d.process().await.unwrap();

            let expected_first = if opcode == S_CMD_SYNCNOP { S_NAK } else { S_ACK };
            assert_eq!(
                d.link().flushed()[0],
                expected_first,
                "0x{:02X} answered wrongly",
                opcode
            );
            assert_eq!(d.link().consumed(), well_formed(opcode).len());
        }
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn unsupported_commands_nak_without_consuming() {
        for opcode in 0..=u8::MAX {
            if SUPPORTED_COMMANDS.contains(&opcode) {
                continue;
            }
            assert!(!DEFAULT_DESCRIPTOR.cmdmap.is_supported(opcode));
            let log = EventLog::new();
            let mut d = dispatcher(&[opcode, 0xAA, 0xBB], &log);
            let processed = d.process().await;
            assert_eq!(processed, Ok(opcode));
            assert_eq!(d.link().flushed(), &[S_NAK]);
            assert_eq!(d.link().consumed(), 1);
            assert!(log.take().is_empty());
        }
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn sync_nop_is_nak_then_ack() {
        let log = EventLog::new();
        let mut d = dispatcher(&[S_CMD_SYNCNOP; 3], &log);
        run_script(&mut d).await;
        assert_eq!(
            d.link().flushed(),
            &[S_NAK, S_ACK, S_NAK, S_ACK, S_NAK, S_ACK]
        );
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn bus_type_needs_spi() {
        let log = EventLog::new();
        let mut d = dispatcher(
            &[
                S_CMD_S_BUSTYPE, 0x08,
                S_CMD_S_BUSTYPE, 0x0F,
                S_CMD_S_BUSTYPE, 0x07,
                S_CMD_S_BUSTYPE, 0x00,
            ],
            &log,
        );
        run_script(&mut d).await;
        assert_eq!(d.link().flushed(), &[S_ACK, S_ACK, S_NAK, S_NAK]);
        assert!(d.bus().is_enabled());
        assert!(log.take().is_empty());
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn zero_frequency_is_rejected() {
        let log = EventLog::new();
        let mut d = dispatcher(&[S_CMD_S_SPI_FREQ, 0, 0, 0, 0], &log);
        let before = d.bus().clock_rate_hz();
        d.process().await.unwrap();
        assert_eq!(d.link().flushed(), &[S_NAK]);
        assert_eq!(d.link().consumed(), 5);
        assert_eq!(d.bus().clock_rate_hz(), before);
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn frequency_reports_the_achievable_rate() {
        for requested in [1u32, 1_000_000, 12_000_000, 50_000_000, u32::MAX] {
            let log = EventLog::new();
            let mut frame = std::vec![S_CMD_S_SPI_FREQ];
            frame.extend_from_slice(&requested.to_le_bytes());
            let mut d = dispatcher(&frame, &log);
            d.process().await.unwrap();

            let out = d.link().flushed();
            assert_eq!(out.len(), 5);
            assert_eq!(out[0], S_ACK);
            let actual = u32::from_le_bytes([out[1], out[2], out[3], out[4]]);
            assert_eq!(actual, pl022::achievable_rate(RP2040_CLK_PERI_HZ, requested));
            assert!(actual <= pl022::max_rate(RP2040_CLK_PERI_HZ));
            assert_eq!(d.bus().clock_rate_hz(), actual);
        }
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn pin_state_toggles_the_bus() {
        let log = EventLog::new();
        let mut d = dispatcher(&[S_CMD_S_PIN_STATE, 0, S_CMD_S_PIN_STATE, 0x42], &log);

        d.process().await.unwrap();
        assert!(!d.bus().is_enabled());
        assert!(!d.bus().peripheral().is_powered());
        for i in 0..NUM_CS {
            assert_eq!(d.chip_selects().pin(i).unwrap().mode(), PinMode::Floating);
        }

        d.process().await.unwrap();
        assert!(d.bus().is_enabled());
        assert_eq!(d.chip_selects().pin(0).unwrap().mode(), PinMode::Output);
        assert_eq!(
            d.chip_selects().pin(1).unwrap().mode(),
            PinMode::InputPullUp
        );
        assert_eq!(d.link().flushed(), &[S_ACK, S_ACK]);
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn chip_select_is_applied_or_rejected() {
        let log = EventLog::new();
        let mut d = dispatcher(&[S_CMD_S_SPI_CS, 2, S_CMD_S_SPI_CS, 4], &log);

        d.process().await.unwrap();
        assert_eq!(d.chip_selects().active(), 2);
        assert_eq!(d.chip_selects().pin(2).unwrap().mode(), PinMode::Output);
        assert_eq!(
            d.chip_selects().pin(0).unwrap().mode(),
            PinMode::InputPullUp
        );
        log.take();

        d.process().await.unwrap();
        assert_eq!(d.chip_selects().active(), 2);
        assert!(log.take().is_empty());
        assert_eq!(d.link().flushed(), &[S_ACK, S_NAK]);
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn chip_select_on_a_disabled_bus_is_deferred() {
        let log = EventLog::new();
        let mut d = dispatcher(
            &[S_CMD_S_PIN_STATE, 0, S_CMD_S_SPI_CS, 3, S_CMD_S_PIN_STATE, 1],
            &log,
        );
        d.process().await.unwrap();
        d.process().await.unwrap();
        assert_eq!(d.chip_selects().pin(3).unwrap().mode(), PinMode::Floating);
        d.process().await.unwrap();
        assert_eq!(d.chip_selects().pin(3).unwrap().mode(), PinMode::Output);
        assert_eq!(d.link().flushed(), &[S_ACK, S_ACK, S_ACK]);
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn spi_op_streams_in_chunks() {
        const LENGTHS: [usize; 6] = [0, 1, 4095, 4096, 4097, 10000];

        for write_len in LENGTHS {
            for read_len in LENGTHS {
                let data: Vec<u8> = (0..write_len).map(|i| (i * 7 + 3) as u8).collect();
                let log = EventLog::new();
                let mut d = dispatcher(&spiop(&data, read_len), &log);
                d.process().await.unwrap();

                // The peer echoes what it was sent, then idles high
                let mut expected = std::vec![S_ACK];
                expected.extend(
                    (0..read_len).map(|i| data.get(i).copied().unwrap_or(0xFF)),
                );
                assert_eq!(
                    d.link().flushed(),
                    expected.as_slice(),
                    "write {} read {}",
                    write_len,
                    read_len
                );
                assert_eq!(d.bus().peripheral().written(), data.as_slice());

                let events = log.take();
                assert_eq!(events.first(), Some(&Event::Delay(crate::config::CS_SETTLE_NS)));
                assert_eq!(events[1], Event::PinLevel(0, false));
                assert_eq!(events[events.len() - 2], Event::PinLevel(0, true));

                let mut written = 0;
                let mut read = 0;
                for event in &events {
                    match *event {
                        Event::SpiWrite(n) => {
                            assert!(n > 0 && n <= SPI_CHUNK_SIZE);
                            written += n;
                        }
                        Event::SpiRead(n) => {
                            assert!(n > 0 && n <= SPI_CHUNK_SIZE);
                            read += n;
                        }
                        _ => {}
                    }
                }
                assert_eq!(written, write_len);
                assert_eq!(read, read_len);
            }
        }
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn truncated_spi_op_releases_chip_select() {
        let log = EventLog::new();
        let mut frame = spiop(&[0u8; 100], 4);
        frame.truncate(frame.len() - 10);
        let mut d = dispatcher(&frame, &log);

        let result = d.process().await;
        assert_eq!(result, Err(Error::Disconnected));
        assert!(d.chip_selects().pin(0).unwrap().is_high());
        assert!(d.link().flushed().is_empty());
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn spi_failure_ends_the_session() {
        let log = EventLog::new();
        let mut d = dispatcher(&spiop(&[0x06], 0), &log);
        d.bus_mut()
            .peripheral_mut()
            .fail_with(embedded_hal::spi::ErrorKind::Overrun);

        let err = d.run().await.unwrap_err();
        assert_eq!(err, Error::Spi(embedded_hal::spi::ErrorKind::Overrun));
        assert!(d.chip_selects().pin(0).unwrap().is_high());
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn probe_on_the_third_chip_select() {
        let log = EventLog::new();
        let mut script = std::vec![S_CMD_NOP, S_CMD_Q_IFACE, S_CMD_S_SPI_CS, 2];
        script.extend(spiop(&[0x9F], 3));
        let mut d = dispatcher(&script, &log);
        run_script(&mut d).await;

        assert_eq!(
            d.link().flushed(),
            &[S_ACK, S_ACK, 0x01, 0x00, S_ACK, S_ACK, 0x9F, 0xFF, 0xFF]
        );
        let levels: Vec<Event> = log
            .take()
            .into_iter()
            .filter(|e| matches!(e, Event::PinLevel(..)))
            .collect();
        assert_eq!(
            levels,
            std::vec![
                Event::PinLevel(2, true),
                Event::PinLevel(2, false),
                Event::PinLevel(2, true),
            ]
        );
    }

    #[maybe_async::test(feature = "is_sync", async(not(feature = "is_sync"), tokio::test))]
    async fn custom_descriptor_changes_name_and_command_set() {
        let log = EventLog::new();
        let descriptor = Descriptor {
            cmdmap: crate::descriptor::CommandMap::from_opcodes(&[S_CMD_NOP, S_CMD_Q_PGMNAME]),
            ..Descriptor::with_name("bench-rig")
        };
        let mut d = dispatcher(&[S_CMD_Q_PGMNAME, S_CMD_Q_IFACE, S_CMD_NOP], &log)
            .with_descriptor(descriptor);
        run_script(&mut d).await;

        let mut expected = std::vec![S_ACK];
        expected.extend_from_slice(b"bench-rig\0\0\0\0\0\0\0");
        expected.extend_from_slice(&[S_NAK, S_ACK]);
        assert_eq!(d.link().flushed(), expected.as_slice());
    }
}
