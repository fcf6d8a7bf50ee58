//! USB CDC-ACM byte stream for the dispatcher
//!
//! The CDC class moves whole packets; the dispatcher wants bytes. Reads are
//! served from the last received packet, writes collect into one packet that
//! goes out when full or on flush.

use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_usb::class::cdc_acm::CdcAcmClass;
use embassy_usb::driver::EndpointError;

/// USB full-speed max packet size
pub const USB_MAX_PACKET_SIZE: usize = 64;

/// Link failure, as seen by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkError(EndpointError);

impl embedded_io::Error for LinkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0 {
            // Host closed the port or the cable was pulled
            EndpointError::Disabled => embedded_io::ErrorKind::NotConnected,
            EndpointError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
        }
    }
}

impl From<EndpointError> for LinkError {
    fn from(e: EndpointError) -> Self {
        Self(e)
    }
}

/// Serial port over USB CDC-ACM
pub struct UsbSerial {
    class: CdcAcmClass<'static, Driver<'static, USB>>,
    rx: [u8; USB_MAX_PACKET_SIZE],
    rx_pos: usize,
    rx_len: usize,
    tx: [u8; USB_MAX_PACKET_SIZE],
    tx_len: usize,
    /// The last packet sent was full size; the host needs a ZLP to end the transfer
    needs_zlp: bool,
}

impl UsbSerial {
    pub fn new(class: CdcAcmClass<'static, Driver<'static, USB>>) -> Self {
        Self {
            class,
            rx: [0; USB_MAX_PACKET_SIZE],
            rx_pos: 0,
            rx_len: 0,
            tx: [0; USB_MAX_PACKET_SIZE],
            tx_len: 0,
            needs_zlp: false,
        }
    }

    /// Wait until the host has configured the device (CDC endpoints enabled);
    /// drops stale buffers
    pub async fn wait_connection(&mut self) {
        self.class.wait_connection().await;
        self.rx_pos = 0;
        self.rx_len = 0;
        self.tx_len = 0;
        self.needs_zlp = false;
    }

    async fn send_packet(&mut self, len: usize) -> Result<(), LinkError> {
        self.class.write_packet(&self.tx[..len]).await?;
        self.needs_zlp = len == USB_MAX_PACKET_SIZE;
        Ok(())
    }
}

impl embedded_io_async::ErrorType for UsbSerial {
    type Error = LinkError;
}

impl embedded_io_async::Read for UsbSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Zero-length packets carry nothing; keep waiting
        while self.rx_pos == self.rx_len {
            self.rx_len = self.class.read_packet(&mut self.rx).await?;
            self.rx_pos = 0;
        }
        let n = buf.len().min(self.rx_len - self.rx_pos);
        buf[..n].copy_from_slice(&self.rx[self.rx_pos..self.rx_pos + n]);
        self.rx_pos += n;
        Ok(n)
    }
}

impl embedded_io_async::Write for UsbSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(USB_MAX_PACKET_SIZE - self.tx_len);
        self.tx[self.tx_len..self.tx_len + n].copy_from_slice(&buf[..n]);
        self.tx_len += n;
        if self.tx_len == USB_MAX_PACKET_SIZE {
            self.tx_len = 0;
            self.send_packet(USB_MAX_PACKET_SIZE).await?;
        }
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        if self.tx_len > 0 {
            let len = self.tx_len;
            self.tx_len = 0;
            self.send_packet(len).await
        } else if self.needs_zlp {
            self.send_packet(0).await
        } else {
            Ok(())
        }
    }
}
