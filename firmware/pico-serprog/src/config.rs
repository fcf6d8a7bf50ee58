// Board wiring and USB identity.

// =============================================================================
// USB descriptors
// =============================================================================

/// Shared VID/PID for CDC-ACM class devices (pid.codes / VOTI)
pub const USB_VID: u16 = 0x16C0;
pub const USB_PID: u16 = 0x27DD;

pub const USB_MANUFACTURER: &str = "picoprog";
pub const USB_PRODUCT: &str = "pico-serprog";
pub const USB_SERIAL: &str = "00000001";

// =============================================================================
// Pin assignments (GPIO numbers)
// =============================================================================

pub const SPI_SCK_PIN: usize = 2;
pub const SPI_MOSI_PIN: usize = 3;
pub const SPI_MISO_PIN: usize = 4;

/// Chip selects 0..3 sit on GP5..GP8.
pub const CS_PINS: [usize; 4] = [5, 6, 7, 8];

/// On-board LED, lit while a command executes.
pub const LED_PIN: usize = 25;
