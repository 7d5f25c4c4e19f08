//! GPIO / peripheral pin assignments for the roast monitor board.
//!
//! Single source of truth; `main` builds every peripheral from these.

// ---------------------------------------------------------------------------
// MAX31855 thermocouple amplifier (SPI2, read-only)
// ---------------------------------------------------------------------------

pub const TC_SCK_GPIO: i32 = 12;
/// MAX31855 SO line. The chip has no MOSI input.
pub const TC_MISO_GPIO: i32 = 13;
/// Active-low chip select.
pub const TC_CS_GPIO: i32 = 10;

/// SPI clock. The MAX31855 tops out at 5 MHz; 1 MHz leaves margin for
/// the long probe lead.
pub const TC_SPI_HZ: u32 = 1_000_000;

// ---------------------------------------------------------------------------
// Status LED (single colour, active HIGH)
// ---------------------------------------------------------------------------

pub const STATUS_LED_GPIO: i32 = 2;
