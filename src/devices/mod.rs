// Ambient peripherals: simple `Device` implementations that satisfy the
// memory map of §6 without modelling their hardware cycle-exactly. RAM/ROM
// are plain byte stores; UART, RTC and the multibus stub are pass-through
// interfaces sufficient for driver probing and the console path.

pub mod mbus;
pub mod ram;
pub mod rtc;
pub mod uart;

pub use mbus::MultibusStub;
pub use ram::{MapRam, Ram, Rom, Sram};
pub use rtc::Rtc;
pub use uart::{Uart, UartBank};
