// MK68564 dual-channel UART bank. Grounded on original_source/uart.c's
// register layout and `uart_console_*` console wiring; only channel B of
// UART A is connected to process stdio (§6), the remaining fifteen
// channels answer with a quiescent status word sufficient for driver probe.

use std::collections::VecDeque;

use crate::bus::Device;
use crate::cpu::{CpuId, InterruptTablesHandle};
use crate::csr::INT_LEVEL_UART;
use crate::size::Width;

const REG_CMD_STATUS_A: u32 = 0x00;
const REG_DATA_A: u32 = 0x02;
const REG_CMD_STATUS_B: u32 = 0x04;
const REG_DATA_B: u32 = 0x06;

const STATUS_RX_READY: u8 = 1 << 0;
const STATUS_TX_EMPTY: u8 = 1 << 2;

const UART_INT_VECTOR: u8 = 0x50;

/// One MK68564 channel pair (A + B). Only `console` channels are backed by
/// a real byte stream; the rest are always "idle".
pub struct UartBank {
    is_console: bool,
    rx: VecDeque<u8>,
    interrupts: InterruptTablesHandle,
}

impl UartBank {
    pub fn new(is_console: bool, interrupts: InterruptTablesHandle) -> Self {
        UartBank { is_console, rx: VecDeque::new(), interrupts }
    }

    /// Feeds a byte into channel B's receive queue (console input path) and
    /// raises the UART interrupt for the JOB CPU.
    pub fn push_console_byte(&mut self, byte: u8) {
        if !self.is_console {
            return;
        }
        self.rx.push_back(byte);
        self.interrupts.borrow_mut().raise(CpuId::Job, UART_INT_VECTOR, INT_LEVEL_UART);
    }

    fn status(&self) -> u8 {
        let mut s = STATUS_TX_EMPTY;
        if !self.rx.is_empty() {
            s |= STATUS_RX_READY;
        }
        s
    }
}

impl Device for UartBank {
    fn read(&mut self, _cpu: CpuId, offset: u32, width: Width) -> u32 {
        if width != Width::Byte {
            log::warn!(target: "uart", "non-byte access at offset {:#x}", offset);
        }
        match offset & !1 {
            REG_CMD_STATUS_A => 0,
            REG_DATA_A => 0,
            REG_CMD_STATUS_B => self.status() as u32,
            REG_DATA_B => self.rx.pop_front().unwrap_or(0) as u32,
            _ => 0,
        }
    }

    fn write(&mut self, _cpu: CpuId, offset: u32, _width: Width, value: u32) {
        match offset & !1 {
            REG_DATA_B if self.is_console => {
                print!("{}", value as u8 as char);
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
            _ => {}
        }
    }
}

/// A set of four UART banks at 64-byte strides (§6); only bank 0 is the
/// console.
pub struct Uart {
    banks: [UartBank; 4],
}

impl Uart {
    pub fn new(interrupts: InterruptTablesHandle) -> Self {
        Uart {
            banks: [
                UartBank::new(true, interrupts.clone()),
                UartBank::new(false, interrupts.clone()),
                UartBank::new(false, interrupts.clone()),
                UartBank::new(false, interrupts),
            ],
        }
    }

    pub fn console_mut(&mut self) -> &mut UartBank {
        &mut self.banks[0]
    }
}

impl Device for Uart {
    fn read(&mut self, cpu: CpuId, offset: u32, width: Width) -> u32 {
        let bank = (offset / 0x10000) as usize;
        match self.banks.get_mut(bank) {
            Some(b) => b.read(cpu, offset % 0x10000, width),
            None => 0,
        }
    }

    fn write(&mut self, cpu: CpuId, offset: u32, width: Width, value: u32) {
        let bank = (offset / 0x10000) as usize;
        if let Some(b) = self.banks.get_mut(bank) {
            b.write(cpu, offset % 0x10000, width, value);
        }
    }
}
